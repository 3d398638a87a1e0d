//! # Lockbox Daemon
//!
//! The process-resident half of lockbox: the session, the credential tree,
//! and the glue that keeps local keyrings in step with the registry.
//!
//! ## Overview
//!
//! - **Session**: one slot holding the logged in identity, its auth body,
//!   bearer token, and passphrase
//! - **Daemon**: the process context handed to every request handler
//! - **Credential tree**: create, read, version, and unset credentials;
//!   values are sealed before they leave the process
//! - **Routes**: the local login/logout/status/version contract
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lockbox_daemon::{Config, Daemon};
//! use lockbox_core::{CredentialPath, PathExp};
//! use lockbox_registry::CallOptions;
//!
//! async fn example() -> lockbox_daemon::Result<()> {
//!     let daemon = Daemon::with_http_registry(Config::from_env()?)?;
//!     // ... log in through the `/login` route ...
//!
//!     let opts = CallOptions::default();
//!     let dev = PathExp::parse("/org1/proj1/dev")?;
//!     daemon.credentials().create(&dev, "db-password", b"s3cr3t", &opts, None).await?;
//!
//!     let path = CredentialPath::parse("/org1/proj1/dev/db-password")?;
//!     let found = daemon.credentials().get(&path, &opts).await?;
//!     assert_eq!(found[0].value.as_deref(), Some(&b"s3cr3t"[..]));
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `lockbox_daemon::core` - envelopes, credentials, path expressions
//! - `lockbox_daemon::keyring` - keyring engine and claim chain
//! - `lockbox_daemon::registry` - registry transport

pub mod config;
pub mod credential_tree;
pub mod daemon;
pub mod error;
pub mod routes;
pub mod session;

// Re-export component crates
pub use lockbox_core as core;
pub use lockbox_keyring as keyring;
pub use lockbox_registry as registry;

pub use config::Config;
pub use credential_tree::{CredentialTree, PlainCredential};
pub use daemon::Daemon;
pub use error::{DaemonError, ErrorCategory, Result, SessionError};
pub use routes::{dispatch, LocalResponse};
pub use session::{Session, SessionKind, SessionType};
