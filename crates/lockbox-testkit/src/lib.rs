//! # Lockbox Testkit
//!
//! Testing utilities for lockbox.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: identities with sealed master keys, ready-made session parts
//! - **Generators**: Proptest strategies for paths, credentials, and envelopes
//! - **Stub server**: a canned-response HTTP registry that records requests
//!
//! ## Test Fixtures
//!
//! ```rust
//! use lockbox_testkit::fixtures::team;
//!
//! let members = team(&["u1", "u2"]);
//! assert_ne!(members[0].id(), members[1].id());
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use lockbox_testkit::generators::credential_envelope;
//!
//! proptest! {
//!     #[test]
//!     fn envelope_roundtrip(env in credential_envelope()) {
//!         let raw = env.to_raw().unwrap();
//!         prop_assert_eq!(CredentialEnvelope::from_raw(&raw).unwrap(), env);
//!     }
//! }
//! ```
//!
//! ## Stub Registry
//!
//! ```rust,ignore
//! let server = StubServer::start(vec![StubResponse::empty(503)]).await?;
//! // point a RegistryClient at server.url(), then inspect server.requests()
//! ```

pub mod fixtures;
pub mod generators;
pub mod stub_server;

pub use fixtures::{init_tracing, team, SessionParts, TestIdentity, TEST_KDF};
pub use stub_server::{RecordedRequest, StubResponse, StubServer};
