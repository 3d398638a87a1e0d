//! # Lockbox Registry
//!
//! Transport between the daemon and the remote registry that stores
//! credential envelopes and keyring claim chains.
//!
//! ## Overview
//!
//! The registry is untrusted storage. It never receives plaintext: values
//! are sealed by the daemon before they leave it, and keyrings travel as
//! signed claims plus per-member key wraps that the daemon verifies by
//! replaying the chain.
//!
//! - [`RegistryClient`] builds authenticated requests and interprets
//!   responses, including structured errors and progress streams
//! - [`Registry`] is the seam the daemon talks through; the client
//!   implements it over HTTP and [`MemoryRegistry`] in memory
//! - [`CallOptions`] bounds a call by deadline or cancellation

pub mod cancel;
pub mod client;
pub mod error;
pub mod memory;
pub mod progress;
pub mod registry;

pub use cancel::{CallOptions, CancelHandle, CancelToken};
pub use client::{ClientConfig, RegistryClient, TokenSource, REGISTRY_VERSION_HEADER, USER_AGENT_PRODUCT};
pub use error::{ApiError, RegistryError, Result};
pub use memory::MemoryRegistry;
pub use progress::{Frame, FrameDecoder, ProgressEvent, ProgressFn, NDJSON};
pub use registry::{CredentialQuery, Registry};
