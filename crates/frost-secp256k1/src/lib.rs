//! # FROST over secp256k1
//!
//! Threshold Schnorr signatures with distributed key generation, plus
//! thread-safe wrappers around the single-party secp256k1 primitives.
//!
//! ## Layers
//!
//! - [`context`]: shared crypto context with reader/writer locking for
//!   concurrent primitive calls, exclusive re-randomization and teardown
//! - [`marshal`]: per-worker reusable request buffers and the
//!   length-checked unpacking of engine replies
//! - [`ops`]: single-party ECDSA, Schnorr, key tweaking and ECDH
//! - [`frost`]: distributed key generation with verifiable secret sharing
//!   and two-round threshold signing
//! - [`mpc`]: message transport between protocol participants
//!
//! ## Example
//!
//! ```rust,ignore
//! use frost_secp256k1::{frost, CryptoContext, SessionConfig};
//!
//! // Run distributed key generation
//! let key = frost::keygen::run_keygen(&ctx, &config, &transport).await?;
//!
//! // Sign a 32-byte digest with a threshold subset
//! let signature =
//!     frost::sign::run_signing(&ctx, &key, &digest, &participants, &transport).await?;
//! ```

pub mod context;
pub(crate) mod engine;
pub mod error;
pub mod frost;
pub mod marshal;
pub mod mpc;
pub mod ops;
pub mod types;

pub use context::CryptoContext;
pub use error::{Error, Result};
pub use frost::{FrostSigner, KeygenOutput};
pub use marshal::Marshaler;
pub use mpc::{MemoryTransport, Transport};
pub use types::{EcdsaSignature, ParticipantIndex, SessionConfig, SessionId};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default threshold for a 3-party setup
pub const DEFAULT_THRESHOLD: usize = 2;

/// Default number of parties
pub const DEFAULT_PARTIES: usize = 3;
