//! # Secret Types
//!
//! Domain types shared by the source scanner, the differ, the stores and the engine.
//!
//! Plaintext only ever lives in [`SecretValue`] (and therefore [`Payload`]).
//! Those types cannot be serialized or displayed, redact themselves in `Debug`
//! output and zeroize their buffers on drop. Everything that crosses a log,
//! audit or report boundary is a [`Checksum`], a [`VersionToken`] or a name.

pub mod checksum;
pub mod document;
pub mod value;

pub use checksum::Checksum;
pub use document::{RemoteSecretState, SecretDocument, SourceFormat, VersionToken};
pub use value::{Payload, SecretValue};
