//! lazy-build core
//!
//! Error taxonomy and the fully-resolved configuration consumed by the
//! fingerprinting, backend and packaging code in `lazy-cache`.

pub mod config;
pub mod error;

pub use config::{BackendConfig, Compression, Config};
pub use error::{Error, Result};
