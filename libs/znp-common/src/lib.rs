//! ZNP Common Library
//!
//! Shared utilities used by the ZNP link crates: a unified error type,
//! figment-based configuration loading and tracing-subscriber setup.

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use error::{Error, Result};
pub use logging::{init_logging, LogConfig, LogFormat};

/// Common prelude
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::logging::init_logging;
    pub use tracing::{debug, error, info, trace, warn};
}
