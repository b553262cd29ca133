//! Chaos Route Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other Chaos Route crates:
//! - Application configuration (server address, access token, tracking settings)
//! - A single error type covering every error category
//! - Structured logging with tracing
//! - Platform directory lookup
//! - Common constants

pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod constants;

// Re-export commonly used items at the crate root
pub use config::AppConfig;
pub use error::{CrError, CrResult};
pub use logging::init_logging;
pub use platform::Platform;
