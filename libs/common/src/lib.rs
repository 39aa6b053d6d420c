//! Shared runtime plumbing for irrigation services
//!
//! Provides functions used by every service binary:
//! - logging bootstrap (console + daily file)
//! - graceful shutdown signal handling
//! - layered configuration loading

pub mod config_loader;
pub mod logging;
pub mod shutdown;

pub use config_loader::{load_layered, ConfigLoadError};
pub use logging::{init_logging, LogGuard, LogSettings};
pub use shutdown::{shutdown_on_signal, wait_for_shutdown};
