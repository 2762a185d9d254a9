//! Backup Runner Library
//!
//! Parallel rsync backup orchestration over ssh, with concurrent remote
//! bandwidth monitoring.

pub mod config;
pub mod daemon;
pub mod listing;
pub mod net;
pub mod orchestrator;
pub mod ssh;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
