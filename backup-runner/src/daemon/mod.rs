//! Process lifecycle concerns: signals and session context.

pub mod session;
pub mod shutdown;

pub use session::SessionContext;
pub use shutdown::ShutdownCoordinator;
