//! Terminal-multiplexer session detection.
//!
//! Detected once at startup and passed into the presentation layer; the
//! transfer core itself never reads the environment.

/// Where this process is running, as far as the terminal goes.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// GNU screen session identifier, when running under one.
    pub screen_session: Option<String>,
}

impl SessionContext {
    /// Read the `STY` environment variable set by GNU screen.
    pub fn detect() -> Self {
        Self {
            screen_session: std::env::var("STY").ok().filter(|s| !s.is_empty()),
        }
    }

    pub fn is_multiplexed(&self) -> bool {
        self.screen_session.is_some()
    }
}
