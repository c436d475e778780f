use log::{debug, info, warn};

/// Thin logging facade shared by the driver and the tool wrappers.
pub struct LogManager;

impl LogManager {
    pub fn new() -> Self {
        Self
    }

    /// Announce the task an invocation is about to perform.
    pub fn record_task(&self, message: &str) {
        info!("{}", message);
    }

    pub fn record(&self, message: &str) {
        debug!("{}", message);
    }

    pub fn record_failure(&self, message: &str) {
        warn!("{}", message);
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
