//! Injected logging capability.
//!
//! Every component that wants to log receives a [`Logger`] at construction
//! time; there is no process-global sink. Pass [`NullLogger`] to silence a
//! component.

use std::fmt;
use std::sync::Arc;

/// Trait representing a logger that can receive messages at various levels.
pub trait Logger: Send + Sync {
    /// Logs a message at the specified level.
    fn log(&self, level: LogLevel, message: &str);
}

/// Severity levels used when logging messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Very low priority, often extremely detailed messages.
    Trace,
    /// Lower priority debugging information.
    Debug,
    /// Informational messages highlighting normal progress.
    Info,
    /// Potentially harmful situations.
    Warn,
    /// Error events that may still allow the caller to continue.
    Error,
}

/// Logger that discards every message. The default when none is injected.
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Cheap-to-clone handle carried by components that log.
#[derive(Clone)]
pub(crate) struct Log(Arc<dyn Logger>);

impl Log {
    pub(crate) fn new(logger: Arc<dyn Logger>) -> Self {
        Self(logger)
    }

    pub(crate) fn debug(&self, message: &str) {
        self.0.log(LogLevel::Debug, message);
    }

    pub(crate) fn warn(&self, message: &str) {
        self.0.log(LogLevel::Warn, message);
    }
}

impl fmt::Debug for Log {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Log(..)")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct CapturingLogger {
        messages: Mutex<Vec<(LogLevel, String)>>,
    }

    impl Logger for CapturingLogger {
        fn log(&self, level: LogLevel, message: &str) {
            self.messages
                .lock()
                .unwrap()
                .push((level, message.to_owned()));
        }
    }

    #[test]
    fn test_log_forwards_to_injected_logger() {
        let logger = Arc::new(CapturingLogger {
            messages: Mutex::new(Vec::new()),
        });
        let log = Log::new(Arc::clone(&logger) as Arc<dyn Logger>);

        log.warn("something odd");
        log.debug("details");

        let messages = logger.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], (LogLevel::Warn, "something odd".to_owned()));
        assert_eq!(messages[1], (LogLevel::Debug, "details".to_owned()));
    }
}
