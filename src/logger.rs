//! A level-tagged log sink, injected into the container the same way the
//! broker client is: as a trait object so a host application can redirect
//! output, with a `tracing`-backed default so the library is usable without
//! any wiring.

use std::fmt;

/// Severity of a single log event raised by the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A level-tagged log sink.
///
/// An implementation of this trait should never panic: it sits on every
/// hot path in the container (dispatch, acknowledgement, batch flush) and
/// a panicking logger would take the whole consumer down with it.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// The default logger: forwards every event to `tracing`, tagged with the
/// `sqs_listener_container` target so a host application can filter it
/// independently of its own spans.
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        TracingLogger
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "sqs_listener_container", "{message}"),
            LogLevel::Info => tracing::info!(target: "sqs_listener_container", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "sqs_listener_container", "{message}"),
            LogLevel::Error => tracing::error!(target: "sqs_listener_container", "{message}"),
        }
    }
}

impl fmt::Debug for TracingLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TracingLogger")
    }
}
