//! The error handler capability (C7): the last stop for a failed
//! conversion or a failed user handler before the container moves on and
//! leaves the message for SQS to redeliver.

use std::any::Any;

use async_trait::async_trait;

use crate::errors::{ConvertError, HandlerError};
use crate::logger::Logger;
use crate::message_context::MessageContext;

/// What went wrong while processing one message, handed to an
/// [`ErrorHandler`] alongside the [`MessageContext`] it failed against.
pub enum ProcessingError {
    Convert(ConvertError),
    Handler(HandlerError),
}

impl std::fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ProcessingError::Convert(err) => write!(f, "{err}"),
            ProcessingError::Handler(err) => write!(f, "{err}"),
        }
    }
}

/// The payload handed to an [`ErrorHandler`] alongside the
/// [`ProcessingError`] it failed against: the decoded value when one
/// could be produced, otherwise the raw message body.
///
/// `ErrorHandler` is a single trait object shared by a container
/// regardless of its converter's output type, so a decoded value is
/// carried as `Box<dyn Any + Send>` rather than a type parameter;
/// [`RawOrDecoded::decoded`] downcasts back to the concrete type a
/// specific implementation knows to expect.
pub enum RawOrDecoded {
    Decoded(Box<dyn Any + Send>),
    Raw(String),
}

impl RawOrDecoded {
    /// Downcasts to `T` if this holds a decoded value of that exact type.
    pub fn decoded<T: 'static>(&self) -> Option<&T> {
        match self {
            RawOrDecoded::Decoded(value) => value.downcast_ref::<T>(),
            RawOrDecoded::Raw(_) => None,
        }
    }

    /// The raw message body, if re-conversion wasn't attempted or failed.
    pub fn raw(&self) -> Option<&str> {
        match self {
            RawOrDecoded::Raw(body) => Some(body.as_str()),
            RawOrDecoded::Decoded(_) => None,
        }
    }
}

/// Reacts to a message that failed conversion or handling.
///
/// `ConvertError::AlreadyHandled` is never forwarded here: the container
/// treats it as a terminal outcome by itself, since the converter already
/// logged and (if applicable) acknowledged the message.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, error: &ProcessingError, payload: &RawOrDecoded, ctx: &MessageContext);
}

/// The shipped handler: logs the message id and full cause chain, never
/// acknowledges. A validation failure is expanded into its individual
/// field violations to aid debugging.
pub struct DefaultErrorHandler {
    logger: std::sync::Arc<dyn Logger>,
}

impl DefaultErrorHandler {
    pub fn new(logger: std::sync::Arc<dyn Logger>) -> Self {
        DefaultErrorHandler { logger }
    }
}

#[async_trait]
impl ErrorHandler for DefaultErrorHandler {
    async fn handle(&self, error: &ProcessingError, payload: &RawOrDecoded, ctx: &MessageContext) {
        match error {
            ProcessingError::Convert(ConvertError::Validation(validation_error)) => {
                self.logger.error(&format!(
                    "message {} failed processing: {validation_error}",
                    ctx.message_id()
                ));
            }
            ProcessingError::Convert(ConvertError::AlreadyHandled) => {
                // The converter already logged and resolved this message;
                // nothing left to report.
            }
            other => {
                self.logger.error(&format!(
                    "message {} failed processing: {other}",
                    ctx.message_id()
                ));
            }
        }

        if let Some(body) = payload.raw() {
            self.logger
                .debug(&format!("message {} raw body: {body}", ctx.message_id()));
        }

        if let ProcessingError::Handler(handler_error) = error {
            let mut source = std::error::Error::source(handler_error);
            while let Some(cause) = source {
                self.logger.error(&format!("caused by: {cause}"));
                source = cause.source();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ConversionError;
    use crate::logger::TracingLogger;
    use crate::message_context::AckSink;
    use crate::testing::MockBrokerClient;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn ctx() -> MessageContext {
        MessageContext::new(
            "msg-1".to_string(),
            "receipt-1".to_string(),
            "https://example.com/q".to_string(),
            HashMap::new(),
            HashMap::new(),
            AckSink::Direct(MockBrokerClient::new()),
            Arc::new(TracingLogger::new()),
        )
    }

    #[test_log::test(tokio::test)]
    async fn logs_conversion_failures_without_panicking() {
        let handler = DefaultErrorHandler::new(Arc::new(TracingLogger::new()));
        let error = ProcessingError::Convert(ConvertError::Parse(ConversionError::new("bad json")));
        let payload = RawOrDecoded::Raw("not json".to_string());
        handler.handle(&error, &payload, &ctx()).await;
    }

    #[test_log::test(tokio::test)]
    async fn swallows_already_handled_without_double_logging() {
        let handler = DefaultErrorHandler::new(Arc::new(TracingLogger::new()));
        let error = ProcessingError::Convert(ConvertError::AlreadyHandled);
        let payload = RawOrDecoded::Raw("{}".to_string());
        handler.handle(&error, &payload, &ctx()).await;
    }

    #[test_log::test(tokio::test)]
    async fn walks_the_handler_error_cause_chain() {
        let handler = DefaultErrorHandler::new(Arc::new(TracingLogger::new()));
        let cause: Box<dyn std::error::Error + Send + Sync> =
            Box::new(std::io::Error::new(std::io::ErrorKind::Other, "downstream failure"));
        let err = HandlerError::with_source("handler panicked", cause);
        let error = ProcessingError::Handler(err);
        let payload = RawOrDecoded::Raw("{}".to_string());
        handler.handle(&error, &payload, &ctx()).await;
    }

    #[test_log::test]
    fn decoded_payload_downcasts_to_its_concrete_type() {
        let payload = RawOrDecoded::Decoded(Box::new(42_i32));
        assert_eq!(payload.decoded::<i32>(), Some(&42));
        assert_eq!(payload.decoded::<String>(), None);
        assert_eq!(payload.raw(), None);
    }
}
