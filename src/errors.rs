use std::error::Error as StdError;
use std::fmt;

use crate::validation::ValidationError;

/// Raised when the container cannot be started, or when configuration
/// supplied to it is unusable.
#[derive(Debug)]
pub enum ConfigurationError {
    MissingListener,
    QueueResolution(String),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigurationError::MissingListener => write!(
                f,
                "container configuration error: a message listener must be set before start()"
            ),
            ConfigurationError::QueueResolution(reason) => {
                write!(f, "container configuration error: {reason}")
            }
        }
    }
}

impl StdError for ConfigurationError {}

/// Raised for broker (SQS) operation failures: receive, delete and
/// delete-batch whole-call errors.
#[derive(Debug)]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "transport error: {}", self.message)
    }
}

impl StdError for TransportError {}

/// Raised when a message body cannot be decoded into the target shape,
/// e.g. malformed JSON.
#[derive(Debug)]
pub struct ConversionError {
    message: String,
}

impl ConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "conversion error: {}", self.message)
    }
}

impl StdError for ConversionError {}

/// The result of running a payload converter: either a decoded value,
/// or one of the three outcomes the validation failure policy machine
/// and JSON decoding can produce.
///
/// `AlreadyHandled` is the typed replacement for the source library's
/// thrown `ValidationHandled` sentinel: when a converter returns it, the
/// container must not invoke the user error handler or apply the
/// acknowledgement policy, because the converter already decided and
/// carried out the outcome (see `ValidationFailureMode`).
#[derive(Debug)]
pub enum ConvertError {
    Parse(ConversionError),
    Validation(ValidationError),
    AlreadyHandled,
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConvertError::Parse(err) => write!(f, "{err}"),
            ConvertError::Validation(err) => write!(f, "{err}"),
            ConvertError::AlreadyHandled => {
                write!(f, "validation already handled by the converter")
            }
        }
    }
}

impl StdError for ConvertError {}

impl From<ConversionError> for ConvertError {
    fn from(err: ConversionError) -> Self {
        ConvertError::Parse(err)
    }
}

impl From<ValidationError> for ConvertError {
    fn from(err: ValidationError) -> Self {
        ConvertError::Validation(err)
    }
}

/// Anything a user's `on_message` handler raises.
#[derive(Debug)]
pub struct HandlerError {
    message: String,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: Box<dyn StdError + Send + Sync + 'static>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "message handler failed: {}", self.message)
    }
}

impl StdError for HandlerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}
