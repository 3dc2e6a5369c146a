//! Reliable, bounded-concurrency consumption of messages from an Amazon
//! SQS queue.
//!
//! A [`container::SqsListenerContainer`] drives a long-poll -> dispatch
//! -> acknowledge pipeline against a queue: `receive` is raced against
//! cooperative cancellation so shutdown never waits out a full long-poll,
//! dispatch is bounded by a FIFO-fair concurrency permit rather than by
//! batch size, and acknowledgement can be issued per message or
//! coalesced into batch-delete calls by a background flush timer.
//!
//! The wire protocol itself — the SQS client — is injected through
//! [`broker::BrokerClient`], so the container can be exercised against
//! [`testing::MockBrokerClient`] without a real queue.

pub mod aws_broker;
pub mod batch_ack;
pub mod broker;
pub mod config;
pub mod container;
pub mod converter;
pub mod error_handler;
pub mod errors;
pub mod logger;
pub mod message_context;
pub mod permit;
pub mod testing;
pub mod validation;

pub use aws_broker::AwsSqsBrokerClient;
pub use broker::{BrokerClient, BrokerMessage, CancellationHandle};
pub use config::{AcknowledgementMode, ContainerConfig, ContainerOptionsBuilder};
pub use container::{MessageListener, SqsListenerContainer};
pub use converter::{JsonConverter, PayloadConverter, RawJsonConverter, ValidatingConverter};
pub use error_handler::{DefaultErrorHandler, ErrorHandler, ProcessingError, RawOrDecoded};
pub use errors::{ConfigurationError, ConversionError, ConvertError, HandlerError, TransportError};
pub use logger::{Logger, TracingLogger};
pub use message_context::MessageContext;
pub use permit::ConcurrencyPermit;
pub use validation::{ValidationError, ValidationFailureMode, ValidationOptions};
