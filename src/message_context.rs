//! The per-message handle (C4) passed to converters, the user handler and
//! the error handler. Exclusively owned by the task processing the
//! message it describes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::batch_ack::BatchAckManager;
use crate::broker::{BrokerClient, MessageAttributeValue};
use crate::logger::Logger;

/// How a [`MessageContext::acknowledge`] call is carried out: either
/// handed to the batch manager for coalescing, or issued as a direct
/// single-message delete. The container decides which at construction
/// time based on whether batch acknowledgement is enabled.
#[derive(Clone)]
pub(crate) enum AckSink {
    Direct(Arc<dyn BrokerClient>),
    Batched(Arc<BatchAckManager>),
}

/// A read-only handle to one received message plus the ability to
/// acknowledge (delete) it out of band, e.g. from a user handler after a
/// bounded number of receives.
pub struct MessageContext {
    message_id: String,
    receipt_handle: String,
    queue_url: String,
    message_attributes: HashMap<String, MessageAttributeValue>,
    system_attributes: HashMap<String, String>,
    ack_sink: AckSink,
    logger: Arc<dyn Logger>,
}

impl MessageContext {
    pub(crate) fn new(
        message_id: String,
        receipt_handle: String,
        queue_url: String,
        message_attributes: HashMap<String, MessageAttributeValue>,
        system_attributes: HashMap<String, String>,
        ack_sink: AckSink,
        logger: Arc<dyn Logger>,
    ) -> Self {
        MessageContext {
            message_id,
            receipt_handle,
            queue_url,
            message_attributes,
            system_attributes,
            ack_sink,
            logger,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn receipt_handle(&self) -> &str {
        &self.receipt_handle
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    pub fn message_attributes(&self) -> &HashMap<String, MessageAttributeValue> {
        &self.message_attributes
    }

    pub fn system_attributes(&self) -> &HashMap<String, String> {
        &self.system_attributes
    }

    /// Parses `ApproximateReceiveCount` leniently: missing or malformed
    /// values resolve to `0` rather than failing.
    pub fn approximate_receive_count(&self) -> u64 {
        self.system_attributes
            .get("ApproximateReceiveCount")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0)
    }

    /// Requests deletion of this message. Idempotent from the caller's
    /// standpoint: transport errors are logged and swallowed, never
    /// returned or panicked on, matching the source library's
    /// log-and-swallow contract for single-message acknowledgement.
    pub async fn acknowledge(&self) {
        match &self.ack_sink {
            AckSink::Batched(manager) => {
                manager
                    .acknowledge(
                        self.message_id.clone(),
                        self.receipt_handle.clone(),
                        self.queue_url.clone(),
                    )
                    .await;
            }
            AckSink::Direct(client) => {
                if let Err(err) = client.delete(&self.queue_url, &self.receipt_handle).await {
                    self.logger.error(&format!(
                        "failed to acknowledge message {}: {err}",
                        self.message_id
                    ));
                }
            }
        }
    }
}
