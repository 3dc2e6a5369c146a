//! The broker client capability (C1): the four SQS operations the
//! container depends on, expressed as a trait so the real AWS SDK client
//! can be swapped for a test double. Modeled on the same "depend on a
//! trait, not the SDK type" seam the teacher draws around its
//! `EnvVars`/`Clock` capabilities.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::errors::TransportError;

/// A single inbound message as the core sees it — deliberately not
/// `aws_sdk_sqs::types::Message`, so the broker client trait's return
/// type doesn't leak an AWS SDK type into the rest of the crate.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub message_attributes: HashMap<String, MessageAttributeValue>,
    pub system_attributes: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct MessageAttributeValue {
    pub string_value: Option<String>,
    pub binary_value: Option<Vec<u8>>,
    pub data_type: String,
}

/// Parameters for a single `receive` call.
#[derive(Debug, Clone)]
pub struct ReceiveRequest {
    pub queue_url: String,
    pub max_number_of_messages: i32,
    pub wait_time_seconds: i32,
    pub visibility_timeout: i32,
}

/// One entry of a batch-delete request.
#[derive(Debug, Clone)]
pub struct DeleteEntry {
    pub id: String,
    pub receipt_handle: String,
}

/// A single failed entry reported back by a partially-successful
/// batch-delete call.
#[derive(Debug, Clone)]
pub struct BatchDeleteFailure {
    pub id: String,
    pub code: String,
    pub message: String,
}

/// The outcome of a batch-delete call: the broker may report individual
/// entries as failed even though the call itself succeeded.
#[derive(Debug, Clone, Default)]
pub struct BatchDeleteOutcome {
    pub failed: Vec<BatchDeleteFailure>,
}

/// A cooperative cancellation handle shared between the container and an
/// in-flight `receive` call: `cancel()` wakes anyone awaiting
/// [`CancellationHandle::cancelled`], allowing a long-poll to be aborted
/// promptly on shutdown.
#[derive(Clone, Default)]
pub struct CancellationHandle {
    inner: Arc<CancellationInner>,
}

#[derive(Default)]
struct CancellationInner {
    notify: Notify,
    cancelled: std::sync::atomic::AtomicBool,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner
            .cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Resolves once [`CancellationHandle::cancel`] has been called.
    /// Resolves immediately if it already was.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

/// The four broker operations the container depends on.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Resolves a queue name to its URL. Not called for references that
    /// already look like a URL (see [`is_resolved_queue_reference`]).
    async fn resolve_queue_url(&self, name: &str) -> Result<String, TransportError>;

    /// Performs a (possibly long-poll) receive call, aborting early if
    /// `cancel` is triggered while the call is in flight.
    async fn receive(
        &self,
        request: ReceiveRequest,
        cancel: &CancellationHandle,
    ) -> Result<Vec<BrokerMessage>, TransportError>;

    /// Deletes a single message.
    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<(), TransportError>;

    /// Deletes up to 10 messages in one broker call.
    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: Vec<DeleteEntry>,
    ) -> Result<BatchDeleteOutcome, TransportError>;
}

/// A queue reference beginning with `http://` or `https://` is already a
/// resolved URL and bypasses `resolve_queue_url`.
pub fn is_resolved_queue_reference(queue_reference: &str) -> bool {
    queue_reference.starts_with("http://") || queue_reference.starts_with("https://")
}
