//! A scriptable [`BrokerClient`] test double, so the container's tests
//! (and a host application's own tests) never need a real SQS queue or
//! `localstack`. Grounded in the same "swap the trait for a test double"
//! seam the teacher draws around its `EnvVars`/`Clock` capabilities, here
//! applied to the broker client.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::broker::{
    BatchDeleteOutcome, BrokerClient, BrokerMessage, CancellationHandle, DeleteEntry,
    ReceiveRequest,
};
use crate::errors::TransportError;

/// A single scripted response to a `receive` call.
pub enum ScriptedReceive {
    Messages(Vec<BrokerMessage>),
    Error(String),
}

/// A single scripted response to a `delete_batch` call.
pub enum ScriptedBatchDelete {
    Outcome(BatchDeleteOutcome),
    Error(String),
}

#[derive(Default)]
struct Calls {
    resolve_queue_url: Vec<String>,
    receive: usize,
    delete: Vec<(String, String)>,
    delete_batch: Vec<(String, Vec<DeleteEntry>)>,
}

struct Scripts {
    receives: VecDeque<ScriptedReceive>,
    batch_deletes: VecDeque<ScriptedBatchDelete>,
    queue_urls: HashMap<String, String>,
}

/// An in-memory, scriptable stand-in for a real SQS client.
///
/// Calling [`MockBrokerClient::receive`] pops the next scripted response;
/// once the script is exhausted, `receive` blocks until
/// [`CancellationHandle::cancel`] is observed, mimicking a long-poll with
/// nothing left to return — this lets a poll-loop test call `stop()` and
/// observe a clean shutdown instead of a spurious error.
pub struct MockBrokerClient {
    scripts: Mutex<Scripts>,
    calls: Mutex<Calls>,
}

impl MockBrokerClient {
    pub fn new() -> Arc<Self> {
        Arc::new(MockBrokerClient {
            scripts: Mutex::new(Scripts {
                receives: VecDeque::new(),
                batch_deletes: VecDeque::new(),
                queue_urls: HashMap::new(),
            }),
            calls: Mutex::new(Calls::default()),
        })
    }

    pub async fn push_receive(&self, messages: Vec<BrokerMessage>) {
        self.scripts
            .lock()
            .await
            .receives
            .push_back(ScriptedReceive::Messages(messages));
    }

    pub async fn push_receive_error(&self, message: impl Into<String>) {
        self.scripts
            .lock()
            .await
            .receives
            .push_back(ScriptedReceive::Error(message.into()));
    }

    pub async fn push_batch_delete_outcome(&self, outcome: BatchDeleteOutcome) {
        self.scripts
            .lock()
            .await
            .batch_deletes
            .push_back(ScriptedBatchDelete::Outcome(outcome));
    }

    pub async fn push_batch_delete_error(&self, message: impl Into<String>) {
        self.scripts
            .lock()
            .await
            .batch_deletes
            .push_back(ScriptedBatchDelete::Error(message.into()));
    }

    pub async fn set_queue_url(&self, name: impl Into<String>, url: impl Into<String>) {
        self.scripts
            .lock()
            .await
            .queue_urls
            .insert(name.into(), url.into());
    }

    pub async fn delete_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.delete.clone()
    }

    pub async fn delete_batch_calls(&self) -> Vec<(String, Vec<DeleteEntry>)> {
        self.calls
            .lock()
            .await
            .delete_batch
            .iter()
            .map(|(url, entries)| (url.clone(), entries.clone()))
            .collect()
    }

    pub async fn receive_call_count(&self) -> usize {
        self.calls.lock().await.receive
    }
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    async fn resolve_queue_url(&self, name: &str) -> Result<String, TransportError> {
        self.calls.lock().await.resolve_queue_url.push(name.to_string());
        self.scripts
            .lock()
            .await
            .queue_urls
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::new(format!("no queue url scripted for {name}")))
    }

    async fn receive(
        &self,
        _request: ReceiveRequest,
        cancel: &CancellationHandle,
    ) -> Result<Vec<BrokerMessage>, TransportError> {
        self.calls.lock().await.receive += 1;
        let next = self.scripts.lock().await.receives.pop_front();
        match next {
            Some(ScriptedReceive::Messages(messages)) => Ok(messages),
            Some(ScriptedReceive::Error(message)) => Err(TransportError::new(message)),
            None => {
                // Nothing left scripted: behave like a long-poll with no
                // messages available, resolved only by shutdown.
                cancel.cancelled().await;
                Err(TransportError::new("receive cancelled".to_string()))
            }
        }
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<(), TransportError> {
        self.calls
            .lock()
            .await
            .delete
            .push((queue_url.to_string(), receipt_handle.to_string()));
        Ok(())
    }

    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: Vec<DeleteEntry>,
    ) -> Result<BatchDeleteOutcome, TransportError> {
        self.calls
            .lock()
            .await
            .delete_batch
            .push((queue_url.to_string(), entries));
        let next = self.scripts.lock().await.batch_deletes.pop_front();
        match next {
            Some(ScriptedBatchDelete::Outcome(outcome)) => Ok(outcome),
            Some(ScriptedBatchDelete::Error(message)) => Err(TransportError::new(message)),
            None => Ok(BatchDeleteOutcome::default()),
        }
    }
}

/// Builds a [`BrokerMessage`] with an empty attribute set, for tests that
/// don't care about attributes.
pub fn message(id: &str, receipt_handle: &str, body: &str) -> BrokerMessage {
    BrokerMessage {
        message_id: id.to_string(),
        receipt_handle: receipt_handle.to_string(),
        body: body.to_string(),
        message_attributes: HashMap::new(),
        system_attributes: HashMap::new(),
    }
}
