//! The shipped [`BrokerClient`] implementation, wrapping `aws_sdk_sqs::Client`.
//! The receive/delete-batch shape here is grounded directly on the
//! teacher's `SQSMessageConsumer::receive_messages`/`delete_messages`.

use async_trait::async_trait;
use aws_sdk_sqs::types::{
    DeleteMessageBatchRequestEntry, MessageAttributeValue as SdkMessageAttributeValue,
    MessageSystemAttributeName,
};
use aws_sdk_sqs::Client;

use crate::broker::{
    BatchDeleteFailure, BatchDeleteOutcome, BrokerClient, BrokerMessage, CancellationHandle,
    DeleteEntry, MessageAttributeValue, ReceiveRequest,
};
use crate::errors::TransportError;

/// A [`BrokerClient`] backed by the real AWS SQS SDK.
pub struct AwsSqsBrokerClient {
    client: Client,
}

impl AwsSqsBrokerClient {
    pub fn new(client: Client) -> Self {
        AwsSqsBrokerClient { client }
    }
}

fn convert_message(message: aws_sdk_sqs::types::Message) -> BrokerMessage {
    let message_attributes = message
        .message_attributes
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, convert_attribute(value)))
        .collect();

    let system_attributes = message
        .attributes
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (system_attribute_name_to_string(&key), value))
        .collect();

    BrokerMessage {
        message_id: message.message_id.unwrap_or_default(),
        receipt_handle: message.receipt_handle.unwrap_or_default(),
        body: message.body.unwrap_or_default(),
        message_attributes,
        system_attributes,
    }
}

fn convert_attribute(value: SdkMessageAttributeValue) -> MessageAttributeValue {
    MessageAttributeValue {
        string_value: value.string_value,
        binary_value: value.binary_value.map(|b| b.into_inner()),
        data_type: value.data_type,
    }
}

fn system_attribute_name_to_string(name: &MessageSystemAttributeName) -> String {
    name.as_str().to_string()
}

#[async_trait]
impl BrokerClient for AwsSqsBrokerClient {
    async fn resolve_queue_url(&self, name: &str) -> Result<String, TransportError> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(name)
            .send()
            .await
            .map_err(|err| TransportError::new(format!("failed to resolve queue url: {err}")))?;

        output
            .queue_url
            .ok_or_else(|| TransportError::new("broker returned no queue url".to_string()))
    }

    async fn receive(
        &self,
        request: ReceiveRequest,
        cancel: &CancellationHandle,
    ) -> Result<Vec<BrokerMessage>, TransportError> {
        let send_future = self
            .client
            .receive_message()
            .queue_url(&request.queue_url)
            .max_number_of_messages(request.max_number_of_messages)
            .wait_time_seconds(request.wait_time_seconds)
            .visibility_timeout(request.visibility_timeout)
            .message_attribute_names("All")
            .message_system_attribute_names(MessageSystemAttributeName::from("All"))
            .send();

        tokio::select! {
            result = send_future => {
                let output = result
                    .map_err(|err| TransportError::new(format!("receive failed: {err}")))?;
                Ok(output
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .map(convert_message)
                    .collect())
            }
            _ = cancel.cancelled() => {
                Err(TransportError::new("receive cancelled".to_string()))
            }
        }
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<(), TransportError> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|err| TransportError::new(format!("delete failed: {err}")))?;
        Ok(())
    }

    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: Vec<DeleteEntry>,
    ) -> Result<BatchDeleteOutcome, TransportError> {
        let request_entries: Vec<DeleteMessageBatchRequestEntry> = entries
            .into_iter()
            .map(|entry| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(entry.id)
                    .receipt_handle(entry.receipt_handle)
                    .build()
                    .expect("id and receipt_handle are always set")
            })
            .collect();

        let output = self
            .client
            .delete_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(request_entries))
            .send()
            .await
            .map_err(|err| TransportError::new(format!("delete_batch failed: {err}")))?;

        let failed = output
            .failed
            .into_iter()
            .map(|entry| BatchDeleteFailure {
                id: entry.id,
                code: entry.code,
                message: entry.message.unwrap_or_default(),
            })
            .collect();

        Ok(BatchDeleteOutcome { failed })
    }
}

/// Convenience constructor mirroring the teacher's `aws_config::load_from_env`
/// bootstrap, for callers who don't already have an `aws_sdk_sqs::Client`.
pub async fn default_client() -> Client {
    let config = aws_config::load_from_env().await;
    Client::new(&config)
}
