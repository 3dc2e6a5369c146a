//! End-to-end tests driving [`SqsListenerContainer`] against
//! [`MockBrokerClient`], covering the scenarios the container's design
//! is meant to satisfy: happy-path acknowledgement, batched
//! acknowledgement under load, and graceful shutdown draining.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sqs_listener_container::{
    AcknowledgementMode, ContainerOptionsBuilder, ErrorHandler, HandlerError, MessageContext,
    MessageListener, ProcessingError, RawJsonConverter, RawOrDecoded, SqsListenerContainer,
};
use sqs_listener_container::testing::{self, MockBrokerClient};

struct CountingListener {
    handled: Arc<AtomicUsize>,
}

#[async_trait]
impl MessageListener<serde_json::Value> for CountingListener {
    async fn on_message(
        &self,
        _payload: serde_json::Value,
        _ctx: &MessageContext,
    ) -> Result<(), HandlerError> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct SlowListener {
    delay: Duration,
}

#[async_trait]
impl MessageListener<serde_json::Value> for SlowListener {
    async fn on_message(
        &self,
        _payload: serde_json::Value,
        _ctx: &MessageContext,
    ) -> Result<(), HandlerError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

struct CountingErrorHandler {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ErrorHandler for CountingErrorHandler {
    async fn handle(&self, _error: &ProcessingError, _payload: &RawOrDecoded, _ctx: &MessageContext) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test_log::test(tokio::test)]
async fn scenario_a_happy_path_acknowledges_every_message() {
    let broker = MockBrokerClient::new();
    broker.set_queue_url("orders", "https://example.com/orders").await;
    broker
        .push_receive(vec![
            testing::message("1", "r1", r#"{"orderId":"1"}"#),
            testing::message("2", "r2", r#"{"orderId":"2"}"#),
            testing::message("3", "r3", r#"{"orderId":"3"}"#),
        ])
        .await;

    let handled = Arc::new(AtomicUsize::new(0));
    let error_calls = Arc::new(AtomicUsize::new(0));

    let container = Arc::new(SqsListenerContainer::new(broker.clone(), Arc::new(RawJsonConverter)));
    container
        .set_message_listener(Arc::new(CountingListener {
            handled: handled.clone(),
        }))
        .await;
    container
        .set_error_handler(Arc::new(CountingErrorHandler {
            calls: error_calls.clone(),
        }))
        .await;
    container
        .configure(
            ContainerOptionsBuilder::new()
                .queue("orders")
                .max_concurrent_messages(5)
                .acknowledgement_mode(AcknowledgementMode::OnSuccess)
                .build(),
        )
        .await;

    container.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    container.stop().await;

    assert_eq!(handled.load(Ordering::SeqCst), 3);
    assert_eq!(error_calls.load(Ordering::SeqCst), 0);
    assert_eq!(broker.delete_calls().await.len(), 3);
}

#[test_log::test(tokio::test)]
async fn scenario_b_batches_acknowledgements_of_twenty_five() {
    let broker = MockBrokerClient::new();
    broker.set_queue_url("orders", "https://example.com/orders").await;
    let batch: Vec<_> = (0..25)
        .map(|i| testing::message(&format!("m{i}"), &format!("r{i}"), "{}"))
        .collect();
    broker.push_receive(batch).await;
    for _ in 0..3 {
        broker
            .push_batch_delete_outcome(Default::default())
            .await;
    }

    let handled = Arc::new(AtomicUsize::new(0));
    let container = Arc::new(SqsListenerContainer::new(broker.clone(), Arc::new(RawJsonConverter)));
    container
        .set_message_listener(Arc::new(CountingListener {
            handled: handled.clone(),
        }))
        .await;
    container
        .configure(
            ContainerOptionsBuilder::new()
                .queue("orders")
                .max_concurrent_messages(25)
                .enable_batch_acknowledgement(true)
                .batch_acknowledgement_options(sqs_listener_container::config::BatchAcknowledgementOptions {
                    max_size: 10,
                    flush_interval_ms: 100,
                })
                .build(),
        )
        .await;

    container.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    container.stop().await;

    assert_eq!(handled.load(Ordering::SeqCst), 25);
    assert_eq!(broker.delete_batch_calls().await.len(), 3);
}

#[test_log::test(tokio::test)]
async fn scenario_f_shutdown_drains_in_flight_handlers() {
    let broker = MockBrokerClient::new();
    broker.set_queue_url("orders", "https://example.com/orders").await;
    let batch: Vec<_> = (0..5)
        .map(|i| testing::message(&format!("m{i}"), &format!("r{i}"), "{}"))
        .collect();
    broker.push_receive(batch).await;

    let handled = Arc::new(AtomicUsize::new(0));
    let container = Arc::new(SqsListenerContainer::new(broker.clone(), Arc::new(RawJsonConverter)));
    container
        .set_message_listener(Arc::new(SlowListener {
            delay: Duration::from_millis(200),
        }))
        .await;
    container
        .configure(
            ContainerOptionsBuilder::new()
                .queue("orders")
                .max_concurrent_messages(5)
                .build(),
        )
        .await;

    container.start().await.unwrap();
    // Give the poll loop a moment to dispatch all 5 before we ask it to
    // stop while they're still mid-sleep.
    tokio::time::sleep(Duration::from_millis(30)).await;

    let started = std::time::Instant::now();
    container.stop().await;
    let elapsed = started.elapsed();

    assert!(elapsed <= Duration::from_secs(5));
    assert_eq!(broker.delete_calls().await.len(), 5);
    let _ = handled;
}

#[test_log::test(tokio::test)]
async fn stopped_container_can_be_started_again() {
    let broker = MockBrokerClient::new();
    broker.set_queue_url("orders", "https://example.com/orders").await;
    broker
        .push_receive(vec![testing::message("1", "r1", "{}")])
        .await;
    broker
        .push_receive(vec![testing::message("2", "r2", "{}")])
        .await;

    let handled = Arc::new(AtomicUsize::new(0));
    let container = Arc::new(SqsListenerContainer::new(broker.clone(), Arc::new(RawJsonConverter)));
    container
        .set_message_listener(Arc::new(CountingListener {
            handled: handled.clone(),
        }))
        .await;
    container
        .configure(ContainerOptionsBuilder::new().queue("orders").build())
        .await;

    container.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    container.stop().await;
    assert!(!container.is_running());

    container.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    container.stop().await;

    assert_eq!(handled.load(Ordering::SeqCst), 2);
}

#[cfg(feature = "validation")]
mod validation_acknowledge_mode {
    use super::*;
    use sqs_listener_container::{JsonConverter, ValidatingConverter, ValidationFailureMode, ValidationOptions};
    use validator::Validate;

    #[derive(Debug, serde::Deserialize, Validate)]
    struct Order {
        #[validate(length(min = 1, message = "order_id must not be empty"))]
        order_id: String,
    }

    #[async_trait]
    impl MessageListener<Order> for CountingListener {
        async fn on_message(&self, _payload: Order, _ctx: &MessageContext) -> Result<(), HandlerError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Scenario E (SPEC_FULL.md §8): a message whose decoded payload fails
    /// validation under `ValidationFailureMode::Acknowledge` is deleted
    /// exactly once by the validation policy itself, never reaches
    /// `on_message`, and never reaches the error handler (the converter
    /// resolves it as `ConvertError::AlreadyHandled`, which the container
    /// treats as a terminal outcome on its own).
    #[test_log::test(tokio::test)]
    async fn scenario_e_validation_failure_acknowledges_and_skips_handler_and_error_handler() {
        let broker = MockBrokerClient::new();
        broker.set_queue_url("orders", "https://example.com/orders").await;
        broker
            .push_receive(vec![testing::message("1", "r1", r#"{"order_id":""}"#)])
            .await;

        let handled = Arc::new(AtomicUsize::new(0));
        let error_calls = Arc::new(AtomicUsize::new(0));

        let converter = ValidatingConverter::new(
            JsonConverter::<Order>::new(),
            "Order",
            ValidationOptions {
                enable_validation: true,
                failure_mode: ValidationFailureMode::Acknowledge,
                ..Default::default()
            },
            Arc::new(sqs_listener_container::TracingLogger::new()),
        );

        let container = Arc::new(SqsListenerContainer::new(broker.clone(), Arc::new(converter)));
        container
            .set_message_listener(Arc::new(CountingListener {
                handled: handled.clone(),
            }))
            .await;
        container
            .set_error_handler(Arc::new(CountingErrorHandler {
                calls: error_calls.clone(),
            }))
            .await;
        container
            .configure(
                ContainerOptionsBuilder::new()
                    .queue("orders")
                    .max_concurrent_messages(5)
                    .build(),
            )
            .await;

        container.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        container.stop().await;

        assert_eq!(handled.load(Ordering::SeqCst), 0);
        assert_eq!(error_calls.load(Ordering::SeqCst), 0);
        assert_eq!(broker.delete_calls().await.len(), 1);
    }
}
