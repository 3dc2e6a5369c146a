//! The payload converter contract (C5): turns a raw message body plus its
//! attributes into whatever shape a handler wants, optionally running the
//! validation failure policy machine (C6) along the way.
//!
//! Grounded in the teacher's `FromSQSMessage`/deserialisation seam, but
//! widened from a single fixed target type to a trait so a host
//! application can plug in its own decoding (protobuf, Avro, a hand
//! rolled wire format) without this crate needing to know about it.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::broker::MessageAttributeValue;
use crate::errors::{ConversionError, ConvertError};
use crate::logger::Logger;
use crate::message_context::MessageContext;
use crate::validation::{validate_and_apply_policy, ValidationOptions, ValidationOutcome};
use std::collections::HashMap;
use std::sync::Arc;

/// Converts a raw message body into the value a [`MessageListener`] will
/// receive. Implementations may also consult `ctx` (e.g. to acknowledge
/// the message themselves when validation decides to do so).
///
/// [`MessageListener`]: crate::container::MessageListener
#[async_trait]
pub trait PayloadConverter: Send + Sync {
    type Output: Send + 'static;

    async fn convert(
        &self,
        body: &str,
        attributes: &HashMap<String, MessageAttributeValue>,
        ctx: &MessageContext,
    ) -> Result<Self::Output, ConvertError>;
}

/// Decodes a JSON body into `T` via `serde_json`, with no validation of
/// its own. Compose with [`ValidatingConverter`] to add schema validation.
pub struct JsonConverter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonConverter<T> {
    pub fn new() -> Self {
        JsonConverter {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> PayloadConverter for JsonConverter<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    async fn convert(
        &self,
        body: &str,
        _attributes: &HashMap<String, MessageAttributeValue>,
        _ctx: &MessageContext,
    ) -> Result<T, ConvertError> {
        serde_json::from_str(body)
            .map_err(|err| ConversionError::new(format!("invalid json body: {err}")).into())
    }
}

/// Decodes a body into a `serde_json::Value` without assuming any target
/// shape, for handlers that want to inspect the payload dynamically.
pub struct RawJsonConverter;

#[async_trait]
impl PayloadConverter for RawJsonConverter {
    type Output = Value;

    async fn convert(
        &self,
        body: &str,
        _attributes: &HashMap<String, MessageAttributeValue>,
        _ctx: &MessageContext,
    ) -> Result<Value, ConvertError> {
        serde_json::from_str(body)
            .map_err(|err| ConversionError::new(format!("invalid json body: {err}")).into())
    }
}

/// Wraps an inner [`PayloadConverter`] and runs the validation failure
/// policy machine (§4.3) against its decoded output before returning it.
///
/// When the inner converter's output fails validation the configured
/// [`ValidationFailureMode`] decides what happens next: `Throw` surfaces
/// `ConvertError::Validation` for the error handler, `Reject` and
/// `Acknowledge` both resolve to `ConvertError::AlreadyHandled`, since the
/// policy machine has already logged (and, for `Acknowledge`, deleted) the
/// message itself.
///
/// [`ValidationFailureMode`]: crate::validation::ValidationFailureMode
pub struct ValidatingConverter<C> {
    inner: C,
    target_type: &'static str,
    options: ValidationOptions,
    logger: Arc<dyn Logger>,
}

impl<C> ValidatingConverter<C> {
    pub fn new(
        inner: C,
        target_type: &'static str,
        options: ValidationOptions,
        logger: Arc<dyn Logger>,
    ) -> Self {
        ValidatingConverter {
            inner,
            target_type,
            options,
            logger,
        }
    }
}

#[async_trait]
impl<C> PayloadConverter for ValidatingConverter<C>
where
    C: PayloadConverter + Send + Sync,
    C::Output: crate::validation::ValidatableTarget,
{
    type Output = C::Output;

    async fn convert(
        &self,
        body: &str,
        attributes: &HashMap<String, MessageAttributeValue>,
        ctx: &MessageContext,
    ) -> Result<Self::Output, ConvertError> {
        let value = self.inner.convert(body, attributes, ctx).await?;

        match validate_and_apply_policy(
            self.target_type,
            &value,
            &self.options,
            Some(ctx),
            &self.logger,
        )
        .await
        {
            Ok(()) => Ok(value),
            Err(ValidationOutcome::Throw(err)) => Err(ConvertError::Validation(err)),
            Err(ValidationOutcome::AlreadyHandled) => Err(ConvertError::AlreadyHandled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerClient;
    use crate::logger::TracingLogger;
    use crate::message_context::AckSink;
    use crate::testing::MockBrokerClient;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Order {
        #[allow(dead_code)]
        id: String,
    }

    fn ctx(broker: Arc<dyn BrokerClient>) -> MessageContext {
        MessageContext::new(
            "msg-1".to_string(),
            "receipt-1".to_string(),
            "https://example.com/q".to_string(),
            HashMap::new(),
            HashMap::new(),
            AckSink::Direct(broker),
            Arc::new(TracingLogger::new()),
        )
    }

    #[test_log::test(tokio::test)]
    async fn json_converter_decodes_valid_body() {
        let converter: JsonConverter<Order> = JsonConverter::new();
        let broker = MockBrokerClient::new();
        let context = ctx(broker);
        let result = converter
            .convert(r#"{"id":"abc"}"#, &HashMap::new(), &context)
            .await;
        assert!(result.is_ok());
    }

    #[test_log::test(tokio::test)]
    async fn json_converter_reports_malformed_body() {
        let converter: JsonConverter<Order> = JsonConverter::new();
        let broker = MockBrokerClient::new();
        let context = ctx(broker);
        let result = converter.convert("not json", &HashMap::new(), &context).await;
        assert!(matches!(result, Err(ConvertError::Parse(_))));
    }

    #[test_log::test(tokio::test)]
    async fn raw_json_converter_preserves_shape() {
        let converter = RawJsonConverter;
        let broker = MockBrokerClient::new();
        let context = ctx(broker);
        let result = converter
            .convert(r#"{"a":1}"#, &HashMap::new(), &context)
            .await
            .unwrap();
        assert_eq!(result["a"], 1);
    }
}
