//! The container's configuration surface: a mutable builder that
//! produces a frozen [`ContainerConfig`], mirroring the teacher's own
//! `SQSConsumerConfig` -> `SQSConsumerFinalisedConfig` split so
//! configuration mistakes (like an un-set queue) surface at `build()`
//! time rather than scattered through `start()`.

use crate::validation::{ValidationFailureMode, ValidationOptions, ValidatorOptions};

/// How the container decides when a successfully-handled message is
/// deleted from the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcknowledgementMode {
    /// Delete only after `on_message` returns without error.
    #[default]
    OnSuccess,
    /// Always delete after dispatch, whether or not `on_message` errored.
    Always,
    /// Never delete automatically; the handler calls
    /// [`MessageContext::acknowledge`] itself.
    ///
    /// [`MessageContext::acknowledge`]: crate::message_context::MessageContext::acknowledge
    Manual,
}

/// Bounds on the deletion coalescer (C8). `max_size` is clamped to
/// `[1, 10]`, SQS's own batch-delete ceiling; `flush_interval_ms` is
/// clamped to `[0, u64::MAX]` — i.e. not clamped at all, since every
/// `u64` is already non-negative. `0` is a valid value: it disables the
/// timer-driven flush and relies solely on the size-triggered one (see
/// `BatchAckManager::run_flush_timer`).
#[derive(Debug, Clone, Copy)]
pub struct BatchAcknowledgementOptions {
    pub max_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for BatchAcknowledgementOptions {
    fn default() -> Self {
        BatchAcknowledgementOptions {
            max_size: 10,
            flush_interval_ms: 100,
        }
    }
}

impl BatchAcknowledgementOptions {
    fn clamped(self) -> Self {
        BatchAcknowledgementOptions {
            max_size: self.max_size.clamp(1, 10),
            flush_interval_ms: self.flush_interval_ms,
        }
    }
}

/// The container's frozen, validated configuration. Produced only via
/// [`ContainerOptionsBuilder::build`].
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub id: String,
    pub queue: String,
    pub poll_timeout_seconds: i32,
    pub visibility_timeout_seconds: i32,
    pub max_concurrent_messages: usize,
    pub max_messages_per_poll: i32,
    pub auto_startup: bool,
    pub polling_error_backoff_seconds: u64,
    pub acknowledgement_mode: AcknowledgementMode,
    pub enable_batch_acknowledgement: bool,
    pub batch_acknowledgement: BatchAcknowledgementOptions,
    pub validation: ValidationOptions,
}

/// Builds a [`ContainerConfig`], applying the same defaults the teacher
/// applies to its own consumer config.
pub struct ContainerOptionsBuilder {
    id: Option<String>,
    queue: Option<String>,
    poll_timeout_seconds: i32,
    visibility_timeout_seconds: i32,
    max_concurrent_messages: usize,
    max_messages_per_poll: i32,
    auto_startup: bool,
    polling_error_backoff_seconds: u64,
    acknowledgement_mode: AcknowledgementMode,
    enable_batch_acknowledgement: bool,
    batch_acknowledgement: BatchAcknowledgementOptions,
    enable_validation: bool,
    validation_failure_mode: ValidationFailureMode,
    validator_options: ValidatorOptions,
}

impl Default for ContainerOptionsBuilder {
    fn default() -> Self {
        ContainerOptionsBuilder {
            id: None,
            queue: None,
            poll_timeout_seconds: 20,
            visibility_timeout_seconds: 30,
            max_concurrent_messages: 10,
            max_messages_per_poll: 10,
            auto_startup: true,
            polling_error_backoff_seconds: 5,
            acknowledgement_mode: AcknowledgementMode::default(),
            enable_batch_acknowledgement: false,
            batch_acknowledgement: BatchAcknowledgementOptions::default(),
            enable_validation: false,
            validation_failure_mode: ValidationFailureMode::default(),
            validator_options: ValidatorOptions::default(),
        }
    }
}

impl ContainerOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A human-readable identifier for this container, used in log lines
    /// so a host running several containers can tell them apart.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// A queue name (resolved via `BrokerClient::resolve_queue_url`) or
    /// an already-resolved queue URL.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn poll_timeout_seconds(mut self, seconds: i32) -> Self {
        self.poll_timeout_seconds = seconds;
        self
    }

    pub fn visibility_timeout_seconds(mut self, seconds: i32) -> Self {
        self.visibility_timeout_seconds = seconds;
        self
    }

    pub fn max_concurrent_messages(mut self, max: usize) -> Self {
        self.max_concurrent_messages = max;
        self
    }

    /// Not clamped to SQS's own 1-10 receive limit: an out-of-range value
    /// is passed straight through to the broker client, which is in a
    /// better position to reject or coerce it than this crate is.
    pub fn max_messages_per_poll(mut self, max: i32) -> Self {
        self.max_messages_per_poll = max;
        self
    }

    pub fn auto_startup(mut self, enabled: bool) -> Self {
        self.auto_startup = enabled;
        self
    }

    pub fn polling_error_backoff_seconds(mut self, seconds: u64) -> Self {
        self.polling_error_backoff_seconds = seconds;
        self
    }

    pub fn acknowledgement_mode(mut self, mode: AcknowledgementMode) -> Self {
        self.acknowledgement_mode = mode;
        self
    }

    pub fn enable_batch_acknowledgement(mut self, enabled: bool) -> Self {
        self.enable_batch_acknowledgement = enabled;
        self
    }

    pub fn batch_acknowledgement_options(mut self, options: BatchAcknowledgementOptions) -> Self {
        self.batch_acknowledgement = options;
        self
    }

    pub fn enable_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = enabled;
        self
    }

    pub fn validation_failure_mode(mut self, mode: ValidationFailureMode) -> Self {
        self.validation_failure_mode = mode;
        self
    }

    pub fn validator_options(mut self, options: ValidatorOptions) -> Self {
        self.validator_options = options;
        self
    }

    /// Freezes the builder into a [`ContainerConfig`].
    ///
    /// # Panics
    ///
    /// Panics if `queue` was never set: every other field has a usable
    /// default, but a container with no queue to poll is always a
    /// programming mistake, not a runtime condition to recover from.
    pub fn build(self) -> ContainerConfig {
        let queue = self.queue.expect("ContainerOptionsBuilder: queue must be set");
        let id = self.id.unwrap_or_else(|| queue.clone());

        ContainerConfig {
            id,
            queue,
            poll_timeout_seconds: self.poll_timeout_seconds,
            visibility_timeout_seconds: self.visibility_timeout_seconds,
            max_concurrent_messages: self.max_concurrent_messages,
            max_messages_per_poll: self.max_messages_per_poll,
            auto_startup: self.auto_startup,
            polling_error_backoff_seconds: self.polling_error_backoff_seconds,
            acknowledgement_mode: self.acknowledgement_mode,
            enable_batch_acknowledgement: self.enable_batch_acknowledgement,
            batch_acknowledgement: self.batch_acknowledgement.clamped(),
            validation: ValidationOptions {
                enable_validation: self.enable_validation,
                failure_mode: self.validation_failure_mode,
                validator_options: self.validator_options,
            },
        }
    }
}
