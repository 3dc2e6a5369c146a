//! The listener container (C9): the long-poll -> dispatch -> ack
//! pipeline that ties every other capability together, plus its
//! lifecycle state machine.
//!
//! Each poll iteration dispatches every message it received as an
//! independent task, bounded by the concurrency permit, and waits for
//! the whole batch to finish before issuing the next `receive` — so
//! backpressure flows through the permit rather than piling up
//! unbounded futures across polls, and shutdown draining stays
//! predictable. This mirrors the teacher's own `SQSMessageConsumer`
//! loop, generalised from a fixed message shape to a pluggable
//! [`PayloadConverter`] and [`MessageListener`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::batch_ack::BatchAckManager;
use crate::broker::{is_resolved_queue_reference, BrokerClient, CancellationHandle, ReceiveRequest};
use crate::config::{AcknowledgementMode, ContainerConfig};
use crate::converter::PayloadConverter;
use crate::error_handler::{DefaultErrorHandler, ErrorHandler, ProcessingError, RawOrDecoded};
use crate::errors::ConfigurationError;
use crate::errors::ConvertError;
use crate::logger::{Logger, TracingLogger};
use crate::message_context::{AckSink, MessageContext};

/// How long `stop()` waits for the poll loop's receive call to unwind
/// after cancellation before giving up on it.
const POLL_TASK_JOIN_DEADLINE: Duration = Duration::from_secs(2);

/// How long `stop()` waits for in-flight per-message tasks to finish
/// before giving up on draining them.
const HANDLER_DRAIN_DEADLINE: Duration = Duration::from_secs(5);

/// The lifecycle states a container moves through. Transitions only ever
/// go left to right, except `Stopped` -> `Running` via a second `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerState {
    Unconfigured,
    Configured,
    Running,
    Stopping,
    Stopped,
}

/// The user-supplied callback invoked for each successfully-converted
/// message.
#[async_trait]
pub trait MessageListener<T>: Send + Sync {
    async fn on_message(
        &self,
        payload: T,
        ctx: &MessageContext,
    ) -> Result<(), crate::errors::HandlerError>;
}

struct RunState {
    cancel: CancellationHandle,
    ack_manager: Option<Arc<BatchAckManager>>,
    poll_task: tokio::task::JoinHandle<()>,
    dispatch_tasks: Arc<Mutex<JoinSet<()>>>,
}

/// Polls one SQS queue and dispatches received messages to a
/// [`MessageListener`] through a [`PayloadConverter`], honouring a bounded
/// concurrency limit and an acknowledgement policy.
pub struct SqsListenerContainer<C: PayloadConverter> {
    broker: Arc<dyn BrokerClient>,
    logger: Arc<dyn Logger>,
    converter: Arc<C>,
    listener: Mutex<Option<Arc<dyn MessageListener<C::Output>>>>,
    error_handler: Mutex<Arc<dyn ErrorHandler>>,
    config: Mutex<Option<ContainerConfig>>,
    state: Mutex<ContainerState>,
    running: AtomicBool,
    run: Mutex<Option<RunState>>,
}

impl<C> SqsListenerContainer<C>
where
    C: PayloadConverter + 'static,
{
    pub fn new(broker: Arc<dyn BrokerClient>, converter: Arc<C>) -> Self {
        let logger: Arc<dyn Logger> = Arc::new(TracingLogger::new());
        SqsListenerContainer {
            broker,
            error_handler: Mutex::new(Arc::new(DefaultErrorHandler::new(logger.clone())) as Arc<dyn ErrorHandler>),
            logger,
            converter,
            listener: Mutex::new(None),
            config: Mutex::new(None),
            state: Mutex::new(ContainerState::Unconfigured),
            running: AtomicBool::new(false),
            run: Mutex::new(None),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Applies configuration, moving the container from `Unconfigured`
    /// (or an already-`Configured` state, to allow reconfiguration before
    /// the first `start()`) into `Configured`.
    pub async fn configure(&self, config: ContainerConfig) {
        *self.config.lock().await = Some(config);
        let mut state = self.state.lock().await;
        if *state == ContainerState::Unconfigured {
            *state = ContainerState::Configured;
        }
    }

    pub async fn set_message_listener(&self, listener: Arc<dyn MessageListener<C::Output>>) {
        *self.listener.lock().await = Some(listener);
    }

    pub async fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        *self.error_handler.lock().await = handler;
    }

    /// Overrides the id recorded at `configure()` time, e.g. to
    /// distinguish two containers built from the same config template.
    pub async fn set_id(&self, id: impl Into<String>) {
        if let Some(config) = self.config.lock().await.as_mut() {
            config.id = id.into();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn is_auto_startup_enabled(&self) -> bool {
        self.config
            .lock()
            .await
            .as_ref()
            .map(|config| config.auto_startup)
            .unwrap_or(false)
    }

    async fn resolve_queue_url(&self, queue: &str) -> Result<String, ConfigurationError> {
        if is_resolved_queue_reference(queue) {
            return Ok(queue.to_string());
        }
        self.broker
            .resolve_queue_url(queue)
            .await
            .map_err(|err| ConfigurationError::QueueResolution(err.to_string()))
    }

    /// Starts polling. A no-op if the container is already running.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingListener`] if no listener was
    /// ever set, or [`ConfigurationError::QueueResolution`] if the
    /// configured queue name cannot be resolved to a URL.
    pub async fn start(self: &Arc<Self>) -> Result<(), ConfigurationError> {
        if self.is_running() {
            return Ok(());
        }

        let listener = self
            .listener
            .lock()
            .await
            .clone()
            .ok_or(ConfigurationError::MissingListener)?;

        let config = self
            .config
            .lock()
            .await
            .clone()
            .ok_or(ConfigurationError::MissingListener)?;

        let queue_url = self.resolve_queue_url(&config.queue).await?;

        let ack_manager = if config.enable_batch_acknowledgement {
            Some(BatchAckManager::spawn(
                self.broker.clone(),
                self.logger.clone(),
                &config.batch_acknowledgement,
            ))
        } else {
            None
        };

        let permit = crate::permit::ConcurrencyPermit::new(config.max_concurrent_messages);
        let cancel = CancellationHandle::new();
        let dispatch_tasks: Arc<Mutex<JoinSet<()>>> = Arc::new(Mutex::new(JoinSet::new()));

        let poll_task = {
            let container = self.clone();
            let queue_url = queue_url.clone();
            let cancel = cancel.clone();
            let dispatch_tasks = dispatch_tasks.clone();
            let listener = listener.clone();
            let ack_manager = ack_manager.clone();
            tokio::spawn(async move {
                container
                    .run_poll_loop(
                        config,
                        queue_url,
                        cancel,
                        permit,
                        dispatch_tasks,
                        listener,
                        ack_manager,
                    )
                    .await;
            })
        };

        *self.run.lock().await = Some(RunState {
            cancel,
            ack_manager,
            poll_task,
            dispatch_tasks,
        });
        self.running.store(true, Ordering::SeqCst);
        *self.state.lock().await = ContainerState::Running;
        self.logger
            .info(&format!("container started, polling {queue_url}"));
        Ok(())
    }

    /// Requests a graceful shutdown: cancels the in-flight `receive` call,
    /// waits (bounded) for the poll loop to unwind and for outstanding
    /// message tasks to drain, then flushes any pending batched
    /// acknowledgements. A no-op if the container isn't running.
    pub async fn stop(&self) {
        if !self.is_running() {
            return;
        }
        *self.state.lock().await = ContainerState::Stopping;

        let run = self.run.lock().await.take();
        let Some(run) = run else {
            self.running.store(false, Ordering::SeqCst);
            *self.state.lock().await = ContainerState::Stopped;
            return;
        };

        run.cancel.cancel();

        if tokio::time::timeout(POLL_TASK_JOIN_DEADLINE, run.poll_task)
            .await
            .is_err()
        {
            self.logger
                .warn("poll loop did not unwind within the shutdown deadline");
        }

        let drain = async {
            let mut tasks = run.dispatch_tasks.lock().await;
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(HANDLER_DRAIN_DEADLINE, drain).await.is_err() {
            self.logger
                .warn("one or more message tasks did not finish within the shutdown deadline");
        }

        if let Some(manager) = run.ack_manager {
            manager.shutdown().await;
        }

        self.running.store(false, Ordering::SeqCst);
        *self.state.lock().await = ContainerState::Stopped;
        self.logger.info("container stopped");
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_poll_loop(
        self: Arc<Self>,
        config: ContainerConfig,
        queue_url: String,
        cancel: CancellationHandle,
        permit: crate::permit::ConcurrencyPermit,
        dispatch_tasks: Arc<Mutex<JoinSet<()>>>,
        listener: Arc<dyn MessageListener<C::Output>>,
        ack_manager: Option<Arc<BatchAckManager>>,
    ) {
        let backoff = Duration::from_secs(config.polling_error_backoff_seconds);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let request = ReceiveRequest {
                queue_url: queue_url.clone(),
                max_number_of_messages: config.max_messages_per_poll,
                wait_time_seconds: config.poll_timeout_seconds,
                visibility_timeout: config.visibility_timeout_seconds,
            };

            match self.broker.receive(request, &cancel).await {
                Ok(messages) => {
                    {
                        let mut tasks = dispatch_tasks.lock().await;
                        for message in messages {
                            let container = self.clone();
                            let permit = permit.clone();
                            let listener = listener.clone();
                            let queue_url = queue_url.clone();
                            let ack_sink = match ack_manager.clone() {
                                Some(manager) => AckSink::Batched(manager),
                                None => AckSink::Direct(self.broker.clone()),
                            };
                            let mode = config.acknowledgement_mode;

                            tasks.spawn(async move {
                                container
                                    .dispatch_one(message, queue_url, ack_sink, permit, listener, mode)
                                    .await;
                            });
                        }
                    }

                    // Drain this batch's tasks before the next receive, so
                    // backpressure flows through the concurrency permit
                    // rather than stacking unbounded futures across polls.
                    let mut tasks = dispatch_tasks.lock().await;
                    while tasks.join_next().await.is_some() {}
                }
                Err(err) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.logger.warn(&format!(
                        "poll failed: {err}; backing off for {}s",
                        backoff.as_secs()
                    ));
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }
    }

    async fn dispatch_one(
        self: Arc<Self>,
        message: crate::broker::BrokerMessage,
        queue_url: String,
        ack_sink: AckSink,
        permit: crate::permit::ConcurrencyPermit,
        listener: Arc<dyn MessageListener<C::Output>>,
        mode: AcknowledgementMode,
    ) {
        let guard = permit.acquire().await;

        let ctx = MessageContext::new(
            message.message_id.clone(),
            message.receipt_handle.clone(),
            queue_url,
            message.message_attributes.clone(),
            message.system_attributes.clone(),
            ack_sink,
            self.logger.clone(),
        );

        match self
            .converter
            .convert(&message.body, &message.message_attributes, &ctx)
            .await
        {
            Ok(payload) => match listener.on_message(payload, &ctx).await {
                Ok(()) => {
                    self.logger
                        .debug(&format!("message {} handled successfully", ctx.message_id()));
                    if matches!(mode, AcknowledgementMode::OnSuccess | AcknowledgementMode::Always) {
                        ctx.acknowledge().await;
                    }
                }
                Err(handler_err) => {
                    // The decoded value was already moved into `on_message`;
                    // re-run the converter so the error handler still gets
                    // to see it, falling back to the raw body if that
                    // second attempt itself fails.
                    let payload = match self
                        .converter
                        .convert(&message.body, &message.message_attributes, &ctx)
                        .await
                    {
                        Ok(reconverted) => RawOrDecoded::Decoded(Box::new(reconverted)),
                        Err(_) => RawOrDecoded::Raw(message.body.clone()),
                    };
                    self.error_handler
                        .lock()
                        .await
                        .handle(&ProcessingError::Handler(handler_err), &payload, &ctx)
                        .await;
                    if matches!(mode, AcknowledgementMode::Always) {
                        ctx.acknowledge().await;
                    }
                }
            },
            Err(ConvertError::AlreadyHandled) => {
                self.logger.debug(&format!(
                    "message {} already handled by its converter",
                    ctx.message_id()
                ));
            }
            Err(convert_err) => {
                // Conversion itself failed, so there is no decoded value to
                // offer and re-running the converter would risk repeating
                // any side effect it already applied (e.g. an ACKNOWLEDGE
                // validation policy deleting the message again).
                let payload = RawOrDecoded::Raw(message.body.clone());
                self.error_handler
                    .lock()
                    .await
                    .handle(&ProcessingError::Convert(convert_err), &payload, &ctx)
                    .await;
                if matches!(mode, AcknowledgementMode::Always) {
                    ctx.acknowledge().await;
                }
            }
        }

        guard.release().await;
    }
}
