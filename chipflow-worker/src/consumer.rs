//! # Worker Loop
//!
//! The generic consumer skeleton every executor runs: single-prefetch pull,
//! schema-validate, dispatch by `task_type`, classify exceptions into
//! {transient, input-error, other}, and publish the result with the
//! original task-id and correlation-id preserved. Grounded in the upstream
//! agent worker base's `run()` loop, translated from a threaded `while not
//! stop_event.is_set()` poll into an async task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chipflow_shared::contracts::{Task, TaskResult};
use chipflow_shared::error::MessagingError;
use chipflow_shared::messaging::{BrokerProvider, Delivery, MessagingProvider};
use chipflow_shared::retry::{classify, retry_count, FailureClass};
use chrono::Utc;

use crate::handler::{handles, TaskHandler};

/// Tunables for one worker loop instance.
#[derive(Debug, Clone)]
pub struct WorkerLoopConfig {
    /// Queue this instance pulls from (`agent_tasks`, `process_tasks`, or
    /// `simulation_tasks`).
    pub queue: String,
    /// How long to sleep between polls when the queue is empty. Also the
    /// interval at which the stop flag is re-checked.
    pub poll_interval: Duration,
    /// Maximum retry attempts before a transiently-failing task is rejected
    /// to the dead letter queue.
    pub max_retries: u32,
}

impl WorkerLoopConfig {
    pub fn new(queue: impl Into<String>, max_retries: u32) -> Self {
        Self {
            queue: queue.into(),
            poll_interval: Duration::from_millis(500),
            max_retries,
        }
    }
}

/// Drives one queue against a fixed set of handlers until told to stop.
/// Single-threaded by construction: concurrency comes from running multiple
/// `WorkerLoop` instances, not from parallelism inside one.
pub struct WorkerLoop {
    broker: BrokerProvider,
    handlers: Vec<Box<dyn TaskHandler>>,
    config: WorkerLoopConfig,
    stop: Arc<AtomicBool>,
}

impl std::fmt::Debug for WorkerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLoop")
            .field("broker", &self.broker)
            .field("handler_count", &self.handlers.len())
            .field("config", &self.config)
            .field("stop", &self.stop)
            .finish()
    }
}

impl WorkerLoop {
    pub fn new(broker: BrokerProvider, handlers: Vec<Box<dyn TaskHandler>>, config: WorkerLoopConfig) -> Self {
        Self {
            broker,
            handlers,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clonable flag the caller can set to stop the loop between
    /// deliveries. Checked at the top of every iteration, never mid-handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run until `stop_handle()` is set. Returns only on a broker-level
    /// error reaching the consume call itself; per-task failures are
    /// handled internally and never propagate out of the loop.
    pub async fn run(&self) -> Result<(), MessagingError> {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(());
            }

            match self
                .broker
                .consume_one(&self.config.queue, self.config.poll_interval)
                .await?
            {
                Some(delivery) => self.process_delivery(delivery).await,
                None => tokio::time::sleep(self.config.poll_interval).await,
            }
        }
    }

    async fn process_delivery(&self, delivery: Delivery) {
        let task: Task = match serde_json::from_slice(&delivery.body) {
            Ok(task) => task,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed task to dead letter queue");
                if let Err(err) = self.broker.nack(delivery, false).await {
                    tracing::error!(error = %err, "failed to nack malformed delivery");
                }
                return;
            }
        };

        tracing::info!(task_id = %task.task_id, task_type = ?task.task_type, "task received");

        let handler = self.handlers.iter().find(|candidate| handles(candidate.as_ref(), task.task_type));

        let Some(handler) = handler else {
            tracing::warn!(task_id = %task.task_id, task_type = ?task.task_type, "no handler registered, requeueing");
            if let Err(err) = self.broker.nack(delivery, true).await {
                tracing::error!(error = %err, "failed to nack unhandled delivery");
            }
            return;
        };

        match handler.handle(&task).await {
            Ok(result) => self.publish_and_ack(delivery, result).await,
            Err(err) => self.handle_failure(delivery, &task, err).await,
        }
    }

    async fn publish_and_ack(&self, delivery: Delivery, result: TaskResult) {
        tracing::info!(task_id = %result.task_id, status = ?result.status, "result published");
        if let Err(err) = self.broker.publish_result(&result).await {
            tracing::error!(error = %err, "failed to publish result");
        }
        if let Err(err) = self.broker.ack(delivery).await {
            tracing::error!(error = %err, "failed to ack processed delivery");
        }
    }

    async fn handle_failure(&self, delivery: Delivery, task: &Task, err: anyhow::Error) {
        match classify(&err) {
            FailureClass::InputError => {
                tracing::warn!(task_id = %task.task_id, error = %err, "input error, rejecting to dead letter queue");
                if let Err(err) = self.broker.nack(delivery, false).await {
                    tracing::error!(error = %err, "failed to nack input-error delivery");
                }
            }
            FailureClass::Transient => {
                let attempt = retry_count(delivery.headers.as_ref());
                if attempt < self.config.max_retries {
                    tracing::warn!(task_id = %task.task_id, attempt, error = %err, "transient failure, scheduling retry");
                    if let Err(err) = self.broker.republish_with_retry(&delivery).await {
                        tracing::error!(error = %err, "failed to republish retry");
                    }
                    if let Err(err) = self.broker.ack(delivery).await {
                        tracing::error!(error = %err, "failed to ack delivery after scheduling retry");
                    }
                } else {
                    tracing::warn!(task_id = %task.task_id, attempt, "retry budget exhausted, rejecting to dead letter queue");
                    if let Err(err) = self.broker.nack(delivery, false).await {
                        tracing::error!(error = %err, "failed to nack exhausted-retry delivery");
                    }
                }
            }
            FailureClass::Other => {
                tracing::error!(task_id = %task.task_id, error = %err, "unclassified handler failure, publishing FAILURE result");
                let result = TaskResult::failure(task.task_id, task.correlation_id, err.to_string(), Utc::now());
                self.publish_and_ack(delivery, result).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chipflow_shared::contracts::{EntityClass, Priority, ResultStatus, TaskKind};
    use chipflow_shared::error::{RetryableError, TaskInputError};
    use chipflow_shared::messaging::topology::{DEAD_LETTER_QUEUE, PROCESS_TASKS_QUEUE};

    struct AlwaysSucceeds;

    #[async_trait]
    impl TaskHandler for AlwaysSucceeds {
        fn handles(&self) -> &'static [TaskKind] {
            &[TaskKind::Linter]
        }

        async fn handle(&self, task: &Task) -> anyhow::Result<TaskResult> {
            Ok(TaskResult {
                task_id: task.task_id,
                correlation_id: task.correlation_id,
                completed_at: Utc::now(),
                status: ResultStatus::Success,
                artifacts_path: None,
                log_output: "clean".to_string(),
                reflections: None,
                reflection_insights: None,
                distilled_dataset: None,
                metrics: None,
            })
        }
    }

    struct AlwaysTransient;

    #[async_trait]
    impl TaskHandler for AlwaysTransient {
        fn handles(&self) -> &'static [TaskKind] {
            &[TaskKind::Linter]
        }

        async fn handle(&self, _task: &Task) -> anyhow::Result<TaskResult> {
            Err(RetryableError::new("subprocess timed out").into())
        }
    }

    struct AlwaysInputError;

    #[async_trait]
    impl TaskHandler for AlwaysInputError {
        fn handles(&self) -> &'static [TaskKind] {
            &[TaskKind::Linter]
        }

        async fn handle(&self, _task: &Task) -> anyhow::Result<TaskResult> {
            Err(TaskInputError::new("context missing rtl_path").into())
        }
    }

    fn lint_task() -> Task {
        Task::new(
            uuid::Uuid::new_v4(),
            Priority::Medium,
            TaskKind::Linter,
            serde_json::json!({"node_id": "and2"}),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn successful_handler_publishes_result_and_acks() {
        let broker = BrokerProvider::new_in_memory();
        broker.publish_task(&lint_task()).await.unwrap();

        let worker = WorkerLoop::new(
            broker.clone(),
            vec![Box::new(AlwaysSucceeds)],
            WorkerLoopConfig::new(PROCESS_TASKS_QUEUE, 1),
        );

        let delivery = broker
            .consume_one(PROCESS_TASKS_QUEUE, Duration::from_millis(1))
            .await
            .unwrap()
            .unwrap();
        worker.process_delivery(delivery).await;

        let result_delivery = broker
            .consume_one(chipflow_shared::messaging::topology::RESULTS_QUEUE, Duration::from_millis(1))
            .await
            .unwrap()
            .expect("a result should have been published");
        let result: TaskResult = serde_json::from_slice(&result_delivery.body).unwrap();
        assert_eq!(result.status, ResultStatus::Success);
    }

    #[tokio::test]
    async fn transient_failure_retries_then_exhausts() {
        let broker = BrokerProvider::new_in_memory();
        broker.publish_task(&lint_task()).await.unwrap();

        let worker = WorkerLoop::new(
            broker.clone(),
            vec![Box::new(AlwaysTransient)],
            WorkerLoopConfig::new(PROCESS_TASKS_QUEUE, 1),
        );

        let first = broker
            .consume_one(PROCESS_TASKS_QUEUE, Duration::from_millis(1))
            .await
            .unwrap()
            .unwrap();
        worker.process_delivery(first).await;

        let retried = broker
            .consume_one(PROCESS_TASKS_QUEUE, Duration::from_millis(1))
            .await
            .unwrap()
            .expect("a retry should have been republished");
        assert_eq!(chipflow_shared::retry::retry_count(retried.headers.as_ref()), 1);

        worker.process_delivery(retried).await;

        assert_eq!(broker.as_in_memory().unwrap().queue_len(PROCESS_TASKS_QUEUE), 0);
        assert_eq!(broker.as_in_memory().unwrap().queue_len(DEAD_LETTER_QUEUE), 1);
    }

    #[tokio::test]
    async fn input_error_goes_straight_to_dead_letter_queue() {
        let broker = BrokerProvider::new_in_memory();
        broker.publish_task(&lint_task()).await.unwrap();

        let worker = WorkerLoop::new(
            broker.clone(),
            vec![Box::new(AlwaysInputError)],
            WorkerLoopConfig::new(PROCESS_TASKS_QUEUE, 1),
        );

        let delivery = broker
            .consume_one(PROCESS_TASKS_QUEUE, Duration::from_millis(1))
            .await
            .unwrap()
            .unwrap();
        worker.process_delivery(delivery).await;

        assert_eq!(broker.as_in_memory().unwrap().queue_len(DEAD_LETTER_QUEUE), 1);
    }

    #[tokio::test]
    async fn unhandled_task_kind_requeues_instead_of_dlq() {
        let broker = BrokerProvider::new_in_memory();
        let mut task = lint_task();
        task.task_type = TaskKind::Simulator;
        task.entity_type = EntityClass::HeavyDeterministic;
        broker.publish_task(&task).await.unwrap();

        let worker = WorkerLoop::new(
            broker.clone(),
            vec![Box::new(AlwaysSucceeds)],
            WorkerLoopConfig::new(
                chipflow_shared::messaging::topology::SIMULATION_TASKS_QUEUE,
                1,
            ),
        );

        let delivery = broker
            .consume_one(
                chipflow_shared::messaging::topology::SIMULATION_TASKS_QUEUE,
                Duration::from_millis(1),
            )
            .await
            .unwrap()
            .unwrap();
        worker.process_delivery(delivery).await;

        assert_eq!(
            broker
                .as_in_memory()
                .unwrap()
                .queue_len(chipflow_shared::messaging::topology::SIMULATION_TASKS_QUEUE),
            1,
            "unhandled task should be requeued, not dropped"
        );
    }
}
