//! Batch Orchestrator Module
//!
//! This module runs the scheduler as a background task. All pool mutations
//! and scheduling cycles go through one command channel consumed by one
//! worker, so two cycles can never partition the same pending set.
//!
//! # Architecture Flow
//! 1. Callers send commands through a `SchedulerHandle`
//! 2. The worker applies them to the `BatchScheduler` one at a time
//! 3. Cycles run when the pool reaches `max_batch_size`, when the cycle
//!    timer fires with at least `min_batch_size` pooled, or on request
//! 4. Every new batch gets a waiter task that sleeps until its scheduled
//!    time, then submits it through the `ChainGateway` outside the worker
//! 5. Outcomes come back as commands and are published as `BatchEvent`s
//!
//! # Shutdown
//! Batches that have not started executing are dissolved back into the
//! pool; the worker keeps running until every executing batch has
//! completed or failed, then replies with the final stats to every caller
//! of `shutdown`. Dropping every handle without a shutdown stops the worker
//! and abandons batches that have not started.

use crate::{
    batch::{
        gateway::{ChainGateway, SubmissionReceipt},
        trigger::{self, CycleTrigger},
    },
    config::Config,
    error::{GatewayError, SchedulerError, SchedulerResult},
    events::BatchEvent,
    predictor::PredictionResult,
    scheduler::{AddOutcome, BatchScheduler, SchedulerStats},
    BatchId, PendingTransaction, TransactionBatch,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 1024;
const EVENT_BUFFER: usize = 256;

enum Command {
    Add {
        tx: PendingTransaction,
        reply: oneshot::Sender<SchedulerResult<AddOutcome>>,
    },
    RunCycle {
        reply: oneshot::Sender<SchedulerResult<Vec<TransactionBatch>>>,
    },
    UpdatePrediction(PredictionResult),
    Stats {
        reply: oneshot::Sender<SchedulerStats>,
    },
    Batch {
        id: BatchId,
        reply: oneshot::Sender<Option<TransactionBatch>>,
    },
    Pending {
        reply: oneshot::Sender<Vec<PendingTransaction>>,
    },
    BeginExecution {
        id: BatchId,
        reply: oneshot::Sender<Option<TransactionBatch>>,
    },
    ExecutionFinished {
        id: BatchId,
        outcome: Result<SubmissionReceipt, GatewayError>,
    },
    Shutdown {
        reply: oneshot::Sender<SchedulerStats>,
    },
}

/// Cloneable front door to a running scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<BatchEvent>,
}

impl SchedulerHandle {
    /// Submit a transaction
    ///
    /// Critical transactions come back as `AddOutcome::FastLane` with their
    /// batch already scheduled.
    pub async fn add_transaction(&self, tx: PendingTransaction) -> SchedulerResult<AddOutcome> {
        self.request(|reply| Command::Add { tx, reply }).await?
    }

    /// Run a scheduling cycle now; the returned batches are already `Scheduled`
    pub async fn create_optimal_batches(&self) -> SchedulerResult<Vec<TransactionBatch>> {
        self.request(|reply| Command::RunCycle { reply }).await?
    }

    pub async fn update_prediction(&self, prediction: PredictionResult) -> SchedulerResult<()> {
        self.commands
            .send(Command::UpdatePrediction(prediction))
            .await
            .map_err(|_| SchedulerError::WorkerStopped)
    }

    pub async fn stats(&self) -> SchedulerResult<SchedulerStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    pub async fn batch(&self, id: BatchId) -> SchedulerResult<Option<TransactionBatch>> {
        self.request(|reply| Command::Batch { id, reply }).await
    }

    /// Snapshot of the pool in arrival order
    pub async fn pending_transactions(&self) -> SchedulerResult<Vec<PendingTransaction>> {
        self.request(|reply| Command::Pending { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    /// Stop accepting work and wait for executing batches to finish
    pub async fn shutdown(&self) -> SchedulerResult<SchedulerStats> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> SchedulerResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SchedulerError::WorkerStopped)?;
        response.await.map_err(|_| SchedulerError::WorkerStopped)
    }
}

/// Batch orchestrator
///
/// Owns the `BatchScheduler` inside the worker task.
pub struct BatchOrchestrator {
    scheduler: BatchScheduler,
    gateway: Arc<dyn ChainGateway>,
    /// Weak so that dropping every handle stops the worker
    commands_tx: mpsc::WeakSender<Command>,
    commands_rx: mpsc::Receiver<Command>,
    events: broadcast::Sender<BatchEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    cycle_interval: Duration,
    draining: bool,
    /// Every caller of `shutdown`, answered once the drain completes
    shutdown_replies: Vec<oneshot::Sender<SchedulerStats>>,
}

impl BatchOrchestrator {
    /// Start the worker task and return a handle to it
    pub fn spawn(config: &Config, gateway: Arc<dyn ChainGateway>) -> SchedulerHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let orchestrator = Self {
            scheduler: BatchScheduler::new(config.scheduler.clone(), config.predictor.confidence_threshold),
            gateway,
            commands_tx: commands_tx.downgrade(),
            commands_rx,
            events: events.clone(),
            shutdown_tx,
            shutdown_rx,
            cycle_interval: Duration::from_millis(config.scheduler.cycle_interval_ms),
            draining: false,
            shutdown_replies: Vec::new(),
        };
        tokio::spawn(orchestrator.run());

        SchedulerHandle {
            commands: commands_tx,
            events,
        }
    }

    async fn run(mut self) {
        let config = self.scheduler.config();
        info!(
            "Batch orchestrator starting: max_batch_size={}, min_batch_size={}, max_wait_time_ms={}, cycle_interval_ms={}",
            config.max_batch_size,
            config.min_batch_size,
            config.max_wait_time_ms,
            self.cycle_interval.as_millis()
        );

        let mut ticker = interval(self.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        info!("Every scheduler handle dropped, batch orchestrator exiting");
                        break;
                    }
                },
                _ = ticker.tick(), if !self.draining => self.on_tick(),
            }

            if self.draining && self.scheduler.executing_count() == 0 {
                let stats = self.scheduler.stats();
                info!(
                    "Batch orchestrator stopped: {} completed, {} failed, {} transactions pooled",
                    stats.completed_batches, stats.failed_batches, stats.pool_size
                );
                for reply in self.shutdown_replies.drain(..) {
                    let _ = reply.send(stats.clone());
                }
                break;
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Add { tx, reply } => {
                let result = self.add_transaction(tx);
                let _ = reply.send(result);
            }
            Command::RunCycle { reply } => {
                let result = if self.draining {
                    Err(SchedulerError::ShuttingDown)
                } else {
                    Ok(self.run_cycle(CycleTrigger::Manual))
                };
                let _ = reply.send(result);
            }
            Command::UpdatePrediction(prediction) => {
                self.scheduler.update_prediction(prediction);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.scheduler.stats());
            }
            Command::Batch { id, reply } => {
                let _ = reply.send(self.scheduler.batch(id).cloned());
            }
            Command::Pending { reply } => {
                let pending = self.scheduler.pool().pending().into_iter().cloned().collect();
                let _ = reply.send(pending);
            }
            Command::BeginExecution { id, reply } => {
                let batch = match self.scheduler.begin_execution(id) {
                    Ok(batch) => Some(batch),
                    Err(e) => {
                        debug!("Batch #{} not started: {}", id, e);
                        None
                    }
                };
                let _ = reply.send(batch);
            }
            Command::ExecutionFinished { id, outcome } => self.finish_execution(id, outcome),
            Command::Shutdown { reply } => {
                if !self.draining {
                    info!("Shutdown requested, draining executing batches");
                    let _ = self.shutdown_tx.send(true);
                    self.scheduler.release_unstarted();
                    self.draining = true;
                }
                self.shutdown_replies.push(reply);
            }
        }
    }

    fn add_transaction(&mut self, tx: PendingTransaction) -> SchedulerResult<AddOutcome> {
        if self.draining {
            return Err(SchedulerError::ShuttingDown);
        }

        let outcome = self.scheduler.add_transaction(tx, Utc::now())?;
        match &outcome {
            AddOutcome::FastLane(batch) => self.dispatch(batch),
            AddOutcome::Pooled { cycle_due: true } => {
                self.run_cycle(CycleTrigger::SizeThreshold);
            }
            AddOutcome::Pooled { cycle_due: false } => {}
        }
        Ok(outcome)
    }

    fn on_tick(&mut self) {
        let now = Utc::now();
        self.scheduler.prune(now);

        let pool_size = self.scheduler.pool().len();
        if trigger::timer_due(pool_size, self.scheduler.config().min_batch_size) {
            self.run_cycle(CycleTrigger::Timer);
        }
    }

    /// Create batches, schedule them and arm their waiters
    fn run_cycle(&mut self, trigger: CycleTrigger) -> Vec<TransactionBatch> {
        debug!("Scheduling cycle triggered ({})", trigger);
        let created = self.scheduler.create_optimal_batches(Utc::now());

        let mut scheduled = Vec::with_capacity(created.len());
        for batch in created {
            match self.scheduler.schedule(batch.id) {
                Ok(batch) => {
                    self.dispatch(&batch);
                    scheduled.push(batch);
                }
                Err(e) => warn!("Failed to schedule batch #{}: {}", batch.id, e),
            }
        }
        scheduled
    }

    /// Spawn the task that submits `batch` at its scheduled time
    fn dispatch(&self, batch: &TransactionBatch) {
        let id = batch.id;
        let wait = (batch.scheduled_time - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let commands = self.commands_tx.clone();
        let gateway = Arc::clone(&self.gateway);
        let mut shutdown = self.shutdown_rx.clone();

        tokio::spawn(async move {
            // `changed` also resolves once the worker is gone
            tokio::select! {
                _ = sleep(wait) => {}
                _ = shutdown.changed() => {
                    debug!("Batch #{} released before execution", id);
                    return;
                }
            }

            let Some(commands) = commands.upgrade() else {
                return;
            };
            let (reply, response) = oneshot::channel();
            if commands.send(Command::BeginExecution { id, reply }).await.is_err() {
                return;
            }
            let Ok(Some(batch)) = response.await else {
                return;
            };

            let outcome = gateway.submit(&batch).await;
            let _ = commands.send(Command::ExecutionFinished { id, outcome }).await;
        });
    }

    fn finish_execution(&mut self, id: BatchId, outcome: Result<SubmissionReceipt, GatewayError>) {
        let now = Utc::now();
        let result = match outcome {
            Ok(receipt) => self.scheduler.complete(id, &receipt, now),
            Err(e) => self.scheduler.fail(id, e.to_string(), now),
        };

        match result {
            // No subscribers is fine
            Ok(event) => {
                let _ = self.events.send(event);
            }
            Err(e) => warn!("Could not record outcome of batch #{}: {}", id, e),
        }
    }
}
