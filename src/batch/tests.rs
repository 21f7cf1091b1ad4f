//! Tests for batch planning and the orchestrator
//!
//! Orchestrator tests run on a paused tokio clock, so waiting for a batch
//! scheduled minutes ahead completes instantly.

#[cfg(test)]
mod tests {
    use crate::{
        batch::{
            BatchEngine, BatchOrchestrator, ChainGateway, FeeSource, SchedulerHandle, SubmissionReceipt,
            trigger::{size_due, timer_due},
        },
        config::{Config, PredictorConfig, SchedulerConfig},
        error::{GatewayError, SchedulerError},
        events::BatchEvent,
        predictor::{spawn_telemetry_loop, FixedTelemetry, GasPricePredictor, RawNetworkSample},
        scheduler::AddOutcome,
        BatchId, BatchStatus, ChainId, PendingTransaction, Priority, TransactionKind, TxId,
    };
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use ethers::types::{Address, Bytes, H256, U256};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::broadcast;
    use tokio::time::{sleep, Duration};

    /// Gateway that fails a set number of submissions, optionally slowly
    struct MockGateway {
        failures_left: AtomicUsize,
        delay: Duration,
        submitted: Mutex<Vec<BatchId>>,
    }

    impl MockGateway {
        fn new(failures: usize, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                failures_left: AtomicUsize::new(failures),
                delay,
                submitted: Mutex::new(Vec::new()),
            })
        }

        fn ok() -> Arc<Self> {
            Self::new(0, Duration::ZERO)
        }

        fn submitted(&self) -> Vec<BatchId> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChainGateway for MockGateway {
        async fn submit(&self, batch: &crate::TransactionBatch) -> Result<SubmissionReceipt, GatewayError> {
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            self.submitted.lock().unwrap().push(batch.id);

            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(GatewayError::Rejected("replacement underpriced".to_string()));
            }
            Ok(SubmissionReceipt {
                reference: format!("0x{:x}", batch.id),
                realized_cost: None,
            })
        }
    }

    /// Helper function to create a test transaction
    fn create_test_tx(n: u64, chain_id: ChainId, priority: Priority, kind: TransactionKind) -> PendingTransaction {
        PendingTransaction {
            id: H256::from_low_u64_be(n),
            kind,
            from: Address::from_low_u64_be(n),
            to: Address::zero(),
            value: U256::from(1000),
            data: Bytes::default(),
            chain_id,
            priority,
            deadline: None,
        }
    }

    fn medium_deployment(n: u64) -> PendingTransaction {
        create_test_tx(n, 1, Priority::Medium, TransactionKind::Deployment)
    }

    /// Defaults with a cycle timer long enough to stay out of the way
    fn test_config() -> Config {
        let mut config = Config::default();
        config.scheduler.cycle_interval_ms = 3_600_000;
        config
    }

    async fn add_all(handle: &SchedulerHandle, txs: Vec<PendingTransaction>) {
        for tx in txs {
            handle.add_transaction(tx).await.unwrap();
        }
    }

    async fn next_event(events: &mut broadcast::Receiver<BatchEvent>) -> BatchEvent {
        events.recv().await.unwrap()
    }

    #[test]
    fn test_priority_delay_shrinks_with_weight() {
        let engine = BatchEngine::new(SchedulerConfig::default());

        assert_eq!(engine.priority_delay(0.5), ChronoDuration::seconds(450));
        assert_eq!(engine.priority_delay(0.2), ChronoDuration::seconds(720));
        assert_eq!(engine.priority_delay(1.0), ChronoDuration::zero());
    }

    #[test]
    fn test_mixed_group_delay_uses_mean_weight() {
        let engine = BatchEngine::new(SchedulerConfig::default());
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let high = create_test_tx(1, 1, Priority::High, TransactionKind::Harvest);
        let low = create_test_tx(2, 1, Priority::Low, TransactionKind::Harvest);
        let fees = FeeSource {
            prediction: None,
            confidence_threshold: 0.5,
        };

        let plan = engine.plan(&[&high, &low], now, fees);

        assert!((plan.mean_weight - 0.5).abs() < 1e-9);
        assert_eq!(plan.scheduled_time - now, ChronoDuration::seconds(450));
    }

    #[test]
    fn test_single_transaction_quote_has_no_discount() {
        let engine = BatchEngine::new(SchedulerConfig::default());

        let single = engine.quote(1, 30.0, 2.0);
        assert_eq!(single.gas_units, 21_000);
        assert_eq!(single.batched_cost, single.unbatched_cost);

        let pair = engine.quote(2, 30.0, 2.0);
        assert!(pair.batched_cost < pair.unbatched_cost);
        assert!((pair.batched_cost - 0.9 * pair.unbatched_cost).abs() < 1e-6);
    }

    #[test]
    fn test_engine_assigns_sequential_ids() {
        let mut engine = BatchEngine::new(SchedulerConfig::default());
        let now = Utc::now();
        let tx = medium_deployment(1);
        let fees = FeeSource {
            prediction: None,
            confidence_threshold: 0.5,
        };
        let plan = engine.plan(&[&tx], now, fees);

        let first = engine.create_batch(vec![tx.clone()], plan, BatchStatus::Pending, "test", now);
        let second = engine.create_batch(vec![tx], plan, BatchStatus::Pending, "test", now);

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[test]
    fn test_triggers() {
        assert!(size_due(20, 20));
        assert!(!size_due(19, 20));
        assert!(timer_due(5, 5));
        assert!(!timer_due(4, 5));
        assert!(!timer_due(0, 0));
    }

    #[test]
    fn test_event_wire_format() {
        let event = BatchEvent::BatchFailed {
            batch_id: 7,
            reason: "reverted".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "batch_failed");
        assert_eq!(json["batch_id"], 7);
        assert_eq!(json["reason"], "reverted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_batch_executes_and_reports_savings() {
        let gateway = MockGateway::ok();
        let handle = BatchOrchestrator::spawn(&test_config(), gateway.clone());
        let mut events = handle.subscribe();
        add_all(&handle, (1..=5).map(medium_deployment).collect()).await;

        let batches = handle.create_optimal_batches().await.unwrap();

        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.len(), 5);
        assert_eq!(batch.status, BatchStatus::Scheduled);
        let delay = (batch.scheduled_time - Utc::now()).num_seconds();
        assert!((440..=450).contains(&delay), "delay was {}s", delay);

        match next_event(&mut events).await {
            BatchEvent::BatchExecuted {
                batch_id,
                transaction_ids,
                savings,
                ..
            } => {
                assert_eq!(batch_id, batch.id);
                assert_eq!(transaction_ids, batch.transaction_ids());
                assert!(savings > 0.0);
            }
            other => panic!("Expected executed event, got {:?}", other),
        }

        assert_eq!(gateway.submitted(), vec![batch.id]);
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.completed_batches, 1);
        assert_eq!(stats.pool_size, 0);
        let stored = handle.batch(batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Completed);
        assert!(stored.status.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_transaction_executes_immediately() {
        let gateway = MockGateway::ok();
        let handle = BatchOrchestrator::spawn(&test_config(), gateway.clone());
        let mut events = handle.subscribe();
        add_all(&handle, vec![medium_deployment(1)]).await;

        let critical = create_test_tx(9, 1, Priority::Critical, TransactionKind::Withdrawal);
        let outcome = handle.add_transaction(critical).await.unwrap();

        let AddOutcome::FastLane(batch) = outcome else {
            panic!("Expected fast-lane batch");
        };
        assert_eq!(batch.status, BatchStatus::Scheduled);
        assert_eq!(batch.len(), 1);

        let event = next_event(&mut events).await;
        assert_eq!(event.batch_id(), batch.id);
        assert!(matches!(event, BatchEvent::BatchExecuted { .. }));
        assert_eq!(handle.stats().await.unwrap().pool_size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_threshold_triggers_cycle() {
        let mut config = test_config();
        config.scheduler.max_batch_size = 5;
        config.scheduler.min_batch_size = 2;
        let handle = BatchOrchestrator::spawn(&config, MockGateway::ok());

        add_all(&handle, (1..=5).map(medium_deployment).collect()).await;

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.pool_size, 0);
        assert_eq!(stats.scheduled_batches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_triggers_cycle_once_min_size_is_pooled() {
        let mut config = test_config();
        config.scheduler.cycle_interval_ms = 10_000;
        config.scheduler.min_batch_size = 3;
        let handle = BatchOrchestrator::spawn(&config, MockGateway::ok());

        add_all(&handle, (1..=2).map(medium_deployment).collect()).await;
        sleep(Duration::from_secs(11)).await;
        assert_eq!(handle.stats().await.unwrap().pool_size, 2);

        add_all(&handle, vec![medium_deployment(3)]).await;
        sleep(Duration::from_secs(10)).await;

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.pool_size, 0);
        assert_eq!(stats.scheduled_batches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_transactions_return_to_pool() {
        let gateway = MockGateway::new(1, Duration::ZERO);
        let handle = BatchOrchestrator::spawn(&test_config(), gateway.clone());
        let mut events = handle.subscribe();
        let txs: Vec<PendingTransaction> = (1..=5).map(medium_deployment).collect();
        let original: HashSet<TxId> = txs.iter().map(|tx| tx.id).collect();
        add_all(&handle, txs).await;

        let batch = handle.create_optimal_batches().await.unwrap().remove(0);

        match next_event(&mut events).await {
            BatchEvent::BatchFailed { batch_id, reason } => {
                assert_eq!(batch_id, batch.id);
                assert!(reason.contains("underpriced"));
            }
            other => panic!("Expected failed event, got {:?}", other),
        }

        let pending = handle.pending_transactions().await.unwrap();
        let pooled: HashSet<TxId> = pending.iter().map(|tx| tx.id).collect();
        assert_eq!(pending.len(), 5);
        assert_eq!(pooled, original);

        // Re-batching is the retry
        let retry = handle.create_optimal_batches().await.unwrap();
        assert_eq!(retry.len(), 1);
        let event = next_event(&mut events).await;
        assert!(matches!(event, BatchEvent::BatchExecuted { .. }));
        assert_eq!(gateway.submitted(), vec![batch.id, retry[0].id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_transaction_is_rejected() {
        let handle = BatchOrchestrator::spawn(&test_config(), MockGateway::ok());
        let tx = create_test_tx(1, 0, Priority::Low, TransactionKind::Approval);

        let err = handle.add_transaction(tx).await.unwrap_err();

        assert_eq!(err, SchedulerError::MissingChainId(H256::from_low_u64_be(1)));
        assert_eq!(handle.stats().await.unwrap().pool_size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_executing_batches() {
        let gateway = MockGateway::new(0, Duration::from_secs(30));
        let handle = BatchOrchestrator::spawn(&test_config(), gateway.clone());
        add_all(&handle, (1..=5).map(medium_deployment).collect()).await;
        handle.create_optimal_batches().await.unwrap();
        let critical = create_test_tx(9, 1, Priority::Critical, TransactionKind::Withdrawal);
        handle.add_transaction(critical).await.unwrap();

        // Fast-lane batch starts after 1s and sits in the slow gateway
        sleep(Duration::from_secs(2)).await;
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.executing_batches, 1);
        assert_eq!(stats.scheduled_batches, 1);

        let stats = handle.shutdown().await.unwrap();

        assert_eq!(stats.completed_batches, 1);
        assert_eq!(stats.executing_batches, 0);
        assert_eq!(stats.scheduled_batches, 0);
        // The not-yet-started batch was dissolved
        assert_eq!(stats.pool_size, 5);
        assert_eq!(gateway.submitted().len(), 1);

        let err = handle.add_transaction(medium_deployment(42)).await.unwrap_err();
        assert_eq!(err, SchedulerError::WorkerStopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_forecast_feeds_fee_quote() {
        let config = test_config();
        let handle = BatchOrchestrator::spawn(&config, MockGateway::ok());
        let mut predictor = GasPricePredictor::new(PredictorConfig {
            features: vec![],
            update_interval_ms: 1_000,
            ..PredictorConfig::default()
        });
        predictor.initialize(Vec::new());
        let telemetry = Arc::new(FixedTelemetry::new(RawNetworkSample {
            base_fee: Some(50.0),
            priority_fee: Some(5.0),
            block_utilization: Some(0.1),
            ..RawNetworkSample::default()
        }));
        spawn_telemetry_loop(predictor, telemetry, handle.clone());

        sleep(Duration::from_millis(1_500)).await;
        add_all(&handle, (1..=5).map(medium_deployment).collect()).await;
        let batch = handle.create_optimal_batches().await.unwrap().remove(0);

        assert_eq!(batch.fee_quote.base_fee, 50.0);
        assert_eq!(batch.fee_quote.priority_fee, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_every_handle_stops_the_worker() {
        let gateway = MockGateway::ok();
        let handle = BatchOrchestrator::spawn(&test_config(), gateway.clone());
        let mut events = handle.subscribe();
        add_all(&handle, (1..=5).map(medium_deployment).collect()).await;
        handle.create_optimal_batches().await.unwrap();

        drop(handle);

        assert!(matches!(events.recv().await, Err(broadcast::error::RecvError::Closed)));
        sleep(Duration::from_millis(10)).await;
        // Worker and waiter both released their gateway clones
        assert_eq!(Arc::strong_count(&gateway), 1);
        assert!(gateway.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_shutdowns_all_receive_stats() {
        let gateway = MockGateway::new(0, Duration::from_secs(30));
        let handle = BatchOrchestrator::spawn(&test_config(), gateway);
        let critical = create_test_tx(9, 1, Priority::Critical, TransactionKind::Withdrawal);
        handle.add_transaction(critical).await.unwrap();
        sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.stats().await.unwrap().executing_batches, 1);

        let other = handle.clone();
        let (first, second) = tokio::join!(handle.shutdown(), other.shutdown());

        let first = first.unwrap();
        assert_eq!(first.completed_batches, 1);
        assert_eq!(second.unwrap(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_loop_initializes_a_fresh_predictor() {
        let handle = BatchOrchestrator::spawn(&test_config(), MockGateway::ok());
        let predictor = GasPricePredictor::new(PredictorConfig {
            features: vec![],
            ..PredictorConfig::default()
        });
        let telemetry = Arc::new(FixedTelemetry::new(RawNetworkSample {
            base_fee: Some(40.0),
            priority_fee: Some(3.0),
            ..RawNetworkSample::default()
        }));
        spawn_telemetry_loop(predictor, telemetry, handle.clone());

        sleep(Duration::from_millis(10)).await;
        add_all(&handle, (1..=5).map(medium_deployment).collect()).await;
        let batch = handle.create_optimal_batches().await.unwrap().remove(0);

        assert_eq!(batch.fee_quote.base_fee, 40.0);
    }
}
