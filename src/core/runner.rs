use crate::core::{MigrationUnit, UnitCopier};
use crate::domain::model::{BatchReport, CopyOutcome, Transfer, UnitReport};
use crate::utils::error::{FailureKind, MigrationError, Result};
use crate::utils::monitor::SystemMonitor;
use crate::utils::validation::{validate_non_empty_string, validate_positive_number, Validate};
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

pub const SKIPPED_EXISTING_REASON: &str = "Already exists in destination";

/// Settings for one runner invocation. Built once at startup and read-only
/// while units are being copied.
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    pub resource: String,
    pub concurrency_limit: usize,
    pub unit_timeout: Option<Duration>,
    pub source: String,
    pub destination: String,
    pub monitor: bool,
}

impl RunConfiguration {
    pub fn new(resource: impl Into<String>, concurrency_limit: usize) -> Self {
        Self {
            resource: resource.into(),
            concurrency_limit,
            unit_timeout: None,
            source: String::new(),
            destination: String::new(),
            monitor: false,
        }
    }

    pub fn with_endpoints(mut self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        self.source = source.into();
        self.destination = destination.into();
        self
    }

    pub fn with_unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout = timeout;
        self
    }

    pub fn with_monitor(mut self, monitor: bool) -> Self {
        self.monitor = monitor;
        self
    }
}

impl Validate for RunConfiguration {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("run.resource", &self.resource)?;
        validate_positive_number("run.concurrency", self.concurrency_limit, 1)?;
        if self.unit_timeout == Some(Duration::ZERO) {
            return Err(MigrationError::InvalidConfigValueError {
                field: "run.unit_timeout_seconds".to_string(),
                value: "0".to_string(),
                reason: "Timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Runs migration units through a copier in concurrency-limited batches.
///
/// Each batch is awaited as a whole before the next one starts. Failures,
/// panics and timeouts of a single unit are recorded as that unit's outcome
/// and never abort its siblings or the run.
pub struct BatchRunner {
    config: RunConfiguration,
    monitor: SystemMonitor,
}

impl BatchRunner {
    pub fn new(config: RunConfiguration) -> Self {
        let monitor = SystemMonitor::new(config.monitor);
        Self { config, monitor }
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub async fn run<C>(&self, units: &[MigrationUnit], copier: &C) -> Result<BatchReport>
    where
        C: UnitCopier + ?Sized,
    {
        self.config.validate()?;

        let limit = self.config.concurrency_limit;
        let total = units.len();
        let batch_count = total.div_ceil(limit);
        let start_time = Utc::now();
        let started = Instant::now();

        tracing::info!(
            "🚀 Migrating {} {} unit(s) in {} batch(es) of up to {}",
            total,
            self.config.resource,
            batch_count,
            limit
        );

        let mut outcomes = Vec::with_capacity(total);

        for (batch_index, batch) in units.chunks(limit).enumerate() {
            tracing::info!(
                "Processing batch {} of {} ({} units)...",
                batch_index + 1,
                batch_count,
                batch.len()
            );

            let pending = batch.iter().enumerate().map(|(offset, unit)| {
                self.settle(copier, unit, batch_index * limit + offset + 1, total)
            });
            let settled = join_all(pending).await;

            for (unit, outcome) in batch.iter().zip(settled) {
                outcomes.push(UnitReport {
                    unit: unit.clone(),
                    outcome,
                });
            }

            self.monitor
                .log_stats(&format!("batch {}/{}", batch_index + 1, batch_count));
        }

        let report = BatchReport::assemble(
            &self.config,
            copier.metric(),
            start_time,
            Utc::now(),
            started.elapsed(),
            outcomes,
        );

        tracing::info!(
            "🏁 {} migration finished: {} succeeded, {} skipped, {} failed",
            report.resource,
            report.counts.succeeded,
            report.counts.skipped,
            report.counts.failed
        );

        Ok(report)
    }

    async fn settle<C>(
        &self,
        copier: &C,
        unit: &MigrationUnit,
        position: usize,
        total: usize,
    ) -> CopyOutcome
    where
        C: UnitCopier + ?Sized,
    {
        tracing::debug!(
            "[{}/{}] Processing {} [{}]",
            position,
            total,
            unit.key,
            unit.group
        );

        let started = Instant::now();
        let attempt = AssertUnwindSafe(copier.copy_one(unit)).catch_unwind();

        let result = match self.config.unit_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt).await.unwrap_or_else(|_| {
                Ok(Err(MigrationError::UnitTimeout {
                    resource: unit.key.clone(),
                    seconds: limit.as_secs(),
                }))
            }),
            None => attempt.await,
        };
        let duration_seconds = started.elapsed().as_secs_f64();

        let outcome = match result {
            Ok(Ok(Transfer::Copied { amount })) => CopyOutcome::Succeeded {
                amount,
                duration_seconds,
            },
            Ok(Ok(Transfer::AlreadyPresent { existing_size }))
            | Ok(Err(MigrationError::DestinationAlreadyExists { existing_size, .. })) => {
                CopyOutcome::Skipped {
                    reason: SKIPPED_EXISTING_REASON.to_string(),
                    existing_size,
                }
            }
            Ok(Err(e)) => CopyOutcome::Failed {
                reason: e.to_string(),
                kind: e.failure_kind(),
            },
            Err(panic) => CopyOutcome::Failed {
                reason: format!("copy panicked: {}", panic_message(panic.as_ref())),
                kind: FailureKind::Panic,
            },
        };

        match &outcome {
            CopyOutcome::Succeeded { duration_seconds, .. } => {
                tracing::info!("  ✓ {} completed in {:.2}s", unit.key, duration_seconds)
            }
            CopyOutcome::Skipped { .. } => {
                tracing::info!("  ⊘ {} already exists in destination - SKIPPING", unit.key)
            }
            CopyOutcome::Failed { reason, .. } => {
                tracing::error!("  ✗ {} failed: {}", unit.key, reason)
            }
        }

        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::MetricKind;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted copier: outcome per key, default is a successful copy of 10.
    struct ScriptedCopier {
        script: HashMap<String, Script>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    #[derive(Clone)]
    enum Script {
        Copy(u64),
        Exists(u64),
        Fail(&'static str),
        Panic,
        Hang,
    }

    impl ScriptedCopier {
        fn new(script: &[(&str, Script)]) -> Self {
            Self {
                script: script
                    .iter()
                    .map(|(key, s)| (key.to_string(), s.clone()))
                    .collect(),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl UnitCopier for ScriptedCopier {
        fn metric(&self) -> MetricKind {
            MetricKind::Bytes
        }

        async fn copy_one(&self, unit: &MigrationUnit) -> Result<Transfer> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.script.get(&unit.key).cloned().unwrap_or(Script::Copy(10)) {
                Script::Copy(amount) => Ok(Transfer::Copied { amount }),
                Script::Exists(size) => Ok(Transfer::AlreadyPresent {
                    existing_size: Some(size),
                }),
                Script::Fail(message) => Err(MigrationError::not_found(&unit.key, message)),
                Script::Panic => panic!("adapter bug"),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Transfer::Copied { amount: 0 })
                }
            }
        }
    }

    /// In-memory destination: copies a key once, reports it present afterwards.
    struct MemoryDestination {
        stored: Mutex<HashMap<String, u64>>,
        writes: AtomicUsize,
    }

    impl MemoryDestination {
        fn new() -> Self {
            Self {
                stored: Mutex::new(HashMap::new()),
                writes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl UnitCopier for MemoryDestination {
        fn metric(&self) -> MetricKind {
            MetricKind::Entities
        }

        async fn copy_one(&self, unit: &MigrationUnit) -> Result<Transfer> {
            if unit.key.starts_with("missing") {
                return Err(MigrationError::not_found(&unit.key, "absent in source"));
            }
            let mut stored = self.stored.lock().unwrap();
            if let Some(size) = stored.get(&unit.key) {
                return Ok(Transfer::AlreadyPresent {
                    existing_size: Some(*size),
                });
            }
            let size = unit.key.len() as u64;
            stored.insert(unit.key.clone(), size);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(Transfer::Copied { amount: size })
        }
    }

    fn units(keys: &[&str]) -> Vec<MigrationUnit> {
        keys.iter().map(|k| MigrationUnit::new(*k, "group")).collect()
    }

    fn runner(limit: usize) -> BatchRunner {
        BatchRunner::new(RunConfiguration::new("blob", limit))
    }

    fn keys(report: &BatchReport) -> Vec<&str> {
        report.outcomes.iter().map(|o| o.unit.key.as_str()).collect()
    }

    #[tokio::test]
    async fn test_mixed_outcomes_keep_enumeration_order() {
        let copier = ScriptedCopier::new(&[
            ("A", Script::Copy(100)),
            ("B", Script::Fail("not found")),
            ("C", Script::Exists(7)),
        ]);

        let report = runner(2).run(&units(&["A", "B", "C"]), &copier).await.unwrap();

        assert_eq!(report.counts.succeeded, 1);
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.skipped, 1);
        assert_eq!(report.counts.total, 3);
        assert_eq!(keys(&report), vec!["A", "B", "C"]);
        assert!(report.outcomes[0].outcome.is_succeeded());
        assert!(report.outcomes[1].outcome.is_failed());
        assert_eq!(
            report.outcomes[2].outcome,
            CopyOutcome::Skipped {
                reason: SKIPPED_EXISTING_REASON.to_string(),
                existing_size: Some(7)
            }
        );
        assert_eq!(report.total_transferred, 100);
    }

    #[tokio::test]
    async fn test_empty_input_yields_empty_report() {
        let copier = ScriptedCopier::new(&[]);
        let report = runner(3).run(&[], &copier).await.unwrap();

        assert_eq!(report.counts, Default::default());
        assert!(report.outcomes.is_empty());
        assert_eq!(report.total_transferred, 0);
        assert_eq!(report.average_throughput, 0.0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_configuration_error() {
        let copier = ScriptedCopier::new(&[]);
        let err = runner(0).run(&units(&["A"]), &copier).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_outcomes_independent_of_concurrency() {
        let script = [
            ("u2", Script::Fail("denied")),
            ("u5", Script::Exists(3)),
            ("u7", Script::Copy(42)),
        ];
        let input: Vec<MigrationUnit> = (0..9)
            .map(|i| MigrationUnit::new(format!("u{}", i), "g"))
            .collect();

        let mut baseline = None;
        for limit in [1, 2, 3, 4, 9, 20] {
            let copier = ScriptedCopier::new(&script);
            let report = runner(limit).run(&input, &copier).await.unwrap();
            let shape: Vec<(String, &'static str)> = report
                .outcomes
                .iter()
                .map(|o| (o.unit.key.clone(), o.outcome.label()))
                .collect();

            assert_eq!(shape.len(), input.len());
            match &baseline {
                None => baseline = Some(shape),
                Some(expected) => assert_eq!(&shape, expected, "limit {}", limit),
            }
        }
    }

    #[tokio::test]
    async fn test_concurrency_limit_bounds_in_flight_units() {
        let copier = ScriptedCopier::new(&[]);
        let input = units(&["a", "b", "c", "d", "e", "f", "g"]);

        runner(3).run(&input, &copier).await.unwrap();
        assert!(copier.peak_in_flight.load(Ordering::SeqCst) <= 3);

        let sequential = ScriptedCopier::new(&[]);
        runner(1).run(&input, &sequential).await.unwrap();
        assert_eq!(sequential.peak_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_cascade() {
        let copier = ScriptedCopier::new(&[("k1", Script::Fail("boom"))]);
        let input = units(&["k0", "k1", "k2", "k3", "k4"]);

        let report = runner(2).run(&input, &copier).await.unwrap();

        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.succeeded, 4);
        match &report.outcomes[1].outcome {
            CopyOutcome::Failed { reason, kind } => {
                assert!(reason.contains("boom"));
                assert_eq!(*kind, FailureKind::NotFound);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_copy_is_recorded_as_failure() {
        let copier = ScriptedCopier::new(&[("bad", Script::Panic)]);
        let report = runner(4)
            .run(&units(&["ok1", "bad", "ok2"]), &copier)
            .await
            .unwrap();

        assert_eq!(report.counts.succeeded, 2);
        match &report.outcomes[1].outcome {
            CopyOutcome::Failed { reason, kind } => {
                assert_eq!(*kind, FailureKind::Panic);
                assert!(reason.contains("adapter bug"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unit_timeout_only_fails_slow_unit() {
        let copier = ScriptedCopier::new(&[("slow", Script::Hang)]);
        let config = RunConfiguration::new("table", 3)
            .with_unit_timeout(Some(Duration::from_millis(200)));

        let report = BatchRunner::new(config)
            .run(&units(&["fast", "slow", "other"]), &copier)
            .await
            .unwrap();

        assert_eq!(report.counts.succeeded, 2);
        assert!(matches!(
            report.outcomes[1].outcome,
            CopyOutcome::Failed {
                kind: FailureKind::Timeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_second_run_skips_everything_copied_by_first() {
        let destination = MemoryDestination::new();
        let input = units(&["alpha", "beta", "missing-gamma", "delta"]);

        let first = runner(2).run(&input, &destination).await.unwrap();
        assert_eq!(first.counts.succeeded, 3);
        assert_eq!(first.counts.failed, 1);
        let state_after_first = destination.stored.lock().unwrap().clone();

        let second = runner(3).run(&input, &destination).await.unwrap();
        for (before, after) in first.outcomes.iter().zip(&second.outcomes) {
            if before.outcome.is_succeeded() {
                assert!(after.outcome.is_skipped(), "{} not skipped", after.unit.key);
            }
        }
        assert_eq!(second.counts.skipped, 3);
        assert_eq!(second.total_transferred, 0);
        assert_eq!(destination.writes.load(Ordering::SeqCst), 3);
        assert_eq!(*destination.stored.lock().unwrap(), state_after_first);
    }

    #[tokio::test]
    async fn test_destination_exists_error_maps_to_skip() {
        struct Conflicting;

        #[async_trait]
        impl UnitCopier for Conflicting {
            fn metric(&self) -> MetricKind {
                MetricKind::Artifacts
            }

            async fn copy_one(&self, unit: &MigrationUnit) -> Result<Transfer> {
                Err(MigrationError::DestinationAlreadyExists {
                    resource: unit.key.clone(),
                    existing_size: None,
                })
            }
        }

        let report = runner(1).run(&units(&["idx"]), &Conflicting).await.unwrap();
        assert_eq!(report.counts.skipped, 1);
        assert_eq!(report.metric, MetricKind::Artifacts);
    }
}
