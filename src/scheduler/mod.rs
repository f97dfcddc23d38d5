use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::domain::SiteEnergy;
use crate::reconcile::{ReconcileError, Reconciler};
use crate::sinks::{RecordSink, SinkError};
use crate::sources::{FetchError, MonitoringApi};
use crate::window::PollWindow;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Anything that can abort one poll cycle. All variants are recoverable: the
/// loop logs them and retries on the next cycle.
#[derive(thiserror::Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Drives the fetch → reconcile → publish loop for one site.
///
/// At most one cycle is in flight; the next cycle is armed only after the
/// current one completes, success or failure, so cycles never overlap and
/// the checkpoint has a single writer.
pub struct PollScheduler<A, S, C> {
    api: A,
    sink: S,
    checkpoints: C,
    reconciler: Reconciler,
    mode: String,
    tz: Tz,
    delay: Duration,
    last_published: Option<DateTime<Utc>>,
}

impl<A, S, C> PollScheduler<A, S, C>
where
    A: MonitoringApi,
    S: RecordSink,
    C: CheckpointStore,
{
    /// Loads the checkpoint and derives the inter-cycle delay from the daily
    /// request quota (`86400 / daily_limit` seconds).
    pub async fn new(
        api: A,
        sink: S,
        checkpoints: C,
        site: impl Into<String>,
        mode: impl Into<String>,
        tz: Tz,
        daily_limit: u32,
    ) -> Result<Self, CheckpointError> {
        let last_published = checkpoints.load().await?;
        let delay = Duration::from_secs_f64(SECONDS_PER_DAY / f64::from(daily_limit.max(1)));
        Ok(Self {
            api,
            sink,
            checkpoints,
            reconciler: Reconciler::new(site, tz),
            mode: mode.into(),
            tz,
            delay,
            last_published,
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn last_published(&self) -> Option<DateTime<Utc>> {
        self.last_published
    }

    /// Runs for the process lifetime. The first cycle fires immediately;
    /// every cycle, failed or not, is followed by the same rate-budget
    /// delay, so failures never turn into retry storms and successes never
    /// poll faster than the budget.
    pub async fn run(mut self) {
        loop {
            metrics::counter!("poll_cycles_total").increment(1);
            if let Err(e) = self.cycle().await {
                match &e {
                    CycleError::Fetch(_) => {
                        metrics::counter!("fetch_failures_total").increment(1)
                    }
                    CycleError::Reconcile(_) => {
                        metrics::counter!("reconcile_rejected_total").increment(1)
                    }
                    CycleError::Sink(_) | CycleError::Checkpoint(_) => {}
                }
                metrics::counter!("poll_cycle_failures_total").increment(1);
                tracing::warn!(error = %e, "poll cycle failed, retrying after delay");
            }
            tokio::time::sleep(self.delay).await;
        }
    }

    /// One fetch → reconcile → publish pass.
    ///
    /// The checkpoint advances per confirmed publish and is persisted once
    /// per cycle, even when a later record in the same cycle failed — a
    /// restart then resumes past everything the sink confirmed.
    pub async fn cycle(&mut self) -> Result<(), CycleError> {
        let window = PollWindow::compute(self.last_published, Utc::now(), self.tz);
        let payload = self.api.energy_details(&window, &self.mode).await?;
        let readings = self.reconciler.reconcile(&payload, &self.mode)?;
        if readings.is_empty() {
            tracing::debug!(
                start = %window.start_param(),
                end = %window.end_param(),
                "window contained no data points"
            );
            return Ok(());
        }

        let before = self.last_published;
        let published = self.publish_all(&readings).await;
        if self.last_published != before {
            if let Some(ts) = self.last_published {
                self.checkpoints.store(ts).await?;
            }
        }
        published?;

        tracing::info!(points = readings.len(), "imported most recent data points");
        Ok(())
    }

    async fn publish_all(&mut self, readings: &[SiteEnergy]) -> Result<(), SinkError> {
        for reading in readings {
            self.sink.publish(reading).await?;
            self.last_published = Some(reading.ts);
            metrics::counter!("records_published_total").increment(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::TimeZone;
    use chrono_tz::Europe::Berlin;
    use serde_json::{json, Value};

    struct RecordingApi {
        payload: Value,
        windows: Arc<Mutex<Vec<PollWindow>>>,
    }

    #[async_trait::async_trait]
    impl MonitoringApi for RecordingApi {
        async fn energy_details(
            &self,
            window: &PollWindow,
            _mode: &str,
        ) -> Result<Value, FetchError> {
            self.windows.lock().unwrap().push(window.clone());
            Ok(self.payload.clone())
        }
    }

    struct FailingApi;

    #[async_trait::async_trait]
    impl MonitoringApi for FailingApi {
        async fn energy_details(
            &self,
            _window: &PollWindow,
            _mode: &str,
        ) -> Result<Value, FetchError> {
            Err(FetchError::Status(500))
        }
    }

    #[derive(Clone, Default)]
    struct VecSink {
        records: Arc<Mutex<Vec<SiteEnergy>>>,
        fail_after: Option<Arc<AtomicUsize>>,
    }

    impl VecSink {
        fn failing_after(n: usize) -> Self {
            Self {
                records: Arc::default(),
                fail_after: Some(Arc::new(AtomicUsize::new(n))),
            }
        }
    }

    #[async_trait::async_trait]
    impl RecordSink for VecSink {
        async fn publish(&self, reading: &SiteEnergy) -> Result<(), SinkError> {
            if let Some(remaining) = &self.fail_after {
                if remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_err()
                {
                    return Err(SinkError::Write("sink unavailable".to_string()));
                }
            }
            self.records.lock().unwrap().push(reading.clone());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct MemStore {
        checkpoint: Arc<Mutex<Option<DateTime<Utc>>>>,
    }

    impl MemStore {
        fn with(ts: DateTime<Utc>) -> Self {
            Self {
                checkpoint: Arc::new(Mutex::new(Some(ts))),
            }
        }
    }

    #[async_trait::async_trait]
    impl CheckpointStore for MemStore {
        async fn load(&self) -> Result<Option<DateTime<Utc>>, CheckpointError> {
            Ok(*self.checkpoint.lock().unwrap())
        }

        async fn store(&self, ts: DateTime<Utc>) -> Result<(), CheckpointError> {
            *self.checkpoint.lock().unwrap() = Some(ts);
            Ok(())
        }
    }

    fn meter(kind: &str, samples: &[(&str, Option<f64>)]) -> Value {
        let values: Vec<Value> = samples
            .iter()
            .map(|(date, value)| match value {
                Some(v) => json!({"date": date, "value": v}),
                None => json!({"date": date}),
            })
            .collect();
        json!({"type": kind, "values": values})
    }

    fn payload(meters: Vec<Value>) -> Value {
        json!({"energyDetails": {"meters": meters}})
    }

    /// Three quarter-hour samples; only Production carries values, at the
    /// first and third sample.
    fn sparse_production_payload() -> Value {
        payload(vec![
            meter(
                "Production",
                &[
                    ("2024-01-01 00:15:00", Some(1.0)),
                    ("2024-01-01 00:30:00", None),
                    ("2024-01-01 00:45:00", Some(2.0)),
                ],
            ),
            meter(
                "Consumption",
                &[
                    ("2024-01-01 00:15:00", None),
                    ("2024-01-01 00:30:00", None),
                    ("2024-01-01 00:45:00", None),
                ],
            ),
        ])
    }

    async fn scheduler_with(
        api: impl MonitoringApi,
        sink: VecSink,
        store: MemStore,
    ) -> PollScheduler<impl MonitoringApi, VecSink, MemStore> {
        PollScheduler::new(api, sink, store, "1337", "energy", Berlin, 300)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn cycle_publishes_records_and_advances_checkpoint() {
        let windows = Arc::new(Mutex::new(Vec::new()));
        let api = RecordingApi {
            payload: sparse_production_payload(),
            windows: windows.clone(),
        };
        let sink = VecSink::default();
        let store = MemStore::default();
        let mut scheduler = scheduler_with(api, sink.clone(), store.clone()).await;

        scheduler.cycle().await.unwrap();

        // Sample 2 is all-absent and dropped.
        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].production, Some(1.0));
        assert_eq!(records[1].production, Some(2.0));

        let expected = Berlin
            .with_ymd_and_hms(2024, 1, 1, 0, 45, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(scheduler.last_published(), Some(expected));
        assert_eq!(store.load().await.unwrap(), Some(expected));
    }

    #[tokio::test]
    async fn next_window_starts_one_minute_after_new_checkpoint() {
        let windows = Arc::new(Mutex::new(Vec::new()));
        let api = RecordingApi {
            payload: sparse_production_payload(),
            windows: windows.clone(),
        };
        let mut scheduler =
            scheduler_with(api, VecSink::default(), MemStore::default()).await;

        scheduler.cycle().await.unwrap();
        scheduler.cycle().await.unwrap();

        let windows = windows.lock().unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].start_param(), "2024-01-01 00:46:00");
    }

    #[tokio::test]
    async fn failed_fetch_leaves_checkpoint_unchanged() {
        let checkpoint = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let sink = VecSink::default();
        let store = MemStore::with(checkpoint);
        let mut scheduler = scheduler_with(FailingApi, sink.clone(), store.clone()).await;

        let res = scheduler.cycle().await;

        assert!(matches!(res, Err(CycleError::Fetch(FetchError::Status(500)))));
        assert_eq!(scheduler.last_published(), Some(checkpoint));
        assert_eq!(store.load().await.unwrap(), Some(checkpoint));
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn structural_error_aborts_cycle_without_publishing() {
        let windows = Arc::new(Mutex::new(Vec::new()));
        let api = RecordingApi {
            payload: payload(vec![
                meter("Purchased", &[("2024-01-01 00:15:00", Some(1.0))]),
                meter(
                    "Production",
                    &[("2024-01-01 00:15:00", Some(1.0)), ("2024-01-01 00:30:00", Some(2.0))],
                ),
            ]),
            windows,
        };
        let sink = VecSink::default();
        let store = MemStore::default();
        let mut scheduler = scheduler_with(api, sink.clone(), store.clone()).await;

        let res = scheduler.cycle().await;

        assert!(matches!(res, Err(CycleError::Reconcile(_))));
        assert!(sink.records.lock().unwrap().is_empty());
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_window_neither_advances_nor_regresses_checkpoint() {
        let windows = Arc::new(Mutex::new(Vec::new()));
        let api = RecordingApi {
            payload: payload(vec![]),
            windows,
        };
        let store = MemStore::default();
        let mut scheduler = scheduler_with(api, VecSink::default(), store.clone()).await;

        scheduler.cycle().await.unwrap();

        assert_eq!(scheduler.last_published(), None);
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn partial_publish_persists_confirmed_progress_only() {
        let windows = Arc::new(Mutex::new(Vec::new()));
        let api = RecordingApi {
            payload: sparse_production_payload(),
            windows,
        };
        let sink = VecSink::failing_after(1);
        let store = MemStore::default();
        let mut scheduler = scheduler_with(api, sink.clone(), store.clone()).await;

        let res = scheduler.cycle().await;

        assert!(matches!(res, Err(CycleError::Sink(_))));
        let first = Berlin
            .with_ymd_and_hms(2024, 1, 1, 0, 15, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(sink.records.lock().unwrap().len(), 1);
        assert_eq!(scheduler.last_published(), Some(first));
        assert_eq!(store.load().await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn delay_is_derived_from_the_daily_limit() {
        let windows = Arc::new(Mutex::new(Vec::new()));
        let api = RecordingApi {
            payload: payload(vec![]),
            windows,
        };
        let scheduler = scheduler_with(api, VecSink::default(), MemStore::default()).await;

        // 86400 / 300 requests per day.
        assert_eq!(scheduler.delay(), Duration::from_secs(288));
    }

    #[tokio::test]
    async fn first_window_without_checkpoint_uses_thirty_day_lookback() {
        let windows = Arc::new(Mutex::new(Vec::new()));
        let api = RecordingApi {
            payload: payload(vec![]),
            windows: windows.clone(),
        };
        let mut scheduler =
            scheduler_with(api, VecSink::default(), MemStore::default()).await;

        scheduler.cycle().await.unwrap();

        let windows = windows.lock().unwrap();
        let window = &windows[0];
        let span = window.end.clone().signed_duration_since(window.start.clone());
        assert_eq!(span, chrono::Duration::days(30));
    }
}
