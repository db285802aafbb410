//! Supervising control loop
//!
//! One [`MonitorLoop`] owns the vital source and drives every tick:
//! acquire, analyse, gate, dispatch, persist. Everything readers need is kept
//! behind a shared [`MonitorHandle`] so the API can look at the loop without
//! ever blocking it.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::acquisition::VitalSource;
use crate::alerting::{AlertDispatcher, DispatchOutcome, DispatchRecord};
use crate::analysis::{CooldownGate, CooldownKey, ThresholdClassifier, TrendDetector, WindowStatistics};
use crate::config::MonitorConfig;
use crate::error::{AcquisitionError, ClassificationError};
use crate::storage::VitalStore;
use crate::vitals::{AnomalyEvent, Reading, Severity, Vital};

pub const SENSOR_FAILURE_MESSAGE: &str = "Sensor communication failure - multiple consecutive errors";
pub const TEST_ALERT_MESSAGE: &str = "Test alert - notification channels check";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Sampling,
    Analyzing,
    Dispatching,
    Sleeping,
    Stopped,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::Idle => "idle",
            MonitorState::Sampling => "sampling",
            MonitorState::Analyzing => "analyzing",
            MonitorState::Dispatching => "dispatching",
            MonitorState::Sleeping => "sleeping",
            MonitorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why a tick counted as failed
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),
}

/// What a single tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub reading: Option<Reading>,
    /// Events produced before the cooldown gate
    pub raw_events: usize,
    pub dispatched: Vec<(AnomalyEvent, DispatchOutcome)>,
    pub error: Option<TickError>,
    /// Failure counter after the tick
    pub consecutive_failures: u32,
    /// A system error alert was raised this tick
    pub escalated: bool,
}

impl TickReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

struct Shared {
    state: RwLock<MonitorState>,
    failures: AtomicU32,
    last_reading: RwLock<Option<Reading>>,
    trend: RwLock<TrendDetector>,
    cooldown: Mutex<CooldownGate>,
    dispatcher: AlertDispatcher,
    store: Arc<dyn VitalStore>,
}

impl Shared {
    fn set_state(&self, state: MonitorState) {
        *self.state.write() = state;
    }

    /// Dispatch and persist an event that does not go through the cooldown gate
    async fn raise(&self, event: AnomalyEvent) -> DispatchOutcome {
        let outcome = self.dispatcher.dispatch(&event).await;
        if let Err(e) = self.store.save_alert(&event) {
            tracing::warn!(error = %e, vital = %event.vital, "Failed to persist alert");
        }
        outcome
    }
}

/// Cloneable read-only view of a running monitor
#[derive(Clone)]
pub struct MonitorHandle {
    shared: Arc<Shared>,
}

impl MonitorHandle {
    pub fn state(&self) -> MonitorState {
        *self.shared.state.read()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.failures.load(Ordering::SeqCst)
    }

    pub fn latest_reading(&self) -> Option<Reading> {
        self.shared.last_reading.read().clone()
    }

    pub fn latest(&self, vital: Vital) -> Option<f64> {
        self.shared.trend.read().latest(vital)
    }

    pub fn window_statistics(&self) -> BTreeMap<Vital, WindowStatistics> {
        self.shared.trend.read().statistics()
    }

    pub fn cooldown_entries(&self) -> Vec<(CooldownKey, chrono::DateTime<Utc>)> {
        self.shared.cooldown.lock().entries()
    }

    pub fn dispatch_history(&self, count: usize) -> Vec<DispatchRecord> {
        self.shared.dispatcher.history(count)
    }

    pub fn store(&self) -> Arc<dyn VitalStore> {
        Arc::clone(&self.shared.store)
    }

    /// Send an info-level event through every routed channel
    pub async fn send_test_alert(&self) -> DispatchOutcome {
        let event = AnomalyEvent::new(Vital::SystemError, Severity::Info, TEST_ALERT_MESSAGE, Utc::now());
        tracing::info!("Sending test alert");
        self.shared.raise(event).await
    }
}

pub struct MonitorLoop {
    source: Box<dyn VitalSource>,
    classifier: ThresholdClassifier,
    interval: Duration,
    max_failures: u32,
    shared: Arc<Shared>,
}

impl MonitorLoop {
    pub fn new(
        source: Box<dyn VitalSource>,
        classifier: ThresholdClassifier,
        dispatcher: AlertDispatcher,
        store: Arc<dyn VitalStore>,
        config: &MonitorConfig,
    ) -> Self {
        MonitorLoop {
            source,
            classifier,
            interval: config.interval(),
            max_failures: config.max_consecutive_failures.max(1),
            shared: Arc::new(Shared {
                state: RwLock::new(MonitorState::Idle),
                failures: AtomicU32::new(0),
                last_reading: RwLock::new(None),
                trend: RwLock::new(TrendDetector::new()),
                cooldown: Mutex::new(CooldownGate::new(config.cooldown())),
                dispatcher,
                store,
            }),
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn send_test_alert(&self) -> impl std::future::Future<Output = DispatchOutcome> + Send {
        let handle = self.handle();
        async move { handle.send_test_alert().await }
    }

    /// Run ticks until `shutdown` turns true (or its sender goes away), then
    /// release the source, close the channels and flush storage.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            mode = %self.source.mode(),
            interval_ms = self.interval.as_millis() as u64,
            "Monitor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick().await;

            self.shared.set_state(MonitorState::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.stop().await;
    }

    async fn stop(&mut self) {
        tracing::info!("Monitor stopping");
        self.source.release().await;
        self.shared.dispatcher.close().await;
        if let Err(e) = self.shared.store.close() {
            tracing::error!(error = %e, "Failed to flush storage");
        }
        self.shared.set_state(MonitorState::Stopped);
        tracing::info!("Monitor stopped");
    }

    /// One acquire, analyse, dispatch, persist cycle
    pub async fn tick(&mut self) -> TickReport {
        self.shared.set_state(MonitorState::Sampling);
        let reading = match self.source.read().await {
            Ok(reading) => reading,
            Err(e) => return self.fail(e.into(), None).await,
        };
        if reading.is_empty() {
            return self.fail(AcquisitionError::EmptyReading.into(), None).await;
        }
        *self.shared.last_reading.write() = Some(reading.clone());

        self.shared.set_state(MonitorState::Analyzing);
        let mut events = match self.classifier.classify(&reading) {
            Ok(events) => events,
            Err(e) => return self.fail(e.into(), Some(reading)).await,
        };

        {
            let mut trend = self.shared.trend.write();
            if let Some(bpm) = reading.heart_rate {
                trend.ingest(Vital::HeartRate, bpm as f64);
            }
            if let Some(percent) = reading.spo2 {
                trend.ingest(Vital::Spo2, percent as f64);
            }
            if let Some(celsius) = reading.temperature_celsius() {
                trend.ingest(Vital::Temperature, celsius);
            }
            events.extend(trend.detect_at(reading.timestamp));
        }

        let raw_events = events.len();
        let surviving = self.shared.cooldown.lock().filter_at(events, reading.timestamp);
        tracing::debug!(raw_events, surviving = surviving.len(), "Reading analysed");

        self.shared.set_state(MonitorState::Dispatching);
        let mut dispatched = Vec::with_capacity(surviving.len());
        for event in surviving {
            let outcome = self.shared.raise(event.clone()).await;
            dispatched.push((event, outcome));
        }

        if let Err(e) = self.shared.store.save_reading(&reading) {
            tracing::warn!(error = %e, "Failed to persist reading");
        }
        self.shared.failures.store(0, Ordering::SeqCst);

        TickReport {
            reading: Some(reading),
            raw_events,
            dispatched,
            error: None,
            consecutive_failures: 0,
            escalated: false,
        }
    }

    async fn fail(&mut self, error: TickError, reading: Option<Reading>) -> TickReport {
        let failures = self.shared.failures.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(error = %error, failures, max = self.max_failures, "Tick failed");

        let mut report = TickReport {
            reading,
            error: Some(error),
            consecutive_failures: failures,
            ..TickReport::default()
        };

        if failures >= self.max_failures {
            tracing::error!(failures, "Escalating repeated sensor failures");
            let event = AnomalyEvent::new(
                Vital::SystemError,
                Severity::Critical,
                SENSOR_FAILURE_MESSAGE,
                Utc::now(),
            );
            let outcome = self.shared.raise(event.clone()).await;
            report.dispatched.push((event, outcome));
            report.escalated = true;
            report.consecutive_failures = 0;
            self.shared.failures.store(0, Ordering::SeqCst);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{AcquisitionMode, SimulatedSource};
    use crate::alerting::{ChannelKind, IndicatorColor, LocalChannel, NotificationChannel, SimulatedIndicator};
    use crate::analysis::Thresholds;
    use crate::config::LocalConfig;
    use crate::error::DispatchError;
    use crate::storage::{StorageEngine, TimeRange};
    use crate::vitals::TemperatureUnit;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Result<Reading, AcquisitionError>>);

    #[async_trait]
    impl VitalSource for Scripted {
        async fn read(&mut self) -> Result<Reading, AcquisitionError> {
            self.0.pop_front().unwrap_or(Err(AcquisitionError::Exhausted))
        }

        fn mode(&self) -> AcquisitionMode {
            AcquisitionMode::Replay
        }
    }

    struct Sink(ChannelKind, Arc<parking_lot::Mutex<Vec<AnomalyEvent>>>);

    #[async_trait]
    impl NotificationChannel for Sink {
        fn kind(&self) -> ChannelKind {
            self.0
        }

        async fn send(&self, event: &AnomalyEvent) -> Result<(), DispatchError> {
            self.1.lock().push(event.clone());
            Ok(())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn monitor(
        script: Vec<Result<Reading, AcquisitionError>>,
    ) -> (MonitorLoop, Arc<StorageEngine>, Arc<parking_lot::Mutex<Vec<AnomalyEvent>>>) {
        let delivered = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut dispatcher = AlertDispatcher::new();
        dispatcher.register(Box::new(Sink(ChannelKind::Local, delivered.clone())));

        let store = Arc::new(StorageEngine::in_memory());
        let monitor = MonitorLoop::new(
            Box::new(Scripted(script.into())),
            ThresholdClassifier::new(Thresholds::default()),
            dispatcher,
            store.clone(),
            &MonitorConfig::default(),
        );
        (monitor, store, delivered)
    }

    #[tokio::test]
    async fn test_bradycardia_tick() {
        let reading = Reading::new(at(0)).with_heart_rate(45).with_spo2(97);
        let (mut monitor, store, delivered) = monitor(vec![Ok(reading)]);

        let report = monitor.tick().await;
        assert!(report.is_success());
        assert_eq!(report.dispatched.len(), 1);
        let (event, outcome) = &report.dispatched[0];
        assert_eq!(event.severity, Severity::Warning);
        assert!(event.message.contains("Bradycardia detected: 45 bpm"));
        assert_eq!(outcome.attempted(), vec![ChannelKind::Email, ChannelKind::Local]);
        assert_eq!(outcome.delivered(ChannelKind::Local), Some(true));

        assert_eq!(delivered.lock().len(), 1);
        assert_eq!(store.query_readings(&TimeRange::all(), None).unwrap().len(), 1);
        assert_eq!(store.query_alerts(&TimeRange::all(), None, None).unwrap().len(), 1);
        assert_eq!(monitor.handle().latest(Vital::HeartRate), Some(45.0));
    }

    #[tokio::test]
    async fn test_cooldown_applies_across_ticks() {
        let script = vec![
            Ok(Reading::new(at(0)).with_heart_rate(45)),
            Ok(Reading::new(at(10)).with_heart_rate(46)),
            Ok(Reading::new(at(400)).with_heart_rate(47)),
        ];
        let (mut monitor, _store, delivered) = monitor(script);

        assert_eq!(monitor.tick().await.dispatched.len(), 1);
        let second = monitor.tick().await;
        assert_eq!(second.raw_events, 1);
        assert!(second.dispatched.is_empty());
        assert_eq!(monitor.tick().await.dispatched.len(), 1);
        assert_eq!(delivered.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_five_failures_escalate_once() {
        let script = (0..6).map(|_| Err(AcquisitionError::EmptyReading)).collect();
        let (mut monitor, store, delivered) = monitor(script);

        for expected in 1..=4 {
            let report = monitor.tick().await;
            assert!(!report.escalated);
            assert_eq!(report.consecutive_failures, expected);
        }

        let fifth = monitor.tick().await;
        assert!(fifth.escalated);
        assert_eq!(fifth.consecutive_failures, 0);
        assert_eq!(fifth.dispatched.len(), 1);
        assert_eq!(fifth.dispatched[0].0.vital, Vital::SystemError);
        assert_eq!(fifth.dispatched[0].0.message, SENSOR_FAILURE_MESSAGE);

        let sixth = monitor.tick().await;
        assert!(!sixth.escalated);
        assert_eq!(sixth.consecutive_failures, 1);

        let system_errors: Vec<_> = delivered
            .lock()
            .iter()
            .filter(|e| e.vital == Vital::SystemError)
            .cloned()
            .collect();
        assert_eq!(system_errors.len(), 1);
        assert_eq!(system_errors[0].severity, Severity::Critical);

        let stored = store.query_alerts(&TimeRange::all(), Some(Severity::Critical), None).unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_counter() {
        let script = vec![
            Err(AcquisitionError::Unavailable("probe unplugged".to_string())),
            Err(AcquisitionError::EmptyReading),
            Ok(Reading::new(at(0)).with_heart_rate(72)),
        ];
        let (mut monitor, _store, _delivered) = monitor(script);
        monitor.tick().await;
        monitor.tick().await;
        assert_eq!(monitor.handle().consecutive_failures(), 2);

        let report = monitor.tick().await;
        assert!(report.is_success());
        assert!(report.dispatched.is_empty());
        assert_eq!(monitor.handle().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_empty_readings_count_as_failures() {
        let script = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    Err(AcquisitionError::Unavailable("sensor offline".to_string()))
                } else {
                    Ok(Reading::new(at(i)))
                }
            })
            .collect();
        let (mut monitor, store, _delivered) = monitor(script);

        let mut escalations = 0;
        for _ in 0..10 {
            let report = monitor.tick().await;
            assert!(!report.is_success());
            assert_eq!(report.raw_events, 0);
            if report.escalated {
                escalations += 1;
            }
        }

        assert_eq!(escalations, 2);
        assert!(store.query_readings(&TimeRange::all(), None).unwrap().is_empty());
        assert!(monitor.handle().latest_reading().is_none());
    }

    fn fahrenheit_series(before: f64, after: f64) -> Vec<Result<Reading, AcquisitionError>> {
        (0..10)
            .map(|i| {
                let value = if i < 5 { before } else { after };
                Ok(Reading::new(at(i * 10)).with_temperature(value, TemperatureUnit::F))
            })
            .collect()
    }

    fn trend_events(report: &TickReport) -> Vec<&AnomalyEvent> {
        report
            .dispatched
            .iter()
            .map(|(event, _)| event)
            .filter(|event| event.vital == Vital::TemperatureTrend)
            .collect()
    }

    #[tokio::test]
    async fn test_fahrenheit_temperature_trend() {
        let (mut monitor, _store, _delivered) = monitor(fahrenheit_series(98.0, 99.5));

        for _ in 0..9 {
            let report = monitor.tick().await;
            assert!(report.is_success());
            assert!(report.dispatched.is_empty());
        }

        let tenth = monitor.tick().await;
        assert_eq!(tenth.dispatched.len(), 1);
        let events = trend_events(&tenth);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Info);
        let rise = events[0].observed_value.unwrap();
        assert!((rise - 1.5 * 5.0 / 9.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_temperature_trend_margin_is_celsius() {
        // 1.0°F is about 0.56°C and clears the margin
        let (mut monitor, _store, _delivered) = monitor(fahrenheit_series(98.0, 99.0));
        let mut fired = Vec::new();
        for _ in 0..10 {
            let report = monitor.tick().await;
            fired.extend(trend_events(&report).into_iter().cloned());
        }
        assert_eq!(fired.len(), 1);

        // 0.8°F is about 0.44°C and stays quiet
        let (mut monitor, _store, _delivered) = self::monitor(fahrenheit_series(98.0, 98.8));
        for _ in 0..10 {
            let report = monitor.tick().await;
            assert!(report.is_success());
            assert!(trend_events(&report).is_empty());
        }
    }

    #[tokio::test]
    async fn test_non_finite_temperature_fails_tick() {
        let reading = Reading::new(at(0)).with_temperature(f64::NAN, TemperatureUnit::C);
        let (mut monitor, store, _delivered) = monitor(vec![Ok(reading)]);

        let report = monitor.tick().await;
        assert!(matches!(report.error, Some(TickError::Classification(_))));
        assert_eq!(report.consecutive_failures, 1);
        assert!(monitor.handle().window_statistics().is_empty());
        assert!(store.query_readings(&TimeRange::all(), None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_test_alert_bypasses_cooldown() {
        let (monitor, store, delivered) = monitor(Vec::new());
        monitor.send_test_alert().await;
        monitor.send_test_alert().await;

        assert_eq!(delivered.lock().len(), 2);
        assert_eq!(store.query_alerts(&TimeRange::all(), Some(Severity::Info), None).unwrap().len(), 2);
        assert_eq!(monitor.handle().dispatch_history(10).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let indicator = Arc::new(SimulatedIndicator::default());
        let mut dispatcher = AlertDispatcher::new();
        dispatcher.register(Box::new(LocalChannel::new(&LocalConfig::default(), indicator.clone())));
        let store = Arc::new(StorageEngine::in_memory());

        let monitor = MonitorLoop::new(
            Box::new(SimulatedSource::new()),
            ThresholdClassifier::new(Thresholds::default()),
            dispatcher,
            store.clone(),
            &MonitorConfig::default(),
        );
        let handle = monitor.handle();
        handle.send_test_alert().await;
        assert_eq!(indicator.color(), IndicatorColor::Blue);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(monitor.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(handle.state(), MonitorState::Stopped);
        assert_eq!(indicator.color(), IndicatorColor::Off);
        assert!(store.query_readings(&TimeRange::all(), None).unwrap().len() >= 3);
        assert!(handle.latest_reading().is_some());
    }
}
