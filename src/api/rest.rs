use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::reply::Json;
use warp::Filter;

use crate::monitor::MonitorHandle;
use crate::storage::{TimeRange, VitalStore};
use crate::vitals::{Severity, Vital};

const DEFAULT_HOURS: i64 = 24;
const HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    fn success(message: &str, data: impl Serialize) -> Json {
        match serde_json::to_value(data) {
            Ok(data) => warp::reply::json(&ApiResponse {
                status: "success".to_string(),
                message: message.to_string(),
                data: Some(data),
            }),
            Err(e) => Self::error(&format!("Failed to encode response: {}", e)),
        }
    }

    fn error(message: &str) -> Json {
        warp::reply::json(&ApiResponse {
            status: "error".to_string(),
            message: message.to_string(),
            data: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct HoursQuery {
    hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    hours: Option<i64>,
    severity: Option<String>,
}

#[derive(Serialize)]
struct CooldownEntry {
    vital: Vital,
    severity: Severity,
    last_emitted: DateTime<Utc>,
}

fn range_for(hours: Option<i64>) -> Result<TimeRange, String> {
    match hours.unwrap_or(DEFAULT_HOURS) {
        h if h > 0 => TimeRange::last_hours(h).map_err(|e| e.to_string()),
        h => Err(format!("hours must be positive, got {}", h)),
    }
}

pub struct RestApi {
    monitor: MonitorHandle,
    store: Arc<dyn VitalStore>,
}

impl RestApi {
    pub fn new(monitor: MonitorHandle, store: Arc<dyn VitalStore>) -> Self {
        RestApi { monitor, store }
    }

    pub fn routes(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        self.get_status()
            .or(self.get_current())
            .or(self.get_history())
            .or(self.get_alerts())
            .or(self.get_statistics())
    }

    fn get_status(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let monitor = self.monitor.clone();
        let store = Arc::clone(&self.store);

        warp::path!("api" / "status")
            .and(warp::get())
            .and_then(move || {
                let monitor = monitor.clone();
                let store = Arc::clone(&store);
                async move {
                    let recent_alerts = TimeRange::last_hours(DEFAULT_HOURS)
                        .and_then(|range| store.query_alerts(&range, None, None))
                        .map(|alerts| alerts.len())
                        .unwrap_or_else(|e| {
                            tracing::warn!(error = %e, "Status alert count failed");
                            0
                        });
                    let cooldowns: Vec<CooldownEntry> = monitor
                        .cooldown_entries()
                        .into_iter()
                        .map(|((vital, severity), last_emitted)| CooldownEntry {
                            vital,
                            severity,
                            last_emitted,
                        })
                        .collect();

                    let data = serde_json::json!({
                        "state": monitor.state(),
                        "consecutive_failures": monitor.consecutive_failures(),
                        "last_reading_at": monitor.latest_reading().map(|r| r.timestamp),
                        "alerts_last_24h": recent_alerts,
                        "cooldowns": cooldowns,
                    });
                    Ok::<Json, Infallible>(ApiResponse::success("Monitor status", data))
                }
            })
    }

    fn get_current(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let monitor = self.monitor.clone();

        warp::path!("api" / "current")
            .and(warp::get())
            .and_then(move || {
                let monitor = monitor.clone();
                async move {
                    match monitor.latest_reading() {
                        Some(reading) => {
                            let data = serde_json::json!({
                                "reading": reading,
                                "windows": monitor.window_statistics(),
                            });
                            Ok::<Json, Infallible>(ApiResponse::success("Latest reading", data))
                        }
                        None => Ok::<Json, Infallible>(ApiResponse::error("No reading yet")),
                    }
                }
            })
    }

    fn get_history(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let store = Arc::clone(&self.store);

        warp::path!("api" / "history")
            .and(warp::get())
            .and(warp::query::<HoursQuery>())
            .and_then(move |query: HoursQuery| {
                let store = Arc::clone(&store);
                async move {
                    let reply = match range_for(query.hours) {
                        Ok(range) => match store.query_readings(&range, Some(HISTORY_LIMIT)) {
                            Ok(readings) => ApiResponse::success("Reading history", readings),
                            Err(e) => ApiResponse::error(&e.to_string()),
                        },
                        Err(message) => ApiResponse::error(&message),
                    };
                    Ok::<Json, Infallible>(reply)
                }
            })
    }

    fn get_alerts(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let store = Arc::clone(&self.store);

        warp::path!("api" / "alerts")
            .and(warp::get())
            .and(warp::query::<AlertsQuery>())
            .and_then(move |query: AlertsQuery| {
                let store = Arc::clone(&store);
                async move {
                    let severity = match query.severity.as_deref().map(str::parse::<Severity>) {
                        None => None,
                        Some(Ok(severity)) => Some(severity),
                        Some(Err(message)) => {
                            return Ok::<Json, Infallible>(ApiResponse::error(&message));
                        }
                    };
                    let reply = match range_for(query.hours) {
                        Ok(range) => match store.query_alerts(&range, severity, Some(HISTORY_LIMIT)) {
                            Ok(alerts) => ApiResponse::success("Alerts", alerts),
                            Err(e) => ApiResponse::error(&e.to_string()),
                        },
                        Err(message) => ApiResponse::error(&message),
                    };
                    Ok::<Json, Infallible>(reply)
                }
            })
    }

    fn get_statistics(&self) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let store = Arc::clone(&self.store);

        warp::path!("api" / "statistics")
            .and(warp::get())
            .and(warp::query::<HoursQuery>())
            .and_then(move |query: HoursQuery| {
                let store = Arc::clone(&store);
                async move {
                    let reply = match range_for(query.hours) {
                        Ok(range) => match store.statistics(&range) {
                            Ok(stats) => ApiResponse::success("Statistics", stats),
                            Err(e) => ApiResponse::error(&e.to_string()),
                        },
                        Err(message) => ApiResponse::error(&message),
                    };
                    Ok::<Json, Infallible>(reply)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::SimulatedSource;
    use crate::alerting::AlertDispatcher;
    use crate::analysis::{ThresholdClassifier, Thresholds};
    use crate::config::MonitorConfig;
    use crate::monitor::MonitorLoop;
    use crate::storage::StorageEngine;
    use crate::vitals::{AnomalyEvent, Reading};

    fn api() -> (RestApi, MonitorLoop, Arc<StorageEngine>) {
        let store = Arc::new(StorageEngine::in_memory());
        let monitor = MonitorLoop::new(
            Box::new(SimulatedSource::new()),
            ThresholdClassifier::new(Thresholds::default()),
            AlertDispatcher::new(),
            store.clone(),
            &MonitorConfig::default(),
        );
        (RestApi::new(monitor.handle(), store.clone()), monitor, store)
    }

    async fn get(api: &RestApi, path: &str) -> ApiResponse {
        let response = warp::test::request().method("GET").path(path).reply(&api.routes()).await;
        assert_eq!(response.status(), 200);
        serde_json::from_slice(response.body()).unwrap()
    }

    #[tokio::test]
    async fn test_status_and_current() {
        let (api, mut monitor, _store) = api();

        let current = get(&api, "/api/current").await;
        assert_eq!(current.status, "error");

        monitor.tick().await;
        let status = get(&api, "/api/status").await;
        assert_eq!(status.status, "success");
        let data = status.data.unwrap();
        assert_eq!(data["consecutive_failures"], 0);
        assert!(data["last_reading_at"].is_string());

        let current = get(&api, "/api/current").await;
        assert_eq!(current.status, "success");
        assert!(current.data.unwrap()["windows"]["heart_rate"]["count"] == 1);
    }

    #[tokio::test]
    async fn test_alerts_filtered_by_severity() {
        let (api, _monitor, store) = api();
        for severity in [Severity::Warning, Severity::Critical, Severity::Critical] {
            store
                .save_alert(&AnomalyEvent::new(Vital::Spo2, severity, "Low blood oxygen", Utc::now()))
                .unwrap();
        }

        let critical = get(&api, "/api/alerts?hours=1&severity=critical").await;
        assert_eq!(critical.data.unwrap().as_array().unwrap().len(), 2);

        let bad = get(&api, "/api/alerts?severity=urgent").await;
        assert_eq!(bad.status, "error");
    }

    #[tokio::test]
    async fn test_history_and_statistics() {
        let (api, _monitor, store) = api();
        store.save_reading(&Reading::new(Utc::now()).with_heart_rate(70)).unwrap();
        store.save_reading(&Reading::new(Utc::now()).with_heart_rate(90)).unwrap();

        let history = get(&api, "/api/history?hours=2").await;
        assert_eq!(history.data.unwrap().as_array().unwrap().len(), 2);

        let stats = get(&api, "/api/statistics").await;
        let data = stats.data.unwrap();
        assert_eq!(data["count"], 2);
        assert_eq!(data["heart_rate"]["average"], 80.0);

        let invalid = get(&api, "/api/history?hours=0").await;
        assert_eq!(invalid.status, "error");
    }

    #[tokio::test]
    async fn test_out_of_range_hours_is_rejected() {
        let (api, _monitor, _store) = api();

        for path in [
            "/api/history?hours=10000000000",
            "/api/alerts?hours=10000000000",
            "/api/statistics?hours=9223372036854775807",
        ] {
            let response = get(&api, path).await;
            assert_eq!(response.status, "error", "{}", path);
            assert!(response.data.is_none());
        }
    }
}
