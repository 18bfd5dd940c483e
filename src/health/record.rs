//! Health check log and uptime reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One probe outcome, appended for every probe regardless of state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckRecord {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub success: bool,
    pub response_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl HealthCheckRecord {
    pub fn success(provider_id: Uuid, response_time_ms: u64, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id,
            success: true,
            response_time_ms,
            timestamp: at,
            error: None,
        }
    }

    pub fn failure(
        provider_id: Uuid,
        response_time_ms: u64,
        error: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id,
            success: false,
            response_time_ms,
            timestamp: at,
            error: Some(error.into()),
        }
    }
}

/// Availability over a trailing window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UptimeReport {
    pub provider_id: Uuid,
    pub window_hours: i64,
    pub total_checks: usize,
    pub successful_checks: usize,
    /// 0.0 when the window holds no checks
    pub uptime_percent: f64,
    pub avg_response_time_ms: Option<f64>,
}

impl UptimeReport {
    /// Summarize the checks of one provider at or after `since`
    pub fn from_checks<'a, I>(provider_id: Uuid, window_hours: i64, since: DateTime<Utc>, checks: I) -> Self
    where
        I: IntoIterator<Item = &'a HealthCheckRecord>,
    {
        let mut total = 0usize;
        let mut ok = 0usize;
        let mut response_sum = 0u64;

        for check in checks
            .into_iter()
            .filter(|c| c.provider_id == provider_id && c.timestamp >= since)
        {
            total += 1;
            response_sum = response_sum.saturating_add(check.response_time_ms);
            if check.success {
                ok += 1;
            }
        }

        let uptime_percent = if total == 0 {
            0.0
        } else {
            ok as f64 / total as f64 * 100.0
        };

        Self {
            provider_id,
            window_hours,
            total_checks: total,
            successful_checks: ok,
            uptime_percent,
            avg_response_time_ms: (total > 0).then(|| response_sum as f64 / total as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_empty_window_reports_zero() {
        let id = Uuid::new_v4();
        let report = UptimeReport::from_checks(id, 24, Utc::now() - Duration::hours(24), &[]);
        assert_eq!(report.total_checks, 0);
        assert_eq!(report.uptime_percent, 0.0);
        assert!(report.avg_response_time_ms.is_none());
    }

    #[test]
    fn test_window_filters_old_and_foreign_checks() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let checks = vec![
            HealthCheckRecord::success(id, 100, now - Duration::hours(1)),
            HealthCheckRecord::failure(id, 300, "timeout", now - Duration::hours(2)),
            HealthCheckRecord::success(id, 50, now - Duration::hours(48)),
            HealthCheckRecord::success(Uuid::new_v4(), 10, now),
        ];
        let report = UptimeReport::from_checks(id, 24, now - Duration::hours(24), &checks);
        assert_eq!(report.total_checks, 2);
        assert_eq!(report.successful_checks, 1);
        assert!((report.uptime_percent - 50.0).abs() < 1e-9);
        assert_eq!(report.avg_response_time_ms, Some(200.0));
    }
}
