use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

// Detection windows.
pub const RAPID_FIRE_WINDOW_SECS: i64 = 60;
pub const RAPID_FIRE_THRESHOLD: usize = 20;
pub const ENDPOINT_WINDOW_SECS: i64 = 300;
pub const ENDPOINT_THRESHOLD: usize = 50;
pub const ACCESS_WINDOW_SECS: i64 = 300;
pub const SENSITIVE_WINDOW_SECS: i64 = 3600;
pub const SENSITIVE_THRESHOLD: usize = 10;
pub const VIOLATION_WINDOW_SECS: i64 = 3600;

// Escalation policy.
const CRITICAL_VIOLATIONS: usize = 3;
const CRITICAL_ATTEMPTS: usize = 100;
const HIGH_VIOLATIONS: usize = 2;
const HIGH_ATTEMPTS: usize = 50;
const MEDIUM_ATTEMPTS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ViolationKind {
    InvalidSignature,
    TimestampExpired,
    OversizedPayload,
    MalformedPayload,
    RapidFire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Sliding window of event timestamps.
#[derive(Debug, Default)]
struct Window {
    events: Vec<DateTime<Utc>>,
}

impl Window {
    fn record(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        self.events.retain(|at| now - *at < window);
        self.events.push(now);
        self.events.len()
    }

    fn count(&self, now: DateTime<Utc>, window: Duration) -> usize {
        self.events.iter().filter(|at| now - **at < window).count()
    }
}

/// Security event logger and anomaly detector.
///
/// All counters are rolling in-process windows; the only synchronous effect
/// on the intake path is the `blocked_until` fast-path lookup at entry.
/// Everything else escalates asynchronously through log severity and the
/// temporary block list.
pub struct SecurityMonitor {
    requests: Mutex<HashMap<IpAddr, Window>>,
    rapid: Mutex<HashMap<IpAddr, Window>>,
    endpoints: Mutex<HashMap<String, Window>>,
    sensitive: Mutex<HashMap<IpAddr, Window>>,
    violations: Mutex<HashMap<IpAddr, Window>>,
    blocked: Mutex<HashMap<IpAddr, DateTime<Utc>>>,
    block_secs: i64,
}

impl SecurityMonitor {
    pub fn new(block_secs: i64) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            rapid: Mutex::new(HashMap::new()),
            endpoints: Mutex::new(HashMap::new()),
            sensitive: Mutex::new(HashMap::new()),
            violations: Mutex::new(HashMap::new()),
            blocked: Mutex::new(HashMap::new()),
            block_secs: block_secs.max(1),
        }
    }

    /// Fast-path block lookup, performed before any other guard.
    pub fn blocked_until(&self, ip: IpAddr, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut blocked = self
            .blocked
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match blocked.get(&ip) {
            Some(until) if *until > now => Some(*until),
            Some(_) => {
                blocked.remove(&ip);
                None
            }
            None => None,
        }
    }

    /// Count an inbound request against the per-IP and per-endpoint windows.
    /// Returns the escalation severity when the rapid-fire threshold trips.
    pub fn record_request(
        &self,
        ip: IpAddr,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Option<Severity> {
        {
            let mut requests = self
                .requests
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            requests
                .entry(ip)
                .or_default()
                .record(now, Duration::seconds(ACCESS_WINDOW_SECS));
        }

        let endpoint_hits = {
            let mut endpoints = self
                .endpoints
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            endpoints
                .entry(endpoint.to_string())
                .or_default()
                .record(now, Duration::seconds(ENDPOINT_WINDOW_SECS))
        };
        if endpoint_hits >= ENDPOINT_THRESHOLD {
            tracing::warn!(
                endpoint,
                hits = endpoint_hits,
                window_secs = ENDPOINT_WINDOW_SECS,
                "endpoint traffic spike — possible distributed attack"
            );
        }

        let rapid_hits = {
            let mut rapid = self
                .rapid
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            rapid
                .entry(ip)
                .or_default()
                .record(now, Duration::seconds(RAPID_FIRE_WINDOW_SECS))
        };
        if rapid_hits >= RAPID_FIRE_THRESHOLD {
            return Some(self.record_violation(ip, ViolationKind::RapidFire, now));
        }
        None
    }

    /// Count access to an operator surface (dead-letter inspection).
    pub fn record_sensitive_access(&self, ip: IpAddr, now: DateTime<Utc>) {
        let hits = {
            let mut sensitive = self
                .sensitive
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            sensitive
                .entry(ip)
                .or_default()
                .record(now, Duration::seconds(SENSITIVE_WINDOW_SECS))
        };
        if hits >= SENSITIVE_THRESHOLD {
            tracing::warn!(
                source_ip = %ip,
                hits,
                window_secs = SENSITIVE_WINDOW_SECS,
                "unusual volume of sensitive-surface access"
            );
        }
    }

    /// Record a security violation and escalate per policy. Critical
    /// escalation applies a temporary IP block enforced on the next request.
    pub fn record_violation(
        &self,
        ip: IpAddr,
        kind: ViolationKind,
        now: DateTime<Utc>,
    ) -> Severity {
        let violation_count = {
            let mut violations = self
                .violations
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            violations
                .entry(ip)
                .or_default()
                .record(now, Duration::seconds(VIOLATION_WINDOW_SECS))
        };

        let attempts = {
            let requests = self
                .requests
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            requests
                .get(&ip)
                .map_or(0, |w| w.count(now, Duration::seconds(ACCESS_WINDOW_SECS)))
        };

        let severity = escalate(violation_count, attempts);
        match severity {
            Severity::Critical => {
                let until = now + Duration::seconds(self.block_secs);
                {
                    let mut blocked = self
                        .blocked
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    blocked.insert(ip, until);
                }
                tracing::error!(
                    source_ip = %ip,
                    violation = %kind,
                    violation_count,
                    attempts,
                    blocked_until = %until,
                    "critical security escalation — temporary IP block applied"
                );
            }
            Severity::High => {
                tracing::warn!(
                    source_ip = %ip,
                    violation = %kind,
                    violation_count,
                    attempts,
                    "high-severity security violation"
                );
            }
            Severity::Medium => {
                tracing::info!(
                    source_ip = %ip,
                    violation = %kind,
                    violation_count,
                    attempts,
                    "repeated security violation"
                );
            }
            Severity::Low => {
                tracing::debug!(
                    source_ip = %ip,
                    violation = %kind,
                    "security violation recorded"
                );
            }
        }
        severity
    }
}

fn escalate(violation_count: usize, attempts: usize) -> Severity {
    if violation_count >= CRITICAL_VIOLATIONS || attempts >= CRITICAL_ATTEMPTS {
        Severity::Critical
    } else if violation_count >= HIGH_VIOLATIONS || attempts >= HIGH_ATTEMPTS {
        Severity::High
    } else if attempts >= MEDIUM_ATTEMPTS {
        Severity::Medium
    } else {
        Severity::Low
    }
}

impl std::fmt::Debug for SecurityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityMonitor")
            .field("block_secs", &self.block_secs)
            .finish_non_exhaustive()
    }
}
