//! Webhook intake pipeline.
//!
//! Pure guard sequencing over `(headers, body bytes, source ip)` — no
//! framework types. Guards run in a fixed order: block fast-path, payload
//! size, signature, timestamp, dedup. Any failure short-circuits to
//! `Rejected`; a duplicate acknowledges without enqueueing.

use super::events::{EnvelopeError, WebhookEnvelope};
use super::idempotency::IdempotencyStore;
use super::limits;
use super::signature::{self, SigningSecret};
use super::tolerance;
use crate::config::WebhookConfig;
use crate::queue::{JobStore, QueuePriority, QueuedJob};
use crate::security::{SecurityMonitor, ViolationKind};
use chrono::{DateTime, Duration, Utc};
use std::net::IpAddr;
use std::sync::Arc;

/// One inbound delivery, reduced to what the guards need.
#[derive(Debug)]
pub struct IntakeRequest<'a> {
    pub declared_len: Option<u64>,
    pub body: &'a [u8],
    pub signature: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub source_ip: IpAddr,
    pub user_agent: Option<&'a str>,
}

/// Tri-state intake result. Duplicates are a first-class outcome, not an
/// error path.
#[derive(Debug)]
pub enum IntakeOutcome {
    Accepted {
        /// `None` for the non-deduplicable (id-less) event class.
        webhook_id: Option<String>,
        queued_at: DateTime<Utc>,
    },
    Duplicate {
        webhook_id: String,
    },
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Blocked { retry_after_secs: i64 },
    PayloadTooLarge,
    MissingSignature,
    MissingTimestamp,
    MalformedTimestamp,
    InvalidSignature,
    TimestampExpired,
    MalformedPayload,
    UnsupportedEvent,
    QueueSaturated,
}

impl RejectReason {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Blocked { .. } => 429,
            Self::PayloadTooLarge => 413,
            Self::MissingSignature
            | Self::MissingTimestamp
            | Self::MalformedTimestamp
            | Self::TimestampExpired => 401,
            Self::InvalidSignature => 403,
            Self::MalformedPayload | Self::UnsupportedEvent => 400,
            Self::QueueSaturated => 503,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Blocked { .. } => "RATE_LIMIT_EXCEEDED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::MissingSignature => "TOKEN_MISSING",
            Self::MissingTimestamp => "TIMESTAMP_MISSING",
            Self::MalformedTimestamp => "TIMESTAMP_INVALID",
            Self::TimestampExpired => "TIMESTAMP_EXPIRED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::MalformedPayload => "MALFORMED_PAYLOAD",
            Self::UnsupportedEvent => "UNSUPPORTED_EVENT",
            Self::QueueSaturated => "QUEUE_SATURATED",
        }
    }
}

pub const WEBHOOK_ENDPOINT: &str = "POST /webhooks/chat";

pub struct IntakePipeline {
    secret: SigningSecret,
    webhook: WebhookConfig,
    max_attempts: u32,
    idempotency: Arc<IdempotencyStore>,
    store: Arc<JobStore>,
    monitor: Arc<SecurityMonitor>,
}

impl IntakePipeline {
    pub fn new(
        secret: SigningSecret,
        webhook: WebhookConfig,
        max_attempts: u32,
        idempotency: Arc<IdempotencyStore>,
        store: Arc<JobStore>,
        monitor: Arc<SecurityMonitor>,
    ) -> Self {
        Self {
            secret,
            webhook,
            max_attempts,
            idempotency,
            store,
            monitor,
        }
    }

    pub fn evaluate(&self, request: &IntakeRequest<'_>, now: DateTime<Utc>) -> IntakeOutcome {
        let ip = request.source_ip;

        // Fast-path block lookup before any other work.
        if let Some(until) = self.monitor.blocked_until(ip, now) {
            return IntakeOutcome::Rejected(RejectReason::Blocked {
                retry_after_secs: (until - now).num_seconds().max(1),
            });
        }
        self.monitor.record_request(ip, WEBHOOK_ENDPOINT, now);

        // Size gate runs before signature verification: no HMAC work is
        // spent on oversized bodies.
        if !limits::within_limit(
            request.declared_len,
            request.body.len(),
            self.webhook.max_body_bytes,
        ) {
            self.monitor
                .record_violation(ip, ViolationKind::OversizedPayload, now);
            return IntakeOutcome::Rejected(RejectReason::PayloadTooLarge);
        }

        let Some(signature_header) = request.signature else {
            self.monitor
                .record_violation(ip, ViolationKind::InvalidSignature, now);
            return IntakeOutcome::Rejected(RejectReason::MissingSignature);
        };
        let Some(timestamp_raw) = request.timestamp else {
            self.monitor
                .record_violation(ip, ViolationKind::TimestampExpired, now);
            return IntakeOutcome::Rejected(RejectReason::MissingTimestamp);
        };

        // The raw header string participates in the MAC, so verification
        // precedes numeric parsing.
        if !signature::verify(&self.secret, timestamp_raw, request.body, signature_header) {
            self.monitor
                .record_violation(ip, ViolationKind::InvalidSignature, now);
            return IntakeOutcome::Rejected(RejectReason::InvalidSignature);
        }

        let Ok(timestamp) = timestamp_raw.parse::<i64>() else {
            self.monitor
                .record_violation(ip, ViolationKind::TimestampExpired, now);
            return IntakeOutcome::Rejected(RejectReason::MalformedTimestamp);
        };
        if !tolerance::within_tolerance(timestamp, now.timestamp(), self.webhook.tolerance_secs) {
            tracing::warn!(
                source_ip = %ip,
                timestamp,
                tolerance_secs = self.webhook.tolerance_secs,
                "webhook timestamp outside tolerance window"
            );
            self.monitor
                .record_violation(ip, ViolationKind::TimestampExpired, now);
            return IntakeOutcome::Rejected(RejectReason::TimestampExpired);
        }

        let envelope = match WebhookEnvelope::parse(request.body) {
            Ok(envelope) => envelope,
            Err(EnvelopeError::Malformed(message)) => {
                tracing::warn!(source_ip = %ip, message, "malformed webhook payload");
                self.monitor
                    .record_violation(ip, ViolationKind::MalformedPayload, now);
                return IntakeOutcome::Rejected(RejectReason::MalformedPayload);
            }
            Err(EnvelopeError::UnsupportedEvent(event)) => {
                tracing::warn!(source_ip = %ip, event, "unsupported webhook event type");
                return IntakeOutcome::Rejected(RejectReason::UnsupportedEvent);
            }
        };

        // Dedup: atomic claim, released again if the enqueue is refused.
        if let Some(id) = &envelope.id {
            if !self.idempotency.claim(id, now) {
                tracing::info!(
                    webhook_id = id.as_str(),
                    source_ip = %ip,
                    "duplicate webhook delivery acknowledged"
                );
                return IntakeOutcome::Duplicate {
                    webhook_id: id.clone(),
                };
            }
        } else {
            tracing::warn!(
                source_ip = %ip,
                event = %envelope.event,
                "webhook carries no id — delivery cannot be deduplicated"
            );
        }

        let job = QueuedJob::new(
            envelope.id.clone(),
            envelope.event,
            envelope.payload,
            self.max_attempts,
            now,
        );
        let not_before = now + self.dispatch_delay(job.priority);

        if let Err(error) = self.store.enqueue(job, not_before) {
            if let Some(id) = &envelope.id {
                self.idempotency.release(id);
            }
            tracing::error!(source_ip = %ip, "webhook enqueue refused: {error}");
            return IntakeOutcome::Rejected(RejectReason::QueueSaturated);
        }

        tracing::info!(
            webhook_id = envelope.id.as_deref().unwrap_or("-"),
            event = %envelope.event,
            source_ip = %ip,
            user_agent = request.user_agent.unwrap_or("-"),
            queued_at = %not_before,
            deduplicated = envelope.id.is_some(),
            "webhook accepted and queued"
        );

        IntakeOutcome::Accepted {
            webhook_id: envelope.id,
            queued_at: not_before,
        }
    }

    fn dispatch_delay(&self, priority: QueuePriority) -> Duration {
        match priority {
            QueuePriority::High => Duration::seconds(self.webhook.high_priority_delay_secs.max(0)),
            QueuePriority::Normal => {
                Duration::seconds(self.webhook.normal_priority_delay_secs.max(0))
            }
        }
    }
}

impl std::fmt::Debug for IntakePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakePipeline")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
