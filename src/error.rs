use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `crmbridge`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum BridgeError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Queue / Executor ────────────────────────────────────────────────
    #[error("queue: {0}")]
    Queue(#[from] QueueError),

    // ── CRM / chat collaborators ────────────────────────────────────────
    #[error("collaborator: {0}")]
    Collaborator(#[from] CollaboratorError),

    // ── Gateway / intake ────────────────────────────────────────────────
    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Queue / executor errors ────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue {queue} saturated ({pending} pending jobs)")]
    Saturated { queue: &'static str, pending: usize },

    #[error("dead-letter store: {0}")]
    DeadLetter(String),
}

// ─── Collaborator errors ────────────────────────────────────────────────────

/// Failure of a CRM or chat-platform call, pre-classified for the executor.
///
/// `Transient` consumes a retry attempt; `Permanent` dead-letters the job
/// immediately. Timeouts are folded into `Transient` by the worker.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{} transient failure{}: {}", .service, fmt_status(.status), .message)]
    Transient {
        service: &'static str,
        status: Option<u16>,
        message: String,
    },

    #[error("{} permanent failure{}: {}", .service, fmt_status(.status), .message)]
    Permanent {
        service: &'static str,
        status: Option<u16>,
        message: String,
    },
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
        }
    }

    /// Short class label used in dead-letter records and logs.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::Permanent { .. } => "permanent",
        }
    }
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map_or_else(String::new, |code| format!(" (HTTP {code})"))
}

// ─── Gateway errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("bind failed: {0}")]
    Bind(String),

    #[error("webhook secret is not configured")]
    MissingSecret,
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;
