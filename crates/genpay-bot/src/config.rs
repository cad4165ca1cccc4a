//! Generation Flow Configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happens to the local artifact copy once it was sent
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRetention {
    #[default]
    DeleteAfterSend,
    Keep,
}

impl ArtifactRetention {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "keep" => Self::Keep,
            _ => Self::DeleteAfterSend,
        }
    }
}

/// Status polling policy
///
/// Delays grow exponentially from `initial_delay` up to `max_delay`, each
/// one spread by `jitter` (a fraction of the delay). Polling stops after
/// `max_attempts` regardless of the job deadline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub jitter: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(20),
            max_attempts: 20,
            jitter: 0.2,
        }
    }
}

/// Generation flow configuration
#[derive(Clone, Debug)]
pub struct GenerateConfig {
    /// Chat command that starts a generation
    pub command: String,

    /// Price per generation in sats
    pub price_sat: u64,

    /// Memo prefix of generation invoices
    pub memo: String,

    /// Memo of refund invoices
    pub refund_memo: String,

    /// Webhook URL passed to invoice creation
    pub webhook_url: Option<String>,

    /// Wall-clock budget for submit, poll and download
    pub deadline: Duration,

    pub poll: PollPolicy,

    /// Directory for transient artifact copies
    pub artifact_dir: PathBuf,

    pub artifact_extension: String,

    pub retention: ArtifactRetention,

    /// How long a pending prompt request stays valid
    pub session_ttl: chrono::Duration,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            command: "/generate".into(),
            price_sat: 1000,
            memo: "Image generation".into(),
            refund_memo: "Refund for /generate".into(),
            webhook_url: None,
            deadline: Duration::from_secs(300),
            poll: PollPolicy::default(),
            artifact_dir: PathBuf::from("data/dalle"),
            artifact_extension: "png".into(),
            retention: ArtifactRetention::default(),
            session_ttl: chrono::Duration::minutes(5),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl GenerateConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let poll_defaults = PollPolicy::default();

        let poll = PollPolicy {
            initial_delay: env_parse("GENERATE_POLL_INITIAL_MS")
                .map_or(poll_defaults.initial_delay, Duration::from_millis),
            max_delay: env_parse("GENERATE_POLL_MAX_MS")
                .map_or(poll_defaults.max_delay, Duration::from_millis),
            max_attempts: env_parse("GENERATE_POLL_MAX_ATTEMPTS")
                .unwrap_or(poll_defaults.max_attempts),
            jitter: env_parse::<f64>("GENERATE_POLL_JITTER")
                .map_or(poll_defaults.jitter, |j| j.clamp(0.0, 1.0)),
        };

        Self {
            price_sat: env_parse("GENERATE_PRICE_SAT").unwrap_or(defaults.price_sat),
            webhook_url: std::env::var("LNBITS_WEBHOOK_URL").ok(),
            deadline: env_parse("GENERATE_DEADLINE_SECS")
                .map_or(defaults.deadline, Duration::from_secs),
            poll,
            artifact_dir: std::env::var("GENERATE_ARTIFACT_DIR")
                .map_or(defaults.artifact_dir, PathBuf::from),
            retention: std::env::var("GENERATE_RETENTION")
                .map_or(defaults.retention, |r| ArtifactRetention::from_str(&r)),
            session_ttl: env_parse("GENERATE_SESSION_TTL_SECS")
                .map_or(defaults.session_ttl, chrono::Duration::seconds),
            ..defaults
        }
    }
}
