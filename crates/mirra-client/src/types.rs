use std::fmt;
use std::time::Duration;

use mirra_common::{Error, Result};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_CHANNEL_LABEL: &str = "makeup";

/// The two alternating slot labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum SlotLabel {
    #[default]
    A,
    B,
}

impl SlotLabel {
    pub fn other(self) -> Self {
        match self {
            SlotLabel::A => SlotLabel::B,
            SlotLabel::B => SlotLabel::A,
        }
    }
}

impl fmt::Display for SlotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotLabel::A => f.write_str("A"),
            SlotLabel::B => f.write_str("B"),
        }
    }
}

/// Prepare/swap deadlines, both measured from the start of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffTiming {
    pub prepare_after: Duration,
    pub swap_after: Duration,
}

impl Default for HandoffTiming {
    fn default() -> Self {
        Self {
            prepare_after: Duration::from_secs(10),
            swap_after: Duration::from_secs(15),
        }
    }
}

impl HandoffTiming {
    pub fn validate(&self) -> Result<()> {
        if self.prepare_after.is_zero() {
            return Err(Error::config("prepare deadline must be non-zero"));
        }
        if self.prepare_after >= self.swap_after {
            return Err(Error::config(format!(
                "prepare deadline ({:?}) must come before swap deadline ({:?})",
                self.prepare_after, self.swap_after
            )));
        }
        Ok(())
    }

    /// Time the prepared slot has to negotiate before it is swapped in.
    pub fn negotiation_budget(&self) -> Duration {
        self.swap_after.saturating_sub(self.prepare_after)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the processing endpoint (`/offer`, `/unique_shades`, ...).
    pub endpoint: String,
    pub ice_servers: Vec<String>,
    pub timing: HandoffTiming,
    /// Re-send offsets after a channel opens; the first push is immediate.
    pub resend_delays: Vec<Duration>,
    pub channel_label: String,
    /// Unset means a negotiation may run until its slot is retired.
    pub negotiation_timeout: Option<Duration>,
    pub http_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            timing: HandoffTiming::default(),
            resend_delays: vec![Duration::from_millis(500), Duration::from_millis(1000)],
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            negotiation_timeout: None,
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        self.timing.validate()?;
        if self.endpoint.trim().is_empty() {
            return Err(Error::config("endpoint URL is empty"));
        }
        if self.channel_label.is_empty() {
            return Err(Error::config("data channel label is empty"));
        }
        if self.resend_delays.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::config("resend delays must be ascending"));
        }
        Ok(())
    }

    /// Endpoint URL joined with `path`, tolerating a trailing slash.
    pub fn endpoint_url(&self, path: &str) -> String {
        join_url(&self.endpoint, path)
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
