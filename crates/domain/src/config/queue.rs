use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event queue / listen loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Bounded channel capacity between producer and consumer.
    #[serde(default = "d_capacity")]
    pub capacity: usize,
    /// Listen-loop pull timeout. Cancellation latency is bounded by this:
    /// the stop flag is only checked when a pull times out.
    #[serde(default = "d_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Cadence of keep-alive pings emitted while the producer is silent.
    #[serde(default = "d_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// Hard ceiling on one generation's wall-clock time; exceeding it
    /// synthesizes a stop event.
    #[serde(default = "d_hard_limit_secs")]
    pub hard_limit_secs: u64,
    /// How long a stop flag stays valid after being set.
    #[serde(default = "d_stop_flag_ttl_secs")]
    pub stop_flag_ttl_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: d_capacity(),
            poll_timeout_ms: d_poll_timeout_ms(),
            ping_interval_secs: d_ping_interval_secs(),
            hard_limit_secs: d_hard_limit_secs(),
            stop_flag_ttl_secs: d_stop_flag_ttl_secs(),
        }
    }
}

fn d_capacity() -> usize {
    256
}

fn d_poll_timeout_ms() -> u64 {
    500
}

fn d_ping_interval_secs() -> u64 {
    10
}

fn d_hard_limit_secs() -> u64 {
    1200
}

fn d_stop_flag_ttl_secs() -> u64 {
    600
}
