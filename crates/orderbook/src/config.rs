use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Pause between subscription confirmation and the snapshot request, so
    /// the snapshot tends to land at or after the first streamed delta.
    pub snapshot_delay_ms: u64,
    /// First wait after a failed reconnect. Doubles per attempt.
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            snapshot_delay_ms: 300,
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
        }
    }
}

impl SyncOptions {
    pub fn snapshot_delay(&self) -> Duration {
        Duration::from_millis(self.snapshot_delay_ms)
    }

    /// Wait before reconnect attempt `attempt` (starting at 1).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let delay = self
            .reconnect_delay_ms
            .saturating_mul(factor)
            .min(self.max_reconnect_delay_ms.max(self.reconnect_delay_ms));
        Duration::from_millis(delay)
    }
}
