use serde::{Deserialize, Serialize};

/// Where a mark is delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutPolicy {
    /// Every mark goes to every distinct collector of the cycle.
    #[default]
    Always,
    /// Fan out only when the cycle's providers share storage; otherwise
    /// mark just the collector owning the key's provider. Sharing is
    /// computed from each cycle's own collector snapshot.
    WhenShared,
}

/// Garbage collection settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcConfig {
    #[serde(default)]
    pub fan_out: FanOutPolicy,
}
