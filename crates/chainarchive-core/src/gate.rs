//! Block gates: admission filters applied before preprocessing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::types::Block;

/// Admits or rejects a block.
pub trait Gate: Send + Sync {
    fn pass(&self, block: &Block) -> bool;
}

/// Source of "now" for time-based gates.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Passes blocks younger than `threshold` according to the clock.
///
/// Blocks stamped in the future always pass.
pub struct TimeThresholdGate {
    threshold: Duration,
    clock: Arc<dyn Clock>,
}

impl TimeThresholdGate {
    pub fn new(threshold: Duration) -> Self {
        Self::with_clock(threshold, Arc::new(SystemClock))
    }

    pub fn with_clock(threshold: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { threshold, clock }
    }
}

impl Gate for TimeThresholdGate {
    fn pass(&self, block: &Block) -> bool {
        let age = self.clock.now().signed_duration_since(block.timestamp);
        match age.to_std() {
            Ok(age) => age < self.threshold,
            // negative age: block is ahead of our clock
            Err(_) => true,
        }
    }
}

/// Serializable gate selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum GateConfig {
    #[default]
    None,
    RecencyThreshold { threshold_secs: u64 },
}

impl GateConfig {
    /// Build the configured gate against the wall clock.
    pub fn build(&self) -> Option<Arc<dyn Gate>> {
        match self {
            Self::None => None,
            Self::RecencyThreshold { threshold_secs } => Some(Arc::new(TimeThresholdGate::new(
                Duration::from_secs(*threshold_secs),
            ))),
        }
    }
}
