use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::CallPayload;
use crate::tier::Tier;

/// Strict dispatch priority. `P0` (retry-after-failure) is always served
/// before `P1` (first pass), before `P2` (background batch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
}

impl Priority {
    /// Highest first.
    pub const ALL: [Priority; 3] = [Priority::P0, Priority::P1, Priority::P2];

    pub fn index(self) -> usize {
        match self {
            Priority::P0 => 0,
            Priority::P1 => 1,
            Priority::P2 => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::P0 => write!(f, "P0"),
            Priority::P1 => write!(f, "P1"),
            Priority::P2 => write!(f, "P2"),
        }
    }
}

/// One queued unit of reasoning-service work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchTicket {
    pub tier: Tier,
    pub payload: CallPayload,
    pub priority: Priority,
    pub submitted_at: DateTime<Utc>,
}

impl DispatchTicket {
    pub fn new(tier: Tier, payload: CallPayload, priority: Priority) -> Self {
        Self {
            tier,
            payload,
            priority,
            submitted_at: Utc::now(),
        }
    }
}
