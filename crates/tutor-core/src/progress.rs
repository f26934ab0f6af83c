use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::progression::{LevelCurve, LevelInfo};

// ---------------------------------------------------------------------------
// LearnerProgress
// ---------------------------------------------------------------------------

/// Authoritative XP total for one learner, as held by a [`ProgressStore`].
///
/// [`ProgressStore`]: crate::ProgressStore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProgress {
    pub user_id: String,
    #[serde(rename = "totalXP")]
    pub total_xp: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LearnerProgress {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            total_xp: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn level_info(&self, curve: &LevelCurve) -> LevelInfo {
        curve.level_info(self.total_xp)
    }
}

// ---------------------------------------------------------------------------
// XpEvent
// ---------------------------------------------------------------------------

/// One XP grant in a learner's ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpEvent {
    pub id: String,
    pub user_id: String,
    pub amount: u64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl XpEvent {
    pub fn new(user_id: impl Into<String>, amount: u64, reason: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            user_id: user_id.into(),
            amount,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }
}
