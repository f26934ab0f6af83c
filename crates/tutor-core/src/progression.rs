//! XP and level arithmetic over a single leveling curve.
//!
//! The curve is arithmetic: advancing from level `L` to `L + 1` costs
//! `base_xp + step_xp * (L - 1)`. Every direction (level -> XP, XP -> level,
//! progress within a level) is derived from [`LevelCurve::total_xp_for_level`]
//! so the conversions stay exact inverses of each other.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TutorError, TutorResult};

// ---------------------------------------------------------------------------
// LevelCurve
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelCurve {
    base_xp: u64,
    step_xp: u64,
}

impl Default for LevelCurve {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl LevelCurve {
    /// 100 XP for the first level-up, 50 more for each one after.
    pub const DEFAULT: Self = Self {
        base_xp: 100,
        step_xp: 50,
    };

    /// A curve must be steep enough that no `u64` XP total reaches the
    /// highest `u32` level, so every total maps to a level it has not
    /// outgrown.
    pub fn new(base_xp: u64, step_xp: u64) -> TutorResult<Self> {
        if base_xp == 0 {
            return Err(TutorError::InvalidCurve(
                "base_xp must be at least 1".into(),
            ));
        }
        let curve = Self { base_xp, step_xp };
        if curve.exact_total_for_level(u32::MAX) <= u128::from(u64::MAX) {
            return Err(TutorError::InvalidCurve(format!(
                "base_xp {base_xp} with step_xp {step_xp} tops out at level {} \
                 (raise step_xp to 3 or more)",
                u32::MAX
            )));
        }
        Ok(curve)
    }

    pub fn base_xp(&self) -> u64 {
        self.base_xp
    }

    pub fn step_xp(&self) -> u64 {
        self.step_xp
    }

    /// XP needed to go from `level` to `level + 1`. Levels below 1 clamp to 1.
    pub fn xp_for_level(&self, level: u32) -> u64 {
        let n = u64::from(level.max(1) - 1);
        self.base_xp.saturating_add(self.step_xp.saturating_mul(n))
    }

    /// Cumulative XP needed to reach `target_level` from level 1, saturated
    /// at `u64::MAX`.
    pub fn total_xp_for_level(&self, target_level: u32) -> u64 {
        u64::try_from(self.exact_total_for_level(target_level)).unwrap_or(u64::MAX)
    }

    /// Unsaturated cumulative total. Fits in `u128` for every `u32` level.
    fn exact_total_for_level(&self, target_level: u32) -> u128 {
        let n = u128::from(target_level.max(1) - 1);
        let steps = n * n.saturating_sub(1) / 2;
        n.saturating_mul(u128::from(self.base_xp))
            .saturating_add(steps.saturating_mul(u128::from(self.step_xp)))
    }

    /// Largest level whose cumulative requirement is covered by `total_xp`.
    pub fn level_from_total_xp(&self, total_xp: u64) -> u32 {
        // The exact total is monotone, so binary search the last level with
        // total <= total_xp.
        let target = u128::from(total_xp);
        let (mut lo, mut hi) = (1u32, u32::MAX);
        while lo < hi {
            let mid = lo + (hi - lo).div_ceil(2);
            if self.exact_total_for_level(mid) <= target {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        lo
    }

    /// XP earned inside `level`.
    pub fn current_level_xp(&self, total_xp: u64, level: u32) -> u64 {
        total_xp.saturating_sub(self.total_xp_for_level(level))
    }

    pub fn xp_to_next_level(&self, total_xp: u64, level: u32) -> u64 {
        self.xp_for_level(level)
            .saturating_sub(self.current_level_xp(total_xp, level))
    }

    pub fn level_info(&self, total_xp: u64) -> LevelInfo {
        let level = self.level_from_total_xp(total_xp);
        let current_xp = self.current_level_xp(total_xp, level);
        let needed = self.xp_for_level(level);
        let progress_percentage = if needed == 0 {
            0
        } else {
            ((current_xp as f64 * 100.0 / needed as f64).round() as u64).min(100) as u8
        };
        LevelInfo {
            level,
            current_xp,
            total_xp,
            xp_to_next_level: self.xp_to_next_level(total_xp, level),
            progress_percentage,
        }
    }

    /// Add `delta` XP to `old_total_xp`. Negative deltas are treated as 0.
    pub fn apply_xp(&self, old_total_xp: u64, delta: i64) -> XpAward {
        let gained = u64::try_from(delta).unwrap_or(0);
        let new_total_xp = old_total_xp.saturating_add(gained);
        let old_level = self.level_from_total_xp(old_total_xp);
        let new_level = self.level_from_total_xp(new_total_xp);
        let leveled_up = new_level > old_level;
        if leveled_up {
            debug!(old_level, new_level, new_total_xp, "level up");
        }
        XpAward {
            old_total_xp,
            new_total_xp,
            xp_gained: gained,
            leveled_up,
            old_level,
            new_level,
        }
    }

    pub fn requirement(&self, level: u32) -> XpRequirement {
        let level = level.max(1);
        XpRequirement {
            level,
            xp_required: self.xp_for_level(level),
            total_xp_required: self.total_xp_for_level(level),
        }
    }
}

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

/// Snapshot of a learner's position on the curve. Always derived from
/// `total_xp`, never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub level: u32,
    #[serde(rename = "currentXP")]
    pub current_xp: u64,
    #[serde(rename = "totalXP")]
    pub total_xp: u64,
    #[serde(rename = "xpToNextLevel")]
    pub xp_to_next_level: u64,
    #[serde(rename = "progressPercentage")]
    pub progress_percentage: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpAward {
    pub old_total_xp: u64,
    pub new_total_xp: u64,
    pub xp_gained: u64,
    pub leveled_up: bool,
    pub old_level: u32,
    pub new_level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpRequirement {
    pub level: u32,
    pub xp_required: u64,
    pub total_xp_required: u64,
}

// ---------------------------------------------------------------------------
// Default-curve helpers
// ---------------------------------------------------------------------------

pub fn xp_for_level(level: u32) -> u64 {
    LevelCurve::DEFAULT.xp_for_level(level)
}

pub fn total_xp_for_level(target_level: u32) -> u64 {
    LevelCurve::DEFAULT.total_xp_for_level(target_level)
}

pub fn level_from_total_xp(total_xp: u64) -> u32 {
    LevelCurve::DEFAULT.level_from_total_xp(total_xp)
}

pub fn current_level_xp(total_xp: u64, level: u32) -> u64 {
    LevelCurve::DEFAULT.current_level_xp(total_xp, level)
}

pub fn xp_to_next_level(total_xp: u64, level: u32) -> u64 {
    LevelCurve::DEFAULT.xp_to_next_level(total_xp, level)
}

pub fn level_info(total_xp: u64) -> LevelInfo {
    LevelCurve::DEFAULT.level_info(total_xp)
}

pub fn apply_xp(old_total_xp: u64, delta: i64) -> XpAward {
    LevelCurve::DEFAULT.apply_xp(old_total_xp, delta)
}

/// Negative XP from an untrusted caller clamps to 0.
pub fn clamp_xp(xp: i64) -> u64 {
    u64::try_from(xp).unwrap_or(0)
}

/// Levels below 1 (including negative input) clamp to 1.
pub fn clamp_level(level: i64) -> u32 {
    u32::try_from(level.max(1)).unwrap_or(u32::MAX)
}

// ---------------------------------------------------------------------------
// Reward sizing
// ---------------------------------------------------------------------------

/// XP awarded for one turn, from its overall accuracy and message length in
/// characters. Never less than 1.
pub fn xp_gain_for_turn(overall_accuracy: u8, message_length: usize) -> u64 {
    let accuracy = overall_accuracy.min(100);
    let mut xp = u64::from(accuracy / 10);

    if message_length > 50 {
        xp += 5;
    } else if message_length > 20 {
        xp += 2;
    }

    if accuracy > 90 {
        xp += 5;
    } else if accuracy > 80 {
        xp += 2;
    }

    xp.max(1)
}
