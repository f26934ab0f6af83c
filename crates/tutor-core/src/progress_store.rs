use crate::error::TutorResult;
use crate::progress::{LearnerProgress, XpEvent};
use crate::progression::{LevelCurve, XpAward};
use crate::session::TurnOutcome;

/// Persistence collaborator for authoritative XP totals.
pub trait ProgressStore {
    // Learners
    fn learner(&self, user_id: &str) -> TutorResult<Option<LearnerProgress>>;
    fn list_learners(&self) -> TutorResult<Vec<LearnerProgress>>;

    /// Apply `xp_amount` to the learner's total on `curve` and record the
    /// event. Unknown learners start at 0 XP. Negative amounts grant nothing.
    fn award_xp(
        &self,
        user_id: &str,
        xp_amount: i64,
        reason: &str,
        curve: &LevelCurve,
    ) -> TutorResult<XpAward>;

    // Ledger
    fn history(&self, user_id: &str, limit: usize) -> TutorResult<Vec<XpEvent>>;

    /// Persist the XP a processed turn earned. Turns that earned nothing
    /// write nothing.
    fn award_turn(
        &self,
        user_id: &str,
        outcome: &TurnOutcome,
        reason: &str,
        curve: &LevelCurve,
    ) -> TutorResult<Option<XpAward>> {
        if outcome.xp_gained == 0 {
            return Ok(None);
        }
        let amount = i64::try_from(outcome.xp_gained).unwrap_or(i64::MAX);
        self.award_xp(user_id, amount, reason, curve).map(Some)
    }

    fn total_xp(&self, user_id: &str) -> TutorResult<u64> {
        Ok(self.learner(user_id)?.map(|p| p.total_xp).unwrap_or(0))
    }
}
