//! Per-session accuracy tracking and the full per-turn pipeline.
//!
//! A [`SessionTracker`] is owned by exactly one conversation handler. Turns
//! carry a per-session sequence number assigned on arrival; the tracker only
//! accepts strictly increasing sequence numbers, so a retried or reordered
//! turn is rejected instead of being counted twice.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::accuracy::AccuracyResult;
use crate::analyzer;
use crate::error::{TutorError, TutorResult};
use crate::progression::{xp_gain_for_turn, LevelCurve, LevelInfo, XpAward};

/// Turns kept for the rolling accuracy figure.
pub const DEFAULT_WINDOW: usize = 20;
/// Scores at or above this count as quality messages.
pub const DEFAULT_QUALITY_THRESHOLD: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub window: usize,
    pub quality_threshold: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            quality_threshold: DEFAULT_QUALITY_THRESHOLD,
        }
    }
}

/// Value snapshot of a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAccuracyState {
    /// Most recent scores, oldest first, capped at the window size.
    pub historical_scores: Vec<u8>,
    /// Mean over every recorded turn.
    pub current_accuracy: u8,
    /// Mean over `historical_scores`.
    pub rolling_accuracy: u8,
    pub total_messages: u64,
    pub quality_messages: u64,
}

/// Everything one turn produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub seq: u64,
    pub result: AccuracyResult,
    pub xp_gained: u64,
    pub award: XpAward,
    pub level_info: LevelInfo,
    pub current_accuracy: u8,
    pub rolling_accuracy: u8,
}

#[derive(Debug, Clone)]
pub struct SessionTracker {
    config: SessionConfig,
    curve: LevelCurve,
    recent: VecDeque<u8>,
    lifetime_sum: u64,
    total_messages: u64,
    quality_messages: u64,
    total_xp: u64,
    last_seq: Option<u64>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default(), LevelCurve::DEFAULT)
    }

    pub fn with_config(config: SessionConfig, curve: LevelCurve) -> Self {
        let config = SessionConfig {
            window: config.window.max(1),
            ..config
        };
        Self {
            config,
            curve,
            recent: VecDeque::with_capacity(config.window),
            lifetime_sum: 0,
            total_messages: 0,
            quality_messages: 0,
            total_xp: 0,
            last_seq: None,
        }
    }

    /// Start from a learner's persisted XP total.
    pub fn with_total_xp(mut self, total_xp: u64) -> Self {
        self.total_xp = total_xp;
        self
    }

    /// Catch up with an XP total persisted elsewhere. Never lowers the total.
    pub fn sync_total_xp(&mut self, total_xp: u64) {
        self.total_xp = self.total_xp.max(total_xp);
    }

    /// Fold one turn score into the session. Out-of-range scores are
    /// clamped into `0..=100`. Returns the lifetime mean accuracy.
    pub fn record_turn(&mut self, score: i32) -> u8 {
        let score = score.clamp(0, 100) as u8;

        if self.recent.len() == self.config.window {
            self.recent.pop_front();
        }
        self.recent.push_back(score);

        self.lifetime_sum += u64::from(score);
        self.total_messages += 1;
        if score >= self.config.quality_threshold {
            self.quality_messages += 1;
        }

        self.current_accuracy()
    }

    /// [`record_turn`](Self::record_turn) guarded by the turn's arrival
    /// sequence number.
    pub fn record_turn_at(&mut self, seq: u64, score: i32) -> TutorResult<u8> {
        self.accept_seq(seq)?;
        Ok(self.record_turn(score))
    }

    /// Run the whole pipeline for one learner message: analyze, size the XP
    /// reward, fold the score, apply the XP. Blank messages consume the
    /// sequence number but are neither scored nor rewarded.
    pub fn process_turn(&mut self, seq: u64, message: &str) -> TutorResult<TurnOutcome> {
        self.accept_seq(seq)?;

        let result = analyzer::analyze(message);
        let (xp_gained, award) = if message.trim().is_empty() {
            (0, self.curve.apply_xp(self.total_xp, 0))
        } else {
            self.record_turn(i32::from(result.overall));
            let xp = xp_gain_for_turn(result.overall, message.trim().chars().count());
            let award = self
                .curve
                .apply_xp(self.total_xp, i64::try_from(xp).unwrap_or(i64::MAX));
            (xp, award)
        };
        self.total_xp = award.new_total_xp;

        debug!(
            seq,
            overall = result.overall,
            xp_gained,
            total_xp = self.total_xp,
            "turn processed"
        );

        Ok(TurnOutcome {
            seq,
            result,
            xp_gained,
            award,
            level_info: self.level_info(),
            current_accuracy: self.current_accuracy(),
            rolling_accuracy: self.rolling_accuracy(),
        })
    }

    /// [`process_turn`](Self::process_turn) whose effects are kept only if
    /// `commit` accepts the outcome. On any error the tracker is unchanged,
    /// so the same `seq` can be retried.
    pub fn process_turn_with<F>(
        &mut self,
        seq: u64,
        message: &str,
        commit: F,
    ) -> TutorResult<TurnOutcome>
    where
        F: FnOnce(&TurnOutcome) -> TutorResult<()>,
    {
        let mut next = self.clone();
        let outcome = next.process_turn(seq, message)?;
        commit(&outcome)?;
        *self = next;
        Ok(outcome)
    }

    /// Sequence number for a turn that arrives without one.
    pub fn next_seq(&self) -> TutorResult<u64> {
        match self.last_seq {
            None => Ok(1),
            Some(last) => last
                .checked_add(1)
                .ok_or(TutorError::SequenceExhausted(last)),
        }
    }

    /// Clear scores, counters and sequence numbering for a new conversation.
    /// The XP total is kept: XP is never taken away.
    pub fn reset(&mut self) {
        self.recent.clear();
        self.lifetime_sum = 0;
        self.total_messages = 0;
        self.quality_messages = 0;
        self.last_seq = None;
    }

    pub fn current_accuracy(&self) -> u8 {
        mean(self.lifetime_sum, self.total_messages)
    }

    pub fn rolling_accuracy(&self) -> u8 {
        let sum: u64 = self.recent.iter().map(|&s| u64::from(s)).sum();
        mean(sum, self.recent.len() as u64)
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }

    pub fn quality_messages(&self) -> u64 {
        self.quality_messages
    }

    pub fn total_xp(&self) -> u64 {
        self.total_xp
    }

    pub fn curve(&self) -> &LevelCurve {
        &self.curve
    }

    pub fn level_info(&self) -> LevelInfo {
        self.curve.level_info(self.total_xp)
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    pub fn snapshot(&self) -> SessionAccuracyState {
        SessionAccuracyState {
            historical_scores: self.recent.iter().copied().collect(),
            current_accuracy: self.current_accuracy(),
            rolling_accuracy: self.rolling_accuracy(),
            total_messages: self.total_messages,
            quality_messages: self.quality_messages,
        }
    }

    fn accept_seq(&mut self, seq: u64) -> TutorResult<()> {
        if let Some(last) = self.last_seq {
            if seq <= last {
                warn!(last, got = seq, "rejecting out-of-order turn");
                return Err(TutorError::OutOfOrder { last, got: seq });
            }
        }
        self.last_seq = Some(seq);
        Ok(())
    }
}

fn mean(sum: u64, count: u64) -> u8 {
    if count == 0 {
        return 0;
    }
    (sum as f64 / count as f64).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_turns() {
        let mut t = SessionTracker::new();
        t.record_turn(80);
        t.record_turn(60);
        let acc = t.record_turn(100);
        assert_eq!(acc, 80);
        assert_eq!(t.current_accuracy(), 80);
        assert_eq!(t.total_messages(), 3);
        assert_eq!(t.quality_messages(), 2);
    }

    #[test]
    fn test_fresh_tracker() {
        let t = SessionTracker::new();
        assert_eq!(t.current_accuracy(), 0);
        assert_eq!(t.rolling_accuracy(), 0);
        assert_eq!(t.snapshot().historical_scores, Vec::<u8>::new());
    }

    #[test]
    fn test_out_of_range_scores_clamped() {
        let mut t = SessionTracker::new();
        t.record_turn(150);
        t.record_turn(-20);
        assert_eq!(t.snapshot().historical_scores, vec![100, 0]);
        assert_eq!(t.current_accuracy(), 50);
        assert_eq!(t.quality_messages(), 1);
    }

    #[test]
    fn test_window_vs_lifetime() {
        let config = SessionConfig {
            window: 3,
            quality_threshold: 80,
        };
        let mut t = SessionTracker::with_config(config, LevelCurve::DEFAULT);
        for score in [0, 0, 0, 90, 90, 90] {
            t.record_turn(score);
        }
        assert_eq!(t.snapshot().historical_scores, vec![90, 90, 90]);
        assert_eq!(t.rolling_accuracy(), 90);
        assert_eq!(t.current_accuracy(), 45);
        assert_eq!(t.total_messages(), 6);
    }

    #[test]
    fn test_reset_keeps_xp() {
        let mut t = SessionTracker::new().with_total_xp(500);
        t.process_turn(1, "I went to the store yesterday because I needed milk.")
            .unwrap();
        let xp = t.total_xp();
        assert!(xp > 500);

        t.reset();
        assert_eq!(t.total_messages(), 0);
        assert_eq!(t.current_accuracy(), 0);
        assert!(t.last_seq().is_none());
        assert_eq!(t.total_xp(), xp);
        // numbering restarts after reset
        assert!(t.record_turn_at(1, 70).is_ok());
    }

    #[test]
    fn test_sequence_order_enforced() {
        let mut t = SessionTracker::new();
        assert!(t.record_turn_at(1, 80).is_ok());
        assert!(t.record_turn_at(3, 80).is_ok());
        let err = t.record_turn_at(3, 10).unwrap_err();
        assert!(matches!(err, TutorError::OutOfOrder { last: 3, got: 3 }));
        assert!(t.record_turn_at(2, 10).is_err());
        assert_eq!(t.total_messages(), 2);
        assert_eq!(t.current_accuracy(), 80);
    }

    #[test]
    fn test_process_turn_pipeline() {
        let mut t = SessionTracker::new();
        let msg = "I went to the store yesterday because I needed milk.";
        let out = t.process_turn(1, msg).unwrap();

        let expected = analyzer::analyze(msg);
        assert_eq!(out.result, expected);
        assert_eq!(
            out.xp_gained,
            xp_gain_for_turn(expected.overall, msg.chars().count())
        );
        assert_eq!(out.award.new_total_xp, out.xp_gained);
        assert_eq!(out.level_info.total_xp, t.total_xp());
        assert_eq!(out.current_accuracy, expected.overall);
        assert_eq!(t.total_messages(), 1);
    }

    #[test]
    fn test_blank_turn_not_counted() {
        let mut t = SessionTracker::new();
        let out = t.process_turn(1, "   ").unwrap();
        assert_eq!(out.xp_gained, 0);
        assert_eq!(out.result, AccuracyResult::empty());
        assert_eq!(t.total_messages(), 0);
        assert_eq!(t.last_seq(), Some(1));
    }

    #[test]
    fn test_xp_never_decreases() {
        let mut t = SessionTracker::new();
        let mut prev = 0;
        let messages = ["hello", "", "I am fine thanks", "um uh like so", "The end."];
        for (i, m) in messages.iter().enumerate() {
            t.process_turn(i as u64 + 1, m).unwrap();
            assert!(t.total_xp() >= prev);
            prev = t.total_xp();
        }
    }

    #[test]
    fn test_sync_total_xp_only_raises() {
        let mut t = SessionTracker::new().with_total_xp(300);
        t.sync_total_xp(200);
        assert_eq!(t.total_xp(), 300);
        t.sync_total_xp(400);
        assert_eq!(t.total_xp(), 400);
        assert_eq!(t.level_info().level, 3);
    }

    #[test]
    fn test_failed_commit_leaves_tracker_unchanged() {
        let mut t = SessionTracker::new().with_total_xp(40);
        let msg = "I went to the store yesterday because I needed milk.";
        let err = t
            .process_turn_with(1, msg, |_| Err(TutorError::Database("disk full".into())))
            .unwrap_err();
        assert!(matches!(err, TutorError::Database(_)));
        assert_eq!(t.total_messages(), 0);
        assert_eq!(t.total_xp(), 40);
        assert!(t.last_seq().is_none());

        // the same turn goes through once the commit succeeds
        let out = t.process_turn_with(1, msg, |_| Ok(())).unwrap();
        assert_eq!(t.total_messages(), 1);
        assert_eq!(t.total_xp(), 40 + out.xp_gained);
        assert_eq!(t.last_seq(), Some(1));
    }

    #[test]
    fn test_next_seq() {
        let mut t = SessionTracker::new();
        assert_eq!(t.next_seq().unwrap(), 1);
        t.record_turn_at(7, 50).unwrap();
        assert_eq!(t.next_seq().unwrap(), 8);
        t.record_turn_at(u64::MAX, 50).unwrap();
        assert!(matches!(
            t.next_seq(),
            Err(TutorError::SequenceExhausted(u64::MAX))
        ));
    }

    #[test]
    fn test_level_up_reported() {
        let mut t = SessionTracker::new().with_total_xp(99);
        let out = t
            .process_turn(1, "I am learning English every day with my friends.")
            .unwrap();
        assert!(out.award.leveled_up);
        assert_eq!(out.level_info.level, 2);
    }
}
