pub mod accuracy;
pub mod aggregator;
pub mod analyzer;
pub mod error;
pub mod progress;
pub mod progress_store;
pub mod progression;
pub mod session;

pub use accuracy::{AccuracyResult, AnalysisRequest, Finding, SubScores};
pub use aggregator::{aggregate, aggregate_scores};
pub use analyzer::{analyze, analyze_request, score_message, Analysis};
pub use error::{TutorError, TutorResult};
pub use progress::{LearnerProgress, XpEvent};
pub use progress_store::ProgressStore;
pub use progression::{
    apply_xp, current_level_xp, level_from_total_xp, level_info, total_xp_for_level,
    xp_for_level, xp_gain_for_turn, xp_to_next_level, LevelCurve, LevelInfo, XpAward,
    XpRequirement,
};
pub use session::{SessionAccuracyState, SessionConfig, SessionTracker, TurnOutcome};
