use std::collections::HashMap;

use serde_json::{json, Value};

use tutor_core::progression::{clamp_level, clamp_xp};
use tutor_core::{
    analyze_request, AnalysisRequest, LevelCurve, ProgressStore, SessionConfig, SessionTracker,
    TutorError,
};

use crate::protocol::ToolResult;

const TURN_REASON: &str = "conversation turn";

/// State shared by tool calls for the lifetime of one server.
pub struct ToolContext<'a> {
    store: &'a dyn ProgressStore,
    curve: LevelCurve,
    session_config: SessionConfig,
    /// One tracker per learner, created on first turn and seeded with the
    /// learner's persisted XP.
    sessions: HashMap<String, SessionTracker>,
}

impl<'a> ToolContext<'a> {
    pub fn new(
        store: &'a dyn ProgressStore,
        curve: LevelCurve,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            store,
            curve,
            session_config,
            sessions: HashMap::new(),
        }
    }

    fn session(&mut self, user_id: &str) -> Result<&mut SessionTracker, ToolResult> {
        if !self.sessions.contains_key(user_id) {
            let total_xp = self
                .store
                .total_xp(user_id)
                .map_err(|e| ToolResult::error(format!("db error: {e}")))?;
            let tracker = SessionTracker::with_config(self.session_config, self.curve)
                .with_total_xp(total_xp);
            self.sessions.insert(user_id.to_string(), tracker);
        }
        self.sessions
            .get_mut(user_id)
            .ok_or_else(|| ToolResult::error(format!("no session for {user_id}")))
    }
}

// ---------------------------------------------------------------------------
// Tool schemas for tools/list
// ---------------------------------------------------------------------------

pub fn tool_definitions() -> Value {
    let tools = vec![
        // --- Scoring ---
        json!({
            "name": "tutor_analyze",
            "description": "Score a learner message for grammar, vocabulary, spelling and fluency. Returns the overall accuracy, sub-scores, feedback, errors and suggestions. Does not award XP.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "userMessage": {
                        "type": "string",
                        "description": "The learner's message"
                    },
                    "aiResponse": {
                        "type": "string",
                        "description": "The tutor reply the learner was answering (optional context)"
                    }
                },
                "required": ["userMessage"]
            }
        }),
        json!({
            "name": "tutor_turn",
            "description": "Process one conversation turn: score the message, fold it into the learner's session accuracy, award XP and persist it. Reports level-ups.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "userId": { "type": "string", "description": "Learner ID" },
                    "message": { "type": "string", "description": "The learner's message" },
                    "seq": {
                        "type": "integer",
                        "minimum": 0,
                        "description": "Per-session arrival sequence number. Defaults to the next number; stale numbers are rejected."
                    }
                },
                "required": ["userId", "message"]
            }
        }),
        json!({
            "name": "tutor_session_state",
            "description": "Show the learner's current session accuracy: lifetime and rolling means, message counts, recent scores.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "userId": { "type": "string", "description": "Learner ID" }
                },
                "required": ["userId"]
            }
        }),
        json!({
            "name": "tutor_session_reset",
            "description": "Start a new conversation for the learner. Clears session accuracy; XP is kept.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "userId": { "type": "string", "description": "Learner ID" }
                },
                "required": ["userId"]
            }
        }),
        // --- Progression ---
        json!({
            "name": "tutor_level_info",
            "description": "Project a total XP value onto the leveling curve: level, XP inside the level, XP to next level, progress percentage.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "totalXP": { "type": "integer", "description": "Cumulative XP (negative values clamp to 0)" }
                },
                "required": ["totalXP"]
            }
        }),
        json!({
            "name": "tutor_xp_required",
            "description": "XP needed to advance from a level, and cumulative XP needed to reach it.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "level": { "type": "integer", "description": "Level (values below 1 clamp to 1)" }
                },
                "required": ["level"]
            }
        }),
        json!({
            "name": "tutor_award_xp",
            "description": "Grant XP to a learner and persist the new total. Negative amounts grant nothing.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "userId": { "type": "string", "description": "Learner ID" },
                    "xpAmount": { "type": "integer", "description": "XP to add" },
                    "reason": { "type": "string", "description": "Why the XP was granted" }
                },
                "required": ["userId", "xpAmount"]
            }
        }),
        json!({
            "name": "tutor_learner",
            "description": "Show a learner's persisted XP total and level.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "userId": { "type": "string", "description": "Learner ID" }
                },
                "required": ["userId"]
            }
        }),
        json!({
            "name": "tutor_history",
            "description": "List a learner's most recent XP grants, newest first.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "userId": { "type": "string", "description": "Learner ID" },
                    "limit": {
                        "type": "integer",
                        "default": 10,
                        "minimum": 1,
                        "maximum": 100,
                        "description": "Max number of events"
                    }
                },
                "required": ["userId"]
            }
        }),
    ];

    json!({ "tools": tools })
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn call_tool(ctx: &mut ToolContext<'_>, name: &str, args: &Value) -> ToolResult {
    match name {
        // Scoring
        "tutor_analyze" => tool_analyze(args),
        "tutor_turn" => tool_turn(ctx, args),
        "tutor_session_state" => tool_session_state(ctx, args),
        "tutor_session_reset" => tool_session_reset(ctx, args),
        // Progression
        "tutor_level_info" => tool_level_info(ctx, args),
        "tutor_xp_required" => tool_xp_required(ctx, args),
        "tutor_award_xp" => tool_award_xp(ctx, args),
        "tutor_learner" => tool_learner(ctx, args),
        "tutor_history" => tool_history(ctx, args),
        _ => ToolResult::error(format!("unknown tool: {name}")),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn get_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn get_i64(args: &Value, key: &str, default: i64) -> i64 {
    args.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
}

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolResult> {
    get_str(args, key)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolResult::error(format!("missing required field: {key}")))
}

fn require_i64(args: &Value, key: &str) -> Result<i64, ToolResult> {
    args.get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ToolResult::error(format!("missing required field: {key}")))
}

// ---------------------------------------------------------------------------
// Scoring tool handlers
// ---------------------------------------------------------------------------

fn tool_analyze(args: &Value) -> ToolResult {
    let user_message = match get_str(args, "userMessage") {
        Some(m) => m,
        None => return ToolResult::error("missing required field: userMessage".into()),
    };
    let req = AnalysisRequest {
        user_message: user_message.to_string(),
        ai_response: get_str(args, "aiResponse").map(String::from),
    };
    ToolResult::json(&analyze_request(&req))
}

fn tool_turn(ctx: &mut ToolContext<'_>, args: &Value) -> ToolResult {
    let user_id = match require_str(args, "userId") {
        Ok(u) => u,
        Err(e) => return e,
    };
    let message = match get_str(args, "message") {
        Some(m) => m,
        None => return ToolResult::error("missing required field: message".into()),
    };

    let store = ctx.store;
    let curve = ctx.curve;
    let session = match ctx.session(user_id) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let seq = match args.get("seq").and_then(|v| v.as_u64()) {
        Some(seq) => seq,
        None => match session.next_seq() {
            Ok(seq) => seq,
            Err(e) => return ToolResult::error(format!("turn rejected: {e}")),
        },
    };

    // The tracker only advances once the XP is stored, so a failed write
    // can be retried with the same seq.
    let turn = session.process_turn_with(seq, message, |outcome| {
        store
            .award_turn(user_id, outcome, TURN_REASON, &curve)
            .map(|_| ())
    });
    match turn {
        Ok(outcome) => ToolResult::json(&outcome),
        Err(e @ TutorError::Database(_)) => {
            ToolResult::error(format!("failed to persist XP: {e}"))
        }
        Err(e) => ToolResult::error(format!("turn rejected: {e}")),
    }
}

fn tool_session_state(ctx: &mut ToolContext<'_>, args: &Value) -> ToolResult {
    let user_id = match require_str(args, "userId") {
        Ok(u) => u,
        Err(e) => return e,
    };
    match ctx.session(user_id) {
        Ok(session) => ToolResult::json(&session.snapshot()),
        Err(e) => e,
    }
}

fn tool_session_reset(ctx: &mut ToolContext<'_>, args: &Value) -> ToolResult {
    let user_id = match require_str(args, "userId") {
        Ok(u) => u,
        Err(e) => return e,
    };
    match ctx.sessions.get_mut(user_id) {
        Some(session) => {
            session.reset();
            ToolResult::text(format!("Session reset for {user_id}"))
        }
        None => ToolResult::text(format!("No active session for {user_id}")),
    }
}

// ---------------------------------------------------------------------------
// Progression tool handlers
// ---------------------------------------------------------------------------

fn tool_level_info(ctx: &ToolContext<'_>, args: &Value) -> ToolResult {
    match require_i64(args, "totalXP") {
        Ok(xp) => ToolResult::json(&ctx.curve.level_info(clamp_xp(xp))),
        Err(e) => e,
    }
}

fn tool_xp_required(ctx: &ToolContext<'_>, args: &Value) -> ToolResult {
    match require_i64(args, "level") {
        Ok(level) => ToolResult::json(&ctx.curve.requirement(clamp_level(level))),
        Err(e) => e,
    }
}

fn tool_award_xp(ctx: &mut ToolContext<'_>, args: &Value) -> ToolResult {
    let user_id = match require_str(args, "userId") {
        Ok(u) => u,
        Err(e) => return e,
    };
    let amount = match require_i64(args, "xpAmount") {
        Ok(a) => a,
        Err(e) => return e,
    };
    let reason = get_str(args, "reason").unwrap_or("manual award");

    match ctx.store.award_xp(user_id, amount, reason, &ctx.curve) {
        Ok(award) => {
            if let Some(session) = ctx.sessions.get_mut(user_id) {
                session.sync_total_xp(award.new_total_xp);
            }
            let info = ctx.curve.level_info(award.new_total_xp);
            ToolResult::json(&json!({ "award": award, "levelInfo": info }))
        }
        Err(e) => ToolResult::error(format!("failed to award XP: {e}")),
    }
}

fn tool_learner(ctx: &ToolContext<'_>, args: &Value) -> ToolResult {
    let user_id = match require_str(args, "userId") {
        Ok(u) => u,
        Err(e) => return e,
    };
    match ctx.store.learner(user_id) {
        Ok(Some(learner)) => {
            let info = learner.level_info(&ctx.curve);
            ToolResult::json(&json!({ "learner": learner, "levelInfo": info }))
        }
        Ok(None) => ToolResult::error(format!("learner not found: {user_id}")),
        Err(e) => ToolResult::error(format!("db error: {e}")),
    }
}

fn tool_history(ctx: &ToolContext<'_>, args: &Value) -> ToolResult {
    let user_id = match require_str(args, "userId") {
        Ok(u) => u,
        Err(e) => return e,
    };
    let limit = get_i64(args, "limit", 10).clamp(1, 100) as usize;

    match ctx.store.history(user_id, limit) {
        Ok(events) if events.is_empty() => {
            ToolResult::text(format!("No XP history for {user_id}."))
        }
        Ok(events) => {
            let mut output = format!("{} event(s) for {user_id}:\n", events.len());
            for ev in &events {
                output.push_str(&format!(
                    "  {} +{} XP  {}\n",
                    ev.created_at.format("%Y-%m-%d %H:%M"),
                    ev.amount,
                    ev.reason
                ));
            }
            ToolResult::text(output)
        }
        Err(e) => ToolResult::error(format!("failed to load history: {e}")),
    }
}
