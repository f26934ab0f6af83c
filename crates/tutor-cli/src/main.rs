mod config;
#[cfg(feature = "web")]
mod web;

use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};

use tutor_core::progression::{clamp_level, clamp_xp};
use tutor_core::{
    analyze_request, AccuracyResult, AnalysisRequest, LevelCurve, LevelInfo, ProgressStore,
    SessionConfig, SessionTracker,
};
use tutor_store::SqliteStore;

use crate::config::Config;

#[derive(Parser)]
#[command(
    name = "tutor",
    version,
    about = "Accuracy scoring and XP progression for language learners"
)]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a learner message (reads stdin when TEXT is omitted)
    Analyze {
        /// Message to score
        text: Option<String>,

        /// The tutor reply the message answers (context only)
        #[arg(long)]
        ai_response: Option<String>,

        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },

    /// Show level details for an XP total, or the XP a level requires
    #[command(group(ArgGroup::new("query").required(true).args(["xp", "level"])))]
    Level {
        /// Total XP
        #[arg(long, allow_hyphen_values = true)]
        xp: Option<i64>,

        /// Level number
        #[arg(long, allow_hyphen_values = true)]
        level: Option<i64>,
    },

    /// Award XP to a learner
    Award {
        /// Learner id
        #[arg(short, long)]
        user: String,

        /// XP amount (negative amounts grant nothing)
        #[arg(short, long, allow_hyphen_values = true)]
        amount: i64,

        /// Why the XP was awarded
        #[arg(short, long, default_value = "manual award")]
        reason: String,
    },

    /// Show a learner's progress
    Show {
        /// Learner id
        user: String,
    },

    /// Show a learner's XP history, newest first
    History {
        /// Learner id
        user: String,

        /// Maximum events
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// List learners by total XP
    Learners,

    /// Score messages line by line as one conversation session
    Chat {
        /// Persist XP to this learner
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Show active configuration
    Config,

    /// Start the tool server (JSON-RPC over stdio)
    Serve,

    /// Start the HTTP API
    #[cfg(feature = "web")]
    Web {
        /// Address to bind (default from config)
        #[arg(long)]
        bind: Option<String>,
    },
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "tutor", "tutor")
        .map(|dirs| dirs.data_dir().join("progress.db"))
        .unwrap_or_else(|| PathBuf::from("progress.db"))
}

fn open_store(db: Option<PathBuf>, cfg: &Config) -> Result<SqliteStore> {
    let path = db
        .or_else(|| cfg.store.path.as_ref().map(PathBuf::from))
        .unwrap_or_else(default_db_path);
    SqliteStore::new(&path).with_context(|| format!("failed to open database {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config()?;
    let curve = cfg.curve().context("invalid [progression] config")?;

    match cli.command {
        Commands::Analyze {
            text,
            ai_response,
            json,
        } => cmd_analyze(text, ai_response, json),
        Commands::Level { xp, level } => cmd_level(&curve, xp, level),
        Commands::Award {
            user,
            amount,
            reason,
        } => cmd_award(&open_store(cli.db, &cfg)?, &curve, &user, amount, &reason),
        Commands::Show { user } => cmd_show(&open_store(cli.db, &cfg)?, &curve, &user),
        Commands::History { user, limit } => cmd_history(&open_store(cli.db, &cfg)?, &user, limit),
        Commands::Learners => cmd_learners(&open_store(cli.db, &cfg)?, &curve),
        Commands::Chat { user } => {
            let store = match user {
                Some(_) => Some(open_store(cli.db, &cfg)?),
                None => None,
            };
            let persist = store.as_ref().zip(user.as_deref());
            cmd_chat(persist, curve, cfg.session_config())
        }
        Commands::Config => cmd_config(&cfg),
        Commands::Serve => {
            let store = open_store(cli.db, &cfg)?;
            let options = tutor_mcp::ServerOptions {
                curve,
                session: cfg.session_config(),
                instructions: cfg.mcp.instructions.clone(),
            };
            tutor_mcp::run_server(&store, &options)
        }
        #[cfg(feature = "web")]
        Commands::Web { bind } => {
            let store = open_store(cli.db, &cfg)?;
            let bind = bind.unwrap_or_else(|| cfg.web.bind.clone());
            let state = web::AppState::new(store, curve, cfg.session_config());
            tokio::runtime::Runtime::new()
                .context("failed to start async runtime")?
                .block_on(web::run(state, &bind))
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring commands
// ---------------------------------------------------------------------------

fn cmd_analyze(text: Option<String>, ai_response: Option<String>, json: bool) -> Result<()> {
    let user_message = match text {
        Some(t) => t,
        None => {
            if io::stdin().is_terminal() {
                bail!("no message given: pass TEXT or pipe it on stdin");
            }
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    let result = analyze_request(&AnalysisRequest {
        user_message,
        ai_response,
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn cmd_chat(
    persist: Option<(&SqliteStore, &str)>,
    curve: LevelCurve,
    session: SessionConfig,
) -> Result<()> {
    let mut tracker = SessionTracker::with_config(session, curve);
    if let Some((store, user)) = persist {
        tracker = tracker.with_total_xp(store.total_xp(user)?);
    }

    let interactive = io::stdin().is_terminal();
    if interactive {
        println!("Type a message per line. Ctrl-D to finish.");
    }

    let stdin = io::stdin();
    let mut seq = 0u64;
    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        seq += 1;
        let outcome = tracker.process_turn_with(seq, &line, |outcome| match persist {
            Some((store, user)) => store.award_turn(user, outcome, "chat turn", &curve).map(|_| ()),
            None => Ok(()),
        })?;

        println!(
            "#{seq} overall {:>3}  +{} XP  session {}%  recent {}%",
            outcome.result.overall,
            outcome.xp_gained,
            outcome.current_accuracy,
            outcome.rolling_accuracy,
        );
        for err in &outcome.result.errors {
            println!("    - {err}");
        }
        if outcome.award.leveled_up {
            println!("    Level up! Now level {}", outcome.award.new_level);
        }
        io::stdout().flush()?;
    }

    let state = tracker.snapshot();
    println!();
    println!("Messages:   {}", state.total_messages);
    println!("Quality:    {}", state.quality_messages);
    println!("Accuracy:   {}%", state.current_accuracy);
    print_level_info(&tracker.level_info());
    Ok(())
}

// ---------------------------------------------------------------------------
// Progression commands
// ---------------------------------------------------------------------------

fn cmd_level(curve: &LevelCurve, xp: Option<i64>, level: Option<i64>) -> Result<()> {
    if let Some(xp) = xp {
        print_level_info(&curve.level_info(clamp_xp(xp)));
    }
    if let Some(level) = level {
        let req = curve.requirement(clamp_level(level));
        println!("Level {}", req.level);
        println!("  XP for this level:  {}", req.xp_required);
        println!("  Total XP to reach:  {}", req.total_xp_required);
    }
    Ok(())
}

fn cmd_award(
    store: &SqliteStore,
    curve: &LevelCurve,
    user: &str,
    amount: i64,
    reason: &str,
) -> Result<()> {
    let award = store.award_xp(user, amount, reason, curve)?;
    println!(
        "{user}: +{} XP ({} -> {})",
        award.xp_gained, award.old_total_xp, award.new_total_xp
    );
    if award.leveled_up {
        println!("Level up! {} -> {}", award.old_level, award.new_level);
    }
    Ok(())
}

fn cmd_show(store: &SqliteStore, curve: &LevelCurve, user: &str) -> Result<()> {
    let learner = match store.learner(user)? {
        Some(l) => l,
        None => bail!("learner not found: {user}"),
    };
    println!("Learner:   {}", learner.user_id);
    println!("Since:     {}", learner.created_at.format("%Y-%m-%d %H:%M"));
    println!("Updated:   {}", learner.updated_at.format("%Y-%m-%d %H:%M"));
    print_level_info(&learner.level_info(curve));
    Ok(())
}

fn cmd_history(store: &SqliteStore, user: &str, limit: usize) -> Result<()> {
    let events = store.history(user, limit.max(1))?;
    if events.is_empty() {
        println!("No XP history for {user}.");
        return Ok(());
    }
    for ev in &events {
        println!(
            "{}  +{:<6} {}",
            ev.created_at.format("%Y-%m-%d %H:%M:%S"),
            ev.amount,
            ev.reason
        );
    }
    Ok(())
}

fn cmd_learners(store: &SqliteStore, curve: &LevelCurve) -> Result<()> {
    let learners = store.list_learners()?;
    if learners.is_empty() {
        println!("No learners yet.");
        return Ok(());
    }

    println!("{:<24} {:>6} {:>10}", "Learner", "Level", "Total XP");
    println!("{}", "-".repeat(42));
    for l in &learners {
        println!(
            "{:<24} {:>6} {:>10}",
            l.user_id,
            curve.level_from_total_xp(l.total_xp),
            l.total_xp
        );
    }
    Ok(())
}

fn cmd_config(cfg: &Config) -> Result<()> {
    println!("Config: {}", config::show_config_path());
    println!();
    println!("[store]");
    println!(
        "  path = {}",
        cfg.store
            .path
            .clone()
            .unwrap_or_else(|| format!("{} (default)", default_db_path().display()))
    );
    println!();
    println!("[progression]");
    println!("  base_xp = {}", cfg.progression.base_xp);
    println!("  step_xp = {}", cfg.progression.step_xp);
    println!();
    println!("[session]");
    println!("  window = {}", cfg.session.window);
    println!("  quality_threshold = {}", cfg.session.quality_threshold);
    println!();
    println!("[web]");
    println!("  bind = {}", cfg.web.bind);
    println!();
    println!("[mcp]");
    if let Some(ref instr) = cfg.mcp.instructions {
        println!("  instructions = {instr}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_result(r: &AccuracyResult) {
    println!("Overall     {:>3}", r.overall);
    println!("  grammar     {:>3}", r.grammar);
    println!("  vocabulary  {:>3}", r.vocabulary);
    println!("  spelling    {:>3}", r.spelling);
    println!("  fluency     {:>3}", r.fluency);
    print_list("Errors", &r.errors);
    print_list("Suggestions", &r.suggestions);
    print_list("Feedback", &r.feedback);
}

fn print_list(title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!();
    println!("{title}:");
    for item in items {
        println!("  - {item}");
    }
}

fn print_level_info(info: &LevelInfo) {
    println!(
        "Level {}  ({} XP total, {} into level, {} to next, {}%)",
        info.level,
        info.total_xp,
        info.current_xp,
        info.xp_to_next_level,
        info.progress_percentage
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_level_requires_xp_or_level() {
        assert!(Cli::try_parse_from(["tutor", "level"]).is_err());
        let cli = Cli::try_parse_from(["tutor", "level", "--xp", "-5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Level {
                xp: Some(-5),
                level: None
            }
        ));
    }

    #[test]
    fn test_award_parses_negative_amount() {
        let cli =
            Cli::try_parse_from(["tutor", "award", "--user", "amy", "--amount", "-20"]).unwrap();
        match cli.command {
            Commands::Award {
                user,
                amount,
                reason,
            } => {
                assert_eq!(user, "amy");
                assert_eq!(amount, -20);
                assert_eq!(reason, "manual award");
            }
            _ => panic!("expected award"),
        }
    }

    #[test]
    fn test_open_store_prefers_flag_over_config() {
        let dir = tempfile::tempdir().unwrap();
        let flag_path = dir.path().join("flag.db");
        let cfg: Config = toml::from_str(&format!(
            "[store]\npath = \"{}\"\n",
            dir.path().join("config.db").display()
        ))
        .unwrap();

        let store = open_store(Some(flag_path.clone()), &cfg).unwrap();
        store
            .award_xp("amy", 10, "test", &LevelCurve::DEFAULT)
            .unwrap();
        assert!(flag_path.exists());
        assert!(!dir.path().join("config.db").exists());
    }

    #[test]
    fn test_award_and_show_commands() {
        let store = SqliteStore::in_memory().unwrap();
        let curve = LevelCurve::DEFAULT;
        cmd_award(&store, &curve, "ben", 150, "test").unwrap();
        cmd_show(&store, &curve, "ben").unwrap();
        assert_eq!(store.total_xp("ben").unwrap(), 150);
        assert!(cmd_show(&store, &curve, "nobody").is_err());
    }
}
