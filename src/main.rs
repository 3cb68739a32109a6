//! loopguard - Loop detection and intervention for autonomous coding agents
//!
//! Command-line front end over an action history file: replay it through
//! the detectors, print statistics, list recent actions, or tail it while
//! an agent is running.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;

use loopguard::action::{ActionFilter, HistoryFile};
use loopguard::detection::{loop_summary, LoopDetection};
use loopguard::{ActionLog, GuardConfig, InterventionPayload, LoopGuard, LoopGuardError, Severity};

#[derive(Parser)]
#[command(name = "loopguard")]
#[command(version)]
#[command(about = "Loop detection and intervention for autonomous coding agents", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Override the maximum number of interventions before escalation
    #[arg(long, global = true, value_name = "N")]
    max_interventions: Option<u32>,

    /// Action history file (defaults to the configured file in .loopguard/)
    #[arg(long, global = true, value_name = "FILE")]
    history: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the action history and report detected loops
    Analyze {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Show action statistics for the history
    Stats {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// List the most recent actions, optionally filtered
    Recent {
        /// Number of matching actions to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Only actions from this phase
        #[arg(long)]
        phase: Option<String>,

        /// Only actions by this agent
        #[arg(long)]
        agent: Option<String>,

        /// Only calls to this tool
        #[arg(long)]
        tool: Option<String>,

        /// Only actions on this file
        #[arg(long)]
        file: Option<String>,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Follow the history file and print interventions as they occur
    Watch {
        /// Polling interval in milliseconds
        #[arg(long, default_value = "1000", value_name = "MS")]
        interval: u64,

        /// Process the current contents once and exit
        #[arg(long)]
        once: bool,
    },

    /// Show or validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Delete or archive the action history
    Clear {
        /// Move the history aside instead of deleting it
        #[arg(long)]
        archive: bool,

        /// Confirm deletion
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as JSON
    Show,
    /// Validate the configuration
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "loopguard=debug,info"
    } else {
        "loopguard=info,warn"
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        let code = e
            .downcast_ref::<LoopGuardError>()
            .map_or(1, LoopGuardError::exit_code);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Resolve project path
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !project_path.exists() {
        anyhow::bail!(
            "Project directory does not exist: {}",
            project_path.display()
        );
    }

    let mut config = GuardConfig::load(&project_path)?;
    if let Some(max) = cli.max_interventions {
        config.intervention.max_interventions = max;
    }
    let history_path = cli
        .history
        .clone()
        .unwrap_or_else(|| config.history_path(&project_path));

    match cli.command {
        Commands::Analyze { json } => {
            config.validate()?;
            let log = replay(&history_path)?;
            let action_count = log.len();
            let mut guard = LoopGuard::with_log(config, log);
            let assessment = guard.assess();

            if json {
                let report = serde_json::json!({
                    "history": history_path.display().to_string(),
                    "actions": action_count,
                    "detections": assessment
                        .detections
                        .iter()
                        .map(LoopDetection::summary)
                        .collect::<Vec<_>>(),
                    "intervention": assessment.intervention,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "\n{} {} actions from {}",
                    "Analyze:".cyan().bold(),
                    action_count,
                    history_path.display()
                );
                println!("{}", "─".repeat(40));
                print_detections(&assessment.detections);
                if let Some(payload) = &assessment.intervention {
                    print_payload(payload);
                }
            }
        }

        Commands::Stats { json } => {
            let log = replay(&history_path)?;
            let stats = log.statistics();

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("\n{} Action Statistics", "Stats:".cyan().bold());
                println!("{}", "─".repeat(40));
                println!("   Total actions: {}", stats.total_actions);
                println!("   Time span: {:.1}s", stats.time_span_secs);
                println!("   Actions per minute: {:.1}", stats.actions_per_minute);
                if let Some(rate) = stats.success_rate {
                    println!("   Success rate: {:.0}%", rate * 100.0);
                }
                print_counts("By phase", &stats.by_phase);
                print_counts("By tool", &stats.by_tool);
                print_counts("By file", &stats.by_file);
            }
        }

        Commands::Recent {
            limit,
            phase,
            agent,
            tool,
            file,
            json,
        } => {
            let log = replay(&history_path)?;
            let filter = ActionFilter {
                phase,
                agent,
                tool,
                file_path: file,
            };
            let actions = log.query(limit, &filter);

            if json {
                println!("{}", serde_json::to_string_pretty(&actions)?);
            } else if actions.is_empty() {
                println!("{} No matching actions", "OK".green());
            } else {
                println!(
                    "\n{} {} of {} actions",
                    "Recent:".cyan().bold(),
                    actions.len(),
                    log.len()
                );
                println!("{}", "─".repeat(40));
                for action in actions {
                    let outcome = if action.success {
                        "ok".green()
                    } else {
                        "failed".red()
                    };
                    println!(
                        "   {} {}/{} {} {} [{}]",
                        action.timestamp.format("%H:%M:%S"),
                        action.phase,
                        action.agent,
                        action.tool.bold(),
                        action.file_path.as_deref().unwrap_or("-"),
                        outcome
                    );
                }
            }
        }

        Commands::Watch { interval, once } => {
            config.validate()?;
            watch(config, &history_path, interval, once).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Validate => {
                config.validate()?;
                println!(
                    "{} Configuration is valid ({})",
                    "OK".green().bold(),
                    GuardConfig::settings_path(&project_path).display()
                );
            }
        },

        Commands::Clear { archive, force } => {
            let history = HistoryFile::new(&history_path);
            if !history.exists() {
                println!("{} No action history at {}", "OK".green(), history_path.display());
                return Ok(());
            }

            if archive {
                match history.archive()? {
                    Some(target) => println!(
                        "{} Archived action history to {}",
                        "OK".green().bold(),
                        target.display()
                    ),
                    None => println!("{} Action history deleted", "OK".green().bold()),
                }
            } else {
                if !force {
                    eprintln!(
                        "{} This will delete the action history. Use --force to confirm or --archive to keep a copy.",
                        "Warning:".yellow().bold()
                    );
                    std::process::exit(1);
                }
                history.remove()?;
                println!("{} Action history deleted", "OK".green().bold());
            }
        }
    }

    Ok(())
}

/// Loads a history file into an in-memory log.
fn replay(path: &Path) -> anyhow::Result<ActionLog> {
    let actions = HistoryFile::new(path)
        .load()
        .with_context(|| format!("Failed to read action history {}", path.display()))?;
    let mut log = ActionLog::new();
    for action in actions {
        log.push(action);
    }
    Ok(log)
}

async fn watch(config: GuardConfig, path: &Path, interval_ms: u64, once: bool) -> anyhow::Result<()> {
    let history = HistoryFile::new(path);
    let mut guard = LoopGuard::with_log(config, ActionLog::new());
    let mut offset = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(10)));

    if !once {
        println!(
            "{} Watching {} (Ctrl-C to stop)",
            "Watch:".cyan().bold(),
            path.display()
        );
    }

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (actions, next) = match history.read_from(offset) {
                    Ok(read) => read,
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Could not read action history, retrying on next poll"
                        );
                        (Vec::new(), offset)
                    }
                    Err(e) => {
                        return Err(anyhow::Error::new(e)
                            .context(format!("Failed to read action history {}", path.display())));
                    }
                };
                if next < offset {
                    tracing::info!(path = %path.display(), "History file was truncated, starting over");
                    guard.log_mut().clear();
                }
                offset = next;

                if !actions.is_empty() {
                    for action in actions {
                        guard.log_mut().push(action);
                    }
                    if let Some(payload) = guard.check_and_intervene() {
                        print_payload(&payload);
                    }
                }

                if once {
                    println!(
                        "{} {} actions processed, {} interventions",
                        "Watch:".cyan().bold(),
                        guard.log().len(),
                        guard.status().intervention_count
                    );
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n{} Stopped", "Watch:".cyan().bold());
                break;
            }
        }
    }

    Ok(())
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    let label = severity.as_str().to_uppercase();
    let label = label.as_str();
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::High => label.red(),
        Severity::Medium => label.yellow(),
        Severity::Low => label.normal(),
    }
}

fn print_detections(detections: &[LoopDetection]) {
    if detections.is_empty() {
        println!("{} {}", "OK".green().bold(), loop_summary(detections));
        return;
    }

    for detection in detections {
        println!(
            "   [{}] {}: {}",
            severity_label(detection.severity),
            detection.loop_type.as_str().bold(),
            detection.description
        );
        for evidence in &detection.evidence {
            println!("      - {}", evidence);
        }
    }
}

fn print_payload(payload: &InterventionPayload) {
    let heading = if payload.requires_user_input {
        "ESCALATION".red().bold()
    } else {
        "INTERVENTION".yellow().bold()
    };
    println!("\n{} {} [{}]", heading, payload.intervention_type, severity_label(payload.severity));
    println!("{}", "─".repeat(40));
    println!("{}", payload.guidance);
    if !payload.blocked_tools.is_empty() {
        println!("{} {}", "Blocked tools:".red(), payload.blocked_tools.join(", "));
    }
    if !payload.suggested_tools.is_empty() {
        println!("{} {}", "Suggested tools:".green(), payload.suggested_tools.join(", "));
    }
}

fn print_counts(title: &str, counts: &std::collections::BTreeMap<String, usize>) {
    if counts.is_empty() {
        return;
    }
    println!("\n   {}:", title);
    for (key, count) in counts {
        println!("      {:<30} {}", key, count);
    }
}
