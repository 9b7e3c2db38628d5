use clap::{Parser, Subcommand, ValueEnum};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use fixity::{
    ChecksumResultCode, FsObjectStore, HistoryRetention, HistoryTableRow, MemoryStateStore,
    PassBudget, PassReport, Reporter, Retention, Runner, StateTableRow, Verifier,
};
use tabled::{settings::Style, Table};

#[derive(Parser)]
#[command(name = "fixity")]
#[command(about = "Scheduled checksum auditing for stored bitstreams")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the checker state snapshot
    #[arg(short, long, env = "FIXITY_STATE", default_value = "./fixity-state.json")]
    state: PathBuf,

    /// Root directory of the object store
    #[arg(short, long, env = "FIXITY_OBJECTS", default_value = "./objects")]
    objects: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Register checker state for every object in the store
    Init,

    /// Run one scheduling pass over eligible records
    Check {
        /// Maximum number of objects to verify in this pass
        #[arg(long)]
        count: Option<u64>,

        /// Stop claiming new work after this many seconds
        #[arg(long)]
        duration: Option<i64>,

        /// Re-queue every record and verify all of them
        #[arg(long)]
        all: bool,

        /// Number of concurrent verification workers
        #[arg(long, default_value = "1")]
        workers: usize,

        /// Skip records whose previous pass started within the last N minutes
        #[arg(long)]
        cutoff_minutes: Option<i64>,

        /// Re-queue records whose last check finished more than N hours ago
        #[arg(long)]
        requeue_after_hours: Option<i64>,
    },

    /// Verify a single object now, ignoring scheduling eligibility
    Verify {
        /// Object id
        object_id: Uuid,
    },

    /// Report on checker state and audit history
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// Remove a permanently deleted object from checker state
    Remove {
        /// Object id
        object_id: Uuid,

        /// Keep the object's audit history for post-mortem reporting
        #[arg(long)]
        keep_history: bool,
    },

    /// Delete old audit history entries
    Prune {
        /// Delete entries older than this many days
        #[arg(long)]
        older_than_days: i64,

        /// Only delete entries with this result code
        #[arg(long)]
        code: Option<ChecksumResultCode>,
    },
}

#[derive(Subcommand)]
enum ReportAction {
    /// Current state rows, optionally limited to a check date range
    State {
        /// Range start (inclusive, e.g. 2024-01-01)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Range end (exclusive, e.g. 2024-02-01)
        #[arg(long)]
        to: Option<NaiveDate>,

        #[arg(short, long, default_value = "table")]
        output: OutputFormat,
    },

    /// Audit history entries for one result code in a date range
    History {
        /// Result code (e.g. MISMATCH)
        #[arg(long)]
        code: ChecksumResultCode,

        /// Range start (inclusive)
        #[arg(long)]
        from: NaiveDate,

        /// Range end (exclusive)
        #[arg(long)]
        to: NaiveDate,

        #[arg(short, long, default_value = "table")]
        output: OutputFormat,
    },

    /// Tracked objects with no audit history at all
    Unaudited {
        #[arg(short, long, default_value = "table")]
        output: OutputFormat,
    },

    /// Totals per result code
    Summary {
        #[arg(short, long, default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("fixity=debug,info")
    } else {
        EnvFilter::new("fixity=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "✗ Error:".red(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStateStore::load(&cli.state)?);

    match cli.command {
        Commands::Init => {
            let objects = Arc::new(FsObjectStore::open(&cli.objects)?);
            cmd_init(Arc::clone(&store), objects).await?;
            store.save(&cli.state)?;
        }

        Commands::Check {
            count,
            duration,
            all,
            workers,
            cutoff_minutes,
            requeue_after_hours,
        } => {
            let objects = Arc::new(FsObjectStore::open(&cli.objects)?);
            let result = cmd_check(
                Arc::clone(&store),
                objects,
                count,
                duration,
                all,
                workers,
                cutoff_minutes,
                requeue_after_hours,
            )
            .await;
            // Commit whatever the pass recorded, even when it failed early.
            store.save(&cli.state)?;
            result?;
        }

        Commands::Verify { object_id } => {
            let objects = Arc::new(FsObjectStore::open(&cli.objects)?);
            cmd_verify(Arc::clone(&store), objects, object_id).await?;
            store.save(&cli.state)?;
        }

        Commands::Report { action } => {
            cmd_report(store.as_ref(), action).await?;
        }

        Commands::Remove {
            object_id,
            keep_history,
        } => {
            cmd_remove(store.as_ref(), object_id, keep_history).await?;
            store.save(&cli.state)?;
        }

        Commands::Prune {
            older_than_days,
            code,
        } => {
            cmd_prune(store.as_ref(), older_than_days, code).await?;
            store.save(&cli.state)?;
        }
    }

    Ok(())
}

async fn cmd_init(
    store: Arc<MemoryStateStore>,
    objects: Arc<FsObjectStore>,
) -> Result<(), Box<dyn std::error::Error>> {
    let total = objects.len();
    let runner = Runner::new(store, objects);
    let created = runner.sync_from_objects().await?;
    println!(
        "✓ {} objects in store, {} newly registered for auditing",
        total, created
    );
    Ok(())
}

async fn cmd_check(
    store: Arc<MemoryStateStore>,
    objects: Arc<FsObjectStore>,
    count: Option<u64>,
    duration: Option<i64>,
    all: bool,
    workers: usize,
    cutoff_minutes: Option<i64>,
    requeue_after_hours: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let runner = Runner::new(Arc::clone(&store), objects);

    runner.sync_from_objects().await?;
    if let Some(hours) = requeue_after_hours {
        runner.requeue_older_than(Duration::hours(hours)).await?;
    }

    let budget = PassBudget {
        max_checks: count,
        max_duration: duration.map(Duration::seconds),
    };

    let report = if all {
        info!("running in process-all mode");
        runner.run_all(workers, budget).await?
    } else {
        let cutoff = cutoff_minutes.map(|m| Utc::now() - Duration::minutes(m));
        runner.run_pass_concurrent(workers, budget, cutoff).await?
    };

    print_pass_report(&report);

    let gaps = Reporter::new(store.as_ref()).unaudited().await?;
    if !gaps.is_empty() {
        println!(
            "{}",
            format!(
                "⚠ {} tracked objects still have no audit history; run 'fixity report unaudited'",
                gaps.len()
            )
            .yellow()
        );
    }
    Ok(())
}

async fn cmd_verify(
    store: Arc<MemoryStateStore>,
    objects: Arc<FsObjectStore>,
    object_id: Uuid,
) -> Result<(), Box<dyn std::error::Error>> {
    let verifier = Verifier::new(store, objects);
    let entry = verifier.verify_object(object_id).await?;

    let line = format!(
        "{} {}  {}",
        entry.result.symbol(),
        entry.object_id,
        entry.result.description()
    );
    match entry.result {
        ChecksumResultCode::Match => println!("{}", line.green()),
        _ => println!("{}", line.red()),
    }
    if entry.result == ChecksumResultCode::Mismatch {
        println!("  expected: {}", entry.expected_checksum);
        if let Some(current) = &entry.current_checksum {
            println!("  computed: {}", current);
        }
    }
    Ok(())
}

async fn cmd_report(
    store: &MemoryStateStore,
    action: ReportAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let reporter = Reporter::new(store);

    match action {
        ReportAction::State { from, to, output } => {
            let rows = match (from, to) {
                (Some(from), Some(to)) => {
                    reporter.by_date_range(day_start(from), day_start(to)).await?
                }
                (None, None) => reporter.all().await?,
                _ => return Err("--from and --to must be given together".into()),
            };
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                OutputFormat::Table => {
                    if rows.is_empty() {
                        println!("No state rows to display");
                    } else {
                        print_table(rows.iter().map(StateTableRow::from));
                    }
                }
            }
        }

        ReportAction::History {
            code,
            from,
            to,
            output,
        } => {
            let entries = reporter
                .by_result_in_range(code, day_start(from), day_start(to))
                .await?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
                OutputFormat::Table => {
                    if entries.is_empty() {
                        println!("No {} entries in range", code);
                    } else {
                        print_table(entries.iter().map(HistoryTableRow::from));
                    }
                }
            }
        }

        ReportAction::Unaudited { output } => {
            let rows = reporter.unaudited().await?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                OutputFormat::Table => {
                    if rows.is_empty() {
                        println!("{}", "✓ Every tracked object has audit history".green());
                    } else {
                        println!(
                            "{}",
                            format!(
                                "⚠ {} tracked objects have no audit history",
                                rows.len()
                            )
                            .yellow()
                        );
                        print_table(rows.iter().map(StateTableRow::from));
                    }
                }
            }
        }

        ReportAction::Summary { output } => {
            let summary = reporter.summary().await?;
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Table => {
                    println!("Checksum audit summary\n");
                    println!("  {} tracked objects ({} queued)", summary.tracked, summary.queued);
                    println!("  {} audit history entries", summary.history_entries);
                    if summary.unaudited > 0 {
                        println!(
                            "  {}",
                            format!("{} objects with no audit history", summary.unaudited).yellow()
                        );
                    }
                    println!();
                    for entry in &summary.by_result {
                        println!(
                            "  {} {:<18} {:>6}  {}",
                            entry.code.symbol(),
                            entry.code.as_str(),
                            entry.count,
                            entry.description
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

async fn cmd_remove(
    store: &MemoryStateStore,
    object_id: Uuid,
    keep_history: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let policy = if keep_history {
        HistoryRetention::Keep
    } else {
        HistoryRetention::Purge
    };
    let removed = Retention::new(store).remove_object(object_id, policy).await?;
    if removed {
        println!("✓ Removed checker state for {}", object_id);
    } else {
        println!("Object {} was not tracked; nothing to remove", object_id);
    }
    Ok(())
}

async fn cmd_prune(
    store: &MemoryStateStore,
    older_than_days: i64,
    code: Option<ChecksumResultCode>,
) -> Result<(), Box<dyn std::error::Error>> {
    let before = Utc::now() - Duration::days(older_than_days);
    let deleted = Retention::new(store).prune_history(before, code).await?;
    println!("✓ Pruned {} audit history entries", deleted);
    Ok(())
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap())
}

fn print_table<R: tabled::Tabled>(rows: impl Iterator<Item = R>) {
    let mut table = Table::new(rows);
    table.with(Style::markdown());
    println!("{}", table);
}

fn print_pass_report(report: &PassReport) {
    println!("\nScheduling pass complete: {} objects verified\n", report.checked);
    println!("  {}", format!("✓ {} match", report.matches).green());
    if report.mismatches > 0 {
        println!("  {}", format!("✗ {} mismatch", report.mismatches).red());
    }
    if report.not_found > 0 {
        println!("  {}", format!("? {} not found", report.not_found).yellow());
    }
    if report.store_errors > 0 {
        println!("  {}", format!("⚠ {} store errors", report.store_errors).yellow());
    }

    if !report.findings.is_empty() {
        println!("\nFindings:");
        for finding in &report.findings {
            println!(
                "  {} {}  {}",
                finding.result.symbol(),
                finding.object_id,
                finding.result.as_str()
            );
        }
        println!("\nRun 'fixity report history --code MISMATCH' for the audit trail");
    }
}
