//! pgdrift: schema drift checks for dbmate migrations
//!
//! # Usage
//!
//! ```bash
//! # Validate migration files
//! pgdrift check
//!
//! # Schema implied by the migrations
//! pgdrift replay
//!
//! # Compare against a live snapshot, failing CI on drift
//! pgdrift drift --snapshot schema.json --ledger applied.json --ci
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use pgdrift::prelude::*;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pgdrift")]
#[command(version)]
#[command(about = "Replay dbmate migrations and detect schema drift", long_about = None)]
#[command(after_help = "EXAMPLES:
    pgdrift new add_users_email
    pgdrift status --ledger applied.json
    pgdrift drift --snapshot schema.json --format json")]
struct Cli {
    /// Config file (default: ./pgdrift.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Migrations directory
    #[arg(short = 'd', long, global = true, env = "DBMATE_MIGRATIONS_DIR")]
    migrations_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "pretty")]
    format: OutputFormat,

    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new migration file
    New {
        /// Migration name
        name: String,
        /// SQL for the up section
        #[arg(long, default_value = "")]
        up: String,
        /// SQL for the down section
        #[arg(long, default_value = "")]
        down: String,
    },
    /// Validate migration files
    Check,
    /// Show applied and pending migrations
    Status {
        /// Applied-migrations ledger (JSON)
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// Print the schema the migrations imply
    Replay {
        /// Only replay versions recorded in this ledger (JSON)
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// Compare the replayed schema against a live snapshot
    Drift {
        /// Live schema snapshot (JSON)
        #[arg(long)]
        snapshot: Option<PathBuf>,
        /// Applied-migrations ledger (JSON)
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// Exit non-zero when drift is found
        #[arg(long, env = "CI")]
        ci: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("pgdrift=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Returns `false` when the command ran but the result should fail the process.
fn run(cli: &Cli) -> Result<bool> {
    let config = Config::discover(cli.config.as_deref())?;
    let dir = cli
        .migrations_dir
        .clone()
        .unwrap_or_else(|| config.migrations.dir.clone());
    let fmt = cli.format;

    match &cli.command {
        Commands::New { name, up, down } => {
            let path = create_migration(&dir, name, up, down)?;
            println!("{} Created {}", "✓".green(), path.display().to_string().cyan());
            Ok(true)
        }
        Commands::Check => check(&dir, fmt),
        Commands::Status { ledger } => {
            let ledger = ledger.clone().or_else(|| config.drift.ledger.clone());
            status(&dir, ledger.as_deref(), fmt)
        }
        Commands::Replay { ledger } => {
            let ledger = ledger.clone().or_else(|| config.drift.ledger.clone());
            replay(&dir, ledger.as_deref(), fmt)
        }
        Commands::Drift {
            snapshot,
            ledger,
            ci,
        } => {
            let Some(snapshot) = snapshot.clone().or_else(|| config.drift.snapshot.clone()) else {
                bail!("No snapshot. Use --snapshot or set [drift] snapshot in pgdrift.toml");
            };
            let ledger = ledger.clone().or_else(|| config.drift.ledger.clone());
            drift(&dir, &snapshot, ledger.as_deref(), *ci, fmt)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn check(dir: &Path, fmt: OutputFormat) -> Result<bool> {
    let analysis = analyze_migrations(dir)?;
    if fmt == OutputFormat::Json {
        print_json(&analysis)?;
        return Ok(analysis.is_clean());
    }

    println!(
        "{} {}",
        "Checking migrations:".cyan().bold(),
        dir.display().to_string().yellow()
    );
    println!(
        "  Files: {} ({} valid, {} invalid)",
        analysis.total_files, analysis.valid_files, analysis.invalid_files
    );
    for issue in &analysis.errors {
        println!("  {} {}", "✗".red(), issue.message);
    }
    if analysis.is_clean() {
        println!("{}", "✓ All migrations are valid".green().bold());
    } else {
        let counts: Vec<String> = issue_counts(&analysis.errors)
            .iter()
            .map(|(kind, n)| format!("{} {:?}", n, kind))
            .collect();
        println!("{} {}", "✗ Problems found:".red().bold(), counts.join(", "));
    }
    Ok(analysis.is_clean())
}

fn status(dir: &Path, ledger: Option<&Path>, fmt: OutputFormat) -> Result<bool> {
    let Some(ledger) = ledger else {
        bail!("No ledger. Use --ledger or set [drift] ledger in pgdrift.toml");
    };
    let loaded = load_migrations(dir)?;
    let applied = LedgerFile::new(ledger).applied()?;
    let history = loaded.history(&applied);
    if fmt == OutputFormat::Json {
        print_json(&history)?;
        return Ok(true);
    }

    println!("{}", "Migration status".cyan().bold());
    for m in &history.migration_chain {
        match m.applied_at {
            Some(at) => println!(
                "  {} {} {}",
                "✓".green(),
                m.filename,
                at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
            ),
            None => println!("  {} {} {}", "○".yellow(), m.filename, "pending".yellow()),
        }
    }
    for version in &history.missing_files {
        println!("  {} {} {}", "!".red(), version, "applied, but no file".red());
    }
    println!();
    println!(
        "Applied: {}  Pending: {}",
        history.applied_count().to_string().green(),
        history.pending.len().to_string().yellow()
    );
    if let Some(last) = &history.last_applied_version {
        println!("Last applied: {}", last.cyan());
    }
    Ok(true)
}

fn replay(dir: &Path, ledger: Option<&Path>, fmt: OutputFormat) -> Result<bool> {
    let loaded = load_migrations(dir)?;
    let applied = ledger.map(|p| LedgerFile::new(p).applied()).transpose()?;
    let (model, stats) = expected_schema(&loaded, applied.as_deref());
    if fmt == OutputFormat::Json {
        print_json(&model)?;
        return Ok(true);
    }

    print!("{}", model);
    println!();
    println!(
        "{} Replayed {} migration(s): {} applied, {} no-op, {} ignored",
        "✓".green(),
        stats.migrations,
        stats.applied,
        stats.skipped,
        stats.ignored
    );
    Ok(true)
}

fn drift(
    dir: &Path,
    snapshot: &Path,
    ledger: Option<&Path>,
    ci: bool,
    fmt: OutputFormat,
) -> Result<bool> {
    let ledger = ledger.map(LedgerFile::new);
    let analysis = analyze_drift(
        dir,
        ledger.as_ref().map(|l| l as &dyn MigrationLedger),
        &SnapshotFile::new(snapshot),
    )?;
    let ok = !(ci && analysis.drift.has_changes);
    if fmt == OutputFormat::Json {
        print_json(&analysis)?;
        return Ok(ok);
    }

    print_report(&analysis.drift);
    if let Some(history) = &analysis.history
        && !history.pending.is_empty()
    {
        println!(
            "{} {} pending migration(s) not included in the expected schema",
            "!".yellow(),
            history.pending.len()
        );
    }
    Ok(ok)
}

fn print_report(report: &DriftReport) {
    if !report.has_changes {
        println!("{} {}", "✓".green(), report.summary.green());
        return;
    }
    println!("{}", report.summary.red().bold());

    let families = [
        ("table", &report.missing_tables, &report.extra_tables),
        ("index", &report.missing_indexes, &report.extra_indexes),
        ("view", &report.missing_views, &report.extra_views),
        ("trigger", &report.missing_triggers, &report.extra_triggers),
        ("policy", &report.missing_policies, &report.extra_policies),
    ];
    for (family, missing, extra) in families {
        for key in missing {
            println!("  {} {} {}", "-".red(), family, key);
        }
        for key in extra {
            println!("  {} {} {}", "+".green(), family, key);
        }
    }

    for table in &report.modified_tables {
        println!("  {} table {}", "~".yellow(), table.key);
        for col in &table.missing_columns {
            println!("      {} column {}", "-".red(), col);
        }
        for col in &table.extra_columns {
            println!("      {} column {}", "+".green(), col);
        }
        for col in &table.modified_columns {
            let tag = if col.placeholder { " (placeholder)".dimmed().to_string() } else { String::new() };
            println!("      {} column {}{}", "~".yellow(), col.name, tag);
            for d in &col.differences {
                println!("          {:?}: {} -> {}", d.property, d.expected, d.actual);
            }
        }
        for name in &table.missing_constraints {
            println!("      {} constraint {}", "-".red(), name);
        }
        for name in &table.extra_constraints {
            println!("      {} constraint {}", "+".green(), name);
        }
    }
    for view in &report.modified_views {
        println!("  {} view {} (definition changed)", "~".yellow(), view.key);
    }

    if report.placeholder_column_changes > 0 {
        println!();
        println!(
            "{}",
            format!(
                "{} column change(s) involve replayed placeholder columns; their real types are not recovered from migrations.",
                report.placeholder_column_changes
            )
            .dimmed()
        );
    }
}
