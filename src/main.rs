use anyhow::Context;
use clap::{Parser, Subcommand};
use docsnap::{
    backup, inventory, restore, BackupOptions, BackupReport, BackupStatus, CollectionSelection,
    ConnectionConfig, CountStatus, ErrorClass, ExtJsonMode, ImportStatus, Inventory,
    RestoreOptions, RestoreReport, SnapshotError, DEFAULT_BATCH_SIZE,
};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "docsnap")]
#[command(about = "Back up and restore document database collections", long_about = None)]
#[command(version)]
struct Args {
    /// Store URL (file://<dir>, a directory path, or memory://)
    #[arg(short, long, env = "DOCSNAP_URL", default_value = "file://./data", global = true)]
    url: String,

    /// Database name
    #[arg(short, long, env = "DOCSNAP_DATABASE", global = true)]
    database: Option<String>,

    /// Timeout for each connection attempt (e.g. "10s", "500ms")
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration, global = true)]
    connect_timeout: Duration,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List collections and their document counts
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Write an archive of the selected collections
    Backup {
        /// Collections to back up (comma-separated, e.g. "users,orders")
        #[arg(short, long, value_delimiter = ',', required_unless_present = "all", conflicts_with = "all")]
        collections: Vec<String>,

        /// Back up every collection
        #[arg(long)]
        all: bool,

        /// Output archive path, or "-" for stdout
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Write relaxed Extended JSON (readable dates, untagged 64-bit integers)
        #[arg(long)]
        relaxed: bool,
    },

    /// Import an archive into the database
    Restore {
        /// Archive to import
        #[arg(short, long)]
        input: PathBuf,

        /// Documents per insert batch
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing on stderr; stdout may carry the archive
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("docsnap={}", log_level))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("❌ Error: {:#}", e);
        let code = match e.downcast_ref::<SnapshotError>().map(SnapshotError::class) {
            Some(ErrorClass::ClientInput) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let database = args
        .database
        .clone()
        .ok_or_else(|| SnapshotError::Config("a database name is required (--database)".into()))?;
    let config = ConnectionConfig {
        url: args.url.clone(),
        database,
        connect_timeout: args.connect_timeout,
        ..Default::default()
    };

    info!("🚀 docsnap - Document Database Snapshots");
    info!("Store: {}", config.url);
    info!("Database: {}", config.database);

    let show_progress = !args.verbose && atty::is(atty::Stream::Stderr);

    match args.command {
        Command::List { json } => {
            let inventory = inventory(&config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&inventory)?);
            } else {
                print_inventory(&inventory);
            }
        }
        Command::Backup {
            collections,
            all,
            output,
            relaxed,
        } => {
            let selection = if all {
                CollectionSelection::All
            } else {
                CollectionSelection::Named(collections)
            };
            let options = BackupOptions {
                mode: if relaxed {
                    ExtJsonMode::Relaxed
                } else {
                    ExtJsonMode::Canonical
                },
                progress: show_progress.then(progress_bar),
            };
            let report = run_backup(&config, &selection, &output, options).await?;
            print_backup(&report);
        }
        Command::Restore {
            input,
            batch_size,
            json,
        } => {
            let archive = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read archive {}", input.display()))?;
            let options = RestoreOptions {
                batch_size,
                progress: show_progress.then(progress_bar),
            };
            let report = restore(&config, &archive, options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_restore(&report);
            }
        }
    }
    Ok(())
}

/// Streams the archive to stdout or a file. A file left behind by a failed
/// run is removed.
async fn run_backup(
    config: &ConnectionConfig,
    selection: &CollectionSelection,
    output: &Path,
    options: BackupOptions,
) -> anyhow::Result<BackupReport> {
    if output.as_os_str() == "-" {
        if atty::is(atty::Stream::Stdout) {
            return Err(SnapshotError::Config(
                "refusing to write an archive to a terminal; use --output or redirect stdout"
                    .into(),
            )
            .into());
        }
        let (report, _stdout) = backup(config, selection, std::io::stdout(), options).await?;
        return Ok(report);
    }

    let file = std::fs::File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    match backup(config, selection, BufWriter::new(file), options).await {
        Ok((report, mut writer)) => {
            writer.flush()?;
            writer.get_ref().sync_all()?;
            info!("Archive written to {}", output.display());
            Ok(report)
        }
        Err(e) => {
            // never leave a half-written archive behind
            let _ = std::fs::remove_file(output);
            Err(e.into())
        }
    }
}

fn progress_bar() -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new(0);
    pb.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed")
            .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
            .progress_chars("█▓▒░ "),
    );
    pb
}

fn print_inventory(inventory: &Inventory) {
    let width = inventory
        .collections
        .iter()
        .map(|c| c.name.len())
        .max()
        .unwrap_or(0)
        .max("COLLECTION".len());
    println!("{:<width$}  {:>10}  STATUS", "COLLECTION", "DOCUMENTS", width = width);
    for c in &inventory.collections {
        let status = match c.status {
            CountStatus::Ok => "ok".to_string(),
            CountStatus::CountUnavailable => format!(
                "count-unavailable ({})",
                c.reason.as_deref().unwrap_or("unknown")
            ),
        };
        println!("{:<width$}  {:>10}  {}", c.name, c.count, status, width = width);
    }
    println!(
        "\n{} collection(s), {} document(s) in '{}'",
        inventory.total_collections, inventory.total_documents, inventory.database
    );
}

fn print_backup(report: &BackupReport) {
    for c in &report.collections {
        match c.status {
            BackupStatus::Success => eprintln!("✅ {}: {} document(s)", c.name, c.documents),
            BackupStatus::Error => eprintln!(
                "❌ {}: {}",
                c.name,
                c.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    eprintln!(
        "📦 {} document(s) from {} collection(s), {} failed, in {}",
        report.total_documents(),
        report.manifest.collections_succeeded,
        report.failed(),
        report.manifest.elapsed
    );
}

fn print_restore(report: &RestoreReport) {
    for c in &report.collections {
        match c.status {
            ImportStatus::Success => println!(
                "✅ {}: {} imported ({} inserted, {} rejected)",
                c.name, c.imported, c.inserted, c.failed
            ),
            ImportStatus::Skipped => println!("⏭️  {}: skipped (empty)", c.name),
            ImportStatus::Error => println!(
                "❌ {}: {}",
                c.name,
                c.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    println!(
        "\n{} document(s) imported into '{}' in {}",
        report.total_imported,
        report.database,
        humantime::format_duration(Duration::from_millis(report.elapsed_ms))
    );
}
