use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use log::{error, info};
use siteport::jobs::{ExportOutcome, IMPORT_TICK, Scheduler, TaskQueue};
use siteport::{
    ArchiveSource, Asset, EngineConfig, ExportOptions, FileOptionStore, ImportRequest, IntervalScheduler,
    JobKind, MatchMode, Orchestrator, ReplacePairs, RunReport, SearchReplace, SqliteStore, StoredTaskQueue,
    TableCatalog,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "siteport")]
#[command(about = "Export, import and rewrite tenants of a multi-tenant site database")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `store_url` from the configuration
    #[arg(long, global = true)]
    store: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export a tenant to a zip archive
    Export {
        #[arg(long)]
        tenant: u64,
        /// Comma separated: themes,plugins,uploads
        #[arg(long, value_delimiter = ',')]
        assets: Vec<Asset>,
        #[arg(long)]
        source_url: Option<String>,
        /// Queue the export for the worker instead of running it now
        #[arg(long)]
        background: bool,
    },
    ListExports,
    DeleteExport {
        archive: PathBuf,
    },
    /// Queue an import; the next tick runs it
    Import {
        /// Archive path or https URL
        #[arg(long)]
        archive: String,
        #[arg(long)]
        tenant: u64,
        #[arg(long)]
        destination_url: String,
        #[arg(long)]
        source_url: Option<String>,
        #[arg(long)]
        destination_store: Option<String>,
        #[arg(long)]
        delete_archive: bool,
        #[arg(long)]
        drop_tables: bool,
        #[arg(long)]
        force_drop: bool,
        #[arg(long)]
        stop_on_error: bool,
    },
    ListJobs,
    Cancel {
        #[arg(long, default_value = "import")]
        kind: JobKind,
        hash: String,
    },
    SearchReplace {
        #[arg(long, conflicts_with = "tables")]
        tenant: Option<u64>,
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
        #[arg(long, requires = "replace", conflicts_with = "csv")]
        search: Option<String>,
        #[arg(long)]
        replace: Option<String>,
        /// Two-column CSV of search,replace pairs
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long, default_value = "literal")]
        mode: String,
        /// Write changes; the default is a dry run
        #[arg(long)]
        commit: bool,
        #[arg(long)]
        strict: bool,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run queued tasks and scheduled ticks until interrupted
    Worker {
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,
    },
    /// Advance one pending import now
    Tick,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(url) = cli.store {
        config.store_url = url;
    }

    match cli.command {
        Command::SearchReplace {
            tenant,
            tables,
            search,
            replace,
            csv,
            mode,
            commit,
            strict,
            json,
        } => {
            let pairs = match (search, replace, csv) {
                (Some(search), Some(replace), None) => ReplacePairs::single(search, replace),
                (None, _, Some(path)) => ReplacePairs::from_csv_path(&path)?,
                _ => bail!("Pass either --search/--replace or --csv"),
            };
            let mode = parse_mode(&mode)?;
            search_replace(&config, tenant, tables, &pairs, mode, commit, strict, json)
        }
        command => {
            let jobs = JobContext::open(config)?;
            run_job_command(&jobs, command)
        }
    }
}

struct JobContext {
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn TaskQueue>,
    scheduler: Arc<dyn Scheduler>,
}

impl JobContext {
    fn open(config: EngineConfig) -> Result<Self> {
        let state = Arc::new(
            FileOptionStore::open(&config.jobs.state_file)
                .with_context(|| format!("Failed to open {}", config.jobs.state_file.display()))?,
        );
        let queue: Arc<dyn TaskQueue> = Arc::new(StoredTaskQueue::new(state.clone()));
        let scheduler: Arc<dyn Scheduler> = Arc::new(IntervalScheduler::new(state.clone()));
        let orchestrator = Orchestrator::new(config, state, queue.clone(), scheduler.clone())?;
        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            queue,
            scheduler,
        })
    }
}

fn run_job_command(jobs: &JobContext, command: Command) -> Result<()> {
    let orchestrator = &jobs.orchestrator;
    match command {
        Command::Export {
            tenant,
            assets,
            source_url,
            background,
        } => {
            let options = ExportOptions {
                assets: assets.into_iter().collect(),
                source_url,
            };
            match orchestrator.export(tenant, options, background)? {
                ExportOutcome::Completed(record) => println!(
                    "{} ({} bytes, {} ms)",
                    record.archive_path.display(),
                    record.size_bytes,
                    record.duration_ms
                ),
                ExportOutcome::Queued(job) => println!("Queued export {}", job.hash),
            }
            Ok(())
        }
        Command::ListExports => {
            for record in orchestrator.list_exports()? {
                let assets = record
                    .included_assets
                    .iter()
                    .map(|a| a.dir_name())
                    .collect::<Vec<_>>()
                    .join(",");
                println!(
                    "{}\ttenant {}\t{}\t{} bytes\t{} ms\t{}",
                    record.archive_path.display(),
                    record.tenant_id,
                    record.created_at.to_rfc3339(),
                    record.size_bytes,
                    record.duration_ms,
                    if assets.is_empty() { "-" } else { &assets }
                );
            }
            Ok(())
        }
        Command::DeleteExport { archive } => {
            orchestrator.delete_export(&archive)?;
            Ok(())
        }
        Command::Import {
            archive,
            tenant,
            destination_url,
            source_url,
            destination_store,
            delete_archive,
            drop_tables,
            force_drop,
            stop_on_error,
        } => {
            let archive = if archive.contains("://") {
                ArchiveSource::Url(archive)
            } else {
                ArchiveSource::Path(PathBuf::from(archive))
            };
            let import = orchestrator
                .config()
                .import
                .clone()
                .drop_tables(drop_tables)
                .force_drop(force_drop)
                .stop_on_error(stop_on_error);
            let mut request = ImportRequest::new(archive, tenant, destination_url)
                .delete_archive(delete_archive)
                .import_config(import);
            request.source_url = source_url;
            request.destination_store = destination_store;

            let job = orchestrator.import(request)?;
            println!("Queued import {}", job.hash);
            Ok(())
        }
        Command::ListJobs => {
            for kind in [JobKind::Export, JobKind::Import] {
                for job in orchestrator.pending(kind)? {
                    println!(
                        "{}\t{}\ttenant {}\t{:?}\t{}{}",
                        kind,
                        job.hash,
                        job.subject_id,
                        job.status,
                        job.enqueued_at.to_rfc3339(),
                        job.error.map(|e| format!("\t{}", e)).unwrap_or_default()
                    );
                }
            }
            Ok(())
        }
        Command::Cancel { kind, hash } => {
            orchestrator.cancel(kind, &hash)?;
            Ok(())
        }
        Command::Tick => {
            match orchestrator.on_tick()? {
                Some(outcome) => {
                    println!("Imported {}: {}", outcome.job.hash, outcome.import.summary());
                    if let Some(report) = outcome.replace {
                        println!("{}", report.summary());
                    }
                }
                None => println!("Nothing to import"),
            }
            Ok(())
        }
        Command::Worker { poll_secs } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(worker(jobs, Duration::from_secs(poll_secs.max(1))))
        }
        Command::SearchReplace { .. } => unreachable!("handled before opening the job store"),
    }
}

async fn worker(jobs: &JobContext, poll: Duration) -> Result<()> {
    info!("Worker started, polling every {}s", poll.as_secs());
    let mut interval = tokio::time::interval(poll);
    let mut last_tick: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Worker stopping");
                return Ok(());
            }
        }

        let orchestrator = jobs.orchestrator.clone();
        let queue = jobs.queue.clone();
        let scheduler = jobs.scheduler.clone();
        let ticked = tokio::task::spawn_blocking(move || -> Result<bool> {
            while let Some(task) = queue.pop()? {
                if let Err(e) = orchestrator.run_task(&task.name, task.payload) {
                    error!("Task {} failed: {}", task.name, e);
                }
            }

            let Some(every) = scheduler.interval(IMPORT_TICK)? else {
                return Ok(false);
            };
            if last_tick.is_some_and(|at| at.elapsed() < every) {
                return Ok(false);
            }
            match orchestrator.on_tick() {
                Ok(Some(outcome)) => info!("Import {} finished: {}", outcome.job.hash, outcome.import.summary()),
                Ok(None) => {}
                Err(e) => error!("Import tick failed: {}", e),
            }
            Ok(true)
        })
        .await
        .map_err(|e| anyhow!("Worker task panicked: {}", e))??;

        if ticked {
            last_tick = Some(Instant::now());
        }
    }
}

fn parse_mode(mode: &str) -> Result<MatchMode> {
    match mode {
        "literal" => Ok(MatchMode::Literal),
        "case-insensitive" | "case_insensitive" => Ok(MatchMode::CaseInsensitive),
        "regex" => Ok(MatchMode::Regex),
        other => Err(anyhow!("Unknown match mode '{}'", other)),
    }
}

#[allow(clippy::too_many_arguments)]
fn search_replace(
    config: &EngineConfig,
    tenant: Option<u64>,
    tables: Vec<String>,
    pairs: &ReplacePairs,
    mode: MatchMode,
    commit: bool,
    strict: bool,
    json: bool,
) -> Result<()> {
    let store = SqliteStore::connect(&config.store()?).context("Failed to open the store")?;
    let tables = match tenant {
        Some(id) => TableCatalog::new(&store).list_tables(&config.tenant(id)?)?,
        None if !tables.is_empty() => tables,
        None => bail!("Pass --tenant or --tables"),
    };

    let replace = config.replace.clone().dry_run(!commit).mode(mode).strict(strict);
    let limit = siteport::RuntimeLimit::unlimited();
    let report = SearchReplace::new(&store, replace).with_runtime_limit(limit).run(&tables, pairs)?;
    print_report(&report, json)
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for table in &report.per_table {
        println!(
            "{}\t{} row(s)\t{} change(s)\t{} update(s)",
            table.table, table.rows_scanned, table.cells_changed, table.updates_executed
        );
        for change in &table.change_log {
            println!("  [{}] {}: {} -> {}", change.row, change.column, change.from, change.to);
        }
    }
    for (table, message) in report.errors() {
        println!("! {}: {}", table, message);
    }
    println!("{}", report.summary());
    Ok(())
}
