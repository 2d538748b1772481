//! Waypoint CLI Entry Point
//!
//! Runs, resumes and inspects jobs against a state directory, and serves
//! queued jobs with background workers.
//!
//! # Usage
//!
//! ```bash
//! # Run the sample workflow until it needs input
//! waypoint run demo.FileHandling
//!
//! # Provide the input it is waiting for
//! waypoint resume 1 file=/tmp/data.json
//!
//! # Register and run a workflow from YAML; it is kept in the state
//! # directory, so later commands can resume its jobs
//! waypoint run --file flow.yaml
//!
//! # Inspect
//! waypoint status 1
//! waypoint jobs
//! waypoint catalog
//! waypoint export demo.FileHandling flow.yaml
//!
//! # Process queued jobs and keep the catalog in sync
//! waypoint serve --workers 4
//! ```

mod demo;

use std::env;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info, warn};
use serde_json::{Map, Value};

use waypoint::config::{EngineConfig, DEFAULT_CONFIG_PATH};
use waypoint::dispatch::{Dispatcher, LocalQueue, Queue, WorkerPool};
use waypoint::execution::Engine;
use waypoint::output::FileSink;
use waypoint::store::{CatalogStore, FileStore, JobStore};
use waypoint::units::Registry;
use waypoint::watchdog::Watchdog;
use waypoint::workflow::parser::save_workflow;
use waypoint::workflow::{load_workflow, Job, JobId, JobState};
use waypoint::{APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct CliConfig {
    command: Option<String>,
    args: Vec<String>,
    config_path: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    workflow_file: Option<PathBuf>,
    workers: Option<usize>,
    queue_only: bool,
    reset_watchdog: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Persistent Workflow Execution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: waypoint [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("Commands:");
    println!("  run [WORKFLOW] [KEY=VALUE...]  Run a workflow (default: {})", demo::WORKFLOW);
    println!("  resume <JOB_ID> KEY=VALUE...   Provide external input and continue");
    println!("  status <JOB_ID>                Show state, log and output of a job");
    println!("  jobs                           List jobs");
    println!("  catalog                        Synchronize and list the catalog");
    println!("  export <WORKFLOW> <PATH>       Write a registered workflow as YAML");
    println!("  serve                          Run queued jobs and the catalog watchdog");
    println!();
    println!("Options:");
    println!("  --file PATH         Register a workflow from YAML before running it");
    println!("  --queue             Only queue the job; `serve` runs it");
    println!("  --workers N         Concurrent jobs in serve mode");
    println!("  --reset-watchdog    Clear a stale watchdog flag before serving");
    println!("  --state-dir PATH    State directory (default: .waypoint)");
    println!("  --config PATH       Config file (default: {})", DEFAULT_CONFIG_PATH.display());
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  waypoint run");
    println!("  waypoint resume 1 file=/tmp/data.json");
    println!("  waypoint serve --workers 8");
}

/// Parses command-line arguments into a CliConfig struct.
fn parse_arguments(args: &[String]) -> Result<CliConfig, String> {
    let mut config = CliConfig::default();
    let mut i = 1; // Skip program name

    let value = |i: usize, flag: &str| -> Result<String, String> {
        args.get(i)
            .cloned()
            .ok_or_else(|| format!("{} requires an argument", flag))
    };

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--queue" => {
                config.queue_only = true;
            }
            "--reset-watchdog" => {
                config.reset_watchdog = true;
            }
            "--file" => {
                i += 1;
                config.workflow_file = Some(PathBuf::from(value(i, "--file")?));
            }
            "--state-dir" => {
                i += 1;
                config.state_dir = Some(PathBuf::from(value(i, "--state-dir")?));
            }
            "--config" => {
                i += 1;
                config.config_path = Some(PathBuf::from(value(i, "--config")?));
            }
            "--workers" => {
                i += 1;
                let n = value(i, "--workers")?;
                config.workers = Some(
                    n.parse()
                        .map_err(|_| format!("Invalid workers value: {}", n))?,
                );
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.command.is_none() {
                    config.command = Some(arg.clone());
                } else {
                    config.args.push(arg.clone());
                }
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Builds an input mapping from `key=value` pairs. Values that parse as
/// JSON keep their type; anything else is a string.
fn parse_input(pairs: &[String]) -> Result<Value, String> {
    let mut map = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("Expected KEY=VALUE, got '{}'", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(Value::Object(map))
}

fn parse_job_id(args: &[String]) -> Result<JobId, String> {
    let raw = args.first().ok_or("A job id is required")?;
    raw.parse().map_err(|_| format!("Invalid job id: {}", raw))
}

fn colored_state(state: JobState) -> colored::ColoredString {
    match state {
        JobState::Finished => state.as_str().green(),
        JobState::Failed => state.as_str().red(),
        JobState::InputRequired => state.as_str().yellow(),
        _ => state.as_str().cyan(),
    }
}

/// Everything a command needs, rooted at one state directory.
struct Context {
    config: EngineConfig,
    registry: Arc<Registry>,
    store: Arc<FileStore>,
    engine: Arc<Engine>,
}

impl Context {
    fn open(config: EngineConfig) -> Result<Self, Box<dyn Error>> {
        let registry = Arc::new(Registry::new());
        demo::register(&registry);

        let store = Arc::new(FileStore::open(&config.state_dir)?);
        let sink = Arc::new(FileSink::open(config.logs_dir())?);
        let engine = Arc::new(Engine::new(registry.clone(), store.clone(), sink));

        registry.scan_all(&config.modules());
        let ctx = Self {
            config,
            registry,
            store,
            engine,
        };
        ctx.restore_workflows();
        Ok(ctx)
    }

    /// Validates a YAML workflow, registers it and keeps a copy in the
    /// state directory. Returns the workflow path.
    fn register_workflow_file(&self, path: &Path) -> Result<String, Box<dyn Error>> {
        let definition = load_workflow(path)?;
        let name = definition.path.clone();
        if name.contains(['/', '\\']) {
            return Err(format!("Workflow name '{}' cannot contain path separators", name).into());
        }
        self.registry.add_workflow(definition)?;

        let dir = self.config.workflows_dir();
        fs::create_dir_all(&dir)?;
        if let Some(definition) = self.registry.workflow(&name) {
            save_workflow(&definition, dir.join(format!("{}.yaml", name)))?;
        }
        info!("Registered workflow '{}' from {}", name, path.display());
        Ok(name)
    }

    /// Re-registers stored workflows this registry does not know yet.
    fn restore_workflows(&self) -> usize {
        let Ok(entries) = fs::read_dir(self.config.workflows_dir()) else {
            return 0;
        };

        let mut restored = 0;
        for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
            let known = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) if path.extension().is_some_and(|ext| ext == "yaml") => {
                    self.registry.workflow(stem).is_some()
                }
                _ => continue,
            };
            if known {
                continue;
            }

            let added = load_workflow(&path)
                .map_err(|e| e.to_string())
                .and_then(|w| self.registry.add_workflow(w).map_err(|e| e.to_string()));
            match added {
                Ok(()) => restored += 1,
                Err(e) => warn!("Skipping stored workflow {}: {}", path.display(), e),
            }
        }
        restored
    }

    fn watchdog(&self) -> Watchdog {
        Watchdog::new(self.registry.clone(), self.store.clone(), &self.config)
    }

    fn dispatcher(&self, queue: Arc<dyn Queue>) -> Dispatcher {
        Dispatcher::new(self.engine.clone(), queue)
    }
}

fn print_job(job: &Job) {
    println!("Job {} ({})", job.id, job.workflow);
    println!("  State:   {}", colored_state(job.state));
    println!("  Pointer: {}", job.pointer);
    println!("  Updated: {}", job.updated_at.format("%Y-%m-%d %H:%M:%S"));
}

fn print_log(job: &Job) {
    println!("  Log:");
    for (i, entry) in job.log.entries().iter().enumerate() {
        let detail = match (&entry.error, entry.branch) {
            (Some(e), _) => format!("{} {}", "FAILED".red(), e),
            (None, Some(branch)) => format!("branch {}", branch),
            (None, None) => entry.result.to_string(),
        };
        println!("    {:>3}. {} -> {}", i + 1, entry.unit, detail);
    }
}

fn cmd_run(ctx: &Context, cli: &CliConfig) -> Result<(), Box<dyn Error>> {
    let workflow = match &cli.workflow_file {
        Some(path) => ctx.register_workflow_file(path)?,
        None => cli
            .args
            .first()
            .filter(|a| !a.contains('='))
            .cloned()
            .unwrap_or_else(|| demo::WORKFLOW.to_string()),
    };
    let pairs: Vec<String> = cli.args.iter().filter(|a| a.contains('=')).cloned().collect();

    if cli.queue_only {
        let id = ctx.dispatcher(Arc::new(LocalQueue::new())).order_execution(&workflow)?;
        println!("Queued job {} for {}", id, workflow);
        return Ok(());
    }

    let dispatcher = ctx.dispatcher(Arc::new(LocalQueue::new()));
    let id = dispatcher.execute_synchronously(&workflow)?;

    if !pairs.is_empty() && dispatcher.state(id)? == JobState::InputRequired {
        dispatcher.provide_external_input_sync(id, parse_input(&pairs)?)?;
    }

    let job = dispatcher.job(id)?;
    print_job(&job);
    if job.state == JobState::InputRequired {
        println!();
        println!("Provide input with: waypoint resume {} KEY=VALUE...", id);
    }
    Ok(())
}

fn cmd_resume(ctx: &Context, cli: &CliConfig) -> Result<(), Box<dyn Error>> {
    let id = parse_job_id(&cli.args)?;
    let data = parse_input(&cli.args[1..])?;

    let dispatcher = ctx.dispatcher(Arc::new(LocalQueue::new()));
    let outcome = dispatcher.provide_external_input_sync(id, data)?;
    info!("Job {} is now {}", id, outcome.state());

    print_job(&dispatcher.job(id)?);
    Ok(())
}

fn cmd_status(ctx: &Context, cli: &CliConfig) -> Result<(), Box<dyn Error>> {
    let id = parse_job_id(&cli.args)?;
    let dispatcher = ctx.dispatcher(Arc::new(LocalQueue::new()));

    let job = dispatcher.job(id)?;
    print_job(&job);
    print_log(&job);

    let text = dispatcher.log_text(id)?;
    if !text.is_empty() {
        println!();
        println!("  Output:");
        for line in text.lines() {
            println!("    {}", line);
        }
    }
    Ok(())
}

fn cmd_jobs(ctx: &Context) -> Result<(), Box<dyn Error>> {
    let jobs = ctx.store.list_jobs()?;
    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{:>5}  {:<16}  {:<32}  {}",
            job.id,
            colored_state(job.state),
            job.workflow,
            job.pointer
        );
    }
    Ok(())
}

fn cmd_catalog(ctx: &Context) -> Result<(), Box<dyn Error>> {
    for entry in ctx.store.list_entries()? {
        println!("{:<10} {}", entry.kind.to_string(), entry.path);
    }
    Ok(())
}

fn cmd_export(ctx: &Context, cli: &CliConfig) -> Result<(), Box<dyn Error>> {
    let [workflow, path] = cli.args.as_slice() else {
        return Err("export requires <WORKFLOW> <PATH>".into());
    };
    let definition = ctx
        .registry
        .workflow(workflow)
        .ok_or_else(|| format!("Workflow not found: {}", workflow))?;
    save_workflow(&definition, path)?;
    println!("Wrote {} to {}", workflow, path);
    Ok(())
}

/// Queues every job waiting for an execution attempt.
fn enqueue_dispatchable(store: &FileStore, queue: &dyn Queue) -> Result<usize, Box<dyn Error>> {
    let mut queued = 0;
    for job in store.list_jobs()? {
        if job.state.is_dispatchable() {
            queue.enqueue(job.id)?;
            queued += 1;
        }
    }
    Ok(queued)
}

async fn serve(ctx: &Context, cli: &CliConfig) -> Result<(), Box<dyn Error>> {
    let watchdog = ctx.watchdog();
    if cli.reset_watchdog {
        watchdog.reset()?;
    }
    if !watchdog.start()? {
        warn!("Catalog synchronization is handled by another process");
    }

    let pool = WorkerPool::spawn(ctx.engine.clone(), ctx.config.workers);
    let mut poll = tokio::time::interval(ctx.config.watchdog_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("Serving jobs from {} (Ctrl+C to stop)", ctx.config.state_dir.display());
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Shutting down");
                break;
            }
            _ = poll.tick() => {
                let restored = ctx.restore_workflows();
                if restored > 0 {
                    info!("Loaded {} stored workflow(s)", restored);
                }
                match enqueue_dispatchable(&ctx.store, &pool) {
                    Ok(0) => {}
                    Ok(n) => info!("Queued {} job(s)", n),
                    Err(e) => error!("Failed to poll jobs: {}", e),
                }
            }
        }
    }

    pool.shutdown().await;
    watchdog.stop()?;
    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let cli = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(cli.verbose);

    let Some(command) = cli.command.clone() else {
        print_usage();
        return Ok(());
    };

    print_banner();

    let config_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_path_buf());
    let mut config = EngineConfig::load(&config_path)?.with_module(demo::MODULE);
    if let Some(dir) = &cli.state_dir {
        config = config.with_state_dir(dir.clone());
    }
    if let Some(workers) = cli.workers {
        config.workers = workers.max(1);
    }

    let ctx = Context::open(config)?;

    // Serve syncs on its own schedule; every other command syncs once up front.
    if command != "serve" {
        let report = ctx.watchdog().sync_catalog();
        for reason in &report.rejected {
            warn!("Rejected definition: {}", reason);
        }
    }

    match command.as_str() {
        "run" => cmd_run(&ctx, &cli),
        "resume" => cmd_resume(&ctx, &cli),
        "status" => cmd_status(&ctx, &cli),
        "jobs" => cmd_jobs(&ctx),
        "catalog" => cmd_catalog(&ctx),
        "export" => cmd_export(&ctx, &cli),
        "serve" => tokio::runtime::Runtime::new()?.block_on(serve(&ctx, &cli)),
        other => Err(format!("Unknown command: {}", other).into()),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use waypoint::execution::Outcome;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("waypoint")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_command_and_options() {
        let cli = parse_arguments(&argv(&[
            "--state-dir",
            "/tmp/wp",
            "resume",
            "3",
            "file=/tmp/a",
            "--verbose",
        ]))
        .unwrap();

        assert_eq!(cli.command.as_deref(), Some("resume"));
        assert_eq!(cli.args, vec!["3", "file=/tmp/a"]);
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/wp")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_parse_rejects_unknown_option() {
        assert!(parse_arguments(&argv(&["--bogus"])).is_err());
        assert!(parse_arguments(&argv(&["serve", "--workers"])).is_err());
        assert!(parse_arguments(&argv(&["serve", "--workers", "many"])).is_err());
    }

    #[test]
    fn test_parse_input_values() {
        let input = parse_input(&[
            "file=/tmp/a.json".to_string(),
            "retries=3".to_string(),
            "dry=true".to_string(),
        ])
        .unwrap();
        assert_eq!(input, json!({"file": "/tmp/a.json", "retries": 3, "dry": true}));

        assert!(parse_input(&["novalue".to_string()]).is_err());
    }

    #[test]
    fn test_parse_job_id() {
        assert_eq!(parse_job_id(&["12".to_string()]).unwrap(), 12);
        assert!(parse_job_id(&[]).is_err());
        assert!(parse_job_id(&["x".to_string()]).is_err());
    }

    #[test]
    fn test_file_workflow_survives_restart() {
        let temp_dir = tempdir().unwrap();
        let flow = temp_dir.path().join("flow.yaml");
        fs::write(
            &flow,
            "name: Upload\ngraph:\n  waypoint.steps.__start__: [demo.ValidateFileStep]\n",
        )
        .unwrap();
        let data = temp_dir.path().join("data.txt");
        fs::write(&data, "payload").unwrap();

        let config = || {
            EngineConfig::default()
                .with_module(demo::MODULE)
                .with_state_dir(temp_dir.path().join("state"))
        };

        let id = {
            let ctx = Context::open(config()).unwrap();
            let workflow = ctx.register_workflow_file(&flow).unwrap();
            assert_eq!(workflow, "Upload");

            let dispatcher = ctx.dispatcher(Arc::new(LocalQueue::new()));
            let id = dispatcher.execute_synchronously(&workflow).unwrap();
            assert_eq!(dispatcher.state(id).unwrap(), JobState::InputRequired);
            id
        };

        let ctx = Context::open(config()).unwrap();
        assert!(ctx.registry.workflow("Upload").is_some());
        assert_eq!(ctx.restore_workflows(), 0);

        let dispatcher = ctx.dispatcher(Arc::new(LocalQueue::new()));
        let outcome = dispatcher
            .provide_external_input_sync(id, json!({"file": data.to_str().unwrap()}))
            .unwrap();
        assert_eq!(outcome, Outcome::Finished);
    }

    #[test]
    fn test_invalid_stored_workflow_is_skipped() {
        let temp_dir = tempdir().unwrap();
        let config = EngineConfig::default()
            .with_module(demo::MODULE)
            .with_state_dir(temp_dir.path());
        fs::create_dir_all(config.workflows_dir()).unwrap();
        fs::write(
            config.workflows_dir().join("Broken.yaml"),
            "name: Broken\ngraph:\n  waypoint.steps.__start__: [demo.Missing]\n",
        )
        .unwrap();

        let ctx = Context::open(config).unwrap();
        assert!(ctx.registry.workflow("Broken").is_none());
        assert!(ctx.registry.workflow(demo::WORKFLOW).is_some());
    }
}
