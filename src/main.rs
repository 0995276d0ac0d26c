//! tflow CLI - workflow scheduler console client

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Command as Process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use colored::{ColoredString, Colorize};
use parking_lot::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tflow::config::{find_cdp_in_path, LoggingConfig};
use tflow::logs::read_to_tempfile;
use tflow::{
    CdpBackend, Credentials, DemoBackend, FixSuggestion, FlowBackend, FlowCommand, FlowEvent, FlowInterface,
    FlowStatus, NodeId, Observer, SmsRc, TflowConfig, TflowError,
};

#[derive(Parser)]
#[command(name = "tflow")]
#[command(about = "tflow - text-based workflow scheduler client")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    target: Target,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Use the offline demo backend
    #[arg(long, global = true)]
    demo: bool,

    /// Path to the cdp executable (default: config, then $PATH)
    #[arg(long, global = true)]
    cdp: Option<String>,

    /// Scheduler server
    #[arg(long, global = true)]
    server: Option<String>,

    /// Scheduler user (default: config, then $USER)
    #[arg(long, global = true)]
    user: Option<String>,

    /// Suite to work on (default: config, then the user name)
    #[arg(long, global = true)]
    suite: Option<String>,

    /// Credentials file (default: ~/.smsrc)
    #[arg(long, global = true)]
    smsrc: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the root nodes of the suite
    Roots,

    /// Print the full status tree of a root node
    Status {
        root: String,

        /// Dump the tree as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a control command (rerun, execute, suspend, resume, complete, requeue, cancel)
    Command {
        name: String,
        root: String,

        /// Node paths relative to the root node (the root itself if none)
        paths: Vec<String>,
    },

    /// Print the extra information of a node
    Info { root: String, path: String },

    /// List (or fetch) the log files of a task
    Logs {
        root: String,
        path: String,

        /// Print this log file
        #[arg(long)]
        get: Option<String>,

        /// Open this log file in the configured viewer
        #[arg(long, conflicts_with = "get")]
        view: Option<String>,
    },

    /// Refresh a root node periodically and report changes
    Watch {
        root: String,

        /// Refresh interval in seconds (default: flow.min_refresh_interval_secs)
        #[arg(long)]
        interval: Option<u64>,

        /// Stop after this many refreshes
        #[arg(long)]
        count: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match TflowConfig::load() {
        Ok(config) => {
            init_logging(&config.logging);
            run(cli, config).await
        }
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.downcast_ref::<TflowError>().and_then(|e| e.fix_suggestion()) {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(logging.filter()).unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let file = logging
        .log_file()
        .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok());
    match file {
        Some(file) => builder.with_writer(std::sync::Mutex::new(file)).with_ansi(false).init(),
        None => builder.with_writer(std::io::stderr).init(),
    }
}

async fn run(cli: Cli, config: TflowConfig) -> Result<()> {
    let mut flow = open_flow(&cli.target, &config)?;

    match cli.command {
        Commands::Roots => {
            let roots = flow.tree_roots()?;
            for root in roots.children() {
                println!("{} {}", status_label(root.status()), root.name());
            }
        }
        Commands::Status { root, json } => {
            let tree = flow.full_status(&root)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tree.to_json(NodeId::ROOT))?);
            } else {
                println!("{}", tree);
            }
        }
        Commands::Command { name, root, paths } => {
            let command: FlowCommand = name.parse()?;
            if !flow.tree_roots()?.contains(&root) {
                return Err(TflowError::UnknownRoot { path: root }.into());
            }
            let paths = if paths.is_empty() { vec![String::new()] } else { paths };
            let outcome = flow.command_gateway(command, &root, &paths)?;
            println!("{}", outcome.output);
            if !outcome.ok {
                bail!("'{}' failed on {}", command, root);
            }
        }
        Commands::Info { root, path } => {
            for info in flow.node_info(&root, &path)? {
                let editable = if info.is_editable() { "*" } else { " " };
                println!("{} {}", editable.cyan(), info);
            }
        }
        Commands::Logs { root, path, get, view } => {
            let gateway = flow
                .logs_gateway()?
                .ok_or_else(|| anyhow!("No log server is available for suite {}", flow.suite()))?;
            let task = flow.scheduler_path(&root, &path);
            if let Some(name) = get {
                print!("{}", gateway.read_to_string(&task, &name)?);
            } else if let Some(name) = view {
                let file = read_to_tempfile(gateway.as_ref(), &task, &name)?;
                let argv = config.ui.logviewer_argv(file.path());
                let (program, args) = argv.split_first().context("Empty ui.logviewer_command")?;
                let status = Process::new(program)
                    .args(args)
                    .status()
                    .with_context(|| format!("Failed to start the log viewer '{}'", program))?;
                if !status.success() {
                    warn!("The log viewer exited with {}", status);
                }
            } else {
                for file in gateway.list_files(&task)? {
                    println!("{} {}", file.modified.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(), file.name);
                }
            }
        }
        Commands::Watch { root, interval, count } => {
            let interval = interval
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.flow.min_refresh_interval())
                .max(Duration::from_secs(1));
            watch(flow, root, interval, count, config.session.idle_timeout()).await?;
            return Ok(());
        }
    }

    flow.close();
    Ok(())
}

fn open_flow(target: &Target, config: &TflowConfig) -> Result<FlowInterface> {
    let min_refresh = config.flow.min_refresh_interval();

    if target.demo {
        let suite = target.suite.clone().unwrap_or_else(|| "demo".to_string());
        let mut flow = FlowInterface::new(Arc::new(DemoBackend::new(suite)), min_refresh);
        flow.set_credentials(Credentials::new("", "", "", ""))?;
        return Ok(flow);
    }

    let cdp = target
        .cdp
        .clone()
        .or_else(|| config.cdp.path.clone())
        .or_else(|| find_cdp_in_path().map(|p| p.display().to_string()))
        .context("No cdp executable found: use --cdp or set cdp.path in the configuration")?;
    let host = target
        .server
        .clone()
        .or_else(|| config.cdp.host.clone())
        .context("No scheduler server given: use --server or set cdp.host in the configuration")?;
    let user = target
        .user
        .clone()
        .or_else(|| config.cdp.user.clone())
        .or_else(|| std::env::var("USER").ok())
        .context("No scheduler user given: use --user")?;
    let suite = target
        .suite
        .clone()
        .or_else(|| config.cdp.suite.clone())
        .unwrap_or_else(|| user.clone());

    let smsrc = SmsRc::load(target.smsrc.as_deref())?;
    let password = smsrc.password(&host, &user)?.to_string();

    let backend = CdpBackend::new(suite, config.session.session_config());
    let mut flow = FlowInterface::new(Arc::new(backend), min_refresh);
    flow.set_credentials(Credentials::new(cdp, host, user, password))?;
    info!("Connecting as {}", flow.credentials_summary());
    Ok(flow)
}

fn status_label(status: FlowStatus) -> ColoredString {
    let label = format!("[{}]", status);
    match status {
        FlowStatus::Aborted => label.red().bold(),
        FlowStatus::Submitted => label.cyan(),
        FlowStatus::Active => label.green(),
        FlowStatus::Queued => label.normal(),
        FlowStatus::Suspended => label.yellow(),
        FlowStatus::Complete => label.bright_yellow(),
        FlowStatus::Unknown => label.dimmed(),
    }
}

// ============================================================================
// WATCH
// ============================================================================

/// Prints one line per change event
struct EventPrinter;

impl Observer<FlowEvent> for EventPrinter {
    fn notify(&self, event: &FlowEvent) {
        let now = Local::now().format("%H:%M:%S").to_string();
        match event {
            FlowEvent::TreeRootsChanged => println!("{} tree roots changed", now.dimmed()),
            FlowEvent::FullStatusChanged { root } => println!("{} {} changed", now.dimmed(), root.bold()),
        }
    }
}

async fn watch(
    flow: FlowInterface,
    root: String,
    interval: Duration,
    count: Option<u64>,
    idle_timeout: Duration,
) -> Result<()> {
    let backend: Arc<dyn FlowBackend> = flow.backend().clone();
    let printer = Arc::new(EventPrinter);
    flow.subscribe(&printer);
    let flow = Arc::new(Mutex::new(flow));

    // Closes the scheduler session when nothing happened for a while
    let watchdog = {
        let backend = backend.clone();
        let period = (idle_timeout / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let backend = backend.clone();
                let _ = tokio::task::spawn_blocking(move || backend.close_if_idle(idle_timeout)).await;
            }
        })
    };

    let mut ticker = tokio::time::interval(interval);
    let mut done = 0;
    let result = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let flow = flow.clone();
                let root = root.clone();
                let refreshed = tokio::task::spawn_blocking(move || -> tflow::error::Result<String> {
                    let mut flow = flow.lock();
                    flow.refresh(&root, true)?;
                    let status = flow.full_status(&root)?.status();
                    Ok(status_summary(status, &flow, &root))
                })
                .await;
                match refreshed {
                    Ok(Ok(summary)) => println!("{}", summary),
                    Ok(Err(e)) => break Err(anyhow::Error::from(e)),
                    Err(e) => break Err(anyhow!("Refresh task failed: {}", e)),
                }
                done += 1;
                if count.is_some_and(|c| done >= c) {
                    break Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break Ok(());
            }
        }
    };

    watchdog.abort();
    let _ = tokio::task::spawn_blocking(move || backend.close()).await;
    result
}

fn status_summary(status: FlowStatus, flow: &FlowInterface, root: &str) -> String {
    let aborted = flow
        .cached_status(root)
        .map(|tree| {
            tree.walk()
                .into_iter()
                .filter(|id| tree.node(*id).status() == FlowStatus::Aborted && tree.node(*id).is_leaf())
                .count()
        })
        .unwrap_or(0);
    format!(
        "{} {} {} ({} aborted task(s))",
        Local::now().format("%H:%M:%S").to_string().dimmed(),
        status_label(status),
        root,
        aborted
    )
}
