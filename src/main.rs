mod app;
mod client;
mod config;
mod launcher;
mod logging;
mod presets;
mod ui;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use app::App;
use client::{HttpClient, SessionClient};
use config::Config;
use launcher::{
    build_submissions, launch_all, parse_amount, LauncherData, LauncherState, LauncherStep,
    Notice, ResourceField, SessionType, SubmissionContext,
};
use launcher::resources::ClusterMode;
use launcher::submission::LaunchResult;
use presets::TemplateStore;

#[derive(Parser)]
#[command(name = "session-launcher")]
#[command(author = "Mark Roboff")]
#[command(version)]
#[command(about = "A TUI to start compute sessions on a Backend.AI cluster")]
struct Cli {
    /// Manager endpoint, e.g. https://api.backend.ai
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Project (user group) to work in
    #[arg(short, long)]
    project: Option<String>,

    /// Path to an alternative config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available environments and their versions
    Images,

    /// List storage folders of the project
    Folders,

    /// List resource templates and what is left to allocate
    Presets,

    /// List sessions of the project
    Sessions,

    /// Start sessions without the TUI
    Launch(LaunchArgs),

    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        write: bool,
    },
}

#[derive(Args)]
struct LaunchArgs {
    /// Environment name or id (e.g. python, cr.backend.ai/stable/python)
    #[arg(short, long)]
    image: String,

    /// Version tag; the newest is used when omitted
    #[arg(short, long)]
    tag: Option<String>,

    /// Session name; generated when omitted
    #[arg(short, long)]
    name: Option<String>,

    /// Resource template to start from
    #[arg(long)]
    template: Option<String>,

    /// CPU cores per container
    #[arg(long)]
    cpu: Option<String>,

    /// Memory per container (GiB, or a size such as 512m)
    #[arg(long)]
    mem: Option<String>,

    /// Shared memory per container (GiB, or a size such as 512m)
    #[arg(long)]
    shmem: Option<String>,

    /// Accelerators per container as SLOT=AMOUNT, e.g. cuda.shares=0.5
    #[arg(long, value_name = "SLOT=AMOUNT")]
    accel: Option<String>,

    /// Folder to mount, optionally with an alias (repeatable)
    #[arg(short, long, value_name = "NAME[:ALIAS]")]
    mount: Vec<String>,

    /// Environment variable (repeatable)
    #[arg(short = 'E', long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Port to pre-open (repeatable)
    #[arg(long)]
    port: Vec<String>,

    /// Number of sessions to start
    #[arg(long)]
    count: Option<String>,

    /// Containers per session
    #[arg(long)]
    cluster_size: Option<String>,

    /// Spread the cluster over several agents
    #[arg(long)]
    multi_node: bool,

    /// Scaling group to start in
    #[arg(long)]
    scaling_group: Option<String>,

    /// Run as a batch session with this startup command
    #[arg(long, value_name = "COMMAND")]
    batch: Option<String>,

    /// Start time of a batch session (RFC 3339)
    #[arg(long, requires = "batch")]
    starts_at: Option<String>,

    /// Print the creation requests instead of sending them
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env();

    if let Some(ref endpoint) = cli.endpoint {
        config.connection.endpoint = endpoint.clone();
    }
    if let Some(ref project) = cli.project {
        config.project = project.clone();
    }

    if let Some(Commands::Config { write }) = cli.command {
        return cmd_config(&config, cli.config, write);
    }

    logging::init(&config.log_path)?;
    config.ensure_credentials()?;
    let client = HttpClient::new(&config.connection)?;

    match cli.command {
        Some(Commands::Images) => cmd_images(&client),
        Some(Commands::Folders) => cmd_folders(&config, &client),
        Some(Commands::Presets) => cmd_presets(&config, &client),
        Some(Commands::Sessions) => cmd_sessions(&config, &client),
        Some(Commands::Launch(args)) => cmd_launch(&config, &client, args),
        Some(Commands::Config { .. }) => Ok(()),
        None => run_tui(config, client),
    }
}

/// Guard that ensures terminal is restored on drop (even on panic)
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        // Best effort restoration - ignore errors since we may be panicking
        let _ = disable_raw_mode();
        let _ = execute!(
            io::stdout(),
            LeaveAlternateScreen,
            DisableMouseCapture,
            crossterm::cursor::Show
        );
    }
}

fn run_tui(config: Config, client: HttpClient) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;

    // Create guard AFTER setup so it only cleans up if setup succeeded
    let _guard = TerminalGuard;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config, Arc::new(client));

    // Run the app - guard will restore terminal even if this panics
    ui::run(&mut terminal, &mut app)
}

fn cmd_config(config: &Config, path: Option<PathBuf>, write: bool) -> Result<()> {
    if write {
        match path {
            Some(ref path) => config.save_to(path)?,
            None => config.save()?,
        }
        println!(
            "Configuration written to {:?}",
            path.unwrap_or_else(Config::config_file_path)
        );
        return Ok(());
    }

    let path = path.unwrap_or_else(Config::config_file_path);

    let mut shown = config.clone();
    if !shown.connection.secret_key.is_empty() {
        shown.connection.secret_key = "********".to_string();
    }
    println!("# {:?}", path);
    print!("{}", toml::to_string_pretty(&shown).context("Failed to serialize config")?);
    Ok(())
}

/// Look up the id of the configured project
fn resolve_project_id(config: &Config, client: &dyn SessionClient) -> Result<Option<String>> {
    let projects = client.list_projects()?;
    let id = projects
        .iter()
        .find(|p| p.name == config.project)
        .map(|p| p.id.clone());
    if id.is_none() {
        tracing::warn!(project = %config.project, "project not found among the keypair's projects");
    }
    Ok(id)
}

fn cmd_images(client: &dyn SessionClient) -> Result<()> {
    let images = client.list_images()?;
    let environments = launcher::EnvironmentSelector::from_images(&images);

    if environments.environments().is_empty() {
        println!("No installed environments found.");
        return Ok(());
    }

    let mut selector = environments.clone();
    for env in environments.environments() {
        selector.select_environment(&env.id);
        let versions: Vec<String> = selector.versions().iter().map(|v| v.label()).collect();
        println!("{:20} {}", env.short_name, env.id);
        println!("  {}", versions.join(", "));
    }

    println!();
    println!("Total: {} environments", environments.environments().len());
    Ok(())
}

fn cmd_folders(config: &Config, client: &dyn SessionClient) -> Result<()> {
    let project_id = resolve_project_id(config, client)?;
    let folders = client.list_vfolders(project_id.as_deref())?;

    if folders.is_empty() {
        println!("No folders in project {}", config.project);
        return Ok(());
    }

    println!("Folders in project {}:", config.project);
    println!();
    for folder in &folders {
        let note = if folder.is_automount() {
            "[automount]"
        } else if !folder.is_mountable() {
            "[unavailable]"
        } else {
            ""
        };
        println!(
            "  {:24} {:12} {:8} {:6} {}",
            folder.name, folder.host, folder.status, folder.permission, note
        );
    }
    Ok(())
}

fn cmd_presets(config: &Config, client: &dyn SessionClient) -> Result<()> {
    let snapshot = client.check_presets(&config.project, config.scaling_group.as_deref())?;
    let mut templates = TemplateStore::load(&config.templates_path);
    templates.merge_server(&snapshot.presets);

    println!("Templates:");
    for template in templates.list() {
        println!(
            "  {:16} {:8} {}{}",
            template.name,
            template.source.label(),
            template.summary(),
            if template.allocatable { "" } else { "  (not allocatable)" }
        );
    }

    println!();
    println!("Remaining in project {}:", config.project);
    let mut slots = vec!["cpu".to_string(), "mem".to_string()];
    slots.extend(snapshot.accelerator_slots());
    for slot in slots {
        let remaining = match snapshot.remaining(config.scaling_group.as_deref(), &slot) {
            Some(v) if slot == "mem" => launcher::format_gib(v / launcher::resources::GIB),
            Some(v) => format!("{}", v),
            None => "unlimited".to_string(),
        };
        println!("  {:16} {}", slot, remaining);
    }
    Ok(())
}

fn cmd_sessions(config: &Config, client: &dyn SessionClient) -> Result<()> {
    let project_id = resolve_project_id(config, client)?;
    let sessions = client.list_sessions(project_id.as_deref())?;

    if sessions.is_empty() {
        println!("No sessions in project {}", config.project);
        return Ok(());
    }

    for session in &sessions {
        println!(
            "  {:24} {:12} {:12} {}",
            session.name, session.status, session.session_type, session.image
        );
    }
    println!();
    println!("Total: {} sessions", sessions.len());
    Ok(())
}

/// Print a form notice the way the TUI shows it in the status bar
fn report(notice: Option<Notice>) {
    if let Some(notice) = notice {
        eprintln!("note: {}", notice);
    }
}

fn report_all(notices: Vec<Notice>) {
    for notice in notices {
        report(Some(notice));
    }
}

fn amount(field: ResourceField, input: &str) -> Result<f64> {
    parse_amount(field, input)
        .ok_or_else(|| anyhow::anyhow!("Invalid value {:?} for {}", input, field.label()))
}

/// Fill a launcher form from the command line
fn build_form(config: &Config, client: &dyn SessionClient, args: &LaunchArgs) -> Result<LauncherState> {
    let project_id = resolve_project_id(config, client)?;
    let data = LauncherData::load(client, &config.project, project_id.as_deref())
        .context("Failed to load launcher data")?;
    let mut state = LauncherState::new(data, config, TemplateStore::load(&config.templates_path));

    if !state.environments.select_by_name(&args.image) {
        anyhow::bail!("Environment '{}' not found", args.image);
    }
    report(state.refresh_limits());
    if let Some(ref tag) = args.tag {
        if !state.environments.select_version(tag) {
            anyhow::bail!("Version '{}' of {} not found", tag, args.image);
        }
        report(state.refresh_limits());
    }

    if let Some(ref sg) = args.scaling_group {
        if !state.scaling_groups.is_empty() && !state.scaling_groups.contains(sg) {
            anyhow::bail!("Scaling group '{}' is not available", sg);
        }
        state.scaling_group = Some(sg.clone());
        report(state.refresh_limits());
    }

    if let Some(ref name) = args.template {
        if state.templates.get(name).is_none() {
            anyhow::bail!("Template '{}' not found", name);
        }
        if let Some(notice) = state.apply_template(name) {
            if let Notice::TemplateNotAllocatable(_) = notice {
                anyhow::bail!("{}", notice);
            }
            report(Some(notice));
        }
    }

    let fields = [
        (ResourceField::Cpu, &args.cpu),
        (ResourceField::Memory, &args.mem),
        (ResourceField::SharedMemory, &args.shmem),
        (ResourceField::ClusterSize, &args.cluster_size),
        (ResourceField::SessionCount, &args.count),
    ];
    for (field, input) in fields {
        if let Some(input) = input {
            let value = amount(field, input)?;
            report_all(state.resources.set_requested(field, value));
        }
    }

    if let Some(ref accel) = args.accel {
        let (slot, count) = accel
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Expected SLOT=AMOUNT, got {:?}", accel))?;
        if !state.resources.limits.accelerators.contains_key(slot) {
            anyhow::bail!("Accelerator '{}' is not available", slot);
        }
        state.resources.request.accelerator_type = Some(slot.to_string());
        let value = amount(ResourceField::AcceleratorCount, count)?;
        report_all(state.resources.set_requested(ResourceField::AcceleratorCount, value));
    }

    if args.multi_node {
        state.resources.request.cluster_mode = ClusterMode::MultiNode;
    }

    for mount in &args.mount {
        let (name, alias) = match mount.split_once(':') {
            Some((name, alias)) => (name, Some(alias)),
            None => (mount.as_str(), None),
        };
        if !state.folders.available().iter().any(|f| f.name == name) {
            anyhow::bail!("Folder '{}' cannot be mounted", name);
        }
        match alias {
            // setting the alias selects the folder
            Some(alias) => state
                .folders
                .set_alias(name, alias)
                .map_err(|n| anyhow::anyhow!("{}", n))?,
            None if !state.folders.is_selected(name) => {
                if let Some(notice) = state.folders.toggle(name) {
                    anyhow::bail!("{}", notice);
                }
            }
            None => {}
        }
    }

    for assignment in &args.env {
        state
            .env_vars
            .push_assignment(assignment)
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    for port in &args.port {
        state.ports.add(port).map_err(|e| anyhow::anyhow!(e))?;
    }

    if let Some(ref command) = args.batch {
        state.session_type = SessionType::Batch;
        state.startup_command = command.clone();
        state.starts_at = args.starts_at.clone().unwrap_or_default();
    }
    if let Some(ref name) = args.name {
        state.session_name = name.clone();
    }

    state
        .validate_step(LauncherStep::Review)
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(state)
}

fn cmd_launch(config: &Config, client: &dyn SessionClient, args: LaunchArgs) -> Result<()> {
    let state = build_form(config, client, &args)?;
    let ctx = SubmissionContext {
        project: config.project.clone(),
        domain: config.connection.domain.clone(),
        enqueue_only: config.defaults.enqueue_only,
        max_wait_seconds: config.defaults.max_wait_seconds,
    };
    let submissions = build_submissions(&state, &ctx).map_err(|e| anyhow::anyhow!(e))?;

    if args.dry_run {
        println!("{}", serde_json::to_string_pretty(&submissions)?);
        return Ok(());
    }

    println!("Starting {} session(s) with {}...", submissions.len(), state.resources.summary());
    let report = launch_all(client, &submissions);
    for outcome in &report.outcomes {
        match &outcome.result {
            LaunchResult::Created { session_id, status } => println!(
                "  {:24} {} {}",
                outcome.name,
                status,
                session_id.as_deref().unwrap_or("")
            ),
            LaunchResult::Preparing => println!("  {:24} still preparing", outcome.name),
            LaunchResult::Failed(msg) => println!("  {:24} failed: {}", outcome.name, msg),
        }
    }
    println!("{}", report.summary());

    if !report.any_succeeded() {
        anyhow::bail!("No session was started");
    }
    Ok(())
}
