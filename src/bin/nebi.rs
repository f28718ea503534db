// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use nebi::{
    config::Config,
    credentials::{Credential, CredentialStore},
    drift::BaselineSource,
    path::default_config_dir,
    pull::{pull, PullOptions},
    remote::{fetch, find_environment, NebiClient, Remote},
    repair,
    resolve::{absolutize, resolve, validate_name, Reference, Resolution, Tag, Target},
    sidecar,
    snapshot::{self, SnapshotStore, SpecSource},
    store::{Index, IndexStore},
    workspace::{self, CommitOutcome},
    Error,
};

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, InquireError, Password, Text};
use std::{
    env,
    fs,
    future::Future,
    path::{Path, PathBuf},
    process::exit,
    time::Duration,
};
use tempfile::TempDir;
use tokio::{runtime::Handle, signal, task};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "nebi [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let ctx = Context::open()?;
        match self.command {
            Command::Init(opts) => run_init(&ctx, opts),
            Command::Commit => run_commit(&ctx),
            Command::Status(opts) => run_status(&ctx, opts),
            Command::Diff(opts) => run_diff(&ctx, opts).await,
            Command::Pull(opts) => run_pull(&ctx, opts).await,
            Command::Workspace(cmd) => run_workspace(&ctx, cmd).await,
            Command::Repair(opts) => run_repair(&ctx, opts),
            Command::Server(cmd) => run_server(&ctx, cmd),
            Command::Login(opts) => run_login(&ctx, opts).await,
            Command::Logout(opts) => run_logout(&ctx, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Track current directory as a workspace.
    #[command(override_usage = "nebi init [options]")]
    Init(InitOptions),

    /// Snapshot spec files of current workspace.
    #[command(override_usage = "nebi commit")]
    Commit,

    /// Show drift of a workspace against its origin.
    #[command(override_usage = "nebi status [<workspace>]")]
    Status(StatusOptions),

    /// Show differences between two spec sources.
    #[command(override_usage = "nebi diff [options] [<ref_a> [<ref_b>]]")]
    Diff(DiffOptions),

    /// Pull spec:tag reference from a server.
    #[command(override_usage = "nebi pull [options] <spec:tag>")]
    Pull(PullArgs),

    /// Manage tracked workspaces.
    #[command(subcommand)]
    Workspace(WorkspaceCommand),

    /// Reconcile index after workspaces were moved or deleted.
    #[command(override_usage = "nebi repair [options]")]
    Repair(RepairOptions),

    /// Manage registered servers.
    #[command(subcommand)]
    Server(ServerCommand),

    /// Store credential for a server.
    #[command(override_usage = "nebi login [options] [<server>]")]
    Login(LoginOptions),

    /// Forget credential for a server.
    #[command(override_usage = "nebi logout [<server>]")]
    Logout(LogoutOptions),
}

#[derive(Debug, Clone, Subcommand)]
enum WorkspaceCommand {
    /// List tracked workspaces, or environments of a server.
    #[command(override_usage = "nebi workspace list [options]")]
    List(ServerOption),

    /// Copy current workspace into a new global workspace.
    #[command(override_usage = "nebi workspace promote <name>")]
    Promote(PromoteOptions),

    /// Stop tracking a workspace, or delete an environment of a server.
    #[command(override_usage = "nebi workspace remove [options] <name_or_path>")]
    Remove(WorkspaceRemoveOptions),

    /// Forget workspaces whose directory no longer exists.
    #[command(override_usage = "nebi workspace prune")]
    Prune,
}

#[derive(Debug, Clone, Subcommand)]
enum ServerCommand {
    /// Register server under a short name.
    #[command(override_usage = "nebi server add <name> <url>")]
    Add(ServerAddOptions),

    /// List registered servers.
    #[command(override_usage = "nebi server list")]
    List,

    /// Forget registered server.
    #[command(override_usage = "nebi server remove <name>")]
    Remove(ServerNameOptions),

    /// Use server when a command names none.
    #[command(override_usage = "nebi server use <name>")]
    Use(ServerNameOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Name to track workspace under instead of the one in pixi.toml.
    #[arg(short, long, value_name = "name")]
    pub name: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StatusOptions {
    /// Workspace name, path, or spec:tag reference.
    #[arg(value_name = "workspace")]
    pub targets: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DiffOptions {
    /// Spec sources to compare: workspace names, paths, or spec:tag references.
    #[arg(value_name = "ref", num_args = 0..=3)]
    pub refs: Vec<String>,

    /// Compare pixi.lock as well.
    #[arg(long)]
    pub lock: bool,

    #[command(flatten)]
    pub server: ServerOption,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PullArgs {
    /// Reference to pull.
    #[arg(required = true, value_name = "spec:tag")]
    pub reference: String,

    #[command(flatten)]
    pub server: ServerOption,

    /// Pull into a global workspace owned by nebi.
    #[arg(short, long, conflicts_with = "path")]
    pub global: bool,

    /// Directory to pull into instead of the current one.
    #[arg(short, long, value_name = "dir")]
    pub path: Option<PathBuf>,

    /// Overwrite locally modified spec files.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Clone, Debug)]
struct ServerOption {
    /// Server short name or URL.
    #[arg(short, long, value_name = "server")]
    pub server: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PromoteOptions {
    /// Name of the new global workspace.
    #[arg(value_name = "name")]
    pub name: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct WorkspaceRemoveOptions {
    /// Workspace name or path, or environment name with --server.
    #[arg(required = true, value_name = "name_or_path")]
    pub target: String,

    #[command(flatten)]
    pub server: ServerOption,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RepairOptions {
    /// Only show what would change.
    #[arg(long)]
    pub dry_run: bool,

    /// Directory to scan instead of the current one and the global tree.
    #[arg(short, long, value_name = "path")]
    pub path: Option<String>,

    /// Apply changes without asking.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ServerAddOptions {
    #[arg(value_name = "name")]
    pub name: String,

    #[arg(value_name = "url")]
    pub url: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ServerNameOptions {
    #[arg(value_name = "name")]
    pub name: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct LoginOptions {
    /// Server short name or URL, the default server if omitted.
    #[arg(value_name = "server")]
    pub server: Option<String>,

    /// API token to store instead of logging in with a password.
    #[arg(short, long, value_name = "token")]
    pub token: Option<String>,

    /// Username to log in as.
    #[arg(short, long, value_name = "username")]
    pub username: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct LogoutOptions {
    /// Server short name or URL, the default server if omitted.
    #[arg(value_name = "server")]
    pub server: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr);
    let default_level = if cli.quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    // INVARIANT: Commands block on file locks, so they run off the runtime
    // workers. Interrupt must stay observable while a command waits, and the
    // process exits without ever resuming it.
    let handle = Handle::current();
    let command = task::spawn_blocking(move || handle.block_on(cli.run()));
    let result = tokio::select! {
        result = command => result.unwrap_or_else(|err| Err(anyhow!("command failed: {err}"))),
        _ = signal::ctrl_c() => Err(Error::Cancelled.into()),
    };

    if let Err(error) = result {
        eprintln!("Error: {error:#}");
        exit(1);
    }

    exit(0)
}

/// Everything a command needs, resolved once per invocation.
struct Context {
    config: Config,
    config_dir: PathBuf,
    store: IndexStore,
    snapshots: SnapshotStore,
    credentials: CredentialStore,
    cwd: PathBuf,
}

impl Context {
    fn open() -> Result<Self> {
        let config_dir = default_config_dir()?;
        let config = Config::load(&config_dir)?;
        let store = IndexStore::open(config.resolve_data_dir()?)?;
        let snapshots = SnapshotStore::new(store.data_dir());
        let credentials = CredentialStore::open(config_dir.clone());
        let cwd = env::current_dir()?;

        Ok(Self {
            config,
            config_dir,
            store,
            snapshots,
            credentials,
            cwd,
        })
    }

    /// URL of named server, falling back to the default server.
    fn server_url(&self, server: Option<&str>) -> Result<String> {
        let server = server
            .or(self.config.default_server.as_deref())
            .ok_or_else(|| Error::NotFound {
                what: "server",
                name: "no server given and no default set, see `nebi server use`".into(),
            })?;

        Ok(self.store.load()?.server_url(server)?)
    }

    /// Authenticated client for server URL.
    fn client(&self, url: &str) -> Result<NebiClient> {
        let credential = self.credentials.require(url)?;
        Ok(NebiClient::new(url, Some(credential.token), &self.config.remote)?)
    }
}

fn run_init(ctx: &Context, opts: InitOptions) -> Result<()> {
    let workspace = workspace::init(&ctx.store, &ctx.cwd, opts.name.as_deref())?;
    println!("tracking {} as {}", workspace.path.display(), workspace.name);

    Ok(())
}

fn run_commit(ctx: &Context) -> Result<()> {
    match workspace::commit(&ctx.store, &ctx.snapshots, &ctx.cwd)? {
        CommitOutcome::Committed => println!("committed {}", ctx.cwd.display()),
        CommitOutcome::OriginAuthoritative => {}
    }

    Ok(())
}

fn run_status(ctx: &Context, opts: StatusOptions) -> Result<()> {
    let index = ctx.store.load()?;
    let (first, rest) = split_first(&opts.targets);
    let resolution = resolve(first, rest, &index, &ctx.cwd)?;

    let dirs = match resolution.dir() {
        Some(dir) => vec![dir.to_path_buf()],
        None => {
            let reference = reference_of(&resolution)?;
            let tag = reference.tag_name().unwrap_or_default();
            let dirs: Vec<_> = index
                .find_by_tag(&reference.spec, tag)
                .into_iter()
                .map(|entry| entry.path.clone())
                .collect();
            if dirs.is_empty() {
                return Err(Error::NotFound {
                    what: "pulled workspace",
                    name: reference.to_string(),
                }
                .into());
            }
            dirs
        }
    };

    for dir in dirs {
        let report = snapshot::status(&index, &ctx.snapshots, &dir);
        match index.find_by_path(&dir) {
            Some(workspace) => println!("workspace: {} ({})", workspace.name, workspace.kind),
            None => println!("workspace: untracked"),
        }
        println!("path:      {}", dir.display());
        println!("origin:    {}", describe_origin(&index, &dir, report.source));
        for file in &report.files {
            println!("  {:<10} {}", file.name, file.status);
        }
        println!("status:    {}", report.status);
    }

    Ok(())
}

fn describe_origin(index: &Index, dir: &Path, source: Option<BaselineSource>) -> String {
    match source {
        Some(BaselineSource::Sidecar) => match sidecar::read_any(dir) {
            Ok(Some(sidecar)) => format!(
                "{}:{} from {}",
                sidecar.origin.spec_name, sidecar.origin.version_name, sidecar.origin.server_url
            ),
            _ => "sidecar".into(),
        },
        Some(BaselineSource::Entry) => match index.latest_entry(dir) {
            Some(entry) => format!("{}:{} (index)", entry.spec_name, entry.version_name),
            None => "index".into(),
        },
        Some(BaselineSource::Snapshot) => "last commit".into(),
        None => "none, run `nebi commit` first".into(),
    }
}

async fn run_diff(ctx: &Context, opts: DiffOptions) -> Result<()> {
    let index = ctx.store.load()?;
    let mut resolutions = Vec::new();
    let mut args = opts.refs.clone();
    while !args.is_empty() {
        let resolution = resolve(Some(args[0].as_str()), &args[1..], &index, &ctx.cwd)?;
        args = resolution.rest.clone();
        resolutions.push(resolution);
    }
    if resolutions.len() > 2 {
        return Err(Error::Malformed {
            what: "diff arguments".into(),
            reason: "expected at most two spec sources".into(),
        }
        .into());
    }

    let server = opts.server.server.as_deref();
    let mut sources = Vec::new();
    for resolution in &resolutions {
        sources.push(load_source(ctx, resolution, server).await?);
    }

    let (old, new) = match sources.len() {
        0 => (baseline_source(ctx).await?, SpecSource::from_dir("working tree", &ctx.cwd)?),
        1 => (sources.remove(0), SpecSource::from_dir("working tree", &ctx.cwd)?),
        _ => {
            let new = sources.remove(1);
            (sources.remove(0), new)
        }
    };

    print!("{}", snapshot::diff(&old, &new, opts.lock));
    Ok(())
}

async fn load_source(ctx: &Context, resolution: &Resolution, server: Option<&str>) -> Result<SpecSource> {
    if let Some(dir) = resolution.dir() {
        return Ok(SpecSource::from_dir(dir.display().to_string(), dir)?);
    }

    let url = match &resolution.target {
        Target::Server { url, .. } => url.clone(),
        _ => ctx.server_url(server)?,
    };
    fetch_source(ctx, &url, reference_of(resolution)?).await
}

/// Origin of the current workspace: its remote origin when pulled, else its
/// last commit.
async fn baseline_source(ctx: &Context) -> Result<SpecSource> {
    if let Some(sidecar) = sidecar::read_any(&ctx.cwd)? {
        let reference = Reference {
            spec: sidecar.origin.spec_name.clone(),
            tag: Tag::Name(sidecar.origin.version_name.clone()),
        };
        return fetch_source(ctx, &sidecar.origin.server_url, &reference).await;
    }

    let workspace = ctx
        .store
        .find_by_path(&ctx.cwd)?
        .ok_or_else(|| Error::NotFound {
            what: "workspace",
            name: ctx.cwd.display().to_string(),
        })?;
    Ok(SpecSource::from_snapshot(&ctx.snapshots, workspace.id)?)
}

/// Fetch reference into a temporary directory and load it from there.
async fn fetch_source(ctx: &Context, url: &str, reference: &Reference) -> Result<SpecSource> {
    let client = ctx.client(url)?;
    let fetched = with_spinner(
        format!("fetching {reference}"),
        fetch(&client, reference, ctx.config.remote.workers),
    )
    .await?;

    let scratch = TempDir::new()?;
    for (name, bytes) in &fetched.files {
        fs::write(scratch.path().join(name), bytes)?;
    }

    Ok(SpecSource::from_dir(reference.to_string(), scratch.path())?)
}

async fn run_pull(ctx: &Context, opts: PullArgs) -> Result<()> {
    let reference: Reference = opts.reference.parse()?;
    let url = ctx.server_url(opts.server.server.as_deref())?;
    let client = ctx.client(&url)?;
    let options = PullOptions {
        dir: if opts.global {
            None
        } else {
            Some(absolutize(&ctx.cwd, opts.path.unwrap_or_default()))
        },
        global: opts.global,
        force: opts.force,
        workers: ctx.config.remote.workers,
    };

    let pulled = with_spinner(
        format!("pulling {reference}"),
        pull(&ctx.store, &client, &reference, &options),
    )
    .await?;

    if pulled.reused {
        info!("reusing global workspace {:?}", pulled.workspace.path.display());
    }
    println!("pulled {reference} into {}", pulled.workspace.path.display());

    Ok(())
}

async fn run_workspace(ctx: &Context, cmd: WorkspaceCommand) -> Result<()> {
    match cmd {
        WorkspaceCommand::List(opts) => match opts.server {
            Some(server) => {
                let url = ctx.server_url(Some(&server))?;
                let client = ctx.client(&url)?;
                let environments = with_spinner(format!("listing {url}"), client.list_environments()).await?;
                for environment in environments {
                    let owner = environment
                        .owner
                        .map(|owner| owner.username)
                        .unwrap_or_else(|| "-".into());
                    println!(
                        "{:<24} {:<10} {:<16} {}",
                        environment.name,
                        environment.status,
                        owner,
                        environment.updated_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
            None => {
                for listed in workspace::list(&ctx.store, &ctx.snapshots)? {
                    println!(
                        "{:<24} {:<7} {:<10} {}",
                        listed.workspace.name,
                        listed.workspace.kind.to_string(),
                        listed.status.to_string(),
                        listed.workspace.path.display()
                    );
                }
            }
        },
        WorkspaceCommand::Promote(opts) => {
            let workspace = workspace::promote(&ctx.store, &ctx.snapshots, &ctx.cwd, &opts.name)?;
            println!("promoted {} into {}", ctx.cwd.display(), workspace.path.display());
        }
        WorkspaceCommand::Remove(opts) => match opts.server.server {
            Some(server) => {
                validate_name(&opts.target)?;
                let url = ctx.server_url(Some(&server))?;
                let client = ctx.client(&url)?;
                let environment = find_environment(&client, &opts.target).await?;
                client.delete_environment(&environment.id).await?;
                println!("deleted {} from {url}", environment.name);
            }
            None => {
                let index = ctx.store.load()?;
                let resolution = resolve(Some(opts.target.as_str()), &[], &index, &ctx.cwd)?;
                let dir = resolution.dir().ok_or_else(|| Error::Malformed {
                    what: format!("workspace {:?}", opts.target),
                    reason: "expected a workspace name or path".into(),
                })?;
                let workspace = workspace::remove(&ctx.store, &ctx.snapshots, dir)?;
                println!("removed {}", workspace.path.display());
            }
        },
        WorkspaceCommand::Prune => {
            let removed = workspace::prune(&ctx.store, &ctx.snapshots)?;
            if removed.is_empty() {
                println!("nothing to prune");
            }
            for workspace in removed {
                println!("removed {}", workspace.path.display());
            }
        }
    }

    Ok(())
}

fn run_repair(ctx: &Context, opts: RepairOptions) -> Result<()> {
    let roots = match opts.path {
        Some(path) => {
            let expanded = shellexpand::full(&path)?.into_owned();
            vec![absolutize(&ctx.cwd, expanded)]
        }
        None => repair::default_roots(&ctx.store, &ctx.cwd),
    };

    let found = repair::scan(&roots, repair::MAX_DEPTH);
    let plan = repair::plan(&ctx.store.load()?, &ctx.store.envs_dir(), &found);
    print!("{plan}");

    if !plan.has_changes() {
        println!("nothing to repair");
        return Ok(());
    }

    if opts.dry_run {
        return Ok(());
    }

    if !opts.yes {
        let confirmed = Confirm::new("apply these changes?")
            .with_default(false)
            .prompt()
            .map_err(prompt_error)?;
        if !confirmed {
            warn!("repair aborted, index left untouched");
            return Ok(());
        }
    }

    let applied = repair::apply(&ctx.store, &plan)?;
    println!("applied {applied} changes");

    Ok(())
}

fn run_server(ctx: &Context, cmd: ServerCommand) -> Result<()> {
    match cmd {
        ServerCommand::Add(opts) => {
            validate_name(&opts.name)?;
            if !(opts.url.starts_with("http://") || opts.url.starts_with("https://")) {
                return Err(Error::Malformed {
                    what: format!("server url {:?}", opts.url),
                    reason: "expected http:// or https:// URL".into(),
                }
                .into());
            }

            let url = opts.url.trim_end_matches('/').to_string();
            ctx.store.update(|index| index.add_server(&opts.name, &url))?;
            println!("added server {} at {url}", opts.name);
        }
        ServerCommand::List => {
            let index = ctx.store.load()?;
            let default = ctx.config.default_server.as_deref();
            for (name, url) in &index.servers {
                let marker = if Some(name.as_str()) == default { "*" } else { " " };
                println!("{marker} {name:<16} {url}");
            }
        }
        ServerCommand::Remove(opts) => {
            let url = ctx.store.update(|index| index.remove_server(&opts.name))?;
            if ctx.config.default_server.as_deref() == Some(opts.name.as_str()) {
                let mut config = ctx.config.clone();
                config.default_server = None;
                config.save(&ctx.config_dir)?;
            }
            println!("removed server {} at {url}", opts.name);
        }
        ServerCommand::Use(opts) => {
            ctx.store.load()?.server_url(&opts.name)?;
            let mut config = ctx.config.clone();
            config.default_server = Some(opts.name.clone());
            config.save(&ctx.config_dir)?;
            println!("using server {}", opts.name);
        }
    }

    Ok(())
}

async fn run_login(ctx: &Context, opts: LoginOptions) -> Result<()> {
    let url = ctx.server_url(opts.server.as_deref())?;

    let credential = match opts.token {
        Some(token) => Credential {
            token,
            username: opts.username.unwrap_or_default(),
        },
        None => {
            let username = match opts.username {
                Some(username) => username,
                None => Text::new("username").prompt().map_err(prompt_error)?,
            };
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .map_err(prompt_error)?;

            let client = NebiClient::new(&url, None, &ctx.config.remote)?;
            let response = with_spinner(format!("logging in to {url}"), client.login(&username, &password)).await?;
            Credential {
                token: response.token,
                username: response.username,
            }
        }
    };

    let username = credential.username.clone();
    ctx.credentials.store(&url, credential)?;
    println!("logged in to {url} as {username}");

    Ok(())
}

fn run_logout(ctx: &Context, opts: LogoutOptions) -> Result<()> {
    let url = ctx.server_url(opts.server.as_deref())?;
    ctx.credentials.forget(&url)?;
    println!("logged out of {url}");

    Ok(())
}

fn split_first(args: &[String]) -> (Option<&str>, &[String]) {
    match args.split_first() {
        Some((first, rest)) => (Some(first.as_str()), rest),
        None => (None, &[]),
    }
}

fn reference_of(resolution: &Resolution) -> Result<&Reference> {
    match &resolution.target {
        Target::Reference(reference) | Target::Server { reference, .. } => Ok(reference),
        _ => Err(Error::Malformed {
            what: "argument".into(),
            reason: "expected a spec:tag reference".into(),
        }
        .into()),
    }
}

fn prompt_error(err: InquireError) -> anyhow::Error {
    match err {
        InquireError::OperationCanceled | InquireError::OperationInterrupted => Error::Cancelled.into(),
        err => err.into(),
    }
}

/// Run future while showing a spinner on stderr.
async fn with_spinner<T>(message: String, future: impl Future<Output = T>) -> T {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{elapsed_precise:.green}  {spinner:.yellow} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    let output = future.await;
    bar.finish_and_clear();
    output
}
