use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workshopsync::app::{DependencyChoice, Reporter};
use workshopsync::error;
use workshopsync::queue::EventSender;
use workshopsync::{App, Config};

#[derive(Parser)]
#[command(name = "workshopsync")]
#[command(
    author,
    version,
    about = "Download, deploy and update Steam Workshop mods without the Steam client"
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage game profiles
    Game {
        #[command(subcommand)]
        action: GameCommands,
    },

    /// Manage workshop mods
    Mod {
        #[command(subcommand)]
        action: ModCommands,
    },

    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Start the game from its install directory
    Launch,

    /// Show engine status (game, tool, cache)
    #[command(alias = "doctor")]
    Status,
}

#[derive(Subcommand)]
enum GameCommands {
    /// List game profiles
    List,
    /// Detect installed games and remember their paths
    Detect,
    /// Select the active game
    Select { name: String },
    /// Show active game info
    Info,
    /// Set the install directory of a game
    SetPath { game: String, path: String },
}

#[derive(Subcommand)]
enum ModCommands {
    /// List cached mods with deployment and update state
    List {
        /// Skip workshop page lookups
        #[arg(long)]
        no_fetch: bool,
    },
    /// Show details for one mod
    Info { id: String },
    /// Download and deploy mods by id or workshop URL
    #[command(group(ArgGroup::new("deps").args(["with_deps", "no_deps"])))]
    Install {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Also install missing required items without asking
        #[arg(long)]
        with_deps: bool,
        /// Never install required items
        #[arg(long)]
        no_deps: bool,
    },
    /// Deploy cached mods into the game
    Enable {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Remove deployed mods from the game
    Disable {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Re-download mods with newer workshop versions
    Update {
        ids: Vec<String>,
        /// Consider every cached mod
        #[arg(long)]
        all: bool,
        /// Update even when the local copy looks current
        #[arg(long)]
        force: bool,
    },
    /// Delete mods from the game and the cache
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// List items a mod requires
    Deps { id: String },
    /// Open the workshop page in a browser
    Open { id: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set the steamcmd executable (empty to auto-detect)
    SetSteamcmd { path: String },
    /// Set the download cache directory (empty for default)
    SetCache { path: String },
    /// Set deployment method: link, copy
    SetMethod { method: String },
    /// Toggle extra output
    SetAdvanced {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

fn setup_logging(verbosity: u8, also_stderr: bool) {
    let filter = match verbosity {
        0 => "workshopsync=info",
        1 => "workshopsync=debug",
        2 => "workshopsync=trace",
        _ => "trace",
    };

    let log_dir = std::env::var_os("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".workshopsync");

    std::fs::create_dir_all(&log_dir).ok();
    let log_file = log_dir.join("workshopsync.log");

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
    let file_layer = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .map_err(|e| eprintln!("Could not open {}: {}", log_file.display(), e))
        .ok()
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(std::sync::Arc::new(file))
        });
    let stderr_layer = also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
}

async fn run_command(app: App, command: Commands) -> Result<()> {
    match command {
        Commands::Game { action } => match action {
            GameCommands::List => app.cmd_game_list().await,
            GameCommands::Detect => app.cmd_game_detect().await,
            GameCommands::Select { name } => app.cmd_game_select(&name).await,
            GameCommands::Info => app.cmd_game_info().await,
            GameCommands::SetPath { game, path } => app.cmd_game_set_path(&game, &path).await,
        },
        Commands::Mod { action } => match action {
            ModCommands::List { no_fetch } => app.cmd_mod_list(!no_fetch).await,
            ModCommands::Info { id } => app.cmd_mod_info(&id).await,
            ModCommands::Install {
                ids,
                with_deps,
                no_deps,
            } => {
                let deps = if with_deps {
                    DependencyChoice::Include
                } else if no_deps {
                    DependencyChoice::Skip
                } else {
                    DependencyChoice::Ask
                };
                app.cmd_mod_install(&ids, deps).await
            }
            ModCommands::Enable { ids } => app.cmd_mod_enable(&ids).await,
            ModCommands::Disable { ids } => app.cmd_mod_disable(&ids).await,
            ModCommands::Update { ids, all, force } => app.cmd_mod_update(&ids, all, force).await,
            ModCommands::Delete { ids, yes } => app.cmd_mod_delete(&ids, yes).await,
            ModCommands::Deps { id } => app.cmd_mod_deps(&id).await,
            ModCommands::Open { id } => app.cmd_mod_open(&id).await,
        },
        Commands::Config { action } => match action {
            ConfigCommands::Show => app.cmd_config_show().await,
            ConfigCommands::SetSteamcmd { path } => app.cmd_config_set_steamcmd(&path).await,
            ConfigCommands::SetCache { path } => app.cmd_config_set_cache(&path).await,
            ConfigCommands::SetMethod { method } => app.cmd_config_set_method(&method).await,
            ConfigCommands::SetAdvanced { enabled } => app.cmd_config_set_advanced(enabled).await,
        },
        Commands::Launch => app.cmd_launch().await,
        Commands::Status => app.cmd_status().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.verbose > 0);

    let config = Config::load().await?;
    let advanced = config.advanced_mode;

    let (events, rx) = EventSender::channel();
    let root = CancellationToken::new();

    // Ctrl-C cancels outstanding work; the command then finishes on its own
    let interrupt = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling running tasks");
            interrupt.cancel();
        }
    });

    let app = App::new(config, events, root).await?;
    let reporter = Reporter::new(rx, advanced);

    // The app (and with it every event sender) is dropped when the command
    // returns, which lets the reporter drain and stop.
    let (result, ()) = tokio::join!(run_command(app, cli.command), reporter.run());

    if let Err(e) = result {
        let category = error::categorize(&e);
        eprintln!("Error: {:#}", e);
        tracing::error!(
            "{} error: {:#}",
            category.map(|c| c.as_str()).unwrap_or("unexpected"),
            e
        );
        if category.is_some_and(|c| c.is_fatal_to_action()) {
            std::process::exit(2);
        }
    }
    Ok(())
}
