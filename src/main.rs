use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use respawn::update::{PendingRelaunch, VersionRecord, BASELINE_VERSION};
use respawn::{Config, UpdateOutcome, Updater};

#[derive(Parser, Debug)]
#[command(name = "respawn", version)]
#[command(about = "Keep a standalone executable on its latest release", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Release metadata endpoint (overrides the config file)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Config file (defaults to ~/.config/respawn/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// File holding the installed version
    #[arg(long, global = true)]
    version_file: Option<PathBuf>,

    /// Executable to replace (defaults to this binary); restarting is only
    /// possible when it is this binary
    #[arg(long, global = true)]
    executable: Option<PathBuf>,

    /// Hide the download progress bar
    #[arg(long, global = true)]
    no_progress: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report whether a newer release is available
    Check,

    /// Download and install the latest release if it is newer
    Update {
        /// Restart the executable after installing
        #[arg(long)]
        restart: bool,
    },

    /// Install from an archive already on disk
    Install {
        /// .zip or .tar.gz archive (defaults to download/<os>_<arch>.gz)
        archive: Option<PathBuf>,

        /// Restart the executable after installing
        #[arg(long)]
        restart: bool,
    },

    /// Poll for new releases and install them as they appear
    Watch {
        /// Seconds between checks
        #[arg(long, default_value = "3600")]
        interval: u64,

        /// Restart the executable after each install
        #[arg(long)]
        restart: bool,
    },

    /// Print the installed version
    Current,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli)?;

    match cli.command {
        Command::Check => run_check_command(&build_updater(&cli, &config)?),
        Command::Update { restart } => run_update_command(&build_updater(&cli, &config)?, restart),
        Command::Install { ref archive, restart } => {
            run_install_command(&build_updater(&cli, &config)?, archive.clone(), restart)
        }
        Command::Watch { interval, restart } => {
            run_watch_command(&build_updater(&cli, &config)?, interval, restart)
        }
        Command::Current => run_current_command(&config),
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "respawn=debug" } else { "respawn=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(url) = &cli.api_url {
        config.api_url = Some(url.clone());
    }
    if let Some(path) = &cli.version_file {
        config.version_file = path.clone();
    }
    if cli.no_progress {
        config.show_progress = false;
    }

    Ok(config)
}

fn build_updater(cli: &Cli, config: &Config) -> Result<Updater> {
    let mut settings = config.to_settings()?;
    settings.executable = cli.executable.clone();
    Updater::new(settings).context("Failed to set up updater")
}

fn run_check_command(updater: &Updater) -> Result<()> {
    println!("{}", "Checking for updates...".cyan());
    let report = updater.check()?;

    if !report.newer {
        println!(
            "{} You're running the latest version ({})",
            "✓".green(),
            report.local
        );
        return Ok(());
    }

    println!(
        "{} New version available: {} → {}",
        "↑".yellow(),
        report.local.dimmed(),
        report.release.tag_name.green()
    );
    if let Some(published) = report.release.published_at {
        println!("  Published {}", published.format("%Y-%m-%d %H:%M UTC"));
    }
    if let Some(notes) = report.release.notes() {
        println!("\n{}", "Release notes:".cyan());
        println!("{}\n", notes.dimmed());
    }

    match report.asset {
        Some(asset) => {
            println!("  Asset: {}", asset.name);
            println!("  Run `respawn update` to install");
        }
        None => println!(
            "{} No asset for {} in this release",
            "!".yellow(),
            updater.settings().platform
        ),
    }

    Ok(())
}

fn run_update_command(updater: &Updater, restart: bool) -> Result<()> {
    println!("{}", "Checking for updates...".cyan());

    match updater
        .check_and_update(restart)
        .context("Failed to install update")?
    {
        UpdateOutcome::UpToDate { local, .. } => {
            println!(
                "{} You're running the latest version ({})",
                "✓".green(),
                local
            );
        }
        UpdateOutcome::NoMatchingAsset { latest, platform } => {
            println!(
                "{} {} has no asset for {}, nothing to do",
                "!".yellow(),
                latest,
                platform
            );
        }
        UpdateOutcome::Updated { from, to, relaunch } => {
            println!(
                "\n{} Updated {} → {}",
                "✓".green(),
                from.dimmed(),
                to.green()
            );
            if let Some(pending) = relaunch {
                await_relaunch(pending);
            }
        }
    }

    Ok(())
}

fn run_install_command(updater: &Updater, archive: Option<PathBuf>, restart: bool) -> Result<()> {
    println!("{}", "Installing...".cyan());

    let relaunch = updater
        .install_archive(archive.as_deref(), restart)
        .context("Failed to install archive")?;
    println!("{} Installed", "✓".green());

    if let Some(pending) = relaunch {
        await_relaunch(pending);
    }
    Ok(())
}

fn run_watch_command(updater: &Updater, interval: u64, restart: bool) -> Result<()> {
    let interval = Duration::from_secs(interval.max(1));
    println!(
        "{} Watching {} every {}s",
        "●".cyan(),
        updater.settings().api_url,
        interval.as_secs()
    );

    loop {
        match updater.check_and_update(restart) {
            Ok(UpdateOutcome::Updated { to, relaunch, .. }) => {
                println!("{} Updated to {}", "✓".green(), to.green());
                if let Some(pending) = relaunch {
                    await_relaunch(pending);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Update check failed: {}", e),
        }
        thread::sleep(interval);
    }
}

fn run_current_command(config: &Config) -> Result<()> {
    let record = VersionRecord::new(config.version_file.clone());
    match record.load()? {
        Some(version) => println!("{}", version),
        None => println!(
            "{} (no version recorded in {})",
            BASELINE_VERSION,
            record.path().display().to_string().dimmed()
        ),
    }
    Ok(())
}

/// The relaunch exits this process once the new one has started
fn await_relaunch(pending: PendingRelaunch) {
    println!(
        "{} Restarting in {:.0}s...",
        "→".yellow(),
        pending.remaining().as_secs_f32()
    );
    pending.wait();
}
