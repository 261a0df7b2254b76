use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use gokr_bots::Result;
use gokr_bots::bootery::BootRig;
use gokr_bots::config::{AutotestbootConfig, CliOverrides, ENV_GH_AUTH_TOKEN, PollerSettings};
use gokr_bots::github::GitHubClient;
use gokr_bots::logging::{self, LogFormat};
use gokr_bots::packer::Toolchain;
use gokr_bots::poller::{HardwareCycle, PollOutcome, Poller};
use gokr_bots::workspace::WorkDirs;

/// Test-boot the bot's kernel PRs on real hardware and mark them mergeable.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// TOML config file with an [autotestboot] table
    #[arg(long)]
    config: Option<PathBuf>,
    /// GitHub auth token for the bot account
    #[arg(long = "github-authtoken")]
    github_authtoken: Option<String>,
    /// Bootery URL
    #[arg(long)]
    bootery_url: Option<String>,
    /// URL of the bake instance
    #[arg(long)]
    bake_url: Option<String>,
    /// Time between polls for new PRs (e.g. 300, 90s, 5m)
    #[arg(long)]
    poll_interval: Option<String>,
    /// Go toolchain root (default: `go env GOROOT`)
    #[arg(long)]
    goroot: Option<PathBuf>,
    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.log_format)?;
    if let Err(e) = run(args) {
        error!("{e}");
        return Err(e);
    }
    Ok(())
}

fn settings(args: &Args) -> Result<PollerSettings> {
    let mut cfg = AutotestbootConfig::load(args.config.as_deref())?;
    cfg.apply(CliOverrides {
        auth_token: args.github_authtoken.clone(),
        bootery_url: args.bootery_url.clone(),
        bake_url: args.bake_url.clone(),
        poll_interval: args.poll_interval.clone(),
        goroot: args.goroot.clone(),
    });
    cfg.validate(std::env::var(ENV_GH_AUTH_TOKEN).ok())
}

fn run(args: Args) -> Result<()> {
    let settings = settings(&args)?;

    let dirs = WorkDirs::from_env()?;
    dirs.init()?;
    let toolchain = Toolchain::discover(settings.goroot.clone(), &dirs.home)?;

    let client = GitHubClient::new(
        &settings.api_url,
        &settings.github_user,
        &settings.auth_token,
    )?;
    let rig = BootRig::new(settings.bake_url.clone(), settings.bootery_url.clone())?;
    let cycle = HardwareCycle::new(dirs, toolchain, rig, &settings);
    let poller = Poller::new(client, cycle, &settings);

    info!(
        repo = %settings.repo,
        user = %settings.github_user,
        label = %settings.boot_label,
        "watching for pull requests"
    );
    if args.once {
        if let PollOutcome::Booted { number } = poller.poll_once()? {
            info!(number, "PR booted");
        }
        return Ok(());
    }
    poller.run()
}
