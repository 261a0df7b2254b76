use clap::Parser;
use tracing::{error, info};

use gokr_bots::Result;
use gokr_bots::config::PullUbootConfig;
use gokr_bots::github::GitHubClient;
use gokr_bots::logging::{self, LogFormat};
use gokr_bots::uboot::{BumpOutcome, update_firmware};

/// Open a PR bumping the pinned U-Boot revision to upstream's latest commit.
///
/// Reads GH_USER, GH_AUTH_TOKEN and GITHUB_REPOSITORY from the environment
/// (or a .env file).
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Compute the new pin but do not push anything
    #[arg(long)]
    dry_run: bool,
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.log_format)?;
    if let Err(e) = run(&args) {
        error!("{e}");
        return Err(e);
    }
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    // A missing .env is fine; real environment variables win.
    let _ = dotenv::dotenv();
    let cfg = PullUbootConfig::from_env()?;

    let client = GitHubClient::new(&cfg.api_url, &cfg.github_user, &cfg.auth_token)?;
    match update_firmware(&client, &cfg, args.dry_run)? {
        BumpOutcome::UpToDate { rev } => info!(%rev, "nothing to do"),
        BumpOutcome::DryRun { rev, content } => {
            info!(%rev, path = %cfg.target_path, "would push:");
            print!("{content}");
        }
        BumpOutcome::Opened {
            rev,
            branch,
            number,
        } => info!(%rev, %branch, number, "pull request opened"),
    }
    Ok(())
}
