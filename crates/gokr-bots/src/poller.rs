//! The autotestboot loop: pick the bot's labeled PR, build and boot it on
//! real hardware, and hand it over to the merge label when it boots.

use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use crate::bootery::BootRig;
use crate::config::{PackerConfig, PollerSettings};
use crate::error::Result;
use crate::github::{GitHost, HeadRef, PullRequest, RepoSlug};
use crate::packer::{Toolchain, run_passthrough};
use crate::tree::fetch_to_dir;
use crate::workspace::WorkDirs;

/// First PR in listing order opened by `user` that carries `label`.
pub fn most_recent_relevant_pr<'a>(
    prs: &'a [PullRequest],
    user: &str,
    label: &str,
) -> Option<&'a PullRequest> {
    prs.iter().find(|pr| pr.user.login == user && pr.has_label(label))
}

/// Build and test-boot one commit. Returning `Ok` means the board booted it.
pub trait BootCycle {
    fn run(&self, host: &dyn GitHost, head: &HeadRef) -> Result<()>;
}

pub struct HardwareCycle {
    dirs: WorkDirs,
    toolchain: Toolchain,
    rig: BootRig,
    packer: PackerConfig,
    bootloader_files: Vec<String>,
    slug: RepoSlug,
}

impl HardwareCycle {
    pub fn new(
        dirs: WorkDirs,
        toolchain: Toolchain,
        rig: BootRig,
        settings: &PollerSettings,
    ) -> Self {
        Self {
            dirs,
            toolchain,
            rig,
            packer: settings.packer.clone(),
            bootloader_files: settings.bootloader_files.clone(),
            slug: settings.repo.clone(),
        }
    }
}

impl BootCycle for HardwareCycle {
    fn run(&self, host: &dyn GitHost, head: &HeadRef) -> Result<()> {
        // Both guards clean up on every exit path.
        let dir = self.dirs.cycle_dir()?;
        info!(dir = %dir.path().display(), "checkout dir");

        fetch_to_dir(host, dir.path(), head)?;
        run_passthrough(self.toolchain.install_packer_cmd(&self.packer, dir.path())?)?;

        let boot = self.dirs.boot_file()?;
        let built_at = Utc::now();
        run_passthrough(self.toolchain.build_boot_cmd(&self.packer, dir.path(), boot.path())?)?;

        self.rig.upload_bootloader(dir.path(), &self.bootloader_files)?;
        self.rig.test_boot(boot.path(), &self.slug, built_at)?;
        info!("testboot succeeded");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    Booted { number: u64 },
}

pub struct Poller<H, C> {
    host: H,
    cycle: C,
    repo: RepoSlug,
    github_user: String,
    boot_label: String,
    merge_label: String,
    interval: Duration,
}

impl<H: GitHost, C: BootCycle> Poller<H, C> {
    pub fn new(host: H, cycle: C, settings: &PollerSettings) -> Self {
        Self {
            host,
            cycle,
            repo: settings.repo.clone(),
            github_user: settings.github_user.clone(),
            boot_label: settings.boot_label.clone(),
            merge_label: settings.merge_label.clone(),
            interval: settings.poll_interval,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn poll_once(&self) -> Result<PollOutcome> {
        let prs = self
            .host
            .list_open_pulls(&self.repo)
            .map_err(|e| e.context(format!("listing pull requests of {}", self.repo)))?;
        let Some(pr) = most_recent_relevant_pr(&prs, &self.github_user, &self.boot_label) else {
            info!(label = %self.boot_label, "no pull request to boot");
            return Ok(PollOutcome::Idle);
        };
        self.process_pr(pr)?;
        Ok(PollOutcome::Booted { number: pr.number })
    }

    /// Test-boot `pr` and swap its labels. Labels are untouched if the boot fails.
    pub fn process_pr(&self, pr: &PullRequest) -> Result<()> {
        let head = pr.head_ref()?;
        info!(
            number = pr.number,
            head_repo = %head.repo,
            sha = %head.sha,
            "most recent PR"
        );

        if let Err(e) = self.cycle.run(&self.host, &head) {
            error!(number = pr.number, "testboot failed");
            return Err(e.context(format!("test-booting PR #{}", pr.number)));
        }

        info!(label = %self.merge_label, "adding label");
        self.host.add_labels(&self.repo, pr.number, &[self.merge_label.as_str()])?;
        info!(label = %self.boot_label, "removing label");
        self.host.remove_label(&self.repo, pr.number, &self.boot_label)?;
        Ok(())
    }

    /// Poll forever. Failures end the current cycle only.
    pub fn run(&self) -> ! {
        loop {
            match self.poll_once() {
                Ok(PollOutcome::Booted { number }) => info!(number, "PR booted"),
                Ok(PollOutcome::Idle) => {}
                Err(e) => error!("poll cycle failed: {e}"),
            }
            info!(interval = ?self.interval, "sleeping before polling again");
            std::thread::sleep(self.interval);
        }
    }
}
