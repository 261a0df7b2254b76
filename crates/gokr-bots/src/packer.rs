use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::info;

use crate::config::PackerConfig;
use crate::error::{Error, Result};

/// Go toolchain used to install and run `gokr-packer`.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub goroot: PathBuf,
    pub home: PathBuf,
}

impl Toolchain {
    /// Use `goroot` if given, otherwise ask the `go` on `PATH`.
    pub fn discover(goroot: Option<PathBuf>, home: &Path) -> Result<Self> {
        let goroot = match goroot {
            Some(g) => g,
            None => go_env_goroot()?,
        };
        if !goroot.join("bin").join("go").is_file() {
            return Err(Error::msg(format!(
                "no go binary under GOROOT {}",
                goroot.display()
            )));
        }
        info!(goroot = %goroot.display(), "using Go toolchain");
        Ok(Self {
            goroot,
            home: home.to_path_buf(),
        })
    }

    pub fn go(&self) -> PathBuf {
        self.goroot.join("bin").join("go")
    }

    pub fn packer_bin(&self) -> PathBuf {
        self.home.join("go").join("bin").join("gokr-packer")
    }

    /// The whole child environment; nothing is inherited from the bot's own.
    pub fn env(&self) -> Result<Vec<(OsString, OsString)>> {
        let path = std::env::join_paths([
            self.goroot.join("bin"),
            self.home.join("go").join("bin"),
        ])
        .map_err(|e| Error::msg(format!("cannot build PATH for the Go toolchain: {e}")))?;
        Ok(vec![
            ("HOME".into(), self.home.clone().into_os_string()),
            ("PATH".into(), path),
        ])
    }

    pub fn install_packer_cmd(&self, cfg: &PackerConfig, dir: &Path) -> Result<Command> {
        let mut cmd = Command::new(self.go());
        cmd.arg("get").arg(&cfg.install_package);
        self.prepare(&mut cmd, dir)?;
        Ok(cmd)
    }

    pub fn build_boot_cmd(
        &self,
        cfg: &PackerConfig,
        dir: &Path,
        boot_path: &Path,
    ) -> Result<Command> {
        let mut cmd = Command::new(self.packer_bin());
        cmd.arg(format!("-device_type={}", cfg.device_type))
            .arg(format!("-hostname={}", cfg.hostname))
            .arg("-eeprom_package=")
            .arg("-firmware_package=")
            .arg(format!("-kernel_package={}", cfg.kernel_package));
        let mut overwrite = OsString::from("-overwrite_boot=");
        overwrite.push(boot_path.as_os_str());
        cmd.arg(overwrite);
        self.prepare(&mut cmd, dir)?;
        cmd.env("GOARCH", &cfg.goarch).env("GOARM", &cfg.goarm);
        Ok(cmd)
    }

    fn prepare(&self, cmd: &mut Command, dir: &Path) -> Result<()> {
        cmd.current_dir(dir).env_clear().envs(self.env()?);
        Ok(())
    }
}

fn go_env_goroot() -> Result<PathBuf> {
    let out = Command::new("go")
        .arg("env")
        .arg("GOROOT")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| Error::msg(format!("failed to run 'go env GOROOT' (pass --goroot?): {e}")))?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(Error::msg(format!(
            "'go env GOROOT' failed with {}: {}",
            out.status,
            stderr.trim()
        )));
    }
    let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if s.is_empty() {
        return Err(Error::msg("'go env GOROOT' printed nothing"));
    }
    Ok(PathBuf::from(s))
}

/// Run to completion with stdout/stderr attached to ours.
pub fn run_passthrough(mut cmd: Command) -> Result<()> {
    info!(cmd = ?cmd, "running");
    let status = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| Error::msg(format!("failed to spawn {:?}: {e}", cmd.get_program())))?;
    if status.success() {
        return Ok(());
    }
    Err(Error::msg(format!(
        "{} exited with {status}",
        Path::new(cmd.get_program()).display()
    )))
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use super::*;

    fn toolchain() -> Toolchain {
        Toolchain {
            goroot: PathBuf::from("/opt/go"),
            home: PathBuf::from("/home/bot"),
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn env_of<'a>(cmd: &'a Command, key: &str) -> Option<&'a OsStr> {
        cmd.get_envs()
            .find(|(k, _)| *k == OsStr::new(key))
            .and_then(|(_, v)| v)
    }

    #[test]
    fn install_uses_goroot_go_in_checkout_dir() {
        let cmd = toolchain()
            .install_packer_cmd(&PackerConfig::default(), Path::new("/tmp/co"))
            .unwrap();
        assert_eq!(cmd.get_program(), OsStr::new("/opt/go/bin/go"));
        assert_eq!(args(&cmd), vec!["get", "github.com/gokrazy/tools/cmd/gokr-packer"]);
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/tmp/co")));
        assert_eq!(env_of(&cmd, "HOME"), Some(OsStr::new("/home/bot")));
        assert_eq!(
            env_of(&cmd, "PATH"),
            Some(OsStr::new("/opt/go/bin:/home/bot/go/bin"))
        );
        assert_eq!(env_of(&cmd, "GOARCH"), None);
    }

    #[test]
    fn build_boot_passes_fixed_flags_and_arm_env() {
        let cmd = toolchain()
            .build_boot_cmd(
                &PackerConfig::default(),
                Path::new("/tmp/co"),
                Path::new("/home/bot/bootfile123"),
            )
            .unwrap();
        assert_eq!(cmd.get_program(), OsStr::new("/home/bot/go/bin/gokr-packer"));
        assert_eq!(
            args(&cmd),
            vec![
                "-device_type=odroidhc1",
                "-hostname=odroidbake",
                "-eeprom_package=",
                "-firmware_package=",
                "-kernel_package=github.com/anupcshan/gokrazy-odroidxu4-kernel",
                "-overwrite_boot=/home/bot/bootfile123",
            ]
        );
        assert_eq!(env_of(&cmd, "GOARCH"), Some(OsStr::new("arm")));
        assert_eq!(env_of(&cmd, "GOARM"), Some(OsStr::new("7")));
    }

    #[cfg(unix)]
    #[test]
    fn separator_in_toolchain_path_is_an_error() {
        let tc = Toolchain {
            goroot: PathBuf::from("/opt/go:1.17"),
            home: PathBuf::from("/home/bot"),
        };
        assert!(tc.env().is_err());
        let err = tc
            .install_packer_cmd(&PackerConfig::default(), Path::new("/tmp/co"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("cannot build PATH"), "unexpected err: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn passthrough_reports_exit_status() {
        let mut ok = Command::new("sh");
        ok.arg("-c").arg("exit 0");
        run_passthrough(ok).unwrap();

        let mut bad = Command::new("sh");
        bad.arg("-c").arg("exit 3");
        let err = run_passthrough(bad).unwrap_err().to_string();
        assert!(err.contains("sh exited"), "unexpected err: {err}");
    }

    #[test]
    fn discover_rejects_goroot_without_go() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = Toolchain::discover(Some(tmp.path().to_path_buf()), Path::new("/home/bot"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("no go binary"), "unexpected err: {err}");
    }
}
