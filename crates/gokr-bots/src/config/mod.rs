use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};
use crate::github::{DEFAULT_API_URL, RepoSlug};

pub const ENV_GH_USER: &str = "GH_USER";
pub const ENV_GH_AUTH_TOKEN: &str = "GH_AUTH_TOKEN";
pub const ENV_GITHUB_REPOSITORY: &str = "GITHUB_REPOSITORY";
pub const ENV_GITHUB_API_URL: &str = "GITHUB_API_URL";
pub const ENV_UBOOT_UPSTREAM: &str = "UBOOT_UPSTREAM";
pub const ENV_UBOOT_TARGET_PATH: &str = "UBOOT_TARGET_PATH";
pub const ENV_UBOOT_BASE_BRANCH: &str = "UBOOT_BASE_BRANCH";

#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }
        path.split('.')
            .try_fold(&self.value, |cur, seg| cur.as_table()?.get(seg))
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v.clone().try_into().map_err(|e| {
            Error::msg(format!(
                "invalid config at '{}' in {}: {e}",
                path,
                self.path.display()
            ))
        })?;
        Ok(Some(parsed))
    }
}

/// Deep-merge `overlay` into `base`; tables merge key by key, anything else is replaced.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(over_tbl)) => {
            for (k, v) in over_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn load_value(path: &Path, seen: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(canonical.clone()) {
        return Err(Error::msg(format!(
            "config extends cycle at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;

    let parent = value
        .as_table_mut()
        .and_then(|t| t.remove("extends"))
        .map(|v| match v {
            Value::String(s) => Ok(s),
            other => Err(Error::msg(format!(
                "'extends' in {} must be a string, got {}",
                path.display(),
                other.type_str()
            ))),
        })
        .transpose()?;

    let mut out = match parent {
        Some(rel) => {
            let base = path.parent().unwrap_or_else(|| Path::new(".")).join(rel);
            load_value(&base, seen)?
        }
        None => Value::Table(Default::default()),
    };
    merge(&mut out, value);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let value = load_value(path, &mut HashSet::new())?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

/// Accepts plain seconds or a number with one of `s`, `m`, `h` (e.g. `90s`, `5m`).
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let s = raw.trim();
    let (num, mult) = match s.char_indices().last() {
        Some((i, 's')) => (&s[..i], 1),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 'h')) => (&s[..i], 3600),
        _ => (s, 1),
    };
    let n: u64 = num.trim().parse().map_err(|_| {
        Error::msg(format!(
            "invalid duration '{raw}' (expected e.g. 300, 90s, 5m, 1h)"
        ))
    })?;
    Ok(Duration::from_secs(n.saturating_mul(mult)))
}

fn default_bootloader_files() -> Vec<String> {
    ["bl1.bin", "bl2.bin", "u-boot.bin", "tzsw.bin"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PackerConfig {
    /// Go package `go get` installs to provide the packer binary.
    pub install_package: String,
    pub device_type: String,
    pub hostname: String,
    pub kernel_package: String,
    pub goarch: String,
    pub goarm: String,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            install_package: "github.com/gokrazy/tools/cmd/gokr-packer".into(),
            device_type: "odroidhc1".into(),
            hostname: "odroidbake".into(),
            kernel_package: "github.com/anupcshan/gokrazy-odroidxu4-kernel".into(),
            goarch: "arm".into(),
            goarm: "7".into(),
        }
    }
}

/// `[autotestboot]` table, before CLI overrides and validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutotestbootConfig {
    pub github_user: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub boot_label: String,
    pub merge_label: String,
    pub auth_token: Option<String>,
    pub bootery_url: Option<String>,
    pub bake_url: Option<String>,
    pub poll_interval: String,
    pub goroot: Option<PathBuf>,
    pub api_url: String,
    pub bootloader_files: Vec<String>,
    pub packer: PackerConfig,
}

impl Default for AutotestbootConfig {
    fn default() -> Self {
        Self {
            github_user: "gokrazy-bot-2".into(),
            repo_owner: "anupcshan".into(),
            repo_name: "gokrazy-odroidxu4-kernel".into(),
            boot_label: "please-boot".into(),
            merge_label: "please-merge".into(),
            auth_token: None,
            bootery_url: None,
            bake_url: None,
            poll_interval: "5m".into(),
            goroot: None,
            api_url: DEFAULT_API_URL.into(),
            bootloader_files: default_bootloader_files(),
            packer: PackerConfig::default(),
        }
    }
}

/// Values given on the command line; `None` leaves the file/default value alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub auth_token: Option<String>,
    pub bootery_url: Option<String>,
    pub bake_url: Option<String>,
    pub poll_interval: Option<String>,
    pub goroot: Option<PathBuf>,
}

/// Validated poller configuration.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub github_user: String,
    pub auth_token: String,
    pub repo: RepoSlug,
    pub boot_label: String,
    pub merge_label: String,
    pub bootery_url: Url,
    pub bake_url: Url,
    pub poll_interval: Duration,
    pub goroot: Option<PathBuf>,
    pub api_url: String,
    pub bootloader_files: Vec<String>,
    pub packer: PackerConfig,
}

impl AutotestbootConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        Ok(doc.deserialize_path("autotestboot")?.unwrap_or_default())
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_doc(&load(p)?),
            None => Ok(Self::default()),
        }
    }

    pub fn apply(&mut self, o: CliOverrides) {
        if let Some(v) = o.auth_token {
            self.auth_token = Some(v);
        }
        if let Some(v) = o.bootery_url {
            self.bootery_url = Some(v);
        }
        if let Some(v) = o.bake_url {
            self.bake_url = Some(v);
        }
        if let Some(v) = o.poll_interval {
            self.poll_interval = v;
        }
        if let Some(v) = o.goroot {
            self.goroot = Some(v);
        }
    }

    /// `env_token` is consulted only when neither the flag nor the file set a token.
    pub fn validate(self, env_token: Option<String>) -> Result<PollerSettings> {
        let auth_token = non_empty(self.auth_token)
            .or_else(|| non_empty(env_token))
            .ok_or_else(|| {
                Error::msg(format!(
                    "missing GitHub auth token (use --github-authtoken, auth_token, or {ENV_GH_AUTH_TOKEN})"
                ))
            })?;
        let bootery_url = required_url("bootery_url", self.bootery_url)?;
        let bake_url = required_url("bake_url", self.bake_url)?;

        let poll_interval = parse_duration(&self.poll_interval)?;
        if poll_interval.is_zero() {
            return Err(Error::msg("poll_interval must be greater than zero"));
        }

        for f in &self.bootloader_files {
            if f.trim().is_empty() || f.contains('/') || f == ".." {
                return Err(Error::msg(format!(
                    "bootloader file '{f}' must be a plain file name"
                )));
            }
        }

        let github_user = non_empty(Some(self.github_user))
            .ok_or_else(|| Error::msg("github_user must not be empty"))?;
        let repo = RepoSlug::parse(&format!("{}/{}", self.repo_owner, self.repo_name))?;

        Ok(PollerSettings {
            github_user,
            auth_token,
            repo,
            boot_label: self.boot_label,
            merge_label: self.merge_label,
            bootery_url,
            bake_url,
            poll_interval,
            goroot: self.goroot,
            api_url: self.api_url,
            bootloader_files: self.bootloader_files,
            packer: self.packer,
        })
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn required_url(key: &str, raw: Option<String>) -> Result<Url> {
    let raw = non_empty(raw).ok_or_else(|| {
        Error::msg(format!(
            "missing {key} (use --{} or set it in the config file)",
            key.replace('_', "-")
        ))
    })?;
    Url::parse(&raw).map_err(|e| Error::msg(format!("invalid {key} '{raw}': {e}")))
}

/// Environment of the upstream-bump bot.
#[derive(Debug, Clone)]
pub struct PullUbootConfig {
    pub github_user: String,
    pub auth_token: String,
    pub repo: RepoSlug,
    pub api_url: String,
    pub upstream: RepoSlug,
    pub target_path: String,
    pub base_branch: String,
}

impl PullUbootConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let get = |k: &str| non_empty(lookup(k));

        let github_user = get(ENV_GH_USER)
            .ok_or_else(|| Error::msg(format!("empty GitHub user ({ENV_GH_USER})")))?;
        let auth_token = get(ENV_GH_AUTH_TOKEN)
            .ok_or_else(|| Error::msg(format!("empty auth token ({ENV_GH_AUTH_TOKEN})")))?;
        let slug = get(ENV_GITHUB_REPOSITORY)
            .ok_or_else(|| Error::msg(format!("empty slug ({ENV_GITHUB_REPOSITORY})")))?;
        let repo = RepoSlug::parse(&slug)?;

        let upstream = match get(ENV_UBOOT_UPSTREAM) {
            Some(s) => RepoSlug::parse(&s)?,
            None => RepoSlug::new("u-boot", "u-boot"),
        };

        Ok(Self {
            github_user,
            auth_token,
            repo,
            api_url: get(ENV_GITHUB_API_URL).unwrap_or_else(|| DEFAULT_API_URL.into()),
            upstream,
            target_path: get(ENV_UBOOT_TARGET_PATH)
                .unwrap_or_else(|| "cmd/gokr-build-uboot/build.go".into()),
            base_branch: get(ENV_UBOOT_BASE_BRANCH).unwrap_or_else(|| "master".into()),
        })
    }
}
