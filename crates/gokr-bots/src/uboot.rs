//! Bumping the pinned U-Boot revision of the firmware build.
//!
//! The tracked build file pins upstream with two Go constants:
//!
//! ```text
//! const ubootRev = "<commit sha>"
//! const ubootTS = <author date, unix seconds>
//! ```

use std::sync::OnceLock;

use regex::{NoExpand, Regex};
use tracing::info;

use crate::config::PullUbootConfig;
use crate::error::{Error, Result};
use crate::github::{GitHost, NewPullRequest, NewTreeEntry};

type CachedRegex = OnceLock<std::result::Result<Regex, regex::Error>>;

fn cached(cell: &'static CachedRegex, pattern: &str) -> Result<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern))
        .as_ref()
        .map_err(|e| Error::msg(format!("invalid pattern {pattern:?}: {e}")))
}

fn rev_re() -> Result<&'static Regex> {
    static RE: CachedRegex = OnceLock::new();
    cached(&RE, r#"const ubootRev = "([0-9a-f]+)""#)
}

fn ts_re() -> Result<&'static Regex> {
    static RE: CachedRegex = OnceLock::new();
    cached(&RE, r"const ubootTS = ([0-9]+)")
}

fn sha_re() -> Result<&'static Regex> {
    static RE: CachedRegex = OnceLock::new();
    cached(&RE, r"^[0-9a-f]{7,64}$")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedRevision {
    pub rev: String,
    pub ts: i64,
}

fn single_capture<'a>(re: &Regex, src: &'a str, what: &str) -> Result<&'a str> {
    let mut caps = re.captures_iter(src);
    let first = caps
        .next()
        .ok_or_else(|| Error::msg(format!("regexp {} resulted in no matches", re.as_str())))?;
    if caps.next().is_some() {
        return Err(Error::msg(format!("{what} is pinned more than once")));
    }
    Ok(first.get(1).map(|m| m.as_str()).unwrap_or_default())
}

pub fn read_pins(src: &str) -> Result<PinnedRevision> {
    let rev = single_capture(rev_re()?, src, "ubootRev")?;
    let ts = single_capture(ts_re()?, src, "ubootTS")?;
    let ts = ts
        .parse()
        .map_err(|e| Error::msg(format!("invalid ubootTS '{ts}': {e}")))?;
    Ok(PinnedRevision {
        rev: rev.to_string(),
        ts,
    })
}

/// Repin `src` to `rev`/`ts`. `None` means it already pins `rev`.
pub fn rewrite_pins(src: &str, rev: &str, ts: i64) -> Result<Option<String>> {
    let current = read_pins(src)?;
    if current.rev == rev {
        return Ok(None);
    }
    if !sha_re()?.is_match(rev) {
        return Err(Error::msg(format!(
            "upstream revision '{rev}' is not a lowercase hex commit id"
        )));
    }
    if ts < 0 {
        return Err(Error::msg(format!("upstream timestamp {ts} is negative")));
    }

    let rev_line = format!(r#"const ubootRev = "{rev}""#);
    let ts_line = format!("const ubootTS = {ts}");
    let out = rev_re()?.replace(src, NoExpand(&rev_line));
    let out = ts_re()?.replace(&out, NoExpand(&ts_line));
    Ok(Some(out.into_owned()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BumpOutcome {
    UpToDate { rev: String },
    DryRun { rev: String, content: String },
    Opened { rev: String, branch: String, number: u64 },
}

pub fn branch_name(rev: &str) -> String {
    format!("pull-{rev}")
}

/// One pass of the bump bot: compare upstream with the pin, open a PR if they differ.
pub fn update_firmware<H: GitHost + ?Sized>(
    host: &H,
    cfg: &PullUbootConfig,
    dry_run: bool,
) -> Result<BumpOutcome> {
    let upstream = host
        .latest_commit(&cfg.upstream)
        .map_err(|e| e.context(format!("listing {} commits", cfg.upstream)))?;
    let upstream_date = upstream.author_date()?;
    info!(
        sha = %upstream.sha,
        date = %upstream_date,
        upstream = %cfg.upstream,
        "picked most recent upstream commit"
    );

    let repo = &cfg.repo;
    let last_ref = host.get_ref(repo, &format!("heads/{}", cfg.base_branch))?;
    let last_commit = host.get_commit(repo, &last_ref.object.sha)?;
    info!(sha = %last_commit.sha, branch = %cfg.base_branch, "base commit");

    let base_tree = host.get_tree(repo, &last_commit.tree.sha, true)?;
    let entry = base_tree
        .find(&cfg.target_path)
        .ok_or_else(|| Error::msg(format!("{} not found in {repo}", cfg.target_path)))?;
    let blob_sha = entry
        .sha
        .as_deref()
        .ok_or_else(|| Error::msg(format!("{} has no blob sha", cfg.target_path)))?;
    let raw = host.get_blob(repo, blob_sha)?;
    let content = String::from_utf8(raw)
        .map_err(|e| Error::msg(format!("{} is not UTF-8: {e}", cfg.target_path)))?;

    let Some(updated) = rewrite_pins(&content, &upstream.sha, upstream_date.timestamp())
        .map_err(|e| e.context(&cfg.target_path))?
    else {
        info!(rev = %upstream.sha, "already at latest commit");
        return Ok(BumpOutcome::UpToDate { rev: upstream.sha });
    };

    if dry_run {
        info!(rev = %upstream.sha, path = %cfg.target_path, "dry run; not pushing");
        return Ok(BumpOutcome::DryRun {
            rev: upstream.sha,
            content: updated,
        });
    }

    let new_tree = host.create_tree(
        repo,
        &base_tree.sha,
        &[NewTreeEntry::file(&cfg.target_path, updated)],
    )?;
    info!(sha = %new_tree.sha, "created tree");

    let message = format!(
        "auto-update to https://github.com/{}/commit/{}",
        cfg.upstream, upstream.sha
    );
    let new_commit =
        host.create_commit(repo, &message, &new_tree.sha, &[last_commit.sha.clone()])?;
    info!(sha = %new_commit.sha, "created commit");

    let branch = branch_name(&upstream.sha);
    let new_ref = host.create_ref(repo, &format!("refs/heads/{branch}"), &new_commit.sha)?;
    info!(git_ref = %new_ref.name, "created ref");

    let pr = host.create_pull(
        repo,
        &NewPullRequest {
            title: format!("auto-update to {}", upstream.sha),
            head: branch.clone(),
            base: cfg.base_branch.clone(),
            body: None,
        },
    )?;
    info!(number = pr.number, url = pr.html_url.as_deref().unwrap_or(""), "opened pull request");

    Ok(BumpOutcome::Opened {
        rev: upstream.sha,
        branch,
        number: pr.number,
    })
}
