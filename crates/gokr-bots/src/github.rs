//! Minimal GitHub REST client covering the calls both bots make.
//!
//! The [`GitHost`] trait is the seam between the bot logic and the network;
//! [`GitHubClient`] is the blocking HTTP implementation.

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("gokr-bots/", env!("CARGO_PKG_VERSION"));
const API_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/repo`. Anything other than exactly two non-empty parts is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.trim().split('/').collect();
        if parts.len() != 2 {
            return Err(Error::msg(format!(
                "unexpected number of /-separated parts in {:?}: got {}, want 2",
                raw,
                parts.len()
            )));
        }
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::msg(format!("empty owner or repo in {raw:?}")));
        }
        Ok(Self::new(parts[0].trim(), parts[1].trim()))
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Label {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub owner: User,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PullHead {
    pub sha: String,
    #[serde(default)]
    pub user: Option<User>,
    // null once the fork behind the PR has been deleted
    #[serde(default)]
    pub repo: Option<Repository>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub user: User,
    #[serde(default)]
    pub labels: Vec<Label>,
    pub head: PullHead,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl PullRequest {
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }

    /// Repository and commit the PR wants merged.
    pub fn head_ref(&self) -> Result<HeadRef> {
        let repo = self.head.repo.as_ref().ok_or_else(|| {
            Error::msg(format!(
                "PR #{} has no head repository (was the fork deleted?)",
                self.number
            ))
        })?;
        Ok(HeadRef {
            repo: RepoSlug::new(&repo.owner.login, &repo.name),
            sha: self.head.sha.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadRef {
    pub repo: RepoSlug,
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Signature {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ObjectRef {
    pub sha: String,
}

/// A git commit object (`/git/commits`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GitCommit {
    pub sha: String,
    pub tree: ObjectRef,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: Option<Signature>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CommitDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: Option<Signature>,
}

/// A commit as listed by `/repos/{owner}/{repo}/commits`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RepoCommit {
    pub sha: String,
    pub commit: CommitDetail,
}

impl RepoCommit {
    pub fn author_date(&self) -> Result<DateTime<Utc>> {
        self.commit
            .author
            .as_ref()
            .map(|a| a.date)
            .ok_or_else(|| Error::msg(format!("commit {} has no author date", self.sha)))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
    Commit,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub sha: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Tree {
    pub sha: String,
    #[serde(rename = "tree", default)]
    pub entries: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

impl Tree {
    pub fn find(&self, path: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Blob {
    content: String,
    encoding: String,
}

impl Blob {
    fn decode(self) -> Result<Vec<u8>> {
        match self.encoding.as_str() {
            "base64" => {
                // The API wraps base64 payloads at 60 columns.
                let compact: String = self
                    .content
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                STANDARD
                    .decode(compact)
                    .map_err(|e| Error::msg(format!("invalid base64 blob content: {e}")))
            }
            "utf-8" | "utf8" => Ok(self.content.into_bytes()),
            other => Err(Error::msg(format!("unsupported blob encoding '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Reference {
    #[serde(rename = "ref")]
    pub name: String,
    pub object: ObjectRef,
}

/// Tree entry for `create_tree`, carrying inline file content.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewTreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub content: String,
}

impl NewTreeEntry {
    pub fn file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: "100644".into(),
            kind: EntryKind::Blob,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

pub trait GitHost {
    fn list_open_pulls(&self, repo: &RepoSlug) -> Result<Vec<PullRequest>>;
    fn add_labels(&self, repo: &RepoSlug, number: u64, labels: &[&str]) -> Result<()>;
    fn remove_label(&self, repo: &RepoSlug, number: u64, label: &str) -> Result<()>;
    fn get_commit(&self, repo: &RepoSlug, sha: &str) -> Result<GitCommit>;
    fn get_tree(&self, repo: &RepoSlug, sha: &str, recursive: bool) -> Result<Tree>;
    /// Decoded blob bytes.
    fn get_blob(&self, repo: &RepoSlug, sha: &str) -> Result<Vec<u8>>;
    fn latest_commit(&self, repo: &RepoSlug) -> Result<RepoCommit>;
    /// `name` is relative to `refs/`, e.g. `heads/master`.
    fn get_ref(&self, repo: &RepoSlug, name: &str) -> Result<Reference>;
    fn create_tree(&self, repo: &RepoSlug, base_tree: &str, entries: &[NewTreeEntry])
    -> Result<Tree>;
    fn create_commit(
        &self,
        repo: &RepoSlug,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> Result<GitCommit>;
    /// `name` is the full ref, e.g. `refs/heads/pull-<sha>`.
    fn create_ref(&self, repo: &RepoSlug, name: &str, sha: &str) -> Result<Reference>;
    fn create_pull(&self, repo: &RepoSlug, pr: &NewPullRequest) -> Result<PullRequest>;
}

pub struct GitHubClient {
    http: Client,
    api_base: Url,
    user: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_base: &str, user: &str, token: &str) -> Result<Self> {
        let api_base = Url::parse(api_base.trim())
            .map_err(|e| Error::msg(format!("invalid GitHub API URL '{api_base}': {e}")))?;
        let http = Client::builder()
            .timeout(API_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base,
            user: user.to_string(),
            token: token.to_string(),
        })
    }

    /// Append already-split path segments to the API base; each one is percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::msg(format!(
                    "GitHub API URL '{}' cannot be a base",
                    self.api_base
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn repo_endpoint(&self, repo: &RepoSlug, rest: &[&str]) -> Result<Url> {
        let mut segments = vec!["repos", repo.owner.as_str(), repo.name.as_str()];
        segments.extend_from_slice(rest);
        self.endpoint(&segments)
    }

    fn send<T: DeserializeOwned>(&self, method: &str, url: Url, req: RequestBuilder) -> Result<T> {
        tracing::debug!(%method, %url, "github request");
        let res = req
            .basic_auth(&self.user, Some(&self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .map_err(|e| Error::msg(format!("GitHub {method} {} failed: {e}", url.path())))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.message)
                .unwrap_or(text);
            return Err(Error::msg(format!(
                "GitHub {method} {} failed with status {status}: {}",
                url.path(),
                message.trim()
            )));
        }

        res.json::<T>().map_err(|e| {
            Error::msg(format!(
                "GitHub {method} {}: invalid response body: {e}",
                url.path()
            ))
        })
    }

    fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let req = self.http.get(url.clone());
        self.send("GET", url, req)
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, url: Url, body: &B) -> Result<T> {
        let req = self.http.post(url.clone()).json(body);
        self.send("POST", url, req)
    }

    fn delete(&self, url: Url) -> Result<()> {
        let req = self.http.delete(url.clone());
        let _: serde_json::Value = self.send("DELETE", url, req)?;
        Ok(())
    }
}

impl GitHost for GitHubClient {
    fn list_open_pulls(&self, repo: &RepoSlug) -> Result<Vec<PullRequest>> {
        let mut url = self.repo_endpoint(repo, &["pulls"])?;
        url.query_pairs_mut().append_pair("state", "open");
        self.get(url)
    }

    fn add_labels(&self, repo: &RepoSlug, number: u64, labels: &[&str]) -> Result<()> {
        let number = number.to_string();
        let url = self.repo_endpoint(repo, &["issues", &number, "labels"])?;
        let _: serde_json::Value = self.post(url, &serde_json::json!({ "labels": labels }))?;
        Ok(())
    }

    fn remove_label(&self, repo: &RepoSlug, number: u64, label: &str) -> Result<()> {
        let number = number.to_string();
        let url = self.repo_endpoint(repo, &["issues", &number, "labels", label])?;
        self.delete(url)
    }

    fn get_commit(&self, repo: &RepoSlug, sha: &str) -> Result<GitCommit> {
        let url = self.repo_endpoint(repo, &["git", "commits", sha])?;
        self.get(url)
    }

    fn get_tree(&self, repo: &RepoSlug, sha: &str, recursive: bool) -> Result<Tree> {
        let mut url = self.repo_endpoint(repo, &["git", "trees", sha])?;
        if recursive {
            url.query_pairs_mut().append_pair("recursive", "1");
        }
        self.get(url)
    }

    fn get_blob(&self, repo: &RepoSlug, sha: &str) -> Result<Vec<u8>> {
        let url = self.repo_endpoint(repo, &["git", "blobs", sha])?;
        let blob: Blob = self.get(url)?;
        blob.decode().map_err(|e| e.context(format!("blob {sha} in {repo}")))
    }

    fn latest_commit(&self, repo: &RepoSlug) -> Result<RepoCommit> {
        let mut url = self.repo_endpoint(repo, &["commits"])?;
        url.query_pairs_mut()
            .append_pair("page", "1")
            .append_pair("per_page", "1");
        let commits: Vec<RepoCommit> = self.get(url)?;
        commits
            .into_iter()
            .next()
            .ok_or_else(|| Error::msg(format!("{repo} has no commits")))
    }

    fn get_ref(&self, repo: &RepoSlug, name: &str) -> Result<Reference> {
        let mut segments = vec!["git", "ref"];
        segments.extend(name.split('/').filter(|s| !s.is_empty()));
        let url = self.repo_endpoint(repo, &segments)?;
        self.get(url)
    }

    fn create_tree(
        &self,
        repo: &RepoSlug,
        base_tree: &str,
        entries: &[NewTreeEntry],
    ) -> Result<Tree> {
        let url = self.repo_endpoint(repo, &["git", "trees"])?;
        self.post(
            url,
            &serde_json::json!({ "base_tree": base_tree, "tree": entries }),
        )
    }

    fn create_commit(
        &self,
        repo: &RepoSlug,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> Result<GitCommit> {
        let url = self.repo_endpoint(repo, &["git", "commits"])?;
        self.post(
            url,
            &serde_json::json!({ "message": message, "tree": tree, "parents": parents }),
        )
    }

    fn create_ref(&self, repo: &RepoSlug, name: &str, sha: &str) -> Result<Reference> {
        let url = self.repo_endpoint(repo, &["git", "refs"])?;
        self.post(url, &serde_json::json!({ "ref": name, "sha": sha }))
    }

    fn create_pull(&self, repo: &RepoSlug, pr: &NewPullRequest) -> Result<PullRequest> {
        let url = self.repo_endpoint(repo, &["pulls"])?;
        self.post(url, pr)
    }
}
