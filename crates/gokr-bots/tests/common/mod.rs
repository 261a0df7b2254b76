#![allow(dead_code)]

pub mod http;

use std::cell::RefCell;
use std::collections::HashMap;

use gokr_bots::github::{
    CommitDetail, EntryKind, GitCommit, GitHost, Label, NewPullRequest, NewTreeEntry, ObjectRef,
    PullHead, PullRequest, Reference, RepoCommit, RepoSlug, Repository, Signature, Tree, TreeEntry,
    User,
};
use gokr_bots::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListPulls(String),
    AddLabels(u64, Vec<String>),
    RemoveLabel(u64, String),
    GetCommit(String),
    GetTree(String),
    GetBlob(String),
    LatestCommit(String),
    GetRef(String),
    CreateTree {
        base: String,
        entries: Vec<NewTreeEntry>,
    },
    CreateCommit {
        message: String,
        tree: String,
        parents: Vec<String>,
    },
    CreateRef {
        name: String,
        sha: String,
    },
    CreatePull(NewPullRequest),
}

impl Call {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Call::AddLabels(..)
                | Call::RemoveLabel(..)
                | Call::CreateTree { .. }
                | Call::CreateCommit { .. }
                | Call::CreateRef { .. }
                | Call::CreatePull(_)
        )
    }
}

/// In-memory GitHub: canned reads, recorded calls.
#[derive(Default)]
pub struct FakeHost {
    pub pulls: Vec<PullRequest>,
    pub commits: HashMap<String, GitCommit>,
    pub trees: HashMap<String, Tree>,
    pub blobs: HashMap<String, Vec<u8>>,
    pub refs: HashMap<String, Reference>,
    pub latest: Option<RepoCommit>,
    pub fail_list: bool,
    pub calls: RefCell<Vec<Call>>,
}

impl FakeHost {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_write).collect()
    }

    fn record(&self, c: Call) {
        self.calls.borrow_mut().push(c);
    }

    pub fn add_commit(&mut self, sha: &str, tree: &str) {
        self.commits.insert(
            sha.into(),
            GitCommit {
                sha: sha.into(),
                tree: ObjectRef { sha: tree.into() },
                message: String::new(),
                author: None,
            },
        );
    }

    pub fn add_tree(&mut self, sha: &str, entries: Vec<TreeEntry>) {
        self.trees.insert(
            sha.into(),
            Tree {
                sha: sha.into(),
                entries,
                truncated: false,
            },
        );
    }

    pub fn add_blob(&mut self, sha: &str, content: &[u8]) {
        self.blobs.insert(sha.into(), content.to_vec());
    }
}

pub fn dir_entry(path: &str) -> TreeEntry {
    TreeEntry {
        path: path.into(),
        mode: "040000".into(),
        kind: EntryKind::Tree,
        sha: Some(format!("tree-{path}")),
    }
}

pub fn blob_entry(path: &str, sha: &str) -> TreeEntry {
    TreeEntry {
        path: path.into(),
        mode: "100644".into(),
        kind: EntryKind::Blob,
        sha: Some(sha.into()),
    }
}

pub fn pull(number: u64, author: &str, labels: &[&str]) -> PullRequest {
    PullRequest {
        number,
        user: User {
            login: author.into(),
        },
        labels: labels
            .iter()
            .map(|l| Label {
                name: l.to_string(),
            })
            .collect(),
        head: PullHead {
            sha: format!("head-{number}"),
            user: Some(User {
                login: author.into(),
            }),
            repo: Some(Repository {
                name: "gokrazy-odroidxu4-kernel".into(),
                owner: User {
                    login: author.into(),
                },
            }),
        },
        html_url: None,
    }
}

pub fn repo_commit(sha: &str, unix: i64) -> RepoCommit {
    RepoCommit {
        sha: sha.into(),
        commit: CommitDetail {
            message: "upstream".into(),
            author: Some(Signature {
                name: Some("U-Boot Dev".into()),
                email: None,
                date: chrono::DateTime::from_timestamp(unix, 0).expect("valid timestamp"),
            }),
        },
    }
}

fn missing(what: &str, key: &str) -> Error {
    Error::msg(format!("fake: no {what} {key}"))
}

impl GitHost for FakeHost {
    fn list_open_pulls(&self, repo: &RepoSlug) -> Result<Vec<PullRequest>> {
        self.record(Call::ListPulls(repo.to_string()));
        if self.fail_list {
            return Err(Error::msg("fake: 502 Bad Gateway"));
        }
        Ok(self.pulls.clone())
    }

    fn add_labels(&self, _repo: &RepoSlug, number: u64, labels: &[&str]) -> Result<()> {
        self.record(Call::AddLabels(
            number,
            labels.iter().map(|l| l.to_string()).collect(),
        ));
        Ok(())
    }

    fn remove_label(&self, _repo: &RepoSlug, number: u64, label: &str) -> Result<()> {
        self.record(Call::RemoveLabel(number, label.into()));
        Ok(())
    }

    fn get_commit(&self, _repo: &RepoSlug, sha: &str) -> Result<GitCommit> {
        self.record(Call::GetCommit(sha.into()));
        self.commits
            .get(sha)
            .cloned()
            .ok_or_else(|| missing("commit", sha))
    }

    fn get_tree(&self, _repo: &RepoSlug, sha: &str, _recursive: bool) -> Result<Tree> {
        self.record(Call::GetTree(sha.into()));
        self.trees
            .get(sha)
            .cloned()
            .ok_or_else(|| missing("tree", sha))
    }

    fn get_blob(&self, _repo: &RepoSlug, sha: &str) -> Result<Vec<u8>> {
        self.record(Call::GetBlob(sha.into()));
        self.blobs
            .get(sha)
            .cloned()
            .ok_or_else(|| missing("blob", sha))
    }

    fn latest_commit(&self, repo: &RepoSlug) -> Result<RepoCommit> {
        self.record(Call::LatestCommit(repo.to_string()));
        self.latest
            .clone()
            .ok_or_else(|| missing("commits in", &repo.to_string()))
    }

    fn get_ref(&self, _repo: &RepoSlug, name: &str) -> Result<Reference> {
        self.record(Call::GetRef(name.into()));
        self.refs.get(name).cloned().ok_or_else(|| missing("ref", name))
    }

    fn create_tree(
        &self,
        _repo: &RepoSlug,
        base_tree: &str,
        entries: &[NewTreeEntry],
    ) -> Result<Tree> {
        self.record(Call::CreateTree {
            base: base_tree.into(),
            entries: entries.to_vec(),
        });
        Ok(Tree {
            sha: "new-tree".into(),
            entries: Vec::new(),
            truncated: false,
        })
    }

    fn create_commit(
        &self,
        _repo: &RepoSlug,
        message: &str,
        tree: &str,
        parents: &[String],
    ) -> Result<GitCommit> {
        self.record(Call::CreateCommit {
            message: message.into(),
            tree: tree.into(),
            parents: parents.to_vec(),
        });
        Ok(GitCommit {
            sha: "new-commit".into(),
            tree: ObjectRef {
                sha: tree.into(),
            },
            message: message.into(),
            author: None,
        })
    }

    fn create_ref(&self, _repo: &RepoSlug, name: &str, sha: &str) -> Result<Reference> {
        self.record(Call::CreateRef {
            name: name.into(),
            sha: sha.into(),
        });
        Ok(Reference {
            name: name.into(),
            object: ObjectRef { sha: sha.into() },
        })
    }

    fn create_pull(&self, _repo: &RepoSlug, pr: &NewPullRequest) -> Result<PullRequest> {
        self.record(Call::CreatePull(pr.clone()));
        let mut out = pull(1234, "gokrazy-bot", &[]);
        out.html_url = Some("https://github.com/gokrazy/odroidhc1-uboot/pull/1234".into());
        Ok(out)
    }
}
