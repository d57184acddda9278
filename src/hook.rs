//! Entry point for git's `update` hook on the server.

use std::path::Path;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use gix::ObjectId;
use owo_colors::OwoColorize;

use crate::cmd;
use crate::config::{GitConfigStore, ProjectName};
use crate::plugin::{self, Registry};
use crate::util::{CommandExt, Repo};
use crate::validation::{BranchNameKey, CandidateCommit, MergeValidationError, PreMerge};

/// Arguments git passes to the `update` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub refname: String,
    pub old: ObjectId,
    pub new: ObjectId,
}

impl RefUpdate {
    pub fn parse(refname: &str, old: &str, new: &str) -> Result<RefUpdate> {
        let parse = |hex: &str| {
            ObjectId::from_hex(hex.as_bytes()).wrap_err_with(|| format!("Invalid object id: {hex}"))
        };
        Ok(RefUpdate {
            refname: refname.to_string(),
            old: parse(old)?,
            new: parse(new)?,
        })
    }
}

/// Outcome of the hook, as seen by git.
#[derive(Debug)]
pub enum Verdict {
    Permit,
    Reject(MergeValidationError),
}

pub fn update(repo: &Repo, base_path: Option<&Path>, update: &RefUpdate) -> Result<Verdict> {
    if !update.refname.starts_with("refs/heads/") {
        log::debug!("Ignoring update of {}", update.refname);
        return Ok(Verdict::Permit);
    }
    if update.new.is_null() {
        log::debug!("Ignoring deletion of {}", update.refname);
        return Ok(Verdict::Permit);
    }

    let commit = load_commit(repo, update.new)
        .wrap_err_with(|| format!("Failed to load pushed commit {}", update.new))?;

    let project = match ProjectName::from_repo(repo, base_path) {
        Ok(project) => project,
        Err(e) => return Ok(Verdict::Reject(MergeValidationError::Configuration(e))),
    };
    let store = GitConfigStore::for_repo(repo, base_path);
    let mut registry = Registry::new();
    plugin::configure(&mut registry, Arc::new(store)).wrap_err("Failed to register listeners")?;

    let branch = BranchNameKey::new(project.clone(), update.refname.clone());
    let merge = PreMerge {
        repository: repo.git_dir(),
        commit: &commit,
        project: &project,
        branch: &branch,
        patch_set: None,
    };

    match registry.on_pre_merge(&merge) {
        Ok(()) => Ok(Verdict::Permit),
        Err(e) => Ok(Verdict::Reject(e)),
    }
}

/// Pushed objects sit in git's quarantine directory until every hook has
/// passed, which only git itself knows about through its environment.
fn load_commit(repo: &Repo, id: ObjectId) -> Result<CandidateCommit> {
    let output = cmd!("git --git-dir", repo.git_dir(), "rev-parse", format!("{id}^@"))
        .checked_output(&[0])?;
    let parents = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| ObjectId::from_hex(line.trim().as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .wrap_err("Unexpected output from `git rev-parse`")?;
    Ok(CandidateCommit::new(id, parents))
}

/// Prints a rejection for the pusher. Git relays stderr with a `remote:`
/// prefix.
pub fn report_rejection(refname: &str, err: &MergeValidationError) {
    eprintln!("{} {}", "rejected".red().bold(), refname.yellow());
    for line in err.to_string().lines() {
        eprintln!("  {line}");
    }
    match err {
        MergeValidationError::MergeRequired { branch, parents } => {
            eprintln!(
                "  Branch {} is a merge branch and this commit has {} parent(s).",
                branch.yellow(),
                parents
            );
            eprintln!("  Submit a merge commit to {} first.", branch.yellow());
        }
        MergeValidationError::Configuration(source) => {
            eprintln!("  {source}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_update_arguments() {
        let null = "0".repeat(40);
        let tip = "1".repeat(40);
        let update = RefUpdate::parse("refs/heads/release", &null, &tip).unwrap();
        assert!(update.old.is_null());
        assert_eq!(update.new.to_string(), tip);

        let err = RefUpdate::parse("refs/heads/release", &null, "xyz").unwrap_err();
        assert!(err.to_string().contains("Invalid object id: xyz"));
    }
}
