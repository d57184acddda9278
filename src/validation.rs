//! Pre-merge validation.
//!
//! The host calls every bound [`MergeValidationListener`] right before it
//! finalizes a submission; any error vetoes it. [`SubmitNoMergeValidator`]
//! refuses ordinary commits on configured merge branches and lifts the
//! restriction once a merge commit lands there.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use gix::ObjectId;

use crate::config::{ProjectConfigStore, ProjectName, StoreError};
use crate::plugin::{CONFIG_MERGEBRANCHES, PLUGIN_NAME};

const R_HEADS: &str = "refs/heads/";

/// The commit being submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateCommit {
    pub id: ObjectId,
    pub parents: Vec<ObjectId>,
}

impl CandidateCommit {
    pub fn new(id: ObjectId, parents: impl IntoIterator<Item = ObjectId>) -> CandidateCommit {
        CandidateCommit {
            id,
            parents: parents.into_iter().collect(),
        }
    }

    pub fn parent_count(&self) -> usize {
        self.parents.len()
    }

    pub fn is_merge(&self) -> bool {
        self.parent_count() > 1
    }
}

/// A branch of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNameKey {
    pub project: ProjectName,
    /// Full ref name, e.g. `refs/heads/release`.
    pub name: String,
}

impl BranchNameKey {
    pub fn new(project: ProjectName, name: impl Into<String>) -> BranchNameKey {
        let name = name.into();
        let name = if name.starts_with("refs/") {
            name
        } else {
            format!("{R_HEADS}{name}")
        };
        BranchNameKey { project, name }
    }

    pub fn short_name(&self) -> &str {
        self.name.strip_prefix(R_HEADS).unwrap_or(&self.name)
    }
}

impl fmt::Display for BranchNameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.short_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSetId {
    pub change: u32,
    pub patch_set: u32,
}

impl fmt::Display for PatchSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.change, self.patch_set)
    }
}

/// Everything a listener learns about one candidate merge.
#[derive(Debug, Clone, Copy)]
pub struct PreMerge<'a> {
    /// Git dir of the destination repository.
    pub repository: &'a Path,
    pub commit: &'a CandidateCommit,
    pub project: &'a ProjectName,
    pub branch: &'a BranchNameKey,
    pub patch_set: Option<PatchSetId>,
}

/// Merge status codes from the host's fixed vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMergeStatus {
    InvalidProjectConfiguration,
    InvalidProjectConfigurationParentProjectNotFound,
}

impl CommitMergeStatus {
    pub fn message(self) -> &'static str {
        match self {
            CommitMergeStatus::InvalidProjectConfiguration => {
                "Change contains an invalid project configuration."
            }
            CommitMergeStatus::InvalidProjectConfigurationParentProjectNotFound => {
                "Change contains an invalid project configuration:\nParent project not found."
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MergeValidationError {
    /// The destination project's configuration could not be read or written.
    #[error("{}", CommitMergeStatus::InvalidProjectConfigurationParentProjectNotFound.message())]
    Configuration(#[source] StoreError),
    /// The destination is a merge branch and the commit is not a merge.
    #[error("{}", CommitMergeStatus::InvalidProjectConfiguration.message())]
    MergeRequired { branch: String, parents: usize },
}

impl MergeValidationError {
    pub fn status(&self) -> CommitMergeStatus {
        match self {
            MergeValidationError::Configuration(_) => {
                CommitMergeStatus::InvalidProjectConfigurationParentProjectNotFound
            }
            MergeValidationError::MergeRequired { .. } => {
                CommitMergeStatus::InvalidProjectConfiguration
            }
        }
    }
}

pub trait MergeValidationListener: Send + Sync {
    fn on_pre_merge(&self, merge: &PreMerge<'_>) -> Result<(), MergeValidationError>;
}

pub struct SubmitNoMergeValidator {
    store: Arc<dyn ProjectConfigStore>,
}

impl SubmitNoMergeValidator {
    pub fn new(store: Arc<dyn ProjectConfigStore>) -> SubmitNoMergeValidator {
        SubmitNoMergeValidator { store }
    }
}

impl MergeValidationListener for SubmitNoMergeValidator {
    fn on_pre_merge(&self, merge: &PreMerge<'_>) -> Result<(), MergeValidationError> {
        log::debug!(
            "Checking {} for {} in {}",
            merge.commit.id,
            merge.branch,
            merge.repository.display()
        );
        let Some(mut merge_branches) = self
            .store
            .string_list(merge.project, PLUGIN_NAME, CONFIG_MERGEBRANCHES)
            .map_err(MergeValidationError::Configuration)?
        else {
            log::debug!("No merge branches configured for {}", merge.project);
            return Ok(());
        };

        let branch = merge.branch.short_name();
        let Some(pos) = merge_branches.iter().position(|b| b == branch) else {
            return Ok(());
        };

        if !merge.commit.is_merge() {
            log::info!(
                "Rejecting {} on {} ({}): merge branch requires a merge commit ({} parent(s))",
                merge.commit.id,
                merge.branch,
                merge.repository.display(),
                merge.commit.parent_count()
            );
            return Err(MergeValidationError::MergeRequired {
                branch: branch.to_string(),
                parents: merge.commit.parent_count(),
            });
        }

        // Duplicates are left in place: only the first entry is unlocked.
        merge_branches.remove(pos);
        self.store
            .set_string_list(merge.project, PLUGIN_NAME, CONFIG_MERGEBRANCHES, &merge_branches)
            .map_err(|e| {
                let repository = merge.repository.display();
                log::warn!("Failed to unlock {} in {repository}: {e}", merge.branch);
                MergeValidationError::Configuration(e)
            })?;

        let id = merge.commit.id;
        match merge.patch_set {
            Some(ps) => log::info!("Merge {id} ({ps}) unlocked {}", merge.branch),
            None => log::info!("Merge {id} unlocked {}", merge.branch),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;

    const PROJECT: &str = "app";

    fn oid(n: u8) -> ObjectId {
        ObjectId::from_bytes_or_panic(&[n; 20])
    }

    fn commit(parents: usize) -> CandidateCommit {
        CandidateCommit::new(oid(0xff), (1..=parents as u8).map(oid))
    }

    fn store_with(branches: &[&str]) -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new().with_string_list(
            PROJECT,
            PLUGIN_NAME,
            CONFIG_MERGEBRANCHES,
            branches,
        ))
    }

    fn submit(
        store: &Arc<MemoryStore>,
        project: &str,
        branch: &str,
        parents: usize,
    ) -> Result<(), MergeValidationError> {
        submit_to(store.clone(), project, branch, parents)
    }

    fn submit_to(
        store: Arc<dyn ProjectConfigStore>,
        project: &str,
        branch: &str,
        parents: usize,
    ) -> Result<(), MergeValidationError> {
        let validator = SubmitNoMergeValidator::new(store);
        let project = ProjectName::new(project);
        let branch = BranchNameKey::new(project.clone(), branch);
        let commit = commit(parents);
        validator.on_pre_merge(&PreMerge {
            repository: Path::new("/srv/git/app.git"),
            commit: &commit,
            project: &project,
            branch: &branch,
            patch_set: Some(PatchSetId { change: 1, patch_set: 1 }),
        })
    }

    fn branches(store: &MemoryStore) -> Option<Vec<String>> {
        store
            .string_list(&ProjectName::new(PROJECT), PLUGIN_NAME, CONFIG_MERGEBRANCHES)
            .unwrap()
    }

    #[test]
    fn test_non_merge_on_merge_branch_is_rejected() {
        let store = store_with(&["release", "stable"]);
        let err = submit(&store, PROJECT, "refs/heads/release", 1).unwrap_err();

        assert!(matches!(
            &err,
            MergeValidationError::MergeRequired { branch, parents: 1 } if branch == "release"
        ));
        assert_eq!(err.status(), CommitMergeStatus::InvalidProjectConfiguration);
        assert_eq!(branches(&store).unwrap(), ["release", "stable"]);
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn test_root_commit_on_merge_branch_is_rejected() {
        let store = store_with(&["release"]);
        assert!(matches!(
            submit(&store, PROJECT, "release", 0),
            Err(MergeValidationError::MergeRequired { parents: 0, .. })
        ));
    }

    #[test]
    fn test_merge_unlocks_branch() {
        let store = store_with(&["release", "stable"]);
        submit(&store, PROJECT, "refs/heads/release", 2).unwrap();

        assert_eq!(branches(&store).unwrap(), ["stable"]);
        assert_eq!(store.writes(), 1);

        // The branch is no longer listed, so anything goes.
        submit(&store, PROJECT, "refs/heads/release", 2).unwrap();
        submit(&store, PROJECT, "refs/heads/release", 1).unwrap();
        assert_eq!(store.writes(), 1);
    }

    #[test]
    fn test_octopus_merge_unlocks_branch() {
        let store = store_with(&["release"]);
        submit(&store, PROJECT, "release", 3).unwrap();
        assert_eq!(branches(&store).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_unconfigured_project_permits_everything() {
        let store = Arc::new(MemoryStore::new().add_project(PROJECT));
        for parents in 0..3 {
            submit(&store, PROJECT, "refs/heads/release", parents).unwrap();
            submit(&store, PROJECT, "refs/heads/main", parents).unwrap();
        }
        assert_eq!(branches(&store), None);
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn test_unlisted_branch_is_untouched() {
        let store = store_with(&["release", "stable"]);
        submit(&store, PROJECT, "refs/heads/main", 1).unwrap();
        submit(&store, PROJECT, "refs/heads/main", 2).unwrap();
        assert_eq!(branches(&store).unwrap(), ["release", "stable"]);
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn test_membership_is_exact() {
        let store = store_with(&["release"]);
        submit(&store, PROJECT, "refs/heads/release-1.0", 1).unwrap();
        submit(&store, PROJECT, "refs/heads/Release", 1).unwrap();
        submit(&store, PROJECT, "refs/heads/team/release", 1).unwrap();
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn test_duplicate_entries_are_removed_one_at_a_time() {
        let store = store_with(&["release", "stable", "release"]);
        submit(&store, PROJECT, "release", 2).unwrap();
        assert_eq!(branches(&store).unwrap(), ["stable", "release"]);

        assert!(submit(&store, PROJECT, "release", 1).is_err());
        submit(&store, PROJECT, "release", 2).unwrap();
        assert_eq!(branches(&store).unwrap(), ["stable"]);
    }

    #[test]
    fn test_unknown_project_is_a_configuration_error() {
        let store = store_with(&["release"]);
        for (branch, parents) in [("release", 1), ("release", 2), ("main", 0)] {
            let err = submit(&store, "elsewhere", branch, parents).unwrap_err();
            assert!(matches!(
                &err,
                MergeValidationError::Configuration(StoreError::NoSuchProject(p))
                    if p.as_str() == "elsewhere"
            ));
            assert_eq!(
                err.status(),
                CommitMergeStatus::InvalidProjectConfigurationParentProjectNotFound
            );
        }
    }

    /// Reads succeed but every write is refused.
    struct ReadOnlyStore(MemoryStore);

    impl ProjectConfigStore for ReadOnlyStore {
        fn string_list(
            &self,
            project: &ProjectName,
            plugin: &str,
            key: &str,
        ) -> Result<Option<Vec<String>>, StoreError> {
            self.0.string_list(project, plugin, key)
        }

        fn set_string_list(
            &self,
            project: &ProjectName,
            _plugin: &str,
            _key: &str,
            _values: &[String],
        ) -> Result<(), StoreError> {
            Err(StoreError::Write {
                project: project.clone(),
                message: "config is locked".to_string(),
            })
        }
    }

    #[test]
    fn test_failed_unlock_is_a_configuration_error() {
        let inner = MemoryStore::new().with_string_list(
            PROJECT,
            PLUGIN_NAME,
            CONFIG_MERGEBRANCHES,
            &["release", "stable"],
        );
        let store = Arc::new(ReadOnlyStore(inner));

        let err = submit_to(store.clone(), PROJECT, "refs/heads/release", 2).unwrap_err();
        assert!(matches!(
            &err,
            MergeValidationError::Configuration(StoreError::Write { project, .. })
                if project.as_str() == PROJECT
        ));
        assert_eq!(
            err.status(),
            CommitMergeStatus::InvalidProjectConfigurationParentProjectNotFound
        );
        assert_eq!(
            store
                .string_list(&ProjectName::new(PROJECT), PLUGIN_NAME, CONFIG_MERGEBRANCHES)
                .unwrap()
                .unwrap(),
            ["release", "stable"]
        );

        // Rejections and unlisted branches never write, so they are unaffected.
        assert!(matches!(
            submit_to(store.clone(), PROJECT, "release", 1),
            Err(MergeValidationError::MergeRequired { .. })
        ));
        submit_to(store, PROJECT, "main", 2).unwrap();
    }

    #[test]
    fn test_branch_short_name() {
        let project = ProjectName::new(PROJECT);
        assert_eq!(BranchNameKey::new(project.clone(), "refs/heads/a/b").short_name(), "a/b");
        assert_eq!(BranchNameKey::new(project.clone(), "main").name, "refs/heads/main");
        let meta = BranchNameKey::new(project, "refs/meta/config");
        assert_eq!(meta.short_name(), "refs/meta/config");
    }
}
