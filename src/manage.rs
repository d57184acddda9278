//! Project-owner view of the `mergebranches` setting.

use std::path::Path;

use eyre::{Result, WrapErr, eyre};
use owo_colors::OwoColorize;

use crate::config::{GitConfigStore, ProjectConfigStore, ProjectName};
use crate::plugin::{self, CONFIG_MERGEBRANCHES, PLUGIN_NAME};
use crate::util::Repo;

/// The merge branches of one project, bound to the store they live in.
pub struct MergeBranches<S> {
    store: S,
    project: ProjectName,
}

impl MergeBranches<GitConfigStore> {
    pub fn open(repo: &Repo, base_path: Option<&Path>) -> Result<Self> {
        let project = ProjectName::from_repo(repo, base_path)?;
        let store = GitConfigStore::for_repo(repo, base_path);
        Ok(MergeBranches::new(store, project))
    }
}

impl<S: ProjectConfigStore> MergeBranches<S> {
    pub fn new(store: S, project: ProjectName) -> Self {
        MergeBranches { store, project }
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let branches = self
            .store
            .string_list(&self.project, PLUGIN_NAME, CONFIG_MERGEBRANCHES)
            .wrap_err_with(|| format!("Failed to read merge branches of {}", self.project))?;
        Ok(branches.unwrap_or_default())
    }

    /// Appends branches that are not listed yet. Returns the ones added.
    pub fn add<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<Vec<String>> {
        let mut branches = self.list()?;
        let mut added = Vec::new();
        for name in names {
            let name = short_name(name)?;
            if branches.iter().any(|b| b == name) {
                log::info!("{} is already a merge branch.", name.yellow());
                continue;
            }
            branches.push(name.to_string());
            added.push(name.to_string());
        }
        if !added.is_empty() {
            self.save(&branches)?;
        }
        Ok(added)
    }

    /// Removes the first entry of each named branch. Returns the ones removed.
    pub fn remove<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<Vec<String>> {
        let mut branches = self.list()?;
        let mut removed = Vec::new();
        for name in names {
            let name = short_name(name)?;
            match branches.iter().position(|b| b == name) {
                Some(pos) => {
                    removed.push(branches.remove(pos));
                }
                None => log::warn!("{} is not a merge branch.", name.yellow()),
            }
        }
        if !removed.is_empty() {
            self.save(&branches)?;
        }
        Ok(removed)
    }

    fn save(&self, branches: &[String]) -> Result<()> {
        self.store
            .set_string_list(&self.project, PLUGIN_NAME, CONFIG_MERGEBRANCHES, branches)
            .wrap_err_with(|| format!("Failed to write merge branches of {}", self.project))
    }
}

fn short_name(name: &str) -> Result<&str> {
    let name = name.strip_prefix("refs/heads/").unwrap_or(name);
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(eyre!("Invalid branch name: {:?}", name));
    }
    Ok(name)
}

/// The declared setting, as JSON.
pub fn describe() -> Result<String> {
    let mut entry = serde_json::to_value(plugin::merge_branches_entry())?;
    if let Some(obj) = entry.as_object_mut() {
        obj.insert("name".to_string(), CONFIG_MERGEBRANCHES.into());
        obj.insert("plugin".to_string(), PLUGIN_NAME.into());
    }
    Ok(serde_json::to_string_pretty(&entry)?)
}
