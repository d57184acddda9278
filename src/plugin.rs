//! Registration of the merge-branch listener and its project setting.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::config::ProjectConfigStore;
use crate::validation::{
    MergeValidationError, MergeValidationListener, PreMerge, SubmitNoMergeValidator,
};

pub const PLUGIN_NAME: &str = "restrictsubmit";
pub const CONFIG_MERGEBRANCHES: &str = "mergebranches";

/// Value kinds of exported settings. Only multi-valued strings are needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigEntryType {
    Array,
}

/// A setting project owners can edit through the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectConfigEntry {
    pub display_name: String,
    pub default_value: Option<String>,
    #[serde(rename = "type")]
    pub ty: ConfigEntryType,
    pub permitted_values: Option<Vec<String>>,
    pub inheritable: bool,
    pub description: String,
}

pub fn merge_branches_entry() -> ProjectConfigEntry {
    ProjectConfigEntry {
        display_name: "Merge Branches".to_string(),
        default_value: None,
        ty: ConfigEntryType::Array,
        permitted_values: None,
        inheritable: false,
        description: "Changes on these branches cannot be submitted, until a merge branch on \
                      the respective branch has been submitted."
            .to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("config entry {0:?} is already exported")]
    DuplicateConfigEntry(String),
}

/// The host's extension points: the set of merge validation listeners and
/// the exported project settings.
#[derive(Default)]
pub struct Registry {
    listeners: Vec<Box<dyn MergeValidationListener>>,
    config_entries: BTreeMap<String, ProjectConfigEntry>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn bind_listener(&mut self, listener: Box<dyn MergeValidationListener>) {
        self.listeners.push(listener);
    }

    pub fn export_config_entry(
        &mut self,
        name: &str,
        entry: ProjectConfigEntry,
    ) -> Result<(), RegistrationError> {
        if self.config_entries.contains_key(name) {
            return Err(RegistrationError::DuplicateConfigEntry(name.to_string()));
        }
        self.config_entries.insert(name.to_string(), entry);
        Ok(())
    }

    pub fn config_entry(&self, name: &str) -> Option<&ProjectConfigEntry> {
        self.config_entries.get(name)
    }

    pub fn config_entries(&self) -> impl Iterator<Item = (&str, &ProjectConfigEntry)> {
        self.config_entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Runs every listener in binding order; the first rejection wins.
    pub fn on_pre_merge(&self, merge: &PreMerge<'_>) -> Result<(), MergeValidationError> {
        self.listeners
            .iter()
            .try_for_each(|listener| listener.on_pre_merge(merge))
    }
}

/// Binds the merge-branch validator and exports the `mergebranches` setting.
pub fn configure(
    registry: &mut Registry,
    store: Arc<dyn ProjectConfigStore>,
) -> Result<(), RegistrationError> {
    registry.bind_listener(Box::new(SubmitNoMergeValidator::new(store)));
    registry.export_config_entry(CONFIG_MERGEBRANCHES, merge_branches_entry())
}
