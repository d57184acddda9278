//! Project-scoped plugin configuration.
//!
//! Configuration lives with the host: each project stores plugin values under
//! `plugin.<plugin>.<key>` in its own git config. The validator only sees the
//! [`ProjectConfigStore`] trait, so it can be driven by [`MemoryStore`] in
//! tests and by [`GitConfigStore`] on a server.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::util::Repo;

/// Name of a project, relative to the server's base path and without a
/// trailing `.git`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectName(String);

impl ProjectName {
    pub fn new(name: impl Into<String>) -> ProjectName {
        ProjectName(name.into())
    }

    /// Derives the project name of `repo`.
    ///
    /// With a base path the name is the repository's path below it, so
    /// `<base>/team/app.git` becomes `team/app`. Without one, the repository's
    /// parent directory acts as the base path.
    pub fn from_repo(repo: &Repo, base_path: Option<&Path>) -> Result<ProjectName, StoreError> {
        let dir = canonical(repo.project_dir());
        let relative = match base_path {
            Some(base) => dir.strip_prefix(canonical(base)).ok().map(Path::to_path_buf),
            None => dir.file_name().map(PathBuf::from),
        };
        let name = relative
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StoreError::Unresolvable(dir.clone()))?;
        let name = name.strip_suffix(".git").unwrap_or(&name);
        Ok(ProjectName::new(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no such project: {0}")]
    NoSuchProject(ProjectName),
    #[error("cannot derive a project name for {}", .0.display())]
    Unresolvable(PathBuf),
    #[error("failed to open configuration of project {project}")]
    Open {
        project: ProjectName,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to write configuration of project {project}: {message}")]
    Write { project: ProjectName, message: String },
}

/// Typed access to per-project plugin configuration.
///
/// Both operations fail with [`StoreError::NoSuchProject`] when `project`
/// cannot be resolved.
pub trait ProjectConfigStore: Send + Sync {
    /// Reads a string list, or `None` when the key is not configured.
    fn string_list(
        &self,
        project: &ProjectName,
        plugin: &str,
        key: &str,
    ) -> Result<Option<Vec<String>>, StoreError>;

    /// Replaces the string list stored under `key`. Writes are synchronous.
    fn set_string_list(
        &self,
        project: &ProjectName,
        plugin: &str,
        key: &str,
        values: &[String],
    ) -> Result<(), StoreError>;
}

type PluginValues = BTreeMap<(String, String), Vec<String>>;

/// An in-memory store. Only projects that were added or seeded exist.
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: Mutex<HashMap<ProjectName, PluginValues>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn add_project(self, project: &str) -> MemoryStore {
        self.lock().entry(ProjectName::new(project)).or_default();
        self
    }

    /// Seeds `key` of `project` (creating the project) without counting it as
    /// a write.
    pub fn with_string_list(
        self,
        project: &str,
        plugin: &str,
        key: &str,
        values: &[&str],
    ) -> MemoryStore {
        self.lock()
            .entry(ProjectName::new(project))
            .or_default()
            .insert(
                (plugin.to_string(), key.to_string()),
                values.iter().map(|v| v.to_string()).collect(),
            );
        self
    }

    /// Number of successful [`ProjectConfigStore::set_string_list`] calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ProjectName, PluginValues>> {
        self.projects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProjectConfigStore for MemoryStore {
    fn string_list(
        &self,
        project: &ProjectName,
        plugin: &str,
        key: &str,
    ) -> Result<Option<Vec<String>>, StoreError> {
        let projects = self.lock();
        let values = projects
            .get(project)
            .ok_or_else(|| StoreError::NoSuchProject(project.clone()))?;
        Ok(values.get(&(plugin.to_string(), key.to_string())).cloned())
    }

    fn set_string_list(
        &self,
        project: &ProjectName,
        plugin: &str,
        key: &str,
        values: &[String],
    ) -> Result<(), StoreError> {
        let mut projects = self.lock();
        let stored = projects
            .get_mut(project)
            .ok_or_else(|| StoreError::NoSuchProject(project.clone()))?;
        stored.insert((plugin.to_string(), key.to_string()), values.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Reads and writes plugin configuration in the git config of repositories
/// hosted below `base_path`.
#[derive(Debug, Clone)]
pub struct GitConfigStore {
    base_path: PathBuf,
}

impl GitConfigStore {
    pub fn new(base_path: impl Into<PathBuf>) -> GitConfigStore {
        GitConfigStore { base_path: base_path.into() }
    }

    /// The store serving `repo`: rooted at `base_path` when given, otherwise at
    /// the repository's parent directory.
    pub fn for_repo(repo: &Repo, base_path: Option<&Path>) -> GitConfigStore {
        let base = match base_path {
            Some(base) => base.to_path_buf(),
            None => canonical(repo.project_dir())
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        GitConfigStore::new(base)
    }

    fn project_dir(&self, project: &ProjectName) -> Result<PathBuf, StoreError> {
        let name = project.as_str();
        [format!("{name}.git"), name.to_string()]
            .into_iter()
            .map(|candidate| self.base_path.join(candidate))
            .find(|dir| dir.is_dir())
            .ok_or_else(|| StoreError::NoSuchProject(project.clone()))
    }

    fn open(&self, project: &ProjectName) -> Result<gix::Repository, StoreError> {
        let dir = self.project_dir(project)?;
        gix::open(&dir).map_err(|e| match e {
            gix::open::Error::NotARepository { .. } => StoreError::NoSuchProject(project.clone()),
            other => StoreError::Open {
                project: project.clone(),
                source: Box::new(other),
            },
        })
    }
}

fn config_key(plugin: &str, key: &str) -> String {
    format!("plugin.{plugin}.{key}")
}

/// Only the repository's own config file is consulted. System, global and
/// included files are host-wide settings and could never be written back.
fn read_local_config(
    project: &ProjectName,
    path: &Path,
) -> Result<gix::config::File<'static>, StoreError> {
    gix::config::File::from_path_no_includes(path.to_path_buf(), gix::config::Source::Local)
        .map_err(|e| StoreError::Open {
            project: project.clone(),
            source: Box::new(e),
        })
}

impl ProjectConfigStore for GitConfigStore {
    fn string_list(
        &self,
        project: &ProjectName,
        plugin: &str,
        key: &str,
    ) -> Result<Option<Vec<String>>, StoreError> {
        let repo = self.open(project)?;
        let config = read_local_config(project, &repo.git_dir().join("config"))?;
        let values = config
            .strings(config_key(plugin, key).as_str())
            .map(|values| values.into_iter().map(|v| v.to_string()).collect());
        Ok(values)
    }

    /// Replaces every value of `key` in one write. The new file is staged in
    /// `config.lock` and renamed over `config`, so a failure at any point
    /// leaves the previous list in place.
    fn set_string_list(
        &self,
        project: &ProjectName,
        plugin: &str,
        key: &str,
        values: &[String],
    ) -> Result<(), StoreError> {
        let repo = self.open(project)?;
        let path = repo.git_dir().join("config");
        let write_err = |message: String| StoreError::Write {
            project: project.clone(),
            message,
        };

        let permissions = std::fs::metadata(&path)
            .map_err(|e| write_err(format!("Failed to stat {}: {e}", path.display())))?
            .permissions();
        let mut lock = gix::lock::File::acquire_to_update_resource_with_permissions(
            &path,
            gix::lock::acquire::Fail::Immediately,
            None,
            || permissions.clone(),
        )
        .map_err(|e| write_err(format!("Failed to lock {}: {e}", path.display())))?;

        // Read under the lock so that unrelated settings written in the
        // meantime are carried over.
        let mut config = read_local_config(project, &path)?;
        if let Ok(mut existing) = config.raw_values_mut_by("plugin", Some(plugin.into()), key) {
            existing.delete_all();
        }
        if !values.is_empty() {
            let name = gix::config::parse::section::ValueName::try_from(key.to_string())
                .map_err(|e| write_err(format!("Invalid key {key}: {e}")))?;
            let mut section = config
                .section_mut_or_create_new("plugin", Some(plugin.into()))
                .map_err(|e| write_err(format!("Invalid plugin name {plugin}: {e}")))?;
            for value in values {
                section.push(name.clone(), Some(value.as_str().into()));
            }
        }

        lock.with_mut(|out| config.write_to(out))
            .map_err(|e| write_err(format!("Failed to write {}: {e}", path.display())))?;
        lock.commit()
            .map_err(|e| write_err(format!("Failed to replace {}: {e}", path.display())))?;
        log::debug!(
            "Wrote {} value(s) to {} of project {project}",
            values.len(),
            config_key(plugin, key)
        );
        Ok(())
    }
}
