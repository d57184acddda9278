//! Installs the server-side `update` hook that calls back into this binary.

use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr, bail};
use owo_colors::OwoColorize;

use crate::util::Repo;

const HOOK: &str = "update";
const MARKER: &str = "# restrictsubmit-installer: managed";

pub fn install(repo: &Repo, force: bool, allow_global: bool) -> Result<()> {
    let hooks_dir = hooks_dir(repo, allow_global)?;
    let exe = std::env::current_exe().wrap_err("Failed to locate the restrictsubmit binary")?;
    fs::create_dir_all(&hooks_dir)
        .wrap_err_with(|| format!("Failed to create {}", hooks_dir.display()))?;

    let hook_path = hooks_dir.join(HOOK);
    if is_unmanaged(&hook_path)? {
        if !force {
            bail!(
                "Refusing to overwrite unmanaged update hook {}\nUse --force to replace it.",
                hook_path.display()
            );
        }
        log::warn!("Replacing unmanaged hook {} (--force)", hook_path.display());
    }

    fs::write(&hook_path, shim(&exe))
        .wrap_err_with(|| format!("Failed to write {}", hook_path.display()))?;
    #[cfg(unix)]
    fs::set_permissions(&hook_path, fs::Permissions::from_mode(0o755))
        .wrap_err_with(|| format!("Failed to make {} executable", hook_path.display()))?;

    log::info!("Installed {} hook in {}", HOOK.green(), hooks_dir.display());
    Ok(())
}

fn is_unmanaged(hook_path: &Path) -> Result<bool> {
    if !hook_path.exists() {
        return Ok(false);
    }
    let content = fs::read_to_string(hook_path)
        .wrap_err_with(|| format!("Failed to read {}", hook_path.display()))?;
    Ok(!content.contains(MARKER))
}

fn shim(exe: &Path) -> String {
    format!(
        "#!/bin/sh\n\
         {MARKER}\n\
         # Rewritten by 'restrictsubmit install'; local edits are lost.\n\
         \n\
         exec {} hook {HOOK} \"$@\"\n",
        sh_quote(&exe.to_string_lossy())
    )
}

/// Quotes `s` as a single POSIX shell word. Nothing is special inside single
/// quotes, so only `'` itself needs escaping.
fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// `core.hooksPath` when set, otherwise `<git-dir>/hooks`. A hooks path
/// outside the repository is shared with other repositories and needs
/// `allow_global`.
fn hooks_dir(repo: &Repo, allow_global: bool) -> Result<PathBuf> {
    let Some(configured) = repo.config_path("core.hooksPath")? else {
        return Ok(repo.git_dir().join("hooks"));
    };

    let root = repo.project_dir();
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let dir = configured.canonicalize().unwrap_or(configured);
    if !dir.starts_with(&root) {
        if !allow_global {
            bail!(
                "core.hooksPath {} is outside the repository\nUse --allow-global to install there.",
                dir.display()
            );
        }
        log::warn!("Installing into shared hooks path {} (--allow-global)", dir.display());
    }
    Ok(dir)
}
