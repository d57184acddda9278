use std::ffi::OsStr;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use eyre::{Result, WrapErr, bail};

#[macro_export]
macro_rules! cmd {
    ($cmd:literal $(, $arg:expr)* $(,)?) => {{
        let bin_str = format!($cmd);
        let mut parts: Vec<std::ffi::OsString> =
            bin_str.split_whitespace().map(std::ffi::OsString::from).collect();
        $(parts.push(std::ffi::OsString::from(&$arg));)*
        let (bin, args) = match parts.split_first() {
            Some((bin, args)) => (bin.clone(), args.to_vec()),
            None => panic!("Command cannot be empty"),
        };

        log::debug!(
            "exec: {} {}",
            bin.to_string_lossy(),
            args.iter()
                .map(|s| {
                    let s = s.to_string_lossy();
                    if s.contains(' ') {
                        format!("'{}'", s)
                    } else {
                        s.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(" ")
        );
        $crate::util::cmd(bin, args)
    }};
}

pub fn cmd<I: AsRef<OsStr>>(
    name: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = I>,
) -> Command {
    let mut c = Command::new(name);
    c.args(args);
    c
}

pub trait CommandExt {
    /// Runs the command to completion, returning its output, and fails unless
    /// it exits with one of `ok_codes`.
    fn checked_output(self, ok_codes: &[i32]) -> Result<Output>;
}

impl CommandExt for Command {
    fn checked_output(mut self, ok_codes: &[i32]) -> Result<Output> {
        let program = self.get_program().to_string_lossy().into_owned();
        let output = self
            .output()
            .wrap_err_with(|| format!("Failed to run `{program}`"))?;
        match output.status.code() {
            Some(code) if ok_codes.contains(&code) => Ok(output),
            _ => bail!(
                "`{program}` failed with {}: {}",
                output.status,
                to_trimmed_string_lossy(&output.stderr)
            ),
        }
    }
}

pub fn to_trimmed_string_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// A repository opened by the CLI, with the config accessors the subcommands
/// share.
pub struct Repo(gix::Repository);

impl Repo {
    pub fn discover(path: impl AsRef<Path>) -> Result<Repo> {
        let path = path.as_ref();
        let repo = gix::discover(path)
            .wrap_err_with(|| format!("Failed to open repository at {}", path.display()))?;
        Ok(Repo(repo))
    }

    pub fn config_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .0
            .config_snapshot()
            .string(key)
            .map(|v| v.to_string()))
    }

    pub fn config_path(&self, key: &str) -> Result<Option<PathBuf>> {
        let Some(value) = self.config_string(key)? else {
            return Ok(None);
        };
        let path = PathBuf::from(value);
        if path.is_absolute() {
            Ok(Some(path))
        } else {
            // Git runs hooks from the worktree root, or from the git dir of a
            // bare repository, so relative paths are anchored there.
            let root = self.project_dir();
            let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
            Ok(Some(root.join(path)))
        }
    }

    /// The directory that identifies this repository as a project: the
    /// worktree for non-bare repositories, the git dir otherwise.
    pub fn project_dir(&self) -> &Path {
        self.0.workdir().unwrap_or(self.0.git_dir())
    }
}

impl Deref for Repo {
    type Target = gix::Repository;

    fn deref(&self) -> &gix::Repository {
        &self.0
    }
}
