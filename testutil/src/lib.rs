use std::{
    fs,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

#[macro_export]
macro_rules! test_context {
    () => {
        $crate::TestContextBuilder::new().binary(env!("CARGO_BIN_EXE_restrictsubmit"))
    };
}

#[macro_export]
macro_rules! test_context_minimal {
    () => {
        $crate::TestContextBuilder::new_minimal().binary(env!("CARGO_BIN_EXE_restrictsubmit"))
    };
}

/// Project name of the server repository every context creates.
pub const PROJECT: &str = "app";

pub const MERGE_BRANCHES_KEY: &str = "plugin.restrictsubmit.mergebranches";

pub struct TestContextBuilder {
    install_hooks: bool,
    initial_commit: bool,
    branches: Vec<String>,
    bin: Option<PathBuf>,
}

impl Default for TestContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContextBuilder {
    /// A server with the hook installed, and a clone whose `main` has been
    /// pushed.
    pub fn new() -> Self {
        Self {
            install_hooks: true,
            initial_commit: true,
            branches: Vec::new(),
            bin: None,
        }
    }

    /// An empty server and an empty clone.
    pub fn new_minimal() -> Self {
        Self {
            install_hooks: false,
            initial_commit: false,
            branches: Vec::new(),
            bin: None,
        }
    }

    pub fn binary(&mut self, bin: impl Into<PathBuf>) -> &mut Self {
        self.bin = Some(bin.into());
        self
    }

    pub fn install_hooks(&mut self, install_hooks: bool) -> &mut Self {
        self.install_hooks = install_hooks;
        self
    }

    pub fn initial_commit(&mut self, initial_commit: bool) -> &mut Self {
        self.initial_commit = initial_commit;
        self
    }

    /// Branches to create from `main` and push before the hook is installed.
    pub fn branch(&mut self, name: &str) -> &mut Self {
        self.branches.push(name.to_string());
        self
    }

    pub fn build(&self) -> TestContext {
        let dir = TempDir::new().unwrap();
        let base_path = dir.path().join("srv");
        let server_path = base_path.join(format!("{PROJECT}.git"));
        fs::create_dir_all(&server_path).unwrap();
        init_git_bare_repo(&server_path);

        let repo_path = dir.path().join("local");
        fs::create_dir(&repo_path).unwrap();
        init_git_repo(&repo_path, &server_path);

        let ctx = TestContext {
            dir,
            base_path,
            server_path,
            repo_path,
            bin_path: self.bin.clone().expect("restrictsubmit binary path must be set"),
        };

        if self.initial_commit {
            ctx.commit("Initial commit");
            ctx.run_git(&["push", "--quiet", "origin", "main"]);
            for branch in &self.branches {
                ctx.run_git(&["push", "--quiet", "origin", &format!("main:refs/heads/{branch}")]);
            }
        }

        if self.install_hooks {
            ctx.install_hooks();
        }

        ctx
    }
}

pub struct TestContext {
    pub dir: TempDir,
    /// Directory holding all server projects.
    pub base_path: PathBuf,
    pub server_path: PathBuf,
    pub repo_path: PathBuf,
    pub bin_path: PathBuf,
}

impl TestContext {
    /// `restrictsubmit`, run inside the server repository.
    pub fn restrictsubmit(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::new(&self.bin_path);
        cmd.current_dir(&self.server_path);
        cmd.env_remove("RESTRICTSUBMIT_BASE_PATH");
        cmd
    }

    pub fn git(&self) -> assert_cmd::Command {
        git_cmd(&self.repo_path)
    }

    pub fn server_git(&self) -> assert_cmd::Command {
        git_cmd(&self.server_path)
    }

    pub fn run_git(&self, args: &[&str]) {
        self.git().args(args).assert().success();
    }

    pub fn install_hooks(&self) {
        self.restrictsubmit().args(["install"]).assert().success();
    }

    pub fn commit(&self, msg: &str) {
        self.run_git(&["commit", "--quiet", "--allow-empty", "-m", msg]);
    }

    pub fn checkout(&self, branch_name: &str) {
        self.run_git(&["checkout", "--quiet", branch_name]);
    }

    pub fn checkout_new(&self, branch_name: &str) {
        self.run_git(&["checkout", "--quiet", "-b", branch_name]);
    }

    /// Checks out `branch` tracking the server's branch of the same name.
    pub fn checkout_remote(&self, branch: &str) {
        self.run_git(&["fetch", "--quiet", "origin"]);
        self.run_git(&["checkout", "--quiet", "-B", branch, &format!("origin/{branch}")]);
    }

    /// Creates a merge commit of `other` into the current branch.
    pub fn merge(&self, other: &str) {
        self.run_git(&["merge", "--quiet", "--no-ff", "-m", &format!("Merge {other}"), other]);
    }

    pub fn push(&self, branch: &str) -> assert_cmd::assert::Assert {
        self.git().args(["push", "origin", branch]).assert()
    }

    pub fn set_merge_branches(&self, branches: &[&str]) {
        let _ = self
            .server_git()
            .args(["config", "--unset-all", MERGE_BRANCHES_KEY])
            .output();
        for branch in branches {
            git_cmd(&self.server_path)
                .args(["config", "--add", MERGE_BRANCHES_KEY, branch])
                .assert()
                .success();
        }
    }

    /// The server's merge branches, or `None` when the key is unset.
    pub fn merge_branches(&self) -> Option<Vec<String>> {
        let output = self
            .server_git()
            .args(["config", "--get-all", MERGE_BRANCHES_KEY])
            .output()
            .unwrap();
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8(output.stdout).unwrap();
        Some(stdout.lines().map(str::to_string).collect())
    }

    /// Object id of `rev` in the server repository.
    pub fn server_rev(&self, rev: &str) -> String {
        let output = self.server_git().args(["rev-parse", rev]).output().unwrap();
        assert!(output.status.success(), "unknown revision {rev}");
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.server_path.join("hooks")
    }
}

fn git_cmd(path: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new("git");
    cmd.current_dir(path);
    cmd
}

fn run_git_cmd(path: &Path, args: &[&str]) {
    git_cmd(path).args(args).assert().success();
}

pub fn init_git_bare_repo(path: &Path) {
    run_git_cmd(path, &["init", "--quiet", "--bare"]);
    run_git_cmd(path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    // Hooks run from the git dir of a bare repository; pin them there in case
    // a global core.hooksPath is set.
    run_git_cmd(path, &["config", "core.hooksPath", "hooks"]);
}

fn init_git_repo(path: &Path, remote_path: &Path) {
    run_git_cmd(path, &["init", "--quiet"]);
    // Must config user identity for commits to work
    run_git_cmd(path, &["config", "user.email", "test@example.com"]);
    run_git_cmd(path, &["config", "user.name", "Test User"]);
    run_git_cmd(path, &["config", "commit.gpgsign", "false"]);
    // Ensure default branch is main
    run_git_cmd(path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    run_git_cmd(path, &["remote", "add", "origin", remote_path.to_str().unwrap()]);
}
