use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use eyre::Result;
use owo_colors::OwoColorize;

use restrictsubmit::config::GitConfigStore;
use restrictsubmit::hook::{self, RefUpdate, Verdict};
use restrictsubmit::manage::{self, MergeBranches};
use restrictsubmit::{install, util};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Directory that contains all projects. Defaults to the parent directory
    /// of the current repository.
    #[arg(long, global = true, env = "RESTRICTSUBMIT_BASE_PATH")]
    base_path: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the server-side hook into this repository.
    Install {
        /// Overwrite existing hooks that restrictsubmit does not manage.
        #[arg(long)]
        force: bool,
        /// Allow installing into a hooks path outside the repository.
        #[arg(long)]
        allow_global: bool,
    },
    /// Git hook entry points.
    #[command(subcommand)]
    Hook(HookCommand),
    /// Inspect or edit this project's merge branches.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum HookCommand {
    /// Validate a single ref update (git's `update` hook).
    Update {
        refname: String,
        old: String,
        new: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the configured merge branches, one per line.
    List,
    /// Add merge branches.
    Add {
        #[arg(required = true)]
        branches: Vec<String>,
    },
    /// Remove merge branches.
    Remove {
        #[arg(required = true)]
        branches: Vec<String>,
    },
    /// Print the declaration of the setting as JSON.
    Describe,
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let base_path = cli.base_path.as_deref();
    match cli.command {
        Commands::Install { force, allow_global } => {
            let repo = util::Repo::discover(".")?;
            install::install(&repo, force, allow_global)?;
        }
        Commands::Hook(HookCommand::Update { refname, old, new }) => {
            let repo = util::Repo::discover(".")?;
            let update = RefUpdate::parse(&refname, &old, &new)?;
            if let Verdict::Reject(err) = hook::update(&repo, base_path, &update)? {
                hook::report_rejection(&refname, &err);
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Config(cmd) => config(cmd, base_path)?,
    }

    Ok(ExitCode::SUCCESS)
}

fn config(cmd: ConfigCommand, base_path: Option<&Path>) -> Result<()> {
    let open = || -> Result<MergeBranches<GitConfigStore>> {
        let repo = util::Repo::discover(".")?;
        MergeBranches::open(&repo, base_path)
    };

    match cmd {
        ConfigCommand::List => {
            for branch in open()?.list()? {
                println!("{branch}");
            }
        }
        ConfigCommand::Add { branches } => {
            for name in open()?.add(branches.iter().map(String::as_str))? {
                log::info!("Added merge branch {}", name.green());
            }
        }
        ConfigCommand::Remove { branches } => {
            for name in open()?.remove(branches.iter().map(String::as_str))? {
                log::info!("Removed merge branch {}", name.red());
            }
        }
        ConfigCommand::Describe => println!("{}", manage::describe()?),
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .format_target(false)
        .init();
}
