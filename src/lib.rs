//! Merge-branch submit restriction for git servers.
//!
//! Project owners list *merge branches* in their project's configuration.
//! Pushing an ordinary commit to such a branch is refused until a merge
//! commit has been submitted to it, which also removes the branch from the
//! list.

pub mod config;
pub mod hook;
pub mod install;
pub mod manage;
pub mod plugin;
pub mod util;
pub mod validation;
