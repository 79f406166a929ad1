//! Command-line interface definitions for the `metalcast` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `metalcast` binary.
#[derive(Debug, Parser)]
#[command(
    name = "metalcast",
    about = "Allocate, tag and deploy bare-metal machines through MAAS",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Allocate a machine, tag it and deploy it, waiting until it is up.
    #[command(name = "deploy", about = "Allocate, tag and deploy a machine")]
    Deploy(DeployCommand),
    /// Release a machine back to the free pool.
    #[command(name = "release", about = "Release a machine back to the free pool")]
    Release(ReleaseCommand),
}

/// Arguments for the `metalcast deploy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeployCommand {
    #[command(flatten)]
    pub(crate) selector: SelectorArgs,
    /// Boot payload passed to the machine as user data.
    ///
    /// With `--cpu`/`--memory`, every `<INSTANCE_ID>` is replaced with the
    /// identifier of the allocated machine.
    #[arg(long, value_name = "TEXT", conflicts_with = "user_data_file")]
    pub(crate) user_data: Option<String>,
    /// Read the boot payload from a local file.
    #[arg(long, value_name = "PATH", conflicts_with = "user_data")]
    pub(crate) user_data_file: Option<String>,
    /// Tag to attach, as `NAME` or `NAME:DESCRIPTION`. Repeatable.
    #[arg(long = "tag", value_name = "NAME[:DESCRIPTION]", value_parser = parse_tag)]
    pub(crate) tags: Vec<(String, String)>,
    /// Minutes before the job is cancelled. Overrides `job_timeout_mins`.
    #[arg(long, value_name = "MINUTES")]
    pub(crate) timeout_mins: Option<u64>,
}

/// How the machine is chosen: by identifier or by resources.
#[derive(Debug, Args)]
#[group(required = true, multiple = true)]
pub(crate) struct SelectorArgs {
    /// Identifier of the machine to deploy.
    #[arg(long, value_name = "ID", conflicts_with_all = ["cpu", "memory"])]
    pub(crate) system_id: Option<String>,
    /// Minimum number of CPU cores.
    #[arg(long, value_name = "N", requires = "memory")]
    pub(crate) cpu: Option<u32>,
    /// Minimum memory in MiB.
    #[arg(long, value_name = "MB", requires = "cpu")]
    pub(crate) memory: Option<u64>,
}

/// Arguments for the `metalcast release` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ReleaseCommand {
    /// Identifier of the machine to release.
    #[arg(value_name = "SYSTEM_ID")]
    pub(crate) system_id: String,
}

/// Splits `NAME[:DESCRIPTION]`.
pub(crate) fn parse_tag(raw: &str) -> Result<(String, String), String> {
    let (name, description) = raw.split_once(':').unwrap_or((raw, ""));
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(String::from("tag name must not be empty"));
    }
    Ok((trimmed.to_owned(), description.trim().to_owned()))
}
