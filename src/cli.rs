//! Command-line interface definitions for the `gcpfire` binary.
//!
//! This module isolates the clap parser structures so the build script can
//! reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `gcpfire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "gcpfire",
    about = "Run a script on a one-shot Compute Engine instance and tear it down",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision an instance, run the job script over SSH, and delete it.
    #[command(
        name = "fire",
        about = "Provision an instance, run the job script over SSH, and delete it"
    )]
    Fire(FireCommand),
}

/// Arguments for the `gcpfire fire` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct FireCommand {
    /// Job name; doubles as the instance name, so it must be a valid
    /// Compute Engine resource name.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: String,
    /// Local bash script executed on the instance.
    #[arg(long, value_name = "PATH")]
    pub(crate) script: String,
    /// Image family the boot disk is created from.
    #[arg(long, value_name = "FAMILY")]
    pub(crate) image_family: String,
    /// Machine type for the instance.
    #[arg(long, value_name = "TYPE", default_value = "n1-standard-4")]
    pub(crate) machine_type: String,
    /// Accelerator attachment as LABEL=COUNT (repeatable).
    #[arg(long = "accelerator", value_name = "LABEL=COUNT")]
    pub(crate) accelerators: Vec<String>,
    /// Request a standard instance instead of a preemptible one.
    #[arg(long)]
    pub(crate) no_preemptible: bool,
    /// Extra instance metadata entry as KEY=VALUE (repeatable).
    #[arg(long = "metadata", value_name = "KEY=VALUE")]
    pub(crate) metadata: Vec<String>,
    /// Provider-native startup script uploaded with the instance spec.
    #[arg(long, value_name = "PATH")]
    pub(crate) startup_script: Option<String>,
    /// Pause for confirmation before the instance is deleted.
    #[arg(long)]
    pub(crate) confirm_teardown: bool,
    /// Seconds to wait between SSH connection probes.
    #[arg(long, value_name = "SECONDS", default_value_t = 5)]
    pub(crate) retry_wait: u64,
    /// Maximum number of SSH connection probes before giving up.
    #[arg(long, value_name = "COUNT", default_value_t = 5)]
    pub(crate) max_retry: u32,
}
