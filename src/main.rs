//! Binary entry point for the gcpfire CLI.

use std::io::{self, Write};
use std::process;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use gcpfire::{
    FireError, FireOptions, FireOrchestrator, GcpApiError, GcpComputePlane, GcpFireConfig,
    JobSpec, KeyStore, ProcessCommandRunner, SshClient, SshConfig,
};

mod cli;

use cli::{Cli, FireCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid job: {0}")]
    Job(String),
    #[error("invalid {flag} argument `{value}`: expected {expected}")]
    InvalidArgument {
        flag: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("job failed: {0}")]
    Fire(#[from] FireError<GcpApiError>),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Fire(command) => fire_command(command).await,
    }
}

async fn fire_command(args: FireCommand) -> Result<i32, CliError> {
    let config =
        GcpFireConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let fire_config = config
        .as_fire_config()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let job = build_job(&args)?;
    let options = FireOptions {
        wait_for_confirmation: args.confirm_teardown,
        retry_wait: Duration::from_secs(args.retry_wait),
        max_retry: args.max_retry,
    };

    let plane = GcpComputePlane::new()
        .await
        .map_err(|err| CliError::Auth(err.to_string()))?;
    let ssh = SshClient::new(
        SshConfig {
            user: config.ssh_username.clone(),
            ..SshConfig::default()
        },
        ProcessCommandRunner,
    );
    let keys = KeyStore::new(Utf8PathBuf::from(&config.secrets_dir));

    let orchestrator = FireOrchestrator::new(plane, ssh, keys, fire_config);
    let output = orchestrator.fire(&job, &options).await?;

    let mut stdout = io::stdout();
    stdout.write_all(output.as_bytes()).ok();
    Ok(0)
}

fn build_job(args: &FireCommand) -> Result<JobSpec, CliError> {
    let mut builder = JobSpec::builder()
        .name(&args.name)
        .script_path(args.script.as_str())
        .image_family(&args.image_family)
        .machine_type(&args.machine_type)
        .preemptible(!args.no_preemptible)
        .startup_script_path(args.startup_script.as_deref().map(Utf8PathBuf::from));

    for entry in &args.accelerators {
        let (label, count_text) = split_pair(entry, "--accelerator", "LABEL=COUNT")?;
        let count: i64 = count_text
            .parse()
            .map_err(|_| CliError::InvalidArgument {
                flag: "--accelerator",
                value: entry.clone(),
                expected: "LABEL=COUNT with a numeric count",
            })?;
        builder = builder.accelerator(label, count);
    }

    for entry in &args.metadata {
        let (key, value) = split_pair(entry, "--metadata", "KEY=VALUE")?;
        builder = builder.metadata(key, value);
    }

    builder.build().map_err(|err| CliError::Job(err.to_string()))
}

fn split_pair<'a>(
    entry: &'a str,
    flag: &'static str,
    expected: &'static str,
) -> Result<(&'a str, &'a str), CliError> {
    entry
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| CliError::InvalidArgument {
            flag,
            value: entry.to_owned(),
            expected,
        })
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fire_args() -> FireCommand {
        FireCommand {
            name: String::from("t1"),
            script: String::from("run.sh"),
            image_family: String::from("fam-a"),
            machine_type: String::from("n1-standard-4"),
            accelerators: Vec::new(),
            no_preemptible: false,
            metadata: Vec::new(),
            startup_script: None,
            confirm_teardown: false,
            retry_wait: 5,
            max_retry: 5,
        }
    }

    #[test]
    fn build_job_maps_flags() {
        let mut args = fire_args();
        args.accelerators = vec![String::from("nvidia-tesla-t4=1")];
        args.metadata = vec![String::from("bucket=test-bucket")];
        args.no_preemptible = true;

        let job = build_job(&args).expect("job should build");

        assert_eq!(job.name, "t1");
        assert!(!job.preemptible);
        assert_eq!(job.accelerators.get("nvidia-tesla-t4"), Some(&1));
        assert_eq!(
            job.additional_metadata
                .first()
                .map(|item| item.key.as_str()),
            Some("bucket")
        );
    }

    #[test]
    fn malformed_accelerator_is_rejected() {
        let mut args = fire_args();
        args.accelerators = vec![String::from("nvidia-tesla-t4")];

        let err = build_job(&args).expect_err("should fail");
        assert!(matches!(err, CliError::InvalidArgument { flag, .. } if flag == "--accelerator"));
    }

    #[test]
    fn non_numeric_accelerator_count_is_rejected() {
        let mut args = fire_args();
        args.accelerators = vec![String::from("nvidia-tesla-t4=two")];

        let err = build_job(&args).expect_err("should fail");
        assert!(matches!(err, CliError::InvalidArgument { .. }));
    }

    #[test]
    fn invalid_job_name_is_reported() {
        let mut args = fire_args();
        args.name = String::from("Bad_Name");

        let err = build_job(&args).expect_err("should fail");
        assert!(matches!(err, CliError::Job(_)));
    }

    #[test]
    fn write_error_renders_message() {
        let mut buf = Vec::new();
        let err = CliError::Config(String::from("missing project"));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.contains("configuration error: missing project"));
    }
}
