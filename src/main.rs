//! Binary entry point for the Metalcast CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use metalcast::{
    ConfigError, Gateway, GatewayError, JobError, MaasConfig, MaasError, MaasGateway,
    MachineSelector, OrchestratorConfig, OrchestratorError, PayloadError,
    ProvisioningOrchestrator, ProvisioningRequest, ProvisioningRequestBuilder, RequestError, Tag,
    resolve_boot_payload,
};

mod cli;

use cli::{Cli, DeployCommand, ReleaseCommand};

const DEFAULT_LOG_FILTER: &str = "metalcast=info";

/// Exit code used when the job was cancelled, by deadline or otherwise.
const EXIT_CANCELLED: i32 = 2;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("gateway setup failed: {0}")]
    Gateway(#[from] MaasError),
    #[error("invalid boot payload: {0}")]
    Payload(#[from] PayloadError),
    #[error("invalid request: {0}")]
    Request(#[from] RequestError),
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),
    #[error("provisioning failed: {0}")]
    Job(JobError),
    #[error("release failed: {0}")]
    Release(#[from] GatewayError),
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
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Deploy(command) => deploy_command(command).await,
        Cli::Release(command) => release_command(command).await,
    }
}

async fn deploy_command(args: DeployCommand) -> Result<i32, CliError> {
    let gateway = load_gateway()?;
    let settings = OrchestratorConfig::load_without_cli_args()?;
    settings.validate()?;
    let request = build_request(&args, &settings)?;
    let orchestrator = ProvisioningOrchestrator::from_config(Arc::new(gateway), &settings)?;
    let outcome = deploy_with(&orchestrator, request, io::stdout()).await;
    orchestrator.shutdown();
    outcome
}

async fn release_command(args: ReleaseCommand) -> Result<i32, CliError> {
    let gateway = load_gateway()?;
    release_with(&gateway, &args.system_id, io::stdout()).await
}

fn load_gateway() -> Result<MaasGateway, CliError> {
    let maas = MaasConfig::load_without_cli_args()?;
    Ok(MaasGateway::new(&maas)?)
}

fn build_request(
    args: &DeployCommand,
    settings: &OrchestratorConfig,
) -> Result<ProvisioningRequest, CliError> {
    let flags = &args.selector;
    let selector = match (&flags.system_id, flags.cpu, flags.memory) {
        (Some(system_id), _, _) => MachineSelector::ById {
            system_id: system_id.clone(),
        },
        (None, Some(cpu_count), Some(memory_mb)) => MachineSelector::ByResources {
            cpu_count,
            memory_mb,
        },
        _ => {
            return Err(CliError::Request(RequestError::Validation(String::from(
                "either --system-id or both --cpu and --memory are required",
            ))));
        }
    };
    let payload = resolve_boot_payload(
        args.user_data.as_deref(),
        args.user_data_file.as_deref(),
        &selector,
    )?;
    let tags = args
        .tags
        .iter()
        .map(|(name, description)| Tag::new(name.as_str(), description.as_str()));
    let mut policy = settings.polling_policy();
    if let Some(minutes) = args.timeout_mins {
        policy = policy.with_timeout(Duration::from_secs(minutes.saturating_mul(60)));
    }
    Ok(ProvisioningRequestBuilder::new(selector)
        .payload(payload)
        .tags(tags)
        .policy(policy)
        .build()?)
}

async fn deploy_with<G>(
    orchestrator: &ProvisioningOrchestrator<G>,
    request: ProvisioningRequest,
    mut out: impl Write,
) -> Result<i32, CliError>
where
    G: Gateway + ?Sized + 'static,
{
    let handle = orchestrator.submit(request)?;
    tracing::info!(job_id = %handle.id(), "deployment submitted");
    match orchestrator.await_result(&handle).await {
        Ok(machine) => {
            let rendered = machine.hostname.as_deref().map_or_else(
                || format!("deployed {}", machine.system_id),
                |hostname| format!("deployed {} ({hostname})", machine.system_id),
            );
            writeln!(out, "{rendered}").ok();
            Ok(0)
        }
        Err(err) if err.is_cancelled() => {
            report_error(&CliError::Job(err));
            Ok(EXIT_CANCELLED)
        }
        Err(err) => Err(CliError::Job(err)),
    }
}

async fn release_with<G>(gateway: &G, system_id: &str, mut out: impl Write) -> Result<i32, CliError>
where
    G: Gateway + ?Sized,
{
    gateway.release(system_id).await?;
    writeln!(out, "released {system_id}").ok();
    Ok(0)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
