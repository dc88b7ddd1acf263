/*
 * Noise job CLI
 *
 * Submits one or more calculation requests, waits for them and prints
 * each job's final status and result document.
 *
 * Usage:
 *   noise-job config.yaml request.json
 *   noise-job config.yaml a.json b.json --poll-ms 500 --timeout-secs 1800
 *
 * Exit code 0 only if every job succeeded.
 */

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use noise_orchestration::{build_orchestrator, CalculationInput, JobOrchestrator, NoiseConfig};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// CLI arguments
struct Args {
    config_path: PathBuf,

    /// Request documents, one job each
    inputs: Vec<PathBuf>,

    /// Status poll interval
    poll: Duration,

    /// Give up waiting after this long
    timeout: Duration,
}

impl Args {
    fn parse() -> Result<Self, String> {
        let mut args = std::env::args().skip(1);

        let mut positional = Vec::new();
        let mut poll = Duration::from_millis(1_000);
        let mut timeout = Duration::from_secs(3_600);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--poll-ms" => {
                    let value = args.next().ok_or("--poll-ms needs a value")?;
                    let ms: u64 = value
                        .parse()
                        .map_err(|_| format!("invalid --poll-ms: {}", value))?;
                    poll = Duration::from_millis(ms);
                }
                "--timeout-secs" => {
                    let value = args.next().ok_or("--timeout-secs needs a value")?;
                    let secs: u64 = value
                        .parse()
                        .map_err(|_| format!("invalid --timeout-secs: {}", value))?;
                    timeout = Duration::from_secs(secs);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                flag if flag.starts_with("--") => return Err(format!("unknown option {}", flag)),
                _ => positional.push(PathBuf::from(&arg)),
            }
        }

        let mut positional = positional.into_iter();
        let config_path = positional.next().ok_or("missing config file")?;
        let inputs: Vec<PathBuf> = positional.collect();
        if inputs.is_empty() {
            return Err("missing request file".to_string());
        }

        Ok(Self {
            config_path,
            inputs,
            poll,
            timeout,
        })
    }
}

fn print_help() {
    println!(
        r#"
Noise job CLI

USAGE:
    noise-job <CONFIG.yaml> <REQUEST.json>... [OPTIONS]

OPTIONS:
    --poll-ms <MS>          Status poll interval (default: 1000)
    --timeout-secs <SECS>   Maximum wait per job (default: 3600)
    -h, --help              Print this help

ENVIRONMENT:
    RUST_LOG                    Log filter (default: info)
    NOISE_ENGINE_HOST, NOISE_ENGINE_PORT, NOISE_WORKER_CONCURRENCY,
    NOISE_CACHE_TTL_DAYS, NOISE_CACHE_PATH   Configuration overrides
"#
    );
}

/// Wait for one job and render its outcome
async fn report(orchestrator: &JobOrchestrator, job_id: Uuid, args: &Args) -> (bool, String) {
    let waited = tokio::time::timeout(args.timeout, orchestrator.wait(job_id, args.poll)).await;
    let status = match waited {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return (false, json!({"job_id": job_id, "error": e.to_string()}).to_string()),
        Err(_) => {
            return (
                false,
                json!({"job_id": job_id, "error": "timed out waiting for job"}).to_string(),
            )
        }
    };

    match orchestrator.result(job_id) {
        Ok(result) => (
            true,
            json!({"job_id": job_id, "status": status.as_str(), "result": result}).to_string(),
        ),
        Err(e) => (
            false,
            json!({
                "job_id": job_id,
                "status": status.as_str(),
                "error": e.to_string(),
                "http_status": e.http_status(),
            })
            .to_string(),
        ),
    }
}

async fn run(args: Args) -> Result<bool, String> {
    let config = NoiseConfig::load(&args.config_path)
        .map_err(|e| format!("{}: {}", args.config_path.display(), e))?;
    let orchestrator = build_orchestrator(&config).map_err(|e| e.to_string())?;

    let mut job_ids = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        let input = CalculationInput::from_json_str(&content)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        let job_id = orchestrator
            .submit(&input)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        tracing::info!("Submitted {} as job {}", path.display(), job_id);
        job_ids.push(job_id);
    }

    let reports =
        futures::future::join_all(job_ids.iter().map(|&id| report(&orchestrator, id, &args))).await;

    let mut all_ok = true;
    for (ok, line) in reports {
        all_ok &= ok;
        println!("{}", line);
    }
    Ok(all_ok)
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = match Args::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
