// KiCad Courier CLI binary
// One-shot operator commands over the same dispatcher the host uses.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;

use kicad_courier_lib::constants::{DEFAULT_BACKEND_URL, HEALTH_CHECK_INTERVAL_SECS, REQUEST_TIMEOUT_SECS};
use kicad_courier_lib::coordinator::{JobSubmission, LibraryImport};
use kicad_courier_lib::jobs::JobOutputs;
use kicad_courier_lib::logging;
use kicad_courier_lib::{dispatch, Args, Coordinator, Request};

#[derive(Parser)]
#[command(name = "kcourier")]
#[command(about = "KiCad Courier - queue LCSC conversions and manage KiCad libraries", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite file holding persisted coordinator state
    #[arg(long, env = "KICAD_COURIER_DB", global = true)]
    db_path: Option<PathBuf>,

    /// Backend base URL used until a different one is saved in settings
    #[arg(long, env = "KICAD_COURIER_BACKEND", default_value = DEFAULT_BACKEND_URL, global = true)]
    backend_url: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the full state snapshot as JSON
    State,

    /// List tracked libraries
    Libraries,

    /// Track an existing library (any of its .kicad_sym/.pretty/.3dshapes paths)
    Import {
        path: String,
        #[arg(short, long)]
        name: Option<String>,
        /// Make it the selected library
        #[arg(long)]
        select: bool,
    },

    /// Select a library by id or path
    Select {
        /// Library id, or a path (anything containing a separator)
        target: String,
    },

    /// Convert an LCSC part into a library
    Submit {
        /// LCSC id, e.g. C8734
        lcsc_id: String,
        /// Target library path (defaults to the selected library)
        #[arg(short, long)]
        library: Option<String>,
        #[arg(long)]
        no_symbol: bool,
        #[arg(long)]
        no_footprint: bool,
        #[arg(long)]
        no_model: bool,
        #[arg(long)]
        overwrite: bool,
        /// Block until the job finishes
        #[arg(long)]
        wait: bool,
    },

    /// Show finished jobs, newest first
    History,

    /// Forget all finished jobs
    ClearHistory,

    /// Probe the backend
    Health,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_level);

    let args = Args {
        db_path: cli.db_path,
        backend_url: cli.backend_url,
        health_interval_secs: HEALTH_CHECK_INTERVAL_SECS,
        request_timeout_secs: REQUEST_TIMEOUT_SECS,
        log_level: cli.log_level,
    };
    let coordinator = Coordinator::new(args.into_config()?)?;
    let outcome = run(&coordinator, cli.command).await;
    coordinator.shutdown();
    outcome
}

async fn run(coordinator: &Arc<Coordinator>, command: Commands) -> Result<()> {
    match command {
        Commands::State => cmd_state(coordinator).await,
        Commands::Libraries => cmd_libraries(coordinator).await,
        Commands::Import { path, name, select } => cmd_import(coordinator, path, name, select).await,
        Commands::Select { target } => cmd_select(coordinator, target).await,
        Commands::Submit { lcsc_id, library, no_symbol, no_footprint, no_model, overwrite, wait } => {
            let outputs = JobOutputs {
                symbol: !no_symbol,
                footprint: !no_footprint,
                model: !no_model,
            };
            cmd_submit(coordinator, lcsc_id, library, outputs, overwrite, wait).await
        }
        Commands::History => cmd_history(coordinator).await,
        Commands::ClearHistory => {
            call(coordinator, Request::ClearHistory).await?;
            println!("History cleared");
            Ok(())
        }
        Commands::Health => cmd_health(coordinator).await,
    }
}

/// Dispatch and unwrap the `{ok, data, error}` envelope.
async fn call(coordinator: &Arc<Coordinator>, request: Request) -> Result<Value> {
    let response = dispatch(coordinator, request).await;
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        anyhow::bail!(response.error.unwrap_or_else(|| "Request failed".to_string()))
    }
}

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

async fn cmd_state(coordinator: &Arc<Coordinator>) -> Result<()> {
    let state = call(coordinator, Request::GetState).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

async fn cmd_libraries(coordinator: &Arc<Coordinator>) -> Result<()> {
    let state = call(coordinator, Request::GetState).await?;
    let libraries = state["libraries"].as_array().cloned().unwrap_or_default();

    if libraries.is_empty() {
        println!("No libraries tracked. Use 'kcourier import <path>' to add one.");
        return Ok(());
    }

    println!("{:<2} {:<20} {:<7} {:>5} {:>5} {:>5}  {}", "", "NAME", "STATE", "SYM", "FP", "3D", "PATH");
    println!("{}", "-".repeat(80));
    for library in &libraries {
        let marker = if library["active"].as_bool().unwrap_or(false) { "*" } else { "" };
        let state = if library["missing"].as_bool().unwrap_or(false) { "missing" } else { "ok" };
        println!(
            "{:<2} {:<20} {:<7} {:>5} {:>5} {:>5}  {}",
            marker,
            text(library, "name"),
            state,
            library["counts"]["symbol"].as_u64().unwrap_or(0),
            library["counts"]["footprint"].as_u64().unwrap_or(0),
            library["counts"]["model"].as_u64().unwrap_or(0),
            text(library, "path"),
        );
    }
    println!("\nTotal: {} libraries", libraries.len());
    Ok(())
}

async fn cmd_import(coordinator: &Arc<Coordinator>, path: String, name: Option<String>, select: bool) -> Result<()> {
    let record = call(
        coordinator,
        Request::ImportLibrary(LibraryImport {
            path,
            name,
            select: Some(select),
            ..Default::default()
        }),
    )
    .await?;

    println!("Tracking '{}' at {}", text(&record, "name"), text(&record, "path"));
    println!("  ID: {}", text(&record, "id"));
    if record["missing"].as_bool().unwrap_or(false) {
        println!("  Warning: library files were not found on disk");
    }
    Ok(())
}

async fn cmd_select(coordinator: &Arc<Coordinator>, target: String) -> Result<()> {
    let request = if target.contains('/') || target.contains('\\') {
        Request::SetSelectedLibrary { id: None, path: Some(target) }
    } else {
        Request::SetSelectedLibrary { id: Some(target), path: None }
    };
    let record = call(coordinator, request).await?;
    println!("Selected '{}' ({})", text(&record, "name"), text(&record, "path"));
    Ok(())
}

async fn cmd_submit(
    coordinator: &Arc<Coordinator>,
    lcsc_id: String,
    library: Option<String>,
    outputs: JobOutputs,
    overwrite: bool,
    wait: bool,
) -> Result<()> {
    let job = call(
        coordinator,
        Request::SubmitJob(JobSubmission {
            lcsc_id,
            library_path: library,
            outputs: Some(outputs),
            overwrite: Some(overwrite),
            ..Default::default()
        }),
    )
    .await?;

    let job_id = text(&job, "id").to_string();
    println!("Submitted {} as job {} -> {}", text(&job, "lcscId"), job_id, text(&job, "libraryPath"));
    if !wait {
        return Ok(());
    }

    let poll_every = coordinator.config().poll_delay_running;
    loop {
        tokio::time::sleep(poll_every).await;
        let status = call(coordinator, Request::GetJobStatus { id: job_id.clone() }).await?;
        match text(&status, "status") {
            "completed" => {
                let missing = status["outputAnalysis"]["missing"].as_array().cloned().unwrap_or_default();
                if missing.is_empty() {
                    println!("Completed");
                } else {
                    let kinds: Vec<&str> = missing.iter().filter_map(Value::as_str).collect();
                    println!("Completed, missing: {}", kinds.join(", "));
                }
                return Ok(());
            }
            "failed" => {
                let reason = status["error"].as_str().or(status["message"].as_str()).unwrap_or("unknown error");
                anyhow::bail!("Job {} failed: {}", job_id, reason);
            }
            other => {
                println!("  {} {}%", other, status["progress"].as_u64().unwrap_or(0));
            }
        }
    }
}

async fn cmd_history(coordinator: &Arc<Coordinator>) -> Result<()> {
    let state = call(coordinator, Request::GetState).await?;
    let history = state["jobHistory"].as_array().cloned().unwrap_or_default();

    if history.is_empty() {
        println!("No finished jobs.");
        return Ok(());
    }

    println!("{:<10} {:<10} {:<20} {:<25} {}", "STATUS", "LCSC", "LIBRARY", "FINISHED", "NOTE");
    println!("{}", "-".repeat(90));
    for entry in &history {
        let missing: Vec<&str> = entry["outputAnalysis"]["missing"]
            .as_array()
            .map(|kinds| kinds.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let note = if !missing.is_empty() && text(entry, "status") == "completed" {
            format!("missing {}", missing.join(", "))
        } else {
            entry["error"].as_str().unwrap_or("").to_string()
        };
        println!(
            "{:<10} {:<10} {:<20} {:<25} {}",
            text(entry, "status"),
            text(entry, "lcscId"),
            text(entry, "libraryName"),
            text(entry, "finishedAt"),
            note,
        );
    }
    Ok(())
}

async fn cmd_health(coordinator: &Arc<Coordinator>) -> Result<()> {
    coordinator.ensure_initialized().await?;
    let url = coordinator.with_state(|s| s.settings.backend_url.clone());
    if coordinator.check_health().await {
        println!("Backend {} is reachable", url);
        Ok(())
    } else {
        anyhow::bail!("Backend {} is not reachable", url)
    }
}
