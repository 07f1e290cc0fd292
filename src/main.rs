// KiCad Courier - coordinator host
// Newline-delimited JSON over stdio. Each input line is `{requestId?, request}`;
// each output line is either a response or a broadcast (stateUpdate,
// notification).

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use kicad_courier_lib::logging;
use kicad_courier_lib::{dispatch, Args, Coordinator, Outbound, Request, Response};

#[derive(Debug, Deserialize)]
struct Envelope {
    request: Request,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Reply {
    #[serde(rename = "type")]
    kind: &'static str,
    request_id: Option<Value>,
    #[serde(flatten)]
    response: Response,
}

impl Reply {
    fn new(request_id: Option<Value>, response: Response) -> Self {
        Self { kind: "response", request_id, response }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(&args.log_level);

    let config = args.into_config()?;
    log::info!(
        "KiCad Courier {} starting (state {}, backend {})",
        env!("CARGO_PKG_VERSION"),
        config.db_path.display(),
        config.default_backend_url
    );
    let coordinator = Coordinator::new(config)?;

    // Single writer so lines from concurrent tasks never interleave
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(mut line) = out_rx.recv().await {
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                log::error!("stdout closed, dropping output");
                break;
            }
        }
    });
    let forwarder = tokio::spawn(forward_broadcasts(coordinator.subscribe(), out_tx.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let coordinator = Arc::clone(&coordinator);
        let out = out_tx.clone();
        tokio::spawn(async move {
            let reply = handle_line(&coordinator, &line).await;
            emit(&out, &reply);
        });
    }

    log::info!("Input closed, shutting down");
    coordinator.shutdown();
    forwarder.abort();
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

async fn handle_line(coordinator: &Arc<Coordinator>, line: &str) -> Reply {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return Reply::new(None, Response::failure(format!("Malformed request: {}", e))),
    };
    let request_id = value.get("requestId").cloned();

    match serde_json::from_value::<Envelope>(value) {
        Ok(envelope) => Reply::new(request_id, dispatch(coordinator, envelope.request).await),
        Err(e) => Reply::new(request_id, Response::failure(format!("Invalid request: {}", e))),
    }
}

fn emit<T: Serialize>(out: &mpsc::UnboundedSender<String>, message: &T) {
    match serde_json::to_string(message) {
        Ok(line) => {
            // Receiver only goes away during shutdown
            let _ = out.send(line);
        }
        Err(e) => log::error!("Failed to serialize output: {}", e),
    }
}

async fn forward_broadcasts(mut events: broadcast::Receiver<Outbound>, out: mpsc::UnboundedSender<String>) {
    loop {
        match events.recv().await {
            Ok(event) => emit(&out, &event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Output fell behind, {} broadcasts skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
