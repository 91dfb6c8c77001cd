use std::env;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use maker_checker::csv::{read_requests, write_audit, write_transactions};
use maker_checker::{InMemoryStorage, WorkflowConfig, WorkflowService};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: maker-checker <commands.csv> [audit.csv]");
        return ExitCode::FAILURE;
    };
    let audit_path = args.next();

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = WorkflowConfig::from_env().unwrap_or_else(|e| {
        warn!("{e}, falling back to defaults");
        WorkflowConfig::default()
    });

    let requests = match read_requests(path.clone()) {
        Ok(requests) => requests,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let storage = Arc::new(InMemoryStorage::new());
    let service = WorkflowService::with_config(Arc::clone(&storage), config);
    let (request_sender, request_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in requests {
            match result {
                Ok(request) => {
                    if request_sender.send(request).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    service.run(ReceiverStream::new(request_receiver)).await;

    if let Err(e) = write_transactions(io::stdout().lock(), &storage.transactions()) {
        error!("failed to write transactions: {e}");
        return ExitCode::FAILURE;
    }

    if let Some(audit_path) = audit_path {
        if let Err(e) = write_audit(&audit_path, &storage.audit_entries()) {
            error!(path = %audit_path, "failed to write audit ledger: {e}");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
