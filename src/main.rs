//! bloby - send files with metadata to a device, or receive what it pushes back

use anyhow::{Context, Result};
use clap::Parser;
use std::net::TcpListener;
use std::sync::Arc;

use bloby::cancel::CancelToken;
use bloby::cli::{Cli, Command};
use bloby::config::BlobyConfig;
use bloby::log::TransferJournal;
use bloby::logger::{ConsoleObserver, Fanout, TransferObserver};
use bloby::net::host_port;
use bloby::session::{self, SessionEnd};
use bloby::store::Store;
use bloby::{serve, transmitter};

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "bloby=debug" } else { "bloby=warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Ctrl-C trips the token once; a second Ctrl-C exits on the spot
fn install_cancel_handler() -> Result<CancelToken> {
    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            eprintln!("\nInterrupted again. Exiting (Ctrl-C)...");
            std::process::exit(130);
        }
        handler_token.cancel();
    })
    .context("Error setting Ctrl-C handler")?;
    Ok(token)
}

fn run(cli: Cli) -> Result<i32> {
    let config = BlobyConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Command::Send {
            host,
            file,
            port,
            meta,
        } => {
            // Nothing to clean up mid-send; exit straight away like any CLI copy
            ctrlc::set_handler(|| {
                eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
                std::process::exit(130);
            })
            .context("Error setting Ctrl-C handler")?;

            let addr = host_port(&host, port.unwrap_or(config.port));
            let (metadata, bytes) =
                transmitter::send_file(&addr, &file, &meta, config.connect_timeout())
                    .with_context(|| format!("Failed to send {}", file.display()))?;
            ConsoleObserver.sent(&addr, &metadata, bytes);
            Ok(0)
        }

        Command::Receive {
            host,
            port,
            force,
            dir,
            no_confine,
            journal,
        } => {
            let cancel = install_cancel_handler()?;
            let addr = host_port(&host, port.unwrap_or(config.port));
            let root = dir.unwrap_or_else(|| config.receive_dir.clone());
            let store = Store::open(&root, force || config.overwrite, config.confine && !no_confine)
                .with_context(|| format!("Failed to open receive directory {}", root.display()))?;

            let mut observers: Vec<Arc<dyn TransferObserver>> = vec![Arc::new(ConsoleObserver)];
            if let Some(path) = journal.or_else(|| config.journal.clone()) {
                observers.push(Arc::new(TransferJournal::new(&path)));
            }

            println!("Connecting {}...", addr);
            let report = session::receive(
                &addr,
                store,
                &config.receive_options(),
                cancel,
                Arc::new(Fanout::new(observers)),
            );
            Ok(match report.end {
                SessionEnd::Normal => 0,
                SessionEnd::Cancelled => 130,
                SessionEnd::Error(_) => 1,
            })
        }

        Command::Serve {
            files,
            bind,
            once,
            meta,
        } => {
            let cancel = install_cancel_handler()?;
            let outbox = serve::load_outbox(&files, &meta).context("Failed to load files")?;
            let bind = bind.unwrap_or_else(|| format!("0.0.0.0:{}", config.port));
            let listener = TcpListener::bind(&bind).with_context(|| format!("bind {}", bind))?;
            eprintln!(
                "bloby listening on {} with {} file{} queued",
                bind,
                outbox.len(),
                if outbox.len() == 1 { "" } else { "s" }
            );
            let served = serve::serve(
                listener,
                &outbox,
                once,
                &cancel,
                config.cancel_poll(),
                Arc::new(ConsoleObserver),
            )?;
            println!("Receivers served: {}", served);
            Ok(if cancel.is_cancelled() { 130 } else { 0 })
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
