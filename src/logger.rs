use std::sync::Arc;

use crate::checksum::Integrity;
use crate::metadata::Metadata;
use crate::session::{SessionEnd, SessionReport, TransferOutcome};

/// Receives status events from transmitters and receiver sessions.
/// Every method defaults to doing nothing.
pub trait TransferObserver: Send + Sync {
    fn connected(&self, _peer: &str) {}
    fn transfer(&self, _seq: u64, _metadata: &Metadata, _outcome: &TransferOutcome) {}
    fn finished(&self, _report: &SessionReport) {}
    fn sent(&self, _peer: &str, _metadata: &Metadata, _bytes: usize) {}
}

pub struct NoopObserver;
impl TransferObserver for NoopObserver {}

/// Human-readable status lines on stdout/stderr
pub struct ConsoleObserver;

impl TransferObserver for ConsoleObserver {
    fn connected(&self, peer: &str) {
        println!("Connected to {}, waiting for transfers...", peer);
    }

    fn transfer(&self, seq: u64, metadata: &Metadata, outcome: &TransferOutcome) {
        let blob = metadata.blob_name().unwrap_or("unknown");
        match outcome {
            TransferOutcome::Saved {
                path,
                bytes,
                integrity,
                replaced,
            } => {
                let check = match integrity {
                    Integrity::Verified => "sha256 ok",
                    Integrity::Unchecked => "no checksum",
                    Integrity::Mismatch { expected, actual } => {
                        eprintln!(
                            "⚠️  WARNING: checksum mismatch for {}: expected {}, got {}",
                            path.display(),
                            expected,
                            actual
                        );
                        "sha256 MISMATCH"
                    }
                };
                let verb = if *replaced { "Overwrote" } else { "Received" };
                println!(
                    "[{}] {} {} ({} bytes, {}) blob={}",
                    seq,
                    verb,
                    path.display(),
                    bytes,
                    check,
                    blob
                );
            }
            TransferOutcome::Skipped { path } => {
                println!(
                    "[{}] Skipped {}: file exists (use --force to overwrite) blob={}",
                    seq,
                    path.display(),
                    blob
                );
            }
            TransferOutcome::Failed(err) => {
                eprintln!("[{}] Transfer failed: {} blob={}", seq, err, blob);
            }
        }
    }

    fn finished(&self, report: &SessionReport) {
        match &report.end {
            SessionEnd::Normal => println!("Peer closed the connection."),
            SessionEnd::Cancelled => eprintln!("\nInterrupted by user. Closing connection..."),
            SessionEnd::Error(e) => eprintln!("Session ended with error: {}", e),
        }
        println!(
            "Files received: {} ({} transfer{} attempted)",
            report.received,
            report.attempts,
            if report.attempts == 1 { "" } else { "s" }
        );
    }

    fn sent(&self, peer: &str, metadata: &Metadata, bytes: usize) {
        println!(
            "Sent {} to {} ({} bytes) blob={}",
            metadata.file_name().unwrap_or("unnamed"),
            peer,
            bytes,
            metadata.blob_name().unwrap_or("unknown")
        );
    }
}

/// Forwards every event to each wrapped observer in order
pub struct Fanout(Vec<Arc<dyn TransferObserver>>);

impl Fanout {
    pub fn new(observers: Vec<Arc<dyn TransferObserver>>) -> Self {
        Self(observers)
    }
}

impl TransferObserver for Fanout {
    fn connected(&self, peer: &str) {
        self.0.iter().for_each(|o| o.connected(peer));
    }
    fn transfer(&self, seq: u64, metadata: &Metadata, outcome: &TransferOutcome) {
        self.0.iter().for_each(|o| o.transfer(seq, metadata, outcome));
    }
    fn finished(&self, report: &SessionReport) {
        self.0.iter().for_each(|o| o.finished(report));
    }
    fn sent(&self, peer: &str, metadata: &Metadata, bytes: usize) {
        self.0.iter().for_each(|o| o.sent(peer, metadata, bytes));
    }
}
