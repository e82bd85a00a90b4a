//! Receiver session.
//!
//! The receiver dials out to the device's listener and then treats that one
//! connection as an open-ended sequence of frames:
//!
//! ```text
//! Connecting -> AwaitingFrame <-> Processing
//!                     |
//!                     v
//!                Terminated(Normal | Cancelled | Error)
//! ```
//!
//! A frame that fails to decode ends the session, since the stream cannot be
//! resynchronised. Anything that goes wrong while storing a decoded frame only
//! affects that transfer.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::{self, CancelToken, CancellableReader};
use crate::checksum::{self, Integrity};
use crate::codec::{read_frame, Frame, FrameError};
use crate::logger::TransferObserver;
use crate::net;
use crate::protocol::timeouts;
use crate::store::{fallback_name, Store, TransferError, WriteStatus};

/// Why a session stopped with an error
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection lost: {0}")]
    Connection(#[source] io::Error),

    #[error("protocol error: {0}")]
    Framing(#[source] FrameError),
}

impl From<FrameError> for SessionError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(io) => SessionError::Connection(io),
            other => SessionError::Framing(other),
        }
    }
}

#[derive(Debug)]
pub enum SessionEnd {
    /// Peer closed the connection exactly at a frame boundary
    Normal,
    Cancelled,
    Error(SessionError),
}

impl SessionEnd {
    pub fn is_normal(&self) -> bool {
        matches!(self, SessionEnd::Normal)
    }
}

#[derive(Debug)]
pub struct SessionReport {
    pub end: SessionEnd,
    /// Frames decoded and handed to the pipeline
    pub attempts: u64,
    /// Frames whose payload reached disk
    pub received: u64,
}

/// Result of the per-transfer pipeline
#[derive(Debug)]
pub enum TransferOutcome {
    Saved {
        path: PathBuf,
        bytes: u64,
        integrity: Integrity,
        replaced: bool,
    },
    /// Target exists and overwriting is off
    Skipped { path: PathBuf },
    Failed(TransferError),
}

#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    pub connect_timeout: Duration,
    /// How often a blocked read checks for cancellation
    pub cancel_poll: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(timeouts::CONNECT_MS),
            cancel_poll: Duration::from_millis(timeouts::CANCEL_POLL_MS),
        }
    }
}

enum State {
    AwaitingFrame,
    Processing(Frame),
    Terminated(SessionEnd),
}

pub struct ReceiverSession<R> {
    reader: R,
    store: Store,
    observer: Arc<dyn TransferObserver>,
    attempts: u64,
    received: u64,
}

impl<R: Read> ReceiverSession<R> {
    pub fn new(reader: R, store: Store, observer: Arc<dyn TransferObserver>) -> Self {
        if !store.confined() {
            tracing::warn!(
                root = %store.root().display(),
                "file names are used verbatim; a peer can write outside the receive directory"
            );
        }
        Self {
            reader,
            store,
            observer,
            attempts: 0,
            received: 0,
        }
    }

    /// Drive the session until the stream ends. Consumes the session, so the
    /// underlying connection is closed on return.
    pub fn run(mut self) -> SessionReport {
        let mut state = State::AwaitingFrame;
        let end = loop {
            state = match state {
                State::AwaitingFrame => match read_frame(&mut self.reader) {
                    Ok(Some(frame)) => State::Processing(frame),
                    Ok(None) => State::Terminated(SessionEnd::Normal),
                    Err(FrameError::Io(e)) if cancel::is_cancelled(&e) => {
                        State::Terminated(SessionEnd::Cancelled)
                    }
                    Err(e) => State::Terminated(SessionEnd::Error(e.into())),
                },
                State::Processing(frame) => {
                    self.process(frame);
                    State::AwaitingFrame
                }
                State::Terminated(end) => break end,
            };
        };

        let report = SessionReport {
            end,
            attempts: self.attempts,
            received: self.received,
        };
        tracing::debug!(
            end = ?report.end,
            attempts = report.attempts,
            received = report.received,
            "session terminated"
        );
        self.observer.finished(&report);
        report
    }

    fn process(&mut self, frame: Frame) {
        self.attempts += 1;
        let seq = self.attempts;

        let name = match frame.metadata.file_name() {
            Some(n) => n.to_string(),
            None => {
                let n = fallback_name(seq);
                tracing::warn!(seq, fallback = %n, "frame has no file_name");
                n
            }
        };

        let outcome = self.store_payload(&name, &frame);
        if matches!(outcome, TransferOutcome::Saved { .. }) {
            self.received += 1;
        }
        self.observer.transfer(seq, &frame.metadata, &outcome);
    }

    fn store_payload(&self, name: &str, frame: &Frame) -> TransferOutcome {
        let path = match self.store.resolve(name) {
            Ok(p) => p,
            Err(e) => return TransferOutcome::Failed(e),
        };

        let existed = self.store.exists(&path);
        if existed && !self.store.overwrite() {
            return TransferOutcome::Skipped { path };
        }

        let integrity = checksum::verify(&frame.payload, frame.metadata.sha256());
        if let Integrity::Mismatch { expected, actual } = &integrity {
            tracing::debug!(
                path = %path.display(),
                %expected,
                %actual,
                "sha256 mismatch, writing anyway"
            );
        }

        match self.store.write(&path, &frame.payload) {
            Ok(WriteStatus::Written) => TransferOutcome::Saved {
                path,
                bytes: frame.payload.len() as u64,
                integrity,
                replaced: existed,
            },
            Ok(WriteStatus::AlreadyExists) => TransferOutcome::Skipped { path },
            Err(e) => TransferOutcome::Failed(e),
        }
    }
}

/// Connect to the device at `addr` and receive until it hangs up or `cancel` fires
pub fn receive(
    addr: &str,
    store: Store,
    options: &ReceiveOptions,
    cancel: CancelToken,
    observer: Arc<dyn TransferObserver>,
) -> SessionReport {
    let terminated = |source: io::Error, observer: &Arc<dyn TransferObserver>| {
        let report = SessionReport {
            end: SessionEnd::Error(SessionError::Connect {
                addr: addr.to_string(),
                source,
            }),
            attempts: 0,
            received: 0,
        };
        observer.finished(&report);
        report
    };

    let stream = match net::connect(addr, options.connect_timeout) {
        Ok(s) => s,
        Err(e) => return terminated(e, &observer),
    };
    let peer = net::peer_label(&stream);
    let reader = match CancellableReader::new(stream, cancel, options.cancel_poll) {
        Ok(r) => r,
        Err(e) => return terminated(e, &observer),
    };
    tracing::info!(%peer, root = %store.root().display(), "receiver session started");
    observer.connected(&peer);

    ReceiverSession::new(reader, store, observer).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::sha256_hex;
    use crate::codec::encode_frame;
    use crate::logger::NoopObserver;
    use crate::metadata::Metadata;
    use crate::protocol::keys;
    use std::fs;
    use std::io::Cursor;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        outcomes: Mutex<Vec<(u64, String)>>,
        finished: Mutex<Option<(u64, u64)>>,
    }

    impl TransferObserver for Recorder {
        fn transfer(&self, seq: u64, _metadata: &Metadata, outcome: &TransferOutcome) {
            let label = match outcome {
                TransferOutcome::Saved { integrity, .. } if integrity.is_mismatch() => "mismatch",
                TransferOutcome::Saved { .. } => "saved",
                TransferOutcome::Skipped { .. } => "skipped",
                TransferOutcome::Failed(_) => "failed",
            };
            self.outcomes.lock().unwrap().push((seq, label.to_string()));
        }
        fn finished(&self, report: &SessionReport) {
            *self.finished.lock().unwrap() = Some((report.attempts, report.received));
        }
    }

    fn frame(name: Option<&str>, payload: &[u8], sha: Option<String>) -> Vec<u8> {
        let mut meta = Metadata::new().with(keys::BLOB_NAME, "blob");
        if let Some(n) = name {
            meta.insert(keys::FILE_NAME, n);
        }
        if let Some(s) = sha {
            meta.insert(keys::SHA256, s);
        }
        encode_frame(&meta, payload).unwrap()
    }

    fn run_stream(
        bytes: Vec<u8>,
        root: &TempDir,
        overwrite: bool,
    ) -> (SessionReport, Arc<Recorder>) {
        let store = Store::open(root.path(), overwrite, true).unwrap();
        let recorder = Arc::new(Recorder::default());
        let report = ReceiverSession::new(Cursor::new(bytes), store, recorder.clone()).run();
        (report, recorder)
    }

    #[test]
    fn test_single_transfer_verified() {
        let tmp = TempDir::new().unwrap();
        let bytes = frame(Some("a.txt"), b"hi", Some(sha256_hex(b"hi")));
        let (report, rec) = run_stream(bytes, &tmp, false);

        assert!(report.end.is_normal());
        assert_eq!(report.received, 1);
        assert_eq!(fs::read(tmp.path().join("a.txt")).unwrap(), b"hi");
        assert_eq!(*rec.outcomes.lock().unwrap(), vec![(1, "saved".to_string())]);
        assert_eq!(*rec.finished.lock().unwrap(), Some((1, 1)));
    }

    #[test]
    fn test_three_frames_one_connection() {
        let tmp = TempDir::new().unwrap();
        let mut bytes = Vec::new();
        for (name, body) in [("a.bin", b"one"), ("b.bin", b"two"), ("c.bin", b"six")] {
            bytes.extend(frame(Some(name), body, Some(sha256_hex(body))));
        }
        let (report, rec) = run_stream(bytes, &tmp, false);

        assert!(report.end.is_normal());
        assert_eq!(report.attempts, 3);
        assert_eq!(report.received, 3);
        assert_eq!(rec.outcomes.lock().unwrap().len(), 3);
        assert_eq!(fs::read(tmp.path().join("b.bin")).unwrap(), b"two");
    }

    #[test]
    fn test_collision_without_overwrite_keeps_original() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), b"original").unwrap();
        let mut bytes = frame(Some("a.txt"), b"new", None);
        bytes.extend(frame(Some("b.txt"), b"next", None));
        let (report, rec) = run_stream(bytes, &tmp, false);

        assert!(report.end.is_normal());
        assert_eq!(fs::read(tmp.path().join("a.txt")).unwrap(), b"original");
        assert_eq!(fs::read(tmp.path().join("b.txt")).unwrap(), b"next");
        assert_eq!(report.attempts, 2);
        assert_eq!(report.received, 1);
        assert_eq!(
            *rec.outcomes.lock().unwrap(),
            vec![(1, "skipped".to_string()), (2, "saved".to_string())]
        );
    }

    #[test]
    fn test_collision_with_overwrite_replaces() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), b"original").unwrap();
        let (report, _) = run_stream(frame(Some("a.txt"), b"new", None), &tmp, true);
        assert_eq!(report.received, 1);
        assert_eq!(fs::read(tmp.path().join("a.txt")).unwrap(), b"new");
    }

    #[test]
    fn test_mismatch_still_written() {
        let tmp = TempDir::new().unwrap();
        let bytes = frame(Some("a.txt"), b"tampered", Some(sha256_hex(b"hi")));
        let (report, rec) = run_stream(bytes, &tmp, false);
        assert_eq!(report.received, 1);
        assert_eq!(fs::read(tmp.path().join("a.txt")).unwrap(), b"tampered");
        assert_eq!(*rec.outcomes.lock().unwrap(), vec![(1, "mismatch".to_string())]);
    }

    #[test]
    fn test_missing_sha_skips_verification() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path(), false, true).unwrap();
        let session = ReceiverSession::new(io::empty(), store, Arc::new(NoopObserver));
        let f = Frame {
            metadata: Metadata::new().with(keys::FILE_NAME, "a.txt"),
            payload: b"hi".to_vec(),
        };
        match session.store_payload("a.txt", &f) {
            TransferOutcome::Saved { integrity, .. } => assert_eq!(integrity, Integrity::Unchecked),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_fallback_name_uses_attempt_counter() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("taken.txt"), b"x").unwrap();
        let mut bytes = frame(Some("taken.txt"), b"skip me", None);
        bytes.extend(frame(None, b"anon", None));
        let (report, _) = run_stream(bytes, &tmp, false);
        assert_eq!(report.attempts, 2);
        // The skipped transfer still consumed attempt 1
        assert_eq!(fs::read(tmp.path().join("blob_2.bin")).unwrap(), b"anon");
    }

    #[test]
    fn test_unsafe_name_fails_transfer_not_session() {
        let tmp = TempDir::new().unwrap();
        let mut bytes = frame(Some("../escape.txt"), b"bad", None);
        bytes.extend(frame(Some("ok.txt"), b"good", None));
        let (report, rec) = run_stream(bytes, &tmp, false);
        assert!(report.end.is_normal());
        assert_eq!(report.received, 1);
        assert_eq!(rec.outcomes.lock().unwrap()[0].1, "failed");
        assert!(!tmp.path().parent().unwrap().join("escape.txt").exists());
    }

    #[test]
    fn test_partial_header_ends_with_framing_error() {
        let tmp = TempDir::new().unwrap();
        let mut bytes = frame(Some("a.txt"), b"hi", None);
        bytes.extend_from_slice(&[0, 0]);
        let (report, _) = run_stream(bytes, &tmp, false);
        assert_eq!(report.received, 1);
        assert!(matches!(
            report.end,
            SessionEnd::Error(SessionError::Framing(FrameError::TruncatedHeader(_)))
        ));
    }

    #[test]
    fn test_truncated_payload_is_not_written() {
        let tmp = TempDir::new().unwrap();
        let mut bytes = frame(Some("big.bin"), &[1u8; 64], None);
        bytes.truncate(bytes.len() - 10);
        let (report, _) = run_stream(bytes, &tmp, false);
        assert_eq!(report.attempts, 0);
        assert!(matches!(
            report.end,
            SessionEnd::Error(SessionError::Framing(FrameError::TruncatedBody { .. }))
        ));
        assert!(!tmp.path().join("big.bin").exists());
    }

    #[test]
    fn test_io_error_is_connection_loss() {
        struct Reset;
        impl Read for Reset {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
            }
        }
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path(), false, true).unwrap();
        let report = ReceiverSession::new(Reset, store, Arc::new(NoopObserver)).run();
        assert!(matches!(report.end, SessionEnd::Error(SessionError::Connection(_))));
    }

    #[test]
    fn test_connect_refused_terminates() {
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().to_string()
        };
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path(), false, true).unwrap();
        let report = receive(
            &addr,
            store,
            &ReceiveOptions::default(),
            CancelToken::new(),
            Arc::new(NoopObserver),
        );
        assert!(matches!(report.end, SessionEnd::Error(SessionError::Connect { .. })));
        assert_eq!(report.received, 0);
    }
}
