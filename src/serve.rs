//! Device side of the link: listen, wait for a receiver to dial in, and push the
//! queued blobs down that connection one frame after another.

use anyhow::{Context, Result};
use std::io;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::codec::write_frame;
use crate::logger::TransferObserver;
use crate::metadata::Metadata;
use crate::net;
use crate::transmitter::{prepare_file, TransmitError};

/// A blob waiting to be pushed
pub struct Outgoing {
    pub metadata: Metadata,
    pub payload: Vec<u8>,
}

/// Read and describe every file up front so a bad path fails before listening
pub fn load_outbox(
    paths: &[PathBuf],
    extra: &[(String, String)],
) -> Result<Vec<Outgoing>, TransmitError> {
    paths
        .iter()
        .map(|p| {
            let (metadata, payload) = prepare_file(p, extra)?;
            Ok(Outgoing { metadata, payload })
        })
        .collect()
}

fn handle_receiver(
    mut stream: TcpStream,
    outbox: &[Outgoing],
    observer: &Arc<dyn TransferObserver>,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    net::tune_socket(&stream);
    let peer = net::peer_label(&stream);
    observer.connected(&peer);
    for item in outbox {
        write_frame(&mut stream, &item.metadata, &item.payload)
            .with_context(|| format!("push to {}", peer))?;
        observer.sent(&peer, &item.metadata, item.payload.len());
    }
    Ok(())
}

/// Accept receivers until cancelled (or after the first one with `once`).
/// Each receiver gets the whole outbox, then the connection is closed.
pub fn serve(
    listener: TcpListener,
    outbox: &[Outgoing],
    once: bool,
    cancel: &CancelToken,
    poll: Duration,
    observer: Arc<dyn TransferObserver>,
) -> Result<u64> {
    listener.set_nonblocking(true).context("listener nonblocking")?;
    let local = listener.local_addr().context("listener address")?;
    tracing::info!(%local, blobs = outbox.len(), "device listener ready");

    let mut served = 0u64;
    while !cancel.is_cancelled() {
        match listener.accept() {
            Ok((stream, _)) => {
                match handle_receiver(stream, outbox, &observer) {
                    Ok(()) => served += 1,
                    Err(e) => eprintln!("push failed (receiver disconnected?): {:#}", e),
                }
                if once {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(poll),
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                thread::sleep(poll);
            }
        }
    }
    Ok(served)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::read_frame;
    use crate::logger::NoopObserver;
    use crate::protocol::keys;

    fn outgoing(name: &str, body: &[u8]) -> Outgoing {
        Outgoing {
            metadata: Metadata::new().with(keys::FILE_NAME, name),
            payload: body.to_vec(),
        }
    }

    #[test]
    fn test_load_outbox_fails_on_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("good.txt");
        std::fs::write(&good, b"ok").unwrap();
        assert_eq!(load_outbox(&[good.clone()], &[]).unwrap().len(), 1);
        assert!(load_outbox(&[good, tmp.path().join("missing")], &[]).is_err());
    }

    #[test]
    fn test_serve_once() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let outbox = vec![outgoing("a", b"hello")];
        let token = CancelToken::new();

        let client = thread::spawn(move || {
            let mut s = TcpStream::connect(addr).unwrap();
            let f = read_frame(&mut s).unwrap().unwrap();
            let end = read_frame(&mut s).unwrap();
            (f.payload, end.is_none())
        });

        let served = serve(
            listener,
            &outbox,
            true,
            &token,
            Duration::from_millis(5),
            Arc::new(NoopObserver),
        )
        .unwrap();
        assert_eq!(served, 1);
        let (payload, closed) = client.join().unwrap();
        assert_eq!(payload, b"hello");
        assert!(closed);
    }

    #[test]
    fn test_serve_stops_when_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let token = CancelToken::new();
        token.cancel();
        let served = serve(
            listener,
            &[],
            false,
            &token,
            Duration::from_millis(5),
            Arc::new(NoopObserver),
        )
        .unwrap();
        assert_eq!(served, 0);
    }
}
