//! Transmitter: one connection, one frame, then close.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::{write_frame, FrameError};
use crate::metadata::{BlobRecord, Metadata};
use crate::net;

#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to send to {addr}: {source}")]
    Send {
        addr: String,
        #[source]
        source: FrameError,
    },

    #[error("failed to read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} has no usable file name", .0.display())]
    NoFileName(PathBuf),
}

/// Send one framed transfer to `addr`. Returns the number of payload bytes sent.
///
/// The stream is owned by this call and dropped on every path out of it, so a
/// failure halfway through a write still closes the connection.
pub fn send(
    addr: &str,
    metadata: &Metadata,
    payload: &[u8],
    connect_timeout: Duration,
) -> Result<usize, TransmitError> {
    let mut stream = net::connect(addr, connect_timeout).map_err(|source| TransmitError::Connect {
        addr: addr.to_string(),
        source,
    })?;
    tracing::debug!(%addr, bytes = payload.len(), "connected, writing frame");
    write_frame(&mut stream, metadata, payload).map_err(|source| TransmitError::Send {
        addr: addr.to_string(),
        source,
    })?;
    Ok(payload.len())
}

/// Read `path` and build its metadata record. `extra` pairs are added unless they
/// collide with a key the record already carries.
pub fn prepare_file(
    path: &Path,
    extra: &[(String, String)],
) -> Result<(Metadata, Vec<u8>), TransmitError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransmitError::NoFileName(path.to_path_buf()))?;
    let payload = fs::read(path).map_err(|source| TransmitError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;

    // Digest over exactly the bytes that go on the wire
    let mut metadata = BlobRecord::for_payload(file_name, &payload).into_metadata();
    for (k, v) in extra {
        if !metadata.insert_if_absent(k, v.as_str()) {
            tracing::warn!(key = %k, "ignoring extra metadata that shadows a reserved key");
        }
    }
    Ok((metadata, payload))
}

/// Build the record for `path` and send it. Returns the metadata that went out
/// and the payload size.
pub fn send_file(
    addr: &str,
    path: &Path,
    extra: &[(String, String)],
    connect_timeout: Duration,
) -> Result<(Metadata, usize), TransmitError> {
    let (metadata, payload) = prepare_file(path, extra)?;
    let sent = send(addr, &metadata, &payload, connect_timeout)?;
    Ok((metadata, sent))
}
