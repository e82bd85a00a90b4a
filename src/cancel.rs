//! Operator cancellation for blocking socket reads.
//!
//! A [`CancelToken`] is a shared flag tripped from the Ctrl-C handler. The
//! [`CancellableReader`] puts a short read timeout on the socket and, every time the
//! timeout fires with no data, looks at the flag before blocking again. A timeout
//! never consumes bytes, so retrying is lossless.

use std::fmt;
use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Payload of the `io::Error` a cancelled read returns
#[derive(Debug)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("cancelled by operator")
    }
}

impl std::error::Error for Cancelled {}

/// True when `err` came from a cancelled [`CancellableReader`]
pub fn is_cancelled(err: &io::Error) -> bool {
    err.get_ref().map_or(false, |inner| inner.is::<Cancelled>())
}

fn cancelled_error() -> io::Error {
    // Not `Interrupted`: read_exact and friends silently retry on that kind
    io::Error::new(io::ErrorKind::Other, Cancelled)
}

/// Sources whose blocking reads can be given a wake-up interval
pub trait PollTimeout {
    fn set_poll_timeout(&self, interval: Option<Duration>) -> io::Result<()>;
}

impl PollTimeout for TcpStream {
    fn set_poll_timeout(&self, interval: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(interval)
    }
}

pub struct CancellableReader<R> {
    inner: R,
    token: CancelToken,
}

impl<R: Read + PollTimeout> CancellableReader<R> {
    pub fn new(inner: R, token: CancelToken, poll: Duration) -> io::Result<Self> {
        // A zero timeout is rejected by the OS layer
        inner.set_poll_timeout(Some(poll.max(Duration::from_millis(1))))?;
        Ok(Self { inner, token })
    }
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.token.is_cancelled() {
                return Err(cancelled_error());
            }
            match self.inner.read(buf) {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                other => return other,
            }
        }
    }
}
