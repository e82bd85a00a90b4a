use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Join a host and port into a dialable address; bracket bare IPv6 literals
pub fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Connect to the first reachable address `addr` resolves to
pub fn connect(addr: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for sa in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sa, timeout) {
            Ok(stream) => {
                tune_socket(&stream);
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(addr = %sa, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("{} resolved to no addresses", addr))
    }))
}

pub fn tune_socket(stream: &TcpStream) {
    // Frames are written as a header then a payload; don't hold the header back
    let _ = stream.set_nodelay(true);
}

pub fn peer_label(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
