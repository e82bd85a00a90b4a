//! Bloby library
//!
//! Point-to-point transfer of files plus a metadata record over one TCP
//! connection, using a length-prefixed framing protocol.

pub mod cancel;
pub mod checksum;
pub mod cli;
pub mod codec;
pub mod config;
pub mod log;
pub mod logger;
pub mod metadata;
pub mod net;
pub mod protocol;
pub mod serve;
pub mod session;
pub mod store;
pub mod transmitter;
