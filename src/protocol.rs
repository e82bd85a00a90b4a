//! Shared protocol constants for the bloby framed transport

// Default TCP port the device listener binds
pub const DEFAULT_PORT: u16 = 12345;

// Every segment is preceded by a big-endian u32 length
pub const LEN_PREFIX_SIZE: usize = 4;

// Maximum metadata segment size (1MB) - a record is a handful of short strings,
// anything larger is treated as a corrupt stream
pub const MAX_METADATA_LEN: usize = 1024 * 1024;

// Largest single read reservation for the payload segment; the buffer grows
// past this only as bytes actually arrive
pub const PAYLOAD_RESERVE_MAX: usize = 8 * 1024 * 1024;

// Recognised metadata keys
pub mod keys {
    pub const BLOB_NAME: &str = "blob_name";
    pub const DATETIME: &str = "datetime";
    pub const FILE_NAME: &str = "file_name";
    pub const SHA256: &str = "sha256";
    pub const UUID: &str = "uuid";
}

pub mod timeouts {
    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;

    // How often a blocked read wakes up to look at the cancel flag (ms)
    pub const CANCEL_POLL_MS: u64 = 200;
}
