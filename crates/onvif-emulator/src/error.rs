use thiserror::Error;

/// Reasons a configured device cannot be emulated
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device '{0}' has neither a hostname nor a MAC address")]
    NoHostname(String),

    #[error("device '{name}': could not determine IP for MAC {mac}")]
    UnresolvedMac { name: String, mac: String },

    #[error("device '{name}': {field} must be a positive integer")]
    NonPositive { name: String, field: &'static str },

    #[error("device '{name}': {field} port must be non-zero")]
    ZeroPort { name: String, field: &'static str },

    #[error("device '{name}': server, rtsp and snapshot ports must be distinct ({server}, {rtsp}, {snapshot})")]
    PortConflict {
        name: String,
        server: u16,
        rtsp: u16,
        snapshot: u16,
    },

    #[error("device '{name}': server port {host}:{port} is already claimed by '{owner}'")]
    ServerPortTaken {
        name: String,
        host: String,
        port: u16,
        owner: String,
    },
}
