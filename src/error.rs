use thiserror::Error;

/// Failures the bridge distinguishes when deciding what is fatal.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("cannot connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("channel '{channel}' not found")]
    ChannelNotFound {
        channel: String,
        available: Vec<String>,
    },

    #[error("audio device error: {0}")]
    Device(String),

    #[error("audio routing failed: {0}")]
    Routing(String),

    #[error("PTT command `{command}` failed: {reason}")]
    Action { command: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}
