use thiserror::Error;

/// Process exit codes
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const INTERNAL: i32 = 1;
    pub const USER_ERROR: i32 = 2;
}

#[derive(Error, Debug)]
pub enum StokerError {
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Failed to connect to daemon: {0}")]
    Connection(String),

    #[error("Failed to launch daemon: {0}")]
    Launch(String),

    #[error("{0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StokerError {
    pub fn exit_code(&self) -> i32 {
        match self {
            StokerError::UnsupportedTransport(_) | StokerError::InvalidOptions(_) => {
                exit_codes::USER_ERROR
            }

            StokerError::Protocol(_)
            | StokerError::Connection(_)
            | StokerError::Launch(_)
            | StokerError::Execution(_)
            | StokerError::Io(_)
            | StokerError::Json(_) => exit_codes::INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, StokerError>;
