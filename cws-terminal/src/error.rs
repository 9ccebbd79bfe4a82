use thiserror::Error;

pub type Result<T> = std::result::Result<T, TerminalError>;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("failed to spawn terminal process: {0}")]
    ProcessSpawn(String),

    #[error("terminal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("terminal process has exited")]
    Closed,

    #[error("terminal internal error: {0}")]
    Internal(String),
}
