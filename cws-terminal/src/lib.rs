//! Interactive terminal runtime: pseudo-terminal hosts and the reconnectable
//! sessions built on them.

pub mod backlog;
pub mod decoder;
pub mod error;
pub mod process;
pub mod pty;
pub mod session;

pub use error::{Result, TerminalError};
pub use pty::{PtyHost, SpawnOptions};
pub use session::{
    AttachOutcome, ConnectionId, SessionConfig, SessionEvent, SessionEventKind, SessionManager,
};
