//! One interactive process attached to a pseudo-terminal.
//!
//! The PTY file descriptors are blocking, so a dedicated reader thread and
//! writer thread bridge them to `flume` channels that async code can await.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, info, warn};

use crate::error::{Result, TerminalError};
use crate::process;

const CHANNEL_CAPACITY: usize = 256;
const READ_BUFFER_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub shell: String,
    pub args: Vec<String>,
    /// Working directory; `$HOME` when unset.
    pub cwd: Option<PathBuf>,
    /// Added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            cols: 80,
            rows: 24,
        }
    }
}

type SharedChild = Arc<Mutex<Box<dyn Child + Send + Sync>>>;

pub struct PtyHost {
    pid: u32,
    child: SharedChild,
    master: Mutex<Box<dyn MasterPty + Send>>,
    output: flume::Receiver<Vec<u8>>,
    input: flume::Sender<Vec<u8>>,
}

pub(crate) fn lock_recovering<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| {
        warn!("terminal lock was poisoned, recovering");
        e.into_inner()
    })
}

fn spawn_error(e: impl std::fmt::Display) -> TerminalError {
    TerminalError::ProcessSpawn(e.to_string())
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

impl PtyHost {
    /// Spawn the shell. Blocking; call from `spawn_blocking` in async code.
    pub fn spawn(options: &SpawnOptions) -> Result<Self> {
        let pair = native_pty_system()
            .openpty(pty_size(options.cols, options.rows))
            .map_err(spawn_error)?;

        let mut command = CommandBuilder::new(&options.shell);
        command.args(&options.args);
        match &options.cwd {
            Some(cwd) => command.cwd(cwd),
            None => {
                if let Some(home) = std::env::var_os("HOME") {
                    command.cwd(home);
                }
            }
        }
        for (key, value) in &options.env {
            command.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(command)
            .map_err(spawn_error)?;
        // The child holds its own copy; ours would keep the reader from seeing EOF.
        drop(pair.slave);

        let pid = child
            .process_id()
            .ok_or_else(|| TerminalError::ProcessSpawn("spawned process has no pid".into()))?;
        let child: SharedChild = Arc::new(Mutex::new(child));

        let (output_tx, output_rx) = flume::bounded::<Vec<u8>>(CHANNEL_CAPACITY);
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(spawn_error)?;
        std::thread::Builder::new()
            .name(format!("pty-read-{pid}"))
            .spawn(move || {
                let mut buf = [0u8; READ_BUFFER_BYTES];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if output_tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        // EIO once the last slave fd closes.
                        Err(e) => {
                            debug!(pid, error = %e, "pty reader finished");
                            break;
                        }
                    }
                }
            })?;

        let (input_tx, input_rx) = flume::bounded::<Vec<u8>>(CHANNEL_CAPACITY);
        let mut writer = pair.master.take_writer().map_err(spawn_error)?;
        std::thread::Builder::new()
            .name(format!("pty-write-{pid}"))
            .spawn(move || {
                while let Ok(data) = input_rx.recv() {
                    if let Err(e) = writer.write_all(&data).and_then(|()| writer.flush()) {
                        debug!(pid, error = %e, "pty writer finished");
                        break;
                    }
                }
            })?;

        info!(pid, shell = %options.shell, "spawned terminal process");
        Ok(Self {
            pid,
            child,
            master: Mutex::new(pair.master),
            output: output_rx,
            input: input_tx,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Raw output chunks in production order. Disconnects when the process
    /// closes its terminal.
    pub fn output(&self) -> flume::Receiver<Vec<u8>> {
        self.output.clone()
    }

    pub async fn write(&self, data: Vec<u8>) -> Result<()> {
        self.input
            .send_async(data)
            .await
            .map_err(|_| TerminalError::Closed)
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        lock_recovering(&self.master)
            .resize(pty_size(cols, rows))
            .map_err(|e| TerminalError::Internal(format!("resize failed: {e}")))?;
        debug!(pid = self.pid, cols, rows, "pty resized");
        Ok(())
    }

    pub fn is_alive(&self) -> bool {
        matches!(lock_recovering(&self.child).try_wait(), Ok(None))
    }

    /// SIGTERM the whole process tree, then force-kill and reap the shell.
    pub async fn kill(&self) -> Result<()> {
        let pid = self.pid;
        let child = Arc::clone(&self.child);
        tokio::task::spawn_blocking(move || {
            process::terminate_tree(pid);
            let mut child = lock_recovering(&child);
            if let Ok(Some(status)) = child.try_wait() {
                debug!(pid, ?status, "terminal process already exited");
                return;
            }
            if let Err(e) = child.kill() {
                debug!(pid, error = %e, "kill failed");
            }
            match child.wait() {
                Ok(status) => debug!(pid, ?status, "terminal process reaped"),
                Err(e) => warn!(pid, error = %e, "failed to reap terminal process"),
            }
        })
        .await
        .map_err(|e| TerminalError::Internal(format!("kill task failed: {e}")))
    }
}

impl std::fmt::Debug for PtyHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHost")
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish()
    }
}
