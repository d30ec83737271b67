//! PTY-backed shell process, generalizing
//! `examples/AnalyseDeCircuit-oxideterm/src-tauri/src/local/pty.rs`'s
//! `PtyHandle` from a fixed desktop-app shell list (WSL, Oh My Posh themes,
//! ...) down to spec.md §4.6's POSIX resolution rule: first of `$SHELL`,
//! split by shell-word rules, searched on `$PATH`, falling back to
//! `/bin/sh`. `portable-pty`'s `native_pty_system()` already selects a
//! pseudo-console on Windows, so no platform branch is needed here.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use portable_pty::{native_pty_system, Child, CommandBuilder, ExitStatus, MasterPty, PtySize};
use thiserror::Error;
use wsterm_protocol::ShellSize;

#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("failed to create pty: {0}")]
    Create(String),
    #[error("failed to spawn shell: {0}")]
    Spawn(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("pty handle lock poisoned")]
    Lock,
}

/// Resolves the shell executable per spec.md §4.6: `$SHELL` if set and
/// found on `$PATH` (or given as an absolute/relative path that exists),
/// else `/bin/sh`.
pub fn resolve_shell() -> PathBuf {
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() {
            let candidate = PathBuf::from(&shell);
            if candidate.is_absolute() && candidate.exists() {
                return candidate;
            }
            if let Some(found) = find_on_path(&shell) {
                return found;
            }
        }
    }
    PathBuf::from("/bin/sh")
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// A spawned PTY and its child shell process. `master`/`child` are guarded
/// by a `std::sync::Mutex` (not `tokio::sync`) because `portable_pty`'s
/// trait objects are not `Sync` and all access happens from blocking
/// contexts (`spawn_blocking` pump tasks), matching the teacher's approach.
pub struct Shell {
    master: StdMutex<Box<dyn MasterPty + Send>>,
    child: StdMutex<Box<dyn Child + Send + Sync>>,
    reader: Arc<StdMutex<Box<dyn Read + Send>>>,
    writer: Arc<StdMutex<Box<dyn Write + Send>>>,
}

unsafe impl Sync for Shell {}

impl Shell {
    pub fn spawn(cwd: &Path, size: ShellSize) -> Result<Self, ShellError> {
        let [cols, rows] = size;
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ShellError::Create(e.to_string()))?;

        let shell_path = resolve_shell();
        let mut cmd = CommandBuilder::new(&shell_path);
        cmd.cwd(cwd);
        for (key, value) in std::env::vars() {
            cmd.env(key, value);
        }
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ShellError::Spawn(e.to_string()))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| ShellError::Create(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| ShellError::Create(e.to_string()))?;

        Ok(Self {
            master: StdMutex::new(pair.master),
            child: StdMutex::new(child),
            reader: Arc::new(StdMutex::new(reader)),
            writer: Arc::new(StdMutex::new(writer)),
        })
    }

    pub fn resize(&self, size: ShellSize) -> Result<(), ShellError> {
        let [cols, rows] = size;
        let master = self.master.lock().map_err(|_| ShellError::Lock)?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| ShellError::Create(e.to_string()))
    }

    pub fn write(&self, data: &[u8]) -> Result<(), ShellError> {
        let mut writer = self.writer.lock().map_err(|_| ShellError::Lock)?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Graceful shutdown: writes `exit\n` to the shell's stdin (spec.md
    /// §4.6: "otherwise the shell is terminated (`exit\n` written to
    /// stdin)"), letting the shell itself exit rather than signaling it.
    pub fn request_exit(&self) -> Result<(), ShellError> {
        self.write(b"exit\n")
    }

    /// Blocking read of shell stdout. Intended to run on a `spawn_blocking`
    /// pump task (spec.md §4.6: "forwarding loop... reads up to 4 KiB").
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, ShellError> {
        let mut reader = self.reader.lock().map_err(|_| ShellError::Lock)?;
        Ok(reader.read(buf)?)
    }

    pub fn clone_reader(&self) -> Arc<StdMutex<Box<dyn Read + Send>>> {
        self.reader.clone()
    }

    /// `Some(exit_status)` once the child has exited; `None` while running.
    pub fn try_wait(&self) -> Option<ExitStatus> {
        self.child.lock().ok()?.try_wait().ok().flatten()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.lock().ok()?.process_id()
    }

    #[cfg(unix)]
    pub fn kill(&self) {
        if let Some(pid) = self.pid() {
            let pgid = Pid::from_raw(pid as i32);
            let _ = killpg(pgid, Signal::SIGTERM);
        }
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }

    #[cfg(not(unix))]
    pub fn kill(&self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_bin_sh_without_shell_env() {
        // SAFETY: test runs single-threaded within this process; no other
        // test reads $SHELL concurrently.
        let prior = std::env::var("SHELL").ok();
        std::env::remove_var("SHELL");
        assert_eq!(resolve_shell(), PathBuf::from("/bin/sh"));
        if let Some(prior) = prior {
            std::env::set_var("SHELL", prior);
        }
    }
}
