use crate::{BackgroundHandle, ExecutionError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, timeout};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// How long to keep draining pipes after the process itself is gone.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal or timed out.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u128,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Path relative to the listed directory.
    pub path: String,
    pub is_dir: bool,
    pub size: Option<u64>,
}

/// OS-facing side of every action.
#[async_trait]
pub trait ExecutionEnvironment: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String, ExecutionError>;

    /// Returns the number of bytes written.
    async fn write_file(
        &self,
        path: &str,
        content: &str,
        append: bool,
    ) -> Result<usize, ExecutionError>;

    async fn delete_path(&self, path: &str, recursive: bool) -> Result<(), ExecutionError>;

    async fn list_directory(&self, path: &str, depth: usize)
    -> Result<Vec<DirEntry>, ExecutionError>;

    async fn exec_command(
        &self,
        command: &str,
        timeout_ms: u64,
        working_dir: Option<&str>,
    ) -> Result<ExecResult, ExecutionError>;

    async fn spawn_background(
        &self,
        command: &str,
        working_dir: Option<&str>,
    ) -> Result<BackgroundHandle, ExecutionError>;

    fn working_directory(&self) -> &Path;
    fn platform(&self) -> &str;
    fn os_version(&self) -> &str;
}

#[derive(Clone, Debug)]
pub struct LocalExecutionEnvironment {
    working_directory: PathBuf,
    platform: String,
    os_version: String,
}

impl LocalExecutionEnvironment {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            platform: std::env::consts::OS.to_string(),
            os_version: detect_os_version(),
        }
    }

    /// Relative paths resolve against the session working directory; `~` against `$HOME`.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let expanded = expand_home(path);
        if expanded.is_absolute() {
            expanded
        } else {
            self.working_directory.join(expanded)
        }
    }

    fn command_dir(&self, working_dir: Option<&str>) -> PathBuf {
        working_dir
            .map(|dir| self.resolve(dir))
            .unwrap_or_else(|| self.working_directory.clone())
    }
}

#[async_trait]
impl ExecutionEnvironment for LocalExecutionEnvironment {
    async fn read_file(&self, path: &str) -> Result<String, ExecutionError> {
        let resolved = self.resolve(path);
        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|error| ExecutionError::io(format!("cannot read '{path}'"), error))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        append: bool,
    ) -> Result<usize, ExecutionError> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|error| {
                ExecutionError::io(format!("cannot create parent directories for '{path}'"), error)
            })?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&resolved)
            .await
            .map_err(|error| ExecutionError::io(format!("cannot open '{path}'"), error))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|error| ExecutionError::io(format!("cannot write '{path}'"), error))?;
        file.flush()
            .await
            .map_err(|error| ExecutionError::io(format!("cannot write '{path}'"), error))?;
        Ok(content.len())
    }

    async fn delete_path(&self, path: &str, recursive: bool) -> Result<(), ExecutionError> {
        let resolved = self.resolve(path);
        let metadata = tokio::fs::symlink_metadata(&resolved)
            .await
            .map_err(|error| ExecutionError::io(format!("cannot delete '{path}'"), error))?;

        if metadata.is_dir() {
            if !recursive {
                return Err(ExecutionError::Failed(format!(
                    "'{path}' is a directory; set recursive to delete it"
                )));
            }
            tokio::fs::remove_dir_all(&resolved)
                .await
                .map_err(|error| ExecutionError::io(format!("cannot delete '{path}'"), error))
        } else {
            tokio::fs::remove_file(&resolved)
                .await
                .map_err(|error| ExecutionError::io(format!("cannot delete '{path}'"), error))
        }
    }

    async fn list_directory(
        &self,
        path: &str,
        depth: usize,
    ) -> Result<Vec<DirEntry>, ExecutionError> {
        let root = self.resolve(path);
        if !root.is_dir() {
            return Err(ExecutionError::Failed(format!("'{path}' is not a directory")));
        }

        let max_depth = depth.max(1);
        tokio::task::spawn_blocking(move || walk_directory(&root, max_depth))
            .await
            .map_err(|error| ExecutionError::Failed(format!("directory walk failed: {error}")))?
    }

    async fn exec_command(
        &self,
        command: &str,
        timeout_ms: u64,
        working_dir: Option<&str>,
    ) -> Result<ExecResult, ExecutionError> {
        let cwd = self.command_dir(working_dir);
        let started = Instant::now();
        let mut child = shell_command(command, &cwd)
            .spawn()
            .map_err(|error| ExecutionError::io(format!("failed to spawn `{command}`"), error))?;
        debug!(command, pid = ?child.id(), cwd = %cwd.display(), timeout_ms, "command started");

        let stdout = OutputBuffer::default();
        let stderr = OutputBuffer::default();
        let readers: Vec<JoinHandle<()>> = [
            spawn_reader(child.stdout.take(), stdout.clone()),
            spawn_reader(child.stderr.take(), stderr.clone()),
        ]
        .into_iter()
        .flatten()
        .collect();

        let (exit_code, timed_out) =
            match timeout(Duration::from_millis(timeout_ms), child.wait()).await {
                Ok(Ok(status)) => (status.code(), false),
                Ok(Err(error)) => {
                    kill_process_group(&mut child).await;
                    return Err(ExecutionError::io("failed waiting for command", error));
                }
                Err(_) => {
                    warn!(command, timeout_ms, "command timed out; killing process group");
                    kill_process_group(&mut child).await;
                    (None, true)
                }
            };

        drain_readers(readers).await;
        let duration_ms = started.elapsed().as_millis();
        debug!(command, ?exit_code, timed_out, duration_ms, "command finished");

        Ok(ExecResult {
            stdout: stdout.take_all(),
            stderr: stderr.take_all(),
            exit_code,
            timed_out,
            duration_ms,
        })
    }

    async fn spawn_background(
        &self,
        command: &str,
        working_dir: Option<&str>,
    ) -> Result<BackgroundHandle, ExecutionError> {
        let cwd = self.command_dir(working_dir);
        BackgroundHandle::spawn(command, &cwd)
    }

    fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    fn platform(&self) -> &str {
        &self.platform
    }

    fn os_version(&self) -> &str {
        &self.os_version
    }
}

/// `sh -c` in its own process group so the whole tree can be signalled.
pub(crate) fn shell_command(command: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// Most bytes an [`OutputBuffer`] holds; older output is dropped first.
pub(crate) const MAX_BUFFERED_OUTPUT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Default)]
struct BufferState {
    bytes: VecDeque<u8>,
    dropped: usize,
}

/// Bytes captured from a child's pipes, shared with the reader tasks.
///
/// Reads consume what they return. Once `limit` is reached the oldest
/// unread bytes are discarded and counted, and the next read says so.
#[derive(Clone, Debug)]
pub(crate) struct OutputBuffer {
    state: Arc<Mutex<BufferState>>,
    limit: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_BUFFERED_OUTPUT_BYTES)
    }
}

impl OutputBuffer {
    pub(crate) fn with_limit(limit: usize) -> Self {
        Self {
            state: Arc::default(),
            limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, chunk: &[u8]) {
        let mut state = self.lock();
        state.bytes.extend(chunk);
        let excess = state.bytes.len().saturating_sub(self.limit);
        if excess > 0 {
            state.bytes.drain(..excess);
            state.dropped += excess;
        }
    }

    /// Unread bytes currently held.
    pub(crate) fn retained(&self) -> usize {
        self.lock().bytes.len()
    }

    /// Takes unread text up to the last complete UTF-8 sequence.
    pub(crate) fn take(&self) -> String {
        self.take_inner(false)
    }

    /// Takes everything unread, including an incomplete trailing sequence.
    pub(crate) fn take_all(&self) -> String {
        self.take_inner(true)
    }

    fn take_inner(&self, everything: bool) -> String {
        let mut state = self.lock();
        let available = state.bytes.make_contiguous();
        let end = if everything {
            available.len()
        } else {
            complete_utf8_prefix(available)
        };
        let bytes: Vec<u8> = state.bytes.drain(..end).collect();
        let dropped = std::mem::take(&mut state.dropped);

        let text = String::from_utf8_lossy(&bytes);
        if dropped == 0 {
            text.into_owned()
        } else {
            format!("[... {dropped} bytes of earlier output dropped ...]\n{text}")
        }
    }
}

fn complete_utf8_prefix(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        Err(error) if error.error_len().is_none() => error.valid_up_to(),
        Err(_) => bytes.len(),
    }
}

pub(crate) fn spawn_reader<R>(pipe: Option<R>, buffer: OutputBuffer) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut pipe = pipe?;
    Some(tokio::spawn(async move {
        let mut chunk = [0_u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(read) => buffer.append(&chunk[..read]),
                Err(error) => {
                    debug!(%error, "pipe read failed");
                    break;
                }
            }
        }
    }))
}

pub(crate) async fn drain_readers(readers: Vec<JoinHandle<()>>) {
    for mut reader in readers {
        if timeout(READER_DRAIN_TIMEOUT, &mut reader).await.is_err() {
            reader.abort();
        }
    }
}

/// SIGTERM to the child's process group.
pub(crate) fn terminate_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        signal_process_group(child, nix::sys::signal::Signal::SIGTERM);
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }
}

/// SIGKILL to the child's process group, then reap the child.
pub(crate) async fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    signal_process_group(child, nix::sys::signal::Signal::SIGKILL);
    if let Err(error) = child.start_kill() {
        debug!(%error, "child already exited");
    }
    if timeout(READER_DRAIN_TIMEOUT, child.wait()).await.is_err() {
        warn!(pid = ?child.id(), "child did not exit after SIGKILL");
    }
}

#[cfg(unix)]
pub(crate) fn signal_process_group(child: &Child, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(error) = killpg(Pid::from_raw(raw), signal) {
        debug!(pid, %error, ?signal, "killpg failed");
    }
}

fn walk_directory(root: &Path, max_depth: usize) -> Result<Vec<DirEntry>, ExecutionError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                debug!(%error, "skipping unreadable entry");
                continue;
            }
        };
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        let is_dir = entry.file_type().is_dir();
        let size = if is_dir {
            None
        } else {
            entry.metadata().ok().map(|metadata| metadata.len())
        };
        entries.push(DirEntry {
            path: relative,
            is_dir,
            size,
        });
    }
    Ok(entries)
}

fn expand_home(path: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (path, home) {
        ("~", Some(home)) => home,
        (path, Some(home)) if path.starts_with("~/") => home.join(&path[2..]),
        (path, _) => PathBuf::from(path),
    }
}

fn detect_os_version() -> String {
    #[cfg(unix)]
    {
        if let Ok(uname) = nix::sys::utsname::uname() {
            return uname.release().to_string_lossy().into_owned();
        }
    }
    "unknown".to_string()
}
