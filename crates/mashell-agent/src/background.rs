//! Long-running commands started by `run_background`.
//!
//! Each [`BackgroundHandle`] owns its child process and the tasks draining
//! its pipes. It is only observed through [`BackgroundHandle::poll`] and
//! [`BackgroundHandle::cancel`], both of which wait for a bounded time.
//! Dropping a handle kills its process group.

use crate::ExecutionError;
use crate::execution::{
    OutputBuffer, drain_readers, kill_process_group, shell_command, spawn_reader,
    terminate_process_group,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JobStatus {
    Running,
    Completed,
    Failed { exit_code: Option<i32> },
    Cancelled,
}

impl JobStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Completed => Some(0),
            Self::Failed { exit_code } => *exit_code,
            Self::Running | Self::Cancelled => None,
        }
    }
}

/// Output produced since the previous observation, plus the current status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSnapshot {
    pub task_id: String,
    pub command: String,
    pub output: String,
    pub status: JobStatus,
    pub elapsed: Duration,
}

pub struct BackgroundHandle {
    id: String,
    command: String,
    child: Child,
    output: OutputBuffer,
    readers: Vec<JoinHandle<()>>,
    status: JobStatus,
    started_at: Instant,
}

impl BackgroundHandle {
    pub(crate) fn spawn(command: &str, cwd: &Path) -> Result<Self, ExecutionError> {
        let mut child = shell_command(command, cwd).spawn().map_err(|error| {
            ExecutionError::io(format!("failed to start background `{command}`"), error)
        })?;

        // stdout and stderr interleave into one stream, in arrival order.
        let output = OutputBuffer::default();
        let readers = [
            spawn_reader(child.stdout.take(), output.clone()),
            spawn_reader(child.stderr.take(), output.clone()),
        ]
        .into_iter()
        .flatten()
        .collect();

        let id = format!("bg-{}", &Uuid::new_v4().simple().to_string()[..8]);
        info!(task_id = %id, command, pid = ?child.id(), "background job started");
        Ok(Self {
            id,
            command: command.to_string(),
            child,
            output,
            readers,
            status: JobStatus::Running,
            started_at: Instant::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Waits up to `wait` for the job to finish, then reports new output.
    pub async fn poll(&mut self, wait: Duration) -> JobSnapshot {
        if self.status.is_running() {
            match timeout(wait, self.child.wait()).await {
                Ok(Ok(exit)) => {
                    self.status = match exit.code() {
                        Some(0) => JobStatus::Completed,
                        exit_code => JobStatus::Failed { exit_code },
                    };
                    self.finish_readers().await;
                    debug!(task_id = %self.id, status = ?self.status, "background job exited");
                }
                Ok(Err(error)) => {
                    warn!(task_id = %self.id, %error, "failed waiting for background job");
                    self.status = JobStatus::Failed { exit_code: None };
                    self.finish_readers().await;
                }
                Err(_) => {}
            }
        }
        self.snapshot()
    }

    /// SIGTERM, then SIGKILL once `grace` elapses. A finished job keeps its final status.
    pub async fn cancel(&mut self, grace: Duration) -> JobSnapshot {
        let current = self.poll(Duration::ZERO).await;
        if !current.status.is_running() {
            return current_with_rest(current, self.snapshot());
        }

        terminate_process_group(&mut self.child);
        if timeout(grace, self.child.wait()).await.is_err() {
            debug!(task_id = %self.id, "background job ignored SIGTERM");
            kill_process_group(&mut self.child).await;
        }
        self.status = JobStatus::Cancelled;
        self.finish_readers().await;
        info!(task_id = %self.id, "background job cancelled");
        current_with_rest(current, self.snapshot())
    }

    async fn finish_readers(&mut self) {
        drain_readers(std::mem::take(&mut self.readers)).await;
    }

    fn snapshot(&mut self) -> JobSnapshot {
        let output = if self.status.is_running() {
            self.output.take()
        } else {
            self.output.take_all()
        };
        JobSnapshot {
            task_id: self.id.clone(),
            command: self.command.clone(),
            output,
            status: self.status,
            elapsed: self.started_at.elapsed(),
        }
    }
}

fn current_with_rest(mut first: JobSnapshot, rest: JobSnapshot) -> JobSnapshot {
    first.output.push_str(&rest.output);
    first.status = rest.status;
    first.elapsed = rest.elapsed;
    first
}

impl Drop for BackgroundHandle {
    fn drop(&mut self) {
        if self.status.is_running() {
            #[cfg(unix)]
            crate::execution::signal_process_group(&self.child, nix::sys::signal::Signal::SIGKILL);
            if let Err(error) = self.child.start_kill() {
                debug!(task_id = %self.id, %error, "background child already gone");
            }
        }
        for reader in &self.readers {
            reader.abort();
        }
    }
}

/// Background jobs owned by one session, keyed by task id.
///
/// Once a job's final status has been reported its handle is retired: the
/// process and buffers are released and only the final snapshot is kept.
#[derive(Default)]
pub struct BackgroundJobs {
    jobs: BTreeMap<String, BackgroundHandle>,
    finished: BTreeMap<String, JobSnapshot>,
}

impl BackgroundJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: BackgroundHandle) -> String {
        let id = handle.id().to_string();
        self.jobs.insert(id.clone(), handle);
        id
    }

    pub fn get_mut(&mut self, task_id: &str) -> Option<&mut BackgroundHandle> {
        self.jobs.get_mut(task_id)
    }

    /// Drops a finished job's handle, keeping its final status without output.
    pub fn retire(&mut self, task_id: &str) -> bool {
        let finished = self
            .jobs
            .get(task_id)
            .is_some_and(|handle| !handle.status().is_running());
        if !finished {
            return false;
        }
        if let Some(mut handle) = self.jobs.remove(task_id) {
            let mut last = handle.snapshot();
            last.output.clear();
            debug!(task_id, status = ?last.status, "background job retired");
            self.finished.insert(task_id.to_string(), last);
        }
        true
    }

    /// Final snapshot of a retired job.
    pub fn finished(&self, task_id: &str) -> Option<&JobSnapshot> {
        self.finished.get(task_id)
    }

    /// Live handles, retired jobs excluded.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Every known task id, live or retired.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .jobs
            .keys()
            .chain(self.finished.keys())
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn running_ids(&self) -> Vec<String> {
        self.jobs
            .iter()
            .filter(|(_, handle)| handle.status().is_running())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Cancels every running job and forgets all of them.
    pub async fn close_all(&mut self, grace: Duration) {
        self.finished.clear();
        for (id, mut handle) in std::mem::take(&mut self.jobs) {
            if handle.status().is_running() {
                let snapshot = handle.cancel(grace).await;
                debug!(task_id = %id, status = ?snapshot.status, "background job closed");
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::execution::MAX_BUFFERED_OUTPUT_BYTES;
    use tempfile::tempdir;

    #[tokio::test(flavor = "current_thread")]
    async fn poll_returns_incremental_output_and_final_status() {
        let dir = tempdir().expect("temp dir should be created");
        let mut handle = BackgroundHandle::spawn("echo first; sleep 0.3; echo second", dir.path())
            .expect("spawn should succeed");

        let first = handle.poll(Duration::from_millis(100)).await;
        assert!(first.status.is_running());

        let second = handle.poll(Duration::from_secs(5)).await;
        assert_eq!(second.status, JobStatus::Completed);
        let combined = format!("{}{}", first.output, second.output);
        assert_eq!(combined, "first\nsecond\n");

        let third = handle.poll(Duration::from_secs(1)).await;
        assert_eq!(third.output, "");
        assert_eq!(third.status, JobStatus::Completed);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failing_job_reports_exit_code() {
        let dir = tempdir().expect("temp dir should be created");
        let mut handle =
            BackgroundHandle::spawn("exit 4", dir.path()).expect("spawn should succeed");
        let snapshot = handle.poll(Duration::from_secs(5)).await;
        assert_eq!(snapshot.status, JobStatus::Failed { exit_code: Some(4) });
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancel_terminates_a_running_job() {
        let dir = tempdir().expect("temp dir should be created");
        let mut handle = BackgroundHandle::spawn("echo up; sleep 30", dir.path())
            .expect("spawn should succeed");

        let started = Instant::now();
        let snapshot = handle.cancel(Duration::from_millis(500)).await;
        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));

        let again = handle.cancel(Duration::from_millis(500)).await;
        assert_eq!(again.status, JobStatus::Cancelled);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn close_all_cancels_running_jobs() {
        let dir = tempdir().expect("temp dir should be created");
        let mut jobs = BackgroundJobs::new();
        let id = jobs.insert(
            BackgroundHandle::spawn("sleep 30", dir.path()).expect("spawn should succeed"),
        );
        assert_eq!(jobs.running_ids(), vec![id]);

        jobs.close_all(Duration::from_millis(200)).await;
        assert!(jobs.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn polling_releases_output_already_returned() {
        let dir = tempdir().expect("temp dir should be created");
        let mut handle =
            BackgroundHandle::spawn("head -c 3000000 /dev/zero | tr '\\0' a", dir.path())
                .expect("spawn should succeed");

        let first = handle.poll(Duration::from_secs(20)).await;
        assert_eq!(first.status, JobStatus::Completed);
        assert!(first.output.contains("bytes of earlier output dropped"));
        assert!(first.output.len() < MAX_BUFFERED_OUTPUT_BYTES + 100);
        assert_eq!(handle.output.retained(), 0);

        let again = handle.poll(Duration::from_secs(1)).await;
        assert_eq!(again.output, "");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn retire_keeps_only_the_final_status() {
        let dir = tempdir().expect("temp dir should be created");
        let mut jobs = BackgroundJobs::new();
        let id = jobs.insert(
            BackgroundHandle::spawn("echo done", dir.path()).expect("spawn should succeed"),
        );
        assert!(!jobs.retire("bg-missing"));

        let handle = jobs.get_mut(&id).expect("live handle");
        let snapshot = handle.poll(Duration::from_secs(5)).await;
        assert_eq!(snapshot.status, JobStatus::Completed);

        assert!(jobs.retire(&id));
        assert!(jobs.is_empty());
        assert!(jobs.get_mut(&id).is_none());
        let last = jobs.finished(&id).expect("final status kept");
        assert_eq!(last.status, JobStatus::Completed);
        assert!(last.output.is_empty());
        assert_eq!(jobs.ids(), vec![id]);
    }
}
