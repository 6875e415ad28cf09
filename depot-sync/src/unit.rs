//! One configured source→target synchronization task.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;

use depot_core::config::{DEFAULT_SHELL, DEFAULT_TIMEOUT_SECS};
use depot_store::{RemoteTarget, ReplicaSet};

use crate::cursor::ModTimeCursor;
use crate::error::{io_err, SyncError};
use crate::installer;
use crate::orchestrator::AttemptedFlag;

/// A sync unit: freshness and emptiness checks, the atomic install, and a
/// sequence of post-install shell commands, all under one deadline.
pub struct SyncUnit {
    name: String,
    replicas: ReplicaSet,
    source: RemoteTarget,
    target: PathBuf,
    commands: Vec<String>,
    shell: String,
    timeout: Duration,
    replace_prefix: String,
}

impl SyncUnit {
    pub fn new(
        name: impl Into<String>,
        replicas: ReplicaSet,
        source: RemoteTarget,
        target: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            replicas,
            source,
            target: target.into(),
            commands: Vec::new(),
            shell: DEFAULT_SHELL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            replace_prefix: String::new(),
        }
    }

    pub fn with_commands(mut self, commands: Vec<String>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_replace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.replace_prefix = prefix.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unit's configured wall-clock budget; the orchestrator derives
    /// each task's deadline from it.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one cycle: check emptiness and freshness, install if needed,
    /// then run the post-install commands.
    ///
    /// `attempted` is marked the moment writing new content begins, so the
    /// caller can distinguish "skipped, already current" from "started but
    /// failed" even when this future is abandoned at a deadline.
    pub async fn run(
        &self,
        cursor: &ModTimeCursor,
        attempted: &AttemptedFlag,
    ) -> Result<(), SyncError> {
        let force = match installer::is_empty_dir(&self.target) {
            Ok(empty) => {
                if empty {
                    tracing::debug!(unit = %self.name, target = %self.target.display(),
                        "installing because the target directory is empty");
                }
                empty
            }
            Err(err) => {
                tracing::debug!(unit = %self.name, target = %self.target.display(), error = %err,
                    "failed to check if target directory is empty");
                false
            }
        };

        let (mod_time, index) = self.replicas.find_newest(&self.source).await?;
        let update = self.classify_update(cursor, mod_time)?;
        if update {
            // Advance before installing so the install's own effect on
            // directory metadata cannot re-trigger the same update.
            cursor.advance(&self.name, mod_time);
            tracing::debug!(unit = %self.name, source = self.source.describe(),
                mod_time = %mod_time, "installing because an update was found");
        }
        if !update && !force {
            return Ok(());
        }

        self.install(index, attempted).await?;
        self.run_commands().await
    }

    /// True when the remote modification time means new content.
    ///
    /// Two guards classify "no update": the cursor (already seen this
    /// modification time) and the target directory's own change time (the
    /// directory was updated after the remote object was written — covers a
    /// fresh cursor right after restart).
    fn classify_update(
        &self,
        cursor: &ModTimeCursor,
        mod_time: DateTime<Utc>,
    ) -> Result<bool, SyncError> {
        if !cursor.is_newer(&self.name, mod_time) {
            tracing::debug!(unit = %self.name, mod_time = %mod_time,
                "no update: remote modification time is not past the cursor");
            return Ok(false);
        }

        let meta = std::fs::metadata(&self.target).map_err(|e| io_err(&self.target, e))?;
        let ctime = change_time(&meta);
        if mod_time <= ctime {
            tracing::debug!(unit = %self.name, mod_time = %mod_time, ctime = %ctime,
                "no update: target directory changed after the remote object");
            return Ok(false);
        }

        Ok(true)
    }

    async fn install(&self, index: usize, attempted: &AttemptedFlag) -> Result<(), SyncError> {
        match &self.source {
            RemoteTarget::Key(key) => {
                let body = self.replicas.fetch_object(key, index).await?;
                attempted.mark();
                installer::install_archive(&self.name, body, &self.target, &self.replace_prefix)
                    .await
            }
            RemoteTarget::Prefix(prefix) => {
                let entries = self.replicas.fetch_prefix(prefix, index)?;
                let staged = installer::stage_tree(&self.name, entries).await?;
                attempted.mark();
                installer::install_staged(staged, &self.target, &self.replace_prefix).await
            }
        }
    }

    /// Run the configured commands in order; the first failure aborts the
    /// rest, carrying captured stdout/stderr.
    async fn run_commands(&self) -> Result<(), SyncError> {
        for command in &self.commands {
            let output = Command::new(&self.shell)
                .arg("-c")
                .arg(command)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| SyncError::Spawn {
                    shell: self.shell.clone(),
                    source: e,
                })?;
            if !output.status.success() {
                return Err(SyncError::Command {
                    command: command.clone(),
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn change_time(meta: &std::fs::Metadata) -> DateTime<Utc> {
    use std::os::unix::fs::MetadataExt;
    DateTime::from_timestamp(meta.ctime(), meta.ctime_nsec() as u32)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(not(unix))]
fn change_time(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
