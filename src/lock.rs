use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use chrono::Utc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Job '{key}' is already running (PID {pid}).")]
    Busy { key: String, pid: u32 },

    #[error("Lock file error on {path}: {source}")]
    Io {
        path:   String,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> LockError {
    LockError::Io { path: path.display().to_string(), source }
}

/// One running job per key. The lock file records the owning pid; a file
/// left behind by a dead process is treated as stale and replaced.
#[derive(Debug)]
pub struct JobLock {
    path: PathBuf,
}

impl JobLock {
    pub fn acquire(lock_dir: &Path, key: &str) -> Result<Self, LockError> {
        Self::acquire_as(lock_dir, key, process::id())
    }

    /// Take the lock on behalf of `pid`.
    pub fn acquire_as(lock_dir: &Path, key: &str, pid: u32) -> Result<Self, LockError> {
        if !lock_dir.exists() {
            fs::create_dir_all(lock_dir).map_err(|e| io_err(lock_dir, e))?;
        }

        let lock_path = lock_dir.join(format!("{}.lock", key));

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).map_err(|e| io_err(&lock_path, e))?;

            match owner_pid(&content) {
                Some(existing) if process_alive(existing) => {
                    return Err(LockError::Busy { key: key.to_string(), pid: existing });
                }
                // stale or corrupt
                _ => {
                    let _ = fs::remove_file(&lock_path);
                }
            }
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    // lost a race with another request for the same key
                    LockError::Busy { key: key.to_string(), pid: 0 }
                } else {
                    io_err(&lock_path, e)
                }
            })?;

        writeln!(file, "pid: {}", pid).ok();
        writeln!(file, "hostname: {}", get_hostname()).ok();
        writeln!(file, "timestamp: {}", Utc::now().to_rfc3339()).ok();

        Ok(JobLock { path: lock_path })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn owner_pid(content: &str) -> Option<u32> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("pid:"))
        .and_then(|rest| rest.trim().parse().ok())
}

fn process_alive(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{}", pid)).exists()
}

fn get_hostname() -> String {
    if let Ok(contents) = fs::read_to_string("/etc/hostname") {
        contents.trim().to_string()
    } else {
        "unknown".to_string()
    }
}
