//! Worker process registry and lifecycle.
//!
//! Workers are plain OS processes running `queuectl worker run`. The only
//! record of them is `workers.json` next to the database: a list of
//! `{pid, worker_id}` entries. The queue core never reads this file; it
//! exists so `worker stop` and `status` can find the processes this tool
//! started.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEntry {
    pub pid: u32,
    pub worker_id: String,
}

pub struct WorkerManager {
    registry_path: PathBuf,
}

impl WorkerManager {
    /// Manager whose registry lives in `data_dir/workers.json`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        Ok(Self {
            registry_path: data_dir.join("workers.json"),
        })
    }

    fn load(&self) -> Vec<WorkerEntry> {
        match fs::read_to_string(&self.registry_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn save(&self, workers: &[WorkerEntry]) -> Result<()> {
        let raw = serde_json::to_string_pretty(workers)?;
        fs::write(&self.registry_path, raw)
            .with_context(|| format!("writing {}", self.registry_path.display()))
    }

    /// Registered workers whose process still exists. Dead entries are
    /// pruned from the registry as a side effect.
    pub fn active(&self) -> Result<Vec<WorkerEntry>> {
        let workers = self.load();
        let alive: Vec<WorkerEntry> = workers
            .iter()
            .filter(|w| process_alive(w.pid))
            .cloned()
            .collect();
        if alive.len() != workers.len() {
            self.save(&alive)?;
        }
        Ok(alive)
    }

    /// Spawn `count` detached worker processes against `db_path` and record
    /// them.
    pub fn start(&self, count: u32, db_path: &Path) -> Result<Vec<WorkerEntry>> {
        let mut workers = self.active()?;
        let exe = std::env::current_exe().context("locating the queuectl binary")?;

        let mut started = Vec::new();
        for i in 0..count as usize {
            let worker_id = format!("worker-{}", workers.len() + i + 1);
            let pid = spawn_detached(&exe, db_path, &worker_id)?;
            println!("Started worker '{worker_id}' (PID: {pid})");
            started.push(WorkerEntry { pid, worker_id });
        }

        workers.extend(started.iter().cloned());
        self.save(&workers)?;
        Ok(started)
    }

    /// Ask every registered worker to stop, then reset the registry.
    ///
    /// Unix workers receive SIGTERM and finish their current job before
    /// exiting.
    pub fn stop(&self) -> Result<usize> {
        let workers = self.active()?;
        for worker in &workers {
            terminate(worker.pid);
            println!("Stopped worker '{}' (PID: {})", worker.worker_id, worker.pid);
        }
        if !workers.is_empty() {
            std::thread::sleep(Duration::from_secs(1));
        }
        self.save(&[])?;
        Ok(workers.len())
    }
}

fn spawn_detached(exe: &Path, db_path: &Path, worker_id: &str) -> Result<u32> {
    let mut cmd = Command::new(exe);
    cmd.arg("--db")
        .arg(db_path)
        .arg("worker")
        .arg("run")
        .arg("--worker-id")
        .arg(worker_id)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group so terminal signals aimed at the CLI never
        // reach the workers.
        cmd.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("spawning worker '{worker_id}'"))?;
    Ok(child.id())
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // Signal 0 probes for existence without delivering anything.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(windows)]
fn process_alive(pid: u32) -> bool {
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/NH"])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

#[cfg(unix)]
fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(windows)]
fn terminate(pid: u32) {
    let _ = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn registry_round_trips() {
        let dir = TempDir::new().unwrap();
        let manager = WorkerManager::new(dir.path()).unwrap();

        let entries = vec![WorkerEntry {
            pid: std::process::id(),
            worker_id: "worker-1".into(),
        }];
        manager.save(&entries).unwrap();
        assert_eq!(manager.load(), entries);
    }

    #[test]
    fn active_prunes_dead_pids() {
        let dir = TempDir::new().unwrap();
        let manager = WorkerManager::new(dir.path()).unwrap();

        manager
            .save(&[
                // This test's own process is certainly alive.
                WorkerEntry {
                    pid: std::process::id(),
                    worker_id: "worker-1".into(),
                },
                // Above PID_MAX_LIMIT on Linux, so never a live process.
                WorkerEntry {
                    pid: 4_194_305,
                    worker_id: "worker-2".into(),
                },
            ])
            .unwrap();

        let active = manager.active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].worker_id, "worker-1");
        // The prune is persisted.
        assert_eq!(manager.load().len(), 1);
    }

    #[test]
    fn missing_or_corrupt_registry_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let manager = WorkerManager::new(dir.path()).unwrap();
        assert!(manager.load().is_empty());

        fs::write(dir.path().join("workers.json"), "not json").unwrap();
        assert!(manager.load().is_empty());
    }
}
