use queuectl_persistence::{ConfigStore, KEY_WORKER_PIDS};
use queuectl_worker::shutdown_signal;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Flags forwarded to each spawned `queuectl worker run`
#[derive(Debug, Clone, Default)]
pub struct WorkerLaunch {
    pub db_path: String,
    pub config_path: Option<String>,
    pub backoff_base: Option<f64>,
}

impl WorkerLaunch {
    fn args(&self) -> Vec<String> {
        let mut args = vec!["--db".to_string(), self.db_path.clone()];
        if let Some(config) = &self.config_path {
            args.push("--config".to_string());
            args.push(config.clone());
        }
        args.push("worker".to_string());
        args.push("run".to_string());
        if let Some(base) = self.backoff_base {
            args.push("--backoff-base".to_string());
            args.push(base.to_string());
        }
        args
    }
}

pub fn merge_pids(existing: &[String], added: &[u32]) -> String {
    existing
        .iter()
        .cloned()
        .chain(added.iter().map(u32::to_string))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn remove_pids(existing: &[String], removed: &[u32]) -> String {
    existing
        .iter()
        .filter(|pid| !removed.iter().any(|r| r.to_string() == **pid))
        .cloned()
        .collect::<Vec<_>>()
        .join(",")
}

/// Spawn `count` worker processes and record their PIDs
pub async fn start_workers(
    config: &ConfigStore,
    launch: &WorkerLaunch,
    count: usize,
) -> anyhow::Result<(Vec<Child>, Vec<u32>)> {
    let exe = std::env::current_exe()?;
    let mut children = Vec::with_capacity(count);
    let mut pids = Vec::with_capacity(count);

    for _ in 0..count {
        let child = Command::new(&exe).args(launch.args()).spawn()?;
        if let Some(pid) = child.id() {
            pids.push(pid);
        }
        children.push(child);
    }

    let existing = config.get_list(KEY_WORKER_PIDS).await?;
    config.set(KEY_WORKER_PIDS, &merge_pids(&existing, &pids)).await?;

    info!("Started {} worker(s): {:?}", pids.len(), pids);
    Ok((children, pids))
}

/// Wait for the workers to exit, forwarding a shutdown signal to them,
/// then forget their PIDs
pub async fn supervise(config: &ConfigStore, mut children: Vec<Child>, pids: Vec<u32>) -> anyhow::Result<()> {
    let wait_all = async {
        for child in children.iter_mut() {
            if let Err(e) = child.wait().await {
                warn!("Failed to wait for worker: {}", e);
            }
        }
    };
    tokio::pin!(wait_all);

    let interrupted = tokio::select! {
        _ = &mut wait_all => false,
        _ = shutdown_signal() => true,
    };

    if interrupted {
        for pid in &pids {
            terminate(&pid.to_string()).await;
        }
        wait_all.await;
    }

    let existing = config.get_list(KEY_WORKER_PIDS).await?;
    config.set(KEY_WORKER_PIDS, &remove_pids(&existing, &pids)).await?;
    info!("All workers exited");
    Ok(())
}

/// Ask every recorded worker to stop and clear the record.
/// Returns how many were signalled successfully.
pub async fn stop_workers(config: &ConfigStore) -> anyhow::Result<usize> {
    let pids = config.get_list(KEY_WORKER_PIDS).await?;
    let mut signalled = 0;
    for pid in &pids {
        if terminate(pid).await {
            signalled += 1;
        }
    }
    config.set(KEY_WORKER_PIDS, "").await?;
    Ok(signalled)
}

#[cfg(unix)]
fn terminate_command(pid: &str) -> Command {
    let mut cmd = Command::new("kill");
    cmd.arg("-TERM").arg(pid);
    cmd
}

#[cfg(windows)]
fn terminate_command(pid: &str) -> Command {
    let mut cmd = Command::new("taskkill");
    cmd.arg("/PID").arg(pid);
    cmd
}

async fn terminate(pid: &str) -> bool {
    match terminate_command(pid).status().await {
        Ok(status) if status.success() => {
            info!("Sent stop signal to worker {}", pid);
            true
        }
        Ok(status) => {
            warn!("Worker {} not signalled ({})", pid, status);
            false
        }
        Err(e) => {
            warn!("Failed to signal worker {}: {}", pid, e);
            false
        }
    }
}
