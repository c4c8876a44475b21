//! `kvsem run`: hold slots for the lifetime of a child process.
//!
//! The semaphore never renews on its own, so this loop does it every half
//! TTL. If a renewal is refused the slots are gone and the child is stopped.

use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kvsem_core::config::SemaphoreConfig;
use kvsem_core::infrastructure_consul::ConsulKvStore;
use kvsem_core::semaphore::{AcquireResult, Semaphore};
use kvsem_core::types::ResourceOutcome;
use tokio::process::Command;

/// sysexits EX_TEMPFAIL: try again later
const EXIT_NOT_GRANTED: u8 = 75;

type SharedSemaphore = Arc<Mutex<Semaphore<ConsulKvStore>>>;

/// Runs `f` against the semaphore on the blocking pool.
async fn blocking<T, F>(semaphore: &SharedSemaphore, f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&mut Semaphore<ConsulKvStore>) -> T + Send + 'static,
{
    let semaphore = semaphore.clone();
    tokio::task::spawn_blocking(move || {
        let mut guard = semaphore.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    })
    .await
    .map_err(|e| format!("Semaphore task failed: {}", e))
}

fn grants_env(outcomes: &[ResourceOutcome]) -> String {
    outcomes
        .iter()
        .map(|o| format!("{}={}", o.name, o.granted_slots))
        .collect::<Vec<_>>()
        .join(",")
}

pub async fn run(
    store: ConsulKvStore,
    config: SemaphoreConfig,
    command: Vec<String>,
) -> Result<ExitCode, String> {
    let renew_every = Duration::from_millis((config.ttl_secs * 1000 / 2).max(500));
    let semaphore = Semaphore::new(store, config).map_err(|e| e.to_string())?;
    let semaphore: SharedSemaphore = Arc::new(Mutex::new(semaphore));

    let result = blocking(&semaphore, |sem| sem.acquire())
        .await?
        .map_err(|e| format!("Acquisition failed: {}", e))?;

    let (outcomes, session_id) = match result {
        AcquireResult::Success { outcomes } => {
            let session_id = blocking(&semaphore, |sem| sem.session_id().map(str::to_string))
                .await?
                .unwrap_or_default();
            (outcomes, session_id)
        }
        AcquireResult::Failure {
            resource, reason, ..
        } => {
            tracing::warn!(resource = %resource, reason = ?reason, "Slots not granted");
            return Ok(ExitCode::from(EXIT_NOT_GRANTED));
        }
    };

    tracing::info!(session_id = %session_id, grants = %grants_env(&outcomes), "Slots granted");

    let (program, args) = command
        .split_first()
        .ok_or_else(|| "No command given".to_string())?;

    let mut child = match Command::new(program)
        .args(args)
        .env("KVSEM_SESSION_ID", &session_id)
        .env("KVSEM_GRANTS", grants_env(&outcomes))
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            blocking(&semaphore, |sem| sem.release()).await?;
            return Err(format!("Failed to start '{}': {}", program, e));
        }
    };

    let mut ticker = tokio::time::interval(renew_every);
    ticker.tick().await;

    let exit = loop {
        tokio::select! {
            status = child.wait() => {
                break status
                    .map(|s| s.code().map_or(ExitCode::FAILURE, |c| ExitCode::from(c as u8)))
                    .map_err(|e| format!("Failed to wait for child: {}", e));
            }
            _ = ticker.tick() => {
                match blocking(&semaphore, |sem| sem.renew()).await? {
                    Ok(true) => tracing::debug!(session_id = %session_id, "Session renewed"),
                    Ok(false) => {
                        tracing::error!(session_id = %session_id, "Session lost, stopping command");
                        let _ = child.kill().await;
                        break Ok(ExitCode::FAILURE);
                    }
                    // A transient error leaves the lease to the next tick
                    Err(e) => tracing::warn!(error = %e, "Renewal failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping command");
                let _ = child.kill().await;
                break Ok(ExitCode::from(130));
            }
        }
    };

    blocking(&semaphore, |sem| sem.release()).await?;
    tracing::info!(session_id = %session_id, "Slots released");
    exit
}

#[cfg(test)]
mod tests {
    use super::grants_env;
    use kvsem_core::types::ResourceOutcome;

    #[test]
    fn test_grants_env_format() {
        let outcomes = vec![ResourceOutcome::new("db", 1), ResourceOutcome::new("gpu", 3)];
        assert_eq!(grants_env(&outcomes), "db=1,gpu=3");
    }
}
