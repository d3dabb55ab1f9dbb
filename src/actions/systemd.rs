use std::process::Stdio;

use tokio::process::Command;
use tracing::{error, info, warn};

use crate::codes::PostCode;

use super::{ActionError, EventDescriptor, EventSink, UnitStarter};

/// Queues a start job for each unit with `systemctl start --no-block`.
///
/// Only the spawn is synchronous, the exit status is collected on a
/// separate task and logged.
pub struct SystemdUnits;

impl UnitStarter for SystemdUnits {
    fn start_unit(&self, unit: &str) -> Result<(), ActionError> {
        let child = Command::new("systemctl")
            .args(["start", "--no-block", unit])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ActionError::Spawn {
                unit: unit.to_string(),
                source,
            })?;

        let unit = unit.to_string();
        tokio::spawn(async move {
            match child.wait_with_output().await {
                Ok(output) if output.status.success() => info!(unit = %unit, "start job queued"),
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    let reason = if stderr.is_empty() {
                        format!("exit code {}", output.status.code().unwrap_or(-1))
                    } else {
                        stderr
                    };
                    error!("{}", ActionError::Failed { unit, reason });
                }
                Err(e) => error!(unit = %unit, "waiting for systemctl: {e}"),
            }
        });

        Ok(())
    }
}

/// Raises events as structured log records
pub struct LogEvents;

impl EventSink for LogEvents {
    fn raise(&self, event: &EventDescriptor, code: &PostCode) -> Result<(), ActionError> {
        let args = serde_json::to_string(&event.args)
            .map_err(|_| ActionError::Event(event.name.clone()))?;
        warn!(event = %event.name, %code, %args, "post code event");
        Ok(())
    }
}
