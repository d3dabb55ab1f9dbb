use serde::Serialize;

use crate::{codes::PostCode, service::PostCodeHandle};

use super::{error::DispatchError, model::ConsoleCommand};

#[derive(Serialize)]
struct TimestampedCode<'a> {
    timestamp_us: u64,
    time: Option<String>,
    #[serde(flatten)]
    code: &'a PostCode,
}

impl ConsoleCommand {
    /// Runs the command, returning JSON for queries
    pub async fn dispatch(self, handle: &PostCodeHandle) -> Result<Option<String>, DispatchError> {
        Ok(match self {
            ConsoleCommand::Post { primary, secondary } => {
                let secondary = secondary.map(|s| s.0).unwrap_or_default();
                handle.post_code(PostCode::new(primary, secondary)).await?;
                None
            }
            ConsoleCommand::Host { state } => {
                handle.host_state(state).await?;
                None
            }
            ConsoleCommand::List {
                cycle,
                timestamps: false,
            } => Some(serde_json::to_string(&handle.list_codes(cycle).await?)?),
            ConsoleCommand::List {
                cycle,
                timestamps: true,
            } => {
                let codes = handle.list_codes_with_timestamps(cycle).await?;
                let entries: Vec<TimestampedCode> = codes
                    .iter()
                    .map(|(ts, code)| TimestampedCode {
                        timestamp_us: *ts,
                        time: render_time(*ts),
                        code,
                    })
                    .collect();
                Some(serde_json::to_string(&entries)?)
            }
            ConsoleCommand::DeleteAll => {
                handle.delete_all().await?;
                None
            }
            ConsoleCommand::Status => Some(serde_json::to_string(&handle.status().await?)?),
            ConsoleCommand::Current => Some(serde_json::to_string(&handle.current())?),
        })
    }
}

fn render_time(timestamp_us: u64) -> Option<String> {
    let us = i64::try_from(timestamp_us).ok()?;
    jiff::Timestamp::from_microsecond(us)
        .ok()
        .map(|t| t.to_string())
}
