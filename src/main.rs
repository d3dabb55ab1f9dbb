use std::error::Error;

use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    actions::{ActionDispatcher, ActionTable},
    cli::model::{Args, Console},
    config::ManagerConfig,
    store::{PostCodeStore, StoreSettings, clock::SystemClock},
};

pub mod actions;
pub mod cli;
pub mod codes;
pub mod config;
pub mod persist;
pub mod service;
pub mod store;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// one thread: requests, notifications and flushes never run concurrently
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = ManagerConfig::from_file(&args.config)?;

    let table = match &cfg.action_rules {
        Some(path) => ActionTable::from_file(path)?,
        None => ActionTable::default(),
    };
    if table.is_empty() {
        info!("no action rules configured");
    } else {
        info!(rules = table.len(), "loaded action rules");
    }

    let store = PostCodeStore::open(
        StoreSettings::new(&cfg, args.host),
        ActionDispatcher::system(table),
        Box::new(SystemClock),
    )
    .await;
    let (handle, task) = service::spawn(store);
    info!(host = args.host, "Start post code manager service...");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("reading console: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let res = match Console::parse(&line) {
                    Ok(cmd) => cmd.command.dispatch(&handle).await,
                    Err(e) => Err(e),
                };
                match res {
                    Ok(Some(out)) => println!("{out}"),
                    Ok(None) => {}
                    Err(e) => println!(
                        "{}",
                        serde_json::to_string(&ErrorResponse { error: e.to_string() })?
                    ),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    drop(handle);
    task.await?;

    Ok(())
}
