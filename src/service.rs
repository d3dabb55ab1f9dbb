use std::{collections::BTreeMap, str::FromStr};

use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tracing::{Instrument, debug, info, span, Level};

use crate::{
    codes::PostCode,
    store::{PostCodeStore, StoreStatus},
};

#[derive(Error, Debug, Serialize)]
pub enum ServiceError {
    #[error("post code service is not running")]
    Closed,
    #[error("unknown host state `{0}`")]
    UnknownHostState(String),
}

impl<T> From<mpsc::error::SendError<T>> for ServiceError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Self::Closed
    }
}

impl From<oneshot::error::RecvError> for ServiceError {
    fn from(_: oneshot::error::RecvError) -> Self {
        Self::Closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostState {
    Off,
    Running,
    Quiesced,
    DiagnosticMode,
    Standby,
    TransitioningToOff,
    TransitioningToRunning,
}

impl FromStr for HostState {
    type Err = ServiceError;

    /// Accepts `Off` as well as `xyz.openbmc_project.State.Host.HostState.Off`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.rsplit('.').next().unwrap_or(s);
        Ok(match name {
            "Off" => Self::Off,
            "Running" => Self::Running,
            "Quiesced" => Self::Quiesced,
            "DiagnosticMode" => Self::DiagnosticMode,
            "Standby" => Self::Standby,
            "TransitioningToOff" => Self::TransitioningToOff,
            "TransitioningToRunning" => Self::TransitioningToRunning,
            _ => return Err(ServiceError::UnknownHostState(s.to_string())),
        })
    }
}

pub enum StoreRequest {
    PostCode(PostCode),
    HostState(HostState),
    ListCodes {
        cycle: u16,
        reply: oneshot::Sender<Vec<PostCode>>,
    },
    ListCodesWithTimestamps {
        cycle: u16,
        reply: oneshot::Sender<BTreeMap<u64, PostCode>>,
    },
    DeleteAll {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<StoreStatus>,
    },
}

/// Cloneable handle to the store task
#[derive(Clone)]
pub struct PostCodeHandle {
    tx: mpsc::Sender<StoreRequest>,
    current_rx: watch::Receiver<Option<PostCode>>,
}

impl PostCodeHandle {
    pub async fn post_code(&self, code: PostCode) -> Result<(), ServiceError> {
        Ok(self.tx.send(StoreRequest::PostCode(code)).await?)
    }

    pub async fn host_state(&self, state: HostState) -> Result<(), ServiceError> {
        Ok(self.tx.send(StoreRequest::HostState(state)).await?)
    }

    pub async fn list_codes(&self, cycle: u16) -> Result<Vec<PostCode>, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreRequest::ListCodes { cycle, reply }).await?;
        Ok(rx.await?)
    }

    pub async fn list_codes_with_timestamps(
        &self,
        cycle: u16,
    ) -> Result<BTreeMap<u64, PostCode>, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreRequest::ListCodesWithTimestamps { cycle, reply })
            .await?;
        Ok(rx.await?)
    }

    pub async fn delete_all(&self) -> Result<(), ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreRequest::DeleteAll { reply }).await?;
        Ok(rx.await?)
    }

    pub async fn status(&self) -> Result<StoreStatus, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreRequest::Status { reply }).await?;
        Ok(rx.await?)
    }

    /// Last code received, for display
    pub fn current(&self) -> Option<PostCode> {
        self.current_rx.borrow().clone()
    }
}

/// Moves the store onto its own task. The task ends once every handle is dropped.
pub fn spawn(store: PostCodeStore) -> (PostCodeHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(1000);
    let handle = PostCodeHandle {
        tx,
        current_rx: store.subscribe_current(),
    };
    let span = span!(Level::INFO, "Post Code Store");
    let task = tokio::spawn(run(store, rx).instrument(span));
    (handle, task)
}

/// Handles requests and flush deadlines one at a time
async fn run(mut store: PostCodeStore, mut rx: mpsc::Receiver<StoreRequest>) {
    info!("running");

    loop {
        let deadline = store.flush_deadline();

        tokio::select! {
            req = rx.recv() => match req {
                Some(req) => handle_request(&mut store, req).await,
                None => break,
            },

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                store.on_flush_tick().await;
            }
        }
    }

    store.flush_now().await;
    info!("stopped");
}

async fn handle_request(store: &mut PostCodeStore, req: StoreRequest) {
    match req {
        StoreRequest::PostCode(code) => store.on_post_code(code),
        StoreRequest::HostState(HostState::Off) => store.on_host_powered_off().await,
        StoreRequest::HostState(state) => debug!(?state, "ignoring host state"),
        StoreRequest::ListCodes { cycle, reply } => {
            let _ = reply.send(store.list_codes(cycle).await);
        }
        StoreRequest::ListCodesWithTimestamps { cycle, reply } => {
            let _ = reply.send(store.list_codes_with_timestamps(cycle).await);
        }
        StoreRequest::DeleteAll { reply } => {
            store.clear_all().await;
            let _ = reply.send(());
        }
        StoreRequest::Status { reply } => {
            let _ = reply.send(store.status());
        }
    }
}
