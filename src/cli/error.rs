use serde::Serialize;
use thiserror::Error;

use crate::service::ServiceError;

#[derive(Error, Debug, Serialize)]
pub enum DispatchError {
    #[error("unbalanced quotes")]
    Quoting,
    #[error("{0}")]
    Parse(String),
    #[error("service error `{0}`")]
    Service(ServiceError),
    #[error("json encoding error `{0}`")]
    JsonEncodingError(String),
}

impl From<clap::error::Error> for DispatchError {
    fn from(value: clap::error::Error) -> Self {
        Self::Parse(value.render().to_string())
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(value: serde_json::Error) -> Self {
        Self::JsonEncodingError(value.to_string())
    }
}

impl From<ServiceError> for DispatchError {
    fn from(value: ServiceError) -> Self {
        Self::Service(value)
    }
}
