//! Line oriented console: post codes and host states in, JSON query results out.

pub mod dispatcher;
pub mod error;
pub mod model;
