pub mod apply;
pub mod cluster;
pub mod config;
pub mod database;
pub mod error;
pub mod exec;
pub mod io;
pub mod ledger;
pub mod lock;
pub mod paths;
pub mod pipeline;
pub mod registry;
pub mod render;
pub mod retry;
pub mod scaffold;
pub mod secrets;
pub mod tier;
pub mod types;
pub mod validate;

#[cfg(test)]
mod testing;

pub use error::{ClientError, ProvisionError, Result};
