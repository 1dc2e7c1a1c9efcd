//! Usage: Infrastructure (environment configuration, credential file, external mirror tool).

pub(crate) mod config;
pub(crate) mod mirror_sync;
pub(crate) mod token_store;
