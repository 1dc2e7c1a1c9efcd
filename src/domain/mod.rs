//! Usage: Domain modules (remote operations, recipients, task batch).

pub(crate) mod digest;
pub(crate) mod directory;
pub(crate) mod graph;
pub(crate) mod images;
pub(crate) mod tasks;
