pub(crate) mod cli;
pub(crate) mod entry;
pub(crate) mod logging;
