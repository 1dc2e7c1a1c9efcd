//! Usage: OAuth credential lifecycle (service grant, delegated grant, interactive bootstrap).

pub(crate) mod app_grant;
pub(crate) mod browser;
pub(crate) mod callback_server;
pub(crate) mod delegated_grant;
pub(crate) mod endpoints;
#[cfg(test)]
pub(crate) mod testing;
pub(crate) mod token_exchange;
