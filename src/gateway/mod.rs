//! Usage: Outbound identity-provider plumbing and the local sign-in listener.

pub(crate) mod oauth;
