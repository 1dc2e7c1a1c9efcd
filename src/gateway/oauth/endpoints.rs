//! Usage: Identity-provider endpoint and scope configuration for both grant flows.

use crate::infra::config::AppConfig;
use crate::shared::error::AppResult;
use rand::RngCore;

/// Scope requested by the client-credentials grant.
pub(crate) const SERVICE_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Scopes requested on behalf of the signed-in user.
pub(crate) const DELEGATED_SCOPES: &[&str] = &[
    "offline_access",
    "https://graph.microsoft.com/Mail.Send",
    "https://graph.microsoft.com/User.Read",
    "https://graph.microsoft.com/Files.ReadWrite",
    "https://graph.microsoft.com/Calendars.ReadWrite",
];

pub(crate) fn delegated_scope() -> String {
    DELEGATED_SCOPES.join(" ")
}

pub(crate) fn build_oauth_state() -> String {
    use rand::rngs::OsRng;
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) fn build_authorize_url(config: &AppConfig, state: &str) -> AppResult<String> {
    let mut url = reqwest::Url::parse(&config.authorize_endpoint())
        .map_err(|e| format!("CONFIG_INVALID: invalid oauth authorize url: {e}"))?;
    {
        let scope = delegated_scope();
        let mut query = url.query_pairs_mut();
        query.append_pair("client_id", &config.client_id);
        query.append_pair("response_type", "code");
        query.append_pair("redirect_uri", &config.redirect_uri);
        query.append_pair("response_mode", "query");
        query.append_pair("scope", &scope);
        query.append_pair("state", state);
    }
    Ok(url.to_string())
}
