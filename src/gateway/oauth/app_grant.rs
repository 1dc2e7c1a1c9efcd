//! Usage: Service-identity token via the client-credentials grant.
//!
//! The token is neither persisted nor refreshed; each run acquires a new one.

use crate::gateway::oauth::endpoints::SERVICE_SCOPE;
use crate::gateway::oauth::token_exchange::{Grant, TokenEndpoint};
use crate::shared::error::{AppError, AppResult, CODE_AUTH_SERVICE_TOKEN_FAILED};

pub(crate) async fn acquire_service_token(endpoint: &impl TokenEndpoint) -> AppResult<String> {
    let grant = Grant::ClientCredentials {
        scope: SERVICE_SCOPE.to_string(),
    };
    let token_set = match endpoint.exchange(&grant).await {
        Ok(token_set) => token_set,
        Err(err) => {
            tracing::error!("service token request failed: {}", err);
            return Err(AppError::new(CODE_AUTH_SERVICE_TOKEN_FAILED, err.message())
                .with_source(err));
        }
    };

    let access_token = token_set.access_token().ok_or_else(|| {
        AppError::new(
            CODE_AUTH_SERVICE_TOKEN_FAILED,
            "token response missing access_token",
        )
    })?;
    tracing::info!("service token acquired");
    Ok(access_token.to_string())
}
