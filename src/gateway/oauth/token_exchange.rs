//! Usage: OAuth token endpoint helpers (client_credentials, authorization_code, refresh_token grants).

use crate::shared::error::{AppError, AppResult, CODE_AUTH_TOKEN_EXCHANGE_FAILED};
use crate::shared::security::redact_body_snippet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;

/// Raw token endpoint response, kept verbatim so it can be persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSet(Map<String, Value>);

impl TokenSet {
    pub fn from_value(value: Value) -> AppResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err("SYSTEM_ERROR: token response is not a json object"
                .to_string()
                .into()),
        }
    }

    fn non_empty_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn access_token(&self) -> Option<&str> {
        self.non_empty_str("access_token")
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.non_empty_str("refresh_token")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    ClientCredentials {
        scope: String,
    },
    AuthorizationCode {
        code: String,
        redirect_uri: String,
        scope: String,
    },
    RefreshToken {
        refresh_token: String,
        redirect_uri: String,
    },
}

impl Grant {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::ClientCredentials { .. } => "client_credentials",
            Self::AuthorizationCode { .. } => "authorization_code",
            Self::RefreshToken { .. } => "refresh_token",
        }
    }

    fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![("grant_type", self.grant_type().to_string())];
        match self {
            Self::ClientCredentials { scope } => {
                form.push(("scope", scope.trim().to_string()));
            }
            Self::AuthorizationCode {
                code,
                redirect_uri,
                scope,
            } => {
                form.push(("code", code.trim().to_string()));
                form.push(("redirect_uri", redirect_uri.trim().to_string()));
                form.push(("scope", scope.trim().to_string()));
            }
            Self::RefreshToken {
                refresh_token,
                redirect_uri,
            } => {
                form.push(("refresh_token", refresh_token.trim().to_string()));
                form.push(("redirect_uri", redirect_uri.trim().to_string()));
            }
        }
        form
    }
}

/// Anything that can turn a grant into a token set.
pub trait TokenEndpoint {
    fn exchange(&self, grant: &Grant) -> impl Future<Output = AppResult<TokenSet>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    token_uri: String,
    client_id: String,
    client_secret: String,
}

impl HttpTokenEndpoint {
    pub fn new(
        client: reqwest::Client,
        token_uri: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_uri: token_uri.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange(&self, grant: &Grant) -> AppResult<TokenSet> {
        let mut form = grant.form_fields();
        form.push(("client_id", self.client_id.trim().to_string()));
        let secret = self.client_secret.trim();
        if !secret.is_empty() {
            form.push(("client_secret", secret.to_string()));
        }

        let response = self
            .client
            .post(self.token_uri.trim())
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                AppError::new(
                    CODE_AUTH_TOKEN_EXCHANGE_FAILED,
                    format!("{} request failed: {e}", grant.grant_type()),
                )
            })?;

        parse_token_response(response).await
    }
}

async fn parse_token_response(response: reqwest::Response) -> AppResult<TokenSet> {
    let status = response.status();
    let body = response.text().await.map_err(|e| {
        AppError::new(
            CODE_AUTH_TOKEN_EXCHANGE_FAILED,
            format!("token response read failed: {e}"),
        )
    })?;

    if !status.is_success() {
        let (error_code, error_message) = parse_oauth_error_details(&body);
        let mut msg = format!("token endpoint returned status={}", status.as_u16());
        if let Some(code) = error_code {
            msg.push_str(" code=");
            msg.push_str(code.as_str());
        }
        if let Some(detail) = error_message {
            msg.push_str(" message=");
            msg.push_str(detail.chars().take(240).collect::<String>().as_str());
        }
        msg.push_str(" body=");
        msg.push_str(redact_body_snippet(&body).as_str());
        return Err(AppError::new(CODE_AUTH_TOKEN_EXCHANGE_FAILED, msg));
    }

    let value: Value = serde_json::from_str(&body).map_err(|e| {
        AppError::new(
            CODE_AUTH_TOKEN_EXCHANGE_FAILED,
            format!("token response json invalid: {e}"),
        )
    })?;
    let token_set = TokenSet::from_value(value)?;
    if token_set.access_token().is_none() {
        return Err(AppError::new(
            CODE_AUTH_TOKEN_EXCHANGE_FAILED,
            "token response missing access_token",
        ));
    }
    Ok(token_set)
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) fn parse_oauth_error_details(body: &str) -> (Option<String>, Option<String>) {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return (None, None),
    };

    let mut code = non_empty_string(value.get("code"));
    let mut message = non_empty_string(value.get("error_description"));

    if let Some(error_value) = value.get("error") {
        if let Some(err_str) = error_value.as_str() {
            if code.is_none() {
                code = Some(err_str.trim().to_string());
            }
        } else if let Some(err_obj) = error_value.as_object() {
            if code.is_none() {
                code = non_empty_string(err_obj.get("code").or_else(|| err_obj.get("type")));
            }
            if message.is_none() {
                message = non_empty_string(err_obj.get("message"));
            }
        }
    }

    (code, message)
}
