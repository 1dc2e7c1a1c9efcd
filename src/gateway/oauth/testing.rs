//! Usage: In-memory token endpoint used by unit tests.

use crate::gateway::oauth::token_exchange::{Grant, TokenEndpoint, TokenSet};
use crate::shared::error::{AppError, AppResult, CODE_AUTH_TOKEN_EXCHANGE_FAILED};
use serde_json::Value;
use std::sync::Mutex;

pub(crate) struct FakeTokenEndpoint {
    outcome: Result<Value, String>,
    grants: Mutex<Vec<Grant>>,
}

impl FakeTokenEndpoint {
    pub(crate) fn succeeding(response: Value) -> Self {
        Self {
            outcome: Ok(response),
            grants: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            grants: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn grants(&self) -> Vec<Grant> {
        self.grants.lock().expect("grants lock").clone()
    }
}

impl TokenEndpoint for FakeTokenEndpoint {
    async fn exchange(&self, grant: &Grant) -> AppResult<TokenSet> {
        self.grants.lock().expect("grants lock").push(grant.clone());
        match &self.outcome {
            Ok(value) => TokenSet::from_value(value.clone()),
            Err(message) => Err(AppError::new(
                CODE_AUTH_TOKEN_EXCHANGE_FAILED,
                message.clone(),
            )),
        }
    }
}
