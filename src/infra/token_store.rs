//! Usage: File-resident credential store holding the last raw token response.
//!
//! Exactly one token set is kept; every save replaces the file wholesale.

use crate::gateway::oauth::token_exchange::TokenSet;
use crate::shared::error::{AppError, AppResult, CODE_TOKEN_STORE_CORRUPT};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, token_set: &TokenSet) -> AppResult<()> {
        let encoded = serde_json::to_vec_pretty(token_set)
            .map_err(|e| format!("SYSTEM_ERROR: failed to encode token set: {e}"))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                format!(
                    "IO_ERROR: failed to create token dir {}: {e}",
                    parent.display()
                )
            })?;
        }
        std::fs::write(&self.path, encoded).map_err(|e| {
            format!(
                "IO_ERROR: failed to write token file {}: {e}",
                self.path.display()
            )
        })?;
        tracing::info!(path = %self.path.display(), "token set saved");
        Ok(())
    }

    /// `Ok(None)` when nothing has been saved yet.
    pub fn load(&self) -> AppResult<Option<TokenSet>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(format!(
                    "IO_ERROR: failed to read token file {}: {err}",
                    self.path.display()
                )
                .into())
            }
        };
        let token_set: TokenSet = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::new(
                CODE_TOKEN_STORE_CORRUPT,
                format!("token file {} is not a json object: {e}", self.path.display()),
            )
        })?;
        Ok(Some(token_set))
    }
}
