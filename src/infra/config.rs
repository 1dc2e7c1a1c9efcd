//! Usage: Immutable run configuration sourced from the environment (and `.env`).

use crate::shared::error::{AppError, AppResult, CODE_CONFIG_INVALID};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8000/callback";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_NEWS_FEED_URL: &str = "https://vnexpress.net/rss/tin-moi-nhat.rss";
const DEFAULT_TOKEN_FILE: &str = "token.json";
const DEFAULT_IMAGE_FOLDER: &str = "images";
const DEFAULT_RCLONE_BIN: &str = "rclone";
const DEFAULT_RCLONE_REMOTE: &str = "onedrive";
const DEFAULT_RCLONE_CLEAN_FOLDER: &str = "KeepAliveClean";
const DEFAULT_LOCAL_UPLOAD: &str = "upload_local";
const DEFAULT_REMOTE_UPLOAD: &str = "backup_test";

/// Whether a recipient appearing both in the directory and in `EXTERNAL_EMAILS`
/// gets one mail or two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecipientPolicy {
    #[default]
    KeepDuplicates,
    Deduplicate,
}

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub binary: String,
    pub remote: String,
    pub clean_folder: String,
    pub local_upload: PathBuf,
    pub remote_upload: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub admin_email: Option<String>,
    pub user_email: Option<String>,
    pub redirect_uri: String,
    pub image_folder: PathBuf,
    pub mirror: MirrorConfig,
    pub external_emails: Vec<String>,
    pub recipient_policy: RecipientPolicy,
    pub token_file: PathBuf,
    pub authority_host: String,
    pub graph_base_url: String,
    pub news_feed_url: String,
    pub log_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        Self::from_env_get(|key| env::var(key).ok())
    }

    pub fn from_env_get(mut get: impl FnMut(&str) -> Option<String>) -> AppResult<Self> {
        let tenant_id = non_empty(get("TENANT_ID"));
        let client_id = non_empty(get("CLIENT_ID"));
        let client_secret = non_empty(get("CLIENT_SECRET"));
        let (Some(tenant_id), Some(client_id), Some(client_secret)) =
            (tenant_id.clone(), client_id.clone(), client_secret.clone())
        else {
            let missing: Vec<&str> = [
                ("TENANT_ID", tenant_id.is_none()),
                ("CLIENT_ID", client_id.is_none()),
                ("CLIENT_SECRET", client_secret.is_none()),
            ]
            .into_iter()
            .filter_map(|(key, absent)| absent.then_some(key))
            .collect();
            return Err(AppError::new(
                CODE_CONFIG_INVALID,
                format!("missing required settings: {}", missing.join(", ")),
            ));
        };

        let redirect_uri =
            non_empty(get("REDIRECT_URI")).unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
        reqwest::Url::parse(&redirect_uri).map_err(|e| {
            AppError::new(
                CODE_CONFIG_INVALID,
                format!("REDIRECT_URI is not a valid url: {e}"),
            )
        })?;

        let mirror = MirrorConfig {
            binary: non_empty(get("RCLONE_BIN")).unwrap_or_else(|| DEFAULT_RCLONE_BIN.to_string()),
            remote: non_empty(get("RCLONE_REMOTE"))
                .unwrap_or_else(|| DEFAULT_RCLONE_REMOTE.to_string()),
            clean_folder: non_empty(get("RCLONE_CLEAN_FOLDER"))
                .unwrap_or_else(|| DEFAULT_RCLONE_CLEAN_FOLDER.to_string()),
            local_upload: non_empty(get("LOCAL_UPLOAD"))
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_UPLOAD)),
            remote_upload: non_empty(get("REMOTE_UPLOAD"))
                .unwrap_or_else(|| DEFAULT_REMOTE_UPLOAD.to_string()),
        };

        let recipient_policy = match get("DEDUPE_RECIPIENTS").as_deref().and_then(parse_bool) {
            Some(true) => RecipientPolicy::Deduplicate,
            _ => RecipientPolicy::KeepDuplicates,
        };

        Ok(Self {
            tenant_id,
            client_id,
            client_secret,
            admin_email: non_empty(get("ADMIN_EMAIL")),
            user_email: non_empty(get("USER_EMAIL")),
            redirect_uri,
            image_folder: non_empty(get("IMAGE_FOLDER"))
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_FOLDER)),
            mirror,
            external_emails: parse_address_list(get("EXTERNAL_EMAILS").as_deref().unwrap_or("")),
            recipient_policy,
            token_file: non_empty(get("TOKEN_FILE"))
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE)),
            authority_host: trim_trailing_slash(
                non_empty(get("AUTHORITY_HOST"))
                    .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
            ),
            graph_base_url: trim_trailing_slash(
                non_empty(get("GRAPH_BASE_URL"))
                    .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string()),
            ),
            news_feed_url: non_empty(get("NEWS_FEED_URL"))
                .unwrap_or_else(|| DEFAULT_NEWS_FEED_URL.to_string()),
            log_file: non_empty(get("KEEPALIVE_LOG_FILE")).map(PathBuf::from),
        })
    }

    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host, self.tenant_id
        )
    }

    pub fn authorize_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/authorize",
            self.authority_host, self.tenant_id
        )
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn trim_trailing_slash(value: String) -> String {
    value.trim_end_matches('/').to_string()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Split a comma-separated address list, dropping blank entries.
pub(crate) fn parse_address_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}
