//! Usage: Graph-style REST client (directory, mail, drive, calendar) authenticated by bearer token.

use crate::shared::error::{AppError, AppResult};
use crate::shared::security::redact_body_snippet;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;

const CODE_HTTP_ERROR: &str = "HTTP_ERROR";
const MAX_DIRECTORY_PAGES: usize = 100;

/// Whose mailbox, drive or calendar a call acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mailbox {
    /// The signed-in user of a delegated token.
    Me,
    /// A directory user addressed by id or principal name.
    User(String),
}

impl Mailbox {
    fn push_segments(&self, segments: &mut url::PathSegmentsMut<'_>) {
        match self {
            Self::Me => {
                segments.push("me");
            }
            Self::User(id) => {
                segments.push("users").push(id);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DirectoryUser {
    pub id: String,
    #[serde(rename = "userPrincipalName", default)]
    pub principal_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutgoingMail {
    pub(crate) subject: String,
    pub(crate) body: String,
    pub(crate) recipient: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CalendarEvent {
    pub(crate) subject: String,
    pub(crate) start: DateTime<Utc>,
    pub(crate) end: DateTime<Utc>,
}

pub(crate) trait GraphApi {
    /// Full directory listing, following pagination links.
    fn list_users(&self) -> impl Future<Output = AppResult<Vec<DirectoryUser>>> + Send;

    fn send_mail(
        &self,
        sender: &Mailbox,
        mail: &OutgoingMail,
    ) -> impl Future<Output = AppResult<StatusCode>> + Send;

    /// Upload `content` to `path` (relative to the drive root).
    fn put_drive_content(
        &self,
        owner: &Mailbox,
        path: &str,
        content: Vec<u8>,
    ) -> impl Future<Output = AppResult<StatusCode>> + Send;

    fn create_event(
        &self,
        owner: &Mailbox,
        event: &CalendarEvent,
    ) -> impl Future<Output = AppResult<StatusCode>> + Send;
}

#[derive(Debug, Clone)]
pub(crate) struct GraphClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GraphClient {
    pub(crate) fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            access_token: access_token.into(),
        }
    }

    fn url_with(&self, build: impl FnOnce(&mut url::PathSegmentsMut<'_>)) -> AppResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| format!("CONFIG_INVALID: invalid graph base url: {e}"))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| "CONFIG_INVALID: graph base url cannot carry a path".to_string())?;
            segments.pop_if_empty();
            build(&mut segments);
        }
        Ok(url)
    }

    fn transport_error(action: &str, err: reqwest::Error) -> AppError {
        AppError::new(CODE_HTTP_ERROR, format!("{action} request failed: {err}"))
    }
}

pub(crate) fn event_payload(event: &CalendarEvent) -> Value {
    const GRAPH_DATE_TIME: &str = "%Y-%m-%dT%H:%M:%S";
    json!({
        "subject": event.subject,
        "start": {"dateTime": event.start.format(GRAPH_DATE_TIME).to_string(), "timeZone": "UTC"},
        "end": {"dateTime": event.end.format(GRAPH_DATE_TIME).to_string(), "timeZone": "UTC"},
    })
}

pub(crate) fn mail_payload(mail: &OutgoingMail) -> Value {
    json!({
        "message": {
            "subject": mail.subject,
            "body": {"contentType": "Text", "content": mail.body},
            "toRecipients": [{"emailAddress": {"address": mail.recipient}}],
        }
    })
}

#[derive(Debug, Deserialize)]
struct UsersPage {
    #[serde(default)]
    value: Vec<DirectoryUser>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

impl GraphApi for GraphClient {
    async fn list_users(&self) -> AppResult<Vec<DirectoryUser>> {
        let mut first = self.url_with(|s| {
            s.push("users");
        })?;
        first
            .query_pairs_mut()
            .append_pair("$select", "id,userPrincipalName");
        let mut next = Some(first.to_string());
        let mut users = Vec::new();
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_DIRECTORY_PAGES {
                tracing::warn!(pages = MAX_DIRECTORY_PAGES, "directory listing truncated");
                break;
            }
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.access_token)
                .send()
                .await
                .map_err(|e| Self::transport_error("list users", e))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| Self::transport_error("list users", e))?;
            if !status.is_success() {
                return Err(AppError::new(
                    CODE_HTTP_ERROR,
                    format!(
                        "list users returned status={} body={}",
                        status.as_u16(),
                        redact_body_snippet(&body)
                    ),
                ));
            }
            let page: UsersPage = serde_json::from_str(&body)
                .map_err(|e| format!("HTTP_ERROR: list users response json invalid: {e}"))?;
            users.extend(page.value);
            next = page.next_link;
        }

        Ok(users)
    }

    async fn send_mail(&self, sender: &Mailbox, mail: &OutgoingMail) -> AppResult<StatusCode> {
        let url = self.url_with(|s| {
            sender.push_segments(s);
            s.push("sendMail");
        })?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&mail_payload(mail))
            .send()
            .await
            .map_err(|e| Self::transport_error("send mail", e))?;
        Ok(response.status())
    }

    async fn put_drive_content(
        &self,
        owner: &Mailbox,
        path: &str,
        content: Vec<u8>,
    ) -> AppResult<StatusCode> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let Some((last, dirs)) = parts.split_last() else {
            return Err("SEC_INVALID_INPUT: drive path is empty".to_string().into());
        };
        let url = self.url_with(|s| {
            owner.push_segments(s);
            s.push("drive").push("root:");
            s.extend(dirs.iter().copied());
            s.push(&format!("{last}:")).push("content");
        })?;
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.access_token)
            .body(content)
            .send()
            .await
            .map_err(|e| Self::transport_error("drive upload", e))?;
        Ok(response.status())
    }

    async fn create_event(&self, owner: &Mailbox, event: &CalendarEvent) -> AppResult<StatusCode> {
        let url = self.url_with(|s| {
            owner.push_segments(s);
            s.push("events");
        })?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&event_payload(event))
            .send()
            .await
            .map_err(|e| Self::transport_error("create event", e))?;
        Ok(response.status())
    }
}
