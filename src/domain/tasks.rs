//! Usage: Fixed keep-alive task batch run with one access token (ping, heartbeat, mirror, admin-scoped steps).

use crate::domain::digest::{compose_broadcast_body, placeholder_sentence, NewsSource, HEADLINE_LIMIT};
use crate::domain::directory::{compute_recipients, find_admin};
use crate::domain::graph::{CalendarEvent, DirectoryUser, GraphApi, Mailbox, OutgoingMail};
use crate::domain::images::{sample_images, scan_image_folder, ImageScan, MAX_IMAGES_PER_RUN};
use crate::infra::config::AppConfig;
use crate::infra::mirror_sync::{sync_mirror, MirrorSync};
use crate::shared::error::AppResult;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use reqwest::StatusCode;
use std::path::PathBuf;

const PING_SUBJECT: &str = "Keep-alive ping";
const PING_BODY: &str = "Automated keep-alive test mail";
const HEARTBEAT_FILE: &str = "PingAlive.txt";
const HEARTBEAT_CONTENT: &[u8] = b"KeepAlive";
const DAILY_EVENT_SUBJECT: &str = "Daily Auto Event";
const DAILY_EVENT_START_HOUR: i64 = 9;
const DAILY_EVENT_MINUTES: i64 = 30;
const BROADCAST_SUBJECT: &str = "News digest & assistant note";
const IMAGE_DRIVE_FOLDER: &str = "E5Auto";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode {
    /// Application credential; also runs the administrator-scoped steps.
    ServiceIdentity,
    /// Signed-in user credential; calls address `/me`.
    DelegatedIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskStep {
    PingMail,
    HeartbeatUpload,
    MirrorSync,
    DirectoryListing,
    DailyEvent,
    BroadcastMail,
    ImageUpload,
}

impl TaskStep {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::PingMail => "ping_mail",
            Self::HeartbeatUpload => "heartbeat_upload",
            Self::MirrorSync => "mirror_sync",
            Self::DirectoryListing => "directory_listing",
            Self::DailyEvent => "daily_event",
            Self::BroadcastMail => "broadcast_mail",
            Self::ImageUpload => "image_upload",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StepStatus {
    Succeeded,
    Failed(String),
    Skipped(String),
    /// Ran, outcome intentionally not inspected.
    Unchecked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StepRecord {
    pub(crate) step: TaskStep,
    pub(crate) status: StepStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TaskReport {
    records: Vec<StepRecord>,
}

impl TaskReport {
    fn record(&mut self, step: TaskStep, status: StepStatus) {
        self.records.push(StepRecord { step, status });
    }

    pub(crate) fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub(crate) fn count_of(&self, step: TaskStep) -> usize {
        self.records.iter().filter(|r| r.step == step).count()
    }

    fn count_where(&self, pred: impl Fn(&StepStatus) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.status)).count()
    }

    pub(crate) fn succeeded(&self) -> usize {
        self.count_where(|s| matches!(s, StepStatus::Succeeded | StepStatus::Unchecked))
    }

    pub(crate) fn failed(&self) -> usize {
        self.count_where(|s| matches!(s, StepStatus::Failed(_)))
    }

    pub(crate) fn skipped(&self) -> usize {
        self.count_where(|s| matches!(s, StepStatus::Skipped(_)))
    }

    pub(crate) fn summary(&self) -> String {
        format!(
            "all tasks done: ok={} failed={} skipped={}",
            self.succeeded(),
            self.failed(),
            self.skipped()
        )
    }
}

/// The 30-minute event created on the administrator calendar for `today`.
pub(crate) fn daily_event(today: NaiveDate) -> CalendarEvent {
    let midnight = Utc.from_utc_datetime(&today.and_time(NaiveTime::MIN));
    let start = midnight + chrono::Duration::hours(DAILY_EVENT_START_HOUR);
    CalendarEvent {
        subject: DAILY_EVENT_SUBJECT.to_string(),
        start,
        end: start + chrono::Duration::minutes(DAILY_EVENT_MINUTES),
    }
}

fn status_of(step: TaskStep, subject: &str, result: AppResult<StatusCode>) -> StepStatus {
    match result {
        Ok(status) if status.is_success() => {
            tracing::info!(step = step.as_str(), subject, status = status.as_u16(), "step ok");
            StepStatus::Succeeded
        }
        Ok(status) => {
            tracing::warn!(step = step.as_str(), subject, status = status.as_u16(), "step rejected");
            StepStatus::Failed(format!("status={}", status.as_u16()))
        }
        Err(err) => {
            tracing::warn!(step = step.as_str(), subject, "step failed: {err}");
            StepStatus::Failed(err.to_string())
        }
    }
}

async fn read_image(path: PathBuf) -> AppResult<Vec<u8>> {
    crate::blocking::run("task_read_image", move || {
        std::fs::read(&path)
            .map_err(|e| format!("IO_ERROR: failed to read image {}: {e}", path.display()))
    })
    .await
}

pub(crate) struct TaskRunner<'a, G, M, N> {
    config: &'a AppConfig,
    graph: &'a G,
    mirror: &'a M,
    news: &'a N,
}

impl<'a, G, M, N> TaskRunner<'a, G, M, N>
where
    G: GraphApi,
    M: MirrorSync,
    N: NewsSource,
{
    pub(crate) fn new(config: &'a AppConfig, graph: &'a G, mirror: &'a M, news: &'a N) -> Self {
        Self {
            config,
            graph,
            mirror,
            news,
        }
    }

    /// Runs every step in order. Step failures are logged and recorded; they
    /// never stop later steps.
    pub(crate) async fn run(&self, mode: RunMode, skip_mirror: bool) -> TaskReport {
        let mut report = TaskReport::default();

        self.ping_mail(mode, &mut report).await;
        self.heartbeat(mode, &mut report).await;
        self.mirror_sync(skip_mirror, &mut report).await;

        if mode == RunMode::ServiceIdentity {
            self.admin_scoped(&mut report).await;
        }

        tracing::info!(
            ok = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            broadcast_mails = report.count_of(TaskStep::BroadcastMail),
            image_uploads = report.count_of(TaskStep::ImageUpload),
            "all tasks done"
        );
        report
    }

    fn owner(&self, mode: RunMode, user_email: &str) -> Mailbox {
        match mode {
            RunMode::DelegatedIdentity => Mailbox::Me,
            RunMode::ServiceIdentity => Mailbox::User(user_email.to_string()),
        }
    }

    async fn ping_mail(&self, mode: RunMode, report: &mut TaskReport) {
        let Some(user_email) = self.config.user_email.as_deref() else {
            tracing::warn!("USER_EMAIL not configured; ping mail skipped");
            report.record(
                TaskStep::PingMail,
                StepStatus::Skipped("USER_EMAIL not configured".to_string()),
            );
            return;
        };
        let mail = OutgoingMail {
            subject: PING_SUBJECT.to_string(),
            body: PING_BODY.to_string(),
            recipient: user_email.to_string(),
        };
        let result = self.graph.send_mail(&self.owner(mode, user_email), &mail).await;
        report.record(TaskStep::PingMail, status_of(TaskStep::PingMail, user_email, result));
    }

    async fn heartbeat(&self, mode: RunMode, report: &mut TaskReport) {
        let Some(user_email) = self.config.user_email.as_deref() else {
            tracing::warn!("USER_EMAIL not configured; heartbeat upload skipped");
            report.record(
                TaskStep::HeartbeatUpload,
                StepStatus::Skipped("USER_EMAIL not configured".to_string()),
            );
            return;
        };
        let result = self
            .graph
            .put_drive_content(
                &self.owner(mode, user_email),
                HEARTBEAT_FILE,
                HEARTBEAT_CONTENT.to_vec(),
            )
            .await;
        report.record(
            TaskStep::HeartbeatUpload,
            status_of(TaskStep::HeartbeatUpload, HEARTBEAT_FILE, result),
        );
    }

    async fn mirror_sync(&self, skip: bool, report: &mut TaskReport) {
        if skip {
            tracing::info!("mirror sync skipped (--skip-rclone)");
            report.record(
                TaskStep::MirrorSync,
                StepStatus::Skipped("--skip-rclone".to_string()),
            );
            return;
        }
        // Exit codes are logged inside sync_mirror and not acted on.
        let results = sync_mirror(self.mirror, &self.config.mirror).await;
        match results.into_iter().find_map(Result::err) {
            None => report.record(TaskStep::MirrorSync, StepStatus::Unchecked),
            Some(err) => {
                report.record(TaskStep::MirrorSync, StepStatus::Failed(err.to_string()));
            }
        }
    }

    async fn admin_scoped(&self, report: &mut TaskReport) {
        let users = match self.graph.list_users().await {
            Ok(users) => {
                tracing::info!(count = users.len(), "directory listed");
                report.record(TaskStep::DirectoryListing, StepStatus::Succeeded);
                users
            }
            Err(err) => {
                tracing::warn!("directory listing failed: {err}");
                report.record(TaskStep::DirectoryListing, StepStatus::Failed(err.to_string()));
                Vec::new()
            }
        };

        let admin_email = self.config.admin_email.as_deref().unwrap_or_default();
        let Some(admin) = find_admin(&users, admin_email) else {
            tracing::info!(
                users = users.len(),
                "administrator not in directory; admin-scoped steps skipped"
            );
            return;
        };

        self.daily_event(admin, report).await;
        self.broadcast(admin, &users, report).await;
        self.upload_images(admin, report).await;
    }

    async fn daily_event(&self, admin: &DirectoryUser, report: &mut TaskReport) {
        let event = daily_event(Utc::now().date_naive());
        let result = self
            .graph
            .create_event(&Mailbox::User(admin.id.clone()), &event)
            .await;
        report.record(
            TaskStep::DailyEvent,
            status_of(TaskStep::DailyEvent, &event.subject, result),
        );
    }

    async fn broadcast(&self, admin: &DirectoryUser, users: &[DirectoryUser], report: &mut TaskReport) {
        let recipients = compute_recipients(
            users,
            &admin.principal_name,
            &self.config.external_emails,
            self.config.recipient_policy,
        );
        let sender = Mailbox::User(admin.principal_name.clone());

        for recipient in recipients {
            let headlines = match self.news.headlines(HEADLINE_LIMIT).await {
                Ok(headlines) => headlines,
                Err(err) => {
                    tracing::warn!("news feed unavailable: {err}");
                    Vec::new()
                }
            };
            let mail = OutgoingMail {
                subject: BROADCAST_SUBJECT.to_string(),
                body: compose_broadcast_body(&headlines, placeholder_sentence()),
                recipient,
            };
            let result = self.graph.send_mail(&sender, &mail).await;
            report.record(
                TaskStep::BroadcastMail,
                status_of(TaskStep::BroadcastMail, &mail.recipient, result),
            );
        }
    }

    async fn upload_images(&self, admin: &DirectoryUser, report: &mut TaskReport) {
        let folder = self.config.image_folder.clone();
        let scan = crate::blocking::run("task_scan_images", move || scan_image_folder(&folder)).await;
        let images = match scan {
            Ok(ImageScan::Found(images)) => images,
            Ok(ImageScan::FolderMissing) => {
                tracing::warn!(folder = %self.config.image_folder.display(), "image folder missing");
                report.record(
                    TaskStep::ImageUpload,
                    StepStatus::Skipped("image folder missing".to_string()),
                );
                return;
            }
            Ok(ImageScan::NoImages) => {
                tracing::warn!(folder = %self.config.image_folder.display(), "no images found");
                report.record(
                    TaskStep::ImageUpload,
                    StepStatus::Skipped("no images".to_string()),
                );
                return;
            }
            Err(err) => {
                tracing::warn!("image scan failed: {err}");
                report.record(TaskStep::ImageUpload, StepStatus::Failed(err.to_string()));
                return;
            }
        };

        let owner = Mailbox::User(admin.id.clone());
        for path in sample_images(&images, MAX_IMAGES_PER_RUN) {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let result = match read_image(path).await {
                Ok(bytes) => {
                    self.graph
                        .put_drive_content(&owner, &format!("{IMAGE_DRIVE_FOLDER}/{file_name}"), bytes)
                        .await
                }
                Err(err) => Err(err),
            };
            report.record(
                TaskStep::ImageUpload,
                status_of(TaskStep::ImageUpload, &file_name, result),
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::shared::error::AppError;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum GraphCall {
        ListUsers,
        SendMail { sender: Mailbox, recipient: String },
        PutDrive { owner: Mailbox, path: String },
        CreateEvent { owner: Mailbox },
    }

    pub(crate) struct FakeGraph {
        users: Result<Vec<DirectoryUser>, String>,
        status: StatusCode,
        calls: Mutex<Vec<GraphCall>>,
    }

    impl FakeGraph {
        pub(crate) fn with_users(users: Vec<DirectoryUser>) -> Self {
            Self {
                users: Ok(users),
                status: StatusCode::ACCEPTED,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing_directory(message: &str) -> Self {
            Self {
                users: Err(message.to_string()),
                status: StatusCode::ACCEPTED,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn responding(mut self, status: StatusCode) -> Self {
            self.status = status;
            self
        }

        pub(crate) fn calls(&self) -> Vec<GraphCall> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        fn push(&self, call: GraphCall) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
        }
    }

    impl GraphApi for FakeGraph {
        async fn list_users(&self) -> AppResult<Vec<DirectoryUser>> {
            self.push(GraphCall::ListUsers);
            self.users
                .clone()
                .map_err(|message| AppError::new("HTTP_ERROR", message))
        }

        async fn send_mail(&self, sender: &Mailbox, mail: &OutgoingMail) -> AppResult<StatusCode> {
            self.push(GraphCall::SendMail {
                sender: sender.clone(),
                recipient: mail.recipient.clone(),
            });
            Ok(self.status)
        }

        async fn put_drive_content(
            &self,
            owner: &Mailbox,
            path: &str,
            _content: Vec<u8>,
        ) -> AppResult<StatusCode> {
            self.push(GraphCall::PutDrive {
                owner: owner.clone(),
                path: path.to_string(),
            });
            Ok(self.status)
        }

        async fn create_event(&self, owner: &Mailbox, _event: &CalendarEvent) -> AppResult<StatusCode> {
            self.push(GraphCall::CreateEvent {
                owner: owner.clone(),
            });
            Ok(self.status)
        }
    }

    pub(crate) struct FixedNews(pub(crate) Result<Vec<String>, String>);

    impl NewsSource for FixedNews {
        async fn headlines(&self, limit: usize) -> AppResult<Vec<String>> {
            match &self.0 {
                Ok(titles) => Ok(titles.iter().take(limit).cloned().collect()),
                Err(message) => Err(AppError::new("HTTP_ERROR", message.clone())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeGraph, FixedNews, GraphCall};
    use super::*;
    use crate::infra::config::tests::config_from_pairs;
    use crate::infra::mirror_sync::testing::RecordingMirror;

    fn user(id: &str, upn: &str) -> DirectoryUser {
        DirectoryUser {
            id: id.to_string(),
            principal_name: upn.to_string(),
        }
    }

    fn config(dir: &tempfile::TempDir, extra: &[(&str, &str)]) -> AppConfig {
        let images = dir.path().join("images");
        let upload = dir.path().join("upload_local");
        let images = images.to_string_lossy().into_owned();
        let upload = upload.to_string_lossy().into_owned();
        let mut pairs: Vec<(&str, &str)> = vec![
            ("TENANT_ID", "tenant-1"),
            ("CLIENT_ID", "client-1"),
            ("CLIENT_SECRET", "secret-1"),
            ("USER_EMAIL", "me@contoso.com"),
            ("ADMIN_EMAIL", "admin@contoso.com"),
            ("IMAGE_FOLDER", images.as_str()),
            ("LOCAL_UPLOAD", upload.as_str()),
        ];
        pairs.extend_from_slice(extra);
        config_from_pairs(&pairs).expect("config")
    }

    fn news() -> FixedNews {
        FixedNews(Ok(vec!["headline".to_string()]))
    }

    fn count(calls: &[GraphCall], pred: impl Fn(&GraphCall) -> bool) -> usize {
        calls.iter().filter(|c| pred(c)).count()
    }

    #[test]
    fn daily_event_is_thirty_minutes_from_nine_utc() {
        let day = NaiveDate::from_ymd_opt(2026, 10, 19).expect("date");
        let event = daily_event(day);
        assert_eq!(event.start.to_rfc3339(), "2026-10-19T09:00:00+00:00");
        assert_eq!(event.end.to_rfc3339(), "2026-10-19T09:30:00+00:00");
        assert_eq!(event.subject, "Daily Auto Event");
    }

    #[tokio::test]
    async fn service_mode_without_admin_runs_only_unconditional_steps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config(&dir, &[]);
        let graph = FakeGraph::with_users(vec![user("2", "u1@contoso.com")]);
        let mirror = RecordingMirror::default();

        let report = TaskRunner::new(&cfg, &graph, &mirror, &news())
            .run(RunMode::ServiceIdentity, false)
            .await;

        assert_eq!(report.count_of(TaskStep::PingMail), 1);
        assert_eq!(report.count_of(TaskStep::HeartbeatUpload), 1);
        assert_eq!(report.count_of(TaskStep::MirrorSync), 1);
        assert_eq!(report.count_of(TaskStep::DailyEvent), 0);
        assert_eq!(report.count_of(TaskStep::BroadcastMail), 0);
        assert_eq!(report.count_of(TaskStep::ImageUpload), 0);

        let calls = graph.calls();
        assert_eq!(
            calls,
            vec![
                GraphCall::SendMail {
                    sender: Mailbox::User("me@contoso.com".to_string()),
                    recipient: "me@contoso.com".to_string(),
                },
                GraphCall::PutDrive {
                    owner: Mailbox::User("me@contoso.com".to_string()),
                    path: "PingAlive.txt".to_string(),
                },
                GraphCall::ListUsers,
            ]
        );
        assert_eq!(mirror.calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_directory_listing_is_treated_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config(&dir, &[]);
        let graph = FakeGraph::failing_directory("status=403");
        let mirror = RecordingMirror::default();

        let report = TaskRunner::new(&cfg, &graph, &mirror, &news())
            .run(RunMode::ServiceIdentity, true)
            .await;

        assert_eq!(report.count_of(TaskStep::DirectoryListing), 1);
        assert_eq!(report.count_of(TaskStep::DailyEvent), 0);
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test]
    async fn delegated_mode_addresses_me_and_skips_admin_steps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config(&dir, &[]);
        let graph = FakeGraph::with_users(vec![user("1", "admin@contoso.com")]);
        let mirror = RecordingMirror::default();

        TaskRunner::new(&cfg, &graph, &mirror, &news())
            .run(RunMode::DelegatedIdentity, true)
            .await;

        let calls = graph.calls();
        assert_eq!(calls.len(), 2);
        assert!(!calls.contains(&GraphCall::ListUsers));
        assert_eq!(
            calls[1],
            GraphCall::PutDrive {
                owner: Mailbox::Me,
                path: "PingAlive.txt".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn skip_flag_never_invokes_mirror_tool() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("upload_local")).expect("mkdir");
        let cfg = config(&dir, &[]);
        let graph = FakeGraph::with_users(Vec::new());
        let mirror = RecordingMirror::default();

        let report = TaskRunner::new(&cfg, &graph, &mirror, &news())
            .run(RunMode::DelegatedIdentity, true)
            .await;

        assert!(mirror.calls().is_empty());
        assert_eq!(
            report
                .records()
                .iter()
                .find(|r| r.step == TaskStep::MirrorSync)
                .map(|r| r.status.clone()),
            Some(StepStatus::Skipped("--skip-rclone".to_string()))
        );
    }

    #[tokio::test]
    async fn missing_user_email_skips_ping_steps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config(&dir, &[("USER_EMAIL", "")]);
        let graph = FakeGraph::with_users(Vec::new());
        let mirror = RecordingMirror::default();

        let report = TaskRunner::new(&cfg, &graph, &mirror, &news())
            .run(RunMode::DelegatedIdentity, true)
            .await;

        assert!(graph.calls().is_empty());
        assert_eq!(report.skipped(), 3);
    }

    #[tokio::test]
    async fn admin_present_runs_event_broadcast_and_single_image_upload() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("images")).expect("mkdir");
        std::fs::write(dir.path().join("images").join("cat.png"), b"png").expect("write");
        let cfg = config(&dir, &[("EXTERNAL_EMAILS", "ext@x.com")]);
        let graph = FakeGraph::with_users(vec![
            user("1", "Admin@Contoso.com"),
            user("2", "u1@contoso.com"),
            user("3", "u2@contoso.com"),
        ]);
        let mirror = RecordingMirror::default();

        let report = TaskRunner::new(&cfg, &graph, &mirror, &FixedNews(Err("down".to_string())))
            .run(RunMode::ServiceIdentity, true)
            .await;

        assert_eq!(report.count_of(TaskStep::DailyEvent), 1);
        assert_eq!(report.count_of(TaskStep::BroadcastMail), 3);
        assert_eq!(report.count_of(TaskStep::ImageUpload), 1);

        let calls = graph.calls();
        assert!(calls.contains(&GraphCall::CreateEvent {
            owner: Mailbox::User("1".to_string()),
        }));
        let broadcast: Vec<String> = calls
            .iter()
            .filter_map(|c| match c {
                GraphCall::SendMail { sender, recipient }
                    if *sender == Mailbox::User("Admin@Contoso.com".to_string()) =>
                {
                    Some(recipient.clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(broadcast, vec!["u1@contoso.com", "u2@contoso.com", "ext@x.com"]);
        assert_eq!(
            count(&calls, |c| matches!(
                c,
                GraphCall::PutDrive { path, .. } if path == "E5Auto/cat.png"
            )),
            1
        );
    }

    #[tokio::test]
    async fn rejected_statuses_are_recorded_and_do_not_stop_later_steps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = config(&dir, &[]);
        let graph =
            FakeGraph::with_users(vec![user("1", "admin@contoso.com")]).responding(StatusCode::FORBIDDEN);
        let mirror = RecordingMirror::default();

        let report = TaskRunner::new(&cfg, &graph, &mirror, &news())
            .run(RunMode::ServiceIdentity, true)
            .await;

        assert_eq!(report.count_of(TaskStep::DailyEvent), 1);
        assert_eq!(report.count_of(TaskStep::ImageUpload), 1);
        assert!(report.failed() >= 3);
        assert!(report.summary().starts_with("all tasks done:"));
    }
}
