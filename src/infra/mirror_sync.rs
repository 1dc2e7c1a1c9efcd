//! Usage: Storage mirror sync through the external `rclone` binary.

use crate::infra::config::MirrorConfig;
use crate::shared::error::AppResult;
use std::future::Future;
use std::process::Command;

/// Exit status of one mirror tool invocation. `None` when the process was
/// terminated by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MirrorExit {
    pub(crate) code: Option<i32>,
}

impl MirrorExit {
    pub(crate) fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub(crate) trait MirrorSync {
    fn invoke(&self, args: Vec<String>) -> impl Future<Output = AppResult<MirrorExit>> + Send;
}

#[derive(Debug, Clone)]
pub(crate) struct RcloneCli {
    binary: String,
}

impl RcloneCli {
    pub(crate) fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl MirrorSync for RcloneCli {
    async fn invoke(&self, args: Vec<String>) -> AppResult<MirrorExit> {
        let binary = self.binary.clone();
        crate::blocking::run("mirror_sync_invoke", move || {
            let status = Command::new(&binary)
                .args(&args)
                .status()
                .map_err(|e| format!("SYSTEM_ERROR: failed to start {binary}: {e}"))?;
            Ok::<_, String>(MirrorExit {
                code: status.code(),
            })
        })
        .await
    }
}

pub(crate) fn delete_args(config: &MirrorConfig) -> Vec<String> {
    vec![
        "delete".to_string(),
        format!("{}:{}", config.remote, config.clean_folder),
    ]
}

pub(crate) fn copy_args(config: &MirrorConfig) -> Vec<String> {
    vec![
        "copy".to_string(),
        config.local_upload.to_string_lossy().into_owned(),
        format!("{}:{}", config.remote, config.remote_upload),
        "--transfers=4".to_string(),
        "--checkers=8".to_string(),
        "--fast-list".to_string(),
    ]
}

/// Delete the clean folder, then copy the local upload folder when it exists.
/// Each invocation is attempted regardless of how the previous one went; one
/// result per invocation is returned and exit codes are not acted on.
pub(crate) async fn sync_mirror(
    mirror: &impl MirrorSync,
    config: &MirrorConfig,
) -> Vec<AppResult<MirrorExit>> {
    let mut results = Vec::with_capacity(2);

    tracing::info!(
        remote = %format!("{}:{}", config.remote, config.clean_folder),
        "mirror clean folder delete"
    );
    results.push(log_invocation("delete", mirror.invoke(delete_args(config)).await));

    if config.local_upload.exists() {
        tracing::info!(
            local = %config.local_upload.display(),
            remote = %format!("{}:{}", config.remote, config.remote_upload),
            "mirror upload"
        );
        results.push(log_invocation("copy", mirror.invoke(copy_args(config)).await));
    } else {
        tracing::warn!(
            local = %config.local_upload.display(),
            "local upload folder missing; copy skipped"
        );
    }

    results
}

fn log_invocation(command: &str, result: AppResult<MirrorExit>) -> AppResult<MirrorExit> {
    match &result {
        Ok(exit) => tracing::info!(command, code = ?exit.code, ok = exit.success(), "mirror command finished"),
        Err(err) => tracing::warn!(command, "mirror command could not start: {err}"),
    }
    result
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub(crate) struct RecordingMirror {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl RecordingMirror {
        pub(crate) fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    impl MirrorSync for RecordingMirror {
        async fn invoke(&self, args: Vec<String>) -> AppResult<MirrorExit> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(args);
            }
            Ok(MirrorExit { code: Some(1) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingMirror;
    use super::*;
    use std::path::PathBuf;

    fn mirror_config(local: PathBuf) -> MirrorConfig {
        MirrorConfig {
            binary: "rclone".to_string(),
            remote: "onedrive".to_string(),
            clean_folder: "KeepAliveClean".to_string(),
            local_upload: local,
            remote_upload: "backup_test".to_string(),
        }
    }

    #[test]
    fn argument_lists_match_rclone_usage() {
        let cfg = mirror_config(PathBuf::from("upload local"));
        assert_eq!(delete_args(&cfg), vec!["delete", "onedrive:KeepAliveClean"]);
        assert_eq!(
            copy_args(&cfg),
            vec![
                "copy",
                "upload local",
                "onedrive:backup_test",
                "--transfers=4",
                "--checkers=8",
                "--fast-list",
            ]
        );
    }

    #[tokio::test]
    async fn copy_runs_only_when_local_folder_exists() {
        let dir = tempfile::tempdir().expect("tempdir");

        let mirror = RecordingMirror::default();
        let results = sync_mirror(&mirror, &mirror_config(dir.path().join("missing"))).await;
        assert_eq!(results.len(), 1);
        assert_eq!(mirror.calls().len(), 1);
        assert_eq!(mirror.calls()[0][0], "delete");

        let mirror = RecordingMirror::default();
        sync_mirror(&mirror, &mirror_config(dir.path().to_path_buf())).await;
        let calls = mirror.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1][0], "copy");
    }

    #[tokio::test]
    async fn non_zero_exit_is_returned_not_raised() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mirror = RecordingMirror::default();
        let results = sync_mirror(&mirror, &mirror_config(dir.path().join("missing"))).await;
        let exit = results[0].as_ref().expect("exit");
        assert!(!exit.success());
    }

    #[tokio::test]
    async fn copy_is_attempted_after_delete_fails_to_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = mirror_config(dir.path().to_path_buf());
        cfg.binary = "definitely-not-a-real-mirror-binary-7f3a".to_string();
        let cli = RcloneCli::new(cfg.binary.as_str());

        let results = sync_mirror(&cli, &cfg).await;

        assert_eq!(results.len(), 2);
        for result in &results {
            let err = result.as_ref().expect_err("missing binary");
            assert_eq!(err.code(), "SYSTEM_ERROR");
        }
    }

    #[tokio::test]
    async fn missing_binary_surfaces_system_error() {
        let cli = RcloneCli::new("definitely-not-a-real-mirror-binary-7f3a");
        let err = cli
            .invoke(vec!["version".to_string()])
            .await
            .expect_err("missing binary");
        assert_eq!(err.code(), "SYSTEM_ERROR");
    }
}
