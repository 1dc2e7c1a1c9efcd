use std::path::Path;

use tenant_keepalive_lib::AppConfig;

/// Config pointing every remote endpoint at `server_base` and every local
/// path inside `dir`. `extra` entries override the defaults.
#[allow(dead_code)]
pub fn test_config(server_base: &str, dir: &Path, extra: &[(&str, &str)]) -> AppConfig {
    let graph = format!("{server_base}/v1.0");
    let feed = format!("{server_base}/rss");
    let token_file = dir.join("token.json").to_string_lossy().into_owned();
    let images = dir.join("images").to_string_lossy().into_owned();
    let upload = dir.join("upload_local").to_string_lossy().into_owned();

    let mut pairs: Vec<(&str, &str)> = vec![
        ("TENANT_ID", "tenant-1"),
        ("CLIENT_ID", "client-1"),
        ("CLIENT_SECRET", "secret-1"),
        ("AUTHORITY_HOST", server_base),
        ("GRAPH_BASE_URL", graph.as_str()),
        ("NEWS_FEED_URL", feed.as_str()),
        ("TOKEN_FILE", token_file.as_str()),
        ("IMAGE_FOLDER", images.as_str()),
        ("LOCAL_UPLOAD", upload.as_str()),
        ("RCLONE_BIN", "tenant-keepalive-missing-mirror-binary"),
    ];
    pairs.extend_from_slice(extra);
    tenant_keepalive_lib::test_support::config_from_pairs(&pairs).expect("test config")
}

#[allow(dead_code)]
pub const TOKEN_PATH: &str = "/tenant-1/oauth2/v2.0/token";
