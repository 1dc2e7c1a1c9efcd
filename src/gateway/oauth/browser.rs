//! Usage: Best-effort launch of the system browser for the interactive sign-in.

use crate::shared::error::AppResult;
use std::process::Command;

pub(crate) fn open_browser(url: &str) -> AppResult<()> {
    build_open_browser_command(url)
        .spawn()
        .map_err(|e| format!("SYSTEM_ERROR: failed to open browser: {e}"))?;
    Ok(())
}

#[cfg(target_os = "windows")]
fn build_open_browser_command(url: &str) -> Command {
    let mut cmd = Command::new("rundll32.exe");
    // `explorer <url>` may open File Explorer for some URL shapes.
    cmd.arg("url.dll,FileProtocolHandler").arg(url);
    cmd
}

#[cfg(target_os = "macos")]
fn build_open_browser_command(url: &str) -> Command {
    let mut cmd = Command::new("open");
    cmd.arg(url);
    cmd
}

#[cfg(all(unix, not(target_os = "macos")))]
fn build_open_browser_command(url: &str) -> Command {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(url);
    cmd
}
