//! Usage: Command-line flags (identity mode, mirror skip, browser launch).

use crate::domain::tasks::RunMode;
use clap::Parser;

#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "tenant-keepalive",
    about = "Keeps a cloud tenant active by exercising mail, drive, calendar and storage mirror",
    version
)]
pub struct Cli {
    #[arg(
        long,
        conflicts_with = "user",
        help = "Run with the application (client-credentials) identity, including administrator-scoped tasks"
    )]
    pub app: bool,

    #[arg(
        long,
        help = "Run with the signed-in user identity; prompts for browser sign-in when no refresh token is stored"
    )]
    pub user: bool,

    #[arg(long = "skip-rclone", help = "Do not invoke the storage mirror tool")]
    pub skip_rclone: bool,

    #[arg(
        long = "no-browser",
        env = "KEEPALIVE_NO_BROWSER",
        help = "Only log the sign-in address instead of opening a browser"
    )]
    pub no_browser: bool,
}

impl Cli {
    /// `None` when neither identity flag was given.
    pub(crate) fn run_mode(&self) -> Option<RunMode> {
        match (self.app, self.user) {
            (true, _) => Some(RunMode::ServiceIdentity),
            (false, true) => Some(RunMode::DelegatedIdentity),
            (false, false) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("tenant-keepalive").chain(args.iter().copied()))
    }

    #[test]
    fn identity_flags_select_run_mode() {
        assert_eq!(parse(&["--app"]).expect("app").run_mode(), Some(RunMode::ServiceIdentity));
        assert_eq!(
            parse(&["--user", "--skip-rclone"]).expect("user").run_mode(),
            Some(RunMode::DelegatedIdentity)
        );
        assert_eq!(parse(&[]).expect("none").run_mode(), None);
    }

    #[test]
    fn identity_flags_are_mutually_exclusive() {
        let err = parse(&["--app", "--user"]).expect_err("conflict");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn skip_flag_parses() {
        let cli = parse(&["--app", "--skip-rclone"]).expect("cli");
        assert!(cli.skip_rclone);
        assert!(!cli.no_browser);
    }
}
