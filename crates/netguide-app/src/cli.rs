//! CLI argument definitions for the NET Guide application.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// NET Guide - a conversational screening assessment.
#[derive(Parser, Debug)]
#[command(name = "netguide", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Data directory for the SQLite ledger and exported reports.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Identified user. Without one the session is anonymous and cannot be
    /// resumed by a later run.
    #[arg(short = 'u', long = "user")]
    pub user: Option<String>,

    /// Who is taking the assessment (parent, teacher, adult, clinician).
    /// Sent with every intake chat turn.
    #[arg(short = 'r', long = "role")]
    pub role: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start or resume the assessment (default).
    Run,
    /// List recent sessions of the user.
    History {
        #[arg(short = 'n', long = "limit", default_value_t = 10)]
        limit: u32,
    },
    /// Export the report of a completed session as HTML.
    Report {
        /// Session to export. Defaults to the most recent completed one.
        session: Option<Uuid>,
        /// Output file. Defaults to `<data-dir>/reports/<session>.html`.
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Abandon the in-progress session so the next run starts over.
    Abandon,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > NETGUIDE_CONFIG env var > ~/.netguide/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("NETGUIDE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Data directory override, if any.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }

    /// Priority: --user flag > NETGUIDE_USER env var > anonymous.
    pub fn resolve_user(&self) -> Option<String> {
        self.user
            .clone()
            .or_else(|| std::env::var("NETGUIDE_USER").ok())
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
    }

    /// Priority: --role flag > NETGUIDE_ROLE env var > "guest".
    pub fn resolve_role(&self) -> String {
        self.role
            .clone()
            .or_else(|| std::env::var("NETGUIDE_ROLE").ok())
            .map(|r| r.trim().to_lowercase())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_ROLE.to_string())
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

const DEFAULT_ROLE: &str = "guest";

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        if let Some(home) = home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");
    home.ok().map(PathBuf::from)
}

fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".netguide").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_default_command_is_run() {
        let args = parse(&["netguide"]);
        assert_eq!(args.command(), Command::Run);
        assert!(args.resolve_data_dir().is_none());
    }

    #[test]
    fn test_config_flag_wins() {
        let args = parse(&["netguide", "--config", "/tmp/custom.toml"]);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/custom.toml"));
    }

    #[test]
    fn test_global_flags_and_subcommand() {
        let args = parse(&[
            "netguide",
            "-u",
            " parent@example.com ",
            "-d",
            "/var/lib/netguide",
            "history",
            "-n",
            "3",
        ]);
        assert_eq!(args.resolve_user().as_deref(), Some("parent@example.com"));
        assert_eq!(args.resolve_data_dir().as_deref(), Some("/var/lib/netguide"));
        assert_eq!(args.command(), Command::History { limit: 3 });
    }

    #[test]
    fn test_role_flag() {
        let args = parse(&["netguide", "--role", " Clinician "]);
        assert_eq!(args.resolve_role(), "clinician");
        let args = parse(&["netguide", "-r", "parent", "run"]);
        assert_eq!(args.resolve_role(), "parent");
        assert_eq!(args.command(), Command::Run);
    }

    #[test]
    fn test_report_arguments() {
        let id = Uuid::new_v4();
        let args = parse(&["netguide", "report", &id.to_string(), "-o", "out.html"]);
        assert_eq!(
            args.command(),
            Command::Report {
                session: Some(id),
                output: Some(PathBuf::from("out.html")),
            }
        );
        assert!(CliArgs::try_parse_from(["netguide", "report", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_home("relative"), PathBuf::from("relative"));
        if let Some(home) = home_dir() {
            assert_eq!(expand_home("~/.netguide/data"), home.join(".netguide/data"));
        }
    }
}
