//! CI output variables (`SCAN_ID`, `scan_status`, `report_link`).
//!
//! GitHub Actions reads exported variables and step outputs from the files
//! named by `GITHUB_ENV` and `GITHUB_OUTPUT`. GitLab has no equivalent, so
//! values go to a dotenv file that a job can publish as
//! `artifacts:reports:dotenv`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::EnvSnapshot;
use crate::context::Provider;
use crate::error::{Result, ScanError};

pub const SCAN_ID: &str = "SCAN_ID";
pub const SCAN_STATUS: &str = "scan_status";
pub const REPORT_LINK: &str = "report_link";

/// Variable naming the dotenv file used on GitLab.
pub const DOTENV_PATH: &str = "DEDGE_DOTENV_PATH";

/// Where a run publishes its results for later CI steps.
pub trait OutputSink: Send + Sync {
    /// Make `name` visible as an environment variable to later steps.
    fn export_variable(&self, name: &str, value: &str) -> Result<()>;

    /// Set a step output.
    fn set_output(&self, name: &str, value: &str) -> Result<()>;
}

/// Select the output sink for `provider`.
pub fn output_sink(provider: Provider, env: &EnvSnapshot) -> Box<dyn OutputSink> {
    match provider {
        Provider::GitHub => Box::new(GitHubOutputs::from_env(env)),
        Provider::GitLab => Box::new(DotenvOutputs::new(env.get(DOTENV_PATH).map(PathBuf::from))),
    }
}

/// `GITHUB_ENV` / `GITHUB_OUTPUT` file commands.
#[derive(Debug, Clone, Default)]
pub struct GitHubOutputs {
    env_file: Option<PathBuf>,
    output_file: Option<PathBuf>,
}

impl GitHubOutputs {
    pub fn new(env_file: Option<PathBuf>, output_file: Option<PathBuf>) -> Self {
        Self {
            env_file,
            output_file,
        }
    }

    pub fn from_env(env: &EnvSnapshot) -> Self {
        Self::new(
            env.get("GITHUB_ENV").map(PathBuf::from),
            env.get("GITHUB_OUTPUT").map(PathBuf::from),
        )
    }
}

impl OutputSink for GitHubOutputs {
    fn export_variable(&self, name: &str, value: &str) -> Result<()> {
        match &self.env_file {
            Some(path) => append(path, name, &github_file_command(name, value)),
            None => {
                debug!(name = %name, "GITHUB_ENV not set, variable not exported");
                Ok(())
            }
        }
    }

    fn set_output(&self, name: &str, value: &str) -> Result<()> {
        match &self.output_file {
            Some(path) => append(path, name, &github_file_command(name, value)),
            None => {
                debug!(name = %name, "GITHUB_OUTPUT not set, output not written");
                Ok(())
            }
        }
    }
}

/// `KEY=value` lines in a dotenv file.
#[derive(Debug, Clone, Default)]
pub struct DotenvOutputs {
    path: Option<PathBuf>,
}

impl DotenvOutputs {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    fn write(&self, name: &str, value: &str) -> Result<()> {
        let Some(path) = &self.path else {
            debug!(name = %name, "{} not set, output not written", DOTENV_PATH);
            return Ok(());
        };
        if value.contains('\n') {
            return Err(ScanError::Output {
                name: name.to_string(),
                reason: "dotenv values must be single-line".to_string(),
            });
        }
        append(path, name, &format!("{name}={value}\n"))
    }
}

impl OutputSink for DotenvOutputs {
    fn export_variable(&self, name: &str, value: &str) -> Result<()> {
        self.write(name, value)
    }

    fn set_output(&self, name: &str, value: &str) -> Result<()> {
        self.write(name, value)
    }
}

/// `name=value`, or the heredoc form when the value spans lines.
fn github_file_command(name: &str, value: &str) -> String {
    if !value.contains('\n') {
        return format!("{name}={value}\n");
    }
    let mut delimiter = String::from("DEDGE_SCAN_EOF");
    while value.contains(&delimiter) {
        delimiter.push('_');
    }
    format!("{name}<<{delimiter}\n{value}\n{delimiter}\n")
}

fn append(path: &Path, name: &str, line: &str) -> Result<()> {
    let to_output_error = |e: std::io::Error| ScanError::Output {
        name: name.to_string(),
        reason: format!("{}: {e}", path.display()),
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_output_error)?;
    file.write_all(line.as_bytes()).map_err(to_output_error)
}
