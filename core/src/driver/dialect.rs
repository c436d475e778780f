use std::path::Path;

use crate::prelude::{ReduceError, ReduceResult};

/// Tool-family conventions: how file arguments are spelled on the command
/// line and how a finished run's captured output is judged.
pub trait ToolDialect {
    fn name(&self) -> &'static str;

    /// Command-line tokens binding `path` to the named logical stream.
    fn file_argument(&self, _stream: &str, path: &Path) -> Vec<String> {
        vec![path.display().to_string()]
    }

    /// Judge a finished run from its captured stdout and exit status. The
    /// driver has already checked for a nonzero exit; dialects add the
    /// tool-family rules that fire even on exit status zero.
    fn check_status(&self, stdout: &str, exit_status: Option<i32>) -> ReduceResult<()>;
}

/// Plain tools: positional file arguments, exit status is the whole story.
pub struct PlainDialect;

impl ToolDialect for PlainDialect {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn check_status(&self, _stdout: &str, _exit_status: Option<i32>) -> ReduceResult<()> {
        Ok(())
    }
}

/// CCP4-family tools: `HKLIN <path>`-style argument pairs, keyword lines on
/// stdin, and abort markers printed to stdout regardless of exit status.
pub struct CcpDialect;

impl ToolDialect for CcpDialect {
    fn name(&self) -> &'static str {
        "ccp4"
    }

    fn file_argument(&self, stream: &str, path: &Path) -> Vec<String> {
        vec![stream.to_uppercase(), path.display().to_string()]
    }

    fn check_status(&self, stdout: &str, _exit_status: Option<i32>) -> ReduceResult<()> {
        for line in stdout.lines() {
            let trimmed = line.trim();
            if trimmed.contains("CCP4 library signal")
                || trimmed.starts_with("FATAL ERROR")
                || trimmed.starts_with("Fatal error")
            {
                return Err(ReduceError::Execution(trimmed.to_string()));
            }
        }
        Ok(())
    }
}

/// XDS-family tools: all input arrives via an `.INP` file in the working
/// directory; stdout carries `!!! ERROR` markers and a version banner that
/// gates the run even on exit status zero.
pub struct XdsDialect {
    supported_versions: Vec<String>,
}

impl XdsDialect {
    pub fn new() -> Self {
        Self {
            supported_versions: ["Jun 30, 2023", "Mar 15, 2024", "Jan 10, 2025"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn with_supported_versions(versions: &[&str]) -> Self {
        Self {
            supported_versions: versions.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl Default for XdsDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolDialect for XdsDialect {
    fn name(&self) -> &'static str {
        "xds"
    }

    fn check_status(&self, stdout: &str, _exit_status: Option<i32>) -> ReduceResult<()> {
        for line in stdout.lines() {
            if line.contains("!!! ERROR") {
                return Err(ReduceError::Execution(line.trim().to_string()));
            }
            if line.contains("***** XDS *****")
                && !self
                    .supported_versions
                    .iter()
                    .any(|version| line.contains(version.as_str()))
            {
                return Err(ReduceError::Version(line.trim().to_string()));
            }
        }
        Ok(())
    }
}
