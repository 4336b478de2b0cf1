//! Error taxonomy for a render job.
//!
//! Only the external tool boundary (ffprobe/ffmpeg) produces hard failures in normal
//! operation. Those carry a [`ToolDiagnostics`] record so callers can show the exact
//! command, filter graph, layout and stderr tail without parsing strings.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub type ReelResult<T> = Result<T, ReelError>;

#[derive(Debug, Error)]
pub enum ReelError {
    /// Missing or invalid text, unusable probe result, bad paths. Rejected before heavy work.
    #[error("invalid input: {0}")]
    Input(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    ExternalTool(Box<ToolFailure>),

    /// Failure reported by a fetcher or translator implementation.
    #[error("{name} failed: {message}")]
    Collaborator { name: &'static str, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl ReelError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn collaborator(name: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            name,
            message: message.into(),
        }
    }

    pub fn is_external_tool_failure(&self) -> bool {
        matches!(self, Self::ExternalTool(_))
    }

    pub fn diagnostics(&self) -> Option<&ToolDiagnostics> {
        match self {
            Self::ExternalTool(failure) => Some(&failure.diagnostics),
            _ => None,
        }
    }
}

impl From<ToolFailure> for ReelError {
    fn from(failure: ToolFailure) -> Self {
        Self::ExternalTool(Box::new(failure))
    }
}

/// Stage of the assembly state machine a tool invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Probe,
    EncodeBackgroundReference,
    BuildFilterGraph,
    RunEncode,
}

impl PipelineStage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Probe => "probe",
            Self::EncodeBackgroundReference => "encode_background_reference",
            Self::BuildFilterGraph => "build_filter_graph",
            Self::RunEncode => "run_encode",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    NotFound,
    Spawn,
    NonZeroExit,
    Timeout,
    StdinWrite,
    BadOutput,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDiagnostics {
    pub stage: PipelineStage,
    pub program: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_graph: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub timeout_secs: u64,
    pub stderr_tail: String,
}

impl ToolDiagnostics {
    /// The command line as it would be typed in a shell, for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains([' ', ';', '[', ']']) {
                line.push('\'');
                line.push_str(arg);
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub message: String,
    pub diagnostics: ToolDiagnostics,
}

impl ToolFailure {
    pub fn timeout(diagnostics: ToolDiagnostics, timeout: Duration) -> Self {
        Self {
            kind: ToolFailureKind::Timeout,
            message: format!("timed out after {} seconds", timeout.as_secs()),
            diagnostics,
        }
    }
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed ({}): {}",
            self.diagnostics.stage, self.diagnostics.program, self.message
        )?;
        if let Some(code) = self.diagnostics.exit_code {
            write!(f, " [exit code {code}]")?;
        }
        if let Some(layout) = &self.diagnostics.layout {
            write!(f, " layout: {layout}")?;
        }
        if let Some(graph) = &self.diagnostics.filter_graph {
            write!(f, " filter_complex: {graph}")?;
        }
        if !self.diagnostics.stderr_tail.is_empty() {
            write!(f, " stderr_tail: {}", self.diagnostics.stderr_tail)?;
        }
        Ok(())
    }
}

impl std::error::Error for ToolFailure {}
