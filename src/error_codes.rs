use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ReelError;

pub const INPUT_ERROR: &str = "INPUT_ERROR";
pub const CONFIG_ERROR: &str = "CONFIG_ERROR";
pub const EXTERNAL_TOOL_FAILURE: &str = "EXTERNAL_TOOL_FAILURE";
pub const COLLABORATOR_FAILURE: &str = "COLLABORATOR_FAILURE";
pub const IO_ERROR: &str = "IO_ERROR";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    Usage,
    Runtime,
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Usage,
        }
    }

    pub fn runtime(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Runtime,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Process exit code: 2 for bad input or configuration, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self.kind {
            CodedErrorKind::Usage => 2,
            CodedErrorKind::Runtime => 1,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl From<&ReelError> for CodedError {
    fn from(error: &ReelError) -> Self {
        let message = error.to_string();
        match error {
            ReelError::Input(_) => Self::usage(INPUT_ERROR, message),
            ReelError::Config(_) => Self::usage(CONFIG_ERROR, message),
            ReelError::ExternalTool(failure) => Self::runtime(EXTERNAL_TOOL_FAILURE, message)
                .with_details(json!({
                    "kind": failure.kind,
                    "diagnostics": failure.diagnostics,
                    "command": failure.diagnostics.command_line(),
                })),
            ReelError::Collaborator { name, .. } => {
                Self::runtime(COLLABORATOR_FAILURE, message).with_details(json!({ "collaborator": name }))
            }
            ReelError::Io(_) | ReelError::Image(_) => Self::runtime(IO_ERROR, message),
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

/// Classify any CLI error: an explicit `CodedError` wins, then the first `ReelError` in
/// the chain, otherwise `INTERNAL_ERROR` with the full context chain as the message.
pub fn classify(error: &Error) -> CodedError {
    if let Some(coded) = find_coded_error(error) {
        return coded.clone();
    }
    if let Some(reel) = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ReelError>())
    {
        let mut coded = CodedError::from(reel);
        coded.message = format!("{error:#}");
        return coded;
    }
    CodedError::runtime(INTERNAL_ERROR, format!("{error:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineStage, ToolDiagnostics, ToolFailure, ToolFailureKind};
    use anyhow::Context;

    #[test]
    fn tool_failures_carry_diagnostics_in_the_envelope() {
        let failure = ToolFailure {
            kind: ToolFailureKind::Timeout,
            message: "timed out after 300 seconds".to_owned(),
            diagnostics: ToolDiagnostics {
                stage: PipelineStage::RunEncode,
                program: "ffmpeg".to_owned(),
                args: vec!["-i".to_owned(), "in.mp4".to_owned()],
                filter_graph: Some("[0:v]scale=2:2[out]".to_owned()),
                layout: None,
                exit_code: None,
                timed_out: true,
                timeout_secs: 300,
                stderr_tail: String::new(),
            },
        };
        let error = anyhow::Error::new(ReelError::from(failure)).context("render failed");
        let coded = classify(&error);
        assert_eq!(coded.code, EXTERNAL_TOOL_FAILURE);
        assert_eq!(coded.exit_code(), 1);

        let envelope = serde_json::to_value(coded.envelope()).unwrap();
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["details"]["kind"], "timeout");
        assert_eq!(envelope["error"]["details"]["diagnostics"]["stage"], "run_encode");
        assert_eq!(envelope["error"]["details"]["diagnostics"]["timed_out"], true);
        assert_eq!(envelope["error"]["details"]["command"], "ffmpeg -i in.mp4");
    }

    #[test]
    fn input_errors_are_usage_errors() {
        let result: anyhow::Result<()> =
            Err(ReelError::input("post text is empty")).context("building card");
        let coded = classify(&result.unwrap_err());
        assert_eq!(coded.code, INPUT_ERROR);
        assert_eq!(coded.exit_code(), 2);
        assert!(coded.message.contains("post text is empty"));
    }

    #[test]
    fn unknown_errors_are_internal() {
        let coded = classify(&anyhow::anyhow!("boom"));
        assert_eq!(coded.code, INTERNAL_ERROR);
        assert!(coded.envelope().error.details.is_none());
    }
}
