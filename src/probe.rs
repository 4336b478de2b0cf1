use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::encoding::{run_tool, ToolCommand, Toolchain};
use crate::error::{
    PipelineStage, ReelError, ReelResult, ToolDiagnostics, ToolFailure, ToolFailureKind,
};

/// Facts about the source clip needed by layout and encode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceVideo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
    pub has_audio: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

pub fn ffprobe_args(path: &Path) -> Vec<String> {
    vec![
        "-v".to_owned(),
        "error".to_owned(),
        "-show_streams".to_owned(),
        "-show_format".to_owned(),
        "-print_format".to_owned(),
        "json".to_owned(),
        path.to_string_lossy().into_owned(),
    ]
}

/// Probe `path` with ffprobe. `duration_hint` is used only when ffprobe reports no
/// duration at all.
pub fn probe_source(
    toolchain: &Toolchain,
    path: &Path,
    duration_hint: Option<f64>,
    timeout: Duration,
) -> ReelResult<SourceVideo> {
    if !path.is_file() {
        return Err(ReelError::input(format!(
            "source video not found: {}",
            path.display()
        )));
    }

    let command = ToolCommand {
        stage: PipelineStage::Probe,
        program: &toolchain.ffprobe,
        args: ffprobe_args(path),
        timeout,
        stdin: None,
        filter_graph: None,
        layout: None,
    };
    let output = run_tool(&command)?;
    let source = parse_probe_output(&output.stdout, path, duration_hint).map_err(|error| {
        // Unparsable JSON is ffprobe's fault, everything else is about the input file.
        match error {
            ProbeParseError::Json(message) => ReelError::from(ToolFailure {
                kind: ToolFailureKind::BadOutput,
                message,
                diagnostics: ToolDiagnostics {
                    stage: PipelineStage::Probe,
                    program: toolchain.ffprobe.display().to_string(),
                    args: command.args.clone(),
                    filter_graph: None,
                    layout: None,
                    exit_code: Some(0),
                    timed_out: false,
                    timeout_secs: timeout.as_secs(),
                    stderr_tail: output.stderr_tail.clone(),
                },
            }),
            ProbeParseError::Input(message) => ReelError::input(message),
        }
    })?;

    info!(
        source = %path.display(),
        width = source.width,
        height = source.height,
        duration = source.duration_seconds,
        has_audio = source.has_audio,
        fps = ?source.fps,
        "probed source video"
    );
    Ok(source)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeParseError {
    Json(String),
    Input(String),
}

pub fn parse_probe_output(
    stdout: &[u8],
    path: &Path,
    duration_hint: Option<f64>,
) -> Result<SourceVideo, ProbeParseError> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout).map_err(|error| {
        ProbeParseError::Json(format!(
            "failed to parse ffprobe JSON for {}: {error}",
            path.display()
        ))
    })?;

    let stream = parsed
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| {
            ProbeParseError::Input(format!(
                "ffprobe did not report a video stream for {}",
                path.display()
            ))
        })?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => (width, height),
        _ => {
            return Err(ProbeParseError::Input(format!(
                "video stream of {} has no usable dimensions",
                path.display()
            )))
        }
    };

    let duration_seconds = stream
        .duration
        .as_deref()
        .and_then(parse_ffprobe_float)
        .or_else(|| {
            parsed
                .format
                .as_ref()
                .and_then(|format| format.duration.as_deref())
                .and_then(parse_ffprobe_float)
        })
        .or(duration_hint.filter(|hint| hint.is_finite() && *hint > 0.0))
        .ok_or_else(|| {
            ProbeParseError::Input(format!(
                "could not determine the duration of {}",
                path.display()
            ))
        })?;

    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_ffprobe_rate)
        .or_else(|| {
            stream
                .avg_frame_rate
                .as_deref()
                .and_then(parse_ffprobe_rate)
        });

    let has_audio = parsed
        .streams
        .iter()
        .any(|stream| stream.codec_type.as_deref() == Some("audio"));

    Ok(SourceVideo {
        path: path.to_path_buf(),
        width,
        height,
        duration_seconds,
        has_audio,
        fps,
    })
}

fn parse_ffprobe_rate(raw: &str) -> Option<f64> {
    let value = raw.trim();
    if let Some((numerator, denominator)) = value.split_once('/') {
        let numerator = numerator.trim().parse::<f64>().ok()?;
        let denominator = denominator.trim().parse::<f64>().ok()?;
        if denominator.abs() <= f64::EPSILON {
            return None;
        }
        let result = numerator / denominator;
        return (result.is_finite() && result > 0.0).then_some(result);
    }
    parse_ffprobe_float(value)
}

fn parse_ffprobe_float(raw: &str) -> Option<f64> {
    let parsed = raw.trim().parse::<f64>().ok()?;
    (parsed.is_finite() && parsed > 0.0).then_some(parsed)
}
