//! ffmpeg/ffprobe invocation: toolchain resolution, a timeout-bounded process runner and
//! the argument builders for the reference and final encodes.

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{
    PipelineStage, ReelError, ReelResult, ToolDiagnostics, ToolFailure, ToolFailureKind,
};
use crate::layout::CanvasGeometry;
use crate::schema::{EncodeSettings, FfmpegMode};

const STDERR_TAIL_CHARS: usize = 2000;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Resolved ffmpeg and ffprobe executables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub mode_label: &'static str,
}

impl Toolchain {
    pub fn system() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            mode_label: "system",
        }
    }

    pub fn resolve(settings: &EncodeSettings) -> ReelResult<Self> {
        let mut toolchain = match settings.ffmpeg_mode {
            FfmpegMode::Auto | FfmpegMode::System => Self::system(),
            FfmpegMode::Sidecar => Self::sidecar()?,
        };
        if let Some(path) = &settings.ffmpeg_path {
            toolchain.ffmpeg = path.clone();
        }
        if let Some(path) = &settings.ffprobe_path {
            toolchain.ffprobe = path.clone();
        }
        debug!(
            mode = toolchain.mode_label,
            ffmpeg = %toolchain.ffmpeg.display(),
            ffprobe = %toolchain.ffprobe.display(),
            "resolved ffmpeg toolchain"
        );
        Ok(toolchain)
    }

    #[cfg(feature = "sidecar_ffmpeg")]
    fn sidecar() -> ReelResult<Self> {
        let ffmpeg = ffmpeg_sidecar::paths::ffmpeg_path();
        if !ffmpeg.exists() {
            ffmpeg_sidecar::download::auto_download().map_err(|error| {
                ReelError::config(format!("failed to auto-download ffmpeg sidecar binary: {error}"))
            })?;
        }
        Ok(Self {
            ffmpeg,
            ffprobe: ffmpeg_sidecar::ffprobe::ffprobe_path(),
            mode_label: "sidecar",
        })
    }

    #[cfg(not(feature = "sidecar_ffmpeg"))]
    fn sidecar() -> ReelResult<Self> {
        Err(ReelError::config(
            "ffmpeg sidecar mode requested but reelcard was built without `sidecar_ffmpeg`. Rebuild with `--features sidecar_ffmpeg`.",
        ))
    }
}

/// One external tool invocation with its diagnostic context.
pub struct ToolCommand<'a> {
    pub stage: PipelineStage,
    pub program: &'a Path,
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Bytes streamed to the child's stdin; stdin is closed once they are written.
    pub stdin: Option<&'a [u8]>,
    pub filter_graph: Option<String>,
    pub layout: Option<String>,
}

impl ToolCommand<'_> {
    fn diagnostics(&self) -> ToolDiagnostics {
        ToolDiagnostics {
            stage: self.stage,
            program: self.program.display().to_string(),
            args: self.args.clone(),
            filter_graph: self.filter_graph.clone(),
            layout: self.layout.clone(),
            exit_code: None,
            timed_out: false,
            timeout_secs: self.timeout.as_secs(),
            stderr_tail: String::new(),
        }
    }
}

#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr_tail: String,
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut,
    Failed(std::io::Error),
}

/// Run a tool to completion or kill it once `timeout` elapses.
///
/// stdin is fed from a writer thread while stdout and stderr are drained on their own
/// threads, so a chatty child never blocks on a full pipe. On unix the tool runs in its own
/// process group and the whole group is killed at the timeout, so wrapper scripts cannot
/// keep the pipes open. The drains are given `DRAIN_GRACE` after the child is gone.
pub fn run_tool(command: &ToolCommand<'_>) -> ReelResult<ToolOutput> {
    let mut diagnostics = command.diagnostics();
    debug!(stage = %command.stage, command = %diagnostics.command_line(), "running external tool");

    let mut process = Command::new(command.program);
    process
        .args(&command.args)
        .stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        process.process_group(0);
    }
    let mut child = process.spawn().map_err(|error| {
        let (kind, message) = if error.kind() == ErrorKind::NotFound {
            (
                ToolFailureKind::NotFound,
                format!(
                    "{} executable not found. Install ffmpeg (system mode) or use sidecar mode with `--features sidecar_ffmpeg`.",
                    command.program.display()
                ),
            )
        } else {
            (ToolFailureKind::Spawn, format!("failed to spawn process: {error}"))
        };
        ReelError::from(ToolFailure {
            kind,
            message,
            diagnostics: diagnostics.clone(),
        })
    })?;

    let writer = match (child.stdin.take(), command.stdin) {
        (Some(mut pipe), Some(bytes)) => {
            let bytes = bytes.to_vec();
            let (sender, receiver) = mpsc::channel();
            thread::spawn(move || {
                let result = pipe.write_all(&bytes).and_then(|()| pipe.flush());
                let _ = sender.send(result);
            });
            Some(receiver)
        }
        _ => None,
    };
    let stdout_drain = child.stdout.take().map(spawn_drain);
    let stderr_drain = child.stderr.take().map(spawn_drain);
    let timeout = command.timeout;

    let started = Instant::now();
    let outcome = loop {
        match child.try_wait() {
            Ok(Some(status)) => break WaitOutcome::Exited(status),
            Ok(None) => {}
            Err(error) => break WaitOutcome::Failed(error),
        }
        if started.elapsed() > timeout {
            kill_process_tree(&mut child);
            break WaitOutcome::TimedOut;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let drain_deadline = Instant::now() + DRAIN_GRACE;
    let write_result = match writer {
        Some(receiver) => receiver
            .recv_timeout(drain_deadline.saturating_duration_since(Instant::now()))
            .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer did not finish"))),
        None => Ok(()),
    };
    let stdout = collect_drain(stdout_drain, drain_deadline);
    let stderr = collect_drain(stderr_drain, drain_deadline);

    diagnostics.stderr_tail = last_n_chars(&String::from_utf8_lossy(&stderr), STDERR_TAIL_CHARS);

    match outcome {
        WaitOutcome::TimedOut => {
            diagnostics.timed_out = true;
            warn!(
                stage = %command.stage,
                timeout_secs = timeout.as_secs(),
                "external tool timed out and was killed"
            );
            Err(ToolFailure::timeout(diagnostics, timeout).into())
        }
        WaitOutcome::Failed(error) => {
            kill_process_tree(&mut child);
            Err(ToolFailure {
                kind: ToolFailureKind::Spawn,
                message: format!("failed waiting for process: {error}"),
                diagnostics,
            }
            .into())
        }
        WaitOutcome::Exited(status) => {
            diagnostics.exit_code = status.code();
            if !status.success() {
                return Err(ToolFailure {
                    kind: ToolFailureKind::NonZeroExit,
                    message: format!("exited with status {status}"),
                    diagnostics,
                }
                .into());
            }
            if let Err(error) = write_result {
                return Err(ToolFailure {
                    kind: ToolFailureKind::StdinWrite,
                    message: format!("failed to write stdin: {error}"),
                    diagnostics,
                }
                .into());
            }
            Ok(ToolOutput {
                stdout,
                stderr_tail: diagnostics.stderr_tail,
            })
        }
    }
}

fn spawn_drain(mut pipe: impl Read + Send + 'static) -> mpsc::Receiver<Vec<u8>> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = sender.send(buf);
    });
    receiver
}

/// Whatever a drain read before `deadline`; a pipe still held open past it yields nothing.
fn collect_drain(drain: Option<mpsc::Receiver<Vec<u8>>>, deadline: Instant) -> Vec<u8> {
    drain
        .and_then(|receiver| {
            receiver
                .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                .ok()
        })
        .unwrap_or_default()
}

fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Ok(pgid) = i32::try_from(child.id()) {
            let _ = killpg(Pid::from_raw(pgid), Signal::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

pub fn ffmpeg_rawvideo_input_args(width: u32, height: u32, fps: u32) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgba".to_owned(),
        "-s:v".to_owned(),
        format!("{width}x{height}"),
        "-r".to_owned(),
        fps.to_string(),
        "-i".to_owned(),
        "-".to_owned(),
        "-an".to_owned(),
    ]
}

/// Single-frame H.264 clip of the composed canvas, read from stdin as raw RGBA.
pub fn reference_encode_args(
    width: u32,
    height: u32,
    settings: &EncodeSettings,
    output_path: &Path,
) -> Vec<String> {
    let mut args = ffmpeg_rawvideo_input_args(width, height, settings.fps);
    args.extend([
        "-frames:v".to_owned(),
        "1".to_owned(),
        "-c:v".to_owned(),
        "libx264".to_owned(),
        "-tune".to_owned(),
        "stillimage".to_owned(),
        "-crf".to_owned(),
        settings.reference_crf.to_string(),
        "-pix_fmt".to_owned(),
        "yuv420p".to_owned(),
    ]);
    args.push(output_path.to_string_lossy().into_owned());
    args
}

/// Loop the reference frame for the whole clip and overlay the scaled source video.
pub fn overlay_filter_graph(geometry: &CanvasGeometry, fps: u32) -> String {
    let video = geometry.video_rect;
    format!(
        "[1:v]loop=loop=-1:size=1:start=0,setpts=N/({fps}*TB),setsar=1[bg];\
         [0:v]scale={}:{}:flags=lanczos,setsar=1[vid];\
         [bg][vid]overlay=x={}:y={}:eof_action=pass,format=yuv420p[out]",
        video.width, video.height, video.x, video.y
    )
}

/// Final encode: source clip as input 0, reference frame as input 1.
pub fn final_encode_args(
    source: &Path,
    reference: &Path,
    filter_graph: &str,
    duration_seconds: f64,
    has_audio: bool,
    settings: &EncodeSettings,
    output_path: &Path,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-i".to_owned(),
        source.to_string_lossy().into_owned(),
        "-i".to_owned(),
        reference.to_string_lossy().into_owned(),
        "-filter_complex".to_owned(),
        filter_graph.to_owned(),
        "-map".to_owned(),
        "[out]".to_owned(),
    ];
    if has_audio {
        args.extend([
            "-map".to_owned(),
            "0:a:0".to_owned(),
            "-c:a".to_owned(),
            settings.audio_codec.clone(),
            "-b:a".to_owned(),
            settings.audio_bitrate.clone(),
        ]);
    }
    args.extend([
        "-t".to_owned(),
        format!("{duration_seconds:.3}"),
        "-r".to_owned(),
        settings.fps.to_string(),
        "-c:v".to_owned(),
        "libx264".to_owned(),
        "-preset".to_owned(),
        settings.preset.clone(),
        "-crf".to_owned(),
        settings.crf.to_string(),
        "-pix_fmt".to_owned(),
        "yuv420p".to_owned(),
        "-movflags".to_owned(),
        "+faststart".to_owned(),
    ]);
    args.push(output_path.to_string_lossy().into_owned());
    args
}

/// Reject output paths ffmpeg would misread.
pub fn check_output_path(path: &Path) -> ReelResult<()> {
    let path_str = path.to_string_lossy();
    if path_str.is_empty() {
        return Err(ReelError::input("output path is empty"));
    }
    if path_str.len() > 1024 {
        return Err(ReelError::input("output path is suspiciously long"));
    }
    if path_str.chars().any(|c| c.is_control()) {
        return Err(ReelError::input("output path contains control characters"));
    }
    Ok(())
}

pub fn last_n_chars(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars().collect::<Vec<_>>();
    if chars.len() > max_chars {
        chars = chars[chars.len().saturating_sub(max_chars)..].to_vec();
    }
    chars.into_iter().collect::<String>().trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::compute_layout;
    use crate::schema::CanvasConfig;

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
    }

    #[test]
    fn reference_args_read_rgba_from_stdin_and_stop_after_one_frame() {
        let args = reference_encode_args(
            1080,
            1920,
            &EncodeSettings::default(),
            Path::new("/tmp/ref.mp4"),
        );
        assert!(has_pair(&args, "-f", "rawvideo"));
        assert!(has_pair(&args, "-pix_fmt", "rgba"));
        assert!(has_pair(&args, "-s:v", "1080x1920"));
        assert!(has_pair(&args, "-i", "-"));
        assert!(has_pair(&args, "-frames:v", "1"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/ref.mp4"));
    }

    #[test]
    fn filter_graph_places_the_scaled_clip_at_the_video_rect() {
        let geometry = compute_layout(200, 1920, 1080, &CanvasConfig::default());
        let graph = overlay_filter_graph(&geometry, 30);
        assert_eq!(
            graph,
            "[1:v]loop=loop=-1:size=1:start=0,setpts=N/(30*TB),setsar=1[bg];\
             [0:v]scale=1008:566:flags=lanczos,setsar=1[vid];\
             [bg][vid]overlay=x=36:y=850:eof_action=pass,format=yuv420p[out]"
        );
    }

    #[test]
    fn silent_source_gets_no_audio_flags() {
        let settings = EncodeSettings::default();
        let args = final_encode_args(
            Path::new("in.mp4"),
            Path::new("ref.mp4"),
            "graph",
            12.5,
            false,
            &settings,
            Path::new("out.mp4"),
        );
        assert!(!args.iter().any(|arg| arg.contains(":a") || arg == "-an"));
        assert!(!args.iter().any(|arg| arg == "-c:a" || arg == "-b:a"));
        assert!(has_pair(&args, "-t", "12.500"));
        assert!(has_pair(&args, "-movflags", "+faststart"));
        assert!(has_pair(&args, "-crf", "20"));
        assert!(has_pair(&args, "-preset", "fast"));
    }

    #[test]
    fn source_with_audio_maps_first_audio_stream() {
        let args = final_encode_args(
            Path::new("in.mp4"),
            Path::new("ref.mp4"),
            "graph",
            3.0,
            true,
            &EncodeSettings::default(),
            Path::new("out.mp4"),
        );
        assert!(has_pair(&args, "-map", "0:a:0"));
        assert!(has_pair(&args, "-c:a", "aac"));
        assert!(has_pair(&args, "-b:a", "128k"));
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        assert_eq!(last_n_chars("abcdef", 3), "def");
        assert_eq!(last_n_chars("  ab  ", 10), "ab");
    }

    #[test]
    fn output_path_rejects_control_characters() {
        assert!(check_output_path(Path::new("out\n.mp4")).is_err());
        assert!(check_output_path(Path::new("out.mp4")).is_ok());
    }

    #[test]
    fn missing_program_is_reported_as_not_found() {
        let program = Path::new("/definitely/not/here/ffmpeg");
        let error = run_tool(&ToolCommand {
            stage: PipelineStage::Probe,
            program,
            args: vec!["-version".to_owned()],
            timeout: Duration::from_secs(5),
            stdin: None,
            filter_graph: None,
            layout: None,
        })
        .unwrap_err();
        match error {
            ReelError::ExternalTool(failure) => {
                assert_eq!(failure.kind, ToolFailureKind::NotFound);
                assert_eq!(failure.diagnostics.stage, PipelineStage::Probe);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn slow_tool_is_killed_at_the_timeout() {
        let started = Instant::now();
        let error = run_tool(&ToolCommand {
            stage: PipelineStage::RunEncode,
            program: Path::new("sleep"),
            args: vec!["10".to_owned()],
            timeout: Duration::from_millis(300),
            stdin: None,
            filter_graph: Some("graph".to_owned()),
            layout: None,
        })
        .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        let diagnostics = error.diagnostics().expect("tool failures carry diagnostics");
        assert!(diagnostics.timed_out);
        assert_eq!(diagnostics.filter_graph.as_deref(), Some("graph"));
    }

    #[cfg(unix)]
    #[test]
    fn wrapper_script_children_do_not_outlive_the_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir should create");
        let script = dir.path().join("ffmpeg-wrapper");
        std::fs::write(&script, "#!/bin/sh\necho starting >&2\nsleep 20\necho done\n")
            .expect("script should write");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("script should be executable");

        let started = Instant::now();
        let error = run_tool(&ToolCommand {
            stage: PipelineStage::RunEncode,
            program: &script,
            args: Vec::new(),
            timeout: Duration::from_millis(500),
            stdin: None,
            filter_graph: None,
            layout: None,
        })
        .unwrap_err();
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "returned after {:?}",
            started.elapsed()
        );
        let diagnostics = error.diagnostics().expect("tool failures carry diagnostics");
        assert!(diagnostics.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn stdin_is_streamed_and_closed() {
        let input = b"hello reel".to_vec();
        let output = run_tool(&ToolCommand {
            stage: PipelineStage::EncodeBackgroundReference,
            program: Path::new("cat"),
            args: Vec::new(),
            timeout: Duration::from_secs(5),
            stdin: Some(&input),
            filter_graph: None,
            layout: None,
        })
        .expect("cat should echo stdin");
        assert_eq!(output.stdout, input);
    }
}
