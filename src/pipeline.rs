//! Video assembly: probe, reference encode, filter graph, final encode.
//!
//! Every stage transition is logged. Temporary artifacts live in a job-scoped directory
//! that is removed when the job ends, and the output path is cleared unless the final
//! encode succeeds.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tempfile::TempDir;
use tiny_skia::Pixmap;
use tracing::{debug, info, warn};

use crate::card::{render_card, CardRequest, ProfileSpec};
use crate::compositor::{canvas_rgba, compose};
use crate::encoding::{
    check_output_path, final_encode_args, overlay_filter_graph, reference_encode_args,
    run_tool, ToolCommand, Toolchain,
};
use crate::error::{
    PipelineStage, ReelError, ReelResult, ToolDiagnostics, ToolFailure, ToolFailureKind,
};
use crate::font_assets::{load_font_set, AssetFallback, FontSet};
use crate::layout::{compute_layout, CanvasGeometry};
use crate::external::{FetchedMedia, MediaFetcher, Translator};
use crate::post_text::{is_valid_job_id, new_job_id, normalize_post_url, prepare_post};
use crate::probe::{probe_source, SourceVideo};
use crate::schema::{CanvasConfig, EncodeSettings, RenderConfig};

const REFERENCE_FILE_NAME: &str = "background.mp4";

/// One post + clip to turn into a vertical video.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub id: String,
    pub text: String,
    pub profile: Option<ProfileSpec>,
    pub source_video: PathBuf,
    pub duration_hint: Option<f64>,
    /// Canonical post URL, when the job came from a link.
    pub post_url: Option<String>,
    pub output: PathBuf,
}

impl RenderJob {
    pub fn new(text: impl Into<String>, source_video: PathBuf, output: PathBuf) -> Self {
        Self {
            id: new_job_id(),
            text: text.into(),
            profile: None,
            source_video,
            duration_hint: None,
            post_url: None,
            output,
        }
    }

    /// Job for media handed over by a fetcher. The post text is translated when a
    /// translator is given and cleaned either way; the fetcher's author becomes the profile
    /// name and its duration is kept as the probe fallback.
    pub fn from_fetched(
        media: FetchedMedia,
        output: PathBuf,
        translation: Option<(&dyn Translator, &str)>,
    ) -> ReelResult<Self> {
        let text = prepare_post(&media.text, translation)?;
        let mut job = Self::new(text, media.video_path, output);
        job.duration_hint = media.duration_hint;
        if let Some(name) = media.author_name.filter(|name| !name.trim().is_empty()) {
            job.profile = Some(ProfileSpec {
                display_name: name,
                handle: None,
                avatar_path: None,
            });
        }
        Ok(job)
    }

    /// Fetch `url` with `fetcher` into `workdir` and build the job from the result.
    pub fn fetch(
        fetcher: &dyn MediaFetcher,
        url: &str,
        workdir: &Path,
        output: PathBuf,
        translation: Option<(&dyn Translator, &str)>,
    ) -> ReelResult<Self> {
        let post_url = normalize_post_url(url)?;
        let media = fetcher.fetch(&post_url, workdir)?;
        info!(url = %post_url, video = %media.video_path.display(), "post media fetched");
        let mut job = Self::from_fetched(media, output, translation)?;
        job.post_url = Some(post_url);
        Ok(job)
    }

    pub fn with_profile(mut self, profile: ProfileSpec) -> Self {
        self.profile = Some(profile);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_url: Option<String>,
    pub output: PathBuf,
    pub source: SourceVideo,
    pub geometry: CanvasGeometry,
    pub card_height: u32,
    pub line_count: usize,
    pub font_size: u32,
    /// Frame rate of the encoded video; the source rate is in `source.fps`.
    pub output_fps: u32,
    pub fallbacks: Vec<AssetFallback>,
    pub stages: Vec<PipelineStage>,
    pub elapsed_ms: u128,
}

/// The external-tool stages of one job, each producing one artifact.
pub struct VideoAssembler<'a> {
    toolchain: &'a Toolchain,
    settings: &'a EncodeSettings,
    canvas: &'a CanvasConfig,
    workdir: &'a Path,
}

impl<'a> VideoAssembler<'a> {
    pub fn new(
        toolchain: &'a Toolchain,
        settings: &'a EncodeSettings,
        canvas: &'a CanvasConfig,
        workdir: &'a Path,
    ) -> Self {
        Self {
            toolchain,
            settings,
            canvas,
            workdir,
        }
    }

    pub fn probe(&self, path: &Path, duration_hint: Option<f64>) -> ReelResult<SourceVideo> {
        probe_source(
            self.toolchain,
            path,
            duration_hint,
            Duration::from_secs(self.settings.probe_timeout_secs),
        )
    }

    /// Encode the composed canvas as a one-frame clip and return its path.
    pub fn encode_background_reference(&self, frame: &Pixmap) -> ReelResult<PathBuf> {
        let reference = self.workdir.join(REFERENCE_FILE_NAME);
        let rgba = canvas_rgba(frame);
        let command = ToolCommand {
            stage: PipelineStage::EncodeBackgroundReference,
            program: &self.toolchain.ffmpeg,
            args: reference_encode_args(
                self.canvas.width,
                self.canvas.height,
                self.settings,
                &reference,
            ),
            timeout: Duration::from_secs(self.settings.reference_timeout_secs),
            stdin: Some(&rgba),
            filter_graph: None,
            layout: None,
        };
        run_tool(&command)?;
        ensure_artifact(&reference, &command)?;
        Ok(reference)
    }

    pub fn build_filter_graph(&self, geometry: &CanvasGeometry) -> String {
        overlay_filter_graph(geometry, self.settings.fps)
    }

    pub fn run_encode(
        &self,
        source: &SourceVideo,
        reference: &Path,
        filter_graph: &str,
        geometry: &CanvasGeometry,
        output: &Path,
    ) -> ReelResult<()> {
        let command = ToolCommand {
            stage: PipelineStage::RunEncode,
            program: &self.toolchain.ffmpeg,
            args: final_encode_args(
                &source.path,
                reference,
                filter_graph,
                source.duration_seconds,
                source.has_audio,
                self.settings,
                output,
            ),
            timeout: Duration::from_secs(self.settings.encode_timeout_secs),
            stdin: None,
            filter_graph: Some(filter_graph.to_owned()),
            layout: Some(geometry.summary()),
        };
        run_tool(&command)?;
        ensure_artifact(output, &command)
    }
}

/// A tool that exits 0 without writing its output is still a failure.
fn ensure_artifact(path: &Path, command: &ToolCommand<'_>) -> ReelResult<()> {
    let written = fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false);
    if written {
        return Ok(());
    }
    Err(ToolFailure {
        kind: ToolFailureKind::BadOutput,
        message: format!("no output written to {}", path.display()),
        diagnostics: ToolDiagnostics {
            stage: command.stage,
            program: command.program.display().to_string(),
            args: command.args.clone(),
            filter_graph: command.filter_graph.clone(),
            layout: command.layout.clone(),
            exit_code: Some(0),
            timed_out: false,
            timeout_secs: command.timeout.as_secs(),
            stderr_tail: String::new(),
        },
    }
    .into())
}

/// Removes the output file on drop unless the job completed.
struct OutputGuard {
    path: PathBuf,
    armed: bool,
}

impl OutputGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            if let Err(error) = fs::remove_file(&self.path) {
                warn!(output = %self.path.display(), %error, "failed to remove partial output");
            }
        }
    }
}

pub struct ReelRenderer {
    config: RenderConfig,
    fonts: FontSet,
    toolchain: Toolchain,
}

impl ReelRenderer {
    pub fn new(config: RenderConfig) -> ReelResult<Self> {
        config.validate()?;
        let fonts = load_font_set(config.font_dir.as_deref());
        let toolchain = Toolchain::resolve(&config.encode)?;
        Ok(Self {
            config,
            fonts,
            toolchain,
        })
    }

    pub fn with_parts(config: RenderConfig, fonts: FontSet, toolchain: Toolchain) -> Self {
        Self {
            config,
            fonts,
            toolchain,
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn fonts(&self) -> &FontSet {
        &self.fonts
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn render(&self, job: &RenderJob) -> ReelResult<RenderReport> {
        let started = Instant::now();
        if !is_valid_job_id(&job.id) {
            return Err(ReelError::input(format!("invalid job id '{}'", job.id)));
        }
        if job.text.trim().is_empty() {
            return Err(ReelError::input("post text is empty"));
        }
        check_output_path(&job.output)?;
        if let Some(parent) = job.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut guard = OutputGuard::new(&job.output);
        let workdir = tempfile::Builder::new()
            .prefix(&format!("reelcard-{}-", job.id))
            .tempdir()?;
        info!(job = %job.id, output = %job.output.display(), "render job started");

        let result = self.run_stages(job, &workdir);
        match &result {
            Ok(_) => guard.disarm(),
            Err(error) => warn!(job = %job.id, %error, "render job failed"),
        }
        drop(guard);

        let mut report = result?;
        report.elapsed_ms = started.elapsed().as_millis();
        info!(
            job = %job.id,
            output = %report.output.display(),
            elapsed_ms = report.elapsed_ms,
            "render job finished"
        );
        Ok(report)
    }

    fn run_stages(&self, job: &RenderJob, workdir: &TempDir) -> ReelResult<RenderReport> {
        let config = &self.config;
        let assembler = VideoAssembler::new(
            &self.toolchain,
            &config.encode,
            &config.canvas,
            workdir.path(),
        );
        let mut stages = Vec::with_capacity(4);

        enter_stage(&job.id, PipelineStage::Probe);
        let source = assembler.probe(&job.source_video, job.duration_hint)?;
        stages.push(PipelineStage::Probe);
        if let Some(source_fps) = source.fps {
            if (source_fps - f64::from(config.encode.fps)).abs() > 0.01 {
                info!(
                    job = %job.id,
                    source_fps,
                    output_fps = config.encode.fps,
                    "source frame rate will be resampled"
                );
            }
        }

        let has_profile = job
            .profile
            .as_ref()
            .is_some_and(|profile| !profile.display_name.trim().is_empty());
        let font_size = config.card.body_font_size(has_profile);
        let request = CardRequest {
            text: job.text.clone(),
            font_size,
            max_width: config.canvas.card_width(),
            output_path: None,
            bg_hex: config.canvas.background.to_string(),
            profile: job.profile.clone(),
        };
        let card = render_card(&request, &self.fonts, &config.card)?;
        for fallback in &card.fallbacks {
            debug!(job = %job.id, %fallback, "asset fallback in effect");
        }

        let geometry = compute_layout(card.height(), source.width, source.height, &config.canvas);
        info!(job = %job.id, layout = %geometry.summary(), "computed layout");
        if geometry.overflows_safe_area {
            warn!(
                job = %job.id,
                "minimum video height pushes the card outside the safe area"
            );
        }
        let frame = compose(&card.image, &geometry, &config.canvas)?;

        enter_stage(&job.id, PipelineStage::EncodeBackgroundReference);
        let reference = assembler.encode_background_reference(&frame)?;
        stages.push(PipelineStage::EncodeBackgroundReference);

        enter_stage(&job.id, PipelineStage::BuildFilterGraph);
        let filter_graph = assembler.build_filter_graph(&geometry);
        debug!(job = %job.id, %filter_graph, "filter graph");
        stages.push(PipelineStage::BuildFilterGraph);

        enter_stage(&job.id, PipelineStage::RunEncode);
        assembler.run_encode(&source, &reference, &filter_graph, &geometry, &job.output)?;
        stages.push(PipelineStage::RunEncode);

        Ok(RenderReport {
            job_id: job.id.clone(),
            post_url: job.post_url.clone(),
            output: job.output.clone(),
            source,
            geometry,
            card_height: card.height(),
            line_count: card.lines.len(),
            font_size,
            output_fps: config.encode.fps,
            fallbacks: card.fallbacks,
            stages,
            elapsed_ms: 0,
        })
    }
}

fn enter_stage(job_id: &str, stage: PipelineStage) {
    info!(job = %job_id, %stage, "pipeline stage");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::LocalMedia;

    #[test]
    fn output_guard_removes_file_unless_disarmed() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.mp4");
        let removed = dir.path().join("removed.mp4");
        fs::write(&kept, b"ok").unwrap();
        fs::write(&removed, b"partial").unwrap();

        let mut guard = OutputGuard::new(&kept);
        guard.disarm();
        drop(guard);
        drop(OutputGuard::new(&removed));

        assert!(kept.exists());
        assert!(!removed.exists());
    }

    struct Shouting;

    impl Translator for Shouting {
        fn translate(&self, text: &str, _credential: &str) -> ReelResult<String> {
            Ok(text.to_uppercase())
        }
    }

    fn fetched(text: &str) -> FetchedMedia {
        FetchedMedia {
            video_path: PathBuf::from("clip.mp4"),
            text: text.to_owned(),
            author_name: Some("Jane Doe".to_owned()),
            duration_hint: Some(7.25),
        }
    }

    #[test]
    fn fetched_media_carries_hint_author_and_cleaned_text() {
        let job = RenderJob::from_fetched(
            fetched("Big news https://t.co/abc\n\n more soon "),
            PathBuf::from("out.mp4"),
            None,
        )
        .unwrap();
        assert_eq!(job.text, "Big news\nmore soon");
        assert_eq!(job.duration_hint, Some(7.25));
        assert_eq!(job.source_video, PathBuf::from("clip.mp4"));
        assert_eq!(
            job.profile.map(|profile| profile.display_name),
            Some("Jane Doe".to_owned())
        );
        assert!(is_valid_job_id(&job.id));
    }

    #[test]
    fn fetched_text_is_translated_before_cleaning() {
        let translator: &dyn Translator = &Shouting;
        let job = RenderJob::from_fetched(
            fetched("  quiet words  \n\n"),
            PathBuf::from("out.mp4"),
            Some((translator, "key")),
        )
        .unwrap();
        assert_eq!(job.text, "QUIET WORDS");
    }

    #[test]
    fn fetched_media_without_text_is_rejected() {
        assert!(matches!(
            RenderJob::from_fetched(fetched("https://t.co/only"), PathBuf::from("o.mp4"), None),
            Err(ReelError::Input(_))
        ));
    }

    #[test]
    fn fetch_normalizes_the_post_url() {
        let fetcher = LocalMedia {
            video_path: PathBuf::from("clip.mp4"),
            text: "hello".to_owned(),
            author_name: None,
            duration_hint: Some(2.0),
        };
        let job = RenderJob::fetch(
            &fetcher,
            "https://vxtwitter.com/jane/status/42",
            Path::new("."),
            PathBuf::from("out.mp4"),
            None,
        )
        .unwrap();
        assert_eq!(
            job.post_url.as_deref(),
            Some("https://twitter.com/jane/status/42")
        );
        assert_eq!(job.duration_hint, Some(2.0));
        assert!(job.profile.is_none());

        let rejected = RenderJob::fetch(
            &fetcher,
            "https://example.com/post/1",
            Path::new("."),
            PathBuf::from("out.mp4"),
            None,
        );
        assert!(matches!(rejected, Err(ReelError::Input(_))));
    }

    #[test]
    fn invalid_job_id_is_rejected_before_any_work() {
        let renderer = ReelRenderer::with_parts(
            RenderConfig::default(),
            FontSet::builtin(),
            Toolchain::system(),
        );
        let mut job = RenderJob::new("hi", PathBuf::from("in.mp4"), PathBuf::from("out.mp4"));
        job.id = "../../x".to_owned();
        assert!(matches!(renderer.render(&job), Err(ReelError::Input(_))));
    }

    #[test]
    fn missing_source_fails_in_probe_and_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        let renderer = ReelRenderer::with_parts(
            RenderConfig::default(),
            FontSet::builtin(),
            Toolchain::system(),
        );
        let job = RenderJob::new("hello", dir.path().join("missing.mp4"), output.clone());
        assert!(matches!(renderer.render(&job), Err(ReelError::Input(_))));
        assert!(!output.exists());
    }

    #[test]
    fn empty_artifact_is_a_bad_output_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp4");
        fs::write(&path, b"").unwrap();
        let program = PathBuf::from("ffmpeg");
        let command = ToolCommand {
            stage: PipelineStage::RunEncode,
            program: &program,
            args: Vec::new(),
            timeout: Duration::from_secs(1),
            stdin: None,
            filter_graph: None,
            layout: None,
        };
        let error = ensure_artifact(&path, &command).unwrap_err();
        assert!(error.is_external_tool_failure());
    }
}
