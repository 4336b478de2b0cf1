use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ReelError, ReelResult};

/// Full configuration of a render. Every field has a default; a YAML file passed with
/// `--config` only needs the keys it changes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RenderConfig {
    pub canvas: CanvasConfig,
    pub card: CardStyle,
    pub encode: EncodeSettings,
    pub font_dir: Option<PathBuf>,
}

impl RenderConfig {
    pub fn load(path: &Path) -> ReelResult<Self> {
        let raw = fs::read_to_string(path).map_err(|error| {
            ReelError::config(format!("failed to read config {}: {error}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|error| {
            ReelError::config(format!("failed to parse config {}: {error}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ReelResult<()> {
        self.canvas.validate()?;
        self.card.validate(self.canvas.card_width())?;
        self.encode.validate()
    }
}

/// Fixed canvas constants consumed by the layout calculator and the compositor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct CanvasConfig {
    pub width: u32,
    pub height: u32,
    /// Reserved band at the top for platform UI overlays.
    pub top_margin: u32,
    pub side_margin: u32,
    pub gap: u32,
    pub separator_thickness: u32,
    pub min_video_height: u32,
    pub border_width: u32,
    pub background: HexColor,
    pub border_color: HexColor,
    pub separator_color: HexColor,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            top_margin: 180,
            side_margin: 36,
            gap: 4,
            separator_thickness: 2,
            min_video_height: 200,
            border_width: 3,
            background: HexColor([0, 0, 0, 255]),
            border_color: HexColor([0x3A, 0x3A, 0x3C, 153]),
            separator_color: HexColor([0x3A, 0x3A, 0x3C, 128]),
        }
    }
}

impl CanvasConfig {
    pub fn card_width(&self) -> u32 {
        self.width.saturating_sub(self.side_margin.saturating_mul(2))
    }

    pub fn validate(&self) -> ReelResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ReelError::config(format!(
                "canvas resolution must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ReelError::config(format!(
                "canvas resolution must be even for yuv420p, got {}x{}",
                self.width, self.height
            )));
        }
        if self.card_width() < 2 {
            return Err(ReelError::config(format!(
                "side_margin {} leaves no card width on a {}px canvas",
                self.side_margin, self.width
            )));
        }
        if self.top_margin >= self.height {
            return Err(ReelError::config(format!(
                "top_margin {} must be smaller than canvas height {}",
                self.top_margin, self.height
            )));
        }
        if self.min_video_height < 2 {
            return Err(ReelError::config("min_video_height must be >= 2"));
        }
        Ok(())
    }
}

/// Profile header size preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderVariant {
    #[default]
    Compact,
    Large,
}

impl HeaderVariant {
    pub fn from_keyword(value: &str) -> ReelResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "large" => Ok(Self::Large),
            _ => Err(ReelError::config(format!(
                "invalid header variant '{value}', expected compact or large"
            ))),
        }
    }
}

/// Visual constants of the rendered card.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct CardStyle {
    pub font_size: u32,
    pub profile_font_size: u32,
    pub padding_x: u32,
    pub padding_top: u32,
    pub padding_bottom: u32,
    /// Extra leading as a fraction of the font size.
    pub line_spacing: f32,
    pub avatar_diameter: u32,
    pub avatar_text_gap: u32,
    pub header_gap: u32,
    pub name_scale: f32,
    pub handle_scale: f32,
    pub name_handle_gap: u32,
    pub badge_ratio: f32,
    pub badge_gap: u32,
    pub text_primary: HexColor,
    pub text_secondary: HexColor,
    pub badge_color: HexColor,
    pub badge_mark_color: HexColor,
    pub placeholder_background: HexColor,
    pub placeholder_figure: HexColor,
    /// Optional cap on wrapped lines. `None` keeps every line.
    pub max_lines: Option<usize>,
}

impl Default for CardStyle {
    fn default() -> Self {
        Self {
            font_size: 42,
            profile_font_size: 48,
            padding_x: 48,
            padding_top: 44,
            padding_bottom: 44,
            line_spacing: 0.40,
            avatar_diameter: 120,
            avatar_text_gap: 28,
            header_gap: 28,
            name_scale: 1.05,
            handle_scale: 0.88,
            name_handle_gap: 6,
            badge_ratio: 0.42,
            badge_gap: 8,
            text_primary: HexColor([0xE7, 0xE9, 0xEA, 255]),
            text_secondary: HexColor([0x71, 0x76, 0x7B, 255]),
            badge_color: HexColor([0x1D, 0x9B, 0xF0, 255]),
            badge_mark_color: HexColor([255, 255, 255, 255]),
            placeholder_background: HexColor([51, 51, 51, 255]),
            placeholder_figure: HexColor([90, 90, 90, 255]),
            max_lines: None,
        }
    }
}

impl CardStyle {
    pub fn with_header_variant(mut self, variant: HeaderVariant) -> Self {
        match variant {
            HeaderVariant::Compact => {
                self.avatar_diameter = 120;
                self.avatar_text_gap = 28;
                self.header_gap = 28;
            }
            HeaderVariant::Large => {
                self.avatar_diameter = 140;
                self.avatar_text_gap = 32;
                self.header_gap = 36;
            }
        }
        self
    }

    /// Body size for a card with or without a profile header.
    pub fn body_font_size(&self, has_profile: bool) -> u32 {
        if has_profile {
            self.profile_font_size
        } else {
            self.font_size
        }
    }

    pub fn validate(&self, card_width: u32) -> ReelResult<()> {
        if self.font_size == 0 || self.profile_font_size == 0 {
            return Err(ReelError::config("font sizes must be > 0"));
        }
        if self.padding_x.saturating_mul(2) >= card_width {
            return Err(ReelError::config(format!(
                "padding_x {} leaves no text width on a {}px card",
                self.padding_x, card_width
            )));
        }
        if !self.line_spacing.is_finite() || self.line_spacing < 0.0 {
            return Err(ReelError::config("line_spacing must be a non-negative number"));
        }
        for (name, value) in [
            ("name_scale", self.name_scale),
            ("handle_scale", self.handle_scale),
            ("badge_ratio", self.badge_ratio),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ReelError::config(format!("{name} must be > 0")));
            }
        }
        if self.avatar_diameter == 0 {
            return Err(ReelError::config("avatar_diameter must be > 0"));
        }
        if self.max_lines == Some(0) {
            return Err(ReelError::config("max_lines must be > 0 when set"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FfmpegMode {
    #[default]
    Auto,
    System,
    Sidecar,
}

impl FfmpegMode {
    pub fn from_keyword(value: &str) -> ReelResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "system" => Ok(Self::System),
            "sidecar" => Ok(Self::Sidecar),
            _ => Err(ReelError::config(format!(
                "invalid ffmpeg mode '{value}', expected auto, system or sidecar"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct EncodeSettings {
    pub fps: u32,
    pub crf: u8,
    pub preset: String,
    pub reference_crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub probe_timeout_secs: u64,
    pub reference_timeout_secs: u64,
    pub encode_timeout_secs: u64,
    pub ffmpeg_mode: FfmpegMode,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            crf: 20,
            preset: "fast".to_owned(),
            reference_crf: 12,
            audio_codec: "aac".to_owned(),
            audio_bitrate: "128k".to_owned(),
            probe_timeout_secs: 30,
            reference_timeout_secs: 60,
            encode_timeout_secs: 300,
            ffmpeg_mode: FfmpegMode::Auto,
            ffmpeg_path: None,
            ffprobe_path: None,
        }
    }
}

impl EncodeSettings {
    pub fn validate(&self) -> ReelResult<()> {
        if self.fps == 0 {
            return Err(ReelError::config("fps must be > 0"));
        }
        if self.crf > 51 || self.reference_crf > 51 {
            return Err(ReelError::config("crf values must be within 0..=51"));
        }
        if self.preset.trim().is_empty() {
            return Err(ReelError::config("preset must not be empty"));
        }
        if self.probe_timeout_secs == 0
            || self.reference_timeout_secs == 0
            || self.encode_timeout_secs == 0
        {
            return Err(ReelError::config("tool timeouts must be > 0 seconds"));
        }
        Ok(())
    }
}

/// RGBA color written as `#RRGGBB` or `#RRGGBBAA` in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor(pub [u8; 4]);

impl HexColor {
    pub fn parse(value: &str) -> ReelResult<Self> {
        let hex = value.trim().trim_start_matches('#');
        if !matches!(hex.len(), 6 | 8) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ReelError::config(format!(
                "invalid color '{value}', expected #RRGGBB or #RRGGBBAA"
            )));
        }
        let channel = |index: usize| {
            u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16)
                .map_err(|error| ReelError::config(format!("invalid color '{value}': {error}")))
        };
        let alpha = if hex.len() == 8 { channel(3)? } else { 255 };
        Ok(Self([channel(0)?, channel(1)?, channel(2)?, alpha]))
    }

    pub fn rgba(self) -> [u8; 4] {
        self.0
    }
}

impl TryFrom<String> for HexColor {
    type Error = ReelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HexColor> for String {
    fn from(color: HexColor) -> Self {
        color.to_string()
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{r:02X}{g:02X}{b:02X}")
        } else {
            write!(f, "#{r:02X}{g:02X}{b:02X}{a:02X}")
        }
    }
}
