//! Font discovery and the glyph backends used for measuring and drawing text.
//!
//! Every layout decision goes through [`GlyphBackend`], so the card math is shared by the
//! fontdue backend and the built-in block-glyph fallback.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use serde::Serialize;
use tiny_skia::Pixmap;
use tracing::{debug, warn};

use crate::raster::{blend_coverage, stroke_box};

pub const BUNDLED_FONT_DIR_REL: &str = "assets/fonts";

pub const REGULAR_FONT_FILES: [&str; 2] = ["Inter-Regular.ttf", "Inter-Medium.ttf"];
pub const BOLD_FONT_FILES: [&str; 1] = ["Inter-Bold.ttf"];

pub const SYSTEM_REGULAR_FONTS: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

pub const SYSTEM_BOLD_FONTS: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Horizontal extent and ink box of a run of text, relative to the line's top edge.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextExtent {
    pub width: f32,
    pub ink_top: f32,
    pub ink_bottom: f32,
}

impl TextExtent {
    pub fn ink_height(&self) -> f32 {
        (self.ink_bottom - self.ink_top).max(0.0)
    }
}

pub trait GlyphBackend: Send + Sync {
    fn label(&self) -> &str;

    fn measure(&self, text: &str, size: f32) -> TextExtent;

    /// Draw `text` with its line box's top-left corner at `(x, y)`.
    fn draw(&self, pixmap: &mut Pixmap, x: f32, y: f32, text: &str, size: f32, color: [u8; 4]);

    /// Characters this backend renders as a placeholder glyph.
    fn missing_glyphs(&self, _text: &str) -> Vec<char> {
        Vec::new()
    }

    fn text_width(&self, text: &str, size: f32) -> f32 {
        self.measure(text, size).width
    }
}

/// A substitution made because an optional asset was unavailable. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "asset", rename_all = "snake_case")]
pub enum AssetFallback {
    /// No font file could be loaded; text uses the built-in block glyphs.
    GlyphRenderer,
    /// No bold face was found; the regular face is emboldened.
    BoldWeight,
    /// The avatar image was missing or unreadable; a placeholder was drawn.
    Avatar { reason: String },
}

impl fmt::Display for AssetFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GlyphRenderer => f.write_str("no usable font file, using built-in block glyphs"),
            Self::BoldWeight => f.write_str("no bold font file, emboldening the regular face"),
            Self::Avatar { reason } => write!(f, "avatar unavailable ({reason}), drawing placeholder"),
        }
    }
}

pub struct FontdueFace {
    font: Font,
    label: String,
    embolden: bool,
}

impl FontdueFace {
    pub fn from_bytes(bytes: Vec<u8>, label: impl Into<String>) -> Result<Self, String> {
        let font = Font::from_bytes(bytes, FontSettings::default()).map_err(str::to_owned)?;
        Ok(Self {
            font,
            label: label.into(),
            embolden: false,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, String> {
        let bytes = fs::read(path).map_err(|error| error.to_string())?;
        Self::from_bytes(bytes, path.display().to_string())
    }

    pub fn emboldened(mut self) -> Self {
        self.embolden = true;
        self
    }

    fn bold_offset(&self, size: f32) -> f32 {
        if self.embolden {
            (size / 28.0).max(1.0)
        } else {
            0.0
        }
    }

    fn ascent(&self, size: f32) -> f32 {
        self.font
            .horizontal_line_metrics(size)
            .map(|metrics| metrics.ascent)
            .unwrap_or(size * 0.8)
    }

    fn draw_pass(&self, pixmap: &mut Pixmap, x: f32, y: f32, text: &str, size: f32, color: [u8; 4]) {
        let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
        layout.reset(&LayoutSettings {
            x,
            y,
            max_width: None,
            max_height: None,
            horizontal_align: fontdue::layout::HorizontalAlign::Left,
            vertical_align: fontdue::layout::VerticalAlign::Top,
            line_height: 1.0,
            wrap_style: fontdue::layout::WrapStyle::Word,
            wrap_hard_breaks: false,
        });
        layout.append(&[&self.font], &TextStyle::new(text, size, 0));

        for glyph in layout.glyphs() {
            if glyph.width == 0 || glyph.height == 0 {
                continue;
            }
            let (_, bitmap) = self.font.rasterize_config(glyph.key);
            blend_coverage(
                pixmap,
                glyph.x.round() as i32,
                glyph.y.round() as i32,
                glyph.width,
                glyph.height,
                &bitmap,
                color,
            );
        }
    }
}

impl GlyphBackend for FontdueFace {
    fn label(&self) -> &str {
        &self.label
    }

    fn measure(&self, text: &str, size: f32) -> TextExtent {
        let ascent = self.ascent(size);
        let mut width = 0.0_f32;
        let mut ink: Option<(f32, f32)> = None;
        let mut previous: Option<char> = None;

        for ch in text.chars() {
            if let Some(prev) = previous {
                width += self.font.horizontal_kern(prev, ch, size).unwrap_or(0.0);
            }
            let metrics = self.font.metrics(ch, size);
            width += metrics.advance_width;
            if metrics.height > 0 {
                let top = ascent - (metrics.ymin as f32 + metrics.height as f32);
                let bottom = ascent - metrics.ymin as f32;
                ink = Some(match ink {
                    Some((t, b)) => (t.min(top), b.max(bottom)),
                    None => (top, bottom),
                });
            }
            previous = Some(ch);
        }

        let (ink_top, ink_bottom) = ink.unwrap_or((0.0, 0.0));
        let offset = if width > 0.0 { self.bold_offset(size) } else { 0.0 };
        TextExtent {
            width: width + offset,
            ink_top,
            ink_bottom,
        }
    }

    fn draw(&self, pixmap: &mut Pixmap, x: f32, y: f32, text: &str, size: f32, color: [u8; 4]) {
        self.draw_pass(pixmap, x, y, text, size, color);
        let offset = self.bold_offset(size);
        if offset > 0.0 {
            self.draw_pass(pixmap, x + offset, y, text, size, color);
        }
    }

    fn missing_glyphs(&self, text: &str) -> Vec<char> {
        let mut missing = Vec::new();
        for ch in text.chars() {
            if ch.is_whitespace() || missing.contains(&ch) {
                continue;
            }
            if self.font.lookup_glyph_index(ch) == 0 {
                missing.push(ch);
            }
        }
        missing
    }
}

/// Portable fallback: fixed-advance outlined boxes, one per visible character.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockGlyphs {
    pub bold: bool,
}

impl BlockGlyphs {
    pub const ADVANCE: f32 = 0.6;
    pub const ASCENT: f32 = 0.8;
    pub const CAP_TOP: f32 = 0.1;
}

impl GlyphBackend for BlockGlyphs {
    fn label(&self) -> &str {
        if self.bold {
            "builtin-block-bold"
        } else {
            "builtin-block"
        }
    }

    fn measure(&self, text: &str, size: f32) -> TextExtent {
        let count = text.chars().count() as f32;
        let has_ink = text.chars().any(|ch| !ch.is_whitespace());
        TextExtent {
            width: count * size * Self::ADVANCE,
            ink_top: if has_ink { size * Self::CAP_TOP } else { 0.0 },
            ink_bottom: if has_ink { size * Self::ASCENT } else { 0.0 },
        }
    }

    fn draw(&self, pixmap: &mut Pixmap, x: f32, y: f32, text: &str, size: f32, color: [u8; 4]) {
        let advance = size * Self::ADVANCE;
        let stroke = if self.bold {
            (size / 9.0).max(1.5)
        } else {
            (size / 14.0).max(1.0)
        };
        for (index, ch) in text.chars().enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let gx = x + index as f32 * advance + advance * 0.15;
            let gy = y + size * Self::CAP_TOP;
            stroke_box(
                pixmap,
                gx,
                gy,
                advance * 0.7,
                size * (Self::ASCENT - Self::CAP_TOP),
                stroke,
                color,
            );
        }
    }
}

/// Regular and bold faces used by one card render.
pub struct FontSet {
    pub regular: Box<dyn GlyphBackend>,
    pub bold: Box<dyn GlyphBackend>,
    pub fallbacks: Vec<AssetFallback>,
}

impl FontSet {
    pub fn builtin() -> Self {
        Self {
            regular: Box::new(BlockGlyphs { bold: false }),
            bold: Box::new(BlockGlyphs { bold: true }),
            fallbacks: vec![AssetFallback::GlyphRenderer],
        }
    }

    pub fn uses_builtin_glyphs(&self) -> bool {
        self.fallbacks.contains(&AssetFallback::GlyphRenderer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontWeight {
    Regular,
    Bold,
}

/// Candidate font files in priority order: configured dir, bundled dir, system fonts.
pub fn font_search_paths(font_dir: Option<&Path>, weight: FontWeight) -> Vec<PathBuf> {
    let (files, system): (&[&str], &[&str]) = match weight {
        FontWeight::Regular => (&REGULAR_FONT_FILES, &SYSTEM_REGULAR_FONTS),
        FontWeight::Bold => (&BOLD_FONT_FILES, &SYSTEM_BOLD_FONTS),
    };
    let bundled = Path::new(env!("CARGO_MANIFEST_DIR")).join(BUNDLED_FONT_DIR_REL);

    let mut paths = Vec::new();
    for dir in font_dir.into_iter().chain(std::iter::once(bundled.as_path())) {
        paths.extend(files.iter().map(|name| dir.join(name)));
    }
    paths.extend(system.iter().map(PathBuf::from));
    paths
}

fn load_first(candidates: &[PathBuf]) -> Option<(FontdueFace, PathBuf)> {
    for path in candidates {
        if !path.is_file() {
            continue;
        }
        match FontdueFace::from_path(path) {
            Ok(face) => {
                debug!(font = %path.display(), "loaded font");
                return Some((face, path.clone()));
            }
            Err(error) => warn!(font = %path.display(), %error, "skipping unreadable font"),
        }
    }
    None
}

/// Load regular and bold faces. Never fails: missing fonts degrade to emboldened regular
/// or to the built-in block glyphs, and each substitution is recorded.
pub fn load_font_set(font_dir: Option<&Path>) -> FontSet {
    let Some((regular, regular_path)) =
        load_first(&font_search_paths(font_dir, FontWeight::Regular))
    else {
        warn!("{}", AssetFallback::GlyphRenderer);
        return FontSet::builtin();
    };

    let mut fallbacks = Vec::new();
    let bold = match load_first(&font_search_paths(font_dir, FontWeight::Bold)) {
        Some((face, _)) => face,
        None => {
            warn!("{}", AssetFallback::BoldWeight);
            fallbacks.push(AssetFallback::BoldWeight);
            match FontdueFace::from_path(&regular_path) {
                Ok(face) => face.emboldened(),
                Err(_) => {
                    return FontSet {
                        regular: Box::new(regular),
                        bold: Box::new(BlockGlyphs { bold: true }),
                        fallbacks,
                    }
                }
            }
        }
    };

    FontSet {
        regular: Box::new(regular),
        bold: Box::new(bold),
        fallbacks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_glyph_width_is_fixed_advance() {
        let glyphs = BlockGlyphs::default();
        let extent = glyphs.measure("Hello world", 42.0);
        assert!((extent.width - 11.0 * 42.0 * 0.6).abs() < 1e-3);
        assert!((extent.ink_height() - 42.0 * 0.7).abs() < 1e-3);
        assert_eq!(glyphs.measure("   ", 42.0).ink_height(), 0.0);
    }

    #[test]
    fn block_glyphs_draw_inside_their_advance() {
        let mut pixmap = Pixmap::new(100, 40).unwrap();
        crate::raster::clear(&mut pixmap, [0, 0, 0, 255]);
        BlockGlyphs::default().draw(&mut pixmap, 0.0, 0.0, "A", 30.0, [255, 255, 255, 255]);
        let lit = (0..100)
            .flat_map(|x| (0..40).map(move |y| (x, y)))
            .filter(|&(x, y)| crate::raster::pixel_at(&pixmap, x, y) != Some([0, 0, 0, 255]))
            .collect::<Vec<_>>();
        assert!(!lit.is_empty());
        assert!(lit.iter().all(|&(x, _)| x <= 18));
    }

    #[test]
    fn search_paths_put_configured_dir_first() {
        let dir = Path::new("/tmp/custom-fonts");
        let paths = font_search_paths(Some(dir), FontWeight::Bold);
        assert_eq!(paths[0], dir.join("Inter-Bold.ttf"));
        assert!(paths
            .iter()
            .any(|path| path.ends_with("DejaVuSans-Bold.ttf")));
    }

    #[test]
    fn builtin_font_set_records_glyph_fallback() {
        let fonts = FontSet::builtin();
        assert!(fonts.uses_builtin_glyphs());
        assert_eq!(fonts.regular.label(), "builtin-block");
    }

    #[test]
    fn garbage_font_bytes_are_rejected_not_panicking() {
        assert!(FontdueFace::from_bytes(vec![0, 1, 2, 3], "garbage").is_err());
    }
}
