//! Card rasterizer: profile header plus wrapped body text on a solid background.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use serde::Deserialize;
use tiny_skia::{
    ColorU8, FillRule, IntSize, Mask, PathBuilder, Pixmap, PixmapPaint, Transform,
};
use tracing::{debug, warn};

use crate::error::{ReelError, ReelResult};
use crate::font_assets::{AssetFallback, FontSet};
use crate::raster::{clear, fill_circle, fill_oval, stroke_polyline};
use crate::schema::{CardStyle, HexColor};
use crate::wrap::{truncate_lines, wrap_text};

/// Body text of one job, already stripped of links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextContent {
    pub body: String,
    pub wrap_width_px: u32,
    pub font_size_px: u32,
}

impl TextContent {
    pub fn new(body: impl Into<String>, wrap_width_px: u32, font_size_px: u32) -> ReelResult<Self> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(ReelError::input("post text is empty"));
        }
        if wrap_width_px == 0 {
            return Err(ReelError::input("wrap width must be > 0"));
        }
        if font_size_px == 0 {
            return Err(ReelError::input("font size must be > 0"));
        }
        Ok(Self {
            body,
            wrap_width_px,
            font_size_px,
        })
    }
}

/// Profile fields as they arrive from user input.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileSpec {
    pub display_name: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub avatar_path: Option<PathBuf>,
}

/// Author header. Exists only when the display name is non-empty.
#[derive(Debug, Clone)]
pub struct Profile {
    pub display_name: String,
    pub handle: Option<String>,
    /// Square avatar, already center-cropped.
    pub avatar: Option<RgbaImage>,
    avatar_issue: Option<String>,
}

impl Profile {
    pub fn new(
        display_name: &str,
        handle: Option<&str>,
        avatar: Option<RgbaImage>,
    ) -> Option<Self> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return None;
        }
        let handle = handle
            .map(str::trim)
            .filter(|handle| !handle.is_empty() && *handle != "@")
            .map(str::to_owned);
        Some(Self {
            display_name: display_name.to_owned(),
            handle,
            avatar,
            avatar_issue: None,
        })
    }

    /// Build a profile, decoding the avatar once. An unreadable avatar is recorded and
    /// replaced by the placeholder glyph at render time.
    pub fn from_spec(spec: &ProfileSpec) -> Option<Self> {
        let mut profile = Self::new(&spec.display_name, spec.handle.as_deref(), None)?;
        if let Some(path) = &spec.avatar_path {
            match load_avatar(path) {
                Ok(avatar) => profile.avatar = Some(avatar),
                Err(error) => {
                    warn!(avatar = %path.display(), %error, "avatar could not be decoded");
                    profile.avatar_issue = Some(error.to_string());
                }
            }
        }
        Some(profile)
    }

    /// Handle text as displayed, always prefixed with `@`.
    pub fn handle_label(&self) -> Option<String> {
        self.handle.as_ref().map(|handle| {
            if handle.starts_with('@') {
                handle.clone()
            } else {
                format!("@{handle}")
            }
        })
    }
}

pub fn load_avatar(path: &Path) -> ReelResult<RgbaImage> {
    let image = image::open(path)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ReelError::input(format!(
            "avatar image is empty: {}",
            path.display()
        )));
    }
    Ok(crop_square(&image))
}

/// Largest centered square of the image.
pub fn crop_square(image: &DynamicImage) -> RgbaImage {
    let side = image.width().min(image.height());
    let left = (image.width() - side) / 2;
    let top = (image.height() - side) / 2;
    image.crop_imm(left, top, side, side).to_rgba8()
}

pub struct CardImage {
    pixmap: Pixmap,
    line_count: usize,
}

impl CardImage {
    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn save_png(&self, path: &Path) -> ReelResult<()> {
        self.pixmap.save_png(path).map_err(|error| {
            ReelError::Io(std::io::Error::other(format!(
                "failed to write card image {}: {error}",
                path.display()
            )))
        })
    }
}

pub fn line_height(font_size: u32, spacing: f32) -> u32 {
    font_size + (font_size as f32 * spacing).round() as u32
}

pub fn profile_block_height(style: &CardStyle) -> u32 {
    style.avatar_diameter + style.header_gap
}

/// Card height for `line_count` body lines. This is the only value layout needs.
pub fn card_height(style: &CardStyle, line_count: usize, font_size: u32, has_profile: bool) -> u32 {
    let profile_block = if has_profile {
        profile_block_height(style)
    } else {
        0
    };
    let body = (line_count as u32).saturating_mul(line_height(font_size, style.line_spacing));
    style
        .padding_top
        .saturating_add(profile_block)
        .saturating_add(body)
        .saturating_add(style.padding_bottom)
}

/// Positions of everything in the profile row, in card pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderLayout {
    pub avatar_x: f32,
    pub avatar_y: f32,
    pub avatar_diameter: f32,
    pub name_x: f32,
    pub name_y: f32,
    pub name_size: f32,
    pub name_width: f32,
    pub handle: Option<(String, f32, f32)>,
    pub handle_size: f32,
    pub badge_cx: f32,
    pub badge_cy: f32,
    pub badge_radius: f32,
}

pub struct CardRasterizer<'a> {
    fonts: &'a FontSet,
    style: &'a CardStyle,
}

impl<'a> CardRasterizer<'a> {
    pub fn new(fonts: &'a FontSet, style: &'a CardStyle) -> Self {
        Self { fonts, style }
    }

    pub fn wrap_width(&self, card_width: u32) -> u32 {
        card_width
            .saturating_sub(self.style.padding_x.saturating_mul(2))
            .max(1)
    }

    pub fn wrap(&self, content: &TextContent) -> Vec<String> {
        let lines = wrap_text(
            &content.body,
            self.fonts.regular.as_ref(),
            content.font_size_px as f32,
            content.wrap_width_px as f32,
        );
        truncate_lines(lines, self.style.max_lines)
    }

    pub fn header_layout(&self, profile: &Profile, font_size: u32) -> HeaderLayout {
        let style = self.style;
        let diameter = style.avatar_diameter as f32;
        let avatar_x = style.padding_x as f32;
        let avatar_y = style.padding_top as f32;
        let name_x = avatar_x + diameter + style.avatar_text_gap as f32;
        let name_size = (font_size as f32 * style.name_scale).round().max(1.0);
        let handle_size = (font_size as f32 * style.handle_scale).round().max(1.0);

        let name_extent = self.fonts.bold.measure(&profile.display_name, name_size);
        let name_h = if name_extent.ink_height() > 0.0 {
            name_extent.ink_height()
        } else {
            name_size * 0.7
        };

        let (ink_start, handle) = match profile.handle_label() {
            Some(label) => {
                let handle_extent = self.fonts.regular.measure(&label, handle_size);
                let gap = style.name_handle_gap as f32;
                let total = name_h + gap + handle_extent.ink_height();
                let start = avatar_y + ((diameter - total) / 2.0).floor();
                let handle_y = start + name_h + gap - handle_extent.ink_top;
                (start, Some((label, name_x, handle_y)))
            }
            None => (avatar_y + ((diameter - name_h) / 2.0).floor(), None),
        };

        let badge_radius = (name_h * style.badge_ratio).round().max(2.0);
        HeaderLayout {
            avatar_x,
            avatar_y,
            avatar_diameter: diameter,
            name_x,
            name_y: ink_start - name_extent.ink_top,
            name_size,
            name_width: name_extent.width,
            handle,
            handle_size,
            badge_cx: name_x + name_extent.width + style.badge_gap as f32 + badge_radius,
            badge_cy: ink_start + name_h / 2.0,
            badge_radius,
        }
    }

    pub fn rasterize(
        &self,
        lines: &[String],
        profile: Option<&Profile>,
        font_size: u32,
        width: u32,
        background: [u8; 4],
    ) -> ReelResult<CardImage> {
        let style = self.style;
        let height = card_height(style, lines.len(), font_size, profile.is_some());
        let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
            ReelError::input(format!("cannot allocate a {width}x{height} card image"))
        })?;
        clear(&mut pixmap, background);

        let mut y = style.padding_top as f32;
        if let Some(profile) = profile {
            let header = self.header_layout(profile, font_size);
            self.draw_header(&mut pixmap, profile, &header);
            y += profile_block_height(style) as f32;
        }

        let size = font_size as f32;
        let line_h = line_height(font_size, style.line_spacing) as f32;
        let color = style.text_primary.rgba();
        for (index, line) in lines.iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            let missing = self.fonts.regular.missing_glyphs(line);
            if !missing.is_empty() {
                debug!(?missing, "characters without glyphs in the body font");
            }
            self.fonts.regular.draw(
                &mut pixmap,
                style.padding_x as f32,
                y + index as f32 * line_h,
                line,
                size,
                color,
            );
        }

        Ok(CardImage {
            pixmap,
            line_count: lines.len(),
        })
    }

    fn draw_header(&self, pixmap: &mut Pixmap, profile: &Profile, header: &HeaderLayout) {
        let style = self.style;
        let diameter = style.avatar_diameter;
        let drawn = profile.avatar.as_ref().is_some_and(|avatar| {
            draw_avatar(
                pixmap,
                avatar,
                header.avatar_x as i32,
                header.avatar_y as i32,
                diameter,
            )
        });
        if !drawn {
            draw_placeholder(pixmap, header.avatar_x, header.avatar_y, header.avatar_diameter, style);
        }

        self.fonts.bold.draw(
            pixmap,
            header.name_x,
            header.name_y,
            &profile.display_name,
            header.name_size,
            style.text_primary.rgba(),
        );
        draw_verified_badge(
            pixmap,
            header.badge_cx,
            header.badge_cy,
            header.badge_radius,
            style.badge_color.rgba(),
            style.badge_mark_color.rgba(),
        );
        if let Some((label, x, y)) = &header.handle {
            self.fonts.regular.draw(
                pixmap,
                *x,
                *y,
                label,
                header.handle_size,
                style.text_secondary.rgba(),
            );
        }
    }
}

/// Paste the avatar resized to `diameter` through a circular alpha mask.
fn draw_avatar(pixmap: &mut Pixmap, avatar: &RgbaImage, x: i32, y: i32, diameter: u32) -> bool {
    let resized = image::imageops::resize(avatar, diameter, diameter, FilterType::Lanczos3);
    let mut data = Vec::with_capacity(resized.as_raw().len());
    for pixel in resized.pixels() {
        let color = ColorU8::from_rgba(pixel[0], pixel[1], pixel[2], pixel[3]).premultiply();
        data.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }

    let Some(mut avatar_pixmap) =
        IntSize::from_wh(diameter, diameter).and_then(|size| Pixmap::from_vec(data, size))
    else {
        return false;
    };
    let radius = diameter as f32 / 2.0;
    let (Some(mut mask), Some(circle)) = (
        Mask::new(diameter, diameter),
        PathBuilder::from_circle(radius, radius, radius),
    ) else {
        return false;
    };
    mask.fill_path(&circle, FillRule::Winding, true, Transform::identity());
    avatar_pixmap.apply_mask(&mask);

    pixmap.draw_pixmap(
        x,
        y,
        avatar_pixmap.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );
    true
}

/// Neutral silhouette: head and shoulders inside a gray disc.
fn draw_placeholder(pixmap: &mut Pixmap, x: f32, y: f32, size: f32, style: &CardStyle) {
    let background = style.placeholder_background.rgba();
    let figure = style.placeholder_figure.rgba();
    fill_circle(pixmap, x + size / 2.0, y + size / 2.0, size / 2.0, background);

    let inner = (size * 0.55).floor();
    let offset = ((size - inner) / 2.0).floor();
    let lift = (size / 10.0).floor();
    fill_oval(pixmap, x + offset, y + offset - lift, inner, inner, figure);

    let body_w = (size * 0.7).floor();
    let body_h = (size * 0.35).floor();
    let body_x = x + ((size - body_w) / 2.0).floor();
    let body_y = y + size - body_h - (size / 8.0).floor();
    fill_oval(pixmap, body_x, body_y, body_w, body_h, figure);
}

/// Filled disc with a three-point check mark.
fn draw_verified_badge(
    pixmap: &mut Pixmap,
    cx: f32,
    cy: f32,
    radius: f32,
    disc: [u8; 4],
    mark: [u8; 4],
) {
    fill_circle(pixmap, cx, cy, radius, disc);
    let s = radius * 0.45;
    let points = [
        (cx - s * 0.85, cy - s * 0.05),
        (cx - s * 0.25, cy + s * 0.65),
        (cx + s * 0.95, cy - s * 0.60),
    ];
    let width = (radius * 0.28).round().max(2.0);
    stroke_polyline(pixmap, &points, width, mark);
}

/// The rasterizer invocation record: everything needed to produce one card image.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CardRequest {
    pub text: String,
    pub font_size: u32,
    /// Card width in pixels; the text wraps inside it minus horizontal padding.
    pub max_width: u32,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default = "default_bg_hex")]
    pub bg_hex: String,
    #[serde(default)]
    pub profile: Option<ProfileSpec>,
}

fn default_bg_hex() -> String {
    "000000".to_owned()
}

pub struct RenderedCard {
    pub image: CardImage,
    pub lines: Vec<String>,
    pub fallbacks: Vec<AssetFallback>,
}

impl RenderedCard {
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

pub fn render_card(
    request: &CardRequest,
    fonts: &FontSet,
    style: &CardStyle,
) -> ReelResult<RenderedCard> {
    let background = HexColor::parse(&request.bg_hex)
        .map_err(|_| ReelError::input(format!("invalid background color '{}'", request.bg_hex)))?
        .rgba();
    let profile = request.profile.as_ref().and_then(Profile::from_spec);
    let rasterizer = CardRasterizer::new(fonts, style);
    let content = TextContent::new(
        request.text.as_str(),
        rasterizer.wrap_width(request.max_width),
        request.font_size,
    )?;
    let lines = rasterizer.wrap(&content);
    let image = rasterizer.rasterize(
        &lines,
        profile.as_ref(),
        content.font_size_px,
        request.max_width,
        background,
    )?;

    let mut fallbacks = fonts.fallbacks.clone();
    if let Some(reason) = profile.as_ref().and_then(|p| p.avatar_issue.clone()) {
        fallbacks.push(AssetFallback::Avatar { reason });
    }

    if let Some(path) = &request.output_path {
        image.save_png(path)?;
    }
    debug!(
        lines = lines.len(),
        height = image.height(),
        "rasterized card"
    );

    Ok(RenderedCard {
        image,
        lines,
        fallbacks,
    })
}

/// Render the request to its `output_path` and return the image height.
pub fn render_card_to_file(
    request: &CardRequest,
    fonts: &FontSet,
    style: &CardStyle,
) -> ReelResult<u32> {
    if request.output_path.is_none() {
        return Err(ReelError::input("card request has no output_path"));
    }
    Ok(render_card(request, fonts, style)?.height())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::pixel_at;

    fn fonts() -> FontSet {
        FontSet::builtin()
    }

    fn lines(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("line {i}")).collect()
    }

    #[test]
    fn single_line_card_height_is_padding_plus_one_line() {
        let fonts = fonts();
        let style = CardStyle::default();
        let rasterizer = CardRasterizer::new(&fonts, &style);
        let content = TextContent::new("Hello world", 600, 42).unwrap();
        let wrapped = rasterizer.wrap(&content);
        assert_eq!(wrapped, vec!["Hello world"]);

        let image = rasterizer
            .rasterize(&wrapped, None, 42, 1008, [0, 0, 0, 255])
            .unwrap();
        assert_eq!(line_height(42, 0.40), 59);
        assert_eq!(image.height(), 44 + 59 + 44);
        assert_eq!(image.width(), 1008);
    }

    #[test]
    fn height_is_monotonic_in_line_count() {
        let style = CardStyle::default();
        for has_profile in [false, true] {
            let mut previous = 0;
            for count in 0..40 {
                let height = card_height(&style, count, 48, has_profile);
                assert!(height >= previous);
                previous = height;
            }
        }
    }

    #[test]
    fn profile_adds_exactly_the_header_block() {
        let style = CardStyle::default();
        assert_eq!(
            card_height(&style, 3, 48, true) - card_height(&style, 3, 48, false),
            120 + 28
        );
    }

    #[test]
    fn blank_display_name_means_no_profile() {
        assert!(Profile::new("   ", Some("jane"), None).is_none());
        let profile = Profile::new("Jane", Some("jane"), None).unwrap();
        assert_eq!(profile.handle_label().as_deref(), Some("@jane"));
        let profile = Profile::new("Jane", Some("@jane"), None).unwrap();
        assert_eq!(profile.handle_label().as_deref(), Some("@jane"));
        assert!(Profile::new("Jane", Some(""), None)
            .unwrap()
            .handle_label()
            .is_none());
    }

    #[test]
    fn profile_without_avatar_draws_placeholder_and_badge_right_of_name() {
        let fonts = fonts();
        let style = CardStyle::default();
        let rasterizer = CardRasterizer::new(&fonts, &style);
        let profile = Profile::new("Jane Doe", Some("janedoe"), None).unwrap();

        let image = rasterizer
            .rasterize(&lines(2), Some(&profile), 48, 1008, [0, 0, 0, 255])
            .expect("rasterize should not fail without an avatar");

        let placeholder = pixel_at(image.pixmap(), 48 + 8, 44 + 60).unwrap();
        assert_eq!(placeholder, [51, 51, 51, 255]);

        let header = rasterizer.header_layout(&profile, 48);
        assert!(header.badge_cx - header.badge_radius >= header.name_x + header.name_width);
        let badge = pixel_at(
            image.pixmap(),
            header.badge_cx.round() as u32,
            (header.badge_cy - header.badge_radius * 0.7).round() as u32,
        )
        .unwrap();
        assert_eq!(badge, [0x1D, 0x9B, 0xF0, 255]);

        let (label, _, handle_y) = header.handle.clone().unwrap();
        assert_eq!(label, "@janedoe");
        assert!(handle_y > header.name_y);
    }

    #[test]
    fn avatar_is_masked_to_a_circle() {
        let fonts = fonts();
        let style = CardStyle::default();
        let rasterizer = CardRasterizer::new(&fonts, &style);
        let avatar = RgbaImage::from_pixel(10, 10, image::Rgba([255, 0, 0, 255]));
        let profile = Profile::new("Jane", None, Some(avatar)).unwrap();

        let image = rasterizer
            .rasterize(&lines(1), Some(&profile), 42, 1008, [0, 0, 0, 255])
            .unwrap();
        // Center of the avatar is red, its bounding-box corner stays background.
        assert_eq!(pixel_at(image.pixmap(), 48 + 60, 44 + 60), Some([255, 0, 0, 255]));
        assert_eq!(pixel_at(image.pixmap(), 48 + 1, 44 + 1), Some([0, 0, 0, 255]));
    }

    #[test]
    fn crop_square_takes_the_centered_square() {
        let mut image = RgbaImage::from_pixel(30, 10, image::Rgba([0, 0, 0, 255]));
        image.put_pixel(15, 5, image::Rgba([9, 9, 9, 255]));
        let square = crop_square(&DynamicImage::ImageRgba8(image));
        assert_eq!(square.dimensions(), (10, 10));
        assert_eq!(square.get_pixel(5, 5).0, [9, 9, 9, 255]);
    }

    #[test]
    fn unreadable_avatar_falls_back_to_placeholder() {
        let fonts = fonts();
        let style = CardStyle::default();
        let request = CardRequest {
            text: "hi".to_owned(),
            font_size: 48,
            max_width: 1008,
            output_path: None,
            bg_hex: "000000".to_owned(),
            profile: Some(ProfileSpec {
                display_name: "Jane".to_owned(),
                handle: None,
                avatar_path: Some(PathBuf::from("/definitely/missing/avatar.png")),
            }),
        };
        let card = render_card(&request, &fonts, &style).expect("missing avatar is not fatal");
        assert!(card
            .fallbacks
            .iter()
            .any(|fallback| matches!(fallback, AssetFallback::Avatar { .. })));
        assert_eq!(card.height(), card_height(&style, 1, 48, true));
    }

    #[test]
    fn avatar_decode_failures_keep_the_image_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avatar.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        assert!(matches!(load_avatar(&path), Err(ReelError::Image(_))));
        assert!(matches!(
            load_avatar(Path::new("/definitely/missing/avatar.png")),
            Err(ReelError::Image(_))
        ));
    }

    #[test]
    fn max_lines_policy_truncates_before_height_is_computed() {
        let fonts = fonts();
        let mut style = CardStyle::default();
        style.max_lines = Some(2);
        let rasterizer = CardRasterizer::new(&fonts, &style);
        let content = TextContent::new("a\nb\nc\nd", 600, 42).unwrap();
        assert_eq!(rasterizer.wrap(&content), vec!["a", "b"]);
    }

    #[test]
    fn empty_text_is_an_input_error() {
        assert!(matches!(
            TextContent::new("  \n ", 600, 42),
            Err(ReelError::Input(_))
        ));
    }
}
