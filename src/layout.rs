use serde::Serialize;

use crate::schema::CanvasConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn bottom(&self) -> u64 {
        u64::from(self.y) + u64::from(self.height)
    }

    pub fn right(&self) -> u64 {
        u64::from(self.x) + u64::from(self.width)
    }

    pub fn contains(&self, other: &PixelRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// Placement of every element on the canvas for one job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CanvasGeometry {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub card_rect: PixelRect,
    pub text_rect: PixelRect,
    pub separator_rect: PixelRect,
    pub video_rect: PixelRect,
    pub scale: f64,
    pub text_area_height: u32,
    /// The available video height was below the floor and was raised to it.
    pub video_floor_applied: bool,
    /// The card does not fit between the top margin and the canvas bottom.
    pub overflows_safe_area: bool,
}

impl CanvasGeometry {
    pub fn summary(&self) -> String {
        format!(
            "canvas={}x{} card={}x{}@({},{}) text_h={} video={}x{}@({},{}) scale={:.4}{}{}",
            self.canvas_width,
            self.canvas_height,
            self.card_rect.width,
            self.card_rect.height,
            self.card_rect.x,
            self.card_rect.y,
            self.text_area_height,
            self.video_rect.width,
            self.video_rect.height,
            self.video_rect.x,
            self.video_rect.y,
            self.scale,
            if self.video_floor_applied { " video_floor" } else { "" },
            if self.overflows_safe_area { " overflow" } else { "" },
        )
    }
}

/// Integer-only placement of the card and the letterboxed video.
///
/// Zero dimensions are treated as 1 so the function has no failure path. The video is
/// scaled uniformly to fit the card width and the height left under the text, floored to
/// even pixels for yuv420p.
pub fn compute_layout(
    card_image_height: u32,
    source_width: u32,
    source_height: u32,
    canvas: &CanvasConfig,
) -> CanvasGeometry {
    let canvas_w = i64::from(canvas.width);
    let canvas_h = i64::from(canvas.height);
    let top_margin = i64::from(canvas.top_margin);
    let side_margin = i64::from(canvas.side_margin);
    let separator = i64::from(canvas.separator_thickness);
    let source_w = i64::from(source_width.max(1));
    let source_h = i64::from(source_height.max(1));

    let card_w = (canvas_w - 2 * side_margin).max(2);
    let text_area_h = i64::from(card_image_height.max(1)).min(canvas_h / 2);

    let available_h =
        canvas_h - top_margin - text_area_h - i64::from(canvas.gap) - 2 * side_margin;
    let min_video_h = i64::from(canvas.min_video_height);
    let video_floor_applied = available_h < min_video_h;
    let video_max_h = available_h.max(min_video_h);

    // Compare card_w/source_w with video_max_h/source_h without going through floats.
    let (scaled_w, scaled_h, scale) = if card_w * source_h <= video_max_h * source_w {
        (card_w, source_h * card_w / source_w, card_w as f64 / source_w as f64)
    } else {
        (source_w * video_max_h / source_h, video_max_h, video_max_h as f64 / source_h as f64)
    };
    let video_w = even_floor(scaled_w);
    let video_h = even_floor(scaled_h);

    let card_h = text_area_h + separator + video_h;
    let card_x = side_margin;
    let card_y =
        (top_margin + (canvas_h - top_margin - card_h - side_margin).div_euclid(2)).max(0);

    let separator_y = card_y + text_area_h;
    let video_x = card_x + (card_w - video_w).div_euclid(2);
    let video_y = separator_y + separator;

    let overflows_safe_area = card_y < top_margin || card_y + card_h > canvas_h;

    CanvasGeometry {
        canvas_width: canvas.width,
        canvas_height: canvas.height,
        card_rect: rect(card_x, card_y, card_w, card_h),
        text_rect: rect(card_x, card_y, card_w, text_area_h),
        separator_rect: rect(card_x, separator_y, card_w, separator),
        video_rect: rect(video_x, video_y, video_w, video_h),
        scale,
        text_area_height: to_u32(text_area_h),
        video_floor_applied,
        overflows_safe_area,
    }
}

fn even_floor(value: i64) -> i64 {
    (value - value.rem_euclid(2)).max(2)
}

fn to_u32(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

fn rect(x: i64, y: i64, width: i64, height: i64) -> PixelRect {
    PixelRect {
        x: to_u32(x),
        y: to_u32(y),
        width: to_u32(width),
        height: to_u32(height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_clip_fills_card_width() {
        let geometry = compute_layout(200, 1920, 1080, &CanvasConfig::default());
        // available = 1920 - 180 - 200 - 4 - 72 = 1464, width bound wins.
        assert!((geometry.scale - 1008.0 / 1920.0).abs() < 1e-9);
        assert_eq!(geometry.video_rect.width, 1008);
        assert_eq!(geometry.video_rect.height, 566);
        assert_eq!(geometry.card_rect.height, 200 + 2 + 566);
        // 180 + (1920 - 180 - 768 - 36) / 2
        assert_eq!(geometry.card_rect.y, 648);
        assert_eq!(geometry.separator_rect.y, 848);
        assert_eq!(geometry.video_rect.y, 850);
        assert_eq!(geometry.video_rect.x, 36);
        assert!(!geometry.video_floor_applied);
        assert!(!geometry.overflows_safe_area);
    }

    #[test]
    fn portrait_clip_is_height_bound_and_centered() {
        let geometry = compute_layout(300, 1080, 1920, &CanvasConfig::default());
        let available = 1920 - 180 - 300 - 4 - 72;
        assert!((geometry.scale - available as f64 / 1920.0).abs() < 1e-9);
        assert_eq!(geometry.video_rect.height % 2, 0);
        assert_eq!(geometry.video_rect.width % 2, 0);
        assert!(geometry.video_rect.width < 1008);
        let left = geometry.video_rect.x - geometry.card_rect.x;
        let right = geometry.card_rect.right() - geometry.video_rect.right();
        assert!((left as i64 - right as i64).abs() <= 1);
    }

    #[test]
    fn text_area_is_capped_at_half_the_canvas() {
        let geometry = compute_layout(5000, 1920, 1080, &CanvasConfig::default());
        assert_eq!(geometry.text_area_height, 960);
        assert_eq!(geometry.text_rect.height, 960);
    }

    #[test]
    fn video_floor_is_flagged_when_space_runs_out() {
        let canvas = CanvasConfig {
            height: 800,
            ..CanvasConfig::default()
        };
        let geometry = compute_layout(500, 1080, 1920, &canvas);
        assert!(geometry.video_floor_applied);
        assert_eq!(geometry.video_rect.height, 200);
        assert_eq!(geometry.video_rect.width, 112);
        // 180 + (800 - 180 - 602 - 36) / 2 lands above the top margin.
        assert_eq!(geometry.card_rect.y, 171);
        assert!(geometry.overflows_safe_area);
    }

    #[test]
    fn zero_dimensions_do_not_panic() {
        let geometry = compute_layout(0, 0, 0, &CanvasConfig::default());
        assert!(geometry.video_rect.width >= 2);
        assert!(geometry.video_rect.height >= 2);
    }

    #[test]
    fn summary_mentions_the_video_rect() {
        let geometry = compute_layout(200, 1920, 1080, &CanvasConfig::default());
        assert!(geometry.summary().contains("video=1008x566@(36,850)"));
    }
}
