//! Pixel helpers shared by the card rasterizer and the frame compositor.
//!
//! Colors are straight-alpha `[r, g, b, a]` arrays; the pixmaps are tiny-skia's
//! premultiplied RGBA.

use tiny_skia::{
    Color, FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, PremultipliedColorU8, Rect,
    Stroke, Transform,
};

fn paint(color: [u8; 4]) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color[0], color[1], color[2], color[3]);
    paint.anti_alias = true;
    paint
}

pub fn clear(pixmap: &mut Pixmap, color: [u8; 4]) {
    pixmap.fill(Color::from_rgba8(color[0], color[1], color[2], color[3]));
}

pub fn fill_rect(pixmap: &mut Pixmap, x: f32, y: f32, w: f32, h: f32, color: [u8; 4]) {
    let Some(rect) = Rect::from_xywh(x, y, w, h) else {
        return;
    };
    pixmap.fill_rect(rect, &paint(color), Transform::identity(), None);
}

/// Outline drawn inside the rectangle bounds, `thickness` pixels wide.
pub fn draw_rect_border(
    pixmap: &mut Pixmap,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    thickness: f32,
    color: [u8; 4],
) {
    let t = thickness.min(w / 2.0).min(h / 2.0);
    if t <= 0.0 {
        return;
    }
    fill_rect(pixmap, x, y, w, t, color);
    fill_rect(pixmap, x, y + h - t, w, t, color);
    fill_rect(pixmap, x, y + t, t, h - 2.0 * t, color);
    fill_rect(pixmap, x + w - t, y + t, t, h - 2.0 * t, color);
}

pub fn fill_circle(pixmap: &mut Pixmap, cx: f32, cy: f32, radius: f32, color: [u8; 4]) {
    let Some(path) = PathBuilder::from_circle(cx, cy, radius) else {
        return;
    };
    pixmap.fill_path(
        &path,
        &paint(color),
        FillRule::Winding,
        Transform::identity(),
        None,
    );
}

pub fn fill_oval(pixmap: &mut Pixmap, x: f32, y: f32, w: f32, h: f32, color: [u8; 4]) {
    let Some(path) = Rect::from_xywh(x, y, w, h).and_then(PathBuilder::from_oval) else {
        return;
    };
    pixmap.fill_path(
        &path,
        &paint(color),
        FillRule::Winding,
        Transform::identity(),
        None,
    );
}

/// Open polyline with round caps and joins.
pub fn stroke_polyline(pixmap: &mut Pixmap, points: &[(f32, f32)], width: f32, color: [u8; 4]) {
    let Some((&(x0, y0), rest)) = points.split_first() else {
        return;
    };
    let mut builder = PathBuilder::new();
    builder.move_to(x0, y0);
    for &(x, y) in rest {
        builder.line_to(x, y);
    }
    let Some(path) = builder.finish() else {
        return;
    };
    let stroke = Stroke {
        width,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Stroke::default()
    };
    pixmap.stroke_path(&path, &paint(color), &stroke, Transform::identity(), None);
}

pub fn stroke_box(pixmap: &mut Pixmap, x: f32, y: f32, w: f32, h: f32, width: f32, color: [u8; 4]) {
    let Some(path) = Rect::from_xywh(x, y, w, h).map(PathBuilder::from_rect) else {
        return;
    };
    let stroke = Stroke {
        width,
        ..Stroke::default()
    };
    pixmap.stroke_path(&path, &paint(color), &stroke, Transform::identity(), None);
}

/// Blend an 8-bit coverage bitmap (a rasterized glyph) in `color` at `(x, y)`.
pub fn blend_coverage(
    pixmap: &mut Pixmap,
    x: i32,
    y: i32,
    width: usize,
    height: usize,
    coverage: &[u8],
    color: [u8; 4],
) {
    let frame_width = pixmap.width() as i32;
    let frame_height = pixmap.height() as i32;
    let pixels = pixmap.pixels_mut();

    for row in 0..height {
        let py = y + row as i32;
        if py < 0 || py >= frame_height {
            continue;
        }
        for col in 0..width {
            let px = x + col as i32;
            if px < 0 || px >= frame_width {
                continue;
            }
            let mask = coverage[row * width + col];
            if mask == 0 {
                continue;
            }
            let alpha = ((u16::from(mask) * u16::from(color[3])) / 255) as u8;
            let idx = (py * frame_width + px) as usize;
            pixels[idx] = blend_pixel(pixels[idx], [color[0], color[1], color[2], alpha]);
        }
    }
}

/// Source-over of a straight-alpha color onto a premultiplied pixel.
fn blend_pixel(dst: PremultipliedColorU8, src: [u8; 4]) -> PremultipliedColorU8 {
    let alpha = u16::from(src[3]);
    if alpha == 0 {
        return dst;
    }
    let inv_alpha = 255_u16.saturating_sub(alpha);
    let mix = |src_c: u8, dst_c: u8| -> u8 {
        ((u16::from(src_c) * alpha + u16::from(dst_c) * inv_alpha + 127) / 255) as u8
    };
    let out_alpha = (alpha + (u16::from(dst.alpha()) * inv_alpha + 127) / 255).min(255) as u8;
    let r = mix(src[0], dst.red()).min(out_alpha);
    let g = mix(src[1], dst.green()).min(out_alpha);
    let b = mix(src[2], dst.blue()).min(out_alpha);
    PremultipliedColorU8::from_rgba(r, g, b, out_alpha).unwrap_or(dst)
}

/// Straight-alpha RGBA bytes, row-major, as expected by `-pix_fmt rgba`.
pub fn to_rgba_bytes(pixmap: &Pixmap) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixmap.pixels().len() * 4);
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        out.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }
    out
}

pub fn pixel_at(pixmap: &Pixmap, x: u32, y: u32) -> Option<[u8; 4]> {
    let color = pixmap.pixel(x, y)?.demultiply();
    Some([color.red(), color.green(), color.blue(), color.alpha()])
}
