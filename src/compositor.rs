//! Frame compositor: places the card, its outline and the separator on a canvas frame.
//! The video region is left as background; the encoder overlays the clip there.

use tiny_skia::{IntRect, Pixmap, PixmapPaint, Transform};

use crate::card::CardImage;
use crate::error::{ReelError, ReelResult};
use crate::layout::CanvasGeometry;
use crate::raster::{clear, draw_rect_border, fill_rect, to_rgba_bytes};
use crate::schema::CanvasConfig;

pub fn compose(
    card: &CardImage,
    geometry: &CanvasGeometry,
    canvas: &CanvasConfig,
) -> ReelResult<Pixmap> {
    let mut frame = Pixmap::new(canvas.width, canvas.height).ok_or_else(|| {
        ReelError::config(format!(
            "cannot allocate a {}x{} canvas",
            canvas.width, canvas.height
        ))
    })?;
    clear(&mut frame, canvas.background.rgba());

    // Only the top text_area_height rows of the card are shown.
    let visible_h = geometry.text_area_height.min(card.height());
    if let Some(visible) = IntRect::from_xywh(0, 0, card.width(), visible_h)
        .and_then(|region| card.pixmap().clone_rect(region))
    {
        frame.draw_pixmap(
            geometry.text_rect.x as i32,
            geometry.text_rect.y as i32,
            visible.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }

    let card_rect = geometry.card_rect;
    draw_rect_border(
        &mut frame,
        card_rect.x as f32,
        card_rect.y as f32,
        card_rect.width as f32,
        card_rect.height as f32,
        canvas.border_width as f32,
        canvas.border_color.rgba(),
    );

    let separator = geometry.separator_rect;
    fill_rect(
        &mut frame,
        separator.x as f32,
        separator.y as f32,
        separator.width as f32,
        separator.height as f32,
        canvas.separator_color.rgba(),
    );

    Ok(frame)
}

/// Straight-alpha RGBA bytes of a composed frame, ready for `-pix_fmt rgba` on stdin.
pub fn canvas_rgba(frame: &Pixmap) -> Vec<u8> {
    to_rgba_bytes(frame)
}
