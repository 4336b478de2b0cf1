use crate::font_assets::GlyphBackend;

/// Greedy word wrap against measured pixel widths.
///
/// Paragraphs (split on `\n`) wrap independently and a blank paragraph yields one empty
/// line. A word wider than `max_width` sits alone on its line instead of being split.
pub fn wrap_text(text: &str, backend: &dyn GlyphBackend, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let paragraph = paragraph.trim_end_matches('\r');
        if paragraph.trim().is_empty() {
            lines.push(String::new());
            continue;
        }

        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            if current.is_empty() {
                current.push_str(word);
                continue;
            }
            let candidate = format!("{current} {word}");
            if backend.text_width(&candidate, size) <= max_width {
                current = candidate;
            } else {
                lines.push(std::mem::take(&mut current));
                current.push_str(word);
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }

    lines
}

/// Keep at most `max_lines` lines when a cap is configured.
pub fn truncate_lines(mut lines: Vec<String>, max_lines: Option<usize>) -> Vec<String> {
    if let Some(limit) = max_lines {
        lines.truncate(limit);
    }
    lines
}
