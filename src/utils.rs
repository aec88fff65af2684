use std::time::Instant;


/// Char-boundary safe truncation with a trailing ellipsis.
#[inline]
pub fn safe_truncate_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}


/// Fills `{id}` and `{slug}` in a cache tag/path template. Templates that
/// need a slug yield `None` when the document has none.
pub fn render_target(template: &str, id: &str, slug: Option<&str>) -> Option<String> {
    if template.contains("{slug}") {
        let slug = slug?;
        Some(template.replace("{slug}", slug).replace("{id}", id))
    } else {
        Some(template.replace("{id}", id))
    }
}


#[inline]
pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
