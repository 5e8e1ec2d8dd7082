//! Preview generation and its LRU memoization cache.
//!
//! Preview strategy, in priority order: prefer the pre-indexed
//! `content_preview`; otherwise clean a result snippet (strip highlight
//! marks, collapse whitespace runs); otherwise derive from full content
//! truncated at a word boundary after 70% of the max length; otherwise
//! fall back to the title.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

pub const DEFAULT_MAX_PREVIEW_LEN: usize = 150;
const TRUNCATE_AT_FRACTION: f64 = 0.7;

pub struct PreviewCache {
    cache: Mutex<LruCache<String, String>>,
}

impl PreviewCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Returns a cached preview for `note_id`, or computes, caches, and
    /// returns one using `compute` (the precedence chain described above).
    pub fn get_or_compute(
        &self,
        note_id: &str,
        content_preview: Option<&str>,
        snippet: Option<&str>,
        full_content: Option<&str>,
        title: &str,
        max_len: usize,
    ) -> String {
        let mut cache = self.cache.lock().unwrap();
        if let Some(hit) = cache.get(note_id) {
            return hit.clone();
        }

        let preview = compute_preview(content_preview, snippet, full_content, title, max_len);
        cache.put(note_id.to_string(), preview.clone());
        preview
    }

    pub fn invalidate(&self, note_id: &str) {
        self.cache.lock().unwrap().pop(note_id);
    }

    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn compute_preview(
    content_preview: Option<&str>,
    snippet: Option<&str>,
    full_content: Option<&str>,
    title: &str,
    max_len: usize,
) -> String {
    if let Some(p) = content_preview.filter(|s| !s.is_empty()) {
        return truncate_at_word_boundary(p, max_len);
    }
    if let Some(s) = snippet.filter(|s| !s.is_empty()) {
        return clean_snippet(s, max_len);
    }
    if let Some(c) = full_content.filter(|s| !s.is_empty()) {
        let cutoff = ((max_len as f64) * TRUNCATE_AT_FRACTION) as usize;
        return truncate_at_word_boundary(c, cutoff.max(1));
    }
    truncate_at_word_boundary(title, max_len)
}

/// Strips highlight markers (`<b>`/`</b>`-style) and collapses runs of
/// whitespace into single spaces.
fn clean_snippet(snippet: &str, max_len: usize) -> String {
    let mut cleaned = String::with_capacity(snippet.len());
    let mut in_tag = false;
    for ch in snippet.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if in_tag => {}
            c if c.is_whitespace() => {
                if !cleaned.ends_with(' ') {
                    cleaned.push(' ');
                }
            }
            c => cleaned.push(c),
        }
    }
    truncate_at_word_boundary(cleaned.trim(), max_len)
}

fn truncate_at_word_boundary(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_len).collect();
    match truncated.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => format!("{}…", truncated[..idx].trim_end()),
        _ => format!("{truncated}…"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_precomputed_preview() {
        let cache = PreviewCache::new(50);
        let preview = cache.get_or_compute(
            "note-1",
            Some("precomputed"),
            Some("snippet"),
            Some("full content"),
            "Title",
            150,
        );
        assert_eq!(preview, "precomputed");
    }

    #[test]
    fn falls_back_to_title_when_nothing_else_available() {
        let cache = PreviewCache::new(50);
        let preview = cache.get_or_compute("note-2", None, None, None, "Only Title", 150);
        assert_eq!(preview, "Only Title");
    }

    #[test]
    fn cleans_highlight_marks_from_snippet() {
        let cache = PreviewCache::new(50);
        let preview = cache.get_or_compute(
            "note-3",
            None,
            Some("the <b>quick</b>   fox"),
            None,
            "Title",
            150,
        );
        assert_eq!(preview, "the quick fox");
    }

    #[test]
    fn evicts_strict_lru_order() {
        let cache = PreviewCache::new(2);
        cache.get_or_compute("a", Some("A"), None, None, "", 150);
        cache.get_or_compute("b", Some("B"), None, None, "", 150);
        cache.get_or_compute("a", Some("A"), None, None, "", 150); // refresh a
        cache.get_or_compute("c", Some("C"), None, None, "", 150); // evicts b

        assert_eq!(cache.len(), 2);
        // b should be gone, a and c should remain retrievable as cached
        // hits (passing deliberately wrong inputs to prove the cache, not
        // recomputation, served them).
        assert_eq!(cache.get_or_compute("a", Some("WRONG"), None, None, "", 150), "A");
        assert_eq!(cache.get_or_compute("c", Some("WRONG"), None, None, "", 150), "C");
    }

    #[test]
    fn truncates_long_content_at_word_boundary_after_70_percent() {
        let long = "word ".repeat(100);
        let preview = compute_preview(None, None, Some(&long), "Title", 150);
        assert!(preview.ends_with('…'));
        assert!(preview.chars().count() <= 106);
    }
}
