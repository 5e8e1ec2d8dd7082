//! Full-text search repository: a tantivy-backed index of notes with
//! BM25 + usage-count ranking and a small query-rewriting layer.
//!
//! Query processing: a single bare term becomes a prefix match (`term*`);
//! multiple bare terms combine as `AND` of prefix matches; quoted phrases
//! pass through unchanged.

use crate::ranking::{boosted_relevance, sort_hits, RankedHit, SortOrder};
use crate::schema::{build_schema, register_tokenizers, NoteFields};
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use thiserror::Error;

const INDEX_WRITER_MEMORY_BUDGET: usize = 50_000_000;

#[derive(Debug, Error)]
pub enum FtsError {
    #[error(transparent)]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("query error: {0}")]
    Query(String),
}

/// Input document for `index`/`update`/`batch_index`.
#[derive(Debug, Clone)]
pub struct NoteDocument {
    pub note_id: String,
    pub title: String,
    pub content: String,
    pub content_preview: String,
    pub category_id: String,
    pub file_path: String,
    pub last_modified: i64,
    pub file_size: u64,
    pub created_date: i64,
    pub usage_count: u64,
    pub last_accessed: i64,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub sort: SortOrder,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            sort: SortOrder::Relevance,
        }
    }
}

pub struct FtsRepository {
    index: Index,
    reader: IndexReader,
    fields: NoteFields,
    schema: Schema,
}

impl FtsRepository {
    /// Opens or creates an index at `dir_path`. The writer's memory budget
    /// and the reader's mmap-backed directory are the tantivy-native
    /// equivalents of the page-cache/mmap pragmas a relational FTS engine
    /// would otherwise need tuned.
    pub fn open_or_create(dir_path: &Path) -> Result<Self, FtsError> {
        let (schema, fields) = build_schema();
        std::fs::create_dir_all(dir_path).map_err(|e| {
            FtsError::Query(format!("failed to create index dir {}: {e}", dir_path.display()))
        })?;

        let index = if Index::exists(&tantivy::directory::MmapDirectory::open(dir_path)?)? {
            Index::open_in_dir(dir_path)?
        } else {
            Index::create_in_dir(dir_path, schema.clone())?
        };
        // Tokenizer registration lives in-process only, not on disk: redo it
        // on every open, whether the index was just created or already existed.
        register_tokenizers(&index);

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;

        Ok(Self { index, reader, fields, schema })
    }

    fn writer(&self) -> Result<IndexWriter, FtsError> {
        Ok(self.index.writer(INDEX_WRITER_MEMORY_BUDGET)?)
    }

    fn to_tantivy_doc(&self, note: &NoteDocument) -> TantivyDocument {
        doc!(
            self.fields.note_id => note.note_id.clone(),
            self.fields.title => note.title.clone(),
            self.fields.content => note.content.clone(),
            self.fields.content_preview => note.content_preview.clone(),
            self.fields.category_id => note.category_id.clone(),
            self.fields.file_path => note.file_path.clone(),
            self.fields.last_modified => note.last_modified,
            self.fields.file_size => note.file_size,
            self.fields.created_date => note.created_date,
            self.fields.usage_count => note.usage_count,
            self.fields.last_accessed => note.last_accessed,
        )
    }

    pub fn index(&self, note: &NoteDocument) -> Result<(), FtsError> {
        let mut writer = self.writer()?;
        writer.delete_term(Term::from_field_text(self.fields.note_id, &note.note_id));
        writer.add_document(self.to_tantivy_doc(note))?;
        writer.commit()?;
        Ok(())
    }

    /// Replace semantics: identical to `index`, exposed separately so
    /// callers can express intent (the index manager distinguishes
    /// create-vs-modify file events even though the mechanics are the same).
    pub fn update(&self, note: &NoteDocument) -> Result<(), FtsError> {
        self.index(note)
    }

    pub fn remove_by_id(&self, note_id: &str) -> Result<(), FtsError> {
        let mut writer = self.writer()?;
        writer.delete_term(Term::from_field_text(self.fields.note_id, note_id));
        writer.commit()?;
        Ok(())
    }

    pub fn remove_by_path(&self, file_path: &str) -> Result<(), FtsError> {
        let mut writer = self.writer()?;
        writer.delete_term(Term::from_field_text(self.fields.file_path, file_path));
        writer.commit()?;
        Ok(())
    }

    /// Indexes all of `notes` in a single commit.
    pub fn batch_index(&self, notes: &[NoteDocument]) -> Result<(), FtsError> {
        let mut writer = self.writer()?;
        for note in notes {
            writer.delete_term(Term::from_field_text(self.fields.note_id, &note.note_id));
            writer.add_document(self.to_tantivy_doc(note))?;
        }
        writer.commit()?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), FtsError> {
        let mut writer = self.writer()?;
        writer.delete_all_documents()?;
        writer.commit()?;
        Ok(())
    }

    pub fn optimize(&self) -> Result<(), FtsError> {
        let mut writer = self.writer()?;
        writer.wait_merging_threads()?;
        drop(writer);
        Ok(())
    }

    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<RankedHit>, FtsError> {
        let searcher = self.reader.searcher();
        let mut parser = QueryParser::for_index(&self.index, vec![self.fields.title, self.fields.content]);
        parser.set_field_boost(self.fields.title, 2.0);

        let rewritten = rewrite_query(query);
        let parsed = parser
            .parse_query(&rewritten)
            .map_err(|e| FtsError::Query(format!("failed to parse query {rewritten:?}: {e}")))?;

        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(options.limit.max(1) * 4))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            hits.push(self.hit_from_doc(&doc, score));
        }

        sort_hits(&mut hits, options.sort);
        hits.truncate(options.limit);
        Ok(hits)
    }

    /// Prefix suggestions over note titles, for typeahead.
    pub fn suggest(&self, prefix: &str, k: usize) -> Result<Vec<String>, FtsError> {
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let options = SearchOptions { limit: k.max(1) * 4, sort: SortOrder::Relevance };
        let hits = self.search(&format!("{prefix}*"), &options)?;
        let mut titles: Vec<String> = hits.into_iter().map(|h| h.title).collect();
        titles.dedup();
        titles.truncate(k);
        Ok(titles)
    }

    fn hit_from_doc(&self, doc: &TantivyDocument, score: f32) -> RankedHit {
        let get_text = |field| -> String {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let get_i64 = |field| -> i64 { doc.get_first(field).and_then(|v| v.as_i64()).unwrap_or(0) };
        let get_u64 = |field| -> u64 { doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0) };

        let usage_count = get_u64(self.fields.usage_count);
        RankedHit {
            note_id: get_text(self.fields.note_id),
            title: get_text(self.fields.title),
            relevance: boosted_relevance(score, usage_count),
            last_modified: get_i64(self.fields.last_modified),
            usage_count,
            created_date: get_i64(self.fields.created_date),
            file_size: get_u64(self.fields.file_size),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Rewrites a raw user query: see the module-level query-processing rules.
fn rewrite_query(raw: &str) -> String {
    let mut parts = Vec::new();
    let mut chars = raw.trim().chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut phrase = String::from('"');
            for ch in chars.by_ref() {
                phrase.push(ch);
                if ch == '"' {
                    break;
                }
            }
            if !phrase.ends_with('"') || phrase.len() == 1 {
                phrase.push('"');
            }
            parts.push(phrase);
        } else {
            let mut word = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() || ch == '"' {
                    break;
                }
                word.push(ch);
                chars.next();
            }
            if !word.is_empty() {
                parts.push(format!("{word}*"));
            }
        }
    }

    if parts.is_empty() {
        return String::new();
    }
    parts.join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_repo() -> (TempDir, FtsRepository) {
        let dir = TempDir::new().unwrap();
        let repo = FtsRepository::open_or_create(dir.path()).unwrap();
        (dir, repo)
    }

    fn note(id: &str, title: &str, content: &str, usage_count: u64) -> NoteDocument {
        NoteDocument {
            note_id: id.into(),
            title: title.into(),
            content: content.into(),
            content_preview: content.chars().take(150).collect(),
            category_id: "root".into(),
            file_path: format!("/notes/{id}.rtf"),
            last_modified: 1000,
            file_size: content.len() as u64,
            created_date: 500,
            usage_count,
            last_accessed: 1000,
        }
    }

    #[test]
    fn single_bare_term_is_a_prefix_match() {
        assert_eq!(rewrite_query("proj"), "proj*");
    }

    #[test]
    fn multiple_bare_terms_combine_with_and() {
        assert_eq!(rewrite_query("project plan"), "project* AND plan*");
    }

    #[test]
    fn quoted_phrases_pass_through_unchanged() {
        assert_eq!(rewrite_query("\"exact phrase\""), "\"exact phrase\"");
    }

    #[test]
    fn index_then_search_finds_document_by_prefix() {
        let (_dir, repo) = test_repo();
        repo.index(&note("1", "Project Plan", "Body text about roadmaps", 0)).unwrap();

        let hits = repo.search("proj", &SearchOptions::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].note_id, "1");
    }

    #[test]
    fn usage_count_boosts_otherwise_tied_relevance() {
        let (_dir, repo) = test_repo();
        repo.index(&note("low", "Roadmap Alpha", "roadmap content", 0)).unwrap();
        repo.index(&note("high", "Roadmap Beta", "roadmap content", 50)).unwrap();

        let hits = repo.search("roadmap", &SearchOptions::default()).unwrap();
        assert_eq!(hits[0].note_id, "high");
    }

    #[test]
    fn remove_by_id_drops_document_from_results() {
        let (_dir, repo) = test_repo();
        repo.index(&note("1", "Keepsake", "memory content", 0)).unwrap();
        repo.remove_by_id("1").unwrap();

        let hits = repo.search("keepsake", &SearchOptions::default()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn clear_removes_all_documents() {
        let (_dir, repo) = test_repo();
        repo.index(&note("1", "A", "alpha", 0)).unwrap();
        repo.index(&note("2", "B", "beta", 0)).unwrap();
        repo.clear().unwrap();

        let hits = repo.search("alpha", &SearchOptions::default()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn sort_by_title_asc_overrides_relevance_order() {
        let (_dir, repo) = test_repo();
        repo.index(&note("z", "zeta note", "shared term", 0)).unwrap();
        repo.index(&note("a", "alpha note", "shared term", 0)).unwrap();

        let options = SearchOptions { limit: 10, sort: SortOrder::TitleAsc };
        let hits = repo.search("shared", &options).unwrap();
        assert_eq!(hits[0].note_id, "a");
    }
}
