//! Tantivy schema for the full-text index.
//!
//! `content_preview` is stored but not indexed for search; it exists only
//! so a result can render a snippet without re-reading the source file.
//! The ranking sidecar columns (`file_size`, `created_date`, `usage_count`,
//! `last_accessed`) are stored-but-unindexed fields on the same document
//! rather than a separate table: tantivy segments are immutable, so every
//! mutation (including a usage-count bump) is already a delete+reinsert of
//! the whole document, and a second table would only add a second place to
//! keep in sync.

use tantivy::schema::{
    FAST, INDEXED, IndexRecordOption, STORED, STRING, Schema, SchemaBuilder, TextFieldIndexing,
    TextOptions,
};
use tantivy::tokenizer::{AsciiFoldingFilter, Language, LowerCaser, SimpleTokenizer, Stemmer, TextAnalyzer};
use tantivy::Index;

/// Name of the tokenizer registered on `title`/`content`: lowercasing,
/// English (Porter2) stemming, then ASCII folding so accented search terms
/// match unaccented note text and vice versa. Registration lives on the
/// `Index` object itself and is not persisted to disk, so it must be redone
/// every time an index is opened, not only when it's created.
pub const NOTE_TEXT_TOKENIZER: &str = "note_text_stem_fold";

pub fn register_tokenizers(index: &Index) {
    let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(Stemmer::new(Language::English))
        .filter(AsciiFoldingFilter)
        .build();
    index.tokenizers().register(NOTE_TEXT_TOKENIZER, analyzer);
}

fn note_text_indexing() -> TextFieldIndexing {
    TextFieldIndexing::default()
        .set_tokenizer(NOTE_TEXT_TOKENIZER)
        .set_index_option(IndexRecordOption::WithFreqsAndPositions)
}

#[derive(Clone)]
pub struct NoteFields {
    pub note_id: tantivy::schema::Field,
    pub title: tantivy::schema::Field,
    pub content: tantivy::schema::Field,
    pub content_preview: tantivy::schema::Field,
    pub category_id: tantivy::schema::Field,
    pub file_path: tantivy::schema::Field,
    pub last_modified: tantivy::schema::Field,
    pub file_size: tantivy::schema::Field,
    pub created_date: tantivy::schema::Field,
    pub usage_count: tantivy::schema::Field,
    pub last_accessed: tantivy::schema::Field,
}

/// Builds the schema and returns it alongside handles to each field, so
/// callers never need to re-resolve fields by name.
pub fn build_schema() -> (Schema, NoteFields) {
    let mut builder: SchemaBuilder = Schema::builder();

    let stemmed_stored = TextOptions::default()
        .set_indexing_options(note_text_indexing())
        .set_stored();
    let stemmed = TextOptions::default().set_indexing_options(note_text_indexing());

    let note_id = builder.add_text_field("note_id", STRING | STORED);
    let title = builder.add_text_field("title", stemmed_stored);
    let content = builder.add_text_field("content", stemmed);
    let content_preview = builder.add_text_field("content_preview", STORED);
    let category_id = builder.add_text_field("category_id", STRING | STORED);
    let file_path = builder.add_text_field("file_path", STRING | STORED);
    let last_modified = builder.add_i64_field("last_modified", INDEXED | STORED | FAST);
    let file_size = builder.add_u64_field("file_size", STORED | FAST);
    let created_date = builder.add_i64_field("created_date", STORED | FAST);
    let usage_count = builder.add_u64_field("usage_count", STORED | FAST);
    let last_accessed = builder.add_i64_field("last_accessed", STORED | FAST);

    let schema = builder.build();
    let fields = NoteFields {
        note_id,
        title,
        content,
        content_preview,
        category_id,
        file_path,
        last_modified,
        file_size,
        created_date,
        usage_count,
        last_accessed,
    };
    (schema, fields)
}
