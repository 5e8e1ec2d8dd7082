//! Result ranking: relevance combines tantivy's BM25 score with a small
//! boost proportional to usage count, and callers may instead request one
//! of several non-relevance sort orders.

const USAGE_BOOST_FACTOR: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Relevance,
    ModifiedDesc,
    UsageDesc,
    TitleAsc,
    CreatedDesc,
    SizeDesc,
}

/// Combines a raw BM25 score with the document's usage count.
pub fn boosted_relevance(bm25_score: f32, usage_count: u64) -> f64 {
    bm25_score as f64 + (usage_count as f64 * USAGE_BOOST_FACTOR)
}

#[derive(Debug, Clone)]
pub struct RankedHit {
    pub note_id: String,
    pub title: String,
    pub relevance: f64,
    pub last_modified: i64,
    pub usage_count: u64,
    pub created_date: i64,
    pub file_size: u64,
}

/// Sorts hits in place according to `order`. `Relevance` is a no-op since
/// callers are expected to have already populated `relevance` in BM25
/// descending order from the index's own top-k collector.
pub fn sort_hits(hits: &mut [RankedHit], order: SortOrder) {
    match order {
        SortOrder::Relevance => {
            hits.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap());
        }
        SortOrder::ModifiedDesc => hits.sort_by(|a, b| b.last_modified.cmp(&a.last_modified)),
        SortOrder::UsageDesc => hits.sort_by(|a, b| b.usage_count.cmp(&a.usage_count)),
        SortOrder::TitleAsc => hits.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase())),
        SortOrder::CreatedDesc => hits.sort_by(|a, b| b.created_date.cmp(&a.created_date)),
        SortOrder::SizeDesc => hits.sort_by(|a, b| b.file_size.cmp(&a.file_size)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(note_id: &str, relevance: f64, usage: u64, modified: i64, title: &str) -> RankedHit {
        RankedHit {
            note_id: note_id.into(),
            title: title.into(),
            relevance,
            last_modified: modified,
            usage_count: usage,
            created_date: 0,
            file_size: 0,
        }
    }

    #[test]
    fn usage_count_boosts_relevance() {
        let boosted = boosted_relevance(1.0, 20);
        assert_eq!(boosted, 3.0);
    }

    #[test]
    fn sorts_by_usage_desc() {
        let mut hits = vec![hit("a", 0.0, 1, 0, "A"), hit("b", 0.0, 9, 0, "B")];
        sort_hits(&mut hits, SortOrder::UsageDesc);
        assert_eq!(hits[0].note_id, "b");
    }

    #[test]
    fn sorts_by_title_case_insensitively() {
        let mut hits = vec![hit("a", 0.0, 0, 0, "zeta"), hit("b", 0.0, 0, 0, "Alpha")];
        sort_hits(&mut hits, SortOrder::TitleAsc);
        assert_eq!(hits[0].note_id, "b");
    }
}
