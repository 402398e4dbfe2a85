//! Duplicate/version collapse for a store's record set.

use std::collections::HashMap;

use chaptersync_shared::ChapterRecord;

/// Outcome of [`collapse_duplicates`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collapsed {
    /// One record per url, in first-seen order.
    pub kept: Vec<ChapterRecord>,
    /// Every record that lost to a newer revision of the same url.
    pub evicted: Vec<ChapterRecord>,
}

/// Keep only the highest-revision record per url.
///
/// Ties are broken by file name so the result does not depend on input
/// order. The caller deletes the evicted records' files, except any file the
/// kept set still references.
pub fn collapse_duplicates(records: Vec<ChapterRecord>) -> Collapsed {
    let mut slot_of: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<ChapterRecord> = Vec::new();
    let mut evicted = Vec::new();

    for record in records {
        match slot_of.get(&record.url) {
            None => {
                slot_of.insert(record.url.clone(), kept.len());
                kept.push(record);
            }
            Some(&slot) => {
                let current = &kept[slot];
                let wins = (record.revision, &record.filename) > (current.revision, &current.filename);
                if wins {
                    evicted.push(std::mem::replace(&mut kept[slot], record));
                } else {
                    evicted.push(record);
                }
            }
        }
    }

    Collapsed { kept, evicted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaptersync_shared::Revision;

    fn record(url: &str, rev: i64) -> ChapterRecord {
        ChapterRecord {
            url: url.into(),
            filename: format!("{rev} - {url} - [x].md"),
            title: None,
            revision: Revision(rev),
        }
    }

    #[test]
    fn unique_records_pass_through() {
        let input = vec![record("a", 1), record("b", 2)];
        let out = collapse_duplicates(input.clone());
        assert_eq!(out.kept, input);
        assert!(out.evicted.is_empty());
    }

    #[test]
    fn keeps_max_revision_and_evicts_the_rest() {
        let input = vec![record("x", 2), record("a", 7), record("x", 9), record("x", 5)];
        let out = collapse_duplicates(input);

        let kept: Vec<(&str, i64)> = out.kept.iter().map(|r| (r.url.as_str(), r.revision.0)).collect();
        assert_eq!(kept, vec![("x", 9), ("a", 7)]);

        let mut evicted: Vec<i64> = out.evicted.iter().map(|r| r.revision.0).collect();
        evicted.sort();
        assert_eq!(evicted, vec![2, 5]);
    }

    #[test]
    fn result_is_order_independent() {
        let mut input = vec![record("x", 3), record("x", 3), record("x", 1)];
        input[1].filename = "other.md".into();
        let forward = collapse_duplicates(input.clone());
        input.reverse();
        let backward = collapse_duplicates(input);
        assert_eq!(forward.kept, backward.kept);
    }
}
