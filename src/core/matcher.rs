//! Sequential matching passes for the exact criteria: sort by the
//! criteria key, then link adjacent equal-key runs. Similarity passes do
//! not come through here; they run on the worker pool.

use crate::core::criteria::MatchCriteria;
use crate::core::graph;
use crate::core::item::{ItemId, ItemStore};
use crate::core::predicate::{
    binary_search_first, linear_search_first, match_check, sort_cmp, CheckResult,
};

fn sorted_ids(store: &ItemStore, ids: &[ItemId], mask: MatchCriteria) -> Vec<ItemId> {
    let mut sorted = ids.to_vec();
    sorted.sort_by(|&a, &b| {
        match (store.get(a), store.get(b)) {
            (Some(ia), Some(ib)) => sort_cmp(ia, ib, mask),
            _ => std::cmp::Ordering::Equal,
        }
    });
    sorted
}

fn check(store: &ItemStore, a: ItemId, b: ItemId, mask: MatchCriteria) -> CheckResult {
    match (store.get(a), store.get(b)) {
        (Some(ia), Some(ib)) => match_check(ia, ib, mask),
        _ => CheckResult::NoMatch,
    }
}

/// Scan one set against itself. Every run of consecutive matching
/// entries is anchored at the run's first entry: later members link to
/// the anchor, not to each other, so the consolidator receives a star
/// per run. Name-matches (same name, same content) extend a run without
/// producing a link.
pub fn scan_single_set(store: &mut ItemStore, mask: MatchCriteria) {
    let ids = sorted_ids(store, store.primary(), mask);
    graph::reset_all(store, &ids);
    log::debug!("array scan: {} entries, mask {:?}", ids.len(), mask);

    let mut i = 0;
    while i + 1 < ids.len() {
        let anchor = ids[i];
        let mut j = i + 1;
        let mut in_run = false;
        while j < ids.len() {
            match check(store, anchor, ids[j], mask) {
                CheckResult::Match => {
                    graph::link(store, ids[j], anchor, 0.0);
                    in_run = true;
                    j += 1;
                }
                CheckResult::NameMatch => {
                    in_run = true;
                    j += 1;
                }
                CheckResult::NoMatch => break,
            }
        }
        // Members of a finished run never anchor a run of their own.
        i = if in_run { j } else { i + 1 };
    }
}

/// Scan the primary set against the secondary set. Both sets are sorted
/// by the criteria key; each primary entry locates its equal-key run in
/// the secondary array and links every matching member. When several
/// primary entries share a key, only the last of them queries, so a
/// cross-set group forms around a single primary anchor.
pub fn scan_two_sets(store: &mut ItemStore, mask: MatchCriteria, use_binary_search: bool) {
    let set1 = sorted_ids(store, store.primary(), mask);
    let set2 = sorted_ids(store, store.secondary(), mask);
    graph::reset_all(store, &set1);
    graph::reset_all(store, &set2);
    log::debug!(
        "two-set scan: {} x {} entries, mask {:?}",
        set1.len(),
        set2.len(),
        mask
    );

    for (idx, &anchor) in set1.iter().enumerate() {
        if let Some(&next) = set1.get(idx + 1) {
            if check(store, anchor, next, mask) != CheckResult::NoMatch {
                continue;
            }
        }

        let Some(needle) = store.get(anchor) else {
            continue;
        };
        let first = if use_binary_search {
            binary_search_first(store, &set2, needle, mask)
        } else {
            linear_search_first(store, &set2, needle, mask)
        };
        let Some(mut pos) = first else {
            continue;
        };

        while pos < set2.len() {
            match check(store, anchor, set2[pos], mask) {
                CheckResult::Match => {
                    graph::link(store, set2[pos], anchor, 0.0);
                    pos += 1;
                }
                CheckResult::NameMatch => pos += 1,
                CheckResult::NoMatch => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::item::FileRef;

    fn add(store: &mut ItemStore, path: &str, size: u64, second: bool) -> ItemId {
        store.insert(FileRef::new(path, size, 0), second).unwrap()
    }

    fn with_checksum(store: &mut ItemStore, id: ItemId, sum: &str) {
        store.get_mut(id).unwrap().checksum = Some(sum.into());
    }

    #[test]
    fn test_single_set_run_forms_star() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/a.jpg", 1, false);
        let b = add(&mut store, "/b.jpg", 2, false);
        let c = add(&mut store, "/c.jpg", 3, false);
        let d = add(&mut store, "/d.jpg", 4, false);
        for id in [a, b, c] {
            with_checksum(&mut store, id, "same");
        }
        with_checksum(&mut store, d, "other");

        scan_single_set(&mut store, MatchCriteria::CHECKSUM);

        // {a, b, c} sort adjacently; b and c link to anchor a only.
        let anchor = [a, b, c]
            .into_iter()
            .find(|&id| store.get(id).unwrap().group.len() == 2)
            .expect("one entry anchors the run");
        for id in [a, b, c] {
            if id != anchor {
                assert!(graph::edge_exists(&store, id, anchor));
                assert_eq!(store.get(id).unwrap().group.len(), 1);
            }
        }
        assert!(store.get(d).unwrap().group.is_empty());
    }

    #[test]
    fn test_single_set_no_links_across_runs() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/a.jpg", 10, false);
        let b = add(&mut store, "/b.jpg", 10, false);
        let c = add(&mut store, "/c.jpg", 20, false);
        let d = add(&mut store, "/d.jpg", 20, false);

        scan_single_set(&mut store, MatchCriteria::SIZE);

        assert!(graph::edge_exists(&store, b, a));
        assert!(graph::edge_exists(&store, d, c));
        assert!(!graph::edge_exists(&store, c, a));
        assert!(!graph::edge_exists(&store, d, a));
    }

    #[test]
    fn test_name_match_extends_run_without_link() {
        let mut store = ItemStore::new();
        // Three files named the same; the middle one has identical
        // content to the first, the third differs.
        let a = add(&mut store, "/x/photo.jpg", 1, false);
        let b = add(&mut store, "/y/photo.jpg", 2, false);
        let c = add(&mut store, "/z/photo.jpg", 3, false);
        with_checksum(&mut store, a, "aaaa");
        with_checksum(&mut store, b, "aaaa");
        with_checksum(&mut store, c, "bbbb");

        scan_single_set(&mut store, MatchCriteria::NAME_CONTENT);

        // The anchor is whichever of the three sorts first; exactly one
        // link exists, between the anchor and the differing-content file.
        let total_edges: usize = [a, b, c]
            .iter()
            .map(|&id| store.get(id).unwrap().group.len())
            .sum();
        assert_eq!(total_edges, 2);
    }

    #[test]
    fn test_missing_checksums_never_link() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/a.jpg", 1, false);
        let b = add(&mut store, "/b.jpg", 2, false);

        scan_single_set(&mut store, MatchCriteria::CHECKSUM);

        assert!(store.get(a).unwrap().group.is_empty());
        assert!(store.get(b).unwrap().group.is_empty());
    }

    #[test]
    fn test_two_sets_links_only_across() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/1/a.jpg", 10, false);
        let x = add(&mut store, "/1/x.jpg", 10, false);
        let b = add(&mut store, "/2/b.jpg", 10, true);
        let c = add(&mut store, "/2/c.jpg", 10, true);
        let d = add(&mut store, "/2/d.jpg", 99, true);

        scan_two_sets(&mut store, MatchCriteria::SIZE, true);

        // Equal-key primary entries collapse onto one anchor, which links
        // to every equal-key secondary entry. Primaries never link to
        // each other.
        assert!(!graph::edge_exists(&store, x, a));
        let anchor = if store.get(a).unwrap().group.is_empty() { x } else { a };
        assert!(graph::edge_exists(&store, b, anchor));
        assert!(graph::edge_exists(&store, c, anchor));
        assert!(!graph::edge_exists(&store, d, anchor));
        assert!(!graph::edge_exists(&store, c, b));
    }

    #[test]
    fn test_two_sets_binary_and_linear_agree() {
        let mut store = ItemStore::new();
        for i in 0..12u64 {
            add(&mut store, &format!("/1/p{i}.jpg"), i % 4, false);
        }
        for i in 0..20u64 {
            add(&mut store, &format!("/2/s{i}.jpg"), i % 5, true);
        }

        let snapshot = |store: &ItemStore| -> Vec<Vec<ItemId>> {
            store
                .primary()
                .iter()
                .chain(store.secondary())
                .map(|&id| {
                    store
                        .get(id)
                        .unwrap()
                        .group
                        .iter()
                        .map(|edge| edge.other)
                        .collect()
                })
                .collect()
        };

        scan_two_sets(&mut store, MatchCriteria::SIZE, true);
        let with_binary = snapshot(&store);
        scan_two_sets(&mut store, MatchCriteria::SIZE, false);
        let with_linear = snapshot(&store);
        assert_eq!(with_binary, with_linear);
    }
}
