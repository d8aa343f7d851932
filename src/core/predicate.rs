//! The pairwise match predicate and the comparators derived from it.
//!
//! Two flavors exist, as in the original engine: [`match_pair`] evaluates
//! the full criteria chain including similarity and produces a rank, and
//! [`match_check`] is the cheap tri-state used by the sequential array
//! scan, which never evaluates similarity bits.

use std::cmp::Ordering;

use crate::core::criteria::{MatchConfig, MatchCriteria};
use crate::core::item::{Item, ItemId, ItemStore};

/// Result of the exact-criteria check used while stepping a sorted array.
/// `NameMatch` is produced by the name-but-not-content criteria when name
/// *and* content are equal: not a duplicate, but the scan must keep
/// stepping through the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Match,
    NameMatch,
    NoMatch,
}

/// Checksums count as "same content" only when both are present and
/// equal, or both are absent (nothing proves them different).
fn content_equal(a: &Item, b: &Item) -> bool {
    a.checksum == b.checksum
}

/// Full predicate: evaluates every active criterion as an AND-chain and
/// short-circuits on the first failure. Returns the match decision and
/// the rank, which is nonzero only for similarity criteria (fraction x
/// 100). The rank is reported even for a failed similarity comparison so
/// callers that re-link regardless can reuse it.
pub fn match_pair(
    store: &ItemStore,
    a: ItemId,
    b: ItemId,
    config: &MatchConfig,
    fast: bool,
) -> (bool, f64) {
    let (Some(ia), Some(ib)) = (store.get(a), store.get(b)) else {
        return (false, 0.0);
    };

    // An entity never matches itself.
    if ia.file.path() == ib.file.path() {
        return (false, 0.0);
    }

    let mask = config.criteria;
    if mask.contains(MatchCriteria::ALL) {
        return (true, 0.0);
    }
    if mask.contains(MatchCriteria::PATH) && ia.file.path() != ib.file.path() {
        return (false, 0.0);
    }
    if mask.contains(MatchCriteria::NAME) && ia.file.name() != ib.file.name() {
        return (false, 0.0);
    }
    if mask.contains(MatchCriteria::NAME_CI) && ia.file.name_key_ci() != ib.file.name_key_ci() {
        return (false, 0.0);
    }
    if mask.contains(MatchCriteria::NAME_CONTENT) {
        let matched = ia.file.name() == ib.file.name() && !content_equal(ia, ib);
        return (matched, 0.0);
    }
    if mask.contains(MatchCriteria::NAME_CI_CONTENT) {
        let matched =
            ia.file.name_key_ci() == ib.file.name_key_ci() && !content_equal(ia, ib);
        return (matched, 0.0);
    }
    if mask.contains(MatchCriteria::SIZE) && ia.file.size() != ib.file.size() {
        return (false, 0.0);
    }
    if mask.contains(MatchCriteria::DATE) && ia.file.mtime() != ib.file.mtime() {
        return (false, 0.0);
    }
    if mask.contains(MatchCriteria::CHECKSUM) {
        match (&ia.checksum, &ib.checksum) {
            (Some(ca), Some(cb)) if ca == cb => {}
            // An absent checksum never matches anything.
            _ => return (false, 0.0),
        }
    }
    if mask.contains(MatchCriteria::DIM) {
        match (ia.dimensions(), ib.dimensions()) {
            (Some(da), Some(db)) if da == db => {}
            _ => return (false, 0.0),
        }
    }
    if mask.intersects(MatchCriteria::SIM_ANY) {
        let (Some(sa), Some(sb)) = (&ia.simd, &ib.simd) else {
            return (false, 0.0);
        };
        let min = config.similarity_threshold();
        let fraction = if fast {
            sa.compare_fast(sb, min)
        } else {
            sa.compare(sb)
        };
        let rank = fraction * 100.0;
        if fraction < min {
            return (false, rank);
        }
        log::debug!(
            "similar: {} {} = {fraction}",
            ia.file.name(),
            ib.file.name()
        );
        return (true, rank);
    }

    (true, 0.0)
}

/// Exact-criteria check for the array scan. Similarity bits in the mask
/// are ignored here; the worker pool owns those.
pub fn match_check(a: &Item, b: &Item, mask: MatchCriteria) -> CheckResult {
    if mask.contains(MatchCriteria::ALL) {
        return CheckResult::Match;
    }
    if mask.contains(MatchCriteria::PATH) && a.file.path() != b.file.path() {
        return CheckResult::NoMatch;
    }
    if mask.contains(MatchCriteria::NAME) && a.file.name() != b.file.name() {
        return CheckResult::NoMatch;
    }
    if mask.contains(MatchCriteria::NAME_CI) && a.file.name_key_ci() != b.file.name_key_ci() {
        return CheckResult::NoMatch;
    }
    if mask.contains(MatchCriteria::NAME_CONTENT) {
        if a.file.name() != b.file.name() {
            return CheckResult::NoMatch;
        }
        if content_equal(a, b) {
            return CheckResult::NameMatch;
        }
    }
    if mask.contains(MatchCriteria::NAME_CI_CONTENT) {
        if a.file.name_key_ci() != b.file.name_key_ci() {
            return CheckResult::NoMatch;
        }
        if content_equal(a, b) {
            return CheckResult::NameMatch;
        }
    }
    if mask.contains(MatchCriteria::SIZE) && a.file.size() != b.file.size() {
        return CheckResult::NoMatch;
    }
    if mask.contains(MatchCriteria::DATE) && a.file.mtime() != b.file.mtime() {
        return CheckResult::NoMatch;
    }
    if mask.contains(MatchCriteria::CHECKSUM) {
        match (&a.checksum, &b.checksum) {
            (Some(ca), Some(cb)) if ca == cb => {}
            _ => return CheckResult::NoMatch,
        }
    }
    if mask.contains(MatchCriteria::DIM) {
        match (a.dimensions(), b.dimensions()) {
            (Some(da), Some(db)) if da == db => {}
            _ => return CheckResult::NoMatch,
        }
    }

    CheckResult::Match
}

/// Orders an optional sort key so that unset keys land deterministically
/// last, tie-broken by path so repeated runs agree.
fn cmp_optional<T: Ord>(a: Option<T>, b: Option<T>, ia: &Item, ib: &Item) -> Ordering {
    match (a, b) {
        (Some(ka), Some(kb)) => ka.cmp(&kb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => ia.file.path().cmp(ib.file.path()),
    }
}

/// Comparator for the pre-scan sort and the binary search. The first
/// active criterion in the chain provides the key, so entities that
/// could match end up adjacent. The mask is an explicit argument; there
/// is deliberately no process-wide comparator state.
pub fn sort_cmp(a: &Item, b: &Item, mask: MatchCriteria) -> Ordering {
    if mask.contains(MatchCriteria::ALL) {
        return Ordering::Equal;
    }
    if mask.contains(MatchCriteria::PATH) {
        return a.file.path().cmp(b.file.path());
    }
    if mask.contains(MatchCriteria::NAME) {
        return a.file.name().cmp(b.file.name());
    }
    if mask.contains(MatchCriteria::NAME_CI) {
        return a.file.name_key_ci().cmp(&b.file.name_key_ci());
    }
    if mask.contains(MatchCriteria::NAME_CONTENT) {
        return a.file.name().cmp(b.file.name());
    }
    if mask.contains(MatchCriteria::NAME_CI_CONTENT) {
        return a.file.name_key_ci().cmp(&b.file.name_key_ci());
    }
    if mask.contains(MatchCriteria::SIZE) {
        return a.file.size().cmp(&b.file.size());
    }
    if mask.contains(MatchCriteria::DATE) {
        return a.file.mtime().cmp(&b.file.mtime());
    }
    if mask.contains(MatchCriteria::CHECKSUM) {
        return cmp_optional(a.checksum.as_deref(), b.checksum.as_deref(), a, b);
    }
    if mask.contains(MatchCriteria::DIM) {
        return cmp_optional(a.dimensions_key(), b.dimensions_key(), a, b);
    }

    Ordering::Equal
}

/// Lower-bound binary search: index of the first entry in `sorted` whose
/// key equals `needle`'s, or `None`. Handles duplicate keys by design.
pub fn binary_search_first(
    store: &ItemStore,
    sorted: &[ItemId],
    needle: &Item,
    mask: MatchCriteria,
) -> Option<usize> {
    let lower = sorted.partition_point(|&id| {
        store
            .get(id)
            .map_or(false, |item| sort_cmp(item, needle, mask) == Ordering::Less)
    });
    let candidate = store.get(*sorted.get(lower)?)?;
    (sort_cmp(candidate, needle, mask) == Ordering::Equal).then_some(lower)
}

/// Linear fallback for [`binary_search_first`]; must produce identical
/// results on the same sorted input.
pub fn linear_search_first(
    store: &ItemStore,
    sorted: &[ItemId],
    needle: &Item,
    mask: MatchCriteria,
) -> Option<usize> {
    sorted.iter().position(|&id| {
        store
            .get(id)
            .map_or(false, |item| sort_cmp(item, needle, mask) == Ordering::Equal)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::item::FileRef;
    use crate::core::similarity::SimilarityData;
    use std::sync::Arc;

    fn add(store: &mut ItemStore, path: &str, size: u64, mtime: i64) -> ItemId {
        store.insert(FileRef::new(path, size, mtime), false).unwrap()
    }

    #[test]
    fn test_never_matches_itself() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/a.jpg", 10, 0);
        let config = MatchConfig::new(MatchCriteria::ALL);
        assert_eq!(match_pair(&store, a, a, &config, false), (false, 0.0));
    }

    #[test]
    fn test_checksum_criterion_is_boolean() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/a.jpg", 10, 0);
        let b = add(&mut store, "/b.jpg", 20, 5);
        store.get_mut(a).unwrap().checksum = Some("deadbeef".into());
        store.get_mut(b).unwrap().checksum = Some("deadbeef".into());

        let config = MatchConfig::new(MatchCriteria::CHECKSUM);
        assert_eq!(match_pair(&store, a, b, &config, false), (true, 0.0));

        store.get_mut(b).unwrap().checksum = Some("cafebabe".into());
        assert_eq!(match_pair(&store, a, b, &config, false).0, false);
    }

    #[test]
    fn test_missing_checksum_never_matches() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/a.jpg", 10, 0);
        let b = add(&mut store, "/b.jpg", 10, 0);
        let config = MatchConfig::new(MatchCriteria::CHECKSUM);

        // Both absent: still no match.
        assert!(!match_pair(&store, a, b, &config, false).0);
        let (ia, ib) = (store.get(a).unwrap(), store.get(b).unwrap());
        assert_eq!(
            match_check(ia, ib, MatchCriteria::CHECKSUM),
            CheckResult::NoMatch
        );
    }

    #[test]
    fn test_and_chain_short_circuits() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/x/photo.jpg", 10, 0);
        let b = add(&mut store, "/y/photo.jpg", 10, 99);
        let name_and_size = MatchConfig::new(MatchCriteria::NAME | MatchCriteria::SIZE);
        assert!(match_pair(&store, a, b, &name_and_size, false).0);

        let with_date =
            MatchConfig::new(MatchCriteria::NAME | MatchCriteria::SIZE | MatchCriteria::DATE);
        assert!(!match_pair(&store, a, b, &with_date, false).0);
    }

    #[test]
    fn test_name_ci() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/x/IMG_01.JPG", 10, 0);
        let b = add(&mut store, "/y/img_01.jpg", 10, 0);
        assert!(!match_pair(&store, a, b, &MatchConfig::new(MatchCriteria::NAME), false).0);
        assert!(match_pair(&store, a, b, &MatchConfig::new(MatchCriteria::NAME_CI), false).0);
    }

    #[test]
    fn test_name_content_wants_different_content() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/x/photo.jpg", 10, 0);
        let b = add(&mut store, "/y/photo.jpg", 10, 0);
        store.get_mut(a).unwrap().checksum = Some("aaaa".into());
        store.get_mut(b).unwrap().checksum = Some("bbbb".into());
        let config = MatchConfig::new(MatchCriteria::NAME_CONTENT);
        assert!(match_pair(&store, a, b, &config, false).0);

        // Same content: the pair is not a duplicate under this criterion,
        // and the scan check reports NameMatch to keep stepping.
        store.get_mut(b).unwrap().checksum = Some("aaaa".into());
        assert!(!match_pair(&store, a, b, &config, false).0);
        let (ia, ib) = (store.get(a).unwrap(), store.get(b).unwrap());
        assert_eq!(
            match_check(ia, ib, MatchCriteria::NAME_CONTENT),
            CheckResult::NameMatch
        );
    }

    #[test]
    fn test_dimensions_require_measurement() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/a.jpg", 10, 0);
        let b = add(&mut store, "/b.jpg", 10, 0);
        let config = MatchConfig::new(MatchCriteria::DIM);
        // Both unmeasured: must not match.
        assert!(!match_pair(&store, a, b, &config, false).0);

        for id in [a, b] {
            let item = store.get_mut(id).unwrap();
            item.width = 800;
            item.height = 600;
        }
        assert!(match_pair(&store, a, b, &config, false).0);
    }

    #[test]
    fn test_similarity_tier_boundary() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/a.jpg", 10, 0);
        let b = add(&mut store, "/b.jpg", 10, 0);
        // Uniform grids 20 apart: similarity = 1 - 20/255 ~ 0.9216.
        store.get_mut(a).unwrap().simd = Some(Arc::new(SimilarityData::uniform(100)));
        store.get_mut(b).unwrap().simd = Some(Arc::new(SimilarityData::uniform(120)));

        let med = MatchConfig::new(MatchCriteria::SIM_MED);
        let (matched, rank) = match_pair(&store, a, b, &med, false);
        assert!(matched);
        assert!((rank - 92.156).abs() < 0.01);

        let high = MatchConfig::new(MatchCriteria::SIM_HIGH);
        assert!(!match_pair(&store, a, b, &high, false).0);
    }

    #[test]
    fn test_similarity_missing_descriptor() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/a.jpg", 10, 0);
        let b = add(&mut store, "/b.jpg", 10, 0);
        store.get_mut(a).unwrap().simd = Some(Arc::new(SimilarityData::uniform(1)));
        let config = MatchConfig::new(MatchCriteria::SIM_LOW);
        assert_eq!(match_pair(&store, a, b, &config, false), (false, 0.0));
    }

    #[test]
    fn test_sort_cmp_missing_keys_last() {
        let mut store = ItemStore::new();
        let a = add(&mut store, "/a.jpg", 10, 0);
        let b = add(&mut store, "/b.jpg", 10, 0);
        let c = add(&mut store, "/c.jpg", 10, 0);
        store.get_mut(a).unwrap().checksum = Some("zzzz".into());

        let mut ids = vec![b, a, c];
        ids.sort_by(|&x, &y| {
            sort_cmp(
                store.get(x).unwrap(),
                store.get(y).unwrap(),
                MatchCriteria::CHECKSUM,
            )
        });
        // Present key first, then missing keys ordered by path.
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn test_binary_search_lower_bound() {
        let mut store = ItemStore::new();
        let ids: Vec<ItemId> = [10u64, 20, 20, 20, 30]
            .iter()
            .enumerate()
            .map(|(i, &size)| add(&mut store, &format!("/f{i}.jpg"), size, 0))
            .collect();
        let needle_id = add(&mut store, "/needle.jpg", 20, 0);
        let needle = store.get(needle_id).unwrap();

        let found = binary_search_first(&store, &ids, needle, MatchCriteria::SIZE);
        assert_eq!(found, Some(1));
        assert_eq!(
            found,
            linear_search_first(&store, &ids, needle, MatchCriteria::SIZE)
        );

        let missing_id = add(&mut store, "/missing.jpg", 25, 0);
        let missing = store.get(missing_id).unwrap();
        assert_eq!(
            binary_search_first(&store, &ids, missing, MatchCriteria::SIZE),
            None
        );
        assert_eq!(
            linear_search_first(&store, &ids, missing, MatchCriteria::SIZE),
            None
        );
    }
}
