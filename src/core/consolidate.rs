//! Greedy consolidation of the raw match graph into disjoint groups,
//! each rooted at one primary-set item.

use std::collections::HashSet;

use crate::core::criteria::MatchConfig;
use crate::core::graph;
use crate::core::item::{ItemId, ItemStore};
use crate::core::predicate::match_pair;

/// Recompute group ranks, drop matchless items and sort the survivors by
/// group rank, strongest first. Ties keep the relative order of `ids`.
fn rank_sort(store: &mut ItemStore, ids: &[ItemId]) -> Vec<ItemId> {
    let mut roots: Vec<ItemId> = Vec::new();
    for &id in ids {
        graph::update_group_rank(store, id);
        if store.get(id).map_or(false, |item| !item.group.is_empty()) {
            roots.push(id);
        }
    }
    roots.sort_by(|&a, &b| {
        let ra = store.get(a).map_or(0.0, |item| item.group_rank);
        let rb = store.get(b).map_or(0.0, |item| item.group_rank);
        rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
    });
    roots
}

/// Decide the fate of one edge. The pair is confirmed as parent/child
/// when either endpoint is the other's strongest neighbor; otherwise the
/// edge is dropped. On confirmation the parent's weakly-connected
/// children (a single edge) are re-homed onto the child with a freshly
/// computed precise rank, the parent keeps the child as its only link,
/// and parent and orphans leave the root list.
fn unlink_by_rank(
    store: &mut ItemStore,
    child: ItemId,
    parent: ItemId,
    removed: &mut HashSet<ItemId>,
    config: &MatchConfig,
    second_set: bool,
) {
    let confirmed = graph::highest_rank_neighbor(store, parent) == Some(child)
        || graph::highest_rank_neighbor(store, child) == Some(parent);
    if !confirmed {
        graph::unlink(store, child, parent);
        return;
    }

    log::debug!("confirmed link {:?} to {:?}", child, parent);

    let neighbors: Vec<ItemId> = store
        .get(parent)
        .map(|item| item.group.iter().map(|edge| edge.other).collect())
        .unwrap_or_default();
    for orphan in neighbors {
        let weakly_connected = store
            .get(orphan)
            .map_or(false, |item| item.group.len() < 2);
        if orphan == child || !weakly_connected {
            continue;
        }
        graph::clear(store, orphan, true);
        if !second_set || store.get(orphan).map_or(false, |item| item.second) {
            // Re-homed regardless of the match outcome; only the rank is
            // taken from the precise comparison.
            let (_, rank) = match_pair(store, orphan, child, config, false);
            graph::link(store, orphan, child, rank);
        }
        removed.insert(orphan);
    }

    let rank = graph::edge_rank(store, child, parent);
    graph::clear(store, parent, true);
    graph::link(store, child, parent, rank);
    removed.insert(parent);
}

/// Resolve every root's edges, weakest first, against the roots ranked
/// before it. Returns the surviving roots in their incoming order.
fn trim_groups(
    store: &mut ItemStore,
    roots: Vec<ItemId>,
    config: &MatchConfig,
    second_set: bool,
) -> Vec<ItemId> {
    let mut removed: HashSet<ItemId> = HashSet::new();
    for &root in &roots {
        if removed.contains(&root) {
            continue;
        }
        let neighbors: Vec<ItemId> = store
            .get(root)
            .map(|item| item.group.iter().map(|edge| edge.other).collect())
            .unwrap_or_default();
        for &other in neighbors.iter().rev() {
            // An earlier resolution may have already consumed this edge.
            if !graph::edge_exists(store, other, root) {
                continue;
            }
            unlink_by_rank(store, root, other, &mut removed, config, second_set);
        }
    }
    roots
        .into_iter()
        .filter(|id| !removed.contains(id))
        .collect()
}

fn sort_children(store: &mut ItemStore, roots: &[ItemId]) {
    for &root in roots {
        if let Some(item) = store.get_mut(root) {
            item.group.sort_by(|a, b| {
                b.rank
                    .partial_cmp(&a.rank)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }
}

/// Largest group first; equal sizes rank weakest first.
fn totals_sort(store: &ItemStore, roots: &mut [ItemId]) {
    roots.sort_by(|&a, &b| {
        let (ia, ib) = match (store.get(a), store.get(b)) {
            (Some(ia), Some(ib)) => (ia, ib),
            _ => return std::cmp::Ordering::Equal,
        };
        ib.group
            .len()
            .cmp(&ia.group.len())
            .then(
                ia.group_rank
                    .partial_cmp(&ib.group_rank)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
}

/// Reduce the raw match graph to disjoint groups and return their roots,
/// ordered by group rank (or by totals when configured). Roots always
/// come from the primary set; in two-set mode secondary items appear
/// only as children.
pub fn consolidate(store: &mut ItemStore, config: &MatchConfig, second_set: bool) -> Vec<ItemId> {
    let candidates = store.primary().to_vec();
    let roots = rank_sort(store, &candidates);
    log::debug!("consolidating {} matched items", roots.len());

    let roots = trim_groups(store, roots, config, second_set);
    log::debug!("{} unique groups", roots.len());

    sort_children(store, &roots);

    let mut roots = rank_sort(store, &roots);
    if config.sort_totals {
        totals_sort(store, &mut roots);
    }
    roots
}
