//! Link/unlink primitives of the match graph. Every edge mutation in the
//! crate goes through these functions, which is what keeps the edge set
//! symmetric: an edge from `a` to `b` always has its reciprocal from `b`
//! to `a`, carrying the same rank.

use crate::core::item::{ItemId, ItemStore, MatchEdge};

fn find_edge(store: &ItemStore, child: ItemId, parent: ItemId) -> Option<usize> {
    store
        .get(parent)?
        .group
        .iter()
        .position(|edge| edge.other == child)
}

fn link_child(store: &mut ItemStore, child: ItemId, parent: ItemId, rank: f64) {
    if let Some(item) = store.get_mut(parent) {
        item.group.push(MatchEdge { other: child, rank });
    }
}

fn unlink_child(store: &mut ItemStore, child: ItemId, parent: ItemId) {
    if let Some(pos) = find_edge(store, child, parent) {
        if let Some(item) = store.get_mut(parent) {
            item.group.remove(pos);
        }
    }
}

/// Link `a` and `b` as both parent and child of each other.
///
/// Idempotency is the caller's responsibility: callers must check
/// [`edge_exists`] first where a duplicate edge would corrupt the
/// aggregate rank.
pub fn link(store: &mut ItemStore, a: ItemId, b: ItemId, rank: f64) {
    link_child(store, a, b, rank);
    link_child(store, b, a, rank);
}

/// Remove both halves of the edge between `a` and `b`. A missing half is
/// a no-op, not an error.
pub fn unlink(store: &mut ItemStore, a: ItemId, b: ItemId) {
    unlink_child(store, a, b);
    unlink_child(store, b, a);
}

/// Drop all of `parent`'s edges and reset its group rank. With
/// `unlink_children` set, each former child also loses its reciprocal
/// edge back to `parent`.
pub fn clear(store: &mut ItemStore, parent: ItemId, unlink_children: bool) {
    if unlink_children {
        let children: Vec<ItemId> = match store.get(parent) {
            Some(item) => item.group.iter().map(|edge| edge.other).collect(),
            None => return,
        };
        for child in children {
            unlink_child(store, parent, child);
        }
    }
    if let Some(item) = store.get_mut(parent) {
        item.group.clear();
        item.group_rank = 0.0;
    }
}

pub fn edge_exists(store: &ItemStore, child: ItemId, parent: ItemId) -> bool {
    find_edge(store, child, parent).is_some()
}

/// Rank of the edge from `parent` to `child`, 0.0 when absent.
pub fn edge_rank(store: &ItemStore, child: ItemId, parent: ItemId) -> f64 {
    find_edge(store, child, parent)
        .map(|pos| store.get(parent).map_or(0.0, |item| item.group[pos].rank))
        .unwrap_or(0.0)
}

/// Neighbor of `child` with the highest rank; on ties the first
/// encountered wins.
pub fn highest_rank_neighbor(store: &ItemStore, child: ItemId) -> Option<ItemId> {
    let item = store.get(child)?;
    let mut best: Option<&MatchEdge> = None;
    for edge in &item.group {
        if best.map_or(true, |b| edge.rank > b.rank) {
            best = Some(edge);
        }
    }
    best.map(|edge| edge.other)
}

/// Recompute `group_rank` as the mean of the edge ranks.
pub fn update_group_rank(store: &mut ItemStore, parent: ItemId) {
    let Some(item) = store.get_mut(parent) else {
        return;
    };
    if item.group.is_empty() {
        item.group_rank = 0.0;
    } else {
        let sum: f64 = item.group.iter().map(|edge| edge.rank).sum();
        item.group_rank = sum / item.group.len() as f64;
    }
}

/// Resolve the canonical root for `child` within the current root set:
/// `child` itself when it is a root, otherwise its first neighbor that
/// is. `None` when the item is fully disconnected from the roots.
pub fn find_parent(store: &ItemStore, dupes: &[ItemId], child: ItemId) -> Option<ItemId> {
    if dupes.contains(&child) {
        return Some(child);
    }
    store
        .get(child)?
        .group
        .iter()
        .map(|edge| edge.other)
        .find(|other| dupes.contains(other))
}

/// Clear edges on every listed item without touching the reciprocals
/// (used when both endpoints of every edge are in the list anyway).
pub fn reset_all(store: &mut ItemStore, ids: &[ItemId]) {
    for &id in ids {
        clear(store, id, false);
    }
}

/// Transfer `old_parent`'s edge list to `new_parent` and substitute it in
/// the root list. `new_parent` must currently be linked to `old_parent`;
/// anything else is a no-op. Edge ranks are preserved and the promoted
/// root's group rank is recomputed.
pub fn reparent(
    store: &mut ItemStore,
    dupes: &mut [ItemId],
    old_parent: ItemId,
    new_parent: ItemId,
) {
    if !edge_exists(store, old_parent, new_parent) {
        return;
    }
    log::debug!(
        "reparenting group: {:?} -> {:?}",
        old_parent,
        new_parent
    );

    // Detaches new_parent from old_parent both ways.
    clear(store, new_parent, true);

    let edges = match store.get_mut(old_parent) {
        Some(item) => std::mem::take(&mut item.group),
        None => return,
    };
    for edge in &edges {
        unlink_child(store, old_parent, edge.other);
        link_child(store, new_parent, edge.other, edge.rank);
    }
    if let Some(item) = store.get_mut(new_parent) {
        item.group = edges;
    }
    update_group_rank(store, new_parent);
    update_group_rank(store, old_parent);

    if let Some(slot) = dupes.iter_mut().find(|id| **id == old_parent) {
        *slot = new_parent;
    }
}
