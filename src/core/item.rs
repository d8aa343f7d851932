use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::similarity::SimilarityData;

/// Immutable metadata of an indexed file. The engine never touches the
/// filesystem; everything here is supplied by the caller up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub mtime: i64,
}

/// Shared, non-owning handle to a file descriptor. Cheap to clone; the
/// engine and any in-flight comparison jobs may hold copies concurrently.
#[derive(Debug, Clone)]
pub struct FileRef {
    inner: Arc<FileMeta>,
}

impl FileRef {
    pub fn new(path: impl Into<String>, size: u64, mtime: i64) -> Self {
        let path = path.into();
        let name = path
            .rsplit('/')
            .next()
            .unwrap_or(path.as_str())
            .to_string();
        Self {
            inner: Arc::new(FileMeta {
                path,
                name,
                size,
                mtime,
            }),
        }
    }

    pub fn meta(&self) -> &FileMeta {
        &self.inner
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Case-insensitive collate key for the name-ci criteria.
    pub fn name_key_ci(&self) -> String {
        self.inner.name.to_lowercase()
    }

    pub fn size(&self) -> u64 {
        self.inner.size
    }

    pub fn mtime(&self) -> i64 {
        self.inner.mtime
    }
}

/// Stable handle into the [`ItemStore`] arena. The generation guards
/// against slot reuse: a handle taken before an item was removed can
/// never resolve to whatever entity later occupies the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId {
    index: u32,
    generation: u32,
}

/// One half of a symmetric match relation. The reciprocal half lives in
/// the other item's edge list; the graph primitives keep the two in sync.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchEdge {
    pub other: ItemId,
    pub rank: f64,
}

/// An indexed, comparable representation of one file.
#[derive(Debug, Clone)]
pub struct Item {
    pub file: FileRef,
    /// 0 until measured.
    pub width: u32,
    /// 0 until measured.
    pub height: u32,
    pub checksum: Option<String>,
    pub simd: Option<Arc<SimilarityData>>,
    /// Whether this item belongs to the second comparison set.
    pub second: bool,
    /// Match edges to other items currently believed to be duplicates.
    pub group: Vec<MatchEdge>,
    /// Mean of the edge ranks; 0.0 when the edge list is empty.
    pub group_rank: f64,
}

impl Item {
    fn new(file: FileRef, second: bool) -> Self {
        Self {
            file,
            width: 0,
            height: 0,
            checksum: None,
            simd: None,
            second,
            group: Vec::new(),
            group_rank: 0.0,
        }
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        if self.width == 0 && self.height == 0 {
            None
        } else {
            Some((self.width, self.height))
        }
    }

    /// Packed sort key, (width << 16) + height.
    pub fn dimensions_key(&self) -> Option<u64> {
        self.dimensions()
            .map(|(w, h)| ((w as u64) << 16) + h as u64)
    }
}

struct Slot {
    generation: u32,
    item: Option<Item>,
}

/// Generational arena owning every entity, plus the insertion-ordered id
/// lists of the primary and secondary sets. Paths are unique across both
/// sets; re-adding a known path is ignored.
#[derive(Default)]
pub struct ItemStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    list: Vec<ItemId>,
    second_list: Vec<ItemId>,
    by_path: HashMap<String, ItemId>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file: FileRef, second: bool) -> Option<ItemId> {
        if self.by_path.contains_key(file.path()) {
            log::debug!("ignoring duplicate path {}", file.path());
            return None;
        }

        let path = file.path().to_string();
        let item = Item::new(file, second);
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.item = Some(item);
                ItemId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    item: Some(item),
                });
                ItemId {
                    index,
                    generation: 0,
                }
            }
        };

        if second {
            self.second_list.push(id);
        } else {
            self.list.push(id);
        }
        self.by_path.insert(path, id);
        Some(id)
    }

    pub fn remove(&mut self, id: ItemId) -> Option<Item> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let item = slot.item.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.by_path.remove(item.file.path());
        if item.second {
            self.second_list.retain(|x| *x != id);
        } else {
            self.list.retain(|x| *x != id);
        }
        Some(item)
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.item.as_ref()
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.item.as_mut()
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.get(id).is_some()
    }

    /// Mutable access to two distinct items at once.
    pub fn get2_mut(&mut self, a: ItemId, b: ItemId) -> Option<(&mut Item, &mut Item)> {
        if a == b || !self.contains(a) || !self.contains(b) {
            return None;
        }
        let (ia, ib) = (a.index as usize, b.index as usize);
        let (first, second) = if ia < ib {
            let (lo, hi) = self.slots.split_at_mut(ib);
            (&mut lo[ia], &mut hi[0])
        } else {
            let (lo, hi) = self.slots.split_at_mut(ia);
            (&mut hi[0], &mut lo[ib])
        };
        Some((first.item.as_mut()?, second.item.as_mut()?))
    }

    pub fn find_by_path(&self, path: &str) -> Option<ItemId> {
        self.by_path.get(path).copied()
    }

    /// Insertion-ordered ids of the primary set.
    pub fn primary(&self) -> &[ItemId] {
        &self.list
    }

    /// Insertion-ordered ids of the secondary set.
    pub fn secondary(&self) -> &[ItemId] {
        &self.second_list
    }

    pub fn len(&self) -> usize {
        self.list.len() + self.second_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty() && self.second_list.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.list.clear();
        self.second_list.clear();
        self.by_path.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> FileRef {
        FileRef::new(path, 100, 0)
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut store = ItemStore::new();
        let a = store.insert(file("/photos/a.jpg"), false).unwrap();
        let b = store.insert(file("/photos/b.jpg"), true).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.primary(), &[a]);
        assert_eq!(store.secondary(), &[b]);
        assert_eq!(store.get(a).unwrap().file.name(), "a.jpg");
        assert!(store.get(b).unwrap().second);
        assert_eq!(store.find_by_path("/photos/a.jpg"), Some(a));
    }

    #[test]
    fn test_duplicate_path_ignored() {
        let mut store = ItemStore::new();
        let a = store.insert(file("/x.jpg"), false);
        assert!(a.is_some());
        assert!(store.insert(file("/x.jpg"), false).is_none());
        assert!(store.insert(file("/x.jpg"), true).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut store = ItemStore::new();
        let a = store.insert(file("/a.jpg"), false).unwrap();
        store.remove(a).unwrap();
        assert!(!store.contains(a));

        // Slot is reused; the old handle must not resolve to the new item.
        let b = store.insert(file("/b.jpg"), false).unwrap();
        assert!(store.get(a).is_none());
        assert_eq!(store.get(b).unwrap().file.path(), "/b.jpg");
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_updates_lists() {
        let mut store = ItemStore::new();
        let a = store.insert(file("/a.jpg"), false).unwrap();
        let b = store.insert(file("/b.jpg"), false).unwrap();
        store.remove(a);
        assert_eq!(store.primary(), &[b]);
        assert!(store.find_by_path("/a.jpg").is_none());
        assert!(store.remove(a).is_none());
    }

    #[test]
    fn test_dimensions_key() {
        let mut store = ItemStore::new();
        let a = store.insert(file("/a.jpg"), false).unwrap();
        assert!(store.get(a).unwrap().dimensions_key().is_none());
        let item = store.get_mut(a).unwrap();
        item.width = 640;
        item.height = 480;
        assert_eq!(item.dimensions_key(), Some((640u64 << 16) + 480));
    }

    #[test]
    fn test_get2_mut_disjoint() {
        let mut store = ItemStore::new();
        let a = store.insert(file("/a.jpg"), false).unwrap();
        let b = store.insert(file("/b.jpg"), false).unwrap();
        assert!(store.get2_mut(a, a).is_none());
        let (ia, ib) = store.get2_mut(a, b).unwrap();
        ia.width = 1;
        ib.width = 2;
        assert_eq!(store.get(a).unwrap().width, 1);
        assert_eq!(store.get(b).unwrap().width, 2);
    }
}
