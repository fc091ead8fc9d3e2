//! The share forest
//!
//! This module defines:
//! - `Item` - anything with a hash and an optional parent hash
//! - `Tracker` - owner of a set of items, indexed by parent, head and tail
//! - `TrackerEvent` - structural changes recorded for outside consumers
//!
//! A *tail* is the first unknown hash below a tree of known items (or `None`
//! for a chain that starts at genesis); a *head* is an item without known
//! children. Every item belongs to exactly one tail's tree.

pub mod delta;
pub mod view;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::ForestError;
use crate::skiplist::distance::{DistanceCache, DistanceSkipList};
use crate::ShareHash;
use delta::{Delta, HeightDelta};
use view::TrackerView;

/// A node of the forest.
pub trait Item {
    /// Identity of the item.
    fn hash(&self) -> ShareHash;

    /// Parent, or `None` for the genesis sentinel.
    fn previous_hash(&self) -> Option<ShareHash>;
}

/// Structural change recorded by a [`Tracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerEvent {
    /// An item was added
    Added(ShareHash),
    /// An item was removed
    Removed(ShareHash),
}

/// Owner of all known items and their parent/child indices.
///
/// Read queries take `&self`; the span and skip caches they fill are held in
/// `RefCell`s, so a tracker must not be shared between threads.
#[derive(Debug)]
pub struct Tracker<I, D = HeightDelta> {
    items: HashMap<ShareHash, I>,
    reverse: HashMap<Option<ShareHash>, HashSet<ShareHash>>,
    heads: HashMap<ShareHash, Option<ShareHash>>,
    tails: HashMap<Option<ShareHash>, HashSet<ShareHash>>,
    view: RefCell<TrackerView<D>>,
    skips: RefCell<DistanceCache>,
    events: Vec<TrackerEvent>,
}

impl<I: Item, D: Delta<I>> Default for Tracker<I, D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a share and its ancestors, nearest first.
pub struct Chain<'a, I> {
    items: &'a HashMap<ShareHash, I>,
    next: Option<ShareHash>,
    remaining: usize,
}

impl<'a, I: Item> Iterator for Chain<'a, I> {
    type Item = &'a I;

    fn next(&mut self) -> Option<&'a I> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.items.get(&self.next?)?;
        self.remaining -= 1;
        self.next = item.previous_hash();
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl<I: Item, D: Delta<I>> Tracker<I, D> {
    /// Empty tracker.
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
            reverse: HashMap::new(),
            heads: HashMap::new(),
            tails: HashMap::new(),
            view: RefCell::new(TrackerView::default()),
            skips: RefCell::new(DistanceCache::new()),
            events: Vec::new(),
        }
    }

    /// Tracker whose skip lengths come from a seeded generator.
    pub fn with_seed(seed: u64) -> Self {
        let tracker = Self::new();
        tracker.skips.replace(DistanceCache::with_seed(seed));
        tracker
    }

    /// Build a tracker from items in any order.
    pub fn from_items(items: impl IntoIterator<Item = I>) -> Result<Self, ForestError> {
        let mut tracker = Self::new();
        for item in items {
            tracker.add(item)?;
        }
        Ok(tracker)
    }

    /// All items, keyed by hash.
    pub fn items(&self) -> &HashMap<ShareHash, I> {
        &self.items
    }

    /// Item with `hash`, if known.
    pub fn get(&self, hash: &ShareHash) -> Option<&I> {
        self.items.get(hash)
    }

    /// Whether `hash` is a member.
    pub fn contains(&self, hash: &ShareHash) -> bool {
        self.items.contains_key(hash)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the tracker holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Head hash -> tail hash.
    pub fn heads(&self) -> &HashMap<ShareHash, Option<ShareHash>> {
        &self.heads
    }

    /// Tail hash -> heads rooted there.
    pub fn tails(&self) -> &HashMap<Option<ShareHash>, HashSet<ShareHash>> {
        &self.tails
    }

    /// Parent hash -> known children.
    pub fn reverse(&self) -> &HashMap<Option<ShareHash>, HashSet<ShareHash>> {
        &self.reverse
    }

    /// Known children of `hash`.
    pub fn children(&self, hash: Option<ShareHash>) -> impl Iterator<Item = &ShareHash> {
        self.reverse.get(&hash).into_iter().flatten()
    }

    /// Take the structural changes recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<TrackerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Add an item, joining it to any trees it connects.
    ///
    /// # Errors
    /// [`ForestError::AlreadyPresent`] if the hash is already known; nothing is changed.
    pub fn add(&mut self, item: I) -> Result<(), ForestError> {
        let hash = item.hash();
        if self.items.contains_key(&hash) {
            return Err(ForestError::AlreadyPresent(hash));
        }
        let parent = item.previous_hash();

        // heads that were waiting on this hash as their tail
        let heads = self
            .tails
            .remove(&Some(hash))
            .unwrap_or_else(|| HashSet::from([hash]));
        let tail = match parent.and_then(|parent| self.heads.remove(&parent)) {
            Some(tail) => tail,
            None => self.get_last(parent),
        };

        self.items.insert(hash, item);
        self.reverse.entry(parent).or_default().insert(hash);

        let rooted = self.tails.entry(tail).or_default();
        rooted.extend(heads.iter().copied());
        if let Some(parent) = parent {
            rooted.remove(&parent);
        }
        for head in heads {
            self.heads.insert(head, tail);
        }

        self.events.push(TrackerEvent::Added(hash));
        Ok(())
    }

    /// Remove a childless item.
    ///
    /// Its parent becomes a head again if it is known and has no other children.
    ///
    /// # Errors
    /// [`ForestError::NotFound`] or [`ForestError::HasChildren`]; nothing is changed.
    pub fn remove(&mut self, hash: &ShareHash) -> Result<I, ForestError> {
        let item = self.items.get(hash).ok_or(ForestError::NotFound(*hash))?;
        if self.children(Some(*hash)).next().is_some() {
            return Err(ForestError::HasChildren(*hash));
        }
        let parent = item.previous_hash();
        let delta = D::from_item(item);
        let tail = self.heads.remove(hash).ok_or(ForestError::NotFound(*hash))?;

        if let Some(rooted) = self.tails.get_mut(&tail) {
            rooted.remove(hash);
            if rooted.is_empty() {
                self.tails.remove(&tail);
            }
        }

        let parent_known = parent.is_some_and(|parent| self.items.contains_key(&parent));
        let only_child = self
            .reverse
            .get(&parent)
            .is_some_and(|siblings| siblings.len() == 1);
        if let (Some(parent_hash), true, true) = (parent, parent_known, only_child) {
            self.heads.insert(parent_hash, tail);
            self.tails.entry(tail).or_default().insert(parent_hash);
        }

        self.finish_removal(hash, parent, &delta)
    }

    /// Remove an item whose parent is unknown.
    ///
    /// Its children become roots; heads descending from it are re-rooted at
    /// its hash.
    ///
    /// # Errors
    /// [`ForestError::NotFound`] or [`ForestError::NotRoot`]; nothing is changed.
    pub fn remove_root(&mut self, hash: &ShareHash) -> Result<I, ForestError> {
        let item = self.items.get(hash).ok_or(ForestError::NotFound(*hash))?;
        let tail = item.previous_hash();
        if tail.is_some_and(|tail| self.items.contains_key(&tail)) {
            return Err(ForestError::NotRoot(*hash));
        }
        if self.children(Some(*hash)).next().is_none() {
            return self.remove(hash);
        }
        let delta = D::from_item(item);

        let alone = self.reverse.get(&tail).map_or(0, HashSet::len) <= 1;
        let moved: HashSet<ShareHash> = if alone {
            self.view
                .get_mut()
                .handle_root_removed_alone(&self.items, &delta);
            self.tails.remove(&tail).unwrap_or_default()
        } else {
            let descending: HashSet<ShareHash> = self
                .tails
                .get(&tail)
                .into_iter()
                .flatten()
                .filter(|head| self.is_child_of(hash, head) == Some(true))
                .copied()
                .collect();
            self.view.get_mut().handle_root_removed_shared::<I>(&delta);
            if let Some(rooted) = self.tails.get_mut(&tail) {
                rooted.retain(|head| !descending.contains(head));
                if rooted.is_empty() {
                    self.tails.remove(&tail);
                }
            }
            descending
        };
        for head in &moved {
            self.heads.insert(*head, Some(*hash));
        }
        self.tails.insert(Some(*hash), moved);

        self.finish_removal(hash, tail, &delta)
    }

    fn finish_removal(
        &mut self,
        hash: &ShareHash,
        parent: Option<ShareHash>,
        delta: &D,
    ) -> Result<I, ForestError> {
        if let Some(siblings) = self.reverse.get_mut(&parent) {
            siblings.remove(hash);
            if siblings.is_empty() {
                self.reverse.remove(&parent);
            }
        }
        let item = self.items.remove(hash).ok_or(ForestError::NotFound(*hash))?;
        self.view.get_mut().handle_removed::<I>(delta);
        self.skips.get_mut().forget(hash);
        self.events.push(TrackerEvent::Removed(*hash));
        debug!(share = %hash, "removed share");
        Ok(item)
    }

    /// Span from `hash` down to its tail.
    pub fn get_delta_to_last(&self, hash: Option<ShareHash>) -> D {
        self.view.borrow_mut().get_delta_to_last(&self.items, hash)
    }

    /// Span from `item` down to, but excluding, `ancestor`.
    ///
    /// # Errors
    /// [`ForestError::NotAncestor`] unless `ancestor` is on `item`'s parent chain.
    pub fn get_delta(&self, item: &ShareHash, ancestor: &ShareHash) -> Result<D, ForestError> {
        if self.is_child_of(ancestor, item) != Some(true) {
            return Err(ForestError::NotAncestor {
                descendant: *item,
                ancestor: *ancestor,
            });
        }
        let to_last = self.get_delta_to_last(Some(*item));
        Ok(to_last.strip_suffix(&self.get_delta_to_last(Some(*ancestor))))
    }

    /// Number of known ancestors of `hash` including itself, and its tail.
    ///
    /// The height counts shares rather than parent steps: for a chain
    /// `S0 <- S1 <- S2` rooted at genesis, `S2` reports `(3, None)`. Two
    /// parent steps from `S2` reach `S0`, and three reach the sentinel.
    pub fn get_height_and_last(&self, hash: Option<ShareHash>) -> (usize, Option<ShareHash>) {
        let delta = self.get_delta_to_last(hash);
        (usize::try_from(delta.height()).unwrap_or(0), delta.tail())
    }

    /// Number of known ancestors of `hash` including itself.
    pub fn get_height(&self, hash: Option<ShareHash>) -> usize {
        self.get_height_and_last(hash).0
    }

    /// Tail below `hash`.
    pub fn get_last(&self, hash: Option<ShareHash>) -> Option<ShareHash> {
        self.get_height_and_last(hash).1
    }

    /// Hash `n` parents back from `hash`; may be the tail itself.
    ///
    /// # Errors
    /// [`ForestError::InsufficientHeight`] if fewer than `n` ancestors are known.
    pub fn get_nth_parent_hash(
        &self,
        hash: Option<ShareHash>,
        n: usize,
    ) -> Result<Option<ShareHash>, ForestError> {
        let height = self.get_height(hash);
        if n > height {
            return Err(ForestError::InsufficientHeight {
                wanted: n,
                available: height,
            });
        }
        match hash {
            Some(start) if n > 0 => {
                let list = DistanceSkipList::new(&self.items);
                self.skips.borrow_mut().query(&list, start, &n)
            }
            _ => Ok(hash),
        }
    }

    /// `length` items starting at `hash` and walking parents.
    ///
    /// # Errors
    /// [`ForestError::InsufficientHeight`] if fewer than `length` items are known.
    pub fn get_chain(
        &self,
        hash: Option<ShareHash>,
        length: usize,
    ) -> Result<Chain<'_, I>, ForestError> {
        let height = self.get_height(hash);
        if length > height {
            return Err(ForestError::InsufficientHeight {
                wanted: length,
                available: height,
            });
        }
        Ok(Chain {
            items: &self.items,
            next: hash,
            remaining: length,
        })
    }

    /// Whether `possible_child` descends from (or is) `item`.
    ///
    /// `None` when the two are rooted at different tails.
    pub fn is_child_of(&self, item: &ShareHash, possible_child: &ShareHash) -> Option<bool> {
        let (height, last) = self.get_height_and_last(Some(*item));
        let (child_height, child_last) = self.get_height_and_last(Some(*possible_child));
        if last != child_last {
            return None;
        }
        let Some(height_up) = child_height.checked_sub(height) else {
            return Some(false);
        };
        Some(self.get_nth_parent_hash(Some(*possible_child), height_up).ok() == Some(Some(*item)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::{sha256d, Hash};

    #[derive(Debug, Clone, PartialEq)]
    struct Node(ShareHash, Option<ShareHash>);

    impl Item for Node {
        fn hash(&self) -> ShareHash {
            self.0
        }
        fn previous_hash(&self) -> Option<ShareHash> {
            self.1
        }
    }

    fn h(n: u32) -> ShareHash {
        sha256d::Hash::hash(&n.to_le_bytes())
    }

    fn node(n: u32, parent: Option<u32>) -> Node {
        Node(h(n), parent.map(h))
    }

    #[test]
    fn test_single_genesis_share() {
        let mut tracker: Tracker<Node> = Tracker::new();
        tracker.add(node(0, None)).unwrap();
        assert_eq!(tracker.heads(), &HashMap::from([(h(0), None)]));
        assert_eq!(tracker.tails(), &HashMap::from([(None, HashSet::from([h(0)]))]));
        assert_eq!(tracker.drain_events(), vec![TrackerEvent::Added(h(0))]);
    }

    #[test]
    fn test_chain_queries() {
        let tracker: Tracker<Node> =
            Tracker::from_items([node(0, None), node(1, Some(0)), node(2, Some(1))]).unwrap();
        assert_eq!(tracker.get_nth_parent_hash(Some(h(2)), 2).unwrap(), Some(h(0)));
        assert_eq!(tracker.get_nth_parent_hash(Some(h(2)), 3).unwrap(), None);
        // height counts shares, so two parent steps below S2 is a height of three
        assert_eq!(tracker.get_height_and_last(Some(h(2))), (3, None));
        let chain: Vec<ShareHash> = tracker
            .get_chain(Some(h(2)), 2)
            .unwrap()
            .map(Item::hash)
            .collect();
        assert_eq!(chain, vec![h(2), h(1)]);
        assert!(tracker.get_chain(Some(h(2)), 4).is_err());
        assert_eq!(tracker.is_child_of(&h(0), &h(2)), Some(true));
        assert_eq!(tracker.is_child_of(&h(2), &h(0)), Some(false));
    }

    #[test]
    fn test_filling_a_tail_merges_heads() {
        let mut tracker: Tracker<Node> = Tracker::new();
        tracker.add(node(2, Some(1))).unwrap();
        tracker.add(node(3, Some(1))).unwrap();
        assert_eq!(tracker.tails()[&Some(h(1))], HashSet::from([h(2), h(3)]));
        assert_eq!(tracker.get_height_and_last(Some(h(2))), (1, Some(h(1))));

        tracker.add(node(1, None)).unwrap();
        assert_eq!(tracker.tails().len(), 1);
        assert_eq!(tracker.tails()[&None], HashSet::from([h(2), h(3)]));
        assert_eq!(tracker.heads()[&h(3)], None);
        assert!(!tracker.heads().contains_key(&h(1)));
        assert_eq!(tracker.get_height_and_last(Some(h(3))), (2, None));
    }

    #[test]
    fn test_duplicate_add_is_rejected() {
        let mut tracker: Tracker<Node> = Tracker::new();
        tracker.add(node(0, None)).unwrap();
        assert_eq!(
            tracker.add(node(0, None)),
            Err(ForestError::AlreadyPresent(h(0)))
        );
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_remove_requires_childless_share() {
        let mut tracker: Tracker<Node> =
            Tracker::from_items([node(0, None), node(1, Some(0))]).unwrap();
        assert_eq!(tracker.remove(&h(0)), Err(ForestError::HasChildren(h(0))));
        assert_eq!(tracker.len(), 2);

        tracker.remove(&h(1)).unwrap();
        assert_eq!(tracker.heads(), &HashMap::from([(h(0), None)]));
        assert_eq!(tracker.get_height(Some(h(0))), 1);
    }

    #[test]
    fn test_remove_keeps_parent_with_other_children_internal() {
        let mut tracker: Tracker<Node> =
            Tracker::from_items([node(0, None), node(1, Some(0)), node(2, Some(0))]).unwrap();
        tracker.remove(&h(1)).unwrap();
        assert_eq!(tracker.heads(), &HashMap::from([(h(2), None)]));
        assert_eq!(tracker.tails()[&None], HashSet::from([h(2)]));
    }

    #[test]
    fn test_remove_root_retails_tree() {
        let mut tracker: Tracker<Node> =
            Tracker::from_items((0..6).map(|i| node(i, i.checked_sub(1)))).unwrap();
        assert_eq!(tracker.get_height(Some(h(5))), 6);
        tracker.remove_root(&h(0)).unwrap();
        assert_eq!(tracker.heads()[&h(5)], Some(h(0)));
        assert_eq!(tracker.get_height_and_last(Some(h(5))), (5, Some(h(0))));
        assert_eq!(tracker.get_nth_parent_hash(Some(h(5)), 5).unwrap(), Some(h(0)));
        assert_eq!(tracker.remove_root(&h(3)), Err(ForestError::NotRoot(h(3))));
    }

    #[test]
    fn test_remove_root_with_siblings_splits_tree() {
        // 0 -> 1 -> 3, 0 -> 2 -> 4, tail is None
        let mut tracker: Tracker<Node> = Tracker::from_items([
            node(1, Some(0)),
            node(2, Some(0)),
            node(3, Some(1)),
            node(4, Some(2)),
        ])
        .unwrap();
        assert_eq!(tracker.get_height(Some(h(3))), 2);
        tracker.remove_root(&h(1)).unwrap();
        assert_eq!(tracker.heads()[&h(3)], Some(h(1)));
        assert_eq!(tracker.heads()[&h(4)], Some(h(0)));
        assert_eq!(tracker.get_height_and_last(Some(h(3))), (1, Some(h(1))));
        assert_eq!(tracker.get_height_and_last(Some(h(4))), (2, Some(h(0))));
    }
}
