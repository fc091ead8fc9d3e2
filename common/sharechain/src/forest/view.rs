//! Cached span sums from any share down to its tail.
//!
//! Every share with a cached entry stores the span from itself to the head of
//! a shared *reference*; each reference stores the span from its head to a
//! tail anchor. When a tail gets filled in, the reference anchored there keeps
//! pointing at the old boundary and lookups continue walking, compressing the
//! walked path into a fresh reference as they go. Removal drops the entries
//! that mention the removed share.

use std::collections::{HashMap, HashSet};

use super::delta::Delta;
use super::Item;
use crate::ShareHash;

type RefId = u64;

/// Span cache owned by a [`super::Tracker`].
#[derive(Debug)]
pub struct TrackerView<D> {
    deltas: HashMap<ShareHash, (D, RefId)>,
    reverse_deltas: HashMap<RefId, HashSet<ShareHash>>,
    delta_refs: HashMap<RefId, D>,
    reverse_delta_refs: HashMap<Option<ShareHash>, RefId>,
    next_ref: RefId,
}

impl<D> Default for TrackerView<D> {
    fn default() -> Self {
        Self {
            deltas: HashMap::new(),
            reverse_deltas: HashMap::new(),
            delta_refs: HashMap::new(),
            reverse_delta_refs: HashMap::new(),
            next_ref: 0,
        }
    }
}

impl<D> TrackerView<D> {
    /// Number of shares with a cached entry.
    pub fn cached_len(&self) -> usize {
        self.deltas.len()
    }

    /// Number of live references.
    pub fn ref_count(&self) -> usize {
        self.delta_refs.len()
    }

    /// Drop every cached entry.
    pub fn clear(&mut self) {
        self.deltas.clear();
        self.reverse_deltas.clear();
        self.delta_refs.clear();
        self.reverse_delta_refs.clear();
    }
}

impl<D> TrackerView<D> {
    fn span<I: Item>(&self, items: &HashMap<ShareHash, I>, hash: &ShareHash) -> D
    where
        D: Delta<I>,
    {
        match self.deltas.get(hash) {
            Some((partial, ref_id)) => partial.concat(&self.delta_refs[ref_id]),
            None => D::from_item(&items[hash]),
        }
    }

    fn drop_ref<I>(&mut self, ref_id: RefId)
    where
        D: Delta<I>,
    {
        self.reverse_deltas.remove(&ref_id);
        if let Some(ref_delta) = self.delta_refs.remove(&ref_id) {
            self.reverse_delta_refs.remove(&ref_delta.tail());
        }
    }

    fn set_delta<I>(&mut self, hash: ShareHash, delta: D)
    where
        D: Delta<I>,
    {
        let anchor = delta.tail();
        let ref_id = match self.reverse_delta_refs.get(&anchor) {
            Some(ref_id) => *ref_id,
            None => {
                let ref_id = self.next_ref;
                self.next_ref += 1;
                self.delta_refs.insert(ref_id, D::none(anchor));
                self.reverse_deltas.insert(ref_id, HashSet::new());
                self.reverse_delta_refs.insert(anchor, ref_id);
                ref_id
            }
        };
        let ref_delta = self.delta_refs[&ref_id].clone();

        if let Some((_, old_ref)) = self.deltas.get(&hash) {
            let old_ref = *old_ref;
            let emptied = match self.reverse_deltas.get_mut(&old_ref) {
                Some(members) => {
                    members.remove(&hash);
                    members.is_empty()
                }
                None => false,
            };
            if emptied && old_ref != ref_id {
                self.drop_ref::<I>(old_ref);
            }
        }

        self.deltas
            .insert(hash, (delta.strip_suffix(&ref_delta), ref_id));
        self.reverse_deltas.entry(ref_id).or_default().insert(hash);
    }

    /// Span from `hash` down to its tail, compressing the walked path.
    ///
    /// `None` and unknown hashes yield an empty span anchored at themselves.
    pub fn get_delta_to_last<I: Item>(
        &mut self,
        items: &HashMap<ShareHash, I>,
        hash: Option<ShareHash>,
    ) -> D
    where
        D: Delta<I>,
    {
        let mut delta = D::none(hash);
        let mut walked = Vec::new();
        while let Some(tail) = delta.tail().filter(|tail| items.contains_key(tail)) {
            walked.push((tail, delta.clone()));
            let step = self.span(items, &tail);
            delta = delta.concat(&step);
        }
        for (hash, upper) in walked {
            self.set_delta::<I>(hash, delta.strip_prefix(&upper));
        }
        delta
    }

    /// Forget the entry of a removed share.
    pub fn handle_removed<I>(&mut self, delta: &D)
    where
        D: Delta<I>,
    {
        let Some(head) = delta.head() else {
            return;
        };
        if let Some((_, ref_id)) = self.deltas.remove(&head) {
            let emptied = match self.reverse_deltas.get_mut(&ref_id) {
                Some(members) => {
                    members.remove(&head);
                    members.is_empty()
                }
                None => false,
            };
            if emptied {
                self.drop_ref::<I>(ref_id);
            }
        }
    }

    /// A root is about to be removed and it is its tail's only child.
    ///
    /// The reference anchored at the old tail is shortened to end at the root,
    /// which becomes the new tail of the whole tree.
    pub fn handle_root_removed_alone<I: Item>(
        &mut self,
        items: &HashMap<ShareHash, I>,
        delta: &D,
    ) where
        D: Delta<I>,
    {
        let tail = delta.tail();
        let root = delta.head();
        if !self.reverse_delta_refs.contains_key(&tail) {
            return;
        }

        // fold any reference anchored at the root into the one at the tail
        if let Some(ref_id) = self.reverse_delta_refs.get(&root).copied() {
            let members: Vec<ShareHash> = self
                .reverse_deltas
                .get(&ref_id)
                .map(|members| members.iter().copied().collect())
                .unwrap_or_default();
            for member in members {
                self.get_delta_to_last(items, Some(member));
            }
        }
        debug_assert!(!self.reverse_delta_refs.contains_key(&root));

        let Some(ref_id) = self.reverse_delta_refs.remove(&tail) else {
            return;
        };
        let shortened = self.delta_refs[&ref_id].strip_suffix(delta);
        self.delta_refs.insert(ref_id, shortened);
        self.reverse_delta_refs.insert(root, ref_id);
    }

    /// A root is about to be removed while its tail has other children.
    ///
    /// Entries anchored at the shared tail are dropped; they are rebuilt on
    /// the next lookup.
    pub fn handle_root_removed_shared<I>(&mut self, delta: &D)
    where
        D: Delta<I>,
    {
        let Some(ref_id) = self.reverse_delta_refs.remove(&delta.tail()) else {
            return;
        };
        self.delta_refs.remove(&ref_id);
        for member in self.reverse_deltas.remove(&ref_id).unwrap_or_default() {
            self.deltas.remove(&member);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::delta::HeightDelta;
    use bitcoin::hashes::{sha256d, Hash};

    #[derive(Debug, Clone)]
    struct Node {
        hash: ShareHash,
        previous: Option<ShareHash>,
    }

    impl Item for Node {
        fn hash(&self) -> ShareHash {
            self.hash
        }
        fn previous_hash(&self) -> Option<ShareHash> {
            self.previous
        }
    }

    fn h(n: u32) -> ShareHash {
        sha256d::Hash::hash(&n.to_le_bytes())
    }

    fn chain(len: u32) -> HashMap<ShareHash, Node> {
        (0..len)
            .map(|i| {
                let previous = if i == 0 { None } else { Some(h(i - 1)) };
                (h(i), Node { hash: h(i), previous })
            })
            .collect()
    }

    #[test]
    fn test_delta_to_last_counts_chain() {
        let items = chain(10);
        let mut view: TrackerView<HeightDelta> = TrackerView::default();
        let delta = view.get_delta_to_last(&items, Some(h(9)));
        assert_eq!(delta.height, 10);
        assert_eq!(delta.tail, None);
        // every walked share now resolves through one reference
        assert_eq!(view.cached_len(), 10);
        assert_eq!(view.ref_count(), 1);
        assert_eq!(view.get_delta_to_last(&items, Some(h(4))).height, 5);
    }

    #[test]
    fn test_unknown_and_none_are_empty() {
        let items = chain(3);
        let mut view: TrackerView<HeightDelta> = TrackerView::default();
        let unknown = view.get_delta_to_last(&items, Some(h(77)));
        assert_eq!((unknown.height, unknown.tail), (0, Some(h(77))));
        assert_eq!(view.get_delta_to_last(&items, None).height, 0);
    }

    #[test]
    fn test_filled_tail_extends_cached_spans() {
        let mut items = chain(6);
        let lower = items.remove(&h(0)).unwrap();
        let mut view: TrackerView<HeightDelta> = TrackerView::default();
        let before = view.get_delta_to_last(&items, Some(h(5)));
        assert_eq!((before.height, before.tail), (5, Some(h(0))));

        items.insert(h(0), lower);
        let after = view.get_delta_to_last(&items, Some(h(5)));
        assert_eq!((after.height, after.tail), (6, None));
        assert_eq!(view.get_delta_to_last(&items, Some(h(2))).height, 3);
    }

    #[test]
    fn test_removing_head_drops_entry() {
        let mut items = chain(4);
        let mut view: TrackerView<HeightDelta> = TrackerView::default();
        view.get_delta_to_last(&items, Some(h(3)));
        let head = items.remove(&h(3)).unwrap();
        view.handle_removed::<Node>(&HeightDelta::from_item(&head));
        assert_eq!(view.cached_len(), 3);
        assert_eq!(view.get_delta_to_last(&items, Some(h(2))).height, 3);
    }

    #[test]
    fn test_removing_sole_root_moves_reference() {
        let mut items = chain(5);
        let mut view: TrackerView<HeightDelta> = TrackerView::default();
        view.get_delta_to_last(&items, Some(h(4)));

        let root_delta = HeightDelta::from_item(&items[&h(0)]);
        view.handle_root_removed_alone(&items, &root_delta);
        items.remove(&h(0));
        view.handle_removed::<Node>(&root_delta);

        let delta = view.get_delta_to_last(&items, Some(h(4)));
        assert_eq!((delta.height, delta.tail), (4, Some(h(0))));
        let delta = view.get_delta_to_last(&items, Some(h(1)));
        assert_eq!((delta.height, delta.tail), (1, Some(h(0))));
    }
}
