//! # Persistent Ordered Map
//!
//! An immutable, height-balanced (AVL) binary search tree. Every update returns a new map
//! version and leaves the receiver untouched; the two versions share every subtree that is
//! not on the updated root-to-leaf path. An insert or remove therefore allocates O(log n)
//! new nodes, no matter how large the map is.
//!
//! Subtree sizes are cached in every node, which makes [`PersistentMap::len`] O(1) and rank
//! queries ([`PersistentMap::by_rank`], [`PersistentMap::rank_of`]) O(log n).
//!
//! Nodes are reference-counted with [`Arc`], so a map version can be handed to other threads
//! and read there without any locking.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

type Link<K, V> = Option<Arc<Node<K, V>>>;

struct Node<K, V> {
    key: K,
    value: V,
    left: Link<K, V>,
    right: Link<K, V>,
    /// Height of the subtree rooted at this node, a leaf has height 1.
    height: u8,
    /// Number of entries in the subtree rooted at this node.
    size: usize,
}

fn height<K, V>(link: &Link<K, V>) -> u8 {
    link.as_ref().map_or(0, |node| node.height)
}

fn size<K, V>(link: &Link<K, V>) -> usize {
    link.as_ref().map_or(0, |node| node.size)
}

fn make<K, V>(key: K, value: V, left: Link<K, V>, right: Link<K, V>) -> Arc<Node<K, V>> {
    Arc::new(Node {
        height: height(&left).max(height(&right)) + 1,
        size: size(&left) + size(&right) + 1,
        key,
        value,
        left,
        right,
    })
}

/// Builds a node from `key`/`value` and two subtrees whose heights differ by at most two,
/// rotating once or twice to restore the AVL invariant.
fn balance<K: Clone, V: Clone>(
    key: K,
    value: V,
    left: Link<K, V>,
    right: Link<K, V>,
) -> Arc<Node<K, V>> {
    let (hl, hr) = (height(&left), height(&right));

    if hl > hr + 1 {
        if let Some(l) = left.as_ref() {
            if height(&l.left) >= height(&l.right) {
                return make(
                    l.key.clone(),
                    l.value.clone(),
                    l.left.clone(),
                    Some(make(key, value, l.right.clone(), right)),
                );
            }
            if let Some(lr) = l.right.as_ref() {
                return make(
                    lr.key.clone(),
                    lr.value.clone(),
                    Some(make(
                        l.key.clone(),
                        l.value.clone(),
                        l.left.clone(),
                        lr.left.clone(),
                    )),
                    Some(make(key, value, lr.right.clone(), right)),
                );
            }
        }
    } else if hr > hl + 1 {
        if let Some(r) = right.as_ref() {
            if height(&r.right) >= height(&r.left) {
                return make(
                    r.key.clone(),
                    r.value.clone(),
                    Some(make(key, value, left, r.left.clone())),
                    r.right.clone(),
                );
            }
            if let Some(rl) = r.left.as_ref() {
                return make(
                    rl.key.clone(),
                    rl.value.clone(),
                    Some(make(key, value, left, rl.left.clone())),
                    Some(make(
                        r.key.clone(),
                        r.value.clone(),
                        rl.right.clone(),
                        r.right.clone(),
                    )),
                );
            }
        }
    }

    make(key, value, left, right)
}

fn insert_node<K: Ord + Clone, V: Clone>(
    link: &Link<K, V>,
    key: K,
    value: V,
) -> Arc<Node<K, V>> {
    let Some(node) = link else {
        return make(key, value, None, None);
    };

    match key.cmp(&node.key) {
        Ordering::Less => balance(
            node.key.clone(),
            node.value.clone(),
            Some(insert_node(&node.left, key, value)),
            node.right.clone(),
        ),
        Ordering::Greater => balance(
            node.key.clone(),
            node.value.clone(),
            node.left.clone(),
            Some(insert_node(&node.right, key, value)),
        ),
        // Same key, replace the entry and keep both subtrees.
        Ordering::Equal => make(key, value, node.left.clone(), node.right.clone()),
    }
}

/// Removes the leftmost entry of the subtree, returning it along with the remaining subtree.
fn remove_min<K: Clone, V: Clone>(node: &Arc<Node<K, V>>) -> (K, V, Link<K, V>) {
    match &node.left {
        None => (node.key.clone(), node.value.clone(), node.right.clone()),
        Some(left) => {
            let (key, value, rest) = remove_min(left);
            let rebuilt = balance(
                node.key.clone(),
                node.value.clone(),
                rest,
                node.right.clone(),
            );
            (key, value, Some(rebuilt))
        }
    }
}

/// Returns `None` if `key` is not present, in which case nothing has been reallocated.
fn remove_node<K: Ord + Clone, V: Clone>(link: &Link<K, V>, key: &K) -> Option<Link<K, V>> {
    let node = link.as_ref()?;

    match key.cmp(&node.key) {
        Ordering::Less => {
            let left = remove_node(&node.left, key)?;
            Some(Some(balance(
                node.key.clone(),
                node.value.clone(),
                left,
                node.right.clone(),
            )))
        }
        Ordering::Greater => {
            let right = remove_node(&node.right, key)?;
            Some(Some(balance(
                node.key.clone(),
                node.value.clone(),
                node.left.clone(),
                right,
            )))
        }
        Ordering::Equal => Some(match (&node.left, &node.right) {
            (None, None) => None,
            (Some(_), None) => node.left.clone(),
            (None, Some(_)) => node.right.clone(),
            (Some(_), Some(right)) => {
                let (succ_key, succ_value, rest) = remove_min(right);
                Some(balance(succ_key, succ_value, node.left.clone(), rest))
            }
        }),
    }
}

/// Immutable ordered map with structural sharing between versions.
///
/// Cloning a map is O(1): only the root pointer is copied.
pub struct PersistentMap<K, V> {
    root: Link<K, V>,
}

impl<K, V> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self { root: None }
    }
}

impl<K, V> PersistentMap<K, V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries in the map.
    pub fn len(&self) -> usize {
        size(&self.root)
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Height of the underlying tree, zero for the empty map.
    pub fn depth(&self) -> usize {
        height(&self.root) as usize
    }

    /// Returns `true` if both maps are the very same version (same root node).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Returns the `rank`-th entry in key order.
    pub fn by_rank(&self, rank: usize) -> Option<(&K, &V)> {
        let mut rank = rank;
        let mut node = self.root.as_deref()?;
        loop {
            let left_size = size(&node.left);
            match rank.cmp(&left_size) {
                Ordering::Less => node = node.left.as_deref()?,
                Ordering::Equal => return Some((&node.key, &node.value)),
                Ordering::Greater => {
                    rank -= left_size + 1;
                    node = node.right.as_deref()?;
                }
            }
        }
    }

    /// Returns the entry with the smallest key.
    pub fn first(&self) -> Option<(&K, &V)> {
        self.by_rank(0)
    }

    /// Iterates over the entries in key order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter {
            stack: Vec::with_capacity(self.depth()),
            remaining: self.len(),
        };
        iter.push_left(self.root.as_deref());
        iter
    }

    /// Iterates over the keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    /// Iterates over the values in key order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }
}

impl<K: Ord, V> PersistentMap<K, V> {
    /// Looks up the value stored under `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        let mut link = self.root.as_deref();
        while let Some(node) = link {
            match key.cmp(&node.key) {
                Ordering::Less => link = node.left.as_deref(),
                Ordering::Greater => link = node.right.as_deref(),
                Ordering::Equal => return Some(&node.value),
            }
        }
        None
    }

    /// Returns `true` if the map contains `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Returns the position of `key` in key order.
    pub fn rank_of(&self, key: &K) -> Option<usize> {
        let mut rank = 0;
        let mut link = self.root.as_deref();
        while let Some(node) = link {
            match key.cmp(&node.key) {
                Ordering::Less => link = node.left.as_deref(),
                Ordering::Equal => return Some(rank + size(&node.left)),
                Ordering::Greater => {
                    rank += size(&node.left) + 1;
                    link = node.right.as_deref();
                }
            }
        }
        None
    }
}

impl<K: Ord + Clone, V: Clone> PersistentMap<K, V> {
    /// Returns a new map with `key` mapped to `value`, replacing any previous value.
    ///
    /// The receiver is not modified.
    pub fn insert(&self, key: K, value: V) -> Self {
        Self {
            root: Some(insert_node(&self.root, key, value)),
        }
    }

    /// Returns a new map without `key`.
    ///
    /// If `key` is absent, the returned map shares the receiver's root.
    pub fn remove(&self, key: &K) -> Self {
        match remove_node(&self.root, key) {
            Some(root) => Self { root },
            None => self.clone(),
        }
    }
}

impl<K: Ord + Clone, V: Clone> FromIterator<(K, V)> for PersistentMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |map, (key, value)| map.insert(key, value))
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for PersistentMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (self.len() == other.len() && self.iter().eq(other.iter()))
    }
}

impl<K: Eq, V: Eq> Eq for PersistentMap<K, V> {}

impl<'a, K, V> IntoIterator for &'a PersistentMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// In-order iterator over a [`PersistentMap`].
pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn push_left(&mut self, mut link: Option<&'a Node<K, V>>) {
        while let Some(node) = link {
            self.stack.push(node);
            link = node.left.as_deref();
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(node.right.as_deref());
        self.remaining -= 1;
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
