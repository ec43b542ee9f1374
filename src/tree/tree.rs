//! # The tree3 Engine
//!
//! A hybrid B+ tree: inner routing nodes live in volatile memory, leaves
//! live in the persistent pool. The persistent side is just a bag of
//! leaves on a linked list; all ordering lives in the volatile routing
//! structure, rebuilt on every open by [`Tree3::recover`].
//!
//! ## Operation Shape
//!
//! Every mutation follows the same discipline:
//!
//! 1. Search the volatile tree, recording the descent path (child indices)
//! 2. Run the persistent half inside one durable transaction
//! 3. After commit, mirror the change into the volatile descriptors and,
//!    for splits, update the routing structure through the recorded path
//!
//! Step 3 runs outside the transaction on purpose: a rollback must never
//! leave the volatile tree ahead of the persistent leaves. The spare-leaf
//! vector follows the same rule - it is only popped once the transaction
//! that consumed the leaf has committed.
//!
//! ## Splits
//!
//! A full leaf splits at the midpoint of its 49 candidate keys (48 live
//! plus the incoming one). Slots whose key sorts above the split key move
//! to the new leaf by pointer swap, keeping their slot index; the incoming
//! record fills the first empty slot of whichever leaf it belongs to. The
//! index preservation is incidental and nothing relies on it.
//!
//! Inner splits ride the recorded path upward, exactly like a page-based
//! tree propagates a separator, except the "pages" here are owned boxes.
//!
//! ## Recovery
//!
//! Open walks the leaf list, rebuilds one descriptor per non-empty leaf
//! while tracking each leaf's maximum key, sorts descriptors by that key,
//! and re-inserts them left to right through the same parent-update
//! routine splits use. The rebuilt tree need not match the pre-crash one;
//! it only has to route every key to its leaf, which the separator choice
//! (previous leaf's maximum key) guarantees. Fully-empty leaves go to the
//! spare vector for reuse instead of being freed.

use eyre::{bail, ensure, eyre, Result};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::config::{EngineConfig, INNER_CAPACITY, INNER_MIDPOINT, INNER_UPPER, LEAF_CAPACITY, LEAF_MIDPOINT};
use crate::engine::{BytesCallback, Engine, KvError, KvResult, PairCallback};
use crate::pool::{PAddr, Pool, PoolTxn};

use super::hash::pearson_hash;
use super::inner::{InnerNode, Node};
use super::leaf::{self, LeafNode, SlotScan, LEAF_BYTES, LEAF_SLOTS_BYTES};
use super::slot;

/// Pool layout tag; governs file compatibility.
pub const LAYOUT_TAG: &str = "tree3";

/// Descent path: the child index taken at each inner node, root first.
type Path = SmallVec<[usize; 8]>;

pub struct Tree3 {
    pool: Pool,
    root: Option<Box<Node>>,
    /// Persistent leaves that are linked into the leaf list but currently
    /// hold no slots; reused before allocating fresh leaves.
    spare_leaves: Vec<PAddr>,
}

impl Tree3 {
    /// Opens (or creates) the pool and rebuilds the volatile tree from the
    /// persistent leaf list.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let pool = Pool::open(&config.path, LAYOUT_TAG, config.size, config.sync)?;
        let mut tree = Self {
            pool,
            root: None,
            spare_leaves: Vec::new(),
        };
        tree.recover()?;
        Ok(tree)
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Records the descent path to the leaf responsible for `key`, or
    /// `None` if the tree is empty.
    fn search_path(&self, key: &[u8]) -> Result<Option<Path>> {
        let Some(mut node) = self.root.as_deref() else {
            return Ok(None);
        };
        let mut path = Path::new();
        loop {
            match node {
                Node::Leaf(_) => return Ok(Some(path)),
                Node::Inner(inner) => {
                    let idx = inner.child_index_for(key);
                    node = inner.children[idx]
                        .as_deref()
                        .ok_or_else(|| eyre!("inner node missing child {}", idx))?;
                    path.push(idx);
                }
            }
        }
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<(PAddr, usize)>> {
        let hash = pearson_hash(key);
        let Some(path) = self.search_path(key)? else {
            return Ok(None);
        };
        let leaf = leaf_at(self.root_node()?, &path)?;
        Ok(leaf.find(hash, key).map(|idx| (leaf.leaf, idx)))
    }

    fn root_node(&self) -> Result<&Node> {
        self.root.as_deref().ok_or_else(|| eyre!("tree has no root"))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    fn get_impl(&self, key: &[u8], f: &mut BytesCallback) -> Result<bool> {
        let Some((leaf_addr, idx)) = self.lookup(key)? else {
            return Ok(false);
        };
        let slot_addr = leaf::slot_addr(&self.pool, leaf_addr, idx)?;
        ensure!(
            !slot_addr.is_null(),
            "descriptor points at an empty persistent slot"
        );
        f(slot::value(&self.pool, slot_addr)?);
        Ok(true)
    }

    fn count_impl(&self) -> Result<usize> {
        let mut count = 0;
        self.walk_slots(|_, _| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    fn all_impl(&self, f: &mut BytesCallback) -> Result<()> {
        self.walk_slots(|pool, slot_addr| {
            f(slot::key(pool, slot_addr)?);
            Ok(())
        })
    }

    fn each_impl(&self, f: &mut PairCallback) -> Result<()> {
        self.walk_slots(|pool, slot_addr| {
            f(slot::key(pool, slot_addr)?, slot::value(pool, slot_addr)?);
            Ok(())
        })
    }

    /// Visits every live slot by walking the persistent leaf list. Yields
    /// entries in arbitrary order.
    fn walk_slots(&self, mut f: impl FnMut(&Pool, PAddr) -> Result<()>) -> Result<()> {
        let mut leaf_addr = self.pool.root()?;
        while !leaf_addr.is_null() {
            for idx in 0..LEAF_CAPACITY {
                let slot_addr = leaf::slot_addr(&self.pool, leaf_addr, idx)?;
                if slot_addr.is_null() || slot::hash(&self.pool, slot_addr)? == 0 {
                    continue;
                }
                f(&self.pool, slot_addr)?;
            }
            leaf_addr = leaf::next_leaf(&self.pool, leaf_addr)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    fn put_impl(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let hash = pearson_hash(key);
        let Some(path) = self.search_path(key)? else {
            return self.put_into_empty_tree(hash, key, value);
        };
        let scan = leaf_at(self.root_node()?, &path)?.scan(hash, key);
        match scan {
            SlotScan::KeyMatch(idx) | SlotScan::EmptySlot(idx) => {
                self.fill_slot(&path, idx, hash, key, value)
            }
            SlotScan::Full => self.split_leaf(path, hash, key, value),
        }
    }

    /// First insertion ever (or after the tree emptied out): create the
    /// head leaf and make it the root.
    fn put_into_empty_tree(&mut self, hash: u8, key: &[u8], value: &[u8]) -> Result<()> {
        let Tree3 {
            pool, spare_leaves, ..
        } = self;
        let spare = spare_leaves.last().copied();
        let leaf_addr = pool.txn(|tx| {
            let leaf_addr = match spare {
                Some(addr) => addr,
                None => link_new_leaf(tx)?,
            };
            let slot_addr = slot::write(tx, hash, key, value)?;
            replace_slot(tx, leaf_addr, 0, slot_addr)?;
            Ok(leaf_addr)
        })?;
        if spare.is_some() {
            self.spare_leaves.pop();
        }

        let mut node = LeafNode::new(leaf_addr);
        node.hashes[0] = hash;
        node.keys[0] = key.to_vec();
        self.root = Some(Box::new(Node::Leaf(node)));
        Ok(())
    }

    /// Overwrites or fills one slot: publish a fresh buffer in place of
    /// the old one (if any), then mirror hash and key into the descriptor.
    fn fill_slot(
        &mut self,
        path: &[usize],
        idx: usize,
        hash: u8,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let Tree3 { pool, root, .. } = self;
        let root_node = root.as_deref().ok_or_else(|| eyre!("tree has no root"))?;
        let leaf_addr = leaf_at(root_node, path)?.leaf;

        pool.txn(|tx| {
            let slot_addr = slot::write(tx, hash, key, value)?;
            replace_slot(tx, leaf_addr, idx, slot_addr)
        })?;

        let root_node = root.as_deref_mut().ok_or_else(|| eyre!("tree has no root"))?;
        let leaf = leaf_at_mut(root_node, path)?;
        leaf.hashes[idx] = hash;
        leaf.keys[idx] = key.to_vec();
        Ok(())
    }

    /// Splits a full leaf around the midpoint of its candidate keys and
    /// inserts the incoming record into the correct half.
    fn split_leaf(&mut self, path: Path, hash: u8, key: &[u8], value: &[u8]) -> Result<()> {
        let Tree3 {
            pool,
            root,
            spare_leaves,
        } = self;
        let root_node = root.as_deref().ok_or_else(|| eyre!("tree has no root"))?;

        let (leaf_addr, split_key, moved) = {
            let node = leaf_at(root_node, &path)?;
            let mut candidates: Vec<&[u8]> = node.keys.iter().map(|k| k.as_slice()).collect();
            candidates.push(key);
            candidates.sort_unstable();
            let split_key = candidates[LEAF_MIDPOINT].to_vec();

            let mut moved = [false; LEAF_CAPACITY];
            for (idx, existing) in node.keys.iter().enumerate() {
                moved[idx] = existing.as_slice() > split_key.as_slice();
            }
            (node.leaf, split_key, moved)
        };
        trace!(split_key_len = split_key.len(), "splitting full leaf");

        let incoming_to_new = key > split_key.as_slice();
        // On the original side, slots that moved out are the empties; on
        // the new side, slots that did not move in are.
        let target_idx = (0..LEAF_CAPACITY)
            .find(|&idx| if incoming_to_new { !moved[idx] } else { moved[idx] })
            .ok_or_else(|| eyre!("leaf split produced no empty slot"))?;

        let spare = spare_leaves.last().copied();
        let new_leaf_addr = pool.txn(|tx| {
            let new_leaf_addr = match spare {
                Some(addr) => addr,
                None => link_new_leaf(tx)?,
            };
            tx.snapshot(leaf_addr.get(), LEAF_SLOTS_BYTES)?;
            tx.snapshot(new_leaf_addr.get(), LEAF_SLOTS_BYTES)?;
            for idx in 0..LEAF_CAPACITY {
                if moved[idx] {
                    let slot_addr = leaf::slot_addr(tx.pool(), leaf_addr, idx)?;
                    replace_slot(tx, new_leaf_addr, idx, slot_addr)?;
                    leaf::set_slot(tx, leaf_addr, idx, PAddr::NULL)?;
                }
            }
            let target_leaf = if incoming_to_new { new_leaf_addr } else { leaf_addr };
            let slot_addr = slot::write(tx, hash, key, value)?;
            replace_slot(tx, target_leaf, target_idx, slot_addr)?;
            Ok(new_leaf_addr)
        })?;
        if spare.is_some() {
            self.spare_leaves.pop();
        }

        // Persistent half is committed; mirror the move into the
        // descriptors and stitch the new leaf into the routing structure.
        let root_node = self
            .root
            .as_deref_mut()
            .ok_or_else(|| eyre!("tree has no root"))?;
        let old_leaf = leaf_at_mut(root_node, &path)?;
        let mut new_node = LeafNode::new(new_leaf_addr);
        for idx in 0..LEAF_CAPACITY {
            if moved[idx] {
                new_node.hashes[idx] = old_leaf.hashes[idx];
                new_node.keys[idx] = std::mem::take(&mut old_leaf.keys[idx]);
                old_leaf.hashes[idx] = 0;
            }
        }
        if incoming_to_new {
            new_node.hashes[target_idx] = hash;
            new_node.keys[target_idx] = key.to_vec();
        } else {
            old_leaf.hashes[target_idx] = hash;
            old_leaf.keys[target_idx] = key.to_vec();
        }

        self.promote(path, split_key, Box::new(Node::Leaf(new_node)))
    }

    /// Inserts a freshly split-off sibling into the parent chain recorded
    /// in `path`, splitting overflowing inner nodes on the way up. Purely
    /// volatile; runs after the persistent transaction commits.
    fn promote(
        &mut self,
        mut path: Path,
        mut split_key: Vec<u8>,
        mut new_child: Box<Node>,
    ) -> Result<()> {
        loop {
            if path.is_empty() {
                // The split node was the root: grow the tree by one level.
                let old_root = self
                    .root
                    .take()
                    .ok_or_else(|| eyre!("promoting into an empty tree"))?;
                let mut top = InnerNode::new();
                top.keycount = 1;
                top.keys[0] = split_key;
                top.children[0] = Some(old_root);
                top.children[1] = Some(new_child);
                top.check_invariants();
                self.root = Some(Box::new(Node::Inner(top)));
                return Ok(());
            }

            let _ = path.pop();
            let root_node = self
                .root
                .as_deref_mut()
                .ok_or_else(|| eyre!("tree has no root"))?;
            let parent = inner_at_mut(root_node, &path)?;

            // Insert split_key and the new child in sorted position, the
            // child immediately to the right of the node that split.
            let mut idx = 0;
            while idx < parent.keycount && parent.keys[idx].as_slice() <= split_key.as_slice() {
                idx += 1;
            }
            for i in (idx..parent.keycount).rev() {
                parent.keys[i + 1] = std::mem::take(&mut parent.keys[i]);
            }
            for i in ((idx + 1)..=parent.keycount).rev() {
                parent.children[i + 1] = parent.children[i].take();
            }
            parent.keys[idx] = split_key;
            parent.children[idx + 1] = Some(new_child);
            parent.keycount += 1;

            if parent.keycount <= INNER_CAPACITY {
                parent.check_invariants();
                return Ok(());
            }

            // Overflowed: split this inner node and keep propagating.
            let keycount = parent.keycount;
            let mut sibling = InnerNode::new();
            for i in INNER_UPPER..keycount {
                sibling.keys[i - INNER_UPPER] = std::mem::take(&mut parent.keys[i]);
            }
            for i in INNER_UPPER..=keycount {
                sibling.children[i - INNER_UPPER] = parent.children[i].take();
            }
            sibling.keycount = INNER_MIDPOINT;
            let promoted = std::mem::take(&mut parent.keys[INNER_MIDPOINT]);
            parent.keycount = INNER_MIDPOINT;
            parent.check_invariants();
            sibling.check_invariants();

            split_key = promoted;
            new_child = Box::new(Node::Inner(sibling));
        }
    }

    fn remove_impl(&mut self, key: &[u8]) -> Result<bool> {
        let hash = pearson_hash(key);
        let Some(path) = self.search_path(key)? else {
            return Ok(false);
        };
        let Tree3 { pool, root, .. } = self;
        let root_node = root.as_deref().ok_or_else(|| eyre!("tree has no root"))?;
        let leaf = leaf_at(root_node, &path)?;
        let Some(idx) = leaf.find(hash, key) else {
            return Ok(false);
        };
        let leaf_addr = leaf.leaf;

        pool.txn(|tx| {
            let old = leaf::slot_addr(tx.pool(), leaf_addr, idx)?;
            ensure!(!old.is_null(), "descriptor points at an empty persistent slot");
            tx.free(old)?;
            leaf::set_slot(tx, leaf_addr, idx, PAddr::NULL)
        })?;

        let root_node = root.as_deref_mut().ok_or_else(|| eyre!("tree has no root"))?;
        let leaf = leaf_at_mut(root_node, &path)?;
        leaf.hashes[idx] = 0;
        leaf.keys[idx].clear();
        // Underfull leaves and inner nodes are left as they are; there is
        // no rebalancing or merging on remove.
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Rebuilds the volatile routing structure from the persistent leaf
    /// list.
    fn recover(&mut self) -> Result<()> {
        self.pool.prefetch_heap();

        let mut recovered: Vec<(Vec<u8>, LeafNode)> = Vec::new();
        let mut leaf_addr = self.pool.root()?;
        while !leaf_addr.is_null() {
            let mut node = LeafNode::new(leaf_addr);
            let mut max_key: Option<Vec<u8>> = None;
            for idx in 0..LEAF_CAPACITY {
                let slot_addr = leaf::slot_addr(&self.pool, leaf_addr, idx)?;
                if slot_addr.is_null() {
                    continue;
                }
                let hash = slot::hash(&self.pool, slot_addr)?;
                // A present pointer with an unwritten hash is treated as
                // empty; it can only come from a leaf a crashed ancestor
                // left half-initialized.
                if hash == 0 {
                    continue;
                }
                let key = slot::key(&self.pool, slot_addr)?;
                node.hashes[idx] = hash;
                node.keys[idx] = key.to_vec();
                if max_key.as_deref().map_or(true, |max| key > max) {
                    max_key = Some(key.to_vec());
                }
            }
            match max_key {
                None => self.spare_leaves.push(leaf_addr),
                Some(max) => recovered.push((max, node)),
            }
            leaf_addr = leaf::next_leaf(&self.pool, leaf_addr)?;
        }

        recovered.sort_by(|a, b| a.0.cmp(&b.0));
        debug!(
            leaves = recovered.len(),
            spare = self.spare_leaves.len(),
            "recovered persistent leaves"
        );

        self.root = None;
        let mut leaves = recovered.into_iter();
        let Some((first_max, first_node)) = leaves.next() else {
            return Ok(());
        };
        self.root = Some(Box::new(Node::Leaf(first_node)));

        // Each subsequent leaf is attached to the right of everything
        // recovered so far, separated by the previous leaf's maximum key.
        let mut prev_max = first_max;
        for (max_key, node) in leaves {
            let path = self.rightmost_path()?;
            let split_key = std::mem::replace(&mut prev_max, max_key);
            self.promote(path, split_key, Box::new(Node::Leaf(node)))?;
        }
        Ok(())
    }

    fn rightmost_path(&self) -> Result<Path> {
        let mut path = Path::new();
        let mut node = self.root_node()?;
        loop {
            match node {
                Node::Leaf(_) => return Ok(path),
                Node::Inner(inner) => {
                    node = inner.children[inner.keycount]
                        .as_deref()
                        .ok_or_else(|| eyre!("inner node missing rightmost child"))?;
                    path.push(inner.keycount);
                }
            }
        }
    }
}

/// Links a freshly allocated leaf at the head of the persistent leaf list.
fn link_new_leaf(tx: &mut PoolTxn<'_>) -> Result<PAddr> {
    let leaf_addr = tx.alloc(LEAF_BYTES)?;
    let old_head = tx.root()?;
    leaf::set_next(tx, leaf_addr, old_head)?;
    tx.set_root(leaf_addr)?;
    Ok(leaf_addr)
}

/// Points slot `idx` of `leaf_addr` at `slot_addr`, freeing whatever block
/// the slot held before. A leaf reused from the spare pool can still carry
/// a pointer whose hash was never written; overwriting it without the free
/// would orphan the block. Every slot install goes through here.
fn replace_slot(
    tx: &mut PoolTxn<'_>,
    leaf_addr: PAddr,
    idx: usize,
    slot_addr: PAddr,
) -> Result<()> {
    let old = leaf::slot_addr(tx.pool(), leaf_addr, idx)?;
    if !old.is_null() {
        tx.free(old)?;
    }
    leaf::set_slot(tx, leaf_addr, idx, slot_addr)
}

fn node_at<'a>(root: &'a Node, path: &[usize]) -> Result<&'a Node> {
    let mut node = root;
    for &idx in path {
        let Node::Inner(inner) = node else {
            bail!("descent path passes through a leaf");
        };
        node = inner.children[idx]
            .as_deref()
            .ok_or_else(|| eyre!("inner node missing child {}", idx))?;
    }
    Ok(node)
}

fn node_at_mut<'a>(root: &'a mut Node, path: &[usize]) -> Result<&'a mut Node> {
    let mut node = root;
    for &idx in path {
        let Node::Inner(inner) = node else {
            bail!("descent path passes through a leaf");
        };
        node = inner.children[idx]
            .as_deref_mut()
            .ok_or_else(|| eyre!("inner node missing child {}", idx))?;
    }
    Ok(node)
}

fn leaf_at<'a>(root: &'a Node, path: &[usize]) -> Result<&'a LeafNode> {
    node_at(root, path)?
        .as_leaf()
        .ok_or_else(|| eyre!("descent path ends at an inner node"))
}

fn leaf_at_mut<'a>(root: &'a mut Node, path: &[usize]) -> Result<&'a mut LeafNode> {
    node_at_mut(root, path)?
        .as_leaf_mut()
        .ok_or_else(|| eyre!("descent path ends at an inner node"))
}

fn inner_at_mut<'a>(root: &'a mut Node, path: &[usize]) -> Result<&'a mut InnerNode> {
    match node_at_mut(root, path)? {
        Node::Inner(inner) => Ok(inner),
        Node::Leaf(_) => bail!("descent path ends at a leaf, expected an inner node"),
    }
}

impl Engine for Tree3 {
    fn name(&self) -> &'static str {
        "tree3"
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        trace!(key_len = key.len(), value_len = value.len(), "put");
        self.put_impl(key, value).map_err(KvError::failed)
    }

    fn get(&self, key: &[u8], f: &mut BytesCallback) -> KvResult<()> {
        trace!(key_len = key.len(), "get");
        if self.get_impl(key, f).map_err(KvError::failed)? {
            Ok(())
        } else {
            Err(KvError::NotFound)
        }
    }

    fn exists(&self, key: &[u8]) -> KvResult<bool> {
        self.lookup(key).map(|hit| hit.is_some()).map_err(KvError::failed)
    }

    fn remove(&mut self, key: &[u8]) -> KvResult<()> {
        trace!(key_len = key.len(), "remove");
        if self.remove_impl(key).map_err(KvError::failed)? {
            Ok(())
        } else {
            Err(KvError::NotFound)
        }
    }

    fn count(&self) -> KvResult<usize> {
        self.count_impl().map_err(KvError::failed)
    }

    fn all(&self, f: &mut BytesCallback) -> KvResult<()> {
        self.all_impl(f).map_err(KvError::failed)
    }

    fn each(&self, f: &mut PairCallback) -> KvResult<()> {
        self.each_impl(f).map_err(KvError::failed)
    }
}
