//! Module implement cursors, iteration over a tree in keyhash order.

use crate::{
    err_at,
    node::{is_bit_set, Inner, Node},
    store::Store,
    tree::Tree,
    Result, HASHSIZE_BITS,
};

/// Cursor is an iterator over all key/value pairs of a tree, in
/// keyhash sorted order.
///
/// A cursor borrows its tree exclusively and is valid for as long as
/// the tree is. The cursor keeps the stack of turns it took from the
/// root and re-walks that path on every move; a path segment that no
/// longer exists, possible only if the tree shape changed underneath,
/// surfaces as a [crate::Error::Fatal] error. Reposition the cursor after
/// mutating the tree.
pub struct Cursor<'a> {
    tree: &'a mut Tree,
    // one turn per descent step, true where the cursor went left.
    path: Vec<bool>,
    // turns below this mark are pinned, see first_with_prefix().
    base: usize,
}

impl Tree {
    /// Return a cursor over this tree.
    pub fn cursor(&mut self) -> Cursor<'_> {
        Cursor { tree: self, path: Vec::new(), base: 0 }
    }
}

impl<'a> Cursor<'a> {
    /// Move the cursor to the first item of the tree, in keyhash
    /// order, and return its key and value. An empty tree returns
    /// [crate::Error::NoMoreKeys].
    pub fn first(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        self.path.clear();
        self.base = 0;
        let store = self.tree.store.clone();
        descend_inner(&store, &mut self.tree.root, &mut self.path, false)
    }

    /// Move the cursor to the last item of the tree, in keyhash order,
    /// and return its key and value.
    pub fn last(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        self.path.clear();
        self.base = 0;
        let store = self.tree.store.clone();
        descend_inner(&store, &mut self.tree.root, &mut self.path, true)
    }

    /// Move the cursor to the next item and return its key and value.
    /// Past the last item, return [crate::Error::NoMoreKeys].
    pub fn next(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let store = self.tree.store.clone();
        loop {
            if self.path.len() <= self.base {
                return err_at!(NoMoreKeys, msg: "cursor exhausted");
            }
            let went_left = self.path[self.path.len() - 1];
            if !went_left {
                // on a right arm, back-track one node.
                self.path.pop();
                continue;
            }

            let depth = self.path.len() - 1;
            let parent = walk_to_inner(&store, &mut self.tree.root, &self.path[..depth])?;
            match parent.right.as_mut() {
                None => {
                    self.path.pop();
                    continue;
                }
                Some(node) => {
                    if let Some(turn) = self.path.last_mut() {
                        *turn = false;
                    }
                    return descend_node(&store, node, &mut self.path, false);
                }
            }
        }
    }

    /// Move the cursor to the previous item and return its key and
    /// value. Before the first item, return [crate::Error::NoMoreKeys].
    pub fn prev(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let store = self.tree.store.clone();
        loop {
            if self.path.len() <= self.base {
                return err_at!(NoMoreKeys, msg: "cursor exhausted");
            }
            let went_left = self.path[self.path.len() - 1];
            if went_left {
                // on a left arm, back-track one node.
                self.path.pop();
                continue;
            }

            let depth = self.path.len() - 1;
            let parent = walk_to_inner(&store, &mut self.tree.root, &self.path[..depth])?;
            match parent.left.as_mut() {
                None => {
                    self.path.pop();
                    continue;
                }
                Some(node) => {
                    if let Some(turn) = self.path.last_mut() {
                        *turn = true;
                    }
                    return descend_node(&store, node, &mut self.path, true);
                }
            }
        }
    }

    /// Pin the cursor under the subtree addressed by the first
    /// `validbits` bits of `section` and return the subtree's first
    /// item. Following [Cursor::next] calls stay inside that subtree.
    pub fn first_with_prefix(
        &mut self,
        section: &[u8],
        validbits: usize,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        self.path.clear();
        self.base = 0;

        if validbits >= HASHSIZE_BITS {
            return err_at!(InvalidInput, msg: "invalid valid bits {}", validbits);
        }
        if validbits == 0 {
            return self.first();
        }
        if validbits > section.len() * 8 {
            return err_at!(
                InvalidInput, msg: "section of {} bytes short of {} bits", section.len(), validbits
            );
        }

        let store = self.tree.store.clone();
        let mut cur: &mut Inner = &mut self.tree.root;
        let mut done = 0;
        loop {
            cur.load_partial(&store)?;
            let go_left = !is_bit_set(section, done);
            self.path.push(go_left);

            let child = if go_left { cur.left.as_mut() } else { cur.right.as_mut() };
            let node = match child {
                None => return err_at!(NoMoreKeys, msg: "dead end inside section"),
                Some(node) => node,
            };
            done += 1;

            if done == validbits {
                self.base = validbits;
                return descend_node(&store, node, &mut self.path, false);
            }
            match node {
                Node::Inner(inner) => cur = &mut **inner,
                Node::Leaf(_) => return err_at!(NoMoreKeys, msg: "section reaches below a leaf"),
            }
        }
    }

    // count of descent steps from the root to the current item.
    pub(crate) fn depth(&self) -> usize {
        self.path.len()
    }
}

// descend to the first leaf of this subtree, left-first, or
// right-first when walking in reverse, recording every turn taken.
fn descend_inner(
    store: &Store,
    inner: &mut Inner,
    path: &mut Vec<bool>,
    reverse: bool,
) -> Result<(Vec<u8>, Vec<u8>)> {
    inner.load_partial(store)?;

    let (first, second) = if reverse {
        (&mut inner.right, &mut inner.left)
    } else {
        (&mut inner.left, &mut inner.right)
    };
    if let Some(node) = first.as_mut() {
        path.push(!reverse);
        return descend_node(store, node, path, reverse);
    }
    if let Some(node) = second.as_mut() {
        path.push(reverse);
        return descend_node(store, node, path, reverse);
    }

    // only an empty tree has an inner with both slots dead.
    err_at!(NoMoreKeys, msg: "no keys in tree")
}

fn descend_node(
    store: &Store,
    node: &mut Node,
    path: &mut Vec<bool>,
    reverse: bool,
) -> Result<(Vec<u8>, Vec<u8>)> {
    match node {
        Node::Inner(inner) => descend_inner(store, inner, path, reverse),
        Node::Leaf(leaf) => {
            if leaf.partial {
                leaf.load_full(store)?;
            }
            Ok((leaf.key.clone(), leaf.value.clone()))
        }
    }
}

// re-walk the recorded turns from the root, landing on the inner node
// the turns point at.
fn walk_to_inner<'t>(store: &Store, root: &'t mut Inner, path: &[bool]) -> Result<&'t mut Inner> {
    let mut cur = root;
    for went_left in path.iter() {
        cur.load_partial(store)?;
        let child = if *went_left { cur.left.as_mut() } else { cur.right.as_mut() };
        match child {
            Some(Node::Inner(inner)) => cur = &mut **inner,
            _ => return err_at!(Fatal, msg: "cursor invalidated by tree mutation"),
        }
    }
    cur.load_partial(store)?;
    Ok(cur)
}

#[cfg(test)]
#[path = "cursor_test.rs"]
mod cursor_test;
