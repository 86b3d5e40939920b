//! Module implement linear-time diff between two tree roots.

use crate::{node::Inner, node::Node, store::Store, tree::Tree, Result};

// the three change reports of a diff, in one place so the recursion
// threads a single borrow.
struct Handlers<'a> {
    deleted: &'a mut dyn FnMut(&[u8], &[u8]),
    modified: &'a mut dyn FnMut(&[u8], &[u8]),
    inserted: &'a mut dyn FnMut(&[u8], &[u8]),
}

/// Diff two trees and report every key that was deleted, modified or
/// inserted going from `base` to `head`.
///
/// The walk recurses only into subtrees whose hashes differ, making
/// the cost linear in the number of changes; a tree with a billion
/// keys diffs against its parent almost instantaneously. Modified
/// keys are reported with their `head` value.
pub fn diff(
    base: &mut Tree,
    head: &mut Tree,
    deleted: &mut dyn FnMut(&[u8], &[u8]),
    modified: &mut dyn FnMut(&[u8], &[u8]),
    inserted: &mut dyn FnMut(&[u8], &[u8]),
) -> Result<()> {
    let base_store = base.store.clone();
    let head_store = head.store.clone();
    let mut handlers = Handlers { deleted, modified, inserted };
    changes_inner(&base_store, &head_store, &mut base.root, &mut head.root, &mut handlers)
}

fn changes_inner(
    base_store: &Store,
    head_store: &Store,
    base: &mut Inner,
    head: &mut Inner,
    handlers: &mut Handlers,
) -> Result<()> {
    let base_hash = base.hash(base_store)?;
    let head_hash = head.hash(head_store)?;
    if base_hash == head_hash {
        return Ok(());
    }

    compare_nodes(base_store, head_store, &mut base.left, &mut head.left, handlers)?;
    compare_nodes(base_store, head_store, &mut base.right, &mut head.right, handlers)
}

fn compare_nodes(
    base_store: &Store,
    head_store: &Store,
    base: &mut Option<Node>,
    head: &mut Option<Node>,
    handlers: &mut Handlers,
) -> Result<()> {
    let (base, head) = match (base.as_mut(), head.as_mut()) {
        (None, None) => return Ok(()),
        // the whole head subtree was added.
        (None, Some(head)) => return walk_node(head_store, head, None, handlers.inserted),
        // the whole base subtree was deleted.
        (Some(base), None) => return walk_node(base_store, base, None, handlers.deleted),
        (Some(base), Some(head)) => (base, head),
    };

    base.load_partial(base_store)?;
    head.load_partial(head_store)?;

    match (base, head) {
        (Node::Inner(base), Node::Inner(head)) => {
            changes_inner(base_store, head_store, base, head, handlers)
        }
        (Node::Leaf(base), Node::Leaf(head)) => {
            // different leaves at the same position, else nothing to do.
            if base.hash(base_store)? != head.hash(head_store)? {
                if base.key == head.key {
                    (handlers.modified)(&head.key, &head.value);
                } else {
                    (handlers.deleted)(&base.key, &base.value);
                    (handlers.inserted)(&head.key, &head.value);
                }
            }
            Ok(())
        }
        (Node::Inner(base), Node::Leaf(head)) => {
            head.hash(head_store)?;

            // the head leaf shares this position's bit prefix, so if
            // base holds its key, the binding lives in this subtree.
            match base.get(base_store, &head.keyhash) {
                Ok(value) if value == head.value => (),
                Ok(_) => (handlers.modified)(&head.key, &head.value),
                Err(_) => (handlers.inserted)(&head.key, &head.value),
            }

            // every other key of the base subtree is gone.
            let skip = head.key.clone();
            walk_inner(base_store, base, Some(&skip), handlers.deleted)
        }
        (Node::Leaf(base), Node::Inner(head)) => {
            base.hash(base_store)?;

            match head.get(head_store, &base.keyhash) {
                Ok(value) if value == base.value => (),
                Ok(value) => (handlers.modified)(&base.key, &value),
                Err(_) => (handlers.deleted)(&base.key, &base.value),
            }

            // every other key of the head subtree is new.
            let skip = base.key.clone();
            walk_inner(head_store, head, Some(&skip), handlers.inserted)
        }
    }
}

// report every leaf of this subtree, except `skip`, through `report`.
fn walk_node(
    store: &Store,
    node: &mut Node,
    skip: Option<&[u8]>,
    report: &mut dyn FnMut(&[u8], &[u8]),
) -> Result<()> {
    match node {
        Node::Inner(inner) => walk_inner(store, inner, skip, report),
        Node::Leaf(leaf) => {
            if leaf.partial {
                leaf.load_full(store)?;
            }
            if skip != Some(leaf.key.as_slice()) {
                report(&leaf.key, &leaf.value);
            }
            Ok(())
        }
    }
}

fn walk_inner(
    store: &Store,
    inner: &mut Inner,
    skip: Option<&[u8]>,
    report: &mut dyn FnMut(&[u8], &[u8]),
) -> Result<()> {
    inner.load_partial(store)?;
    if let Some(node) = inner.left.as_mut() {
        walk_node(store, node, skip, report)?;
    }
    if let Some(node) = inner.right.as_mut() {
        walk_node(store, node, skip, report)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "diff_test.rs"]
mod diff_test;
