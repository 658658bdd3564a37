//! Arena representation of a post's comment tree.
//!
//! Listings arrive flat (each node names its parent by fullname) and may
//! contain placeholders for unloaded children. The forest keeps every comment
//! once, links children to parents in arrival order, and queues placeholders
//! until the caller expands them.

use crate::types::{Comment, ForestThing, Placeholder, COMMENT_KIND_PREFIX, POST_KIND_PREFIX};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct CommentForest {
    post_fullname: String,
    nodes: Vec<Comment>,
    index: HashMap<String, usize>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
    pending: VecDeque<Placeholder>,
    expanded: HashSet<PlaceholderKey>,
}

// "Continue this thread" stubs all share the id `_`, so the parent is part of
// a placeholder's identity.
type PlaceholderKey = (String, String);

fn placeholder_key(placeholder: &Placeholder) -> PlaceholderKey {
    (placeholder.id.clone(), placeholder.parent_id.clone())
}

fn same_placeholder(a: &Placeholder, b: &Placeholder) -> bool {
    a.id == b.id && a.parent_id == b.parent_id
}

impl CommentForest {
    pub fn new(post_id: &str, things: Vec<ForestThing>) -> Self {
        let mut forest = Self {
            post_fullname: format!("{POST_KIND_PREFIX}{post_id}"),
            nodes: Vec::new(),
            index: HashMap::new(),
            children: Vec::new(),
            roots: Vec::new(),
            pending: VecDeque::new(),
            expanded: HashSet::new(),
        };
        forest.graft(things);
        forest
    }

    /// Adds newly loaded nodes. Comments already present are ignored, so
    /// grafting the same expansion twice changes nothing.
    pub fn graft(&mut self, things: Vec<ForestThing>) {
        for thing in things {
            match thing {
                ForestThing::Comment(comment) => {
                    if self.index.contains_key(&comment.id) {
                        continue;
                    }
                    self.index.insert(comment.id.clone(), self.nodes.len());
                    self.nodes.push(comment);
                }
                ForestThing::Placeholder(placeholder) => {
                    if !self.expanded.contains(&placeholder_key(&placeholder))
                        && !self.pending.iter().any(|p| same_placeholder(p, &placeholder))
                    {
                        self.pending.push_back(placeholder);
                    }
                }
            }
        }
        self.relink();
    }

    // Parents may arrive after their children in morechildren batches, so
    // links are rebuilt from parent ids instead of patched incrementally.
    fn relink(&mut self) {
        self.children = vec![Vec::new(); self.nodes.len()];
        self.roots.clear();
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.parent_id == self.post_fullname {
                self.roots.push(idx);
            } else if let Some(parent_id) = node.parent_id.strip_prefix(COMMENT_KIND_PREFIX) {
                if let Some(&parent) = self.index.get(parent_id) {
                    self.children[parent].push(idx);
                }
            }
        }
    }

    /// Takes the next placeholder to expand, if any.
    pub fn next_placeholder(&mut self) -> Option<Placeholder> {
        let placeholder = self.pending.pop_front()?;
        self.expanded.insert(placeholder_key(&placeholder));
        Some(placeholder)
    }

    /// Puts back a placeholder whose expansion failed.
    pub fn requeue(&mut self, placeholder: Placeholder) {
        self.expanded.remove(&placeholder_key(&placeholder));
        self.pending.push_front(placeholder);
    }

    pub fn pending_placeholders(&self) -> usize {
        self.pending.len()
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether top-level comments are still hidden behind a placeholder.
    pub fn has_pending_roots(&self) -> bool {
        self.pending.iter().any(|p| p.parent_id == self.post_fullname)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &Comment> {
        self.roots.iter().map(|&idx| &self.nodes[idx])
    }

    /// Pre-order walk of every reachable comment, siblings in listing order.
    /// Uses an explicit stack so deep reply chains cannot exhaust the call
    /// stack.
    pub fn depth_first(&self) -> Vec<&Comment> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            order.push(&self.nodes[idx]);
            stack.extend(self.children[idx].iter().rev());
        }
        order
    }
}
