//! DOM host abstraction and an in-memory document.
//!
//! The mutator never touches a concrete document; it drives a [`DomHost`].
//! [`InMemoryDom`] is the host used in tests and by [`crate::page::FixturePage`]:
//! every node carries an attachment generation that is bumped whenever the node
//! is detached, and a [`NodeRef`] captured under an older generation is stale.

use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

/// Handle to a node, pinned to the generation it was captured under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    key: usize,
    generation: u64,
}

impl NodeRef {
    /// Host-internal node key. Two handles with the same key point at the same
    /// node instance even when one of them is stale.
    pub fn key(&self) -> usize {
        self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Errors surfaced by [`DomHost`] operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("no element with id '{0}'")]
    NoSuchElement(String),
    #[error("element '{0}' has no parent")]
    NoParent(String),
    #[error("stale element reference: element is no longer attached to the document")]
    StaleElementReference,
    #[error("node is not a child of the given parent")]
    NotAChild,
    #[error("unknown node")]
    UnknownNode,
}

/// Capabilities the mutator needs from the document it runs against.
pub trait DomHost: Send + Sync {
    /// Look up an attached element by its `id`.
    fn get_node_by_id(&self, id: &str) -> Result<NodeRef, DomError>;

    fn content(&self, node: &NodeRef) -> Result<String, DomError>;

    /// Replace the node's content (the `innerHTML` assignment).
    fn set_content(&self, node: &NodeRef, content: &str) -> Result<(), DomError>;

    fn parent(&self, node: &NodeRef) -> Result<NodeRef, DomError>;

    fn next_sibling(&self, node: &NodeRef) -> Result<Option<NodeRef>, DomError>;

    /// Detach `child` from `parent`, returning the handle that now addresses
    /// the detached node. Handles captured before the call become stale.
    fn remove_child(&self, parent: &NodeRef, child: &NodeRef) -> Result<NodeRef, DomError>;

    fn append_child(&self, parent: &NodeRef, child: &NodeRef) -> Result<(), DomError>;

    /// Insert `child` before `reference`, or append it when `reference` is `None`.
    fn insert_before(
        &self,
        parent: &NodeRef,
        child: &NodeRef,
        reference: Option<&NodeRef>,
    ) -> Result<(), DomError>;

    /// Whether the handle no longer addresses the node it was captured from.
    fn is_stale(&self, node: &NodeRef) -> bool;
}

#[derive(Debug, Clone)]
struct NodeData {
    tag: String,
    id: Option<String>,
    content: String,
    parent: Option<usize>,
    children: Vec<usize>,
    generation: u64,
}

#[derive(Debug)]
struct Tree {
    nodes: Vec<NodeData>,
    root: usize,
}

impl Tree {
    fn node(&self, node: &NodeRef) -> Result<&NodeData, DomError> {
        let data = self.nodes.get(node.key).ok_or(DomError::UnknownNode)?;
        if data.generation != node.generation {
            return Err(DomError::StaleElementReference);
        }
        Ok(data)
    }

    fn node_mut(&mut self, node: &NodeRef) -> Result<&mut NodeData, DomError> {
        let data = self.nodes.get_mut(node.key).ok_or(DomError::UnknownNode)?;
        if data.generation != node.generation {
            return Err(DomError::StaleElementReference);
        }
        Ok(data)
    }

    fn handle(&self, key: usize) -> NodeRef {
        NodeRef {
            key,
            generation: self.nodes[key].generation,
        }
    }

    /// Nodes attached under the root, in document (pre-order) order.
    fn attached(&self) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(key) = stack.pop() {
            order.push(key);
            stack.extend(self.nodes[key].children.iter().rev().copied());
        }
        order
    }

    /// Bump the generation of `key` and its whole subtree.
    fn invalidate(&mut self, key: usize) {
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            let data = &mut self.nodes[current];
            data.generation += 1;
            stack.extend(data.children.iter().copied());
        }
    }

    fn is_ancestor_or_self(&self, candidate: usize, of: usize) -> bool {
        let mut current = Some(of);
        while let Some(key) = current {
            if key == candidate {
                return true;
            }
            current = self.nodes[key].parent;
        }
        false
    }

    fn render(&self, key: usize, out: &mut String) {
        let data = &self.nodes[key];
        out.push('<');
        out.push_str(&data.tag);
        if let Some(id) = &data.id {
            out.push_str(" id=\"");
            out.push_str(id);
            out.push('"');
        }
        out.push('>');
        out.push_str(&data.content);
        for child in &data.children {
            self.render(*child, out);
        }
        out.push_str("</");
        out.push_str(&data.tag);
        out.push('>');
    }
}

/// In-memory document tree rooted at a `<body>` element.
#[derive(Debug)]
pub struct InMemoryDom {
    tree: Mutex<Tree>,
}

impl Default for InMemoryDom {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDom {
    pub fn new() -> Self {
        let body = NodeData {
            tag: "body".to_string(),
            id: None,
            content: String::new(),
            parent: None,
            children: Vec::new(),
            generation: 0,
        };
        Self {
            tree: Mutex::new(Tree {
                nodes: vec![body],
                root: 0,
            }),
        }
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        // A panic while holding the lock leaves the tree structurally intact.
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn body(&self) -> NodeRef {
        let tree = self.tree();
        tree.handle(tree.root)
    }

    /// Create an element and append it to `parent`.
    pub fn create_element(
        &self,
        parent: &NodeRef,
        tag: &str,
        id: Option<&str>,
        content: &str,
    ) -> Result<NodeRef, DomError> {
        let mut tree = self.tree();
        tree.node(parent)?;
        let key = tree.nodes.len();
        tree.nodes.push(NodeData {
            tag: tag.to_string(),
            id: id.map(str::to_string),
            content: content.to_string(),
            parent: Some(parent.key),
            children: Vec::new(),
            generation: 0,
        });
        tree.nodes[parent.key].children.push(key);
        Ok(tree.handle(key))
    }

    pub fn children(&self, node: &NodeRef) -> Result<Vec<NodeRef>, DomError> {
        let tree = self.tree();
        let data = tree.node(node)?;
        Ok(data.children.iter().map(|key| tree.handle(*key)).collect())
    }

    /// Element id of the node, if it has one.
    pub fn element_id(&self, node: &NodeRef) -> Result<Option<String>, DomError> {
        Ok(self.tree().node(node)?.id.clone())
    }

    /// Fresh handles for every attached node, in document order.
    pub fn attached_nodes(&self) -> Vec<NodeRef> {
        let tree = self.tree();
        tree.attached()
            .into_iter()
            .map(|key| tree.handle(key))
            .collect()
    }

    /// Content followed by rendered element children.
    pub fn inner_html(&self, node: &NodeRef) -> Result<String, DomError> {
        let tree = self.tree();
        let data = tree.node(node)?;
        let mut out = data.content.clone();
        for child in &data.children {
            tree.render(*child, &mut out);
        }
        Ok(out)
    }

    /// Serialise the attached document.
    pub fn to_html(&self) -> String {
        let tree = self.tree();
        let mut out = String::new();
        tree.render(tree.root, &mut out);
        out
    }

    fn attach(
        &self,
        parent: &NodeRef,
        child: &NodeRef,
        reference: Option<&NodeRef>,
    ) -> Result<(), DomError> {
        let mut tree = self.tree();
        tree.node(parent)?;
        tree.node(child)?;
        if tree.is_ancestor_or_self(child.key, parent.key) {
            return Err(DomError::NotAChild);
        }
        if let Some(reference) = reference {
            if tree.node(reference)?.parent != Some(parent.key) {
                return Err(DomError::NotAChild);
            }
            if reference.key == child.key {
                return Ok(());
            }
        }

        // Moving an attached node detaches it first, like the DOM does.
        if let Some(old_parent) = tree.nodes[child.key].parent {
            tree.nodes[old_parent].children.retain(|key| *key != child.key);
        }
        let siblings = &mut tree.nodes[parent.key].children;
        let position = reference.and_then(|reference| {
            siblings.iter().position(|key| *key == reference.key)
        });
        match position {
            Some(index) => siblings.insert(index, child.key),
            None if reference.is_some() => return Err(DomError::NotAChild),
            None => siblings.push(child.key),
        }
        tree.nodes[child.key].parent = Some(parent.key);
        Ok(())
    }
}

impl DomHost for InMemoryDom {
    fn get_node_by_id(&self, id: &str) -> Result<NodeRef, DomError> {
        let tree = self.tree();
        tree.attached()
            .into_iter()
            .find(|key| tree.nodes[*key].id.as_deref() == Some(id))
            .map(|key| tree.handle(key))
            .ok_or_else(|| DomError::NoSuchElement(id.to_string()))
    }

    fn content(&self, node: &NodeRef) -> Result<String, DomError> {
        Ok(self.tree().node(node)?.content.clone())
    }

    fn set_content(&self, node: &NodeRef, content: &str) -> Result<(), DomError> {
        let mut tree = self.tree();
        let children = std::mem::take(&mut tree.node_mut(node)?.children);
        for child in children {
            tree.nodes[child].parent = None;
            tree.invalidate(child);
        }
        tree.nodes[node.key].content = content.to_string();
        Ok(())
    }

    fn parent(&self, node: &NodeRef) -> Result<NodeRef, DomError> {
        let tree = self.tree();
        let data = tree.node(node)?;
        match data.parent {
            Some(parent) => Ok(tree.handle(parent)),
            None => Err(DomError::NoParent(
                data.id.clone().unwrap_or_else(|| data.tag.clone()),
            )),
        }
    }

    fn next_sibling(&self, node: &NodeRef) -> Result<Option<NodeRef>, DomError> {
        let tree = self.tree();
        let Some(parent) = tree.node(node)?.parent else {
            return Ok(None);
        };
        let siblings = &tree.nodes[parent].children;
        let next = siblings
            .iter()
            .position(|key| *key == node.key)
            .and_then(|index| siblings.get(index + 1))
            .map(|key| tree.handle(*key));
        Ok(next)
    }

    fn remove_child(&self, parent: &NodeRef, child: &NodeRef) -> Result<NodeRef, DomError> {
        let mut tree = self.tree();
        tree.node(parent)?;
        if tree.node(child)?.parent != Some(parent.key) {
            return Err(DomError::NotAChild);
        }
        tree.nodes[parent.key].children.retain(|key| *key != child.key);
        tree.nodes[child.key].parent = None;
        tree.invalidate(child.key);
        Ok(tree.handle(child.key))
    }

    fn append_child(&self, parent: &NodeRef, child: &NodeRef) -> Result<(), DomError> {
        self.attach(parent, child, None)
    }

    fn insert_before(
        &self,
        parent: &NodeRef,
        child: &NodeRef,
        reference: Option<&NodeRef>,
    ) -> Result<(), DomError> {
        self.attach(parent, child, reference)
    }

    fn is_stale(&self, node: &NodeRef) -> bool {
        let tree = self.tree();
        match tree.nodes.get(node.key) {
            Some(data) => data.generation != node.generation,
            None => true,
        }
    }
}
