//! DOM Tree (arena-based allocation)
//!
//! Structural operations only. Mutation records and events are produced
//! one level up, by [`Document`](crate::Document).

use crate::{Node, NodeData, NodeId};

/// Errors raised by tree and observer operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("Node not found: {0}")]
    NotFound(NodeId),

    #[error("Node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("Node {0} is not character data")]
    NotCharacterData(NodeId),

    #[error("Hierarchy request error: cannot insert {child} into {parent}")]
    HierarchyRequest { parent: NodeId, child: NodeId },

    #[error("Node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("Invalid mutation observer options: {0}")]
    InvalidObserverInit(&'static str),

    #[error("Unknown mutation observer: {0}")]
    UnknownObserver(u64),
}

/// Arena-based DOM tree. Node 0 is always the document node.
#[derive(Debug)]
pub struct DomTree {
    nodes: Vec<Node>,
}

impl DomTree {
    /// Create a tree holding only the document node
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::document()],
        }
    }

    /// The document node
    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Get a node by ID
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    /// Get a mutable node by ID
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0 as usize)
    }

    fn node(&self, id: NodeId) -> Result<&Node, DomError> {
        self.get(id).ok_or(DomError::NotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, DomError> {
        self.get_mut(id).ok_or(DomError::NotFound(id))
    }

    /// Number of nodes in the arena (attached or not)
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if tree is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Create a detached element
    pub fn create_element(&mut self, name: &str) -> NodeId {
        self.push(Node::element(name))
    }

    /// Create a detached text node
    pub fn create_text(&mut self, content: &str) -> NodeId {
        self.push(Node::text(content.to_string()))
    }

    /// Create a detached comment node
    pub fn create_comment(&mut self, content: &str) -> NodeId {
        self.push(Node::comment(content.to_string()))
    }

    /// Parent of a node (NONE if detached)
    pub fn parent(&self, id: NodeId) -> NodeId {
        self.get(id).map_or(NodeId::NONE, |n| n.parent)
    }

    /// Iterate over the direct children of a node
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            tree: self,
            next: self.get(id).map_or(NodeId::NONE, |n| n.first_child),
        }
    }

    /// Number of element children (`children.length` in the DOM)
    pub fn element_child_count(&self, id: NodeId) -> usize {
        self.children(id).filter(|(_, n)| n.is_element()).count()
    }

    /// True if `ancestor` is `node` or one of its ancestors
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = node;
        while current.is_valid() {
            if current == ancestor {
                return true;
            }
            current = self.parent(current);
        }
        false
    }

    /// Descendants of `id` in document order, excluding `id` itself
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).map(|(c, _)| c).collect();
        stack.reverse();
        while let Some(current) = stack.pop() {
            out.push(current);
            let len = stack.len();
            stack.extend(self.children(current).map(|(c, _)| c));
            stack[len..].reverse();
        }
        out
    }

    /// Descendant elements with the given tag, in document order
    /// (`querySelectorAll(tag)`; the root itself is never included).
    pub fn elements_by_tag_name(&self, id: NodeId, tag: &str) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|&d| {
                self.get(d)
                    .and_then(Node::as_element)
                    .is_some_and(|e| e.is(tag))
            })
            .collect()
    }

    /// Insert `child` into `parent` before `reference` (append when `None`).
    ///
    /// The child is detached from its current parent first.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        let parent_node = self.node(parent)?;
        if matches!(parent_node.data, NodeData::Text(_) | NodeData::Comment(_)) {
            return Err(DomError::HierarchyRequest { parent, child });
        }
        if matches!(self.node(child)?.data, NodeData::Document)
            || self.is_inclusive_ancestor(child, parent)
        {
            return Err(DomError::HierarchyRequest { parent, child });
        }
        if let Some(r) = reference {
            if self.node(r)?.parent != parent {
                return Err(DomError::NotAChild { parent, child: r });
            }
            if r == child {
                return Ok(());
            }
        }

        self.detach(child);

        let next = reference.unwrap_or(NodeId::NONE);
        let prev = match reference {
            Some(r) => self.nodes[r.0 as usize].prev_sibling,
            None => self.nodes[parent.0 as usize].last_child,
        };

        {
            let c = &mut self.nodes[child.0 as usize];
            c.parent = parent;
            c.prev_sibling = prev;
            c.next_sibling = next;
        }
        if prev.is_valid() {
            self.nodes[prev.0 as usize].next_sibling = child;
        } else {
            self.nodes[parent.0 as usize].first_child = child;
        }
        if next.is_valid() {
            self.nodes[next.0 as usize].prev_sibling = child;
        } else {
            self.nodes[parent.0 as usize].last_child = child;
        }
        Ok(())
    }

    /// Append `child` as the last child of `parent`
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Remove `child` from `parent`
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.node(parent)?;
        if self.node(child)?.parent != parent {
            return Err(DomError::NotAChild { parent, child });
        }
        self.detach(child);
        Ok(())
    }

    /// Unlink a node from its parent and siblings. No-op when detached.
    fn detach(&mut self, id: NodeId) {
        let (parent, prev, next) = {
            let n = &self.nodes[id.0 as usize];
            (n.parent, n.prev_sibling, n.next_sibling)
        };
        if !parent.is_valid() {
            return;
        }
        if prev.is_valid() {
            self.nodes[prev.0 as usize].next_sibling = next;
        } else {
            self.nodes[parent.0 as usize].first_child = next;
        }
        if next.is_valid() {
            self.nodes[next.0 as usize].prev_sibling = prev;
        } else {
            self.nodes[parent.0 as usize].last_child = prev;
        }
        let n = &mut self.nodes[id.0 as usize];
        n.parent = NodeId::NONE;
        n.prev_sibling = NodeId::NONE;
        n.next_sibling = NodeId::NONE;
    }

    /// Get an attribute (None for non-elements)
    pub fn get_attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.get(id)?.as_element()?.get_attr(name)
    }

    /// Set an attribute, returning the previous value
    pub fn set_attribute(
        &mut self,
        id: NodeId,
        name: &str,
        value: &str,
    ) -> Result<Option<String>, DomError> {
        let el = self
            .node_mut(id)?
            .as_element_mut()
            .ok_or(DomError::NotAnElement(id))?;
        Ok(el.set_attr(name, value.to_string()))
    }

    /// Remove an attribute, returning the removed value
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<Option<String>, DomError> {
        let el = self
            .node_mut(id)?
            .as_element_mut()
            .ok_or(DomError::NotAnElement(id))?;
        Ok(el.remove_attr(name))
    }

    /// Replace the data of a text or comment node, returning the old data
    pub fn set_character_data(&mut self, id: NodeId, content: &str) -> Result<String, DomError> {
        match &mut self.node_mut(id)?.data {
            NodeData::Text(t) => Ok(std::mem::replace(&mut t.content, content.to_string())),
            NodeData::Comment(c) => Ok(std::mem::replace(c, content.to_string())),
            _ => Err(DomError::NotCharacterData(id)),
        }
    }

    /// Set the load state of an element
    pub fn set_complete(&mut self, id: NodeId, complete: bool) -> Result<(), DomError> {
        let el = self
            .node_mut(id)?
            .as_element_mut()
            .ok_or(DomError::NotAnElement(id))?;
        el.complete = complete;
        Ok(())
    }
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a node's children
pub struct Children<'a> {
    tree: &'a DomTree,
    next: NodeId,
}

impl<'a> Iterator for Children<'a> {
    type Item = (NodeId, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next;
        let node = self.tree.get(id)?;
        self.next = node.next_sibling;
        Some((id, node))
    }
}
