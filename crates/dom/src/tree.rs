//! DOM Tree structure

use rustc_hash::FxHashMap;
use std::fmt;

use crate::error::{DomError, DomResult};
use crate::node::{ElementData, Node, NodeId, NodeType};

/// DOM tree that owns all nodes, attached or not
pub struct DomTree {
    /// All nodes in the tree
    nodes: FxHashMap<NodeId, Node>,
    /// Next available node ID
    next_id: u32,
    /// Root document node
    document_id: NodeId,
}

impl DomTree {
    /// Create a new empty DOM tree
    pub fn new() -> Self {
        let document_id = NodeId::new(0);
        let document = Node::new(document_id, NodeType::Document);

        let mut nodes = FxHashMap::default();
        nodes.insert(document_id, document);

        Self {
            nodes,
            next_id: 1,
            document_id,
        }
    }

    /// Get the document (root) node ID
    pub fn document_id(&self) -> NodeId {
        self.document_id
    }

    /// Get a node by ID
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Get a mutable node by ID
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    fn alloc(&mut self, node_type: NodeType) -> NodeId {
        let id = NodeId::new(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(id, node_type));
        id
    }

    /// Create a new, detached element node
    pub fn create_element(&mut self, tag_name: impl Into<String>) -> NodeId {
        self.alloc(NodeType::Element(ElementData::new(tag_name)))
    }

    /// Create a new, detached text node
    pub fn create_text(&mut self, content: impl Into<String>) -> NodeId {
        self.alloc(NodeType::Text(content.into()))
    }

    /// Create a new, detached comment node
    pub fn create_comment(&mut self, content: impl Into<String>) -> NodeId {
        self.alloc(NodeType::Comment(content.into()))
    }

    /// Create a DOCTYPE node
    pub fn create_doctype(&mut self, name: impl Into<String>) -> NodeId {
        self.alloc(NodeType::Doctype { name: name.into() })
    }

    /// Append a child node to a parent, moving it out of its old parent first
    pub fn append_child(&mut self, parent_id: NodeId, child_id: NodeId) -> DomResult<()> {
        self.insert_before(parent_id, child_id, None)
    }

    /// Insert `child_id` into `parent_id` before `reference`, or last when
    /// `reference` is `None`
    pub fn insert_before(
        &mut self,
        parent_id: NodeId,
        child_id: NodeId,
        reference: Option<NodeId>,
    ) -> DomResult<()> {
        if !self.nodes.contains_key(&parent_id) {
            return Err(DomError::NodeNotFound(parent_id.0));
        }
        if !self.nodes.contains_key(&child_id) {
            return Err(DomError::NodeNotFound(child_id.0));
        }
        if child_id == self.document_id {
            return Err(DomError::InvalidNodeType);
        }
        if self.contains(child_id, parent_id) {
            return Err(DomError::HierarchyRequest(child_id.0));
        }
        if let Some(reference) = reference {
            if self.parent(reference) != Some(parent_id) {
                return Err(DomError::NotAChild {
                    parent: parent_id.0,
                    child: reference.0,
                });
            }
        }
        // Inserting a node before itself leaves the tree as it is.
        if reference == Some(child_id) {
            return Ok(());
        }

        self.detach(child_id);

        let parent = self.get_mut(parent_id).ok_or(DomError::NodeNotFound(parent_id.0))?;
        let index = match reference {
            Some(reference) => parent
                .children
                .iter()
                .position(|id| *id == reference)
                .unwrap_or(parent.children.len()),
            None => parent.children.len(),
        };
        parent.children.insert(index, child_id);

        let child = self.get_mut(child_id).ok_or(DomError::NodeNotFound(child_id.0))?;
        child.parent = Some(parent_id);
        Ok(())
    }

    /// Remove a node from its parent
    pub fn remove_child(&mut self, parent_id: NodeId, child_id: NodeId) -> DomResult<()> {
        if self.parent(child_id) != Some(parent_id) {
            return Err(DomError::NotAChild {
                parent: parent_id.0,
                child: child_id.0,
            });
        }
        self.detach(child_id);
        Ok(())
    }

    /// Detach a node from its parent, if it has one
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent_id) = self.parent(id) else {
            return;
        };
        if let Some(parent) = self.get_mut(parent_id) {
            parent.children.retain(|child| *child != id);
        }
        if let Some(node) = self.get_mut(id) {
            node.parent = None;
        }
    }

    /// Get the parent of a node
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    /// Get all children of a node
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id)
            .map(|n| n.children.to_vec())
            .unwrap_or_default()
    }

    /// Get the sibling that follows a node
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.get(self.parent(id)?)?;
        let index = parent.children.iter().position(|child| *child == id)?;
        parent.children.get(index + 1).copied()
    }

    /// Whether `ancestor` is `node` or one of its ancestors
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Whether a node is reachable from the document root
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.contains(self.document_id, id)
    }

    /// Iterate over all descendants of a node (depth-first, document order)
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        self.collect_descendants(id, &mut result);
        result
    }

    fn collect_descendants(&self, id: NodeId, result: &mut Vec<NodeId>) {
        if let Some(node) = self.get(id) {
            for &child_id in &node.children {
                result.push(child_id);
                self.collect_descendants(child_id, result);
            }
        }
    }

    /// All connected elements matching `predicate`, in document order
    pub fn elements_where(&self, predicate: impl Fn(&ElementData) -> bool) -> Vec<NodeId> {
        self.descendants(self.document_id)
            .into_iter()
            .filter(|&id| {
                self.get(id)
                    .and_then(|n| n.as_element())
                    .map(&predicate)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// First connected element matching `predicate`, in document order
    pub fn find_element(&self, predicate: impl Fn(&ElementData) -> bool) -> Option<NodeId> {
        self.elements_where(predicate).into_iter().next()
    }

    /// All connected elements carrying an attribute, in document order
    pub fn elements_with_attribute(&self, name: &str) -> Vec<NodeId> {
        self.elements_where(|e| e.has_attribute(name))
    }

    /// The `<html>` element
    pub fn document_element(&self) -> Option<NodeId> {
        self.children(self.document_id)
            .into_iter()
            .find(|&id| self.tag_name(id) == Some("html"))
    }

    /// The first `<body>` element
    pub fn body(&self) -> Option<NodeId> {
        self.find_element(|e| e.tag_name == "body")
    }

    /// Get the tag name of an element node
    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.get(id).and_then(|n| n.tag_name())
    }

    /// Get element data, if `id` is an element
    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        self.get(id).and_then(|n| n.as_element())
    }

    /// Read an attribute of an element
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id).and_then(|e| e.get_attribute(name))
    }

    /// Whether an element carries an attribute
    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.attribute(id, name).is_some()
    }

    /// Set an attribute on an element
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> DomResult<()> {
        let node = self.get_mut(id).ok_or(DomError::NodeNotFound(id.0))?;
        let elem = node.as_element_mut().ok_or(DomError::InvalidNodeType)?;
        elem.set_attribute(name, value);
        Ok(())
    }

    /// Remove an attribute from an element, returning its old value
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Option<String> {
        self.get_mut(id)
            .and_then(|n| n.as_element_mut())
            .and_then(|e| e.remove_attribute(name))
    }

    /// Get the text content of a node and all its descendants
    pub fn text_content(&self, id: NodeId) -> String {
        let mut result = String::new();
        self.collect_text(id, &mut result);
        result
    }

    fn collect_text(&self, id: NodeId, result: &mut String) {
        if let Some(node) = self.get(id) {
            match &node.node_type {
                NodeType::Text(text) => result.push_str(text),
                _ => {
                    for &child_id in &node.children {
                        self.collect_text(child_id, result);
                    }
                }
            }
        }
    }

    /// Replace all children of a node with a single text node
    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> DomResult<()> {
        if let Some(node) = self.get_mut(id) {
            if let NodeType::Text(content) = &mut node.node_type {
                *content = text.to_string();
                return Ok(());
            }
        }
        for child in self.children(id) {
            self.detach(child);
        }
        if !text.is_empty() {
            let text_id = self.create_text(text);
            self.append_child(id, text_id)?;
        }
        Ok(())
    }

    /// Get the number of nodes in the tree
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the tree is empty (only has document node)
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Pretty print the tree for debugging
    pub fn pretty_print(&self) -> String {
        let mut output = String::new();
        self.print_node(self.document_id, 0, &mut output);
        output
    }

    fn print_node(&self, id: NodeId, depth: usize, output: &mut String) {
        let indent = "  ".repeat(depth);

        if let Some(node) = self.get(id) {
            match &node.node_type {
                NodeType::Document => output.push_str("#document\n"),
                NodeType::Doctype { name } => {
                    output.push_str(&format!("{}<!DOCTYPE {}>\n", indent, name));
                }
                NodeType::Element(elem) => {
                    let attrs: String = elem
                        .attributes
                        .iter()
                        .map(|a| format!(" {}=\"{}\"", a.name, a.value))
                        .collect();
                    output.push_str(&format!("{}<{}{}>\n", indent, elem.tag_name, attrs));
                }
                NodeType::Text(text) => {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        output.push_str(&format!("{}#text: {:?}\n", indent, trimmed));
                    }
                }
                NodeType::Comment(text) => {
                    output.push_str(&format!("{}<!-- {} -->\n", indent, text));
                }
            }

            for &child_id in &node.children {
                self.print_node(child_id, depth + 1, output);
            }
        }
    }
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DomTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty_print())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skeleton() -> (DomTree, NodeId) {
        let mut tree = DomTree::new();
        let html = tree.create_element("html");
        let body = tree.create_element("body");
        tree.append_child(tree.document_id(), html).unwrap();
        tree.append_child(html, body).unwrap();
        (tree, body)
    }

    #[test]
    fn test_create_elements() {
        let (mut tree, body) = skeleton();
        let text = tree.create_text("Hello, World!");
        tree.append_child(body, text).unwrap();

        assert_eq!(tree.len(), 4);
        assert_eq!(tree.text_content(body), "Hello, World!");
        assert_eq!(tree.body(), Some(body));
    }

    #[test]
    fn test_insert_before_orders_children() {
        let (mut tree, body) = skeleton();
        let a = tree.create_element("a");
        let b = tree.create_element("b");
        let c = tree.create_element("c");
        tree.append_child(body, a).unwrap();
        tree.append_child(body, c).unwrap();
        tree.insert_before(body, b, Some(c)).unwrap();

        assert_eq!(tree.children(body), vec![a, b, c]);
        assert_eq!(tree.next_sibling(a), Some(b));
        assert_eq!(tree.next_sibling(c), None);
    }

    #[test]
    fn test_insert_moves_node_from_old_parent() {
        let (mut tree, body) = skeleton();
        let div = tree.create_element("div");
        let span = tree.create_element("span");
        tree.append_child(body, div).unwrap();
        tree.append_child(div, span).unwrap();
        tree.append_child(body, span).unwrap();

        assert!(tree.children(div).is_empty());
        assert_eq!(tree.children(body), vec![div, span]);
    }

    #[test]
    fn test_insert_before_foreign_reference_fails() {
        let (mut tree, body) = skeleton();
        let stray = tree.create_element("div");
        let node = tree.create_element("p");

        assert!(matches!(
            tree.insert_before(body, node, Some(stray)),
            Err(DomError::NotAChild { .. })
        ));
        assert_eq!(tree.parent(node), None);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let (mut tree, body) = skeleton();
        let div = tree.create_element("div");
        tree.append_child(body, div).unwrap();
        assert!(matches!(
            tree.append_child(div, body),
            Err(DomError::HierarchyRequest(_))
        ));
    }

    #[test]
    fn test_connectivity() {
        let (mut tree, body) = skeleton();
        let script = tree.create_element("script");
        assert!(!tree.is_connected(script));
        tree.append_child(body, script).unwrap();
        assert!(tree.is_connected(script));
        tree.remove_child(body, script).unwrap();
        assert!(!tree.is_connected(script));
    }

    #[test]
    fn test_attribute_queries_in_document_order() {
        let (mut tree, body) = skeleton();
        let first = tree.create_element("div");
        let second = tree.create_element("script");
        tree.append_child(body, first).unwrap();
        tree.append_child(body, second).unwrap();
        tree.set_attribute(second, "frz_current_node", "").unwrap();
        tree.set_attribute(first, "frz_current_node", "").unwrap();

        assert_eq!(tree.elements_with_attribute("frz_current_node"), vec![first, second]);
        tree.remove_attribute(first, "frz_current_node");
        assert_eq!(
            tree.find_element(|e| e.has_attribute("frz_current_node")),
            Some(second)
        );
    }

    #[test]
    fn test_set_text_content_replaces_children() {
        let (mut tree, body) = skeleton();
        let script = tree.create_element("script");
        tree.append_child(body, script).unwrap();
        tree.set_text_content(script, "first").unwrap();
        tree.set_text_content(script, "second").unwrap();

        assert_eq!(tree.children(script).len(), 1);
        assert_eq!(tree.text_content(script), "second");
    }
}
