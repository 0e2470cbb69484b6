//! Native DOM lookups (getElementById, getElementsByTagName)

use crate::node::NodeId;
use crate::tree::DomTree;

/// Trait for querying the DOM the way an unpatched document does
pub trait Queryable {
    /// Find the first connected element with the given ID attribute
    fn get_element_by_id(&self, id: &str) -> Option<NodeId>;

    /// Find connected elements by tag name; `*` matches every element
    fn get_elements_by_tag_name(&self, tag_name: &str) -> Vec<NodeId>;
}

impl Queryable for DomTree {
    fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.find_element(|e| e.id() == Some(id))
    }

    fn get_elements_by_tag_name(&self, tag_name: &str) -> Vec<NodeId> {
        if tag_name == "*" {
            return self.elements_where(|_| true);
        }
        let tag_lower = tag_name.to_ascii_lowercase();
        self.elements_where(|e| e.tag_name == tag_lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_element_by_id() {
        let mut tree = DomTree::new();
        let html = tree.create_element("html");
        let div = tree.create_element("div");
        tree.set_attribute(div, "id", "test").unwrap();

        tree.append_child(tree.document_id(), html).unwrap();
        tree.append_child(html, div).unwrap();

        assert_eq!(tree.get_element_by_id("test"), Some(div));
        assert_eq!(tree.get_element_by_id("nonexistent"), None);
    }

    #[test]
    fn test_detached_elements_are_not_found() {
        let mut tree = DomTree::new();
        let div = tree.create_element("div");
        tree.set_attribute(div, "id", "floating").unwrap();

        assert_eq!(tree.get_element_by_id("floating"), None);
        assert!(tree.get_elements_by_tag_name("div").is_empty());
    }

    #[test]
    fn test_get_elements_by_tag_name() {
        let mut tree = DomTree::new();
        let html = tree.create_element("html");
        let a = tree.create_element("script");
        let b = tree.create_element("SCRIPT");
        tree.append_child(tree.document_id(), html).unwrap();
        tree.append_child(html, a).unwrap();
        tree.append_child(html, b).unwrap();

        assert_eq!(tree.get_elements_by_tag_name("Script"), vec![a, b]);
        assert_eq!(tree.get_elements_by_tag_name("*"), vec![html, a, b]);
    }
}
