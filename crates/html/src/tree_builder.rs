//! HTML Tree Builder
//!
//! Constructs a DOM tree from HTML tokens. Whole documents get implicit
//! `html`/`head`/`body` elements; fragments are parsed into a detached
//! container with no implicit structure, the way `innerHTML` on a `div`
//! behaves.

use deferjs_dom::{DomTree, NodeId, NodeType};

use crate::error::{HtmlError, HtmlResult};
use crate::tokenizer::{Attributes, Token, Tokenizer};

/// HTML parser that builds a DOM tree
pub struct HtmlParser {
    tree: DomTree,
}

impl HtmlParser {
    /// Create a new HTML parser
    pub fn new() -> Self {
        Self {
            tree: DomTree::new(),
        }
    }

    /// Parse HTML string into a DOM tree
    pub fn parse(mut self, html: &str) -> HtmlResult<DomTree> {
        let root = self.tree.document_id();
        TreeBuilder::new(&mut self.tree, root, false).run(html)?;
        Ok(self.tree)
    }
}

impl Default for HtmlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `html` into a fresh detached `div` owned by `tree`, returning the
/// container. Its children are the parsed nodes in source order.
pub fn parse_fragment(tree: &mut DomTree, html: &str) -> HtmlResult<NodeId> {
    let container = tree.create_element("div");
    TreeBuilder::new(tree, container, true).run(html)?;
    Ok(container)
}

struct TreeBuilder<'t> {
    tree: &'t mut DomTree,
    root: NodeId,
    fragment: bool,
    open_elements: Vec<NodeId>,
    html: Option<NodeId>,
    head: Option<NodeId>,
    body: Option<NodeId>,
}

impl<'t> TreeBuilder<'t> {
    fn new(tree: &'t mut DomTree, root: NodeId, fragment: bool) -> Self {
        Self {
            tree,
            root,
            fragment,
            open_elements: Vec::new(),
            html: None,
            head: None,
            body: None,
        }
    }

    fn run(mut self, html: &str) -> HtmlResult<()> {
        if self.tree.get(self.root).is_none() {
            return Err(HtmlError::MissingContainer(self.root.as_u32()));
        }
        let mut tokenizer = Tokenizer::new(html);
        loop {
            match tokenizer.next_token() {
                Token::Eof => break,
                token => self.process_token(token)?,
            }
        }
        Ok(())
    }

    /// Process a single token
    fn process_token(&mut self, token: Token) -> HtmlResult<()> {
        match token {
            Token::Doctype { name } => {
                if !self.fragment {
                    let doctype = self.tree.create_doctype(name);
                    self.tree.append_child(self.root, doctype)?;
                }
            }
            Token::StartTag { name, attributes, self_closing } => {
                self.handle_start_tag(&name, attributes, self_closing)?;
            }
            Token::EndTag { name } => self.handle_end_tag(&name),
            Token::Text(text) => self.handle_text(&text)?,
            Token::Comment(text) => {
                let comment = self.tree.create_comment(text);
                let parent = self.current_node();
                self.tree.append_child(parent, comment)?;
            }
            Token::Eof => {}
        }
        Ok(())
    }

    /// Handle a start tag
    fn handle_start_tag(
        &mut self,
        name: &str,
        attributes: Attributes,
        self_closing: bool,
    ) -> HtmlResult<()> {
        if self.fragment && matches!(name, "html" | "head" | "body") {
            return Ok(());
        }
        if !self.fragment {
            match name {
                "html" => {
                    let html = self.ensure_html()?;
                    self.merge_attributes(html, attributes);
                    return Ok(());
                }
                "head" => {
                    if self.head.is_none() && self.body.is_none() {
                        let head = self.ensure_head()?;
                        self.open_elements.push(head);
                        self.merge_attributes(head, attributes);
                    }
                    return Ok(());
                }
                "body" => {
                    // A second <body> only contributes its attributes.
                    let body = self.ensure_body()?;
                    self.merge_attributes(body, attributes);
                    return Ok(());
                }
                _ => self.prepare_parent_for(name)?,
            }
        }

        let element_id = self.tree.create_element(name);
        self.merge_attributes(element_id, attributes);

        let parent = self.current_node();
        self.tree.append_child(parent, element_id)?;

        if !self_closing && !is_void_element(name) {
            self.open_elements.push(element_id);
        }
        Ok(())
    }

    /// Handle an end tag
    fn handle_end_tag(&mut self, name: &str) {
        // </body> and </html> keep the body open: content that follows still
        // belongs to it.
        if matches!(name, "body" | "html") {
            return;
        }
        for i in (0..self.open_elements.len()).rev() {
            let element_id = self.open_elements[i];
            if self.tree.tag_name(element_id) == Some(name) {
                self.open_elements.truncate(i);
                return;
            }
        }
    }

    /// Handle a run of character data
    fn handle_text(&mut self, text: &str) -> HtmlResult<()> {
        if !self.fragment && self.body.is_none() && self.outside_content() {
            if text.trim().is_empty() {
                return Ok(());
            }
            self.prepare_parent_for("#text")?;
        }

        let parent = self.current_node();
        if let Some(&last_child_id) = self.tree.get(parent).and_then(|n| n.children.last()) {
            if let Some(last_child) = self.tree.get_mut(last_child_id) {
                if let NodeType::Text(ref mut existing) = last_child.node_type {
                    existing.push_str(text);
                    return Ok(());
                }
            }
        }

        let text_id = self.tree.create_text(text);
        self.tree.append_child(parent, text_id)?;
        Ok(())
    }

    /// Whether the insertion point is structural (document, html or head)
    /// rather than inside a content element
    fn outside_content(&self) -> bool {
        let current = self.current_node();
        current == self.root || Some(current) == self.html || Some(current) == self.head
    }

    /// Get the current node (top of stack, else html, else the root)
    fn current_node(&self) -> NodeId {
        self.open_elements
            .last()
            .copied()
            .or(self.html)
            .unwrap_or(self.root)
    }

    fn merge_attributes(&mut self, element: NodeId, attributes: Attributes) {
        if let Some(elem) = self.tree.get_mut(element).and_then(|n| n.as_element_mut()) {
            for (key, value) in attributes {
                if !elem.has_attribute(&key) {
                    elem.set_attribute(key, value);
                }
            }
        }
    }

    /// Make sure the insertion point is right for an incoming element
    fn prepare_parent_for(&mut self, incoming: &str) -> HtmlResult<()> {
        self.ensure_html()?;
        if self.body.is_some() || !self.outside_content() {
            return Ok(());
        }
        if is_head_content(incoming) {
            if self.current_node() != self.head.unwrap_or(self.root) {
                let head = self.ensure_head()?;
                self.open_elements.push(head);
            }
            return Ok(());
        }
        self.ensure_body()?;
        Ok(())
    }

    fn ensure_html(&mut self) -> HtmlResult<NodeId> {
        if let Some(html) = self.html {
            return Ok(html);
        }
        let html = self.tree.create_element("html");
        self.tree.append_child(self.root, html)?;
        self.html = Some(html);
        Ok(html)
    }

    fn ensure_head(&mut self) -> HtmlResult<NodeId> {
        if let Some(head) = self.head {
            return Ok(head);
        }
        let html = self.ensure_html()?;
        let head = self.tree.create_element("head");
        self.tree.append_child(html, head)?;
        self.head = Some(head);
        Ok(head)
    }

    fn ensure_body(&mut self) -> HtmlResult<NodeId> {
        if let Some(body) = self.body {
            return Ok(body);
        }
        let html = self.ensure_html()?;
        // Leaving the head closes it.
        if let Some(head) = self.head {
            if let Some(i) = self.open_elements.iter().position(|id| *id == head) {
                self.open_elements.truncate(i);
            }
        }
        let body = self.tree.create_element("body");
        self.tree.append_child(html, body)?;
        self.open_elements.push(body);
        self.body = Some(body);
        Ok(body)
    }
}

/// Check if an element is a void element (self-closing)
fn is_void_element(name: &str) -> bool {
    matches!(
        name,
        "area" | "base" | "br" | "col" | "embed" | "hr" | "img" | "input"
        | "link" | "meta" | "param" | "source" | "track" | "wbr"
    )
}

/// Check if a tag belongs in head when it appears before the body
fn is_head_content(name: &str) -> bool {
    matches!(
        name,
        "base" | "link" | "meta" | "noscript" | "script" | "style" | "template" | "title"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferjs_dom::Queryable;

    fn parse(html: &str) -> DomTree {
        HtmlParser::new().parse(html).unwrap()
    }

    #[test]
    fn test_parse_simple() {
        let html = r#"<!DOCTYPE html>
<html>
<head><title>Test</title></head>
<body><p>Hello</p></body>
</html>"#;

        let tree = parse(html);
        assert_eq!(tree.get_elements_by_tag_name("html").len(), 1);
        let p = tree.get_elements_by_tag_name("p");
        assert_eq!(p.len(), 1);
        assert_eq!(tree.parent(p[0]), tree.body());
    }

    #[test]
    fn test_implicit_html_and_body() {
        let tree = parse("<div id=\"main\">Hello World</div>");
        assert_eq!(tree.get_elements_by_tag_name("html").len(), 1);
        let main = tree.get_element_by_id("main").unwrap();
        assert_eq!(tree.parent(main), tree.body());
    }

    #[test]
    fn test_head_scripts_stay_in_head() {
        let tree = parse("<html><script>var a = 1;</script><p>x</p></html>");
        let script = tree.get_elements_by_tag_name("script")[0];
        let head = tree.get_elements_by_tag_name("head")[0];
        assert_eq!(tree.parent(script), Some(head));
        assert_eq!(tree.text_content(script), "var a = 1;");
        let p = tree.get_elements_by_tag_name("p")[0];
        assert_eq!(tree.parent(p), tree.body());
    }

    #[test]
    fn test_void_elements_no_close() {
        let tree = parse("<div><br><img src=\"a.png\"><input></div>");
        let div = tree.get_elements_by_tag_name("div")[0];
        assert_eq!(tree.children(div).len(), 3);
    }

    #[test]
    fn test_multiple_body_merges() {
        let tree = parse("<body><p>1</p></body><body onload=\"go()\"><p>2</p></body>");
        assert_eq!(tree.get_elements_by_tag_name("body").len(), 1);
        let body = tree.body().unwrap();
        assert_eq!(tree.attribute(body, "onload"), Some("go()"));
        assert_eq!(tree.get_elements_by_tag_name("p").len(), 2);
    }

    #[test]
    fn test_content_after_body_end_tag() {
        let tree = parse("<body><p>1</p></body><script>late()</script>");
        let script = tree.get_elements_by_tag_name("script")[0];
        assert_eq!(tree.parent(script), tree.body());
    }

    #[test]
    fn test_unclosed_and_mismatched_tags() {
        let tree = parse("<div><span>text</div><p>after</p>");
        let p = tree.get_elements_by_tag_name("p")[0];
        assert_eq!(tree.parent(p), tree.body());
    }

    #[test]
    fn test_fragment_has_no_implicit_structure() {
        let mut tree = parse("<body></body>");
        let container =
            parse_fragment(&mut tree, "<script src=\"x.js\"></script>text<b>bold</b>").unwrap();

        let children = tree.children(container);
        assert_eq!(children.len(), 3);
        assert_eq!(tree.tag_name(children[0]), Some("script"));
        assert_eq!(tree.text_content(children[1]), "text");
        assert_eq!(tree.tag_name(children[2]), Some("b"));
        assert!(!tree.is_connected(container));
        assert_eq!(tree.get_elements_by_tag_name("script").len(), 0);
    }

    #[test]
    fn test_fragment_ignores_document_tags() {
        let mut tree = DomTree::new();
        let container = parse_fragment(&mut tree, "<html><body><i>x</i></body></html>").unwrap();
        let children = tree.children(container);
        assert_eq!(children.len(), 1);
        assert_eq!(tree.tag_name(children[0]), Some("i"));
    }
}
