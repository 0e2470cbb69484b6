//! Script node classification and deferral marking.
//!
//! Discovery is a pure traversal; marking the discovered nodes is a separate
//! pass so the tree is never mutated while it is being walked.

use deferjs_dom::{DomResult, DomTree, ElementData, NodeId};

use crate::markers;

/// `type` values (and `text/` + `language`) that denote JavaScript
pub const JS_MIME_TYPES: [&str; 16] = [
    "application/ecmascript",
    "application/javascript",
    "application/x-ecmascript",
    "application/x-javascript",
    "text/ecmascript",
    "text/javascript",
    "text/javascript1.0",
    "text/javascript1.1",
    "text/javascript1.2",
    "text/javascript1.3",
    "text/javascript1.4",
    "text/javascript1.5",
    "text/jscript",
    "text/livescript",
    "text/x-ecmascript",
    "text/x-javascript",
];

/// Whether an element is a script the browser would run as JavaScript
pub fn is_js_element(element: &ElementData) -> bool {
    if !element.is_script() {
        return false;
    }
    if let Some(script_type) = element.get_attribute("type") {
        return script_type.is_empty() || JS_MIME_TYPES.contains(&script_type);
    }
    if let Some(language) = element.get_attribute("language") {
        let as_type = format!("text/{}", language.to_ascii_lowercase());
        return language.is_empty() || JS_MIME_TYPES.contains(&as_type.as_str());
    }
    true
}

pub fn is_js_node(tree: &DomTree, node: NodeId) -> bool {
    tree.element(node).map(is_js_element).unwrap_or(false)
}

/// What a script node executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptPayload {
    /// Inline source text
    Inline(String),
    /// Remote script, by its (unresolved) URL
    External(String),
}

/// Extract the payload of a script node. A preserved original `src` wins
/// over the live attribute.
pub fn describe(tree: &DomTree, node: NodeId) -> ScriptPayload {
    let src = tree
        .attribute(node, markers::ORIG_SRC)
        .filter(|s| !s.is_empty())
        .or_else(|| tree.attribute(node, "src").filter(|s| !s.is_empty()));
    match src {
        Some(url) => ScriptPayload::External(url.to_string()),
        None => ScriptPayload::Inline(tree.text_content(node)),
    }
}

/// JavaScript script nodes under `root`, in document order. Scripts are
/// leaves: the walk does not descend into them.
pub fn discover_scripts(tree: &DomTree, root: NodeId) -> Vec<NodeId> {
    let mut found = Vec::new();
    collect_scripts(tree, root, &mut found);
    found
}

fn collect_scripts(tree: &DomTree, node: NodeId, found: &mut Vec<NodeId>) {
    for child in tree.children(node) {
        match tree.element(child) {
            Some(element) if element.is_script() => {
                if is_js_element(element) {
                    found.push(child);
                }
            }
            _ => collect_scripts(tree, child, found),
        }
    }
}

/// Turn discovered scripts into deferred ones: keep the original `type` and
/// `src`, swap in the deferred type, blank `src`, and hide the node.
pub fn mark_deferred(
    tree: &mut DomTree,
    scripts: &[NodeId],
    script_type: &str,
    not_processed_marker: &str,
) -> DomResult<()> {
    for &script in scripts {
        let orig_type = tree.attribute(script, "type").unwrap_or("").to_string();
        let orig_src = tree.attribute(script, "src").unwrap_or("").to_string();
        tree.set_attribute(script, markers::ORIG_TYPE, &orig_type)?;
        tree.set_attribute(script, "type", script_type)?;
        tree.set_attribute(script, markers::ORIG_SRC, &orig_src)?;
        tree.set_attribute(script, "src", "")?;
        tree.set_attribute(script, not_processed_marker, "")?;
    }
    Ok(())
}

/// Rewrite every JavaScript script of the document into a deferred one,
/// as the page rewriter does before serving. Returns the rewritten scripts.
pub fn defer_document(
    tree: &mut DomTree,
    script_type: &str,
    not_processed_marker: &str,
) -> DomResult<Vec<NodeId>> {
    let root = tree.document_id();
    let scripts = discover_scripts(tree, root);
    mark_deferred(tree, &scripts, script_type, not_processed_marker)?;
    Ok(scripts)
}

/// Connected deferred scripts, in document order
pub fn deferred_scripts(tree: &DomTree, script_type: &str) -> Vec<NodeId> {
    tree.elements_where(|e| e.is_script() && e.get_attribute("type") == Some(script_type))
}
