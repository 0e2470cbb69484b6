//! Tracking of script elements created by page code while the engine runs.

use deferjs_dom::{DomTree, NodeId};

/// When a tracked script can be written off as never firing `load`/`error`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessRule {
    /// Detached from the document, or without a source
    Modern,
    /// IE 9+: no parent, or neither source nor text
    LegacyIe,
    /// IE 8 and older: every tracked script is expected to fire
    OldIe,
}

impl LivenessRule {
    pub fn for_ie_mode(ie_version: Option<f32>) -> Self {
        match ie_version {
            None => LivenessRule::Modern,
            Some(v) if v > 8.0 => LivenessRule::LegacyIe,
            Some(_) => LivenessRule::OldIe,
        }
    }
}

/// Whether `script` can never dispatch a terminal event
pub fn never_fires(tree: &DomTree, script: NodeId, rule: LivenessRule) -> bool {
    let src = tree.attribute(script, "src").unwrap_or("");
    match rule {
        LivenessRule::Modern => !tree.is_connected(script) || src.is_empty(),
        LivenessRule::LegacyIe => {
            tree.parent(script).is_none() || (src.is_empty() && tree.text_content(script).is_empty())
        }
        LivenessRule::OldIe => false,
    }
}

/// Script elements whose terminal event is still awaited
#[derive(Debug, Default, Clone)]
pub struct DynamicScriptSet {
    scripts: Vec<NodeId>,
}

impl DynamicScriptSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking; false if it was already tracked
    pub fn track(&mut self, script: NodeId) -> bool {
        if self.scripts.contains(&script) {
            return false;
        }
        self.scripts.push(script);
        true
    }

    /// Stop tracking; false if it was not tracked
    pub fn settle(&mut self, script: NodeId) -> bool {
        match self.scripts.iter().position(|s| *s == script) {
            Some(index) => {
                self.scripts.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn contains(&self, script: NodeId) -> bool {
        self.scripts.contains(&script)
    }

    /// How many tracked scripts will never fire
    pub fn never_fire_count(&self, tree: &DomTree, rule: LivenessRule) -> usize {
        self.scripts
            .iter()
            .filter(|&&s| never_fires(tree, s, rule))
            .count()
    }

    /// No tracked script has a terminal event outstanding
    pub fn all_settled(&self, tree: &DomTree, rule: LivenessRule) -> bool {
        self.scripts.is_empty() || self.never_fire_count(tree, rule) == self.scripts.len()
    }
}
