//! The override table: which host primitives are currently routed to the
//! engine instead of their native implementation.

use rustc_hash::FxHashSet;

use crate::error::{DeferError, DeferResult};

/// An interceptable host primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Override {
    Write,
    Writeln,
    Open,
    Close,
    GetElementById,
    GetElementsByTagName,
    CreateElement,
    AddEventListener,
    AttachEvent,
    InsertBefore,
    AppendChild,
    ReadyState,
    DocumentAll,
    DoScroll,
}

impl Override {
    pub const ALL: [Override; 14] = [
        Override::Write,
        Override::Writeln,
        Override::Open,
        Override::Close,
        Override::GetElementById,
        Override::GetElementsByTagName,
        Override::CreateElement,
        Override::AddEventListener,
        Override::AttachEvent,
        Override::InsertBefore,
        Override::AppendChild,
        Override::ReadyState,
        Override::DocumentAll,
        Override::DoScroll,
    ];

    /// Script-visible name of the primitive
    pub fn name(self) -> &'static str {
        match self {
            Override::Write => "document.write",
            Override::Writeln => "document.writeln",
            Override::Open => "document.open",
            Override::Close => "document.close",
            Override::GetElementById => "document.getElementById",
            Override::GetElementsByTagName => "document.getElementsByTagName",
            Override::CreateElement => "document.createElement",
            Override::AddEventListener => "addEventListener",
            Override::AttachEvent => "attachEvent",
            Override::InsertBefore => "Node.insertBefore",
            Override::AppendChild => "Node.appendChild",
            Override::ReadyState => "document.readyState",
            Override::DocumentAll => "document.all",
            Override::DoScroll => "documentElement.doScroll",
        }
    }
}

/// Installed and locked primitives
#[derive(Debug, Default)]
pub struct OverrideTable {
    installed: FxHashSet<Override>,
    locked: FxHashSet<Override>,
}

impl OverrideTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `o` to the engine. Fails for locked primitives.
    pub fn install(&mut self, o: Override) -> DeferResult<()> {
        if self.locked.contains(&o) {
            return Err(DeferError::OverrideLocked(o));
        }
        self.installed.insert(o);
        Ok(())
    }

    /// Put the native implementation back; false if it was not overridden
    pub fn restore(&mut self, o: Override) -> bool {
        self.installed.remove(&o)
    }

    /// Make `o` non-configurable
    pub fn lock(&mut self, o: Override) {
        self.locked.insert(o);
    }

    pub fn is_installed(&self, o: Override) -> bool {
        self.installed.contains(&o)
    }

    pub fn installed_count(&self) -> usize {
        self.installed.len()
    }
}
