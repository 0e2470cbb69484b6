//! Events: synthetic lifecycle phases, the listener registry that buffers
//! registrations until their phase fires, and native listener records.

use std::fmt;

use deferjs_dom::NodeId;
use rustc_hash::FxHashMap;

/// Highest synthetic lifecycle event fired so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPhase {
    NotStarted,
    BeforeScripts,
    DomReady,
    Load,
    AfterScripts,
}

impl fmt::Display for EventPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventPhase::NotStarted => "NOT_STARTED",
            EventPhase::BeforeScripts => "BEFORE_SCRIPTS",
            EventPhase::DomReady => "DOM_READY",
            EventPhase::Load => "LOAD",
            EventPhase::AfterScripts => "AFTER_SCRIPTS",
        };
        f.write_str(name)
    }
}

/// Something listeners can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Window,
    Document,
    Element(NodeId),
}

/// Opaque handle to a function owned by the script host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub u64);

/// `Event.AT_TARGET`
pub const AT_TARGET: u8 = 2;

/// Event object handed to listeners
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: String,
    pub target: EventTarget,
    pub current_target: EventTarget,
    pub bubbles: bool,
    pub cancelable: bool,
    pub event_phase: u8,
    /// Virtual clock, milliseconds
    pub time_stamp: u64,
    /// Built by the engine rather than dispatched by the document
    pub synthetic: bool,
}

impl Event {
    /// An event dispatched by the document itself
    pub fn native(event_type: impl Into<String>, target: EventTarget, time_stamp: u64) -> Self {
        Self {
            event_type: event_type.into(),
            target,
            current_target: target,
            bubbles: false,
            cancelable: false,
            event_phase: AT_TARGET,
            time_stamp,
            synthetic: false,
        }
    }

    /// A replayed lifecycle event for a listener registered on
    /// `registered_on`. Window listeners see the document as the target.
    pub fn synthetic(
        event_type: impl Into<String>,
        registered_on: EventTarget,
        time_stamp: u64,
    ) -> Self {
        let target = match registered_on {
            EventTarget::Window => EventTarget::Document,
            other => other,
        };
        Self {
            event_type: event_type.into(),
            target,
            current_target: registered_on,
            bubbles: false,
            cancelable: false,
            event_phase: AT_TARGET,
            time_stamp,
            synthetic: true,
        }
    }
}

/// Work the engine schedules on the host page's own event machinery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineHook {
    /// Try to start deferred execution
    Start,
    /// An external task's script fired `load` or `error`
    TaskDone { seq: usize },
    /// A tracked dynamically created script reached a terminal event
    DynamicSettled(NodeId),
    /// A script created before deferred execution began settled
    NoDeferSettled(NodeId),
    /// The native window `load` arrived while waiting for it
    FireOnload,
}

/// A native listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    /// Page script function
    Script(CallbackId),
    /// Engine bookkeeping
    Engine(EngineHook),
}

/// A registration held back until its synthetic phase fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticListener {
    pub target: EventTarget,
    pub callback: CallbackId,
    pub event_type: &'static str,
}

/// What to do with an `addEventListener`-style registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Hold it for `phase`, delivering an event of type `event_type`
    Defer {
        phase: EventPhase,
        event_type: &'static str,
    },
    /// Not a lifecycle event, or its phase already passed
    PassThrough,
}

/// Decide how a registration for `event_name` is handled when the highest
/// phase fired so far is `current`
pub fn classify_registration(event_name: &str, current: EventPhase) -> Registration {
    match event_name {
        "DOMContentLoaded" | "readystatechange" | "onDOMContentLoaded" | "onreadystatechange"
            if current < EventPhase::DomReady =>
        {
            Registration::Defer {
                phase: EventPhase::DomReady,
                event_type: "DOMContentLoaded",
            }
        }
        "load" | "onload" if current < EventPhase::Load => Registration::Defer {
            phase: EventPhase::Load,
            event_type: "load",
        },
        "onbeforescripts" => Registration::Defer {
            phase: EventPhase::BeforeScripts,
            event_type: "beforescripts",
        },
        "onafterscripts" => Registration::Defer {
            phase: EventPhase::AfterScripts,
            event_type: "afterscripts",
        },
        _ => Registration::PassThrough,
    }
}

/// Listeners buffered per synthetic phase
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    by_phase: FxHashMap<EventPhase, Vec<SyntheticListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, phase: EventPhase, listener: SyntheticListener) {
        self.by_phase.entry(phase).or_default().push(listener);
    }

    /// Drain the listeners of `phase`, in registration order
    pub fn take(&mut self, phase: EventPhase) -> Vec<SyntheticListener> {
        self.by_phase.remove(&phase).unwrap_or_default()
    }

    pub fn len(&self, phase: EventPhase) -> usize {
        self.by_phase.get(&phase).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dom_ready_aliases_before_phase() {
        for name in ["DOMContentLoaded", "readystatechange", "onDOMContentLoaded", "onreadystatechange"] {
            assert_eq!(
                classify_registration(name, EventPhase::BeforeScripts),
                Registration::Defer {
                    phase: EventPhase::DomReady,
                    event_type: "DOMContentLoaded"
                }
            );
            assert_eq!(
                classify_registration(name, EventPhase::DomReady),
                Registration::PassThrough
            );
        }
    }

    #[test]
    fn test_load_until_load_phase() {
        assert_eq!(
            classify_registration("onload", EventPhase::DomReady),
            Registration::Defer {
                phase: EventPhase::Load,
                event_type: "load"
            }
        );
        assert_eq!(classify_registration("load", EventPhase::Load), Registration::PassThrough);
        assert_eq!(classify_registration("click", EventPhase::NotStarted), Registration::PassThrough);
    }

    #[test]
    fn test_script_run_hooks_always_defer() {
        assert!(matches!(
            classify_registration("onafterscripts", EventPhase::AfterScripts),
            Registration::Defer { phase: EventPhase::AfterScripts, .. }
        ));
        assert!(matches!(
            classify_registration("onbeforescripts", EventPhase::NotStarted),
            Registration::Defer { phase: EventPhase::BeforeScripts, .. }
        ));
    }

    #[test]
    fn test_synthetic_event_shape() {
        let event = Event::synthetic("load", EventTarget::Window, 7);
        assert_eq!(event.target, EventTarget::Document);
        assert_eq!(event.current_target, EventTarget::Window);
        assert!(!event.bubbles && !event.cancelable);
        assert_eq!(event.event_phase, AT_TARGET);
        assert!(event.synthetic);

        let elem = EventTarget::Element(NodeId(4));
        assert_eq!(Event::synthetic("load", elem, 0).target, elem);
    }

    #[test]
    fn test_registry_drains_once() {
        let mut registry = ListenerRegistry::new();
        let listener = |id| SyntheticListener {
            target: EventTarget::Document,
            callback: CallbackId(id),
            event_type: "DOMContentLoaded",
        };
        registry.push(EventPhase::DomReady, listener(1));
        registry.push(EventPhase::DomReady, listener(2));
        assert_eq!(registry.len(EventPhase::DomReady), 2);

        let drained: Vec<u64> = registry
            .take(EventPhase::DomReady)
            .into_iter()
            .map(|l| l.callback.0)
            .collect();
        assert_eq!(drained, vec![1, 2]);
        assert!(registry.take(EventPhase::DomReady).is_empty());
    }
}
