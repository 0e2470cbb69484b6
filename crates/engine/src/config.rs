//! Engine configuration.
//!
//! Host feature probes are resolved once into [`Capabilities`] and handed to
//! the engine; nothing is sniffed while scripts run.

use crate::markers;

/// Default delay between start attempts while the start is postponed
pub const DEFAULT_START_POLL_MS: u64 = 50;

/// Default bound on event loop iterations
pub const DEFAULT_MAX_STEPS: usize = 10_000;

/// Features the host document offers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capabilities {
    /// `querySelector`/`querySelectorAll` are usable
    pub query_selector: bool,
    /// `addEventListener` exists (otherwise only `attachEvent`)
    pub add_event_listener: bool,
    /// Host properties such as `readyState` can be redefined
    pub define_property: bool,
    /// Internet Explorer document mode, if the host is IE
    pub ie_version: Option<f32>,
}

impl Capabilities {
    /// Capabilities of an Internet Explorer host in the given document mode
    pub fn legacy_ie(version: f32) -> Self {
        Self {
            query_selector: version >= 8.0,
            add_event_listener: version >= 9.0,
            define_property: true,
            ie_version: Some(version),
        }
    }

    /// Whether selector based lookups may back `getElementsByTagName`
    pub fn selectors_usable(&self) -> bool {
        self.query_selector && !matches!(self.ie_version, Some(v) if v <= 8.0)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            query_selector: true,
            add_event_listener: true,
            define_property: true,
            ie_version: None,
        }
    }
}

/// Deferred execution settings
#[derive(Debug, Clone, PartialEq)]
pub struct DeferConfig {
    /// Type attribute identifying deferred scripts
    pub script_type: String,
    /// Attribute hiding nodes execution has not reached
    pub not_processed_marker: String,
    /// Milliseconds between start attempts while postponed
    pub start_poll_interval: u64,
    /// Enable the Internet Explorer workarounds
    pub legacy_ie_compat: bool,
    pub capabilities: Capabilities,
}

impl DeferConfig {
    /// The IE document mode the engine should emulate, if any.
    ///
    /// Workarounds apply only when compatibility mode is on and the host
    /// actually is IE.
    pub fn ie_mode(&self) -> Option<f32> {
        if self.legacy_ie_compat {
            self.capabilities.ie_version
        } else {
            None
        }
    }

    /// Configuration for an IE host with the compatibility mode on
    pub fn legacy_ie(version: f32) -> Self {
        Self {
            legacy_ie_compat: true,
            capabilities: Capabilities::legacy_ie(version),
            ..Self::default()
        }
    }
}

impl Default for DeferConfig {
    fn default() -> Self {
        Self {
            script_type: markers::SCRIPT_TYPE.to_string(),
            not_processed_marker: markers::NOT_PROCESSED.to_string(),
            start_poll_interval: DEFAULT_START_POLL_MS,
            legacy_ie_compat: false,
            capabilities: Capabilities::default(),
        }
    }
}

/// How a page is loaded
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    /// Install the deferred execution engine at the end of parsing
    pub defer: Option<DeferConfig>,
    /// Event loop iteration bound
    pub max_steps: usize,
}

impl LoadOptions {
    /// Plain browser behavior, no engine
    pub fn native() -> Self {
        Self {
            defer: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Deferred execution with the default configuration
    pub fn deferred() -> Self {
        Self::with_config(DeferConfig::default())
    }

    pub fn with_config(config: DeferConfig) -> Self {
        Self {
            defer: Some(config),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self::native()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ie_mode_requires_compat_flag() {
        let mut config = DeferConfig::default();
        config.capabilities.ie_version = Some(9.0);
        assert_eq!(config.ie_mode(), None);

        config.legacy_ie_compat = true;
        assert_eq!(config.ie_mode(), Some(9.0));
        assert_eq!(DeferConfig::default().ie_mode(), None);
    }

    #[test]
    fn test_old_ie_disables_selectors() {
        assert!(Capabilities::default().selectors_usable());
        assert!(!Capabilities::legacy_ie(8.0).selectors_usable());
        assert!(Capabilities::legacy_ie(9.0).selectors_usable());
        assert!(!Capabilities::legacy_ie(8.0).add_event_listener);
    }
}
