//! Watcher configuration
//!
//! Field names deserialize from the camelCase keys used by option
//! objects (`timeout`, `observers.attributeFilter`, ...).

use mutant_dom::MutationObserverInit;
use serde::Deserialize;

/// Which change source backs a watcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSourceKind {
    /// Native mutation observer when the document supports it, else legacy
    #[default]
    Auto,
    /// Native mutation observer
    Native,
    /// Coarse `DOMSubtreeModified` listener
    Legacy,
}

/// Options forwarded to the native mutation observer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObserverOptions {
    pub attributes: bool,
    pub attribute_filter: Option<Vec<String>>,
    pub attribute_old_value: bool,
    pub child_list: bool,
    pub character_data: bool,
    pub character_data_old_value: bool,
    pub subtree: bool,
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self {
            attributes: false,
            attribute_filter: None,
            attribute_old_value: false,
            child_list: true,
            character_data: false,
            character_data_old_value: false,
            subtree: true,
        }
    }
}

impl ObserverOptions {
    /// Observer init with dependent options dropped unless their tracking
    /// flag is on.
    pub fn to_init(&self) -> MutationObserverInit {
        MutationObserverInit {
            child_list: self.child_list,
            attributes: self.attributes,
            character_data: self.character_data,
            subtree: self.subtree,
            attribute_old_value: self.attributes && self.attribute_old_value,
            character_data_old_value: self.character_data && self.character_data_old_value,
            attribute_filter: if self.attributes {
                self.attribute_filter.clone()
            } else {
                None
            },
        }
    }
}

/// Watcher options
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatcherOptions {
    /// Throttle window for notifications in ms; 0 notifies on every batch
    pub timeout: u64,
    pub change_source: ChangeSourceKind,
    pub observers: ObserverOptions,
}

impl WatcherOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = timeout_ms;
        self
    }

    pub fn with_change_source(mut self, kind: ChangeSourceKind) -> Self {
        self.change_source = kind;
        self
    }

    pub fn with_observers(mut self, observers: ObserverOptions) -> Self {
        self.observers = observers;
        self
    }
}
