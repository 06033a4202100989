//! mutant DOM - host environment
//!
//! Arena-based DOM tree with events, mutation observers and a
//! deterministic event loop driven by a virtual clock.

mod node;
mod tree;
mod dom_events;
mod mutation_observer;
mod timers;
mod document;

pub use node::{Attribute, ElementData, Node, NodeData, NodeType, TextData};
pub use tree::{DomError, DomTree};
pub use dom_events::{DomEvent, DomEventType, EventListener, ListenerId};
pub use mutation_observer::{
    MutationCallback, MutationObserverInit, MutationRecord, MutationType, ObserverId,
};
pub use timers::{TimerId, TimerQueue};
pub use document::Document;

/// Node identifier (index into arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Root node ID
    pub const ROOT: NodeId = NodeId(0);
    /// Invalid/none node
    pub const NONE: NodeId = NodeId(u32::MAX);

    /// Check if this is a valid node reference
    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::NONE
    }

    /// Raw arena index
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.0)
        } else {
            f.write_str("#none")
        }
    }
}
