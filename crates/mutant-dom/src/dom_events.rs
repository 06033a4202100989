//! DOM Events
//!
//! Load/error signals, the legacy subtree event and the listener registry.

use crate::NodeId;
use std::collections::HashMap;
use std::rc::Rc;

/// DOM event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomEventType {
    // Resource events
    Load,
    Error,

    /// Legacy mutation event fired after every tree change
    DOMSubtreeModified,
}

impl DomEventType {
    /// Whether the event propagates to ancestors
    pub fn bubbles(self) -> bool {
        !matches!(self, DomEventType::Load | DomEventType::Error)
    }

    /// Event name as used by `addEventListener`
    pub fn name(self) -> &'static str {
        match self {
            DomEventType::Load => "load",
            DomEventType::Error => "error",
            DomEventType::DOMSubtreeModified => "DOMSubtreeModified",
        }
    }
}

/// DOM event
#[derive(Debug, Clone)]
pub struct DomEvent {
    pub event_type: DomEventType,
    pub target: NodeId,
    pub current_target: NodeId,
    /// Virtual clock time of dispatch (ms)
    pub timestamp: u64,
}

impl DomEvent {
    pub fn new(event_type: DomEventType, target: NodeId, timestamp: u64) -> Self {
        Self {
            event_type,
            target,
            current_target: target,
            timestamp,
        }
    }

    /// Create load event
    pub fn load(target: NodeId, timestamp: u64) -> Self {
        Self::new(DomEventType::Load, target, timestamp)
    }

    /// Create error event
    pub fn error(target: NodeId, timestamp: u64) -> Self {
        Self::new(DomEventType::Error, target, timestamp)
    }

    /// Create subtree modified event
    pub fn subtree_modified(target: NodeId, timestamp: u64) -> Self {
        Self::new(DomEventType::DOMSubtreeModified, target, timestamp)
    }
}

/// Listener callback
pub type EventListener = Rc<dyn Fn(&DomEvent)>;

/// Handle returned by `add_event_listener`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

struct Registered {
    id: ListenerId,
    event_type: DomEventType,
    listener: EventListener,
}

/// Listeners by target node
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    by_node: HashMap<NodeId, Vec<Registered>>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn add(
        &mut self,
        node: NodeId,
        event_type: DomEventType,
        listener: EventListener,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_node.entry(node).or_default().push(Registered {
            id,
            event_type,
            listener,
        });
        id
    }

    pub fn remove(&mut self, node: NodeId, event_type: DomEventType, id: ListenerId) -> bool {
        let Some(list) = self.by_node.get_mut(&node) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| !(r.id == id && r.event_type == event_type));
        let removed = list.len() != before;
        if list.is_empty() {
            self.by_node.remove(&node);
        }
        removed
    }

    /// Listeners to invoke for one dispatch step, cloned so the registry
    /// can change while they run.
    pub fn snapshot(
        &self,
        node: NodeId,
        event_type: DomEventType,
    ) -> Vec<(ListenerId, EventListener)> {
        self.by_node
            .get(&node)
            .map(|list| {
                list.iter()
                    .filter(|r| r.event_type == event_type)
                    .map(|r| (r.id, r.listener.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, node: NodeId, event_type: DomEventType, id: ListenerId) -> bool {
        self.by_node
            .get(&node)
            .is_some_and(|list| list.iter().any(|r| r.id == id && r.event_type == event_type))
    }

    pub fn count(&self, node: NodeId, event_type: DomEventType) -> usize {
        self.by_node
            .get(&node)
            .map_or(0, |list| list.iter().filter(|r| r.event_type == event_type).count())
    }
}
