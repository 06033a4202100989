//! Document - host environment handle
//!
//! Owns the tree, the listener registry, the mutation observers and the
//! timer queue, and runs the event loop over them. `Document` is a cheap
//! clonable handle; every clone refers to the same document.
//!
//! No internal borrow is held while a listener, observer callback or
//! timer runs, so callbacks may freely call back into the document.

use crate::dom_events::ListenerRegistry;
use crate::mutation_observer::ObserverRegistry;
use crate::{
    DomError, DomEvent, DomEventType, DomTree, ListenerId, MutationObserverInit, MutationRecord,
    NodeId, NodeType, ObserverId, TimerId, TimerQueue,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct Inner {
    tree: RefCell<DomTree>,
    listeners: RefCell<ListenerRegistry>,
    observers: RefCell<ObserverRegistry>,
    timers: RefCell<TimerQueue>,
    mutation_observer: bool,
    delivering: Cell<bool>,
}

/// HTML Document
#[derive(Clone)]
pub struct Document {
    inner: Rc<Inner>,
}

/// Resets the delivery flag even if an observer callback panics
struct DeliveryGuard<'a>(&'a Cell<bool>);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Document {
    /// Create an empty document with native mutation observers
    pub fn new() -> Self {
        Self::with_capabilities(true)
    }

    /// Create an empty document for an engine that only fires the
    /// coarse `DOMSubtreeModified` event
    pub fn without_mutation_observer() -> Self {
        Self::with_capabilities(false)
    }

    fn with_capabilities(mutation_observer: bool) -> Self {
        Self {
            inner: Rc::new(Inner {
                tree: RefCell::new(DomTree::new()),
                listeners: RefCell::new(ListenerRegistry::default()),
                observers: RefCell::new(ObserverRegistry::default()),
                timers: RefCell::new(TimerQueue::new()),
                mutation_observer,
                delivering: Cell::new(false),
            }),
        }
    }

    /// Runtime capability probe for native mutation observers
    pub fn supports_mutation_observer(&self) -> bool {
        self.inner.mutation_observer
    }

    /// The document node
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    // ------------------------------------------------------------------
    // Node creation and queries
    // ------------------------------------------------------------------

    /// Create a detached element
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.inner.tree.borrow_mut().create_element(tag)
    }

    /// Create a detached text node
    pub fn create_text(&self, content: &str) -> NodeId {
        self.inner.tree.borrow_mut().create_text(content)
    }

    /// Create a detached comment node
    pub fn create_comment(&self, content: &str) -> NodeId {
        self.inner.tree.borrow_mut().create_comment(content)
    }

    /// Check if the id names a node of this document
    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.tree.borrow().get(id).is_some()
    }

    pub fn node_type(&self, id: NodeId) -> Option<NodeType> {
        self.inner.tree.borrow().get(id).map(|n| n.node_type())
    }

    /// Lower-cased tag name of an element
    pub fn tag_name(&self, id: NodeId) -> Option<String> {
        let tree = self.inner.tree.borrow();
        tree.get(id)?.as_element().map(|e| e.name.clone())
    }

    pub fn get_attribute(&self, id: NodeId, name: &str) -> Option<String> {
        self.inner.tree.borrow().get_attribute(id, name).map(str::to_string)
    }

    /// Load state of an element; false for non-elements
    pub fn is_complete(&self, id: NodeId) -> bool {
        let tree = self.inner.tree.borrow();
        tree.get(id).and_then(|n| n.as_element()).is_some_and(|e| e.complete)
    }

    pub fn parent(&self, id: NodeId) -> NodeId {
        self.inner.tree.borrow().parent(id)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.inner.tree.borrow().children(id).map(|(c, _)| c).collect()
    }

    /// Number of element children
    pub fn element_child_count(&self, id: NodeId) -> usize {
        self.inner.tree.borrow().element_child_count(id)
    }

    /// Descendant elements with the given tag, in document order
    pub fn elements_by_tag_name(&self, id: NodeId, tag: &str) -> Vec<NodeId> {
        self.inner.tree.borrow().elements_by_tag_name(id, tag)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Append `child` to `parent`, moving it if it is already attached
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` into `parent` before `reference`
    pub fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<(), DomError> {
        if reference == Some(child) {
            return Ok(());
        }
        let removal = {
            let mut tree = self.inner.tree.borrow_mut();
            let removal = tree.get(child).filter(|n| n.parent.is_valid()).map(|n| {
                MutationRecord::child_list(
                    n.parent,
                    Vec::new(),
                    vec![child],
                    n.prev_sibling.is_valid().then_some(n.prev_sibling),
                    n.next_sibling.is_valid().then_some(n.next_sibling),
                )
            });
            tree.insert_before(parent, child, reference)?;
            removal
        };
        let addition = {
            let tree = self.inner.tree.borrow();
            let n = tree.get(child).ok_or(DomError::NotFound(child))?;
            MutationRecord::child_list(
                parent,
                vec![child],
                Vec::new(),
                n.prev_sibling.is_valid().then_some(n.prev_sibling),
                n.next_sibling.is_valid().then_some(n.next_sibling),
            )
        };
        if let Some(removal) = removal {
            self.queue_mutation(removal);
        }
        self.queue_mutation(addition);
        Ok(())
    }

    /// Remove `child` from `parent`
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let record = {
            let mut tree = self.inner.tree.borrow_mut();
            let (prev, next) = tree
                .get(child)
                .map(|n| (n.prev_sibling, n.next_sibling))
                .ok_or(DomError::NotFound(child))?;
            tree.remove_child(parent, child)?;
            MutationRecord::child_list(
                parent,
                Vec::new(),
                vec![child],
                prev.is_valid().then_some(prev),
                next.is_valid().then_some(next),
            )
        };
        self.queue_mutation(record);
        Ok(())
    }

    /// Detach a node from wherever it is. No-op for detached nodes.
    pub fn remove(&self, child: NodeId) -> Result<(), DomError> {
        let parent = self.parent(child);
        if parent.is_valid() {
            self.remove_child(parent, child)?;
        }
        Ok(())
    }

    pub fn set_attribute(&self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let old = self.inner.tree.borrow_mut().set_attribute(id, name, value)?;
        self.queue_mutation(MutationRecord::attributes(id, &name.to_ascii_lowercase(), old));
        Ok(())
    }

    /// Remove an attribute. Nothing is recorded when it was absent.
    pub fn remove_attribute(&self, id: NodeId, name: &str) -> Result<(), DomError> {
        let old = self.inner.tree.borrow_mut().remove_attribute(id, name)?;
        if old.is_some() {
            self.queue_mutation(MutationRecord::attributes(id, &name.to_ascii_lowercase(), old));
        }
        Ok(())
    }

    /// Replace the data of a text or comment node
    pub fn set_character_data(&self, id: NodeId, data: &str) -> Result<(), DomError> {
        let old = self.inner.tree.borrow_mut().set_character_data(id, data)?;
        self.queue_mutation(MutationRecord::character_data(id, old));
        Ok(())
    }

    /// Mark an image as finished and fire `load` (or `error`) at it
    pub fn finish_image_load(&self, id: NodeId, succeeded: bool) -> Result<(), DomError> {
        self.inner.tree.borrow_mut().set_complete(id, true)?;
        let now = self.now_ms();
        let event = if succeeded {
            DomEvent::load(id, now)
        } else {
            DomEvent::error(id, now)
        };
        tracing::debug!("Image {} finished ({})", id, event.event_type.name());
        self.dispatch_event(event);
        self.perform_microtask_checkpoint();
        Ok(())
    }

    /// Queue a record for observers, then fire the legacy subtree event
    fn queue_mutation(&self, record: MutationRecord) {
        let target = record.target;
        {
            let tree = self.inner.tree.borrow();
            self.inner.observers.borrow_mut().enqueue(&record, &tree);
        }
        self.dispatch_event(DomEvent::subtree_modified(target, self.now_ms()));
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn add_event_listener(
        &self,
        node: NodeId,
        event_type: DomEventType,
        listener: impl Fn(&DomEvent) + 'static,
    ) -> ListenerId {
        self.inner
            .listeners
            .borrow_mut()
            .add(node, event_type, Rc::new(listener))
    }

    /// Returns false if no such listener was registered
    pub fn remove_event_listener(
        &self,
        node: NodeId,
        event_type: DomEventType,
        id: ListenerId,
    ) -> bool {
        self.inner.listeners.borrow_mut().remove(node, event_type, id)
    }

    /// Number of listeners of one type on a node
    pub fn listener_count(&self, node: NodeId, event_type: DomEventType) -> usize {
        self.inner.listeners.borrow().count(node, event_type)
    }

    /// Dispatch an event at its target, then at each ancestor if it bubbles.
    /// Listeners removed during dispatch are skipped.
    pub fn dispatch_event(&self, event: DomEvent) {
        let path = {
            let tree = self.inner.tree.borrow();
            let mut path = vec![event.target];
            if event.event_type.bubbles() {
                let mut current = tree.parent(event.target);
                while current.is_valid() {
                    path.push(current);
                    current = tree.parent(current);
                }
            }
            path
        };

        for node in path {
            let listeners = self.inner.listeners.borrow().snapshot(node, event.event_type);
            for (id, listener) in listeners {
                if !self.inner.listeners.borrow().contains(node, event.event_type, id) {
                    continue;
                }
                let mut event = event.clone();
                event.current_target = node;
                listener(&event);
            }
        }
    }

    // ------------------------------------------------------------------
    // Mutation observers
    // ------------------------------------------------------------------

    pub fn create_mutation_observer(
        &self,
        callback: impl Fn(Vec<MutationRecord>) + 'static,
    ) -> ObserverId {
        self.inner.observers.borrow_mut().create(Rc::new(callback))
    }

    /// Start observing `target`
    pub fn observe(
        &self,
        observer: ObserverId,
        target: NodeId,
        options: MutationObserverInit,
    ) -> Result<(), DomError> {
        if !self.contains(target) {
            return Err(DomError::NotFound(target));
        }
        self.inner.observers.borrow_mut().observe(observer, target, options)
    }

    pub fn disconnect_observer(&self, observer: ObserverId) {
        self.inner.observers.borrow_mut().disconnect(observer);
    }

    /// Return and clear the records queued for an observer
    pub fn take_records(&self, observer: ObserverId) -> Vec<MutationRecord> {
        self.inner.observers.borrow_mut().take_records(observer)
    }

    /// Forget an observer entirely
    pub fn drop_mutation_observer(&self, observer: ObserverId) {
        self.inner.observers.borrow_mut().remove(observer);
    }

    pub fn is_observing(&self, observer: ObserverId, target: NodeId) -> bool {
        self.inner.observers.borrow().is_observing(observer, target)
    }

    // ------------------------------------------------------------------
    // Timers and event loop
    // ------------------------------------------------------------------

    /// Current virtual time (ms)
    pub fn now_ms(&self) -> u64 {
        self.inner.timers.borrow().now_ms()
    }

    pub fn set_timeout(&self, delay_ms: u64, callback: impl FnOnce() + 'static) -> TimerId {
        self.inner
            .timers
            .borrow_mut()
            .set_timeout(delay_ms, Box::new(callback))
    }

    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.inner.timers.borrow_mut().clear(id)
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    /// Deliver queued mutation records, one batch per observer, until no
    /// observer has records left. Re-entrant calls are ignored.
    pub fn perform_microtask_checkpoint(&self) {
        if self.inner.delivering.replace(true) {
            return;
        }
        let _guard = DeliveryGuard(&self.inner.delivering);
        loop {
            let deliveries = self.inner.observers.borrow_mut().take_deliveries();
            if deliveries.is_empty() {
                break;
            }
            for (callback, records) in deliveries {
                tracing::trace!("Delivering {} mutation records", records.len());
                callback(records);
            }
        }
    }

    fn run_next_timer(&self, limit: u64) -> bool {
        let next = self.inner.timers.borrow_mut().pop_due(limit);
        let Some((id, due, callback)) = next else {
            return false;
        };
        self.inner.timers.borrow_mut().set_now(due);
        tracing::trace!("Firing timer {} at {}ms", id.0, due);
        callback();
        self.perform_microtask_checkpoint();
        true
    }

    /// Run microtasks and every timer due at the current time
    pub fn run_until_idle(&self) {
        self.perform_microtask_checkpoint();
        let now = self.now_ms();
        while self.run_next_timer(now) {}
    }

    /// Move the clock forward by `ms`, firing timers at their due times
    pub fn advance(&self, ms: u64) {
        self.perform_microtask_checkpoint();
        let target = self.now_ms().saturating_add(ms);
        while self.run_next_timer(target) {}
        self.inner.timers.borrow_mut().set_now(target);
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.inner.tree.borrow().len())
            .field("now_ms", &self.now_ms())
            .field("mutation_observer", &self.inner.mutation_observer)
            .finish()
    }
}
