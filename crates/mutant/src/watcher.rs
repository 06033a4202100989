//! Watcher
//!
//! Watches a subtree for changes that may move layout: mutation batches
//! from the change source, plus `load`/`error` of images that were still
//! loading without explicit dimensions. Every settle event feeds one
//! notification path, optionally throttled.

use crate::change_source::{self, ChangeSource};
use crate::{ChangeSourceKind, EventHandler, Throttle, WatcherOptions};
use mutant_dom::{Document, MutationRecord, MutationType, NodeId, NodeType};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide id of a load listener; never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadListenerId(pub u64);

impl LoadListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// True for an image element that is still loading and has neither a
/// `width` nor a `height` attribute. Empty values count as absent.
pub fn is_watch_candidate(doc: &Document, node: NodeId) -> bool {
    doc.node_type(node) == Some(NodeType::Element)
        && doc.tag_name(node).as_deref() == Some("img")
        && !doc.is_complete(node)
        && !has_dimension(doc, node, "width")
        && !has_dimension(doc, node, "height")
}

fn has_dimension(doc: &Document, node: NodeId, name: &str) -> bool {
    doc.get_attribute(node, name).is_some_and(|v| !v.is_empty())
}

fn is_element(doc: &Document, node: NodeId) -> bool {
    doc.node_type(node) == Some(NodeType::Element)
}

struct Inner {
    doc: Document,
    target: NodeId,
    source: RefCell<Box<dyn ChangeSource>>,
    notify: Rc<dyn Fn()>,
    handlers: RefCell<HashMap<LoadListenerId, Rc<EventHandler>>>,
    // Side-table from element to its listener; stands in for a marker
    // attribute on the element itself.
    markers: RefCell<HashMap<NodeId, LoadListenerId>>,
    disconnected: Cell<bool>,
}

/// Drains the change source when the user callback returns or unwinds
struct DrainOnExit<'a>(&'a Weak<Inner>);

impl Drop for DrainOnExit<'_> {
    fn drop(&mut self) {
        if let Some(inner) = self.0.upgrade() {
            inner.take_records();
        }
    }
}

impl Inner {
    fn take_records(&self) -> Vec<MutationRecord> {
        self.source.borrow_mut().take_records()
    }

    fn add_listener(self: &Rc<Self>, element: NodeId) {
        if self.markers.borrow().contains_key(&element) {
            return;
        }
        let id = LoadListenerId::next();
        self.markers.borrow_mut().insert(element, id);

        let handler = EventHandler::new(
            &self.doc,
            element,
            |watcher: &Weak<Inner>, _event, handler| {
                handler.detach();
                if let Some(watcher) = watcher.upgrade() {
                    (watcher.notify)();
                }
            },
            Rc::downgrade(self),
        );
        self.handlers.borrow_mut().insert(id, handler);
        tracing::debug!("Watching image {} as listener {}", element, id.0);
    }

    fn remove_listener(&self, element: NodeId) {
        let Some(id) = self.markers.borrow_mut().remove(&element) else {
            return;
        };
        let handler = self.handlers.borrow_mut().remove(&id);
        if let Some(handler) = handler {
            handler.detach();
            tracing::debug!("Stopped watching image {} (listener {})", element, id.0);
        }
    }

    /// Attach listeners to every candidate image below `element`
    fn find_loading_images(self: &Rc<Self>, element: NodeId) {
        for img in self.doc.elements_by_tag_name(element, "img") {
            if is_watch_candidate(&self.doc, img) {
                self.add_listener(img);
            }
        }
    }

    fn handle_batch(self: &Rc<Self>, records: Vec<MutationRecord>) {
        let doc = &self.doc;
        for record in records.iter().filter(|r| r.mutation_type == MutationType::ChildList) {
            for &node in &record.added_nodes {
                if !is_element(doc, node) {
                    continue;
                }
                if doc.element_child_count(node) > 0 {
                    self.find_loading_images(node);
                } else if is_watch_candidate(doc, node) {
                    self.add_listener(node);
                }
            }

            // Removed subtrees are not searched: only a childless image
            // loses its listener here.
            for &node in &record.removed_nodes {
                if is_element(doc, node)
                    && doc.element_child_count(node) == 0
                    && doc.tag_name(node).as_deref() == Some("img")
                {
                    self.remove_listener(node);
                }
            }
        }
        tracing::trace!(
            "Processed batch of {} records, {} images watched",
            records.len(),
            self.markers.borrow().len()
        );
        (self.notify)();
    }
}

/// Watches one target element and calls back when its layout may have
/// settled after a change.
///
/// Dropping a watcher disconnects it.
pub struct Watcher {
    inner: Rc<Inner>,
}

impl Watcher {
    /// Watch `target`, calling `callback` after changes settle
    pub fn new(
        doc: &Document,
        target: NodeId,
        callback: impl Fn() + 'static,
        options: WatcherOptions,
    ) -> Self {
        Self::with_scope(doc, target, (), move |_: &()| callback(), options)
    }

    /// Watch `target`, calling `callback` against `scope`
    pub fn with_scope<S: 'static>(
        doc: &Document,
        target: NodeId,
        scope: S,
        callback: impl Fn(&S) + 'static,
        options: WatcherOptions,
    ) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<Inner>| {
            let drain = weak.clone();
            let deliver = move || {
                let _drain = DrainOnExit(&drain);
                callback(&scope);
            };
            let notify: Rc<dyn Fn()> = if options.timeout > 0 {
                Throttle::new(doc, options.timeout, deliver).into_fn()
            } else {
                Rc::new(deliver)
            };

            let batches = weak.clone();
            let source = change_source::select(doc, options.change_source, move |records| {
                if let Some(inner) = batches.upgrade() {
                    inner.handle_batch(records);
                }
            });

            Inner {
                doc: doc.clone(),
                target,
                source: RefCell::new(source),
                notify,
                handlers: RefCell::new(HashMap::new()),
                markers: RefCell::new(HashMap::new()),
                disconnected: Cell::new(false),
            }
        });

        if doc.contains(target) {
            inner.find_loading_images(target);
        } else {
            tracing::warn!("Watch target {} is not in the document", target);
        }

        let init = options.observers.to_init();
        if let Err(err) = inner.source.borrow_mut().observe(target, init) {
            tracing::warn!("Cannot observe {}: {}", target, err);
        }

        tracing::debug!(
            "Watching {} ({} loading images, timeout {}ms)",
            target,
            inner.markers.borrow().len(),
            options.timeout
        );
        Self { inner }
    }

    /// Drain pending change records without notifying
    pub fn take_records(&self) -> Vec<MutationRecord> {
        self.inner.take_records()
    }

    /// Stop observing and detach every load listener.
    ///
    /// A throttled notification already scheduled still fires.
    pub fn disconnect(&self) {
        self.inner.source.borrow_mut().disconnect();
        let handlers: Vec<_> = self.inner.handlers.borrow_mut().drain().collect();
        self.inner.markers.borrow_mut().clear();
        for (_, handler) in &handlers {
            handler.detach();
        }
        if !self.inner.disconnected.replace(true) {
            tracing::debug!(
                "Disconnected watcher on {} ({} listeners)",
                self.inner.target,
                handlers.len()
            );
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.disconnected.get()
    }

    pub fn target(&self) -> NodeId {
        self.inner.target
    }

    pub fn change_source_kind(&self) -> ChangeSourceKind {
        self.inner.source.borrow().kind()
    }

    /// True if `element` has a load listener entry
    pub fn is_tracked(&self, element: NodeId) -> bool {
        self.inner.markers.borrow().contains_key(&element)
    }

    pub fn listener_id(&self, element: NodeId) -> Option<LoadListenerId> {
        self.inner.markers.borrow().get(&element).copied()
    }

    /// Number of load listener entries, fired or not.
    ///
    /// A fired listener keeps its entry until its element is removed or
    /// the watcher disconnects, so this grows with every image loaded
    /// under a long-lived watcher.
    pub fn tracked_count(&self) -> usize {
        self.inner.handlers.borrow().len()
    }

    /// Number of load listeners still waiting for their image
    pub fn pending_count(&self) -> usize {
        self.inner
            .handlers
            .borrow()
            .values()
            .filter(|h| h.is_attached())
            .count()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if !self.inner.disconnected.get() {
            self.disconnect();
        }
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("target", &self.inner.target)
            .field("tracked", &self.tracked_count())
            .field("disconnected", &self.inner.disconnected.get())
            .finish()
    }
}
