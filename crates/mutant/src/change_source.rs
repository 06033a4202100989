//! Change sources
//!
//! A change source turns subtree mutations of one target into batches
//! handed to a callback. The native source wraps the document's mutation
//! observer. The legacy source is for documents without one: it listens
//! for the coarse `DOMSubtreeModified` event and can only report that
//! *something* changed, as an empty batch.

use crate::{ChangeSourceKind, Throttle};
use mutant_dom::{
    Document, DomError, DomEventType, ListenerId, MutationObserverInit, MutationRecord, NodeId,
    ObserverId,
};
use std::rc::Rc;

/// Stream of subtree mutation batches for one target
pub trait ChangeSource {
    /// Start delivering batches for `target`
    fn observe(&mut self, target: NodeId, options: MutationObserverInit) -> Result<(), DomError>;

    /// Stop delivering batches. Safe to call when not observing.
    fn disconnect(&mut self);

    /// Drain records that have not been delivered yet
    fn take_records(&mut self) -> Vec<MutationRecord>;

    /// Which implementation this is (never `Auto`)
    fn kind(&self) -> ChangeSourceKind;
}

/// Pick the change source for a document.
///
/// `Auto` probes the document; forcing `Native` on a document without
/// mutation observers falls back to the legacy source.
pub fn select(
    doc: &Document,
    kind: ChangeSourceKind,
    callback: impl Fn(Vec<MutationRecord>) + 'static,
) -> Box<dyn ChangeSource> {
    let native = doc.supports_mutation_observer();
    let source: Box<dyn ChangeSource> = match kind {
        ChangeSourceKind::Native | ChangeSourceKind::Auto if native => {
            Box::new(NativeChangeSource::new(doc, callback))
        }
        ChangeSourceKind::Native => {
            tracing::warn!("Native mutation observers unavailable, using legacy change source");
            Box::new(LegacyChangeSource::new(doc, callback))
        }
        ChangeSourceKind::Auto | ChangeSourceKind::Legacy => {
            Box::new(LegacyChangeSource::new(doc, callback))
        }
    };
    tracing::debug!("Selected {:?} change source", source.kind());
    source
}

// ============================================================================
// NATIVE
// ============================================================================

/// Change source backed by a native mutation observer
pub struct NativeChangeSource {
    doc: Document,
    observer: ObserverId,
}

impl NativeChangeSource {
    pub fn new(doc: &Document, callback: impl Fn(Vec<MutationRecord>) + 'static) -> Self {
        Self {
            doc: doc.clone(),
            observer: doc.create_mutation_observer(callback),
        }
    }

    pub fn observer_id(&self) -> ObserverId {
        self.observer
    }
}

impl ChangeSource for NativeChangeSource {
    fn observe(&mut self, target: NodeId, options: MutationObserverInit) -> Result<(), DomError> {
        self.doc.observe(self.observer, target, options)
    }

    fn disconnect(&mut self) {
        self.doc.disconnect_observer(self.observer);
    }

    fn take_records(&mut self) -> Vec<MutationRecord> {
        self.doc.take_records(self.observer)
    }

    fn kind(&self) -> ChangeSourceKind {
        ChangeSourceKind::Native
    }
}

impl Drop for NativeChangeSource {
    fn drop(&mut self) {
        self.doc.drop_mutation_observer(self.observer);
    }
}

// ============================================================================
// LEGACY
// ============================================================================

/// Change source built on `DOMSubtreeModified`.
///
/// Options are ignored. Bursts of events are coalesced by a
/// [`LegacyChangeSource::THROTTLE_MS`] trailing-edge throttle, and every
/// delivery is an empty batch.
pub struct LegacyChangeSource {
    doc: Document,
    on_modified: Rc<dyn Fn()>,
    attached: Option<(NodeId, ListenerId)>,
}

impl LegacyChangeSource {
    pub const THROTTLE_MS: u64 = 5;

    pub fn new(doc: &Document, callback: impl Fn(Vec<MutationRecord>) + 'static) -> Self {
        let throttle = Throttle::new(doc, Self::THROTTLE_MS, move || callback(Vec::new()));
        Self {
            doc: doc.clone(),
            on_modified: throttle.into_fn(),
            attached: None,
        }
    }

    fn listen(&mut self, target: NodeId) {
        let on_modified = self.on_modified.clone();
        let id = self
            .doc
            .add_event_listener(target, DomEventType::DOMSubtreeModified, move |_| on_modified());
        self.attached = Some((target, id));
    }

    fn unlisten(&mut self) -> Option<NodeId> {
        let (target, id) = self.attached.take()?;
        self.doc
            .remove_event_listener(target, DomEventType::DOMSubtreeModified, id);
        Some(target)
    }

    /// Target currently listened to
    pub fn target(&self) -> Option<NodeId> {
        self.attached.map(|(target, _)| target)
    }
}

impl ChangeSource for LegacyChangeSource {
    fn observe(&mut self, target: NodeId, _options: MutationObserverInit) -> Result<(), DomError> {
        if !self.doc.contains(target) {
            return Err(DomError::NotFound(target));
        }
        self.unlisten();
        self.listen(target);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.unlisten();
    }

    /// No records can be drained; re-registering the listener is the
    /// closest available flush.
    fn take_records(&mut self) -> Vec<MutationRecord> {
        if let Some(target) = self.unlisten() {
            self.listen(target);
        }
        Vec::new()
    }

    fn kind(&self) -> ChangeSourceKind {
        ChangeSourceKind::Legacy
    }
}

impl Drop for LegacyChangeSource {
    fn drop(&mut self) {
        self.unlisten();
    }
}
