//! One-shot load/error handler bound to a single element

use mutant_dom::{Document, DomEvent, DomEventType, ListenerId, NodeId};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

type Callback = Rc<dyn Fn(&DomEvent, &EventHandler)>;

enum HandlerState {
    Active {
        element: NodeId,
        callback: Callback,
        load: ListenerId,
        error: ListenerId,
    },
    Detached,
}

/// Listens for `load` and `error` on one element.
///
/// Firing does not detach the handler; the callback receives the handler
/// and decides. After [`detach`](Self::detach) the element, callback and
/// context are released and further detaches are no-ops.
pub struct EventHandler {
    doc: Document,
    state: RefCell<HandlerState>,
}

impl EventHandler {
    /// Register for both completion signals on `element`. `callback` runs
    /// against `context` with the event and this handler.
    pub fn new<C: 'static>(
        doc: &Document,
        element: NodeId,
        callback: impl Fn(&C, &DomEvent, &EventHandler) + 'static,
        context: C,
    ) -> Rc<Self> {
        let callback: Callback = Rc::new(move |event: &DomEvent, handler: &EventHandler| {
            callback(&context, event, handler)
        });
        Rc::new_cyclic(|weak: &Weak<Self>| {
            let load = doc.add_event_listener(element, DomEventType::Load, Self::listener(weak));
            let error = doc.add_event_listener(element, DomEventType::Error, Self::listener(weak));
            Self {
                doc: doc.clone(),
                state: RefCell::new(HandlerState::Active {
                    element,
                    callback,
                    load,
                    error,
                }),
            }
        })
    }

    fn listener(weak: &Weak<Self>) -> impl Fn(&DomEvent) + 'static {
        let weak = weak.clone();
        move |event: &DomEvent| {
            if let Some(handler) = weak.upgrade() {
                handler.handle_event(event);
            }
        }
    }

    /// Invoke the callback for whichever signal fired
    pub fn handle_event(&self, event: &DomEvent) {
        let callback = match &*self.state.borrow() {
            HandlerState::Active { callback, .. } => callback.clone(),
            HandlerState::Detached => return,
        };
        callback(event, self);
    }

    /// Remove both registrations and release all references
    pub fn detach(&self) {
        let previous = std::mem::replace(&mut *self.state.borrow_mut(), HandlerState::Detached);
        if let HandlerState::Active {
            element,
            load,
            error,
            ..
        } = previous
        {
            self.doc.remove_event_listener(element, DomEventType::Load, load);
            self.doc.remove_event_listener(element, DomEventType::Error, error);
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(*self.state.borrow(), HandlerState::Active { .. })
    }

    /// The bound element, while attached
    pub fn element(&self) -> Option<NodeId> {
        match *self.state.borrow() {
            HandlerState::Active { element, .. } => Some(element),
            HandlerState::Detached => None,
        }
    }
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandler")
            .field("element", &self.element())
            .finish()
    }
}
