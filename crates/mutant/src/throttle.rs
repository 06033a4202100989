//! Trailing-edge throttle
//!
//! Coalesces calls inside a time window into one deferred invocation,
//! using the document's timer queue and virtual clock.

use mutant_dom::{Document, TimerId};
use std::cell::RefCell;
use std::rc::Rc;

/// Last effective invocation and the pending deferred one
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleState {
    pub last: Option<u64>,
    pub pending: Option<TimerId>,
}

struct Inner {
    doc: Document,
    window_ms: u64,
    func: Box<dyn Fn()>,
    state: RefCell<ThrottleState>,
}

/// Throttled zero-argument callback
///
/// A call outside the window (or the very first call) invokes the
/// callback immediately. A call inside it replaces any pending deferred
/// invocation with one due `window_ms` from now. When that fires, `last`
/// becomes the time of the call that scheduled it, not the fire time.
///
/// A zero window invokes the callback on every call.
#[derive(Clone)]
pub struct Throttle {
    inner: Rc<Inner>,
}

impl Throttle {
    pub fn new(doc: &Document, window_ms: u64, func: impl Fn() + 'static) -> Self {
        Self {
            inner: Rc::new(Inner {
                doc: doc.clone(),
                window_ms,
                func: Box::new(func),
                state: RefCell::new(ThrottleState::default()),
            }),
        }
    }

    pub fn call(&self) {
        let inner = &self.inner;
        if inner.window_ms == 0 {
            (inner.func)();
            return;
        }

        let now = inner.doc.now_ms();
        let within_window = inner
            .state
            .borrow()
            .last
            .is_some_and(|last| now < last.saturating_add(inner.window_ms));

        if !within_window {
            inner.state.borrow_mut().last = Some(now);
            (inner.func)();
            return;
        }

        let previous = inner.state.borrow_mut().pending.take();
        if let Some(timer) = previous {
            inner.doc.clear_timeout(timer);
        }
        let deferred = self.inner.clone();
        let timer = inner.doc.set_timeout(inner.window_ms, move || {
            {
                let mut state = deferred.state.borrow_mut();
                state.pending = None;
                state.last = Some(now);
            }
            (deferred.func)();
        });
        inner.state.borrow_mut().pending = Some(timer);
        tracing::trace!("Throttled call at {}ms deferred by {}ms", now, inner.window_ms);
    }

    /// Box the throttle as a plain callback
    pub fn into_fn(self) -> Rc<dyn Fn()> {
        Rc::new(move || self.call())
    }

    pub fn window_ms(&self) -> u64 {
        self.inner.window_ms
    }

    pub fn state(&self) -> ThrottleState {
        *self.inner.state.borrow()
    }

    /// True while a deferred invocation is scheduled
    pub fn has_pending(&self) -> bool {
        self.inner.state.borrow().pending.is_some()
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("window_ms", &self.inner.window_ms)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}
