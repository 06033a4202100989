//! mutant - layout change watcher
//!
//! Detects subtree changes that may affect layout, including images that
//! finish loading after insertion, and calls back once a burst of them
//! settles.
//!
//! ```no_run
//! use mutant::{Watcher, WatcherOptions};
//! use mutant_dom::Document;
//!
//! let doc = Document::new();
//! let body = doc.create_element("body");
//! doc.append_child(doc.root(), body).unwrap();
//!
//! let watcher = Watcher::new(
//!     &doc,
//!     body,
//!     || println!("layout may have changed"),
//!     WatcherOptions::default().with_timeout(50),
//! );
//! doc.run_until_idle();
//! watcher.disconnect();
//! ```

mod options;
mod throttle;
mod event_handler;
pub mod change_source;
mod watcher;

pub use options::{ChangeSourceKind, ObserverOptions, WatcherOptions};
pub use throttle::{Throttle, ThrottleState};
pub use event_handler::EventHandler;
pub use change_source::{ChangeSource, LegacyChangeSource, NativeChangeSource};
pub use watcher::{is_watch_candidate, LoadListenerId, Watcher};
