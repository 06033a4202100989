//! End-to-end watcher scenarios driven by the virtual clock

use mutant::{ChangeSourceKind, ObserverOptions, Watcher, WatcherOptions};
use mutant_dom::{Document, DomEventType, NodeId};
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Document with an attached `<div>` to watch
fn page(doc: &Document) -> NodeId {
    init_tracing();
    let target = doc.create_element("div");
    doc.append_child(doc.root(), target).unwrap();
    target
}

fn counter() -> (Rc<Cell<u32>>, impl Fn() + 'static) {
    let count = Rc::new(Cell::new(0));
    let c = count.clone();
    (count, move || c.set(c.get() + 1))
}

fn watch(doc: &Document, target: NodeId, options: WatcherOptions) -> (Watcher, Rc<Cell<u32>>) {
    let (count, callback) = counter();
    (Watcher::new(doc, target, callback, options), count)
}

// ============================================================================
// LOAD TRACKING
// ============================================================================

#[test]
fn test_initial_scan_load_then_disconnect() {
    let doc = Document::new();
    let target = page(&doc);
    let img = doc.create_element("img");
    doc.append_child(target, img).unwrap();

    let (watcher, notified) = watch(&doc, target, WatcherOptions::default());
    assert_eq!(watcher.change_source_kind(), ChangeSourceKind::Native);
    assert!(watcher.is_tracked(img));
    assert_eq!(watcher.tracked_count(), 1);
    assert_eq!(watcher.pending_count(), 1);

    doc.finish_image_load(img, true).unwrap();
    doc.run_until_idle();
    assert_eq!(notified.get(), 1);
    assert_eq!(watcher.pending_count(), 0);
    assert_eq!(doc.listener_count(img, DomEventType::Load), 0);

    watcher.disconnect();
    assert_eq!(watcher.tracked_count(), 0);
    assert!(!watcher.is_tracked(img));
}

#[test]
fn test_fired_listeners_keep_their_entries() {
    let doc = Document::new();
    let target = page(&doc);
    let imgs: Vec<_> = (0..3).map(|_| doc.create_element("img")).collect();
    for &img in &imgs {
        doc.append_child(target, img).unwrap();
    }

    let (watcher, notified) = watch(&doc, target, WatcherOptions::default());
    for &img in &imgs {
        doc.finish_image_load(img, true).unwrap();
    }

    assert_eq!(notified.get(), 3);
    assert_eq!(watcher.pending_count(), 0);
    assert_eq!(watcher.tracked_count(), 3);

    doc.remove(imgs[0]).unwrap();
    doc.run_until_idle();
    assert_eq!(watcher.tracked_count(), 2);
}

#[test]
fn test_image_error_also_notifies() {
    let doc = Document::new();
    let target = page(&doc);
    let img = doc.create_element("img");
    doc.append_child(target, img).unwrap();

    let (_watcher, notified) = watch(&doc, target, WatcherOptions::default());
    doc.finish_image_load(img, false).unwrap();
    assert_eq!(notified.get(), 1);
}

#[test]
fn test_sized_and_finished_images_ignored() {
    let doc = Document::new();
    let target = page(&doc);
    let sized = doc.create_element("img");
    doc.set_attribute(sized, "width", "64").unwrap();
    let done = doc.create_element("img");
    doc.finish_image_load(done, true).unwrap();
    doc.append_child(target, sized).unwrap();
    doc.append_child(target, done).unwrap();

    let (watcher, _) = watch(&doc, target, WatcherOptions::default());
    assert_eq!(watcher.tracked_count(), 0);
}

#[test]
fn test_non_element_insertions_notify_without_tracking() {
    let doc = Document::new();
    let target = page(&doc);
    let (watcher, notified) = watch(&doc, target, WatcherOptions::default());

    let comment = doc.create_comment("img");
    let text = doc.create_text("img");
    doc.append_child(target, comment).unwrap();
    doc.append_child(target, text).unwrap();
    doc.run_until_idle();

    assert_eq!(notified.get(), 1);
    assert_eq!(watcher.tracked_count(), 0);
}

#[test]
fn test_inserted_image_tracked_before_notification() {
    let doc = Document::new();
    let target = page(&doc);
    let img = doc.create_element("img");

    let seen = Rc::new(RefCell::new(Vec::new()));
    let (d, sink) = (doc.clone(), seen.clone());
    let watcher = Watcher::new(
        &doc,
        target,
        move || sink.borrow_mut().push(d.listener_count(img, DomEventType::Load)),
        WatcherOptions::default(),
    );

    doc.append_child(target, img).unwrap();
    doc.run_until_idle();

    assert_eq!(*seen.borrow(), vec![1]);
    assert!(watcher.is_tracked(img));
}

#[test]
fn test_removed_image_detached() {
    let doc = Document::new();
    let target = page(&doc);
    let img = doc.create_element("img");
    doc.append_child(target, img).unwrap();

    let (watcher, notified) = watch(&doc, target, WatcherOptions::default());
    assert!(watcher.is_tracked(img));

    doc.remove(img).unwrap();
    doc.run_until_idle();

    assert_eq!(notified.get(), 1);
    assert!(!watcher.is_tracked(img));
    assert_eq!(watcher.tracked_count(), 0);
    assert_eq!(doc.listener_count(img, DomEventType::Load), 0);
    assert_eq!(doc.listener_count(img, DomEventType::Error), 0);
}

#[test]
fn test_nested_insert_is_scanned() {
    let doc = Document::new();
    let target = page(&doc);
    let (watcher, notified) = watch(&doc, target, WatcherOptions::default());

    let figure = doc.create_element("figure");
    let wrapper = doc.create_element("div");
    let deep = doc.create_element("img");
    let sized = doc.create_element("img");
    doc.set_attribute(sized, "height", "20").unwrap();
    doc.append_child(figure, wrapper).unwrap();
    doc.append_child(wrapper, deep).unwrap();
    doc.append_child(figure, sized).unwrap();

    doc.append_child(target, figure).unwrap();
    doc.run_until_idle();

    assert_eq!(notified.get(), 1);
    assert!(watcher.is_tracked(deep));
    assert!(!watcher.is_tracked(sized));
}

#[test]
fn test_removed_subtree_keeps_nested_listeners() {
    let doc = Document::new();
    let target = page(&doc);
    let wrapper = doc.create_element("p");
    let img = doc.create_element("img");
    doc.append_child(wrapper, img).unwrap();
    doc.append_child(target, wrapper).unwrap();

    let (watcher, _) = watch(&doc, target, WatcherOptions::default());
    assert!(watcher.is_tracked(img));

    doc.remove(wrapper).unwrap();
    doc.run_until_idle();
    assert!(watcher.is_tracked(img), "descendants of removed subtrees are not inspected");

    watcher.disconnect();
    assert_eq!(doc.listener_count(img, DomEventType::Load), 0);
}

#[test]
fn test_moved_image_gets_fresh_listener() {
    let doc = Document::new();
    let target = page(&doc);
    let left = doc.create_element("div");
    let right = doc.create_element("div");
    let img = doc.create_element("img");
    doc.append_child(target, left).unwrap();
    doc.append_child(target, right).unwrap();
    doc.append_child(left, img).unwrap();

    let (watcher, notified) = watch(&doc, target, WatcherOptions::default());
    let before = watcher.listener_id(img).unwrap();

    doc.append_child(right, img).unwrap();
    doc.run_until_idle();

    let after = watcher.listener_id(img).unwrap();
    assert!(after > before);
    assert_eq!(watcher.tracked_count(), 1);
    assert_eq!(doc.listener_count(img, DomEventType::Load), 1);
    assert_eq!(notified.get(), 1);
}

// ============================================================================
// NOTIFICATION
// ============================================================================

#[test]
fn test_one_notification_per_batch() {
    let doc = Document::new();
    let target = page(&doc);
    let (watcher, notified) = watch(&doc, target, WatcherOptions::default());

    let imgs: Vec<_> = (0..10).map(|_| doc.create_element("img")).collect();
    for &img in &imgs {
        doc.append_child(target, img).unwrap();
    }
    doc.run_until_idle();

    assert_eq!(notified.get(), 1);
    assert_eq!(watcher.tracked_count(), 10);
}

#[test]
fn test_timeout_coalesces_notifications() {
    let doc = Document::new();
    let target = page(&doc);
    let times = Rc::new(RefCell::new(Vec::new()));
    let (d, sink) = (doc.clone(), times.clone());
    let _watcher = Watcher::new(
        &doc,
        target,
        move || sink.borrow_mut().push(d.now_ms()),
        WatcherOptions::default().with_timeout(50),
    );

    for _ in 0..3 {
        let p = doc.create_element("p");
        doc.append_child(target, p).unwrap();
        doc.run_until_idle();
        doc.advance(10);
    }
    doc.advance(100);

    // leading notification at 0, trailing one 50ms after the last batch at 20
    assert_eq!(*times.borrow(), vec![0, 70]);
}

#[test]
fn test_disconnect_keeps_pending_throttled_notification() {
    let doc = Document::new();
    let target = page(&doc);
    let (watcher, notified) = watch(&doc, target, WatcherOptions::default().with_timeout(50));

    for _ in 0..2 {
        let p = doc.create_element("p");
        doc.append_child(target, p).unwrap();
        doc.run_until_idle();
        doc.advance(10);
    }
    assert_eq!(notified.get(), 1);

    watcher.disconnect();
    doc.advance(100);
    assert_eq!(notified.get(), 2);
}

#[test]
fn test_image_load_shares_throttle_with_batches() {
    let doc = Document::new();
    let target = page(&doc);
    let img = doc.create_element("img");
    doc.append_child(target, img).unwrap();

    let times = Rc::new(RefCell::new(Vec::new()));
    let (d, sink) = (doc.clone(), times.clone());
    let _watcher = Watcher::new(
        &doc,
        target,
        move || sink.borrow_mut().push(d.now_ms()),
        WatcherOptions::default().with_timeout(50),
    );

    let p = doc.create_element("p");
    doc.append_child(target, p).unwrap();
    doc.run_until_idle();
    assert_eq!(*times.borrow(), vec![0]);

    doc.advance(10);
    doc.finish_image_load(img, true).unwrap();
    doc.advance(5);
    let q = doc.create_element("p");
    doc.append_child(target, q).unwrap();
    doc.run_until_idle();
    assert_eq!(*times.borrow(), vec![0], "load and batch wait for the same window");

    doc.advance(100);
    assert_eq!(*times.borrow(), vec![0, 65]);
}

#[test]
fn test_callback_mutations_are_drained() {
    let doc = Document::new();
    let target = page(&doc);
    let count = Rc::new(Cell::new(0));

    let (d, c) = (doc.clone(), count.clone());
    let _watcher = Watcher::new(
        &doc,
        target,
        move || {
            c.set(c.get() + 1);
            let span = d.create_element("span");
            d.append_child(target, span).unwrap();
        },
        WatcherOptions::default(),
    );

    let p = doc.create_element("p");
    doc.append_child(target, p).unwrap();
    doc.run_until_idle();
    doc.advance(1000);

    assert_eq!(count.get(), 1);
    assert_eq!(doc.children(target).len(), 2);
}

#[test]
fn test_panicking_callback_still_drains() {
    let doc = Document::new();
    let target = page(&doc);
    let count = Rc::new(Cell::new(0));

    let (d, c) = (doc.clone(), count.clone());
    let _watcher = Watcher::new(
        &doc,
        target,
        move || {
            c.set(c.get() + 1);
            let span = d.create_element("span");
            d.append_child(target, span).unwrap();
            panic!("callback failed");
        },
        WatcherOptions::default(),
    );

    let p = doc.create_element("p");
    doc.append_child(target, p).unwrap();
    let result = panic::catch_unwind(AssertUnwindSafe(|| doc.run_until_idle()));
    assert!(result.is_err());

    doc.run_until_idle();
    assert_eq!(count.get(), 1, "mutations made by the callback were drained");
}

#[test]
fn test_public_take_records() {
    let doc = Document::new();
    let target = page(&doc);
    let (watcher, notified) = watch(&doc, target, WatcherOptions::default());

    let img = doc.create_element("img");
    doc.append_child(target, img).unwrap();
    let records = watcher.take_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].added_nodes, vec![img]);

    doc.run_until_idle();
    assert_eq!(notified.get(), 0);
    assert!(!watcher.is_tracked(img), "drained records are never processed");
}

#[test]
fn test_scope_is_passed_to_callback() {
    let doc = Document::new();
    let target = page(&doc);
    let scope = Rc::new(RefCell::new(Vec::new()));

    let _watcher = Watcher::with_scope(
        &doc,
        target,
        scope.clone(),
        |log: &Rc<RefCell<Vec<&'static str>>>| log.borrow_mut().push("settled"),
        WatcherOptions::default(),
    );

    let p = doc.create_element("p");
    doc.append_child(target, p).unwrap();
    doc.run_until_idle();
    assert_eq!(*scope.borrow(), vec!["settled"]);
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[test]
fn test_attribute_tracking_from_json_options() {
    let doc = Document::new();
    let target = page(&doc);
    let img = doc.create_element("img");
    doc.append_child(target, img).unwrap();

    let json = r#"{ "observers": { "attributes": true, "attributeFilter": ["width"] } }"#;
    let options: WatcherOptions = serde_json::from_str(json).unwrap();
    let (watcher, notified) = watch(&doc, target, options);

    doc.set_attribute(img, "alt", "logo").unwrap();
    doc.run_until_idle();
    assert_eq!(notified.get(), 0);

    doc.set_attribute(img, "width", "32").unwrap();
    doc.run_until_idle();
    assert_eq!(notified.get(), 1);
    // attribute records never touch load listeners
    assert!(watcher.is_tracked(img));
}

#[test]
fn test_attributes_ignored_by_default() {
    let doc = Document::new();
    let target = page(&doc);
    let img = doc.create_element("img");
    doc.append_child(target, img).unwrap();

    let (_watcher, notified) = watch(&doc, target, WatcherOptions::default());
    doc.set_attribute(img, "src", "a.png").unwrap();
    doc.run_until_idle();
    assert_eq!(notified.get(), 0);
}

#[test]
fn test_character_data_tracking() {
    let doc = Document::new();
    let target = page(&doc);
    let text = doc.create_text("before");
    doc.append_child(target, text).unwrap();

    let json = r#"{ "observers": { "characterData": true, "characterDataOldValue": true } }"#;
    let options: WatcherOptions = serde_json::from_str(json).unwrap();
    let (watcher, notified) = watch(&doc, target, options);

    doc.set_character_data(text, "after").unwrap();
    doc.run_until_idle();
    assert_eq!(notified.get(), 1);

    doc.set_character_data(text, "again").unwrap();
    let records = watcher.take_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].target, text);
    assert_eq!(records[0].old_value.as_deref(), Some("after"));
}

#[test]
fn test_character_data_ignored_by_default() {
    let doc = Document::new();
    let target = page(&doc);
    let text = doc.create_text("before");
    doc.append_child(target, text).unwrap();

    let (_watcher, notified) = watch(&doc, target, WatcherOptions::default());
    doc.set_character_data(text, "after").unwrap();
    doc.run_until_idle();
    assert_eq!(notified.get(), 0);
}

#[test]
fn test_invalid_observer_options_do_not_fail_construction() {
    let doc = Document::new();
    let target = page(&doc);
    let img = doc.create_element("img");
    doc.append_child(target, img).unwrap();

    let observers = ObserverOptions {
        child_list: false,
        ..Default::default()
    };
    let options = WatcherOptions::default().with_observers(observers);
    let (watcher, notified) = watch(&doc, target, options);
    assert!(watcher.is_tracked(img), "initial scan still runs");

    doc.finish_image_load(img, true).unwrap();
    assert_eq!(notified.get(), 1);
}

#[test]
fn test_missing_target_is_tolerated() {
    let doc = Document::new();
    init_tracing();
    let (watcher, notified) = watch(&doc, NodeId::NONE, WatcherOptions::default());
    assert_eq!(watcher.tracked_count(), 0);
    watcher.disconnect();
    assert_eq!(notified.get(), 0);
}

// ============================================================================
// LEGACY CHANGE SOURCE
// ============================================================================

#[test]
fn test_legacy_source_notifies_without_records() {
    let doc = Document::without_mutation_observer();
    let target = page(&doc);
    let existing = doc.create_element("img");
    doc.append_child(target, existing).unwrap();

    let (watcher, notified) = watch(&doc, target, WatcherOptions::default());
    assert_eq!(watcher.change_source_kind(), ChangeSourceKind::Legacy);
    assert!(watcher.is_tracked(existing));

    let added = doc.create_element("img");
    doc.append_child(target, added).unwrap();
    assert_eq!(notified.get(), 1);
    assert!(!watcher.is_tracked(added), "legacy batches carry no nodes");

    let p = doc.create_element("p");
    doc.append_child(target, p).unwrap();
    assert_eq!(notified.get(), 1);
    doc.advance(5);
    assert_eq!(notified.get(), 2);

    doc.finish_image_load(existing, true).unwrap();
    assert_eq!(notified.get(), 3);
}

#[test]
fn test_forced_legacy_on_capable_document() {
    let doc = Document::new();
    let target = page(&doc);
    let (watcher, notified) = watch(
        &doc,
        target,
        WatcherOptions::default().with_change_source(ChangeSourceKind::Legacy),
    );
    assert_eq!(watcher.change_source_kind(), ChangeSourceKind::Legacy);

    let p = doc.create_element("p");
    doc.append_child(target, p).unwrap();
    assert_eq!(notified.get(), 1);

    watcher.disconnect();
    let q = doc.create_element("p");
    doc.append_child(target, q).unwrap();
    doc.advance(100);
    assert_eq!(notified.get(), 1);
}

// ============================================================================
// TEARDOWN
// ============================================================================

#[test]
fn test_drop_disconnects() {
    let doc = Document::new();
    let target = page(&doc);
    let img = doc.create_element("img");
    doc.append_child(target, img).unwrap();

    let (watcher, notified) = watch(&doc, target, WatcherOptions::default());
    assert_eq!(doc.listener_count(img, DomEventType::Load), 1);
    drop(watcher);

    assert_eq!(doc.listener_count(img, DomEventType::Load), 0);
    let p = doc.create_element("p");
    doc.append_child(target, p).unwrap();
    doc.run_until_idle();
    assert_eq!(notified.get(), 0);
}

#[test]
fn test_disconnect_twice() {
    let doc = Document::new();
    let target = page(&doc);
    let (watcher, _) = watch(&doc, target, WatcherOptions::default());
    watcher.disconnect();
    watcher.disconnect();
    assert!(watcher.is_disconnected());
}
