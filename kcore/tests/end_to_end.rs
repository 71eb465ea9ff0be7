// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cross-subsystem scenarios exercising `kcore`'s facade re-exports the way
//! a consumer depending on the single `kcore` crate would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use kcore::graph::{absolute_path, collapse, traverse, NodeHandle};
use kcore::ring::RingBuffer;
use kcore::sync::TicketLock;

#[test]
fn graph_build_and_find() {
    let root = NodeHandle::init_root(0u32).unwrap();
    let a = NodeHandle::create(1u32).unwrap();
    let b = NodeHandle::create(2u32).unwrap();
    let c = NodeHandle::create(3u32).unwrap();
    root.add(a, Some("a")).unwrap();
    root.add(b, Some("b")).unwrap();
    root.add(c, Some("c")).unwrap();

    let x = NodeHandle::create(4u32).unwrap();
    let y = NodeHandle::create(5u32).unwrap();
    a.add(x, Some("x")).unwrap();
    a.add(y, Some("y")).unwrap();

    let found_b = root.find("b").expect("b exists");
    assert_eq!(found_b.ref_count(), 1);
    found_b.release();
    assert_eq!(found_b.ref_count(), 0);

    assert!(root.find("z").is_none());
}

#[test]
fn path_round_trip() {
    let root = NodeHandle::init_root(0u32).unwrap();
    let a = NodeHandle::create(1u32).unwrap();
    root.add(a, Some("a")).unwrap();
    let y = NodeHandle::create(2u32).unwrap();
    a.add(y, Some("y")).unwrap();

    let rendered = absolute_path(y, None).unwrap();
    assert_eq!(collapse(&rendered), rendered, "absolute_path output is already collapsed");

    let found = traverse(root, &rendered, None).unwrap();
    assert!(found == y, "traverse landed back on the same node");
    found.release();
}

#[test]
fn concurrent_add_and_remove_under_root() {
    let root = Arc::new(NodeHandle::init_root(0u32).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let root = root.clone();
            thread::spawn(move || {
                let keep_name = format!("keep-{i}");
                let drop_name = format!("drop-{i}");

                let keep = NodeHandle::create(i as u32).unwrap();
                root.add(keep, Some(&keep_name)).unwrap();

                let drop_node = NodeHandle::create(i as u32).unwrap();
                root.add(drop_node, Some(&drop_name)).unwrap();
                drop_node.remove(true).unwrap();
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    for i in 0..8 {
        let keep_name = format!("keep-{i}");
        let found = root.find(&keep_name).unwrap_or_else(|| panic!("{keep_name} missing"));
        found.release();

        let drop_name = format!("drop-{i}");
        assert!(root.find(&drop_name).is_none());
    }
}

#[test]
fn ticket_lock_serves_every_waiter() {
    let lock = Arc::new(TicketLock::new());
    let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let started = Arc::new(AtomicUsize::new(0));

    let first = lock.lock().unwrap();

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let lock = lock.clone();
            let order = order.clone();
            let started = started.clone();
            thread::spawn(move || {
                started.fetch_add(1, Ordering::SeqCst);
                let _guard = lock.lock().unwrap();
                order.lock().unwrap().push(i);
            })
        })
        .collect();

    while started.load(Ordering::SeqCst) < 10 {
        thread::yield_now();
    }
    drop(first);

    for h in handles {
        h.join().unwrap();
    }

    let mut order = order.lock().unwrap().clone();
    order.sort_unstable();
    assert_eq!(order, (0..10).collect::<Vec<_>>(), "every waiter was served exactly once");
}

#[test]
fn ring_buffer_fill_and_drain() {
    let ring: RingBuffer<u32> = RingBuffer::new(4);
    for i in 0..4 {
        let idx = ring.allocate(false).unwrap();
        ring.write(idx, Some(i)).unwrap();
    }

    assert!(matches!(ring.allocate(false), Err(kcore::ring::Error::WouldBlock)));

    ring.free(0).unwrap();
    let idx = ring.allocate(false).unwrap();
    assert_eq!(idx, 4 % ring.capacity());
}

#[test]
fn resource_teardown_refuses_while_referenced() {
    use kcore::resource::{
        init_resource, reference_resource, uninit_resource, unreference_resource, DriverDef,
        DriverGroup, Error, Event, Resource,
    };
    use std::ffi::c_void;

    fn init(_res: &Resource, _args: *mut c_void) -> Result<(), Error> {
        Ok(())
    }
    fn uninit(_res: &Resource) {}
    fn accept(_owner: u64, _event: Event) -> bool {
        true
    }

    static DRIVER: DriverDef = DriverDef {
        name: "e2e-test-driver",
        group: DriverGroup::UserDevice,
        init,
        uninit,
        read: None,
        write: None,
        seek: None,
        rename: None,
        stat: None,
        control: None,
        create: None,
        remove: None,
        locate: None,
        pci_codes: &[],
        acpi_codes: &[],
    };

    let table = kcore::resource::DriverTable::new();
    table.register(&DRIVER);

    let res = init_resource(&table, 0, 1, std::ptr::null_mut()).unwrap();
    let reference = reference_resource(res, accept, 7).unwrap();

    assert!(matches!(uninit_resource(&table, res), Err(Error::InUse)));

    unreference_resource(reference);
    uninit_resource(&table, res).unwrap();
}

#[test]
fn hashing_vectors_match() {
    assert_eq!(kcore::hash::fnv1a(b""), 0xcbf2_9ce4_8422_2325);
    assert_eq!(kcore::hash::fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    assert_eq!(kcore::hash::crc32(b"123456789"), 0xCBF4_3926);
}

#[test]
fn collapse_is_idempotent_across_the_spec_table() {
    let cases = [
        ("/", "/"),
        ("//", "/"),
        ("/./", "/"),
        ("/.", "/"),
        ("./", ""),
        ("/a/.", "/a/"),
        ("/../", "/"),
        ("/a/../b/c/d", "/b/c/d"),
        ("../a/b/c/d", "../a/b/c/d"),
        ("./a/b/c/d", "a/b/c/d"),
        ("/./..//../././//../", "/"),
        ("//a/b/c/../def/.//", "/a/b/def/"),
        ("//a/b/c/../def/.//..", "/a/b/"),
    ];

    for (input, expected) in cases {
        let once = collapse(input);
        assert_eq!(once, expected, "collapse({input:?})");
        assert_eq!(collapse(&once), once, "collapse is idempotent on {input:?}");
    }
}

#[test]
fn duplicate_copies_payload_without_children() {
    let root = NodeHandle::init_root(0u32).unwrap();
    let a = NodeHandle::create(42u32).unwrap();
    root.add(a, Some("a")).unwrap();
    let child = NodeHandle::create(1u32).unwrap();
    a.add(child, Some("child")).unwrap();

    let dup = a.duplicate().unwrap();
    assert_eq!(*dup.payload(), 42u32);
    assert_eq!(dup.name(), "a");
    assert!(dup.parent().is_none());
}
