// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Ring master: directory requests over TCP and remote data connections.

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use daqring::master::{Origin, RingMaster, RingMasterClient, RingMasterHandle};
use daqring::{Consumer, Error, ErrorCategory, Monitor, Producer, RingBuffer, Role};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}

struct Scratch(String);

impl Scratch {
    fn new(prefix: &str) -> Self {
        let name = unique_name(prefix);
        let _ = RingBuffer::remove(&name);
        RingBuffer::create_with(&name, 64 * 1024, 4).expect("create ring");
        Scratch(name)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = RingBuffer::remove(&self.0);
    }
}

fn start_master() -> (RingMasterHandle, RingMasterClient) {
    let handle = RingMaster::bind("127.0.0.1:0").unwrap().spawn().unwrap();
    let client = RingMasterClient::new("127.0.0.1", handle.port());
    (handle, client)
}

fn wait_for<F: FnMut() -> bool>(what: &str, mut ready: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !ready() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

// ========== Directory requests ==========

#[test]
fn register_list_unregister() {
    let (_master, client) = start_master();
    let a = Scratch::new("reg_a");
    let b = Scratch::new("reg_b");

    client.notify_create(&a.0).unwrap();
    client.notify_create(&b.0).unwrap();
    let mut expected = vec![a.0.clone(), b.0.clone()];
    expected.sort();
    assert_eq!(client.list_rings().unwrap(), expected);

    client.notify_destroy(&a.0).unwrap();
    assert_eq!(client.list_rings().unwrap(), vec![b.0.clone()]);
}

#[test]
fn duplicate_registration_is_rejected() {
    let (_master, client) = start_master();
    let ring = Scratch::new("dup");
    client.notify_create(&ring.0).unwrap();

    let err = client.notify_create(&ring.0).unwrap_err();
    assert!(matches!(err, Error::AlreadyRegistered(ref r) if *r == ring.0), "{err}");
    assert_eq!(err.category(), ErrorCategory::State);
}

#[test]
fn unknown_ring_operations_are_not_found() {
    let (_master, client) = start_master();
    let name = unique_name("unknown");

    for err in [
        client.notify_destroy(&name).unwrap_err(),
        client.list_clients(&name).unwrap_err(),
        client.request_data(&name).map(|_| ()).unwrap_err(),
    ] {
        assert!(matches!(err, Error::NotFound(_)), "{err}");
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }
}

#[test]
fn registering_something_that_is_not_a_ring_fails() {
    let (_master, client) = start_master();
    let err = client.notify_create(&unique_name("ghost")).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
    assert!(client.list_rings().unwrap().is_empty());
}

#[test]
fn remote_peers_may_not_change_the_directory() {
    let (master, _client) = start_master();
    let ring = Scratch::new("remote_reg");
    let dir = master.directory();

    let err = dir.notify_create(&ring.0, Origin::Remote).unwrap_err();
    assert!(matches!(err, Error::NotSupported { .. }), "{err}");
    assert!(!dir.contains(&ring.0));

    dir.notify_create(&ring.0, Origin::Local).unwrap();
    let err = dir.notify_destroy(&ring.0, Origin::Remote).unwrap_err();
    assert!(matches!(err, Error::NotSupported { .. }), "{err}");
    assert!(dir.contains(&ring.0));
}

#[test]
fn clients_reports_attached_processes() {
    let (_master, client) = start_master();
    let ring = Scratch::new("clients");
    client.notify_create(&ring.0).unwrap();
    assert!(client.list_clients(&ring.0).unwrap().is_empty());

    let _p = Producer::attach(&ring.0).unwrap();
    let _c1 = Consumer::attach(&ring.0).unwrap();
    let _c2 = Consumer::attach(&ring.0).unwrap();

    let me = std::process::id() as i32;
    let clients = client.list_clients(&ring.0).unwrap();
    let roles: Vec<_> = clients.iter().map(|c| (c.role, c.pid)).collect();
    assert_eq!(roles, vec![(Role::Producer, me), (Role::Consumer, me), (Role::Consumer, me)]);
}

#[test]
fn removed_ring_drops_out_of_the_directory() {
    let (master, client) = start_master();
    let ring = Scratch::new("vanish");
    client.notify_create(&ring.0).unwrap();
    RingBuffer::remove(&ring.0).unwrap();

    assert!(matches!(client.list_clients(&ring.0), Err(Error::NotFound(_))));
    assert!(!master.directory().contains(&ring.0));
}

#[test]
fn ring_created_after_start_is_served() {
    let (master, client) = start_master();
    let ring = Scratch::new("late");
    assert!(!master.directory().contains(&ring.0));

    assert!(client.list_clients(&ring.0).unwrap().is_empty());
    assert!(master.directory().contains(&ring.0));

    let mut producer = Producer::attach(&ring.0).unwrap();
    let mut sock = client.request_data(&ring.0).unwrap();
    sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    wait_for("forwarder consumer", || producer.usage().consumers.len() == 1);

    producer.put(&[7u8; 300]).unwrap();
    let mut received = [0u8; 300];
    sock.read_exact(&mut received).unwrap();
    assert_eq!(received, [7u8; 300]);
}

#[cfg(target_os = "linux")]
#[test]
fn scan_finds_existing_rings() {
    let (master, client) = start_master();
    let ring = Scratch::new("scanned");
    assert!(master.directory().scan_host() >= 1);
    assert!(client.list_rings().unwrap().contains(&ring.0));
}

// ========== Remote data ==========

#[test]
fn remote_data_streams_ring_contents() {
    let (_master, client) = start_master();
    let ring = Scratch::new("stream");
    client.notify_create(&ring.0).unwrap();
    let mut producer = Producer::attach(&ring.0).unwrap();

    let mut sock = client.request_data(&ring.0).unwrap();
    sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    wait_for("forwarder consumer", || producer.usage().consumers.len() == 1);

    let mut sent = Vec::new();
    for i in 0..50u8 {
        let record = vec![i; 1000 + i as usize];
        producer.put(&record).unwrap();
        sent.extend_from_slice(&record);
    }

    let mut received = vec![0u8; sent.len()];
    sock.read_exact(&mut received).unwrap();
    assert_eq!(received, sent);
}

#[test]
fn remote_consumer_disconnect_frees_its_slot() {
    let (_master, client) = start_master();
    let ring = Scratch::new("hangup");
    client.notify_create(&ring.0).unwrap();
    let mut producer = Producer::attach(&ring.0).unwrap();

    let sock = client.request_data(&ring.0).unwrap();
    wait_for("forwarder consumer", || producer.usage().consumers.len() == 1);
    drop(sock);

    // The forwarder only notices on its next write.
    let monitor = Monitor::attach(&ring.0).unwrap();
    wait_for("slot release", || {
        let _ = producer.put(&[0u8; 512]);
        monitor.usage().consumers.is_empty()
    });
}

#[test]
fn shutdown_stops_accepting() {
    let (mut master, client) = start_master();
    assert!(client.list_rings().unwrap().is_empty());
    master.shutdown();
    assert!(client.list_rings().is_err());
}
