// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Remote consumption: URL routing, proxy rings fed from a ring master, and
// forwarder teardown.

use std::io::{self, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use daqring::config::{self, MasterLocator};
use daqring::master::{Origin, RingMaster, RingMasterHandle};
use daqring::{
    compute_local_ring_name, consume_from, Consumer, Error, ErrorCategory, Monitor, Producer,
    ProxyRing, ProxySettings, RingBuffer,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

const PROXY_RING_SIZE: usize = 256 * 1024;

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}

/// Removes every listed ring when dropped.
struct Cleanup(Vec<String>);

impl Drop for Cleanup {
    fn drop(&mut self) {
        for name in &self.0 {
            let _ = RingBuffer::remove(name);
        }
    }
}

fn scratch_ring(prefix: &str) -> String {
    let name = unique_name(prefix);
    let _ = RingBuffer::remove(&name);
    RingBuffer::create_with(&name, 64 * 1024, 4).expect("create ring");
    name
}

fn wait_for<F: FnMut() -> bool>(what: &str, mut ready: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !ready() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn serve_ring(ring: &str) -> RingMasterHandle {
    config::set_proxy_ring_size(PROXY_RING_SIZE);
    let master = RingMaster::bind("0.0.0.0:0").unwrap().spawn().unwrap();
    master.directory().notify_create(ring, Origin::Local).unwrap();
    master
}

fn drain(consumer: &mut Consumer, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut buf = vec![0u8; 8192];
    while out.len() < len {
        let want = (len - out.len()).min(buf.len());
        let n = consumer.get(&mut buf[..want], 1).unwrap();
        out.extend_from_slice(&buf[..n]);
    }
    out
}

fn publish(producer: &mut Producer, records: usize) -> Vec<u8> {
    let mut sent = Vec::new();
    for i in 0..records {
        let record: Vec<u8> = (0..100 + i * 7).map(|j| (i + j) as u8).collect();
        producer.put(&record).unwrap();
        sent.extend_from_slice(&record);
    }
    sent
}

fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let near = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (far, _) = listener.accept().unwrap();
    (near, far)
}

// ========== URL routing ==========

#[test]
fn loopback_urls_attach_directly() {
    let ring = scratch_ring("direct");
    let _cleanup = Cleanup(vec![ring.clone()]);

    let c = consume_from(&format!("tcp://localhost/{ring}")).unwrap();
    assert_eq!(c.name(), ring);
    let c2 = consume_from(&format!("tcp://127.0.0.1:1/{ring}")).unwrap();
    assert_eq!(c2.name(), ring);
    assert_eq!(c.usage().consumers.len(), 2);
}

#[test]
fn bad_urls_fail_before_touching_the_network() {
    let err = consume_from("not a url").map(|_| ()).unwrap_err();
    assert!(matches!(err, Error::BadUrl(_)), "{err}");
    assert_eq!(err.category(), ErrorCategory::Precondition);
}

#[cfg(target_os = "linux")]
#[test]
fn missing_remote_ring_is_not_found() {
    let ring = scratch_ring("unlisted");
    let master = RingMaster::bind("0.0.0.0:0").unwrap().spawn().unwrap();
    let proxy = compute_local_ring_name(&ring, "127.0.0.2");
    let _cleanup = Cleanup(vec![ring.clone(), proxy]);

    config::set_proxy_ring_size(PROXY_RING_SIZE);
    let url = format!("tcp://127.0.0.2:{}/{ring}", master.port());
    let err = consume_from(&url).map(|_| ()).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err}");
}

// ========== Remote path ==========

/// 127.0.0.2 reaches the same machine on Linux but is not a loopback
/// spelling the proxy treats as local.
#[cfg(target_os = "linux")]
#[test]
fn remote_url_is_served_through_a_proxy_ring() {
    let ring = scratch_ring("remote");
    let proxy_name = compute_local_ring_name(&ring, "127.0.0.2");
    let _cleanup = Cleanup(vec![ring.clone(), proxy_name.clone()]);
    let mut master = serve_ring(&ring);
    let url = format!("tcp://127.0.0.2:{}/{ring}", master.port());

    let mut producer = Producer::attach(&ring).unwrap();
    let mut consumer = consume_from(&url).unwrap();
    assert_eq!(consumer.name(), proxy_name);
    assert_eq!(consumer.header().data_bytes, PROXY_RING_SIZE);
    assert_eq!(producer.usage().consumers.len(), 1);

    let sent = publish(&mut producer, 200);
    assert_eq!(drain(&mut consumer, sent.len()), sent);

    // A second local reader shares the running proxy.
    let second = consume_from(&url).unwrap();
    assert_eq!(second.name(), proxy_name);
    assert_eq!(producer.usage().consumers.len(), 1);
    assert_eq!(consumer.usage().consumers.len(), 2);
    drop(second);

    // Source goes away: the forwarder closes, the proxy releases its slot.
    master.shutdown();
    let monitor = Monitor::attach(&proxy_name).unwrap();
    wait_for("proxy teardown", || monitor.usage().producer_pid.is_none());

    // A dead proxy ring is picked up again by the next session.
    let master = serve_ring(&ring);
    let url = format!("tcp://127.0.0.2:{}/{ring}", master.port());
    let mut again = consume_from(&url).unwrap();
    assert_eq!(again.name(), proxy_name);
    assert!(monitor.usage().producer_pid.is_some());
    let sent = publish(&mut producer, 20);
    assert_eq!(drain(&mut again, sent.len()), sent);
}

#[test]
fn own_host_name_takes_the_network_path() {
    let host = match daqring::host_name() {
        Ok(h) if !h.is_empty() && !daqring::proxy::is_local_host(&h) => h,
        _ => return,
    };
    if (host.as_str(), 0).to_socket_addrs().map(|mut a| a.next().is_none()).unwrap_or(true) {
        eprintln!("skipping: {host} does not resolve");
        return;
    }

    let ring = scratch_ring("byhostname");
    let proxy_name = compute_local_ring_name(&ring, &host);
    let _cleanup = Cleanup(vec![ring.clone(), proxy_name.clone()]);
    let master = serve_ring(&ring);
    config::set_master_locator(MasterLocator::Fixed(master.port()));

    let mut producer = Producer::attach(&ring).unwrap();
    let mut consumer = consume_from(&format!("tcp://{host}/{ring}")).unwrap();
    assert_eq!(consumer.name(), proxy_name);
    assert_ne!(consumer.name(), ring);

    let sent = publish(&mut producer, 50);
    assert_eq!(drain(&mut consumer, sent.len()), sent);
}

// ========== Forwarder ==========

#[test]
fn forwarder_stops_at_end_of_stream() {
    let ring = scratch_ring("eof");
    let _cleanup = Cleanup(vec![ring.clone()]);
    let mut consumer = Consumer::attach(&ring).unwrap();
    let (near, mut far) = socket_pair();

    let settings = ProxySettings { min_data: 1, timeout: Duration::from_secs(5) };
    let proxy = ProxyRing::start(near, &ring, settings).unwrap();
    assert_eq!(proxy.local_name(), ring);
    assert!(matches!(Producer::attach(&ring), Err(Error::ProducerExists { .. })));

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
    far.write_all(&payload).unwrap();
    drop(far);

    assert_eq!(proxy.join().unwrap(), payload.len() as u64);
    assert_eq!(drain(&mut consumer, payload.len()), payload);
    assert_eq!(consumer.usage().producer_pid, None);
}

#[test]
fn forwarder_batches_to_min_data() {
    let ring = scratch_ring("batch");
    let _cleanup = Cleanup(vec![ring.clone()]);
    let consumer = Consumer::attach(&ring).unwrap();
    let (near, mut far) = socket_pair();

    let settings = ProxySettings { min_data: 100, timeout: Duration::from_secs(5) };
    let proxy = ProxyRing::start(near, &ring, settings).unwrap();

    far.write_all(&[1u8; 60]).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(consumer.available(), 0);

    far.write_all(&[2u8; 60]).unwrap();
    wait_for("batched put", || consumer.available() == 120);

    // A short tail is flushed on close.
    far.write_all(&[3u8; 10]).unwrap();
    drop(far);
    assert_eq!(proxy.join().unwrap(), 130);
    assert_eq!(consumer.available(), 130);
}

#[test]
fn silent_source_times_out() {
    let ring = scratch_ring("silent");
    let _cleanup = Cleanup(vec![ring.clone()]);
    let (near, _far) = socket_pair();

    let settings = ProxySettings { min_data: 1, timeout: Duration::from_millis(100) };
    let proxy = ProxyRing::start(near, &ring, settings).unwrap();
    let err = proxy.join().unwrap_err();
    match &err {
        Error::Os { source, .. } => assert_eq!(source.kind(), io::ErrorKind::TimedOut),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(Monitor::attach(&ring).unwrap().usage().producer_pid, None);
}

#[test]
fn proxy_needs_the_producer_slot() {
    let ring = scratch_ring("busy");
    let _cleanup = Cleanup(vec![ring.clone()]);
    let _owner = Producer::attach(&ring).unwrap();
    let (near, _far) = socket_pair();

    let settings = ProxySettings { min_data: 1, timeout: Duration::from_secs(1) };
    let err = ProxyRing::start(near, &ring, settings).map(|_| ()).unwrap_err();
    assert!(matches!(err, Error::ProducerExists { .. }), "{err}");
}
