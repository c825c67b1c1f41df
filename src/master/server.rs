// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The ring master: a per-host directory of live rings that also hands remote
// consumers a socket streaming a ring's data.
//
// Each accepted connection gets its own thread. A REMOTE request keeps that
// thread as the forwarder: it attaches as a consumer of the local ring and
// copies whatever `get` returns onto the socket until either side goes away.

use std::collections::BTreeSet;
use std::io::Write;
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config;
use crate::error::{Error, Result};
use crate::master::protocol::{self, Reply, Request};
use crate::platform::list_shm_objects;
use crate::ring::{ClientEntry, Consumer, Monitor, RingBuffer};
use crate::shm_name::{ring_name_of_object, validate_ring_name};

/// Bytes moved per `get` by a forwarding thread.
const FORWARD_CHUNK: usize = 64 * 1024;

/// Interval of the stale-slot sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Where a request came from, as far as authority over local rings goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

impl Origin {
    /// A peer is local when it reached us over loopback or from one of our
    /// own addresses.
    pub fn of(peer: IpAddr, local: IpAddr) -> Self {
        let peer = canonical(peer);
        if peer.is_loopback() || peer == canonical(local) {
            Origin::Local
        } else {
            Origin::Remote
        }
    }
}

fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

// ---------------------------------------------------------------------------
// Directory: the in-memory set of live rings
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Directory {
    rings: Mutex<BTreeSet<String>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `ring` was created on this host.
    pub fn notify_create(&self, ring: &str, origin: Origin) -> Result<()> {
        if origin == Origin::Remote {
            return Err(Error::NotSupported {
                operation: "REGISTER",
                detail: format!("{ring} may only be registered from its own host"),
            });
        }
        validate_ring_name(ring).map_err(Error::InvalidArgument)?;
        if !RingBuffer::is_ring(ring) {
            return Err(Error::NotARing(ring.to_owned()));
        }
        if !self.rings.lock().insert(ring.to_owned()) {
            return Err(Error::AlreadyRegistered(ring.to_owned()));
        }
        info!(ring, "registered");
        Ok(())
    }

    /// Record that `ring` was destroyed on this host.
    pub fn notify_destroy(&self, ring: &str, origin: Origin) -> Result<()> {
        if origin == Origin::Remote {
            return Err(Error::NotSupported {
                operation: "UNREGISTER",
                detail: format!("{ring} may only be unregistered from its own host"),
            });
        }
        if !self.rings.lock().remove(ring) {
            return Err(Error::NotFound(ring.to_owned()));
        }
        info!(ring, "unregistered");
        Ok(())
    }

    pub fn contains(&self, ring: &str) -> bool {
        self.rings.lock().contains(ring)
    }

    pub fn rings(&self) -> Vec<String> {
        self.rings.lock().iter().cloned().collect()
    }

    /// Reconcile the entry for `ring` with the host: rings created since the
    /// last scan are registered, vanished ones are dropped. Returns true when
    /// the ring exists.
    fn check_live(&self, ring: &str) -> bool {
        let exists = RingBuffer::is_ring(ring);
        let mut rings = self.rings.lock();
        match (rings.contains(ring), exists) {
            (false, true) => {
                info!(ring, "registered ring created after the last scan");
                rings.insert(ring.to_owned());
            }
            (true, false) => {
                warn!(ring, "registered ring no longer exists, dropping it");
                rings.remove(ring);
            }
            _ => {}
        }
        exists
    }

    /// Producer and consumer processes attached to `ring`.
    pub fn list_clients(&self, ring: &str) -> Result<Vec<ClientEntry>> {
        if !self.check_live(ring) {
            return Err(Error::NotFound(ring.to_owned()));
        }
        let monitor = Monitor::attach(ring)?;
        monitor.release_stale_clients();
        Ok(monitor.clients())
    }

    /// Attach a consumer to `ring` for a remote data connection. The consumer
    /// starts at the producer's current position.
    pub fn request_data(&self, ring: &str) -> Result<Consumer> {
        if !self.check_live(ring) {
            return Err(Error::NotFound(ring.to_owned()));
        }
        Consumer::attach(ring)
    }

    /// Register every ring already present in the host's shm namespace.
    /// Returns how many were added.
    pub fn scan_host(&self) -> usize {
        let objects = match list_shm_objects() {
            Ok(o) => o,
            Err(e) => {
                warn!(error = %e, "cannot list shared memory objects");
                return 0;
            }
        };
        let mut added = 0;
        for ring in objects.iter().filter_map(|o| ring_name_of_object(o)) {
            if RingBuffer::is_ring(&ring) && self.rings.lock().insert(ring.clone()) {
                debug!(ring = %ring, "found existing ring");
                added += 1;
            }
        }
        added
    }

    /// Drop vanished rings and free slots held by dead processes.
    pub fn sweep(&self) {
        for ring in self.rings() {
            if !self.check_live(&ring) {
                continue;
            }
            if let Ok(monitor) = Monitor::attach(&ring) {
                monitor.release_stale_clients();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RingMaster: the TCP front end
// ---------------------------------------------------------------------------

pub struct RingMaster {
    listener: TcpListener,
    directory: Arc<Directory>,
    stop: Arc<AtomicBool>,
}

/// A ring master running on background threads.
pub struct RingMasterHandle {
    addr: SocketAddr,
    directory: Arc<Directory>,
    stop: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
}

impl RingMaster {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            directory: Arc::new(Directory::new()),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn directory(&self) -> Arc<Directory> {
        Arc::clone(&self.directory)
    }

    /// Accept connections until [`RingMasterHandle::shutdown`] (or a stop
    /// flag set elsewhere) ends the loop.
    pub fn serve(&self) -> Result<()> {
        let sweeper = {
            let dir = Arc::clone(&self.directory);
            let stop = Arc::clone(&self.stop);
            thread::spawn(move || sweep_loop(&dir, &stop))
        };

        info!(addr = %self.listener.local_addr()?, "ring master listening");
        for conn in self.listener.incoming() {
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            match conn {
                Ok(stream) => {
                    let dir = Arc::clone(&self.directory);
                    let stop = Arc::clone(&self.stop);
                    thread::spawn(move || handle_connection(&dir, stream, &stop));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
        let _ = sweeper.join();
        Ok(())
    }

    /// Run [`serve`](Self::serve) on a background thread.
    pub fn spawn(self) -> Result<RingMasterHandle> {
        let addr = self.local_addr()?;
        let directory = self.directory();
        let stop = Arc::clone(&self.stop);
        let accept = thread::spawn(move || {
            if let Err(e) = self.serve() {
                error!(error = %e, "ring master stopped");
            }
        });
        Ok(RingMasterHandle { addr, directory, stop, accept: Some(accept) })
    }

    /// Flag that stops [`serve`](Self::serve) once set and the listener is poked.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }
}

impl RingMasterHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn directory(&self) -> Arc<Directory> {
        Arc::clone(&self.directory)
    }

    /// Stop accepting and wait for the accept loop to exit. Forwarders
    /// notice the flag on their next idle poll.
    pub fn shutdown(&mut self) {
        wake_listener(&self.stop, self.addr);
        if let Some(t) = self.accept.take() {
            let _ = t.join();
        }
    }
}

impl Drop for RingMasterHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Set `stop` and poke the listener at `addr` so a blocked accept returns.
pub fn wake_listener(stop: &AtomicBool, addr: SocketAddr) {
    stop.store(true, Ordering::Release);
    let target = if addr.ip().is_unspecified() {
        SocketAddr::new(IpAddr::from([127, 0, 0, 1]), addr.port())
    } else {
        addr
    };
    let _ = TcpStream::connect_timeout(&target, Duration::from_secs(1));
}

fn sweep_loop(dir: &Directory, stop: &AtomicBool) {
    let mut last = Instant::now();
    while !stop.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(200));
        if last.elapsed() >= SWEEP_INTERVAL {
            dir.sweep();
            last = Instant::now();
        }
    }
}

fn handle_connection(dir: &Directory, mut stream: TcpStream, stop: &AtomicBool) {
    let (peer, local) = match (stream.peer_addr(), stream.local_addr()) {
        (Ok(p), Ok(l)) => (p, l),
        _ => return,
    };
    let origin = Origin::of(peer.ip(), local.ip());
    let _ = stream.set_read_timeout(Some(config::network_timeout()));

    let request = match protocol::read_line(&mut stream)
        .map_err(Error::from)
        .and_then(|line| Request::parse(&line))
    {
        Ok(r) => r,
        Err(e) => {
            debug!(%peer, error = %e, "bad request");
            let _ = protocol::write_line(&mut stream, &Reply::failure(&e).to_line());
            return;
        }
    };
    debug!(%peer, ?origin, ?request, "request");

    let result = match &request {
        Request::Register(ring) => dir.notify_create(ring, origin).map(|_| vec![Reply::Ok.to_line()]),
        Request::Unregister(ring) => {
            dir.notify_destroy(ring, origin).map(|_| vec![Reply::Ok.to_line()])
        }
        Request::List => {
            let rings = dir.rings();
            let mut lines = vec![Reply::Count(rings.len()).to_line()];
            lines.extend(rings.into_iter().map(|r| format!("{r}\n")));
            Ok(lines)
        }
        Request::Clients(ring) => dir.list_clients(ring).map(|clients| {
            let mut lines = vec![Reply::Count(clients.len()).to_line()];
            lines.extend(clients.iter().map(protocol::encode_client));
            lines
        }),
        Request::Remote(ring) => {
            match dir.request_data(ring) {
                Ok(consumer) => {
                    if protocol::write_line(&mut stream, &Reply::BinaryFollows.to_line()).is_ok() {
                        info!(ring = %ring, %peer, "streaming ring to remote consumer");
                        forward(consumer, stream, stop);
                    }
                    return;
                }
                Err(e) => Err(e),
            }
        }
    };

    let lines = result.unwrap_or_else(|e| {
        debug!(%peer, error = %e, "request failed");
        vec![Reply::failure(&e).to_line()]
    });
    for line in lines {
        if protocol::write_line(&mut stream, &line).is_err() {
            break;
        }
    }
}

/// Copy a ring's data onto `sock` until the peer disconnects or the master
/// stops. Failure here only ends this connection.
fn forward(mut consumer: Consumer, mut sock: TcpStream, stop: &AtomicBool) {
    let mut buf = vec![0u8; FORWARD_CHUNK];
    let poll = consumer.poll_interval();
    let _ = sock.set_nodelay(true);
    while !stop.load(Ordering::Acquire) {
        let n = match consumer.get(&mut buf, 0) {
            Ok(n) => n,
            Err(e) => {
                error!(ring = consumer.name(), error = %e, "ring read failed");
                break;
            }
        };
        if n == 0 {
            thread::sleep(poll);
            continue;
        }
        if let Err(e) = sock.write_all(&buf[..n]) {
            warn!(ring = consumer.name(), error = %e, "remote consumer went away");
            break;
        }
    }
    let _ = sock.shutdown(Shutdown::Both);
    debug!(ring = consumer.name(), "forwarder finished");
}
