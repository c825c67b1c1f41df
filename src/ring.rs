// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Single-producer / multi-consumer byte ring over a named shared memory object.
//
// The data path takes no locks. Every client slot has exactly one writer (its
// owner); the producer publishes data by storing its cursor with Release
// ordering after the bytes are copied, and each consumer frees space by
// storing its own cursor with Release ordering after copying out. Blocking is
// plain polling: re-check, sleep for the poll interval, repeat.

use std::ptr;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config;
use crate::cursor::{Cursor, DataArea};
use crate::error::{Error, Result, Role};
use crate::layout::{self, ClientInformation, RingHeader, HEADER_SIZE};
use crate::platform::{current_pid, is_pid_alive, process_command};
use crate::shm::{ShmHandle, ShmOpenMode};
use crate::shm_name::validate_ring_name;

// ---------------------------------------------------------------------------
// Usage snapshot
// ---------------------------------------------------------------------------

/// Per-client counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientStats {
    pub pid: i32,
    pub transfers: u64,
    pub bytes: u64,
}

/// Point-in-time view of a ring's space accounting, computed from the live
/// cursors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usage {
    /// Capacity of the data area.
    pub buffer_space: usize,
    /// Bytes the producer could put right now without blocking.
    pub put_space: usize,
    pub max_consumers: usize,
    pub producer_pid: Option<i32>,
    /// Largest backlog of any attached consumer (0 with no consumers).
    pub max_get_space: usize,
    /// Smallest backlog of any attached consumer (0 with no consumers).
    pub min_get_space: usize,
    /// `(pid, bytes available)` for each attached consumer, in slot order.
    pub consumers: Vec<(i32, usize)>,
    pub producer_stats: Option<ClientStats>,
    pub consumer_stats: Vec<ClientStats>,
}

/// A client listed by [`Monitor::clients`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEntry {
    pub role: Role,
    pub pid: i32,
    /// Command line of the process, or an empty string when unavailable.
    pub command: String,
}

// ---------------------------------------------------------------------------
// Mapping: shared internals of every role
// ---------------------------------------------------------------------------

struct Mapping {
    name: String,
    shm: ShmHandle,
    header: RingHeader,
    area: DataArea,
}

impl Mapping {
    fn open(name: &str) -> Result<Self> {
        validate_ring_name(name).map_err(Error::InvalidArgument)?;
        let shm = ShmHandle::acquire(name, 0, ShmOpenMode::Open)
            .map_err(|e| Error::os("attach", name, e))?;
        if shm.size() < HEADER_SIZE {
            return Err(Error::NotARing(name.to_owned()));
        }
        let header_bytes = unsafe { std::slice::from_raw_parts(shm.as_ptr(), HEADER_SIZE) };
        let header = layout::validate(header_bytes, shm.size()).map_err(|why| {
            debug!(ring = name, %why, "header check failed");
            Error::NotARing(name.to_owned())
        })?;
        Ok(Self { name: name.to_owned(), area: header.data_area(), shm, header })
    }

    fn client_at(&self, offset: usize) -> &ClientInformation {
        debug_assert!(offset + layout::CLIENT_INFO_SIZE <= self.header.data_offset);
        unsafe { &*(self.shm.as_ptr().add(offset) as *const ClientInformation) }
    }

    fn producer(&self) -> &ClientInformation {
        self.client_at(self.header.producer_info_offset)
    }

    fn consumer(&self, index: usize) -> &ClientInformation {
        self.client_at(self.header.consumer_offset(index))
    }

    fn consumers(&self) -> impl Iterator<Item = &ClientInformation> {
        (0..self.header.max_consumer).map(move |i| self.consumer(i))
    }

    /// Load a cursor, pulling a corrupt value back into the data area.
    fn cursor_of(&self, info: &ClientInformation) -> Cursor {
        let c = Cursor(info.cursor_offset.load(Ordering::Acquire));
        if self.area.contains(c) {
            c
        } else {
            warn!(ring = %self.name, cursor = c.0, "cursor outside data area, resetting");
            self.area.start()
        }
    }

    fn producer_cursor(&self) -> Cursor {
        self.cursor_of(self.producer())
    }

    fn max_consumer_lag(&self, producer: Cursor) -> usize {
        self.consumers()
            .filter(|c| c.pid.load(Ordering::Acquire) != 0)
            .map(|c| self.area.get_space(self.cursor_of(c), producer))
            .max()
            .unwrap_or(0)
    }

    fn put_space(&self) -> usize {
        self.area.put_space(self.max_consumer_lag(self.producer_cursor()))
    }

    /// Free the slots of dead consumers lagging by at least `min_lag` bytes.
    fn release_dead_consumers(&self, min_lag: usize) -> usize {
        let producer = self.producer_cursor();
        let mut released = 0;
        for (slot, info) in self.consumers().enumerate() {
            let pid = info.pid.load(Ordering::Acquire);
            if pid == 0 || self.area.get_space(self.cursor_of(info), producer) < min_lag {
                continue;
            }
            if release_if_dead(info, pid) {
                warn!(ring = %self.name, slot, pid, "released consumer slot of dead process");
                released += 1;
            }
        }
        released
    }

    fn copy_in(&self, at: Cursor, src: &[u8]) {
        let base = self.shm.as_mut_ptr();
        let [first, second] = self.area.segments(at, src.len());
        let split = first.len();
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), base.add(first.start), split);
            ptr::copy_nonoverlapping(src[split..].as_ptr(), base.add(second.start), second.len());
        }
    }

    fn copy_out(&self, at: Cursor, dst: &mut [u8]) {
        let base = self.shm.as_ptr();
        let [first, second] = self.area.segments(at, dst.len());
        let split = first.len();
        unsafe {
            ptr::copy_nonoverlapping(base.add(first.start), dst.as_mut_ptr(), split);
            ptr::copy_nonoverlapping(base.add(second.start), dst[split..].as_mut_ptr(), second.len());
        }
    }

    fn stats(info: &ClientInformation, pid: i32) -> ClientStats {
        ClientStats {
            pid,
            transfers: info.transfers.load(Ordering::Relaxed),
            bytes: info.bytes.load(Ordering::Relaxed),
        }
    }

    fn usage(&self) -> Usage {
        let producer = self.producer_cursor();
        let producer_pid = match self.producer().pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        };

        let mut consumers = Vec::new();
        let mut consumer_stats = Vec::new();
        for info in self.consumers() {
            let pid = info.pid.load(Ordering::Acquire);
            if pid == 0 {
                continue;
            }
            consumers.push((pid, self.area.get_space(self.cursor_of(info), producer)));
            consumer_stats.push(Self::stats(info, pid));
        }

        let max_get_space = consumers.iter().map(|&(_, n)| n).max().unwrap_or(0);
        let min_get_space = consumers.iter().map(|&(_, n)| n).min().unwrap_or(0);
        Usage {
            buffer_space: self.area.len(),
            put_space: self.area.put_space(max_get_space),
            max_consumers: self.header.max_consumer,
            producer_pid,
            max_get_space,
            min_get_space,
            consumers,
            producer_stats: producer_pid.map(|pid| Self::stats(self.producer(), pid)),
            consumer_stats,
        }
    }
}

/// Zero the slot if `pid` still owns it and is no longer running.
fn release_if_dead(info: &ClientInformation, pid: i32) -> bool {
    !is_pid_alive(pid)
        && info.pid.compare_exchange(pid, 0, Ordering::AcqRel, Ordering::Relaxed).is_ok()
}

/// Take `info` for `me` if it is free or its owner is gone.
/// Returns the pid found in the slot when it is held by a live process.
fn claim_slot(info: &ClientInformation, me: i32) -> std::result::Result<Option<i32>, i32> {
    let held_by = info.pid.load(Ordering::Acquire);
    if held_by != 0 && is_pid_alive(held_by) {
        return Err(held_by);
    }
    match info.pid.compare_exchange(held_by, me, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => Ok((held_by != 0).then_some(held_by)),
        Err(now) => Err(now),
    }
}

/// A blocked put looks for dead consumers on its first wait and then once
/// every this many polls.
const LIVENESS_POLLS: u32 = 64;

fn poll_until<F: FnMut() -> bool>(interval: Duration, mut ready: F) {
    while !ready() {
        thread::sleep(interval);
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// The ring's single writer. Dropping it releases the producer slot; the
/// cursor stays put so a later producer continues where this one stopped.
pub struct Producer {
    map: Mapping,
    poll: Duration,
}

impl Producer {
    /// Attach as the producer. Fails with [`Error::ProducerExists`] while a
    /// live process holds the producer slot.
    pub fn attach(name: &str) -> Result<Self> {
        let map = Mapping::open(name)?;
        let me = current_pid();
        match claim_slot(map.producer(), me) {
            Ok(stale) => {
                if let Some(dead) = stale {
                    warn!(ring = name, pid = dead, "reclaimed producer slot of dead process");
                }
                let info = map.producer();
                info.transfers.store(0, Ordering::Relaxed);
                info.bytes.store(0, Ordering::Relaxed);
            }
            Err(pid) => return Err(Error::ProducerExists { ring: name.to_owned(), pid }),
        }
        debug!(ring = name, pid = me, "producer attached");
        Ok(Self { map, poll: config::poll_interval() })
    }

    pub fn name(&self) -> &str {
        &self.map.name
    }

    pub fn header(&self) -> &RingHeader {
        &self.map.header
    }

    /// Bytes that can be put right now without blocking.
    pub fn put_space(&self) -> usize {
        self.map.put_space()
    }

    /// Write `data` as one record, blocking until the slowest attached
    /// consumer leaves enough room.
    pub fn put(&mut self, data: &[u8]) -> Result<()> {
        self.put_items(data, data.len(), 1)
    }

    /// Write `data` as `n_items` records of `item_size` bytes each. The
    /// transfer counter advances by `n_items`.
    pub fn put_items(&mut self, data: &[u8], item_size: usize, n_items: u64) -> Result<()> {
        if (item_size as u64).checked_mul(n_items) != Some(data.len() as u64) {
            return Err(Error::InvalidArgument(format!(
                "{} bytes is not {n_items} items of {item_size} bytes",
                data.len()
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        let capacity = self.map.area.len() - 1;
        if data.len() > capacity {
            return Err(Error::TooLarge { requested: data.len(), capacity });
        }

        let map = &self.map;
        // Only consumers this far behind can be what holds the put back.
        let blocking_lag = map.area.len() - data.len();
        let mut polls = 0u32;
        poll_until(self.poll, || {
            if map.put_space() >= data.len() {
                return true;
            }
            let check = polls % LIVENESS_POLLS == 0;
            polls = polls.wrapping_add(1);
            check && map.release_dead_consumers(blocking_lag) > 0 && map.put_space() >= data.len()
        });

        let info = map.producer();
        let at = Cursor(info.cursor_offset.load(Ordering::Relaxed));
        map.copy_in(at, data);
        info.cursor_offset.store(map.area.advance(at, data.len()).0, Ordering::Release);
        info.transfers.fetch_add(n_items, Ordering::Relaxed);
        info.bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    pub fn incr_transfer_count(&self, n: u64) {
        self.map.producer().transfers.fetch_add(n, Ordering::Relaxed);
    }

    pub fn usage(&self) -> Usage {
        self.map.usage()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    /// Install a new poll interval, returning the previous one.
    pub fn set_poll_interval(&mut self, interval: Duration) -> Duration {
        std::mem::replace(&mut self.poll, interval)
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.map.producer().pid.store(0, Ordering::Release);
        debug!(ring = %self.map.name, "producer detached");
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

/// One independent reader. Starts at the producer's position at attach time.
pub struct Consumer {
    map: Mapping,
    slot: usize,
    poll: Duration,
}

impl Consumer {
    pub fn attach(name: &str) -> Result<Self> {
        let map = Mapping::open(name)?;
        let me = current_pid();
        let slot = (0..map.header.max_consumer)
            .find_map(|i| match claim_slot(map.consumer(i), me) {
                Ok(stale) => {
                    if let Some(dead) = stale {
                        warn!(ring = name, slot = i, pid = dead, "reclaimed consumer slot of dead process");
                    }
                    Some(i)
                }
                Err(_) => None,
            })
            .ok_or_else(|| Error::NoConsumerSlot {
                ring: name.to_owned(),
                max: map.header.max_consumer,
            })?;
        map.consumer(slot).reset(map.producer_cursor().0);
        debug!(ring = name, pid = me, slot, "consumer attached");
        Ok(Self { map, slot, poll: config::poll_interval() })
    }

    pub fn name(&self) -> &str {
        &self.map.name
    }

    pub fn header(&self) -> &RingHeader {
        &self.map.header
    }

    /// Index of the consumer slot this handle owns.
    pub fn slot(&self) -> usize {
        self.slot
    }

    fn info(&self) -> &ClientInformation {
        self.map.consumer(self.slot)
    }

    /// Bytes readable right now.
    pub fn available(&self) -> usize {
        self.map.area.get_space(self.map.cursor_of(self.info()), self.map.producer_cursor())
    }

    /// Block until at least `min_bytes` are available, then copy up to
    /// `buf.len()` of them and return how many were copied. `min_bytes == 0`
    /// never blocks.
    pub fn get(&mut self, buf: &mut [u8], min_bytes: usize) -> Result<usize> {
        if min_bytes > buf.len() {
            return Err(Error::InvalidArgument(format!(
                "min_bytes {min_bytes} exceeds buffer of {} bytes",
                buf.len()
            )));
        }
        let capacity = self.map.area.len() - 1;
        if min_bytes > capacity {
            return Err(Error::TooLarge { requested: min_bytes, capacity });
        }

        poll_until(self.poll, || self.available() >= min_bytes);

        let n = self.available().min(buf.len());
        if n == 0 {
            return Ok(0);
        }
        let info = self.info();
        let at = self.map.cursor_of(info);
        self.map.copy_out(at, &mut buf[..n]);
        info.cursor_offset.store(self.map.area.advance(at, n).0, Ordering::Release);
        info.transfers.fetch_add(1, Ordering::Relaxed);
        info.bytes.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    /// Copy up to `buf.len()` available bytes without consuming them.
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        let n = self.available().min(buf.len());
        if n > 0 {
            self.map.copy_out(self.map.cursor_of(self.info()), &mut buf[..n]);
        }
        n
    }

    /// Discard up to `n` available bytes; returns how many were skipped.
    pub fn skip(&mut self, n: usize) -> usize {
        let n = self.available().min(n);
        if n > 0 {
            let info = self.info();
            let at = self.map.cursor_of(info);
            info.cursor_offset.store(self.map.area.advance(at, n).0, Ordering::Release);
        }
        n
    }

    pub fn incr_transfer_count(&self, n: u64) {
        self.info().transfers.fetch_add(n, Ordering::Relaxed);
    }

    pub fn usage(&self) -> Usage {
        self.map.usage()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    /// Install a new poll interval, returning the previous one.
    pub fn set_poll_interval(&mut self, interval: Duration) -> Duration {
        std::mem::replace(&mut self.poll, interval)
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.info().pid.store(0, Ordering::Release);
        debug!(ring = %self.map.name, slot = self.slot, "consumer detached");
    }
}

// ---------------------------------------------------------------------------
// Monitor (manager role)
// ---------------------------------------------------------------------------

/// Maps a ring without claiming a slot. Used for inspection and cleanup.
pub struct Monitor {
    map: Mapping,
}

impl Monitor {
    pub fn attach(name: &str) -> Result<Self> {
        Ok(Self { map: Mapping::open(name)? })
    }

    pub fn name(&self) -> &str {
        &self.map.name
    }

    pub fn header(&self) -> &RingHeader {
        &self.map.header
    }

    pub fn usage(&self) -> Usage {
        self.map.usage()
    }

    /// Producer first (when attached), then consumers in slot order.
    pub fn clients(&self) -> Vec<ClientEntry> {
        let entry = |role, pid| ClientEntry {
            role,
            pid,
            command: process_command(pid).unwrap_or_default(),
        };
        let mut out = Vec::new();
        match self.map.producer().pid.load(Ordering::Acquire) {
            0 => {}
            pid => out.push(entry(Role::Producer, pid)),
        }
        for info in self.map.consumers() {
            match info.pid.load(Ordering::Acquire) {
                0 => {}
                pid => out.push(entry(Role::Consumer, pid)),
            }
        }
        out
    }

    /// Free every slot whose owner process no longer exists.
    /// Returns how many slots were released.
    pub fn release_stale_clients(&self) -> usize {
        let all = std::iter::once(self.map.producer()).chain(self.map.consumers());
        let mut released = 0;
        for info in all {
            let pid = info.pid.load(Ordering::Acquire);
            if pid != 0 && release_if_dead(info, pid) {
                warn!(ring = %self.map.name, pid, "released slot of dead process");
                released += 1;
            }
        }
        released
    }
}

// ---------------------------------------------------------------------------
// RingBuffer: role-polymorphic handle plus administrative operations
// ---------------------------------------------------------------------------

/// A ring attachment in any role. Data operations on the wrong role fail
/// with [`Error::WrongRole`]; use [`Producer`] / [`Consumer`] directly to
/// have the compiler rule them out instead.
pub enum RingBuffer {
    Producer(Producer),
    Consumer(Consumer),
    Manager(Monitor),
}

impl RingBuffer {
    /// Create `name` with the process-wide default size and consumer count.
    pub fn create(name: &str) -> Result<()> {
        Self::create_with(name, config::default_ring_size(), config::default_max_consumers())
    }

    /// Create and format a ring with `data_bytes` of data and room for
    /// `max_consumers` consumers. The object is world read/write.
    pub fn create_with(name: &str, data_bytes: usize, max_consumers: usize) -> Result<()> {
        validate_ring_name(name).map_err(Error::InvalidArgument)?;
        let (total, _) = layout::compute_layout(data_bytes, max_consumers)?;
        let shm = ShmHandle::acquire(name, total, ShmOpenMode::Create)
            .map_err(|e| Error::os("create", name, e))?;
        // Freshly created: nobody else can have it mapped yet.
        let region = unsafe { std::slice::from_raw_parts_mut(shm.as_mut_ptr(), shm.size()) };
        layout::format(region, data_bytes, max_consumers)?;
        info!(ring = name, data_bytes, max_consumers, total, "ring created");
        Ok(())
    }

    /// Unlink the backing object. Existing attachments keep their mapping.
    pub fn remove(name: &str) -> Result<()> {
        validate_ring_name(name).map_err(Error::InvalidArgument)?;
        ShmHandle::unlink_by_name(name).map_err(|e| Error::os("remove", name, e))?;
        info!(ring = name, "ring removed");
        Ok(())
    }

    /// True only when `name` exists and carries a self-consistent ring header.
    pub fn is_ring(name: &str) -> bool {
        Mapping::open(name).is_ok()
    }

    /// Format the existing object `name` as a ring with `max_consumers`
    /// slots, using all space after the slot table as data area. Any clients
    /// still attached are forgotten.
    pub fn format(name: &str, max_consumers: usize) -> Result<RingHeader> {
        validate_ring_name(name).map_err(Error::InvalidArgument)?;
        let shm = ShmHandle::acquire(name, 0, ShmOpenMode::Open)
            .map_err(|e| Error::os("format", name, e))?;
        let (_, geometry) = layout::compute_layout(2, max_consumers)?;
        if shm.size() < geometry.data_offset + 2 {
            return Err(Error::InvalidArgument(format!(
                "{name} is {} bytes, too small for {max_consumers} consumers",
                shm.size()
            )));
        }
        let data_bytes = shm.size() - geometry.data_offset;
        let (total, _) = layout::compute_layout(data_bytes, max_consumers)?;
        if total != shm.size() {
            return Err(Error::InvalidArgument(format!(
                "{name} size {} is not a whole number of pages",
                shm.size()
            )));
        }
        let region = unsafe { std::slice::from_raw_parts_mut(shm.as_mut_ptr(), shm.size()) };
        let header = layout::format(region, data_bytes, max_consumers)?;
        info!(ring = name, data_bytes, max_consumers, "ring formatted");
        Ok(header)
    }

    pub fn attach(name: &str, role: Role) -> Result<Self> {
        Ok(match role {
            Role::Producer => RingBuffer::Producer(Producer::attach(name)?),
            Role::Consumer => RingBuffer::Consumer(Consumer::attach(name)?),
            Role::Manager => RingBuffer::Manager(Monitor::attach(name)?),
        })
    }

    pub fn role(&self) -> Role {
        match self {
            RingBuffer::Producer(_) => Role::Producer,
            RingBuffer::Consumer(_) => Role::Consumer,
            RingBuffer::Manager(_) => Role::Manager,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RingBuffer::Producer(p) => p.name(),
            RingBuffer::Consumer(c) => c.name(),
            RingBuffer::Manager(m) => m.name(),
        }
    }

    pub fn put(&mut self, data: &[u8]) -> Result<()> {
        match self {
            RingBuffer::Producer(p) => p.put(data),
            other => Err(Error::WrongRole { operation: "put", role: other.role() }),
        }
    }

    pub fn get(&mut self, buf: &mut [u8], min_bytes: usize) -> Result<usize> {
        match self {
            RingBuffer::Consumer(c) => c.get(buf, min_bytes),
            other => Err(Error::WrongRole { operation: "get", role: other.role() }),
        }
    }

    pub fn usage(&self) -> Usage {
        match self {
            RingBuffer::Producer(p) => p.usage(),
            RingBuffer::Consumer(c) => c.usage(),
            RingBuffer::Manager(m) => m.usage(),
        }
    }

    /// Poll interval of a producer or consumer; `None` for a manager.
    pub fn poll_interval(&self) -> Option<Duration> {
        match self {
            RingBuffer::Producer(p) => Some(p.poll_interval()),
            RingBuffer::Consumer(c) => Some(c.poll_interval()),
            RingBuffer::Manager(_) => None,
        }
    }

    pub fn set_poll_interval(&mut self, interval: Duration) -> Result<Duration> {
        match self {
            RingBuffer::Producer(p) => Ok(p.set_poll_interval(interval)),
            RingBuffer::Consumer(c) => Ok(c.set_poll_interval(interval)),
            RingBuffer::Manager(_) => {
                Err(Error::WrongRole { operation: "set_poll_interval", role: Role::Manager })
            }
        }
    }
}
