// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Byte layout of a ring's shared region:
//
//   offset 0                      RingHeader (HEADER_SIZE bytes)
//   producer_info_offset          ClientInformation  (producer slot)
//   first_consumer_offset         ClientInformation × max_consumer
//   data_offset (page aligned)    circular data area, data_bytes long
//   ...                           padding up to the next page boundary
//
// The header is written once by `format` and is read-only afterwards. Each
// ClientInformation is written only by the process owning the slot.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use crate::cursor::DataArea;
use crate::error::{Error, Result};

/// "DAQRING1" in little-endian byte order.
pub const RING_MAGIC: u64 = u64::from_le_bytes(*b"DAQRING1");

/// Size reserved for the header at offset 0.
pub const HEADER_SIZE: usize = 64;

/// Upper bound accepted for `max_consumer`.
pub const MAX_CONSUMERS_LIMIT: usize = 65_536;

/// Size of one client slot.
pub const CLIENT_INFO_SIZE: usize = std::mem::size_of::<ClientInformation>();

/// Decoded ring header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingHeader {
    pub max_consumer: usize,
    pub producer_info_offset: usize,
    pub first_consumer_offset: usize,
    pub data_offset: usize,
    pub data_bytes: usize,
    pub top_offset: usize,
}

const FIELD_MAGIC: usize = 0;
const FIELD_MAX_CONSUMER: usize = 8;
const FIELD_PRODUCER: usize = 16;
const FIELD_FIRST_CONSUMER: usize = 24;
const FIELD_DATA_OFFSET: usize = 32;
const FIELD_DATA_BYTES: usize = 40;
const FIELD_TOP: usize = 48;

impl RingHeader {
    pub fn data_area(&self) -> DataArea {
        DataArea::new(self.data_offset, self.data_bytes)
    }

    /// Region offset of consumer slot `index`.
    pub fn consumer_offset(&self, index: usize) -> usize {
        self.first_consumer_offset + index * CLIENT_INFO_SIZE
    }

    fn encode(&self, out: &mut [u8]) {
        let put = |out: &mut [u8], at: usize, v: u64| out[at..at + 8].copy_from_slice(&v.to_le_bytes());
        put(out, FIELD_MAGIC, RING_MAGIC);
        put(out, FIELD_MAX_CONSUMER, self.max_consumer as u64);
        put(out, FIELD_PRODUCER, self.producer_info_offset as u64);
        put(out, FIELD_FIRST_CONSUMER, self.first_consumer_offset as u64);
        put(out, FIELD_DATA_OFFSET, self.data_offset as u64);
        put(out, FIELD_DATA_BYTES, self.data_bytes as u64);
        put(out, FIELD_TOP, self.top_offset as u64);
    }
}

fn field(bytes: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(b)
}

/// One producer or consumer slot. Lives in shared memory; `pid == 0` means free.
#[repr(C)]
pub struct ClientInformation {
    pub pid: AtomicI32,
    _pad: u32,
    /// Absolute region offset of this client's next read/write.
    pub cursor_offset: AtomicU64,
    pub transfers: AtomicU64,
    pub bytes: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<ClientInformation>() == 32);
const _: () = assert!(HEADER_SIZE % std::mem::align_of::<ClientInformation>() == 0);

impl ClientInformation {
    /// Zero the statistics and place the cursor; the pid is left untouched.
    pub fn reset(&self, cursor: u64) {
        self.transfers.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
        self.cursor_offset.store(cursor, Ordering::Release);
    }
}

fn round_up(value: usize, to: usize) -> Option<usize> {
    value.div_ceil(to).checked_mul(to)
}

/// Compute the region geometry for `data_bytes` of data and `max_consumers`
/// consumer slots using the host page size. Returns `(total_size, header)`.
pub fn compute_layout(data_bytes: usize, max_consumers: usize) -> Result<(usize, RingHeader)> {
    compute_layout_with_page(data_bytes, max_consumers, crate::platform::page_size())
}

/// As [`compute_layout`] with an explicit page size.
pub fn compute_layout_with_page(
    data_bytes: usize,
    max_consumers: usize,
    page: usize,
) -> Result<(usize, RingHeader)> {
    if data_bytes < 2 {
        return Err(Error::InvalidArgument(format!(
            "ring data size must be at least 2 bytes, got {data_bytes}"
        )));
    }
    if max_consumers == 0 || max_consumers > MAX_CONSUMERS_LIMIT {
        return Err(Error::InvalidArgument(format!(
            "max consumers must be in 1..={MAX_CONSUMERS_LIMIT}, got {max_consumers}"
        )));
    }
    if page == 0 || page & (page - 1) != 0 {
        return Err(Error::InvalidArgument(format!("page size {page} is not a power of two")));
    }

    let producer_info_offset = HEADER_SIZE;
    let first_consumer_offset = producer_info_offset + CLIENT_INFO_SIZE;
    let overflow = || Error::InvalidArgument(format!("ring data size {data_bytes} overflows"));
    let data_offset = round_up(HEADER_SIZE + (max_consumers + 1) * CLIENT_INFO_SIZE, page)
        .ok_or_else(overflow)?;
    let total = data_offset
        .checked_add(data_bytes)
        .and_then(|end| round_up(end, page))
        .ok_or_else(overflow)?;

    let header = RingHeader {
        max_consumer: max_consumers,
        producer_info_offset,
        first_consumer_offset,
        data_offset,
        data_bytes,
        top_offset: data_offset + data_bytes - 1,
    };
    Ok((total, header))
}

/// Format a freshly allocated region: write the header, free every slot and
/// park every cursor at the start of the data area.
///
/// `region` must be 8-byte aligned (a page-aligned mapping always is) and at
/// least as large as [`compute_layout`] says.
pub fn format(region: &mut [u8], data_bytes: usize, max_consumers: usize) -> Result<RingHeader> {
    format_with_page(region, data_bytes, max_consumers, crate::platform::page_size())
}

pub fn format_with_page(
    region: &mut [u8],
    data_bytes: usize,
    max_consumers: usize,
    page: usize,
) -> Result<RingHeader> {
    let (total, header) = compute_layout_with_page(data_bytes, max_consumers, page)?;
    if region.len() < total {
        return Err(Error::InvalidArgument(format!(
            "region of {} bytes cannot hold a ring needing {total}",
            region.len()
        )));
    }
    if region.as_ptr() as usize % std::mem::align_of::<ClientInformation>() != 0 {
        return Err(Error::InvalidArgument("region is not 8-byte aligned".to_owned()));
    }

    region[..header.data_offset].fill(0);
    header.encode(&mut region[..HEADER_SIZE]);

    let start = header.data_offset as u64;
    let mut slot = header.producer_info_offset;
    while slot < header.consumer_offset(max_consumers) {
        region[slot + 8..slot + 16].copy_from_slice(&start.to_ne_bytes());
        slot += CLIENT_INFO_SIZE;
    }
    Ok(header)
}

/// Decode and self-check the header at the start of a mapped region of
/// `region_size` bytes. Anything inconsistent means "not a ring".
pub fn validate(header_bytes: &[u8], region_size: usize) -> std::result::Result<RingHeader, String> {
    validate_with_page(header_bytes, region_size, crate::platform::page_size())
}

pub fn validate_with_page(
    header_bytes: &[u8],
    region_size: usize,
    page: usize,
) -> std::result::Result<RingHeader, String> {
    if header_bytes.len() < HEADER_SIZE || region_size < HEADER_SIZE {
        return Err(format!("region of {region_size} bytes is smaller than a ring header"));
    }
    if field(header_bytes, FIELD_MAGIC) != RING_MAGIC {
        return Err("bad magic".to_owned());
    }
    let max_consumer = field(header_bytes, FIELD_MAX_CONSUMER) as usize;
    let data_bytes = field(header_bytes, FIELD_DATA_BYTES) as usize;
    let (total, expected) = compute_layout_with_page(data_bytes, max_consumer, page)
        .map_err(|e| e.to_string())?;

    let stored = RingHeader {
        max_consumer,
        producer_info_offset: field(header_bytes, FIELD_PRODUCER) as usize,
        first_consumer_offset: field(header_bytes, FIELD_FIRST_CONSUMER) as usize,
        data_offset: field(header_bytes, FIELD_DATA_OFFSET) as usize,
        data_bytes,
        top_offset: field(header_bytes, FIELD_TOP) as usize,
    };
    if stored != expected {
        return Err(format!("inconsistent header {stored:?}, expected {expected:?}"));
    }
    if total != region_size {
        return Err(format!("region is {region_size} bytes, header implies {total}"));
    }
    Ok(stored)
}
