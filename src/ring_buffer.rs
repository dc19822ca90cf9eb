use crate::error::{MqError, Result};

/// Total bytes of the fixed header at the front of every ring buffer region:
/// five little-endian u64 fields (capacity, read_pos, write_pos, read_count,
/// write_count).
pub const HEADER_SIZE: usize = 40;

/// Largest payload a single element may carry. The 2-byte length prefix
/// caps an element at `2^16 - 2` so that `prefix + payload` always fits in
/// the 16-bit field used to encode it.
pub const MAX_ELEMENT: usize = (1 << 16) - 2;

const PREFIX_SIZE: usize = 2;

const OFF_CAPACITY: usize = 0;
const OFF_READ_POS: usize = 8;
const OFF_WRITE_POS: usize = 16;
const OFF_READ_COUNT: usize = 24;
const OFF_WRITE_COUNT: usize = 32;

/// Anything that can hand out the raw bytes of a ring buffer region: a
/// heap-allocated `Vec<u8>` for the cache tier, or a `memmap2::MmapMut` for
/// the disk tier. `RingBuffer` never copies the region; it only ever
/// borrows it for the duration of one operation.
pub trait RegionBytes {
    fn as_slice(&self) -> &[u8];
    fn as_mut_slice(&mut self) -> &mut [u8];
}

impl RegionBytes for Vec<u8> {
    fn as_slice(&self) -> &[u8] {
        self.as_ref()
    }
    fn as_mut_slice(&mut self) -> &mut [u8] {
        self.as_mut()
    }
}

impl RegionBytes for memmap2::MmapMut {
    fn as_slice(&self) -> &[u8] {
        &self[..]
    }
    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self[..]
    }
}

/// A fixed-capacity, byte-addressable FIFO laid out directly in a region of
/// memory: a 40-byte header followed by length-prefixed elements that never
/// wrap. Compaction happens only on a full drain (`read_count == write_count`
/// resets both positions to `HEADER_SIZE`).
pub struct RingBuffer<R: RegionBytes> {
    region: R,
}

impl<R: RegionBytes> RingBuffer<R> {
    /// Writes a fresh header into `region`: capacity set to the region's
    /// length, counts zeroed, positions at `HEADER_SIZE`.
    pub fn initialize(mut region: R) -> Result<Self> {
        if region.as_slice().len() < HEADER_SIZE {
            return Err(MqError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "region smaller than ring buffer header",
            )));
        }
        let capacity = region.as_slice().len() as u64;
        let buf = region.as_mut_slice();
        write_u64(buf, OFF_CAPACITY, capacity);
        write_u64(buf, OFF_READ_COUNT, 0);
        write_u64(buf, OFF_WRITE_COUNT, 0);
        write_u64(buf, OFF_READ_POS, HEADER_SIZE as u64);
        write_u64(buf, OFF_WRITE_POS, HEADER_SIZE as u64);
        Ok(Self { region })
    }

    /// Adopts an existing region whose header was already written (e.g. a
    /// backing file reopened after a restart). `capacity` is taken from the
    /// header, not from `region.len()`; callers are expected to have
    /// already checked the two agree.
    pub fn adopt(region: R) -> Self {
        Self { region }
    }

    pub fn capacity(&self) -> u64 {
        read_u64(self.region.as_slice(), OFF_CAPACITY)
    }

    pub fn read_pos(&self) -> u64 {
        read_u64(self.region.as_slice(), OFF_READ_POS)
    }

    pub fn write_pos(&self) -> u64 {
        read_u64(self.region.as_slice(), OFF_WRITE_POS)
    }

    pub fn read_count(&self) -> u64 {
        read_u64(self.region.as_slice(), OFF_READ_COUNT)
    }

    pub fn write_count(&self) -> u64 {
        read_u64(self.region.as_slice(), OFF_WRITE_COUNT)
    }

    /// Rewrites the capacity header in place. Used after a file remap grows
    /// the mapped region; every other header field already lives in the
    /// file and survives the remap untouched.
    pub fn set_capacity(&mut self, v: u64) {
        write_u64(self.region.as_mut_slice(), OFF_CAPACITY, v);
    }

    pub fn len(&self) -> u64 {
        self.write_count() - self.read_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn readable_bytes(&self) -> u64 {
        self.write_pos() - self.read_pos()
    }

    pub fn free_space(&self) -> u64 {
        self.capacity() - self.write_pos()
    }

    fn reset(&mut self) {
        let buf = self.region.as_mut_slice();
        write_u64(buf, OFF_READ_COUNT, 0);
        write_u64(buf, OFF_WRITE_COUNT, 0);
        write_u64(buf, OFF_READ_POS, HEADER_SIZE as u64);
        write_u64(buf, OFF_WRITE_POS, HEADER_SIZE as u64);
    }

    /// Appends one length-prefixed element. Never wraps: once `write_pos`
    /// would run past `capacity` the call fails with `NoSpace` and the
    /// caller (the composite queue) decides whether to spill.
    pub fn put(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_ELEMENT {
            return Err(MqError::PacketTooLarge);
        }
        let write_pos = self.write_pos();
        let capacity = self.capacity();
        if write_pos + PREFIX_SIZE as u64 + data.len() as u64 > capacity {
            return Err(MqError::NoSpace);
        }

        let new_write_count = self.write_count() + 1;
        let buf = self.region.as_mut_slice();
        let mut pos = write_pos as usize;
        buf[pos..pos + PREFIX_SIZE].copy_from_slice(&(data.len() as u16).to_le_bytes());
        pos += PREFIX_SIZE;
        buf[pos..pos + data.len()].copy_from_slice(data);
        pos += data.len();

        write_u64(buf, OFF_WRITE_POS, pos as u64);
        write_u64(buf, OFF_WRITE_COUNT, new_write_count);
        Ok(())
    }

    /// Pops the oldest element into `out_buf`, returning the number of
    /// bytes written. Callers must size `out_buf` at least `MAX_ELEMENT` to
    /// avoid truncation.
    pub fn get(&mut self, out_buf: &mut [u8]) -> Result<usize> {
        if self.is_empty() {
            return Err(MqError::Empty);
        }

        let read_pos = self.read_pos() as usize;
        let region = self.region.as_slice();
        let elem_len =
            u16::from_le_bytes([region[read_pos], region[read_pos + 1]]) as usize;
        let payload_start = read_pos + PREFIX_SIZE;
        let n = elem_len.min(out_buf.len());
        out_buf[..n].copy_from_slice(&region[payload_start..payload_start + n]);

        let new_read_count = self.read_count() + 1;
        if new_read_count == self.write_count() {
            self.reset();
        } else {
            let buf = self.region.as_mut_slice();
            write_u64(buf, OFF_READ_POS, (payload_start + elem_len) as u64);
            write_u64(buf, OFF_READ_COUNT, new_read_count);
        }
        Ok(n)
    }

    /// Bulk-transfers every live element into `other` as one contiguous
    /// copy, preserving element framing because both sides share the same
    /// length-prefixed layout and neither side wraps. `self` is left empty.
    pub fn write_to<O: RegionBytes>(&mut self, other: &mut RingBuffer<O>) -> Result<()> {
        let transfer_len = self.readable_bytes();
        if other.free_space() < transfer_len {
            return Err(MqError::NoSpace);
        }

        let read_pos = self.read_pos() as usize;
        let transferred_count = self.len();
        let other_write_pos = other.write_pos() as usize;

        let chunk = self.region.as_slice()[read_pos..read_pos + transfer_len as usize].to_vec();
        let new_other_write_count = other.write_count() + transferred_count;
        let other_buf = other.region.as_mut_slice();
        other_buf[other_write_pos..other_write_pos + chunk.len()].copy_from_slice(&chunk);

        write_u64(
            other_buf,
            OFF_WRITE_POS,
            other_write_pos as u64 + transfer_len,
        );
        write_u64(other_buf, OFF_WRITE_COUNT, new_other_write_count);

        self.reset();
        Ok(())
    }

    /// Consumes the ring buffer, handing back the underlying region (used
    /// by the composite queue when swapping in a freshly remapped file).
    pub fn into_region(self) -> R {
        self.region
    }

    pub fn region(&self) -> &R {
        &self.region
    }
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
}

fn write_u64(buf: &mut [u8], offset: usize, v: u64) {
    buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}
