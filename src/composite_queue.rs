use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::{MqError, Result};
use crate::ring_buffer::RingBuffer;

/// Immutable configuration a `CompositeQueue` is opened with.
#[derive(Debug, Clone)]
pub struct QueueOption {
    pub name: String,
    pub backing_path: PathBuf,
    pub file_block_unit: u64,
    pub cache_size: u64,
}

/// A named pair of ring buffers: a heap-resident cache tier fronting a
/// file-mapped disk tier. `state` holds everything that must move in
/// lockstep under one mutex so that the mmap handle is never touched
/// outside the lock (a grow-remap swaps it out from under any concurrent
/// reader/writer otherwise).
pub struct CompositeQueue {
    option: QueueOption,
    state: Mutex<State>,
}

struct State {
    cache: RingBuffer<Vec<u8>>,
    disk: RingBuffer<memmap2::MmapMut>,
    file: File,
    spilled: bool,
    deleted: bool,
    /// Consumers parked in `BRPOP`, FIFO. A producer's hand-off always
    /// wakes the front of this queue.
    waiters: VecDeque<oneshot::Sender<Vec<u8>>>,
}

impl CompositeQueue {
    /// Opens (or creates) the backing file and allocates the cache tier.
    /// A freshly created file is truncated to `file_block_unit` bytes and
    /// initialized; an existing, non-empty file is adopted and the queue
    /// starts in the spilled state, since whatever the disk tier holds
    /// predates anything the cache tier could have.
    pub fn open(option: QueueOption) -> Result<Self> {
        let cache = RingBuffer::initialize(vec![0u8; option.cache_size as usize])?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&option.backing_path)?;
        let existing_len = file.metadata()?.len();

        let newly_created = existing_len == 0;
        if newly_created {
            file.set_len(option.file_block_unit)?;
        }

        let mmap = unsafe { memmap2::MmapMut::map_mut(&file)? };
        let (disk, spilled) = if newly_created {
            (RingBuffer::initialize(mmap)?, false)
        } else {
            let disk = RingBuffer::adopt(mmap);
            if disk.capacity() != existing_len {
                return Err(MqError::CorruptBackingFile(format!(
                    "{}: header capacity {} != file size {}",
                    option.backing_path.display(),
                    disk.capacity(),
                    existing_len
                )));
            }
            (disk, true)
        };

        Ok(Self {
            option,
            state: Mutex::new(State {
                cache,
                disk,
                file,
                spilled,
                deleted: false,
                waiters: VecDeque::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.option.name
    }

    pub fn backing_path(&self) -> &Path {
        &self.option.backing_path
    }

    /// Parks the caller as a `BRPOP` waiter and returns a receiver that
    /// resolves the moment a producer hands a payload directly to it. Must
    /// be called only after a non-blocking `get()` has already returned
    /// `Empty` under the same lock acquisition, or a producer's hand-off
    /// between the two calls would be missed.
    fn park(state: &mut State) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        rx
    }

    /// Non-blocking get-or-park: returns `Ok(n)` immediately on a hit,
    /// `Err(Empty)` plus a receiver to await otherwise. Both checks happen
    /// under one lock acquisition so no hand-off can be lost between them.
    pub fn get_or_park(&self, out_buf: &mut [u8]) -> (Result<usize>, Option<oneshot::Receiver<Vec<u8>>>) {
        let mut state = self.state.lock().unwrap();
        match Self::get_locked(&mut state, out_buf) {
            Ok(n) => (Ok(n), None),
            Err(MqError::Empty) => {
                let rx = Self::park(&mut state);
                (Err(MqError::Empty), Some(rx))
            }
            Err(e) => (Err(e), None),
        }
    }

    pub fn put(&self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.deleted {
            return Err(MqError::NoSpace);
        }

        // Hand-off fast path: only valid while nothing older is parked in
        // the disk tier. A parked waiter is then, by construction, the
        // oldest outstanding consumer, so handing it the payload directly
        // preserves FIFO order without ever touching either tier.
        if !state.spilled {
            while let Some(waiter) = state.waiters.pop_front() {
                match waiter.send(data.to_vec()) {
                    Ok(()) => return Ok(()),
                    // Receiver already dropped (BRPOP timed out); try the
                    // next parked waiter instead of falling through to
                    // storage on the first stale one.
                    Err(_) => continue,
                }
            }
        }

        match state.cache.put(data) {
            Ok(()) => Ok(()),
            Err(MqError::NoSpace) => {
                Self::transfer_to_disk(&mut state, &self.option)?;
                state.cache.put(data)
            }
            Err(e) => Err(e),
        }
    }

    fn get_locked(state: &mut State, out_buf: &mut [u8]) -> Result<usize> {
        if state.deleted {
            return Err(MqError::Empty);
        }
        if state.spilled {
            match state.disk.get(out_buf) {
                Err(MqError::Empty) => {
                    state.spilled = false;
                    state.cache.get(out_buf)
                }
                other => other,
            }
        } else {
            state.cache.get(out_buf)
        }
    }

    pub fn get(&self, out_buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        Self::get_locked(&mut state, out_buf)
    }

    /// Grows the disk tier in `file_block_unit` quanta if needed, then
    /// bulk-copies the cache tier's live bytes into it. Grow is
    /// truncate-then-remap: the on-file header already tracks read/write
    /// positions, so only the in-memory capacity field needs rewriting
    /// after the remap.
    fn transfer_to_disk(state: &mut State, option: &QueueOption) -> Result<()> {
        if state.disk.free_space() < state.cache.readable_bytes() {
            let new_size = state.disk.capacity() + option.file_block_unit;
            state.file.sync_all()?;
            state.file.set_len(new_size)?;

            let mmap = unsafe { memmap2::MmapMut::map_mut(&state.file)? };
            let mut disk = RingBuffer::adopt(mmap);
            disk.set_capacity(new_size);
            state.disk = disk;
        }

        state.cache.write_to(&mut state.disk)?;
        state.spilled = true;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        let state = self.state.lock().unwrap();
        if state.deleted {
            return 0;
        }
        state.cache.len() + if state.spilled { state.disk.len() } else { 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn close_sink(state: &mut State, option: &QueueOption) -> Result<()> {
        if let Err(e) = Self::transfer_to_disk(state, option) {
            log::error!("failed to spill queue {} before close: {}", option.name, e);
        }
        state.disk.region().flush()?;
        Ok(())
    }

    /// Final spill, flush, and close. The backing file is left on disk so
    /// a later `Load()` can adopt it.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::close_sink(&mut state, &self.option)
    }

    /// Close plus remove the backing file; all further operations fail
    /// cleanly with `Empty`/`NoSpace` rather than touching a stale mapping.
    pub fn delete(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Err(e) = Self::close_sink(&mut state, &self.option) {
            log::error!("failed to close queue {} before delete: {}", self.option.name, e);
        }
        std::fs::remove_file(&self.option.backing_path)?;
        state.deleted = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn opt(dir: &Path, name: &str, cache_size: u64, block_unit: u64) -> QueueOption {
        QueueOption {
            name: name.to_string(),
            backing_path: dir.join(format!("{name}.mq")),
            file_block_unit: block_unit,
            cache_size,
        }
    }

    #[test]
    fn put_get_round_trip() {
        let dir = tempdir().unwrap();
        let q = CompositeQueue::open(opt(dir.path(), "q1", 4096, 4096)).unwrap();
        q.put(b"hello").unwrap();
        let mut buf = [0u8; crate::ring_buffer::MAX_ELEMENT];
        let n = q.get(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert!(matches!(q.get(&mut buf), Err(MqError::Empty)));
    }

    #[test]
    fn spill_preserves_fifo_order() {
        let dir = tempdir().unwrap();
        // Each element costs 2 (prefix) + 62 = 64 bytes; a 128-byte cache
        // fits exactly two before the third forces a spill.
        let q = CompositeQueue::open(opt(dir.path(), "q2", 128, 4096)).unwrap();
        let elems: Vec<Vec<u8>> = (0..3).map(|i| vec![b'x' + i as u8; 62]).collect();
        for e in &elems {
            q.put(e).unwrap();
        }
        assert_eq!(q.len(), 3);

        let mut buf = [0u8; crate::ring_buffer::MAX_ELEMENT];
        for e in &elems {
            let n = q.get(&mut buf).unwrap();
            assert_eq!(&buf[..n], e.as_slice());
        }
        assert!(matches!(q.get(&mut buf), Err(MqError::Empty)));
    }

    #[test]
    fn disk_tier_grows_without_losing_data() {
        let dir = tempdir().unwrap();
        let q = CompositeQueue::open(opt(dir.path(), "q3", 256, 512)).unwrap();
        let payload = vec![7u8; 100];
        let mut pushed = 0;
        for _ in 0..50 {
            q.put(&payload).unwrap();
            pushed += 1;
        }
        assert_eq!(q.len(), pushed);

        let mut buf = [0u8; crate::ring_buffer::MAX_ELEMENT];
        for _ in 0..pushed {
            let n = q.get(&mut buf).unwrap();
            assert_eq!(&buf[..n], payload.as_slice());
        }
        assert!(matches!(q.get(&mut buf), Err(MqError::Empty)));
    }

    #[test]
    fn close_then_reopen_preserves_live_elements() {
        let dir = tempdir().unwrap();
        let o = opt(dir.path(), "q4", 256, 512);
        {
            let q = CompositeQueue::open(o.clone()).unwrap();
            q.put(b"one").unwrap();
            q.put(b"two").unwrap();
            q.put(b"three").unwrap();
            q.close().unwrap();
        }

        let q = CompositeQueue::open(o).unwrap();
        assert_eq!(q.len(), 3);
        let mut buf = [0u8; crate::ring_buffer::MAX_ELEMENT];
        for expected in [&b"one"[..], &b"two"[..], &b"three"[..]] {
            let n = q.get(&mut buf).unwrap();
            assert_eq!(&buf[..n], expected);
        }
    }

    #[test]
    fn delete_removes_backing_file_and_future_ops_fail_clean() {
        let dir = tempdir().unwrap();
        let o = opt(dir.path(), "q5", 256, 512);
        let q = CompositeQueue::open(o.clone()).unwrap();
        q.put(b"x").unwrap();
        q.delete().unwrap();

        assert!(!o.backing_path.exists());
        let mut buf = [0u8; crate::ring_buffer::MAX_ELEMENT];
        assert!(matches!(q.get(&mut buf), Err(MqError::Empty)));
        assert!(matches!(q.put(b"y"), Err(MqError::NoSpace)));
        assert_eq!(q.len(), 0);
    }

    #[tokio::test]
    async fn hand_off_delivers_to_parked_waiter_without_storing() {
        let dir = tempdir().unwrap();
        let q = std::sync::Arc::new(CompositeQueue::open(opt(dir.path(), "q6", 4096, 4096)).unwrap());

        let mut buf = [0u8; crate::ring_buffer::MAX_ELEMENT];
        let (result, rx) = q.get_or_park(&mut buf);
        assert!(matches!(result, Err(MqError::Empty)));
        let rx = rx.unwrap();

        q.put(b"direct").unwrap();
        let payload = rx.await.unwrap();
        assert_eq!(payload, b"direct");
        assert_eq!(q.len(), 0);
    }
}
