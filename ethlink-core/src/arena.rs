//! Fixed-capacity, multi-tenant shared buffer arena.
//!
//! The arena maps a single anonymous, shared memory region and partitions
//! it into [`SLOT_COUNT`] slots of [`SLOT_SIZE`] bytes each. Slots are
//! handed out to [`crate::Client`] tenants as [`Buffer`]s and reclaimed on
//! free; ownership is tracked per slot so cross-tenant frees and
//! double-frees can be detected.

use std::ops::{Deref, DerefMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use memmap2::MmapMut;
use more_asserts::assert_lt;
use parking_lot::Mutex;

use crate::descriptor::Descriptor;
use crate::metrics;

/// Number of slots the arena is partitioned into.
pub const SLOT_COUNT: u32 = 2048;

/// Size in bytes of a single slot.
pub const SLOT_SIZE: usize = 2048;

/// High 32 bits of every descriptor cookie, used to sanity-check
/// descriptors the driver hands back to us.
pub const COOKIE_MAGIC: u64 = 0x4242_0102;

const IO_SIZE: usize = SLOT_COUNT as usize * SLOT_SIZE;

/// Opaque identity of an arena tenant.
///
/// `ClientId`s are assigned sequentially as clients register with an
/// arena and are compared only for equality; the arena never dereferences
/// one back into a live `Client`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

/// A duplicable handle to the arena's shared memory region.
///
/// This wraps the memfd backing the mapping. `duplicate` is what gets
/// handed to an [`crate::EthernetDevice::set_io_buffer`] implementation so
/// the driver can map the same bytes into its own address space.
pub struct RegionHandle(OwnedFd);

impl RegionHandle {
    /// Duplicate the underlying descriptor, producing a new handle to the
    /// same shared memory.
    pub fn duplicate(&self) -> std::io::Result<RegionHandle> {
        let dup = self.0.try_clone()?;
        Ok(RegionHandle(dup))
    }

    /// Raw file descriptor of this handle, for callers that need to pass
    /// it across an FFI or RPC boundary directly.
    pub fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

/// The mapped shared memory backing an [`Arena`].
///
/// Slots are disjoint `SLOT_SIZE`-byte windows into this mapping; the
/// arena's descriptor-passing protocol is what keeps concurrent access to
/// a given slot race-free, not Rust's aliasing rules, so `Region` provides
/// raw, unchecked slot access and relies entirely on its callers in this
/// module to uphold that protocol.
struct Region {
    // Kept alive only to hold the mapping open; never accessed directly.
    _mmap: MmapMut,
    _fd: OwnedFd,
    base: *mut u8,
}

// SAFETY: `base` points into `_mmap`, whose backing pages are exclusively
// partitioned into per-slot windows by index. Concurrent access to
// disjoint slots from different threads is race-free by construction;
// concurrent access to the *same* slot is prevented by the
// descriptor-passing discipline described above, not by this impl, which
// only asserts that slot windows themselves don't alias.
#[allow(unsafe_code)]
unsafe impl Send for Region {}
#[allow(unsafe_code)]
unsafe impl Sync for Region {}

impl Region {
    fn create() -> std::io::Result<Self> {
        let name = c"ethlink-arena";
        // SAFETY: `name` is a valid, NUL-terminated pointer for the
        // duration of this call; no flags we need to validate.
        #[allow(unsafe_code)]
        let raw = unsafe { libc::memfd_create(name.as_ptr(), 0) };
        if raw < 0 {
            return Err(std::io::Error::last_os_error());
        }
        // SAFETY: `raw` was just returned by `memfd_create` above and is
        // not owned anywhere else yet.
        #[allow(unsafe_code)]
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: `fd` was just created by us and is a valid, open fd;
        // `ftruncate` on a fresh memfd to a fixed positive size cannot
        // alias or outlive anything else.
        #[allow(unsafe_code)]
        unsafe {
            if libc::ftruncate(fd.as_raw_fd(), IO_SIZE as libc::off_t) != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }

        // SAFETY: `MmapMut::map_mut` requires the fd to reference a file
        // of at least `IO_SIZE` bytes, which we just ensured via
        // `ftruncate`; the resulting mapping is exclusively owned here.
        #[allow(unsafe_code)]
        let mmap = unsafe { MmapMut::map_mut(fd.as_raw_fd())? };

        let base = mmap.as_ptr() as *mut u8;
        Ok(Region {
            _mmap: mmap,
            _fd: fd,
            base,
        })
    }

    fn handle(&self) -> std::io::Result<RegionHandle> {
        let dup = self._fd.try_clone()?;
        Ok(RegionHandle(dup))
    }

    /// Pointer to the start of slot `i`. Caller must ensure `i < SLOT_COUNT`.
    fn slot_ptr(&self, i: u32) -> *mut u8 {
        // SAFETY: callers only ever pass indices already validated against
        // `SLOT_COUNT` (see `assert_lt!` call sites in this module).
        #[allow(unsafe_code)]
        unsafe {
            self.base.add(i as usize * SLOT_SIZE)
        }
    }
}

/// A bounded view over the bytes of exactly one arena slot.
///
/// A `Buffer` is the only way user code touches arena-backed memory: it
/// carries the slot index and a shared handle to the mapped region rather
/// than a raw pointer, so slot identity is explicit instead of recovered
/// via pointer arithmetic.
pub struct Buffer {
    region: Arc<Region>,
    slot: u32,
    len: usize,
}

impl Buffer {
    /// Index of the slot this buffer is a view over.
    pub fn slot_index(&self) -> u32 {
        self.slot
    }

    /// Narrow (or widen, up to the slot's capacity) this buffer's visible
    /// length. A buffer's length may never exceed [`SLOT_SIZE`].
    pub fn set_len(&mut self, len: usize) {
        assert!(
            len <= SLOT_SIZE,
            "ethlink: buffer length {len} exceeds slot capacity {SLOT_SIZE}"
        );
        self.len = len;
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: `self.slot` was validated against `SLOT_COUNT` at
        // allocation/decode time and `self.len <= SLOT_SIZE` is maintained
        // by `set_len`; the descriptor-passing protocol guarantees no
        // other party touches this slot while we hold this `Buffer`.
        #[allow(unsafe_code)]
        unsafe {
            std::slice::from_raw_parts(self.region.slot_ptr(self.slot), self.len)
        }
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `Deref` impl above; `&mut self` additionally
        // guarantees no other `Buffer` view of this slot is live from
        // this side of the protocol.
        #[allow(unsafe_code)]
        unsafe {
            std::slice::from_raw_parts_mut(self.region.slot_ptr(self.slot), self.len)
        }
    }
}

struct ArenaState {
    free: Vec<u32>,
    owner: Vec<Option<ClientId>>,
}

/// A fixed-capacity, shared, partitioned byte region with a multi-tenant
/// slot allocator.
///
/// Slots are allocated LIFO and tracked per tenant.
pub struct Arena {
    region: Arc<Region>,
    state: Mutex<ArenaState>,
    next_client_id: AtomicU64,
}

impl Arena {
    /// Reserve and map a fresh [`SLOT_COUNT`] x [`SLOT_SIZE`] shared
    /// region, with every slot initially free.
    pub fn create() -> std::io::Result<Arena> {
        let region = Region::create()?;
        let owner = vec![None; SLOT_COUNT as usize];
        let free = (0..SLOT_COUNT).collect();

        tracing::info!(slot_count = SLOT_COUNT, slot_size = SLOT_SIZE, "arena created");
        metrics::arena_created(SLOT_COUNT);

        Ok(Arena {
            region: Arc::new(region),
            state: Mutex::new(ArenaState { free, owner }),
            next_client_id: AtomicU64::new(1),
        })
    }

    /// Register a new tenant, returning the opaque handle it must use for
    /// every subsequent `alloc`/`free` call.
    pub fn register_client(&self) -> ClientId {
        ClientId(self.next_client_id.fetch_add(1, Ordering::Relaxed))
    }

    /// A duplicable handle to the arena's shared memory, to be passed to a
    /// driver via `EthernetDevice::set_io_buffer`.
    pub fn region_handle(&self) -> std::io::Result<RegionHandle> {
        self.region.handle()
    }

    /// Allocate a free slot to `owner`, or `None` if the arena is
    /// exhausted. An empty free set is a soft failure, not fatal.
    pub fn alloc(&self, owner: ClientId) -> Option<Buffer> {
        let mut state = self.state.lock();
        let i = state.free.pop()?;
        assert!(
            state.owner[i as usize].is_none(),
            "ethlink: arena free list slot {i} is not actually free"
        );
        state.owner[i as usize] = Some(owner);
        drop(state);

        metrics::arena_alloc();
        Some(Buffer {
            region: self.region.clone(),
            slot: i,
            len: SLOT_SIZE,
        })
    }

    /// Slot index of a buffer, derived from the identity carried on the
    /// buffer itself (not pointer arithmetic).
    pub fn index(&self, b: &Buffer) -> u32 {
        b.slot
    }

    /// Return a slot to the free set. Fatal if `owner` does not match the
    /// slot's recorded owner (cross-tenant free or double-free).
    pub fn free(&self, owner: ClientId, b: Buffer) {
        let i = b.slot;
        let mut state = self.state.lock();
        let recorded = state.owner[i as usize];
        assert_eq!(
            recorded,
            Some(owner),
            "ethlink: arena slot {i} freed by non-owner (owner: {recorded:?}, caller: {owner:?})"
        );
        state.owner[i as usize] = None;
        state.free.push(i);
        drop(state);

        metrics::arena_free();
    }

    /// Reclaim every slot owned by `owner`. Used at client close.
    pub fn free_all(&self, owner: ClientId) {
        let mut state = self.state.lock();
        let mut reclaimed = 0u32;
        for i in 0..SLOT_COUNT {
            if state.owner[i as usize] == Some(owner) {
                state.owner[i as usize] = None;
                state.free.push(i);
                reclaimed += 1;
            }
        }
        drop(state);
        tracing::debug!(reclaimed, "arena reclaimed slots for closed client");
    }

    /// Encode a buffer as the descriptor the driver expects on the wire.
    pub fn encode(&self, b: &Buffer) -> Descriptor {
        Descriptor {
            offset: b.slot * SLOT_SIZE as u32,
            length: b.len as u16,
            reserved: 0,
            cookie: (COOKIE_MAGIC << 32) | b.slot as u64,
        }
    }

    /// Decode a descriptor the driver handed back, producing the `Buffer`
    /// it refers to. Fatal if the cookie magic is wrong, the slot index is
    /// out of range, or the slot is currently free (the driver returned a
    /// descriptor for a slot nobody owns).
    pub fn decode(&self, d: Descriptor) -> Buffer {
        let magic = d.cookie >> 32;
        assert_eq!(
            magic, COOKIE_MAGIC,
            "ethlink: descriptor has bad cookie magic: {magic:#x}"
        );
        let i = (d.cookie & 0xFFFF_FFFF) as u32;
        assert_lt!(i, SLOT_COUNT);

        let state = self.state.lock();
        let owned = state.owner[i as usize].is_some();
        drop(state);
        assert!(owned, "ethlink: descriptor slot {i} is on the free list");

        Buffer {
            region: self.region.clone(),
            slot: i,
            len: d.length as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_exhausts_and_recovers() {
        let arena = Arena::create().unwrap();
        let c = arena.register_client();

        let mut bufs = Vec::new();
        for _ in 0..SLOT_COUNT {
            bufs.push(arena.alloc(c).expect("slot available"));
        }
        assert!(arena.alloc(c).is_none(), "arena should be exhausted");

        let b = bufs.pop().unwrap();
        arena.free(c, b);
        assert!(arena.alloc(c).is_some(), "freed slot should be reusable");
    }

    #[test]
    fn encode_decode_round_trip() {
        let arena = Arena::create().unwrap();
        let c = arena.register_client();
        let mut b = arena.alloc(c).unwrap();
        b.set_len(64);
        let idx = arena.index(&b);

        let d = arena.encode(&b);
        assert_eq!(d.offset, idx * SLOT_SIZE as u32);
        assert_eq!(d.length, 64);

        let decoded = arena.decode(d);
        assert_eq!(arena.index(&decoded), idx);
        assert_eq!(decoded.len(), 64);
    }

    #[test]
    fn free_all_reclaims_only_owned_slots() {
        let arena = Arena::create().unwrap();
        let a = arena.register_client();
        let b_owner = arena.register_client();

        let a_bufs: Vec<_> = (0..5).map(|_| arena.alloc(a).unwrap()).collect();
        let b_buf = arena.alloc(b_owner).unwrap();

        drop(a_bufs); // leak-by-forgetting ownership bookkeeping, not memory
        arena.free_all(a);

        // b's slot must still be owned and not reappear in the free set.
        let before = arena.state.lock().free.len();
        arena.free(b_owner, b_buf);
        let after = arena.state.lock().free.len();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn foreign_free_is_fatal() {
        let arena = Arena::create().unwrap();
        let a = arena.register_client();
        let b_owner = arena.register_client();
        let buf = arena.alloc(a).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            arena.free(b_owner, buf);
        }));
        assert!(result.is_err(), "freeing another tenant's buffer must panic");
    }

    #[test]
    fn bad_cookie_magic_is_fatal() {
        let arena = Arena::create().unwrap();
        let bogus = Descriptor {
            offset: 0,
            length: 0,
            reserved: 0,
            cookie: (0xdead_beef_u64 << 32) | 0,
        };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            arena.decode(bogus);
        }));
        assert!(result.is_err(), "bad cookie magic must panic");
    }

    #[test]
    fn decode_of_free_slot_is_fatal() {
        let arena = Arena::create().unwrap();
        let c = arena.register_client();
        let buf = arena.alloc(c).unwrap();
        let d = arena.encode(&buf);
        arena.free(c, buf);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            arena.decode(d);
        }));
        assert!(result.is_err(), "decoding a free slot's descriptor must panic");
    }
}
