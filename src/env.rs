//! Embedding seam between the driver core and the host OS.
//!
//! The PFE HIF engine runs in 32-bit physical address space and moves data
//! through buffers the host must map for it. Everything the driver needs
//! from the outside world — streaming DMA mappings, coherent ring memory,
//! DMA-capable pages, deferred work and poll scheduling — comes in through
//! [`HifEnv`]. The crate itself never touches an allocator or a scheduler
//! directly.

use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::fmt;
use core::ptr::NonNull;

use thiserror::Error;

/// Size of a DMA-capable page handed out by [`HifEnv::alloc_page`].
pub const PAGE_SIZE: usize = 4096;

/// Bus address as seen by the HIF DMA engine.
///
/// The engine only drives 32 address bits; the high word of every ring base
/// register is tied to zero.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct DmaAddr(u32);

impl DmaAddr {
	pub const fn new(addr: u32) -> Self {
		Self(addr)
	}

	pub const fn as_u32(self) -> u32 {
		self.0
	}

	pub const fn is_null(self) -> bool {
		self.0 == 0
	}

	/// Address of a buffer living `offset` bytes into this mapping.
	pub const fn offset(self, offset: usize) -> Self {
		Self(self.0 + offset as u32)
	}
}

impl fmt::Debug for DmaAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "DmaAddr({:#010x})", self.0)
	}
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
	#[error("DMA mapping failed")]
	MapFailed,
	#[error("out of DMA-capable memory")]
	NoMem,
}

/// Deferred work the driver hands back to the embedder.
///
/// The embedder must run these on an ordered, single-threaded queue per
/// [`Hif`](crate::hif::Hif) instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Work {
	/// Service the IHC client FIFOs (`HifChnl::ihc_service`).
	IhcService(u8),
	/// Drain the IHC TX FIFO onto the ring (`HifChnl::ihc_tx_work`).
	IhcTx(u8),
}

struct PageInner {
	mem: UnsafeCell<[u8; PAGE_SIZE]>,
	reserve: bool,
}

// The pool serialises all CPU-side access; the device side is reached only
// through explicit dma_sync calls.
unsafe impl Send for PageInner {}
unsafe impl Sync for PageInner {}

/// Refcounted, DMA-capable page.
///
/// Clones share the backing memory; the page is returned to the allocator
/// when the last handle is dropped. `ref_count()` mirrors the kernel's
/// `page_ref_count()` and drives the half-page recycling decision.
#[derive(Clone)]
pub struct Page {
	inner: Arc<PageInner>,
}

impl Page {
	/// Allocates a fresh zeroed page. `reserve` marks memory that came from
	/// a low-memory reserve and must never be recycled.
	pub fn new(reserve: bool) -> Self {
		Self {
			inner: Arc::new(PageInner {
				mem: UnsafeCell::new([0u8; PAGE_SIZE]),
				reserve,
			}),
		}
	}

	pub fn ref_count(&self) -> usize {
		Arc::strong_count(&self.inner)
	}

	pub fn is_reserve(&self) -> bool {
		self.inner.reserve
	}

	pub fn as_ptr(&self) -> *mut u8 {
		self.inner.mem.get().cast()
	}

	/// Read access to a region of the page.
	///
	/// # Safety
	///
	/// The region must not be concurrently written by the device; callers
	/// sync the mapping for the CPU first.
	pub unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
		debug_assert!(offset + len <= PAGE_SIZE);
		unsafe { core::slice::from_raw_parts(self.as_ptr().add(offset), len) }
	}

	/// Write into the page. This is the device side of the contract and is
	/// used by ring prefill and by tests playing the hardware role.
	///
	/// # Safety
	///
	/// The region must not be concurrently accessed by the CPU side.
	pub unsafe fn write(&self, offset: usize, data: &[u8]) {
		debug_assert!(offset + data.len() <= PAGE_SIZE);
		unsafe {
			core::ptr::copy_nonoverlapping(data.as_ptr(), self.as_ptr().add(offset), data.len());
		}
	}

	/// Do the two handles refer to the same page?
	pub fn ptr_eq(&self, other: &Page) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl fmt::Debug for Page {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Page")
			.field("addr", &self.inner.mem.get())
			.field("refs", &self.ref_count())
			.finish()
	}
}

/// Host services the driver core depends on.
///
/// Streaming mappings come in three flavours mirroring their users: whole
/// RX pages (device-to-host), linear TX heads (host-to-device) and TX page
/// fragments (host-to-device). The split keeps unmap bookkeeping checkable
/// in tests.
pub trait HifEnv: Send + Sync {
	/// Map a linear buffer for device read.
	fn map_single(&self, va: *const u8, len: usize) -> Result<DmaAddr, DmaError>;
	fn unmap_single(&self, pa: DmaAddr, len: usize);

	/// Map a whole page for device write.
	fn map_page(&self, page: &Page) -> Result<DmaAddr, DmaError>;
	fn unmap_page(&self, pa: DmaAddr);

	/// Map a fragment of a page for device read.
	fn map_frag(&self, page: &Page, offset: usize, len: usize) -> Result<DmaAddr, DmaError>;
	fn unmap_frag(&self, pa: DmaAddr, len: usize);

	fn sync_range_for_cpu(&self, pa: DmaAddr, offset: usize, len: usize);
	fn sync_range_for_device(&self, pa: DmaAddr, offset: usize, len: usize);

	/// Allocate DMA-coherent memory for a BD ring or write-back table.
	fn alloc_coherent(&self, len: usize, align: usize) -> Result<(NonNull<u8>, DmaAddr), DmaError>;

	/// Release memory obtained from [`alloc_coherent`](Self::alloc_coherent).
	///
	/// # Safety
	///
	/// `va`/`pa`/`len` must describe exactly one live coherent allocation.
	unsafe fn free_coherent(&self, va: NonNull<u8>, pa: DmaAddr, len: usize);

	/// Hand out a DMA-capable page for the RX pool.
	fn alloc_page(&self) -> Option<Page>;

	/// Accounting hook for the per-packet metadata allocation on the RX
	/// path. Returning `false` models allocation failure; the frame is
	/// dropped under the OOM policy.
	fn alloc_pkt(&self) -> bool {
		true
	}

	/// Queue deferred work. Ordered, single consumer per `Hif`.
	fn schedule(&self, work: Work);

	/// Request an invocation of `HifChnl::poll` for the given channel.
	fn kick_poll(&self, chnl: u8);

	fn cpu_count(&self) -> usize {
		1
	}

	/// IRQ affinity hint for a channel; best effort.
	fn set_irq_affinity(&self, _chnl: u8, _cpu: usize) {}

	/// System clock feeding the coalescing timer.
	fn sys_clk_hz(&self) -> u32;

	/// Busy wait used only by the HIF soft-reset poll loop.
	fn usleep(&self, us: u32) {
		for _ in 0..us {
			core::hint::spin_loop();
		}
	}
}

/// DMA-coherent allocation that frees itself through its environment.
pub struct CoherentBuffer {
	va: NonNull<u8>,
	pa: DmaAddr,
	len: usize,
	env: Arc<dyn HifEnv>,
}

// Coherent ring memory is shared with the device on purpose; CPU-side
// access goes through volatile operations only.
unsafe impl Send for CoherentBuffer {}
unsafe impl Sync for CoherentBuffer {}

impl CoherentBuffer {
	pub fn new(env: Arc<dyn HifEnv>, len: usize, align: usize) -> Result<Self, DmaError> {
		use align_address::Align;

		let (va, pa) = env.alloc_coherent(len, align)?;
		assert!(pa.as_u32().is_aligned_to(align as u32));
		unsafe {
			core::ptr::write_bytes(va.as_ptr(), 0, len);
		}
		Ok(Self { va, pa, len, env })
	}

	pub fn va(&self) -> NonNull<u8> {
		self.va
	}

	pub fn pa(&self) -> DmaAddr {
		self.pa
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn zero(&self) {
		unsafe {
			core::ptr::write_bytes(self.va.as_ptr(), 0, self.len);
		}
	}
}

impl Drop for CoherentBuffer {
	fn drop(&mut self) {
		unsafe {
			self.env.free_coherent(self.va, self.pa, self.len);
		}
	}
}

/// Hermetic environment for the test suites: linear "bus" address space,
/// counted mapping operations, fault injection and recorded work items.
#[cfg(test)]
pub(crate) use test_env::TestEnv;
