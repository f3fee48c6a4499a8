//! Host-side buffer manager (bman) for one HIF channel.
//!
//! The RX pool posts half-page buffers to the RX BD ring and rebuilds
//! frames from completed descriptors. Pages are recycled: a page whose
//! only reference is the pool's gets its offset toggled to the other
//! half and re-enters the pool at `alloc_idx` without another trip to
//! the allocator, keeping its DMA mapping alive.
//!
//! The TX pool is the tracker behind the TX BD ring: one entry per
//! descriptor recording the DMA mapping to undo at confirm time, the
//! owning packet on the frame's head slot, and whether the frame is
//! normal traffic or IHC.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::config::{BMAN_REFILL_THR, RXB_DMA_SIZE, RXB_PAD, RXB_TRUESIZE};
use crate::ct::HIF_HDR_SIZE;
use crate::env::{DmaAddr, HifEnv, Page};
use crate::hif::csr::HifCsr;
use crate::hif::ring::BdRing;
use crate::pkt::{PageSlice, RxPacket, TxPkt};

#[derive(Debug, Default)]
struct RxMapEntry {
	dma: DmaAddr,
	page: Option<Page>,
	page_offset: u32,
}

/// RX page pool; exclusive to the channel poll loop.
pub struct RxPool {
	tbl: Box<[RxMapEntry]>,
	rd_idx: u32,
	wr_idx: u32,
	/// Where the next recycled page lands. Runs ahead of `wr_idx`
	/// between refills so recycled pages wait in the slots a future
	/// refill will publish.
	alloc_idx: u32,
	mask: u32,
	depth: u32,
	/// Frame under assembly across poll invocations.
	pkt: Option<RxPacket>,
}

impl RxPool {
	pub fn new(depth: usize) -> Self {
		assert!(depth.is_power_of_two());
		let mut tbl = Vec::with_capacity(depth);
		tbl.resize_with(depth, RxMapEntry::default);
		Self {
			tbl: tbl.into_boxed_slice(),
			rd_idx: 0,
			wr_idx: 0,
			alloc_idx: 0,
			mask: depth as u32 - 1,
			depth: depth as u32,
			pkt: None,
		}
	}

	fn slot(&self, idx: u32) -> usize {
		(idx & self.mask) as usize
	}

	/// Pool slots without a published buffer.
	pub fn unused(&self) -> u32 {
		self.depth - self.wr_idx.wrapping_sub(self.rd_idx) - 1
	}

	fn alloc_and_map(env: &dyn HifEnv, entry: &mut RxMapEntry) -> bool {
		let Some(page) = env.alloc_page() else {
			return false;
		};
		let Ok(dma) = env.map_page(&page) else {
			return false;
		};
		entry.dma = dma;
		entry.page = Some(page);
		entry.page_offset = RXB_PAD as u32;
		true
	}

	/// Publish up to `count` buffers to the ring, allocating pages for
	/// slots that hold none. Stops at the first failure. Returns the
	/// number published.
	pub fn refill(&mut self, env: &dyn HifEnv, ring: &BdRing, count: u32) -> u32 {
		let mut filled = 0;
		for _ in 0..count {
			let i = self.slot(self.wr_idx);
			let entry = &mut self.tbl[i];
			if entry.page.is_none() && !Self::alloc_and_map(env, entry) {
				error!("rx buffer allocation error");
				break;
			}
			let buf_pa = entry.dma.offset(entry.page_offset as usize);
			if ring.enqueue(buf_pa, RXB_DMA_SIZE as u32, false).is_err() {
				break;
			}
			self.wr_idx = self.wr_idx.wrapping_add(1);
			filled += 1;
		}
		self.alloc_idx = self.wr_idx;
		filled
	}

	/// Pre-fill at channel open: feed the ring until it stops accepting.
	pub fn fill(&mut self, env: &dyn HifEnv, ring: &BdRing) -> u32 {
		let mut cnt = 0;
		while ring.can_accept() {
			if self.refill(env, ring, 1) == 0 {
				break;
			}
			cnt += 1;
		}
		cnt
	}

	/// Recycle-or-release decision for the consumed buffer at `rd_idx`.
	/// Returns the page handle the packet will own plus the buffer
	/// offset inside it.
	fn put_rx_buff(&mut self, env: &dyn HifEnv, size: u32) -> (Page, u32) {
		let i = self.slot(self.rd_idx);
		let dma = self.tbl[i].dma;
		let offset = self.tbl[i].page_offset;
		let page = self.tbl[i].page.take().expect("consumed slot without page");

		if !page.is_reserve() && page.ref_count() == 1 {
			// The stack no longer holds the other half: flip to it, keep
			// the mapping, and park the page where a refill will pick it
			// up without the allocator.
			let pkt_page = page.clone();
			let new_offset = offset ^ RXB_TRUESIZE as u32;
			env.sync_range_for_device(dma, new_offset as usize, size as usize);

			let j = self.slot(self.alloc_idx);
			if let Some(_stale) = self.tbl[j].page.take() {
				env.unmap_page(self.tbl[j].dma);
			}
			self.tbl[j] = RxMapEntry {
				dma,
				page: Some(page),
				page_offset: new_offset,
			};
			self.alloc_idx = self.alloc_idx.wrapping_add(1);

			(pkt_page, offset)
		} else {
			env.unmap_page(dma);
			self.tbl[i].dma = DmaAddr::default();
			self.tbl[i].page_offset = 0;
			(page, offset)
		}
	}

	/// First descriptor of a frame: wrap the buffer into a packet head.
	/// `None` models per-packet allocation failure; the buffer is
	/// released and the consumer index advanced so the pool stays in
	/// sync with the BD ring.
	fn map_buff_to_pkt(&mut self, env: &dyn HifEnv, rx_len: u32) -> Option<RxPacket> {
		let i = self.slot(self.rd_idx);
		env.sync_range_for_cpu(self.tbl[i].dma, self.tbl[i].page_offset as usize, rx_len as usize);

		if !env.alloc_pkt() {
			let entry = &mut self.tbl[i];
			env.unmap_page(entry.dma);
			entry.page = None;
			entry.dma = DmaAddr::default();
			entry.page_offset = 0;
			self.rd_idx = self.rd_idx.wrapping_add(1);
			return None;
		}

		let (page, offset) = self.put_rx_buff(env, rx_len);
		self.rd_idx = self.rd_idx.wrapping_add(1);
		Some(RxPacket::new(PageSlice::new(page, offset as usize, rx_len as usize)))
	}

	/// Follow-up descriptor of a fragmented frame: append as a page frag.
	fn add_buff_to_pkt(&mut self, env: &dyn HifEnv, rx_len: u32) {
		let i = self.slot(self.rd_idx);
		env.sync_range_for_cpu(self.tbl[i].dma, self.tbl[i].page_offset as usize, rx_len as usize);

		let (page, offset) = self.put_rx_buff(env, rx_len);
		self.rd_idx = self.rd_idx.wrapping_add(1);
		let pkt = self.pkt.as_mut().expect("fragment without frame head");
		pkt.add_frag(PageSlice::new(page, offset as usize, rx_len as usize));
	}

	/// Consume one complete frame from the ring, refilling first when
	/// enough slots have drained.
	pub fn receive_pkt(
		&mut self,
		env: &dyn HifEnv,
		ring: &BdRing,
		csr: &HifCsr,
		chnl_id: u8,
	) -> Option<RxPacket> {
		if self.unused() >= BMAN_REFILL_THR {
			self.refill(env, ring, BMAN_REFILL_THR);
			csr.rx_dma_start(chnl_id);
		}

		loop {
			let bd = ring.dequeue_rx()?;

			if self.pkt.is_none() {
				match self.map_buff_to_pkt(env, bd.len) {
					Some(pkt) => self.pkt = Some(pkt),
					None => {
						error!("rx packet mapping failed, frame dropped");
						return None;
					}
				}
			} else {
				self.add_buff_to_pkt(env, bd.len);
			}

			if bd.lifm {
				break;
			}
		}

		self.pkt.take()
	}

	/// Release every page still owned by the pool.
	pub fn destroy(&mut self, env: &dyn HifEnv) {
		for entry in &mut self.tbl {
			if entry.page.take().is_some() {
				env.unmap_page(entry.dma);
			}
			entry.dma = DmaAddr::default();
			entry.page_offset = 0;
		}
		self.rd_idx = 0;
		self.wr_idx = 0;
		self.alloc_idx = 0;
		self.pkt = None;
	}

	/// Forget ring positions but keep mapped pages; the following refill
	/// republishes them (resume path).
	pub fn reset(&mut self) {
		self.rd_idx = 0;
		self.wr_idx = 0;
		self.alloc_idx = 0;
		self.pkt = None;
	}

	#[cfg(test)]
	pub(crate) fn page_at(&self, idx: u32) -> Option<&Page> {
		self.tbl[self.slot(idx)].page.as_ref()
	}

	#[cfg(test)]
	pub(crate) fn offset_at(&self, idx: u32) -> u32 {
		self.tbl[self.slot(idx)].page_offset
	}

	#[cfg(test)]
	pub(crate) fn alloc_idx(&self) -> u32 {
		self.alloc_idx
	}
}

/// Frame class recorded per tracker entry; decides the confirm path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxMapKind {
	#[default]
	Normal,
	Ihc,
}

#[derive(Debug, Default)]
struct TxMapEntry {
	pa: DmaAddr,
	size: u32,
	owner: Option<TxPkt>,
	kind: TxMapKind,
}

/// TX tracker pool, indexed with the same mask as the TX BD ring.
///
/// Single-producer/single-consumer discipline: enqueue paths (serialised
/// by the channel TX lock when shared) own the slots at and past
/// `wr_idx`; the confirm drain in the poll loop is the only reader of
/// `rd_idx`. The index atomics publish entry writes between the two.
pub struct TxPool {
	tbl: Box<[UnsafeCell<TxMapEntry>]>,
	rd_idx: AtomicU32,
	wr_idx: AtomicU32,
	mask: u32,
	depth: u32,
}

// SPSC: entry access is partitioned by the rd/wr indices.
unsafe impl Send for TxPool {}
unsafe impl Sync for TxPool {}

impl TxPool {
	pub fn new(depth: usize) -> Self {
		assert!(depth.is_power_of_two());
		let mut tbl = Vec::with_capacity(depth);
		tbl.resize_with(depth, || UnsafeCell::new(TxMapEntry::default()));
		Self {
			tbl: tbl.into_boxed_slice(),
			rd_idx: AtomicU32::new(0),
			wr_idx: AtomicU32::new(0),
			mask: depth as u32 - 1,
			depth: depth as u32,
		}
	}

	/// Free TX descriptors, one reserved.
	pub fn unused(&self) -> u32 {
		let wr = self.wr_idx.load(Ordering::Relaxed);
		let rd = self.rd_idx.load(Ordering::Acquire);
		self.depth - wr.wrapping_sub(rd) - 1
	}

	fn entry(&self, idx: u32) -> *mut TxMapEntry {
		self.tbl[(idx & self.mask) as usize].get()
	}

	/// Record the mapping for slot `wr_idx + i`. Producer side; the
	/// entry is not visible to the consumer until `update_wr_idx`.
	pub fn put_map_frag(
		&self,
		i: u32,
		pa: DmaAddr,
		size: u32,
		owner: Option<TxPkt>,
		kind: TxMapKind,
	) {
		let idx = self.wr_idx.load(Ordering::Relaxed).wrapping_add(i);
		let entry = unsafe { &mut *self.entry(idx) };
		entry.pa = pa;
		entry.size = size;
		entry.owner = owner;
		entry.kind = kind;
	}

	/// Publish `count` freshly written entries to the confirm side.
	pub fn update_wr_idx(&self, count: u32) {
		let wr = self.wr_idx.load(Ordering::Relaxed);
		self.wr_idx.store(wr.wrapping_add(count), Ordering::Release);
	}

	/// Roll back a partially mapped frame: fragment slots `count..1`,
	/// then the linear head at `wr_idx`. Returns the owner packet so the
	/// caller can drop it. Producer side only; `wr_idx` never moved.
	pub fn unroll_map_full(&self, env: &dyn HifEnv, count: u32) -> Option<TxPkt> {
		let wr = self.wr_idx.load(Ordering::Relaxed);

		let mut i = count;
		while i > 0 {
			let entry = unsafe { &mut *self.entry(wr.wrapping_add(i)) };
			env.unmap_frag(entry.pa, entry.size as usize);
			entry.size = 0;
			entry.pa = DmaAddr::default();
			i -= 1;
		}

		let entry = unsafe { &mut *self.entry(wr) };
		env.unmap_single(entry.pa, entry.size as usize);
		entry.size = 0;
		entry.pa = DmaAddr::default();
		entry.owner.take()
	}

	/// Frame class at the confirm cursor. Consumer side.
	pub fn peek_kind(&self) -> TxMapKind {
		let rd = self.rd_idx.load(Ordering::Relaxed);
		unsafe { (*self.entry(rd)).kind }
	}

	/// Copy of the confirmed IHC frame's payload, TX header stripped.
	/// Consumer side; must precede `free_map_full`.
	pub fn ihc_txconf_payload(&self) -> Option<Vec<u8>> {
		let rd = self.rd_idx.load(Ordering::Relaxed);
		let entry = unsafe { &*self.entry(rd) };
		let owner = entry.owner.as_ref()?;
		Some(owner.head()[HIF_HDR_SIZE..].to_vec())
	}

	/// Release one confirmed frame: unmap the linear head and every
	/// fragment, advance past all of them, hand the owner back. Consumer
	/// side.
	pub fn free_map_full(&self, env: &dyn HifEnv) -> Option<TxPkt> {
		let mut rd = self.rd_idx.load(Ordering::Relaxed);

		let head = unsafe { &mut *self.entry(rd) };
		let owner = head.owner.take()?;
		let nfrags = owner.nfrags() as u32;

		env.unmap_single(head.pa, head.size as usize);
		head.size = 0;
		head.pa = DmaAddr::default();
		head.kind = TxMapKind::Normal;
		rd = rd.wrapping_add(1);

		for _ in 0..nfrags {
			let entry = unsafe { &mut *self.entry(rd) };
			env.unmap_frag(entry.pa, entry.size as usize);
			entry.size = 0;
			entry.pa = DmaAddr::default();
			rd = rd.wrapping_add(1);
		}

		self.rd_idx.store(rd, Ordering::Release);
		Some(owner)
	}

	/// Drop every outstanding frame (resume after an engine reset).
	pub fn purge(&self, env: &dyn HifEnv) {
		while self.rd_idx.load(Ordering::Relaxed) != self.wr_idx.load(Ordering::Relaxed) {
			if self.free_map_full(env).is_none() {
				// Tracker out of step; nothing sane left to release.
				break;
			}
		}
		self.rd_idx.store(0, Ordering::Release);
		self.wr_idx.store(0, Ordering::Release);
	}

	pub fn rd_idx(&self) -> u32 {
		self.rd_idx.load(Ordering::Relaxed)
	}

	pub fn wr_idx(&self) -> u32 {
		self.wr_idx.load(Ordering::Relaxed)
	}

	#[cfg(test)]
	pub(crate) fn entry_size(&self, idx: u32) -> u32 {
		unsafe { (*self.entry(idx)).size }
	}

	#[cfg(test)]
	pub(crate) fn owner_at(&self, idx: u32) -> bool {
		unsafe { (*self.entry(idx)).owner.is_some() }
	}
}

#[cfg(test)]
mod tests {
	use alloc::sync::Arc;

	use super::*;
	use crate::env::TestEnv;
	use crate::hif::csr::fake::FakeCsr;

	fn setup(depth: usize) -> (Arc<TestEnv>, BdRing, RxPool, FakeCsr) {
		let env = TestEnv::new();
		let dyn_env: Arc<dyn HifEnv> = env.clone();
		let ring = BdRing::new(&dyn_env, depth).unwrap();
		let pool = RxPool::new(depth);
		(env, ring, pool, FakeCsr::new())
	}

	fn ctr(c: &core::sync::atomic::AtomicUsize) -> usize {
		c.load(Ordering::Relaxed)
	}

	#[test]
	fn refill_allocates_and_publishes() {
		let (env, ring, mut pool, _fake) = setup(16);
		let filled = pool.refill(&*env, &ring, 4);
		assert_eq!(filled, 4);
		assert_eq!(ctr(&env.counters.pages_allocated), 4);
		assert_eq!(ring.wr_idx(), 4);
		// Buffers leave headroom for the stack.
		for i in 0..4 {
			assert_eq!(pool.offset_at(i), RXB_PAD as u32);
		}
	}

	#[test]
	fn refill_stops_on_allocation_failure() {
		let (env, ring, mut pool, _fake) = setup(16);
		env.page_budget.store(2, Ordering::Relaxed);
		assert_eq!(pool.refill(&*env, &ring, 4), 2);
		assert_eq!(ring.wr_idx(), 2);
	}

	#[test]
	fn fill_feeds_ring_to_capacity() {
		let (env, ring, mut pool, _fake) = setup(8);
		assert_eq!(pool.fill(&*env, &ring), 7);
		assert!(!ring.can_accept());
	}

	fn receive_one(
		env: &Arc<TestEnv>,
		ring: &BdRing,
		pool: &mut RxPool,
		fake: &FakeCsr,
		hw_idx: u32,
		len: u32,
	) -> Option<RxPacket> {
		ring.hw_complete(hw_idx, len, true);
		pool.receive_pkt(&**env, ring, &fake.csr(), 0)
	}

	#[test]
	fn single_bd_frame_is_received() {
		let (env, ring, mut pool, fake) = setup(16);
		pool.refill(&*env, &ring, 4);

		let page = pool.page_at(0).unwrap().clone();
		unsafe { page.write(RXB_PAD, &[0x55; 96]) };

		let pkt = receive_one(&env, &ring, &mut pool, &fake, 0, 96).unwrap();
		assert_eq!(pkt.total_len(), 96);
		assert_eq!(pkt.data(), &[0x55; 96]);
		assert_eq!(ctr(&env.counters.sync_cpu), 1);
	}

	/// A reusable page reappears at `alloc_idx` with its offset
	/// toggled and its DMA mapping intact.
	#[test]
	fn reusable_page_is_recycled() {
		let (env, ring, mut pool, fake) = setup(16);
		pool.refill(&*env, &ring, 4);
		let page = pool.page_at(0).unwrap().clone();
		let alloc_before = pool.alloc_idx();

		let pkt = receive_one(&env, &ring, &mut pool, &fake, 0, 64).unwrap();
		// Recycled into the slot alloc_idx pointed at, other half-page.
		assert!(pool.page_at(alloc_before).unwrap().ptr_eq(&page));
		assert_eq!(
			pool.offset_at(alloc_before),
			RXB_PAD as u32 ^ RXB_TRUESIZE as u32
		);
		assert_eq!(pool.alloc_idx(), alloc_before + 1);
		assert_eq!(ctr(&env.counters.unmap_page), 0);
		assert_eq!(ctr(&env.counters.sync_device), 1);
		drop(pkt);
	}

	#[test]
	fn held_page_is_not_recycled() {
		let (env, ring, mut pool, fake) = setup(16);
		pool.refill(&*env, &ring, 4);
		// Another holder of the page (e.g. a previous frame still queued
		// in the stack).
		let _hold = pool.page_at(0).unwrap().clone();
		let alloc_before = pool.alloc_idx();

		let _pkt = receive_one(&env, &ring, &mut pool, &fake, 0, 64).unwrap();
		assert_eq!(pool.alloc_idx(), alloc_before);
		assert_eq!(ctr(&env.counters.unmap_page), 1);
	}

	#[test]
	fn recycled_pages_refill_without_allocator() {
		let (env, ring, mut pool, fake) = setup(16);
		pool.refill(&*env, &ring, 4);
		assert_eq!(ctr(&env.counters.pages_allocated), 4);

		for hw in 0..4 {
			let pkt = receive_one(&env, &ring, &mut pool, &fake, hw, 64).unwrap();
			drop(pkt); // stack drops its reference immediately
		}

		// All four pages were recycled; the next refill needs no pages.
		assert_eq!(pool.refill(&*env, &ring, 4), 4);
		assert_eq!(ctr(&env.counters.pages_allocated), 4);

		for hw in 4..8 {
			let pkt = receive_one(&env, &ring, &mut pool, &fake, hw, 64).unwrap();
			drop(pkt);
		}
		assert_eq!(ctr(&env.counters.pages_allocated), 4);
	}

	#[test]
	fn oom_drops_frame_and_stays_in_sync() {
		let (env, ring, mut pool, fake) = setup(16);
		pool.refill(&*env, &ring, 4);
		env.fail_alloc_pkt_at.store(1, Ordering::Relaxed);

		ring.hw_complete(0, 64, true);
		assert!(pool.receive_pkt(&*env, &ring, &fake.csr(), 0).is_none());
		// Page released, consumer advanced past the dropped frame.
		assert_eq!(ctr(&env.counters.unmap_page), 1);
		assert!(pool.page_at(0).is_none());

		// The following frame is unaffected.
		let pkt = receive_one(&env, &ring, &mut pool, &fake, 1, 80).unwrap();
		assert_eq!(pkt.total_len(), 80);
	}

	/// Only the final descriptor of a multi-BD frame carries LIFM;
	/// the earlier ones become fragments of the same packet.
	#[test]
	fn fragmented_frame_assembles_across_bds() {
		let (env, ring, mut pool, fake) = setup(16);
		pool.refill(&*env, &ring, 4);

		ring.hw_complete(0, 100, false);
		ring.hw_complete(1, 60, true);
		let pkt = pool.receive_pkt(&*env, &ring, &fake.csr(), 0).unwrap();
		assert_eq!(pkt.head_len(), 100);
		assert_eq!(pkt.frags().len(), 1);
		assert_eq!(pkt.frags()[0].len(), 60);
		assert_eq!(pkt.total_len(), 160);
	}

	#[test]
	fn partial_frame_survives_poll_boundary() {
		let (env, ring, mut pool, fake) = setup(16);
		pool.refill(&*env, &ring, 4);

		ring.hw_complete(0, 100, false);
		// LIFM not seen yet: no complete frame.
		assert!(pool.receive_pkt(&*env, &ring, &fake.csr(), 0).is_none());

		ring.hw_complete(1, 50, true);
		let pkt = pool.receive_pkt(&*env, &ring, &fake.csr(), 0).unwrap();
		assert_eq!(pkt.total_len(), 150);
	}

	#[test]
	fn destroy_releases_everything() {
		let (env, ring, mut pool, _fake) = setup(16);
		pool.refill(&*env, &ring, 6);
		pool.destroy(&*env);
		assert_eq!(ctr(&env.counters.unmap_page), 6);
		for i in 0..6 {
			assert!(pool.page_at(i).is_none());
		}
	}

	mod tx {
		use super::*;

		fn mapped_pkt(env: &TestEnv, payload: usize, frag_lens: &[usize]) -> (TxPkt, DmaAddr) {
			let mut pkt = TxPkt::new(&alloc::vec![0xab; payload]);
			for &len in frag_lens {
				let page = Page::new(false);
				pkt.add_frag(page, 0, len);
			}
			let pa = env.map_single(pkt.head().as_ptr(), pkt.head_len()).unwrap();
			(pkt, pa)
		}

		/// Exactly one slot in a frame's span owns the packet, and it
		/// is the linear-head slot.
		#[test]
		fn owner_lives_on_head_slot() {
			let env = TestEnv::new();
			let pool = TxPool::new(16);
			let (pkt, pa) = mapped_pkt(&env, 64, &[32, 32]);

			let frag_pas: Vec<DmaAddr> = pkt
				.frags()
				.iter()
				.map(|f| env.map_frag(&f.page, f.offset, f.len).unwrap())
				.collect();
			for (i, fpa) in frag_pas.iter().enumerate() {
				pool.put_map_frag(i as u32 + 1, *fpa, 32, None, TxMapKind::Normal);
			}
			let head_len = pkt.head_len() as u32;
			pool.put_map_frag(0, pa, head_len, Some(pkt), TxMapKind::Normal);
			pool.update_wr_idx(3);

			assert!(pool.owner_at(0));
			assert!(!pool.owner_at(1));
			assert!(!pool.owner_at(2));
			assert_eq!(pool.unused(), 16 - 3 - 1);
		}

		#[test]
		fn free_map_full_unmaps_linear_and_frags() {
			let env = TestEnv::new();
			let pool = TxPool::new(16);
			let (pkt, pa) = mapped_pkt(&env, 100, &[200, 300, 400]);

			for (i, frag) in pkt.frags().iter().enumerate() {
				let fpa = env.map_frag(&frag.page, frag.offset, frag.len).unwrap();
				pool.put_map_frag(i as u32 + 1, fpa, frag.len as u32, None, TxMapKind::Normal);
			}
			let head_len = pkt.head_len() as u32;
			pool.put_map_frag(0, pa, head_len, Some(pkt), TxMapKind::Normal);
			pool.update_wr_idx(4);

			let released = pool.free_map_full(&*env).unwrap();
			assert_eq!(released.nfrags(), 3);
			assert_eq!(ctr(&env.counters.unmap_single), 1);
			assert_eq!(ctr(&env.counters.unmap_frag), 3);
			assert_eq!(pool.rd_idx(), 4);
			for i in 0..4 {
				assert_eq!(pool.entry_size(i), 0);
			}
		}

		/// A failed enqueue leaves no mappings and no sizes behind.
		#[test]
		fn unroll_releases_partial_frame() {
			let env = TestEnv::new();
			let pool = TxPool::new(16);
			let (mut pkt, pa) = mapped_pkt(&env, 64, &[16, 16]);

			// Two fragments mapped before the third would have failed.
			let mut fpas = Vec::new();
			for frag in pkt.frags() {
				fpas.push(env.map_frag(&frag.page, frag.offset, frag.len).unwrap());
			}
			pkt.add_frag(Page::new(false), 0, 16);

			let head_len = pkt.head_len() as u32;
			pool.put_map_frag(0, pa, head_len, Some(pkt), TxMapKind::Normal);
			for (i, fpa) in fpas.iter().enumerate() {
				pool.put_map_frag(i as u32 + 1, *fpa, 16, None, TxMapKind::Normal);
			}

			let owner = pool.unroll_map_full(&*env, 2);
			assert!(owner.is_some());
			assert_eq!(ctr(&env.counters.unmap_single), 1);
			assert_eq!(ctr(&env.counters.unmap_frag), 2);
			assert_eq!(pool.wr_idx(), 0);
			for i in 0..3 {
				assert_eq!(pool.entry_size(i), 0);
			}
		}

		#[test]
		fn ihc_payload_strips_header() {
			let env = TestEnv::new();
			let pool = TxPool::new(16);
			let (pkt, pa) = mapped_pkt(&env, 4, &[]);
			let head_len = pkt.head_len() as u32;
			pool.put_map_frag(0, pa, head_len, Some(pkt), TxMapKind::Ihc);
			pool.update_wr_idx(1);

			assert_eq!(pool.peek_kind(), TxMapKind::Ihc);
			let payload = pool.ihc_txconf_payload().unwrap();
			assert_eq!(payload, alloc::vec![0xab; 4]);
		}

		#[test]
		fn purge_releases_outstanding_frames() {
			let env = TestEnv::new();
			let pool = TxPool::new(16);
			for _ in 0..3 {
				let (pkt, pa) = mapped_pkt(&env, 32, &[]);
				let head_len = pkt.head_len() as u32;
				pool.put_map_frag(0, pa, head_len, Some(pkt), TxMapKind::Normal);
				pool.update_wr_idx(1);
			}
			pool.purge(&*env);
			assert_eq!(ctr(&env.counters.unmap_single), 3);
			assert_eq!(pool.rd_idx(), 0);
			assert_eq!(pool.wr_idx(), 0);
		}
	}
}
