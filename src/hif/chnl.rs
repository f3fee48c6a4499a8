//! One HIF channel: lifecycle, interrupt service, the cooperative poll
//! loop and the TX scatter/gather enqueue.
//!
//! Execution contexts per channel:
//! - the hardware ISR ([`HifChnl::isr`]) masks interrupts and requests a
//!   poll,
//! - the poll loop ([`HifChnl::poll`]) drains TX confirmations and RX
//!   frames under a budget and re-arms interrupts when done,
//! - enqueue paths ([`HifChnl::xmit`], the IHC TX worker) publish frames
//!   to the TX ring, serialised by `lock_tx` only when the channel is
//!   shared by several netifs.
//!
//! The ISR never races the poll into a lost wakeup: scheduling goes
//! through a small atomic state machine modelled on NAPI.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

use endian_num::{be16, be32};
use hermit_sync::SpinMutex;
use smallvec::SmallVec;
use thiserror::Error;

use super::HifError;
use super::bman::{RxPool, TxMapKind, TxPool};
use super::csr::{ChnlEvent, HifCsr};
use super::ihc::IhcClient;
use super::netif::{Netif, RxMeta};
use super::ring::{BdRing, TxSeg};
use crate::config::{MAX_SG_SEGMENTS, MAX_TX_FRAGS, TXBDS_MAX_NEEDED, default_tx_work};
use crate::ct::{
	CtEtsReport, CtHifRxHdr, CtHifTxHdr, HIF_HDR_SIZE, HifRxFlags, HifTxFlags, HwTimestamp,
	NETIFS_CNT, PhyIfId, VLAN_HLEN,
};
use crate::env::{DmaAddr, HifEnv};
use crate::pkt::TxPkt;

/// Channel lifecycle, in bring-up order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[repr(u8)]
pub enum ChnlState {
	Disabled = 0,
	Requested = 1,
	Enabled = 2,
	Running = 3,
}

impl ChnlState {
	fn from_u8(v: u8) -> Self {
		match v {
			1 => ChnlState::Requested,
			2 => ChnlState::Enabled,
			3 => ChnlState::Running,
			_ => ChnlState::Disabled,
		}
	}
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
	/// The frame was dropped; only statistics record it.
	#[error("packet dropped")]
	Dropped,
}

/// Per-channel extended statistics.
#[derive(Debug, Default)]
pub struct ChnlXstats {
	pub napi_poll: AtomicU64,
	/// ISR found the poll already pending.
	pub napi_poll_onrun: AtomicU64,
	pub napi_poll_completed: AtomicU64,
	pub napi_poll_rx: AtomicU64,
	pub txconf: AtomicU64,
	pub tx_busy: AtomicU64,
	pub tx_pkt_frags: AtomicU64,
	pub rx_dropped: AtomicU64,
	pub ihc_rx: AtomicU64,
	pub ihc_tx: AtomicU64,
}

mod napi {
	use super::{AtomicU8, Ordering};

	const IDLE: u8 = 0;
	const SCHEDULED: u8 = 1;
	const RUNNING: u8 = 2;
	const DISABLED: u8 = 3;

	/// NAPI-style scheduling state. The ISR moves `IDLE -> SCHEDULED`,
	/// the poll `SCHEDULED -> RUNNING -> IDLE` (or back to `SCHEDULED`
	/// when the budget ran out). `DISABLED` blocks scheduling during
	/// teardown.
	pub(super) struct NapiState {
		state: AtomicU8,
	}

	impl NapiState {
		pub(super) const fn new() -> Self {
			Self {
				state: AtomicU8::new(DISABLED),
			}
		}

		/// ISR side: request a poll. `false` when one is already pending
		/// or the channel is disabled.
		pub(super) fn schedule_prep(&self) -> bool {
			self.state
				.compare_exchange(IDLE, SCHEDULED, Ordering::AcqRel, Ordering::Acquire)
				.is_ok()
		}

		/// Poll side: claim the pending request.
		pub(super) fn begin(&self) -> bool {
			self.state
				.compare_exchange(SCHEDULED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
				.is_ok()
		}

		/// Poll finished under budget: back to idle, interrupts may be
		/// re-armed. `false` if teardown raced in.
		pub(super) fn complete(&self) -> bool {
			self.state
				.compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
				.is_ok()
		}

		/// Budget exhausted: stay pending for the next poll invocation.
		pub(super) fn resched(&self) {
			let _ = self.state.compare_exchange(
				RUNNING,
				SCHEDULED,
				Ordering::AcqRel,
				Ordering::Acquire,
			);
		}

		pub(super) fn enable(&self) {
			self.state.store(IDLE, Ordering::Release);
		}

		/// Block further scheduling; spins out any poll instance still
		/// running.
		pub(super) fn disable(&self) {
			loop {
				let cur = self.state.load(Ordering::Acquire);
				if cur == RUNNING {
					core::hint::spin_loop();
					continue;
				}
				if self
					.state
					.compare_exchange(cur, DISABLED, Ordering::AcqRel, Ordering::Acquire)
					.is_ok()
				{
					return;
				}
			}
		}
	}
}

use napi::NapiState;

/// RX-side state, exclusive to the poll loop. The mutex encodes that
/// exclusivity; it is never contended because the NAPI state machine
/// admits one poll instance at a time.
struct RxSide {
	ring: BdRing,
	pool: RxPool,
}

/// Static channel configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChnlConfig {
	/// More than one netif transmits through this channel; the enqueue
	/// paths take the TX lock.
	pub shared: bool,
	/// This channel carries the inter-host control traffic.
	pub ihc: bool,
}

/// The per-channel aggregate.
pub struct HifChnl {
	idx: u8,
	env: Arc<dyn HifEnv>,
	csr: HifCsr,
	ring_len: usize,
	/// Silicon supports frame-count coalescing; also gates the VLAN
	/// insertion erratum handling (same revision flag).
	frame_coalesce_ok: bool,
	shared: bool,
	is_ihc: bool,
	state: AtomicU8,
	napi: NapiState,
	lock_tx: SpinMutex<()>,
	rx: SpinMutex<RxSide>,
	tx_ring: BdRing,
	tx_pool: TxPool,
	netifs: SpinMutex<[Option<Arc<Netif>>; NETIFS_CNT]>,
	pub(crate) ihc: SpinMutex<Option<Arc<IhcClient>>>,
	/// `(usecs, frames)` as configured.
	coalesce: SpinMutex<(u32, u32)>,
	/// Timeout erratum sources already reported, to log each once.
	seen_timeouts: AtomicU32,
	pub xstats: ChnlXstats,
}

impl core::fmt::Debug for HifChnl {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("HifChnl")
			.field("idx", &self.idx)
			.field("shared", &self.shared)
			.field("is_ihc", &self.is_ihc)
			.finish_non_exhaustive()
	}
}

impl HifChnl {
	pub(crate) fn new(
		env: Arc<dyn HifEnv>,
		csr: HifCsr,
		idx: u8,
		ring_len: usize,
		frame_coalesce_ok: bool,
		cfg: ChnlConfig,
	) -> Result<Self, HifError> {
		let rx_ring = BdRing::new(&env, ring_len)?;
		let tx_ring = BdRing::new(&env, ring_len)?;

		Ok(Self {
			idx,
			env,
			csr,
			ring_len,
			frame_coalesce_ok,
			shared: cfg.shared,
			is_ihc: cfg.ihc,
			state: AtomicU8::new(ChnlState::Requested as u8),
			napi: NapiState::new(),
			lock_tx: SpinMutex::new(()),
			rx: SpinMutex::new(RxSide {
				ring: rx_ring,
				pool: RxPool::new(ring_len),
			}),
			tx_ring,
			tx_pool: TxPool::new(ring_len),
			netifs: SpinMutex::new([const { None }; NETIFS_CNT]),
			ihc: SpinMutex::new(None),
			coalesce: SpinMutex::new((0, 0)),
			seen_timeouts: AtomicU32::new(0),
			xstats: ChnlXstats::default(),
		})
	}

	pub fn idx(&self) -> u8 {
		self.idx
	}

	pub fn is_ihc(&self) -> bool {
		self.is_ihc
	}

	pub fn state(&self) -> ChnlState {
		ChnlState::from_u8(self.state.load(Ordering::Acquire))
	}

	fn set_state(&self, state: ChnlState) {
		self.state.store(state as u8, Ordering::Release);
	}

	pub(crate) fn env(&self) -> &Arc<dyn HifEnv> {
		&self.env
	}

	pub(crate) fn csr(&self) -> &HifCsr {
		&self.csr
	}

	pub(crate) fn lock_tx(&self) -> &SpinMutex<()> {
		&self.lock_tx
	}

	pub(crate) fn tx_pool(&self) -> &TxPool {
		&self.tx_pool
	}

	pub(crate) fn tx_ring(&self) -> &BdRing {
		&self.tx_ring
	}

	/// Bind a netif to its ingress physical-interface slot.
	pub fn add_netif(&self, netif: Arc<Netif>) -> Result<(), HifError> {
		let mut table = self.netifs.lock();
		let slot = netif.cfg.phy_if as usize;
		if table[slot].is_some() {
			return Err(HifError::NetifSlotBusy);
		}
		table[slot] = Some(netif);
		Ok(())
	}

	pub fn remove_netif(&self, phy_if: PhyIfId) -> Option<Arc<Netif>> {
		self.netifs.lock()[phy_if as usize].take()
	}

	pub fn netif(&self, phy_if: PhyIfId) -> Option<Arc<Netif>> {
		self.netifs.lock()[phy_if as usize].clone()
	}

	fn netif_by_id(&self, id: u8) -> Option<Arc<Netif>> {
		if id > PhyIfId::MAX {
			return None;
		}
		self.netifs.lock()[id as usize].clone()
	}

	/// Free TX descriptors.
	pub fn txbd_unused(&self) -> u32 {
		self.tx_pool.unused()
	}

	/// Configure the channel towards `Enabled`: IRQ affinity, CSR
	/// bring-up, ring base programming, RX pre-fill, default coalescing.
	pub fn open(&self) -> Result<(), HifError> {
		if self.state() != ChnlState::Requested {
			return Err(HifError::InvalidState);
		}

		let cpu = self.idx as usize % self.env.cpu_count().max(1);
		self.env.set_irq_affinity(self.idx, cpu);

		self.csr.chnl_init(self.idx);

		{
			let mut rx = self.rx.lock();
			self.csr.set_rx_bd_ring_addr(self.idx, rx.ring.base_pa());
			let (wb_pa, wb_len) = rx.ring.wb_table();
			self.csr.set_rx_wb_table(self.idx, wb_pa, wb_len);

			let RxSide { ring, pool } = &mut *rx;
			let filled = pool.fill(&*self.env, ring);
			debug!("chnl{}: prefilled {filled} rx buffers", self.idx);
		}

		self.csr.set_tx_bd_ring_addr(self.idx, self.tx_ring.base_pa());
		let (wb_pa, wb_len) = self.tx_ring.wb_table();
		self.csr.set_tx_wb_table(self.idx, wb_pa, wb_len);

		self.set_coalesce(crate::config::DEFAULT_COALESCE_USECS, 0)?;

		self.napi.enable();
		self.set_state(ChnlState::Enabled);
		info!("HIF{} enabled", self.idx);
		Ok(())
	}

	/// `Enabled -> Running`: unmask the gates and start both DMA
	/// directions.
	pub fn start(&self) -> Result<(), HifError> {
		match self.state() {
			ChnlState::Running => return Ok(()),
			ChnlState::Enabled => {}
			_ => return Err(HifError::InvalidState),
		}

		self.csr.irq_unmask(self.idx);
		self.csr.rx_enable(self.idx);
		self.csr.tx_enable(self.idx);
		self.csr.rx_irq_unmask(self.idx);
		self.csr.tx_irq_unmask(self.idx);

		self.set_state(ChnlState::Running);
		info!("HIF{} started", self.idx);
		Ok(())
	}

	/// `Running -> Enabled`: mask all four interrupt gates, then disable
	/// both DMA directions. Frames already owned by the hardware finish
	/// on their own.
	pub fn stop(&self) {
		self.csr.irq_mask(self.idx);
		self.csr.rx_irq_mask(self.idx);
		self.csr.tx_irq_mask(self.idx);
		self.csr.rx_disable(self.idx);
		self.csr.tx_disable(self.idx);

		self.set_state(ChnlState::Enabled);
		info!("HIF{} stopped", self.idx);
	}

	/// Tear the channel back down to `Requested`. Blocks until a pending
	/// poll instance has returned.
	pub fn close(&self) {
		if self.state() == ChnlState::Running {
			self.stop();
		}
		self.napi.disable();

		{
			let mut rx = self.rx.lock();
			let RxSide { ring, pool } = &mut *rx;
			pool.destroy(&*self.env);
			ring.reset();
		}
		self.tx_pool.purge(&*self.env);
		self.tx_ring.reset();

		self.csr.chnl_fini(self.idx);
		self.set_state(ChnlState::Requested);
		info!("HIF{} disabled", self.idx);
	}

	/// Restore a suspended (`Enabled`) channel to `Running`: the engine
	/// lost its state, so rings are re-programmed and buffers re-filled.
	pub fn resume(&self) -> Result<(), HifError> {
		if self.state() != ChnlState::Enabled {
			return Err(HifError::InvalidState);
		}

		self.tx_pool.purge(&*self.env);
		self.tx_ring.reset();

		self.csr.chnl_init(self.idx);
		{
			let mut rx = self.rx.lock();
			rx.ring.reset();
			rx.pool.reset();
			self.csr.set_rx_bd_ring_addr(self.idx, rx.ring.base_pa());
			let (wb_pa, wb_len) = rx.ring.wb_table();
			self.csr.set_rx_wb_table(self.idx, wb_pa, wb_len);
			let RxSide { ring, pool } = &mut *rx;
			pool.fill(&*self.env, ring);
		}
		self.csr.set_tx_bd_ring_addr(self.idx, self.tx_ring.base_pa());
		let (wb_pa, wb_len) = self.tx_ring.wb_table();
		self.csr.set_tx_wb_table(self.idx, wb_pa, wb_len);

		let (usecs, frames) = *self.coalesce.lock();
		self.set_coalesce(usecs, frames)?;

		self.start()
	}

	/// Hardware interrupt entry point.
	pub fn isr(&self) {
		self.csr.irq_mask(self.idx);

		let (events, timeouts) = self.csr.chnl_isr(self.idx);

		if !timeouts.is_empty() {
			// Erratum workaround: the CSR left these masked for good;
			// report each source once.
			let fresh = !self.seen_timeouts.fetch_or(timeouts.bits(), Ordering::AcqRel)
				& timeouts.bits();
			if fresh != 0 {
				info!(
					"HIF{}: BDP/DXR timeout interrupts {fresh:#x} disabled",
					self.idx
				);
			}
		}

		if events.intersects(ChnlEvent::RX_IRQ | ChnlEvent::TX_IRQ) {
			if self.napi.schedule_prep() {
				self.csr.rx_irq_mask(self.idx);
				self.csr.tx_irq_mask(self.idx);
				self.env.kick_poll(self.idx);
			} else {
				self.xstats.napi_poll_onrun.fetch_add(1, Ordering::Relaxed);
			}
		}

		self.csr.irq_unmask(self.idx);
	}

	/// Cooperative poll: drain TX confirmations, then up to `budget` RX
	/// frames. Returns the RX work done; returning `budget` means the
	/// scheduler must invoke the poll again, anything less re-armed the
	/// interrupts.
	pub fn poll(&self, budget: usize) -> usize {
		if !self.napi.begin() {
			return 0;
		}
		self.xstats.napi_poll.fetch_add(1, Ordering::Relaxed);

		let mut complete = self.tx_conf();

		let done = self.rx(budget);
		if done >= budget {
			complete = false;
		}

		for netif in self.netifs.lock().iter().flatten() {
			netif.reap_tx_timestamps();
		}

		if !complete {
			self.napi.resched();
			self.env.kick_poll(self.idx);
			return budget;
		}

		if self.napi.complete() {
			self.xstats.napi_poll_completed.fetch_add(1, Ordering::Relaxed);

			self.csr.rx_irq_unmask(self.idx);
			self.csr.tx_irq_unmask(self.idx);
			self.csr.rx_dma_start(self.idx);
		}

		done
	}

	/// TX-confirm drain. Returns `true` when the ring had fewer
	/// confirmations than the drain bound (i.e. the direction is idle).
	fn tx_conf(&self) -> bool {
		let tx_work = default_tx_work(self.ring_len) as u64;
		let mut done = 0u64;

		while done < tx_work {
			if !self.tx_ring.dequeue_tx_conf() {
				// Hardware still owns the next descriptor; retry on the
				// next poll.
				break;
			}

			if self.tx_pool.peek_kind() == TxMapKind::Ihc {
				match self.tx_pool.ihc_txconf_payload() {
					Some(payload) => {
						if !self.ihc_put_tx_conf(payload) {
							error!("HIF{}: IHC txconf queuing failed", self.idx);
						}
					}
					None => error!("HIF{}: IHC txconf without owner", self.idx),
				}
			}

			drop(self.tx_pool.free_map_full(&*self.env));
			done += 1;
		}

		self.xstats.txconf.fetch_add(done, Ordering::Relaxed);

		if self.txbd_unused() >= TXBDS_MAX_NEEDED {
			for netif in self.netifs.lock().iter().flatten() {
				if netif.tx_queue_stopped() && !netif.tmu_full() {
					netif.wake_tx_queue();
				}
			}
		}

		done < tx_work
	}

	/// RX drain under `budget`.
	fn rx(&self, budget: usize) -> usize {
		let mut rx = self.rx.lock();
		let mut done = 0;

		while done < budget {
			let RxSide { ring, pool } = &mut *rx;
			let Some(mut pkt) = pool.receive_pkt(&*self.env, ring, &self.csr, self.idx) else {
				break;
			};

			let Some(hdr) = CtHifRxHdr::from_bytes(pkt.data()) else {
				self.xstats.rx_dropped.fetch_add(1, Ordering::Relaxed);
				done += 1;
				continue;
			};

			if hdr.flags.contains(HifRxFlags::IHC) {
				if let Err(err) = self.ihc_dispatch_rx(pkt, hdr.i_phy_if) {
					error!(
						"HIF{}: failed to dispatch IHC message from phyif {} ({err})",
						self.idx, hdr.i_phy_if
					);
				}
				self.xstats.ihc_rx.fetch_add(1, Ordering::Relaxed);
				done += 1;
				continue;
			}

			let Some(netif) = self.netif_by_id(hdr.i_phy_if) else {
				debug!(
					"HIF{}: no netdev for packet from phyif {}",
					self.idx, hdr.i_phy_if
				);
				self.xstats.rx_dropped.fetch_add(1, Ordering::Relaxed);
				done += 1;
				continue;
			};

			// AUX re-routing: a management-only netif keeps PTP and
			// egress-timestamp frames, everything else moves to AUX.
			let netif = if !netif.cfg.only_mgmt {
				netif
			} else if hdr.flags.intersects(HifRxFlags::PTP | HifRxFlags::ETS) {
				netif
			} else if let Some(aux) = self.netif(PhyIfId::AUX) {
				aux
			} else {
				netif
			};

			// VLAN insertion erratum: the tag rides in the timestamp
			// word and the real timestamp moved into the payload. Gated
			// on the same silicon revision that lacks frame coalescing.
			let vlan = if !self.frame_coalesce_ok
				&& hdr.flags.contains(HifRxFlags::vlan_flag(self.idx))
			{
				Some(hdr.vlan_tag())
			} else {
				None
			};

			let mut meta = RxMeta::default();

			if hdr.flags.contains(HifRxFlags::TS) {
				let sec = match pkt.data().get(HIF_HDR_SIZE..HIF_HDR_SIZE + 4) {
					// Erratum: the tag displaced the timestamp into the
					// payload.
					Some(d) if vlan.is_some() => {
						u32::from_le_bytes([d[0], d[1], d[2], d[3]])
					}
					_ => hdr.rx_timestamp_s,
				};
				meta.hw_tstamp = Some(HwTimestamp {
					sec,
					nsec: hdr.rx_timestamp_ns,
				});
			} else if hdr.flags.contains(HifRxFlags::ETS) {
				let off = HIF_HDR_SIZE + if vlan.is_some() { VLAN_HLEN } else { 0 };
				if let Some(report) = pkt.data().get(off..).and_then(CtEtsReport::from_bytes) {
					netif.report_tx_timestamp(
						report.ref_num,
						HwTimestamp {
							sec: report.ts_s,
							nsec: report.ts_ns,
						},
					);
				}
				// The frame only carried the report.
				done += 1;
				continue;
			}

			if netif.cfg.rx_csum && hdr.flags.intersects(HifRxFlags::CSUM_OK) {
				meta.csum_ok = true;
			}

			pkt.pull(HIF_HDR_SIZE);
			if let Some(tag) = vlan {
				pkt.pull(VLAN_HLEN);
				meta.vlan = Some(tag);
			}

			netif.stats.count_rx(pkt.head_len());
			netif.sink().deliver(pkt, meta);
			done += 1;
		}

		if done > 0 {
			self.xstats.napi_poll_rx.fetch_add(1, Ordering::Relaxed);
		}
		done
	}

	/// Transmit one frame. The packet is consumed either way; failures
	/// surface only through `tx_dropped`.
	pub fn xmit(&self, netif: &Netif, mut pkt: TxPkt) -> Result<(), TxError> {
		let drop_pkt = |pkt: TxPkt| {
			drop(pkt);
			netif.stats.tx_dropped.fetch_add(1, Ordering::Relaxed);
			Err(TxError::Dropped)
		};

		// Too many fragments for the hardware SG list.
		if pkt.nfrags() > MAX_TX_FRAGS && pkt.linearize().is_err() {
			error!("{}: packet dropped, linearise failed", netif.cfg.name);
			return drop_pkt(pkt);
		}

		// Not enough descriptors for the fragmented layout; a linear
		// frame needs fewer.
		if self.txbd_unused() < pkt.nfrags() as u32 + 2 && pkt.linearize().is_err() {
			error!("{}: packet dropped, linearise failed", netif.cfg.name);
			return drop_pkt(pkt);
		}

		let nfrags = pkt.nfrags();

		let _guard = self.shared.then(|| self.lock_tx.lock());

		let mut flags = HifTxFlags::empty();
		if netif.cfg.tx_csum {
			flags |= HifTxFlags::IP_CSUM | HifTxFlags::TCP_CSUM | HifTxFlags::UDP_CSUM;
		}

		let mut est_ref_num = 0u16;
		if pkt.hw_tstamp && netif.cfg.ptp {
			if let Some(ref_num) = netif.hwts.lock().store(pkt.cookie) {
				flags |= HifTxFlags::ETS;
				est_ref_num = ref_num;
			}
			// Table full: no warning here, the reaper reports it later.
		}

		CtHifTxHdr {
			chid: self.idx,
			queue: 0,
			flags,
			e_phy_ifs: be32::from_ne(0),
			est_ref_num: be16::from_ne(est_ref_num),
		}
		.write_to(pkt.head_mut());

		let head_len = pkt.head_len();
		let Ok(head_pa) = self.env.map_single(pkt.head().as_ptr(), head_len) else {
			error!("{}: frame mapping failed, packet dropped", netif.cfg.name);
			return drop_pkt(pkt);
		};

		let mut segs: SmallVec<[TxSeg; MAX_SG_SEGMENTS]> = SmallVec::new();
		segs.push(TxSeg {
			pa: head_pa,
			len: head_len as u32,
		});

		for frag in pkt.frags() {
			match self.env.map_frag(&frag.page, frag.offset, frag.len) {
				Ok(pa) => segs.push(TxSeg {
					pa,
					len: frag.len as u32,
				}),
				Err(_) => {
					// Evaluate the mapping result once and roll the whole
					// frame back.
					error!(
						"{}: fragment mapping failed, packet dropped",
						netif.cfg.name
					);
					self.env.unmap_single(head_pa, head_len);
					for seg in segs.iter().skip(1) {
						self.env.unmap_frag(seg.pa, seg.len as usize);
					}
					return drop_pkt(pkt);
				}
			}
		}

		for (i, seg) in segs.iter().enumerate().skip(1) {
			self.tx_pool
				.put_map_frag(i as u32, seg.pa, seg.len, None, TxMapKind::Normal);
		}

		let payload_len = pkt.payload_len();
		let cookie = pkt.cookie;
		netif.sink().tx_soft_timestamp(cookie);

		self.tx_pool
			.put_map_frag(0, head_pa, head_len as u32, Some(pkt), TxMapKind::Normal);

		if self.tx_ring.enqueue_frame(&segs).is_err() {
			self.xstats.tx_busy.fetch_add(1, Ordering::Relaxed);
			let owner = self.tx_pool.unroll_map_full(&*self.env, nfrags as u32);
			netif.stats.tx_dropped.fetch_add(1, Ordering::Relaxed);
			drop(owner);
			return Err(TxError::Dropped);
		}

		self.tx_pool.update_wr_idx(nfrags as u32 + 1);
		self.csr.tx_dma_start(self.idx);

		netif.stats.count_tx(payload_len);
		if nfrags > 0 {
			self.xstats.tx_pkt_frags.fetch_add(1, Ordering::Relaxed);
		}

		if self.txbd_unused() < TXBDS_MAX_NEEDED {
			netif.stop_tx_queue();
		}

		Ok(())
	}

	/// Program RX interrupt coalescing from `(usecs, frames)`.
	pub fn set_coalesce(&self, usecs: u32, frames: u32) -> Result<(), HifError> {
		let cycles_per_us = self.env.sys_clk_hz().div_ceil(1_000_000);
		let cycles = usecs * cycles_per_us;

		self.csr
			.set_rx_irq_coalesce(self.idx, frames, cycles, self.frame_coalesce_ok)?;
		*self.coalesce.lock() = (usecs, frames);
		Ok(())
	}

	/// Read the coalescing configuration back from the hardware,
	/// converted to `(frames, usecs)`.
	pub fn get_coalesce(&self) -> (u32, u32) {
		let (frames, cycles) = self.csr.get_rx_irq_coalesce(self.idx);
		let cycles_per_us = self.env.sys_clk_hz().div_ceil(1_000_000);
		(frames, cycles / cycles_per_us)
	}

	/// Bus address of the RX BD ring (diagnostics).
	pub fn rx_ring_pa(&self) -> DmaAddr {
		self.rx.lock().ring.base_pa()
	}

	#[cfg(test)]
	pub(crate) fn with_rx_ring<R>(&self, f: impl FnOnce(&BdRing) -> R) -> R {
		f(&self.rx.lock().ring)
	}

	#[cfg(test)]
	pub(crate) fn with_rx_pool<R>(&self, f: impl FnOnce(&mut RxPool) -> R) -> R {
		f(&mut self.rx.lock().pool)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn napi_state_machine() {
		let napi = NapiState::new();
		// Disabled: nothing schedules.
		assert!(!napi.schedule_prep());

		napi.enable();
		assert!(napi.schedule_prep());
		// Second request while pending is refused (overrun).
		assert!(!napi.schedule_prep());

		assert!(napi.begin());
		assert!(!napi.begin());
		assert!(napi.complete());

		// Budget-exhausted path keeps the poll pending.
		assert!(napi.schedule_prep());
		assert!(napi.begin());
		napi.resched();
		assert!(!napi.complete());
		assert!(napi.begin());
		assert!(napi.complete());

		napi.disable();
		assert!(!napi.schedule_prep());
	}

	#[test]
	fn chnl_state_roundtrip() {
		assert_eq!(ChnlState::from_u8(ChnlState::Running as u8), ChnlState::Running);
		assert_eq!(ChnlState::from_u8(0xff), ChnlState::Disabled);
		assert!(ChnlState::Enabled < ChnlState::Running);
	}
}
