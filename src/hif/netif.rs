//! Netifs: the PFE-served Ethernet endpoints a channel feeds.
//!
//! Each channel owns a table of netifs keyed by ingress physical
//! interface ID; the RX poll resolves `i_phy_if` against it. The
//! unassigned hole in the ID space doubles as the AUX slot, the target
//! of non-management traffic when the primary netif is management-only.

use alloc::boxed::Box;
use alloc::string::String;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hermit_sync::SpinMutex;

use crate::ct::{HwTimestamp, PhyIfId};
use crate::hwts::{TxTimestamp, TxTsPending};
use crate::pkt::RxPacket;

/// Metadata delivered together with a received frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct RxMeta {
	/// Hardware receive timestamp, when the frame carried one.
	pub hw_tstamp: Option<HwTimestamp>,
	/// L4 checksum already verified by the classifier.
	pub csum_ok: bool,
	/// VLAN tag recovered by the insertion-erratum path: `(tpid, tci)`.
	pub vlan: Option<(u16, u16)>,
}

/// The stack side of a netif. Calls arrive from the channel poll loop
/// (delivery, wakeups, timestamps) and from the enqueue path (software
/// timestamp), so implementations must not block.
pub trait StackSink: Send + Sync {
	/// Hand a frame up the stack. GRO-compatible: frames of one netif
	/// arrive in order from a single poll loop.
	fn deliver(&self, pkt: RxPacket, meta: RxMeta);

	/// Resume a TX queue stopped by ring pressure.
	fn wake_tx_queue(&self) {}

	/// Software transmit timestamp hook, called just before the frame is
	/// handed to the hardware.
	fn tx_soft_timestamp(&self, _cookie: u64) {}

	/// Resolved hardware egress timestamp for a frame that requested one.
	fn tx_timestamp(&self, _ts: TxTimestamp) {}

	/// A timestamp request the firmware never answered; the stack
	/// reference can be released.
	fn tx_timestamp_lost(&self, _cookie: u64) {}
}

/// Static configuration of a netif.
pub struct NetifConfig {
	pub name: String,
	/// Ingress physical interface whose traffic this netif receives.
	pub phy_if: PhyIfId,
	/// Management-only endpoint: non-management traffic is re-routed to
	/// the AUX netif when one exists.
	pub only_mgmt: bool,
	/// Advertise RX checksum offload.
	pub rx_csum: bool,
	/// Advertise TX checksum offload.
	pub tx_csum: bool,
	/// Egress timestamping enabled.
	pub ptp: bool,
}

#[derive(Debug, Default)]
pub struct NetifStats {
	pub rx_packets: AtomicU64,
	pub rx_bytes: AtomicU64,
	pub rx_dropped: AtomicU64,
	pub tx_packets: AtomicU64,
	pub tx_bytes: AtomicU64,
	pub tx_dropped: AtomicU64,
}

impl NetifStats {
	pub(crate) fn count_rx(&self, bytes: usize) {
		self.rx_packets.fetch_add(1, Ordering::Relaxed);
		self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
	}

	pub(crate) fn count_tx(&self, bytes: usize) {
		self.tx_packets.fetch_add(1, Ordering::Relaxed);
		self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
	}
}

/// One PFE-served endpoint. Owned by the channel netif table, shared
/// with the embedder through `Arc`.
pub struct Netif {
	pub cfg: NetifConfig,
	pub stats: NetifStats,
	sink: Box<dyn StackSink>,
	/// Channel this netif transmits through.
	chnl_idx: u8,
	/// TX queue stopped waiting for descriptors.
	tx_queue_stopped: AtomicBool,
	/// TMU back-pressure: the egress port queue is full; waking the TX
	/// queue would only produce drops.
	tmu_full: AtomicBool,
	/// Pending egress-timestamp requests.
	pub(crate) hwts: SpinMutex<TxTsPending>,
}

impl Netif {
	pub fn new(cfg: NetifConfig, chnl_idx: u8, sink: Box<dyn StackSink>) -> Self {
		Self {
			cfg,
			stats: NetifStats::default(),
			sink,
			chnl_idx,
			tx_queue_stopped: AtomicBool::new(false),
			tmu_full: AtomicBool::new(false),
			hwts: SpinMutex::new(TxTsPending::new()),
		}
	}

	pub fn chnl_idx(&self) -> u8 {
		self.chnl_idx
	}

	pub fn sink(&self) -> &dyn StackSink {
		&*self.sink
	}

	pub fn stop_tx_queue(&self) {
		self.tx_queue_stopped.store(true, Ordering::Release);
	}

	pub fn tx_queue_stopped(&self) -> bool {
		self.tx_queue_stopped.load(Ordering::Acquire)
	}

	pub fn set_tmu_full(&self, full: bool) {
		self.tmu_full.store(full, Ordering::Release);
	}

	pub fn tmu_full(&self) -> bool {
		self.tmu_full.load(Ordering::Acquire)
	}

	pub(crate) fn wake_tx_queue(&self) {
		if self.tx_queue_stopped.swap(false, Ordering::AcqRel) {
			self.sink.wake_tx_queue();
		}
	}

	/// Deliver an egress-timestamp report to the stack.
	pub(crate) fn report_tx_timestamp(&self, ref_num: u16, ts: HwTimestamp) {
		if let Some(cookie) = self.hwts.lock().take(ref_num) {
			self.sink.tx_timestamp(TxTimestamp { cookie, ts });
		} else {
			debug!(
				"{}: egress timestamp report with unknown ref {ref_num}",
				self.cfg.name
			);
		}
	}

	/// Age the pending-timestamp table; releases requests the firmware
	/// never answered.
	pub(crate) fn reap_tx_timestamps(&self) {
		for cookie in self.hwts.lock().reap() {
			self.sink.tx_timestamp_lost(cookie);
		}
	}
}
