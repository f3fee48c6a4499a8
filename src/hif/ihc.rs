//! Inter-host communication (IHC) over a HIF channel.
//!
//! Two PFE hosts on the same silicon exchange RPC frames through normal
//! HIF traffic marked with the IHC header flag. Exactly one channel per
//! instance carries IHC; its client owns three bounded FIFOs: received
//! frames, TX confirmations and outgoing work. The FIFOs are serviced
//! from an ordered workqueue the embedder runs; the single event handler
//! is invoked with fill-level driven events, never from the ISR or poll
//! context directly.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use endian_num::be32;
use heapless::spsc::Queue;
use hermit_sync::SpinMutex;
use thiserror::Error;

use super::bman::TxMapKind;
use super::chnl::HifChnl;
use crate::config::{IHC_FIFO_DEPTH, IHC_MIN_FRAME};
use crate::ct::{CtHifTxHdr, HIF_HDR_SIZE, HifTxFlags, PhyIfId};
use crate::env::Work;
use crate::pkt::{RxPacket, TxPkt};

/// Queue storage is one larger than the usable capacity.
const IHC_FIFO_LEN: usize = IHC_FIFO_DEPTH + 1;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IhcError {
	#[error("channel does not carry IHC")]
	NotIhcChannel,
	#[error("IHC client already registered")]
	AlreadyRegistered,
	#[error("no IHC client registered")]
	NoClient,
	#[error("IHC FIFO full")]
	FifoFull,
}

/// Events delivered to the registered IHC client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IhcEvent {
	/// At least one received frame waits in the RX FIFO.
	RxPktInd,
	/// At least one TX confirmation waits in the txconf FIFO.
	TxDoneInd,
}

/// A received IHC frame: the full frame including the HIF RX header,
/// plus the ingress interface it came from.
#[derive(Debug)]
pub struct IhcRxPkt {
	pkt: RxPacket,
	pub i_phy_if: u8,
}

impl IhcRxPkt {
	/// The RPC payload: everything past the HIF RX header.
	pub fn payload(&self) -> &[u8] {
		&self.pkt.data()[HIF_HDR_SIZE..]
	}

	/// The raw frame including the HIF RX header.
	pub fn frame(&self) -> &[u8] {
		self.pkt.data()
	}
}

pub type IhcEventHandler = Box<dyn Fn(IhcEvent) + Send + Sync>;

/// Per-channel IHC client state.
///
/// Each FIFO has exactly one producer and one consumer; the mutexes
/// satisfy the aliasing rules and are uncontended in steady state.
pub struct IhcClient {
	rx_fifo: SpinMutex<Queue<IhcRxPkt, IHC_FIFO_LEN>>,
	txconf_fifo: SpinMutex<Queue<Vec<u8>, IHC_FIFO_LEN>>,
	tx_fifo: SpinMutex<Queue<TxPkt, IHC_FIFO_LEN>>,
	handler: IhcEventHandler,
	pub tx_dropped: AtomicU64,
}

impl IhcClient {
	fn new(handler: IhcEventHandler) -> Self {
		Self {
			rx_fifo: SpinMutex::new(Queue::new()),
			txconf_fifo: SpinMutex::new(Queue::new()),
			tx_fifo: SpinMutex::new(Queue::new()),
			handler,
			tx_dropped: AtomicU64::new(0),
		}
	}

	pub fn rx_fill_level(&self) -> usize {
		self.rx_fifo.lock().len()
	}

	pub fn txconf_fill_level(&self) -> usize {
		self.txconf_fifo.lock().len()
	}
}

impl HifChnl {
	/// Register the IHC client. Only valid on the channel designated as
	/// the IHC channel, once.
	pub fn ihc_client_register(&self, handler: IhcEventHandler) -> Result<(), IhcError> {
		if !self.is_ihc() {
			return Err(IhcError::NotIhcChannel);
		}
		let mut slot = self.ihc.lock();
		if slot.is_some() {
			return Err(IhcError::AlreadyRegistered);
		}
		*slot = Some(Arc::new(IhcClient::new(handler)));
		info!("HIF{}: IHC client registered", self.idx());
		Ok(())
	}

	/// Drop the IHC client, draining both delivery FIFOs. Leftover fill
	/// is reported but not fatal.
	pub fn ihc_client_unregister(&self) {
		let Some(client) = self.ihc.lock().take() else {
			return;
		};

		let rx_level = client.rx_fill_level();
		if rx_level != 0 {
			info!("HIF{}: IHC RX queue not empty ({rx_level})", self.idx());
		}
		let txconf_level = client.txconf_fill_level();
		if txconf_level != 0 {
			info!(
				"HIF{}: IHC txconf queue not empty ({txconf_level})",
				self.idx()
			);
		}

		while client.rx_fifo.lock().dequeue().is_some() {}
		while client.txconf_fifo.lock().dequeue().is_some() {}
		while client.tx_fifo.lock().dequeue().is_some() {}

		info!("HIF{}: IHC client unregistered", self.idx());
	}

	fn ihc_client(&self) -> Option<Arc<IhcClient>> {
		self.ihc.lock().clone()
	}

	/// Queue an RPC frame for transmission to `dst_phy`. The frame is
	/// copied behind a HIF TX header, padded to the wire minimum, and
	/// sent from the IHC TX worker.
	pub fn ihc_xmit(&self, dst_phy: PhyIfId, frame: &[u8]) -> Result<(), IhcError> {
		let client = self.ihc_client().ok_or(IhcError::NoClient)?;

		let mut pkt = TxPkt::with_headroom();
		pkt.head_mut().extend_from_slice(frame);
		pkt.pad_to(IHC_MIN_FRAME);

		CtHifTxHdr {
			chid: self.idx(),
			queue: 0,
			flags: HifTxFlags::IHC | HifTxFlags::INJECT,
			e_phy_ifs: be32::from_ne(1u32 << dst_phy as u32),
			..Default::default()
		}
		.write_to(pkt.head_mut());

		if client.tx_fifo.lock().enqueue(pkt).is_err() {
			client.tx_dropped.fetch_add(1, Ordering::Relaxed);
			error!("HIF{}: IHC TX FIFO full, frame dropped", self.idx());
			return Err(IhcError::FifoFull);
		}

		self.env().schedule(Work::IhcTx(self.idx()));
		Ok(())
	}

	/// IHC TX worker: drain queued frames onto the TX ring. Shares the
	/// ring with normal netdev TX, so entries go in under the TX lock.
	pub fn ihc_tx_work(&self) {
		let Some(client) = self.ihc_client() else {
			return;
		};

		loop {
			let Some(pkt) = client.tx_fifo.lock().dequeue() else {
				break;
			};

			let head_len = pkt.head_len();
			let Ok(pa) = self.env().map_single(pkt.head().as_ptr(), head_len) else {
				error!("HIF{}: cannot map IHC frame, dropped", self.idx());
				break;
			};

			let guard = self.lock_tx().lock();
			self.tx_pool()
				.put_map_frag(0, pa, head_len as u32, Some(pkt), TxMapKind::Ihc);

			if self.tx_ring().enqueue(pa, head_len as u32, true).is_err() {
				let owner = self.tx_pool().unroll_map_full(&**self.env(), 0);
				drop(guard);
				drop(owner);
				error!("HIF{}: IHC frame enqueue failed, dropped", self.idx());
				break;
			}

			self.tx_pool().update_wr_idx(1);
			drop(guard);

			self.csr().tx_dma_start(self.idx());
			self.xstats.ihc_tx.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// RX-path hand-off of a frame flagged IHC. Never reaches the stack.
	pub(crate) fn ihc_dispatch_rx(&self, pkt: RxPacket, i_phy_if: u8) -> Result<(), IhcError> {
		let Some(client) = self.ihc_client() else {
			warn!("HIF{}: IHC message on non-IHC channel", self.idx());
			return Err(IhcError::NoClient);
		};

		if client
			.rx_fifo
			.lock()
			.enqueue(IhcRxPkt { pkt, i_phy_if })
			.is_err()
		{
			error!("HIF{}: IHC RX FIFO full", self.idx());
			return Err(IhcError::FifoFull);
		}

		self.env().schedule(Work::IhcService(self.idx()));
		Ok(())
	}

	/// Confirm-path hand-off of a transmitted IHC frame's payload.
	pub(crate) fn ihc_put_tx_conf(&self, payload: Vec<u8>) -> bool {
		let Some(client) = self.ihc_client() else {
			return false;
		};
		if client.txconf_fifo.lock().enqueue(payload).is_err() {
			return false;
		}
		self.env().schedule(Work::IhcService(self.idx()));
		true
	}

	/// Workqueue service routine: report fill levels to the client's
	/// event handler. Confirmations first, then received frames.
	pub fn ihc_service(&self) {
		let Some(client) = self.ihc_client() else {
			return;
		};

		if client.txconf_fill_level() > 0 {
			(client.handler)(IhcEvent::TxDoneInd);
		}
		if client.rx_fill_level() > 0 {
			(client.handler)(IhcEvent::RxPktInd);
		}
	}

	/// Client side: fetch one received IHC frame.
	pub fn ihc_receive_pkt(&self) -> Option<IhcRxPkt> {
		self.ihc_client()?.rx_fifo.lock().dequeue()
	}

	/// Client side: fetch one TX confirmation (the confirmed frame's
	/// payload, header stripped).
	pub fn ihc_receive_tx_conf(&self) -> Option<Vec<u8>> {
		self.ihc_client()?.txconf_fifo.lock().dequeue()
	}
}
