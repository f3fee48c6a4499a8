//! Buffer descriptor rings shared with the HIF DMA engine.
//!
//! A ring is a power-of-two array of 8-byte descriptors in DMA-coherent
//! memory. Word 0 carries ownership (`OWN`), the last-in-frame mark
//! (`LIFM`) and the buffer length; word 1 carries the buffer bus address.
//! Software sets `OWN` to hand a descriptor to the engine; the engine
//! clears it when done, writing length and `LIFM` back on the RX side.
//!
//! Indices are free-running counters and are only ever masked on use, so
//! rollover needs no special casing. One slot stays unused to tell a full
//! ring from an empty one.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering, fence};

use thiserror::Error;

use crate::env::{CoherentBuffer, DmaAddr, DmaError, HifEnv};

/// Descriptor size in bytes: two 32-bit words.
const BD_SIZE: usize = 8;
/// Write-back table entry size.
const WB_SIZE: usize = 8;

const BD_CTRL_OWN: u32 = 1 << 31;
const BD_CTRL_LIFM: u32 = 1 << 30;
const BD_LEN_MASK: u32 = 0xffff;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
	#[error("BD ring full")]
	Full,
	#[error("out of coherent memory")]
	NoMem,
}

impl From<DmaError> for RingError {
	fn from(_err: DmaError) -> Self {
		RingError::NoMem
	}
}

/// A descriptor read back from the RX ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxBd {
	pub len: u32,
	pub lifm: bool,
}

/// One segment of a scatter-gather frame.
#[derive(Debug, Clone, Copy)]
pub struct TxSeg {
	pub pa: DmaAddr,
	pub len: u32,
}

/// Producer/consumer view of one hardware BD ring.
///
/// The producer and the consumer may live in different execution
/// contexts (TX enqueue vs. TX-confirm drain); the index atomics carry
/// the release/acquire edge between them. Descriptor memory itself is
/// only accessed through volatile operations.
pub struct BdRing {
	bds: CoherentBuffer,
	wb: CoherentBuffer,
	rd: AtomicU32,
	wr: AtomicU32,
	len: u32,
	mask: u32,
}

impl BdRing {
	pub fn new(env: &Arc<dyn HifEnv>, len: usize) -> Result<Self, RingError> {
		assert!(len.is_power_of_two(), "BD ring length must be a power of two");
		assert!(len <= (BD_LEN_MASK as usize + 1));

		let bds = CoherentBuffer::new(env.clone(), len * BD_SIZE, 64)?;
		let wb = CoherentBuffer::new(env.clone(), len * WB_SIZE, 64)?;

		Ok(Self {
			bds,
			wb,
			rd: AtomicU32::new(0),
			wr: AtomicU32::new(0),
			len: len as u32,
			mask: len as u32 - 1,
		})
	}

	pub fn len(&self) -> u32 {
		self.len
	}

	/// Bus address of the descriptor array, for the ring base register.
	pub fn base_pa(&self) -> DmaAddr {
		self.bds.pa()
	}

	/// Bus address and entry count of the write-back table.
	pub fn wb_table(&self) -> (DmaAddr, u32) {
		(self.wb.pa(), self.len)
	}

	fn bd_word(&self, idx: u32, word: usize) -> *mut u32 {
		let slot = (idx & self.mask) as usize;
		unsafe {
			self.bds
				.va()
				.as_ptr()
				.add(slot * BD_SIZE)
				.cast::<u32>()
				.add(word)
		}
	}

	/// Free descriptors. One slot is reserved to distinguish a full ring
	/// from an empty one.
	pub fn unused(&self) -> u32 {
		let wr = self.wr.load(Ordering::Relaxed);
		let rd = self.rd.load(Ordering::Acquire);
		self.len - wr.wrapping_sub(rd) - 1
	}

	/// True while the ring accepts at least one more buffer.
	pub fn can_accept(&self) -> bool {
		self.unused() > 0
	}

	/// Publish one buffer to the engine.
	pub fn enqueue(&self, pa: DmaAddr, len: u32, lifm: bool) -> Result<(), RingError> {
		if self.unused() == 0 {
			return Err(RingError::Full);
		}
		let wr = self.wr.load(Ordering::Relaxed);

		unsafe {
			self.bd_word(wr, 1).write_volatile(pa.as_u32());
		}
		// The engine must never observe OWN before the address.
		fence(Ordering::Release);
		let mut ctrl = BD_CTRL_OWN | (len & BD_LEN_MASK);
		if lifm {
			ctrl |= BD_CTRL_LIFM;
		}
		unsafe {
			self.bd_word(wr, 0).write_volatile(ctrl);
		}

		self.wr.store(wr.wrapping_add(1), Ordering::Release);
		Ok(())
	}

	/// Publish a whole frame. The head descriptor's `OWN` bit is written
	/// last so the engine cannot race into a half-written frame; `LIFM`
	/// goes on the final segment.
	pub fn enqueue_frame(&self, segs: &[TxSeg]) -> Result<(), RingError> {
		assert!(!segs.is_empty());
		if self.unused() < segs.len() as u32 {
			return Err(RingError::Full);
		}
		let wr = self.wr.load(Ordering::Relaxed);

		for (i, seg) in segs.iter().enumerate().skip(1) {
			let mut ctrl = BD_CTRL_OWN | (seg.len & BD_LEN_MASK);
			if i == segs.len() - 1 {
				ctrl |= BD_CTRL_LIFM;
			}
			unsafe {
				self.bd_word(wr.wrapping_add(i as u32), 1)
					.write_volatile(seg.pa.as_u32());
				self.bd_word(wr.wrapping_add(i as u32), 0).write_volatile(ctrl);
			}
		}

		unsafe {
			self.bd_word(wr, 1).write_volatile(segs[0].pa.as_u32());
		}
		fence(Ordering::Release);
		let mut ctrl = BD_CTRL_OWN | (segs[0].len & BD_LEN_MASK);
		if segs.len() == 1 {
			ctrl |= BD_CTRL_LIFM;
		}
		unsafe {
			self.bd_word(wr, 0).write_volatile(ctrl);
		}

		self.wr
			.store(wr.wrapping_add(segs.len() as u32), Ordering::Release);
		Ok(())
	}

	/// Consume one RX descriptor the engine has handed back.
	pub fn dequeue_rx(&self) -> Option<RxBd> {
		let rd = self.rd.load(Ordering::Relaxed);
		if rd == self.wr.load(Ordering::Acquire) {
			return None;
		}

		let ctrl = unsafe { self.bd_word(rd, 0).read_volatile() };
		if ctrl & BD_CTRL_OWN != 0 {
			// Still owned by the engine.
			return None;
		}
		fence(Ordering::Acquire);

		self.rd.store(rd.wrapping_add(1), Ordering::Release);
		Some(RxBd {
			len: ctrl & BD_LEN_MASK,
			lifm: ctrl & BD_CTRL_LIFM != 0,
		})
	}

	/// Advance past one confirmed TX descriptor. `false` means the engine
	/// has not released the slot yet (try again on the next poll).
	pub fn dequeue_tx_conf(&self) -> bool {
		let rd = self.rd.load(Ordering::Relaxed);
		if rd == self.wr.load(Ordering::Acquire) {
			return false;
		}

		let ctrl = unsafe { self.bd_word(rd, 0).read_volatile() };
		if ctrl & BD_CTRL_OWN != 0 {
			return false;
		}
		fence(Ordering::Acquire);

		self.rd.store(rd.wrapping_add(1), Ordering::Release);
		true
	}

	/// Clear all descriptors and indices; used on resume after the engine
	/// has been reset.
	pub fn reset(&self) {
		self.bds.zero();
		self.wb.zero();
		self.rd.store(0, Ordering::Release);
		self.wr.store(0, Ordering::Release);
	}

	pub fn rd_idx(&self) -> u32 {
		self.rd.load(Ordering::Relaxed)
	}

	pub fn wr_idx(&self) -> u32 {
		self.wr.load(Ordering::Relaxed)
	}
}

/// Hardware-side helpers for the test suites: complete descriptors the
/// way the engine would.
#[cfg(test)]
impl BdRing {
	/// Engine completes the next outstanding descriptor: clears `OWN` and,
	/// on the RX side, writes back length and `LIFM`.
	pub(crate) fn hw_complete(&self, hw_idx: u32, len: u32, lifm: bool) -> DmaAddr {
		let ctrl = unsafe { self.bd_word(hw_idx, 0).read_volatile() };
		assert_ne!(ctrl & BD_CTRL_OWN, 0, "descriptor not owned by hardware");
		let pa = unsafe { self.bd_word(hw_idx, 1).read_volatile() };
		let mut new_ctrl = len & BD_LEN_MASK;
		if lifm {
			new_ctrl |= BD_CTRL_LIFM;
		}
		unsafe { self.bd_word(hw_idx, 0).write_volatile(new_ctrl) };
		DmaAddr::new(pa)
	}

	pub(crate) fn hw_peek(&self, hw_idx: u32) -> (u32, DmaAddr) {
		let ctrl = unsafe { self.bd_word(hw_idx, 0).read_volatile() };
		let pa = unsafe { self.bd_word(hw_idx, 1).read_volatile() };
		(ctrl, DmaAddr::new(pa))
	}
}
