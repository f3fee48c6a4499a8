//! Packet representations on both sides of the datapath.
//!
//! RX frames are assembled zero-copy from pool pages: the first BD of a
//! frame becomes the packet head, further BDs (fragmented frames) are
//! appended as page fragments. TX frames come from the stack as a linear
//! head plus refcounted page fragments and can be linearised when the
//! ring or the SG limit forces it.

use alloc::collections::TryReserveError;
use alloc::vec::Vec;
use smallvec::SmallVec;

use crate::config::MAX_TX_FRAGS;
use crate::ct::HIF_HDR_SIZE;
use crate::env::Page;

/// A view into a pool page: `len` bytes starting at `offset`.
#[derive(Debug, Clone)]
pub struct PageSlice {
	page: Page,
	offset: usize,
	len: usize,
}

impl PageSlice {
	pub fn new(page: Page, offset: usize, len: usize) -> Self {
		Self { page, offset, len }
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	pub fn page(&self) -> &Page {
		&self.page
	}

	pub fn data(&self) -> &[u8] {
		// The pool synced the mapping for the CPU before handing the page
		// to the packet.
		unsafe { self.page.slice(self.offset, self.len) }
	}
}

/// A received frame. Owns references to the backing pages; dropping the
/// packet releases them.
#[derive(Debug)]
pub struct RxPacket {
	head: PageSlice,
	frags: SmallVec<[PageSlice; 4]>,
}

impl RxPacket {
	pub fn new(head: PageSlice) -> Self {
		Self {
			head,
			frags: SmallVec::new(),
		}
	}

	pub fn add_frag(&mut self, frag: PageSlice) {
		self.frags.push(frag);
	}

	/// Linear head of the frame.
	pub fn data(&self) -> &[u8] {
		self.head.data()
	}

	/// Drop `n` bytes from the front of the head (header stripping).
	pub fn pull(&mut self, n: usize) {
		assert!(n <= self.head.len);
		self.head.offset += n;
		self.head.len -= n;
	}

	pub fn head_len(&self) -> usize {
		self.head.len
	}

	pub fn frags(&self) -> &[PageSlice] {
		&self.frags
	}

	pub fn total_len(&self) -> usize {
		self.head.len + self.frags.iter().map(PageSlice::len).sum::<usize>()
	}
}

/// One scatter-gather fragment of a TX frame.
#[derive(Debug, Clone)]
pub struct TxFrag {
	pub page: Page,
	pub offset: usize,
	pub len: usize,
}

/// A frame handed down by the stack for transmission.
///
/// The head reserves [`HIF_HDR_SIZE`] bytes of headroom; the enqueue path
/// writes the in-band TX header there. Once submitted the packet lives in
/// the TX tracker until the confirm path releases it.
#[derive(Debug)]
pub struct TxPkt {
	head: Vec<u8>,
	frags: SmallVec<[TxFrag; MAX_TX_FRAGS]>,
	/// Stack requests a hardware egress timestamp.
	pub hw_tstamp: bool,
	/// Opaque stack handle reported back with the egress timestamp.
	pub cookie: u64,
}

impl TxPkt {
	/// Build a packet from a linear payload. Headroom for the in-band
	/// header is reserved in front.
	pub fn new(payload: &[u8]) -> Self {
		let mut head = Vec::with_capacity(HIF_HDR_SIZE + payload.len());
		head.resize(HIF_HDR_SIZE, 0);
		head.extend_from_slice(payload);
		Self {
			head,
			frags: SmallVec::new(),
			hw_tstamp: false,
			cookie: 0,
		}
	}

	/// Build an empty packet with header headroom only; used by the IHC
	/// transport which appends the RPC frame afterwards.
	pub fn with_headroom() -> Self {
		Self::new(&[])
	}

	pub fn add_frag(&mut self, page: Page, offset: usize, len: usize) {
		self.frags.push(TxFrag { page, offset, len });
	}

	pub fn nfrags(&self) -> usize {
		self.frags.len()
	}

	pub fn frags(&self) -> &[TxFrag] {
		&self.frags
	}

	/// Full linear part including the header area.
	pub fn head(&self) -> &[u8] {
		&self.head
	}

	pub fn head_mut(&mut self) -> &mut Vec<u8> {
		&mut self.head
	}

	pub fn head_len(&self) -> usize {
		self.head.len()
	}

	/// Frame length as the stack counts it: everything past the header.
	pub fn payload_len(&self) -> usize {
		self.head.len() - HIF_HDR_SIZE
			+ self.frags.iter().map(|f| f.len).sum::<usize>()
	}

	/// Copy all fragments into the linear head. Fails only on allocation
	/// failure, in which case the packet is unchanged.
	pub fn linearize(&mut self) -> Result<(), TryReserveError> {
		let extra: usize = self.frags.iter().map(|f| f.len).sum();
		self.head.try_reserve(extra)?;
		for frag in self.frags.drain(..) {
			// Fragment pages are CPU-owned until the mapping happens.
			let data = unsafe { frag.page.slice(frag.offset, frag.len) };
			self.head.extend_from_slice(data);
		}
		Ok(())
	}

	/// Pad the linear part with zeroes up to `len` bytes.
	pub fn pad_to(&mut self, len: usize) {
		if self.head.len() < len {
			self.head.resize(len, 0);
		}
	}
}
