//! Compile-time tunables of the HIF datapath.

/// Default number of buffer descriptors per ring. Must be a power of two.
pub const DEFAULT_RING_LEN: usize = 256;

/// Usable RX buffer granule: half a page, so every page carries two
/// buffers and can be recycled by toggling the offset.
pub const RXB_TRUESIZE: usize = crate::env::PAGE_SIZE / 2;

/// Headroom left in front of every RX buffer for the stack.
pub const RXB_PAD: usize = 64;

/// Share of the truesize reserved for stack bookkeeping; not handed to
/// the hardware.
pub const RXB_OVERHEAD: usize = 320;

/// Buffer length published to the RX BD ring.
pub const RXB_DMA_SIZE: usize = RXB_TRUESIZE - RXB_PAD - RXB_OVERHEAD;

/// RX pool refill batch: once this many slots are free, the poll loop
/// refills and retriggers the RX DMA.
pub const BMAN_REFILL_THR: u32 = 32;

/// Upper bound of TX confirmations drained per poll. A tuning choice,
/// not a contract; anything >= 1 works.
pub const fn default_tx_work(ring_len: usize) -> u32 {
	(ring_len >> 1) as u32
}

/// Hardware scatter-gather limit per frame.
pub const MAX_SG_SEGMENTS: usize = 16;

/// Fragments a packet may carry before the enqueue path linearises it.
pub const MAX_TX_FRAGS: usize = MAX_SG_SEGMENTS - 2;

/// Descriptors a worst-case frame occupies (linear head + fragments + 1).
pub const TXBDS_MAX_NEEDED: u32 = (MAX_TX_FRAGS + 2) as u32;

/// Depth of the IHC RX / TX-confirmation / TX-work FIFOs.
pub const IHC_FIFO_DEPTH: usize = 32;

/// Minimal IHC frame length on the wire, TX header included.
pub const IHC_MIN_FRAME: usize = 68;

/// Default RX coalescing: time-based, in microseconds.
pub const DEFAULT_COALESCE_USECS: u32 = 128;

/// HIF channels provided by the silicon.
pub const HIF_CHANNELS: usize = 4;

/// Egress-timestamp references are 12 bits wide.
pub const ETS_REF_MASK: u16 = 0x0fff;

/// Outstanding egress-timestamp requests per netif.
pub const ETS_PENDING_DEPTH: usize = 64;

/// Poll ticks before a pending egress-timestamp request is reaped.
pub const ETS_PENDING_MAX_AGE: u32 = 64;

/// `true` drives the rings with the BD-poll counters instead of the
/// start-trigger registers.
pub const USE_BD_POLLING: bool = false;
