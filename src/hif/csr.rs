//! HIF register file and the sequenced CSR contract.
//!
//! The register map follows the S32G reference manual: one global block
//! at the base of the HIF space, then one 0x100-byte block per channel.
//! All driver access to the hardware goes through [`HifCsr`]; the rest of
//! the crate never touches raw MMIO.

use bitflags::bitflags;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

use super::HifError;
use crate::config::{HIF_CHANNELS, USE_BD_POLLING};
use crate::env::{DmaAddr, HifEnv};

/// Byte size of one per-channel register block.
const CHNL_BLOCK_SIZE: usize = 0x100;
/// Offset of channel 0's block from the HIF base.
const CHNL_BLOCK_BASE: usize = 0x100;
/// Total register space: global block plus one block per channel.
pub const CSR_SPACE: usize = CHNL_BLOCK_BASE + HIF_CHANNELS * CHNL_BLOCK_SIZE;

register_structs! {
	/// Global HIF block.
	HifRegs {
		(0x000 => version: ReadOnly<u32>),
		(0x004 => tx_poll_ctrl: ReadWrite<u32>),
		(0x008 => rx_poll_ctrl: ReadWrite<u32>),
		(0x00c => misc: ReadWrite<u32, Misc::Register>),
		(0x010 => timeout: ReadWrite<u32>),
		(0x014 => soft_reset: ReadWrite<u32>),
		(0x018 => _reserved0),
		(0x040 => int_src: ReadOnly<u32, GlobalIntSrc::Register>),
		(0x044 => _reserved1),
		(0x068 => err_int_src: ReadWrite<u32>),
		(0x06c => err_int_en: ReadWrite<u32>),
		(0x070 => tx_fifo_err_int_src: ReadWrite<u32>),
		(0x074 => tx_fifo_err_int_en: ReadWrite<u32>),
		(0x078 => rx_fifo_err_int_src: ReadWrite<u32>),
		(0x07c => rx_fifo_err_int_en: ReadWrite<u32>),
		(0x080 => _reserved2),
		(0x084 => tx_actv: ReadOnly<u32>),
		(0x088 => _reserved3),
		(0x08c => dxr_tx_fifo_cnt: ReadOnly<u32>),
		(0x090 => _reserved4),
		(0x0a8 => rx_actv: ReadOnly<u32>),
		(0x0ac => _reserved5),
		(0x0c4 => dma_base_addr: ReadWrite<u32>),
		(0x0c8 => dma_burst_size: ReadWrite<u32>),
		(0x0cc => rx_queue_map: ReadWrite<u32>),
		(0x0d0 => ltc_pkt_ctrl: ReadWrite<u32>),
		(0x0d4 => _reserved6),
		(0x100 => @END),
	}
}

register_structs! {
	/// One HIF channel block, offsets relative to the block base.
	HifChnlRegs {
		(0x000 => ctrl: ReadWrite<u32, ChnlCtrl::Register>),
		(0x004 => rx_bdp_wr_low: ReadWrite<u32>),
		(0x008 => rx_bdp_wr_high: ReadWrite<u32>),
		(0x00c => rx_bdp_rd_low: ReadWrite<u32>),
		(0x010 => rx_bdp_rd_high: ReadWrite<u32>),
		(0x014 => tx_bdp_wr_low: ReadWrite<u32>),
		(0x018 => tx_bdp_wr_high: ReadWrite<u32>),
		(0x01c => tx_bdp_rd_low: ReadWrite<u32>),
		(0x020 => tx_bdp_rd_high: ReadWrite<u32>),
		(0x024 => rx_wrbk_bd_buffer_size: ReadWrite<u32>),
		(0x028 => rx_start: ReadWrite<u32>),
		(0x02c => tx_wrbk_bd_buffer_size: ReadWrite<u32>),
		(0x030 => tx_start: ReadWrite<u32>),
		(0x034 => _reserved0),
		(0x060 => int_src: ReadWrite<u32, ChnlInt::Register>),
		(0x064 => int_en: ReadWrite<u32, ChnlInt::Register>),
		(0x068 => _reserved1),
		(0x080 => rx_pkt_cnt: ReadOnly<u32>),
		(0x084 => tx_pkt_cnt: ReadOnly<u32>),
		(0x088 => _reserved2),
		(0x090 => bdp_tx_fifo_cnt: ReadOnly<u32>),
		(0x094 => _reserved3),
		(0x0d0 => bdp_rx_fifo_cnt: ReadOnly<u32>),
		(0x0d4 => _reserved4),
		(0x0e4 => ltc_max_pkt: ReadWrite<u32>),
		(0x0e8 => abs_int_timer: ReadWrite<u32>),
		(0x0ec => abs_frame_count: ReadWrite<u32>),
		(0x0f0 => int_coal_en: ReadWrite<u32, CoalEn::Register>),
		(0x0f4 => _reserved5),
		(0x100 => @END),
	}
}

register_bitfields![
	u32,

	Misc [
		TIMEOUT_EN OFFSET(0) NUMBITS(1) [],
		BD_START_SEQ_NUM OFFSET(16) NUMBITS(16) [],
	],
	GlobalIntSrc [
		GLOBAL OFFSET(0) NUMBITS(1) [],
		CH0 OFFSET(1) NUMBITS(1) [],
		CH1 OFFSET(2) NUMBITS(1) [],
		CH2 OFFSET(3) NUMBITS(1) [],
		CH3 OFFSET(4) NUMBITS(1) [],
		HIF_ERR OFFSET(5) NUMBITS(1) [],
		HIF_TX_FIFO_ERR OFFSET(6) NUMBITS(1) [],
		HIF_RX_FIFO_ERR OFFSET(7) NUMBITS(1) [],
	],
	ChnlCtrl [
		TX_DMA_EN OFFSET(0) NUMBITS(1) [],
		TX_BDP_POLL_CNTR_EN OFFSET(1) NUMBITS(1) [],
		BDP_CH_START_WSTB OFFSET(2) NUMBITS(1) [],
		RX_DMA_EN OFFSET(16) NUMBITS(1) [],
		RX_BDP_POLL_CNTR_EN OFFSET(17) NUMBITS(1) [],
	],
	ChnlInt [
		CH_INT OFFSET(0) NUMBITS(1) [],
		RX_CBD OFFSET(1) NUMBITS(1) [],
		RX_PKT OFFSET(2) NUMBITS(1) [],
		TX_CBD OFFSET(3) NUMBITS(1) [],
		TX_PKT OFFSET(4) NUMBITS(1) [],
		BDP_RD_RX_TIMEOUT OFFSET(5) NUMBITS(1) [],
		BDP_WR_RX_TIMEOUT OFFSET(6) NUMBITS(1) [],
		BDP_RD_TX_TIMEOUT OFFSET(7) NUMBITS(1) [],
		BDP_WR_TX_TIMEOUT OFFSET(8) NUMBITS(1) [],
		DXR_RX_TIMEOUT OFFSET(9) NUMBITS(1) [],
		DXR_TX_TIMEOUT OFFSET(10) NUMBITS(1) [],
	],
	CoalEn [
		TIME_ENABLE OFFSET(0) NUMBITS(1) [],
		FRAME_ENABLE OFFSET(1) NUMBITS(1) [],
	],
];

bitflags! {
	/// Channel interrupt bits as a plain word, for the mask arithmetic the
	/// ISR does across the whole register.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct ChnlIrq: u32 {
		const CH_INT = 1 << 0;
		const RX_CBD = 1 << 1;
		const RX_PKT = 1 << 2;
		const TX_CBD = 1 << 3;
		const TX_PKT = 1 << 4;
		const BDP_RD_RX_TIMEOUT = 1 << 5;
		const BDP_WR_RX_TIMEOUT = 1 << 6;
		const BDP_RD_TX_TIMEOUT = 1 << 7;
		const BDP_WR_TX_TIMEOUT = 1 << 8;
		const DXR_RX_TIMEOUT = 1 << 9;
		const DXR_TX_TIMEOUT = 1 << 10;
	}
}

impl ChnlIrq {
	pub const RX: ChnlIrq = ChnlIrq::RX_CBD.union(ChnlIrq::RX_PKT);
	pub const TX: ChnlIrq = ChnlIrq::TX_CBD.union(ChnlIrq::TX_PKT);
}

/// Interrupt sources that must stay masked once they fired. The BDP/DXR
/// timeout machinery misfires under load (hardware erratum); the sources
/// are ACKed but never re-enabled.
pub const ERRATUM_IRQS: ChnlIrq = ChnlIrq::BDP_RD_RX_TIMEOUT
	.union(ChnlIrq::BDP_WR_RX_TIMEOUT)
	.union(ChnlIrq::BDP_RD_TX_TIMEOUT)
	.union(ChnlIrq::BDP_WR_TX_TIMEOUT)
	.union(ChnlIrq::DXR_RX_TIMEOUT)
	.union(ChnlIrq::DXR_TX_TIMEOUT);

bitflags! {
	/// Events a channel ISR pass reports to the driver.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct ChnlEvent: u32 {
		const RX_IRQ = 1 << 0;
		const TX_IRQ = 1 << 1;
	}
}

bitflags! {
	/// Global error groups observed by [`HifCsr::global_isr`].
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct HifErrEvent: u32 {
		const ERR = 1 << 0;
		const TX_FIFO_ERR = 1 << 1;
		const RX_FIFO_ERR = 1 << 2;
	}
}

/// Group gate bit inside each of the three error-enable registers.
const ERR_GROUP_BIT: u32 = 1 << 0;

/// Handle on the HIF register space.
///
/// Copyable by design: the ISR, the poll loop and the control plane all
/// hold one. Register-level races are resolved the way the hardware
/// demands (mask-then-ACK sequences); the callers serialise per channel.
#[derive(Clone, Copy)]
pub struct HifCsr {
	base: *mut u8,
}

// MMIO access only; the pointer itself is freely shareable.
unsafe impl Send for HifCsr {}
unsafe impl Sync for HifCsr {}

impl HifCsr {
	/// # Safety
	///
	/// `base` must point to the HIF register space (or a faithful model of
	/// it, [`CSR_SPACE`] bytes) and stay valid for the driver's lifetime.
	pub unsafe fn new(base: *mut u8) -> Self {
		Self { base }
	}

	fn regs(&self) -> &HifRegs {
		unsafe { &*self.base.cast() }
	}

	fn chnl(&self, id: u8) -> &HifChnlRegs {
		debug_assert!((id as usize) < HIF_CHANNELS);
		let offset = CHNL_BLOCK_BASE + (id as usize & 0x3) * CHNL_BLOCK_SIZE;
		unsafe { &*self.base.add(offset).cast() }
	}

	/// Bring up the global HIF block: quiesce the error interrupts, soft
	/// reset (not on S32G3), program the DMA and queue-map defaults, then
	/// enable the error interrupt groups.
	pub fn init(&self, env: &dyn HifEnv, soft_reset: bool) -> Result<(), HifError> {
		let regs = self.regs();

		regs.err_int_en.set(0);
		regs.tx_fifo_err_int_en.set(0);
		regs.rx_fifo_err_int_en.set(0);
		regs.err_int_src.set(0xffff_ffff);
		regs.tx_fifo_err_int_src.set(0xffff_ffff);
		regs.rx_fifo_err_int_src.set(0xffff_ffff);

		if soft_reset {
			regs.soft_reset.set(0xf);
			let mut ii = 0u32;
			while regs.soft_reset.get() != 0 {
				ii += 1;
				if ii > 1000 {
					return Err(HifError::ResetTimeout);
				}
				env.usleep(1000);
			}
		}

		if USE_BD_POLLING {
			regs.tx_poll_ctrl.set((0xff << 16) | 0xff);
			regs.rx_poll_ctrl.set((0xff << 16) | 0xff);
		}

		regs.misc
			.write(Misc::TIMEOUT_EN::SET + Misc::BD_START_SEQ_NUM.val(0));
		regs.timeout.set(100_000_000);
		// RX queue n drains into channel n.
		regs.rx_queue_map.set(0x3322_1100);
		// 128-byte bursts.
		regs.dma_burst_size.set(0);
		regs.dma_base_addr.set(0);
		// Must stay disabled; the LTC block is repurposed elsewhere.
		regs.ltc_pkt_ctrl.set(0);

		regs.err_int_en.set(0xffff_ffff & !ERR_GROUP_BIT);
		regs.tx_fifo_err_int_en.set(0xffff_ffff & !ERR_GROUP_BIT);
		regs.rx_fifo_err_int_en.set(0xffff_ffff & !ERR_GROUP_BIT);

		Ok(())
	}

	pub fn fini(&self) {
		let regs = self.regs();
		regs.err_int_en.set(0);
		regs.tx_fifo_err_int_en.set(0);
		regs.rx_fifo_err_int_en.set(0);
	}

	/// Mask the HIF error interrupt groups. Channel IRQs are unaffected.
	pub fn irq_mask_global(&self) {
		let regs = self.regs();
		regs.err_int_en.set(regs.err_int_en.get() & !ERR_GROUP_BIT);
		regs.tx_fifo_err_int_en
			.set(regs.tx_fifo_err_int_en.get() & !ERR_GROUP_BIT);
		regs.rx_fifo_err_int_en
			.set(regs.rx_fifo_err_int_en.get() & !ERR_GROUP_BIT);
	}

	pub fn irq_unmask_global(&self) {
		let regs = self.regs();
		regs.err_int_en.set(regs.err_int_en.get() | ERR_GROUP_BIT);
		regs.tx_fifo_err_int_en
			.set(regs.tx_fifo_err_int_en.get() | ERR_GROUP_BIT);
		regs.rx_fifo_err_int_en
			.set(regs.rx_fifo_err_int_en.get() | ERR_GROUP_BIT);
	}

	/// Service the HIF-global error interrupts: for each raised group,
	/// mask all sources, ACK the triggered ones and re-enable only those
	/// that did not fire. Triggered error sources stay disabled until a
	/// higher-level recovery re-initialises the block.
	pub fn global_isr(&self) -> HifErrEvent {
		let regs = self.regs();
		let glob = regs.int_src.extract();
		let mut events = HifErrEvent::empty();

		if glob.is_set(GlobalIntSrc::HIF_ERR) {
			let en = regs.err_int_en.get();
			regs.err_int_en.set(0);
			let src = regs.err_int_src.get();
			regs.err_int_src.set(src);
			regs.err_int_en.set(en & !src);
			if src & en & ERR_GROUP_BIT != 0 {
				warn!("HIF error interrupt ({src:#x})");
				events |= HifErrEvent::ERR;
			}
		}

		if glob.is_set(GlobalIntSrc::HIF_TX_FIFO_ERR) {
			let en = regs.tx_fifo_err_int_en.get();
			regs.tx_fifo_err_int_en.set(0);
			let src = regs.tx_fifo_err_int_src.get();
			regs.tx_fifo_err_int_src.set(src);
			regs.tx_fifo_err_int_en.set(en & !src);
			if src & en & ERR_GROUP_BIT != 0 {
				warn!("HIF TX FIFO error interrupt ({src:#x})");
				events |= HifErrEvent::TX_FIFO_ERR;
			}
		}

		if glob.is_set(GlobalIntSrc::HIF_RX_FIFO_ERR) {
			let en = regs.rx_fifo_err_int_en.get();
			regs.rx_fifo_err_int_en.set(0);
			let src = regs.rx_fifo_err_int_src.get();
			regs.rx_fifo_err_int_src.set(src);
			regs.rx_fifo_err_int_en.set(en & !src);
			if src & en & ERR_GROUP_BIT != 0 {
				warn!("HIF RX FIFO error interrupt ({src:#x})");
				events |= HifErrEvent::RX_FIFO_ERR;
			}
		}

		events
	}

	/// Channel bring-up: interrupts off and ACKed, DMA off, coalescing
	/// off, then enable the status interrupts while the RX/TX packet
	/// sources and the channel gate stay masked.
	pub fn chnl_init(&self, id: u8) {
		let chnl = self.chnl(id);

		chnl.int_en.set(0);
		chnl.int_src.set(0xffff_ffff);

		self.rx_disable(id);
		self.tx_disable(id);

		let _ = self.set_rx_irq_coalesce(id, 0, 0, true);

		chnl.int_en.set(
			0xffff_ffff
				& !(ChnlIrq::CH_INT | ChnlIrq::RX | ChnlIrq::TX).bits(),
		);
	}

	pub fn chnl_fini(&self, id: u8) {
		let chnl = self.chnl(id);
		chnl.int_coal_en.set(0);
		self.rx_disable(id);
		self.tx_disable(id);
		chnl.int_en.set(0);
	}

	pub fn rx_enable(&self, id: u8) {
		let chnl = self.chnl(id);
		if USE_BD_POLLING {
			chnl.ctrl
				.modify(ChnlCtrl::RX_DMA_EN::SET + ChnlCtrl::RX_BDP_POLL_CNTR_EN::SET);
		} else {
			chnl.ctrl.modify(ChnlCtrl::RX_DMA_EN::SET);
			self.rx_dma_start(id);
		}
	}

	pub fn rx_disable(&self, id: u8) {
		let chnl = self.chnl(id);
		chnl.ctrl
			.modify(ChnlCtrl::RX_DMA_EN::CLEAR + ChnlCtrl::RX_BDP_POLL_CNTR_EN::CLEAR);
		self.rx_irq_mask(id);
	}

	pub fn tx_enable(&self, id: u8) {
		let chnl = self.chnl(id);
		if USE_BD_POLLING {
			chnl.ctrl
				.modify(ChnlCtrl::TX_DMA_EN::SET + ChnlCtrl::TX_BDP_POLL_CNTR_EN::SET);
			self.tx_dma_start(id);
		} else {
			chnl.ctrl.modify(ChnlCtrl::TX_DMA_EN::SET);
		}
	}

	pub fn tx_disable(&self, id: u8) {
		let chnl = self.chnl(id);
		chnl.ctrl
			.modify(ChnlCtrl::TX_DMA_EN::CLEAR + ChnlCtrl::TX_BDP_POLL_CNTR_EN::CLEAR);
		self.tx_irq_mask(id);
	}

	/// Kick the RX BD processor (trigger mode only).
	pub fn rx_dma_start(&self, id: u8) {
		if !USE_BD_POLLING {
			self.chnl(id).rx_start.set(1);
		}
	}

	pub fn tx_dma_start(&self, id: u8) {
		if !USE_BD_POLLING {
			self.chnl(id).tx_start.set(1);
		}
	}

	/// Gate the whole channel interrupt.
	pub fn irq_mask(&self, id: u8) {
		let chnl = self.chnl(id);
		chnl.int_en.modify(ChnlInt::CH_INT::CLEAR);
	}

	pub fn irq_unmask(&self, id: u8) {
		let chnl = self.chnl(id);
		chnl.int_en.modify(ChnlInt::CH_INT::SET);
	}

	pub fn rx_irq_mask(&self, id: u8) {
		let chnl = self.chnl(id);
		chnl.int_en.set(chnl.int_en.get() & !ChnlIrq::RX.bits());
	}

	pub fn rx_irq_unmask(&self, id: u8) {
		let chnl = self.chnl(id);
		chnl.int_en.set(chnl.int_en.get() | ChnlIrq::RX.bits());
	}

	pub fn tx_irq_mask(&self, id: u8) {
		let chnl = self.chnl(id);
		chnl.int_en.set(chnl.int_en.get() & !ChnlIrq::TX.bits());
	}

	pub fn tx_irq_unmask(&self, id: u8) {
		let chnl = self.chnl(id);
		chnl.int_en.set(chnl.int_en.get() | ChnlIrq::TX.bits());
	}

	/// Channel interrupt service: mask everything, ACK what fired,
	/// re-enable the sources that did not fire, classify. Timeout sources
	/// ([`ERRATUM_IRQS`]) that fired are left masked for good.
	pub fn chnl_isr(&self, id: u8) -> (ChnlEvent, ChnlIrq) {
		let chnl = self.chnl(id);

		let en = chnl.int_en.get();
		chnl.int_en.set(0);
		let src = chnl.int_src.get();
		chnl.int_src.set(src);
		chnl.int_en.set(en & !src);

		let fired = ChnlIrq::from_bits_truncate(src & en);
		let mut events = ChnlEvent::empty();
		if fired.intersects(ChnlIrq::RX) {
			events |= ChnlEvent::RX_IRQ;
		}
		if fired.intersects(ChnlIrq::TX) {
			events |= ChnlEvent::TX_IRQ;
		}

		(events, fired & ERRATUM_IRQS)
	}

	pub fn set_rx_bd_ring_addr(&self, id: u8, pa: DmaAddr) {
		let chnl = self.chnl(id);
		chnl.rx_bdp_rd_low.set(pa.as_u32());
		chnl.rx_bdp_rd_high.set(0);
	}

	pub fn set_rx_wb_table(&self, id: u8, pa: DmaAddr, tbl_len: u32) {
		debug_assert!(tbl_len <= 0xffff);
		let chnl = self.chnl(id);
		chnl.rx_bdp_wr_low.set(pa.as_u32());
		chnl.rx_bdp_wr_high.set(0);
		chnl.rx_wrbk_bd_buffer_size.set(tbl_len);
	}

	pub fn set_tx_bd_ring_addr(&self, id: u8, pa: DmaAddr) {
		let chnl = self.chnl(id);
		chnl.tx_bdp_rd_low.set(pa.as_u32());
		chnl.tx_bdp_rd_high.set(0);
	}

	pub fn set_tx_wb_table(&self, id: u8, pa: DmaAddr, tbl_len: u32) {
		debug_assert!(tbl_len <= 0xffff);
		let chnl = self.chnl(id);
		chnl.tx_bdp_wr_low.set(pa.as_u32());
		chnl.tx_bdp_wr_high.set(0);
		chnl.tx_wrbk_bd_buffer_size.set(tbl_len);
	}

	/// Program RX interrupt coalescing. `frames == 0 && cycles == 0`
	/// disables it. Frame-count coalescing needs hardware support
	/// (`frame_coalesce_ok`); without it the call fails.
	pub fn set_rx_irq_coalesce(
		&self,
		id: u8,
		frames: u32,
		cycles: u32,
		frame_coalesce_ok: bool,
	) -> Result<(), HifError> {
		let chnl = self.chnl(id);

		chnl.int_coal_en.set(0);
		chnl.abs_frame_count.set(0);
		chnl.abs_int_timer.set(0);

		if frames == 0 && cycles == 0 {
			return Ok(());
		}
		if frames > 0 && !frame_coalesce_ok {
			return Err(HifError::CoalesceUnsupported);
		}

		if cycles > 0 {
			chnl.abs_int_timer.set(cycles);
			chnl.int_coal_en.modify(CoalEn::TIME_ENABLE::SET);
		}
		if frames > 0 {
			chnl.abs_frame_count.set(frames);
			chnl.int_coal_en.modify(CoalEn::FRAME_ENABLE::SET);
		}

		Ok(())
	}

	/// Read back the coalescing setting as `(frames, cycles)`.
	pub fn get_rx_irq_coalesce(&self, id: u8) -> (u32, u32) {
		let chnl = self.chnl(id);
		let en = chnl.int_coal_en.extract();

		if !en.is_set(CoalEn::TIME_ENABLE) && !en.is_set(CoalEn::FRAME_ENABLE) {
			return (0, 0);
		}
		let cycles = if en.is_set(CoalEn::TIME_ENABLE) {
			chnl.abs_int_timer.get()
		} else {
			0
		};
		let frames = if en.is_set(CoalEn::FRAME_ENABLE) {
			chnl.abs_frame_count.get()
		} else {
			0
		};
		(frames, cycles)
	}

	pub fn is_rx_dma_active(&self) -> bool {
		self.regs().rx_actv.get() != 0
	}

	pub fn is_tx_dma_active(&self) -> bool {
		self.regs().tx_actv.get() != 0
	}

	pub fn is_rx_bdp_fifo_empty(&self, id: u8) -> bool {
		self.chnl(id).bdp_rx_fifo_cnt.get() == 0
	}

	pub fn is_tx_bdp_fifo_empty(&self, id: u8) -> bool {
		self.chnl(id).bdp_tx_fifo_cnt.get() == 0
	}

	/// Bytes queued in the HIF TX FIFO.
	pub fn tx_fifo_fill_level(&self) -> u32 {
		8 * self.regs().dxr_tx_fifo_cnt.get()
	}

	pub fn rx_pkt_cnt(&self, id: u8) -> u32 {
		self.chnl(id).rx_pkt_cnt.get()
	}

	pub fn tx_pkt_cnt(&self, id: u8) -> u32 {
		self.chnl(id).tx_pkt_cnt.get()
	}

	pub fn version(&self) -> u32 {
		self.regs().version.get()
	}
}

/// Plain memory standing in for the register space; tests play the
/// hardware by poking words directly.
#[cfg(test)]
pub(crate) mod fake {
	use core::alloc::Layout;
	use core::ptr::NonNull;

	use super::{CHNL_BLOCK_BASE, CHNL_BLOCK_SIZE, CSR_SPACE, HifCsr};

	pub(crate) struct FakeCsr {
		mem: NonNull<u32>,
	}

	unsafe impl Send for FakeCsr {}
	unsafe impl Sync for FakeCsr {}

	const LAYOUT: Layout = unsafe { Layout::from_size_align_unchecked(CSR_SPACE, 4) };

	impl FakeCsr {
		pub(crate) fn new() -> Self {
			let mem = unsafe { alloc::alloc::alloc_zeroed(LAYOUT) };
			Self {
				mem: NonNull::new(mem.cast()).unwrap(),
			}
		}

		pub(crate) fn csr(&self) -> HifCsr {
			unsafe { HifCsr::new(self.mem.as_ptr().cast()) }
		}

		pub(crate) fn word(&self, byte_offset: usize) -> u32 {
			assert!(byte_offset < CSR_SPACE);
			unsafe { core::ptr::read_volatile(self.mem.as_ptr().add(byte_offset / 4)) }
		}

		pub(crate) fn set_word(&self, byte_offset: usize, value: u32) {
			assert!(byte_offset < CSR_SPACE);
			unsafe { core::ptr::write_volatile(self.mem.as_ptr().add(byte_offset / 4), value) };
		}

		pub(crate) fn chnl_word(&self, id: u8, rel: usize) -> u32 {
			self.word(CHNL_BLOCK_BASE + id as usize * CHNL_BLOCK_SIZE + rel)
		}

		pub(crate) fn set_chnl_word(&self, id: u8, rel: usize, value: u32) {
			self.set_word(CHNL_BLOCK_BASE + id as usize * CHNL_BLOCK_SIZE + rel, value);
		}
	}

	impl Drop for FakeCsr {
		fn drop(&mut self) {
			unsafe { alloc::alloc::dealloc(self.mem.as_ptr().cast(), LAYOUT) };
		}
	}
}

#[cfg(test)]
mod tests {
	use super::fake::FakeCsr;
	use super::*;
	use crate::env::TestEnv;

	const INT_SRC: usize = 0x60;
	const INT_EN: usize = 0x64;
	const COAL_EN: usize = 0xf0;
	const ABS_TIMER: usize = 0xe8;
	const ABS_FRAMES: usize = 0xec;

	#[test]
	fn chnl_init_leaves_pkt_irqs_masked() {
		let fake = FakeCsr::new();
		let csr = fake.csr();
		csr.chnl_init(0);

		let en = fake.chnl_word(0, INT_EN);
		assert_eq!(en & ChnlIrq::CH_INT.bits(), 0);
		assert_eq!(en & ChnlIrq::RX.bits(), 0);
		assert_eq!(en & ChnlIrq::TX.bits(), 0);
		// Status interrupts (timeouts etc.) are armed.
		assert_ne!(en & ERRATUM_IRQS.bits(), 0);
	}

	#[test]
	fn irq_gates_toggle_expected_bits() {
		let fake = FakeCsr::new();
		let csr = fake.csr();
		csr.chnl_init(1);

		csr.irq_unmask(1);
		csr.rx_irq_unmask(1);
		csr.tx_irq_unmask(1);
		let en = fake.chnl_word(1, INT_EN);
		assert_eq!(
			en & (ChnlIrq::CH_INT | ChnlIrq::RX | ChnlIrq::TX).bits(),
			(ChnlIrq::CH_INT | ChnlIrq::RX | ChnlIrq::TX).bits()
		);

		csr.rx_irq_mask(1);
		assert_eq!(fake.chnl_word(1, INT_EN) & ChnlIrq::RX.bits(), 0);
		csr.tx_irq_mask(1);
		assert_eq!(fake.chnl_word(1, INT_EN) & ChnlIrq::TX.bits(), 0);
		csr.irq_mask(1);
		assert_eq!(fake.chnl_word(1, INT_EN) & ChnlIrq::CH_INT.bits(), 0);
	}

	#[test]
	fn isr_classifies_and_acks() {
		let fake = FakeCsr::new();
		let csr = fake.csr();
		csr.chnl_init(0);
		csr.irq_unmask(0);
		csr.rx_irq_unmask(0);
		csr.tx_irq_unmask(0);

		fake.set_chnl_word(0, INT_SRC, (ChnlIrq::RX_PKT | ChnlIrq::TX_CBD).bits());
		let (events, timeouts) = csr.chnl_isr(0);
		assert_eq!(events, ChnlEvent::RX_IRQ | ChnlEvent::TX_IRQ);
		assert!(timeouts.is_empty());
		// ACK: the write cleared the source (memory-modelled).
		// Triggered sources are not re-enabled.
		let en = fake.chnl_word(0, INT_EN);
		assert_eq!(en & ChnlIrq::RX_PKT.bits(), 0);
		assert_eq!(en & ChnlIrq::TX_CBD.bits(), 0);
		assert_ne!(en & ChnlIrq::RX_CBD.bits(), 0);
	}

	#[test]
	fn erratum_timeouts_stay_masked() {
		let fake = FakeCsr::new();
		let csr = fake.csr();
		csr.chnl_init(0);

		fake.set_chnl_word(0, INT_SRC, ChnlIrq::DXR_RX_TIMEOUT.bits());
		let (events, timeouts) = csr.chnl_isr(0);
		assert!(events.is_empty());
		assert_eq!(timeouts, ChnlIrq::DXR_RX_TIMEOUT);
		assert_eq!(
			fake.chnl_word(0, INT_EN) & ChnlIrq::DXR_RX_TIMEOUT.bits(),
			0
		);

		// A second pass without new triggers reports nothing.
		let (events, timeouts) = csr.chnl_isr(0);
		assert!(events.is_empty());
		assert!(timeouts.is_empty());
	}

	#[test]
	fn coalesce_set_get_roundtrip() {
		let fake = FakeCsr::new();
		let csr = fake.csr();

		csr.set_rx_irq_coalesce(0, 0, 0, false).unwrap();
		assert_eq!(csr.get_rx_irq_coalesce(0), (0, 0));
		assert_eq!(fake.chnl_word(0, COAL_EN), 0);
		assert_eq!(fake.chnl_word(0, ABS_TIMER), 0);
		assert_eq!(fake.chnl_word(0, ABS_FRAMES), 0);

		csr.set_rx_irq_coalesce(0, 0, 3840, false).unwrap();
		assert_eq!(csr.get_rx_irq_coalesce(0), (0, 3840));

		// Frame-count coalescing needs silicon support.
		assert_eq!(
			csr.set_rx_irq_coalesce(0, 8, 0, false),
			Err(HifError::CoalesceUnsupported)
		);
		assert_eq!(csr.get_rx_irq_coalesce(0), (0, 0));

		csr.set_rx_irq_coalesce(0, 8, 3840, true).unwrap();
		assert_eq!(csr.get_rx_irq_coalesce(0), (8, 3840));
	}

	#[test]
	fn ring_addresses_program_low_and_zero_high() {
		let fake = FakeCsr::new();
		let csr = fake.csr();
		fake.set_chnl_word(2, 0x08, 0xdead_beef);
		fake.set_chnl_word(2, 0x10, 0xdead_beef);

		csr.set_rx_bd_ring_addr(2, DmaAddr::new(0x1234_5600));
		csr.set_rx_wb_table(2, DmaAddr::new(0x1234_5800), 256);
		assert_eq!(fake.chnl_word(2, 0x0c), 0x1234_5600);
		assert_eq!(fake.chnl_word(2, 0x10), 0);
		assert_eq!(fake.chnl_word(2, 0x04), 0x1234_5800);
		assert_eq!(fake.chnl_word(2, 0x08), 0);
		assert_eq!(fake.chnl_word(2, 0x24), 256);
	}

	#[test]
	fn global_init_without_reset() {
		let fake = FakeCsr::new();
		let csr = fake.csr();
		let env = TestEnv::new();

		csr.init(&*env, false).unwrap();
		assert_eq!(fake.word(0x10), 100_000_000);
		assert_eq!(fake.word(0xcc), 0x3322_1100);
		assert_ne!(fake.word(0x6c), 0);
	}

	#[test]
	fn global_init_reset_times_out_without_hardware() {
		let fake = FakeCsr::new();
		let csr = fake.csr();
		let env = TestEnv::new();

		// Nothing clears the soft-reset request in the fake block.
		assert_eq!(csr.init(&*env, true), Err(HifError::ResetTimeout));
	}

	#[test]
	fn global_isr_one_shot_disables_sources() {
		let fake = FakeCsr::new();
		let csr = fake.csr();
		let env = TestEnv::new();
		csr.init(&*env, false).unwrap();
		csr.irq_unmask_global();

		// Raise the error group with the group bit set.
		fake.set_word(0x40, 1 << 5);
		fake.set_word(0x68, ERR_GROUP_BIT | (1 << 3));
		let events = csr.global_isr();
		assert_eq!(events, HifErrEvent::ERR);
		// The triggered sources stay disabled.
		assert_eq!(fake.word(0x6c) & (ERR_GROUP_BIT | (1 << 3)), 0);
	}
}
