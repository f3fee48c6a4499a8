//! The PFE host interface: up to four DMA channels pairing an RX and a
//! TX BD ring with one interrupt line each.

pub mod bman;
pub mod chnl;
pub mod csr;
pub mod ihc;
pub mod netif;
pub mod ring;


use alloc::sync::Arc;

use thiserror::Error;

use crate::config::{DEFAULT_RING_LEN, HIF_CHANNELS};
use crate::env::HifEnv;
use chnl::{ChnlConfig, HifChnl};
use csr::{HifCsr, HifErrEvent};
use ring::RingError;

/// Silicon revision knobs the datapath cares about: S32G3 supports
/// frame-count coalescing and does not need the VLAN-insertion erratum
/// workaround or the HIF soft reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SiliconRev {
	#[default]
	S32g2,
	S32g3,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HifError {
	#[error("HIF soft reset timed out")]
	ResetTimeout,
	#[error("invalid HIF channel index")]
	InvalidChannel,
	#[error("channel exists")]
	ChannelExists,
	#[error("operation not valid in this channel state")]
	InvalidState,
	#[error("netif slot already bound")]
	NetifSlotBusy,
	#[error("frame-count coalescing unsupported on this silicon")]
	CoalesceUnsupported,
	#[error("out of memory")]
	NoMem,
}

impl From<RingError> for HifError {
	fn from(_err: RingError) -> Self {
		HifError::NoMem
	}
}

/// Global HIF configuration.
#[derive(Debug, Clone, Copy)]
pub struct HifConfig {
	pub silicon: SiliconRev,
	/// BD ring length for every channel; power of two.
	pub ring_len: usize,
}

impl Default for HifConfig {
	fn default() -> Self {
		Self {
			silicon: SiliconRev::default(),
			ring_len: DEFAULT_RING_LEN,
		}
	}
}

/// The HIF block: global CSR state plus the channel set.
pub struct Hif {
	env: Arc<dyn HifEnv>,
	csr: HifCsr,
	cfg: HifConfig,
	chnls: [Option<Arc<HifChnl>>; HIF_CHANNELS],
	ihc_chnl: Option<u8>,
}

impl core::fmt::Debug for Hif {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Hif").field("ihc_chnl", &self.ihc_chnl).finish_non_exhaustive()
	}
}

impl Hif {
	/// Bring up the HIF block.
	///
	/// # Safety
	///
	/// `csr_base` must point at the HIF register space and stay valid for
	/// the lifetime of the returned instance.
	pub unsafe fn new(
		env: Arc<dyn HifEnv>,
		csr_base: *mut u8,
		cfg: HifConfig,
	) -> Result<Self, HifError> {
		assert!(cfg.ring_len.is_power_of_two());
		let csr = unsafe { HifCsr::new(csr_base) };

		csr.init(&*env, cfg.silicon != SiliconRev::S32g3)?;

		Ok(Self {
			env,
			csr,
			cfg,
			chnls: [const { None }; HIF_CHANNELS],
			ihc_chnl: None,
		})
	}

	pub fn csr(&self) -> &HifCsr {
		&self.csr
	}

	/// Create one channel in the `Requested` state.
	pub fn create_chnl(&mut self, idx: u8, cfg: ChnlConfig) -> Result<Arc<HifChnl>, HifError> {
		if idx as usize >= HIF_CHANNELS {
			error!("invalid HIF instance number: {idx}");
			return Err(HifError::InvalidChannel);
		}
		if self.chnls[idx as usize].is_some() {
			return Err(HifError::ChannelExists);
		}
		if cfg.ihc && self.ihc_chnl.is_some() {
			// Only one channel per instance carries IHC.
			return Err(HifError::ChannelExists);
		}

		let chnl = Arc::new(HifChnl::new(
			self.env.clone(),
			self.csr,
			idx,
			self.cfg.ring_len,
			self.cfg.silicon == SiliconRev::S32g3,
			cfg,
		)?);

		if cfg.ihc {
			self.ihc_chnl = Some(idx);
		}
		self.chnls[idx as usize] = Some(chnl.clone());
		Ok(chnl)
	}

	pub fn chnl(&self, idx: u8) -> Option<&Arc<HifChnl>> {
		self.chnls.get(idx as usize)?.as_ref()
	}

	/// The channel designated for inter-host control, if any.
	pub fn ihc_chnl(&self) -> Option<&Arc<HifChnl>> {
		self.chnl(self.ihc_chnl?)
	}

	/// Tear one channel down and forget it.
	pub fn remove_chnl(&mut self, idx: u8) {
		let Some(chnl) = self.chnls.get_mut(idx as usize).and_then(Option::take) else {
			return;
		};
		if chnl.is_ihc() {
			chnl.ihc_client_unregister();
			self.ihc_chnl = None;
		}
		chnl.close();
	}

	/// HIF-global error interrupt service. Triggered sources are one-shot
	/// disabled; recovery is left to a higher-level flow.
	pub fn global_isr(&self) -> HifErrEvent {
		self.csr.global_isr()
	}

	/// Stop every channel at or above `Enabled`; they stay `Enabled` and
	/// resume later.
	pub fn suspend(&self) {
		for chnl in self.chnls.iter().flatten() {
			if chnl.state() >= chnl::ChnlState::Enabled {
				chnl.stop();
			}
		}
	}

	/// Restore suspended channels to `Running`.
	pub fn resume(&self) -> Result<(), HifError> {
		for chnl in self.chnls.iter().flatten() {
			if chnl.state() >= chnl::ChnlState::Enabled {
				chnl.resume()?;
			}
		}
		Ok(())
	}
}

impl Drop for Hif {
	fn drop(&mut self) {
		for idx in (0..HIF_CHANNELS as u8).rev() {
			self.remove_chnl(idx);
		}
		self.csr.fini();
	}
}
