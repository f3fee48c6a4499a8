//! Embedder's-eye view: bring the HIF block up against a modelled
//! register space through the public API only.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use pfeng::hif::csr::CSR_SPACE;
use pfeng::{
	ChnlConfig, ChnlState, DmaAddr, Hif, HifConfig, HifEnv, HifError, Netif, NetifConfig, Page,
	PhyIfId, RxMeta, RxPacket, SiliconRev, StackSink, Work,
};

/// A bare-bones host: linear bus addressing, no fault injection.
struct HostEnv {
	next_bus: AtomicU32,
	pages: AtomicUsize,
	work: Mutex<Vec<Work>>,
	polls: Mutex<Vec<u8>>,
}

impl HostEnv {
	fn new() -> Arc<Self> {
		Arc::new(Self {
			next_bus: AtomicU32::new(0x10_0000),
			pages: AtomicUsize::new(0),
			work: Mutex::new(Vec::new()),
			polls: Mutex::new(Vec::new()),
		})
	}

	fn bus(&self, len: usize) -> DmaAddr {
		DmaAddr::new(self.next_bus.fetch_add(len.next_multiple_of(64) as u32, Ordering::Relaxed))
	}
}

impl HifEnv for HostEnv {
	fn map_single(&self, _va: *const u8, len: usize) -> Result<DmaAddr, pfeng::env::DmaError> {
		Ok(self.bus(len))
	}

	fn unmap_single(&self, _pa: DmaAddr, _len: usize) {}

	fn map_page(&self, _page: &Page) -> Result<DmaAddr, pfeng::env::DmaError> {
		Ok(self.bus(pfeng::env::PAGE_SIZE))
	}

	fn unmap_page(&self, _pa: DmaAddr) {}

	fn map_frag(
		&self,
		_page: &Page,
		_offset: usize,
		len: usize,
	) -> Result<DmaAddr, pfeng::env::DmaError> {
		Ok(self.bus(len))
	}

	fn unmap_frag(&self, _pa: DmaAddr, _len: usize) {}

	fn sync_range_for_cpu(&self, _pa: DmaAddr, _offset: usize, _len: usize) {}

	fn sync_range_for_device(&self, _pa: DmaAddr, _offset: usize, _len: usize) {}

	fn alloc_coherent(
		&self,
		len: usize,
		align: usize,
	) -> Result<(NonNull<u8>, DmaAddr), pfeng::env::DmaError> {
		assert!(align <= 64);
		let layout = Layout::from_size_align(len, 64).unwrap();
		let va = NonNull::new(unsafe { alloc_zeroed(layout) })
			.ok_or(pfeng::env::DmaError::NoMem)?;
		Ok((va, self.bus(len)))
	}

	unsafe fn free_coherent(&self, va: NonNull<u8>, _pa: DmaAddr, len: usize) {
		let layout = Layout::from_size_align(len, 64).unwrap();
		unsafe { dealloc(va.as_ptr(), layout) };
	}

	fn alloc_page(&self) -> Option<Page> {
		self.pages.fetch_add(1, Ordering::Relaxed);
		Some(Page::new(false))
	}

	fn schedule(&self, work: Work) {
		self.work.lock().unwrap().push(work);
	}

	fn kick_poll(&self, chnl: u8) {
		self.polls.lock().unwrap().push(chnl);
	}

	fn sys_clk_hz(&self) -> u32 {
		300_000_000
	}

	fn usleep(&self, _us: u32) {}
}

struct NullSink;

impl StackSink for NullSink {
	fn deliver(&self, _pkt: RxPacket, _meta: RxMeta) {}
}

struct RegSpace {
	mem: NonNull<u8>,
}

impl RegSpace {
	fn new() -> Self {
		let layout = Layout::from_size_align(CSR_SPACE, 4).unwrap();
		let mem = NonNull::new(unsafe { alloc_zeroed(layout) }).unwrap();
		Self { mem }
	}

	fn base(&self) -> *mut u8 {
		self.mem.as_ptr()
	}
}

impl Drop for RegSpace {
	fn drop(&mut self) {
		let layout = Layout::from_size_align(CSR_SPACE, 4).unwrap();
		unsafe { dealloc(self.mem.as_ptr(), layout) };
	}
}

fn bring_up() -> (Arc<HostEnv>, RegSpace, Hif) {
	let env = HostEnv::new();
	let regs = RegSpace::new();
	let hif = unsafe {
		Hif::new(
			env.clone(),
			regs.base(),
			HifConfig {
				// G3: no soft-reset handshake to emulate.
				silicon: SiliconRev::S32g3,
				ring_len: 64,
			},
		)
	}
	.unwrap();
	(env, regs, hif)
}

#[test]
fn soft_reset_times_out_without_hardware() {
	let env = HostEnv::new();
	let regs = RegSpace::new();
	// S32G2 bring-up wants the soft-reset handshake; nothing answers.
	let err = unsafe { Hif::new(env, regs.base(), HifConfig::default()) }.unwrap_err();
	assert_eq!(err, HifError::ResetTimeout);
}

#[test]
fn channel_lifecycle_through_the_block() {
	let (env, _regs, mut hif) = bring_up();

	let chnl = hif
		.create_chnl(0, ChnlConfig { shared: false, ihc: false })
		.unwrap();
	assert_eq!(chnl.state(), ChnlState::Requested);
	assert!(hif.create_chnl(0, ChnlConfig::default()).is_err());
	assert_eq!(
		hif.create_chnl(9, ChnlConfig::default()).unwrap_err(),
		HifError::InvalidChannel
	);

	chnl.open().unwrap();
	chnl.start().unwrap();
	assert_eq!(chnl.state(), ChnlState::Running);
	// The RX pre-fill pulled pages from us.
	assert_eq!(env.pages.load(Ordering::Relaxed), 63);

	let netif = Arc::new(Netif::new(
		NetifConfig {
			name: "pfe0".into(),
			phy_if: PhyIfId::Emac0,
			only_mgmt: false,
			rx_csum: true,
			tx_csum: true,
			ptp: false,
		},
		chnl.idx(),
		Box::new(NullSink),
	));
	chnl.add_netif(netif.clone()).unwrap();
	assert_eq!(
		chnl.add_netif(netif).unwrap_err(),
		HifError::NetifSlotBusy
	);

	hif.suspend();
	assert_eq!(chnl.state(), ChnlState::Enabled);
	hif.resume().unwrap();
	assert_eq!(chnl.state(), ChnlState::Running);

	hif.remove_chnl(0);
	assert!(hif.chnl(0).is_none());
}

#[test]
fn coalesce_configuration_via_public_api() {
	let (_env, _regs, mut hif) = bring_up();
	let chnl = hif.create_chnl(1, ChnlConfig::default()).unwrap();
	chnl.open().unwrap();

	chnl.set_coalesce(0, 0).unwrap();
	assert_eq!(chnl.get_coalesce(), (0, 0));

	chnl.set_coalesce(64, 2).unwrap();
	assert_eq!(chnl.get_coalesce(), (2, 64));
}

#[test]
fn single_ihc_channel_per_instance() {
	let (_env, _regs, mut hif) = bring_up();
	hif.create_chnl(0, ChnlConfig { shared: true, ihc: true }).unwrap();
	assert!(hif.create_chnl(1, ChnlConfig { shared: true, ihc: true }).is_err());
	assert_eq!(hif.ihc_chnl().unwrap().idx(), 0);

	// Registration is refused off the designated channel.
	let plain = hif.create_chnl(2, ChnlConfig::default()).unwrap();
	assert!(plain.ihc_client_register(Box::new(|_| {})).is_err());
}
