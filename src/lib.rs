//! Host-side datapath core for the NXP S32G PFE (Packet Forwarding
//! Engine) host interface.
//!
//! The PFE is an on-SoC packet processor; the host reaches it through up
//! to four HIF DMA channels, each pairing an RX and a TX buffer
//! descriptor ring with one interrupt line. This crate implements the
//! channel datapath: the BD rings, the host buffer manager with
//! half-page recycling, the NAPI-style poll loop, the channel and global
//! interrupt service, TX scatter/gather with confirm-time unmapping,
//! interrupt coalescing, and the inter-host-control (IHC) side channel
//! used between two PFE hosts sharing the silicon.
//!
//! The crate is OS-agnostic. The embedder provides DMA mapping, page
//! allocation, work scheduling and the network stack through
//! [`env::HifEnv`] and [`hif::netif::StackSink`], and drives
//! [`hif::chnl::HifChnl::poll`] whenever the crate requests it.

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

pub mod config;
pub mod ct;
pub mod env;
pub mod hif;
pub mod hwts;
pub mod pkt;

pub use ct::{HwTimestamp, PhyIfId};
pub use env::{DmaAddr, HifEnv, Page, Work};
pub use hif::chnl::{ChnlConfig, ChnlState, HifChnl, TxError};
pub use hif::ihc::{IhcEvent, IhcRxPkt};
pub use hif::netif::{Netif, NetifConfig, RxMeta, StackSink};
pub use hif::{Hif, HifConfig, HifError, SiliconRev};
pub use hwts::TxTimestamp;
pub use pkt::{RxPacket, TxPkt};
