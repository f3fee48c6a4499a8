//! Types shared with the PFE firmware over the wire.
//!
//! Every frame crossing a HIF channel carries an in-band header: the
//! classifier prepends [`CtHifRxHdr`] on reception, the host prepends
//! [`CtHifTxHdr`] on transmission. Multi-byte routing fields are
//! big-endian on the wire (the firmware cores are big-endian); the RX
//! flag word likewise.

use bitflags::bitflags;
use endian_num::{be16, be32};
use num_enum::TryFromPrimitive;

/// In-band header length, both directions.
pub const HIF_HDR_SIZE: usize = 16;

/// Length of an 802.1Q tag, pulled from the payload under the VLAN
/// insertion erratum.
pub const VLAN_HLEN: usize = 4;

/// Byte offset of `rx_timestamp_s` inside the RX header. The VLAN
/// insertion erratum overloads that word, so the offset is part of the
/// wire contract.
pub const RX_TIMESTAMP_S_OFFSET: usize = 12;

/// Physical interface IDs inside the PFE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum PhyIfId {
	Emac0 = 0,
	Emac1 = 1,
	Emac2 = 2,
	/// The unassigned hole in the ID space, reused for the AUX netif.
	Hif = 3,
	HifNocpy = 4,
	Util = 5,
	Hif0 = 6,
	Hif1 = 7,
	Hif2 = 8,
	Hif3 = 9,
}

impl PhyIfId {
	pub const MAX: u8 = PhyIfId::Hif3 as u8;
	/// AUX traffic shares the `Hif` hole.
	pub const AUX: PhyIfId = PhyIfId::Hif;
}

/// Number of netif table slots per channel (IDs 0..=MAX).
pub const NETIFS_CNT: usize = PhyIfId::MAX as usize + 1;

bitflags! {
	/// Flag word of the HIF RX header (big-endian on the wire).
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct HifRxFlags: u32 {
		/// Inter-host-control frame; never delivered to the stack.
		const IHC = 0x0001;
		/// RX timestamp attached in the header.
		const TS = 0x0002;
		/// PTP event frame ("management" for AUX routing).
		const PTP = 0x0004;
		/// Egress-timestamp report, payload is a `CtEtsReport`.
		const ETS = 0x0008;
		const IPV4_CSUM = 0x0010;
		const TCPV4_CSUM = 0x0020;
		const UDPV4_CSUM = 0x0040;
		const TCPV6_CSUM = 0x0080;
		const UDPV6_CSUM = 0x0100;
		/// VLAN-insertion erratum markers, one per HIF channel.
		const HIF0_VLAN = 0x0200;
		const HIF1_VLAN = 0x0400;
		const HIF2_VLAN = 0x0800;
		const HIF3_VLAN = 0x1000;
	}
}

impl HifRxFlags {
	/// All "L4 checksum verified" bits.
	pub const CSUM_OK: HifRxFlags = HifRxFlags::IPV4_CSUM
		.union(HifRxFlags::TCPV4_CSUM)
		.union(HifRxFlags::UDPV4_CSUM)
		.union(HifRxFlags::TCPV6_CSUM)
		.union(HifRxFlags::UDPV6_CSUM);

	/// VLAN erratum marker of a given channel.
	pub const fn vlan_flag(chnl: u8) -> HifRxFlags {
		match chnl {
			0 => HifRxFlags::HIF0_VLAN,
			1 => HifRxFlags::HIF1_VLAN,
			2 => HifRxFlags::HIF2_VLAN,
			_ => HifRxFlags::HIF3_VLAN,
		}
	}
}

bitflags! {
	/// Flag word of the HIF TX header.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct HifTxFlags: u16 {
		const IP_CSUM = 0x0001;
		const TCP_CSUM = 0x0002;
		const UDP_CSUM = 0x0004;
		/// Request an egress timestamp for `est_ref_num`.
		const ETS = 0x0010;
		/// Out-of-band control frame.
		const IHC = 0x0100;
		/// Bypass the classifier lookup; `e_phy_ifs` selects egress.
		const INJECT = 0x0200;
	}
}

/// HIF RX header, prefixed to every received frame.
///
/// Layout on the wire:
/// `flags:be32 | i_phy_if:u8 | i_log_if:u8 | queue:u8 | rsvd:u8 |
/// rx_timestamp_ns:u32 | rx_timestamp_s:u32`.
#[derive(Debug, Clone, Copy)]
pub struct CtHifRxHdr {
	pub flags: HifRxFlags,
	pub i_phy_if: u8,
	pub i_log_if: u8,
	pub queue: u8,
	pub rx_timestamp_ns: u32,
	pub rx_timestamp_s: u32,
	/// Raw bytes of the `rx_timestamp_s` word; carries the VLAN tag when
	/// the per-channel VLAN flag is set.
	pub timestamp_s_raw: [u8; 4],
}

impl CtHifRxHdr {
	pub fn from_bytes(b: &[u8]) -> Option<Self> {
		if b.len() < HIF_HDR_SIZE {
			return None;
		}
		let flags = be32::from_ne(u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
		let timestamp_s_raw = [b[12], b[13], b[14], b[15]];
		Some(Self {
			flags: HifRxFlags::from_bits_truncate(flags.to_ne()),
			i_phy_if: b[4],
			i_log_if: b[5],
			queue: b[6],
			rx_timestamp_ns: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
			rx_timestamp_s: u32::from_le_bytes(timestamp_s_raw),
			timestamp_s_raw,
		})
	}

	/// VLAN tag carried in the overloaded timestamp word: `(tpid, tci)`,
	/// both big-endian on the wire.
	pub fn vlan_tag(&self) -> (u16, u16) {
		let b = self.timestamp_s_raw;
		(
			be16::from_ne(u16::from_be_bytes([b[0], b[1]])).to_ne(),
			be16::from_ne(u16::from_be_bytes([b[2], b[3]])).to_ne(),
		)
	}
}

/// HIF TX header, prefixed by the host to every transmitted frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct CtHifTxHdr {
	pub chid: u8,
	pub queue: u8,
	pub flags: HifTxFlags,
	/// Destination physical-interface bitmap, only honoured with
	/// [`HifTxFlags::INJECT`].
	pub e_phy_ifs: be32,
	/// Egress-timestamp reference, only honoured with
	/// [`HifTxFlags::ETS`].
	pub est_ref_num: be16,
}

impl CtHifTxHdr {
	pub fn write_to(&self, buf: &mut [u8]) {
		assert!(buf.len() >= HIF_HDR_SIZE);
		buf[..HIF_HDR_SIZE].fill(0);
		buf[0] = self.chid;
		buf[1] = self.queue;
		buf[2..4].copy_from_slice(&self.flags.bits().to_le_bytes());
		buf[4..8].copy_from_slice(&self.e_phy_ifs.to_ne().to_be_bytes());
		buf[8..10].copy_from_slice(&self.est_ref_num.to_ne().to_be_bytes());
	}

	pub fn from_bytes(b: &[u8]) -> Option<Self> {
		if b.len() < HIF_HDR_SIZE {
			return None;
		}
		Some(Self {
			chid: b[0],
			queue: b[1],
			flags: HifTxFlags::from_bits_truncate(u16::from_le_bytes([b[2], b[3]])),
			e_phy_ifs: be32::from_ne(u32::from_be_bytes([b[4], b[5], b[6], b[7]])),
			est_ref_num: be16::from_ne(u16::from_be_bytes([b[8], b[9]])),
		})
	}
}

/// Egress-timestamp report delivered on the RX path after the header.
#[derive(Debug, Clone, Copy)]
pub struct CtEtsReport {
	pub ref_num: u16,
	pub ts_ns: u32,
	pub ts_s: u32,
}

impl CtEtsReport {
	pub const SIZE: usize = 12;

	pub fn from_bytes(b: &[u8]) -> Option<Self> {
		if b.len() < Self::SIZE {
			return None;
		}
		Some(Self {
			ref_num: be16::from_ne(u16::from_be_bytes([b[0], b[1]])).to_ne(),
			ts_ns: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
			ts_s: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
		})
	}

	pub fn write_to(&self, buf: &mut [u8]) {
		assert!(buf.len() >= Self::SIZE);
		buf[..Self::SIZE].fill(0);
		buf[0..2].copy_from_slice(&self.ref_num.to_be_bytes());
		buf[4..8].copy_from_slice(&self.ts_ns.to_le_bytes());
		buf[8..12].copy_from_slice(&self.ts_s.to_le_bytes());
	}
}

/// Hardware timestamp attached to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwTimestamp {
	pub sec: u32,
	pub nsec: u32,
}

impl HwTimestamp {
	pub fn as_nanos(&self) -> u64 {
		u64::from(self.sec) * 1_000_000_000 + u64::from(self.nsec)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn rx_hdr_bytes(flags: u32, phy: u8, ns: u32, s: u32) -> [u8; HIF_HDR_SIZE] {
		let mut b = [0u8; HIF_HDR_SIZE];
		b[0..4].copy_from_slice(&flags.to_be_bytes());
		b[4] = phy;
		b[8..12].copy_from_slice(&ns.to_le_bytes());
		b[12..16].copy_from_slice(&s.to_le_bytes());
		b
	}

	#[test]
	fn rx_hdr_layout() {
		let b = rx_hdr_bytes(HifRxFlags::TS.bits(), 2, 5_000, 17);
		let hdr = CtHifRxHdr::from_bytes(&b).unwrap();
		assert!(hdr.flags.contains(HifRxFlags::TS));
		assert_eq!(hdr.i_phy_if, 2);
		assert_eq!(hdr.rx_timestamp_ns, 5_000);
		assert_eq!(hdr.rx_timestamp_s, 17);
	}

	#[test]
	fn rx_timestamp_s_offset_is_fixed() {
		// The VLAN erratum path depends on the timestamp word sitting at
		// byte 12 of the header.
		let mut b = rx_hdr_bytes(0, 0, 0, 0);
		b[RX_TIMESTAMP_S_OFFSET..RX_TIMESTAMP_S_OFFSET + 4]
			.copy_from_slice(&0xdead_beefu32.to_le_bytes());
		let hdr = CtHifRxHdr::from_bytes(&b).unwrap();
		assert_eq!(hdr.rx_timestamp_s, 0xdead_beef);
	}

	#[test]
	fn rx_vlan_tag_overload() {
		let mut b = rx_hdr_bytes(HifRxFlags::HIF0_VLAN.bits(), 0, 0, 0);
		// TPID 0x8100, TCI 0x0123, big-endian on the wire.
		b[12..14].copy_from_slice(&0x8100u16.to_be_bytes());
		b[14..16].copy_from_slice(&0x0123u16.to_be_bytes());
		let hdr = CtHifRxHdr::from_bytes(&b).unwrap();
		assert_eq!(hdr.vlan_tag(), (0x8100, 0x0123));
	}

	#[test]
	fn tx_hdr_roundtrip() {
		let hdr = CtHifTxHdr {
			chid: 1,
			queue: 0,
			flags: HifTxFlags::IHC | HifTxFlags::INJECT,
			e_phy_ifs: be32::from_ne(1 << 3),
			est_ref_num: be16::from_ne(0x0123),
		};
		let mut b = [0u8; HIF_HDR_SIZE];
		hdr.write_to(&mut b);
		// Routing fields travel big-endian.
		assert_eq!(&b[4..8], &(1u32 << 3).to_be_bytes());
		assert_eq!(&b[8..10], &0x0123u16.to_be_bytes());

		let parsed = CtHifTxHdr::from_bytes(&b).unwrap();
		assert_eq!(parsed.chid, 1);
		assert_eq!(parsed.flags, HifTxFlags::IHC | HifTxFlags::INJECT);
		assert_eq!(parsed.e_phy_ifs.to_ne(), 1 << 3);
	}

	#[test]
	fn ets_report_roundtrip() {
		let report = CtEtsReport {
			ref_num: 0x0abc,
			ts_ns: 999_999_999,
			ts_s: 42,
		};
		let mut b = [0u8; CtEtsReport::SIZE];
		report.write_to(&mut b);
		let parsed = CtEtsReport::from_bytes(&b).unwrap();
		assert_eq!(parsed.ref_num, 0x0abc);
		assert_eq!(parsed.ts_ns, 999_999_999);
		assert_eq!(parsed.ts_s, 42);
	}

	#[test]
	fn phy_if_id_conversion() {
		assert_eq!(PhyIfId::try_from(0u8).unwrap(), PhyIfId::Emac0);
		assert_eq!(PhyIfId::try_from(9u8).unwrap(), PhyIfId::Hif3);
		assert!(PhyIfId::try_from(10u8).is_err());
		assert_eq!(PhyIfId::AUX as u8, 3);
	}
}
