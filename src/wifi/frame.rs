//! MAC frames as seen by the PHY and MAC low: a header plus a payload length.
//!
//! No bytes are carried. The simulator only needs the frame size (for airtime),
//! the addressing and the duration field.

use embassy_time::Duration;
use std::fmt;

/// IEEE 48-bit MAC address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mac48Address([u8; 6]);

impl Mac48Address {
    pub const BROADCAST: Mac48Address = Mac48Address([0xff; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Locally administered address derived from a scene node id.
    pub fn from_node_id(node_id: u32) -> Self {
        let id = node_id.to_be_bytes();
        Self([0x02, 0x00, id[0], id[1], id[2], id[3]])
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Group (multicast or broadcast) addresses have the I/G bit set.
    pub fn is_group(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for Mac48Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", b[0], b[1], b[2], b[3], b[4], b[5])
    }
}

impl fmt::Debug for Mac48Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Rts,
    Cts,
    Ack,
    Data,
    /// QoS data sent with the "no ack" policy.
    QosDataNoAck,
    Management,
}

impl FrameKind {
    /// MAC header length in bytes (without FCS).
    pub fn header_size(self) -> u32 {
        match self {
            FrameKind::Rts => 16,
            FrameKind::Cts | FrameKind::Ack => 10,
            FrameKind::Data | FrameKind::Management => 24,
            FrameKind::QosDataNoAck => 26,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, FrameKind::Rts | FrameKind::Cts | FrameKind::Ack)
    }
}

pub const FCS_SIZE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacHeader {
    pub kind: FrameKind,
    /// Receiver address.
    pub addr1: Mac48Address,
    /// Transmitter address. Absent in CTS and ACK frames.
    pub addr2: Option<Mac48Address>,
    /// Remaining medium reservation announced by the sender.
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: MacHeader,
    pub payload_size: u32,
    /// SNR the responder measured on the frame this CTS/ACK answers.
    pub snr_tag: Option<f64>,
    /// Upper-layer packet identifier, carried through for statistics.
    pub packet_id: u64,
}

impl Frame {
    pub fn rts(to: Mac48Address, from: Mac48Address, duration: Duration) -> Self {
        Self::control(FrameKind::Rts, to, Some(from), duration, None)
    }

    pub fn cts(to: Mac48Address, duration: Duration, snr: f64) -> Self {
        Self::control(FrameKind::Cts, to, None, duration, Some(snr))
    }

    pub fn ack(to: Mac48Address, duration: Duration, snr: f64) -> Self {
        Self::control(FrameKind::Ack, to, None, duration, Some(snr))
    }

    fn control(kind: FrameKind, to: Mac48Address, from: Option<Mac48Address>, duration: Duration, snr_tag: Option<f64>) -> Self {
        Self {
            header: MacHeader {
                kind,
                addr1: to,
                addr2: from,
                duration,
            },
            payload_size: 0,
            snr_tag,
            packet_id: 0,
        }
    }

    /// A data or management frame. The duration field is filled in by MAC low.
    pub fn data(kind: FrameKind, to: Mac48Address, from: Mac48Address, payload_size: u32, packet_id: u64) -> Self {
        debug_assert!(!kind.is_control());
        Self {
            header: MacHeader {
                kind,
                addr1: to,
                addr2: Some(from),
                duration: Duration::from_ticks(0),
            },
            payload_size,
            snr_tag: None,
            packet_id,
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.header.kind
    }

    pub fn receiver(&self) -> Mac48Address {
        self.header.addr1
    }

    /// Size on air: header, payload and FCS.
    pub fn size(&self) -> u32 {
        self.header.kind.header_size() + self.payload_size + FCS_SIZE
    }
}

/// Sizes of the fixed-length control frames, FCS included.
pub fn rts_size() -> u32 {
    FrameKind::Rts.header_size() + FCS_SIZE
}

pub fn cts_size() -> u32 {
    FrameKind::Cts.header_size() + FCS_SIZE
}

pub fn ack_size() -> u32 {
    FrameKind::Ack.header_size() + FCS_SIZE
}
