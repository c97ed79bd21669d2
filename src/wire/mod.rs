//! OpenFlow 1.3 wire messages.
//!
//! Only the message set the reactive engine exchanges with switches is
//! implemented. Each message follows the same two-level pattern: a
//! `Packet` wrapper giving checked field access over a raw buffer, and a
//! `PacketRepr` high-level representation implementing [`Repr`](crate::Repr).

pub mod actions;
pub mod error_msg;
pub mod features;
pub mod flow_match;
pub mod flow_mod;
pub mod flow_removed;
pub mod multipart;
pub mod openflow;
pub mod oxm;
pub mod packet_in;
pub mod packet_out;

pub use self::openflow::{Kind, Packet, PacketRepr, PayloadRepr, Version};

/// The buffer id meaning "packet not buffered on the switch".
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;

/// The controller `max_len` asking for the whole packet.
pub const OFPCML_NO_BUFFER: u16 = 0xffff;

/// The group id meaning "any group" in flow-mod deletes.
pub const OFPG_ANY: u32 = 0xffff_ffff;
