//! rendezvous-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichtentypen die zwischen Client und
//! Signaling-Server ausgetauscht werden, sowie das Frame-Format auf TCP.

pub mod control;
pub mod negotiation;
pub mod wire;

pub use control::{ClientMessage, ErrorCode, Leer, RejectReason, ServerMessage};
pub use negotiation::NegotiationMessage;
pub use wire::{ClientCodec, FrameCodec, ServerCodec};
