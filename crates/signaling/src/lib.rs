//! rendezvous-signaling – Raum- und Anruf-Koordination
//!
//! Dieser Crate implementiert den Signaling-Service: Verbindungen treten
//! Raeumen bei, werden paarweise zu Anrufen verbunden und tauschen ueber
//! den Server Offer, Answer und Kandidaten aus. Medien fliessen nie ueber
//! den Server.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     v
//! SignalingContext
//!     +-- ConnectionRegistry (ID -> Send-Queue, aktueller Raum)
//!     +-- RoomDirectory      (Raum -> Mitglieder + Anruf-Sitzungen)
//!     +-- CallCoordinator    (Zustandsautomat, Rotation)
//!     +-- SignalRelay        (Offer/Answer/Kandidaten weiterleiten)
//!     +-- EventBroadcaster   (member.joined / member.left / room.members)
//! ```
//!
//! Jede Zustandsaenderung eines Raums passiert unter dessen Sperre; die
//! daraus folgenden Nachrichten werden noch unter der Sperre in die
//! Send-Queues eingereiht.

pub mod broadcast;
pub mod call;
pub mod connection;
pub mod context;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod outbox;
pub mod registry;
pub mod relay;
pub mod tcp;

// Bequeme Re-Exporte
pub use broadcast::EventBroadcaster;
pub use call::{CallCoordinator, CallSession, CallState, RotationsRegeln};
pub use connection::ClientConnection;
pub use context::{SignalingConfig, SignalingContext};
pub use directory::{Raum, RoomDirectory};
pub use dispatcher::MessageDispatcher;
pub use error::{SignalingError, SignalingResult};
pub use outbox::{Ausgehend, Postausgang};
pub use registry::ConnectionRegistry;
pub use relay::SignalRelay;
pub use tcp::SignalingServer;
