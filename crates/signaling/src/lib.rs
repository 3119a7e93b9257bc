//! fernruf-signaling – WebSocket-Signaling fuer Browser-Anrufe
//!
//! Dieser Crate vermittelt Peer-to-Peer-Anrufe zwischen Browsern. Er
//! verwaltet, wer online ist, stellt Nachrichten zwischen Benutzern zu und
//! fuehrt fuer jeden Anruf einen Zustandsautomaten. Mediendaten fliessen
//! nie ueber den Server; Offer, Answer und Kandidaten werden nur
//! weitergereicht.
//!
//! ## Architektur
//!
//! ```text
//! WebSocket Listener (SignalingServer, /ws /list /call)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- PresenceHandler    (addUser)
//!     +-- CallHandler        (call, callAccepted, callRejected, endCall)
//!     +-- NegotiationHandler (offer, answer, candidate)
//!     +-- ChatHandler        (chat)
//!
//! LifecycleManager       – Anmeldung, Trennung, Aufraeumen
//! PresenceManager        – Wer ist online, ueber welche Verbindungen
//! MessageRouter          – Zustellung an alle Verbindungen eines Benutzers
//! SessionManager         – Zustandsautomat pro Anruf, Timer
//! NegotiationCoordinator – Kandidaten erst nach der Beschreibung
//! ```

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod negotiation;
pub mod presence;
pub mod router;
pub mod server_state;
pub mod session;
pub mod ws;

// Bequeme Re-Exporte
pub use connection::ClientConnection;
pub use dispatcher::{DispatcherContext, MessageDispatcher};
pub use error::{SignalingError, SignalingResult};
pub use lifecycle::LifecycleManager;
pub use negotiation::NegotiationCoordinator;
pub use presence::{DoppelAnmeldung, PresenceManager};
pub use router::{ClientSender, Endpunkt, MessageRouter};
pub use server_state::{SignalingConfig, SignalingState};
pub use session::{SessionInfo, SessionManager, SessionZustand};
pub use ws::SignalingServer;
