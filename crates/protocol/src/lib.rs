//! fernruf-protocol – Signaling-Protokoll-Definitionen
//!
//! Dieses Crate definiert alle Envelopes die zwischen Browser und
//! Koordinator ausgetauscht werden. SDP-Payloads bleiben dabei roh
//! (`RawValue`) und werden unveraendert weitergereicht.

pub mod envelope;
pub mod error;
pub mod ice;

pub use envelope::{AusgehendeNachricht, EingehendeNachricht, FehlerCode, IceKandidat};
pub use error::ProtokollFehler;
pub use ice::IceServer;
