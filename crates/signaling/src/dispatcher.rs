//! Message-Dispatcher – Routet Client-Nachrichten an die richtigen Handler
//!
//! Der Dispatcher empfaengt Text-Frames einer ClientConnection, dekodiert
//! sie und ruft den zustaendigen Handler auf. Schlaegt etwas fehl, bekommt
//! nur die ausloesende Verbindung einen `error`-Envelope.
//!
//! ## Zustandspruefung
//! - `addUser` ist immer erlaubt
//! - Alle anderen Nachrichten erst nach erfolgreicher Anmeldung

use fernruf_core::types::UserId;
use fernruf_protocol::{AusgehendeNachricht, EingehendeNachricht};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{SignalingError, SignalingResult};
use crate::handlers::{call_handler, chat_handler, negotiation_handler, presence_handler};
use crate::router::ClientSender;
use crate::server_state::SignalingState;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
pub struct DispatcherContext {
    /// Peer-Adresse (fuer Logs)
    pub peer_addr: SocketAddr,
    /// Send-Queue dieser Verbindung
    pub sender: ClientSender,
    /// Angemeldeter Benutzer (None vor `addUser`)
    pub user_id: Option<UserId>,
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: Arc<SignalingState>,
}

impl MessageDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Verarbeitet einen Text-Frame
    pub fn dispatch(&self, text: &str, ctx: &mut DispatcherContext) {
        // Verdraengte oder volle Verbindungen handeln nicht mehr
        if ctx.sender.ist_geschlossen() {
            return;
        }

        let nachricht = match EingehendeNachricht::parsen(text) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(peer = %ctx.peer_addr, fehler = %e, "Nachricht nicht dekodierbar");
                self.fehler_melden(ctx, None, SignalingError::from(e));
                return;
            }
        };
        let typ = nachricht.typ();
        tracing::trace!(peer = %ctx.peer_addr, typ, "Nachricht empfangen");

        let ergebnis = match nachricht {
            EingehendeNachricht::AddUser(req) => {
                presence_handler::handle_add_user(req, ctx, &self.state)
            }
            andere => match ctx.user_id.clone() {
                Some(user_id) => self.dispatch_angemeldet(andere, &user_id),
                None => Err(SignalingError::NichtAngemeldet),
            },
        };

        if let Err(e) = ergebnis {
            self.fehler_melden(ctx, Some(typ), e);
        }
    }

    /// Meldet eine Verbindung direkt beim Aufbau an (`?user=`)
    pub fn anmelden(&self, user_id: UserId, ctx: &mut DispatcherContext) {
        if let Err(e) = presence_handler::anmelden(user_id, ctx, &self.state) {
            self.fehler_melden(ctx, Some("addUser"), e);
        }
    }

    /// Weist einen Frame ab, der gar nicht erst dekodiert wird
    pub fn abweisen(&self, ctx: &DispatcherContext, fehler: SignalingError) {
        self.fehler_melden(ctx, None, fehler);
    }

    fn dispatch_angemeldet(
        &self,
        nachricht: EingehendeNachricht,
        user_id: &UserId,
    ) -> SignalingResult<()> {
        let state = &self.state;
        match nachricht {
            EingehendeNachricht::Call(req) => call_handler::handle_call(req, user_id, state),
            EingehendeNachricht::CallAccepted(adr) => {
                call_handler::handle_call_accepted(adr, user_id, state)
            }
            EingehendeNachricht::CallRejected(adr) => {
                call_handler::handle_call_rejected(adr, user_id, state)
            }
            EingehendeNachricht::EndCall(adr) => call_handler::handle_end_call(adr, user_id, state),
            EingehendeNachricht::Offer(req) => {
                negotiation_handler::handle_offer(req, user_id, state)
            }
            EingehendeNachricht::Answer(req) => {
                negotiation_handler::handle_answer(req, user_id, state)
            }
            EingehendeNachricht::Candidate(req) => {
                negotiation_handler::handle_candidate(req, user_id, state)
            }
            EingehendeNachricht::Chat(req) => chat_handler::handle_chat(req, user_id, state),
            // Wird vor dem Aufruf abgefangen
            EingehendeNachricht::AddUser(_) => Ok(()),
        }
    }

    /// Stellt die Diagnose an die ausloesende Verbindung zu
    fn fehler_melden(&self, ctx: &DispatcherContext, typ: Option<&str>, fehler: SignalingError) {
        let code = fehler.fehler_code();
        self.state
            .metriken
            .diagnostics_total
            .with_label_values(&[code.als_str()])
            .inc();
        tracing::debug!(
            peer = %ctx.peer_addr,
            user_id = ?ctx.user_id,
            typ = typ.unwrap_or("?"),
            code = code.als_str(),
            fehler = %fehler,
            "Nachricht abgewiesen"
        );

        // Der Router hat dem Absender bereits `userOffline` geschickt
        if matches!(fehler, SignalingError::ZielOffline(_)) {
            return;
        }
        ctx.sender
            .senden(AusgehendeNachricht::fehler(code, fehler.to_string()));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
