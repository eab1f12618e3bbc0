//! `Gateway` builder and client surface.
//!
//! The gateway is where bytes meet squads. It does not own sockets: a
//! transport hands it decoded-as-bytes frames per member and drains each
//! member's [`ClientLink`] for outbound frames. The flow per member is:
//!
//!   1. `connect` → join a squad, get a link (`Joined` + `State` frames)
//!   2. `handle_frame` for every inbound frame → intent routed to the squad
//!   3. `disconnect` when the connection ends, `reconnect` when it returns

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use squadforge_lobby::{
    ClientSender, JoinTicket, MatchHost, SquadConfig, SquadInfo, SquadManager, open_squads,
};
use squadforge_protocol::{
    ClientIntent, Codec, Delivery, Envelope, JsonCodec, MemberId, Payload, ProtocolError,
    ServerMessage, SquadId, SquadView,
};
use tokio::sync::{Mutex, mpsc};

use crate::SquadforgeError;

/// Shared gateway state. Wrapped in `Arc` so every clone of the gateway and
/// every link pump sees the same squads.
///
/// The manager lock guards the squad and member indexes only. Calls that
/// merely talk to one squad clone its handle and drop the lock before
/// awaiting, so a busy squad never holds up frames for the others.
struct GatewayState<H: MatchHost, C: Codec> {
    squads: Mutex<SquadManager<H>>,
    /// The live connection of each member, for errors raised here.
    links: Mutex<HashMap<MemberId, ClientSender>>,
    codec: C,
    started: Instant,
}

/// Builder for a [`Gateway`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use squadforge::prelude::*;
///
/// let gateway = GatewayBuilder::new()
///     .squad_config(SquadConfig {
///         reconnect_grace: Duration::from_secs(30),
///         ..SquadConfig::default()
///     })
///     .build(Arc::new(InMemoryMatchHost::new()));
/// # drop(gateway);
/// ```
pub struct GatewayBuilder {
    squad_config: SquadConfig,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            squad_config: SquadConfig::default(),
        }
    }

    /// Settings for every squad the gateway opens.
    pub fn squad_config(mut self, config: SquadConfig) -> Self {
        self.squad_config = config;
        self
    }

    /// Builds a JSON gateway handing off to `host`.
    pub fn build<H: MatchHost>(self, host: Arc<H>) -> Gateway<H, JsonCodec> {
        self.build_with_codec(host, JsonCodec)
    }

    pub fn build_with_codec<H: MatchHost, C: Codec + Clone>(self, host: Arc<H>, codec: C) -> Gateway<H, C> {
        let state = Arc::new(GatewayState {
            squads: Mutex::new(SquadManager::new(host, self.squad_config)),
            links: Mutex::new(HashMap::new()),
            codec,
            started: Instant::now(),
        });
        Gateway { state }
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound side of one member connection.
///
/// Frames are encoded [`Envelope`]s carrying [`Payload::Message`], with
/// their own sequence numbers starting at 1. The stream ends once the
/// member is disconnected or the connection is replaced.
pub struct ClientLink {
    pub ticket: JoinTicket,
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ClientLink {
    pub fn member_id(&self) -> MemberId {
        self.ticket.member_id
    }

    /// Waits for the next outbound frame.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.frames.recv().await
    }

    /// Returns a frame only if one is already queued.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.frames.try_recv().ok()
    }
}

/// Transport-agnostic entry point for squad clients.
pub struct Gateway<H: MatchHost, C: Codec = JsonCodec> {
    state: Arc<GatewayState<H, C>>,
}

impl<H: MatchHost, C: Codec> Clone for Gateway<H, C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<H, C> Gateway<H, C>
where
    H: MatchHost,
    C: Codec + Clone,
{
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Opens an empty squad.
    pub async fn open_squad(&self) -> SquadId {
        self.state.squads.lock().await.create_squad()
    }

    /// Joins `member` to `squad` and returns its outbound link.
    pub async fn connect(
        &self,
        squad: SquadId,
        member: MemberId,
        name: Option<String>,
    ) -> Result<ClientLink, SquadforgeError> {
        let (sender, frames) = self.spawn_pump();
        let ticket = {
            let mut squads = self.state.squads.lock().await;
            squads.join(member, squad, name, sender.clone()).await?
        };
        self.state.links.lock().await.insert(member, sender);
        tracing::info!(member_id = %member, squad_id = %squad, "client connected");
        Ok(ClientLink { ticket, frames })
    }

    /// Decodes one inbound frame from `member` and routes its intent.
    ///
    /// Malformed or misdirected frames are answered with a 400 `Error`
    /// frame on the member's link and returned as errors.
    pub async fn handle_frame(&self, member: MemberId, data: &[u8]) -> Result<(), SquadforgeError> {
        let intent = match self.decode_intent(data) {
            Ok(intent) => intent,
            Err(e) => {
                tracing::debug!(member_id = %member, error = %e, "rejected frame");
                self.send_error(member, e.code(), &e.to_string()).await;
                return Err(e);
            }
        };

        let handle = self.state.squads.lock().await.member_handle(member)?;
        handle.submit(member, intent).await?;
        Ok(())
    }

    /// Ends `member`'s connection. Without consent the member keeps its slot
    /// for the squad's grace window.
    pub async fn disconnect(&self, member: MemberId, consented: bool) -> Result<(), SquadforgeError> {
        self.state.links.lock().await.remove(&member);
        let mut squads = self.state.squads.lock().await;
        squads.leave(member, consented).await?;
        tracing::info!(member_id = %member, consented, "client disconnected");
        Ok(())
    }

    /// Reattaches a member by reconnect token and returns a fresh link.
    pub async fn reconnect(&self, squad: SquadId, token: &str) -> Result<ClientLink, SquadforgeError> {
        let (sender, frames) = self.spawn_pump();
        let member = {
            let mut squads = self.state.squads.lock().await;
            squads.reconnect(squad, token, sender.clone()).await?
        };
        self.state.links.lock().await.insert(member, sender);

        tracing::info!(member_id = %member, squad_id = %squad, "client reconnected");
        Ok(ClientLink {
            ticket: JoinTicket {
                squad_id: squad,
                member_id: member,
                reconnect_token: token.to_string(),
            },
            frames,
        })
    }

    pub async fn snapshot(&self, squad: SquadId) -> Result<SquadView, SquadforgeError> {
        let handle = self.state.squads.lock().await.squad_handle(squad)?;
        Ok(handle.snapshot().await?)
    }

    pub async fn squad_info(&self, squad: SquadId) -> Result<SquadInfo, SquadforgeError> {
        let handle = self.state.squads.lock().await.squad_handle(squad)?;
        Ok(handle.info().await?)
    }

    pub async fn list_open(&self) -> Vec<SquadInfo> {
        let handles = self.state.squads.lock().await.handles();
        open_squads(handles).await
    }

    /// Drops launched and abandoned squads. Returns their IDs.
    pub async fn retire_finished(&self) -> Vec<SquadId> {
        self.state.squads.lock().await.retire_finished().await
    }

    fn decode_intent(&self, data: &[u8]) -> Result<ClientIntent, SquadforgeError> {
        let envelope: Envelope = self.state.codec.decode(data)?;
        match envelope.payload {
            Payload::Intent(ClientIntent::Join { .. }) => Err(ProtocolError::InvalidMessage(
                "join is only accepted when connecting".into(),
            )
            .into()),
            Payload::Intent(intent) => Ok(intent),
            Payload::Message(_) => Err(ProtocolError::InvalidMessage(
                "server messages are not accepted from clients".into(),
            )
            .into()),
        }
    }

    async fn send_error(&self, member: MemberId, code: u16, message: &str) {
        if let Some(link) = self.state.links.lock().await.get(&member) {
            let _ = link.send(ServerMessage::Error {
                code,
                message: message.to_string(),
            });
        }
    }

    /// Creates the member's message channel and a task that turns every
    /// message into an encoded envelope.
    fn spawn_pump(&self) -> (ClientSender, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (sender, mut messages) = mpsc::unbounded_channel::<ServerMessage>();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let codec = self.state.codec.clone();
        let started = self.state.started;

        tokio::spawn(async move {
            let mut seq: u64 = 0;
            while let Some(msg) = messages.recv().await {
                seq += 1;
                let envelope = Envelope {
                    seq,
                    timestamp: started.elapsed().as_millis() as u64,
                    delivery: Delivery::ReliableOrdered,
                    channel: Some(msg.channel().to_string()),
                    payload: Payload::Message(msg),
                };
                match codec.encode(&envelope) {
                    Ok(bytes) => {
                        if frames_tx.send(bytes).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode outbound frame");
                    }
                }
            }
        });

        (sender, frames)
    }
}
