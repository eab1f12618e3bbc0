//! Squad actor: an isolated Tokio task that owns one squad.
//!
//! The actor is the only writer of its [`SquadState`]. Everything reaches it
//! through a bounded mpsc queue and is applied in arrival order, so two
//! commands for the same squad never interleave and a caller always sees
//! the effect of its own earlier commands.
//!
//! # Background work
//!
//! Two things take real time and must not stall the queue:
//!
//! - **Grace windows.** An unconsented leave starts a timer in the
//!   [`ReconnectionSupervisor`]. When it fires, a `GraceExpired` command is
//!   queued like any other; a reconnect that arrived first has already
//!   cancelled it, and a stale expiry is recognized by its generation.
//! - **Match handoff.** A successful start spawns a task that talks to the
//!   [`MatchHost`] and queues `HandoffResolved` with the outcome. Until then
//!   the squad is `HandingOff`: joins are refused, readiness is frozen, and
//!   leaves only detach the client and are replayed if the handoff fails.
//!
//! Both tasks hold an upgraded copy of the actor's own (weak) sender, so the
//! queue stays open exactly as long as some outside handle or background
//! task still needs it.
//!
//! # Stopping
//!
//! The actor stops on `Shutdown`, or on its own once the squad is abandoned.
//! Seats granted by a handoff that resolves after the actor stopped are
//! handed back to the host, either by the actor while it drains its queue
//! or by the handoff task when the queue is already gone.

use std::collections::HashMap;
use std::sync::Arc;

use squadforge_protocol::{ClientIntent, MemberId, MemberState, SeatReservation, ServerMessage, SquadId, SquadView};
use tokio::sync::mpsc::error::SendError;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use crate::handoff::release_all;
use crate::token::generate_token;
use crate::{
    CommandContext, Effect, GraceExpiry, HandoffOutcome, HandoffPlan, LobbyPhase, MatchHost, ReconnectionSupervisor,
    RetryPolicy, SquadCommand, SquadConfig, SquadError, SquadState, hand_off,
};

/// Channel sender delivering server messages to one client connection.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Issued on a successful join. The token lets the same member reattach
/// after a dropped connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTicket {
    pub squad_id: SquadId,
    pub member_id: MemberId,
    pub reconnect_token: String,
}

/// Squad metadata (not the member list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquadInfo {
    pub squad_id: SquadId,
    pub phase: LobbyPhase,
    pub member_count: usize,
    pub max_members: usize,
    pub owner: Option<MemberId>,
}

pub(crate) enum RoomCommand {
    Join {
        member: MemberId,
        name: Option<String>,
        sender: ClientSender,
        reply: oneshot::Sender<Result<JoinTicket, SquadError>>,
    },

    /// A client intent. Errors go back to the client, not to the caller.
    Intent {
        member: MemberId,
        intent: ClientIntent,
    },

    Leave {
        member: MemberId,
        consented: bool,
        reply: oneshot::Sender<Result<(), SquadError>>,
    },

    Reconnect {
        token: String,
        sender: ClientSender,
        reply: oneshot::Sender<Result<MemberId, SquadError>>,
    },

    Snapshot {
        reply: oneshot::Sender<SquadView>,
    },

    Info {
        reply: oneshot::Sender<SquadInfo>,
    },

    /// Fired by a grace timer.
    GraceExpired(GraceExpiry),

    /// Sent by the handoff task when it finishes.
    HandoffResolved(HandoffOutcome),

    Shutdown,
}

/// Handle to a running squad actor.
///
/// Cheap to clone. Every call fails with [`SquadError::Unavailable`] once
/// the actor has stopped.
#[derive(Clone)]
pub struct SquadHandle {
    squad_id: SquadId,
    sender: mpsc::Sender<RoomCommand>,
}

impl SquadHandle {
    pub fn squad_id(&self) -> SquadId {
        self.squad_id
    }

    /// Joins `member` and registers `sender` as its connection. On success
    /// the client receives `Joined` followed by the new state.
    pub async fn join(
        &self,
        member: MemberId,
        name: Option<String>,
        sender: ClientSender,
    ) -> Result<JoinTicket, SquadError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            RoomCommand::Join {
                member,
                name,
                sender,
                reply,
            },
            rx,
        )
        .await?
    }

    /// Queues a client intent (fire-and-forget). Command errors are sent to
    /// the member's connection as `Error` messages.
    pub async fn submit(&self, member: MemberId, intent: ClientIntent) -> Result<(), SquadError> {
        self.send(RoomCommand::Intent { member, intent }).await
    }

    /// Leaves the squad. Without consent the member keeps its slot for the
    /// configured grace window.
    pub async fn leave(&self, member: MemberId, consented: bool) -> Result<(), SquadError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            RoomCommand::Leave {
                member,
                consented,
                reply,
            },
            rx,
        )
        .await?
    }

    /// Reattaches a dropped member by its reconnect token.
    pub async fn reconnect(&self, token: impl Into<String>, sender: ClientSender) -> Result<MemberId, SquadError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            RoomCommand::Reconnect {
                token: token.into(),
                sender,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn snapshot(&self) -> Result<SquadView, SquadError> {
        let (reply, rx) = oneshot::channel();
        self.request(RoomCommand::Snapshot { reply }, rx).await
    }

    pub async fn info(&self) -> Result<SquadInfo, SquadError> {
        let (reply, rx) = oneshot::channel();
        self.request(RoomCommand::Info { reply }, rx).await
    }

    /// Stops the actor. Open grace windows are cancelled.
    pub async fn shutdown(&self) -> Result<(), SquadError> {
        self.send(RoomCommand::Shutdown).await
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), SquadError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| SquadError::Unavailable(self.squad_id))
    }

    async fn request<T>(&self, cmd: RoomCommand, rx: oneshot::Receiver<T>) -> Result<T, SquadError> {
        self.send(cmd).await?;
        rx.await.map_err(|_| SquadError::Unavailable(self.squad_id))
    }
}

struct SquadActor<H: MatchHost> {
    ctx: CommandContext,
    state: SquadState,
    phase: LobbyPhase,
    /// Connections of attached members. A DISCONNECTED member has none.
    clients: HashMap<MemberId, ClientSender>,
    /// Reconnect token → member.
    tokens: HashMap<String, MemberId>,
    supervisor: ReconnectionSupervisor,
    /// Leaves seen while handing off, replayed if the handoff fails.
    deferred_leaves: Vec<(MemberId, bool)>,
    /// Granted seats, kept for members that reattach after launch.
    reservations: HashMap<MemberId, SeatReservation>,
    host: Arc<H>,
    receiver: mpsc::Receiver<RoomCommand>,
    /// Weak so the actor does not keep its own queue open.
    queue: mpsc::WeakSender<RoomCommand>,
}

impl<H: MatchHost> SquadActor<H> {
    async fn run(mut self) {
        tracing::info!("squad actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                RoomCommand::Join {
                    member,
                    name,
                    sender,
                    reply,
                } => {
                    let result = self.handle_join(member, name, sender);
                    let _ = reply.send(result);
                }
                RoomCommand::Intent { member, intent } => {
                    self.handle_intent(member, intent);
                }
                RoomCommand::Leave {
                    member,
                    consented,
                    reply,
                } => {
                    let result = self.handle_leave(member, consented);
                    let _ = reply.send(result);
                }
                RoomCommand::Reconnect { token, sender, reply } => {
                    let result = self.handle_reconnect(&token, sender);
                    let _ = reply.send(result);
                }
                RoomCommand::Snapshot { reply } => {
                    let _ = reply.send(self.state.view());
                }
                RoomCommand::Info { reply } => {
                    let _ = reply.send(self.info());
                }
                RoomCommand::GraceExpired(expiry) => {
                    self.handle_grace_expired(expiry);
                }
                RoomCommand::HandoffResolved(outcome) => {
                    self.handle_handoff_resolved(outcome);
                }
                RoomCommand::Shutdown => {
                    if self.phase == LobbyPhase::HandingOff {
                        tracing::warn!("shutting down during handoff");
                    }
                    tracing::info!("squad shutting down");
                    break;
                }
            }

            if self.phase == LobbyPhase::Abandoned {
                tracing::info!("squad abandoned");
                break;
            }
        }

        tracing::info!(
            phase = %self.phase,
            pending_grace = self.supervisor.pending(),
            "squad actor stopping"
        );
        self.supervisor.cancel_all();
        self.drain_after_stop().await;
        tracing::info!("squad actor stopped");
    }

    /// Closes the queue and empties it. Pending requests are dropped, so
    /// their callers see `Unavailable`. A handoff outcome still in the
    /// queue has its seats released; one sent after the close is released
    /// by the handoff task itself.
    async fn drain_after_stop(&mut self) {
        self.receiver.close();
        while let Some(cmd) = self.receiver.recv().await {
            if let RoomCommand::HandoffResolved(Ok(granted)) = cmd {
                let released = release_all(self.host.as_ref(), &granted).await;
                tracing::warn!(released, "squad stopped before launch, seats released");
            }
        }
    }

    fn handle_join(
        &mut self,
        member: MemberId,
        name: Option<String>,
        sender: ClientSender,
    ) -> Result<JoinTicket, SquadError> {
        let effect = SquadCommand::Join { member, name }.execute(&mut self.state, &self.ctx)?;

        let reconnect_token = generate_token();
        self.tokens.retain(|_, m| *m != member);
        self.tokens.insert(reconnect_token.clone(), member);
        let _ = sender.send(ServerMessage::Joined {
            member_id: member,
            reconnect_token: reconnect_token.clone(),
        });
        self.clients.insert(member, sender);
        self.apply_effect(effect);

        Ok(JoinTicket {
            squad_id: self.ctx.squad_id,
            member_id: member,
            reconnect_token,
        })
    }

    fn handle_intent(&mut self, member: MemberId, intent: ClientIntent) {
        let result = match intent {
            ClientIntent::Leave => self.handle_leave(member, true),
            intent => self.apply(SquadCommand::from_intent(member, intent)),
        };
        if let Err(e) = result {
            tracing::debug!(member_id = %member, error = %e, "intent rejected");
            self.send_to(
                member,
                ServerMessage::Error {
                    code: e.code(),
                    message: e.to_string(),
                },
            );
        }
    }

    fn handle_leave(&mut self, member: MemberId, consented: bool) -> Result<(), SquadError> {
        if !self.state.contains(member) {
            return Ok(());
        }

        match self.phase {
            LobbyPhase::HandingOff => {
                // The roster is frozen until the handoff resolves.
                self.clients.remove(&member);
                self.deferred_leaves.retain(|(m, _)| *m != member);
                self.deferred_leaves.push((member, consented));
                tracing::info!(member_id = %member, consented, "leave deferred until handoff resolves");
                Ok(())
            }
            LobbyPhase::Launched => {
                self.clients.remove(&member);
                tracing::info!(member_id = %member, "member detached after launch");
                Ok(())
            }
            _ => self.apply(SquadCommand::Leave { member, consented }),
        }
    }

    fn handle_reconnect(&mut self, token: &str, sender: ClientSender) -> Result<MemberId, SquadError> {
        let member = self.tokens.get(token).copied().ok_or(SquadError::InvalidToken)?;
        if !self.state.contains(member) {
            return Err(SquadError::ReconnectExpired(member));
        }

        self.clients.insert(member, sender);

        match self.phase {
            LobbyPhase::HandingOff => {
                self.deferred_leaves.retain(|(m, _)| *m != member);
                self.send_to(member, ServerMessage::State(self.state.view()));
            }
            LobbyPhase::Launched => {
                self.send_to(member, ServerMessage::State(self.state.view()));
                if let Some(reservation) = self.reservations.get(&member).cloned() {
                    self.send_to(member, ServerMessage::Reservation(reservation));
                }
            }
            _ => {
                if self.supervisor.cancel(member) || self.is_disconnected(member) {
                    self.apply(SquadCommand::ReconnectResolved { member })?;
                } else {
                    // Connection replaced while the member was still attached.
                    self.send_to(member, ServerMessage::State(self.state.view()));
                }
            }
        }

        tracing::info!(member_id = %member, phase = %self.phase, "client reattached");
        Ok(member)
    }

    fn handle_grace_expired(&mut self, expiry: GraceExpiry) {
        if !self.supervisor.take_expired(expiry) {
            tracing::debug!(
                member_id = %expiry.member,
                generation = expiry.generation,
                "stale grace expiry ignored"
            );
            return;
        }
        if let Err(e) = self.apply(SquadCommand::GraceExpired { member: expiry.member }) {
            tracing::warn!(member_id = %expiry.member, error = %e, "grace expiry failed");
        }
    }

    fn handle_handoff_resolved(&mut self, outcome: HandoffOutcome) {
        match outcome {
            Ok(granted) => {
                self.state.commit_start();
                self.set_phase(LobbyPhase::Launched);
                self.deferred_leaves.clear();
                tracing::info!(seats = granted.len(), "handoff committed, squad launched");

                for (member, reservation) in granted {
                    self.send_to(member, ServerMessage::Reservation(reservation.clone()));
                    self.reservations.insert(member, reservation);
                }
                self.broadcast_state();
            }
            Err(failure) => {
                self.state.abort_start();
                self.set_phase(LobbyPhase::Open);
                tracing::warn!(error = %failure, "handoff failed, squad reopened");

                self.broadcast(ServerMessage::StartFailed {
                    reason: failure.to_string(),
                });
                self.broadcast_state();

                for (member, consented) in std::mem::take(&mut self.deferred_leaves) {
                    if let Err(e) = self.apply(SquadCommand::Leave { member, consented }) {
                        tracing::warn!(member_id = %member, error = %e, "deferred leave failed");
                    }
                }
            }
        }
    }

    fn apply(&mut self, cmd: SquadCommand) -> Result<(), SquadError> {
        let effect = cmd.execute(&mut self.state, &self.ctx)?;
        self.apply_effect(effect);
        Ok(())
    }

    fn apply_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Unchanged => {}
            Effect::Changed => self.broadcast_state(),
            Effect::AwaitReconnect(member) => {
                self.clients.remove(&member);
                match self.queue.upgrade() {
                    Some(queue) => {
                        self.supervisor
                            .start(member, self.ctx.config.reconnect_grace, queue, RoomCommand::GraceExpired);
                    }
                    None => tracing::warn!(member_id = %member, "squad queue closed, no grace window"),
                }
                self.broadcast_state();
            }
            Effect::Removed(member) => {
                self.clients.remove(&member);
                self.supervisor.cancel(member);
                self.reservations.remove(&member);
                self.broadcast_state();
                if self.state.is_empty() && self.phase == LobbyPhase::Open {
                    self.set_phase(LobbyPhase::Abandoned);
                }
            }
            Effect::BeginHandoff(plan) => self.begin_handoff(plan),
        }
    }

    fn begin_handoff(&mut self, plan: HandoffPlan) {
        let Some(queue) = self.queue.upgrade() else {
            self.state.abort_start();
            return;
        };
        self.set_phase(LobbyPhase::HandingOff);

        let host = Arc::clone(&self.host);
        let retry = RetryPolicy::from(&self.ctx.config);
        tokio::spawn(
            async move {
                let outcome = hand_off(host.as_ref(), &plan, &retry).await;
                // The actor is gone: nobody will deliver these seats.
                if let Err(SendError(RoomCommand::HandoffResolved(Ok(granted)))) =
                    queue.send(RoomCommand::HandoffResolved(outcome)).await
                {
                    let released = release_all(host.as_ref(), &granted).await;
                    tracing::warn!(released, "squad stopped during handoff, seats released");
                }
            }
            .instrument(self.ctx.span.clone()),
        );
    }

    fn set_phase(&mut self, next: LobbyPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal phase change {} -> {}",
            self.phase,
            next
        );
        tracing::debug!(from = %self.phase, to = %next, "phase changed");
        self.phase = next;
    }

    fn is_disconnected(&self, member: MemberId) -> bool {
        self.state
            .get_member(member)
            .is_ok_and(|m| m.state == MemberState::Disconnected)
    }

    fn broadcast_state(&self) {
        self.broadcast(ServerMessage::State(self.state.view()));
    }

    fn broadcast(&self, msg: ServerMessage) {
        for sender in self.clients.values() {
            let _ = sender.send(msg.clone());
        }
    }

    /// Drops the message if the member has no live connection.
    fn send_to(&self, member: MemberId, msg: ServerMessage) {
        if let Some(sender) = self.clients.get(&member) {
            let _ = sender.send(msg);
        }
    }

    fn info(&self) -> SquadInfo {
        SquadInfo {
            squad_id: self.ctx.squad_id,
            phase: self.phase,
            member_count: self.state.len(),
            max_members: self.ctx.config.max_members,
            owner: self.state.owner(),
        }
    }
}

/// Spawns a squad actor and returns a handle to it.
pub(crate) fn spawn_squad<H: MatchHost>(squad_id: SquadId, config: SquadConfig, host: Arc<H>) -> SquadHandle {
    let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
    let ctx = CommandContext::new(squad_id, config);
    let span = ctx.span.clone();

    let actor = SquadActor {
        ctx,
        state: SquadState::new(),
        phase: LobbyPhase::Open,
        clients: HashMap::new(),
        tokens: HashMap::new(),
        supervisor: ReconnectionSupervisor::new(),
        deferred_leaves: Vec::new(),
        reservations: HashMap::new(),
        host,
        receiver: rx,
        queue: tx.downgrade(),
    };

    tokio::spawn(actor.run().instrument(span));

    SquadHandle { squad_id, sender: tx }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::InMemoryMatchHost;

    fn mid(id: u64) -> MemberId {
        MemberId(id)
    }

    fn spawn(config: SquadConfig) -> (SquadHandle, Arc<InMemoryMatchHost>) {
        let host = Arc::new(InMemoryMatchHost::new());
        let handle = spawn_squad(SquadId(1), config, Arc::clone(&host));
        (handle, host)
    }

    fn client() -> (ClientSender, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_join_sends_joined_then_state() {
        let (handle, _host) = spawn(SquadConfig::default());
        let (tx, mut rx) = client();

        let ticket = handle.join(mid(1), Some("Ann".into()), tx).await.unwrap();

        assert_eq!(ticket.member_id, mid(1));
        assert_eq!(ticket.reconnect_token.len(), 32);
        let msgs = drain(&mut rx);
        assert!(matches!(&msgs[0], ServerMessage::Joined { member_id, .. } if *member_id == mid(1)));
        assert!(matches!(&msgs[1], ServerMessage::State(view) if view.owner == Some(mid(1))));
    }

    #[tokio::test]
    async fn test_submit_error_is_returned_to_client() {
        let (handle, _host) = spawn(SquadConfig::default());
        let (tx, mut rx) = client();
        handle.join(mid(1), None, tx).await.unwrap();
        drain(&mut rx);

        handle.submit(mid(1), ClientIntent::Join { name: None }).await.unwrap();
        // The snapshot is queued behind the intent, so the error is out.
        handle.snapshot().await.unwrap();

        let msgs = drain(&mut rx);
        assert!(matches!(&msgs[0], ServerMessage::Error { code: 409, .. }));
    }

    #[tokio::test]
    async fn test_info_reports_phase_and_counts() {
        let (handle, _host) = spawn(SquadConfig::default());
        handle.join(mid(1), None, client().0).await.unwrap();
        handle.join(mid(2), None, client().0).await.unwrap();

        let info = handle.info().await.unwrap();

        assert_eq!(info.phase, LobbyPhase::Open);
        assert_eq!(info.member_count, 2);
        assert_eq!(info.max_members, 4);
        assert_eq!(info.owner, Some(mid(1)));
    }

    #[tokio::test]
    async fn test_last_consented_leave_abandons_squad() {
        let (handle, _host) = spawn(SquadConfig::default());
        handle.join(mid(1), None, client().0).await.unwrap();

        handle.leave(mid(1), true).await.unwrap();

        assert!(matches!(handle.info().await, Err(SquadError::Unavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_moves_through_handoff_to_launched() {
        let (handle, host) = spawn(SquadConfig::default());
        handle.join(mid(1), None, client().0).await.unwrap();
        handle.join(mid(2), None, client().0).await.unwrap();
        handle.submit(mid(1), ClientIntent::Ready { ready: true }).await.unwrap();
        handle.submit(mid(2), ClientIntent::Ready { ready: true }).await.unwrap();

        handle.submit(mid(1), ClientIntent::Start).await.unwrap();
        assert_eq!(handle.info().await.unwrap().phase, LobbyPhase::HandingOff);

        let mut phase = LobbyPhase::HandingOff;
        for _ in 0..20 {
            phase = handle.info().await.unwrap().phase;
            if phase != LobbyPhase::HandingOff {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(phase, LobbyPhase::Launched);
        assert_eq!(host.reserved_seats().await, 2);
    }

    #[tokio::test]
    async fn test_reconnect_unknown_token_is_rejected() {
        let (handle, _host) = spawn(SquadConfig::default());
        handle.join(mid(1), None, client().0).await.unwrap();

        let result = handle.reconnect("nope", client().0).await;

        assert!(matches!(result, Err(SquadError::InvalidToken)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_grace_restores_not_ready() {
        let (handle, _host) = spawn(SquadConfig::default());
        let ticket = handle.join(mid(1), None, client().0).await.unwrap();
        handle.join(mid(2), None, client().0).await.unwrap();
        handle.submit(mid(1), ClientIntent::Ready { ready: true }).await.unwrap();
        handle.leave(mid(1), false).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let (tx, mut rx) = client();
        let member = handle.reconnect(&ticket.reconnect_token, tx).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(member, mid(1));
        let view = handle.snapshot().await.unwrap();
        assert_eq!(view.member(mid(1)).map(|m| m.state), Some(MemberState::NotReady));
        assert!(matches!(drain(&mut rx).last(), Some(ServerMessage::State(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_grace_returns_expired() {
        let (handle, _host) = spawn(SquadConfig::default());
        let ticket = handle.join(mid(1), None, client().0).await.unwrap();
        handle.join(mid(2), None, client().0).await.unwrap();
        handle.leave(mid(1), false).await.unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        let result = handle.reconnect(&ticket.reconnect_token, client().0).await;

        assert!(matches!(result, Err(SquadError::ReconnectExpired(id)) if id == mid(1)));
        assert_eq!(handle.info().await.unwrap().owner, Some(mid(2)));
    }
}
