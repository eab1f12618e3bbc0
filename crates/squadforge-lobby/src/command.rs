//! The closed set of squad state transitions.
//!
//! Every mutation of a [`SquadState`] goes through [`SquadCommand::execute`].
//! Commands are synchronous and never wait: the suspending parts of Leave
//! (the grace window) and StartGame (seat reservations) are reported back
//! to the squad actor as an [`Effect`], and their resolution re-enters as
//! another command (`ReconnectResolved`, `GraceExpired`).

use rand::Rng;
use squadforge_protocol::{ClientIntent, MemberId, MemberState, Position, PositionUpdate, SquadId};
use tracing::Span;

use crate::{HandoffPlan, MemberSettings, SeatRequest, SquadConfig, SquadError, SquadMember, SquadState};

/// What a command gets besides the state: which squad it runs in, the
/// squad's settings, and the squad's logging span.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub squad_id: SquadId,
    pub config: SquadConfig,
    pub span: Span,
}

impl CommandContext {
    pub fn new(squad_id: SquadId, config: SquadConfig) -> Self {
        let span = tracing::info_span!("squad", squad_id = %squad_id);
        Self {
            squad_id,
            config,
            span,
        }
    }
}

/// One state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum SquadCommand {
    Join {
        member: MemberId,
        name: Option<String>,
    },
    SetReady {
        member: MemberId,
        ready: bool,
    },
    Move {
        member: MemberId,
        update: PositionUpdate,
    },
    Leave {
        member: MemberId,
        consented: bool,
    },
    StartGame {
        requester: MemberId,
    },
    /// The member came back inside its grace window.
    ReconnectResolved {
        member: MemberId,
    },
    /// The member's grace window ran out.
    GraceExpired {
        member: MemberId,
    },
}

/// What the squad actor has to do after a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Nothing visible changed; no broadcast.
    Unchanged,
    /// Broadcast the new state.
    Changed,
    /// The member is DISCONNECTED: broadcast and open a grace window.
    AwaitReconnect(MemberId),
    /// The member is gone for good: broadcast and forget its connection.
    Removed(MemberId),
    /// The squad is locked for handoff; reserve these seats.
    BeginHandoff(HandoffPlan),
}

impl SquadCommand {
    /// Maps a client intent from `member` onto a command. A `Leave` intent is
    /// always a consented leave.
    pub fn from_intent(member: MemberId, intent: ClientIntent) -> Self {
        match intent {
            ClientIntent::Join { name } => Self::Join { member, name },
            ClientIntent::Ready { ready } => Self::SetReady { member, ready },
            ClientIntent::Move { x, y } => Self::Move {
                member,
                update: PositionUpdate { x, y },
            },
            ClientIntent::Leave => Self::Leave {
                member,
                consented: true,
            },
            ClientIntent::Start => Self::StartGame { requester: member },
        }
    }

    /// Applies the command to `state`.
    pub fn execute(self, state: &mut SquadState, ctx: &CommandContext) -> Result<Effect, SquadError> {
        match self {
            Self::Join { member, name } => join(state, ctx, member, name),
            Self::SetReady { member, ready } => set_ready(state, ctx, member, ready),
            Self::Move { member, update } => move_member(state, ctx, member, update),
            Self::Leave { member, consented } => leave(state, ctx, member, consented),
            Self::StartGame { requester } => start_game(state, ctx, requester),
            Self::ReconnectResolved { member } => reconnect_resolved(state, ctx, member),
            Self::GraceExpired { member } => grace_expired(state, ctx, member),
        }
    }
}

fn join(
    state: &mut SquadState,
    ctx: &CommandContext,
    member: MemberId,
    name: Option<String>,
) -> Result<Effect, SquadError> {
    if state.is_locked() {
        return Err(SquadError::Locked(ctx.squad_id));
    }
    if state.contains(member) {
        return Err(SquadError::AlreadyJoined(member));
    }
    if state.len() >= ctx.config.max_members {
        return Err(SquadError::SquadFull(ctx.squad_id));
    }

    let first = state.is_empty();
    let name = name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("Member {}", state.len() + 1));
    let pos = spawn_position(ctx.config.spawn_extent);
    state.add_member(SquadMember::new(member, name.clone(), pos))?;

    if first {
        state.set_owner(member);
        tracing::info!(parent: &ctx.span, member_id = %member, %name, "owner elected");
    }
    state.recompute_readiness();

    tracing::info!(
        parent: &ctx.span,
        member_id = %member,
        %name,
        x = pos.x,
        y = pos.y,
        members = state.len(),
        "member joined"
    );
    Ok(Effect::Changed)
}

fn spawn_position(extent: f64) -> Position {
    let extent = extent.abs();
    let mut rng = rand::rng();
    Position::new(
        rng.random_range(-extent..=extent),
        rng.random_range(-extent..=extent),
    )
}

fn set_ready(
    state: &mut SquadState,
    ctx: &CommandContext,
    member: MemberId,
    ready: bool,
) -> Result<Effect, SquadError> {
    if state.is_locked() {
        tracing::debug!(parent: &ctx.span, member_id = %member, "ready ignored, squad locked");
        return Ok(Effect::Unchanged);
    }

    let entry = state.get_member_mut(member)?;
    if entry.state == MemberState::Disconnected {
        return Err(SquadError::InvalidState {
            member,
            reason: "member is disconnected and must reconnect first".into(),
        });
    }
    entry.state = if ready {
        MemberState::Ready
    } else {
        MemberState::NotReady
    };
    state.recompute_readiness();

    tracing::info!(
        parent: &ctx.span,
        member_id = %member,
        ready,
        ready_to_start = state.ready_to_start(),
        "readiness changed"
    );
    Ok(Effect::Changed)
}

fn move_member(
    state: &mut SquadState,
    ctx: &CommandContext,
    member: MemberId,
    update: PositionUpdate,
) -> Result<Effect, SquadError> {
    let entry = state.get_member_mut(member)?;
    entry.pos.merge(update);
    tracing::trace!(parent: &ctx.span, member_id = %member, x = entry.pos.x, y = entry.pos.y, "member moved");
    Ok(Effect::Changed)
}

fn leave(
    state: &mut SquadState,
    ctx: &CommandContext,
    member: MemberId,
    consented: bool,
) -> Result<Effect, SquadError> {
    if state.is_locked() {
        tracing::debug!(parent: &ctx.span, member_id = %member, "leave ignored, squad locked");
        return Ok(Effect::Unchanged);
    }
    let Ok(entry) = state.get_member_mut(member) else {
        return Ok(Effect::Unchanged);
    };
    if entry.state == MemberState::Disconnected && !consented {
        // Already inside a grace window.
        return Ok(Effect::Unchanged);
    }

    entry.state = MemberState::Disconnected;
    state.recompute_readiness();

    if consented {
        state.remove_member(member);
        state.recompute_readiness();
        tracing::info!(
            parent: &ctx.span,
            member_id = %member,
            members = state.len(),
            owner = ?state.owner(),
            "member left (consented)"
        );
        return Ok(Effect::Removed(member));
    }

    tracing::info!(
        parent: &ctx.span,
        member_id = %member,
        grace = ?ctx.config.reconnect_grace,
        "member disconnected, allowing reconnection"
    );
    Ok(Effect::AwaitReconnect(member))
}

fn start_game(state: &mut SquadState, ctx: &CommandContext, requester: MemberId) -> Result<Effect, SquadError> {
    if state.is_locked() {
        tracing::debug!(parent: &ctx.span, member_id = %requester, "start ignored, already started");
        return Ok(Effect::Unchanged);
    }
    if state.owner() != Some(requester) {
        tracing::debug!(parent: &ctx.span, member_id = %requester, "start ignored, not the owner");
        return Ok(Effect::Unchanged);
    }
    if !state.ready_to_start() {
        tracing::debug!(parent: &ctx.span, member_id = %requester, "start ignored, squad not ready");
        return Ok(Effect::Unchanged);
    }
    if !state.begin_handoff() {
        return Ok(Effect::Unchanged);
    }

    let mut members: Vec<&SquadMember> = state.members().collect();
    members.sort_by_key(|m| m.joined_seq());
    let seats = members
        .into_iter()
        .map(|m| SeatRequest {
            member: m.id,
            settings: MemberSettings { name: m.name.clone() },
        })
        .collect::<Vec<_>>();

    tracing::info!(parent: &ctx.span, member_id = %requester, seats = seats.len(), "start accepted, handing off");
    Ok(Effect::BeginHandoff(HandoffPlan {
        match_type: ctx.config.match_type.clone(),
        seats,
    }))
}

fn reconnect_resolved(state: &mut SquadState, ctx: &CommandContext, member: MemberId) -> Result<Effect, SquadError> {
    let entry = state.get_member_mut(member)?;
    if entry.state != MemberState::Disconnected {
        return Err(SquadError::InvalidState {
            member,
            reason: "member is not disconnected".into(),
        });
    }
    // Readiness has to be declared again after a reconnect.
    entry.state = MemberState::NotReady;
    state.recompute_readiness();

    tracing::info!(parent: &ctx.span, member_id = %member, "member reconnected");
    Ok(Effect::Changed)
}

fn grace_expired(state: &mut SquadState, ctx: &CommandContext, member: MemberId) -> Result<Effect, SquadError> {
    if state.is_locked() || !state.contains(member) {
        return Ok(Effect::Unchanged);
    }
    state.remove_member(member);
    state.recompute_readiness();

    tracing::info!(
        parent: &ctx.span,
        member_id = %member,
        members = state.len(),
        owner = ?state.owner(),
        "member removed after grace window"
    );
    Ok(Effect::Removed(member))
}
