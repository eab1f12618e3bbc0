//! Squad configuration and lobby lifecycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SquadConfig
// ---------------------------------------------------------------------------

/// Settings applied to every squad a manager opens.
///
/// Override individual fields with struct update syntax:
///
/// ```rust
/// use std::time::Duration;
/// use squadforge_lobby::SquadConfig;
///
/// let config = SquadConfig {
///     reconnect_grace: Duration::from_secs(30),
///     ..SquadConfig::default()
/// };
/// assert_eq!(config.max_members, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadConfig {
    /// Roster bound. Joins beyond it fail with `SquadFull`.
    pub max_members: usize,

    /// How long a member that dropped without consent keeps its slot.
    pub reconnect_grace: Duration,

    /// Spawn positions are drawn from `[-spawn_extent, spawn_extent]` on
    /// both axes.
    pub spawn_extent: f64,

    /// Match type requested from the match host on start.
    pub match_type: String,

    /// Extra attempts per seat reservation (and per find-or-create) before
    /// the handoff is abandoned.
    pub reservation_retries: u32,

    /// Pause between handoff attempts.
    pub retry_backoff: Duration,

    /// Capacity of the squad actor's command queue.
    pub command_buffer: usize,
}

impl Default for SquadConfig {
    fn default() -> Self {
        Self {
            max_members: 4,
            reconnect_grace: Duration::from_secs(10),
            spawn_extent: 5.0,
            match_type: "battle-royale".to_string(),
            reservation_retries: 2,
            retry_backoff: Duration::from_millis(250),
            command_buffer: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// LobbyPhase
// ---------------------------------------------------------------------------

/// Lifecycle of a squad lobby.
///
/// ```text
///            ┌──────── handoff failed ───────┐
///            ▼                               │
///          Open ──── owner starts ──→ HandingOff ──→ Launched
///            │
///            └── last member removed ──→ Abandoned
/// ```
///
/// - **Open**: accepting joins, readiness changes and start requests.
/// - **HandingOff**: seats are being reserved; roster and readiness are
///   frozen.
/// - **Launched**: every member holds a seat; terminal.
/// - **Abandoned**: everybody left before a start; terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LobbyPhase {
    Open,
    HandingOff,
    Launched,
    Abandoned,
}

impl LobbyPhase {
    /// Returns `true` if new members may join.
    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` once the squad can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Launched | Self::Abandoned)
    }

    /// Returns `true` if moving to `target` is a legal transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Open, Self::HandingOff)
                | (Self::Open, Self::Abandoned)
                | (Self::HandingOff, Self::Launched)
                | (Self::HandingOff, Self::Open)
        )
    }
}

impl std::fmt::Display for LobbyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::HandingOff => write!(f, "HandingOff"),
            Self::Launched => write!(f, "Launched"),
            Self::Abandoned => write!(f, "Abandoned"),
        }
    }
}
