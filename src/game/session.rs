//! Game session state and lifecycle.
//!
//! A [`GameSession`] is the wholesale persistence unit for one widget of
//! one pairing: board, per-player histories, cosmetic choices, turn, and
//! move log travel together as a single record. The session enforces the
//! turn/lifecycle state machine; board mechanics live in [`super::rules`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rules::{
    Board, Coord, GameKind, MoveTarget, PerRole, Placement, PlayerRole, RuleViolation,
};

/// Session lifecycle states.
///
/// Transitions are monotonic within one instance:
/// `AwaitingSetup -> Active -> Won | Draw`. A reset never un-terminates an
/// instance; it produces a brand-new one via [`GameSession::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, but at least one player has not chosen a cosmetic yet.
    AwaitingSetup,
    /// Game in progress.
    Active,
    /// A player completed a winning line.
    Won,
    /// Board full with no winner (drop variant only).
    Draw,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingSetup => "awaiting_setup",
            Self::Active => "active",
            Self::Won => "won",
            Self::Draw => "draw",
        }
    }

    /// Check if the session can receive moves.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the session is terminal (cannot change).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Won | Self::Draw)
    }
}

/// One applied move in the session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub role: PlayerRole,
    pub target: MoveTarget,
    pub placed: Coord,
    pub at: DateTime<Utc>,
}

/// What a successfully applied move did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub placement: Placement,
    pub status: SessionStatus,
    pub winning_line: Option<Vec<Coord>>,
}

/// Session errors.
///
/// All recoverable; a rejected action leaves the session untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// Moves are not accepted until both players chose a cosmetic.
    SetupIncomplete,
    /// The acting player does not hold the turn.
    NotYourTurn,
    /// The session has already ended.
    GameOver,
    /// Reset requested before the session reached a terminal state.
    NotFinished,
    /// The rule engine refused the move.
    Rule(RuleViolation),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetupIncomplete => write!(f, "Both players must pick an icon first"),
            Self::NotYourTurn => write!(f, "It's not your turn"),
            Self::GameOver => write!(f, "The game is already over"),
            Self::NotFinished => write!(f, "The game is still in progress"),
            Self::Rule(v) => write!(f, "{}", v),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<RuleViolation> for SessionError {
    fn from(v: RuleViolation) -> Self {
        Self::Rule(v)
    }
}

/// Canonical state of one game widget for one pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    /// Which game variant this session plays.
    pub kind: GameKind,

    /// Monotonic mutation counter; the store's compare-and-swap token.
    /// Continues across resets so the key stays monotonic.
    pub revision: u64,

    /// Current status
    pub status: SessionStatus,

    /// The board
    pub board: Board,

    /// Still-present piece coords per player, oldest first.
    /// On drop boards this is the full placement history.
    pub history: PerRole<Vec<Coord>>,

    /// Per-player cosmetic choice (icon), preserved across resets.
    pub cosmetics: PerRole<Option<String>>,

    /// Whose turn it is. Frozen at the winner's role once the game ends.
    pub current_turn: PlayerRole,

    /// Winner, once decided.
    pub winner: Option<PlayerRole>,

    /// Every applied move, in order.
    pub log: Vec<MoveRecord>,

    /// Who opened this instance; drives alternation after a drawn game.
    pub first_turn: PlayerRole,

    /// When this instance was created
    pub created_at: DateTime<Utc>,
}

impl GameSession {
    /// Create a fresh session instance.
    ///
    /// The session starts `Active` when both cosmetics are already known
    /// (the reset path), otherwise `AwaitingSetup`.
    pub fn new(
        kind: GameKind,
        first_turn: PlayerRole,
        cosmetics: PerRole<Option<String>>,
        now: DateTime<Utc>,
    ) -> Self {
        let status = if cosmetics.one.is_some() && cosmetics.two.is_some() {
            SessionStatus::Active
        } else {
            SessionStatus::AwaitingSetup
        };
        Self {
            kind,
            revision: 0,
            status,
            board: Board::empty(kind),
            history: PerRole::default(),
            cosmetics,
            current_turn: first_turn,
            winner: None,
            log: Vec::new(),
            first_turn,
            created_at: now,
        }
    }

    /// Set a player's cosmetic choice.
    ///
    /// Promotes `AwaitingSetup` to `Active` once both sides have chosen.
    pub fn set_cosmetic(
        &mut self,
        role: PlayerRole,
        choice: String,
    ) -> Result<(), SessionError> {
        if self.status.is_terminal() {
            return Err(SessionError::GameOver);
        }

        *self.cosmetics.get_mut(role) = Some(choice);
        if self.status == SessionStatus::AwaitingSetup
            && self.cosmetics.one.is_some()
            && self.cosmetics.two.is_some()
        {
            self.status = SessionStatus::Active;
        }
        self.revision += 1;
        Ok(())
    }

    /// Apply a move by `role`.
    ///
    /// Rejections (wrong status, out-of-turn, illegal target) are
    /// synchronous and mutate nothing. A legal move flips the turn unless
    /// it completes a winning line (winner recorded, turn frozen at the
    /// mover) or fills a drop board (draw).
    pub fn apply_move(
        &mut self,
        role: PlayerRole,
        target: MoveTarget,
        now: DateTime<Utc>,
    ) -> Result<MoveOutcome, SessionError> {
        match self.status {
            SessionStatus::AwaitingSetup => return Err(SessionError::SetupIncomplete),
            SessionStatus::Won | SessionStatus::Draw => return Err(SessionError::GameOver),
            SessionStatus::Active => {}
        }
        if role != self.current_turn {
            return Err(SessionError::NotYourTurn);
        }

        let placement = self
            .board
            .apply(target, role, self.history.get_mut(role))?;
        self.log.push(MoveRecord {
            role,
            target,
            placed: placement.placed,
            at: now,
        });

        let winning_line = self.board.winning_line(role);
        if winning_line.is_some() {
            self.status = SessionStatus::Won;
            self.winner = Some(role);
        } else if self.board.is_draw() {
            self.status = SessionStatus::Draw;
        } else {
            self.current_turn = role.opponent();
        }
        self.revision += 1;

        Ok(MoveOutcome {
            placement,
            status: self.status,
            winning_line,
        })
    }

    /// Build the replacement instance for "play again".
    ///
    /// Only terminal sessions can be reset. Cosmetics carry forward
    /// unchanged. The loser of a decisive game receives the first turn;
    /// after a draw, first turn strictly alternates (whoever did not open
    /// the drawn instance opens the next one). The revision counter
    /// continues so the store key stays compare-and-swap monotonic.
    pub fn reset(&self, now: DateTime<Utc>) -> Result<GameSession, SessionError> {
        if !self.status.is_terminal() {
            return Err(SessionError::NotFinished);
        }

        let first_turn = match self.winner {
            Some(winner) => winner.opponent(),
            None => self.first_turn.opponent(),
        };
        let mut next = GameSession::new(self.kind, first_turn, self.cosmetics.clone(), now);
        next.revision = self.revision + 1;
        Ok(next)
    }

    /// Check if it's a player's turn to move.
    pub fn is_player_turn(&self, role: PlayerRole) -> bool {
        self.status.is_active() && self.current_turn == role
    }

    /// Verify that board and histories are derivable from the move log.
    pub fn derives_from_log(&self) -> bool {
        Board::replay(self.kind, self.log.iter().map(|m| (m.role, m.target)))
            .map(|(board, history)| board == self.board && history == self.history)
            .unwrap_or(false)
    }

    /// One-way render snapshot for the UI collaborator, mirrored so the
    /// viewer always sees themself as "you".
    pub fn render_for(&self, viewer: PlayerRole) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind.as_str(),
            "status": self.status.as_str(),
            "board": self.board.to_json(),
            "current_turn": self.current_turn.as_str(),
            "you": viewer.as_str(),
            "your_turn": self.is_player_turn(viewer),
            "your_icon": self.cosmetics.get(viewer),
            "their_icon": self.cosmetics.get(viewer.opponent()),
            "winner": self.winner.map(|w| w.as_str()),
            "you_won": self.winner == Some(viewer),
            "moves": self.log.len(),
        })
    }
}
