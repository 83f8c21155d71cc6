//! Game domain for the paired-dashboard widgets.
//!
//! Two layers, both pure:
//!
//! - `rules` - per-geometry boards, move legality and application, win
//!   and draw detection. Knows nothing about turns or storage.
//! - `session` - the [`GameSession`] record and its turn/lifecycle state
//!   machine; the wholesale unit the sync layer persists and propagates.

pub mod rules;
pub mod session;

// Re-export commonly used types
pub use rules::{
    Board, Coord, GameKind, MoveTarget, PerRole, Placement, PlayerRole, RuleViolation,
    DROP_COLS, DROP_ROWS, DROP_WIN_LEN, PIECE_LIMIT, VANISH_CELLS, VANISH_SIZE,
};
pub use session::{GameSession, MoveOutcome, MoveRecord, SessionError, SessionStatus};
