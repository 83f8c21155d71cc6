//! Game rule engine.
//!
//! Pure, per-geometry move legality, move application, and win/draw
//! detection. Nothing in this module knows about sessions, turns, or
//! storage; it operates on boards and per-player piece histories only.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rows on the drop-style board.
pub const DROP_ROWS: usize = 6;

/// Columns on the drop-style board.
pub const DROP_COLS: usize = 7;

/// Run length that wins a drop-style game.
pub const DROP_WIN_LEN: usize = 4;

/// Side length of the vanishing board.
pub const VANISH_SIZE: usize = 3;

/// Cell count of the vanishing board.
pub const VANISH_CELLS: usize = VANISH_SIZE * VANISH_SIZE;

/// Maximum pieces a player may hold at once on the vanishing board.
pub const PIECE_LIMIT: usize = 3;

/// All 8 canonical three-in-a-row lines of the vanishing board.
const VANISH_LINES: [[usize; 3]; 8] = [
    // rows
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    // cols
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    // diags
    [0, 4, 8],
    [2, 4, 6],
];

/// Scan directions for drop-board runs: right, down, down-right, down-left.
const DROP_DIRS: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

/// The two game variants a widget can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// Gravity-fill 6x7 grid, four in a row wins.
    DropFour,
    /// Fixed 3x3 grid, three pieces per player, oldest piece vanishes.
    VanishThree,
}

impl GameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DropFour => "drop_four",
            Self::VanishThree => "vanish_three",
        }
    }
}

/// The two fixed player roles of a pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerRole {
    One,
    Two,
}

impl PlayerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::One => "one",
            Self::Two => "two",
        }
    }

    /// The other role of the pairing.
    pub fn opponent(&self) -> PlayerRole {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }
}

impl fmt::Display for PlayerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exhaustive two-slot container indexed by [`PlayerRole`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerRole<T> {
    pub one: T,
    pub two: T,
}

impl<T> PerRole<T> {
    pub fn new(one: T, two: T) -> Self {
        Self { one, two }
    }

    pub fn get(&self, role: PlayerRole) -> &T {
        match role {
            PlayerRole::One => &self.one,
            PlayerRole::Two => &self.two,
        }
    }

    pub fn get_mut(&mut self, role: PlayerRole) -> &mut T {
        match role {
            PlayerRole::One => &mut self.one,
            PlayerRole::Two => &mut self.two,
        }
    }
}

/// A board cell position. Row 0 is the top row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub row: usize,
    pub col: usize,
}

impl Coord {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Coord of a flat vanishing-board cell index.
    pub fn from_cell(index: usize) -> Self {
        Self {
            row: index / VANISH_SIZE,
            col: index % VANISH_SIZE,
        }
    }

    /// Flat vanishing-board cell index of this coord.
    pub fn cell_index(&self) -> usize {
        self.row * VANISH_SIZE + self.col
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Where a move is aimed.
///
/// Drop games target a column (the piece settles by gravity); vanishing
/// games target a cell directly. Aiming the wrong shape at a board is a
/// [`RuleViolation::WrongGeometry`], so the engine can never be driven
/// against a mismatched geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveTarget {
    Column(usize),
    Cell(usize),
}

/// Result of applying a legal move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Where the new piece landed.
    pub placed: Coord,
    /// The cell vacated by FIFO eviction, if the piece limit was reached.
    pub evicted: Option<Coord>,
}

/// Why the rule engine refused a move.
///
/// All of these are recoverable no-ops: the board is untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleViolation {
    OutOfBounds,
    ColumnFull,
    CellOccupied,
    WrongGeometry,
}

impl fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds => write!(f, "Target is outside the board"),
            Self::ColumnFull => write!(f, "Column is already full"),
            Self::CellOccupied => write!(f, "Cell is already occupied"),
            Self::WrongGeometry => write!(f, "Move target does not match the board geometry"),
        }
    }
}

impl std::error::Error for RuleViolation {}

/// Geometry-specific board: a tagged union per game kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "geometry", rename_all = "snake_case")]
pub enum Board {
    Drop {
        /// Row-major 6x7 matrix, row 0 at the top.
        cells: [[Option<PlayerRole>; DROP_COLS]; DROP_ROWS],
    },
    Vanish {
        /// Flat 3x3 grid, row-major.
        cells: [Option<PlayerRole>; VANISH_CELLS],
    },
}

impl Board {
    /// Create an empty board for a game kind.
    pub fn empty(kind: GameKind) -> Self {
        match kind {
            GameKind::DropFour => Self::Drop {
                cells: [[None; DROP_COLS]; DROP_ROWS],
            },
            GameKind::VanishThree => Self::Vanish {
                cells: [None; VANISH_CELLS],
            },
        }
    }

    pub fn kind(&self) -> GameKind {
        match self {
            Self::Drop { .. } => GameKind::DropFour,
            Self::Vanish { .. } => GameKind::VanishThree,
        }
    }

    /// Occupant of a cell, or `None` for empty or out-of-bounds coords.
    pub fn cell(&self, coord: Coord) -> Option<PlayerRole> {
        match self {
            Self::Drop { cells } => {
                if coord.row < DROP_ROWS && coord.col < DROP_COLS {
                    cells[coord.row][coord.col]
                } else {
                    None
                }
            }
            Self::Vanish { cells } => {
                if coord.row < VANISH_SIZE && coord.col < VANISH_SIZE {
                    cells[coord.cell_index()]
                } else {
                    None
                }
            }
        }
    }

    /// Check whether a move target is legal on this board.
    pub fn validate(&self, target: MoveTarget) -> Result<(), RuleViolation> {
        match (self, target) {
            (Self::Drop { cells }, MoveTarget::Column(col)) => {
                if col >= DROP_COLS {
                    Err(RuleViolation::OutOfBounds)
                } else if cells[0][col].is_some() {
                    Err(RuleViolation::ColumnFull)
                } else {
                    Ok(())
                }
            }
            (Self::Vanish { cells }, MoveTarget::Cell(index)) => {
                if index >= VANISH_CELLS {
                    Err(RuleViolation::OutOfBounds)
                } else if cells[index].is_some() {
                    Err(RuleViolation::CellOccupied)
                } else {
                    Ok(())
                }
            }
            _ => Err(RuleViolation::WrongGeometry),
        }
    }

    /// Apply a move for `role`, recording it in that player's history.
    ///
    /// Drop boards: the piece settles into the lowest empty row of the
    /// column. Vanishing boards: if the player already holds
    /// [`PIECE_LIMIT`] pieces, their chronologically oldest still-present
    /// piece is cleared first (FIFO), then the new piece is placed and the
    /// history trimmed back to the limit.
    ///
    /// Validation runs before any mutation, so a rejected move leaves both
    /// the board and the history untouched.
    pub fn apply(
        &mut self,
        target: MoveTarget,
        role: PlayerRole,
        history: &mut Vec<Coord>,
    ) -> Result<Placement, RuleViolation> {
        self.validate(target)?;

        match (self, target) {
            (Self::Drop { cells }, MoveTarget::Column(col)) => {
                let row = (0..DROP_ROWS)
                    .rev()
                    .find(|&r| cells[r][col].is_none())
                    .ok_or(RuleViolation::ColumnFull)?;
                let placed = Coord::new(row, col);
                cells[row][col] = Some(role);
                history.push(placed);
                Ok(Placement {
                    placed,
                    evicted: None,
                })
            }
            (Self::Vanish { cells }, MoveTarget::Cell(index)) => {
                let mut evicted = None;
                if history.len() >= PIECE_LIMIT {
                    let oldest = history.remove(0);
                    cells[oldest.cell_index()] = None;
                    evicted = Some(oldest);
                }
                let placed = Coord::from_cell(index);
                cells[index] = Some(role);
                history.push(placed);
                Ok(Placement { placed, evicted })
            }
            // Unreachable: validate already rejected mismatched shapes.
            _ => Err(RuleViolation::WrongGeometry),
        }
    }

    /// First winning line held by `role`, if any.
    pub fn winning_line(&self, role: PlayerRole) -> Option<Vec<Coord>> {
        match self {
            Self::Drop { cells } => {
                for row in 0..DROP_ROWS {
                    for col in 0..DROP_COLS {
                        if cells[row][col] != Some(role) {
                            continue;
                        }
                        'dirs: for (dr, dc) in DROP_DIRS {
                            let mut line = Vec::with_capacity(DROP_WIN_LEN);
                            for step in 0..DROP_WIN_LEN as isize {
                                let r = row as isize + dr * step;
                                let c = col as isize + dc * step;
                                if r < 0
                                    || r >= DROP_ROWS as isize
                                    || c < 0
                                    || c >= DROP_COLS as isize
                                    || cells[r as usize][c as usize] != Some(role)
                                {
                                    continue 'dirs;
                                }
                                line.push(Coord::new(r as usize, c as usize));
                            }
                            return Some(line);
                        }
                    }
                }
                None
            }
            Self::Vanish { cells } => {
                for line in &VANISH_LINES {
                    if line.iter().all(|&i| cells[i] == Some(role)) {
                        return Some(line.iter().map(|&i| Coord::from_cell(i)).collect());
                    }
                }
                None
            }
        }
    }

    /// Check whether `role` holds a winning line.
    pub fn has_win(&self, role: PlayerRole) -> bool {
        self.winning_line(role).is_some()
    }

    /// Check whether every cell is occupied.
    pub fn is_full(&self) -> bool {
        match self {
            Self::Drop { cells } => cells.iter().flatten().all(|c| c.is_some()),
            Self::Vanish { cells } => cells.iter().all(|c| c.is_some()),
        }
    }

    /// Check for a draw: board fully occupied with no winner.
    ///
    /// Only the drop variant can draw. The vanishing variant holds at most
    /// 2 x [`PIECE_LIMIT`] of its 9 cells, so it can never fill.
    pub fn is_draw(&self) -> bool {
        match self {
            Self::Drop { .. } => {
                self.is_full()
                    && !self.has_win(PlayerRole::One)
                    && !self.has_win(PlayerRole::Two)
            }
            Self::Vanish { .. } => false,
        }
    }

    /// Number of pieces `role` currently holds on the board.
    pub fn piece_count(&self, role: PlayerRole) -> usize {
        match self {
            Self::Drop { cells } => cells
                .iter()
                .flatten()
                .filter(|&&c| c == Some(role))
                .count(),
            Self::Vanish { cells } => cells.iter().filter(|&&c| c == Some(role)).count(),
        }
    }

    /// Rebuild a board and both piece histories by replaying a move log.
    ///
    /// Cell occupancy is fully derivable from the log; this is the
    /// invariant-checking counterpart used by tests and recovery paths.
    pub fn replay<I>(
        kind: GameKind,
        moves: I,
    ) -> Result<(Board, PerRole<Vec<Coord>>), RuleViolation>
    where
        I: IntoIterator<Item = (PlayerRole, MoveTarget)>,
    {
        let mut board = Board::empty(kind);
        let mut history = PerRole::<Vec<Coord>>::default();
        for (role, target) in moves {
            board.apply(target, role, history.get_mut(role))?;
        }
        Ok((board, history))
    }

    /// Convert the board to a JSON matrix of role strings.
    pub fn to_json(&self) -> serde_json::Value {
        let cell_json = |c: &Option<PlayerRole>| match c {
            Some(role) => serde_json::json!(role.as_str()),
            None => serde_json::Value::Null,
        };
        match self {
            Self::Drop { cells } => serde_json::Value::Array(
                cells
                    .iter()
                    .map(|row| serde_json::Value::Array(row.iter().map(cell_json).collect()))
                    .collect(),
            ),
            Self::Vanish { cells } => serde_json::Value::Array(
                cells
                    .chunks(VANISH_SIZE)
                    .map(|row| serde_json::Value::Array(row.iter().map(cell_json).collect()))
                    .collect(),
            ),
        }
    }
}
