use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::rules::{completes_line, evaluate_winner};
use crate::ai::AiDifficulty;

/// 棋盘边长（固定 3×3）。
pub const GRID_SIZE: usize = 3;
/// 棋盘格子总数，等于栖息地标签的数量。
pub const CELL_COUNT: usize = GRID_SIZE * GRID_SIZE;

/// 九种固定的栖息地标签。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Habitat {
    Wetland,
    Meadow,
    Woodland,
    Grassland,
    Marsh,
    Scrubland,
    Forest,
    Riverbank,
    Savanna,
}

impl Habitat {
    pub const ALL: [Habitat; CELL_COUNT] = [
        Habitat::Wetland,
        Habitat::Meadow,
        Habitat::Woodland,
        Habitat::Grassland,
        Habitat::Marsh,
        Habitat::Scrubland,
        Habitat::Forest,
        Habitat::Riverbank,
        Habitat::Savanna,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Habitat::Wetland => "Wetland",
            Habitat::Meadow => "Meadow",
            Habitat::Woodland => "Woodland",
            Habitat::Grassland => "Grassland",
            Habitat::Marsh => "Marsh",
            Habitat::Scrubland => "Scrubland",
            Habitat::Forest => "Forest",
            Habitat::Riverbank => "Riverbank",
            Habitat::Savanna => "Savanna",
        }
    }
}

impl fmt::Display for Habitat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 格子状态。只有 `Damaged` 可以迁移，`Healthy` 与 `Critical` 为终态。
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CellState {
    #[default]
    Damaged,
    Healthy,
    Critical,
}

/// 对局双方。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Human,
    Ai,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::Human => Side::Ai,
            Side::Ai => Side::Human,
        }
    }

    pub fn mark(self) -> CellState {
        match self {
            Side::Human => CellState::Healthy,
            Side::Ai => CellState::Critical,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Human => f.write_str("human"),
            Side::Ai => f.write_str("ai"),
        }
    }
}

/// 棋盘坐标，行列均在 `[0, 3)` 内。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    /// 行优先顺序，搜索按此顺序枚举候选格。
    pub const ALL: [Position; CELL_COUNT] = [
        Position { row: 0, col: 0 },
        Position { row: 0, col: 1 },
        Position { row: 0, col: 2 },
        Position { row: 1, col: 0 },
        Position { row: 1, col: 1 },
        Position { row: 1, col: 2 },
        Position { row: 2, col: 0 },
        Position { row: 2, col: 1 },
        Position { row: 2, col: 2 },
    ];

    pub fn new(row: usize, col: usize) -> Option<Self> {
        if row < GRID_SIZE && col < GRID_SIZE {
            Some(Self { row, col })
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        self.row * GRID_SIZE + self.col
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// 单个格子：栖息地、状态与保护标记。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cell {
    pub habitat: Habitat,
    #[serde(default)]
    pub state: CellState,
    #[serde(default)]
    pub protected: bool,
}

impl Cell {
    pub fn new(habitat: Habitat) -> Self {
        Self {
            habitat,
            state: CellState::Damaged,
            protected: false,
        }
    }

    pub fn is_damaged(&self) -> bool {
        self.state == CellState::Damaged
    }
}

/// 3×3 棋盘。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Board {
    cells: [[Cell; GRID_SIZE]; GRID_SIZE],
}

impl Board {
    pub fn from_habitats(habitats: [Habitat; CELL_COUNT]) -> Self {
        let mut cells = [[Cell::new(Habitat::Wetland); GRID_SIZE]; GRID_SIZE];
        for (position, habitat) in Position::ALL.iter().zip(habitats) {
            cells[position.row][position.col] = Cell::new(habitat);
        }
        Self { cells }
    }

    /// 随机排列九种栖息地。
    pub fn shuffled<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut habitats = Habitat::ALL;
        habitats.shuffle(rng);
        Self::from_habitats(habitats)
    }

    /// 越界时 panic，调用方需先校验。
    pub fn get(&self, row: usize, col: usize) -> &Cell {
        &self.cells[row][col]
    }

    pub fn cell(&self, position: Position) -> &Cell {
        &self.cells[position.row][position.col]
    }

    pub(crate) fn cell_mut(&mut self, position: Position) -> &mut Cell {
        &mut self.cells[position.row][position.col]
    }

    pub fn state_at(&self, position: Position) -> CellState {
        self.cell(position).state
    }

    pub fn is_full(&self) -> bool {
        self.cells().all(|cell| !cell.is_damaged())
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> + '_ {
        self.cells.iter().flat_map(|row| row.iter())
    }

    pub fn damaged_positions(&self) -> Vec<Position> {
        Position::ALL
            .iter()
            .copied()
            .filter(|position| self.cell(*position).is_damaged())
            .collect()
    }

    pub fn count(&self, state: CellState) -> usize {
        self.cells().filter(|cell| cell.state == state).count()
    }

    pub fn habitats(&self) -> Vec<Habitat> {
        self.cells().map(|cell| cell.habitat).collect()
    }

    /// Human claim: Damaged → Healthy and the cell becomes protected for good.
    pub(crate) fn protect(&mut self, position: Position) {
        let cell = self.cell_mut(position);
        cell.state = CellState::Healthy;
        cell.protected = true;
    }

    /// AI claim: Damaged → Critical. Never touches the protection flag.
    pub(crate) fn degrade(&mut self, position: Position) {
        self.cell_mut(position).state = CellState::Critical;
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::from_habitats(Habitat::ALL)
    }
}

/// 对局事件流。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum GameEvent {
    HabitatProtected { position: Position, habitat: Habitat },
    HabitatDegraded { position: Position, habitat: Habitat },
    GameWon { winner: Side },
    GameTied,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IntegrityError {
    MissingHabitat { habitat: Habitat },
    DuplicateHabitat { habitat: Habitat },
    UnprotectedInvariant { position: Position, state: CellState },
    UnprotectedHealthy { position: Position },
    TurnMismatch { current_player: Side, healthy: usize, critical: usize },
    WinnerWithoutGameOver { winner: Side },
    ConflictingLines,
    UndeclaredOutcome { on_board: Option<Side> },
    OutcomeMismatch { recorded: Option<Side>, on_board: Option<Side> },
    PrematureTie,
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityError::MissingHabitat { habitat } => {
                write!(f, "habitat {habitat} is missing from the board")
            }
            IntegrityError::DuplicateHabitat { habitat } => {
                write!(f, "habitat {habitat} appears more than once")
            }
            IntegrityError::UnprotectedInvariant { position, state } => {
                write!(f, "protected cell {position} is {state:?}, expected Healthy")
            }
            IntegrityError::UnprotectedHealthy { position } => {
                write!(f, "healthy cell {position} is not marked protected")
            }
            IntegrityError::TurnMismatch {
                current_player,
                healthy,
                critical,
            } => write!(
                f,
                "{current_player} to move with {healthy} healthy and {critical} critical cells"
            ),
            IntegrityError::WinnerWithoutGameOver { winner } => {
                write!(f, "winner {winner} recorded on a game that is not over")
            }
            IntegrityError::ConflictingLines => {
                f.write_str("both sides have a completed line")
            }
            IntegrityError::UndeclaredOutcome { on_board } => match on_board {
                Some(winner) => write!(f, "{winner} has a line but the game is still live"),
                None => f.write_str("board is full but the game is still live"),
            },
            IntegrityError::OutcomeMismatch { recorded, on_board } => write!(
                f,
                "recorded winner {recorded:?} disagrees with the board ({on_board:?})"
            ),
            IntegrityError::PrematureTie => {
                f.write_str("tie recorded while damaged cells remain")
            }
        }
    }
}

impl std::error::Error for IntegrityError {}

/// 对局整体状态。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameState {
    pub board: Board,
    pub current_player: Side,
    #[serde(default)]
    pub game_over: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Side>,
    pub difficulty: AiDifficulty,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_log: Vec<GameEvent>,
}

impl GameState {
    pub fn new(board: Board, difficulty: AiDifficulty) -> Self {
        Self {
            board,
            current_player: Side::Human,
            game_over: false,
            winner: None,
            difficulty,
            event_log: Vec::new(),
        }
    }

    pub fn shuffled<R: Rng + ?Sized>(difficulty: AiDifficulty, rng: &mut R) -> Self {
        Self::new(Board::shuffled(rng), difficulty)
    }

    pub fn record_event(&mut self, event: GameEvent) {
        self.event_log.push(event);
    }

    pub fn is_finished(&self) -> bool {
        self.game_over
    }

    /// 只有第一次调用生效。
    pub fn declare_outcome(&mut self, winner: Option<Side>) -> Option<GameEvent> {
        if self.game_over {
            return None;
        }
        self.game_over = true;
        self.winner = winner;
        let event = match winner {
            Some(winner) => GameEvent::GameWon { winner },
            None => GameEvent::GameTied,
        };
        self.record_event(event.clone());
        Some(event)
    }

    pub fn integrity_check(&self) -> Result<(), IntegrityError> {
        let mut seen = HashSet::new();
        for cell in self.board.cells() {
            if !seen.insert(cell.habitat) {
                return Err(IntegrityError::DuplicateHabitat {
                    habitat: cell.habitat,
                });
            }
        }
        if let Some(habitat) = Habitat::ALL.iter().find(|h| !seen.contains(*h)) {
            return Err(IntegrityError::MissingHabitat { habitat: *habitat });
        }

        for position in Position::ALL {
            let cell = self.board.cell(position);
            if cell.protected && cell.state != CellState::Healthy {
                return Err(IntegrityError::UnprotectedInvariant {
                    position,
                    state: cell.state,
                });
            }
            // 只有人类落子会产生 Healthy，且必然带保护标记
            if cell.state == CellState::Healthy && !cell.protected {
                return Err(IntegrityError::UnprotectedHealthy { position });
            }
        }

        if let Some(winner) = self.winner {
            if !self.game_over {
                return Err(IntegrityError::WinnerWithoutGameOver { winner });
            }
        }

        // 人类先手；终局后轮次照常翻转，计数关系同样成立
        let healthy = self.board.count(CellState::Healthy);
        let critical = self.board.count(CellState::Critical);
        let consistent = match self.current_player {
            Side::Human => healthy == critical,
            Side::Ai => healthy == critical + 1,
        };
        if !consistent {
            return Err(IntegrityError::TurnMismatch {
                current_player: self.current_player,
                healthy,
                critical,
            });
        }

        if completes_line(&self.board, Side::Human) && completes_line(&self.board, Side::Ai) {
            return Err(IntegrityError::ConflictingLines);
        }
        let on_board = evaluate_winner(&self.board);
        if self.game_over {
            if self.winner != on_board {
                return Err(IntegrityError::OutcomeMismatch {
                    recorded: self.winner,
                    on_board,
                });
            }
            if on_board.is_none() && !self.board.is_full() {
                return Err(IntegrityError::PrematureTie);
            }
        } else if on_board.is_some() || self.board.is_full() {
            return Err(IntegrityError::UndeclaredOutcome { on_board });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn shuffled_board_is_a_permutation_of_all_habitats() {
        let mut rng = SmallRng::seed_from_u64(7);
        let board = Board::shuffled(&mut rng);
        let mut habitats = board.habitats();
        habitats.sort_by_key(|h| Habitat::ALL.iter().position(|x| x == h));
        assert_eq!(habitats, Habitat::ALL.to_vec());
        assert_eq!(board.count(CellState::Damaged), CELL_COUNT);
        assert!(board.cells().all(|cell| !cell.protected));
    }

    #[test]
    fn same_seed_draws_same_layout() {
        let first = Board::shuffled(&mut SmallRng::seed_from_u64(42));
        let second = Board::shuffled(&mut SmallRng::seed_from_u64(42));
        assert_eq!(first, second);
    }

    #[test]
    fn board_is_full_only_without_damaged_cells() {
        let mut board = Board::default();
        assert!(!board.is_full());
        for (i, position) in Position::ALL.iter().enumerate() {
            if i % 2 == 0 {
                board.protect(*position);
            } else {
                board.degrade(*position);
            }
        }
        assert!(board.is_full());
    }

    #[test]
    fn protect_sets_flag_but_degrade_does_not() {
        let mut board = Board::default();
        let a = Position::new(0, 0).unwrap();
        let b = Position::new(2, 2).unwrap();
        board.protect(a);
        board.degrade(b);
        assert_eq!(board.cell(a).state, CellState::Healthy);
        assert!(board.cell(a).protected);
        assert_eq!(board.cell(b).state, CellState::Critical);
        assert!(!board.cell(b).protected);
    }

    #[test]
    fn position_rejects_out_of_range() {
        assert!(Position::new(3, 0).is_none());
        assert!(Position::new(0, 3).is_none());
        assert_eq!(Position::new(2, 1).map(Position::index), Some(7));
    }

    #[test]
    fn integrity_check_catches_duplicate_habitat() {
        let mut habitats = Habitat::ALL;
        habitats[8] = Habitat::Wetland;
        let state = GameState::new(Board::from_habitats(habitats), AiDifficulty::Easy);
        assert_eq!(
            state.integrity_check(),
            Err(IntegrityError::DuplicateHabitat {
                habitat: Habitat::Wetland
            })
        );
    }

    #[test]
    fn integrity_check_catches_turn_mismatch() {
        let mut state = GameState::new(Board::default(), AiDifficulty::Hard);
        state.board.degrade(Position::new(1, 1).unwrap());
        assert!(matches!(
            state.integrity_check(),
            Err(IntegrityError::TurnMismatch { .. })
        ));
    }

    fn state_with(healthy: &[(usize, usize)], critical: &[(usize, usize)]) -> GameState {
        let mut state = GameState::new(Board::default(), AiDifficulty::Hard);
        for &(row, col) in healthy {
            state.board.protect(Position::new(row, col).unwrap());
        }
        for &(row, col) in critical {
            state.board.degrade(Position::new(row, col).unwrap());
        }
        state.current_player = if healthy.len() > critical.len() {
            Side::Ai
        } else {
            Side::Human
        };
        state
    }

    #[test]
    fn integrity_check_catches_unprotected_healthy_cell() {
        let mut state = state_with(&[(0, 0)], &[]);
        state.board.cell_mut(Position::new(0, 0).unwrap()).protected = false;
        assert_eq!(
            state.integrity_check(),
            Err(IntegrityError::UnprotectedHealthy {
                position: Position::new(0, 0).unwrap()
            })
        );
    }

    #[test]
    fn integrity_check_catches_live_game_with_completed_line() {
        let state = state_with(&[(0, 0), (0, 1), (0, 2)], &[(1, 0), (2, 2)]);
        assert_eq!(state.current_player, Side::Ai);
        assert_eq!(
            state.integrity_check(),
            Err(IntegrityError::UndeclaredOutcome {
                on_board: Some(Side::Human)
            })
        );
    }

    #[test]
    fn integrity_check_catches_live_game_on_full_board() {
        // H C H / H C C / C H H
        let state = state_with(
            &[(0, 0), (0, 2), (1, 0), (2, 1), (2, 2)],
            &[(0, 1), (1, 1), (1, 2), (2, 0)],
        );
        assert_eq!(
            state.integrity_check(),
            Err(IntegrityError::UndeclaredOutcome { on_board: None })
        );
    }

    #[test]
    fn integrity_check_catches_conflicting_lines() {
        let mut state = state_with(&[(0, 0), (0, 1), (0, 2)], &[(1, 0), (1, 1), (1, 2)]);
        state.declare_outcome(Some(Side::Human));
        assert_eq!(state.integrity_check(), Err(IntegrityError::ConflictingLines));
    }

    #[test]
    fn integrity_check_catches_recorded_winner_disagreeing_with_board() {
        let mut state = state_with(&[(0, 0), (0, 1), (0, 2)], &[(1, 0), (2, 2)]);
        state.declare_outcome(Some(Side::Ai));
        assert_eq!(
            state.integrity_check(),
            Err(IntegrityError::OutcomeMismatch {
                recorded: Some(Side::Ai),
                on_board: Some(Side::Human),
            })
        );

        let mut tied = state_with(&[(0, 0), (0, 1), (0, 2)], &[(1, 0), (2, 2)]);
        tied.declare_outcome(None);
        assert_eq!(
            tied.integrity_check(),
            Err(IntegrityError::OutcomeMismatch {
                recorded: None,
                on_board: Some(Side::Human),
            })
        );
    }

    #[test]
    fn integrity_check_catches_premature_tie() {
        let mut state = state_with(&[(1, 1)], &[(0, 0)]);
        state.declare_outcome(None);
        assert_eq!(state.integrity_check(), Err(IntegrityError::PrematureTie));
    }

    #[test]
    fn integrity_check_counts_turns_on_finished_games() {
        let mut state = state_with(&[(0, 0), (0, 1), (0, 2)], &[(1, 0), (2, 2)]);
        state.declare_outcome(Some(Side::Human));
        assert_eq!(state.integrity_check(), Ok(()));

        state.current_player = Side::Human;
        assert!(matches!(
            state.integrity_check(),
            Err(IntegrityError::TurnMismatch { .. })
        ));
    }

    #[test]
    fn cell_without_state_deserializes_as_damaged() {
        let cell: Cell = serde_json::from_str(r#"{"habitat":"marsh"}"#).unwrap();
        assert_eq!(cell.state, CellState::Damaged);
        assert!(!cell.protected);
        assert_eq!(CellState::default(), CellState::Damaged);
    }

    #[test]
    fn declare_outcome_is_sticky() {
        let mut state = GameState::new(Board::default(), AiDifficulty::Easy);
        assert_eq!(
            state.declare_outcome(Some(Side::Ai)),
            Some(GameEvent::GameWon { winner: Side::Ai })
        );
        assert_eq!(state.declare_outcome(None), None);
        assert_eq!(state.winner, Some(Side::Ai));
        assert!(state.game_over);
    }
}
