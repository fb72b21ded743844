use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, instrument};

use super::state::{
    Board, CellState, GameEvent, GameState, IntegrityError, Position, Side, GRID_SIZE,
};

// 扫描顺序：三行、三列、主对角线、副对角线
pub const LINES: [[Position; GRID_SIZE]; 8] = [
    [pos(0, 0), pos(0, 1), pos(0, 2)],
    [pos(1, 0), pos(1, 1), pos(1, 2)],
    [pos(2, 0), pos(2, 1), pos(2, 2)],
    [pos(0, 0), pos(1, 0), pos(2, 0)],
    [pos(0, 1), pos(1, 1), pos(2, 1)],
    [pos(0, 2), pos(1, 2), pos(2, 2)],
    [pos(0, 0), pos(1, 1), pos(2, 2)],
    [pos(0, 2), pos(1, 1), pos(2, 0)],
];

const fn pos(row: usize, col: usize) -> Position {
    Position { row, col }
}

fn line_is(board: &Board, line: &[Position; GRID_SIZE], state: CellState) -> bool {
    line.iter().all(|position| board.state_at(*position) == state)
}

pub fn completes_line(board: &Board, side: Side) -> bool {
    LINES.iter().any(|line| line_is(board, line, side.mark()))
}

/// 按扫描顺序返回第一条同色线的归属，同一条线先判人类。
pub fn evaluate_winner(board: &Board) -> Option<Side> {
    for line in &LINES {
        if line_is(board, line, CellState::Healthy) {
            return Some(Side::Human);
        }
        if line_is(board, line, CellState::Critical) {
            return Some(Side::Ai);
        }
    }
    None
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum RuleError {
    GameFinished,
    NotPlayerTurn {
        expected: Side,
        actual: Side,
    },
    OutOfBounds {
        row: usize,
        col: usize,
    },
    CellNotDamaged {
        position: Position,
        state: CellState,
    },
    NoMovesAvailable,
    IntegrityViolation {
        error: IntegrityError,
    },
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleError::GameFinished => f.write_str("the game is already over"),
            RuleError::NotPlayerTurn { expected, actual } => {
                write!(f, "it is {expected}'s turn, not {actual}'s")
            }
            RuleError::OutOfBounds { row, col } => {
                write!(f, "({row}, {col}) is outside the board")
            }
            RuleError::CellNotDamaged { position, state } => {
                write!(f, "cell {position} is {state:?} and cannot be claimed")
            }
            RuleError::NoMovesAvailable => f.write_str("no damaged cell is left to claim"),
            RuleError::IntegrityViolation { error } => write!(f, "invalid game state: {error}"),
        }
    }
}

impl std::error::Error for RuleError {}

#[derive(Debug, Default, Clone, Copy)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    fn ensure_live(state: &GameState) -> Result<(), RuleError> {
        if state.is_finished() {
            return Err(RuleError::GameFinished);
        }
        Ok(())
    }

    fn ensure_turn_owner(state: &GameState, side: Side) -> Result<(), RuleError> {
        if state.current_player != side {
            return Err(RuleError::NotPlayerTurn {
                expected: state.current_player,
                actual: side,
            });
        }
        Ok(())
    }

    fn ensure_damaged(board: &Board, position: Position) -> Result<(), RuleError> {
        let state = board.state_at(position);
        if state != CellState::Damaged {
            return Err(RuleError::CellNotDamaged { position, state });
        }
        Ok(())
    }

    pub fn ensure_integrity(state: &GameState) -> Result<(), RuleError> {
        state
            .integrity_check()
            .map_err(|error| RuleError::IntegrityViolation { error })
    }

    pub fn validate_turn(state: &GameState, side: Side) -> Result<(), RuleError> {
        Self::ensure_live(state)?;
        Self::ensure_turn_owner(state, side)
    }

    pub fn validate_move(
        state: &GameState,
        side: Side,
        row: usize,
        col: usize,
    ) -> Result<Position, RuleError> {
        Self::validate_turn(state, side)?;
        let position = Position::new(row, col).ok_or(RuleError::OutOfBounds { row, col })?;
        Self::ensure_damaged(&state.board, position)?;
        Ok(position)
    }

    /// 校验失败时不修改状态。
    pub fn apply_human_move(
        &self,
        state: &mut GameState,
        row: usize,
        col: usize,
    ) -> Result<Vec<GameEvent>, RuleError> {
        let position = Self::validate_move(state, Side::Human, row, col)?;
        state.board.protect(position);
        let event = GameEvent::HabitatProtected {
            position,
            habitat: state.board.cell(position).habitat,
        };
        Ok(self.finish_move(state, event))
    }

    pub fn apply_ai_move(
        &self,
        state: &mut GameState,
        position: Position,
    ) -> Result<Vec<GameEvent>, RuleError> {
        let position = Self::validate_move(state, Side::Ai, position.row, position.col)?;
        state.board.degrade(position);
        let event = GameEvent::HabitatDegraded {
            position,
            habitat: state.board.cell(position).habitat,
        };
        Ok(self.finish_move(state, event))
    }

    fn finish_move(&self, state: &mut GameState, event: GameEvent) -> Vec<GameEvent> {
        debug!(?event, "move applied");
        state.record_event(event.clone());
        state.current_player = state.current_player.opponent();

        let mut events = vec![event];
        if let Some(outcome) = Self::check_victory(state) {
            events.push(outcome);
        }
        events
    }

    #[instrument(level = "trace", skip(state))]
    pub fn check_victory(state: &mut GameState) -> Option<GameEvent> {
        if state.is_finished() {
            return None;
        }
        if let Some(winner) = evaluate_winner(&state.board) {
            info!(%winner, "line completed");
            return state.declare_outcome(Some(winner));
        }
        if state.board.is_full() {
            info!("board full without a line, tie");
            return state.declare_outcome(None);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiDifficulty;

    fn board_from(states: [[CellState; 3]; 3]) -> Board {
        let mut board = Board::default();
        for position in Position::ALL {
            match states[position.row][position.col] {
                CellState::Healthy => board.protect(position),
                CellState::Critical => board.degrade(position),
                CellState::Damaged => {}
            }
        }
        board
    }

    use crate::game::state::CellState::{Critical as C, Damaged as D, Healthy as H};

    #[test]
    fn empty_board_has_no_winner() {
        assert_eq!(evaluate_winner(&Board::default()), None);
    }

    #[test]
    fn critical_top_row_is_ai_win() {
        let board = board_from([[C, C, C], [H, D, H], [D, H, D]]);
        assert_eq!(evaluate_winner(&board), Some(Side::Ai));
    }

    #[test]
    fn every_line_is_detected() {
        for line in &LINES {
            let mut board = Board::default();
            for position in line {
                board.protect(*position);
            }
            assert_eq!(evaluate_winner(&board), Some(Side::Human), "line {line:?}");
        }
    }

    #[test]
    fn anti_diagonal_critical_is_ai_win() {
        let board = board_from([[H, H, C], [D, C, H], [C, D, D]]);
        assert_eq!(evaluate_winner(&board), Some(Side::Ai));
    }

    #[test]
    fn completes_line_sees_both_sides() {
        let board = board_from([[H, H, H], [C, C, C], [D, D, D]]);
        assert!(completes_line(&board, Side::Human));
        assert!(completes_line(&board, Side::Ai));
        assert_eq!(evaluate_winner(&board), Some(Side::Human));
        assert!(!completes_line(&Board::default(), Side::Ai));
    }

    #[test]
    fn mixed_lines_do_not_win() {
        let board = board_from([[H, C, H], [H, C, C], [C, H, H]]);
        assert_eq!(evaluate_winner(&board), None);
        assert!(board.is_full());
    }

    #[test]
    fn human_move_protects_and_flips_turn() {
        let engine = RuleEngine::new();
        let mut state = GameState::new(Board::default(), AiDifficulty::Easy);
        let events = engine
            .apply_human_move(&mut state, 0, 0)
            .expect("move should be accepted");

        let cell = state.board.get(0, 0);
        assert_eq!(cell.state, CellState::Healthy);
        assert!(cell.protected);
        assert_eq!(state.current_player, Side::Ai);
        assert!(!state.game_over);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn rejected_moves_leave_state_untouched() {
        let engine = RuleEngine::new();
        let mut state = GameState::new(Board::default(), AiDifficulty::Easy);
        engine.apply_human_move(&mut state, 1, 1).unwrap();
        let before = state.clone();

        assert_eq!(
            engine.apply_human_move(&mut state, 0, 0),
            Err(RuleError::NotPlayerTurn {
                expected: Side::Ai,
                actual: Side::Human
            })
        );
        state.current_player = Side::Human;
        let mut expected = before.clone();
        expected.current_player = Side::Human;

        assert_eq!(
            engine.apply_human_move(&mut state, 3, 0),
            Err(RuleError::OutOfBounds { row: 3, col: 0 })
        );
        assert!(matches!(
            engine.apply_human_move(&mut state, 1, 1),
            Err(RuleError::CellNotDamaged { .. })
        ));
        assert_eq!(state, expected);
    }

    #[test]
    fn finished_game_rejects_moves() {
        let engine = RuleEngine::new();
        let mut state = GameState::new(Board::default(), AiDifficulty::Easy);
        state.declare_outcome(None);
        assert_eq!(
            engine.apply_human_move(&mut state, 0, 0),
            Err(RuleError::GameFinished)
        );
    }

    #[test]
    fn ai_move_degrades_without_protection() {
        let engine = RuleEngine::new();
        let mut state = GameState::new(Board::default(), AiDifficulty::Hard);
        engine.apply_human_move(&mut state, 0, 0).unwrap();
        engine
            .apply_ai_move(&mut state, Position::new(1, 1).unwrap())
            .unwrap();
        let cell = state.board.get(1, 1);
        assert_eq!(cell.state, CellState::Critical);
        assert!(!cell.protected);
        assert_eq!(state.current_player, Side::Human);
    }

    #[test]
    fn completing_a_line_ends_the_game() {
        let engine = RuleEngine::new();
        let mut state = GameState::new(Board::default(), AiDifficulty::Easy);
        for (human, ai) in [((0, 0), (1, 0)), ((0, 1), (1, 1))] {
            engine.apply_human_move(&mut state, human.0, human.1).unwrap();
            engine
                .apply_ai_move(&mut state, Position::new(ai.0, ai.1).unwrap())
                .unwrap();
        }
        let events = engine.apply_human_move(&mut state, 0, 2).unwrap();
        assert!(state.game_over);
        assert_eq!(state.winner, Some(Side::Human));
        assert_eq!(events.last(), Some(&GameEvent::GameWon { winner: Side::Human }));
    }

    #[test]
    fn full_board_without_line_is_a_tie() {
        let engine = RuleEngine::new();
        let mut state = GameState::new(Board::default(), AiDifficulty::Easy);
        // H C H / H C C / C H H, last human move fills the board.
        let script = [
            (Side::Human, 0, 0),
            (Side::Ai, 0, 1),
            (Side::Human, 0, 2),
            (Side::Ai, 1, 1),
            (Side::Human, 2, 1),
            (Side::Ai, 1, 2),
            (Side::Human, 1, 0),
            (Side::Ai, 2, 0),
            (Side::Human, 2, 2),
        ];
        for (side, row, col) in script {
            let result = match side {
                Side::Human => engine.apply_human_move(&mut state, row, col),
                Side::Ai => engine.apply_ai_move(&mut state, Position::new(row, col).unwrap()),
            };
            result.expect("scripted move should be legal");
        }
        assert!(state.game_over);
        assert_eq!(state.winner, None);
        assert_eq!(state.event_log.last(), Some(&GameEvent::GameTied));
    }
}
