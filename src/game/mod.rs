//! 游戏核心逻辑模块（棋盘模型、规则判定与回合控制）。

pub mod controller;
pub mod rules;
pub mod state;

pub use controller::{AiTurnOutcome, GameController, GameSnapshot, GameStatus, MoveOutcome};
pub use rules::{evaluate_winner, RuleEngine, RuleError, LINES};
pub use state::{
    Board,
    Cell,
    CellState,
    GameEvent,
    GameState,
    Habitat,
    IntegrityError,
    Position,
    Side,
    CELL_COUNT,
    GRID_SIZE,
};
