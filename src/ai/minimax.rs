use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::game::{evaluate_winner, Board, CellState, Habitat, Position, Side};

const WIN_SCORE: i32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ConfigError {
    UnknownDifficulty { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownDifficulty { value } => {
                write!(f, "unknown difficulty {value:?}, expected \"easy\" or \"hard\"")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AiStrategy {
    Random,
    Minimax,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AiDifficulty {
    Easy,
    Hard,
}

impl FromStr for AiDifficulty {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" | "random" => Ok(AiDifficulty::Easy),
            "hard" | "minimax" | "expert" => Ok(AiDifficulty::Hard),
            _ => Err(ConfigError::UnknownDifficulty {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for AiDifficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiDifficulty::Easy => f.write_str("easy"),
            AiDifficulty::Hard => f.write_str("hard"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AiConfig {
    pub strategy: AiStrategy,
    // 关闭剪枝不影响选点，仅用于对照测试
    pub pruning: bool,
}

impl AiConfig {
    pub fn from_difficulty(difficulty: AiDifficulty) -> Self {
        match difficulty {
            AiDifficulty::Easy => Self {
                strategy: AiStrategy::Random,
                pruning: false,
            },
            AiDifficulty::Hard => Self {
                strategy: AiStrategy::Minimax,
                pruning: true,
            },
        }
    }

    pub fn with_pruning(mut self, pruning: bool) -> Self {
        self.pruning = pruning;
        self
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        AiConfig::from_difficulty(AiDifficulty::Hard)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AiDecision {
    pub position: Position,
    pub habitat: Habitat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<i32>,
    pub nodes: u64,
    pub strategy: AiStrategy,
}

struct SearchStats {
    nodes: u64,
}

impl SearchStats {
    fn new() -> Self {
        Self { nodes: 0 }
    }
}

/// 临时落子，析构时还原格子（剪枝提前退出时同样生效）。
struct ScopedMark<'a> {
    board: &'a mut Board,
    position: Position,
    prior: CellState,
}

impl<'a> ScopedMark<'a> {
    fn new(board: &'a mut Board, position: Position, mark: CellState) -> Self {
        let cell = board.cell_mut(position);
        let prior = cell.state;
        cell.state = mark;
        Self {
            board,
            position,
            prior,
        }
    }
}

impl Deref for ScopedMark<'_> {
    type Target = Board;

    fn deref(&self) -> &Board {
        &*self.board
    }
}

impl DerefMut for ScopedMark<'_> {
    fn deref_mut(&mut self) -> &mut Board {
        &mut *self.board
    }
}

impl Drop for ScopedMark<'_> {
    fn drop(&mut self) {
        self.board.cell_mut(self.position).state = self.prior;
    }
}

#[derive(Clone)]
pub struct AiAgent {
    config: AiConfig,
    rng: SmallRng,
}

impl AiAgent {
    pub fn new(config: AiConfig) -> Self {
        Self {
            config,
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn with_seed(config: AiConfig, seed: u64) -> Self {
        Self {
            config,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn with_rng(config: AiConfig, rng: SmallRng) -> Self {
        Self { config, rng }
    }

    pub fn set_config(&mut self, config: AiConfig) {
        self.config = config;
    }

    /// 没有 Damaged 格子时返回 `None`；搜索结束后棋盘保持原样。
    pub fn decide_move(&mut self, board: &mut Board) -> Option<AiDecision> {
        let decision = match self.config.strategy {
            AiStrategy::Random => self.random_decision(board),
            AiStrategy::Minimax => self.minimax_decision(board),
        };
        if let Some(decision) = &decision {
            debug!(
                position = %decision.position,
                habitat = %decision.habitat,
                evaluation = ?decision.evaluation,
                nodes = decision.nodes,
                "ai decision"
            );
        }
        decision
    }

    fn random_decision(&mut self, board: &Board) -> Option<AiDecision> {
        let candidates = board.damaged_positions();
        let position = *candidates.choose(&mut self.rng)?;
        Some(AiDecision {
            position,
            habitat: board.cell(position).habitat,
            evaluation: None,
            nodes: 1,
            strategy: AiStrategy::Random,
        })
    }

    fn minimax_decision(&mut self, board: &mut Board) -> Option<AiDecision> {
        let mut stats = SearchStats::new();
        let mut best: Option<(Position, i32)> = None;
        let mut alpha = i32::MIN;
        let beta = i32::MAX;

        for position in Position::ALL {
            if board.state_at(position) != CellState::Damaged {
                continue;
            }
            let score = {
                let mut marked = ScopedMark::new(board, position, Side::Ai.mark());
                self.minimax_rec(&mut marked, Side::Human, 0, alpha, beta, &mut stats)
            };

            // 严格大于：同分时保留行优先顺序中的第一个
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((position, score));
            }
            if self.config.pruning {
                alpha = alpha.max(score);
            }
        }

        let (position, score) = best?;
        Some(AiDecision {
            position,
            habitat: board.cell(position).habitat,
            evaluation: Some(score),
            nodes: stats.nodes,
            strategy: AiStrategy::Minimax,
        })
    }

    fn minimax_rec(
        &self,
        board: &mut Board,
        to_move: Side,
        depth: i32,
        mut alpha: i32,
        mut beta: i32,
        stats: &mut SearchStats,
    ) -> i32 {
        stats.nodes += 1;

        match evaluate_winner(board) {
            Some(Side::Ai) => return WIN_SCORE - depth,
            Some(Side::Human) => return -WIN_SCORE + depth,
            None => {}
        }
        if board.is_full() {
            return 0;
        }

        let maximizing = to_move == Side::Ai;
        let mut value = if maximizing { i32::MIN } else { i32::MAX };

        for position in Position::ALL {
            if board.state_at(position) != CellState::Damaged {
                continue;
            }
            let score = {
                let mut marked = ScopedMark::new(board, position, to_move.mark());
                self.minimax_rec(
                    &mut marked,
                    to_move.opponent(),
                    depth + 1,
                    alpha,
                    beta,
                    stats,
                )
            };

            if maximizing {
                value = value.max(score);
                alpha = alpha.max(score);
            } else {
                value = value.min(score);
                beta = beta.min(score);
            }
            if self.config.pruning && beta <= alpha {
                break;
            }
        }
        value
    }
}
