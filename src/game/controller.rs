use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::rules::{RuleEngine, RuleError};
use super::state::{Board, GameEvent, GameState, Position, Side};
use crate::ai::{AiAgent, AiConfig, AiDecision, AiDifficulty, ConfigError};

/// 回合状态机。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum GameStatus {
    AwaitingHuman,
    AwaitingAi,
    Terminal {
        #[serde(skip_serializing_if = "Option::is_none")]
        winner: Option<Side>,
    },
}

impl GameStatus {
    pub fn of(state: &GameState) -> Self {
        if state.game_over {
            return GameStatus::Terminal {
                winner: state.winner,
            };
        }
        match state.current_player {
            Side::Human => GameStatus::AwaitingHuman,
            Side::Ai => GameStatus::AwaitingAi,
        }
    }
}

/// 提供给展示层的只读快照。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameSnapshot {
    pub board: Board,
    pub current_player: Side,
    pub game_over: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Side>,
    pub difficulty: AiDifficulty,
    pub status: GameStatus,
}

impl GameSnapshot {
    pub fn of(state: &GameState) -> Self {
        Self {
            board: state.board.clone(),
            current_player: state.current_player,
            game_over: state.game_over,
            winner: state.winner,
            difficulty: state.difficulty,
            status: GameStatus::of(state),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<GameEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RuleError>,
    pub snapshot: GameSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiTurnOutcome {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<AiDecision>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<GameEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RuleError>,
    pub snapshot: GameSnapshot,
}

impl AiTurnOutcome {
    pub fn position(&self) -> Option<Position> {
        self.decision.as_ref().map(|decision| decision.position)
    }
}

// 非线程安全，同一实例由单一调用方驱动
pub struct GameController {
    state: GameState,
    rules: RuleEngine,
    agent: AiAgent,
    rng: SmallRng,
}

impl GameController {
    pub fn new(difficulty: AiDifficulty) -> Self {
        Self::with_rngs(
            difficulty,
            SmallRng::from_entropy(),
            SmallRng::from_entropy(),
        )
    }

    /// 固定种子：棋盘布局与 Easy 落子均可复现。
    pub fn with_seed(difficulty: AiDifficulty, seed: u64) -> Self {
        Self::with_rngs(
            difficulty,
            SmallRng::seed_from_u64(seed),
            SmallRng::seed_from_u64(seed.wrapping_add(1)),
        )
    }

    pub fn with_rngs(difficulty: AiDifficulty, mut board_rng: SmallRng, ai_rng: SmallRng) -> Self {
        let state = GameState::shuffled(difficulty, &mut board_rng);
        Self {
            state,
            rules: RuleEngine::new(),
            agent: AiAgent::with_rng(AiConfig::from_difficulty(difficulty), ai_rng),
            rng: board_rng,
        }
    }

    pub fn reset(&mut self, difficulty: AiDifficulty) {
        self.state = GameState::shuffled(difficulty, &mut self.rng);
        self.agent.set_config(AiConfig::from_difficulty(difficulty));
        info!(%difficulty, "game reset");
    }

    /// 未知难度直接报错，当前对局不变。
    pub fn reset_named(&mut self, difficulty: &str) -> Result<(), ConfigError> {
        let difficulty = difficulty.parse::<AiDifficulty>()?;
        self.reset(difficulty);
        Ok(())
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot::of(&self.state)
    }

    pub fn status(&self) -> GameStatus {
        GameStatus::of(&self.state)
    }

    pub fn submit_human_move(&mut self, row: usize, col: usize) -> MoveOutcome {
        match self.rules.apply_human_move(&mut self.state, row, col) {
            Ok(events) => MoveOutcome {
                accepted: true,
                events,
                rejection: None,
                snapshot: self.snapshot(),
            },
            Err(error) => {
                debug!(row, col, %error, "human move rejected");
                MoveOutcome {
                    accepted: false,
                    events: Vec::new(),
                    rejection: Some(error),
                    snapshot: self.snapshot(),
                }
            }
        }
    }

    /// 非 AI 回合时不做任何修改，返回 `accepted = false`。
    pub fn run_ai_turn(&mut self) -> AiTurnOutcome {
        match self.play_ai_turn() {
            Ok((decision, events)) => AiTurnOutcome {
                accepted: true,
                decision: Some(decision),
                events,
                rejection: None,
                snapshot: self.snapshot(),
            },
            Err(error) => {
                debug!(%error, "ai turn rejected");
                AiTurnOutcome {
                    accepted: false,
                    decision: None,
                    events: Vec::new(),
                    rejection: Some(error),
                    snapshot: self.snapshot(),
                }
            }
        }
    }

    fn play_ai_turn(&mut self) -> Result<(AiDecision, Vec<GameEvent>), RuleError> {
        RuleEngine::validate_turn(&self.state, Side::Ai)?;
        let decision = self
            .agent
            .decide_move(&mut self.state.board)
            .ok_or(RuleError::NoMovesAvailable)?;
        let events = self.rules.apply_ai_move(&mut self.state, decision.position)?;
        Ok((decision, events))
    }

    pub fn preview_ai_move(&self) -> Option<AiDecision> {
        RuleEngine::validate_turn(&self.state, Side::Ai).ok()?;
        let mut board = self.state.board.clone();
        self.agent.clone().decide_move(&mut board)
    }
}

impl Default for GameController {
    fn default() -> Self {
        Self::new(AiDifficulty::Easy)
    }
}
