pub mod ai;
pub mod game;

use gloo_timers::future::TimeoutFuture;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;
use web_sys::js_sys::Promise;

pub use ai::{AiAgent, AiConfig, AiDecision, AiDifficulty, AiStrategy, ConfigError};
pub use game::{
    evaluate_winner, AiTurnOutcome, Board, Cell, CellState, GameController, GameEvent,
    GameSnapshot, GameState, GameStatus, Habitat, IntegrityError, MoveOutcome, Position,
    RuleEngine, RuleError, Side, CELL_COUNT, GRID_SIZE,
};

#[cfg(all(feature = "wee_alloc", target_arch = "wasm32"))]
#[global_allocator]
static ALLOC: wee_alloc::WeeAlloc = wee_alloc::WeeAlloc::INIT;

#[wasm_bindgen(start)]
pub fn start() {
    set_panic_hook();
}

fn console_log(message: &str) {
    web_sys::console::log_1(&message.into());
}

fn to_js_error<E: Serialize>(error: E) -> JsValue {
    to_value(&error).unwrap_or_else(|serialize_err| JsValue::from_str(&serialize_err.to_string()))
}

fn serde_to_js_error<E: std::fmt::Display>(error: E) -> JsValue {
    JsValue::from_str(&error.to_string())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, JsValue> {
    serde_json::to_string(value).map_err(serde_to_js_error)
}

fn parse_difficulty(difficulty: &str) -> Result<AiDifficulty, JsValue> {
    difficulty.parse::<AiDifficulty>().map_err(|error| {
        web_sys::console::error_1(&error.to_string().into());
        to_js_error(error)
    })
}

fn seeded_rng(seed: Option<u32>) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(u64::from(seed)),
        None => SmallRng::from_entropy(),
    }
}

fn checked_state(state: JsValue) -> Result<GameState, JsValue> {
    let state: GameState = from_value(state).map_err(JsValue::from)?;
    RuleEngine::ensure_integrity(&state).map_err(to_js_error)?;
    Ok(state)
}

/// 展示层持有的对局句柄。
#[wasm_bindgen]
pub struct GameEngine {
    controller: GameController,
}

#[wasm_bindgen]
impl GameEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(difficulty: Option<String>, seed: Option<u32>) -> Result<GameEngine, JsValue> {
        let difficulty = match difficulty.as_deref() {
            Some(value) => parse_difficulty(value)?,
            None => AiDifficulty::Easy,
        };
        let controller = match seed {
            Some(seed) => GameController::with_seed(difficulty, u64::from(seed)),
            None => GameController::new(difficulty),
        };
        Ok(GameEngine { controller })
    }

    /// 未知难度抛出异常，不回退到默认值。
    pub fn reset(&mut self, difficulty: &str) -> Result<(), JsValue> {
        let difficulty = parse_difficulty(difficulty)?;
        self.controller.reset(difficulty);
        console_log(&format!("new {difficulty} game"));
        Ok(())
    }

    pub fn state_json(&self) -> Result<String, JsValue> {
        to_json(self.controller.state())
    }

    pub fn snapshot(&self) -> Result<JsValue, JsValue> {
        to_value(&self.controller.snapshot()).map_err(JsValue::from)
    }

    pub fn submit_move(&mut self, row: u32, col: u32) -> Result<String, JsValue> {
        let outcome = self.controller.submit_human_move(row as usize, col as usize);
        to_json(&outcome)
    }

    pub fn run_ai_turn(&mut self) -> Result<String, JsValue> {
        let outcome = self.controller.run_ai_turn();
        if let Some(decision) = &outcome.decision {
            console_log(&format!("AI damaged {}!", decision.habitat));
        }
        to_json(&outcome)
    }

    /// 延迟后返回 AI 将要走的位置，不修改引擎状态。
    pub fn think_ai(&self, delay_ms: Option<u32>) -> Promise {
        let decision = self.controller.preview_ai_move();
        let delay = delay_ms.unwrap_or(0);

        future_to_promise(async move {
            if delay > 0 {
                TimeoutFuture::new(delay).await;
            }
            let json = to_json(&decision)?;
            Ok(JsValue::from_str(&json))
        })
    }
}

/// 生成一个新的对局状态，可选种子用于复现棋盘布局。
#[wasm_bindgen(js_name = "createGame")]
pub fn create_game(difficulty: &str, seed: Option<u32>) -> Result<JsValue, JsValue> {
    let difficulty = parse_difficulty(difficulty)?;
    let state = GameState::shuffled(difficulty, &mut seeded_rng(seed));
    to_value(&state).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "checkWinner")]
pub fn check_winner(state: JsValue) -> Result<JsValue, JsValue> {
    let state = checked_state(state)?;
    to_value(&evaluate_winner(&state.board)).map_err(JsValue::from)
}

#[wasm_bindgen(js_name = "validateState")]
pub fn validate_state(state: JsValue) -> Result<(), JsValue> {
    checked_state(state).map(|_| ())
}

/// 为外部传入的状态计算 AI 落子（不修改传入状态）。
#[wasm_bindgen(js_name = "computeAiMove")]
pub fn compute_ai_move(state: JsValue, seed: Option<u32>) -> Result<JsValue, JsValue> {
    let mut state = checked_state(state)?;
    RuleEngine::validate_turn(&state, Side::Ai).map_err(to_js_error)?;
    let config = AiConfig::from_difficulty(state.difficulty);
    let mut agent = AiAgent::with_rng(config, seeded_rng(seed));
    let decision = agent
        .decide_move(&mut state.board)
        .ok_or_else(|| to_js_error(RuleError::NoMovesAvailable))?;
    to_value(&decision).map_err(JsValue::from)
}

#[cfg(feature = "console_error_panic_hook")]
fn set_panic_hook() {
    console_error_panic_hook::set_once();
}

#[cfg(not(feature = "console_error_panic_hook"))]
fn set_panic_hook() {}
