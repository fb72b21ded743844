//! AI 算法模块（随机落子与 alpha-beta 极小化极大搜索）。

pub mod minimax;

pub use minimax::{AiAgent, AiConfig, AiDecision, AiDifficulty, AiStrategy, ConfigError};
