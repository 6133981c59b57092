//! 策略注册表：按名称查找策略；Auto 解析为默认策略

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::agent::Strategy;
use crate::core::ResearchError;

/// 调用方的策略选择
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StrategyChoice {
    #[default]
    Auto,
    Named(String),
}

impl FromStr for StrategyChoice {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase().replace('-', "_");
        Ok(match s.as_str() {
            "" | "auto" => Self::Auto,
            _ => Self::Named(s),
        })
    }
}

pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn Strategy>>,
    default_name: String,
}

impl StrategyRegistry {
    pub fn new(default_name: impl Into<String>) -> Self {
        Self {
            strategies: HashMap::new(),
            default_name: default_name.into(),
        }
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// 解析策略选择；Auto 目前总是默认策略
    pub fn resolve(&self, choice: &StrategyChoice) -> Result<Arc<dyn Strategy>, ResearchError> {
        let name = match choice {
            StrategyChoice::Auto => self.default_name.as_str(),
            StrategyChoice::Named(name) => name.as_str(),
        };
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| ResearchError::UnknownStrategy(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }
}
