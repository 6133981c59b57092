//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CODESCOUT__*` 覆盖（双下划线表示嵌套，如 `CODESCOUT__CACHE__THRESHOLD=0.9`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub research: ResearchSection,
    pub cache: CacheSection,
    pub tasks: TasksSection,
    pub tools: ToolsSection,
}

/// [app] 段：仓库根目录、查询库路径
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 被研究的仓库根目录，未设置时用当前目录
    pub repo_root: Option<PathBuf>,
    /// 查询记录 SQLite 路径；未设置时使用内存存储（进程退出即丢失缓存）
    pub db_path: Option<PathBuf>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    /// 单次推理请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            temperature: 0.2,
            request_timeout_secs: 120,
        }
    }
}

/// [research] 段：推理循环预算与策略选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResearchSection {
    /// 单轮研究最大迭代数，到达后强制综合
    pub max_iterations: usize,
    /// 剩余迭代数小于该值时注入「立即作答」提示
    pub synthesis_margin: usize,
    /// 在该迭代检查是否用过精确工具（符号解析 / 读文件）
    pub checkpoint_iteration: usize,
    /// Auto 选择时使用的策略名
    pub default_strategy: String,
    /// 多阶段策略中每个子研究的迭代上限
    pub researcher_max_iterations: usize,
    /// 多阶段策略规划出的子问题上限
    pub max_sub_questions: usize,
    /// 工具输出写回历史时的最大字符数
    pub max_tool_output_chars: usize,
}

impl Default for ResearchSection {
    fn default() -> Self {
        Self {
            max_iterations: 12,
            synthesis_margin: 2,
            checkpoint_iteration: 6,
            default_strategy: "single_pass".to_string(),
            researcher_max_iterations: 6,
            max_sub_questions: 3,
            max_tool_output_chars: 8000,
        }
    }
}

/// [cache] 段：相似度阈值与候选扫描上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub threshold: f64,
    pub max_candidates: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            max_candidates: 500,
        }
    }
}

/// [tasks] 段：事件日志容量与已结束任务的保留时长
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TasksSection {
    pub event_log_capacity: usize,
    pub retention_secs: u64,
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            event_log_capacity: 256,
            retention_secs: 600,
        }
    }
}

/// [tools] 段：工具超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 CODESCOUT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CODESCOUT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CODESCOUT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_research_budget() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.research.max_iterations, 12);
        assert_eq!(cfg.research.default_strategy, "single_pass");
        assert!((cfg.cache.threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.tasks.event_log_capacity, 256);
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[research]\nmax_iterations = 5\n\n[cache]\nthreshold = 0.9\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.research.max_iterations, 5);
        assert!((cfg.cache.threshold - 0.9).abs() < f64::EPSILON);
        // 未出现的键保持默认
        assert_eq!(cfg.research.synthesis_margin, 2);
    }
}
