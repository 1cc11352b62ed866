//! 全局配置管理,存储引擎所有可配置项

use std::time::Duration;

use crate::rule::LabelSelector;

/// 匹配能力（后端）集合，封闭枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// 文件名匹配（builtin.file）
    FileName,
    /// 文件内容正则匹配（builtin.filecontent）
    FileContent,
    /// XML 结构匹配（builtin.xml）
    XmlStructure,
    /// 源码符号引用匹配（java.referenced）
    SymbolReference,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::FileName,
        Capability::FileContent,
        Capability::XmlStructure,
        Capability::SymbolReference,
    ];

    /// 规则文档中的能力键名 -> 能力
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "builtin.file" => Some(Capability::FileName),
            "builtin.filecontent" => Some(Capability::FileContent),
            "builtin.xml" => Some(Capability::XmlStructure),
            "java.referenced" => Some(Capability::SymbolReference),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Capability::FileName => "builtin.file",
            Capability::FileContent => "builtin.filecontent",
            Capability::XmlStructure => "builtin.xml",
            Capability::SymbolReference => "java.referenced",
        }
    }
}

/// 编译失败时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompilePolicy {
    /// 跳过问题规则并记录诊断，其余规则照常运行
    #[default]
    SkipInvalid,
    /// 任意规则编译失败即整体失败
    FailFast,
}

/// 模板变量无法解析时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemplatePolicy {
    /// 保留未解析的占位符原文，并记录诊断
    #[default]
    Verbatim,
    /// 未解析变量替换为空字符串
    Empty,
    /// 视为错误，不产出该 Finding
    Strict,
}

/// 多处命中时的产出策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// 每处命中一个 incident
    #[default]
    All,
    /// 只保留第一处命中
    First,
}

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // 并发工作任务数
    pub workers: usize,
    // 单个（规则, 制品）评估超时
    pub artifact_timeout: Duration,
    pub compile_policy: CompilePolicy,
    pub template_policy: TemplatePolicy,
    // 文件内容匹配的多命中策略
    pub content_match: MatchMode,
    // 符号引用匹配的多命中策略
    pub symbol_match: MatchMode,
    // 引擎声明的能力集合
    pub capabilities: Vec<Capability>,
    // 规则标签选择器（None 表示全部规则）
    pub selector: Option<LabelSelector>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            artifact_timeout: Duration::from_secs(30),
            compile_policy: CompilePolicy::default(),
            template_policy: TemplatePolicy::default(),
            content_match: MatchMode::All,
            symbol_match: MatchMode::All,
            capabilities: Capability::ALL.to_vec(),
            selector: None,
        }
    }
}

impl EngineConfig {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取默认配置
    pub fn get_default() -> EngineConfig {
        EngineConfig::default()
    }

    /// 自定义配置
    pub fn custom() -> CustomConfigBuilder {
        CustomConfigBuilder::new()
    }
}

/// 配置构建器（便于自定义配置）
#[derive(Debug, Clone)]
pub struct CustomConfigBuilder {
    config: EngineConfig,
}

impl Default for CustomConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers.max(1);
        self
    }

    pub fn artifact_timeout(mut self, timeout: Duration) -> Self {
        self.config.artifact_timeout = timeout;
        self
    }

    pub fn compile_policy(mut self, policy: CompilePolicy) -> Self {
        self.config.compile_policy = policy;
        self
    }

    pub fn template_policy(mut self, policy: TemplatePolicy) -> Self {
        self.config.template_policy = policy;
        self
    }

    pub fn content_match(mut self, mode: MatchMode) -> Self {
        self.config.content_match = mode;
        self
    }

    pub fn symbol_match(mut self, mode: MatchMode) -> Self {
        self.config.symbol_match = mode;
        self
    }

    pub fn capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.config.capabilities = capabilities;
        self
    }

    pub fn selector(mut self, selector: LabelSelector) -> Self {
        self.config.selector = Some(selector);
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
