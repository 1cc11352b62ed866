//! rsdiscovery - 声明式发现规则引擎
//! 加载 YAML 规则语料，编译匹配谓词，并对外部遍历器提供的制品求值

// 导出全局错误类型
pub use self::error::{RsdiscoveryError, RsdResult};

// 导出配置模块
pub use self::config::{
    Capability, CompilePolicy, ConfigManager, CustomConfigBuilder, EngineConfig, MatchMode, TemplatePolicy,
};

// 导出规则模块核心接口
pub use self::rule::{
    assemble, concat_corpora, discovery_corpora, discovery_rules, discovery_ruleset, discovery_ruleset_builder,
    Category, Condition, LabelSelector, LeafCondition, Rule, RuleCorpus, RuleLoader, Ruleset, RulesetBuilder,
    RulesetHeader,
};

// 导出制品模块核心接口
pub use self::artifact::{Artifact, LocationKind, Symbol, SymbolTable};

// 导出编译模块核心接口
pub use self::compiler::{CompiledRule, CompiledRuleset, Predicate, RuleCompiler, XPathQuery};

// 导出评估模块核心接口
pub use self::engine::{
    findings_to_json, findings_to_pretty_json, Diagnostic, DiagnosticKind, EvaluationReport, Finding,
    FindingCollector, Location, RuleEngine, RunStats,
};

// 导出工具模块核心接口
pub use self::utils::Template;

// 声明所有子模块
pub mod config;
pub mod error;
pub mod rule;
pub mod artifact;
pub mod utils;
pub mod compiler;
pub mod engine;
