//! 规则模块：负责规则语料的加载、校验、组装与数据模型定义
pub mod model;
pub mod loader;
pub mod assembler;
pub mod selector;
pub mod embedded;

// 导出核心接口
pub use self::model::{
    split_label, Category, Condition, LeafCondition, Rule, RuleCorpus, RulesetHeader,
};
pub use self::loader::{concat_corpora, RuleLoader};
pub use self::assembler::{assemble, Ruleset, RulesetBuilder};
pub use self::selector::LabelSelector;
pub use self::embedded::{
    discovery_corpora, discovery_rules, discovery_ruleset, discovery_ruleset_builder,
};
