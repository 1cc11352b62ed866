//! 全局错误类型定义
//! 加载期错误（MalformedRule / DuplicateRuleId）对整个规则集致命；
//! 编译期错误按策略跳过单条规则；评估期错误仅影响单个（规则, 制品）对

use std::io::Error as IoError;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Error as SerdeJsonError;
use serde_yaml::Error as SerdeYamlError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RsdiscoveryError {
    // ===================== 加载期错误 =====================
    /// 规则文档格式错误或缺少必填字段
    #[error("Malformed rule #{index}{}: {reason}", fmt_rule_id(.rule_id))]
    MalformedRule {
        index: usize,
        rule_id: Option<String>,
        reason: String,
    },

    /// 组装规则集时 ruleID 冲突
    #[error("Duplicate ruleID `{rule_id}` (defined in `{first}` and `{second}`)")]
    DuplicateRuleId {
        rule_id: String,
        first: String,
        second: String,
    },

    /// 规则集头部文档无效
    #[error("Invalid ruleset header: {0}")]
    RulesetHeader(String),

    // ===================== 编译期错误 =====================
    /// 叶子条件引用了引擎未声明的匹配能力
    #[error("Rule `{rule_id}` uses unknown matcher backend `{backend}`")]
    UnknownMatcherBackend { rule_id: String, backend: String },

    /// 正则 / glob / XPath 编译失败
    #[error("Rule `{rule_id}` has invalid pattern `{pattern}`: {reason}")]
    InvalidPattern {
        rule_id: String,
        pattern: String,
        reason: String,
    },

    /// and / or 组合子的子条件为空
    #[error("Rule `{rule_id}` has an empty `{combinator}` condition")]
    EmptyCombinator {
        rule_id: String,
        combinator: &'static str,
    },

    // ===================== 评估期错误（可恢复） =====================
    /// 单个（规则, 制品）评估超时
    #[error("Rule `{rule_id}` timed out after {timeout:?} on {}", .path.display())]
    EvaluationTimeout {
        rule_id: String,
        path: PathBuf,
        timeout: Duration,
    },

    /// 制品内容不可读
    #[error("Artifact {} could not be read: {reason}", .path.display())]
    ArtifactRead { path: PathBuf, reason: String },

    /// 模板变量无法解析（严格模式）
    #[error("Rule `{rule_id}` cannot resolve `{{{{{variable}}}}}` in template `{template}`")]
    TemplateResolution {
        rule_id: String,
        variable: String,
        template: String,
    },

    /// 工作任务执行失败
    #[error("Async task failed: {0}")]
    AsyncTaskError(String),

    // ===================== 基础错误 =====================
    #[error("YAML parse failed: {0}")]
    YamlError(#[from] SerdeYamlError),
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] SerdeJsonError),
    #[error("IO failed: {0}")]
    IoError(#[from] IoError),
}

fn fmt_rule_id(rule_id: &Option<String>) -> String {
    match rule_id {
        Some(id) => format!(" (`{}`)", id),
        None => String::new(),
    }
}

impl RsdiscoveryError {
    /// 是否为可恢复错误（仅影响单个规则或单个制品）
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RsdiscoveryError::EvaluationTimeout { .. }
                | RsdiscoveryError::ArtifactRead { .. }
                | RsdiscoveryError::TemplateResolution { .. }
        )
    }
}

// 全局Result类型
pub type RsdResult<T> = Result<T, RsdiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_rule_message_names_rule() {
        let err = RsdiscoveryError::MalformedRule {
            index: 2,
            rule_id: Some("jpa-entity-000".to_string()),
            reason: "missing `when`".to_string(),
        };
        assert_eq!(err.to_string(), "Malformed rule #2 (`jpa-entity-000`): missing `when`");
    }

    #[test]
    fn test_template_error_message_keeps_braces() {
        let err = RsdiscoveryError::TemplateResolution {
            rule_id: "r".to_string(),
            variable: "name".to_string(),
            template: "bean {{name}}".to_string(),
        };
        assert!(err.to_string().contains("`{{name}}`"));
        assert!(err.is_recoverable());
    }
}
