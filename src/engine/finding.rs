//! 评估结果模型：Finding、诊断记录与评估报告

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RsdResult, RsdiscoveryError};
use crate::rule::Category;

/// 单次命中事件（谓词求值的中间结果）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Incident {
    /// 捕获的模板变量
    pub variables: BTreeMap<String, String>,
    pub line: Option<u32>,
}

impl Incident {
    pub fn with_var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.variables.insert(name.to_string(), value.into());
        self
    }
}

/// 命中位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// 规则命中结果（创建后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    #[serde(rename = "ruleID")]
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<u32>,
    pub location: Location,
    /// 生成消息/标签时使用的变量
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

impl Finding {
    pub fn matching_text(&self) -> Option<&str> {
        self.variables.get("matchingText").map(String::as_str)
    }
}

/// 诊断类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticKind {
    /// 编译期被跳过的规则
    RuleSkipped,
    EvaluationTimeout,
    ArtifactRead,
    TemplateResolution,
    /// 工作任务异常
    TaskFailed,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::RuleSkipped => "rule-skipped",
            DiagnosticKind::EvaluationTimeout => "evaluation-timeout",
            DiagnosticKind::ArtifactRead => "artifact-read",
            DiagnosticKind::TemplateResolution => "template-resolution",
            DiagnosticKind::TaskFailed => "task-failed",
        };
        f.write_str(s)
    }
}

/// 可恢复错误的记录，与 Finding 一同返回
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    #[serde(rename = "ruleID", default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            rule_id: None,
            path: None,
            message: message.into(),
        }
    }

    /// 由错误生成诊断，尽量带上规则与路径
    pub fn from_error(err: &RsdiscoveryError) -> Self {
        let kind = match err {
            RsdiscoveryError::UnknownMatcherBackend { .. }
            | RsdiscoveryError::InvalidPattern { .. }
            | RsdiscoveryError::EmptyCombinator { .. } => DiagnosticKind::RuleSkipped,
            RsdiscoveryError::EvaluationTimeout { .. } => DiagnosticKind::EvaluationTimeout,
            RsdiscoveryError::ArtifactRead { .. } => DiagnosticKind::ArtifactRead,
            RsdiscoveryError::TemplateResolution { .. } => DiagnosticKind::TemplateResolution,
            _ => DiagnosticKind::TaskFailed,
        };

        let mut diagnostic = Self::new(kind, err.to_string());
        match err {
            RsdiscoveryError::UnknownMatcherBackend { rule_id, .. }
            | RsdiscoveryError::InvalidPattern { rule_id, .. }
            | RsdiscoveryError::EmptyCombinator { rule_id, .. }
            | RsdiscoveryError::TemplateResolution { rule_id, .. } => {
                diagnostic.rule_id = Some(rule_id.clone());
            }
            RsdiscoveryError::EvaluationTimeout { rule_id, path, .. } => {
                diagnostic = diagnostic.for_rule(rule_id).at_path(path);
            }
            RsdiscoveryError::ArtifactRead { path, .. } => {
                diagnostic = diagnostic.at_path(path);
            }
            _ => {}
        }
        diagnostic
    }

    pub fn for_rule(mut self, rule_id: &str) -> Self {
        self.rule_id = Some(rule_id.to_string());
        self
    }

    pub fn at_path(mut self, path: &Path) -> Self {
        self.path = Some(path.to_string_lossy().replace('\\', "/"));
        self
    }
}

/// 单次评估的输出
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub findings: Vec<Finding>,
    pub diagnostics: Vec<Diagnostic>,
}

impl EvaluationReport {
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty() && self.diagnostics.is_empty()
    }

    /// 指定规则的全部命中
    pub fn findings_for<'a>(&'a self, rule_id: &'a str) -> impl Iterator<Item = &'a Finding> {
        self.findings.iter().filter(move |f| f.rule_id == rule_id)
    }

    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }
}

/// 导出 Finding 为紧凑 JSON
pub fn findings_to_json(findings: &[Finding]) -> RsdResult<String> {
    Ok(serde_json::to_string(findings)?)
}

/// 导出 Finding 为格式化 JSON
pub fn findings_to_pretty_json(findings: &[Finding]) -> RsdResult<String> {
    Ok(serde_json::to_string_pretty(findings)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn finding() -> Finding {
        Finding {
            rule_id: "discover-license".to_string(),
            message: None,
            tags: vec!["License=Apache License 2.0".to_string()],
            labels: Vec::new(),
            category: Some(Category::Mandatory),
            effort: None,
            location: Location {
                path: "LICENSE".to_string(),
                line: Some(3),
            },
            variables: BTreeMap::from([("matchingText".to_string(), "Apache License 2.0".to_string())]),
        }
    }

    #[test]
    fn test_finding_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&findings_to_json(&[finding()]).unwrap()).unwrap();
        let first = &json[0];
        assert_eq!(first["ruleID"], "discover-license");
        assert_eq!(first["category"], "mandatory");
        assert_eq!(first["location"]["line"], 3);
        assert_eq!(first["variables"]["matchingText"], "Apache License 2.0");
        assert!(first.get("message").is_none());
        assert!(first.get("labels").is_none());

        let pretty = findings_to_pretty_json(&[finding()]).unwrap();
        let back: Vec<Finding> = serde_json::from_str(&pretty).unwrap();
        assert_eq!(back[0].matching_text(), Some("Apache License 2.0"));
    }

    #[test]
    fn test_diagnostic_from_timeout() {
        let err = RsdiscoveryError::EvaluationTimeout {
            rule_id: "hardcoded-ip-address".to_string(),
            path: PathBuf::from("src/Big.java"),
            timeout: Duration::from_millis(5),
        };
        let diagnostic = Diagnostic::from_error(&err);
        assert_eq!(diagnostic.kind, DiagnosticKind::EvaluationTimeout);
        assert_eq!(diagnostic.rule_id.as_deref(), Some("hardcoded-ip-address"));
        assert_eq!(diagnostic.path.as_deref(), Some("src/Big.java"));
    }

    #[test]
    fn test_diagnostic_from_unreadable_artifact() {
        let err = RsdiscoveryError::ArtifactRead {
            path: PathBuf::from("secret.properties"),
            reason: "permission denied".to_string(),
        };
        let diagnostic = Diagnostic::from_error(&err).for_rule("hardcoded-ip-address");
        assert_eq!(diagnostic.kind, DiagnosticKind::ArtifactRead);
        assert_eq!(diagnostic.kind.to_string(), "artifact-read");
        assert!(diagnostic.message.contains("permission denied"));
    }
}
