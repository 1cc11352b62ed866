//! 规则数据模型定义
//! 仅存储规则数据，无任何匹配逻辑；加载后只读

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RsdResult, RsdiscoveryError};

/// 规则严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Mandatory,
    Optional,
    Potential,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Mandatory => write!(f, "mandatory"),
            Category::Optional => write!(f, "optional"),
            Category::Potential => write!(f, "potential"),
        }
    }
}

/// 条件树（`when` 子句）
/// 叶子只记录后端名与原始参数，参数校验与编译由 compiler 负责
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Leaf(LeafCondition),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

/// 单个匹配后端调用
#[derive(Debug, Clone, PartialEq)]
pub struct LeafCondition {
    /// 后端键名，如 `builtin.filecontent`
    pub backend: String,
    /// 后端参数（原样保留）
    pub params: serde_yaml::Value,
    /// `not: true` 取反
    pub negated: bool,
}

impl Condition {
    /// 条件树中的叶子数量
    pub fn leaf_count(&self) -> usize {
        match self {
            Condition::Leaf(_) => 1,
            Condition::And(children) | Condition::Or(children) => {
                children.iter().map(Condition::leaf_count).sum()
            }
        }
    }
}

/// 单条发现规则
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub rule_id: String,
    pub description: Option<String>,
    /// 消息模板，可引用 `{{name}}` / `{{matchingText}}` 等变量
    pub message: Option<String>,
    /// 标签（保序，可含模板）
    pub tags: Vec<String>,
    /// `key=value` 形式的标签
    pub labels: Vec<String>,
    pub category: Option<Category>,
    pub effort: Option<u32>,
    pub when: Condition,
}

/// 单一来源的规则语料（加载后不可变）
#[derive(Debug, Clone, PartialEq)]
pub struct RuleCorpus {
    /// 来源名，如 "license"、"java-ee"
    pub origin: String,
    pub rules: Vec<Rule>,
}

impl RuleCorpus {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rule_ids(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.rule_id.as_str())
    }
}

/// 规则集头部：名称 + 标签
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetHeader {
    pub name: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RulesetHeader {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: Vec::new(),
            description: None,
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// 从 YAML 文本解析规则集头部
    pub fn from_yaml(text: &str) -> RsdResult<Self> {
        let header: RulesetHeader = serde_yaml::from_str(text.trim())
            .map_err(|e| RsdiscoveryError::RulesetHeader(e.to_string()))?;
        if header.name.trim().is_empty() {
            return Err(RsdiscoveryError::RulesetHeader(
                "`name` must not be empty".to_string(),
            ));
        }
        Ok(header)
    }

    pub fn to_yaml(&self) -> RsdResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// 拆分 `key=value` 标签；无 `=` 时 value 为 None
pub fn split_label(label: &str) -> (&str, Option<&str>) {
    match label.split_once('=') {
        Some((key, value)) => (key.trim(), Some(value.trim())),
        None => (label.trim(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ruleset_header_from_yaml() {
        let header = RulesetHeader::from_yaml("\nname: discovery-rules\nlabels:\n- discovery\n").unwrap();
        assert_eq!(header.name, "discovery-rules");
        assert_eq!(header.labels, vec!["discovery".to_string()]);
        assert_eq!(header.description, None);
    }

    #[test]
    fn test_ruleset_header_requires_name() {
        assert!(matches!(
            RulesetHeader::from_yaml("labels: [a]"),
            Err(RsdiscoveryError::RulesetHeader(_))
        ));
        assert!(matches!(
            RulesetHeader::from_yaml("name: '  '"),
            Err(RsdiscoveryError::RulesetHeader(_))
        ));
    }

    #[test]
    fn test_split_label() {
        assert_eq!(split_label("konveyor.io/fact=JPA"), ("konveyor.io/fact", Some("JPA")));
        assert_eq!(split_label("discovery"), ("discovery", None));
        assert_eq!(split_label("konveyor.io/fact=Spring Beans"), ("konveyor.io/fact", Some("Spring Beans")));
    }
}
