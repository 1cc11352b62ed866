//! 编译后模式模型
//! 条件树编译后的可执行谓词，编译完成后只读，可跨制品、跨运行复用

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use regex::Regex;

use super::xpath::XPathQuery;
use crate::artifact::LocationKind;
use crate::config::{Capability, MatchMode};
use crate::rule::Category;
use crate::utils::template::{Template, VAR_FILE, VAR_LINE_NUMBER, VAR_MATCHING_TEXT, VAR_NAME};

/// glob 匹配选项：大小写敏感，`*` 不跨越 `/`
pub const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// glob 匹配：模式含 `/` 时比对完整路径，否则比对文件名
pub fn glob_matches(pattern: &Pattern, file_name: &str, path: &str) -> bool {
    if pattern.as_str().contains('/') {
        pattern.matches_with(path, GLOB_OPTIONS)
    } else {
        pattern.matches_with(file_name, GLOB_OPTIONS)
    }
}

/// 文件名匹配器
#[derive(Debug, Clone)]
pub enum NameMatcher {
    Glob(Pattern),
    Regex(Regex),
}

impl NameMatcher {
    pub fn is_match(&self, file_name: &str, path: &str) -> bool {
        match self {
            NameMatcher::Glob(pattern) => glob_matches(pattern, file_name, path),
            NameMatcher::Regex(regex) => regex.is_match(file_name),
        }
    }

    /// 规则描述
    pub fn describe(&self) -> &str {
        match self {
            NameMatcher::Glob(pattern) => pattern.as_str(),
            NameMatcher::Regex(regex) => regex.as_str(),
        }
    }
}

/// 文件内容匹配器
#[derive(Debug, Clone)]
pub struct ContentMatcher {
    pub regex: Regex,
    /// 完整匹配文件名或路径的过滤正则；不通过的制品不读取内容
    pub file_filter: Option<Regex>,
    pub mode: MatchMode,
}

impl ContentMatcher {
    pub fn accepts(&self, file_name: &str, path: &str) -> bool {
        self.file_filter
            .as_ref()
            .map_or(true, |filter| filter.is_match(file_name) || filter.is_match(path))
    }
}

/// XML 结构匹配器
#[derive(Debug, Clone)]
pub struct XmlMatcher {
    pub query: XPathQuery,
    /// 前缀 -> 命名空间 URI
    pub namespaces: BTreeMap<String, String>,
    /// 候选文件 glob；为空时取全部 `*.xml`
    pub filepaths: Vec<Pattern>,
}

impl XmlMatcher {
    pub fn accepts(&self, file_name: &str, path: &str) -> bool {
        if self.filepaths.is_empty() {
            file_name.to_ascii_lowercase().ends_with(".xml")
        } else {
            self.filepaths.iter().any(|p| glob_matches(p, file_name, path))
        }
    }
}

/// 符号引用匹配器
#[derive(Debug, Clone)]
pub struct SymbolMatcher {
    pub location: LocationKind,
    /// 已加 `^(?:...)$` 锚定
    pub regex: Regex,
    pub mode: MatchMode,
}

/// 叶子匹配器（封闭集合，与能力一一对应）
#[derive(Debug, Clone)]
pub enum LeafMatcher {
    FileName(NameMatcher),
    FileContent(ContentMatcher),
    Xml(XmlMatcher),
    Symbol(SymbolMatcher),
}

impl LeafMatcher {
    pub fn capability(&self) -> Capability {
        match self {
            LeafMatcher::FileName(_) => Capability::FileName,
            LeafMatcher::FileContent(_) => Capability::FileContent,
            LeafMatcher::Xml(_) => Capability::XmlStructure,
            LeafMatcher::Symbol(_) => Capability::SymbolReference,
        }
    }

    /// 命中时可提供的模板变量
    pub fn variables(&self) -> BTreeSet<String> {
        let (builtin, regex): (&[&str], Option<&Regex>) = match self {
            LeafMatcher::FileName(_) => (&[VAR_MATCHING_TEXT, VAR_FILE][..], None),
            LeafMatcher::FileContent(m) => (&[VAR_MATCHING_TEXT, VAR_FILE, VAR_LINE_NUMBER][..], Some(&m.regex)),
            LeafMatcher::Xml(_) => (&[VAR_MATCHING_TEXT, VAR_FILE, VAR_LINE_NUMBER][..], None),
            LeafMatcher::Symbol(m) => (
                &[VAR_NAME, VAR_MATCHING_TEXT, VAR_FILE, VAR_LINE_NUMBER][..],
                Some(&m.regex),
            ),
        };

        let mut vars: BTreeSet<String> = builtin.iter().map(|v| v.to_string()).collect();
        if let Some(regex) = regex {
            vars.extend(regex.capture_names().flatten().map(str::to_string));
        }
        vars
    }
}

/// 可执行谓词
#[derive(Debug, Clone)]
pub enum Predicate {
    Leaf { matcher: LeafMatcher, negated: bool },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// 谓词树可能提供的全部模板变量
    pub fn variables(&self) -> BTreeSet<String> {
        match self {
            // 取反叶子只产出文件级事件
            Predicate::Leaf { negated: true, .. } => BTreeSet::from([VAR_FILE.to_string()]),
            Predicate::Leaf { matcher, .. } => matcher.variables(),
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().flat_map(Predicate::variables).collect()
            }
        }
    }

    /// 按能力统计叶子数
    pub fn count_leaves(&self, counts: &mut BTreeMap<Capability, usize>) {
        match self {
            Predicate::Leaf { matcher, .. } => *counts.entry(matcher.capability()).or_default() += 1,
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().for_each(|c| c.count_leaves(counts))
            }
        }
    }
}

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule_id: String,
    /// 来源语料名
    pub origin: String,
    pub description: Option<String>,
    pub message: Option<Template>,
    pub tags: Vec<Template>,
    pub labels: Vec<Template>,
    pub category: Option<Category>,
    pub effort: Option<u32>,
    pub predicate: Predicate,
}

/// 编译后的规则集
#[derive(Debug, Clone, Default)]
pub struct CompiledRuleset {
    pub name: String,
    pub labels: Vec<String>,
    /// 语料顺序 -> 语料内顺序
    pub rules: Vec<Arc<CompiledRule>>,
}

impl CompiledRuleset {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, rule_id: &str) -> Option<&CompiledRule> {
        self.rules.iter().map(Arc::as_ref).find(|r| r.rule_id == rule_id)
    }

    pub fn rule_ids(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.rule_id.as_str())
    }
}
