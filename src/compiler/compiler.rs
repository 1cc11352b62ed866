//! 规则编译器核心
//! 负责将规则的条件树编译为可执行谓词；编译是纯函数，不产生副作用

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use regex::{Regex, RegexBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::pattern::{
    CompiledRule, CompiledRuleset, ContentMatcher, LeafMatcher, NameMatcher, Predicate, SymbolMatcher,
    XmlMatcher,
};
use super::xpath::XPathQuery;
use crate::artifact::LocationKind;
use crate::config::{Capability, CompilePolicy, EngineConfig};
use crate::engine::Diagnostic;
use crate::error::{RsdResult, RsdiscoveryError};
use crate::rule::{Condition, LeafCondition, Rule, Ruleset};
use crate::utils::Template;

// ===================== 各后端参数 =====================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileParams {
    pattern: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct FileContentParams {
    pattern: String,
    #[serde(default)]
    file_pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct XmlParams {
    xpath: String,
    #[serde(default)]
    namespaces: BTreeMap<String, String>,
    #[serde(default)]
    filepaths: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReferencedParams {
    pattern: String,
    location: String,
}

/// 规则编译器
pub struct RuleCompiler;

impl RuleCompiler {
    /// 编译规则集
    /// SkipInvalid 策略下问题规则被跳过并记录诊断；FailFast 策略下首个错误即返回
    pub fn compile(ruleset: &Ruleset, config: &EngineConfig) -> RsdResult<(CompiledRuleset, Vec<Diagnostic>)> {
        let start = Instant::now();
        let mut stats = CompileStats::default();
        let mut diagnostics = Vec::new();
        let mut rules = Vec::with_capacity(ruleset.len());

        for (origin, rule) in ruleset.rules() {
            // 1. 标签选择（规则集标签视为每条规则的标签）
            if let Some(selector) = &config.selector {
                let labels = rule
                    .labels
                    .iter()
                    .chain(ruleset.labels().iter())
                    .map(String::as_str);
                if !selector.matches(labels) {
                    stats.unselected += 1;
                    continue;
                }
            }

            // 2. 编译单条规则
            match Self::compile_rule(origin, rule, config) {
                Ok(compiled) => {
                    compiled.predicate.count_leaves(&mut stats.leaves);
                    rules.push(Arc::new(compiled));
                }
                Err(err) if config.compile_policy == CompilePolicy::FailFast => return Err(err),
                Err(err) => {
                    warn!("规则 [{}] 编译失败，已跳过：{}", rule.rule_id, err);
                    stats.skipped += 1;
                    diagnostics.push(Diagnostic::from_error(&err).for_rule(&rule.rule_id));
                }
            }
        }

        // 3. 输出编译统计
        debug!("✅ 规则集 [{}] 编译完成，总耗时{:?}", ruleset.name(), start.elapsed());
        debug!(
            "📊 编译统计：规则{}条、跳过{}条、未选中{}条；文件名{}、内容{}、XML{}、符号{}",
            rules.len(),
            stats.skipped,
            stats.unselected,
            stats.leaf_count(Capability::FileName),
            stats.leaf_count(Capability::FileContent),
            stats.leaf_count(Capability::XmlStructure),
            stats.leaf_count(Capability::SymbolReference),
        );

        Ok((
            CompiledRuleset {
                name: ruleset.name().to_string(),
                labels: ruleset.labels().to_vec(),
                rules,
            },
            diagnostics,
        ))
    }

    /// 编译单条规则
    pub fn compile_rule(origin: &str, rule: &Rule, config: &EngineConfig) -> RsdResult<CompiledRule> {
        let predicate = Self::compile_condition(&rule.rule_id, &rule.when, config)?;

        let message = rule.message.as_deref().map(Template::parse);
        let tags: Vec<Template> = rule.tags.iter().map(|t| Template::parse(t)).collect();
        let labels: Vec<Template> = rule.labels.iter().map(|l| Template::parse(l)).collect();

        // 模板引用了谓词无法提供的变量时仅告警，评估期按模板策略处理
        let available = predicate.variables();
        for template in message.iter().chain(tags.iter()).chain(labels.iter()) {
            for var in template.variables() {
                if !available.contains(var) {
                    warn!(
                        "规则 [{}] 模板 `{}` 引用的变量 `{}` 无法由匹配条件提供",
                        rule.rule_id,
                        template.raw(),
                        var
                    );
                }
            }
        }

        Ok(CompiledRule {
            rule_id: rule.rule_id.clone(),
            origin: origin.to_string(),
            description: rule.description.clone(),
            message,
            tags,
            labels,
            category: rule.category,
            effort: rule.effort,
            predicate,
        })
    }

    /// 递归编译条件树
    fn compile_condition(rule_id: &str, condition: &Condition, config: &EngineConfig) -> RsdResult<Predicate> {
        match condition {
            Condition::Leaf(leaf) => Self::compile_leaf(rule_id, leaf, config),
            Condition::And(children) => Ok(Predicate::And(Self::compile_children(
                rule_id, children, "and", config,
            )?)),
            Condition::Or(children) => Ok(Predicate::Or(Self::compile_children(
                rule_id, children, "or", config,
            )?)),
        }
    }

    fn compile_children(
        rule_id: &str,
        children: &[Condition],
        combinator: &'static str,
        config: &EngineConfig,
    ) -> RsdResult<Vec<Predicate>> {
        if children.is_empty() {
            return Err(RsdiscoveryError::EmptyCombinator {
                rule_id: rule_id.to_string(),
                combinator,
            });
        }
        children
            .iter()
            .map(|child| Self::compile_condition(rule_id, child, config))
            .collect()
    }

    /// 编译叶子：能力检查 -> 参数解析 -> 模式编译
    fn compile_leaf(rule_id: &str, leaf: &LeafCondition, config: &EngineConfig) -> RsdResult<Predicate> {
        let capability = Capability::from_key(&leaf.backend)
            .filter(|cap| config.supports(*cap))
            .ok_or_else(|| RsdiscoveryError::UnknownMatcherBackend {
                rule_id: rule_id.to_string(),
                backend: leaf.backend.clone(),
            })?;

        let matcher = match capability {
            Capability::FileName => {
                let params: FileParams = Self::params(rule_id, leaf)?;
                LeafMatcher::FileName(Self::compile_name_pattern(rule_id, &params.pattern)?)
            }
            Capability::FileContent => {
                let params: FileContentParams = Self::params(rule_id, leaf)?;
                let regex = RegexBuilder::new(&params.pattern)
                    .multi_line(true)
                    .build()
                    .map_err(|e| Self::invalid(rule_id, &params.pattern, e))?;
                let file_filter = params
                    .file_pattern
                    .as_deref()
                    .map(|p| Self::compile_anchored(rule_id, p))
                    .transpose()?;
                LeafMatcher::FileContent(ContentMatcher {
                    regex,
                    file_filter,
                    mode: config.content_match,
                })
            }
            Capability::XmlStructure => {
                let params: XmlParams = Self::params(rule_id, leaf)?;
                let query = XPathQuery::compile(&params.xpath).map_err(|e| Self::invalid(rule_id, &params.xpath, e))?;
                let filepaths = params
                    .filepaths
                    .iter()
                    .map(|p| glob::Pattern::new(p).map_err(|e| Self::invalid(rule_id, p, e)))
                    .collect::<RsdResult<Vec<_>>>()?;
                LeafMatcher::Xml(XmlMatcher {
                    query,
                    namespaces: params.namespaces,
                    filepaths,
                })
            }
            Capability::SymbolReference => {
                let params: ReferencedParams = Self::params(rule_id, leaf)?;
                let location = LocationKind::from_str(&params.location)
                    .map_err(|e| Self::invalid(rule_id, &params.location, e))?;
                LeafMatcher::Symbol(SymbolMatcher {
                    location,
                    regex: Self::compile_anchored(rule_id, &params.pattern)?,
                    mode: config.symbol_match,
                })
            }
        };

        Ok(Predicate::Leaf {
            matcher,
            negated: leaf.negated,
        })
    }

    /// 文件名模式：`^` 开头或 `$` 结尾视为正则，否则为 glob
    fn compile_name_pattern(rule_id: &str, pattern: &str) -> RsdResult<NameMatcher> {
        if pattern.starts_with('^') || pattern.ends_with('$') {
            Regex::new(pattern)
                .map(NameMatcher::Regex)
                .map_err(|e| Self::invalid(rule_id, pattern, e))
        } else {
            glob::Pattern::new(pattern)
                .map(NameMatcher::Glob)
                .map_err(|e| Self::invalid(rule_id, pattern, e))
        }
    }

    /// 完整匹配正则
    fn compile_anchored(rule_id: &str, pattern: &str) -> RsdResult<Regex> {
        Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| Self::invalid(rule_id, pattern, e))
    }

    /// 按后端参数结构解析叶子参数
    fn params<T: DeserializeOwned>(rule_id: &str, leaf: &LeafCondition) -> RsdResult<T> {
        serde_yaml::from_value(leaf.params.clone()).map_err(|e| Self::invalid(rule_id, &leaf.backend, e))
    }

    fn invalid(rule_id: &str, pattern: &str, reason: impl ToString) -> RsdiscoveryError {
        RsdiscoveryError::InvalidPattern {
            rule_id: rule_id.to_string(),
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// 编译统计信息
#[derive(Debug, Clone, Default)]
struct CompileStats {
    leaves: BTreeMap<Capability, usize>,
    skipped: usize,
    unselected: usize,
}

impl CompileStats {
    fn leaf_count(&self, capability: Capability) -> usize {
        self.leaves.get(&capability).copied().unwrap_or(0)
    }
}
