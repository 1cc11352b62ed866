//! 规则集组装
//! 显式的 RulesetBuilder 取代进程级全局规则表：调用方构建后按引用传递

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::model::{Rule, RuleCorpus, RulesetHeader};
use crate::error::{RsdResult, RsdiscoveryError};

/// 规则集：名称 + 标签 + 所引用的语料（自身不持有规则状态）
#[derive(Debug, Clone)]
pub struct Ruleset {
    header: RulesetHeader,
    corpora: Vec<Arc<RuleCorpus>>,
}

impl Ruleset {
    pub fn header(&self) -> &RulesetHeader {
        &self.header
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn labels(&self) -> &[String] {
        &self.header.labels
    }

    pub fn corpora(&self) -> &[Arc<RuleCorpus>] {
        &self.corpora
    }

    /// 按 语料顺序 -> 语料内顺序 遍历（来源名, 规则）
    pub fn rules(&self) -> impl Iterator<Item = (&str, &Rule)> {
        self.corpora
            .iter()
            .flat_map(|c| c.rules.iter().map(move |r| (c.origin.as_str(), r)))
    }

    pub fn len(&self) -> usize {
        self.corpora.iter().map(|c| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.rules().map(|(_, r)| r).find(|r| r.rule_id == rule_id)
    }
}

/// 规则集构建器
#[derive(Debug, Clone)]
pub struct RulesetBuilder {
    header: RulesetHeader,
    corpora: Vec<Arc<RuleCorpus>>,
}

impl RulesetBuilder {
    pub fn new(header: RulesetHeader) -> Self {
        Self {
            header,
            corpora: Vec::new(),
        }
    }

    pub fn corpus(mut self, corpus: RuleCorpus) -> Self {
        self.corpora.push(Arc::new(corpus));
        self
    }

    /// 追加共享语料（多个规则集可引用同一语料）
    pub fn shared_corpus(mut self, corpus: Arc<RuleCorpus>) -> Self {
        self.corpora.push(corpus);
        self
    }

    /// 校验 ruleID 全局唯一并生成规则集；任何冲突都使整体失败
    pub fn build(self) -> RsdResult<Ruleset> {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for corpus in &self.corpora {
            for rule in &corpus.rules {
                if let Some(first) = seen.insert(rule.rule_id.as_str(), corpus.origin.as_str()) {
                    return Err(RsdiscoveryError::DuplicateRuleId {
                        rule_id: rule.rule_id.clone(),
                        first: first.to_string(),
                        second: corpus.origin.clone(),
                    });
                }
            }
        }

        debug!(
            "规则集 [{}] 组装完成：语料{}份，规则{}条",
            self.header.name,
            self.corpora.len(),
            seen.len()
        );

        Ok(Ruleset {
            header: self.header,
            corpora: self.corpora,
        })
    }
}

/// 便捷组装：按给定顺序合并多份语料
pub fn assemble<I>(header: RulesetHeader, corpora: I) -> RsdResult<Ruleset>
where
    I: IntoIterator<Item = RuleCorpus>,
{
    corpora
        .into_iter()
        .fold(RulesetBuilder::new(header), RulesetBuilder::corpus)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleLoader;

    fn corpus(origin: &str, ids: &[&str]) -> RuleCorpus {
        let text: String = ids
            .iter()
            .map(|id| format!("- ruleID: {}\n  when:\n    builtin.file:\n      pattern: \"{}.txt\"\n", id, id))
            .collect();
        RuleLoader::parse_corpus(origin, &text).unwrap()
    }

    #[test]
    fn test_assemble_preserves_corpus_then_corpus_order() {
        let c1 = corpus("license", &["a", "b"]);
        let c2 = corpus("java", &["c"]);
        let ruleset = assemble(RulesetHeader::new("discovery-rules"), [c1.clone(), c2.clone()]).unwrap();

        let ids: Vec<_> = ruleset.rules().map(|(_, r)| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let expected: Vec<_> = c1.rules.iter().chain(c2.rules.iter()).cloned().collect();
        let actual: Vec<_> = ruleset.rules().map(|(_, r)| r.clone()).collect();
        assert_eq!(actual, expected);
        assert_eq!(ruleset.len(), 3);
        assert_eq!(ruleset.rules().nth(2).map(|(o, _)| o), Some("java"));
    }

    #[test]
    fn test_duplicate_rule_id_fails_regardless_of_order() {
        let c1 = corpus("license", &["a", "shared"]);
        let c2 = corpus("java", &["shared", "z"]);

        for corpora in [[c1.clone(), c2.clone()], [c2, c1]] {
            match assemble(RulesetHeader::new("r"), corpora) {
                Err(RsdiscoveryError::DuplicateRuleId { rule_id, .. }) => assert_eq!(rule_id, "shared"),
                other => panic!("unexpected result {:?}", other.map(|r| r.len())),
            }
        }
    }

    #[test]
    fn test_duplicate_inside_one_corpus_is_caught_at_assembly() {
        // 单个语料加载时不检查重复
        let c = corpus("java", &["dup", "dup"]);
        assert_eq!(c.len(), 2);
        assert!(matches!(
            RulesetBuilder::new(RulesetHeader::new("r")).corpus(c).build(),
            Err(RsdiscoveryError::DuplicateRuleId { .. })
        ));
    }

    #[test]
    fn test_shared_corpus_and_lookup() {
        let shared = Arc::new(corpus("java", &["x"]));
        let first = RulesetBuilder::new(RulesetHeader::new("one"))
            .shared_corpus(shared.clone())
            .build()
            .unwrap();
        let second = RulesetBuilder::new(RulesetHeader::new("two").with_labels(["discovery"]))
            .shared_corpus(shared.clone())
            .build()
            .unwrap();

        assert!(first.get("x").is_some());
        assert!(second.get("missing").is_none());
        assert_eq!(second.labels(), &["discovery".to_string()]);
        assert_eq!(Arc::strong_count(&shared), 3);
    }
}
