//! 内置发现规则语料（编译期 embed）

use super::assembler::RulesetBuilder;
use super::loader::{concat_corpora, RuleLoader};
use super::model::{RuleCorpus, RulesetHeader};
use crate::error::RsdResult;

pub const LICENSE_RULES: &str = include_str!("../../rules/license.yaml");
pub const JAVA_RULES: &str = include_str!("../../rules/java.yaml");
pub const JAVA_EE_RULES: &str = include_str!("../../rules/java-ee.yaml");
const RULESET_HEADER: &str = include_str!("../../rules/ruleset.yaml");

/// 内置语料（来源名, 文本），顺序固定
pub const DISCOVERY_CORPORA: [(&str, &str); 3] = [
    ("license", LICENSE_RULES),
    ("java", JAVA_RULES),
    ("java-ee", JAVA_EE_RULES),
];

/// 全部内置语料拼接后的规则文本
pub fn discovery_rules() -> String {
    let texts: Vec<&str> = DISCOVERY_CORPORA.iter().map(|(_, text)| *text).collect();
    concat_corpora(&texts)
}

/// 内置规则集头部文本
pub fn discovery_ruleset() -> &'static str {
    RULESET_HEADER
}

/// 逐份解析内置语料
pub fn discovery_corpora() -> RsdResult<Vec<RuleCorpus>> {
    DISCOVERY_CORPORA
        .iter()
        .map(|(origin, text)| RuleLoader::parse_corpus(origin, text))
        .collect()
}

/// 预装内置语料的规则集构建器，调用方可继续追加自定义语料
pub fn discovery_ruleset_builder() -> RsdResult<RulesetBuilder> {
    let header = RulesetHeader::from_yaml(RULESET_HEADER)?;
    Ok(discovery_corpora()?
        .into_iter()
        .fold(RulesetBuilder::new(header), RulesetBuilder::corpus))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_rules_parse_as_one_corpus() {
        let merged = RuleLoader::parse_corpus("discovery", &discovery_rules()).unwrap();
        let separate: Vec<_> = discovery_corpora()
            .unwrap()
            .into_iter()
            .flat_map(|c| c.rules)
            .collect();
        assert_eq!(merged.rules, separate);
        assert_eq!(merged.len(), 19);
    }

    #[test]
    fn test_discovery_ruleset_header() {
        let header = RulesetHeader::from_yaml(discovery_ruleset()).unwrap();
        assert_eq!(header.name, "discovery-rules");
        assert_eq!(header.labels, vec!["discovery".to_string()]);
    }

    #[test]
    fn test_discovery_builder_has_unique_ids() {
        let ruleset = discovery_ruleset_builder().unwrap().build().unwrap();
        assert_eq!(ruleset.name(), "discovery-rules");
        assert!(ruleset.get("hardcoded-ip-address").is_some());
        assert!(ruleset.get("jpa-query-000").is_some());
    }
}
