//! 规则加载管理器
//! 负责将规则语料文本解析为规则对象，并校验必填字段

use std::path::Path;

use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;

use super::model::{Category, Condition, LeafCondition, Rule, RuleCorpus};
use crate::error::{RsdResult, RsdiscoveryError};

/// 单个字符串或字符串列表
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// 规则文档的原始结构（`when` 单独解析）
#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(rename = "ruleID")]
    rule_id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    tag: Option<OneOrMany>,
    #[serde(default)]
    labels: Option<OneOrMany>,
    #[serde(default)]
    category: Option<Category>,
    #[serde(default)]
    effort: Option<u32>,
    #[serde(default)]
    when: Option<Value>,
}

/// 规则加载管理器
pub struct RuleLoader;

impl RuleLoader {
    /// 解析规则语料文本
    /// 前后空白会先被裁剪；空语料得到空规则列表
    pub fn parse_corpus(origin: &str, text: &str) -> RsdResult<RuleCorpus> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(RuleCorpus {
                origin: origin.to_string(),
                rules: Vec::new(),
            });
        }

        let document: Value = serde_yaml::from_str(trimmed).map_err(|e| {
            RsdiscoveryError::MalformedRule {
                index: 0,
                rule_id: None,
                reason: format!("corpus `{}` is not valid YAML: {}", origin, e),
            }
        })?;

        let items = match document {
            Value::Sequence(items) => items,
            Value::Null => Vec::new(),
            _ => {
                return Err(RsdiscoveryError::MalformedRule {
                    index: 0,
                    rule_id: None,
                    reason: format!("corpus `{}` must be a list of rules", origin),
                })
            }
        };

        let mut rules = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            rules.push(Self::parse_rule(index, item)?);
        }

        debug!("规则语料 [{}] 解析完成，规则数：{}", origin, rules.len());

        Ok(RuleCorpus {
            origin: origin.to_string(),
            rules,
        })
    }

    /// 从磁盘加载规则语料，来源名取文件名（不含扩展名）
    pub async fn load_file(path: impl AsRef<Path>) -> RsdResult<RuleCorpus> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await?;
        let origin = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::parse_corpus(&origin, &text)
    }

    /// 解析单条规则
    fn parse_rule(index: usize, item: Value) -> RsdResult<Rule> {
        let Value::Mapping(ref mapping) = item else {
            return Err(RsdiscoveryError::MalformedRule {
                index,
                rule_id: None,
                reason: "rule must be a mapping".to_string(),
            });
        };

        // 先取出 ruleID，后续错误都带上它
        let rule_id = mapping
            .get("ruleID")
            .and_then(Value::as_str)
            .map(str::to_string);

        let malformed = |reason: String| RsdiscoveryError::MalformedRule {
            index,
            rule_id: rule_id.clone(),
            reason,
        };

        let raw: RawRule = serde_yaml::from_value(item.clone()).map_err(|e| malformed(e.to_string()))?;

        if raw.rule_id.trim().is_empty() {
            return Err(malformed("`ruleID` must not be empty".to_string()));
        }

        let when = match raw.when {
            Some(Value::Null) | None => {
                return Err(malformed("missing required field `when`".to_string()));
            }
            Some(value) => Self::parse_condition(&value, "when").map_err(malformed)?,
        };

        Ok(Rule {
            rule_id: raw.rule_id,
            description: raw.description,
            message: raw.message,
            tags: raw.tag.map(OneOrMany::into_vec).unwrap_or_default(),
            labels: raw.labels.map(OneOrMany::into_vec).unwrap_or_default(),
            category: raw.category,
            effort: raw.effort,
            when,
        })
    }

    /// 递归解析条件树，错误信息携带路径（如 `when.or[2]`）
    fn parse_condition(value: &Value, path: &str) -> Result<Condition, String> {
        let Value::Mapping(mapping) = value else {
            return Err(format!("`{}` must be a mapping", path));
        };

        let negated = match mapping.get("not") {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(format!("`{}.not` must be a boolean", path)),
        };

        let mut keys = mapping
            .iter()
            .filter(|(k, _)| k.as_str() != Some("not"));
        let (key, body) = match (keys.next(), keys.next()) {
            (Some(entry), None) => entry,
            (None, _) => return Err(format!("`{}` has no matcher", path)),
            (Some(_), Some(_)) => {
                return Err(format!("`{}` must contain exactly one matcher or combinator", path))
            }
        };

        let Some(key) = key.as_str() else {
            return Err(format!("`{}` has a non-string key", path));
        };

        match key {
            "and" | "or" => {
                if negated {
                    return Err(format!("`{}`: `not` is only supported on leaf conditions", path));
                }
                let Value::Sequence(items) = body else {
                    return Err(format!("`{}.{}` must be a list", path, key));
                };
                let children = items
                    .iter()
                    .enumerate()
                    .map(|(i, child)| Self::parse_condition(child, &format!("{}.{}[{}]", path, key, i)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if key == "and" {
                    Condition::And(children)
                } else {
                    Condition::Or(children)
                })
            }
            backend => {
                if !matches!(body, Value::Mapping(_)) {
                    return Err(format!("`{}.{}` parameters must be a mapping", path, backend));
                }
                Ok(Condition::Leaf(LeafCondition {
                    backend: backend.to_string(),
                    params: body.clone(),
                    negated,
                }))
            }
        }
    }
}

/// 拼接多份语料：各自裁剪首尾换行后以单个换行连接
pub fn concat_corpora<S: AsRef<str>>(corpora: &[S]) -> String {
    corpora
        .iter()
        .map(|c| c.as_ref().trim_matches('\n'))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS_A: &str = r#"
- ruleID: discover-properties-file
  description: "Properties file"
  when:
    builtin.file:
      pattern: "^.*\\.properties$"
  tag: ["Properties"]
- ruleID: ejb-stateless-000
  labels:
  - "konveyor.io/fact=EJB"
  message: "Stateless session bean {{name}}"
  category: mandatory
  effort: 3
  when:
    or:
    - java.referenced:
        location: IMPLEMENTS_TYPE
        pattern: "(javax|jakarta).ejb.SessionBean"
    - java.referenced:
        location: ANNOTATION
        pattern: "(javax|jakarta).ejb.Stateless"
"#;

    const CORPUS_B: &str = r#"

- ruleID: discover-license
  tag:
  - License={{matchingText}}
  when:
    builtin.filecontent:
      pattern: "Apache License 2.0"

"#;

    #[test]
    fn test_parse_corpus_fields() {
        let corpus = RuleLoader::parse_corpus("java", CORPUS_A).unwrap();
        assert_eq!(corpus.origin, "java");
        assert_eq!(corpus.len(), 2);

        let props = &corpus.rules[0];
        assert_eq!(props.rule_id, "discover-properties-file");
        assert_eq!(props.tags, vec!["Properties".to_string()]);
        assert!(matches!(&props.when, Condition::Leaf(leaf) if leaf.backend == "builtin.file"));

        let ejb = &corpus.rules[1];
        assert_eq!(ejb.category, Some(Category::Mandatory));
        assert_eq!(ejb.effort, Some(3));
        assert_eq!(ejb.labels, vec!["konveyor.io/fact=EJB".to_string()]);
        assert_eq!(ejb.message.as_deref(), Some("Stateless session bean {{name}}"));
        match &ejb.when {
            Condition::Or(children) => assert_eq!(children.len(), 2),
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn test_blank_lines_are_not_a_parse_error() {
        let corpus = RuleLoader::parse_corpus("license", CORPUS_B).unwrap();
        assert_eq!(corpus.rule_ids().collect::<Vec<_>>(), vec!["discover-license"]);

        let empty = RuleLoader::parse_corpus("empty", "\n\n   \n").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_concatenation_commutes_with_parsing() {
        // 测试场景：拼接后解析 == 分别解析后追加
        let joined = concat_corpora(&[CORPUS_A, CORPUS_B]);
        let merged = RuleLoader::parse_corpus("all", &joined).unwrap();

        let mut separate = RuleLoader::parse_corpus("a", CORPUS_A).unwrap().rules;
        separate.extend(RuleLoader::parse_corpus("b", CORPUS_B).unwrap().rules);

        assert_eq!(merged.rules, separate);
    }

    #[test]
    fn test_missing_when_names_rule() {
        let text = "- ruleID: ok\n  when:\n    builtin.file:\n      pattern: a\n- ruleID: no-when\n  message: x\n";
        match RuleLoader::parse_corpus("c", text) {
            Err(RsdiscoveryError::MalformedRule { index, rule_id, reason }) => {
                assert_eq!(index, 1);
                assert_eq!(rule_id.as_deref(), Some("no-when"));
                assert!(reason.contains("when"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_missing_rule_id_is_malformed() {
        let text = "- description: nameless\n  when:\n    builtin.file:\n      pattern: a\n";
        assert!(matches!(
            RuleLoader::parse_corpus("c", text),
            Err(RsdiscoveryError::MalformedRule { index: 0, rule_id: None, .. })
        ));
    }

    #[test]
    fn test_invalid_field_type_is_malformed() {
        let text = "- ruleID: bad-effort\n  effort: lots\n  when:\n    builtin.file:\n      pattern: a\n";
        assert!(matches!(
            RuleLoader::parse_corpus("c", text),
            Err(RsdiscoveryError::MalformedRule { rule_id: Some(id), .. }) if id == "bad-effort"
        ));
    }

    #[test]
    fn test_condition_with_two_matchers_is_rejected() {
        let text = r#"
- ruleID: two
  when:
    builtin.file:
      pattern: a
    builtin.xml:
      xpath: /a
"#;
        let err = RuleLoader::parse_corpus("c", text).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn test_negated_leaf_and_unknown_backend_load() {
        // 未知后端在加载期不报错，由编译期处理
        let text = r#"
- ruleID: neg
  when:
    and:
    - builtin.file:
        pattern: "pom.xml"
    - go.referenced:
        pattern: "fmt"
      not: true
"#;
        let corpus = RuleLoader::parse_corpus("c", text).unwrap();
        let Condition::And(children) = &corpus.rules[0].when else {
            panic!("expected and");
        };
        match &children[1] {
            Condition::Leaf(leaf) => {
                assert_eq!(leaf.backend, "go.referenced");
                assert!(leaf.negated);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(corpus.rules[0].when.leaf_count(), 2);
    }

    #[test]
    fn test_not_document_list() {
        assert!(matches!(
            RuleLoader::parse_corpus("c", "ruleID: x"),
            Err(RsdiscoveryError::MalformedRule { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_file_uses_file_stem_as_origin() {
        let dir = std::env::temp_dir().join(format!("rsdiscovery-loader-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("java-ee.yaml");
        tokio::fs::write(&path, CORPUS_A).await.unwrap();

        let corpus = RuleLoader::load_file(&path).await.unwrap();
        assert_eq!(corpus.origin, "java-ee");
        assert_eq!(corpus.len(), 2);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
