//! 匹配分析器：各后端对单个制品的求值，以及谓词树的组合求值
use std::borrow::Cow;
use std::cell::Cell;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use once_cell::unsync::OnceCell;
use regex::{Captures, Regex};
use roxmltree::{Document, ParsingOptions};
use tracing::debug;

use super::finding::{Diagnostic, DiagnosticKind, Finding, Incident, Location};
use crate::artifact::Artifact;
use crate::compiler::{CompiledRule, ContentMatcher, LeafMatcher, NameMatcher, Predicate, SymbolMatcher, XmlMatcher};
use crate::config::{EngineConfig, MatchMode, TemplatePolicy};
use crate::error::RsdResult;
use crate::utils::template::{VAR_FILE, VAR_LINE_NUMBER, VAR_MATCHING_TEXT, VAR_NAME};
use crate::utils::{LineCounter, Template};

/// 制品的评估视图：路径与文件名预先计算，文本与 XML 文档按需解析一次，
/// 同一制品上的全部规则共享
pub struct ArtifactView<'a> {
    artifact: &'a Artifact,
    path: Cow<'a, str>,
    file_name: Cow<'a, str>,
    text: OnceCell<&'a str>,
    // None 表示文档格式错误
    document: OnceCell<Option<Document<'a>>>,
    // 到期后多匹配扫描提前结束，由调用方按超时处理
    deadline: Cell<Option<Instant>>,
}

impl<'a> ArtifactView<'a> {
    pub fn new(artifact: &'a Artifact) -> Self {
        Self {
            artifact,
            path: artifact.path_str(),
            file_name: artifact.file_name(),
            text: OnceCell::new(),
            document: OnceCell::new(),
            deadline: Cell::new(None),
        }
    }

    pub fn artifact(&self) -> &'a Artifact {
        self.artifact
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn text(&self) -> RsdResult<&'a str> {
        if let Some(text) = self.text.get() {
            return Ok(*text);
        }
        let text = self.artifact.text()?;
        Ok(*self.text.get_or_init(|| text))
    }

    /// 解析后的 XML 文档；格式错误时为 `None`
    pub fn document(&self) -> RsdResult<Option<&Document<'a>>> {
        if let Some(document) = self.document.get() {
            return Ok(document.as_ref());
        }
        let text = self.text()?;
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let parsed = match Document::parse_with_options(text, options) {
            Ok(doc) => Some(doc),
            Err(e) => {
                debug!("XML解析失败，跳过：文件={}，原因={}", self.path(), e);
                None
            }
        };
        Ok(self.document.get_or_init(|| parsed).as_ref())
    }

    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.deadline.set(deadline);
    }

    pub fn expired(&self) -> bool {
        self.deadline.get().is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// 仅携带 `file` 变量的文件级事件
    fn file_incident(&self) -> Incident {
        Incident::default().with_var(VAR_FILE, self.path())
    }
}

/// 把正则命名分组写入事件变量
fn capture_groups(regex: &Regex, caps: &Captures, mut incident: Incident) -> Incident {
    for name in regex.capture_names().flatten() {
        if let Some(group) = caps.name(name) {
            incident = incident.with_var(name, group.as_str());
        }
    }
    incident
}

/// 文件名分析器
pub struct FileNameAnalyzer;

impl FileNameAnalyzer {
    pub fn analyze(matcher: &NameMatcher, view: &ArtifactView) -> Vec<Incident> {
        if !matcher.is_match(view.file_name(), view.path()) {
            return Vec::new();
        }
        debug!("文件名匹配成功：文件={}，规则={}", view.path(), matcher.describe());
        vec![view
            .file_incident()
            .with_var(VAR_MATCHING_TEXT, view.file_name())]
    }
}

/// 文件内容分析器
pub struct ContentAnalyzer;

impl ContentAnalyzer {
    pub fn analyze(matcher: &ContentMatcher, view: &ArtifactView) -> RsdResult<Vec<Incident>> {
        // 文件过滤不通过时不读取内容
        if !matcher.accepts(view.file_name(), view.path()) {
            return Ok(Vec::new());
        }

        let text = view.text()?;
        let mut lines = LineCounter::new(text);
        let mut incidents = Vec::new();

        for caps in matcher.regex.captures_iter(text) {
            if view.expired() {
                debug!("内容扫描超时，提前结束：文件={}，已命中{}处", view.path(), incidents.len());
                break;
            }
            let Some(whole) = caps.get(0) else {
                continue;
            };
            // 跳过零长度匹配
            if whole.as_str().is_empty() {
                continue;
            }
            let line = lines.line_at(whole.start());
            let incident = view
                .file_incident()
                .with_var(VAR_MATCHING_TEXT, whole.as_str())
                .with_var(VAR_LINE_NUMBER, line.to_string());
            let mut incident = capture_groups(&matcher.regex, &caps, incident);
            incident.line = Some(line);
            incidents.push(incident);

            if matcher.mode == MatchMode::First {
                break;
            }
        }

        if !incidents.is_empty() {
            debug!(
                "内容匹配成功：文件={}，命中{}处，规则={}",
                view.path(),
                incidents.len(),
                matcher.regex.as_str()
            );
        }
        Ok(incidents)
    }
}

/// XML 结构分析器
pub struct XmlAnalyzer;

impl XmlAnalyzer {
    pub fn analyze(matcher: &XmlMatcher, view: &ArtifactView) -> RsdResult<Vec<Incident>> {
        if !matcher.accepts(view.file_name(), view.path()) {
            return Ok(Vec::new());
        }

        // 格式错误的文档视为不匹配
        let Some(doc) = view.document()? else {
            return Ok(Vec::new());
        };

        let nodes = matcher.query.select(doc, &matcher.namespaces);
        let Some(node) = nodes.first() else {
            return Ok(Vec::new());
        };

        let line = doc.text_pos_at(node.range().start).row;
        debug!("XML匹配成功：文件={}，查询={}", view.path(), matcher.query.as_str());
        let mut incident = view
            .file_incident()
            .with_var(VAR_MATCHING_TEXT, node.tag_name().name())
            .with_var(VAR_LINE_NUMBER, line.to_string());
        incident.line = Some(line);
        Ok(vec![incident])
    }
}

/// 符号引用分析器
pub struct SymbolAnalyzer;

impl SymbolAnalyzer {
    pub fn analyze(matcher: &SymbolMatcher, view: &ArtifactView) -> Vec<Incident> {
        let Some(symbols) = view.artifact().symbols() else {
            return Vec::new();
        };

        let mut incidents = Vec::new();
        for symbol in symbols.at(matcher.location) {
            if view.expired() {
                break;
            }
            let Some(caps) = matcher.regex.captures(&symbol.reference) else {
                continue;
            };
            let mut incident = view
                .file_incident()
                .with_var(VAR_NAME, symbol.name.as_str())
                .with_var(VAR_MATCHING_TEXT, symbol.reference.as_str());
            if let Some(line) = symbol.line {
                incident = incident.with_var(VAR_LINE_NUMBER, line.to_string());
            }
            let mut incident = capture_groups(&matcher.regex, &caps, incident);
            incident.line = symbol.line;
            incidents.push(incident);

            if matcher.mode == MatchMode::First {
                break;
            }
        }
        incidents
    }
}

/// 谓词求值：返回命中事件，空表示不匹配
/// - `or`：从左到右，返回首个非空子结果；子句出错时继续求值，无子句命中才返回首个错误
/// - `and`：全部子结果非空才匹配，事件按子句顺序拼接；任一子句确定不匹配时忽略其他子句的错误
/// - 取反叶子：内部无命中时产出一个文件级事件
pub fn evaluate_predicate(predicate: &Predicate, view: &ArtifactView) -> RsdResult<Vec<Incident>> {
    match predicate {
        Predicate::Leaf { matcher, negated } => {
            let incidents = match matcher {
                LeafMatcher::FileName(m) => FileNameAnalyzer::analyze(m, view),
                LeafMatcher::FileContent(m) => ContentAnalyzer::analyze(m, view)?,
                LeafMatcher::Xml(m) => XmlAnalyzer::analyze(m, view)?,
                LeafMatcher::Symbol(m) => SymbolAnalyzer::analyze(m, view),
            };
            if !*negated {
                Ok(incidents)
            } else if incidents.is_empty() {
                Ok(vec![view.file_incident()])
            } else {
                Ok(Vec::new())
            }
        }
        Predicate::Or(children) => {
            let mut first_err = None;
            for child in children {
                match evaluate_predicate(child, view) {
                    Ok(incidents) if !incidents.is_empty() => return Ok(incidents),
                    Ok(_) => {}
                    Err(err) => {
                        first_err.get_or_insert(err);
                    }
                }
            }
            first_err.map_or(Ok(Vec::new()), Err)
        }
        Predicate::And(children) => {
            let mut all = Vec::new();
            let mut first_err = None;
            for child in children {
                match evaluate_predicate(child, view) {
                    Ok(incidents) if incidents.is_empty() => return Ok(Vec::new()),
                    Ok(incidents) => all.extend(incidents),
                    Err(err) => {
                        first_err.get_or_insert(err);
                    }
                }
            }
            first_err.map_or(Ok(all), Err)
        }
    }
}

/// 单个（规则, 制品）对的评估结果
#[derive(Debug, Clone, Default)]
pub struct RuleOutcome {
    pub findings: Vec<Finding>,
    pub diagnostics: Vec<Diagnostic>,
}

/// 评估单条规则：谓词求值 -> 模板解析 -> 生成 Finding（同一对内相同的 Finding 合并）
pub fn evaluate_rule(rule: &CompiledRule, view: &ArtifactView, config: &EngineConfig) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();

    let incidents = match evaluate_predicate(&rule.predicate, view) {
        Ok(incidents) => incidents,
        Err(err) => {
            debug!("规则 [{}] 评估失败：文件={}，原因={}", rule.rule_id, view.path(), err);
            outcome
                .diagnostics
                .push(Diagnostic::from_error(&err).for_rule(&rule.rule_id));
            return outcome;
        }
    };

    // 同一对内 (行号, 变量) 相同的事件生成的 Finding 完全相同
    let mut seen: HashSet<(Option<u32>, BTreeMap<String, String>)> = HashSet::new();

    for incident in incidents {
        if !seen.insert((incident.line, incident.variables.clone())) {
            continue;
        }
        // (变量, 模板原文)
        let mut missing: Vec<(String, String)> = Vec::new();
        let mut resolve = |template: &Template| -> String {
            let resolved = template.resolve(&incident.variables, config.template_policy);
            for var in resolved.missing {
                missing.push((var, template.raw().to_string()));
            }
            resolved.text
        };

        let message = rule.message.as_ref().map(&mut resolve);
        let tags: Vec<String> = rule.tags.iter().map(&mut resolve).collect();
        let labels: Vec<String> = rule.labels.iter().map(&mut resolve).collect();

        if config.template_policy != TemplatePolicy::Empty {
            for (variable, template) in &missing {
                let diagnostic = Diagnostic::new(
                    DiagnosticKind::TemplateResolution,
                    format!(
                        "Rule `{}` cannot resolve `{{{{{}}}}}` in template `{}`",
                        rule.rule_id, variable, template
                    ),
                )
                .for_rule(&rule.rule_id)
                .at_path(view.artifact().path());
                if !outcome.diagnostics.contains(&diagnostic) {
                    outcome.diagnostics.push(diagnostic);
                }
            }
            if config.template_policy == TemplatePolicy::Strict && !missing.is_empty() {
                continue;
            }
        }

        let finding = Finding {
            rule_id: rule.rule_id.clone(),
            message,
            tags,
            labels,
            category: rule.category,
            effort: rule.effort,
            location: Location {
                path: view.path().to_string(),
                line: incident.line,
            },
            variables: incident.variables,
        };
        outcome.findings.push(finding);
    }

    outcome
}

/// 评估全部规则（顺序执行，无超时）
pub fn evaluate_all<'r, I>(rules: I, view: &ArtifactView, config: &EngineConfig) -> RuleOutcome
where
    I: IntoIterator<Item = &'r CompiledRule>,
{
    let mut total = RuleOutcome::default();
    for rule in rules {
        let outcome = evaluate_rule(rule, view, config);
        total.findings.extend(outcome.findings);
        total.diagnostics.extend(outcome.diagnostics);
    }
    total
}
