//! 规则引擎核心：持有编译后的规则集，对外部遍历器提供的制品逐一评估
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::analyzer::{evaluate_all, evaluate_rule, ArtifactView};
use super::collector::FindingCollector;
use super::finding::{Diagnostic, DiagnosticKind, EvaluationReport};
use crate::artifact::Artifact;
use crate::compiler::{CompiledRuleset, RuleCompiler};
use crate::config::EngineConfig;
use crate::error::{RsdResult, RsdiscoveryError};
use crate::rule::Ruleset;

/// 规则引擎
/// 编译结果只读共享，可跨多次运行复用
#[derive(Debug, Clone)]
pub struct RuleEngine {
    compiled: Arc<CompiledRuleset>,
    config: Arc<EngineConfig>,
    compile_diagnostics: Vec<Diagnostic>,
}

impl RuleEngine {
    /// 编译规则集并创建引擎
    pub fn new(ruleset: &Ruleset, config: EngineConfig) -> RsdResult<Self> {
        let (compiled, compile_diagnostics) = RuleCompiler::compile(ruleset, &config)?;
        info!(
            "规则引擎就绪：规则集={}，可用规则{}条，跳过{}条",
            compiled.name,
            compiled.len(),
            compile_diagnostics.len()
        );
        Ok(Self {
            compiled: Arc::new(compiled),
            config: Arc::new(config),
            compile_diagnostics,
        })
    }

    /// 使用已编译的规则集创建引擎
    pub fn from_compiled(compiled: CompiledRuleset, config: EngineConfig) -> Self {
        Self {
            compiled: Arc::new(compiled),
            config: Arc::new(config),
            compile_diagnostics: Vec::new(),
        }
    }

    pub fn compiled(&self) -> &CompiledRuleset {
        &self.compiled
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 编译期被跳过的规则
    pub fn compile_diagnostics(&self) -> &[Diagnostic] {
        &self.compile_diagnostics
    }

    /// 同步评估单个制品（顺序执行，不施加超时）
    pub fn evaluate_artifact(&self, artifact: &Artifact) -> EvaluationReport {
        let view = ArtifactView::new(artifact);
        let outcome = evaluate_all(self.compiled.rules.iter().map(Arc::as_ref), &view, &self.config);
        EvaluationReport {
            findings: outcome.findings,
            diagnostics: outcome.diagnostics,
        }
    }

    /// 并发评估一批制品
    pub async fn run<I>(&self, artifacts: I) -> EvaluationReport
    where
        I: IntoIterator<Item = Artifact>,
    {
        self.run_with_stats(artifacts).await.0
    }

    /// 并发评估一批制品，同时返回运行统计
    /// 每个制品一个阻塞任务，规则按顺序共享同一视图求值；同时运行的任务数不超过 `workers`。
    /// 单个（规则, 制品）到达 `artifact_timeout` 时多匹配扫描提前结束，结果丢弃并记为诊断，不中断整次运行
    pub async fn run_with_stats<I>(&self, artifacts: I) -> (EvaluationReport, RunStats)
    where
        I: IntoIterator<Item = Artifact>,
    {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let collector = Arc::new(FindingCollector::new());
        let gauge = Arc::new(WorkerGauge::default());
        let mut tasks = JoinSet::new();
        let mut artifact_count = 0;

        for (artifact_index, artifact) in artifacts.into_iter().enumerate() {
            artifact_count += 1;
            // 先取许可再派发，任务数随许可数受限
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    let err = RsdiscoveryError::AsyncTaskError(e.to_string());
                    let diagnostic = Diagnostic::from_error(&err).at_path(artifact.path());
                    collector.push_diagnostic(artifact_index, 0, diagnostic);
                    continue;
                }
            };

            let compiled = self.compiled.clone();
            let config = self.config.clone();
            let collector = collector.clone();
            let gauge = gauge.clone();

            tasks.spawn_blocking(move || {
                // 许可随阻塞任务一同释放
                let _permit = permit;
                let _active = gauge.enter();
                evaluate_timed(artifact_index, &artifact, &compiled, &config, &collector);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                let err = RsdiscoveryError::AsyncTaskError(e.to_string());
                warn!("{}", err);
                collector.push_diagnostic(usize::MAX, usize::MAX, Diagnostic::from_error(&err));
            }
        }

        let report = collector.take_report();
        let stats = RunStats {
            artifacts: artifact_count,
            rules: self.compiled.len(),
            findings: report.findings.len(),
            timeouts: report.diagnostics_of(DiagnosticKind::EvaluationTimeout).count(),
            peak_workers: gauge.peak(),
            elapsed: start.elapsed(),
        };

        debug!(
            "✅ 评估完成：制品{}个、规则{}条、命中{}条、超时{}次、峰值并发{}，耗时{:?}",
            stats.artifacts, stats.rules, stats.findings, stats.timeouts, stats.peak_workers, stats.elapsed
        );
        (report, stats)
    }
}

/// 单次运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub artifacts: usize,
    pub rules: usize,
    pub findings: usize,
    pub timeouts: usize,
    /// 同时运行的评估任务数峰值
    pub peak_workers: usize,
    pub elapsed: Duration,
}

/// 运行中任务计数
#[derive(Debug, Default)]
struct WorkerGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl WorkerGauge {
    fn enter(&self) -> ActiveWorker<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveWorker(self)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct ActiveWorker<'a>(&'a WorkerGauge);

impl Drop for ActiveWorker<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 在阻塞线程上按规则顺序评估单个制品，超时的（规则, 制品）对只留下诊断
fn evaluate_timed(
    artifact_index: usize,
    artifact: &Artifact,
    compiled: &CompiledRuleset,
    config: &EngineConfig,
    collector: &FindingCollector,
) {
    let view = ArtifactView::new(artifact);
    let timeout = config.artifact_timeout;

    for (rule_index, rule) in compiled.rules.iter().enumerate() {
        let started = Instant::now();
        view.set_deadline(started.checked_add(timeout));
        let evaluated = panic::catch_unwind(AssertUnwindSafe(|| evaluate_rule(rule, &view, config)));
        let elapsed = started.elapsed();

        match evaluated {
            Ok(_) if elapsed >= timeout => {
                let err = RsdiscoveryError::EvaluationTimeout {
                    rule_id: rule.rule_id.clone(),
                    path: artifact.path().to_path_buf(),
                    timeout,
                };
                warn!("{}（实际耗时{:?}）", err, elapsed);
                collector.push_diagnostic(artifact_index, rule_index, Diagnostic::from_error(&err));
            }
            Ok(outcome) => collector.push(artifact_index, rule_index, outcome),
            Err(_) => {
                let err = RsdiscoveryError::AsyncTaskError(format!("rule `{}` panicked", rule.rule_id));
                warn!("规则 [{}] 评估任务失败：文件={}", rule.rule_id, artifact.path().display());
                collector.push_diagnostic(
                    artifact_index,
                    rule_index,
                    Diagnostic::from_error(&err).for_rule(&rule.rule_id).at_path(artifact.path()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::artifact::{LocationKind, Symbol, SymbolTable};
    use crate::config::ConfigManager;
    use crate::rule::{assemble, discovery_ruleset_builder, RuleLoader, RulesetHeader};

    fn discovery_engine(config: EngineConfig) -> RuleEngine {
        let ruleset = discovery_ruleset_builder().unwrap().build().unwrap();
        RuleEngine::new(&ruleset, config).unwrap()
    }

    fn sample_tree() -> Vec<Artifact> {
        let ejb: SymbolTable = [
            Symbol::new("OrderBean", "jakarta.ejb.Stateless").at(LocationKind::Annotation),
            Symbol::new("OrderBean", "javax.persistence.Entity").at(LocationKind::Annotation),
        ]
        .into_iter()
        .collect();

        vec![
            Artifact::new("LICENSE", "Licensed under the Apache License 2.0\n"),
            Artifact::new("pom.xml", "<project><modelVersion>4.0.0</modelVersion></project>"),
            Artifact::new("src/main/java/OrderBean.java", "class OrderBean {}").with_symbols(ejb),
            Artifact::new("src/main/resources/app.properties", "db.host=192.168.1.10\n"),
            Artifact::new(
                "src/main/resources/META-INF/persistence.xml",
                "<persistence xmlns=\"https://jakarta.ee/xml/ns/persistence\"/>",
            ),
        ]
    }

    fn pairs(report: &EvaluationReport) -> Vec<(String, String)> {
        report
            .findings
            .iter()
            .map(|f| (f.location.path.clone(), f.rule_id.clone()))
            .collect()
    }

    #[test]
    fn test_evaluate_artifact_with_discovery_rules() {
        let engine = discovery_engine(ConfigManager::get_default());
        assert!(engine.compile_diagnostics().is_empty());

        let report = engine.evaluate_artifact(&sample_tree()[3]);
        let ids: Vec<_> = report.findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["hardcoded-ip-address", "discover-properties-file"]);
        assert_eq!(report.findings[0].matching_text(), Some("192.168.1.10"));
        assert_eq!(report.findings[1].tags, vec!["Properties".to_string()]);
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn test_artifact_without_matches_gives_empty_report() {
        let engine = discovery_engine(ConfigManager::get_default());
        let report = engine.evaluate_artifact(&Artifact::new("docs/notes.md", "nothing here"));
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_run_matches_sequential_evaluation() {
        let engine = discovery_engine(ConfigManager::custom().workers(3).build());
        let artifacts = sample_tree();

        let mut expected = EvaluationReport::default();
        for artifact in &artifacts {
            let report = engine.evaluate_artifact(artifact);
            expected.findings.extend(report.findings);
            expected.diagnostics.extend(report.diagnostics);
        }

        let (report, stats) = engine.run_with_stats(artifacts).await;
        assert_eq!(report, expected);
        assert_eq!(stats.artifacts, 5);
        assert_eq!(stats.findings, 8);
        assert_eq!(stats.timeouts, 0);
        assert!(stats.peak_workers <= 3);
        assert_eq!(
            pairs(&report),
            vec![
                ("LICENSE".to_string(), "discover-license".to_string()),
                ("pom.xml".to_string(), "discover-maven-xml".to_string()),
                ("src/main/java/OrderBean.java".to_string(), "discover-java-files".to_string()),
                ("src/main/java/OrderBean.java".to_string(), "ejb-stateless-000".to_string()),
                ("src/main/java/OrderBean.java".to_string(), "jpa-entity-000".to_string()),
                ("src/main/resources/app.properties".to_string(), "hardcoded-ip-address".to_string()),
                ("src/main/resources/app.properties".to_string(), "discover-properties-file".to_string()),
                (
                    "src/main/resources/META-INF/persistence.xml".to_string(),
                    "windup-discover-jpa-configuration".to_string()
                ),
            ]
        );

        let stateless = report.findings_for("ejb-stateless-000").next().unwrap();
        assert_eq!(stateless.message.as_deref(), Some("Stateless session bean OrderBean"));
    }

    #[tokio::test]
    async fn test_timeout_is_recoverable() {
        let corpus = RuleLoader::parse_corpus(
            "slow",
            r#"
- ruleID: every-word
  when:
    builtin.filecontent:
      pattern: "\\w+"
- ruleID: text-files
  when:
    builtin.file:
      pattern: "*.txt"
"#,
        )
        .unwrap();
        let ruleset = assemble(RulesetHeader::new("slow-rules"), [corpus]).unwrap();
        let engine = RuleEngine::new(
            &ruleset,
            ConfigManager::custom().artifact_timeout(Duration::ZERO).workers(2).build(),
        )
        .unwrap();

        let big = "word ".repeat(20_000);
        let report = engine.run(vec![Artifact::new("big.txt", big)]).await;

        let timeouts: Vec<_> = report.diagnostics_of(DiagnosticKind::EvaluationTimeout).collect();
        assert!(!timeouts.is_empty());
        assert!(timeouts.iter().any(|d| d.rule_id.as_deref() == Some("every-word")));
        assert!(timeouts.iter().all(|d| d.path.as_deref() == Some("big.txt")));
        assert!(report.findings.iter().all(|f| f.rule_id != "every-word"));
    }

    #[tokio::test]
    async fn test_run_with_no_artifacts() {
        let engine = discovery_engine(ConfigManager::get_default());
        assert!(engine.run(Vec::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_evaluations_stay_within_worker_bound() {
        let corpus = RuleLoader::parse_corpus(
            "slow",
            r#"
- ruleID: every-word
  when:
    builtin.filecontent:
      pattern: "\\w+"
"#,
        )
        .unwrap();
        let ruleset = assemble(RulesetHeader::new("slow-rules"), [corpus]).unwrap();
        let engine = RuleEngine::new(
            &ruleset,
            ConfigManager::custom().artifact_timeout(Duration::ZERO).workers(2).build(),
        )
        .unwrap();

        let artifacts: Vec<_> = (0..8)
            .map(|i| Artifact::new(format!("logs/{}.txt", i), "word ".repeat(20_000)))
            .collect();
        let (report, stats) = engine.run_with_stats(artifacts).await;

        assert_eq!(stats.artifacts, 8);
        assert_eq!(stats.timeouts, 8);
        assert!(stats.peak_workers >= 1);
        assert!(stats.peak_workers <= 2, "peak {}", stats.peak_workers);
        assert!(report.findings.is_empty());

        let paths: Vec<_> = report.diagnostics.iter().filter_map(|d| d.path.as_deref()).collect();
        let expected: Vec<String> = (0..8).map(|i| format!("logs/{}.txt", i)).collect();
        assert_eq!(paths, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }
}
