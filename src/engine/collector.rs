//! 线程安全的结果收集器
//! 各工作任务只追加，运行结束后按（制品序号, 规则序号）排序合并

use std::sync::{Mutex, MutexGuard};

use super::analyzer::RuleOutcome;
use super::finding::{Diagnostic, EvaluationReport};

#[derive(Debug)]
struct Entry {
    artifact: usize,
    rule: usize,
    outcome: RuleOutcome,
}

/// 追加式收集器
#[derive(Debug, Default)]
pub struct FindingCollector {
    entries: Mutex<Vec<Entry>>,
}

impl FindingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    // 任务 panic 不会破坏只追加的数据，直接取回内部值
    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, artifact: usize, rule: usize, outcome: RuleOutcome) {
        if outcome.findings.is_empty() && outcome.diagnostics.is_empty() {
            return;
        }
        self.lock().push(Entry { artifact, rule, outcome });
    }

    pub fn push_diagnostic(&self, artifact: usize, rule: usize, diagnostic: Diagnostic) {
        self.push(
            artifact,
            rule,
            RuleOutcome {
                findings: Vec::new(),
                diagnostics: vec![diagnostic],
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 排序并合并为报告
    pub fn into_report(self) -> EvaluationReport {
        let entries = self
            .entries
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Self::merge(entries)
    }

    /// 取出已收集的结果，收集器随后为空
    pub fn take_report(&self) -> EvaluationReport {
        let entries = std::mem::take(&mut *self.lock());
        Self::merge(entries)
    }

    fn merge(mut entries: Vec<Entry>) -> EvaluationReport {
        // 稳定排序，同一对内保持追加顺序
        entries.sort_by_key(|e| (e.artifact, e.rule));

        let mut report = EvaluationReport::default();
        for entry in entries {
            report.findings.extend(entry.outcome.findings);
            report.diagnostics.extend(entry.outcome.diagnostics);
        }
        report
    }
}
