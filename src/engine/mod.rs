//! 评估引擎模块：后端分析器、结果收集与并发调度
pub mod analyzer;
pub mod collector;
pub mod engine;
pub mod finding;

pub use self::analyzer::{evaluate_predicate, evaluate_rule, ArtifactView, RuleOutcome};
pub use self::collector::FindingCollector;
pub use self::engine::{RuleEngine, RunStats};
pub use self::finding::{
    findings_to_json, findings_to_pretty_json, Diagnostic, DiagnosticKind, EvaluationReport, Finding, Incident,
    Location,
};
