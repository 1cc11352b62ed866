//! 消息/标签模板
//! 仅支持 `{{variable}}` 占位符替换，变量取自匹配时捕获的封闭变量集合，
//! 不做任何表达式求值

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::TemplatePolicy;

/// 内置模板变量
pub const VAR_NAME: &str = "name";
pub const VAR_MATCHING_TEXT: &str = "matchingText";
pub const VAR_FILE: &str = "file";
pub const VAR_LINE_NUMBER: &str = "lineNumber";

pub const BUILTIN_VARIABLES: [&str; 4] = [VAR_NAME, VAR_MATCHING_TEXT, VAR_FILE, VAR_LINE_NUMBER];

static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var { name: String, raw: String },
}

/// 预解析的模板
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    segments: Vec<Segment>,
}

/// 模板解析结果；`missing` 为未能解析的变量名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub text: String,
    pub missing: Vec<String>,
}

impl Template {
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER_REGEX.captures_iter(raw) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Literal(raw[last..whole.start()].to_string()));
            }
            segments.push(Segment::Var {
                name: name.as_str().to_string(),
                raw: whole.as_str().to_string(),
            });
            last = whole.end();
        }

        if last < raw.len() {
            segments.push(Segment::Literal(raw[last..].to_string()));
        }

        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// 模板引用的变量（去重、有序）
    pub fn variables(&self) -> BTreeSet<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Var { name, .. } => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    pub fn is_static(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    /// 按策略解析模板
    /// - Verbatim / Strict：未解析的占位符保留原文（Strict 由调用方据 `missing` 判错）
    /// - Empty：未解析的占位符替换为空字符串
    pub fn resolve(&self, vars: &BTreeMap<String, String>, policy: TemplatePolicy) -> Resolved {
        let mut text = String::with_capacity(self.raw.len());
        let mut missing = Vec::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => text.push_str(s),
                Segment::Var { name, raw } => match vars.get(name) {
                    Some(value) => text.push_str(value),
                    None => {
                        if !missing.contains(name) {
                            missing.push(name.clone());
                        }
                        if policy != TemplatePolicy::Empty {
                            text.push_str(raw);
                        }
                    }
                },
            }
        }

        Resolved { text, missing }
    }
}
