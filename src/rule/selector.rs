//! 规则标签选择器
//! 语法：以 `||` 或 `,` 分隔的若干项，`key=value` 精确匹配，裸 `key` 匹配任意取值，`!` 前缀表示排除

use super::model::split_label;

#[derive(Debug, Clone, PartialEq, Eq)]
struct LabelTerm {
    key: String,
    value: Option<String>,
}

impl LabelTerm {
    fn parse(raw: &str) -> Self {
        let (key, value) = split_label(raw);
        Self {
            key: key.to_string(),
            value: value.map(str::to_string),
        }
    }

    fn matches(&self, label: &str) -> bool {
        let (key, value) = split_label(label);
        if key != self.key {
            return false;
        }
        match (&self.value, value) {
            (None, _) => true,
            (Some(expected), Some(actual)) => expected == actual,
            (Some(_), None) => false,
        }
    }
}

/// 标签选择器
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    include: Vec<LabelTerm>,
    exclude: Vec<LabelTerm>,
}

impl LabelSelector {
    pub fn parse(expr: &str) -> Self {
        let mut selector = Self::default();
        for term in expr.split("||").flat_map(|part| part.split(',')) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            match term.strip_prefix('!') {
                Some(excluded) => selector.exclude.push(LabelTerm::parse(excluded.trim())),
                None => selector.include.push(LabelTerm::parse(term)),
            }
        }
        selector
    }

    /// 判断一组标签是否被选中
    /// 无 include 项时默认选中；任一 exclude 项命中则排除
    pub fn matches<'a, I>(&self, labels: I) -> bool
    where
        I: IntoIterator<Item = &'a str> + Clone,
    {
        let hit = |term: &LabelTerm| labels.clone().into_iter().any(|l| term.matches(l));
        if self.exclude.iter().any(hit) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(hit)
    }
}
