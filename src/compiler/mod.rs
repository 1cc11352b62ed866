//! 编译模块：将规则条件树编译为可执行谓词
pub mod pattern;
pub mod compiler;
pub mod xpath;

pub use self::pattern::{
    CompiledRule, CompiledRuleset, ContentMatcher, LeafMatcher, NameMatcher, Predicate, SymbolMatcher,
    XmlMatcher,
};
pub use self::compiler::RuleCompiler;
pub use self::xpath::{XPathError, XPathQuery};
