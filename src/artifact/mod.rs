//! 制品模块：外部遍历器交给引擎的输入
pub mod artifact;
pub mod symbol;

pub use self::artifact::Artifact;
pub use self::symbol::{LocationKind, Symbol, SymbolTable};
