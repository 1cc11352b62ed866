//! 工具模块：模板解析、文本定位
pub mod template;
pub mod text_pos;

pub use self::template::{Resolved, Template, BUILTIN_VARIABLES};
pub use self::text_pos::LineCounter;
