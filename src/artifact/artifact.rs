//! 待评估制品：由外部遍历器提供路径、原始字节与可选符号表
//! 引擎本身不做文件系统遍历，也不做源码解析

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::symbol::SymbolTable;
use crate::error::{RsdResult, RsdiscoveryError};

#[derive(Debug, Clone)]
enum Content {
    Bytes {
        bytes: Arc<[u8]>,
        // 非法 UTF-8 时的 lossy 解码结果，首次读取时生成
        lossy: OnceCell<Box<str>>,
    },
    // 遍历器读取失败的原因
    Unreadable(String),
}

/// 单个制品
#[derive(Debug, Clone)]
pub struct Artifact {
    path: PathBuf,
    content: Content,
    symbols: Option<SymbolTable>,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: Content::Bytes {
                bytes: Arc::from(bytes.into()),
                lossy: OnceCell::new(),
            },
            symbols: None,
        }
    }

    /// 遍历器无法读取内容的制品；文件名类规则仍可命中
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: Content::Unreadable(reason.into()),
            symbols: None,
        }
    }

    /// 附加预解析的符号表
    pub fn with_symbols(mut self, symbols: SymbolTable) -> Self {
        self.symbols = Some(symbols);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 统一使用 `/` 分隔的路径文本
    pub fn path_str(&self) -> Cow<'_, str> {
        let raw = self.path.to_string_lossy();
        if raw.contains('\\') {
            Cow::Owned(raw.replace('\\', "/"))
        } else {
            raw
        }
    }

    /// 文件名（basename）
    pub fn file_name(&self) -> Cow<'_, str> {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| self.path.to_string_lossy())
    }

    pub fn symbols(&self) -> Option<&SymbolTable> {
        self.symbols.as_ref()
    }

    pub fn bytes(&self) -> RsdResult<&[u8]> {
        match &self.content {
            Content::Bytes { bytes, .. } => Ok(&bytes[..]),
            Content::Unreadable(reason) => Err(self.read_error(reason)),
        }
    }

    /// 文本内容（非法 UTF-8 按 lossy 解码，解码结果随制品缓存）
    pub fn text(&self) -> RsdResult<&str> {
        match &self.content {
            Content::Bytes { bytes, lossy } => match std::str::from_utf8(bytes) {
                Ok(text) => Ok(text),
                Err(_) => Ok(&**lossy.get_or_init(|| String::from_utf8_lossy(bytes).into_owned().into_boxed_str())),
            },
            Content::Unreadable(reason) => Err(self.read_error(reason)),
        }
    }

    fn read_error(&self, reason: &str) -> RsdiscoveryError {
        RsdiscoveryError::ArtifactRead {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_and_names() {
        let artifact = Artifact::new("src/main/resources/META-INF/persistence.xml", "<persistence/>");
        assert_eq!(artifact.file_name(), "persistence.xml");
        assert_eq!(artifact.path_str(), "src/main/resources/META-INF/persistence.xml");
        assert_eq!(artifact.text().unwrap(), "<persistence/>");
        assert!(artifact.symbols().is_none());
    }

    #[test]
    fn test_lossy_text() {
        let artifact = Artifact::new("bin.dat", vec![b'o', b'k', 0xff]);
        assert_eq!(artifact.text().unwrap(), "ok\u{fffd}");
        // 再次读取复用同一份解码结果
        assert!(std::ptr::eq(artifact.text().unwrap(), artifact.text().unwrap()));
    }

    #[test]
    fn test_unreadable_artifact() {
        let artifact = Artifact::unreadable("secret.properties", "permission denied");
        assert_eq!(artifact.file_name(), "secret.properties");
        match artifact.text() {
            Err(RsdiscoveryError::ArtifactRead { path, reason }) => {
                assert_eq!(path, PathBuf::from("secret.properties"));
                assert_eq!(reason, "permission denied");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
