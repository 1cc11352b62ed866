//! 源码符号表：由外部解析器产出，引擎只读取不解析

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 符号引用所处位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationKind {
    Type,
    Inheritance,
    MethodCall,
    ConstructorCall,
    Annotation,
    ImplementsType,
    EnumConstant,
    ReturnType,
    Import,
    VariableDeclaration,
    Field,
    Method,
    Class,
    Package,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Type => "TYPE",
            LocationKind::Inheritance => "INHERITANCE",
            LocationKind::MethodCall => "METHOD_CALL",
            LocationKind::ConstructorCall => "CONSTRUCTOR_CALL",
            LocationKind::Annotation => "ANNOTATION",
            LocationKind::ImplementsType => "IMPLEMENTS_TYPE",
            LocationKind::EnumConstant => "ENUM_CONSTANT",
            LocationKind::ReturnType => "RETURN_TYPE",
            LocationKind::Import => "IMPORT",
            LocationKind::VariableDeclaration => "VARIABLE_DECLARATION",
            LocationKind::Field => "FIELD",
            LocationKind::Method => "METHOD",
            LocationKind::Class => "CLASS",
            LocationKind::Package => "PACKAGE",
        }
    }
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_ascii_uppercase().as_str() {
            "TYPE" => LocationKind::Type,
            "INHERITANCE" => LocationKind::Inheritance,
            "METHOD_CALL" => LocationKind::MethodCall,
            "CONSTRUCTOR_CALL" => LocationKind::ConstructorCall,
            "ANNOTATION" => LocationKind::Annotation,
            "IMPLEMENTS_TYPE" => LocationKind::ImplementsType,
            "ENUM_CONSTANT" => LocationKind::EnumConstant,
            "RETURN_TYPE" => LocationKind::ReturnType,
            "IMPORT" => LocationKind::Import,
            "VARIABLE_DECLARATION" => LocationKind::VariableDeclaration,
            "FIELD" => LocationKind::Field,
            "METHOD" => LocationKind::Method,
            "CLASS" => LocationKind::Class,
            "PACKAGE" => LocationKind::Package,
            other => return Err(format!("unknown location kind `{}`", other)),
        };
        Ok(kind)
    }
}

/// 单个符号引用
/// `name` 为声明方（如类名），`reference` 为被引用的全限定名；
/// 一个引用可同时处于多个位置（如既是 IMPLEMENTS_TYPE 又是 INHERITANCE）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub reference: String,
    pub locations: BTreeSet<LocationKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference: reference.into(),
            locations: BTreeSet::new(),
            line: None,
        }
    }

    pub fn at(mut self, kind: LocationKind) -> Self {
        self.locations.insert(kind);
        self
    }

    pub fn on_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn is_at(&self, kind: LocationKind) -> bool {
        self.locations.contains(&kind)
    }
}

/// 制品的符号表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, symbol: Symbol) {
        self.symbols.push(symbol);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    /// 处于指定位置的所有符号
    pub fn at(&self, kind: LocationKind) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter().filter(move |s| s.is_at(kind))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl FromIterator<Symbol> for SymbolTable {
    fn from_iter<T: IntoIterator<Item = Symbol>>(iter: T) -> Self {
        Self {
            symbols: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_kind_parse_and_display() {
        assert_eq!("ANNOTATION".parse::<LocationKind>(), Ok(LocationKind::Annotation));
        assert_eq!("implements_type".parse::<LocationKind>(), Ok(LocationKind::ImplementsType));
        assert!("SOMEWHERE".parse::<LocationKind>().is_err());
        assert_eq!(LocationKind::MethodCall.to_string(), "METHOD_CALL");
    }

    #[test]
    fn test_symbol_with_multiple_locations() {
        let table: SymbolTable = [
            Symbol::new("OrderHome", "javax.ejb.EJBHome")
                .at(LocationKind::ImplementsType)
                .at(LocationKind::Inheritance),
            Symbol::new("OrderBean", "javax.ejb.Stateless").at(LocationKind::Annotation),
        ]
        .into_iter()
        .collect();

        assert_eq!(table.at(LocationKind::Inheritance).count(), 1);
        assert_eq!(table.at(LocationKind::ImplementsType).count(), 1);
        assert_eq!(table.at(LocationKind::Annotation).next().map(|s| s.name.as_str()), Some("OrderBean"));
        assert_eq!(table.at(LocationKind::Import).count(), 0);
    }

    #[test]
    fn test_location_kind_serde_name() {
        let json = serde_json::to_string(&LocationKind::ImplementsType).unwrap();
        assert_eq!(json, "\"IMPLEMENTS_TYPE\"");
    }
}
