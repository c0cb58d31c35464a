//! Compile-time constants visible to profile bodies.

use std::collections::{HashMap, HashSet};

use bulkgen_core::DbType;

use crate::expr::{Expr, ExprKind, Lit};

/// A folded argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Str(String),
    Int(i128),
    Float(f64),
    Bool(bool),
    DbType(DbType),
    /// `SqlServerType::X` or `PostgresType::X` naming no known variant.
    UnknownDbType(String),
}

impl ConstValue {
    pub fn describe(&self) -> &'static str {
        match self {
            ConstValue::Str(_) => "a string",
            ConstValue::Int(_) => "an integer",
            ConstValue::Float(_) => "a float",
            ConstValue::Bool(_) => "a bool",
            ConstValue::DbType(_) => "a column type",
            ConstValue::UnknownDbType(_) => "an unknown column type",
        }
    }
}

#[derive(Debug, Clone)]
struct ConstItem {
    module: Vec<String>,
    expr: Expr,
}

/// `const` items found while scanning, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    consts: HashMap<String, Vec<ConstItem>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, module: Vec<String>, name: String, expr: Expr) {
        self.consts.entry(name).or_default().push(ConstItem { module, expr });
    }

    pub fn len(&self) -> usize {
        self.consts.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.consts.is_empty()
    }

    /// Folds `expr` to a value, or `None` if it is not a compile-time
    /// constant this generator can see through.
    pub fn fold(&self, expr: &Expr) -> Option<ConstValue> {
        self.fold_guarded(expr, &mut HashSet::new())
    }

    fn fold_guarded(&self, expr: &Expr, visiting: &mut HashSet<String>) -> Option<ConstValue> {
        match &expr.kind {
            ExprKind::Lit(lit) => Some(match lit {
                Lit::Str(s) => ConstValue::Str(s.clone()),
                Lit::Int(i) => ConstValue::Int(i128::try_from(*i).ok()?),
                Lit::Float(f) => ConstValue::Float(*f),
                Lit::Bool(b) => ConstValue::Bool(*b),
            }),
            ExprKind::Neg(inner) => match self.fold_guarded(inner, visiting)? {
                ConstValue::Int(i) => Some(ConstValue::Int(-i)),
                ConstValue::Float(f) => Some(ConstValue::Float(-f)),
                _ => None,
            },
            ExprKind::Reference(inner) => self.fold_guarded(inner, visiting),
            ExprKind::Macro { path, tokens } => {
                if path.last().map(String::as_str) != Some("stringify") {
                    return None;
                }
                symbolic_name(tokens).map(ConstValue::Str)
            }
            ExprKind::Path(segments) => self.fold_path(segments, visiting),
            _ => None,
        }
    }

    fn fold_path(&self, segments: &[String], visiting: &mut HashSet<String>) -> Option<ConstValue> {
        if let [.., enum_name, variant] = segments {
            if let Some(db_type) = DbType::from_path(enum_name, variant) {
                return Some(ConstValue::DbType(db_type));
            }
            if matches!(enum_name.as_str(), "SqlServerType" | "PostgresType") {
                return Some(ConstValue::UnknownDbType(format!("{}::{}", enum_name, variant)));
            }
        }
        let (name, qualifier) = segments.split_last()?;
        let item = self.lookup(name, qualifier)?;
        let key = format!("{}::{}", item.module.join("::"), name);
        if !visiting.insert(key.clone()) {
            return None;
        }
        let value = self.fold_guarded(&item.expr, visiting);
        visiting.remove(&key);
        value
    }

    /// Resolves a possibly qualified name; ambiguous names resolve only when
    /// the qualifier picks out exactly one module.
    fn lookup(&self, name: &str, qualifier: &[String]) -> Option<&ConstItem> {
        let candidates = self.consts.get(name)?;
        if let [only] = candidates.as_slice() {
            return Some(only);
        }
        let qualifier: Vec<&String> = qualifier
            .iter()
            .filter(|s| !matches!(s.as_str(), "crate" | "self" | "super"))
            .collect();
        if qualifier.is_empty() {
            return None;
        }
        let mut matching = candidates.iter().filter(|c| {
            c.module.len() >= qualifier.len()
                && c.module[c.module.len() - qualifier.len()..]
                    .iter()
                    .zip(&qualifier)
                    .all(|(a, b)| a == *b)
        });
        match (matching.next(), matching.next()) {
            (Some(item), None) => Some(item),
            _ => None,
        }
    }
}

/// `stringify!(name)` accepts a single identifier.
fn symbolic_name(tokens: &str) -> Option<String> {
    let tokens = tokens.trim();
    let ident = tokens.strip_prefix("r#").unwrap_or(tokens);
    let mut chars = ident.chars();
    let first = chars.next()?;
    ((first.is_alphabetic() || first == '_') && chars.all(|c| c.is_alphanumeric() || c == '_'))
        .then(|| ident.to_owned())
}
