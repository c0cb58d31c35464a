//! Reads `rule_for` chains out of profile bodies.
//!
//! Chains are collected per property across every body of the profile, then
//! applied in ascending method-name order. The sort is stable, so when the
//! same method appears twice the later call wins. An argument that does not
//! fold to a constant drops only that one call.

use std::collections::BTreeMap;

use bulkgen_core::{ColumnSize, DbType, Dialect, PostgresType, SqlServerType};
use proc_macro2::Span;

use crate::diagnostic::{Diagnostic, DiagnosticKind, Location};
use crate::discovery::{ModelDecl, ProfileDecl};
use crate::expr::{ChainCall, Expr};
use crate::symbols::{ConstValue, SymbolTable};

/// Settings collected for one property. `None` means "not configured".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyConfig {
    pub column: Option<String>,
    pub db_type: Option<DbType>,
    pub size: Option<ColumnSize>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub nullable: Option<bool>,
    pub default_sql: Option<String>,
    /// First `rule_for` naming the property.
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedProfile {
    pub schema: Option<String>,
    pub table: Option<String>,
    /// Key property names, in declaration order of the `key` calls.
    pub keys: Vec<String>,
    pub identity: Vec<String>,
    pub properties: BTreeMap<String, PropertyConfig>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
struct PendingCall {
    method: String,
    args: Vec<Expr>,
    location: Location,
}

/// Column type shorthands: each sets the type and its size or precision
/// together.
#[derive(Debug, Clone, Copy)]
enum Shorthand {
    Sized(DbType),
    Max(DbType),
    Bare(DbType),
    Decimal(DbType),
}

fn shorthand(dialect: Dialect, method: &str) -> Option<Shorthand> {
    use Shorthand::*;
    let ss = DbType::SqlServer;
    let pg = DbType::Postgres;
    Some(match (dialect, method) {
        (Dialect::SqlServer, "char") => Sized(ss(SqlServerType::Char)),
        (Dialect::SqlServer, "varchar") => Sized(ss(SqlServerType::VarChar)),
        (Dialect::SqlServer, "nchar") => Sized(ss(SqlServerType::NChar)),
        (Dialect::SqlServer, "nvarchar") => Sized(ss(SqlServerType::NVarChar)),
        (Dialect::SqlServer, "binary") => Sized(ss(SqlServerType::Binary)),
        (Dialect::SqlServer, "varbinary") => Sized(ss(SqlServerType::VarBinary)),
        (Dialect::SqlServer, "varchar_max") => Max(ss(SqlServerType::VarChar)),
        (Dialect::SqlServer, "nvarchar_max") => Max(ss(SqlServerType::NVarChar)),
        (Dialect::SqlServer, "varbinary_max") => Max(ss(SqlServerType::VarBinary)),
        (Dialect::SqlServer, "decimal") => Decimal(ss(SqlServerType::Decimal)),
        (Dialect::Postgres, "char") => Sized(pg(PostgresType::Char)),
        (Dialect::Postgres, "varchar") => Sized(pg(PostgresType::VarChar)),
        (Dialect::Postgres, "text") => Bare(pg(PostgresType::Text)),
        (Dialect::Postgres, "bytea") => Bare(pg(PostgresType::Bytea)),
        (Dialect::Postgres, "numeric") => Decimal(pg(PostgresType::Numeric)),
        _ => return None,
    })
}

pub fn parse_profile(model: &ModelDecl, profile: &ProfileDecl, symbols: &SymbolTable) -> ParsedProfile {
    let mut parser = Parser {
        model,
        dialect: profile.dialect,
        symbols,
        out: ParsedProfile::default(),
        pending: Vec::new(),
    };
    for body in &profile.bodies {
        body.expr.for_each_chain(&mut |chain| parser.chain(chain, &body.file));
    }
    parser.apply_pending();
    parser.out
}

struct Parser<'a> {
    model: &'a ModelDecl,
    dialect: Dialect,
    symbols: &'a SymbolTable,
    out: ParsedProfile,
    /// Property name and its calls, in source order.
    pending: Vec<(String, Vec<PendingCall>)>,
}

impl Parser<'_> {
    fn diagnostic(&mut self, kind: DiagnosticKind, location: Location, property: Option<&str>, message: String) {
        let mut diag = Diagnostic::new(kind, &self.model.name, location, message).with_dialect(self.dialect);
        if let Some(property) = property {
            diag = diag.with_property(property);
        }
        self.out.diagnostics.push(diag);
    }

    fn chain(&mut self, chain: &Expr, file: &std::path::Path) {
        let (_, calls) = chain.unchain();
        let rule_at = calls.iter().position(|c| c.method == "rule_for");
        let (table_calls, rule_calls) = match rule_at {
            Some(at) => calls.split_at(at),
            None => (calls.as_slice(), &[][..]),
        };
        for call in table_calls {
            self.table_call(call, file);
        }
        let [rule, rest @ ..] = rule_calls else {
            return;
        };
        let location = Location::new(file, rule.span);
        let Some(property) = self.selector(rule, &location) else {
            return;
        };
        let calls = rest.iter().map(|call| PendingCall {
            method: call.method.to_owned(),
            args: call.args.to_vec(),
            location: Location::new(file, call.span),
        });
        match self.pending.iter_mut().find(|(name, _)| *name == property) {
            Some((_, existing)) => existing.extend(calls),
            None => {
                self.out.properties.insert(
                    property.clone(),
                    PropertyConfig {
                        location: Some(location),
                        ..PropertyConfig::default()
                    },
                );
                self.pending.push((property, calls.collect()));
            }
        }
    }

    /// Property named by a single-argument selector call. Unsupported shapes
    /// are ignored; unknown properties are reported.
    fn selector(&mut self, call: &ChainCall<'_>, location: &Location) -> Option<String> {
        let [selector] = call.args else {
            return None;
        };
        let field = selector.selected_field()?;
        let field = field.strip_prefix("r#").unwrap_or(field);
        if self.model.property(field).is_none() {
            self.diagnostic(
                DiagnosticKind::UnknownProperty,
                location.clone(),
                Some(field),
                format!("`{}` has no property `{}`", self.model.name, field),
            );
            return None;
        }
        Some(field.to_owned())
    }

    fn table_call(&mut self, call: &ChainCall<'_>, file: &std::path::Path) {
        let location = Location::new(file, call.span);
        match call.method {
            "schema" | "table" => {
                let Some([value]) = self.fold_args::<1>(call.method, call.args, &location, None) else {
                    return;
                };
                let Some(name) = self.expect_name(call.method, value, &location, None) else {
                    return;
                };
                if call.method == "schema" {
                    self.out.schema = Some(name);
                } else {
                    self.out.table = Some(name);
                }
            }
            "key" | "identity" => {
                let Some(property) = self.selector(call, &location) else {
                    return;
                };
                let list = if call.method == "key" {
                    &mut self.out.keys
                } else {
                    &mut self.out.identity
                };
                if !list.contains(&property) {
                    list.push(property);
                }
            }
            _ => {}
        }
    }

    fn apply_pending(&mut self) {
        for (property, mut calls) in std::mem::take(&mut self.pending) {
            calls.sort_by(|a, b| a.method.cmp(&b.method));
            let mut config = self.out.properties.remove(&property).unwrap_or_default();
            for call in calls {
                self.apply(&property, &mut config, call);
            }
            self.out.properties.insert(property, config);
        }
    }

    fn apply(&mut self, property: &str, config: &mut PropertyConfig, call: PendingCall) {
        let PendingCall {
            method,
            args,
            location,
        } = call;
        let prop = Some(property);
        let loc = &location;
        match method.as_str() {
            "column" => {
                if let Some([v]) = self.fold_args::<1>(&method, &args, loc, prop) {
                    config.column = self.expect_name(&method, v, loc, prop).or(config.column.take());
                }
            }
            "size" => {
                if let Some([v]) = self.fold_args::<1>(&method, &args, loc, prop) {
                    if let Some(len) = self.expect_size(&method, v, loc, prop) {
                        config.size = Some(ColumnSize::Len(len));
                    }
                }
            }
            "size_max" => {
                if self.fold_args::<0>(&method, &args, loc, prop).is_some() {
                    config.size = Some(ColumnSize::Max);
                }
            }
            "precision" | "scale" => {
                if let Some([v]) = self.fold_args::<1>(&method, &args, loc, prop) {
                    if let Some(n) = self.expect_u8(&method, v, loc, prop) {
                        if method == "precision" {
                            config.precision = Some(n);
                        } else {
                            config.scale = Some(n);
                        }
                    }
                }
            }
            "nullable" | "required" => {
                if self.fold_args::<0>(&method, &args, loc, prop).is_some() {
                    config.nullable = Some(method == "nullable");
                }
            }
            "default_value" => {
                if let Some([v]) = self.fold_args::<1>(&method, &args, loc, prop) {
                    if let Some(sql) = self.expect_name(&method, v, loc, prop) {
                        config.default_sql = Some(sql);
                    }
                }
            }
            "db_type" => {
                if let Some([v]) = self.fold_args::<1>(&method, &args, loc, prop) {
                    match v {
                        ConstValue::DbType(ty) => config.db_type = Some(ty),
                        ConstValue::UnknownDbType(path) => self.diagnostic(
                            DiagnosticKind::InvalidArgument,
                            loc.clone(),
                            prop,
                            format!("`{}` names no known column type; the call is ignored", path),
                        ),
                        other => self.invalid_argument(&method, loc, prop, "a column type", &other),
                    }
                }
            }
            name => match shorthand(self.dialect, name) {
                Some(Shorthand::Sized(ty)) => {
                    if let Some([v]) = self.fold_args::<1>(&method, &args, loc, prop) {
                        if let Some(len) = self.expect_size(&method, v, loc, prop) {
                            config.db_type = Some(ty);
                            config.size = Some(ColumnSize::Len(len));
                        }
                    }
                }
                Some(Shorthand::Max(ty)) => {
                    if self.fold_args::<0>(&method, &args, loc, prop).is_some() {
                        config.db_type = Some(ty);
                        config.size = Some(ColumnSize::Max);
                    }
                }
                Some(Shorthand::Bare(ty)) => {
                    if self.fold_args::<0>(&method, &args, loc, prop).is_some() {
                        config.db_type = Some(ty);
                        config.size = None;
                    }
                }
                Some(Shorthand::Decimal(ty)) => {
                    if let Some([p, s]) = self.fold_args::<2>(&method, &args, loc, prop) {
                        let precision = self.expect_u8(&method, p, loc, prop);
                        let scale = self.expect_u8(&method, s, loc, prop);
                        if let (Some(precision), Some(scale)) = (precision, scale) {
                            config.db_type = Some(ty);
                            config.precision = Some(precision);
                            config.scale = Some(scale);
                        }
                    }
                }
                None => self.diagnostic(
                    DiagnosticKind::UnknownMethod,
                    location.clone(),
                    prop,
                    format!(
                        "`{}` is not a {} configuration method; the call is ignored",
                        name, self.dialect
                    ),
                ),
            },
        }
    }

    /// Checks arity and folds every argument. Any failure drops the call.
    fn fold_args<const N: usize>(
        &mut self,
        method: &str,
        args: &[Expr],
        location: &Location,
        property: Option<&str>,
    ) -> Option<[ConstValue; N]> {
        if args.len() != N {
            self.diagnostic(
                DiagnosticKind::InvalidArgument,
                location.clone(),
                property,
                format!("`{}` takes {} argument(s), found {}", method, N, args.len()),
            );
            return None;
        }
        let mut values = Vec::with_capacity(N);
        for arg in args {
            match self.symbols.fold(arg) {
                Some(value) => values.push(value),
                None => {
                    self.non_constant(method, arg.span, location, property);
                    return None;
                }
            }
        }
        values.try_into().ok()
    }

    fn non_constant(&mut self, method: &str, span: Span, location: &Location, property: Option<&str>) {
        let location = Location::new(&location.file, span);
        self.diagnostic(
            DiagnosticKind::NonConstantArg,
            location,
            property,
            format!(
                "argument to `{}` must be a literal, a `const`, or `stringify!(name)`; the call is ignored",
                method
            ),
        );
    }

    fn invalid_argument(
        &mut self,
        method: &str,
        location: &Location,
        property: Option<&str>,
        expected: &str,
        found: &ConstValue,
    ) {
        self.diagnostic(
            DiagnosticKind::InvalidArgument,
            location.clone(),
            property,
            format!("`{}` expects {}, found {}", method, expected, found.describe()),
        );
    }

    fn expect_name(
        &mut self,
        method: &str,
        value: ConstValue,
        location: &Location,
        property: Option<&str>,
    ) -> Option<String> {
        match value {
            ConstValue::Str(s) if !s.trim().is_empty() => Some(s),
            ConstValue::Str(_) => {
                self.diagnostic(
                    DiagnosticKind::InvalidArgument,
                    location.clone(),
                    property,
                    format!("`{}` expects a non-empty string", method),
                );
                None
            }
            other => {
                self.invalid_argument(method, location, property, "a string", &other);
                None
            }
        }
    }

    fn expect_size(
        &mut self,
        method: &str,
        value: ConstValue,
        location: &Location,
        property: Option<&str>,
    ) -> Option<u32> {
        match value {
            ConstValue::Int(n) => match u32::try_from(n) {
                Ok(len) if len > 0 => Some(len),
                _ => {
                    self.diagnostic(
                        DiagnosticKind::InvalidArgument,
                        location.clone(),
                        property,
                        format!("`{}` expects a positive length, found {}", method, n),
                    );
                    None
                }
            },
            other => {
                self.invalid_argument(method, location, property, "an integer", &other);
                None
            }
        }
    }

    fn expect_u8(
        &mut self,
        method: &str,
        value: ConstValue,
        location: &Location,
        property: Option<&str>,
    ) -> Option<u8> {
        match value {
            ConstValue::Int(n) => match u8::try_from(n) {
                Ok(v) => Some(v),
                Err(_) => {
                    self.diagnostic(
                        DiagnosticKind::InvalidArgument,
                        location.clone(),
                        property,
                        format!("`{}` expects a value between 0 and 255, found {}", method, n),
                    );
                    None
                }
            },
            other => {
                self.invalid_argument(method, location, property, "an integer", &other);
                None
            }
        }
    }
}
