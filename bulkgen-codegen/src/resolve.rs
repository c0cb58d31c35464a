//! Turns a model and one parsed profile into concrete column settings.

use bulkgen_core::sql::{ColumnModel, TableModel};
use bulkgen_core::{ColumnSize, DbType, Dialect, PostgresType, SqlServerType, TypeFamily};

use crate::diagnostic::{Diagnostic, DiagnosticKind, Location};
use crate::discovery::{EnumDecl, ModelDecl};
use crate::parser::ParsedProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
}

impl IntWidth {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "i8" => IntWidth::I8,
            "i16" => IntWidth::I16,
            "i32" => IntWidth::I32,
            "i64" => IntWidth::I64,
            "u8" => IntWidth::U8,
            "u16" => IntWidth::U16,
            "u32" => IntWidth::U32,
            _ => return None,
        })
    }

    pub fn rust_name(self) -> &'static str {
        match self {
            IntWidth::I8 => "i8",
            IntWidth::I16 => "i16",
            IntWidth::I32 => "i32",
            IntWidth::I64 => "i64",
            IntWidth::U8 => "u8",
            IntWidth::U16 => "u16",
            IntWidth::U32 => "u32",
        }
    }

    /// Narrowest column type holding every value of the width.
    fn db_type(self, dialect: Dialect) -> DbType {
        match dialect {
            Dialect::SqlServer => DbType::SqlServer(match self {
                IntWidth::U8 => SqlServerType::TinyInt,
                IntWidth::I8 | IntWidth::I16 => SqlServerType::SmallInt,
                IntWidth::U16 | IntWidth::I32 => SqlServerType::Int,
                IntWidth::U32 | IntWidth::I64 => SqlServerType::BigInt,
            }),
            Dialect::Postgres => DbType::Postgres(match self {
                IntWidth::I8 | IntWidth::U8 | IntWidth::I16 => PostgresType::SmallInt,
                IntWidth::U16 | IntWidth::I32 => PostgresType::Integer,
                IntWidth::U32 | IntWidth::I64 => PostgresType::BigInt,
            }),
        }
    }
}

/// A fieldless enum stored as its integer discriminant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumRef {
    pub name: String,
    /// `crate::..::Name`.
    pub path: String,
    pub repr: IntWidth,
    pub variants: Vec<String>,
}

/// What a Rust property type means to the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticType {
    Bool,
    Int(IntWidth),
    F32,
    F64,
    Decimal,
    String,
    Bytes,
    Date,
    Time,
    DateTime,
    DateTimeUtc,
    Uuid,
    Enum(EnumRef),
}

impl SemanticType {
    /// Types whose column shape no default can pick.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, SemanticType::Decimal | SemanticType::String | SemanticType::Bytes)
    }

    pub fn family(&self) -> TypeFamily {
        match self {
            SemanticType::Bool => TypeFamily::Boolean,
            SemanticType::Int(_) | SemanticType::Enum(_) => TypeFamily::Integer,
            SemanticType::F32 | SemanticType::F64 => TypeFamily::Float,
            SemanticType::Decimal => TypeFamily::Decimal,
            SemanticType::String => TypeFamily::Text,
            SemanticType::Bytes => TypeFamily::Binary,
            SemanticType::Date
            | SemanticType::Time
            | SemanticType::DateTime
            | SemanticType::DateTimeUtc => TypeFamily::Temporal,
            SemanticType::Uuid => TypeFamily::Uuid,
        }
    }

    /// Column type used when the profile names none.
    pub fn default_db_type(&self, dialect: Dialect) -> Option<DbType> {
        use PostgresType as Pg;
        use SqlServerType as Ss;
        let (ss, pg) = match self {
            SemanticType::Int(width) => return Some(width.db_type(dialect)),
            SemanticType::Enum(e) => return Some(e.repr.db_type(dialect)),
            SemanticType::Decimal | SemanticType::String | SemanticType::Bytes => return None,
            SemanticType::Bool => (Ss::Bit, Pg::Boolean),
            SemanticType::F32 => (Ss::Real, Pg::Real),
            SemanticType::F64 => (Ss::Float, Pg::DoublePrecision),
            SemanticType::Date => (Ss::Date, Pg::Date),
            SemanticType::Time => (Ss::Time, Pg::Time),
            SemanticType::DateTime => (Ss::DateTime2, Pg::Timestamp),
            SemanticType::DateTimeUtc => (Ss::DateTimeOffset, Pg::TimestampTz),
            SemanticType::Uuid => (Ss::UniqueIdentifier, Pg::Uuid),
        };
        Some(match dialect {
            Dialect::SqlServer => DbType::SqlServer(ss),
            Dialect::Postgres => DbType::Postgres(pg),
        })
    }
}

fn last_segment(ty: &syn::Type) -> Option<&syn::PathSegment> {
    match ty {
        syn::Type::Path(path) if path.qself.is_none() => path.path.segments.last(),
        syn::Type::Group(group) => last_segment(&group.elem),
        syn::Type::Paren(paren) => last_segment(&paren.elem),
        _ => None,
    }
}

fn single_generic(segment: &syn::PathSegment) -> Option<&syn::Type> {
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        syn::GenericArgument::Type(ty) if args.args.len() == 1 => Some(ty),
        _ => None,
    }
}

/// Classifies a property type with any `Option` already removed.
pub fn classify(ty: &syn::Type, enums: &[EnumDecl]) -> Result<SemanticType, String> {
    let rendered = || quote::quote!(#ty).to_string();
    let segment = last_segment(ty).ok_or_else(|| format!("`{}` is not a supported property type", rendered()))?;
    let name = segment.ident.to_string();
    if let Some(width) = IntWidth::parse(&name) {
        return Ok(SemanticType::Int(width));
    }
    let semantic = match name.as_str() {
        "bool" => SemanticType::Bool,
        "f32" => SemanticType::F32,
        "f64" => SemanticType::F64,
        "Decimal" => SemanticType::Decimal,
        "String" => SemanticType::String,
        "NaiveDate" => SemanticType::Date,
        "NaiveTime" => SemanticType::Time,
        "NaiveDateTime" => SemanticType::DateTime,
        "Uuid" => SemanticType::Uuid,
        "Vec" => match single_generic(segment).and_then(last_segment) {
            Some(inner) if inner.ident == "u8" => SemanticType::Bytes,
            _ => return Err(format!("`{}` is not supported; only `Vec<u8>` maps to a column", rendered())),
        },
        "DateTime" => match single_generic(segment).and_then(last_segment) {
            Some(tz) if tz.ident == "Utc" => SemanticType::DateTimeUtc,
            _ => return Err(format!("`{}` is not supported; use `DateTime<Utc>`", rendered())),
        },
        "u64" | "usize" | "isize" | "i128" | "u128" => {
            return Err(format!("`{}` has no lossless column type", name));
        }
        _ => return classify_enum(&name, enums).ok_or_else(|| format!("`{}` is not a supported property type", rendered())),
    };
    Ok(semantic)
}

fn classify_enum(name: &str, enums: &[EnumDecl]) -> Option<SemanticType> {
    let decl = enums.iter().find(|e| e.name == name)?;
    if !decl.unit_only || decl.variants.is_empty() {
        return None;
    }
    let repr = match decl.repr.as_deref() {
        None => IntWidth::I32,
        Some(repr) => IntWidth::parse(repr)?,
    };
    Some(SemanticType::Enum(EnumRef {
        name: decl.name.clone(),
        path: decl.path(),
        repr,
        variants: decl.variants.clone(),
    }))
}

/// Classifies every property; unsupported ones are reported once for all
/// dialects.
pub fn classify_model(model: &ModelDecl, enums: &[EnumDecl]) -> (Vec<Option<SemanticType>>, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let semantics = model
        .properties
        .iter()
        .map(|property| match classify(&property.inner, enums) {
            Ok(semantic) => Some(semantic),
            Err(reason) => {
                diagnostics.push(
                    Diagnostic::new(
                        DiagnosticKind::UnsupportedType,
                        &model.name,
                        property.location.clone(),
                        format!("property `{}` of `{}`: {}", property.name, model.name, reason),
                    )
                    .with_property(&property.name),
                );
                None
            }
        })
        .collect();
    (semantics, diagnostics)
}

/// `Order` to `Orders`, `Category` to `Categories`, `Box` to `Boxes`.
pub fn pluralize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    let mut chars = lower.chars().rev();
    let last = chars.next();
    let before = chars.next();
    match (before, last) {
        (Some(b), Some('y')) if !"aeiou".contains(b) => format!("{}ies", &name[..name.len() - 1]),
        (_, Some('s' | 'x' | 'z')) => format!("{}es", name),
        (Some('c' | 's'), Some('h')) => format!("{}es", name),
        _ => format!("{}s", name),
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedProperty {
    pub name: String,
    pub semantic: SemanticType,
    pub column: String,
    /// `None` only for an ambiguous type the profile left unset.
    pub db_type: Option<DbType>,
    /// Whether `db_type` came from the profile.
    pub explicit_type: bool,
    pub size: Option<ColumnSize>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub nullable: bool,
    pub default_sql: Option<String>,
    /// Where the property is declared.
    pub declared_at: Location,
    /// Where it is configured, falling back to the declaration.
    pub configured_at: Location,
}

#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub dialect: Dialect,
    pub schema: String,
    pub table: String,
    pub keys: Vec<String>,
    pub identity: Vec<String>,
    pub properties: Vec<ResolvedProperty>,
}

impl ResolvedModel {
    pub fn property(&self, name: &str) -> Option<&ResolvedProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// The SQL builder's view, once every column has a type.
    pub fn table_model(&self) -> Option<TableModel> {
        let columns = self
            .properties
            .iter()
            .map(|p| {
                let mut column = ColumnModel::new(p.name.clone(), p.db_type?);
                column.column = p.column.clone();
                column.size = p.size;
                column.precision = p.precision;
                column.scale = p.scale;
                column.nullable = p.nullable;
                column.default_sql = p.default_sql.clone();
                Some(column)
            })
            .collect::<Option<Vec<_>>>()?;
        Some(TableModel {
            dialect: self.dialect,
            schema: self.schema.clone(),
            name: self.table.clone(),
            columns,
            keys: self.keys.clone(),
            identity: self.identity.clone(),
        })
    }
}

pub fn resolve(
    model: &ModelDecl,
    semantics: &[SemanticType],
    parsed: &ParsedProfile,
    dialect: Dialect,
) -> ResolvedModel {
    let keys = if parsed.keys.is_empty() {
        model
            .properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case("id"))
            .map(|p| vec![p.name.clone()])
            .unwrap_or_default()
    } else {
        parsed.keys.clone()
    };

    let properties = model
        .properties
        .iter()
        .zip(semantics)
        .map(|(property, semantic)| {
            let config = parsed.properties.get(&property.name).cloned().unwrap_or_default();
            let is_key = keys.contains(&property.name);
            ResolvedProperty {
                name: property.name.clone(),
                semantic: semantic.clone(),
                column: config.column.unwrap_or_else(|| property.name.clone()),
                db_type: config.db_type.or_else(|| semantic.default_db_type(dialect)),
                explicit_type: config.db_type.is_some(),
                size: config.size,
                precision: config.precision,
                scale: config.scale,
                nullable: !is_key && config.nullable.unwrap_or(property.optional),
                default_sql: config.default_sql,
                declared_at: property.location.clone(),
                configured_at: config.location.unwrap_or_else(|| property.location.clone()),
            }
        })
        .collect();

    ResolvedModel {
        dialect,
        schema: parsed
            .schema
            .clone()
            .unwrap_or_else(|| dialect.default_schema().to_owned()),
        table: parsed.table.clone().unwrap_or_else(|| pluralize(&model.name)),
        keys,
        identity: parsed.identity.clone(),
        properties,
    }
}
