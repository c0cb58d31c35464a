use std::fmt;

use crate::dialect::Dialect;

/// Declared length of a character or binary column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnSize {
    Len(u32),
    Max,
}

/// Broad category of a dialect type, used by validation and by drivers that
/// need a typed NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    Boolean,
    Integer,
    Float,
    Decimal,
    Text,
    Binary,
    Temporal,
    Uuid,
}

/// SQL Server column types a profile may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlServerType {
    Bit,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Real,
    Float,
    Decimal,
    Numeric,
    Char,
    VarChar,
    NChar,
    NVarChar,
    Binary,
    VarBinary,
    Date,
    Time,
    DateTime2,
    DateTimeOffset,
    UniqueIdentifier,
}

/// PostgreSQL column types a profile may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostgresType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    DoublePrecision,
    Numeric,
    Char,
    VarChar,
    Text,
    Bytea,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
}

/// A dialect type reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbType {
    SqlServer(SqlServerType),
    Postgres(PostgresType),
}

macro_rules! variant_names {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $ty {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            /// The variant's identifier as written in source.
            pub fn variant_name(self) -> &'static str {
                match self {
                    $($ty::$variant => stringify!($variant)),+
                }
            }

            /// Looks a variant up by its identifier.
            pub fn from_variant_name(name: &str) -> Option<Self> {
                match name {
                    $(stringify!($variant) => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

variant_names!(SqlServerType {
    Bit, TinyInt, SmallInt, Int, BigInt, Real, Float, Decimal, Numeric, Char, VarChar, NChar,
    NVarChar, Binary, VarBinary, Date, Time, DateTime2, DateTimeOffset, UniqueIdentifier,
});

variant_names!(PostgresType {
    Boolean, SmallInt, Integer, BigInt, Real, DoublePrecision, Numeric, Char, VarChar, Text,
    Bytea, Date, Time, Timestamp, TimestampTz, Uuid,
});

impl SqlServerType {
    fn keyword(self) -> &'static str {
        match self {
            Self::Bit => "BIT",
            Self::TinyInt => "TINYINT",
            Self::SmallInt => "SMALLINT",
            Self::Int => "INT",
            Self::BigInt => "BIGINT",
            Self::Real => "REAL",
            Self::Float => "FLOAT",
            Self::Decimal => "DECIMAL",
            Self::Numeric => "NUMERIC",
            Self::Char => "CHAR",
            Self::VarChar => "VARCHAR",
            Self::NChar => "NCHAR",
            Self::NVarChar => "NVARCHAR",
            Self::Binary => "BINARY",
            Self::VarBinary => "VARBINARY",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::DateTime2 => "DATETIME2",
            Self::DateTimeOffset => "DATETIMEOFFSET",
            Self::UniqueIdentifier => "UNIQUEIDENTIFIER",
        }
    }

    fn family(self) -> TypeFamily {
        match self {
            Self::Bit => TypeFamily::Boolean,
            Self::TinyInt | Self::SmallInt | Self::Int | Self::BigInt => TypeFamily::Integer,
            Self::Real | Self::Float => TypeFamily::Float,
            Self::Decimal | Self::Numeric => TypeFamily::Decimal,
            Self::Char | Self::VarChar | Self::NChar | Self::NVarChar => TypeFamily::Text,
            Self::Binary | Self::VarBinary => TypeFamily::Binary,
            Self::Date | Self::Time | Self::DateTime2 | Self::DateTimeOffset => {
                TypeFamily::Temporal
            }
            Self::UniqueIdentifier => TypeFamily::Uuid,
        }
    }
}

impl PostgresType {
    fn keyword(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::SmallInt => "SMALLINT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Real => "REAL",
            Self::DoublePrecision => "DOUBLE PRECISION",
            Self::Numeric => "NUMERIC",
            Self::Char => "CHAR",
            Self::VarChar => "VARCHAR",
            Self::Text => "TEXT",
            Self::Bytea => "BYTEA",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
            Self::TimestampTz => "TIMESTAMPTZ",
            Self::Uuid => "UUID",
        }
    }

    fn family(self) -> TypeFamily {
        match self {
            Self::Boolean => TypeFamily::Boolean,
            Self::SmallInt | Self::Integer | Self::BigInt => TypeFamily::Integer,
            Self::Real | Self::DoublePrecision => TypeFamily::Float,
            Self::Numeric => TypeFamily::Decimal,
            Self::Char | Self::VarChar | Self::Text => TypeFamily::Text,
            Self::Bytea => TypeFamily::Binary,
            Self::Date | Self::Time | Self::Timestamp | Self::TimestampTz => TypeFamily::Temporal,
            Self::Uuid => TypeFamily::Uuid,
        }
    }
}

impl DbType {
    pub fn dialect(self) -> Dialect {
        match self {
            DbType::SqlServer(_) => Dialect::SqlServer,
            DbType::Postgres(_) => Dialect::Postgres,
        }
    }

    pub fn family(self) -> TypeFamily {
        match self {
            DbType::SqlServer(t) => t.family(),
            DbType::Postgres(t) => t.family(),
        }
    }

    /// Name of the enum that holds this type's variants.
    pub fn enum_name(self) -> &'static str {
        match self {
            DbType::SqlServer(_) => "SqlServerType",
            DbType::Postgres(_) => "PostgresType",
        }
    }

    pub fn variant_name(self) -> &'static str {
        match self {
            DbType::SqlServer(t) => t.variant_name(),
            DbType::Postgres(t) => t.variant_name(),
        }
    }

    /// Resolves `<EnumName>::<Variant>` into a type reference.
    pub fn from_path(enum_name: &str, variant: &str) -> Option<Self> {
        match enum_name {
            "SqlServerType" => SqlServerType::from_variant_name(variant).map(DbType::SqlServer),
            "PostgresType" => PostgresType::from_variant_name(variant).map(DbType::Postgres),
            _ => None,
        }
    }

    /// Whether a column of this type needs a declared length.
    pub fn takes_size(self) -> bool {
        matches!(
            self,
            DbType::SqlServer(
                SqlServerType::Char
                    | SqlServerType::VarChar
                    | SqlServerType::NChar
                    | SqlServerType::NVarChar
                    | SqlServerType::Binary
                    | SqlServerType::VarBinary
            ) | DbType::Postgres(PostgresType::Char | PostgresType::VarChar)
        )
    }

    /// Whether a column of this type needs precision and scale.
    pub fn takes_precision(self) -> bool {
        self.family() == TypeFamily::Decimal
    }

    /// Renders the literal column type, e.g. `NVARCHAR(100)` or `NUMERIC(18,2)`.
    pub fn render(self, size: Option<ColumnSize>, precision: Option<u8>, scale: Option<u8>) -> String {
        let keyword = match self {
            DbType::SqlServer(t) => t.keyword(),
            DbType::Postgres(t) => t.keyword(),
        };
        if self.takes_size() {
            return match (self, size) {
                (_, Some(ColumnSize::Len(n))) => format!("{}({})", keyword, n),
                (DbType::SqlServer(_), Some(ColumnSize::Max)) => format!("{}(MAX)", keyword),
                _ => keyword.to_owned(),
            };
        }
        if self.takes_precision() {
            return match (precision, scale) {
                (Some(p), Some(s)) => format!("{}({},{})", keyword, p, s),
                (Some(p), None) => format!("{}({})", keyword, p),
                _ => keyword.to_owned(),
            };
        }
        keyword.to_owned()
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.enum_name(), self.variant_name())
    }
}

impl From<SqlServerType> for DbType {
    fn from(value: SqlServerType) -> Self {
        DbType::SqlServer(value)
    }
}

impl From<PostgresType> for DbType {
    fn from(value: PostgresType) -> Self {
        DbType::Postgres(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_sized_types() {
        let t = DbType::SqlServer(SqlServerType::NVarChar);
        assert_eq!(t.render(Some(ColumnSize::Len(100)), None, None), "NVARCHAR(100)");
        assert_eq!(t.render(Some(ColumnSize::Max), None, None), "NVARCHAR(MAX)");
        let pg = DbType::Postgres(PostgresType::VarChar);
        assert_eq!(pg.render(Some(ColumnSize::Max), None, None), "VARCHAR");
    }

    #[test]
    fn render_decimal_types() {
        let t = DbType::Postgres(PostgresType::Numeric);
        assert_eq!(t.render(None, Some(18), Some(2)), "NUMERIC(18,2)");
        assert_eq!(DbType::SqlServer(SqlServerType::Int).render(None, Some(3), None), "INT");
    }

    #[test]
    fn from_path_resolves_variants() {
        assert_eq!(
            DbType::from_path("SqlServerType", "NVarChar"),
            Some(DbType::SqlServer(SqlServerType::NVarChar))
        );
        assert_eq!(DbType::from_path("PostgresType", "NVarChar"), None);
        assert_eq!(DbType::from_path("Other", "Text"), None);
    }

    #[test]
    fn families() {
        assert_eq!(DbType::Postgres(PostgresType::Text).family(), TypeFamily::Text);
        assert!(!DbType::Postgres(PostgresType::Text).takes_size());
        assert!(DbType::SqlServer(SqlServerType::VarBinary).takes_size());
        assert_eq!(SqlServerType::ALL.len(), 20);
    }
}
