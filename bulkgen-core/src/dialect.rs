use std::fmt;

/// The SQL engines bulkgen emits code for.
///
/// Each dialect owns a static [`DialectSpec`] describing its quoting, placeholder,
/// identity and upsert conventions. Callers select the table with [`Dialect::spec`]
/// instead of dispatching through a trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dialect {
    /// Microsoft SQL Server (primary dialect).
    SqlServer,
    /// PostgreSQL (secondary dialect).
    Postgres,
}

/// How a dialect expresses a single-statement upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStrategy {
    /// `MERGE INTO .. USING (VALUES ..)` with matched / not-matched branches.
    Merge,
    /// `INSERT .. ON CONFLICT (..) DO UPDATE`.
    OnConflict,
}

/// Per-dialect constants and syntax rules.
#[derive(Debug)]
pub struct DialectSpec {
    /// Short lowercase name, used in generated module names.
    pub name: &'static str,
    /// Schema used when a profile does not set one.
    pub default_schema: &'static str,
    /// Maximum number of bound parameters per statement.
    ///
    /// Hard limit on SQL Server; a cost heuristic on PostgreSQL.
    pub parameter_limit: usize,
    /// Maximum row constructors in one `VALUES` list, when the engine has one.
    pub max_values_rows: Option<usize>,
    /// Upsert flavour.
    pub upsert: UpsertStrategy,
    /// Column suffix marking a store-assigned identity.
    pub identity_clause: &'static str,
    /// Default expression for a UUID key literally named `id`.
    pub uuid_default: &'static str,
    /// Column type of the staging table's operation tag.
    pub op_column_type: &'static str,
    open_quote: char,
    close_quote: char,
    named_prefix: &'static str,
    positional_prefix: &'static str,
    named_placeholders: bool,
}

static SQL_SERVER: DialectSpec = DialectSpec {
    name: "sql_server",
    default_schema: "dbo",
    parameter_limit: 2100,
    max_values_rows: Some(1000),
    upsert: UpsertStrategy::Merge,
    identity_clause: "IDENTITY(1,1)",
    uuid_default: "NEWSEQUENTIALID()",
    op_column_type: "TINYINT",
    open_quote: '[',
    close_quote: ']',
    named_prefix: "@",
    positional_prefix: "@p",
    named_placeholders: true,
};

static POSTGRES: DialectSpec = DialectSpec {
    name: "postgres",
    default_schema: "public",
    parameter_limit: 10_000,
    max_values_rows: None,
    upsert: UpsertStrategy::OnConflict,
    identity_clause: "GENERATED BY DEFAULT AS IDENTITY",
    uuid_default: "gen_random_uuid()",
    op_column_type: "SMALLINT",
    open_quote: '"',
    close_quote: '"',
    named_prefix: "$",
    positional_prefix: "$",
    named_placeholders: false,
};

/// Name of the operation-tag column appended to staging tables.
pub const OP_COLUMN: &str = "__op";

impl Dialect {
    /// Every supported dialect, in emission order.
    pub const ALL: [Dialect; 2] = [Dialect::SqlServer, Dialect::Postgres];

    /// Returns the strategy table for this dialect.
    pub fn spec(self) -> &'static DialectSpec {
        match self {
            Dialect::SqlServer => &SQL_SERVER,
            Dialect::Postgres => &POSTGRES,
        }
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn parameter_limit(self) -> usize {
        self.spec().parameter_limit
    }

    /// Rows one multi-row `VALUES` statement may carry at `width` parameters
    /// per row, under both `limit` and the row-constructor cap.
    pub fn batch_rows(self, limit: usize, width: usize) -> usize {
        let rows = crate::entity::rows_per_statement(limit, width);
        match self.spec().max_values_rows {
            Some(max) => rows.min(max),
            None => rows,
        }
    }

    pub fn default_schema(self) -> &'static str {
        self.spec().default_schema
    }

    pub fn upsert_strategy(self) -> UpsertStrategy {
        self.spec().upsert
    }

    /// Quotes an identifier, doubling any embedded closing quote.
    pub fn quote(self, ident: &str) -> String {
        let spec = self.spec();
        let close = spec.close_quote.to_string();
        let escaped = ident.replace(spec.close_quote, &(close.clone() + &close));
        format!("{}{}{}", spec.open_quote, escaped, spec.close_quote)
    }

    /// `schema.table`, both parts quoted.
    pub fn qualified(self, schema: &str, table: &str) -> String {
        format!("{}.{}", self.quote(schema), self.quote(table))
    }

    /// Placeholder for the `n`-th (1-based) positional parameter.
    pub fn placeholder(self, n: usize) -> String {
        format!("{}{}", self.spec().positional_prefix, n)
    }

    /// Parameter name the driver binds for the `n`-th positional parameter.
    pub fn positional_name(self, n: usize) -> String {
        match self {
            Dialect::SqlServer => format!("p{}", n),
            Dialect::Postgres => n.to_string(),
        }
    }

    /// Placeholder for a single-row statement parameter.
    ///
    /// SQL Server binds by name (`@Name`); PostgreSQL only knows positions.
    pub fn named_placeholder(self, name: &str, n: usize) -> String {
        let spec = self.spec();
        if spec.named_placeholders {
            format!("{}{}", spec.named_prefix, name)
        } else {
            self.placeholder(n)
        }
    }

    /// Name of the temporary table used to stage a bulk batch for `table`.
    pub fn staging_table(self, table: &str) -> String {
        match self {
            Dialect::SqlServer => self.quote(&format!("#{}_bulk", table)),
            Dialect::Postgres => self.quote(&format!("{}_bulk", table)),
        }
    }

    /// Parses the dialect names accepted on the command line and in env vars.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "sqlserver" | "mssql" => Some(Dialect::SqlServer),
            "postgres" | "postgresql" | "pg" => Some(Dialect::Postgres),
            _ => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type-level dialect selector used by generated trait implementations.
pub trait DialectMarker: Send + Sync + 'static {
    const DIALECT: Dialect;
}

/// Marker for [`Dialect::SqlServer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServer;

/// Marker for [`Dialect::Postgres`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl DialectMarker for SqlServer {
    const DIALECT: Dialect = Dialect::SqlServer;
}

impl DialectMarker for Postgres {
    const DIALECT: Dialect = Dialect::Postgres;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_closing_quote() {
        assert_eq!(Dialect::SqlServer.quote("a]b"), "[a]]b]");
        assert_eq!(Dialect::Postgres.quote("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn placeholders_follow_dialect() {
        assert_eq!(Dialect::SqlServer.placeholder(3), "@p3");
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::SqlServer.named_placeholder("Name", 3), "@Name");
        assert_eq!(Dialect::Postgres.named_placeholder("Name", 3), "$3");
    }

    #[test]
    fn parameter_limits() {
        assert_eq!(Dialect::SqlServer.parameter_limit(), 2100);
        assert_eq!(Dialect::Postgres.parameter_limit(), 10_000);
    }

    #[test]
    fn batch_rows_respect_the_values_cap() {
        assert_eq!(Dialect::SqlServer.batch_rows(2100, 1), 1000);
        assert_eq!(Dialect::SqlServer.batch_rows(2100, 2), 1000);
        assert_eq!(Dialect::SqlServer.batch_rows(2100, 3), 699);
        assert_eq!(Dialect::Postgres.batch_rows(10_000, 1), 9999);
    }

    #[test]
    fn staging_names() {
        assert_eq!(Dialect::SqlServer.staging_table("Orders"), "[#Orders_bulk]");
        assert_eq!(Dialect::Postgres.staging_table("Orders"), "\"Orders_bulk\"");
    }

    #[test]
    fn from_name_accepts_aliases() {
        assert_eq!(Dialect::from_name("sql-server"), Some(Dialect::SqlServer));
        assert_eq!(Dialect::from_name("MSSQL"), Some(Dialect::SqlServer));
        assert_eq!(Dialect::from_name("pg"), Some(Dialect::Postgres));
        assert_eq!(Dialect::from_name("oracle"), None);
    }
}
