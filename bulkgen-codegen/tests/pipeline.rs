use std::fs;
use std::path::Path;

use bulkgen_codegen::{
    Builder, CodegenError, DiagnosticKind, GENERATED_HEADER, Generator, GeneratorConfig, OUTPUT_FILE,
};
use bulkgen_core::Dialect;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

const MODELS: &str = r#"
use bulkgen::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
pub enum Status {
    Open = 1,
    Closed = 2,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: i64,
    pub reference: String,
    pub status: Status,
    pub total: rust_decimal::Decimal,
    pub note: Option<String>,
}

impl DomainModel for Order {}
impl BulkModel for Order {}

#[derive(Debug, Clone)]
pub struct OrderTotals {
    pub status: Status,
    pub total: rust_decimal::Decimal,
}

impl ResultModel for OrderTotals {}
"#;

const PROFILES: &str = r#"
use bulkgen::prelude::*;
use crate::models::Order;

const REFERENCE_LEN: u32 = 40;

pub struct OrderSqlServer;

impl SqlServerProfile<Order> for OrderSqlServer {
    fn configure(map: &mut ProfileBuilder<Order, SqlServer>) {
        map.schema("sales").table("Orders");
        map.rule_for(|m| &m.reference).column("Ref").nvarchar(REFERENCE_LEN);
        map.rule_for(|m| &m.total).decimal(18, 2);
        map.rule_for(|m| &m.note).nvarchar_max();
    }
}

pub struct OrderPostgres;

impl PostgresProfile<Order> for OrderPostgres {
    fn configure(map: &mut ProfileBuilder<Order, Postgres>) {
        map.rule_for(|m| &m.reference).varchar(REFERENCE_LEN);
        map.rule_for(|m| &m.total).numeric(18, 2);
        map.rule_for(|m| &m.note).text();
    }
}
"#;

fn crate_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/lib.rs", "pub mod models;\npub mod profiles;\n");
    write(dir.path(), "src/models.rs", MODELS);
    write(dir.path(), "src/profiles.rs", PROFILES);
    dir
}

#[test]
fn generates_both_dialects_from_a_crate() {
    let dir = crate_dir();
    let generation = Generator::default().generate_dir(&dir.path().join("src")).unwrap();
    assert!(generation.diagnostics.is_empty(), "{:?}", generation.diagnostics);

    let sql_server = generation.sql_for("Order", Dialect::SqlServer).unwrap();
    assert_eq!(sql_server.table, "[sales].[Orders]");
    assert!(sql_server.create.contains("[Ref] NVARCHAR(40) NOT NULL"));
    assert!(sql_server.create.contains("[status] TINYINT NOT NULL"));
    assert!(sql_server.create.contains("[note] NVARCHAR(MAX) NULL"));
    assert!(sql_server.select.contains("[Ref] AS [reference]"));
    assert!(sql_server.upsert.as_deref().is_some_and(|s| s.starts_with("MERGE")));

    let postgres = generation.sql_for("Order", Dialect::Postgres).unwrap();
    assert_eq!(postgres.table, "\"public\".\"Orders\"");
    assert!(postgres.create.contains("\"status\" SMALLINT NOT NULL"));
    assert!(postgres.create.contains("\"total\" NUMERIC(18,2) NOT NULL"));
    assert!(postgres.create.contains("\"note\" TEXT NULL"));

    let code = &generation.code;
    assert!(code.starts_with(GENERATED_HEADER));
    assert!(code.contains("pub mod order_sql_server"));
    assert!(code.contains("pub mod order_postgres"));
    assert!(code.contains("impl :: bulkgen :: BulkEntity < :: bulkgen :: Postgres > for crate :: models :: Order"));
    assert!(code.contains("impl :: bulkgen :: FromRow for crate :: models :: OrderTotals"));
    assert!(code.contains("__bulkgen_decode_models_status"));
    syn::parse_file(code).unwrap();
}

#[test]
fn each_missing_setting_is_one_diagnostic_and_blocks_only_that_dialect() {
    let dir = crate_dir();
    write(
        dir.path(),
        "src/profiles.rs",
        &PROFILES.replace("map.rule_for(|m| &m.note).text();", ""),
    );
    let generation = Generator::default().generate_dir(&dir.path().join("src")).unwrap();

    assert_eq!(generation.error_count(), 1);
    let diagnostic = &generation.diagnostics[0];
    assert_eq!(diagnostic.kind, DiagnosticKind::MissingConfiguration);
    assert_eq!(diagnostic.property.as_deref(), Some("note"));
    assert_eq!(diagnostic.dialect, Some(Dialect::Postgres));
    assert!(diagnostic.location.file.ends_with("models.rs"));
    assert!(diagnostic.to_string().starts_with("error[BG0004]"));

    assert!(generation.sql_for("Order", Dialect::SqlServer).is_some());
    assert!(generation.sql_for("Order", Dialect::Postgres).is_none());
    assert!(!generation.code.contains("order_postgres"));
}

#[test]
fn non_constant_argument_is_reported_at_the_argument() {
    let dir = crate_dir();
    write(
        dir.path(),
        "src/profiles.rs",
        &PROFILES.replace(".nvarchar(REFERENCE_LEN)", ".nvarchar(reference_len())"),
    );
    let generation = Generator::default().generate_dir(&dir.path().join("src")).unwrap();
    let kinds: Vec<_> = generation.diagnostics.iter().map(|d| d.kind).collect();
    assert!(kinds.contains(&DiagnosticKind::NonConstantArg));
    assert!(kinds.contains(&DiagnosticKind::MissingConfiguration));
    assert!(generation.sql_for("Order", Dialect::SqlServer).is_none());
}

#[test]
fn default_profiles_when_profiles_are_optional() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/lib.rs",
        "pub struct Tag { pub id: uuid::Uuid, pub weight: i32 }\nimpl DomainModel for Tag {}\n",
    );
    let generator = Generator::new(GeneratorConfig {
        require_profile: false,
        default_dialects: vec![Dialect::Postgres],
    });
    let generation = generator.generate_dir(&dir.path().join("src")).unwrap();
    assert!(generation.diagnostics.is_empty(), "{:?}", generation.diagnostics);
    let sql = generation.sql_for("Tag", Dialect::Postgres).unwrap();
    assert!(sql.create.contains("DEFAULT gen_random_uuid()"));

    let strict = Generator::default().generate_dir(&dir.path().join("src")).unwrap();
    assert_eq!(strict.diagnostics[0].kind, DiagnosticKind::MissingProfile);
    assert!(strict.models.is_empty());
}

#[test]
fn builder_writes_output_and_honours_deny_errors() {
    let dir = crate_dir();
    let out = dir.path().join("out").join(OUTPUT_FILE);
    let generation = Builder::new()
        .src_dir(dir.path().join("src"))
        .out_file(&out)
        .deny_errors(true)
        .run()
        .unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap(), generation.code);

    write(dir.path(), "src/broken_model.rs", "pub struct Blob { pub id: i32, pub data: Vec<u8> }\nimpl DomainModel for Blob {}\n");
    let err = Builder::new()
        .src_dir(dir.path().join("src"))
        .out_file(&out)
        .deny_errors(true)
        .run()
        .unwrap_err();
    assert!(matches!(err, CodegenError::Diagnostics(1)));
}
