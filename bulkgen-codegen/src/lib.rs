//! Build-time generator for bulkgen.
//!
//! The pipeline reads a crate's sources with `syn`, finds models and their
//! dialect profiles, folds each profile's configuration chains into column
//! settings, validates them, and renders one Rust file of SQL constants,
//! parameter factories and trait impls.
//!
//! ```no_run
//! // build.rs
//! fn main() {
//!     bulkgen_codegen::Builder::new().run().unwrap();
//! }
//! ```

use std::path::{Path, PathBuf};

use bulkgen_core::Dialect;
use bulkgen_core::sql::TableSql;

pub mod diagnostic;
pub mod discovery;
pub mod emit;
mod error;
pub mod expr;
pub mod parser;
pub mod resolve;
pub mod scan;
pub mod symbols;
pub mod validate;

pub use diagnostic::{Diagnostic, DiagnosticKind, Location, Severity};
pub use discovery::Capability;
pub use error::CodegenError;
pub use scan::{GENERATED_HEADER, SourceSet};

use discovery::discover;
use emit::{DialectTable, ModelUnit};
use parser::parse_profile;
use resolve::{classify_model, resolve};
use validate::validate;

/// Name of the file the build driver writes under `OUT_DIR`.
pub const OUTPUT_FILE: &str = "bulkgen.rs";

/// Generator policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Report `MissingProfile` for domain models without a profile. When
    /// off, such models get a default profile per `default_dialects`.
    pub require_profile: bool,
    pub default_dialects: Vec<Dialect>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            require_profile: true,
            default_dialects: vec![Dialect::SqlServer],
        }
    }
}

/// One model (and dialect, for table-backed models) that produced code.
#[derive(Debug, Clone)]
pub struct GeneratedModel {
    pub name: String,
    /// `crate::..::Name`.
    pub path: String,
    pub capability: Capability,
    /// `None` for result-only models.
    pub dialect: Option<Dialect>,
    pub sql: Option<TableSql>,
}

/// Output of one generator run.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub code: String,
    /// Sorted by file, position and code.
    pub diagnostics: Vec<Diagnostic>,
    pub models: Vec<GeneratedModel>,
}

impl Generation {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_error())
    }

    /// Generated SQL for `model` in `dialect`, if it was emitted.
    pub fn sql_for(&self, model: &str, dialect: Dialect) -> Option<&TableSql> {
        self.models
            .iter()
            .find(|m| m.name == model && m.dialect == Some(dialect))
            .and_then(|m| m.sql.as_ref())
    }
}

/// Runs the generation pipeline over a set of parsed sources.
#[derive(Debug, Clone, Default)]
pub struct Generator {
    config: GeneratorConfig,
}

impl Generator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Scans `src_dir` and generates code for it.
    pub fn generate_dir(&self, src_dir: &Path) -> Result<Generation, CodegenError> {
        let sources = SourceSet::scan(src_dir)?;
        Ok(self.generate(&sources))
    }

    /// Pure over `sources`: the same input always yields the same output.
    pub fn generate(&self, sources: &SourceSet) -> Generation {
        let discovery = discover(sources, &self.config);
        tracing::debug!(
            models = discovery.models.len(),
            enums = discovery.enums.len(),
            "discovered models"
        );

        let mut diagnostics = discovery.diagnostics;
        let mut analysed = Vec::new();
        for discovered in &discovery.models {
            let model = &discovered.model;
            let (semantics, unsupported) = classify_model(model, &discovery.enums);
            diagnostics.extend(unsupported);
            let Some(semantics) = semantics.into_iter().collect::<Option<Vec<_>>>() else {
                continue;
            };

            let mut resolved = Vec::new();
            if model.capability.has_table() {
                for profile in &discovered.profiles {
                    let parsed = parse_profile(model, profile, &sources.symbols);
                    let table = resolve(model, &semantics, &parsed, profile.dialect);
                    diagnostics.extend(parsed.diagnostics);
                    diagnostics.extend(validate(model, &table));
                    resolved.push(table);
                }
            }
            analysed.push((model, semantics, resolved));
        }

        let mut units = Vec::new();
        let mut models = Vec::new();
        for (model, semantics, resolved) in analysed {
            if !model.capability.has_table() {
                models.push(GeneratedModel {
                    name: model.name.clone(),
                    path: model.path(),
                    capability: model.capability,
                    dialect: None,
                    sql: None,
                });
                units.push(ModelUnit {
                    model,
                    semantics,
                    tables: Vec::new(),
                });
                continue;
            }

            let mut tables = Vec::new();
            for table in resolved {
                if diagnostics.iter().any(|d| d.blocks(&model.name, table.dialect)) {
                    tracing::debug!(model = %model.name, dialect = %table.dialect, "skipping blocked model");
                    continue;
                }
                let Some(table) = table.table_model() else {
                    continue;
                };
                let sql = table.statements();
                models.push(GeneratedModel {
                    name: model.name.clone(),
                    path: model.path(),
                    capability: model.capability,
                    dialect: Some(table.dialect),
                    sql: Some(sql.clone()),
                });
                tables.push(DialectTable { table, sql });
            }
            if !tables.is_empty() {
                units.push(ModelUnit {
                    model,
                    semantics,
                    tables,
                });
            }
        }

        diagnostic::sort(&mut diagnostics);
        let code = emit::render(&units);
        tracing::info!(
            models = models.len(),
            diagnostics = diagnostics.len(),
            "generation finished"
        );
        Generation {
            code,
            diagnostics,
            models,
        }
    }
}

/// Writes `contents` to `path` unless the file already holds exactly that.
/// Returns whether the file was written.
pub fn write_if_changed(path: &Path, contents: &str) -> Result<bool, CodegenError> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        if existing == contents {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| CodegenError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, contents).map_err(|source| CodegenError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}

/// Build-script driver: scans `src/`, writes `$OUT_DIR/bulkgen.rs` and
/// reports diagnostics as cargo warnings.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    config: GeneratorConfig,
    src_dir: Option<PathBuf>,
    out_file: Option<PathBuf>,
    deny_errors: bool,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_profile(mut self, require: bool) -> Self {
        self.config.require_profile = require;
        self
    }

    pub fn default_dialects(mut self, dialects: impl IntoIterator<Item = Dialect>) -> Self {
        self.config.default_dialects = dialects.into_iter().collect();
        self
    }

    /// Defaults to `$CARGO_MANIFEST_DIR/src`.
    pub fn src_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.src_dir = Some(dir.into());
        self
    }

    /// Defaults to `$OUT_DIR/bulkgen.rs`.
    pub fn out_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.out_file = Some(file.into());
        self
    }

    /// Fail the build when any error diagnostic is reported.
    pub fn deny_errors(mut self, deny: bool) -> Self {
        self.deny_errors = deny;
        self
    }

    pub fn run(self) -> Result<Generation, CodegenError> {
        let src_dir = match self.src_dir {
            Some(dir) => dir,
            None => manifest_dir()?.join("src"),
        };
        let out_file = match self.out_file {
            Some(file) => file,
            None => PathBuf::from(env_var("OUT_DIR")?).join(OUTPUT_FILE),
        };

        let sources = SourceSet::scan(&src_dir)?;
        println!("cargo:rerun-if-changed={}", src_dir.display());
        for file in &sources.files {
            println!("cargo:rerun-if-changed={}", file.display());
        }

        let generation = Generator::new(self.config).generate(&sources);
        for diagnostic in &generation.diagnostics {
            println!(
                "cargo:warning={}[{}]: {} ({})",
                diagnostic.severity,
                diagnostic.kind.code(),
                diagnostic.message,
                diagnostic.location
            );
        }

        let written = write_if_changed(&out_file, &generation.code)?;
        tracing::debug!(path = %out_file.display(), written, "generated file");

        if self.deny_errors && generation.has_errors() {
            return Err(CodegenError::Diagnostics(generation.error_count()));
        }
        Ok(generation)
    }
}

fn env_var(name: &'static str) -> Result<String, CodegenError> {
    std::env::var(name).map_err(|_| CodegenError::MissingEnv(name))
}

fn manifest_dir() -> Result<PathBuf, CodegenError> {
    env_var("CARGO_MANIFEST_DIR").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(source: &str) -> Generation {
        let mut set = SourceSet::new();
        set.add_source(Path::new("src/lib.rs"), Vec::new(), source).unwrap();
        Generator::default().generate(&set)
    }

    const ORDER: &str = r#"
        pub struct Order {
            pub id: i32,
            pub name: String,
            pub total: Decimal,
        }
        impl BulkModel for Order {}
        struct OrderProfile;
        impl SqlServerProfile<Order> for OrderProfile {
            fn configure(map: &mut ProfileBuilder<Order, SqlServer>) {
                map.rule_for(|m| &m.name).nvarchar(100);
                map.rule_for(|m| &m.total).decimal(18, 2);
            }
        }
    "#;

    #[test]
    fn valid_model_produces_sql_and_impls() {
        let generation = generate(ORDER);
        assert!(generation.diagnostics.is_empty(), "{:?}", generation.diagnostics);
        assert!(generation.code.starts_with(GENERATED_HEADER));
        assert!(generation.code.contains("pub mod order_sql_server"));
        assert!(generation.code.contains("BulkEntity"));
        assert!(generation.code.contains("FromRow"));
        let sql = generation.sql_for("Order", Dialect::SqlServer).unwrap();
        assert!(sql.create.contains("[name] NVARCHAR(100) NOT NULL"));
        assert!(sql.create.contains("DECIMAL(18,2)"));
        assert!(generation.sql_for("Order", Dialect::Postgres).is_none());
    }

    #[test]
    fn errors_suppress_emission_for_that_model_only() {
        let source = format!(
            "{}{}",
            ORDER,
            r#"
            pub struct Customer { pub id: i32, pub name: String }
            impl DomainModel for Customer {}
            struct CustomerProfile;
            impl SqlServerProfile<Customer> for CustomerProfile {
                fn configure(map: &mut ProfileBuilder<Customer, SqlServer>) {}
            }
            "#
        );
        let generation = generate(&source);
        assert_eq!(generation.error_count(), 1);
        assert_eq!(generation.diagnostics[0].model, "Customer");
        assert!(!generation.code.contains("Customer"));
        assert!(generation.code.contains("order_sql_server"));
    }

    #[test]
    fn result_models_only_get_row_mapping() {
        let generation = generate(
            r#"
            pub struct Summary { pub name: String, pub total: i64 }
            impl ResultModel for Summary {}
            "#,
        );
        assert!(generation.diagnostics.is_empty());
        assert!(generation.code.contains("FromRow for crate :: Summary"));
        assert!(!generation.code.contains("Entity <"));
        assert_eq!(generation.models[0].dialect, None);
    }

    #[test]
    fn output_is_deterministic_and_parses() {
        let first = generate(ORDER);
        let second = generate(ORDER);
        assert_eq!(first.code, second.code);
        syn::parse_file(&first.code).unwrap();
    }

    #[test]
    fn write_if_changed_skips_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(OUTPUT_FILE);
        assert!(write_if_changed(&path, "a").unwrap());
        assert!(!write_if_changed(&path, "a").unwrap());
        assert!(write_if_changed(&path, "b").unwrap());
    }
}
