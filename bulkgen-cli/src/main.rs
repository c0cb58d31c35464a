use std::path::PathBuf;

use bulkgen_codegen::{Generation, Generator, GeneratorConfig, OUTPUT_FILE, write_if_changed};
use bulkgen_core::Dialect;
use bulkgen_core::sql::TableSql;
use clap::{ArgAction, Parser, Subcommand};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "bulkgen")]
#[command(about = "bulkgen CLI - diagnostics, generated code and SQL for your models", long_about = None)]
struct Cli {
    /// Source directory to scan
    #[arg(long, global = true, default_value = "src")]
    src: PathBuf,
    /// Give domain models without a profile a default one instead of reporting them
    #[arg(long, global = true)]
    allow_missing_profiles: bool,
    /// Dialect of default profiles (repeatable)
    #[arg(long = "default-dialect", global = true, value_parser = parse_dialect)]
    default_dialects: Vec<Dialect>,
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report generation diagnostics without writing anything
    Check,
    /// Write the generated Rust file
    Generate {
        /// Output path (defaults to ./bulkgen.rs)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Print the generated code instead of writing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Print every generated statement for one model
    Sql {
        #[arg(short, long)]
        model: String,
        /// Limit to one dialect
        #[arg(short, long, value_parser = parse_dialect)]
        dialect: Option<Dialect>,
    },
    /// Create missing PostgreSQL tables for every generated model
    Sync {
        #[arg(short, long)]
        database: Option<String>,
        /// Print what would happen without executing
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_dialect(value: &str) -> Result<Dialect, String> {
    Dialect::from_name(value).ok_or_else(|| format!("unknown dialect `{}` (expected sql_server or postgres)", value))
}

#[tokio::main]
async fn main() -> CliResult {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run_cli(cli).await
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

fn generator_config(cli: &Cli) -> GeneratorConfig {
    let mut config = GeneratorConfig {
        require_profile: !cli.allow_missing_profiles,
        ..GeneratorConfig::default()
    };
    if !cli.default_dialects.is_empty() {
        config.default_dialects = cli.default_dialects.clone();
    }
    config
}

fn generate(cli: &Cli) -> CliResult<Generation> {
    let generator = Generator::new(generator_config(cli));
    Ok(generator.generate_dir(&cli.src)?)
}

async fn run_cli(cli: Cli) -> CliResult {
    match &cli.command {
        Commands::Check => {
            println!(">> Checking models under {}...", cli.src.display());
            let generation = generate(&cli)?;
            print_diagnostics(&generation);
            fail_on_errors(&generation)?;
            println!("[OK] {} model(s) generate cleanly.", generation.models.len());
        }
        Commands::Generate { out, dry_run } => {
            let generation = generate(&cli)?;
            print_diagnostics(&generation);
            if *dry_run {
                println!("{}", generation.code);
                return Ok(());
            }
            let path = out.clone().unwrap_or_else(|| PathBuf::from(OUTPUT_FILE));
            if write_if_changed(&path, &generation.code)? {
                println!("[OK] Generated code written to {}", path.display());
            } else {
                println!("[INFO] {} is up to date.", path.display());
            }
        }
        Commands::Sql { model, dialect } => {
            let generation = generate(&cli)?;
            let mut found = false;
            for generated in generation.models.iter().filter(|m| &m.name == model) {
                if dialect.is_some_and(|d| generated.dialect != Some(d)) {
                    continue;
                }
                let (Some(dialect), Some(sql)) = (generated.dialect, &generated.sql) else {
                    continue;
                };
                found = true;
                println!("-- {} ({})", generated.path, dialect);
                print!("{}", render_sql(sql));
            }
            if !found {
                print_diagnostics(&generation);
                return Err(format!("no generated SQL for model `{}`", model).into());
            }
        }
        Commands::Sync { database, dry_run } => {
            println!(">> Scanning for models...");
            let generation = generate(&cli)?;
            print_diagnostics(&generation);
            let creates = postgres_tables(&generation);
            if creates.is_empty() {
                println!("[WARN] No PostgreSQL models found under {}. Nothing to sync.", cli.src.display());
                return Ok(());
            }
            if *dry_run {
                for (table, create) in &creates {
                    println!("-- {}\n{};", table, create);
                }
                return Ok(());
            }
            let db_url = resolve_db_url(database.clone()).ok_or("no database url: pass --database or set DATABASE_URL")?;
            println!(">> Connecting to {}...", db_url);
            run_sync(&db_url, &creates).await?;
            println!("[OK] Sync completed.");
        }
    }
    Ok(())
}

fn print_diagnostics(generation: &Generation) {
    for diagnostic in &generation.diagnostics {
        println!("{}", diagnostic);
    }
}

fn fail_on_errors(generation: &Generation) -> CliResult {
    match generation.error_count() {
        0 => Ok(()),
        n => Err(format!("code generation reported {} error(s)", n).into()),
    }
}

fn resolve_db_url(database: Option<String>) -> Option<String> {
    database.or_else(|| std::env::var("DATABASE_URL").ok())
}

fn postgres_tables(generation: &Generation) -> Vec<(String, String)> {
    generation
        .models
        .iter()
        .filter(|m| m.dialect == Some(Dialect::Postgres))
        .filter_map(|m| m.sql.as_ref())
        .map(|sql| (sql.table.clone(), sql.create.clone()))
        .collect()
}

fn render_sql(sql: &TableSql) -> String {
    let mut out = String::new();
    let mut section = |label: &str, text: Option<&str>| {
        if let Some(text) = text {
            out.push_str(&format!("-- {}\n{}\n\n", label, text));
        }
    };
    section("create", Some(sql.create.as_str()));
    section("insert", Some(sql.insert.as_str()));
    section("insert batch", Some(sql.insert_batch.as_str()));
    section("update", sql.update.as_deref());
    section("delete", sql.delete.as_deref());
    section("delete batch", sql.delete_batch.as_deref());
    section("upsert", sql.upsert.as_deref());
    section("truncate", Some(sql.truncate.as_str()));
    section("select", Some(sql.select.as_str()));
    section("find", sql.find.as_deref());
    if let Some(staging) = &sql.staging {
        section("staging create", Some(staging.create.as_str()));
        section("staging index", Some(staging.index.as_str()));
        section("staging apply", Some(staging.apply.as_str()));
    }
    out
}

#[cfg(feature = "postgres")]
async fn run_sync(db_url: &str, creates: &[(String, String)]) -> CliResult {
    use bulkgen_core::{Command, Connection as _, ParamSpec, PostgresType};
    use sqlx::Connection as _;

    const TABLE: ParamSpec = ParamSpec::new("table", bulkgen_core::DbType::Postgres(PostgresType::Text));

    let mut pg = sqlx::PgConnection::connect(db_url).await?;
    let conn: &mut dyn bulkgen_core::Connection = &mut pg;
    for (table, create) in creates {
        let probe = Command::new("SELECT to_regclass($1)::text AS \"name\"").bind(TABLE.bind(table.as_str()));
        let rows = conn.fetch_all(probe).await?;
        let exists = match rows.first() {
            Some(row) => row.get::<Option<String>>("name")?.is_some(),
            None => false,
        };
        if exists {
            println!("[INFO] {} already exists.", table);
            continue;
        }
        conn.execute(Command::new(create.clone())).await?;
        println!("[OK] Created {}", table);
    }
    Ok(())
}

#[cfg(not(feature = "postgres"))]
async fn run_sync(_db_url: &str, _creates: &[(String, String)]) -> CliResult {
    Err("sync needs the `postgres` feature".into())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const SAMPLE: &str = r#"
use bulkgen::prelude::*;

pub struct Order {
    pub id: i32,
    pub reference: String,
}

impl DomainModel for Order {}

pub struct OrderProfile;

impl PostgresProfile<Order> for OrderProfile {
    fn configure(map: &mut ProfileBuilder<Order, Postgres>) {
        map.rule_for(|m| &m.reference).varchar(40);
    }
}
"#;

    fn sample_src(root: &Path, source: &str) -> PathBuf {
        let src = root.join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("lib.rs"), source).unwrap();
        src
    }

    fn cli(src: &Path, command: Commands) -> Cli {
        Cli {
            src: src.to_path_buf(),
            allow_missing_profiles: false,
            default_dialects: Vec::new(),
            verbose: 0,
            command,
        }
    }

    #[test]
    fn cli_parses_check_with_globals() {
        let cli = Cli::try_parse_from(["bulkgen", "check", "--src", "app/src", "-vv"]).unwrap();
        assert!(matches!(cli.command, Commands::Check));
        assert_eq!(cli.src, PathBuf::from("app/src"));
        assert_eq!(cli.verbose, 2);
        assert!(!cli.allow_missing_profiles);
    }

    #[test]
    fn cli_parses_generate() {
        let cli = Cli::try_parse_from(["bulkgen", "generate", "--out", "gen.rs", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Generate { out, dry_run } => {
                assert_eq!(out, Some(PathBuf::from("gen.rs")));
                assert!(dry_run);
            }
            _ => panic!("expected generate command"),
        }
        assert_eq!(cli.src, PathBuf::from("src"));
    }

    #[test]
    fn cli_parses_sql_dialect_aliases() {
        let cli = Cli::try_parse_from(["bulkgen", "sql", "--model", "Order", "--dialect", "pg"]).unwrap();
        match cli.command {
            Commands::Sql { model, dialect } => {
                assert_eq!(model, "Order");
                assert_eq!(dialect, Some(Dialect::Postgres));
            }
            _ => panic!("expected sql command"),
        }
        assert!(Cli::try_parse_from(["bulkgen", "sql", "--model", "Order", "--dialect", "oracle"]).is_err());
    }

    #[test]
    fn cli_parses_default_dialects() {
        let cli = Cli::try_parse_from([
            "bulkgen",
            "check",
            "--allow-missing-profiles",
            "--default-dialect",
            "postgres",
            "--default-dialect",
            "mssql",
        ])
        .unwrap();
        let config = generator_config(&cli);
        assert!(!config.require_profile);
        assert_eq!(config.default_dialects, vec![Dialect::Postgres, Dialect::SqlServer]);
    }

    #[test]
    fn cli_parses_sync() {
        let cli = Cli::try_parse_from(["bulkgen", "sync", "--database", "postgres://localhost/app"]).unwrap();
        match cli.command {
            Commands::Sync { database, dry_run } => {
                assert_eq!(database.as_deref(), Some("postgres://localhost/app"));
                assert!(!dry_run);
            }
            _ => panic!("expected sync command"),
        }
    }

    #[test]
    fn cli_parse_requires_subcommand() {
        assert!(Cli::try_parse_from(["bulkgen"]).is_err());
    }

    #[test]
    fn resolve_db_url_prefers_cli_value() {
        let _lock = ENV_LOCK.lock().unwrap();
        assert_eq!(
            resolve_db_url(Some("postgres://cli".to_owned())).as_deref(),
            Some("postgres://cli")
        );
    }

    #[test]
    fn resolve_db_url_falls_back_to_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("DATABASE_URL", "postgres://env");
        }
        assert_eq!(resolve_db_url(None).as_deref(), Some("postgres://env"));
        unsafe {
            std::env::remove_var("DATABASE_URL");
        }
        assert_eq!(resolve_db_url(None), None);
    }

    #[test]
    fn render_sql_lists_present_statements() {
        let dir = tempfile::tempdir().unwrap();
        let src = sample_src(dir.path(), SAMPLE);
        let generation = generate(&cli(&src, Commands::Check)).unwrap();
        let sql = generation.sql_for("Order", Dialect::Postgres).unwrap();
        let text = render_sql(sql);
        assert!(text.contains("-- create\nCREATE TABLE \"public\".\"Orders\""));
        assert!(text.contains("-- upsert\nINSERT INTO"));
        assert!(text.contains("-- staging create\n") == sql.staging.is_some());
    }

    #[tokio::test]
    async fn cli_run_check_ok_and_failing() {
        let dir = tempfile::tempdir().unwrap();
        let src = sample_src(dir.path(), SAMPLE);
        run_cli(cli(&src, Commands::Check)).await.unwrap();

        let broken = SAMPLE.replace("map.rule_for(|m| &m.reference).varchar(40);", "");
        let src = sample_src(dir.path(), &broken);
        let err = run_cli(cli(&src, Commands::Check)).await.unwrap_err();
        assert!(err.to_string().contains("1 error(s)"));
    }

    #[tokio::test]
    async fn cli_run_generate_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = sample_src(dir.path(), SAMPLE);
        let out = dir.path().join("gen").join(OUTPUT_FILE);
        run_cli(cli(
            &src,
            Commands::Generate {
                out: Some(out.clone()),
                dry_run: false,
            },
        ))
        .await
        .unwrap();
        let code = fs::read_to_string(&out).unwrap();
        assert!(code.contains("order_postgres"));
    }

    #[tokio::test]
    async fn cli_run_sql_unknown_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let src = sample_src(dir.path(), SAMPLE);
        run_cli(cli(
            &src,
            Commands::Sql {
                model: "Order".into(),
                dialect: Some(Dialect::Postgres),
            },
        ))
        .await
        .unwrap();
        let err = run_cli(cli(
            &src,
            Commands::Sql {
                model: "Invoice".into(),
                dialect: None,
            },
        ))
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Invoice"));
    }

    #[tokio::test]
    async fn cli_run_sync_dry_run_needs_no_database() {
        let dir = tempfile::tempdir().unwrap();
        let src = sample_src(dir.path(), SAMPLE);
        run_cli(cli(
            &src,
            Commands::Sync {
                database: None,
                dry_run: true,
            },
        ))
        .await
        .unwrap();
        assert_eq!(postgres_tables(&generate(&cli(&src, Commands::Check)).unwrap()).len(), 1);
    }
}
