use std::path::{Path, PathBuf};

use syn::Item;
use walkdir::WalkDir;

use crate::error::CodegenError;
use crate::expr::Expr;
use crate::symbols::SymbolTable;

/// First line of every file the generator writes; such files are never
/// scanned back in.
pub const GENERATED_HEADER: &str = "// @generated by bulkgen";

/// An item together with where it was declared.
#[derive(Debug, Clone)]
pub struct Located<T> {
    pub item: T,
    /// Module path from the crate root, e.g. `["models", "sales"]`.
    pub module: Vec<String>,
    pub file: PathBuf,
}

/// Everything the generator reads from a crate's sources.
#[derive(Debug, Default)]
pub struct SourceSet {
    pub structs: Vec<Located<syn::ItemStruct>>,
    pub enums: Vec<Located<syn::ItemEnum>>,
    pub impls: Vec<Located<syn::ItemImpl>>,
    pub symbols: SymbolTable,
    pub files: Vec<PathBuf>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses every `.rs` file under `src_dir`. A missing directory yields an
    /// empty set.
    pub fn scan(src_dir: &Path) -> Result<Self, CodegenError> {
        let mut set = Self::new();
        if !src_dir.exists() {
            return Ok(set);
        }
        let mut paths: Vec<PathBuf> = WalkDir::new(src_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("rs"))
            .filter(|p| !should_skip_path(p, src_dir))
            .collect();
        paths.sort();

        for path in paths {
            let source = std::fs::read_to_string(&path).map_err(|source| CodegenError::Io {
                path: path.clone(),
                source,
            })?;
            let module = module_path(src_dir, &path);
            set.add_source(&path, module, &source)?;
        }
        tracing::debug!(
            files = set.files.len(),
            structs = set.structs.len(),
            impls = set.impls.len(),
            consts = set.symbols.len(),
            "scanned sources"
        );
        Ok(set)
    }

    /// Adds one file's items. Generated files are skipped.
    pub fn add_source(&mut self, path: &Path, module: Vec<String>, source: &str) -> Result<(), CodegenError> {
        if source.trim_start().starts_with(GENERATED_HEADER) {
            return Ok(());
        }
        let parsed = syn::parse_file(source).map_err(|source| CodegenError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        self.files.push(path.to_path_buf());
        self.collect(&parsed.items, &module, path);
        Ok(())
    }

    fn collect(&mut self, items: &[Item], module: &[String], file: &Path) {
        for item in items {
            match item {
                Item::Struct(item_struct) => self.structs.push(located(item_struct, module, file)),
                Item::Enum(item_enum) => self.enums.push(located(item_enum, module, file)),
                Item::Impl(item_impl) => self.impls.push(located(item_impl, module, file)),
                Item::Const(item_const) => self.symbols.insert(
                    module.to_vec(),
                    item_const.ident.to_string(),
                    Expr::lower(&item_const.expr),
                ),
                Item::Mod(item_mod) => {
                    if let Some((_, items)) = &item_mod.content {
                        let mut inner = module.to_vec();
                        inner.push(item_mod.ident.to_string());
                        self.collect(items, &inner, file);
                    }
                }
                _ => {}
            }
        }
    }
}

fn located<T: Clone>(item: &T, module: &[String], file: &Path) -> Located<T> {
    Located {
        item: item.clone(),
        module: module.to_vec(),
        file: file.to_path_buf(),
    }
}

/// `src/lib.rs` is the root, `src/a/mod.rs` and `src/a.rs` are `a`,
/// `src/a/b.rs` is `a::b`.
pub fn module_path(src_dir: &Path, path: &Path) -> Vec<String> {
    let Ok(rel) = path.strip_prefix(src_dir) else {
        return Vec::new();
    };
    let mut segments: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if let Some(last) = segments.pop() {
        let stem = last.strip_suffix(".rs").unwrap_or(&last);
        let is_root = segments.is_empty() && matches!(stem, "lib" | "main");
        if !is_root && stem != "mod" {
            segments.push(stem.to_owned());
        }
    }
    segments
}

fn should_skip_path(path: &Path, src_dir: &Path) -> bool {
    if let Ok(rel) = path.strip_prefix(src_dir) {
        if let Some(first) = rel.components().next() {
            if first
                .as_os_str()
                .to_string_lossy()
                .eq_ignore_ascii_case("bin")
            {
                return true;
            }
        }
    }
    false
}
