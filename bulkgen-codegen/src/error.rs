use std::path::PathBuf;

use thiserror::Error;

/// Failures that stop generation outright. Problems with individual models
/// are reported as diagnostics instead.
#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: syn::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("code generation reported {0} error(s)")]
    Diagnostics(usize),
}
