//! Sample sales models wired through `build.rs`.
//!
//! The build script scans this crate, and the generated items land at the
//! crate root: one module per model and dialect (`order_sql_server`,
//! `order_postgres`, ..) plus the `Entity`, `BulkEntity` and `FromRow` impls.

pub mod models;
pub mod profiles;

include!(concat!(env!("OUT_DIR"), "/bulkgen.rs"));
