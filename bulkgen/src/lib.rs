//! # bulkgen
//!
//! Dialect-tuned data access code generated at build time, plus staging-table
//! bulk synchronization for SQL Server and PostgreSQL.
//!
//! Models are plain structs that implement a capability marker. Profiles say
//! how each property is stored in a dialect. A build script turns both into
//! SQL constants, parameter factories and trait impls.
//!
//! ```rust,ignore
//! use bulkgen::prelude::*;
//! use bulkgen::rust_decimal::Decimal;
//!
//! #[derive(Debug, Clone)]
//! pub struct Order {
//!     pub id: i64,
//!     pub reference: String,
//!     pub total: Decimal,
//! }
//!
//! impl DomainModel for Order {}
//! impl BulkModel for Order {}
//!
//! pub struct OrderProfile;
//!
//! impl SqlServerProfile<Order> for OrderProfile {
//!     fn configure(map: &mut ProfileBuilder<Order, SqlServer>) {
//!         map.identity(|m| &m.id);
//!         map.rule_for(|m| &m.reference).nvarchar(40);
//!         map.rule_for(|m| &m.total).decimal(18, 2);
//!     }
//! }
//!
//! include!(concat!(env!("OUT_DIR"), "/bulkgen.rs"));
//!
//! # async fn example(conn: &mut dyn Connection) -> bulkgen::Result<()> {
//! let mut batch = BulkBatch::new();
//! batch.add(Order { id: 0, reference: "A-1".into(), total: Decimal::ONE });
//! let counts = batch.apply::<SqlServer>(conn, &SyncOptions::from_env()).await?;
//! assert_eq!(counts.inserted, 1);
//! # Ok(())
//! # }
//! ```
//!
//! with a build script:
//!
//! ```rust,ignore
//! fn main() {
//!     bulkgen_codegen::Builder::new().run().unwrap();
//! }
//! ```
//!
//! ## Installation
//!
//! ```toml
//! [dependencies]
//! bulkgen = "0.3"
//!
//! [build-dependencies]
//! bulkgen-codegen = "0.3"
//! ```

pub use bulkgen_core::*;

pub mod prelude {
    pub use bulkgen_core::prelude::*;
}
