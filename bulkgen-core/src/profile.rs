//! Capability markers and the configuration surface profiles are written against.
//!
//! Profiles are ordinary Rust that the generator reads from source. The
//! builder methods below only exist so that profile bodies type-check; calling
//! them at runtime records nothing.
//!
//! ```ignore
//! struct OrderProfile;
//!
//! impl SqlServerProfile<Order> for OrderProfile {
//!     fn configure(map: &mut ProfileBuilder<Order, SqlServer>) {
//!         map.schema("sales").key(|m| &m.id).identity(|m| &m.id);
//!         map.rule_for(|m| &m.name).nvarchar(100);
//!         map.rule_for(|m| &m.total).decimal(18, 2).nullable();
//!     }
//! }
//! ```

use std::marker::PhantomData;

use crate::dialect::{DialectMarker, Postgres, SqlServer};
use crate::types::{PostgresType, SqlServerType};

/// A type that query results can be mapped into.
pub trait ResultModel {}

/// A domain model with an identity-bearing table.
pub trait DomainModel {}

/// A domain model that also takes part in bulk synchronization.
pub trait BulkModel: DomainModel {}

/// Configuration of model `M` for SQL Server.
pub trait SqlServerProfile<M> {
    fn configure(map: &mut ProfileBuilder<M, SqlServer>);
}

/// Configuration of model `M` for PostgreSQL.
pub trait PostgresProfile<M> {
    fn configure(map: &mut ProfileBuilder<M, Postgres>);
}

/// Table-level settings and the `rule_for` entry point.
pub struct ProfileBuilder<M, D> {
    _marker: PhantomData<fn(&M) -> D>,
}

impl<M, D: DialectMarker> Default for ProfileBuilder<M, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, D: DialectMarker> ProfileBuilder<M, D> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn schema(&mut self, _name: &str) -> &mut Self {
        self
    }

    pub fn table(&mut self, _name: &str) -> &mut Self {
        self
    }

    /// Adds a key property; call once per key, in key order.
    pub fn key<T: ?Sized>(&mut self, _selector: impl FnOnce(&M) -> &T) -> &mut Self {
        self
    }

    /// Marks a property as store-assigned.
    pub fn identity<T: ?Sized>(&mut self, _selector: impl FnOnce(&M) -> &T) -> &mut Self {
        self
    }

    /// Starts a rule for one property.
    pub fn rule_for<T: ?Sized>(&mut self, _selector: impl FnOnce(&M) -> &T) -> PropertyRule<M, D> {
        PropertyRule {
            _marker: PhantomData,
        }
    }
}

/// Settings for one property.
pub struct PropertyRule<M, D> {
    _marker: PhantomData<fn(&M) -> D>,
}

impl<M, D: DialectMarker> PropertyRule<M, D> {
    pub fn column(self, _name: &str) -> Self {
        self
    }

    pub fn size(self, _len: u32) -> Self {
        self
    }

    pub fn size_max(self) -> Self {
        self
    }

    pub fn precision(self, _precision: u8) -> Self {
        self
    }

    pub fn scale(self, _scale: u8) -> Self {
        self
    }

    pub fn nullable(self) -> Self {
        self
    }

    pub fn required(self) -> Self {
        self
    }

    /// Raw SQL default expression.
    pub fn default_value(self, _sql: &str) -> Self {
        self
    }
}

impl<M> PropertyRule<M, SqlServer> {
    pub fn db_type(self, _ty: SqlServerType) -> Self {
        self
    }

    pub fn char(self, _len: u32) -> Self {
        self
    }

    pub fn varchar(self, _len: u32) -> Self {
        self
    }

    pub fn nchar(self, _len: u32) -> Self {
        self
    }

    pub fn nvarchar(self, _len: u32) -> Self {
        self
    }

    pub fn binary(self, _len: u32) -> Self {
        self
    }

    pub fn varbinary(self, _len: u32) -> Self {
        self
    }

    pub fn varchar_max(self) -> Self {
        self
    }

    pub fn nvarchar_max(self) -> Self {
        self
    }

    pub fn varbinary_max(self) -> Self {
        self
    }

    pub fn decimal(self, _precision: u8, _scale: u8) -> Self {
        self
    }
}

impl<M> PropertyRule<M, Postgres> {
    pub fn db_type(self, _ty: PostgresType) -> Self {
        self
    }

    pub fn char(self, _len: u32) -> Self {
        self
    }

    pub fn varchar(self, _len: u32) -> Self {
        self
    }

    pub fn text(self) -> Self {
        self
    }

    pub fn bytea(self) -> Self {
        self
    }

    pub fn numeric(self, _precision: u8, _scale: u8) -> Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Order {
        id: i32,
        name: String,
        total: rust_decimal::Decimal,
    }

    impl DomainModel for Order {}

    struct OrderProfile;

    impl SqlServerProfile<Order> for OrderProfile {
        fn configure(map: &mut ProfileBuilder<Order, SqlServer>) {
            map.schema("sales").table("Orders").key(|m| &m.id).identity(|m| &m.id);
            map.rule_for(|m| &m.name).nvarchar(100).column("Name");
            map.rule_for(|m| &m.total).decimal(18, 2).nullable();
        }
    }

    impl PostgresProfile<Order> for OrderProfile {
        fn configure(map: &mut ProfileBuilder<Order, Postgres>) {
            map.rule_for(|m| &m.name).text();
            map.rule_for(|m| &m.total).numeric(18, 2);
        }
    }

    #[test]
    fn profiles_type_check_and_run() {
        <OrderProfile as SqlServerProfile<Order>>::configure(&mut ProfileBuilder::new());
        <OrderProfile as PostgresProfile<Order>>::configure(&mut ProfileBuilder::new());
        let order = Order {
            id: 1,
            name: String::new(),
            total: rust_decimal::Decimal::ZERO,
        };
        assert_eq!(order.id, 1);
        assert!(order.name.is_empty());
        assert!(order.total.is_zero());
    }
}
