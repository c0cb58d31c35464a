use bulkgen::chrono::NaiveDateTime;
use bulkgen::prelude::*;
use bulkgen::rust_decimal::Decimal;
use bulkgen::uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum OrderStatus {
    Pending = 1,
    Shipped = 2,
    Cancelled = 3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i32,
    pub customer: String,
    pub status: OrderStatus,
    pub total: Decimal,
    pub note: Option<String>,
    pub placed_at: NaiveDateTime,
}

impl DomainModel for Order {}
impl BulkModel for Order {}

/// One sensor sample, keyed by sensor and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub sensor: i32,
    pub taken_at: NaiveDateTime,
    pub value: f64,
}

impl DomainModel for Reading {}
impl BulkModel for Reading {}

#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub active: bool,
}

impl DomainModel for Customer {}

/// Row of a per-status sales report.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTotal {
    pub status: OrderStatus,
    pub orders: i64,
    pub total: Decimal,
}

impl ResultModel for StatusTotal {}
