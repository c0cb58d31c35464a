use bulkgen::prelude::*;

use crate::models::{Customer, Order, Reading};

const CUSTOMER_LEN: u32 = 120;
const EMAIL_LEN: u32 = 320;

pub struct OrderProfile;

impl SqlServerProfile<Order> for OrderProfile {
    fn configure(map: &mut ProfileBuilder<Order, SqlServer>) {
        map.schema("sales");
        map.rule_for(|m| &m.customer)
            .column("CustomerName")
            .nvarchar(CUSTOMER_LEN);
        map.rule_for(|m| &m.total).decimal(18, 2);
        map.rule_for(|m| &m.note).nvarchar_max();
        map.rule_for(|m| &m.placed_at)
            .column("PlacedAt")
            .default_value("SYSUTCDATETIME()");
    }
}

impl PostgresProfile<Order> for OrderProfile {
    fn configure(map: &mut ProfileBuilder<Order, Postgres>) {
        map.schema("sales");
        map.rule_for(|m| &m.customer)
            .column("customer_name")
            .varchar(CUSTOMER_LEN);
        map.rule_for(|m| &m.total).numeric(18, 2);
        map.rule_for(|m| &m.note).text();
    }
}

pub struct ReadingProfile;

impl SqlServerProfile<Reading> for ReadingProfile {
    fn configure(map: &mut ProfileBuilder<Reading, SqlServer>) {
        map.table("SensorReadings")
            .key(|m| &m.sensor)
            .key(|m| &m.taken_at);
    }
}

impl PostgresProfile<Reading> for ReadingProfile {
    fn configure(map: &mut ProfileBuilder<Reading, Postgres>) {
        map.table("sensor_readings")
            .key(|m| &m.sensor)
            .key(|m| &m.taken_at);
    }
}

pub struct CustomerProfile;

impl CustomerProfile {
    fn contact(map: &mut ProfileBuilder<Customer, SqlServer>) {
        map.rule_for(|m| &m.email).varchar(EMAIL_LEN);
    }
}

impl SqlServerProfile<Customer> for CustomerProfile {
    fn configure(map: &mut ProfileBuilder<Customer, SqlServer>) {
        map.rule_for(|m| &m.name).nvarchar(100);
        Self::contact(map);
    }
}

impl PostgresProfile<Customer> for CustomerProfile {
    fn configure(map: &mut ProfileBuilder<Customer, Postgres>) {
        map.rule_for(|m| &m.name).text();
        map.rule_for(|m| &m.email).varchar(EMAIL_LEN);
    }
}
