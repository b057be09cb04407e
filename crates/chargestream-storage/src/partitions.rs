// Monthly partition maintenance for the history tables
//
// Partitions are named <table>_y<year>m<month> and cover one calendar month.
// Retention drops whole partitions instead of deleting rows.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::info;

pub const HISTORY_TABLES: [&str; 2] = ["meter_history", "vehicle_history"];

/// Create the partitions covering `now` and the following `months_ahead`
/// months for both history tables. Idempotent.
pub async fn ensure_monthly_partitions(
    pool: &PgPool,
    now: DateTime<Utc>,
    months_ahead: u32,
) -> Result<(), sqlx::Error> {
    let mut month = month_start(now.date_naive());

    for _ in 0..=months_ahead {
        let next = next_month(month);
        for table in HISTORY_TABLES {
            let name = partition_name(table, month);
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {name} PARTITION OF {table} \
                 FOR VALUES FROM ('{from}') TO ('{to}')",
                name = name,
                table = table,
                from = month,
                to = next,
            );
            sqlx::query(&sql).execute(pool).await?;
        }
        month = next;
    }

    Ok(())
}

/// Drop every monthly partition that ends at or before `cutoff`.
/// Returns the names of the dropped partitions.
pub async fn drop_partitions_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<String>, sqlx::Error> {
    let mut dropped = Vec::new();

    for table in HISTORY_TABLES {
        let children: Vec<(String,)> = sqlx::query_as(
            "SELECT c.relname FROM pg_inherits i \
             JOIN pg_class c ON c.oid = i.inhrelid \
             JOIN pg_class p ON p.oid = i.inhparent \
             WHERE p.relname = $1",
        )
        .bind(table)
        .fetch_all(pool)
        .await?;

        for (child,) in children {
            let Some(month) = parse_partition_month(table, &child) else {
                continue; // default partition or foreign naming
            };
            if next_month(month)
                .and_hms_opt(0, 0, 0)
                .map(|end| end.and_utc() <= cutoff)
                .unwrap_or(false)
            {
                let sql = format!("DROP TABLE IF EXISTS {}", child);
                sqlx::query(&sql).execute(pool).await?;
                info!(partition = %child, "Dropped expired history partition");
                dropped.push(child);
            }
        }
    }

    Ok(dropped)
}

fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("first of month is valid")
}

fn next_month(month: NaiveDate) -> NaiveDate {
    if month.month() == 12 {
        NaiveDate::from_ymd_opt(month.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(month.year(), month.month() + 1, 1)
    }
    .expect("first of month is valid")
}

fn partition_name(table: &str, month: NaiveDate) -> String {
    format!("{}_y{:04}m{:02}", table, month.year(), month.month())
}

/// Parse `<table>_y2026m08` back into the month it covers.
fn parse_partition_month(table: &str, child: &str) -> Option<NaiveDate> {
    let suffix = child.strip_prefix(table)?.strip_prefix("_y")?;
    let (year, rest) = suffix.split_at_checked(4)?;
    let month = rest.strip_prefix('m')?;
    if month.len() != 2 {
        return None;
    }
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_name() {
        let month = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(
            partition_name("meter_history", month),
            "meter_history_y2026m08"
        );
    }

    #[test]
    fn test_parse_partition_month_round_trip() {
        let month = NaiveDate::from_ymd_opt(2026, 12, 1).unwrap();
        let name = partition_name("vehicle_history", month);
        assert_eq!(parse_partition_month("vehicle_history", &name), Some(month));
    }

    #[test]
    fn test_parse_rejects_default_partition() {
        assert_eq!(
            parse_partition_month("meter_history", "meter_history_default"),
            None
        );
    }

    #[test]
    fn test_next_month_year_rollover() {
        let dec = NaiveDate::from_ymd_opt(2026, 12, 1).unwrap();
        assert_eq!(next_month(dec), NaiveDate::from_ymd_opt(2027, 1, 1).unwrap());
    }
}
