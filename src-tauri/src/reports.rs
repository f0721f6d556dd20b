//! Daily sales figures and end-of-day closing.
//!
//! Dates are local calendar dates (`YYYY-MM-DD`); stored timestamps are UTC
//! and converted with SQLite's `'localtime'` modifier.

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use tracing::info;

use crate::error::{PosError, Result};
use crate::models::{DailySummary, DayClosing, MethodTotal, Permission, TopItem, TransactionStatus};
use crate::users;

const TOP_ITEMS: i64 = 5;
const DEFAULT_HISTORY: i64 = 30;

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Default to today and reject anything that is not a calendar date.
fn resolve_date(date: Option<&str>) -> Result<String> {
    match date {
        None => Ok(today()),
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map(|d| d.format("%Y-%m-%d").to_string())
            .map_err(|_| PosError::validation(format!("'{raw}' is not a YYYY-MM-DD date"))),
    }
}

pub fn daily_summary(conn: &Connection, date: Option<&str>) -> Result<DailySummary> {
    let date = resolve_date(date)?;

    let (total_revenue, transaction_count): (f64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0), COUNT(*) FROM transactions
         WHERE status = ?1 AND date(created_at, 'localtime') = ?2",
        params![TransactionStatus::Completed, date],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let refunded_amount: f64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM transactions
         WHERE status = ?1 AND date(created_at, 'localtime') = ?2",
        params![TransactionStatus::Refunded, date],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT method, COUNT(*), SUM(amount) FROM transactions
         WHERE status = ?1 AND date(created_at, 'localtime') = ?2
         GROUP BY method ORDER BY SUM(amount) DESC",
    )?;
    let by_method = stmt
        .query_map(params![TransactionStatus::Completed, date], |row| {
            Ok(MethodTotal {
                method: row.get(0)?,
                count: row.get(1)?,
                amount: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT oi.menu_item_id, COALESCE(m.name, '#' || oi.menu_item_id),
                SUM(oi.quantity), SUM(oi.quantity * oi.price)
         FROM order_items oi
         JOIN transactions t ON t.order_id = oi.order_id
         LEFT JOIN menu_items m ON m.id = oi.menu_item_id
         WHERE t.status = ?1 AND date(t.created_at, 'localtime') = ?2
         GROUP BY oi.menu_item_id
         ORDER BY SUM(oi.quantity) DESC, SUM(oi.quantity * oi.price) DESC
         LIMIT ?3",
    )?;
    let top_items = stmt
        .query_map(params![TransactionStatus::Completed, date, TOP_ITEMS], |row| {
            Ok(TopItem {
                menu_item_id: row.get(0)?,
                name: row.get(1)?,
                quantity: row.get(2)?,
                revenue: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(DailySummary {
        date,
        total_revenue,
        transaction_count,
        refunded_amount,
        by_method,
        top_items,
    })
}

fn closing_for(conn: &Connection, date: &str) -> Result<Option<DayClosing>> {
    let mut stmt = conn.prepare(
        "SELECT id, date, total_revenue, total_orders, closed_by, closed_at
         FROM day_closings WHERE date = ?1",
    )?;
    let mut rows = stmt.query_map([date], |row| {
        Ok(DayClosing {
            id: row.get(0)?,
            date: row.get(1)?,
            total_revenue: row.get(2)?,
            total_orders: row.get(3)?,
            closed_by: row.get(4)?,
            closed_at: row.get(5)?,
        })
    })?;
    let closing = rows.next().transpose()?;
    Ok(closing)
}

/// Snapshot a day's revenue into `day_closings`.
pub fn close_day(conn: &Connection, date: Option<&str>, user_id: i64) -> Result<DayClosing> {
    users::require_permission(conn, user_id, Permission::ViewReports)?;
    let date = resolve_date(date)?;

    if closing_for(conn, &date)?.is_some() {
        return Err(PosError::conflict(format!("{date} has already been closed")));
    }

    let unpaid: i64 = conn.query_row(
        "SELECT COUNT(*) FROM orders
         WHERE status IN ('pending', 'preparing', 'ready')
           AND date(created_at, 'localtime') = ?1",
        [&date],
        |row| row.get(0),
    )?;
    if unpaid > 0 {
        return Err(PosError::conflict(format!(
            "{unpaid} order(s) from {date} are still unpaid"
        )));
    }

    let summary = daily_summary(conn, Some(&date))?;
    conn.execute(
        "INSERT INTO day_closings (date, total_revenue, total_orders, closed_by) VALUES (?1, ?2, ?3, ?4)",
        params![date, summary.total_revenue, summary.transaction_count, user_id],
    )?;
    info!(
        %date,
        revenue = summary.total_revenue,
        orders = summary.transaction_count,
        user_id,
        "Day closed"
    );

    closing_for(conn, &date)?.ok_or_else(|| PosError::not_found(format_args!("closing for {date}")))
}

pub fn sales_history(conn: &Connection, limit: Option<i64>) -> Result<Vec<DayClosing>> {
    let limit = limit.unwrap_or(DEFAULT_HISTORY).max(1);
    let mut stmt = conn.prepare(
        "SELECT id, date, total_revenue, total_orders, closed_by, closed_at
         FROM day_closings
         ORDER BY date DESC
         LIMIT ?1",
    )?;
    let closings = stmt
        .query_map([limit], |row| {
            Ok(DayClosing {
                id: row.get(0)?,
                date: row.get(1)?,
                total_revenue: row.get(2)?,
                total_orders: row.get(3)?,
                closed_by: row.get(4)?,
                closed_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(closings)
}
