//! Staff notifications: order ready, low stock, payment received.
//!
//! Rows are written inside the caller's transaction so a notification only
//! exists when the event that caused it was committed.

use rusqlite::{params, Connection, Row};
use tracing::debug;

use crate::error::{OptionalRow, PosError, Result};
use crate::models::{Notification, NotificationKind};

const DEFAULT_FEED_LIMIT: i64 = 200;

const NOTIFICATION_COLUMNS: &str = "id, kind, message, order_id, table_id, is_read, created_at";

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        kind: row.get(1)?,
        message: row.get(2)?,
        order_id: row.get(3)?,
        table_id: row.get(4)?,
        is_read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub(crate) fn record(
    conn: &Connection,
    kind: NotificationKind,
    message: &str,
    order_id: Option<i64>,
    table_id: Option<i64>,
) -> Result<Notification> {
    conn.execute(
        "INSERT INTO notifications (kind, message, order_id, table_id) VALUES (?1, ?2, ?3, ?4)",
        params![kind, message, order_id, table_id],
    )?;
    let id = conn.last_insert_rowid();
    debug!(notification_id = id, %kind, "Notification recorded");
    get_notification(conn, id)
}

pub fn get_notification(conn: &Connection, id: i64) -> Result<Notification> {
    conn.query_row(
        &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
        [id],
        notification_from_row,
    )
    .or_not_found(format_args!("notification {id}"))
}

/// Newest first, at most `limit` rows (200 when not given).
pub fn list_notifications(
    conn: &Connection,
    unread_only: bool,
    limit: Option<i64>,
) -> Result<Vec<Notification>> {
    let limit = limit.unwrap_or(DEFAULT_FEED_LIMIT).max(1);
    let filter = if unread_only { "WHERE is_read = 0" } else { "" };
    let mut stmt = conn.prepare(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications {filter} ORDER BY id DESC LIMIT ?1"
    ))?;
    let notifications = stmt
        .query_map([limit], notification_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(notifications)
}

/// Highest notification id so far, 0 when there are none.
pub fn latest_id(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COALESCE(MAX(id), 0) FROM notifications", [], |row| {
        row.get(0)
    })?)
}

/// Notifications recorded after `after_id`, oldest first.
pub fn since(conn: &Connection, after_id: i64) -> Result<Vec<Notification>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id > ?1 ORDER BY id"
    ))?;
    let notifications = stmt
        .query_map([after_id], notification_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(notifications)
}

pub fn mark_read(conn: &Connection, id: i64) -> Result<Notification> {
    let changed = conn.execute("UPDATE notifications SET is_read = 1 WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(PosError::not_found(format_args!("notification {id}")));
    }
    get_notification(conn, id)
}

pub fn mark_all_read(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("UPDATE notifications SET is_read = 1 WHERE is_read = 0", [])?)
}
