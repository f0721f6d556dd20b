//! Tauri commands. Each one locks the connection, calls into the domain
//! modules and pushes change events to the webview.

pub mod billing;
pub mod inventory;
pub mod kitchen;
pub mod menu;
pub mod notifications;
pub mod orders;
pub mod reports;
pub mod system;
pub mod tables;
pub mod users;

use rusqlite::Connection;
use serde::Serialize;
use tauri::{AppHandle, Emitter};
use tracing::warn;

use crate::error::Result;
use crate::models::Permission;

pub const ORDER_UPDATED: &str = "order_updated";
pub const TABLE_UPDATED: &str = "table_updated";
pub const NOTIFICATION: &str = "notification";

pub(crate) fn emit<T: Serialize + Clone>(app: &AppHandle, event: &str, payload: T) {
    if let Err(e) = app.emit(event, payload) {
        warn!(event, error = %e, "Failed to emit event");
    }
}

/// Re-send the table row after an order or payment touched it.
pub(crate) fn emit_table(app: &AppHandle, conn: &Connection, table_id: i64) {
    match crate::tables::get_table(conn, table_id) {
        Ok(table) => emit(app, TABLE_UPDATED, table),
        Err(e) => warn!(table_id, error = %e, "Cannot load table for event"),
    }
}

/// Emit every notification recorded after `after_id`.
pub(crate) fn emit_notifications_since(app: &AppHandle, conn: &Connection, after_id: i64) {
    match crate::notifications::since(conn, after_id) {
        Ok(fresh) => {
            for notification in fresh {
                emit(app, NOTIFICATION, notification);
            }
        }
        Err(e) => warn!(error = %e, "Cannot load notifications for event"),
    }
}

pub(crate) fn authorize(conn: &Connection, user_id: i64, permission: Permission) -> Result<()> {
    crate::users::require_permission(conn, user_id, permission).map(|_| ())
}
