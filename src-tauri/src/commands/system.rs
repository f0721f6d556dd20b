use tauri::AppHandle;
use tracing::warn;

use super::{authorize, emit, NOTIFICATION};
use crate::config::AppConfig;
use crate::diagnostics;
use crate::error::PosError;
use crate::models::{Issue, NotificationKind, Permission, RepairReport, StorageStatus};
use crate::notifications;
use crate::state::AppStateExt;
use crate::users;

#[tauri::command]
pub fn get_storage_status(app: AppHandle) -> Result<StorageStatus, PosError> {
    app.pos().db.status()
}

/// Swap the in-memory fallback for the database file. `force` discards
/// whatever was recorded in memory.
#[tauri::command]
pub fn reconnect_primary(
    app: AppHandle,
    user_id: Option<i64>,
    force: Option<bool>,
) -> Result<StorageStatus, PosError> {
    let state = app.pos();
    state.with_conn(|conn| users::require_actor(conn, user_id, Permission::ManageUsers))?;
    let status = state.db.reconnect_primary(force.unwrap_or(false))?;

    let message = format!("Reconnected to {}", status.path);
    match state.with_conn(|conn| {
        notifications::record(conn, NotificationKind::System, &message, None, None)
    }) {
        Ok(notification) => emit(&app, NOTIFICATION, notification),
        Err(e) => warn!(error = %e, "Cannot record reconnect notification"),
    }
    Ok(status)
}

#[tauri::command]
pub fn get_app_config(app: AppHandle) -> AppConfig {
    app.pos().config.clone()
}

#[tauri::command]
pub fn scan_consistency(app: AppHandle) -> Result<Vec<Issue>, PosError> {
    app.pos().with_conn(|conn| diagnostics::scan(conn))
}

#[tauri::command]
pub fn repair_consistency(app: AppHandle, user_id: i64) -> Result<RepairReport, PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageTables)?;
        diagnostics::repair(conn)
    })
}
