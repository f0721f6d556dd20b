use tauri::AppHandle;

use crate::error::PosError;
use crate::models::Notification;
use crate::notifications;
use crate::state::AppStateExt;

#[tauri::command]
pub fn get_notifications(
    app: AppHandle,
    unread_only: Option<bool>,
    limit: Option<i64>,
) -> Result<Vec<Notification>, PosError> {
    app.pos().with_conn(|conn| {
        notifications::list_notifications(conn, unread_only.unwrap_or(false), limit)
    })
}

#[tauri::command]
pub fn mark_notification_read(app: AppHandle, id: i64) -> Result<Notification, PosError> {
    app.pos().with_conn(|conn| notifications::mark_read(conn, id))
}

#[tauri::command]
pub fn mark_all_notifications_read(app: AppHandle) -> Result<usize, PosError> {
    app.pos().with_conn(|conn| notifications::mark_all_read(conn))
}
