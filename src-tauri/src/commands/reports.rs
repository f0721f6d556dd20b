use tauri::AppHandle;

use super::authorize;
use crate::error::PosError;
use crate::models::{DailySummary, DayClosing, Permission};
use crate::reports;
use crate::state::AppStateExt;

#[tauri::command]
pub fn get_daily_summary(
    app: AppHandle,
    user_id: i64,
    date: Option<String>,
) -> Result<DailySummary, PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ViewReports)?;
        reports::daily_summary(conn, date.as_deref())
    })
}

#[tauri::command]
pub fn close_day(
    app: AppHandle,
    user_id: i64,
    date: Option<String>,
) -> Result<DayClosing, PosError> {
    app.pos()
        .with_conn(|conn| reports::close_day(conn, date.as_deref(), user_id))
}

#[tauri::command]
pub fn get_sales_history(
    app: AppHandle,
    user_id: i64,
    limit: Option<i64>,
) -> Result<Vec<DayClosing>, PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ViewReports)?;
        reports::sales_history(conn, limit)
    })
}
