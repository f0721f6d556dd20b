use tauri::AppHandle;

use super::{authorize, emit, emit_notifications_since, ORDER_UPDATED};
use crate::error::PosError;
use crate::kitchen;
use crate::models::{OrderWithItems, Permission};
use crate::notifications;
use crate::state::AppStateExt;

#[tauri::command]
pub fn get_kitchen_queue(app: AppHandle) -> Result<Vec<OrderWithItems>, PosError> {
    app.pos().with_conn(|conn| kitchen::kitchen_queue(conn))
}

#[tauri::command]
pub fn start_preparing(
    app: AppHandle,
    user_id: i64,
    order_id: i64,
) -> Result<OrderWithItems, PosError> {
    let order = app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::UpdateKitchen)?;
        kitchen::start_preparing(conn, order_id)
    })?;
    emit(&app, ORDER_UPDATED, order.clone());
    Ok(order)
}

#[tauri::command]
pub fn mark_order_ready(
    app: AppHandle,
    user_id: i64,
    order_id: i64,
) -> Result<OrderWithItems, PosError> {
    let order = app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::UpdateKitchen)?;
        let mark = notifications::latest_id(conn)?;
        let order = kitchen::mark_ready(conn, order_id)?;
        emit_notifications_since(&app, conn, mark);
        Ok(order)
    })?;
    emit(&app, ORDER_UPDATED, order.clone());
    Ok(order)
}
