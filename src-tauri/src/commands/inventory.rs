use tauri::AppHandle;

use super::{authorize, emit_notifications_since};
use crate::error::PosError;
use crate::inventory;
use crate::models::{
    CreateInventoryItem, InventoryAdjustment, InventoryItem, Permission, UpdateInventoryItem,
};
use crate::notifications;
use crate::state::AppStateExt;

#[tauri::command]
pub fn get_inventory(app: AppHandle) -> Result<Vec<InventoryItem>, PosError> {
    app.pos().with_conn(|conn| inventory::list_inventory(conn))
}

#[tauri::command]
pub fn create_inventory_item(
    app: AppHandle,
    user_id: i64,
    item: CreateInventoryItem,
) -> Result<InventoryItem, PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageInventory)?;
        inventory::create_inventory_item(conn, &item)
    })
}

#[tauri::command]
pub fn update_inventory_item(
    app: AppHandle,
    user_id: i64,
    item: UpdateInventoryItem,
) -> Result<InventoryItem, PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageInventory)?;
        inventory::update_inventory_item(conn, &item)
    })
}

#[tauri::command]
pub fn delete_inventory_item(app: AppHandle, user_id: i64, id: i64) -> Result<(), PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageInventory)?;
        inventory::delete_inventory_item(conn, id)
    })
}

#[tauri::command]
pub fn adjust_stock(
    app: AppHandle,
    user_id: i64,
    item_id: i64,
    delta: f64,
    reason: String,
) -> Result<InventoryItem, PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageInventory)?;
        let mark = notifications::latest_id(conn)?;
        let item = inventory::adjust_stock(conn, item_id, delta, &reason, Some(user_id))?;
        emit_notifications_since(&app, conn, mark);
        Ok(item)
    })
}

#[tauri::command]
pub fn get_low_stock(app: AppHandle) -> Result<Vec<InventoryItem>, PosError> {
    app.pos().with_conn(|conn| inventory::low_stock(conn))
}

#[tauri::command]
pub fn get_adjustment_history(
    app: AppHandle,
    item_id: i64,
) -> Result<Vec<InventoryAdjustment>, PosError> {
    app.pos()
        .with_conn(|conn| inventory::adjustment_history(conn, item_id))
}
