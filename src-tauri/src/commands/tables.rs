use tauri::AppHandle;

use super::{authorize, emit, TABLE_UPDATED};
use crate::error::PosError;
use crate::models::{CreateTable, OrderWithItems, Permission, Table, TableStatus, UpdateTable};
use crate::state::AppStateExt;
use crate::tables;

#[tauri::command]
pub fn get_tables(app: AppHandle) -> Result<Vec<Table>, PosError> {
    app.pos().with_conn(|conn| tables::list_tables(conn))
}

#[tauri::command]
pub fn get_table(app: AppHandle, id: i64) -> Result<Table, PosError> {
    app.pos().with_conn(|conn| tables::get_table(conn, id))
}

#[tauri::command]
pub fn create_table(app: AppHandle, user_id: i64, table: CreateTable) -> Result<Table, PosError> {
    let created = app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageTables)?;
        tables::create_table(conn, &table)
    })?;
    emit(&app, TABLE_UPDATED, created.clone());
    Ok(created)
}

#[tauri::command]
pub fn update_table(app: AppHandle, user_id: i64, table: UpdateTable) -> Result<Table, PosError> {
    let updated = app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageTables)?;
        tables::update_table(conn, &table)
    })?;
    emit(&app, TABLE_UPDATED, updated.clone());
    Ok(updated)
}

#[tauri::command]
pub fn delete_table(app: AppHandle, user_id: i64, id: i64) -> Result<(), PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageTables)?;
        tables::delete_table(conn, id)
    })
}

#[tauri::command]
pub fn set_table_status(
    app: AppHandle,
    user_id: i64,
    id: i64,
    status: TableStatus,
) -> Result<Table, PosError> {
    let table = app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageTables)?;
        tables::set_table_status(conn, id, status)
    })?;
    emit(&app, TABLE_UPDATED, table.clone());
    Ok(table)
}

#[tauri::command]
pub fn get_active_orders(app: AppHandle, table_id: i64) -> Result<Vec<OrderWithItems>, PosError> {
    app.pos()
        .with_conn(|conn| tables::active_orders_for_table(conn, table_id))
}
