use tauri::AppHandle;

use super::authorize;
use crate::error::PosError;
use crate::menu;
use crate::models::{Category, CreateMenuItem, MenuItem, Permission, UpdateMenuItem};
use crate::state::AppStateExt;

#[tauri::command]
pub fn get_categories(app: AppHandle) -> Result<Vec<Category>, PosError> {
    app.pos().with_conn(|conn| menu::list_categories(conn))
}

#[tauri::command]
pub fn create_category(app: AppHandle, user_id: i64, name: String) -> Result<Category, PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageMenu)?;
        menu::create_category(conn, &name)
    })
}

#[tauri::command]
pub fn delete_category(app: AppHandle, user_id: i64, id: i64) -> Result<(), PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageMenu)?;
        menu::delete_category(conn, id)
    })
}

#[tauri::command]
pub fn get_menu_items(
    app: AppHandle,
    available_only: Option<bool>,
) -> Result<Vec<MenuItem>, PosError> {
    app.pos()
        .with_conn(|conn| menu::list_menu_items(conn, available_only.unwrap_or(false)))
}

#[tauri::command]
pub fn get_menu_item(app: AppHandle, id: i64) -> Result<MenuItem, PosError> {
    app.pos().with_conn(|conn| menu::get_menu_item(conn, id))
}

#[tauri::command]
pub fn create_menu_item(
    app: AppHandle,
    user_id: i64,
    item: CreateMenuItem,
) -> Result<MenuItem, PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageMenu)?;
        menu::create_menu_item(conn, &item)
    })
}

#[tauri::command]
pub fn update_menu_item(
    app: AppHandle,
    user_id: i64,
    item: UpdateMenuItem,
) -> Result<MenuItem, PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageMenu)?;
        menu::update_menu_item(conn, &item)
    })
}

#[tauri::command]
pub fn set_menu_item_availability(
    app: AppHandle,
    user_id: i64,
    id: i64,
    available: bool,
) -> Result<MenuItem, PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageMenu)?;
        menu::set_menu_item_availability(conn, id, available)
    })
}

#[tauri::command]
pub fn delete_menu_item(app: AppHandle, user_id: i64, id: i64) -> Result<(), PosError> {
    app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::ManageMenu)?;
        menu::delete_menu_item(conn, id)
    })
}
