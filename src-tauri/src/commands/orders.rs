use tauri::AppHandle;

use super::{authorize, emit, emit_notifications_since, emit_table, ORDER_UPDATED};
use crate::error::PosError;
use crate::models::{
    CreateOrder, CreateOrderItem, OrderFilter, OrderStatus, OrderWithItems, Permission,
};
use crate::state::AppStateExt;
use crate::{notifications, orders};

/// Emit the order and its table after a change.
fn publish(app: &AppHandle, order: &OrderWithItems) {
    emit(app, ORDER_UPDATED, order.clone());
    let table_id = order.order.table_id;
    if let Err(e) = app.pos().with_conn(|conn| {
        emit_table(app, conn, table_id);
        Ok(())
    }) {
        tracing::warn!(table_id, error = %e, "Cannot publish table update");
    }
}

/// Floor staff cancel; every other status change belongs to the kitchen.
fn status_permission(next: OrderStatus) -> Permission {
    match next {
        OrderStatus::Cancelled => Permission::TakeOrders,
        _ => Permission::UpdateKitchen,
    }
}

/// The order is credited to `staff_id` when given, otherwise to `user_id`.
#[tauri::command]
pub fn place_order(
    app: AppHandle,
    user_id: i64,
    mut order: CreateOrder,
) -> Result<OrderWithItems, PosError> {
    order.staff_id.get_or_insert(user_id);
    let placed = app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::TakeOrders)?;
        orders::place_order(conn, &order)
    })?;
    publish(&app, &placed);
    Ok(placed)
}

#[tauri::command]
pub fn add_items_to_order(
    app: AppHandle,
    user_id: i64,
    order_id: i64,
    items: Vec<CreateOrderItem>,
) -> Result<OrderWithItems, PosError> {
    let order = app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::TakeOrders)?;
        orders::add_items_to_order(conn, order_id, &items)
    })?;
    publish(&app, &order);
    Ok(order)
}

#[tauri::command]
pub fn remove_order_item(
    app: AppHandle,
    user_id: i64,
    order_item_id: i64,
) -> Result<OrderWithItems, PosError> {
    let order = app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::TakeOrders)?;
        orders::remove_order_item(conn, order_item_id)
    })?;
    publish(&app, &order);
    Ok(order)
}

#[tauri::command]
pub fn get_order(app: AppHandle, id: i64) -> Result<OrderWithItems, PosError> {
    app.pos().with_conn(|conn| orders::get_order(conn, id))
}

#[tauri::command]
pub fn get_orders(
    app: AppHandle,
    filter: Option<OrderFilter>,
) -> Result<Vec<OrderWithItems>, PosError> {
    let filter = filter.unwrap_or_default();
    app.pos().with_conn(|conn| orders::list_orders(conn, &filter))
}

#[tauri::command]
pub fn update_order_status(
    app: AppHandle,
    user_id: i64,
    id: i64,
    status: OrderStatus,
) -> Result<OrderWithItems, PosError> {
    let order = app.pos().with_conn(|conn| {
        authorize(conn, user_id, status_permission(status))?;
        let mark = notifications::latest_id(conn)?;
        let order = orders::update_order_status(conn, id, status)?;
        emit_notifications_since(&app, conn, mark);
        Ok(order)
    })?;
    publish(&app, &order);
    Ok(order)
}

#[tauri::command]
pub fn cancel_order(app: AppHandle, user_id: i64, id: i64) -> Result<OrderWithItems, PosError> {
    let order = app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::TakeOrders)?;
        orders::cancel_order(conn, id)
    })?;
    publish(&app, &order);
    Ok(order)
}

#[tauri::command]
pub fn update_order_notes(
    app: AppHandle,
    user_id: i64,
    id: i64,
    customer_name: Option<String>,
    notes: Option<String>,
) -> Result<OrderWithItems, PosError> {
    let order = app.pos().with_conn(|conn| {
        authorize(conn, user_id, Permission::TakeOrders)?;
        orders::update_order_notes(conn, id, customer_name, notes)
    })?;
    emit(&app, ORDER_UPDATED, order.clone());
    Ok(order)
}
