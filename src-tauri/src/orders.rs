//! Order placement and order lifecycle.
//!
//! An order and all of its items are written in one SQLite transaction
//! together with the table status, so a failure never leaves an order
//! without items behind. Item prices are copied from the menu at order time.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, Row, ToSql};
use tracing::{info, warn};

use crate::error::{OptionalRow, PosError, Result};
use crate::models::{
    round_money, CreateOrder, CreateOrderItem, Order, OrderFilter, OrderItem, OrderStatus,
    OrderWithItems,
};
use crate::{kitchen, tables};

const ORDER_SELECT: &str =
    "SELECT o.id, o.table_id, t.name, o.staff_id, u.name, o.customer_name, o.notes,
            o.status, o.total_amount, o.created_at, o.updated_at
     FROM orders o
     LEFT JOIN dining_tables t ON o.table_id = t.id
     LEFT JOIN users u ON o.staff_id = u.id";

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        table_id: row.get(1)?,
        table_name: row.get(2)?,
        staff_id: row.get(3)?,
        staff_name: row.get(4)?,
        customer_name: row.get(5)?,
        notes: row.get(6)?,
        status: row.get(7)?,
        total_amount: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

pub(crate) fn load_items(conn: &Connection, order_id: i64) -> Result<Vec<OrderItem>> {
    let mut stmt = conn.prepare_cached(
        "SELECT oi.id, oi.order_id, oi.menu_item_id, m.name, oi.quantity, oi.price
         FROM order_items oi
         LEFT JOIN menu_items m ON oi.menu_item_id = m.id
         WHERE oi.order_id = ?1
         ORDER BY oi.id",
    )?;
    let items = stmt
        .query_map([order_id], |row| {
            Ok(OrderItem {
                id: row.get(0)?,
                order_id: row.get(1)?,
                menu_item_id: row.get(2)?,
                menu_item_name: row.get(3)?,
                quantity: row.get(4)?,
                price: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

pub(crate) fn get_order_row(conn: &Connection, id: i64) -> Result<Order> {
    conn.query_row(&format!("{ORDER_SELECT} WHERE o.id = ?1"), [id], order_from_row)
        .or_not_found(format_args!("order {id}"))
}

pub fn get_order(conn: &Connection, id: i64) -> Result<OrderWithItems> {
    let order = get_order_row(conn, id)?;
    let items = load_items(conn, id)?;
    Ok(OrderWithItems { order, items })
}

pub fn list_orders(conn: &Connection, filter: &OrderFilter) -> Result<Vec<OrderWithItems>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(status) = filter.status {
        clauses.push("o.status = ?");
        values.push(Box::new(status));
    }
    if let Some(table_id) = filter.table_id {
        clauses.push("o.table_id = ?");
        values.push(Box::new(table_id));
    }
    if let Some(date) = &filter.date {
        clauses.push("date(o.created_at, 'localtime') = ?");
        values.push(Box::new(date.clone()));
    }

    let mut sql = ORDER_SELECT.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY o.created_at DESC, o.id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let orders = stmt
        .query_map(params.as_slice(), order_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut result = Vec::with_capacity(orders.len());
    for order in orders {
        let items = load_items(conn, order.id)?;
        result.push(OrderWithItems { order, items });
    }
    Ok(result)
}

/// Merge repeated menu items and reject empty or non-positive selections.
pub(crate) fn aggregate_items(items: &[CreateOrderItem]) -> Result<Vec<CreateOrderItem>> {
    if items.is_empty() {
        return Err(PosError::validation("an order needs at least one item"));
    }
    let mut merged: BTreeMap<i64, i32> = BTreeMap::new();
    for item in items {
        if item.quantity <= 0 {
            return Err(PosError::validation(format!(
                "quantity for menu item {} must be positive",
                item.menu_item_id
            )));
        }
        *merged.entry(item.menu_item_id).or_default() += item.quantity;
    }
    Ok(merged
        .into_iter()
        .map(|(menu_item_id, quantity)| CreateOrderItem {
            menu_item_id,
            quantity,
        })
        .collect())
}

/// Look up the current menu price of each item; unavailable items are refused.
fn price_items(conn: &Connection, items: &[CreateOrderItem]) -> Result<Vec<(i64, i32, f64)>> {
    let mut priced = Vec::with_capacity(items.len());
    for item in items {
        let (name, price, available): (String, f64, bool) = conn
            .query_row(
                "SELECT name, price, is_available FROM menu_items WHERE id = ?1",
                [item.menu_item_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .or_not_found(format_args!("menu item {}", item.menu_item_id))?;
        if !available {
            return Err(PosError::conflict(format!("'{name}' is not available")));
        }
        priced.push((item.menu_item_id, item.quantity, price));
    }
    Ok(priced)
}

/// Recompute and store `total_amount` from the order's items.
pub(crate) fn recompute_total(conn: &Connection, order_id: i64) -> Result<f64> {
    let sum: f64 = conn.query_row(
        "SELECT COALESCE(SUM(quantity * price), 0) FROM order_items WHERE order_id = ?1",
        [order_id],
        |row| row.get(0),
    )?;
    let total = round_money(sum);
    conn.execute(
        "UPDATE orders SET total_amount = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        params![total, order_id],
    )?;
    Ok(total)
}

pub(crate) fn write_status(conn: &Connection, order_id: i64, status: OrderStatus) -> Result<()> {
    conn.execute(
        "UPDATE orders SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        params![status, order_id],
    )?;
    Ok(())
}

fn check_staff(conn: &Connection, staff_id: i64) -> Result<()> {
    let active: bool = conn
        .query_row(
            "SELECT is_active FROM users WHERE id = ?1",
            [staff_id],
            |row| row.get(0),
        )
        .or_not_found(format_args!("user {staff_id}"))?;
    if !active {
        return Err(PosError::Forbidden(format!("user {staff_id} is deactivated")));
    }
    Ok(())
}

pub fn place_order(conn: &mut Connection, order: &CreateOrder) -> Result<OrderWithItems> {
    let items = aggregate_items(&order.items)?;

    let tx = conn.transaction()?;
    if let Some(staff_id) = order.staff_id {
        check_staff(&tx, staff_id)?;
    }
    let priced = price_items(&tx, &items)?;
    tables::occupy_for_order(&tx, order.table_id)?;

    tx.execute(
        "INSERT INTO orders (table_id, staff_id, customer_name, notes, status, total_amount)
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![
            order.table_id,
            order.staff_id,
            order.customer_name,
            order.notes,
            OrderStatus::Pending
        ],
    )?;
    let order_id = tx.last_insert_rowid();

    for (menu_item_id, quantity, price) in &priced {
        tx.execute(
            "INSERT INTO order_items (order_id, menu_item_id, quantity, price) VALUES (?1, ?2, ?3, ?4)",
            params![order_id, menu_item_id, quantity, price],
        )?;
    }
    let total = recompute_total(&tx, order_id)?;
    tx.commit()?;

    info!(
        order_id,
        table_id = order.table_id,
        items = priced.len(),
        total,
        "Order placed"
    );
    get_order(conn, order_id)
}

pub fn add_items_to_order(
    conn: &mut Connection,
    order_id: i64,
    items: &[CreateOrderItem],
) -> Result<OrderWithItems> {
    let items = aggregate_items(items)?;

    let tx = conn.transaction()?;
    let order = get_order_row(&tx, order_id)?;
    if !order.status.is_in_kitchen() {
        return Err(PosError::conflict(format!(
            "cannot add items to a {} order",
            order.status
        )));
    }

    let priced = price_items(&tx, &items)?;
    for (menu_item_id, quantity, price) in &priced {
        // Same item at the same price folds into the existing line.
        let merged = tx.execute(
            "UPDATE order_items SET quantity = quantity + ?1
             WHERE order_id = ?2 AND menu_item_id = ?3 AND price = ?4",
            params![quantity, order_id, menu_item_id, price],
        )?;
        if merged == 0 {
            tx.execute(
                "INSERT INTO order_items (order_id, menu_item_id, quantity, price) VALUES (?1, ?2, ?3, ?4)",
                params![order_id, menu_item_id, quantity, price],
            )?;
        }
    }
    let total = recompute_total(&tx, order_id)?;
    tables::occupy_for_order(&tx, order.table_id)?;
    tx.commit()?;

    info!(order_id, added = priced.len(), total, "Items added to order");
    get_order(conn, order_id)
}

/// Remove one line from a pending order. Removing the last line cancels it.
pub fn remove_order_item(conn: &mut Connection, order_item_id: i64) -> Result<OrderWithItems> {
    let tx = conn.transaction()?;
    let order_id: i64 = tx
        .query_row(
            "SELECT order_id FROM order_items WHERE id = ?1",
            [order_item_id],
            |row| row.get(0),
        )
        .or_not_found(format_args!("order item {order_item_id}"))?;
    let order = get_order_row(&tx, order_id)?;
    if order.status != OrderStatus::Pending {
        return Err(PosError::conflict(format!(
            "items can only be removed from pending orders (order is {})",
            order.status
        )));
    }

    tx.execute("DELETE FROM order_items WHERE id = ?1", [order_item_id])?;
    recompute_total(&tx, order_id)?;

    let remaining: i64 = tx.query_row(
        "SELECT COUNT(*) FROM order_items WHERE order_id = ?1",
        [order_id],
        |row| row.get(0),
    )?;
    if remaining == 0 {
        write_status(&tx, order_id, OrderStatus::Cancelled)?;
        tables::release_if_idle(&tx, order.table_id)?;
        info!(order_id, "Last item removed, order cancelled");
    }
    tx.commit()?;

    get_order(conn, order_id)
}

/// Kitchen-side status changes. Completion only happens through payment, and
/// `ready` goes through `kitchen::mark_ready` so the floor is notified.
pub fn update_order_status(
    conn: &mut Connection,
    order_id: i64,
    next: OrderStatus,
) -> Result<OrderWithItems> {
    match next {
        OrderStatus::Completed => {
            return Err(PosError::validation(
                "orders are completed by settling their payment",
            ))
        }
        OrderStatus::Cancelled => return cancel_order(conn, order_id),
        _ => {}
    }

    let order = get_order_row(conn, order_id)?;
    if order.status == next {
        return get_order(conn, order_id);
    }
    if !order.status.can_transition_to(next) {
        return Err(PosError::InvalidTransition {
            entity: "order",
            from: order.status.to_string(),
            to: next.to_string(),
        });
    }
    if next == OrderStatus::Ready {
        return kitchen::mark_ready(conn, order_id);
    }

    write_status(conn, order_id, next)?;
    info!(order_id, from = %order.status, to = %next, "Order status changed");
    get_order(conn, order_id)
}

pub fn cancel_order(conn: &mut Connection, order_id: i64) -> Result<OrderWithItems> {
    let tx = conn.transaction()?;
    let order = get_order_row(&tx, order_id)?;
    if !order.status.can_transition_to(OrderStatus::Cancelled) {
        return Err(PosError::InvalidTransition {
            entity: "order",
            from: order.status.to_string(),
            to: OrderStatus::Cancelled.to_string(),
        });
    }
    write_status(&tx, order_id, OrderStatus::Cancelled)?;
    let table_status = tables::release_if_idle(&tx, order.table_id)?;
    tx.commit()?;

    warn!(order_id, table_id = order.table_id, %table_status, "Order cancelled");
    get_order(conn, order_id)
}

pub fn update_order_notes(
    conn: &Connection,
    order_id: i64,
    customer_name: Option<String>,
    notes: Option<String>,
) -> Result<OrderWithItems> {
    let changed = conn.execute(
        "UPDATE orders SET customer_name = ?1, notes = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?3",
        params![customer_name, notes, order_id],
    )?;
    if changed == 0 {
        return Err(PosError::not_found(format_args!("order {order_id}")));
    }
    get_order(conn, order_id)
}
