//! Stock of raw ingredients and supplies.
//!
//! Stock only changes through `adjust_stock`, which writes a ledger row for
//! every change. Inventory is tracked independently of orders.

use rusqlite::{params, Connection, Row};
use tracing::{info, warn};

use crate::error::{OptionalRow, PosError, Result};
use crate::models::{
    CreateInventoryItem, InventoryAdjustment, InventoryItem, NotificationKind, UpdateInventoryItem,
};
use crate::notifications;

const ITEM_COLUMNS: &str = "id, name, stock, unit, purchase_price, low_stock_threshold, updated_at";

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<InventoryItem> {
    Ok(InventoryItem {
        id: row.get(0)?,
        name: row.get(1)?,
        stock: row.get(2)?,
        unit: row.get(3)?,
        purchase_price: row.get(4)?,
        low_stock_threshold: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn list_inventory(conn: &Connection) -> Result<Vec<InventoryItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM inventory_items ORDER BY name"
    ))?;
    let items = stmt
        .query_map([], item_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

pub fn get_inventory_item(conn: &Connection, id: i64) -> Result<InventoryItem> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM inventory_items WHERE id = ?1"),
        [id],
        item_from_row,
    )
    .or_not_found(format_args!("inventory item {id}"))
}

fn validate_fields(name: &str, unit: &str, purchase_price: f64, threshold: f64) -> Result<()> {
    if name.trim().is_empty() || unit.trim().is_empty() {
        return Err(PosError::validation("name and unit must not be empty"));
    }
    if purchase_price < 0.0 || threshold < 0.0 {
        return Err(PosError::validation(
            "purchase price and threshold must not be negative",
        ));
    }
    Ok(())
}

pub fn create_inventory_item(conn: &Connection, item: &CreateInventoryItem) -> Result<InventoryItem> {
    let threshold = item.low_stock_threshold.unwrap_or(0.0);
    validate_fields(&item.name, &item.unit, item.purchase_price, threshold)?;
    if item.stock < 0.0 {
        return Err(PosError::validation("opening stock must not be negative"));
    }

    conn.execute(
        "INSERT INTO inventory_items (name, stock, unit, purchase_price, low_stock_threshold)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            item.name.trim(),
            item.stock,
            item.unit.trim(),
            item.purchase_price,
            threshold
        ],
    )?;
    let id = conn.last_insert_rowid();
    info!(item_id = id, stock = item.stock, "Inventory item created");
    get_inventory_item(conn, id)
}

/// Descriptive fields only; stock goes through `adjust_stock`.
pub fn update_inventory_item(conn: &Connection, item: &UpdateInventoryItem) -> Result<InventoryItem> {
    validate_fields(
        &item.name,
        &item.unit,
        item.purchase_price,
        item.low_stock_threshold,
    )?;
    let changed = conn.execute(
        "UPDATE inventory_items
         SET name = ?1, unit = ?2, purchase_price = ?3, low_stock_threshold = ?4,
             updated_at = CURRENT_TIMESTAMP
         WHERE id = ?5",
        params![
            item.name.trim(),
            item.unit.trim(),
            item.purchase_price,
            item.low_stock_threshold,
            item.id
        ],
    )?;
    if changed == 0 {
        return Err(PosError::not_found(format_args!("inventory item {}", item.id)));
    }
    get_inventory_item(conn, item.id)
}

pub fn delete_inventory_item(conn: &Connection, id: i64) -> Result<()> {
    let deleted = conn.execute("DELETE FROM inventory_items WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(PosError::not_found(format_args!("inventory item {id}")));
    }
    info!(item_id = id, "Inventory item deleted");
    Ok(())
}

/// Apply `delta` to the stock and record it in the ledger.
pub fn adjust_stock(
    conn: &mut Connection,
    item_id: i64,
    delta: f64,
    reason: &str,
    user_id: Option<i64>,
) -> Result<InventoryItem> {
    if !delta.is_finite() || delta == 0.0 {
        return Err(PosError::validation("adjustment must be a non-zero amount"));
    }
    if reason.trim().is_empty() {
        return Err(PosError::validation("adjustment needs a reason"));
    }

    let tx = conn.transaction()?;
    let before = get_inventory_item(&tx, item_id)?;
    let stock = before.stock + delta;
    if stock < 0.0 {
        return Err(PosError::conflict(format!(
            "only {} {} of '{}' in stock",
            before.stock, before.unit, before.name
        )));
    }

    tx.execute(
        "UPDATE inventory_items SET stock = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        params![stock, item_id],
    )?;
    tx.execute(
        "INSERT INTO inventory_adjustments (item_id, delta, reason, user_id) VALUES (?1, ?2, ?3, ?4)",
        params![item_id, delta, reason.trim(), user_id],
    )?;

    let after = get_inventory_item(&tx, item_id)?;
    if after.is_low() && !before.is_low() {
        warn!(item_id, stock = after.stock, "Stock fell below threshold");
        notifications::record(
            &tx,
            NotificationKind::LowStock,
            &format!(
                "'{}' is low: {} {} left",
                after.name, after.stock, after.unit
            ),
            None,
            None,
        )?;
    }
    tx.commit()?;

    info!(item_id, delta, stock = after.stock, reason, "Stock adjusted");
    Ok(after)
}

pub fn low_stock(conn: &Connection) -> Result<Vec<InventoryItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM inventory_items
         WHERE stock <= low_stock_threshold
         ORDER BY stock ASC"
    ))?;
    let items = stmt
        .query_map([], item_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

/// Newest first.
pub fn adjustment_history(conn: &Connection, item_id: i64) -> Result<Vec<InventoryAdjustment>> {
    get_inventory_item(conn, item_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, item_id, delta, reason, user_id, created_at
         FROM inventory_adjustments
         WHERE item_id = ?1
         ORDER BY id DESC",
    )?;
    let history = stmt
        .query_map([item_id], |row| {
            Ok(InventoryAdjustment {
                id: row.get(0)?,
                item_id: row.get(1)?,
                delta: row.get(2)?,
                reason: row.get(3)?,
                user_id: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(history)
}
