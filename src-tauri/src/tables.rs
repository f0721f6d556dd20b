//! Dining tables and their status.
//!
//! Manual transitions go through `set_table_status`. Order placement and
//! payment call `occupy_for_order` / `release_if_idle` inside their own
//! database transaction so the table never drifts from its orders.

use rusqlite::{params, Connection, Row};
use tracing::{debug, info};

use crate::error::{OptionalRow, PosError, Result};
use crate::models::{CreateTable, OrderStatus, OrderWithItems, Table, TableStatus, UpdateTable};
use crate::orders;

const TABLE_COLUMNS: &str = "id, name, location, capacity, status, updated_at";

fn table_from_row(row: &Row<'_>) -> rusqlite::Result<Table> {
    Ok(Table {
        id: row.get(0)?,
        name: row.get(1)?,
        location: row.get(2)?,
        capacity: row.get(3)?,
        status: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn list_tables(conn: &Connection) -> Result<Vec<Table>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TABLE_COLUMNS} FROM dining_tables ORDER BY name"
    ))?;
    let tables = stmt
        .query_map([], table_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tables)
}

pub fn get_table(conn: &Connection, id: i64) -> Result<Table> {
    conn.query_row(
        &format!("SELECT {TABLE_COLUMNS} FROM dining_tables WHERE id = ?1"),
        [id],
        table_from_row,
    )
    .or_not_found(format_args!("table {id}"))
}

fn validate_table_fields(name: &str, capacity: i32) -> Result<()> {
    if name.trim().is_empty() {
        return Err(PosError::validation("table name must not be empty"));
    }
    if capacity <= 0 {
        return Err(PosError::validation("table capacity must be positive"));
    }
    Ok(())
}

pub fn create_table(conn: &Connection, table: &CreateTable) -> Result<Table> {
    validate_table_fields(&table.name, table.capacity)?;

    conn.execute(
        "INSERT INTO dining_tables (name, location, capacity, status) VALUES (?1, ?2, ?3, ?4)",
        params![
            table.name.trim(),
            table.location,
            table.capacity,
            TableStatus::Available
        ],
    )?;
    let id = conn.last_insert_rowid();
    info!(table_id = id, name = %table.name, "Table created");
    get_table(conn, id)
}

pub fn update_table(conn: &Connection, table: &UpdateTable) -> Result<Table> {
    validate_table_fields(&table.name, table.capacity)?;

    let changed = conn.execute(
        "UPDATE dining_tables
         SET name = ?1, location = ?2, capacity = ?3, updated_at = CURRENT_TIMESTAMP
         WHERE id = ?4",
        params![table.name.trim(), table.location, table.capacity, table.id],
    )?;
    if changed == 0 {
        return Err(PosError::not_found(format_args!("table {}", table.id)));
    }
    get_table(conn, table.id)
}

pub fn delete_table(conn: &Connection, id: i64) -> Result<()> {
    get_table(conn, id)?;

    if unpaid_order_count(conn, id)? > 0 {
        return Err(PosError::conflict("table has unpaid orders"));
    }
    let history: i64 = conn.query_row(
        "SELECT COUNT(*) FROM orders WHERE table_id = ?1",
        [id],
        |row| row.get(0),
    )?;
    if history > 0 {
        return Err(PosError::conflict(
            "table has order history and cannot be deleted",
        ));
    }

    conn.execute("DELETE FROM dining_tables WHERE id = ?1", [id])?;
    info!(table_id = id, "Table deleted");
    Ok(())
}

pub(crate) fn count_orders_in(
    conn: &Connection,
    table_id: i64,
    statuses: &[OrderStatus],
) -> Result<i64> {
    let placeholders = vec!["?"; statuses.len()].join(", ");
    let sql = format!(
        "SELECT COUNT(*) FROM orders WHERE table_id = ? AND status IN ({placeholders})"
    );
    let mut values: Vec<&dyn rusqlite::ToSql> = vec![&table_id];
    for status in statuses {
        values.push(status);
    }
    Ok(conn.query_row(&sql, values.as_slice(), |row| row.get(0))?)
}

pub(crate) fn unpaid_order_count(conn: &Connection, table_id: i64) -> Result<i64> {
    count_orders_in(
        conn,
        table_id,
        &[OrderStatus::Pending, OrderStatus::Preparing, OrderStatus::Ready],
    )
}

pub(crate) fn write_status(conn: &Connection, table_id: i64, status: TableStatus) -> Result<()> {
    conn.execute(
        "UPDATE dining_tables SET status = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        params![status, table_id],
    )?;
    Ok(())
}

/// Move a table to `billing`: it needs at least one ready order and nothing
/// still in the kitchen.
pub(crate) fn check_can_bill(conn: &Connection, table_id: i64) -> Result<()> {
    let ready = count_orders_in(conn, table_id, &[OrderStatus::Ready])?;
    if ready == 0 {
        return Err(PosError::conflict("table has no ready orders to bill"));
    }
    let in_kitchen = count_orders_in(
        conn,
        table_id,
        &[OrderStatus::Pending, OrderStatus::Preparing],
    )?;
    if in_kitchen > 0 {
        return Err(PosError::conflict(format!(
            "table still has {in_kitchen} order(s) in the kitchen"
        )));
    }
    Ok(())
}

/// Manual status change from the floor plan.
pub fn set_table_status(conn: &Connection, table_id: i64, next: TableStatus) -> Result<Table> {
    let table = get_table(conn, table_id)?;
    if table.status == next {
        return Ok(table);
    }
    if !table.status.can_transition_to(next) {
        return Err(PosError::InvalidTransition {
            entity: "table",
            from: table.status.to_string(),
            to: next.to_string(),
        });
    }

    match next {
        TableStatus::Billing => check_can_bill(conn, table_id)?,
        TableStatus::Available => {
            let unpaid = unpaid_order_count(conn, table_id)?;
            if unpaid > 0 {
                return Err(PosError::conflict(format!(
                    "table still has {unpaid} unpaid order(s)"
                )));
            }
        }
        _ => {}
    }

    write_status(conn, table_id, next)?;
    info!(table_id, from = %table.status, to = %next, "Table status changed");
    get_table(conn, table_id)
}

/// Seat an order at the table. Called inside the order-placement transaction.
pub(crate) fn occupy_for_order(conn: &Connection, table_id: i64) -> Result<Table> {
    let table = get_table(conn, table_id)?;
    match table.status {
        TableStatus::Occupied => Ok(table),
        TableStatus::Available | TableStatus::Reserved | TableStatus::Billing => {
            write_status(conn, table_id, TableStatus::Occupied)?;
            debug!(table_id, from = %table.status, "Table occupied by new order");
            get_table(conn, table_id)
        }
        TableStatus::Cleaning => Err(PosError::conflict(format!(
            "table '{}' is being cleaned",
            table.name
        ))),
    }
}

/// Free the table once it has no unpaid orders left.
pub(crate) fn release_if_idle(conn: &Connection, table_id: i64) -> Result<TableStatus> {
    let table = get_table(conn, table_id)?;
    let busy = matches!(table.status, TableStatus::Occupied | TableStatus::Billing);
    if busy && unpaid_order_count(conn, table_id)? == 0 {
        write_status(conn, table_id, TableStatus::Available)?;
        debug!(table_id, from = %table.status, "Table released");
        return Ok(TableStatus::Available);
    }
    Ok(table.status)
}

pub fn active_orders_for_table(conn: &Connection, table_id: i64) -> Result<Vec<OrderWithItems>> {
    get_table(conn, table_id)?;
    let mut result = Vec::new();
    for status in [OrderStatus::Pending, OrderStatus::Preparing, OrderStatus::Ready] {
        let filter = crate::models::OrderFilter {
            status: Some(status),
            table_id: Some(table_id),
            date: None,
        };
        result.extend(orders::list_orders(conn, &filter)?);
    }
    result.sort_by_key(|o| o.order.id);
    Ok(result)
}
