//! Consistency checks between orders, tables and payments.
//!
//! `scan` only reads. `repair` fixes what can be derived from the orders
//! themselves in one transaction and leaves the rest for a human.

use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::{Issue, OrderStatus, RepairReport, TableStatus};
use crate::{orders, tables};

const TOTAL_TOLERANCE: f64 = 0.005;

fn id_list(conn: &Connection, sql: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

fn orders_without_items(conn: &Connection) -> Result<Vec<(i64, OrderStatus)>> {
    let mut stmt = conn.prepare(
        "SELECT o.id, o.status FROM orders o
         WHERE o.status NOT IN ('cancelled', 'canceled')
           AND NOT EXISTS (SELECT 1 FROM order_items oi WHERE oi.order_id = o.id)
         ORDER BY o.id",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn total_mismatches(conn: &Connection) -> Result<Vec<(i64, OrderStatus, f64, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT o.id, o.status, o.total_amount,
                COALESCE((SELECT SUM(quantity * price) FROM order_items WHERE order_id = o.id), 0)
         FROM orders o
         WHERE o.status NOT IN ('cancelled', 'canceled')
         ORDER BY o.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<rusqlite::Result<Vec<(i64, OrderStatus, f64, f64)>>>()?;
    Ok(rows
        .into_iter()
        .filter(|(_, _, stored, computed)| (stored - computed).abs() > TOTAL_TOLERANCE)
        .collect())
}

pub fn scan(conn: &Connection) -> Result<Vec<Issue>> {
    let mut issues = Vec::new();

    for (order_id, _) in orders_without_items(conn)? {
        issues.push(Issue::OrderWithoutItems { order_id });
    }

    for table in tables::list_tables(conn)? {
        let unpaid = tables::unpaid_order_count(conn, table.id)?;
        match table.status {
            TableStatus::Billing => {
                let ready = tables::count_orders_in(conn, table.id, &[OrderStatus::Ready])?;
                if ready == 0 {
                    issues.push(Issue::BillingWithoutReadyOrders { table_id: table.id });
                }
            }
            TableStatus::Available if unpaid > 0 => {
                issues.push(Issue::AvailableWithUnpaidOrders {
                    table_id: table.id,
                    unpaid,
                });
            }
            TableStatus::Occupied if unpaid == 0 => {
                issues.push(Issue::OccupiedWithoutOrders { table_id: table.id });
            }
            _ => {}
        }
    }

    for order_id in id_list(
        conn,
        "SELECT o.id FROM orders o
         WHERE o.status IN ('completed', 'paid')
           AND NOT EXISTS (SELECT 1 FROM transactions t WHERE t.order_id = o.id)
         ORDER BY o.id",
    )? {
        issues.push(Issue::CompletedWithoutTransaction { order_id });
    }

    for (order_id, _, stored, computed) in total_mismatches(conn)? {
        issues.push(Issue::TotalMismatch {
            order_id,
            stored,
            computed,
        });
    }

    Ok(issues)
}

/// The status a table should have given its unpaid orders, if different.
fn derived_table_status(
    conn: &Connection,
    table_id: i64,
    current: TableStatus,
) -> Result<Option<TableStatus>> {
    let unpaid = tables::unpaid_order_count(conn, table_id)?;
    let next = match current {
        TableStatus::Occupied | TableStatus::Billing if unpaid == 0 => TableStatus::Available,
        TableStatus::Billing if tables::check_can_bill(conn, table_id).is_err() => {
            TableStatus::Occupied
        }
        TableStatus::Available if unpaid > 0 => TableStatus::Occupied,
        _ => return Ok(None),
    };
    Ok(Some(next))
}

pub fn repair(conn: &mut Connection) -> Result<RepairReport> {
    let tx = conn.transaction()?;
    let mut report = RepairReport::default();

    for (order_id, status) in orders_without_items(&tx)? {
        if status.is_unpaid() {
            orders::write_status(&tx, order_id, OrderStatus::Cancelled)?;
            report.cancelled_orders.push(order_id);
        }
    }

    for (order_id, status, _, _) in total_mismatches(&tx)? {
        // Paid orders keep the amount that was charged.
        if status.is_unpaid() {
            orders::recompute_total(&tx, order_id)?;
            report.retotalled_orders.push(order_id);
        }
    }

    for table in tables::list_tables(&tx)? {
        if let Some(next) = derived_table_status(&tx, table.id, table.status)? {
            tables::write_status(&tx, table.id, next)?;
            report.tables_reset.push((table.id, next));
        }
    }

    report.unresolved = scan(&tx)?;
    tx.commit()?;

    info!(
        cancelled = report.cancelled_orders.len(),
        retotalled = report.retotalled_orders.len(),
        tables = report.tables_reset.len(),
        "Repair finished"
    );
    if !report.unresolved.is_empty() {
        warn!(count = report.unresolved.len(), "Issues left for manual review");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::fixtures::{order_for, seed};
    use crate::orders::place_order;

    #[test]
    fn test_clean_database_has_no_issues() {
        let mut conn = crate::db::test_conn();
        seed(&conn);
        place_order(&mut conn, &order_for(1, &[(1, 1)])).unwrap();
        assert!(scan(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_scan_finds_drift() {
        let mut conn = crate::db::test_conn();
        seed(&conn);
        let placed = place_order(&mut conn, &order_for(1, &[(1, 1)])).unwrap();
        conn.execute_batch(
            "UPDATE dining_tables SET status = 'available' WHERE id = 1;
             UPDATE dining_tables SET status = 'billing' WHERE id = 2;
             UPDATE orders SET total_amount = 1.0;
             INSERT INTO orders (table_id, status) VALUES (2, 'completed');",
        )
        .unwrap();

        let issues = scan(&conn).unwrap();
        assert!(issues.contains(&Issue::AvailableWithUnpaidOrders {
            table_id: 1,
            unpaid: 1
        }));
        assert!(issues.contains(&Issue::BillingWithoutReadyOrders { table_id: 2 }));
        assert!(issues.contains(&Issue::OrderWithoutItems { order_id: 2 }));
        assert!(issues.contains(&Issue::CompletedWithoutTransaction { order_id: 2 }));
        assert!(issues.contains(&Issue::TotalMismatch {
            order_id: placed.order.id,
            stored: 1.0,
            computed: 250.0
        }));
    }

    #[test]
    fn test_repair_fixes_derivable_issues() {
        let mut conn = crate::db::test_conn();
        seed(&conn);
        let placed = place_order(&mut conn, &order_for(1, &[(1, 1)])).unwrap();
        conn.execute_batch(
            "UPDATE dining_tables SET status = 'available' WHERE id = 1;
             UPDATE orders SET total_amount = 1.0;
             INSERT INTO orders (table_id, status) VALUES (2, 'pending');
             INSERT INTO orders (table_id, status) VALUES (2, 'completed');",
        )
        .unwrap();

        let report = repair(&mut conn).unwrap();

        assert_eq!(report.cancelled_orders, vec![2]);
        assert_eq!(report.retotalled_orders, vec![placed.order.id]);
        assert!(report.tables_reset.contains(&(1, TableStatus::Occupied)));
        // The completed order has no payment and no items; that needs a person.
        assert!(report
            .unresolved
            .contains(&Issue::CompletedWithoutTransaction { order_id: 3 }));
        assert!(!report
            .unresolved
            .iter()
            .any(|i| matches!(i, Issue::AvailableWithUnpaidOrders { .. })));

        let order = orders::get_order(&conn, placed.order.id).unwrap();
        assert!((order.order.total_amount - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_repair_frees_stale_billing_table() {
        let mut conn = crate::db::test_conn();
        seed(&conn);
        conn.execute("UPDATE dining_tables SET status = 'billing' WHERE id = 2", [])
            .unwrap();

        let report = repair(&mut conn).unwrap();
        assert_eq!(report.tables_reset, vec![(2, TableStatus::Available)]);
        assert!(report.unresolved.is_empty());
    }
}
