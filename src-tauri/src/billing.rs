//! Bills and payments.
//!
//! A settlement writes one transaction row per order, marks those orders
//! completed and recomputes the table status inside a single SQLite
//! transaction. A completed transaction is unique per order at the schema
//! level, so an order can never be paid twice.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, Row};
use tracing::{info, warn};

use crate::error::{OptionalRow, PosError, Result};
use crate::models::{
    round_money, BillTotals, NotificationKind, Order, OrderFilter, OrderStatus, Payment,
    PaymentMethod, Permission, Receipt, Settlement, Table, TableBill, TableStatus, Transaction,
    TransactionStatus,
};
use crate::{notifications, orders, tables, users};

const TRANSACTION_COLUMNS: &str = "id, table_id, order_id, amount, method, status, invoice_number,
     tendered, change_due, cashier_id, created_at";

// Absorbs float noise when comparing tendered cash against a total.
const MONEY_EPSILON: f64 = 0.005;

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get(0)?,
        table_id: row.get(1)?,
        order_id: row.get(2)?,
        amount: row.get(3)?,
        method: row.get(4)?,
        status: row.get(5)?,
        invoice_number: row.get(6)?,
        tendered: row.get(7)?,
        change_due: row.get(8)?,
        cashier_id: row.get(9)?,
        created_at: row.get(10)?,
    })
}

pub fn compute_totals(subtotal: f64, tax_rate: f64) -> BillTotals {
    let subtotal = round_money(subtotal);
    let tax = round_money(subtotal * tax_rate);
    BillTotals {
        subtotal,
        tax,
        total: round_money(subtotal + tax),
    }
}

/// Table totals as the sum of per-order totals, each taxed and rounded on its
/// own, so the figure shown always equals what `settle_table` charges.
fn sum_totals(parts: impl IntoIterator<Item = BillTotals>) -> BillTotals {
    let (subtotal, tax, total) = parts
        .into_iter()
        .fold((0.0, 0.0, 0.0), |(s, t, g), part| {
            (s + part.subtotal, t + part.tax, g + part.total)
        });
    BillTotals {
        subtotal: round_money(subtotal),
        tax: round_money(tax),
        total: round_money(total),
    }
}

/// Ready orders grouped by table, with per-table totals.
pub fn billing_overview(conn: &Connection, tax_rate: f64) -> Result<Vec<TableBill>> {
    let ready = orders::list_orders(
        conn,
        &OrderFilter {
            status: Some(OrderStatus::Ready),
            ..OrderFilter::default()
        },
    )?;

    let mut by_table: BTreeMap<i64, Vec<_>> = BTreeMap::new();
    for order in ready {
        by_table.entry(order.order.table_id).or_default().push(order);
    }

    let mut bills = Vec::with_capacity(by_table.len());
    for (table_id, mut table_orders) in by_table {
        table_orders.sort_by_key(|o| o.order.id);
        let table = tables::get_table(conn, table_id)?;
        let totals = sum_totals(
            table_orders
                .iter()
                .map(|o| compute_totals(o.order.total_amount, tax_rate)),
        );
        bills.push(TableBill {
            table_id,
            table_name: table.name,
            table_status: table.status,
            orders: table_orders,
            totals,
        });
    }
    Ok(bills)
}

/// Move a table to `billing` once its orders are all ready.
pub fn request_bill(conn: &Connection, table_id: i64) -> Result<Table> {
    tables::set_table_status(conn, table_id, TableStatus::Billing)
}

/// `INV-YYYYMMDD-NNNN`, numbered per local day.
fn next_invoice_number(conn: &Connection) -> Result<String> {
    let day = chrono::Local::now().format("%Y%m%d").to_string();
    let prefix = format!("INV-{day}-");
    let issued: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE invoice_number LIKE ?1 || '%'",
        [&prefix],
        |row| row.get(0),
    )?;
    Ok(format!("{prefix}{:04}", issued + 1))
}

fn validate_payment(payment: &Payment, amount_due: f64) -> Result<(Option<f64>, Option<f64>)> {
    match payment.method {
        PaymentMethod::Cash => {
            let tendered = payment
                .tendered
                .ok_or_else(|| PosError::validation("cash payments need the tendered amount"))?;
            if !tendered.is_finite() || tendered + MONEY_EPSILON < amount_due {
                return Err(PosError::validation(format!(
                    "tendered {tendered:.2} does not cover {amount_due:.2}"
                )));
            }
            Ok((Some(round_money(tendered)), Some(round_money(tendered - amount_due))))
        }
        PaymentMethod::Card | PaymentMethod::Online => Ok((None, None)),
    }
}

/// Pay `to_pay` in the caller's transaction. The cash tendered covers the
/// whole batch and is recorded on the first row.
fn settle_orders(
    conn: &Connection,
    table_id: i64,
    to_pay: &[Order],
    payment: &Payment,
    tax_rate: f64,
) -> Result<Settlement> {
    let mut per_order = Vec::with_capacity(to_pay.len());
    for order in to_pay {
        if order.status != OrderStatus::Ready {
            return Err(PosError::conflict(format!(
                "order #{} is {}, only ready orders can be paid",
                order.id, order.status
            )));
        }
        let subtotal = orders::recompute_total(conn, order.id)?;
        per_order.push(compute_totals(subtotal, tax_rate));
    }
    let amounts: Vec<f64> = per_order.iter().map(|t| t.total).collect();
    let total_paid = sum_totals(per_order).total;
    let (tendered, change_due) = validate_payment(payment, total_paid)?;

    let mut transactions = Vec::with_capacity(to_pay.len());
    for (i, (order, amount)) in to_pay.iter().zip(&amounts).enumerate() {
        let (row_tendered, row_change) = if i == 0 {
            (tendered, change_due)
        } else {
            (None, None)
        };
        let invoice = next_invoice_number(conn)?;
        conn.execute(
            "INSERT INTO transactions
                (table_id, order_id, amount, method, status, invoice_number, tendered, change_due, cashier_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                table_id,
                order.id,
                amount,
                payment.method,
                TransactionStatus::Completed,
                invoice,
                row_tendered,
                row_change,
                payment.cashier_id
            ],
        )?;
        let id = conn.last_insert_rowid();
        orders::write_status(conn, order.id, OrderStatus::Completed)?;
        transactions.push(get_transaction(conn, id)?);
    }

    let table_status = tables::release_if_idle(conn, table_id)?;

    let invoices: Vec<&str> = transactions
        .iter()
        .map(|t| t.invoice_number.as_str())
        .collect();
    notifications::record(
        conn,
        NotificationKind::PaymentReceived,
        &format!(
            "Payment of {total_paid:.2} by {} received ({})",
            payment.method,
            invoices.join(", ")
        ),
        (to_pay.len() == 1).then(|| to_pay[0].id),
        Some(table_id),
    )?;

    Ok(Settlement {
        table_id,
        transactions,
        total_paid,
        change_due,
        table_status,
    })
}

pub fn settle_order(
    conn: &mut Connection,
    order_id: i64,
    payment: &Payment,
    tax_rate: f64,
) -> Result<Settlement> {
    let tx = conn.transaction()?;
    users::require_permission(&tx, payment.cashier_id, Permission::TakePayment)?;

    let order = orders::get_order_row(&tx, order_id)?;
    if order.status == OrderStatus::Completed {
        return Err(PosError::conflict(format!("order #{order_id} is already paid")));
    }
    let settlement = settle_orders(&tx, order.table_id, &[order], payment, tax_rate)?;
    tx.commit()?;

    info!(
        order_id,
        table_id = settlement.table_id,
        method = %payment.method,
        amount = settlement.total_paid,
        table_status = %settlement.table_status,
        "Order settled"
    );
    Ok(settlement)
}

/// Pay every ready order on the table at once. Fails as a whole while any
/// order is still in the kitchen.
pub fn settle_table(
    conn: &mut Connection,
    table_id: i64,
    payment: &Payment,
    tax_rate: f64,
) -> Result<Settlement> {
    let tx = conn.transaction()?;
    users::require_permission(&tx, payment.cashier_id, Permission::TakePayment)?;
    tables::get_table(&tx, table_id)?;
    tables::check_can_bill(&tx, table_id)?;

    let ready: Vec<Order> = orders::list_orders(
        &tx,
        &OrderFilter {
            status: Some(OrderStatus::Ready),
            table_id: Some(table_id),
            date: None,
        },
    )?
    .into_iter()
    .map(|o| o.order)
    .collect();

    let settlement = settle_orders(&tx, table_id, &ready, payment, tax_rate)?;
    tx.commit()?;

    info!(
        table_id,
        orders = settlement.transactions.len(),
        method = %payment.method,
        amount = settlement.total_paid,
        "Table settled"
    );
    Ok(settlement)
}

pub fn get_transaction(conn: &Connection, id: i64) -> Result<Transaction> {
    conn.query_row(
        &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?1"),
        [id],
        transaction_from_row,
    )
    .or_not_found(format_args!("transaction {id}"))
}

/// Transactions for a local `YYYY-MM-DD` date, or all when `date` is `None`.
pub fn list_transactions(conn: &Connection, date: Option<&str>) -> Result<Vec<Transaction>> {
    let sql = match date {
        Some(_) => format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE date(created_at, 'localtime') = ?1 ORDER BY id DESC"
        ),
        None => format!("SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY id DESC"),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = match date {
        Some(d) => stmt.query_map([d], transaction_from_row)?,
        None => stmt.query_map([], transaction_from_row)?,
    };
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn get_receipt(
    conn: &Connection,
    order_id: i64,
    tax_rate: f64,
    currency: &str,
) -> Result<Receipt> {
    let order = orders::get_order(conn, order_id)?;
    let subtotal: f64 = order.items.iter().map(|i| i.line_total()).sum();

    let transaction = conn
        .query_row(
            &format!(
                "SELECT {TRANSACTION_COLUMNS} FROM transactions
                 WHERE order_id = ?1 ORDER BY status = 'completed' DESC, id DESC LIMIT 1"
            ),
            [order_id],
            transaction_from_row,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    // A paid receipt shows what was charged, not today's tax rate.
    let totals = match &transaction {
        Some(t) => BillTotals {
            subtotal: round_money(subtotal),
            tax: round_money(t.amount - subtotal),
            total: t.amount,
        },
        None => compute_totals(subtotal, tax_rate),
    };

    Ok(Receipt {
        order,
        totals,
        transaction,
        currency: currency.to_string(),
    })
}

/// Mark a completed transaction refunded. Accounting only: the order stays
/// completed and the table is not touched.
pub fn refund_transaction(conn: &Connection, id: i64, actor_id: i64) -> Result<Transaction> {
    users::require_permission(conn, actor_id, Permission::TakePayment)?;
    let transaction = get_transaction(conn, id)?;
    if transaction.status == TransactionStatus::Refunded {
        return Err(PosError::conflict(format!(
            "{} is already refunded",
            transaction.invoice_number
        )));
    }
    conn.execute(
        "UPDATE transactions SET status = ?1 WHERE id = ?2",
        params![TransactionStatus::Refunded, id],
    )?;
    warn!(
        transaction_id = id,
        invoice = %transaction.invoice_number,
        amount = transaction.amount,
        actor_id,
        "Transaction refunded"
    );
    get_transaction(conn, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kitchen;
    use crate::orders::fixtures::{order_for, seed};
    use crate::orders::place_order;

    const CASHIER: i64 = 2;

    fn setup() -> Connection {
        let conn = crate::db::test_conn();
        seed(&conn);
        conn.execute("INSERT INTO users (name, role) VALUES ('Gita', 'cashier')", [])
            .unwrap();
        conn
    }

    fn ready_order(conn: &mut Connection, table_id: i64, items: &[(i64, i32)]) -> i64 {
        let id = place_order(conn, &order_for(table_id, items)).unwrap().order.id;
        kitchen::start_preparing(conn, id).unwrap();
        kitchen::mark_ready(conn, id).unwrap();
        id
    }

    fn cash(tendered: f64) -> Payment {
        Payment {
            method: PaymentMethod::Cash,
            tendered: Some(tendered),
            cashier_id: CASHIER,
        }
    }

    fn card() -> Payment {
        Payment {
            method: PaymentMethod::Card,
            tendered: None,
            cashier_id: CASHIER,
        }
    }

    #[test]
    fn test_totals_with_tax() {
        let totals = compute_totals(100.0, 0.13);
        assert!((totals.tax - 13.0).abs() < 1e-9);
        assert!((totals.total - 113.0).abs() < 1e-9);
    }

    #[test]
    fn test_overview_total_matches_table_settlement() {
        let mut conn = setup();
        let dumpling = crate::menu::create_menu_item(
            &conn,
            &crate::models::CreateMenuItem {
                name: "Dumpling".into(),
                description: None,
                price: 10.05,
                category_id: None,
                is_available: None,
            },
        )
        .unwrap();
        ready_order(&mut conn, 1, &[(dumpling.id, 1)]);
        ready_order(&mut conn, 1, &[(dumpling.id, 1)]);

        let shown = billing_overview(&conn, 0.13).unwrap()[0].totals.total;
        assert!((shown - 22.72).abs() < 1e-9);

        let settlement = settle_table(&mut conn, 1, &cash(shown), 0.13).unwrap();
        assert!((settlement.total_paid - shown).abs() < 1e-9);
        assert_eq!(settlement.change_due, Some(0.0));
    }

    #[test]
    fn test_overview_groups_ready_orders() {
        let mut conn = setup();
        ready_order(&mut conn, 1, &[(1, 1)]);
        ready_order(&mut conn, 1, &[(2, 2)]);
        place_order(&mut conn, &order_for(2, &[(1, 1)])).unwrap();

        let bills = billing_overview(&conn, 0.1).unwrap();
        assert_eq!(bills.len(), 1);
        assert_eq!(bills[0].table_name, "T1");
        assert_eq!(bills[0].orders.len(), 2);
        assert!((bills[0].totals.subtotal - 330.0).abs() < 1e-9);
        assert!((bills[0].totals.total - 363.0).abs() < 1e-9);
    }

    #[test]
    fn test_settle_order_with_cash_frees_table() {
        let mut conn = setup();
        let id = ready_order(&mut conn, 1, &[(1, 2)]);

        let settlement = settle_order(&mut conn, id, &cash(1000.0), 0.0).unwrap();

        assert!((settlement.total_paid - 500.0).abs() < 1e-9);
        assert_eq!(settlement.change_due, Some(500.0));
        assert_eq!(settlement.table_status, TableStatus::Available);
        assert!(settlement.transactions[0].invoice_number.starts_with("INV-"));
        assert_eq!(
            orders::get_order(&conn, id).unwrap().order.status,
            OrderStatus::Completed
        );
    }

    #[test]
    fn test_insufficient_cash_writes_nothing() {
        let mut conn = setup();
        let id = ready_order(&mut conn, 1, &[(1, 2)]);

        let result = settle_order(&mut conn, id, &cash(100.0), 0.0);
        assert!(matches!(result, Err(PosError::Validation(_))));
        assert!(list_transactions(&conn, None).unwrap().is_empty());
        assert_eq!(
            orders::get_order(&conn, id).unwrap().order.status,
            OrderStatus::Ready
        );
    }

    #[test]
    fn test_only_ready_orders_are_paid_once() {
        let mut conn = setup();
        let pending = place_order(&mut conn, &order_for(2, &[(1, 1)])).unwrap().order.id;
        assert!(matches!(
            settle_order(&mut conn, pending, &card(), 0.0),
            Err(PosError::Conflict(_))
        ));

        let id = ready_order(&mut conn, 1, &[(1, 1)]);
        settle_order(&mut conn, id, &card(), 0.0).unwrap();
        assert!(matches!(
            settle_order(&mut conn, id, &card(), 0.0),
            Err(PosError::Conflict(_))
        ));
        assert_eq!(list_transactions(&conn, None).unwrap().len(), 1);
    }

    #[test]
    fn test_waiter_cannot_take_payment() {
        let mut conn = setup();
        let id = ready_order(&mut conn, 1, &[(1, 1)]);
        let payment = Payment {
            cashier_id: 1,
            ..card()
        };
        assert!(matches!(
            settle_order(&mut conn, id, &payment, 0.0),
            Err(PosError::Forbidden(_))
        ));
    }

    #[test]
    fn test_settle_order_keeps_table_while_others_unpaid() {
        let mut conn = setup();
        let first = ready_order(&mut conn, 1, &[(1, 1)]);
        ready_order(&mut conn, 1, &[(2, 1)]);

        let settlement = settle_order(&mut conn, first, &card(), 0.0).unwrap();
        assert_eq!(settlement.table_status, TableStatus::Occupied);
    }

    #[test]
    fn test_settle_table_pays_every_ready_order() {
        let mut conn = setup();
        ready_order(&mut conn, 1, &[(1, 1)]);
        ready_order(&mut conn, 1, &[(2, 1)]);
        request_bill(&conn, 1).unwrap();

        assert!(matches!(
            settle_table(&mut conn, 1, &cash(300.0), 0.13),
            Err(PosError::Validation(_))
        ));
        let settlement = settle_table(&mut conn, 1, &cash(400.0), 0.13).unwrap();

        assert_eq!(settlement.transactions.len(), 2);
        // 250 * 1.13 + 40 * 1.13
        assert!((settlement.total_paid - 327.7).abs() < 1e-6);
        assert!((settlement.change_due.unwrap() - 72.3).abs() < 1e-6);
        assert_eq!(settlement.transactions[1].tendered, None);
        assert_eq!(settlement.table_status, TableStatus::Available);

        let invoices: Vec<String> = settlement
            .transactions
            .iter()
            .map(|t| t.invoice_number.clone())
            .collect();
        assert_ne!(invoices[0], invoices[1]);
        assert!(invoices[1].ends_with("0002"));
    }

    #[test]
    fn test_settle_table_refused_while_kitchen_busy() {
        let mut conn = setup();
        ready_order(&mut conn, 1, &[(1, 1)]);
        place_order(&mut conn, &order_for(1, &[(2, 1)])).unwrap();

        assert!(matches!(
            settle_table(&mut conn, 1, &card(), 0.0),
            Err(PosError::Conflict(_))
        ));
        assert!(list_transactions(&conn, None).unwrap().is_empty());
    }

    #[test]
    fn test_payment_notification_recorded() {
        let mut conn = setup();
        let id = ready_order(&mut conn, 1, &[(1, 1)]);
        settle_order(&mut conn, id, &card(), 0.0).unwrap();

        let kinds: Vec<NotificationKind> = notifications::list_notifications(&conn, false, None)
            .unwrap()
            .into_iter()
            .map(|n| n.kind)
            .collect();
        assert!(kinds.contains(&NotificationKind::PaymentReceived));
    }

    #[test]
    fn test_receipt_and_refund() {
        let mut conn = setup();
        let id = ready_order(&mut conn, 1, &[(1, 2)]);

        let unpaid = get_receipt(&conn, id, 0.1, "NPR").unwrap();
        assert!(unpaid.transaction.is_none());
        assert!((unpaid.totals.total - 550.0).abs() < 1e-9);

        let settlement = settle_order(&mut conn, id, &card(), 0.1).unwrap();
        let receipt = get_receipt(&conn, id, 0.0, "NPR").unwrap();
        assert_eq!(receipt.currency, "NPR");
        assert!((receipt.totals.total - 550.0).abs() < 1e-9);
        assert!((receipt.totals.tax - 50.0).abs() < 1e-9);

        let tx_id = settlement.transactions[0].id;
        let refunded = refund_transaction(&conn, tx_id, CASHIER).unwrap();
        assert_eq!(refunded.status, TransactionStatus::Refunded);
        assert!(matches!(
            refund_transaction(&conn, tx_id, CASHIER),
            Err(PosError::Conflict(_))
        ));
        assert_eq!(
            orders::get_order(&conn, id).unwrap().order.status,
            OrderStatus::Completed
        );
    }
}
