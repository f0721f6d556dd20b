use tauri::AppHandle;

use super::{emit, emit_notifications_since, emit_table, ORDER_UPDATED, TABLE_UPDATED};
use crate::billing;
use crate::error::PosError;
use crate::models::{Payment, Receipt, Settlement, Table, TableBill, Transaction};
use crate::state::AppStateExt;
use crate::{notifications, orders};

#[tauri::command]
pub fn get_billing_overview(app: AppHandle) -> Result<Vec<TableBill>, PosError> {
    let state = app.pos();
    state.with_conn(|conn| billing::billing_overview(conn, state.config.tax_rate))
}

#[tauri::command]
pub fn request_bill(app: AppHandle, table_id: i64) -> Result<Table, PosError> {
    let table = app
        .pos()
        .with_conn(|conn| billing::request_bill(conn, table_id))?;
    emit(&app, TABLE_UPDATED, table.clone());
    Ok(table)
}

/// Push the paid orders, the freed table and the payment notification.
fn publish_settlement(
    app: &AppHandle,
    conn: &rusqlite::Connection,
    settlement: &Settlement,
    notifications_mark: i64,
) {
    for transaction in &settlement.transactions {
        if let Ok(order) = orders::get_order(conn, transaction.order_id) {
            emit(app, ORDER_UPDATED, order);
        }
    }
    emit_table(app, conn, settlement.table_id);
    emit_notifications_since(app, conn, notifications_mark);
}

#[tauri::command]
pub fn settle_order(
    app: AppHandle,
    order_id: i64,
    payment: Payment,
) -> Result<Settlement, PosError> {
    let state = app.pos();
    state.with_conn(|conn| {
        let mark = notifications::latest_id(conn)?;
        let settlement = billing::settle_order(conn, order_id, &payment, state.config.tax_rate)?;
        publish_settlement(&app, conn, &settlement, mark);
        Ok(settlement)
    })
}

#[tauri::command]
pub fn settle_table(
    app: AppHandle,
    table_id: i64,
    payment: Payment,
) -> Result<Settlement, PosError> {
    let state = app.pos();
    state.with_conn(|conn| {
        let mark = notifications::latest_id(conn)?;
        let settlement = billing::settle_table(conn, table_id, &payment, state.config.tax_rate)?;
        publish_settlement(&app, conn, &settlement, mark);
        Ok(settlement)
    })
}

#[tauri::command]
pub fn get_transactions(
    app: AppHandle,
    date: Option<String>,
) -> Result<Vec<Transaction>, PosError> {
    app.pos()
        .with_conn(|conn| billing::list_transactions(conn, date.as_deref()))
}

#[tauri::command]
pub fn get_receipt(app: AppHandle, order_id: i64) -> Result<Receipt, PosError> {
    let state = app.pos();
    state.with_conn(|conn| {
        billing::get_receipt(conn, order_id, state.config.tax_rate, &state.config.currency)
    })
}

#[tauri::command]
pub fn refund_transaction(
    app: AppHandle,
    user_id: i64,
    transaction_id: i64,
) -> Result<Transaction, PosError> {
    app.pos()
        .with_conn(|conn| billing::refund_transaction(conn, transaction_id, user_id))
}
