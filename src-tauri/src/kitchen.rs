//! Kitchen display: the queue of orders still being cooked.

use rusqlite::Connection;
use tracing::info;

use crate::error::{PosError, Result};
use crate::models::{NotificationKind, OrderFilter, OrderStatus, OrderWithItems};
use crate::{notifications, orders};

/// Pending and preparing orders, oldest first.
pub fn kitchen_queue(conn: &Connection) -> Result<Vec<OrderWithItems>> {
    let mut queue = Vec::new();
    for status in [OrderStatus::Pending, OrderStatus::Preparing] {
        queue.extend(orders::list_orders(
            conn,
            &OrderFilter {
                status: Some(status),
                ..OrderFilter::default()
            },
        )?);
    }
    queue.sort_by(|a, b| {
        a.order
            .created_at
            .cmp(&b.order.created_at)
            .then(a.order.id.cmp(&b.order.id))
    });
    Ok(queue)
}

pub fn start_preparing(conn: &mut Connection, order_id: i64) -> Result<OrderWithItems> {
    orders::update_order_status(conn, order_id, OrderStatus::Preparing)
}

/// Mark an order ready and notify the floor staff.
pub fn mark_ready(conn: &mut Connection, order_id: i64) -> Result<OrderWithItems> {
    let tx = conn.transaction()?;
    let order = orders::get_order_row(&tx, order_id)?;
    if !order.status.can_transition_to(OrderStatus::Ready) {
        return Err(PosError::InvalidTransition {
            entity: "order",
            from: order.status.to_string(),
            to: OrderStatus::Ready.to_string(),
        });
    }
    orders::write_status(&tx, order_id, OrderStatus::Ready)?;

    let table = order.table_name.as_deref().unwrap_or("?");
    notifications::record(
        &tx,
        NotificationKind::OrderReady,
        &format!("Order #{order_id} for table {table} is ready"),
        Some(order_id),
        Some(order.table_id),
    )?;
    tx.commit()?;

    info!(order_id, table_id = order.table_id, "Order ready");
    orders::get_order(conn, order_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::fixtures::{order_for, seed};
    use crate::orders::place_order;

    #[test]
    fn test_queue_is_oldest_first_and_drops_ready_orders() {
        let mut conn = crate::db::test_conn();
        seed(&conn);
        let first = place_order(&mut conn, &order_for(1, &[(1, 1)])).unwrap();
        let second = place_order(&mut conn, &order_for(2, &[(2, 1)])).unwrap();
        start_preparing(&mut conn, second.order.id).unwrap();

        let queue = kitchen_queue(&conn).unwrap();
        let ids: Vec<i64> = queue.iter().map(|o| o.order.id).collect();
        assert_eq!(ids, vec![first.order.id, second.order.id]);

        mark_ready(&mut conn, second.order.id).unwrap();
        let queue = kitchen_queue(&conn).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].order.id, first.order.id);
    }

    #[test]
    fn test_mark_ready_records_notification() {
        let mut conn = crate::db::test_conn();
        seed(&conn);
        let placed = place_order(&mut conn, &order_for(1, &[(1, 1)])).unwrap();
        start_preparing(&mut conn, placed.order.id).unwrap();

        let ready = mark_ready(&mut conn, placed.order.id).unwrap();
        assert_eq!(ready.order.status, OrderStatus::Ready);

        let notes = notifications::list_notifications(&conn, true, None).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::OrderReady);
        assert_eq!(notes[0].order_id, Some(placed.order.id));
    }

    #[test]
    fn test_pending_order_cannot_skip_to_ready() {
        let mut conn = crate::db::test_conn();
        seed(&conn);
        let placed = place_order(&mut conn, &order_for(1, &[(1, 1)])).unwrap();

        assert!(matches!(
            mark_ready(&mut conn, placed.order.id),
            Err(PosError::InvalidTransition { .. })
        ));
        assert!(notifications::list_notifications(&conn, false, None)
            .unwrap()
            .is_empty());
    }
}
