use rusqlite::{params, Connection, Row};
use tracing::info;

use crate::error::{OptionalRow, PosError, Result};
use crate::models::{Category, CreateMenuItem, MenuItem, UpdateMenuItem};

const MENU_SELECT: &str =
    "SELECT m.id, m.name, m.description, m.price, m.category_id, c.name, m.is_available, m.created_at
     FROM menu_items m
     LEFT JOIN categories c ON m.category_id = c.id";

fn menu_item_from_row(row: &Row<'_>) -> rusqlite::Result<MenuItem> {
    Ok(MenuItem {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        price: row.get(3)?,
        category_id: row.get(4)?,
        category_name: row.get(5)?,
        is_available: row.get(6)?,
        created_at: row.get(7)?,
    })
}

// ===== Categories =====

pub fn list_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare("SELECT id, name FROM categories ORDER BY name")?;
    let categories = stmt
        .query_map([], |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(categories)
}

pub fn create_category(conn: &Connection, name: &str) -> Result<Category> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PosError::validation("category name must not be empty"));
    }
    conn.execute("INSERT INTO categories (name) VALUES (?1)", [name])?;
    let id = conn.last_insert_rowid();
    info!(category_id = id, name, "Category created");
    Ok(Category {
        id,
        name: name.to_string(),
    })
}

/// Items in the category become uncategorised.
pub fn delete_category(conn: &Connection, id: i64) -> Result<()> {
    conn.execute(
        "UPDATE menu_items SET category_id = NULL WHERE category_id = ?1",
        [id],
    )?;
    let deleted = conn.execute("DELETE FROM categories WHERE id = ?1", [id])?;
    if deleted == 0 {
        return Err(PosError::not_found(format_args!("category {id}")));
    }
    info!(category_id = id, "Category deleted");
    Ok(())
}

// ===== Menu items =====

pub fn list_menu_items(conn: &Connection, available_only: bool) -> Result<Vec<MenuItem>> {
    let filter = if available_only {
        " WHERE m.is_available = 1"
    } else {
        ""
    };
    let mut stmt = conn.prepare(&format!(
        "{MENU_SELECT}{filter} ORDER BY c.name IS NULL, c.name, m.name"
    ))?;
    let items = stmt
        .query_map([], menu_item_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

pub fn get_menu_item(conn: &Connection, id: i64) -> Result<MenuItem> {
    conn.query_row(
        &format!("{MENU_SELECT} WHERE m.id = ?1"),
        [id],
        menu_item_from_row,
    )
    .or_not_found(format_args!("menu item {id}"))
}

fn validate_menu_fields(name: &str, price: f64) -> Result<()> {
    if name.trim().is_empty() {
        return Err(PosError::validation("menu item name must not be empty"));
    }
    if !price.is_finite() || price < 0.0 {
        return Err(PosError::validation("price must be zero or more"));
    }
    Ok(())
}

pub fn create_menu_item(conn: &Connection, item: &CreateMenuItem) -> Result<MenuItem> {
    validate_menu_fields(&item.name, item.price)?;

    conn.execute(
        "INSERT INTO menu_items (name, description, price, category_id, is_available)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            item.name.trim(),
            item.description,
            item.price,
            item.category_id,
            item.is_available.unwrap_or(true)
        ],
    )?;
    let id = conn.last_insert_rowid();
    info!(menu_item_id = id, price = item.price, "Menu item created");
    get_menu_item(conn, id)
}

/// Price changes only affect future orders; placed orders keep their copy.
pub fn update_menu_item(conn: &Connection, item: &UpdateMenuItem) -> Result<MenuItem> {
    validate_menu_fields(&item.name, item.price)?;

    let changed = conn.execute(
        "UPDATE menu_items
         SET name = ?1, description = ?2, price = ?3, category_id = ?4, is_available = ?5
         WHERE id = ?6",
        params![
            item.name.trim(),
            item.description,
            item.price,
            item.category_id,
            item.is_available,
            item.id
        ],
    )?;
    if changed == 0 {
        return Err(PosError::not_found(format_args!("menu item {}", item.id)));
    }
    get_menu_item(conn, item.id)
}

pub fn set_menu_item_availability(conn: &Connection, id: i64, available: bool) -> Result<MenuItem> {
    let changed = conn.execute(
        "UPDATE menu_items SET is_available = ?1 WHERE id = ?2",
        params![available, id],
    )?;
    if changed == 0 {
        return Err(PosError::not_found(format_args!("menu item {id}")));
    }
    info!(menu_item_id = id, available, "Menu item availability changed");
    get_menu_item(conn, id)
}

pub fn delete_menu_item(conn: &Connection, id: i64) -> Result<()> {
    let item = get_menu_item(conn, id)?;
    let used: i64 = conn.query_row(
        "SELECT COUNT(*) FROM order_items WHERE menu_item_id = ?1",
        [id],
        |row| row.get(0),
    )?;
    if used > 0 {
        return Err(PosError::conflict(format!(
            "'{}' appears on past orders; mark it unavailable instead",
            item.name
        )));
    }
    conn.execute("DELETE FROM menu_items WHERE id = ?1", [id])?;
    info!(menu_item_id = id, "Menu item deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_conn;

    fn momo(category_id: Option<i64>) -> CreateMenuItem {
        CreateMenuItem {
            name: "Momo".into(),
            description: Some("Steamed dumplings".into()),
            price: 250.0,
            category_id,
            is_available: None,
        }
    }

    #[test]
    fn test_create_item_with_category() {
        let conn = test_conn();
        let snacks = create_category(&conn, "Snacks").unwrap();
        let item = create_menu_item(&conn, &momo(Some(snacks.id))).unwrap();

        assert_eq!(item.category_name.as_deref(), Some("Snacks"));
        assert!(item.is_available);
    }

    #[test]
    fn test_negative_price_rejected() {
        let conn = test_conn();
        let mut bad = momo(None);
        bad.price = -1.0;
        assert!(matches!(
            create_menu_item(&conn, &bad),
            Err(PosError::Validation(_))
        ));
    }

    #[test]
    fn test_delete_category_uncategorises_items() {
        let conn = test_conn();
        let snacks = create_category(&conn, "Snacks").unwrap();
        let item = create_menu_item(&conn, &momo(Some(snacks.id))).unwrap();

        delete_category(&conn, snacks.id).unwrap();

        let item = get_menu_item(&conn, item.id).unwrap();
        assert_eq!(item.category_id, None);
        assert!(list_categories(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_available_only_filter() {
        let conn = test_conn();
        let a = create_menu_item(&conn, &momo(None)).unwrap();
        let mut tea = momo(None);
        tea.name = "Tea".into();
        create_menu_item(&conn, &tea).unwrap();

        set_menu_item_availability(&conn, a.id, false).unwrap();

        assert_eq!(list_menu_items(&conn, false).unwrap().len(), 2);
        let available = list_menu_items(&conn, true).unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name, "Tea");
    }

    #[test]
    fn test_update_missing_item() {
        let conn = test_conn();
        let result = update_menu_item(
            &conn,
            &UpdateMenuItem {
                id: 7,
                name: "Ghost".into(),
                description: None,
                price: 1.0,
                category_id: None,
                is_available: true,
            },
        );
        assert!(matches!(result, Err(PosError::NotFound(_))));
    }

    #[test]
    fn test_ordered_item_cannot_be_deleted() {
        let conn = test_conn();
        let item = create_menu_item(&conn, &momo(None)).unwrap();
        conn.execute_batch(
            "INSERT INTO dining_tables (name) VALUES ('T1');
             INSERT INTO orders (table_id) VALUES (1);",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO order_items (order_id, menu_item_id, quantity, price) VALUES (1, ?1, 1, 250)",
            [item.id],
        )
        .unwrap();

        assert!(matches!(
            delete_menu_item(&conn, item.id),
            Err(PosError::Conflict(_))
        ));

        let unused = create_menu_item(&conn, &momo(None)).unwrap();
        delete_menu_item(&conn, unused.id).unwrap();
    }
}
