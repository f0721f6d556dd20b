//! SQLite storage for OrderChha.
//!
//! One backend only. The store opens at the configured file path with WAL and
//! foreign keys on; if that fails and fallback is allowed, an in-memory
//! database is used instead and reported through `storage_status`, until an
//! operator reconnects to the file store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::error::{PosError, Result};
use crate::models::{StorageMode, StorageStatus};

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

pub struct Database {
    pub conn: Mutex<Connection>,
    mode: RwLock<StorageMode>,
    path: PathBuf,
}

impl Database {
    /// Open the file store at `path`, falling back to memory when allowed.
    pub fn open(path: &Path, allow_memory_fallback: bool) -> Result<Self> {
        info!(path = %path.display(), "Opening database");

        match open_file_store(path) {
            Ok(conn) => Ok(Database {
                conn: Mutex::new(conn),
                mode: RwLock::new(StorageMode::File),
                path: path.to_path_buf(),
            }),
            Err(e) if allow_memory_fallback => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Primary store unavailable, falling back to in-memory database"
                );
                let conn = open_memory_store()?;
                Ok(Database {
                    conn: Mutex::new(conn),
                    mode: RwLock::new(StorageMode::InMemory),
                    path: path.to_path_buf(),
                })
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Database open failed");
                Err(e)
            }
        }
    }

    /// Fresh, fully migrated in-memory database.
    pub fn in_memory() -> Result<Self> {
        Ok(Database {
            conn: Mutex::new(open_memory_store()?),
            mode: RwLock::new(StorageMode::InMemory),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Run `f` with the locked connection.
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock()?;
        f(&mut conn)
    }

    pub fn mode(&self) -> StorageMode {
        self.mode.read().map(|m| *m).unwrap_or(StorageMode::InMemory)
    }

    pub fn status(&self) -> Result<StorageStatus> {
        let conn = self.conn.lock()?;
        Ok(StorageStatus {
            mode: self.mode(),
            path: self.path.display().to_string(),
            schema_version: schema_version(&conn)?,
        })
    }

    /// Swap the in-memory fallback for the file store.
    ///
    /// Nothing is copied across: unless `force` is set this refuses while the
    /// fallback store holds orders or payments, so they are not silently lost.
    pub fn reconnect_primary(&self, force: bool) -> Result<StorageStatus> {
        if self.mode() == StorageMode::File {
            return self.status();
        }

        let mut conn = self.conn.lock()?;
        if !force {
            let recorded: i64 = conn.query_row(
                "SELECT (SELECT COUNT(*) FROM orders) + (SELECT COUNT(*) FROM transactions)",
                [],
                |row| row.get(0),
            )?;
            if recorded > 0 {
                return Err(PosError::conflict(format!(
                    "in-memory store holds {recorded} orders/payments that would be discarded"
                )));
            }
        }

        let primary = open_file_store(&self.path)?;
        *conn = primary;
        *self.mode.write()? = StorageMode::File;
        info!(path = %self.path.display(), "Reconnected to primary database");

        Ok(StorageStatus {
            mode: StorageMode::File,
            path: self.path.display().to_string(),
            schema_version: schema_version(&conn)?,
        })
    }
}

fn open_file_store(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn open_memory_store() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );",
    )?;

    let current = schema_version(conn)?;
    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// v1: core restaurant schema.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL,
            pin_hash TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS dining_tables (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            location TEXT,
            capacity INTEGER NOT NULL DEFAULT 4 CHECK (capacity > 0),
            status TEXT NOT NULL DEFAULT 'available',
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS menu_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT,
            price REAL NOT NULL CHECK (price >= 0),
            category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
            is_available INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            table_id INTEGER NOT NULL REFERENCES dining_tables(id),
            staff_id INTEGER REFERENCES users(id),
            customer_name TEXT,
            notes TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            total_amount REAL NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_orders_table_status ON orders(table_id, status);

        CREATE TABLE IF NOT EXISTS order_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            menu_item_id INTEGER NOT NULL REFERENCES menu_items(id),
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            price REAL NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);

        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            table_id INTEGER NOT NULL REFERENCES dining_tables(id),
            order_id INTEGER NOT NULL REFERENCES orders(id),
            amount REAL NOT NULL,
            method TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'completed',
            invoice_number TEXT NOT NULL UNIQUE,
            tendered REAL,
            change_due REAL,
            cashier_id INTEGER REFERENCES users(id),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_paid_once
            ON transactions(order_id) WHERE status = 'completed';

        CREATE TABLE IF NOT EXISTS inventory_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            stock REAL NOT NULL DEFAULT 0 CHECK (stock >= 0),
            unit TEXT NOT NULL,
            purchase_price REAL NOT NULL DEFAULT 0,
            low_stock_threshold REAL NOT NULL DEFAULT 0,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS inventory_adjustments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id INTEGER NOT NULL REFERENCES inventory_items(id) ON DELETE CASCADE,
            delta REAL NOT NULL,
            reason TEXT NOT NULL,
            user_id INTEGER REFERENCES users(id),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            message TEXT NOT NULL,
            order_id INTEGER,
            table_id INTEGER,
            is_read INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        INSERT INTO schema_version (version) VALUES (1);

        COMMIT;
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        PosError::Database(e)
    })?;

    info!("Applied migration v1 (core schema)");
    Ok(())
}

/// v2: end-of-day closings.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;

        CREATE TABLE IF NOT EXISTS day_closings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date DATE NOT NULL UNIQUE,
            total_revenue REAL NOT NULL,
            total_orders INTEGER NOT NULL,
            closed_by INTEGER REFERENCES users(id),
            closed_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        INSERT INTO schema_version (version) VALUES (2);

        COMMIT;
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        PosError::Database(e)
    })?;

    info!("Applied migration v2 (day_closings table)");
    Ok(())
}

/// v3: rewrite legacy status spellings so SQL filters only ever see the
/// canonical names.
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;

        UPDATE orders SET status = lower(trim(status))
            WHERE status <> lower(trim(status));
        UPDATE orders SET status = 'ready'
            WHERE status IN ('ready-for-billing', 'ready_for_billing', 'ready for billing');
        UPDATE orders SET status = 'completed' WHERE status = 'paid';
        UPDATE orders SET status = 'cancelled' WHERE status = 'canceled';

        UPDATE dining_tables SET status = lower(trim(status))
            WHERE status <> lower(trim(status));
        UPDATE dining_tables SET status = 'available' WHERE status = 'free';

        UPDATE transactions SET status = 'completed'
            WHERE lower(trim(status)) IN ('paid', 'completed')
              AND status <> 'completed'
              AND NOT EXISTS (
                  SELECT 1 FROM transactions t
                  WHERE t.order_id = transactions.order_id AND t.status = 'completed'
              );
        UPDATE transactions SET status = 'refunded'
            WHERE lower(trim(status)) = 'refunded' AND status <> 'refunded';
        UPDATE transactions SET method = lower(trim(method))
            WHERE method <> lower(trim(method));
        UPDATE transactions SET method = 'online' WHERE method IN ('wallet', 'qr');

        UPDATE users SET role = lower(trim(role)) WHERE role <> lower(trim(role));

        INSERT INTO schema_version (version) VALUES (3);

        COMMIT;
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        PosError::Database(e)
    })?;

    info!("Applied migration v3 (canonical status names)");
    Ok(())
}

/// Migrated in-memory connection for unit tests across the crate.
#[cfg(test)]
pub fn test_conn() -> Connection {
    open_memory_store().expect("in-memory store should open")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<String>, _>>()
            .unwrap()
    }

    #[test]
    fn test_migrations_create_schema() {
        let conn = test_conn();
        let tables = table_names(&conn);
        for expected in [
            "categories",
            "day_closings",
            "dining_tables",
            "inventory_adjustments",
            "inventory_items",
            "menu_items",
            "notifications",
            "order_items",
            "orders",
            "schema_version",
            "transactions",
            "users",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let rows: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_legacy_spellings_are_rewritten_on_upgrade() {
        let conn = test_conn();
        conn.execute_batch(
            "INSERT INTO dining_tables (name, status) VALUES ('T1', 'Free');
             INSERT INTO orders (table_id, status, total_amount) VALUES (1, 'ready-for-billing', 10);
             INSERT INTO orders (table_id, status, total_amount) VALUES (1, 'PAID', 10);
             INSERT INTO orders (table_id, status, total_amount) VALUES (1, 'canceled', 10);
             INSERT INTO transactions (table_id, order_id, amount, method, status, invoice_number)
                VALUES (1, 2, 10, 'wallet', 'paid', 'INV-1');
             DELETE FROM schema_version WHERE version = 3;",
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        let statuses: Vec<String> = conn
            .prepare("SELECT status FROM orders ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(statuses, ["ready", "completed", "cancelled"]);

        let table: String = conn
            .query_row("SELECT status FROM dining_tables WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(table, "available");

        let (status, method): (String, String) = conn
            .query_row("SELECT status, method FROM transactions", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!((status.as_str(), method.as_str()), ("completed", "online"));
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = test_conn();
        let result = conn.execute(
            "INSERT INTO orders (table_id, status, total_amount) VALUES (999, 'pending', 0)",
            [],
        );
        assert!(result.is_err(), "order for a missing table must be rejected");
    }

    #[test]
    fn test_order_can_only_be_paid_once() {
        let conn = test_conn();
        conn.execute_batch(
            "INSERT INTO dining_tables (name) VALUES ('T1');
             INSERT INTO orders (table_id, status, total_amount) VALUES (1, 'completed', 10);
             INSERT INTO transactions (table_id, order_id, amount, method, invoice_number)
                VALUES (1, 1, 10, 'cash', 'INV-1');",
        )
        .unwrap();

        let second = conn.execute(
            "INSERT INTO transactions (table_id, order_id, amount, method, invoice_number)
             VALUES (1, 1, 10, 'cash', 'INV-2')",
            [],
        );
        assert!(second.is_err());
    }

    #[test]
    fn test_file_store_opens_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos.db");

        let db = Database::open(&path, false).unwrap();
        assert_eq!(db.mode(), StorageMode::File);

        let mode: String = db
            .with_conn(|c| Ok(c.query_row("PRAGMA journal_mode", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_falls_back_to_memory_when_primary_unusable() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the database file should be cannot be opened as SQLite.
        let path = dir.path().join("pos.db");
        std::fs::create_dir_all(&path).unwrap();

        let db = Database::open(&path, true).unwrap();
        assert_eq!(db.mode(), StorageMode::InMemory);
        assert_eq!(db.status().unwrap().schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_no_fallback_surfaces_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos.db");
        std::fs::create_dir_all(&path).unwrap();

        assert!(Database::open(&path, false).is_err());
    }

    #[test]
    fn test_reconnect_primary_after_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos.db");
        std::fs::create_dir_all(&path).unwrap();

        let db = Database::open(&path, true).unwrap();
        assert_eq!(db.mode(), StorageMode::InMemory);

        // Still broken: reconnect fails and the fallback stays in place.
        assert!(db.reconnect_primary(false).is_err());
        assert_eq!(db.mode(), StorageMode::InMemory);

        std::fs::remove_dir(&path).unwrap();
        let status = db.reconnect_primary(false).unwrap();
        assert_eq!(status.mode, StorageMode::File);
        assert_eq!(db.mode(), StorageMode::File);
    }

    #[test]
    fn test_reconnect_refuses_to_discard_orders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos.db");
        std::fs::create_dir_all(&path).unwrap();

        let db = Database::open(&path, true).unwrap();
        db.with_conn(|c| {
            c.execute_batch(
                "INSERT INTO dining_tables (name) VALUES ('T1');
                 INSERT INTO orders (table_id, status, total_amount) VALUES (1, 'pending', 5);",
            )?;
            Ok(())
        })
        .unwrap();
        std::fs::remove_dir(&path).unwrap();

        assert!(matches!(
            db.reconnect_primary(false),
            Err(PosError::Conflict(_))
        ));
        assert_eq!(db.reconnect_primary(true).unwrap().mode, StorageMode::File);
    }
}
