//! Staff accounts, PIN login and role permissions.
//!
//! PINs are stored as bcrypt hashes. Sessions are kept in memory only and
//! vanish when the app restarts.

use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{params, Connection, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{OptionalRow, PosError, Result};
use crate::models::{CreateUser, Permission, Role, Session, User};

#[cfg(not(test))]
const PIN_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PIN_HASH_COST: u32 = 4;

const USER_COLUMNS: &str = "id, name, role, pin_hash IS NOT NULL, is_active, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        role: row.get(2)?,
        has_pin: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn validate_pin(pin: &str) -> Result<()> {
    if !(4..=6).contains(&pin.len()) || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(PosError::validation("PIN must be 4 to 6 digits"));
    }
    Ok(())
}

fn hash_pin(pin: &str) -> Result<String> {
    validate_pin(pin)?;
    Ok(bcrypt::hash(pin, PIN_HASH_COST)?)
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY name"))?;
    let users = stmt
        .query_map([], user_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(users)
}

pub fn get_user(conn: &Connection, id: i64) -> Result<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [id],
        user_from_row,
    )
    .or_not_found(format_args!("user {id}"))
}

/// Fails with `Forbidden` unless `user_id` is active and its role grants `permission`.
pub fn require_permission(conn: &Connection, user_id: i64, permission: Permission) -> Result<User> {
    let user = get_user(conn, user_id)?;
    if !user.is_active {
        return Err(PosError::Forbidden(format!("user '{}' is deactivated", user.name)));
    }
    if !user.role.permits(permission) {
        warn!(user_id, role = %user.role, ?permission, "Permission denied");
        return Err(PosError::Forbidden(format!(
            "role '{}' may not {permission:?}",
            user.role
        )));
    }
    Ok(user)
}

fn user_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
}

fn active_admin_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = ?1 AND is_active = 1",
        [Role::Admin],
        |row| row.get(0),
    )?)
}

/// Like `require_permission`, but returns `Ok(None)` without checking while
/// the user table is empty (first start, fresh in-memory store).
pub fn require_actor(
    conn: &Connection,
    actor_id: Option<i64>,
    permission: Permission,
) -> Result<Option<User>> {
    if user_count(conn)? == 0 {
        return Ok(None);
    }
    let actor = actor_id.ok_or_else(|| PosError::Forbidden("an acting user is required".into()))?;
    require_permission(conn, actor, permission).map(Some)
}

/// Create a user. With no users in the database the first account may be
/// created without an acting user, and it must be an admin.
pub fn create_user(conn: &Connection, actor_id: Option<i64>, user: &CreateUser) -> Result<User> {
    let actor = require_actor(conn, actor_id, Permission::ManageUsers)?;
    if actor.is_none() && user.role != Role::Admin {
        return Err(PosError::validation("the first user must be an admin"));
    }

    let name = user.name.trim();
    if name.is_empty() {
        return Err(PosError::validation("user name must not be empty"));
    }
    let pin_hash = user.pin.as_deref().map(hash_pin).transpose()?;

    conn.execute(
        "INSERT INTO users (name, role, pin_hash) VALUES (?1, ?2, ?3)",
        params![name, user.role, pin_hash],
    )?;
    let id = conn.last_insert_rowid();
    info!(user_id = id, role = %user.role, "User created");
    get_user(conn, id)
}

pub fn update_user(
    conn: &Connection,
    actor_id: i64,
    id: i64,
    role: Role,
    is_active: bool,
) -> Result<User> {
    require_permission(conn, actor_id, Permission::ManageUsers)?;
    let existing = get_user(conn, id)?;

    let loses_admin = existing.role == Role::Admin
        && existing.is_active
        && (role != Role::Admin || !is_active);
    if loses_admin && active_admin_count(conn)? <= 1 {
        return Err(PosError::conflict("cannot remove the last active admin"));
    }

    conn.execute(
        "UPDATE users SET role = ?1, is_active = ?2 WHERE id = ?3",
        params![role, is_active, id],
    )?;
    info!(user_id = id, %role, is_active, "User updated");
    get_user(conn, id)
}

/// Users may change their own PIN; changing someone else's needs `ManageUsers`.
pub fn set_pin(conn: &Connection, actor_id: i64, id: i64, pin: &str) -> Result<User> {
    if actor_id != id {
        require_permission(conn, actor_id, Permission::ManageUsers)?;
    }
    let user = get_user(conn, id)?;
    if actor_id == id && !user.is_active {
        return Err(PosError::Forbidden(format!("user '{}' is deactivated", user.name)));
    }
    let hash = hash_pin(pin)?;
    conn.execute(
        "UPDATE users SET pin_hash = ?1 WHERE id = ?2",
        params![hash, id],
    )?;
    info!(user_id = id, "PIN changed");
    get_user(conn, id)
}

pub fn delete_user(conn: &Connection, actor_id: i64, id: i64) -> Result<()> {
    require_permission(conn, actor_id, Permission::ManageUsers)?;
    if actor_id == id {
        return Err(PosError::conflict("users cannot delete themselves"));
    }
    let user = get_user(conn, id)?;

    let orders: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM orders WHERE staff_id = ?1)
              + (SELECT COUNT(*) FROM transactions WHERE cashier_id = ?1)",
        [id],
        |row| row.get(0),
    )?;
    if orders > 0 {
        return Err(PosError::conflict(format!(
            "'{}' has order history; deactivate the account instead",
            user.name
        )));
    }
    if user.role == Role::Admin && user.is_active && active_admin_count(conn)? <= 1 {
        return Err(PosError::conflict("cannot remove the last active admin"));
    }

    conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
    info!(user_id = id, "User deleted");
    Ok(())
}

/// Active sessions keyed by token.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Result<Session> {
        self.sessions
            .lock()?
            .get(token)
            .cloned()
            .ok_or_else(|| PosError::Auth("session expired or unknown".into()))
    }

    pub fn logout(&self, token: &str) -> Result<bool> {
        Ok(self.sessions.lock()?.remove(token).is_some())
    }

    /// Drop every session belonging to `user_id`.
    pub fn revoke_user(&self, user_id: i64) -> Result<()> {
        self.sessions.lock()?.retain(|_, s| s.user.id != user_id);
        Ok(())
    }
}

pub fn login(conn: &Connection, sessions: &SessionStore, name: &str, pin: &str) -> Result<Session> {
    let found: Option<(i64, Option<String>)> = conn
        .query_row(
            "SELECT id, pin_hash FROM users WHERE name = ?1",
            [name.trim()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    let Some((id, Some(hash))) = found else {
        warn!(name, "Login failed: unknown user or no PIN set");
        return Err(PosError::Auth("invalid name or PIN".into()));
    };
    if !bcrypt::verify(pin, &hash).unwrap_or(false) {
        warn!(user_id = id, "Login failed: wrong PIN");
        return Err(PosError::Auth("invalid name or PIN".into()));
    }

    let user = get_user(conn, id)?;
    if !user.is_active {
        return Err(PosError::Auth(format!("user '{}' is deactivated", user.name)));
    }

    let session = Session {
        token: Uuid::new_v4().to_string(),
        user,
        started_at: chrono::Local::now().to_rfc3339(),
    };
    sessions
        .sessions
        .lock()?
        .insert(session.token.clone(), session.clone());
    info!(user_id = id, role = %session.user.role, "User logged in");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_conn;

    fn admin(conn: &Connection) -> User {
        create_user(
            conn,
            None,
            &CreateUser {
                name: "Admin".into(),
                role: Role::Admin,
                pin: Some("1234".into()),
            },
        )
        .unwrap()
    }

    fn add(conn: &Connection, actor: i64, name: &str, role: Role) -> User {
        create_user(
            conn,
            Some(actor),
            &CreateUser {
                name: name.into(),
                role,
                pin: Some("5678".into()),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_first_user_bootstrap() {
        let conn = test_conn();
        let waiter_first = create_user(
            &conn,
            None,
            &CreateUser {
                name: "Sita".into(),
                role: Role::Waiter,
                pin: None,
            },
        );
        assert!(matches!(waiter_first, Err(PosError::Validation(_))));

        let a = admin(&conn);
        assert!(a.has_pin);

        let second = create_user(
            &conn,
            None,
            &CreateUser {
                name: "Other".into(),
                role: Role::Admin,
                pin: None,
            },
        );
        assert!(matches!(second, Err(PosError::Forbidden(_))));
    }

    #[test]
    fn test_only_managers_create_users() {
        let conn = test_conn();
        let a = admin(&conn);
        let waiter = add(&conn, a.id, "Sita", Role::Waiter);

        let result = create_user(
            &conn,
            Some(waiter.id),
            &CreateUser {
                name: "Hari".into(),
                role: Role::Kitchen,
                pin: None,
            },
        );
        assert!(matches!(result, Err(PosError::Forbidden(_))));
    }

    #[test]
    fn test_pin_format_is_checked() {
        let conn = test_conn();
        let result = create_user(
            &conn,
            None,
            &CreateUser {
                name: "Admin".into(),
                role: Role::Admin,
                pin: Some("12ab".into()),
            },
        );
        assert!(matches!(result, Err(PosError::Validation(_))));
    }

    #[test]
    fn test_login_and_logout() {
        let conn = test_conn();
        let store = SessionStore::new();
        let a = admin(&conn);

        assert!(matches!(
            login(&conn, &store, "Admin", "0000"),
            Err(PosError::Auth(_))
        ));
        assert!(matches!(
            login(&conn, &store, "Nobody", "1234"),
            Err(PosError::Auth(_))
        ));

        let session = login(&conn, &store, "Admin", "1234").unwrap();
        assert_eq!(session.user.id, a.id);
        assert_eq!(store.get(&session.token).unwrap().user.name, "Admin");

        assert!(store.logout(&session.token).unwrap());
        assert!(matches!(store.get(&session.token), Err(PosError::Auth(_))));
    }

    #[test]
    fn test_deactivated_user_cannot_login_or_act() {
        let conn = test_conn();
        let store = SessionStore::new();
        let a = admin(&conn);
        let cashier = add(&conn, a.id, "Gita", Role::Cashier);

        update_user(&conn, a.id, cashier.id, Role::Cashier, false).unwrap();
        assert!(matches!(
            login(&conn, &store, "Gita", "5678"),
            Err(PosError::Auth(_))
        ));
        assert!(matches!(
            require_permission(&conn, cashier.id, Permission::TakePayment),
            Err(PosError::Forbidden(_))
        ));
        assert!(matches!(
            set_pin(&conn, cashier.id, cashier.id, "2468"),
            Err(PosError::Forbidden(_))
        ));
        // An admin can still reset it.
        set_pin(&conn, a.id, cashier.id, "2468").unwrap();
    }

    #[test]
    fn test_permission_matrix() {
        assert!(Role::Cashier.permits(Permission::TakePayment));
        assert!(!Role::Waiter.permits(Permission::TakePayment));
        assert!(Role::Kitchen.permits(Permission::UpdateKitchen));
        assert!(!Role::Kitchen.permits(Permission::TakeOrders));
        assert!(Role::Accountant.permits(Permission::ViewReports));
        assert!(!Role::Staff.permits(Permission::ManageUsers));
        assert!(Role::Admin.permits(Permission::ManageMenu));
    }

    #[test]
    fn test_last_admin_is_protected() {
        let conn = test_conn();
        let a = admin(&conn);
        assert!(matches!(
            update_user(&conn, a.id, a.id, Role::Staff, true),
            Err(PosError::Conflict(_))
        ));

        let b = add(&conn, a.id, "Second", Role::Admin);
        update_user(&conn, a.id, b.id, Role::Staff, true).unwrap();
        assert_eq!(get_user(&conn, b.id).unwrap().role, Role::Staff);
    }

    #[test]
    fn test_user_with_orders_cannot_be_deleted() {
        let conn = test_conn();
        let a = admin(&conn);
        let waiter = add(&conn, a.id, "Sita", Role::Waiter);
        let idle = add(&conn, a.id, "Ram", Role::Waiter);
        conn.execute_batch(
            "INSERT INTO dining_tables (name) VALUES ('T1');
             INSERT INTO orders (table_id, staff_id) VALUES (1, 2);",
        )
        .unwrap();

        assert!(matches!(
            delete_user(&conn, a.id, waiter.id),
            Err(PosError::Conflict(_))
        ));
        delete_user(&conn, a.id, idle.id).unwrap();
        assert!(matches!(get_user(&conn, idle.id), Err(PosError::NotFound(_))));
    }

    #[test]
    fn test_set_own_pin() {
        let conn = test_conn();
        let store = SessionStore::new();
        let a = admin(&conn);
        let waiter = add(&conn, a.id, "Sita", Role::Waiter);

        set_pin(&conn, waiter.id, waiter.id, "4321").unwrap();
        login(&conn, &store, "Sita", "4321").unwrap();

        assert!(matches!(
            set_pin(&conn, waiter.id, a.id, "9999"),
            Err(PosError::Forbidden(_))
        ));
    }
}
