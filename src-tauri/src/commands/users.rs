use tauri::AppHandle;

use crate::error::PosError;
use crate::models::{CreateUser, Role, Session, User};
use crate::state::AppStateExt;
use crate::users;

#[tauri::command]
pub fn get_users(app: AppHandle) -> Result<Vec<User>, PosError> {
    app.pos().with_conn(|conn| users::list_users(conn))
}

/// `actor_id` may be omitted only to create the first admin.
#[tauri::command]
pub fn create_user(
    app: AppHandle,
    actor_id: Option<i64>,
    user: CreateUser,
) -> Result<User, PosError> {
    app.pos()
        .with_conn(|conn| users::create_user(conn, actor_id, &user))
}

#[tauri::command]
pub fn update_user(
    app: AppHandle,
    actor_id: i64,
    id: i64,
    role: Role,
    is_active: bool,
) -> Result<User, PosError> {
    let state = app.pos();
    let user = state.with_conn(|conn| users::update_user(conn, actor_id, id, role, is_active))?;
    if !user.is_active {
        state.sessions.revoke_user(user.id)?;
    }
    Ok(user)
}

#[tauri::command]
pub fn set_user_pin(app: AppHandle, actor_id: i64, id: i64, pin: String) -> Result<User, PosError> {
    app.pos()
        .with_conn(|conn| users::set_pin(conn, actor_id, id, &pin))
}

#[tauri::command]
pub fn delete_user(app: AppHandle, actor_id: i64, id: i64) -> Result<(), PosError> {
    let state = app.pos();
    state.with_conn(|conn| users::delete_user(conn, actor_id, id))?;
    state.sessions.revoke_user(id)
}

#[tauri::command]
pub fn login(app: AppHandle, name: String, pin: String) -> Result<Session, PosError> {
    let state = app.pos();
    state.with_conn(|conn| users::login(conn, &state.sessions, &name, &pin))
}

#[tauri::command]
pub fn logout(app: AppHandle, token: String) -> Result<bool, PosError> {
    app.pos().sessions.logout(&token)
}

#[tauri::command]
pub fn current_session(app: AppHandle, token: String) -> Result<Session, PosError> {
    app.pos().sessions.get(&token)
}
