use rusqlite::Connection;
use tauri::{AppHandle, Manager};

use crate::config::AppConfig;
use crate::db::Database;
use crate::error::Result;
use crate::users::SessionStore;

/// Everything the commands share, managed by Tauri.
pub struct AppState {
    pub db: Database,
    pub config: AppConfig,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(db: Database, config: AppConfig) -> Self {
        Self {
            db,
            config,
            sessions: SessionStore::new(),
        }
    }

    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        self.db.with_conn(f)
    }
}

pub trait AppStateExt {
    fn pos(&self) -> &AppState;
}

impl AppStateExt for AppHandle {
    fn pos(&self) -> &AppState {
        self.state::<AppState>().inner()
    }
}
