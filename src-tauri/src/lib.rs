mod billing;
mod commands;
mod config;
mod db;
mod diagnostics;
mod error;
mod inventory;
mod kitchen;
mod logging;
mod menu;
mod models;
mod notifications;
mod orders;
mod reports;
mod state;
mod tables;
mod users;


use commands::{
    billing as billing_cmd, inventory as inventory_cmd, kitchen as kitchen_cmd, menu as menu_cmd,
    notifications as notifications_cmd, orders as orders_cmd, reports as reports_cmd, system,
    tables as tables_cmd, users as users_cmd,
};
use config::AppConfig;
use db::Database;
use state::AppState;
use tauri::{
    menu::{Menu, MenuItem},
    tray::{MouseButton, MouseButtonState, TrayIconBuilder, TrayIconEvent},
    Manager,
};
use tracing::{error, info};

fn setup_state(app: &tauri::App) -> Result<AppState, Box<dyn std::error::Error>> {
    let paths = app.path();
    let config_dir = paths.app_config_dir()?;
    let data_dir = paths.app_data_dir()?;

    // Config decides the log filter, so logging starts once it is read.
    let config = AppConfig::load(&config_dir);
    let log_filter = config
        .as_ref()
        .map(|c| c.log_filter.clone())
        .unwrap_or_else(|_| AppConfig::default().log_filter);
    logging::init(paths.app_log_dir().ok().as_deref(), &log_filter);
    info!("Starting OrderChha v{}", env!("CARGO_PKG_VERSION"));

    let config = config.map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;
    let db_path = config.db_path(&data_dir);
    let db = Database::open(&db_path, config.allow_memory_fallback)?;
    info!(mode = ?db.mode(), path = %db_path.display(), "Storage ready");

    Ok(AppState::new(db, config))
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let result = tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let state = setup_state(app)?;
            app.manage(state);

            // Tray: left click toggles the main window
            let quit = MenuItem::with_id(app, "quit", "Quit", true, None::<&str>)?;
            let menu = Menu::with_items(app, &[&quit])?;

            let mut tray = TrayIconBuilder::new()
                .tooltip("OrderChha")
                .menu(&menu)
                .show_menu_on_left_click(false);
            if let Some(icon) = app.default_window_icon() {
                tray = tray.icon(icon.clone());
            }
            let _tray = tray
                .on_tray_icon_event(|tray, event| {
                    if let TrayIconEvent::Click {
                        button: MouseButton::Left,
                        button_state: MouseButtonState::Up,
                        ..
                    } = event
                    {
                        let app = tray.app_handle();
                        if let Some(window) = app.get_webview_window("main") {
                            if window.is_visible().unwrap_or(false) {
                                let _ = window.hide();
                            } else {
                                let _ = window.show();
                                let _ = window.set_focus();
                            }
                        }
                    }
                })
                .on_menu_event(|app, event| {
                    if event.id == "quit" {
                        info!("Quit requested from tray");
                        app.exit(0);
                    }
                })
                .build(app)?;

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Tables
            tables_cmd::get_tables,
            tables_cmd::get_table,
            tables_cmd::create_table,
            tables_cmd::update_table,
            tables_cmd::delete_table,
            tables_cmd::set_table_status,
            tables_cmd::get_active_orders,
            // Menu
            menu_cmd::get_categories,
            menu_cmd::create_category,
            menu_cmd::delete_category,
            menu_cmd::get_menu_items,
            menu_cmd::get_menu_item,
            menu_cmd::create_menu_item,
            menu_cmd::update_menu_item,
            menu_cmd::set_menu_item_availability,
            menu_cmd::delete_menu_item,
            // Orders
            orders_cmd::place_order,
            orders_cmd::add_items_to_order,
            orders_cmd::remove_order_item,
            orders_cmd::get_order,
            orders_cmd::get_orders,
            orders_cmd::update_order_status,
            orders_cmd::cancel_order,
            orders_cmd::update_order_notes,
            // Kitchen
            kitchen_cmd::get_kitchen_queue,
            kitchen_cmd::start_preparing,
            kitchen_cmd::mark_order_ready,
            // Billing
            billing_cmd::get_billing_overview,
            billing_cmd::request_bill,
            billing_cmd::settle_order,
            billing_cmd::settle_table,
            billing_cmd::get_transactions,
            billing_cmd::get_receipt,
            billing_cmd::refund_transaction,
            // Inventory
            inventory_cmd::get_inventory,
            inventory_cmd::create_inventory_item,
            inventory_cmd::update_inventory_item,
            inventory_cmd::delete_inventory_item,
            inventory_cmd::adjust_stock,
            inventory_cmd::get_low_stock,
            inventory_cmd::get_adjustment_history,
            // Users
            users_cmd::get_users,
            users_cmd::create_user,
            users_cmd::update_user,
            users_cmd::set_user_pin,
            users_cmd::delete_user,
            users_cmd::login,
            users_cmd::logout,
            users_cmd::current_session,
            // Notifications
            notifications_cmd::get_notifications,
            notifications_cmd::mark_notification_read,
            notifications_cmd::mark_all_notifications_read,
            // Reports
            reports_cmd::get_daily_summary,
            reports_cmd::close_day,
            reports_cmd::get_sales_history,
            // System
            system::get_storage_status,
            system::reconnect_primary,
            system::get_app_config,
            system::scan_consistency,
            system::repair_consistency,
        ])
        .run(tauri::generate_context!());

    if let Err(e) = result {
        error!(error = %e, "OrderChha exited with an error");
        std::process::exit(1);
    }
}
