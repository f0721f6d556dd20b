use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::PosError;

/// Stores a text-backed enum as its canonical lowercase name and reads it back
/// through `FromStr`, so legacy spellings already in the database still load.
macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let raw = value.as_str()?;
                raw.parse::<$ty>()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Round a money amount to two decimals.
pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

fn normalize(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Available,
    Occupied,
    Reserved,
    Billing,
    Cleaning,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Available => "available",
            TableStatus::Occupied => "occupied",
            TableStatus::Reserved => "reserved",
            TableStatus::Billing => "billing",
            TableStatus::Cleaning => "cleaning",
        }
    }

    /// Structural transition table for manual status changes. Conditions that
    /// depend on the table's orders are checked by `tables::set_table_status`.
    pub fn can_transition_to(self, next: TableStatus) -> bool {
        use TableStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Available, Occupied)
                | (Available, Reserved)
                | (Available, Cleaning)
                | (Reserved, Available)
                | (Reserved, Occupied)
                | (Occupied, Available)
                | (Occupied, Billing)
                | (Billing, Occupied)
                | (Billing, Available)
                | (Cleaning, Available)
        )
    }
}

impl FromStr for TableStatus {
    type Err = PosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "available" | "free" => Ok(TableStatus::Available),
            "occupied" => Ok(TableStatus::Occupied),
            "reserved" => Ok(TableStatus::Reserved),
            "billing" => Ok(TableStatus::Billing),
            "cleaning" => Ok(TableStatus::Cleaning),
            other => Err(PosError::validation(format!("unknown table status '{other}'"))),
        }
    }
}

sql_text_enum!(TableStatus);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Preparing,
    #[serde(alias = "ready-for-billing", alias = "ready_for_billing")]
    Ready,
    #[serde(alias = "paid")]
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Orders that still hold the table: not yet paid and not cancelled.
    pub fn is_unpaid(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Preparing | OrderStatus::Ready
        )
    }

    pub fn is_in_kitchen(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Preparing)
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Preparing)
                | (Preparing, Ready)
                | (Ready, Completed)
                | (Pending, Cancelled)
                | (Preparing, Cancelled)
        )
    }
}

impl FromStr for OrderStatus {
    type Err = PosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "preparing" => Ok(OrderStatus::Preparing),
            "ready" | "ready_for_billing" => Ok(OrderStatus::Ready),
            "completed" | "paid" => Ok(OrderStatus::Completed),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            other => Err(PosError::validation(format!("unknown order status '{other}'"))),
        }
    }
}

sql_text_enum!(OrderStatus);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Online,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Online => "online",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = PosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "online" | "wallet" | "qr" => Ok(PaymentMethod::Online),
            other => Err(PosError::validation(format!("unknown payment method '{other}'"))),
        }
    }
}

sql_text_enum!(PaymentMethod);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = PosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "completed" | "paid" => Ok(TransactionStatus::Completed),
            "refunded" => Ok(TransactionStatus::Refunded),
            other => Err(PosError::validation(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }
}

sql_text_enum!(TransactionStatus);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
    Waiter,
    Kitchen,
    Cashier,
    Accountant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ManageUsers,
    ManageMenu,
    ManageTables,
    ManageInventory,
    TakeOrders,
    UpdateKitchen,
    TakePayment,
    ViewReports,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Waiter => "waiter",
            Role::Kitchen => "kitchen",
            Role::Cashier => "cashier",
            Role::Accountant => "accountant",
        }
    }

    pub fn permits(self, permission: Permission) -> bool {
        use Permission::*;
        match self {
            Role::Admin => true,
            Role::Staff => matches!(
                permission,
                ManageTables | ManageInventory | TakeOrders | UpdateKitchen | TakePayment
            ),
            Role::Waiter => matches!(permission, ManageTables | TakeOrders),
            Role::Kitchen => matches!(permission, UpdateKitchen | ManageInventory),
            Role::Cashier => matches!(permission, ManageTables | TakeOrders | TakePayment),
            Role::Accountant => matches!(permission, TakePayment | ViewReports | ManageInventory),
        }
    }
}

impl FromStr for Role {
    type Err = PosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "admin" => Ok(Role::Admin),
            "staff" => Ok(Role::Staff),
            "waiter" => Ok(Role::Waiter),
            "kitchen" => Ok(Role::Kitchen),
            "cashier" => Ok(Role::Cashier),
            "accountant" => Ok(Role::Accountant),
            other => Err(PosError::validation(format!("unknown role '{other}'"))),
        }
    }
}

sql_text_enum!(Role);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderReady,
    LowStock,
    PaymentReceived,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderReady => "order_ready",
            NotificationKind::LowStock => "low_stock",
            NotificationKind::PaymentReceived => "payment_received",
            NotificationKind::System => "system",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = PosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "order_ready" => Ok(NotificationKind::OrderReady),
            "low_stock" => Ok(NotificationKind::LowStock),
            "payment_received" => Ok(NotificationKind::PaymentReceived),
            "system" => Ok(NotificationKind::System),
            other => Err(PosError::validation(format!(
                "unknown notification kind '{other}'"
            ))),
        }
    }
}

sql_text_enum!(NotificationKind);

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Table {
    pub id: i64,
    pub name: String,
    pub location: Option<String>,
    pub capacity: i32,
    pub status: TableStatus,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTable {
    pub name: String,
    pub location: Option<String>,
    pub capacity: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateTable {
    pub id: i64,
    pub name: String,
    pub location: Option<String>,
    pub capacity: i32,
}

// ---------------------------------------------------------------------------
// Menu
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MenuItem {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub is_available: bool,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMenuItem {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub category_id: Option<i64>,
    pub is_available: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateMenuItem {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub category_id: Option<i64>,
    pub is_available: bool,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Order {
    pub id: i64,
    pub table_id: i64,
    pub table_name: Option<String>,
    pub staff_id: Option<i64>,
    pub staff_name: Option<String>,
    pub customer_name: Option<String>,
    pub notes: Option<String>,
    pub status: OrderStatus,
    pub total_amount: f64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub menu_item_id: i64,
    pub menu_item_name: Option<String>,
    pub quantity: i32,
    pub price: f64,
}

impl OrderItem {
    pub fn line_total(&self) -> f64 {
        self.price * self.quantity as f64
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreateOrderItem {
    pub menu_item_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrder {
    pub table_id: i64,
    pub staff_id: Option<i64>,
    pub customer_name: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<CreateOrderItem>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub table_id: Option<i64>,
    /// Local calendar date, `YYYY-MM-DD`.
    pub date: Option<String>,
}

// ---------------------------------------------------------------------------
// Billing
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Payment {
    pub method: PaymentMethod,
    /// Cash handed over by the customer; required for cash payments.
    pub tendered: Option<f64>,
    pub cashier_id: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Transaction {
    pub id: i64,
    pub table_id: i64,
    pub order_id: i64,
    pub amount: f64,
    pub method: PaymentMethod,
    pub status: TransactionStatus,
    pub invoice_number: String,
    pub tendered: Option<f64>,
    pub change_due: Option<f64>,
    pub cashier_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BillTotals {
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TableBill {
    pub table_id: i64,
    pub table_name: String,
    pub table_status: TableStatus,
    pub orders: Vec<OrderWithItems>,
    pub totals: BillTotals,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settlement {
    pub table_id: i64,
    pub transactions: Vec<Transaction>,
    pub total_paid: f64,
    pub change_due: Option<f64>,
    pub table_status: TableStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Receipt {
    pub order: OrderWithItems,
    pub totals: BillTotals,
    pub transaction: Option<Transaction>,
    pub currency: String,
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InventoryItem {
    pub id: i64,
    pub name: String,
    pub stock: f64,
    pub unit: String,
    pub purchase_price: f64,
    pub low_stock_threshold: f64,
    pub updated_at: String,
}

impl InventoryItem {
    pub fn is_low(&self) -> bool {
        self.stock <= self.low_stock_threshold
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateInventoryItem {
    pub name: String,
    pub stock: f64,
    pub unit: String,
    pub purchase_price: f64,
    pub low_stock_threshold: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateInventoryItem {
    pub id: i64,
    pub name: String,
    pub unit: String,
    pub purchase_price: f64,
    pub low_stock_threshold: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InventoryAdjustment {
    pub id: i64,
    pub item_id: i64,
    pub delta: f64,
    pub reason: String,
    pub user_id: Option<i64>,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub role: Role,
    pub has_pin: bool,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub role: Role,
    pub pin: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Session {
    pub token: String,
    pub user: User,
    pub started_at: String,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Notification {
    pub id: i64,
    pub kind: NotificationKind,
    pub message: String,
    pub order_id: Option<i64>,
    pub table_id: Option<i64>,
    pub is_read: bool,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MethodTotal {
    pub method: PaymentMethod,
    pub count: i64,
    pub amount: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TopItem {
    pub menu_item_id: i64,
    pub name: String,
    pub quantity: i64,
    pub revenue: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: String,
    pub total_revenue: f64,
    pub transaction_count: i64,
    pub refunded_amount: f64,
    pub by_method: Vec<MethodTotal>,
    pub top_items: Vec<TopItem>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DayClosing {
    pub id: i64,
    pub date: String,
    pub total_revenue: f64,
    pub total_orders: i64,
    pub closed_by: Option<i64>,
    pub closed_at: String,
}

// ---------------------------------------------------------------------------
// Storage & diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    File,
    InMemory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageStatus {
    pub mode: StorageMode,
    pub path: String,
    pub schema_version: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    OrderWithoutItems { order_id: i64 },
    BillingWithoutReadyOrders { table_id: i64 },
    AvailableWithUnpaidOrders { table_id: i64, unpaid: i64 },
    OccupiedWithoutOrders { table_id: i64 },
    CompletedWithoutTransaction { order_id: i64 },
    TotalMismatch { order_id: i64, stored: f64, computed: f64 },
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RepairReport {
    pub cancelled_orders: Vec<i64>,
    pub retotalled_orders: Vec<i64>,
    pub tables_reset: Vec<(i64, TableStatus)>,
    pub unresolved: Vec<Issue>,
}
