use crate::config::AppConfig;
use crate::errors::ServiceError;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};
use std::time::Duration;
use tracing::{debug, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
        }
    }
}

/// Establishes a connection pool with custom pool settings
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("Configuring database connection with: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .sqlx_logging(true);

    let db_pool = Database::connect(opt).await?;

    info!(
        "Database connection pool established (max_connections={})",
        config.max_connections
    );

    Ok(db_pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Creates the schema when it does not exist yet. The DDL is shared between
/// SQLite (tests) and PostgreSQL (production) except for the money columns:
/// SQLite's NUMERIC affinity stores whole-valued amounts as INTEGER, which
/// the sqlx driver refuses to decode into `Decimal`, so SQLite gets REAL.
pub async fn bootstrap_schema(db: &DbPool) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    let money = match backend {
        DbBackend::Sqlite => "REAL",
        _ => "DECIMAL(12,2)",
    };

    let statements = [
        format!(
            r#"CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY NOT NULL,
            partner_id TEXT,
            name TEXT NOT NULL,
            price {money} NOT NULL,
            stock INTEGER,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP
        )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY NOT NULL,
            order_number TEXT NOT NULL,
            customer_name TEXT NOT NULL,
            customer_email TEXT NOT NULL,
            customer_phone TEXT,
            customer_tax_id TEXT,
            address_street TEXT NOT NULL,
            address_number TEXT,
            address_city TEXT NOT NULL,
            address_state TEXT NOT NULL,
            address_postal_code TEXT NOT NULL,
            total_amount {money} NOT NULL,
            status TEXT NOT NULL,
            payment_status TEXT NOT NULL,
            payment_method TEXT,
            payment_id TEXT,
            payment_session_id TEXT,
            carrier_delivered_at TIMESTAMP,
            delivered_at TIMESTAMP,
            auto_confirmed BOOLEAN NOT NULL DEFAULT FALSE,
            refunded_at TIMESTAMP,
            nfe_key TEXT,
            nfe_url TEXT,
            nfe_error TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP,
            version INTEGER NOT NULL DEFAULT 1
        )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY NOT NULL,
            order_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            partner_id TEXT,
            name TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            price_at_purchase {money} NOT NULL,
            partner_amount {money} NOT NULL,
            platform_fee {money} NOT NULL,
            created_at TIMESTAMP NOT NULL
        )"#
        ),
        format!(
            r#"CREATE TABLE IF NOT EXISTS partner_sales (
            id TEXT PRIMARY KEY NOT NULL,
            order_id TEXT NOT NULL,
            order_item_id TEXT NOT NULL,
            partner_id TEXT NOT NULL,
            product_id TEXT NOT NULL,
            amount {money} NOT NULL,
            platform_fee {money} NOT NULL,
            status TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL,
            paid_out_at TIMESTAMP
        )"#
        ),
        r#"CREATE TABLE IF NOT EXISTS coverage_areas (
            id TEXT PRIMARY KEY NOT NULL,
            partner_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            cities TEXT,
            states TEXT,
            created_at TIMESTAMP NOT NULL
        )"#
        .to_string(),
        r#"CREATE TABLE IF NOT EXISTS delivery_audit (
            id TEXT PRIMARY KEY NOT NULL,
            order_id TEXT NOT NULL,
            action TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL
        )"#
        .to_string(),
        r#"CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items (order_id)"#
            .to_string(),
        r#"CREATE INDEX IF NOT EXISTS idx_orders_payment_id ON orders (payment_id)"#.to_string(),
        r#"CREATE INDEX IF NOT EXISTS idx_partner_sales_order ON partner_sales (order_id)"#
            .to_string(),
    ];

    for sql in statements {
        db.execute(Statement::from_string(backend, sql)).await?;
    }

    info!("Database schema bootstrap complete");
    Ok(())
}
