//! Persistence boundary. The orchestrator only ever talks to the
//! `StorageGateway` trait; the SQLite implementation behind it owns the
//! schema and the history-append dedup rules.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::models::{generate_id, ChangeSummary, ProductSnapshot, Site, SizeAvailability};
use crate::utils::error::{AppError, Result};

/// A product row as tracked in storage.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedProduct {
    pub id: String,
    pub site: Site,
    pub url: String,
    pub name: String,
    pub current_price: Decimal,
    pub reference_price: Option<Decimal>,
    pub discount_percent: Option<u8>,
    pub image_url: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Storage operations the scraping side needs. Kept narrow so the scraping
/// subsystem never learns the schema.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn find_product_by_url(&self, url: &str) -> Result<Option<TrackedProduct>>;

    /// Insert or refresh the product row for this snapshot's URL.
    async fn upsert_product(&self, snapshot: &ProductSnapshot) -> Result<TrackedProduct>;

    /// Append a price history row unless the latest row already carries the
    /// same price. Returns whether a row was written.
    async fn append_price_history_if_changed(
        &self,
        product_id: &str,
        snapshot: &ProductSnapshot,
    ) -> Result<bool>;

    /// Append a stock history row unless the latest row already carries the
    /// same per-size availability. Returns whether a row was written.
    async fn append_stock_snapshot_if_changed(
        &self,
        product_id: &str,
        snapshot: &ProductSnapshot,
    ) -> Result<bool>;

    /// Full persistence pass for one snapshot. An unchanged re-scrape refreshes
    /// `last_seen_at` but appends nothing.
    async fn record_snapshot(&self, snapshot: &ProductSnapshot) -> Result<ChangeSummary> {
        let first_seen = self.find_product_by_url(&snapshot.url).await?.is_none();
        let product = self.upsert_product(snapshot).await?;
        let price_appended = self
            .append_price_history_if_changed(&product.id, snapshot)
            .await?;
        let stock_appended = self
            .append_stock_snapshot_if_changed(&product.id, snapshot)
            .await?;

        Ok(ChangeSummary {
            first_seen,
            // The first history rows are a baseline, not a change.
            price_changed: price_appended && !first_seen,
            stock_changed: stock_appended && !first_seen,
        })
    }
}

fn sizes_json(sizes: &[SizeAvailability]) -> Result<String> {
    Ok(serde_json::to_string(sizes)?)
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| AppError::Internal(format!("bad decimal in storage: {raw}: {e}")))
}

/// SQLite-backed gateway. Prices are stored as decimal strings to keep exact
/// cent values; SQLite's REAL would not.
pub struct SqliteGateway {
    pool: Pool<Sqlite>,
}

impl SqliteGateway {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let gateway = Self { pool };
        gateway.ensure_schema().await?;
        info!(database_url, "storage ready");
        Ok(gateway)
    }

    /// Shared in-memory database, used by tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let gateway = Self { pool };
        gateway.ensure_schema().await?;
        Ok(gateway)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id TEXT PRIMARY KEY,
                site TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                current_price TEXT NOT NULL,
                reference_price TEXT,
                discount_percent INTEGER,
                image_url TEXT,
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL REFERENCES products(id),
                price TEXT NOT NULL,
                reference_price TEXT,
                discount_percent INTEGER,
                captured_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stock_history (
                id TEXT PRIMARY KEY,
                product_id TEXT NOT NULL REFERENCES products(id),
                sizes TEXT NOT NULL,
                captured_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_price_history_product \
             ON price_history(product_id, captured_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_stock_history_product \
             ON stock_history(product_id, captured_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_product(row: &SqliteRow) -> Result<TrackedProduct> {
        let current_price: String = row.try_get("current_price")?;
        let reference_price: Option<String> = row.try_get("reference_price")?;
        let discount: Option<i64> = row.try_get("discount_percent")?;

        Ok(TrackedProduct {
            id: row.try_get("id")?,
            site: row.try_get("site")?,
            url: row.try_get("url")?,
            name: row.try_get("name")?,
            current_price: parse_decimal(&current_price)?,
            reference_price: reference_price.as_deref().map(parse_decimal).transpose()?,
            discount_percent: discount.map(|d| d as u8),
            image_url: row.try_get("image_url")?,
            first_seen_at: row.try_get("first_seen_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
        })
    }
}

#[async_trait]
impl StorageGateway for SqliteGateway {
    async fn find_product_by_url(&self, url: &str) -> Result<Option<TrackedProduct>> {
        let row = sqlx::query("SELECT * FROM products WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_product).transpose()
    }

    async fn upsert_product(&self, snapshot: &ProductSnapshot) -> Result<TrackedProduct> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO products
                (id, site, url, name, current_price, reference_price,
                 discount_percent, image_url, first_seen_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                name = excluded.name,
                current_price = excluded.current_price,
                reference_price = excluded.reference_price,
                discount_percent = excluded.discount_percent,
                image_url = COALESCE(excluded.image_url, products.image_url),
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(generate_id())
        .bind(snapshot.site)
        .bind(&snapshot.url)
        .bind(&snapshot.name)
        .bind(snapshot.current_price.to_string())
        .bind(snapshot.reference_price.map(|p| p.to_string()))
        .bind(snapshot.discount_percent.map(i64::from))
        .bind(&snapshot.image_url)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_product_by_url(&snapshot.url)
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource: format!("product {}", snapshot.url),
            })
    }

    async fn append_price_history_if_changed(
        &self,
        product_id: &str,
        snapshot: &ProductSnapshot,
    ) -> Result<bool> {
        let latest: Option<String> = sqlx::query_scalar(
            "SELECT price FROM price_history WHERE product_id = ? \
             ORDER BY captured_at DESC, id DESC LIMIT 1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(raw) = latest {
            if parse_decimal(&raw)? == snapshot.current_price {
                debug!(product_id, "price unchanged, skipping history row");
                return Ok(false);
            }
        }

        sqlx::query(
            "INSERT INTO price_history (id, product_id, price, reference_price, discount_percent, captured_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(generate_id())
        .bind(product_id)
        .bind(snapshot.current_price.to_string())
        .bind(snapshot.reference_price.map(|p| p.to_string()))
        .bind(snapshot.discount_percent.map(i64::from))
        .bind(snapshot.captured_at)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    async fn append_stock_snapshot_if_changed(
        &self,
        product_id: &str,
        snapshot: &ProductSnapshot,
    ) -> Result<bool> {
        let encoded = sizes_json(&snapshot.sizes)?;
        let latest: Option<String> = sqlx::query_scalar(
            "SELECT sizes FROM stock_history WHERE product_id = ? \
             ORDER BY captured_at DESC, id DESC LIMIT 1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        if latest.as_deref() == Some(encoded.as_str()) {
            debug!(product_id, "stock unchanged, skipping history row");
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO stock_history (id, product_id, sizes, captured_at) VALUES (?, ?, ?, ?)",
        )
        .bind(generate_id())
        .bind(product_id)
        .bind(encoded)
        .bind(snapshot.captured_at)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }
}

#[derive(Default)]
struct MemoryRecord {
    product: Option<TrackedProduct>,
    price_history: Vec<Decimal>,
    stock_history: Vec<String>,
}

/// In-memory gateway for tests and `--no-persist` style dry runs.
#[derive(Default)]
pub struct MemoryGateway {
    records: Mutex<HashMap<String, MemoryRecord>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn product_count(&self) -> usize {
        self.records
            .lock()
            .map(|records| records.len())
            .unwrap_or(0)
    }

    pub fn history_counts(&self, url: &str) -> (usize, usize) {
        self.records
            .lock()
            .ok()
            .and_then(|records| {
                records
                    .get(url)
                    .map(|r| (r.price_history.len(), r.stock_history.len()))
            })
            .unwrap_or((0, 0))
    }
}

#[async_trait]
impl StorageGateway for MemoryGateway {
    async fn find_product_by_url(&self, url: &str) -> Result<Option<TrackedProduct>> {
        let records = self
            .records
            .lock()
            .map_err(|_| AppError::Internal("memory gateway poisoned".to_string()))?;
        Ok(records.get(url).and_then(|r| r.product.clone()))
    }

    async fn upsert_product(&self, snapshot: &ProductSnapshot) -> Result<TrackedProduct> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::Internal("memory gateway poisoned".to_string()))?;
        let record = records.entry(snapshot.url.clone()).or_default();
        let now = Utc::now();

        let product = match record.product.take() {
            Some(mut existing) => {
                existing.name = snapshot.name.clone();
                existing.current_price = snapshot.current_price;
                existing.reference_price = snapshot.reference_price;
                existing.discount_percent = snapshot.discount_percent;
                existing.image_url = snapshot.image_url.clone().or(existing.image_url);
                existing.last_seen_at = now;
                existing
            }
            None => TrackedProduct {
                id: generate_id(),
                site: snapshot.site,
                url: snapshot.url.clone(),
                name: snapshot.name.clone(),
                current_price: snapshot.current_price,
                reference_price: snapshot.reference_price,
                discount_percent: snapshot.discount_percent,
                image_url: snapshot.image_url.clone(),
                first_seen_at: now,
                last_seen_at: now,
            },
        };
        record.product = Some(product.clone());
        Ok(product)
    }

    async fn append_price_history_if_changed(
        &self,
        _product_id: &str,
        snapshot: &ProductSnapshot,
    ) -> Result<bool> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::Internal("memory gateway poisoned".to_string()))?;
        let record = records.entry(snapshot.url.clone()).or_default();
        if record.price_history.last() == Some(&snapshot.current_price) {
            return Ok(false);
        }
        record.price_history.push(snapshot.current_price);
        Ok(true)
    }

    async fn append_stock_snapshot_if_changed(
        &self,
        _product_id: &str,
        snapshot: &ProductSnapshot,
    ) -> Result<bool> {
        let encoded = sizes_json(&snapshot.sizes)?;
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::Internal("memory gateway poisoned".to_string()))?;
        let record = records.entry(snapshot.url.clone()).or_default();
        if record.stock_history.last() == Some(&encoded) {
            return Ok(false);
        }
        record.stock_history.push(encoded);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(price: &str, sizes: Vec<SizeAvailability>) -> ProductSnapshot {
        ProductSnapshot {
            site: Site::Zara,
            url: "https://www.zara.com/pt/pt/casaco-p02753752.html".to_string(),
            name: "Casaco".to_string(),
            current_price: Decimal::from_str(price).unwrap(),
            reference_price: None,
            discount_percent: None,
            sizes,
            image_url: Some("https://static.zara.net/x.jpg".to_string()),
            captured_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_first_snapshot_is_baseline_not_change() {
        let gateway = SqliteGateway::in_memory().await.unwrap();
        let snap = snapshot("39.95", vec![SizeAvailability::in_stock("S")]);

        let change = gateway.record_snapshot(&snap).await.unwrap();
        assert!(change.first_seen);
        assert!(!change.price_changed);
        assert!(!change.stock_changed);

        let product = gateway
            .find_product_by_url(&snap.url)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.current_price, Decimal::from_str("39.95").unwrap());
        assert_eq!(product.site, Site::Zara);
    }

    #[tokio::test]
    async fn test_identical_rescrape_appends_nothing() {
        let gateway = SqliteGateway::in_memory().await.unwrap();
        let snap = snapshot("39.95", vec![SizeAvailability::in_stock("S")]);

        gateway.record_snapshot(&snap).await.unwrap();
        let change = gateway.record_snapshot(&snap).await.unwrap();

        assert!(!change.first_seen);
        assert!(!change.price_changed);
        assert!(!change.stock_changed);

        let price_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_history")
            .fetch_one(&gateway.pool)
            .await
            .unwrap();
        let stock_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_history")
            .fetch_one(&gateway.pool)
            .await
            .unwrap();
        assert_eq!(price_rows, 1);
        assert_eq!(stock_rows, 1);
    }

    #[tokio::test]
    async fn test_price_drop_appends_history() {
        let gateway = SqliteGateway::in_memory().await.unwrap();
        let sizes = vec![SizeAvailability::in_stock("S")];

        gateway
            .record_snapshot(&snapshot("49.95", sizes.clone()))
            .await
            .unwrap();
        let change = gateway
            .record_snapshot(&snapshot("39.95", sizes))
            .await
            .unwrap();

        assert!(!change.first_seen);
        assert!(change.price_changed);
        assert!(!change.stock_changed);

        let price_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_history")
            .fetch_one(&gateway.pool)
            .await
            .unwrap();
        assert_eq!(price_rows, 2);
    }

    #[tokio::test]
    async fn test_stock_change_appends_history() {
        let gateway = SqliteGateway::in_memory().await.unwrap();

        gateway
            .record_snapshot(&snapshot("39.95", vec![SizeAvailability::in_stock("S")]))
            .await
            .unwrap();
        let change = gateway
            .record_snapshot(&snapshot("39.95", vec![SizeAvailability::out_of_stock("S")]))
            .await
            .unwrap();

        assert!(!change.price_changed);
        assert!(change.stock_changed);
    }

    mockall::mock! {
        Gateway {}

        #[async_trait]
        impl StorageGateway for Gateway {
            async fn find_product_by_url(&self, url: &str) -> Result<Option<TrackedProduct>>;
            async fn upsert_product(&self, snapshot: &ProductSnapshot) -> Result<TrackedProduct>;
            async fn append_price_history_if_changed(
                &self,
                product_id: &str,
                snapshot: &ProductSnapshot,
            ) -> Result<bool>;
            async fn append_stock_snapshot_if_changed(
                &self,
                product_id: &str,
                snapshot: &ProductSnapshot,
            ) -> Result<bool>;
        }
    }

    fn tracked(snapshot: &ProductSnapshot) -> TrackedProduct {
        TrackedProduct {
            id: "abc123".to_string(),
            site: snapshot.site,
            url: snapshot.url.clone(),
            name: snapshot.name.clone(),
            current_price: snapshot.current_price,
            reference_price: snapshot.reference_price,
            discount_percent: snapshot.discount_percent,
            image_url: snapshot.image_url.clone(),
            first_seen_at: Utc::now(),
            last_seen_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_change_summary_composition_on_known_product() {
        let snap = snapshot("29.95", vec![SizeAvailability::in_stock("S")]);
        let existing = tracked(&snap);

        let mut mock = MockGateway::new();
        mock.expect_find_product_by_url()
            .returning(move |_| Ok(Some(existing.clone())));
        let upserted = tracked(&snap);
        mock.expect_upsert_product()
            .returning(move |_| Ok(upserted.clone()));
        mock.expect_append_price_history_if_changed()
            .returning(|_, _| Ok(true));
        mock.expect_append_stock_snapshot_if_changed()
            .returning(|_, _| Ok(false));

        let change = mock.record_snapshot(&snap).await.unwrap();
        assert!(!change.first_seen);
        assert!(change.price_changed);
        assert!(!change.stock_changed);
    }

    #[tokio::test]
    async fn test_baseline_appends_never_count_as_changes() {
        let snap = snapshot("29.95", vec![SizeAvailability::in_stock("S")]);

        let mut mock = MockGateway::new();
        mock.expect_find_product_by_url().returning(|_| Ok(None));
        let upserted = tracked(&snap);
        mock.expect_upsert_product()
            .returning(move |_| Ok(upserted.clone()));
        // Both histories get their first row, yet nothing "changed".
        mock.expect_append_price_history_if_changed()
            .returning(|_, _| Ok(true));
        mock.expect_append_stock_snapshot_if_changed()
            .returning(|_, _| Ok(true));

        let change = mock.record_snapshot(&snap).await.unwrap();
        assert!(change.first_seen);
        assert!(!change.price_changed);
        assert!(!change.stock_changed);
    }

    #[tokio::test]
    async fn test_memory_gateway_matches_sqlite_semantics() {
        let gateway = MemoryGateway::new();
        let snap = snapshot("39.95", vec![SizeAvailability::low("M")]);

        let first = gateway.record_snapshot(&snap).await.unwrap();
        assert!(first.first_seen);

        let second = gateway.record_snapshot(&snap).await.unwrap();
        assert!(!second.first_seen);
        assert!(!second.price_changed);
        assert!(!second.stock_changed);

        assert_eq!(gateway.product_count(), 1);
        assert_eq!(gateway.history_counts(&snap.url), (1, 1));
    }
}
