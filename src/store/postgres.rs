use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use tracing::info;

use super::{stale, ProductFilter, Store, StoreError, StoreResult, SubOrderFilter};
use crate::domain::aggregates::{Product, Seller, SellerStatus, SubOrder, TotalOrder, User};

/// Postgres store keeping each aggregate as a JSONB document beside a few
/// indexed columns.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(db.message().to_string()),
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

impl PgStore {
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| StoreError::Backend(e.to_string()))?;
        info!("database migrations applied");
        Ok(())
    }

    async fn fetch_one<T>(&self, sql: &str, id: &str) -> StoreResult<Option<T>>
    where
        T: serde::de::DeserializeOwned + Send + Unpin + 'static,
    {
        let row: Option<(Json<T>,)> = sqlx::query_as(sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(Json(doc),)| doc))
    }
}

fn next<T: Serialize + Clone>(doc: &T, bump: impl FnOnce(&mut T)) -> Json<T> {
    let mut doc = doc.clone();
    bump(&mut doc);
    Json(doc)
}

fn docs<T>(rows: Vec<(Json<T>,)>) -> Vec<T> { rows.into_iter().map(|(Json(doc),)| doc).collect() }

async fn update_versioned<T: Serialize + Send + Sync + 'static>(
    tx: &mut Transaction<'_, Postgres>, table: &str, kind: &str, id: &str, version: i64, doc: Json<T>,
) -> StoreResult<()> {
    let sql = format!("UPDATE {table} SET doc = $1, version = version + 1, updated_at = NOW() WHERE id = $2 AND version = $3");
    let done = sqlx::query(&sql).bind(doc).bind(id).bind(version).execute(&mut **tx).await?;
    if done.rows_affected() == 0 { return Err(stale(kind, id)); }
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query("INSERT INTO users (id, email, doc, created_at) VALUES ($1, $2, $3, $4)")
            .bind(&user.uid).bind(&user.email).bind(Json(user)).bind(user.created_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn user(&self, uid: &str) -> StoreResult<Option<User>> {
        self.fetch_one("SELECT doc FROM users WHERE id = $1", uid).await
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.fetch_one("SELECT doc FROM users WHERE email = $1", email).await
    }

    async fn users(&self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as("SELECT doc FROM users ORDER BY created_at").fetch_all(&self.pool).await?;
        Ok(docs(rows))
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        update_versioned(&mut tx, "users", "user", &user.uid, user.version, next(user, |u| u.version += 1)).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_user(&self, uid: &str) -> StoreResult<bool> {
        let done = sqlx::query("DELETE FROM users WHERE id = $1").bind(uid).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn insert_seller(&self, seller: &Seller) -> StoreResult<()> {
        sqlx::query("INSERT INTO sellers (id, user_id, status, doc, created_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(&seller.seller_id).bind(&seller.user_id).bind(status_column(seller.status)).bind(Json(seller)).bind(seller.created_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn seller(&self, seller_id: &str) -> StoreResult<Option<Seller>> {
        self.fetch_one("SELECT doc FROM sellers WHERE id = $1", seller_id).await
    }

    async fn seller_by_user(&self, user_id: &str) -> StoreResult<Option<Seller>> {
        self.fetch_one("SELECT doc FROM sellers WHERE user_id = $1", user_id).await
    }

    async fn sellers(&self, status: Option<SellerStatus>) -> StoreResult<Vec<Seller>> {
        let rows = sqlx::query_as("SELECT doc FROM sellers WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_at")
            .bind(status.map(status_column))
            .fetch_all(&self.pool).await?;
        Ok(docs(rows))
    }

    async fn update_seller(&self, seller: &Seller, owner: &User) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        update_versioned(&mut tx, "sellers", "seller", &seller.seller_id, seller.version, next(seller, |s| s.version += 1)).await?;
        sqlx::query("UPDATE sellers SET status = $1 WHERE id = $2")
            .bind(status_column(seller.status)).bind(&seller.seller_id)
            .execute(&mut *tx).await?;
        update_versioned(&mut tx, "users", "user", &owner.uid, owner.version, next(owner, |u| u.version += 1)).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn products(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>> {
        let rows = sqlx::query_as(
            "SELECT doc FROM products \
             WHERE ($1::TEXT IS NULL OR LOWER(category) = LOWER($1)) \
               AND ($2::TEXT IS NULL OR seller_id = $2) \
               AND ($3::TEXT IS NULL OR doc->>'productName' ILIKE '%' || $3 || '%' ESCAPE '\\' OR doc->>'description' ILIKE '%' || $3 || '%' ESCAPE '\\') \
             ORDER BY created_at DESC",
        )
        .bind(&filter.category).bind(&filter.seller_id).bind(filter.search.as_deref().map(like_literal))
        .fetch_all(&self.pool).await?;
        Ok(docs(rows))
    }

    async fn product(&self, id: &str) -> StoreResult<Option<Product>> {
        self.fetch_one("SELECT doc FROM products WHERE id = $1", id).await
    }

    async fn insert_product(&self, product: &Product) -> StoreResult<()> {
        sqlx::query("INSERT INTO products (id, seller_id, category, version, doc, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $6)")
            .bind(&product.id).bind(&product.seller_id).bind(&product.category).bind(product.version)
            .bind(Json(product)).bind(product.created_at)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> StoreResult<()> {
        let done = sqlx::query(
            "UPDATE products SET doc = $1, category = $2, version = version + 1, updated_at = NOW() WHERE id = $3 AND version = $4",
        )
        .bind(next(product, |p| p.version += 1)).bind(&product.category).bind(&product.id).bind(product.version)
        .execute(&self.pool).await?;
        if done.rows_affected() == 0 {
            return match self.product(&product.id).await? {
                Some(_) => Err(stale("product", &product.id)),
                None => Err(StoreError::NotFound(format!("product {}", product.id))),
            };
        }
        Ok(())
    }

    async fn delete_product(&self, id: &str) -> StoreResult<bool> {
        let done = sqlx::query("DELETE FROM products WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() > 0)
    }

    async fn place_order(&self, order: &TotalOrder, sub_orders: &[SubOrder], products: &[Product]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for product in products {
            update_versioned(&mut tx, "products", "product", &product.id, product.version, next(product, |p| p.version += 1)).await?;
        }
        sqlx::query("INSERT INTO total_orders (id, user_id, version, doc, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $5)")
            .bind(&order.id).bind(&order.user_id).bind(order.version).bind(Json(order)).bind(order.created_at)
            .execute(&mut *tx).await?;
        for sub in sub_orders {
            sqlx::query(
                "INSERT INTO sub_orders (id, total_order_id, seller_id, version, doc, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $6)",
            )
            .bind(&sub.id).bind(&sub.total_order_id).bind(&sub.seller_id).bind(sub.version).bind(Json(sub)).bind(sub.created_at)
            .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn total_order(&self, id: &str) -> StoreResult<Option<TotalOrder>> {
        self.fetch_one("SELECT doc FROM total_orders WHERE id = $1", id).await
    }

    async fn total_orders(&self, user_id: Option<&str>) -> StoreResult<Vec<TotalOrder>> {
        let rows = sqlx::query_as("SELECT doc FROM total_orders WHERE ($1::TEXT IS NULL OR user_id = $1) ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool).await?;
        Ok(docs(rows))
    }

    async fn update_total_order(&self, order: &TotalOrder) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        update_versioned(&mut tx, "total_orders", "order", &order.id, order.version, next(order, |o| o.version += 1)).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn sub_order(&self, id: &str) -> StoreResult<Option<SubOrder>> {
        self.fetch_one("SELECT doc FROM sub_orders WHERE id = $1", id).await
    }

    async fn sub_orders(&self, filter: &SubOrderFilter) -> StoreResult<Vec<SubOrder>> {
        let query = match filter {
            SubOrderFilter::All => sqlx::query_as("SELECT doc FROM sub_orders ORDER BY created_at DESC, id"),
            SubOrderFilter::TotalOrder(id) => {
                sqlx::query_as("SELECT doc FROM sub_orders WHERE total_order_id = $1 ORDER BY created_at DESC, id").bind(id)
            }
            SubOrderFilter::Seller(id) => {
                sqlx::query_as("SELECT doc FROM sub_orders WHERE seller_id = $1 ORDER BY created_at DESC, id").bind(id)
            }
        };
        let rows = query.fetch_all(&self.pool).await?;
        Ok(docs(rows))
    }

    async fn update_sub_order(&self, sub_order: &SubOrder) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        update_versioned(&mut tx, "sub_orders", "sub-order", &sub_order.id, sub_order.version, next(sub_order, |s| s.version += 1)).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_transition(&self, sub_order: &SubOrder, order: &TotalOrder) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        update_versioned(&mut tx, "sub_orders", "sub-order", &sub_order.id, sub_order.version, next(sub_order, |s| s.version += 1)).await?;
        update_versioned(&mut tx, "total_orders", "order", &order.id, order.version, next(order, |o| o.version += 1)).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Escapes `ILIKE` metacharacters so the search term matches literally.
fn like_literal(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') { out.push('\\'); }
        out.push(c);
    }
    out
}

fn status_column(status: SellerStatus) -> &'static str {
    match status {
        SellerStatus::Pending => "pending",
        SellerStatus::Approved => "approved",
        SellerStatus::Rejected => "rejected",
    }
}
