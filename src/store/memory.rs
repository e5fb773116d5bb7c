use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{stale, ProductFilter, Store, StoreError, StoreResult, SubOrderFilter};
use crate::domain::aggregates::{Product, Seller, SellerStatus, SubOrder, TotalOrder, User};

/// In-process store for tests and local runs without a database.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

#[derive(Default)]
struct Collections {
    users: HashMap<String, User>,
    sellers: HashMap<String, Seller>,
    products: HashMap<String, Product>,
    total_orders: HashMap<String, TotalOrder>,
    sub_orders: HashMap<String, SubOrder>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

fn bumped<T: Clone>(doc: &T, set: impl FnOnce(&mut T)) -> T {
    let mut next = doc.clone();
    set(&mut next);
    next
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut c = self.inner.write().await;
        if c.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!("email {} is already registered", user.email)));
        }
        c.users.insert(user.uid.clone(), user.clone());
        Ok(())
    }

    async fn user(&self, uid: &str) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(uid).cloned())
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.values().find(|u| u.email == email).cloned())
    }

    async fn users(&self) -> StoreResult<Vec<User>> {
        let mut users: Vec<User> = self.inner.read().await.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut c = self.inner.write().await;
        let stored = c.users.get(&user.uid).ok_or_else(|| StoreError::NotFound(format!("user {}", user.uid)))?;
        if stored.version != user.version { return Err(stale("user", &user.uid)); }
        c.users.insert(user.uid.clone(), bumped(user, |u| u.version += 1));
        Ok(())
    }

    async fn delete_user(&self, uid: &str) -> StoreResult<bool> {
        Ok(self.inner.write().await.users.remove(uid).is_some())
    }

    async fn insert_seller(&self, seller: &Seller) -> StoreResult<()> {
        let mut c = self.inner.write().await;
        if c.sellers.values().any(|s| s.user_id == seller.user_id) {
            return Err(StoreError::Conflict(format!("user {} already has a seller profile", seller.user_id)));
        }
        c.sellers.insert(seller.seller_id.clone(), seller.clone());
        Ok(())
    }

    async fn seller(&self, seller_id: &str) -> StoreResult<Option<Seller>> {
        Ok(self.inner.read().await.sellers.get(seller_id).cloned())
    }

    async fn seller_by_user(&self, user_id: &str) -> StoreResult<Option<Seller>> {
        Ok(self.inner.read().await.sellers.values().find(|s| s.user_id == user_id).cloned())
    }

    async fn sellers(&self, status: Option<SellerStatus>) -> StoreResult<Vec<Seller>> {
        let mut sellers: Vec<Seller> = self.inner.read().await.sellers.values()
            .filter(|s| status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        sellers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sellers)
    }

    async fn update_seller(&self, seller: &Seller, owner: &User) -> StoreResult<()> {
        let mut c = self.inner.write().await;
        let seller_version = c.sellers.get(&seller.seller_id).map(|s| s.version)
            .ok_or_else(|| StoreError::NotFound(format!("seller {}", seller.seller_id)))?;
        let owner_version = c.users.get(&owner.uid).map(|u| u.version)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", owner.uid)))?;
        if seller_version != seller.version { return Err(stale("seller", &seller.seller_id)); }
        if owner_version != owner.version { return Err(stale("user", &owner.uid)); }
        c.sellers.insert(seller.seller_id.clone(), bumped(seller, |s| s.version += 1));
        c.users.insert(owner.uid.clone(), bumped(owner, |u| u.version += 1));
        Ok(())
    }

    async fn products(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>> {
        let mut products: Vec<Product> = self.inner.read().await.products.values().filter(|p| filter.matches(p)).cloned().collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(products)
    }

    async fn product(&self, id: &str) -> StoreResult<Option<Product>> {
        Ok(self.inner.read().await.products.get(id).cloned())
    }

    async fn insert_product(&self, product: &Product) -> StoreResult<()> {
        let mut c = self.inner.write().await;
        if c.products.contains_key(&product.id) { return Err(StoreError::Conflict(format!("product {} exists", product.id))); }
        c.products.insert(product.id.clone(), product.clone());
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> StoreResult<()> {
        let mut c = self.inner.write().await;
        let stored = c.products.get(&product.id).ok_or_else(|| StoreError::NotFound(format!("product {}", product.id)))?;
        if stored.version != product.version { return Err(stale("product", &product.id)); }
        c.products.insert(product.id.clone(), bumped(product, |p| p.version += 1));
        Ok(())
    }

    async fn delete_product(&self, id: &str) -> StoreResult<bool> {
        Ok(self.inner.write().await.products.remove(id).is_some())
    }

    async fn place_order(&self, order: &TotalOrder, sub_orders: &[SubOrder], products: &[Product]) -> StoreResult<()> {
        let mut c = self.inner.write().await;
        for product in products {
            match c.products.get(&product.id) {
                None => return Err(StoreError::NotFound(format!("product {}", product.id))),
                Some(stored) if stored.version != product.version => return Err(stale("product", &product.id)),
                Some(_) => {}
            }
        }
        for product in products {
            c.products.insert(product.id.clone(), bumped(product, |p| p.version += 1));
        }
        c.total_orders.insert(order.id.clone(), order.clone());
        for sub in sub_orders {
            c.sub_orders.insert(sub.id.clone(), sub.clone());
        }
        Ok(())
    }

    async fn total_order(&self, id: &str) -> StoreResult<Option<TotalOrder>> {
        Ok(self.inner.read().await.total_orders.get(id).cloned())
    }

    async fn total_orders(&self, user_id: Option<&str>) -> StoreResult<Vec<TotalOrder>> {
        let mut orders: Vec<TotalOrder> = self.inner.read().await.total_orders.values()
            .filter(|o| user_id.map_or(true, |uid| o.user_id == uid))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_total_order(&self, order: &TotalOrder) -> StoreResult<()> {
        let mut c = self.inner.write().await;
        let stored = c.total_orders.get(&order.id).ok_or_else(|| StoreError::NotFound(format!("order {}", order.id)))?;
        if stored.version != order.version { return Err(stale("order", &order.id)); }
        c.total_orders.insert(order.id.clone(), bumped(order, |o| o.version += 1));
        Ok(())
    }

    async fn sub_order(&self, id: &str) -> StoreResult<Option<SubOrder>> {
        Ok(self.inner.read().await.sub_orders.get(id).cloned())
    }

    async fn sub_orders(&self, filter: &SubOrderFilter) -> StoreResult<Vec<SubOrder>> {
        let mut subs: Vec<SubOrder> = self.inner.read().await.sub_orders.values().filter(|s| filter.matches(s)).cloned().collect();
        subs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(subs)
    }

    async fn update_sub_order(&self, sub_order: &SubOrder) -> StoreResult<()> {
        let mut c = self.inner.write().await;
        let stored = c.sub_orders.get(&sub_order.id).ok_or_else(|| StoreError::NotFound(format!("sub-order {}", sub_order.id)))?;
        if stored.version != sub_order.version { return Err(stale("sub-order", &sub_order.id)); }
        c.sub_orders.insert(sub_order.id.clone(), bumped(sub_order, |s| s.version += 1));
        Ok(())
    }

    async fn commit_transition(&self, sub_order: &SubOrder, order: &TotalOrder) -> StoreResult<()> {
        let mut c = self.inner.write().await;
        let sub_version = c.sub_orders.get(&sub_order.id).map(|s| s.version)
            .ok_or_else(|| StoreError::NotFound(format!("sub-order {}", sub_order.id)))?;
        let order_version = c.total_orders.get(&order.id).map(|o| o.version)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", order.id)))?;
        if sub_version != sub_order.version { return Err(stale("sub-order", &sub_order.id)); }
        if order_version != order.version { return Err(stale("order", &order.id)); }
        c.sub_orders.insert(sub_order.id.clone(), bumped(sub_order, |s| s.version += 1));
        c.total_orders.insert(order.id.clone(), bumped(order, |o| o.version += 1));
        Ok(())
    }
}
