use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use furniture_marketplace::{
    domain::aggregates::{Product, Seller, SellerStatus, SubOrder, TotalOrder, User, UserRole},
    domain::workflow::{Actor, Command, Effect},
    events::EventPublisher,
    payments::RecordingGateway,
    store::{MemoryStore, ProductFilter, Store, StoreError, StoreResult, SubOrderFilter},
    AppError, AppState, Config,
};

struct TestApp {
    router: Router,
    store: Arc<dyn Store>,
    gateway: Arc<RecordingGateway>,
    uploads: tempfile::TempDir,
}

fn app() -> TestApp { app_with(Arc::new(MemoryStore::new())) }

fn app_with(store: Arc<dyn Store>) -> TestApp {
    let uploads = tempfile::tempdir().unwrap();
    let gateway = Arc::new(RecordingGateway::new());
    let config = Config {
        upload_dir: uploads.path().to_path_buf(),
        public_base_url: "http://shop.test".into(),
        ..Config::default()
    };
    let state = AppState::new(store.clone(), gateway.clone(), EventPublisher::disabled(), config);
    TestApp { router: furniture_marketplace::router(state), store, gateway, uploads }
}

impl TestApp {
    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req.header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
        (status, value)
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) { self.call(Method::GET, uri, token, None).await }

    async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(token), Some(body)).await
    }

    async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::PUT, uri, Some(token), Some(body)).await
    }

    /// Registers a user and returns `(token, uid)`.
    async fn register(&self, name: &str, email: &str) -> (String, String) {
        let (status, body) = self.call(Method::POST, "/api/auth/register", None,
            Some(json!({ "displayName": name, "email": email, "password": "correct horse" }))).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (body["token"].as_str().unwrap().to_string(), body["user"]["uid"].as_str().unwrap().to_string())
    }

    async fn admin(&self) -> String {
        let (token, uid) = self.register("Admin", "admin@shop.test").await;
        let mut user = self.store.user(&uid).await.unwrap().unwrap();
        user.role = UserRole::Admin;
        self.store.update_user(&user).await.unwrap();
        token
    }

    /// Registers and approves a seller; returns the seller's token.
    async fn seller(&self, admin: &str, email: &str) -> String {
        let (token, _) = self.register("Seller", email).await;
        let (status, seller) = self.post("/api/sellers/apply", &token, json!({ "storeName": "Oak & Co" })).await;
        assert_eq!(status, StatusCode::CREATED, "{seller}");
        assert_eq!(seller["status"], "pending");
        let id = seller["sellerId"].as_str().unwrap();
        let (status, _) = self.put(&format!("/api/admin/sellers/{id}/approve"), admin, json!({})).await;
        assert_eq!(status, StatusCode::OK);
        token
    }

    async fn product(&self, seller: &str, price: &str, stock: u32) -> String {
        let (status, product) = self.post("/api/products", seller, json!({
            "productName": "Walnut Sofa", "description": "Three seater", "price": price,
            "category": "sofas", "countInStock": stock, "images": ["http://shop.test/uploads/sofa.png"],
        })).await;
        assert_eq!(status, StatusCode::CREATED, "{product}");
        product["id"].as_str().unwrap().to_string()
    }

    /// Places an order for one product; returns `(total order, first sub-order id)`.
    async fn order(&self, buyer: &str, product_id: &str, quantity: u32, method: &str) -> (Value, String) {
        let (status, order) = self.post("/api/totalOrders", buyer, json!({
            "items": [{ "productId": product_id, "quantity": quantity }],
            "billingInfo": {
                "fullName": "Bea Buyer", "email": "bea@shop.test", "address": "1 Elm St",
                "city": "Springfield", "postalCode": "12345", "country": "US",
            },
            "paymentMethod": method,
        })).await;
        assert_eq!(status, StatusCode::CREATED, "{order}");
        let sub_id = order["subOrders"][0]["id"].as_str().unwrap().to_string();
        (order, sub_id)
    }

    async fn pay(&self, buyer: &str, order_id: &str) {
        let (status, body) = self.put(&format!("/api/totalOrders/{order_id}/pay"), buyer,
            json!({ "id": "pi_123", "status": "COMPLETED", "update_time": "2024-01-01T00:00:00Z" })).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["isPaid"], true);
    }
}

/// When an armed rival write fires.
enum Trigger {
    /// Just before a transition is committed.
    Commit,
    /// On a sub-order read, after letting `skip` reads through.
    SubOrderRead { skip: usize },
    /// Just before any product write, including checkout.
    ProductWrite,
}

enum Rival {
    Transition { sub_order_id: String, command: Command, actor: Actor },
    Product { product_id: String, change: Box<dyn FnOnce(&mut Product) + Send> },
}

/// Memory store that lets a second writer slip in once, at a chosen point.
struct RacingStore {
    inner: MemoryStore,
    armed: Mutex<Option<(Trigger, Rival)>>,
}

impl RacingStore {
    fn new() -> Self { Self { inner: MemoryStore::new(), armed: Mutex::new(None) } }

    fn arm(&self, trigger: Trigger, rival: Rival) { *self.armed.lock().unwrap() = Some((trigger, rival)); }

    async fn race(&self, hit: impl Fn(&mut Trigger) -> bool) {
        let rival = {
            let mut armed = self.armed.lock().unwrap();
            let fire = armed.as_mut().map_or(false, |(trigger, _)| hit(trigger));
            if fire { armed.take().map(|(_, rival)| rival) } else { None }
        };
        match rival {
            Some(Rival::Transition { sub_order_id, command, actor }) => {
                let mut sub = self.inner.sub_order(&sub_order_id).await.unwrap().unwrap();
                let mut order = self.inner.total_order(&sub.total_order_id).await.unwrap().unwrap();
                let transition = sub.plan(&command, actor, order.is_paid, Utc::now()).unwrap();
                sub.commit(&transition, "rival", None);
                if let Effect::Settle(reason) = transition.effect { order.deduct(&sub, reason).unwrap(); }
                self.inner.commit_transition(&sub, &order).await.unwrap();
            }
            Some(Rival::Product { product_id, change }) => {
                let mut product = self.inner.product(&product_id).await.unwrap().unwrap();
                change(&mut product);
                self.inner.update_product(&product).await.unwrap();
            }
            None => {}
        }
    }
}

fn on_commit(t: &mut Trigger) -> bool { matches!(t, Trigger::Commit) }
fn on_product_write(t: &mut Trigger) -> bool { matches!(t, Trigger::ProductWrite) }
fn on_sub_order_read(t: &mut Trigger) -> bool {
    match t {
        Trigger::SubOrderRead { skip: 0 } => true,
        Trigger::SubOrderRead { skip } => {
            *skip -= 1;
            false
        }
        _ => false,
    }
}

#[async_trait]
impl Store for RacingStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> { self.inner.insert_user(user).await }
    async fn user(&self, uid: &str) -> StoreResult<Option<User>> { self.inner.user(uid).await }
    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> { self.inner.user_by_email(email).await }
    async fn users(&self) -> StoreResult<Vec<User>> { self.inner.users().await }
    async fn update_user(&self, user: &User) -> StoreResult<()> { self.inner.update_user(user).await }
    async fn delete_user(&self, uid: &str) -> StoreResult<bool> { self.inner.delete_user(uid).await }

    async fn insert_seller(&self, seller: &Seller) -> StoreResult<()> { self.inner.insert_seller(seller).await }
    async fn seller(&self, seller_id: &str) -> StoreResult<Option<Seller>> { self.inner.seller(seller_id).await }
    async fn seller_by_user(&self, user_id: &str) -> StoreResult<Option<Seller>> { self.inner.seller_by_user(user_id).await }
    async fn sellers(&self, status: Option<SellerStatus>) -> StoreResult<Vec<Seller>> { self.inner.sellers(status).await }
    async fn update_seller(&self, seller: &Seller, owner: &User) -> StoreResult<()> { self.inner.update_seller(seller, owner).await }

    async fn products(&self, filter: &ProductFilter) -> StoreResult<Vec<Product>> { self.inner.products(filter).await }
    async fn product(&self, id: &str) -> StoreResult<Option<Product>> { self.inner.product(id).await }
    async fn insert_product(&self, product: &Product) -> StoreResult<()> { self.inner.insert_product(product).await }
    async fn update_product(&self, product: &Product) -> StoreResult<()> {
        self.race(on_product_write).await;
        self.inner.update_product(product).await
    }
    async fn delete_product(&self, id: &str) -> StoreResult<bool> { self.inner.delete_product(id).await }

    async fn place_order(&self, order: &TotalOrder, sub_orders: &[SubOrder], products: &[Product]) -> StoreResult<()> {
        self.race(on_product_write).await;
        self.inner.place_order(order, sub_orders, products).await
    }
    async fn total_order(&self, id: &str) -> StoreResult<Option<TotalOrder>> { self.inner.total_order(id).await }
    async fn total_orders(&self, user_id: Option<&str>) -> StoreResult<Vec<TotalOrder>> { self.inner.total_orders(user_id).await }
    async fn update_total_order(&self, order: &TotalOrder) -> StoreResult<()> { self.inner.update_total_order(order).await }
    async fn sub_order(&self, id: &str) -> StoreResult<Option<SubOrder>> {
        self.race(on_sub_order_read).await;
        self.inner.sub_order(id).await
    }
    async fn sub_orders(&self, filter: &SubOrderFilter) -> StoreResult<Vec<SubOrder>> { self.inner.sub_orders(filter).await }
    async fn update_sub_order(&self, sub_order: &SubOrder) -> StoreResult<()> { self.inner.update_sub_order(sub_order).await }
    async fn commit_transition(&self, sub_order: &SubOrder, order: &TotalOrder) -> StoreResult<()> {
        self.race(on_commit).await;
        self.inner.commit_transition(sub_order, order).await
    }
}

fn racing_app() -> (TestApp, Arc<RacingStore>) {
    let store = Arc::new(RacingStore::new());
    (app_with(store.clone()), store)
}

fn dec(v: &Value) -> Decimal {
    match v {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        other => Decimal::from_str(&other.to_string()).unwrap(),
    }
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_products_list_empty_then_populated() {
    let app = app();
    let (status, body) = app.get("/api/products", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    app.product(&seller, "400.00", 3).await;

    let (status, body) = app.get("/api/products", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["numReviews"], 0);

    let (_, filtered) = app.get("/api/products?category=beds", None).await;
    assert_eq!(filtered, json!([]));
    let (_, searched) = app.get("/api/products?search=walnut", None).await;
    assert_eq!(searched.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_product_by_id() {
    let app = app();
    let (status, body) = app.get("/api/products/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
    assert!(body["message"].as_str().unwrap().contains("does-not-exist"));

    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let id = app.product(&seller, "400.00", 3).await;
    let (status, body) = app.get(&format!("/api/products/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["productName"], "Walnut Sofa");
}

#[tokio::test]
async fn test_unapproved_user_cannot_list_products() {
    let app = app();
    let (token, _) = app.register("Sam", "sam@shop.test").await;
    let (status, body) = app.post("/api/products", &token, json!({
        "productName": "Chair", "price": "10", "category": "chairs", "countInStock": 1,
    })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");
}

#[tokio::test]
async fn test_auth_session() {
    let app = app();
    let (status, _) = app.get("/api/auth/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (token, uid) = app.register("Ann", "Ann@Shop.test").await;
    let (status, me) = app.get("/api/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["uid"], uid.as_str());
    assert_eq!(me["email"], "ann@shop.test");
    assert!(me.get("passwordHash").is_none());

    let (status, _) = app.call(Method::POST, "/api/auth/register", None,
        Some(json!({ "displayName": "Ann", "email": "ann@shop.test", "password": "correct horse" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.call(Method::POST, "/api/auth/login", None,
        Some(json!({ "email": "ann@shop.test", "password": "wrong password" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "email": "ann@shop.test", "password": "correct horse" }).to_string()))
        .unwrap();
    let res = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cookie = res.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap().to_string();
    assert!(cookie.starts_with("token=") && cookie.contains("HttpOnly"));

    let session = cookie.split(';').next().unwrap().to_string();
    let req = Request::builder().uri("/api/auth/me").header(header::COOKIE, session).body(Body::empty()).unwrap();
    let res = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_validation_errors_are_400() {
    let app = app();
    let (status, body) = app.call(Method::POST, "/api/auth/register", None,
        Some(json!({ "displayName": "", "email": "not-an-email", "password": "short" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_failed");
}

#[tokio::test]
async fn test_checkout_prices_and_reserves_stock() {
    let app = app();
    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let product_id = app.product(&seller, "400.00", 3).await;
    let (buyer, _) = app.register("Bea", "bea@shop.test").await;

    let (order, _) = app.order(&buyer, &product_id, 2, "stripe").await;
    assert_eq!(dec(&order["itemsPrice"]["amount"]), Decimal::new(800, 0));
    assert_eq!(dec(&order["shippingPrice"]["amount"]), Decimal::new(50, 0));
    assert_eq!(dec(&order["taxPrice"]["amount"]), Decimal::new(120, 0));
    assert_eq!(dec(&order["totalPrice"]["amount"]), Decimal::new(970, 0));
    assert_eq!(order["subOrders"][0]["state"]["status"], "active");
    assert_eq!(order["subOrders"][0]["refundStatus"], "None");

    let (_, product) = app.get(&format!("/api/products/{product_id}"), None).await;
    assert_eq!(product["countInStock"], 1);

    let (status, body) = app.post("/api/totalOrders", &buyer, json!({
        "items": [{ "productId": product_id, "quantity": 2 }],
        "billingInfo": { "fullName": "Bea", "email": "bea@shop.test", "address": "1 Elm", "city": "X", "postalCode": "1", "country": "US" },
        "paymentMethod": "stripe",
    })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, mine) = app.get("/api/totalOrders/mine", Some(&buyer)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_refund_flow_deducts_and_refunds_once() {
    let app = app();
    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let product_id = app.product(&seller, "400.00", 3).await;
    let (buyer, _) = app.register("Bea", "bea@shop.test").await;
    let (order, sub_id) = app.order(&buyer, &product_id, 1, "stripe").await;
    let order_id = order["id"].as_str().unwrap();
    app.pay(&buyer, order_id).await;

    let (status, sub) = app.post(&format!("/api/orders/{sub_id}/refund"), &buyer, json!({ "reason": "arrived scratched" })).await;
    assert_eq!(status, StatusCode::OK, "{sub}");
    assert_eq!(sub["refundStatus"], "Requested");

    let (status, _) = app.post(&format!("/api/sellers/me/orders/{sub_id}/refund/approve"), &buyer, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, sub) = app.post(&format!("/api/sellers/me/orders/{sub_id}/refund/approve"), &seller, json!({})).await;
    assert_eq!(status, StatusCode::OK, "{sub}");
    assert_eq!(sub["state"]["status"], "refunded");
    assert_eq!(sub["refundStatus"], "Refunded");

    let calls = app.gateway.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].amount_minor, 40_000);
    assert_eq!(calls[0].payment_reference, "pi_123");
    assert_eq!(calls[0].idempotency_key, format!("refund-{sub_id}"));

    let (_, order) = app.get(&format!("/api/totalOrders/{order_id}"), Some(&buyer)).await;
    assert_eq!(dec(&order["totalPrice"]["amount"]), Decimal::new(110, 0));
    assert_eq!(order["adjustments"].as_array().unwrap().len(), 1);

    let (status, body) = app.post(&format!("/api/sellers/me/orders/{sub_id}/refund/approve"), &seller, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_transition");
    assert_eq!(app.gateway.calls().len(), 1);
}

#[tokio::test]
async fn test_cancel_unpaid_order_skips_gateway() {
    let app = app();
    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let product_id = app.product(&seller, "400.00", 3).await;
    let (buyer, _) = app.register("Bea", "bea@shop.test").await;
    let (order, sub_id) = app.order(&buyer, &product_id, 1, "paypal").await;

    let (status, body) = app.post(&format!("/api/orders/{sub_id}/refund"), &buyer, json!({ "reason": "changed my mind" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, sub) = app.post(&format!("/api/orders/{sub_id}/cancel"), &buyer, json!({ "reason": "changed my mind" })).await;
    assert_eq!(status, StatusCode::OK, "{sub}");
    assert_eq!(sub["cancelStatus"], "Requested");

    let (status, _) = app.put(&format!("/api/sellers/me/orders/{sub_id}/fulfillment"), &seller, json!({ "status": "shipped" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, sub) = app.post(&format!("/api/sellers/me/orders/{sub_id}/cancel/approve"), &seller, json!({})).await;
    assert_eq!(status, StatusCode::OK, "{sub}");
    assert_eq!(sub["cancelStatus"], "Approved");
    assert!(app.gateway.calls().is_empty());

    let order_id = order["id"].as_str().unwrap();
    let (_, order) = app.get(&format!("/api/totalOrders/{order_id}"), Some(&buyer)).await;
    assert_eq!(dec(&order["totalPrice"]["amount"]), Decimal::new(110, 0));
    assert_eq!(order["adjustments"][0]["reason"], "cancelled");
}

#[tokio::test]
async fn test_return_rejected_appealed_and_resolved_by_admin() {
    let app = app();
    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let product_id = app.product(&seller, "400.00", 3).await;
    let (buyer, _) = app.register("Bea", "bea@shop.test").await;
    let (order, sub_id) = app.order(&buyer, &product_id, 1, "stripe").await;
    app.pay(&buyer, order["id"].as_str().unwrap()).await;

    let (status, body) = app.post(&format!("/api/orders/{sub_id}/return"), &buyer, json!({ "reason": "too big" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    for next in ["shipped", "delivered"] {
        let (status, body) = app.put(&format!("/api/sellers/me/orders/{sub_id}/fulfillment"), &seller, json!({ "status": next })).await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }
    let (status, body) = app.put(&format!("/api/sellers/me/orders/{sub_id}/fulfillment"), &seller, json!({ "status": "processing" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, _) = app.post(&format!("/api/orders/{sub_id}/return"), &buyer, json!({ "reason": "too big" })).await;
    assert_eq!(status, StatusCode::OK);
    let (status, sub) = app.post(&format!("/api/sellers/me/orders/{sub_id}/refund/reject"), &seller, json!({ "reason": "no damage" })).await;
    assert_eq!(status, StatusCode::OK, "{sub}");
    assert_eq!(sub["refundStatus"], "Rejected");
    assert_eq!(sub["appealRequested"], false);

    let (_, disputes) = app.get("/api/admin/disputes", Some(&admin)).await;
    assert_eq!(disputes, json!([]));

    let (status, sub) = app.post(&format!("/api/orders/{sub_id}/appeal"), &buyer, json!({ "reason": "photos attached" })).await;
    assert_eq!(status, StatusCode::OK, "{sub}");
    assert_eq!(sub["appealRequested"], true);
    assert_eq!(sub["dispute"], "appeal_pending");

    let (status, disputes) = app.get("/api/admin/disputes", Some(&buyer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{disputes}");
    let (status, disputes) = app.get("/api/admin/disputes", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(disputes[0]["reason"], "appeal_pending");
    assert_eq!(disputes[0]["subOrder"]["id"], sub_id.as_str());

    let (status, sub) = app.post(&format!("/api/admin/disputes/{sub_id}/resolve"), &admin,
        json!({ "decision": "refund", "note": "buyer is right" })).await;
    assert_eq!(status, StatusCode::OK, "{sub}");
    assert_eq!(sub["state"]["status"], "refunded");
    assert_eq!(app.gateway.calls().len(), 1);

    let (_, stats) = app.get("/api/admin/stats", Some(&admin)).await;
    assert_eq!(stats["paidOrders"], 1);
    assert_eq!(dec(&stats["refundedTotal"]), Decimal::new(400, 0));
}

#[tokio::test]
async fn test_gateway_failure_aborts_transition() {
    let app = app();
    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let product_id = app.product(&seller, "400.00", 3).await;
    let (buyer, _) = app.register("Bea", "bea@shop.test").await;
    let (order, sub_id) = app.order(&buyer, &product_id, 1, "stripe").await;
    app.pay(&buyer, order["id"].as_str().unwrap()).await;
    app.post(&format!("/api/orders/{sub_id}/refund"), &buyer, json!({ "reason": "late" })).await;

    app.gateway.fail_with("card closed");
    let (status, body) = app.post(&format!("/api/sellers/me/orders/{sub_id}/refund/approve"), &seller, json!({})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "payment_gateway");

    let stored = app.store.sub_order(&sub_id).await.unwrap().unwrap();
    assert_eq!(stored.state.legacy_status().refund_status, "Requested");
    let total = app.store.total_order(order["id"].as_str().unwrap()).await.unwrap().unwrap();
    assert!(total.adjustments.is_empty());
}

#[tokio::test]
async fn test_stale_transition_commit_is_409_and_writes_nothing() {
    let app = app();
    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let product_id = app.product(&seller, "400.00", 3).await;
    let (buyer, _) = app.register("Bea", "bea@shop.test").await;
    let (order, sub_id) = app.order(&buyer, &product_id, 1, "cash").await;
    let order_id = order["id"].as_str().unwrap();
    app.post(&format!("/api/orders/{sub_id}/cancel"), &buyer, json!({ "reason": "oops" })).await;

    // A second writer read both documents before the seller acted.
    let stale_sub = app.store.sub_order(&sub_id).await.unwrap().unwrap();
    let stale_order = app.store.total_order(order_id).await.unwrap().unwrap();

    let (status, _) = app.post(&format!("/api/sellers/me/orders/{sub_id}/cancel/approve"), &seller, json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let err = app.store.commit_transition(&stale_sub, &stale_order).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(AppError::from(err).status(), StatusCode::CONFLICT);

    let stored = app.store.sub_order(&sub_id).await.unwrap().unwrap();
    assert_eq!(stored.state.legacy_status().cancel_status, "Approved");
    assert_eq!(stored.version, stale_sub.version + 1);
}

#[tokio::test]
async fn test_reviews_like_toggle_and_replies() {
    let app = app();
    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let product_id = app.product(&seller, "400.00", 3).await;
    let (buyer, buyer_uid) = app.register("Bea", "bea@shop.test").await;

    let (status, review) = app.post(&format!("/api/products/{product_id}/reviews"), &buyer, json!({ "message": "Comfy", "rating": 4 })).await;
    assert_eq!(status, StatusCode::CREATED, "{review}");
    let review_id = review["id"].as_str().unwrap();

    let (status, _) = app.post(&format!("/api/products/{product_id}/reviews"), &buyer, json!({ "message": "Again", "rating": 5 })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.post(&format!("/api/products/{product_id}/reviews"), &seller, json!({ "message": "Bad", "rating": 9 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let like = format!("/api/products/{product_id}/reviews/{review_id}/like");
    let (_, first) = app.post(&like, &seller, json!({})).await;
    assert_eq!(first, json!({ "liked": true, "likes": 1 }));
    let (_, second) = app.post(&like, &seller, json!({})).await;
    assert_eq!(second, json!({ "liked": false, "likes": 0 }));

    let (status, reply) = app.post(&format!("/api/products/{product_id}/reviews/{review_id}/replies"), &seller,
        json!({ "message": "Thanks!" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(reply["userName"], "Seller");

    let (status, _) = app.put(&format!("/api/products/{product_id}/reviews/{review_id}"), &seller, json!({ "rating": 1 })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, edited) = app.put(&format!("/api/products/{product_id}/reviews/{review_id}"), &buyer, json!({ "rating": 5 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["rating"], 5);

    let (_, product) = app.get(&format!("/api/products/{product_id}"), None).await;
    assert_eq!(product["numReviews"], 1);
    assert_eq!(dec(&product["rating"]), Decimal::new(5, 0));
    assert_eq!(product["reviews"][0]["userId"], buyer_uid.as_str());
    assert_eq!(product["reviews"][0]["likes"], json!([]));
}

#[tokio::test]
async fn test_upload_stores_image() {
    let app = app();
    let (token, _) = app.register("Ann", "ann@shop.test").await;

    let multipart = |content_type: &str| {
        let body = format!(
            "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\nContent-Type: {content_type}\r\n\r\nPNGDATA\r\n--XBOUNDARY--\r\n"
        );
        Request::builder()
            .method(Method::POST)
            .uri("/api/upload")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
            .body(Body::from(body))
            .unwrap()
    };

    let res = app.router.clone().oneshot(multipart("image/png")).await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = serde_json::from_slice(&to_bytes(res.into_body(), usize::MAX).await.unwrap()).unwrap();
    let url = body["url"].as_str().unwrap();
    assert!(url.starts_with("http://shop.test/uploads/") && url.ends_with(".png"));
    let name = url.rsplit('/').next().unwrap();
    assert_eq!(std::fs::read(app.uploads.path().join(name)).unwrap(), b"PNGDATA");

    let res = app.router.clone().oneshot(multipart("application/pdf")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_routes_require_admin() {
    let app = app();
    let (token, _) = app.register("Ann", "ann@shop.test").await;
    let (status, _) = app.get("/api/users", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.get("/api/admin/stats", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let admin = app.admin().await;
    let (status, users) = app.get("/api/users", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users.as_array().unwrap().len(), 2);
    let (status, sellers) = app.get("/api/admin/sellers?status=pending", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sellers, json!([]));
}

/// Seller and paid stripe order with a pending refund request; returns `(seller, buyer, order id, sub-order id)`.
async fn refund_requested(app: &TestApp) -> (String, String, String, String) {
    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let product_id = app.product(&seller, "400.00", 3).await;
    let (buyer, _) = app.register("Bea", "bea@shop.test").await;
    let (order, sub_id) = app.order(&buyer, &product_id, 1, "stripe").await;
    let order_id = order["id"].as_str().unwrap().to_string();
    app.pay(&buyer, &order_id).await;
    let (status, body) = app.post(&format!("/api/orders/{sub_id}/refund"), &buyer, json!({ "reason": "arrived scratched" })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    (seller, buyer, order_id, sub_id)
}

#[tokio::test]
async fn test_refund_sent_before_losing_a_race_still_settles() {
    let (app, racing) = racing_app();
    let (seller, _, order_id, sub_id) = refund_requested(&app).await;

    racing.arm(Trigger::Commit, Rival::Transition {
        sub_order_id: sub_id.clone(),
        command: Command::RejectRefund { reason: "no damage".into() },
        actor: Actor::Seller,
    });
    let (status, sub) = app.post(&format!("/api/sellers/me/orders/{sub_id}/refund/approve"), &seller, json!({})).await;
    assert_eq!(status, StatusCode::OK, "{sub}");
    assert_eq!(sub["state"]["status"], "refunded");
    assert_eq!(app.gateway.calls().len(), 1);

    let stored = app.store.sub_order(&sub_id).await.unwrap().unwrap();
    assert_eq!(stored.state.legacy_status().refund_status, "Refunded");
    assert_eq!(stored.version, sub["version"].as_i64().unwrap());
    let total = app.store.total_order(&order_id).await.unwrap().unwrap();
    assert_eq!(total.adjustments.len(), 1);
    assert_eq!(total.total_price.amount(), Decimal::new(110, 0));
}

#[tokio::test]
async fn test_change_seen_before_gateway_is_409_and_refunds_nothing() {
    let (app, racing) = racing_app();
    let (seller, _, order_id, sub_id) = refund_requested(&app).await;

    // The first read loads the sub-order; the rival lands before the re-check.
    racing.arm(Trigger::SubOrderRead { skip: 1 }, Rival::Transition {
        sub_order_id: sub_id.clone(),
        command: Command::RejectRefund { reason: "no damage".into() },
        actor: Actor::Seller,
    });
    let (status, body) = app.post(&format!("/api/sellers/me/orders/{sub_id}/refund/approve"), &seller, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(body["code"], "conflict");
    assert!(app.gateway.calls().is_empty());

    let stored = app.store.sub_order(&sub_id).await.unwrap().unwrap();
    assert_eq!(stored.state.legacy_status().refund_status, "Rejected");
    let total = app.store.total_order(&order_id).await.unwrap().unwrap();
    assert!(total.adjustments.is_empty());
}

#[tokio::test]
async fn test_losing_transition_is_409_and_keeps_the_winner() {
    let (app, racing) = racing_app();
    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let product_id = app.product(&seller, "400.00", 3).await;
    let (buyer, _) = app.register("Bea", "bea@shop.test").await;
    let (order, sub_id) = app.order(&buyer, &product_id, 1, "cash").await;
    let order_id = order["id"].as_str().unwrap();
    app.post(&format!("/api/orders/{sub_id}/cancel"), &buyer, json!({ "reason": "oops" })).await;
    let before = app.store.sub_order(&sub_id).await.unwrap().unwrap();

    racing.arm(Trigger::Commit, Rival::Transition {
        sub_order_id: sub_id.clone(), command: Command::ApproveCancel, actor: Actor::Admin,
    });
    let (status, body) = app.post(&format!("/api/sellers/me/orders/{sub_id}/cancel/reject"), &seller,
        json!({ "reason": "already packed" })).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let stored = app.store.sub_order(&sub_id).await.unwrap().unwrap();
    assert_eq!(stored.state.legacy_status().cancel_status, "Approved");
    assert_eq!(stored.version, before.version + 1);
    assert_eq!(stored.history.len(), before.history.len() + 1);
    assert_eq!(stored.history.last().unwrap().actor_id, "rival");
    let total = app.store.total_order(order_id).await.unwrap().unwrap();
    assert_eq!(total.adjustments.len(), 1);
    assert!(app.gateway.calls().is_empty());
}

#[tokio::test]
async fn test_review_like_retries_after_concurrent_write() {
    let (app, racing) = racing_app();
    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let product_id = app.product(&seller, "400.00", 3).await;
    let (buyer, _) = app.register("Bea", "bea@shop.test").await;
    let (_, review) = app.post(&format!("/api/products/{product_id}/reviews"), &buyer, json!({ "message": "Comfy", "rating": 4 })).await;
    let review_id = review["id"].as_str().unwrap();

    racing.arm(Trigger::ProductWrite, Rival::Product {
        product_id: product_id.clone(),
        change: Box::new(|p| p.reviews[0].likes.push("rival".into())),
    });
    let (status, liked) = app.post(&format!("/api/products/{product_id}/reviews/{review_id}/like"), &seller, json!({})).await;
    assert_eq!(status, StatusCode::OK, "{liked}");
    assert_eq!(liked, json!({ "liked": true, "likes": 2 }));

    let stored = app.store.product(&product_id).await.unwrap().unwrap();
    assert_eq!(stored.reviews[0].likes.len(), 2);
    assert!(stored.reviews[0].likes.iter().any(|l| l == "rival"));
}

#[tokio::test]
async fn test_checkout_retries_after_concurrent_stock_change() {
    let (app, racing) = racing_app();
    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let product_id = app.product(&seller, "400.00", 3).await;
    let (buyer, _) = app.register("Bea", "bea@shop.test").await;

    racing.arm(Trigger::ProductWrite, Rival::Product {
        product_id: product_id.clone(),
        change: Box::new(|p| p.count_in_stock -= 1),
    });
    let (order, _) = app.order(&buyer, &product_id, 1, "stripe").await;
    assert_eq!(dec(&order["itemsPrice"]["amount"]), Decimal::new(400, 0));

    let (_, product) = app.get(&format!("/api/products/{product_id}"), None).await;
    assert_eq!(product["countInStock"], 1);
    let (_, mine) = app.get("/api/totalOrders/mine", Some(&buyer)).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_admin_decides_cancel_requests() {
    let app = app();
    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let product_id = app.product(&seller, "400.00", 5).await;
    let (buyer, _) = app.register("Bea", "bea@shop.test").await;
    let (_, first) = app.order(&buyer, &product_id, 1, "cash").await;
    let (_, second) = app.order(&buyer, &product_id, 1, "cash").await;
    for sub_id in [&first, &second] {
        let (status, _) = app.post(&format!("/api/orders/{sub_id}/cancel"), &buyer, json!({ "reason": "oops" })).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = app.post(&format!("/api/admin/orders/{first}/cancel/approve"), &seller, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, sub) = app.post(&format!("/api/admin/orders/{first}/cancel/approve"), &admin, json!({})).await;
    assert_eq!(status, StatusCode::OK, "{sub}");
    assert_eq!(sub["state"]["status"], "cancelled");
    assert_eq!(sub["history"].as_array().unwrap().last().unwrap()["actor"], json!("admin"));

    let (status, sub) = app.call(Method::POST, &format!("/api/admin/orders/{second}/cancel/reject"), Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK, "{sub}");
    assert_eq!(sub["state"]["status"], "active");
}

#[tokio::test]
async fn test_reject_body_is_optional_but_must_be_valid() {
    let app = app();
    let admin = app.admin().await;
    let seller = app.seller(&admin, "seller@shop.test").await;
    let product_id = app.product(&seller, "400.00", 3).await;
    let (buyer, _) = app.register("Bea", "bea@shop.test").await;
    let (_, sub_id) = app.order(&buyer, &product_id, 1, "cash").await;
    app.post(&format!("/api/orders/{sub_id}/cancel"), &buyer, json!({ "reason": "oops" })).await;
    let reject = format!("/api/sellers/me/orders/{sub_id}/cancel/reject");

    let (status, body) = app.post(&reject, &seller, json!({ "reason": 5 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    let (status, _) = app.post(&reject, &seller, json!({ "reason": "x".repeat(1001) })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let stored = app.store.sub_order(&sub_id).await.unwrap().unwrap();
    assert_eq!(stored.state.legacy_status().cancel_status, "Requested");

    let (status, sub) = app.call(Method::POST, &reject, Some(&seller), None).await;
    assert_eq!(status, StatusCode::OK, "{sub}");
    assert_eq!(sub["state"]["status"], "active");
}
