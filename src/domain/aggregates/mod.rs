//! Aggregates module
pub mod cart;
pub mod order;
pub mod product;
pub mod user;

pub use cart::{Cart, CartError, CartItem};
pub use order::{
    Adjustment, BillingInfo, Fulfillment, LineItem, OrderError, PaymentMethod, PaymentResult, PricingPolicy,
    StateChange, SubOrder, TotalOrder,
};
pub use product::{Product, ProductDraft, ProductError, Reply, Review};
pub use user::{normalize_email, Seller, SellerError, SellerStatus, User, UserRole};
