//! Startup loading of catalog and coupon reference data.
//!
//! Records that already exist are left untouched, so restarting against a
//! persistent store never resets stock counters or coupon balances.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use checkout::{CatalogReadModel, CheckoutError, CouponEvaluator};
use common::{Money, ProductId, UserId};
use domain::{Coupon, CouponKind, Discount, Product, ProductStatus, StockError};
use serde::Deserialize;
use store::RecordStore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read seed file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid seed file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid product {id}: {source}")]
    Product {
        id: String,
        #[source]
        source: StockError,
    },

    #[error(transparent)]
    Checkout(#[from] CheckoutError),
}

#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub products: Vec<SeedProduct>,
    #[serde(default)]
    pub coupons: Vec<SeedCoupon>,
}

#[derive(Debug, Deserialize)]
pub struct SeedProduct {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    #[serde(default)]
    pub discount_price_cents: Option<i64>,
    pub stock: u32,
    #[serde(default)]
    pub status: Option<ProductStatus>,
}

#[derive(Debug, Deserialize)]
pub struct SeedCoupon {
    pub code: String,
    pub kind: CouponKind,
    pub discount: Discount,
    /// Starting balance of a gradual coupon.
    #[serde(default)]
    pub balance_cents: i64,
    #[serde(default)]
    pub max_discount_cents: Option<i64>,
    #[serde(default)]
    pub min_order_cents: Option<i64>,
    #[serde(default)]
    pub max_usage: Option<u32>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Makes the coupon personal to this user.
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Counts of records written by a seed run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub products: usize,
    pub coupons: usize,
}

impl SeedProduct {
    fn into_product(self) -> Result<Product, SeedError> {
        let invalid = |source| SeedError::Product {
            id: self.id.clone(),
            source,
        };
        let mut product = Product::new(
            self.id.as_str(),
            self.name.as_str(),
            Money::from_cents(self.price_cents),
            self.stock,
        )
        .map_err(invalid)?;
        if let Some(cents) = self.discount_price_cents {
            product = product
                .with_discount_price(Money::from_cents(cents))
                .map_err(invalid)?;
        }
        if let Some(status) = self.status {
            product = product.with_status(status);
        }
        Ok(product)
    }
}

impl SeedCoupon {
    fn into_coupon(self) -> Coupon {
        let mut coupon = match self.kind {
            CouponKind::OneTime => {
                Coupon::one_time(&self.code, self.discount, self.starts_at, self.ends_at)
            }
            CouponKind::Gradual => Coupon::gradual(
                &self.code,
                Money::from_cents(self.balance_cents),
                self.discount,
                self.starts_at,
                self.ends_at,
            ),
        };
        if let Some(cents) = self.max_discount_cents {
            coupon = coupon.with_max_discount(Money::from_cents(cents));
        }
        if let Some(cents) = self.min_order_cents {
            coupon = coupon.with_min_order(Money::from_cents(cents));
        }
        if let Some(max) = self.max_usage {
            coupon = coupon.with_max_usage(max);
        }
        if let Some(user_id) = self.user_id {
            coupon = coupon.personal_to(user_id);
        }
        coupon.with_active(self.active)
    }
}

/// Reads and applies a seed file.
pub async fn load_file<S: RecordStore>(
    path: &Path,
    catalog: &CatalogReadModel<S>,
    coupons: &CouponEvaluator<S>,
) -> Result<SeedSummary, SeedError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let data: SeedData = serde_json::from_str(&raw)?;
    apply(data, catalog, coupons).await
}

/// Writes products and coupons that do not exist yet.
pub async fn apply<S: RecordStore>(
    data: SeedData,
    catalog: &CatalogReadModel<S>,
    coupons: &CouponEvaluator<S>,
) -> Result<SeedSummary, SeedError> {
    let mut summary = SeedSummary::default();

    for seed in data.products {
        let id = ProductId::new(seed.id.as_str());
        match catalog.get_product(&id).await {
            Ok(_) => tracing::debug!(product_id = %id, "product exists, skipping seed"),
            Err(CheckoutError::NotFound { .. }) => {
                catalog.upsert_product(&seed.into_product()?).await?;
                summary.products += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    for seed in data.coupons {
        match coupons.get_coupon(&seed.code).await {
            Ok(_) => tracing::debug!(code = %seed.code, "coupon exists, skipping seed"),
            Err(CheckoutError::NotFound { .. }) => {
                coupons.upsert_coupon(&seed.into_coupon()).await?;
                summary.coupons += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!(
        products = summary.products,
        coupons = summary.coupons,
        "seed data loaded"
    );
    Ok(summary)
}
