//! Catalog read model.

use common::ProductId;
use domain::{Entity, Product, ProductSnapshot, Repository};
use store::{RecordStore, RecordStoreExt};

use crate::error::{CheckoutError, Result};

/// Read access to products.
///
/// Reads the same records the reservation manager writes, so the
/// availability it reports is current as of the read.
pub struct CatalogReadModel<S: RecordStore> {
    products: Repository<S, Product>,
}

impl<S: RecordStore + Clone> Clone for CatalogReadModel<S> {
    fn clone(&self) -> Self {
        Self {
            products: self.products.clone(),
        }
    }
}

impl<S: RecordStore> CatalogReadModel<S> {
    pub fn new(store: S) -> Self {
        Self {
            products: Repository::new(store),
        }
    }

    /// Price, sale price, availability and active flag of a product.
    pub async fn get_product_snapshot(&self, product_id: &ProductId) -> Result<ProductSnapshot> {
        Ok(self.get_product(product_id).await?.snapshot())
    }

    /// Full product record.
    pub async fn get_product(&self, product_id: &ProductId) -> Result<Product> {
        self.products
            .get(product_id.as_str())
            .await?
            .ok_or_else(|| CheckoutError::NotFound {
                entity: Product::KIND,
                id: product_id.to_string(),
            })
    }

    /// Snapshots of every sellable product.
    pub async fn list_active(&self) -> Result<Vec<ProductSnapshot>> {
        let mut snapshots: Vec<_> = self
            .products
            .list()
            .await?
            .iter()
            .filter(|p| p.status().is_sellable())
            .map(Product::snapshot)
            .collect();
        snapshots.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        Ok(snapshots)
    }

    /// Writes a product record as-is, replacing any existing one.
    ///
    /// Used for loading reference data, never on the checkout path.
    pub async fn upsert_product(&self, product: &Product) -> Result<()> {
        let payload = serde_json::to_value(product)
            .map_err(|e| CheckoutError::PersistenceFailure(e.to_string()))?;
        self.products
            .store()
            .put(Product::KIND, &product.entity_id(), payload)
            .await
            .map_err(|e| CheckoutError::PersistenceFailure(e.to_string()))?;
        Ok(())
    }
}
