use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::cache::{get_json, set_json, CacheBackend};
use crate::entities::price_entry;
use crate::errors::ServiceError;
use crate::models::{PayableOption, Price, PriceSnapshot};

const SNAPSHOT_CACHE_KEY: &str = "prices:snapshot";

/// Current prices of every payable option, read through a TTL cache.
#[derive(Clone)]
pub struct PriceCatalog {
    db: Arc<DatabaseConnection>,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

fn price_of(row: &price_entry::Model) -> Option<Price> {
    if row.is_free {
        Some(Price::Free)
    } else {
        row.price_minor.map(Price::Minor)
    }
}

impl PriceCatalog {
    pub fn new(db: Arc<DatabaseConnection>, cache: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { db, cache, ttl }
    }

    /// Inserts default prices for options that have no row yet. Existing
    /// rows are left untouched. Returns the number of rows inserted.
    #[instrument(skip(self))]
    pub async fn seed_defaults(&self) -> Result<usize, ServiceError> {
        let existing: HashSet<String> = price_entry::Entity::find()
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|row| row.option_key)
            .collect();

        let now = Utc::now();
        let missing: Vec<price_entry::ActiveModel> = PayableOption::all()
            .filter(|option| !existing.contains(&option.key()))
            .map(|option| {
                let price = option.default_price();
                price_entry::ActiveModel {
                    option_key: Set(option.key()),
                    price_minor: Set(match price {
                        Price::Minor(amount) => Some(amount),
                        Price::Free => None,
                    }),
                    is_free: Set(price == Price::Free),
                    updated_at: Set(now),
                }
            })
            .collect();

        let inserted = missing.len();
        if inserted > 0 {
            price_entry::Entity::insert_many(missing)
                .exec_without_returning(&*self.db)
                .await?;
            self.invalidate().await?;
        }
        info!(inserted, "price catalog seeded");
        Ok(inserted)
    }

    /// Snapshot used by the basket builder.
    #[instrument(skip(self))]
    pub async fn prices(&self) -> Result<PriceSnapshot, ServiceError> {
        if let Some(snapshot) = get_json::<PriceSnapshot>(&*self.cache, SNAPSHOT_CACHE_KEY).await? {
            debug!("price snapshot served from cache");
            return Ok(snapshot);
        }

        let mut snapshot = PriceSnapshot::default();
        for row in price_entry::Entity::find().all(&*self.db).await? {
            if let Some(price) = price_of(&row) {
                snapshot.insert(row.option_key, price);
            }
        }

        set_json(&*self.cache, SNAPSHOT_CACHE_KEY, &snapshot, Some(self.ttl)).await?;
        Ok(snapshot)
    }

    pub async fn list(&self) -> Result<Vec<price_entry::Model>, ServiceError> {
        Ok(price_entry::Entity::find()
            .order_by_asc(price_entry::Column::OptionKey)
            .all(&*self.db)
            .await?)
    }

    /// Sets the price of one option and drops the cached snapshot.
    #[instrument(skip(self))]
    pub async fn set_price(
        &self,
        key: &str,
        price: Price,
    ) -> Result<price_entry::Model, ServiceError> {
        let option: PayableOption = key.parse()?;
        if let Price::Minor(amount) = price {
            if amount < 0 {
                return Err(ServiceError::ValidationError(
                    "Price cannot be negative".to_string(),
                ));
            }
        }

        let (price_minor, is_free) = match price {
            Price::Free => (None, true),
            Price::Minor(amount) => (Some(amount), false),
        };

        let saved = match price_entry::Entity::find_by_id(option.key())
            .one(&*self.db)
            .await?
        {
            Some(row) => {
                let mut active: price_entry::ActiveModel = row.into();
                active.price_minor = Set(price_minor);
                active.is_free = Set(is_free);
                active.updated_at = Set(Utc::now());
                active.update(&*self.db).await?
            }
            None => {
                price_entry::ActiveModel {
                    option_key: Set(option.key()),
                    price_minor: Set(price_minor),
                    is_free: Set(is_free),
                    updated_at: Set(Utc::now()),
                }
                .insert(&*self.db)
                .await?
            }
        };

        self.invalidate().await?;
        info!(option = %option, ?price, "price updated");
        Ok(saved)
    }

    pub async fn invalidate(&self) -> Result<(), ServiceError> {
        self.cache.delete(SNAPSHOT_CACHE_KEY).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use assert_matches::assert_matches;

    async fn catalog() -> PriceCatalog {
        let db = Arc::new(crate::db::test_pool().await);
        PriceCatalog::new(db, Arc::new(InMemoryCache::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let catalog = catalog().await;
        let first = catalog.seed_defaults().await.unwrap();
        assert_eq!(first, PayableOption::all().count());
        assert_eq!(catalog.seed_defaults().await.unwrap(), 0);

        let prices = catalog.prices().await.unwrap();
        assert_eq!(prices.get("tribute:default"), Some(Price::Free));
        assert_eq!(prices.get("wreath:gold"), Some(Price::Minor(10_000)));
        assert_eq!(prices.get("decoration:sonata-bloom"), Some(Price::Minor(399)));
    }

    #[tokio::test]
    async fn set_price_invalidates_cached_snapshot() {
        let catalog = catalog().await;
        catalog.seed_defaults().await.unwrap();
        assert_eq!(
            catalog.prices().await.unwrap().get("wreath:rose"),
            Some(Price::Minor(10_000))
        );

        catalog
            .set_price("wreath:rose", Price::Minor(12_500))
            .await
            .unwrap();
        assert_eq!(
            catalog.prices().await.unwrap().get("wreath:rose"),
            Some(Price::Minor(12_500))
        );
    }

    #[tokio::test]
    async fn set_price_validates_key_and_amount() {
        let catalog = catalog().await;
        assert_matches!(
            catalog.set_price("wreath:diamond", Price::Minor(1)).await,
            Err(ServiceError::InvalidInput(_))
        );
        assert_matches!(
            catalog.set_price("wreath:gold", Price::Minor(-5)).await,
            Err(ServiceError::ValidationError(_))
        );
    }

    #[tokio::test]
    async fn empty_catalog_has_no_prices() {
        let catalog = catalog().await;
        assert!(catalog.prices().await.unwrap().is_empty());
    }
}
