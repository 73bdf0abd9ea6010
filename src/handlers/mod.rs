pub mod contributions;
pub mod feeds;
pub mod flags;
pub mod memorials;
pub mod notifications;
pub mod payment_webhooks;
pub mod prices;

use std::sync::Arc;

use crate::cache::CacheBackend;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use crate::notifications::NotificationService;
use crate::services::{
    feed::FeedService, flags::FlagService, lifecycle::ContributionService, likes::LikeService,
    memorials::MemorialService, price_catalog::PriceCatalog,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer used by the HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub memorials: Arc<MemorialService>,
    pub contributions: Arc<ContributionService>,
    pub feeds: Arc<FeedService>,
    pub likes: Arc<LikeService>,
    pub flags: Arc<FlagService>,
    pub prices: Arc<PriceCatalog>,
    pub notifications: Arc<NotificationService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        cache: Arc<dyn CacheBackend>,
    ) -> Self {
        let prices = Arc::new(PriceCatalog::new(
            db_pool.clone(),
            cache,
            config.price_cache_ttl(),
        ));
        let contributions = Arc::new(ContributionService::new(
            db_pool.clone(),
            event_sender.clone(),
            prices.clone(),
            gateway,
            config.into(),
        ));

        Self {
            memorials: Arc::new(MemorialService::new(db_pool.clone())),
            contributions,
            feeds: Arc::new(FeedService::new(
                db_pool.clone(),
                config.feed_page_size,
                config.feed_max_page_size,
            )),
            likes: Arc::new(LikeService::new(db_pool.clone())),
            flags: Arc::new(FlagService::new(db_pool.clone(), event_sender)),
            prices,
            notifications: Arc::new(NotificationService::new(db_pool)),
        }
    }
}
