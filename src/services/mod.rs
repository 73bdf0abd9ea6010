use chrono::{DateTime, SubsecRound, Utc};

// Pricing
pub mod basket;
pub mod price_catalog;

// Memorials and their contributions
pub mod feed;
pub mod lifecycle;
pub mod likes;
pub mod memorials;
pub mod pagination;

// Moderation
pub mod flags;

#[cfg(test)]
pub(crate) mod testing;

/// Current time at the precision both database backends keep.
pub(crate) fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
