pub mod contribution;
pub mod contribution_like;
pub mod memorial;
pub mod memorial_flag;
pub mod memorial_transaction;
pub mod notification;
pub mod price_entry;
