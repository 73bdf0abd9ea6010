pub mod contribution;
pub mod flags;
pub mod kinds;
pub mod options;
pub mod price;

pub use contribution::{ContributionPatch, ContributionView, CreateContributionRequest};
pub use flags::{FlagKind, FlagTarget};
pub use kinds::{descriptor, KindDescriptor};
pub use options::{Decoration, OptionFamily, PayableOption, Tribute, Wreath};
pub use price::{Price, PriceSnapshot, DONATION_TREE_KEY, DONATION_TREE_UNIT_MINOR};
