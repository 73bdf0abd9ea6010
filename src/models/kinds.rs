//! Per-kind behaviour behind the shared contribution lifecycle.

use crate::entities::contribution::ContributionKind;
use crate::entities::memorial_flag::FlagType;
use crate::entities::notification::NotificationKind;
use crate::errors::ServiceError;

use super::options::{OptionFamily, PayableOption};

/// What differs between memories, condolences and donations.
pub trait KindDescriptor: Send + Sync {
    fn kind(&self) -> ContributionKind;

    /// Flag raised for the memorial owner once the contribution goes live.
    fn request_flag(&self) -> FlagType;

    fn report_flag(&self) -> FlagType;

    fn approved_notification(&self) -> NotificationKind;

    fn rejected_notification(&self) -> NotificationKind;

    /// Checkout line item `(name, description)` for the payable option.
    fn line_item(&self) -> (&'static str, &'static str);

    /// Checks the option against the payload; `has_asset` only matters for memories.
    fn validate_option(
        &self,
        option: Option<&PayableOption>,
        has_asset: bool,
    ) -> Result<(), ServiceError>;

    /// A missing price for a required option is a configuration error, never free.
    fn option_required(&self) -> bool {
        false
    }

    fn allows_donation_trees(&self) -> bool {
        true
    }

    /// Items represented on the memorial page, derived from the option.
    fn item_count(&self, _option: Option<&PayableOption>) -> Option<i32> {
        None
    }
}

pub struct MemoryKind;
pub struct CondolenceKind;
pub struct DonationKind;

fn family_mismatch(kind: ContributionKind, option: &PayableOption) -> ServiceError {
    ServiceError::InvalidInput(format!(
        "Option '{}' is not available for a {}",
        option, kind
    ))
}

impl KindDescriptor for MemoryKind {
    fn kind(&self) -> ContributionKind {
        ContributionKind::Memory
    }

    fn request_flag(&self) -> FlagType {
        FlagType::MemoryRequest
    }

    fn report_flag(&self) -> FlagType {
        FlagType::MemoryReport
    }

    fn approved_notification(&self) -> NotificationKind {
        NotificationKind::MemoryApproved
    }

    fn rejected_notification(&self) -> NotificationKind {
        NotificationKind::MemoryRejected
    }

    fn line_item(&self) -> (&'static str, &'static str) {
        ("Memory Decoration", "Premium decoration for your memory")
    }

    fn validate_option(
        &self,
        option: Option<&PayableOption>,
        has_asset: bool,
    ) -> Result<(), ServiceError> {
        // Media memories are priced from the tribute table, text-only ones
        // from the decoration table.
        let expected = if has_asset {
            OptionFamily::Tribute
        } else {
            OptionFamily::Decoration
        };
        match option {
            Some(o) if o.family() != expected => Err(family_mismatch(self.kind(), o)),
            _ => Ok(()),
        }
    }
}

impl KindDescriptor for CondolenceKind {
    fn kind(&self) -> ContributionKind {
        ContributionKind::Condolence
    }

    fn request_flag(&self) -> FlagType {
        FlagType::CondolenceRequest
    }

    fn report_flag(&self) -> FlagType {
        FlagType::CondolenceReport
    }

    fn approved_notification(&self) -> NotificationKind {
        NotificationKind::CondolenceApproved
    }

    fn rejected_notification(&self) -> NotificationKind {
        NotificationKind::CondolenceRejected
    }

    fn line_item(&self) -> (&'static str, &'static str) {
        ("Condolence Decoration", "Premium decoration for your condolence")
    }

    fn validate_option(
        &self,
        option: Option<&PayableOption>,
        _has_asset: bool,
    ) -> Result<(), ServiceError> {
        match option {
            Some(o) if o.family() != OptionFamily::Decoration => {
                Err(family_mismatch(self.kind(), o))
            }
            _ => Ok(()),
        }
    }
}

impl KindDescriptor for DonationKind {
    fn kind(&self) -> ContributionKind {
        ContributionKind::Donation
    }

    fn request_flag(&self) -> FlagType {
        FlagType::DonationRequest
    }

    fn report_flag(&self) -> FlagType {
        FlagType::DonationReport
    }

    fn approved_notification(&self) -> NotificationKind {
        NotificationKind::DonationApproved
    }

    fn rejected_notification(&self) -> NotificationKind {
        NotificationKind::DonationRejected
    }

    fn line_item(&self) -> (&'static str, &'static str) {
        ("Memorial Donation", "Donation wreath for memorial")
    }

    fn validate_option(
        &self,
        option: Option<&PayableOption>,
        _has_asset: bool,
    ) -> Result<(), ServiceError> {
        match option {
            None => Err(ServiceError::InvalidInput(
                "A donation requires a wreath".to_string(),
            )),
            Some(o) if o.family() != OptionFamily::Wreath => Err(family_mismatch(self.kind(), o)),
            Some(_) => Ok(()),
        }
    }

    fn option_required(&self) -> bool {
        true
    }

    fn allows_donation_trees(&self) -> bool {
        false
    }

    fn item_count(&self, option: Option<&PayableOption>) -> Option<i32> {
        match option {
            Some(PayableOption::Wreath(w)) => Some(w.item_count()),
            _ => None,
        }
    }
}

static MEMORY: MemoryKind = MemoryKind;
static CONDOLENCE: CondolenceKind = CondolenceKind;
static DONATION: DonationKind = DonationKind;

pub fn descriptor(kind: ContributionKind) -> &'static dyn KindDescriptor {
    match kind {
        ContributionKind::Memory => &MEMORY,
        ContributionKind::Condolence => &CONDOLENCE,
        ContributionKind::Donation => &DONATION,
    }
}
