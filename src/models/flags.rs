//! Tagged view of the flat flag type column.

use crate::entities::contribution::ContributionKind;
use crate::entities::memorial_flag::FlagType;
use crate::entities::notification::NotificationKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagTarget {
    Contribution(ContributionKind),
    Memorial,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagKind {
    /// Owner review of content that went live on publish.
    Request { kind: ContributionKind },
    /// Objection to visible content.
    Report { target: FlagTarget },
}

impl FlagType {
    pub fn classify(self) -> FlagKind {
        use ContributionKind::*;
        match self {
            FlagType::MemoryRequest => FlagKind::Request { kind: Memory },
            FlagType::CondolenceRequest => FlagKind::Request { kind: Condolence },
            FlagType::DonationRequest => FlagKind::Request { kind: Donation },
            FlagType::MemoryReport => FlagKind::Report {
                target: FlagTarget::Contribution(Memory),
            },
            FlagType::CondolenceReport => FlagKind::Report {
                target: FlagTarget::Contribution(Condolence),
            },
            FlagType::DonationReport => FlagKind::Report {
                target: FlagTarget::Contribution(Donation),
            },
            FlagType::MemorialReport => FlagKind::Report {
                target: FlagTarget::Memorial,
            },
        }
    }

    pub fn is_report(self) -> bool {
        matches!(self.classify(), FlagKind::Report { .. })
    }

    /// Notification sent to the addressee when the flag is raised.
    pub fn notification_kind(self) -> NotificationKind {
        match self {
            FlagType::MemoryRequest => NotificationKind::MemoryRequest,
            FlagType::CondolenceRequest => NotificationKind::CondolenceRequest,
            FlagType::DonationRequest => NotificationKind::DonationRequest,
            FlagType::MemoryReport => NotificationKind::MemoryReport,
            FlagType::CondolenceReport => NotificationKind::CondolenceReport,
            FlagType::DonationReport => NotificationKind::DonationReport,
            FlagType::MemorialReport => NotificationKind::MemorialReport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    #[test]
    fn every_type_classifies() {
        let reports = FlagType::iter().filter(|t| t.is_report()).count();
        assert_eq!(reports, 4);
        assert_eq!(
            FlagType::MemorialReport.classify(),
            FlagKind::Report {
                target: FlagTarget::Memorial
            }
        );
        assert_eq!(
            FlagType::DonationRequest.classify(),
            FlagKind::Request {
                kind: ContributionKind::Donation
            }
        );
    }
}
