//! Closed sets of payable options, priced by `family:value` key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::errors::ServiceError;

use super::price::Price;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OptionFamily {
    Decoration,
    Tribute,
    Wreath,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Decoration {
    AmetheraRose,
    AmethystRavel,
    AureliaBloom,
    AzurePeonia,
    CelestiaLily,
    CircleOfSerenity,
    CoraliaHibiscus,
    FrostariaBloom,
    GoldenReverie,
    IvoryWhisper,
    LunariaLily,
    NocturneCalla,
    RosaliaPeony,
    SeraphineCalla,
    SolariaBloom,
    SolarisHibiscus,
    SonataBloom,
    TrinityOfLight,
    VeloriaLisianthus,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Tribute {
    Default,
    AmethystTranquility,
    BlossomOfGrace,
    CrimsonDevotion,
    FlamesOfRemembrance,
    FrostlightHarmony,
    GoldenSerenity,
    LunarSerenity,
    MidnightSerenity,
    OceanOfLight,
    RoyalSunrise,
    CelestialBloom,
    MidnightElegy,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Wreath {
    Silver,
    Rose,
    Gold,
    Purple,
}

impl Wreath {
    /// Number of items the wreath stands for on the memorial page.
    pub fn item_count(self) -> i32 {
        match self {
            Wreath::Silver => 10,
            Wreath::Rose => 25,
            Wreath::Gold => 50,
            Wreath::Purple => 100,
        }
    }
}

/// A priced option attached to a contribution.
///
/// Serialized as its catalog key, e.g. `"wreath:gold"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PayableOption {
    Decoration(Decoration),
    Tribute(Tribute),
    Wreath(Wreath),
}

impl PayableOption {
    pub fn family(&self) -> OptionFamily {
        match self {
            PayableOption::Decoration(_) => OptionFamily::Decoration,
            PayableOption::Tribute(_) => OptionFamily::Tribute,
            PayableOption::Wreath(_) => OptionFamily::Wreath,
        }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Price written by `seed_defaults` for a fresh catalog.
    pub fn default_price(&self) -> Price {
        match self {
            PayableOption::Tribute(Tribute::Default) => Price::Free,
            PayableOption::Decoration(_) | PayableOption::Tribute(_) => Price::Minor(399),
            PayableOption::Wreath(_) => Price::Minor(10_000),
        }
    }

    pub fn all() -> impl Iterator<Item = PayableOption> {
        Decoration::iter()
            .map(PayableOption::Decoration)
            .chain(Tribute::iter().map(PayableOption::Tribute))
            .chain(Wreath::iter().map(PayableOption::Wreath))
    }
}

impl fmt::Display for PayableOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayableOption::Decoration(v) => write!(f, "decoration:{}", v),
            PayableOption::Tribute(v) => write!(f, "tribute:{}", v),
            PayableOption::Wreath(v) => write!(f, "wreath:{}", v),
        }
    }
}

impl FromStr for PayableOption {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ServiceError::InvalidInput(format!("Unknown payable option '{}'", s));
        let (family, value) = s.split_once(':').ok_or_else(invalid)?;
        let family = OptionFamily::from_str(family).map_err(|_| invalid())?;
        let option = match family {
            OptionFamily::Decoration => {
                PayableOption::Decoration(Decoration::from_str(value).map_err(|_| invalid())?)
            }
            OptionFamily::Tribute => {
                PayableOption::Tribute(Tribute::from_str(value).map_err(|_| invalid())?)
            }
            OptionFamily::Wreath => {
                PayableOption::Wreath(Wreath::from_str(value).map_err(|_| invalid())?)
            }
        };
        Ok(option)
    }
}

impl TryFrom<String> for PayableOption {
    type Error = ServiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PayableOption> for String {
    fn from(option: PayableOption) -> Self {
        option.key()
    }
}
