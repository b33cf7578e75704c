//! Bookable space types: capacity, occupancy bounds and unit prices.

use std::collections::BTreeMap;
use std::fmt;

use crate::model::{DateRange, SpaceType, SubscriptionType};

const DAYS_PER_MONTH: i64 = 30;
const DAYS_PER_YEAR: i64 = 365;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceSpec {
    pub space_type: SpaceType,
    pub label: &'static str,
    /// Concurrent non-cancelled reservations allowed on any given day.
    pub max_concurrent: u32,
    /// Occupants allowed on a single reservation.
    pub max_occupants: u32,
    pub daily_price: Option<i64>,
    pub monthly_price: Option<i64>,
    pub yearly_price: Option<i64>,
    /// Price is multiplied by the occupant count.
    pub priced_per_occupant: bool,
}

impl SpaceSpec {
    pub fn unit_price(&self, subscription: SubscriptionType) -> Option<i64> {
        match subscription {
            SubscriptionType::Daily => self.daily_price,
            SubscriptionType::Monthly => self.monthly_price,
            SubscriptionType::Yearly => self.yearly_price,
        }
    }

    pub fn is_single_occupancy(&self) -> bool {
        self.max_concurrent <= 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    UnknownSpaceType(String),
    SubscriptionNotOffered(SpaceType, SubscriptionType),
    TooManyOccupants { space_type: SpaceType, max: u32, got: u32 },
    NoOccupants,
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::UnknownSpaceType(slug) => write!(f, "unknown space type: {slug:?}"),
            CatalogError::SubscriptionNotOffered(t, s) => {
                write!(f, "{s} subscription not offered for {t}")
            }
            CatalogError::TooManyOccupants { space_type, max, got } => {
                write!(f, "{space_type} allows at most {max} occupants, got {got}")
            }
            CatalogError::NoOccupants => write!(f, "at least one occupant is required"),
        }
    }
}

impl std::error::Error for CatalogError {}

#[derive(Debug, Clone)]
pub struct SpaceCatalog {
    specs: BTreeMap<SpaceType, SpaceSpec>,
}

impl Default for SpaceCatalog {
    fn default() -> Self {
        Self::new(4, 1, 1)
    }
}

impl SpaceCatalog {
    /// Standard catalog with the given per-type concurrent capacities.
    pub fn new(coworking: u32, private_office: u32, domiciliation: u32) -> Self {
        let specs = [
            SpaceSpec {
                space_type: SpaceType::Coworking,
                label: "Espace coworking / Coworking space",
                max_concurrent: coworking,
                max_occupants: 4,
                daily_price: Some(5_000),
                monthly_price: Some(75_000),
                yearly_price: Some(750_000),
                priced_per_occupant: true,
            },
            SpaceSpec {
                space_type: SpaceType::PrivateOffice,
                label: "Bureau privé / Private office",
                max_concurrent: private_office,
                max_occupants: 4,
                daily_price: Some(15_000),
                monthly_price: Some(250_000),
                yearly_price: Some(2_500_000),
                priced_per_occupant: false,
            },
            SpaceSpec {
                space_type: SpaceType::Domiciliation,
                label: "Domiciliation d'entreprise / Business address",
                max_concurrent: domiciliation,
                max_occupants: 1,
                daily_price: None,
                monthly_price: Some(30_000),
                yearly_price: Some(300_000),
                priced_per_occupant: false,
            },
        ];
        Self {
            specs: specs.into_iter().map(|s| (s.space_type, s)).collect(),
        }
    }

    pub fn spec(&self, space_type: SpaceType) -> Option<&SpaceSpec> {
        self.specs.get(&space_type)
    }

    pub fn specs(&self) -> impl Iterator<Item = &SpaceSpec> {
        self.specs.values()
    }

    /// Resolve a UI slug to a catalogued type.
    pub fn resolve(&self, slug: &str) -> Result<&SpaceSpec, CatalogError> {
        SpaceType::from_slug(slug)
            .and_then(|t| self.specs.get(&t))
            .ok_or_else(|| CatalogError::UnknownSpaceType(slug.to_string()))
    }

    /// Capacity for the conflict check. Unknown types are single-occupancy.
    pub fn max_concurrent(&self, space_type: SpaceType) -> u32 {
        self.spec(space_type).map_or(1, |s| s.max_concurrent)
    }

    pub fn check_occupants(&self, space_type: SpaceType, occupants: u32) -> Result<(), CatalogError> {
        if occupants == 0 {
            return Err(CatalogError::NoOccupants);
        }
        let spec = self
            .spec(space_type)
            .ok_or_else(|| CatalogError::UnknownSpaceType(space_type.to_string()))?;
        if occupants > spec.max_occupants {
            return Err(CatalogError::TooManyOccupants {
                space_type,
                max: spec.max_occupants,
                got: occupants,
            });
        }
        Ok(())
    }

    /// Price a stay. Units are days, started months or started years, minimum one.
    pub fn quote(
        &self,
        space_type: SpaceType,
        subscription: SubscriptionType,
        range: &DateRange,
        occupants: u32,
    ) -> Result<i64, CatalogError> {
        let spec = self
            .spec(space_type)
            .ok_or_else(|| CatalogError::UnknownSpaceType(space_type.to_string()))?;
        let unit = spec
            .unit_price(subscription)
            .ok_or(CatalogError::SubscriptionNotOffered(space_type, subscription))?;
        let days = range.duration_days().max(1);
        let units = match subscription {
            SubscriptionType::Daily => days,
            SubscriptionType::Monthly => (days + DAYS_PER_MONTH - 1) / DAYS_PER_MONTH,
            SubscriptionType::Yearly => (days + DAYS_PER_YEAR - 1) / DAYS_PER_YEAR,
        };
        let seats = if spec.priced_per_occupant {
            i64::from(occupants.max(1))
        } else {
            1
        };
        Ok(unit * units * seats)
    }
}
