//! Time aggregation of fetched data.
//!
//! The service buckets rows server-side before returning them. Fiscal-quarter
//! bucketing is company-specific, so that period requires a [`Company`] context and
//! is validated eagerly, before any request is built.

use std::fmt;
use std::str::FromStr;

use serde_json::{Value, json};

use datamonster_core::{DmError, Result};

use crate::company::Company;

/// Time bucketing granularities the service understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationPeriod {
    /// Weekly buckets.
    Week,
    /// Monthly buckets.
    Month,
    /// Calendar quarter buckets.
    Quarter,
    /// Company-specific fiscal quarter buckets.
    FiscalQuarter,
    /// Yearly buckets.
    Year,
}

impl AggregationPeriod {
    /// The cadence tag the raw-data endpoint expects.
    #[must_use]
    pub fn cadence(&self) -> &'static str {
        match self {
            Self::Week => "weekly",
            Self::Month => "monthly",
            Self::Quarter => "calendar quarterly",
            Self::FiscalQuarter => "fiscal quarterly",
            Self::Year => "yearly",
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::FiscalQuarter => "fiscalQuarter",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for AggregationPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for AggregationPeriod {
    type Err = DmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "quarter" => Ok(Self::Quarter),
            "fiscalQuarter" => Ok(Self::FiscalQuarter),
            "year" => Ok(Self::Year),
            other => Err(DmError::InvalidArgument(format!(
                "Bad aggregation period: {other}. Valid choices are: \
                 week, month, quarter, fiscalQuarter, year"
            ))),
        }
    }
}

/// An aggregation request: a period, plus the company whose fiscal calendar
/// anchors it when the period is [`AggregationPeriod::FiscalQuarter`].
#[derive(Debug, Clone)]
pub struct Aggregation {
    period: AggregationPeriod,
    company: Option<Company>,
}

impl Aggregation {
    /// Creates a validated aggregation.
    ///
    /// Fails with [`DmError::InvalidArgument`] if the period is
    /// [`AggregationPeriod::FiscalQuarter`] and no company is given.
    pub fn new(period: AggregationPeriod, company: Option<Company>) -> Result<Self> {
        if period == AggregationPeriod::FiscalQuarter && company.is_none() {
            return Err(DmError::InvalidArgument(
                "Company must be specified for a fiscalQuarter aggregation".to_string(),
            ));
        }
        Ok(Self { period, company })
    }

    /// The aggregation period.
    #[must_use]
    pub fn period(&self) -> AggregationPeriod {
        self.period
    }

    /// The fiscal anchor company, when one was given.
    #[must_use]
    pub fn company(&self) -> Option<&Company> {
        self.company.as_ref()
    }

    /// Checks this aggregation against the company a query targets.
    ///
    /// Aggregating by the fiscal calendar of a company other than the one being
    /// queried is not supported by the service.
    pub(crate) fn check_against(&self, company: &Company) -> Result<()> {
        if self.period == AggregationPeriod::FiscalQuarter
            && self.company.as_ref().is_some_and(|c| c.id() != company.id())
        {
            return Err(DmError::InvalidArgument(
                "Aggregating by the fiscal quarter of a different company not yet supported"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// The `timeAggregation` object of the raw-data request body.
    #[must_use]
    pub fn to_time_aggregation(&self) -> Value {
        let mut agg = json!({
            "cadence": self.period.cadence(),
            "aggregationType": "sum",
            "includePTD": false,
        });
        if self.period == AggregationPeriod::FiscalQuarter {
            if let (Some(company), Value::Object(map)) = (&self.company, &mut agg) {
                map.insert("sectionPk".to_string(), Value::from(company.id()));
            }
        }
        agg
    }
}
