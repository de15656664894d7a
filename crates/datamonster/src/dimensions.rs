//! Streaming dimension (split) metadata.
//!
//! A datasource's dimensions endpoint reports, per split combination, the date
//! range and row count the datasource has for it, plus aggregate metadata over the
//! whole (filtered) collection. The aggregate metadata arrives with the first page;
//! the records themselves stream page by page.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

use datamonster_client::pagination::{Page, Pagination};
use datamonster_core::{DmError, Result};

use crate::company::Company;
use crate::datamonster::DataMonster;

/// One split combination and its coverage.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimension {
    /// The split key/value pairs, e.g. `{"category": "...", "country": "US"}`.
    /// With company enrichment on, a `ticker` entry is added next to any
    /// `section_pk` entry.
    pub split_combination: Map<String, Value>,
    /// First date covered, ISO format.
    pub min_date: String,
    /// Last date covered, ISO format.
    pub max_date: String,
    /// Number of rows for this combination.
    pub row_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirstPage {
    min_date: Option<String>,
    max_date: Option<String>,
    #[serde(default)]
    row_count: u64,
    #[serde(default)]
    dimension_count: u64,
    pagination: Pagination,
    results: Vec<Dimension>,
}

/// A single-pass stream of [`Dimension`] records with aggregate metadata.
///
/// The metadata ([`min_date`](Self::min_date), [`max_date`](Self::max_date),
/// [`row_count`](Self::row_count), [`len`](Self::len)) is available as soon as the
/// set is constructed. A fully drained set yields nothing more.
///
/// With company enrichment on, [`pk_to_company`](Self::pk_to_company) accumulates
/// one [`Company`] per distinct `section_pk` encountered so far; each pk is looked
/// up at most once across the whole iteration.
pub struct DimensionSet {
    dm: DataMonster,
    min_date: Option<String>,
    max_date: Option<String>,
    row_count: u64,
    dimension_count: u64,
    buffer: VecDeque<Dimension>,
    next_page: Option<String>,
    exhausted: bool,
    enrich: bool,
    pk_to_company: HashMap<i64, Company>,
}

impl DimensionSet {
    pub(crate) async fn fetch(dm: DataMonster, path: &str, enrich: bool) -> Result<Self> {
        let value = dm.transport().get(path, &[]).await?.into_json()?;
        let first: FirstPage =
            serde_json::from_value(value).map_err(|e| DmError::Parse(e.to_string()))?;

        let exhausted = first.results.is_empty();
        Ok(Self {
            dm,
            min_date: first.min_date,
            max_date: first.max_date,
            row_count: first.row_count,
            dimension_count: first.dimension_count,
            buffer: first.results.into(),
            next_page: first.pagination.next_page_uri,
            exhausted,
            enrich,
            pk_to_company: HashMap::new(),
        })
    }

    /// Min of the records' `min_date`s; `None` when the set is empty.
    #[must_use]
    pub fn min_date(&self) -> Option<&str> {
        self.min_date.as_deref()
    }

    /// Max of the records' `max_date`s; `None` when the set is empty.
    #[must_use]
    pub fn max_date(&self) -> Option<&str> {
        self.max_date.as_deref()
    }

    /// Sum of the records' row counts.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Number of dimension records in the collection.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.dimension_count
    }

    /// True when the collection has no dimension records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dimension_count == 0
    }

    /// Whether ticker enrichment is on.
    #[must_use]
    pub fn has_extra_company_info(&self) -> bool {
        self.enrich
    }

    /// Companies resolved from `section_pk` values yielded so far. Empty until
    /// iteration starts; complete only once the set is drained.
    #[must_use]
    pub fn pk_to_company(&self) -> &HashMap<i64, Company> {
        &self.pk_to_company
    }

    /// Pulls the next dimension record, fetching the next page as needed.
    /// Returns `Ok(None)` once the set is drained.
    pub async fn try_next(&mut self) -> Result<Option<Dimension>> {
        loop {
            if self.exhausted && self.buffer.is_empty() {
                return Ok(None);
            }
            if let Some(mut dimension) = self.buffer.pop_front() {
                if self.enrich {
                    self.add_ticker(&mut dimension).await?;
                }
                return Ok(Some(dimension));
            }
            let Some(path) = self.next_page.take() else {
                self.exhausted = true;
                return Ok(None);
            };
            let value = self.dm.transport().get(&path, &[]).await?.into_json()?;
            let page: Page<Dimension> =
                serde_json::from_value(value).map_err(|e| DmError::Parse(e.to_string()))?;
            // An empty page terminates the stream even if a link is present.
            if page.results.is_empty() {
                self.exhausted = true;
                return Ok(None);
            }
            self.buffer = page.results.into();
            self.next_page = page.pagination.next_page_uri;
        }
    }

    /// Drains the set into a vector.
    pub async fn try_collect(&mut self) -> Result<Vec<Dimension>> {
        let mut dimensions = Vec::new();
        while let Some(dimension) = self.try_next().await? {
            dimensions.push(dimension);
        }
        Ok(dimensions)
    }

    /// Inserts a `ticker` entry derived from the record's `section_pk`, which may
    /// be a single pk or a list of pks. Null or non-numeric values are left alone.
    async fn add_ticker(&mut self, dimension: &mut Dimension) -> Result<()> {
        let Some(value) = dimension.split_combination.get("section_pk").cloned() else {
            return Ok(());
        };
        let ticker = match value {
            Value::Number(n) => match n.as_i64() {
                Some(pk) => Value::from(self.pk_to_ticker(pk).await?),
                None => return Ok(()),
            },
            Value::Array(pks) => {
                let mut tickers = Vec::with_capacity(pks.len());
                for pk in pks {
                    match pk.as_i64() {
                        Some(pk) => tickers.push(Value::from(self.pk_to_ticker(pk).await?)),
                        None => tickers.push(Value::Null),
                    }
                }
                Value::Array(tickers)
            }
            _ => return Ok(()),
        };
        dimension
            .split_combination
            .insert("ticker".to_string(), ticker);
        Ok(())
    }

    /// The ticker for a company pk, falling back to the company name when the
    /// company has no ticker. One lookup per distinct pk.
    async fn pk_to_ticker(&mut self, pk: i64) -> Result<String> {
        if !self.pk_to_company.contains_key(&pk) {
            let company = self.dm.get_company_by_id(pk).await?;
            self.pk_to_company.insert(pk, company);
        }
        let company = &self.pk_to_company[&pk];
        let ticker = match company.ticker() {
            Some(t) if !t.is_empty() => t,
            _ => company.name(),
        };
        Ok(ticker.to_string())
    }
}

impl fmt::Display for DimensionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DimensionSet: {} dimensions, {} rows, from {} to {}",
            self.dimension_count,
            self.row_count,
            self.min_date.as_deref().unwrap_or("-"),
            self.max_date.as_deref().unwrap_or("-"),
        )?;
        if self.enrich {
            write!(f, "; extra company info")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DimensionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DimensionSet")
            .field("min_date", &self.min_date)
            .field("max_date", &self.max_date)
            .field("row_count", &self.row_count)
            .field("dimension_count", &self.dimension_count)
            .field("exhausted", &self.exhausted)
            .field("enrich", &self.enrich)
            .finish_non_exhaustive()
    }
}
