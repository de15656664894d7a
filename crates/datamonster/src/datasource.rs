//! The datasource entity.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::NaiveDate;
use polars::prelude::DataFrame;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OnceCell};

use datamonster_core::{DmError, Filters, Result};

use crate::aggregation::Aggregation;
use crate::company::Company;
use crate::datamonster::{DataMonster, FromRecord};
use crate::detail::DetailCache;
use crate::dimensions::{Dimension, DimensionSet};

/// The fields a datasource listing returns.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasourceRecord {
    pub(crate) id: String,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) category: Option<String>,
    pub(crate) uri: String,
}

/// A datasource: one named dataset, covering some set of companies.
///
/// Identified by a UUID. Listings return only the summary fields; the detail
/// record (split columns, date fields, cadence, coverage window) is fetched
/// lazily. Two datasources are equal iff their ids are equal.
#[derive(Clone)]
pub struct Datasource {
    record: DatasourceRecord,
    dm: DataMonster,
    details: DetailCache,
    companies: Arc<OnceCell<Vec<Company>>>,
    dimensions: Arc<Mutex<HashMap<String, Arc<Vec<Dimension>>>>>,
}

impl FromRecord for Datasource {
    type Record = DatasourceRecord;

    fn from_record(record: DatasourceRecord, dm: &DataMonster) -> Self {
        Self {
            record,
            dm: dm.clone(),
            details: DetailCache::new(),
            companies: Arc::new(OnceCell::new()),
            dimensions: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Datasource {
    pub(crate) fn with_details(
        record: DatasourceRecord,
        details: Map<String, Value>,
        dm: &DataMonster,
    ) -> Self {
        Self {
            record,
            dm: dm.clone(),
            details: DetailCache::preloaded(details),
            companies: Arc::new(OnceCell::new()),
            dimensions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The datasource UUID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// The datasource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// The datasource category, when the listing carried one.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.record.category.as_deref()
    }

    /// The resource path of this datasource.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.record.uri
    }

    /// Looks up a detail field, fetching the detail record on first access.
    ///
    /// Fails with [`DmError::DetailNotFound`] when the field does not exist.
    pub async fn get_detail(&self, name: &str) -> Result<Value> {
        self.details
            .field(&self.dm, &self.record.uri, name)
            .await?
            .ok_or_else(|| DmError::DetailNotFound(name.to_string()))
    }

    /// The dimension columns rows of this datasource are split by.
    pub async fn split_columns(&self) -> Result<Vec<String>> {
        let columns = self.get_detail("splitColumns").await?;
        serde_json::from_value(columns)
            .map_err(|e| DmError::Parse(format!("Bad splitColumns detail: {e}")))
    }

    /// The date field an upper bound can be applied to, when the datasource has one.
    pub async fn upper_date_field(&self) -> Result<Option<String>> {
        self.optional_string_detail("upperDateField").await
    }

    /// The date field a lower bound can be applied to, when the datasource has one.
    pub async fn lower_date_field(&self) -> Result<Option<String>> {
        self.optional_string_detail("lowerDateField").await
    }

    /// The native reporting cadence, when declared.
    pub async fn cadence(&self) -> Result<Option<String>> {
        self.optional_string_detail("cadence").await
    }

    /// The first date the datasource has data for, when declared.
    pub async fn earliest_data(&self) -> Result<Option<String>> {
        self.optional_string_detail("earliestData").await
    }

    /// The last date the datasource has data for, when declared.
    pub async fn latest_data(&self) -> Result<Option<String>> {
        self.optional_string_detail("latestData").await
    }

    async fn optional_string_detail(&self, name: &str) -> Result<Option<String>> {
        match self.get_detail(name).await {
            Ok(Value::String(s)) => Ok(Some(s)),
            Ok(Value::Null) | Err(DmError::DetailNotFound(_)) => Ok(None),
            Ok(other) => Err(DmError::Parse(format!(
                "Expected a string for {name}, got {other}"
            ))),
            Err(e) => Err(e),
        }
    }

    /// The companies this datasource covers, fetched once and cached.
    pub async fn companies(&self) -> Result<&[Company]> {
        let companies = self
            .companies
            .get_or_try_init(|| self.dm.companies_for_datasource(self))
            .await?;
        Ok(companies)
    }

    /// Fetches this datasource's data for one company.
    ///
    /// See [`DataMonster::get_data`].
    pub async fn get_data(
        &self,
        company: &Company,
        aggregation: Option<&Aggregation>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<DataFrame> {
        self.dm
            .get_data(self, company, aggregation, start_date, end_date)
            .await
    }

    /// Streams this datasource's dimension metadata, restricted to `companies`
    /// and any extra filters, with ticker enrichment on.
    ///
    /// See [`DataMonster::get_dimensions_for_datasource`].
    pub async fn get_dimensions(
        &self,
        companies: &[Company],
        extra_filters: Option<Filters>,
    ) -> Result<DimensionSet> {
        let filters = dimension_filters(companies, extra_filters)?;
        self.dm
            .get_dimensions_for_datasource(self, Some(filters), true)
            .await
    }

    /// Collected dimension records, memoized per filter signature.
    ///
    /// The first call for a given set of companies and filters drains a full
    /// dimension stream; later calls with the same signature return the cached
    /// records without touching the network.
    pub async fn cached_dimensions(
        &self,
        companies: &[Company],
        extra_filters: Option<Filters>,
    ) -> Result<Arc<Vec<Dimension>>> {
        let filters = dimension_filters(companies, extra_filters)?;
        let key = filters.to_json();
        let mut cache = self.dimensions.lock().await;
        if let Some(records) = cache.get(&key) {
            return Ok(records.clone());
        }
        let mut set = self
            .dm
            .get_dimensions_for_datasource(self, Some(filters), true)
            .await?;
        let records = Arc::new(set.try_collect().await?);
        cache.insert(key, records.clone());
        Ok(records)
    }

    /// Replaces the cached detail map; later lookups resolve against it.
    pub async fn set_details(&self, details: Map<String, Value>) {
        self.details.replace(details).await;
    }
}

fn dimension_filters(companies: &[Company], extra_filters: Option<Filters>) -> Result<Filters> {
    let mut filters = extra_filters.unwrap_or_default();
    if !companies.is_empty() {
        let pks = companies
            .iter()
            .map(Company::pk)
            .collect::<Result<Vec<i64>>>()?;
        filters.insert("section_pk", Value::from(pks))?;
    }
    Ok(filters)
}

impl fmt::Debug for Datasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datasource")
            .field("id", &self.record.id)
            .field("name", &self.record.name)
            .field("category", &self.record.category)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Datasource {
    fn eq(&self, other: &Self) -> bool {
        self.record.id == other.record.id
    }
}

impl Eq for Datasource {}

impl Hash for Datasource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.record.id.hash(state);
    }
}
