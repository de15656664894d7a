//! The facade and lazy listings.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use polars::prelude::{DataFrame, DataType, IntoLazy, col, lit};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use datamonster_client::transport::CONTENT_TYPE_AVRO;
use datamonster_client::{DmClient, PagedRecords, Transport};
use datamonster_core::{DmError, Filters, Result};

use crate::aggregation::Aggregation;
use crate::company::Company;
use crate::data_group::{DataGroup, refresh_body};
use crate::datasource::Datasource;
use crate::decode::{self, TableSchema};
use crate::dimensions::DimensionSet;

const COMPANY_PATH: &str = "/rest/v1/company";
const DATASOURCE_PATH: &str = "/rest/v1/datasource";
const DATA_GROUP_PATH: &str = "/rest/v1/data_group";

/// Entry point to the DataMonster service.
///
/// Cheap to clone; all clones share one underlying transport. Entities handed out
/// by the facade keep a handle back to it for their lazy detail fetches.
#[derive(Clone, Debug)]
pub struct DataMonster {
    transport: Arc<dyn Transport>,
}

impl DataMonster {
    /// Connects to the default server with the given key material.
    ///
    /// Fails with [`DmError::Auth`] if `secret` is not valid hex.
    pub fn new(key_id: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        Ok(Self::from_transport(Arc::new(DmClient::new(key_id, secret)?)))
    }

    /// Connects with an explicit server and TLS verification flag.
    pub fn with_config(
        key_id: impl Into<String>,
        secret: impl Into<String>,
        server: Option<String>,
        verify: bool,
    ) -> Result<Self> {
        Ok(Self::from_transport(Arc::new(DmClient::with_config(
            key_id, secret, server, verify,
        )?)))
    }

    /// Builds a facade over an arbitrary transport.
    #[must_use]
    pub fn from_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Fetches a detail record as a JSON map.
    pub(crate) async fn fetch_details(&self, path: &str) -> Result<Map<String, Value>> {
        let value = self.transport.get(path, &[]).await?.into_json()?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(DmError::Parse(format!(
                "Expected a JSON object from {path}, got {other}"
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Companies
    // ------------------------------------------------------------------

    /// Lists companies, optionally restricted by a ticker/name query or to those
    /// covered by a datasource. Pages are fetched as the listing is consumed.
    #[must_use]
    pub fn get_companies(
        &self,
        query: Option<&str>,
        datasource: Option<&Datasource>,
    ) -> Listing<Company> {
        let mut params = Vec::new();
        if let Some(query) = query {
            params.push(("q", query.to_string()));
        }
        if let Some(datasource) = datasource {
            params.push(("datasourceId", datasource.id().to_string()));
        }
        self.listing(with_query(COMPANY_PATH, &params))
    }

    /// Finds the company whose ticker matches `ticker`, case-insensitively.
    ///
    /// Fails with [`DmError::NotFound`] when no listed company matches.
    pub async fn get_company_by_ticker(&self, ticker: &str) -> Result<Company> {
        let query = ticker.to_lowercase();
        let mut companies = self.get_companies(Some(&query), None);
        while let Some(company) = companies.try_next().await? {
            if company
                .ticker()
                .is_some_and(|t| t.eq_ignore_ascii_case(ticker))
            {
                return Ok(company);
            }
        }
        Err(DmError::NotFound(format!(
            "Could not find company with ticker {ticker}"
        )))
    }

    /// Fetches a single company by its integer id, details included.
    pub async fn get_company_by_id(&self, id: i64) -> Result<Company> {
        let path = format!("{COMPANY_PATH}/{id}");
        let mut details = self.fetch_details(&path).await?;
        details.insert("uri".to_string(), Value::from(path));
        let record = serde_json::from_value(Value::Object(details.clone()))
            .map_err(|e| DmError::Parse(format!("Bad company record: {e}")))?;
        Ok(Company::with_details(record, details, self))
    }

    /// The raw detail record for a company.
    pub async fn get_company_details(&self, id: i64) -> Result<Map<String, Value>> {
        self.fetch_details(&format!("{COMPANY_PATH}/{id}")).await
    }

    pub(crate) async fn companies_for_datasource(
        &self,
        datasource: &Datasource,
    ) -> Result<Vec<Company>> {
        self.get_companies(None, Some(datasource)).try_collect().await
    }

    // ------------------------------------------------------------------
    // Datasources
    // ------------------------------------------------------------------

    /// Lists datasources, optionally restricted by a name query or to those
    /// covering a company. Pages are fetched as the listing is consumed.
    #[must_use]
    pub fn get_datasources(
        &self,
        query: Option<&str>,
        company: Option<&Company>,
    ) -> Listing<Datasource> {
        let mut params = Vec::new();
        if let Some(query) = query {
            params.push(("q", query.to_string()));
        }
        if let Some(company) = company {
            params.push(("companyId", company.id().to_string()));
        }
        self.listing(with_query(DATASOURCE_PATH, &params))
    }

    /// Finds the datasource whose name matches `name`, case-insensitively.
    ///
    /// Fails with [`DmError::NotFound`] when no listed datasource matches.
    pub async fn get_datasource_by_name(&self, name: &str) -> Result<Datasource> {
        let mut datasources = self.get_datasources(Some(name), None);
        while let Some(datasource) = datasources.try_next().await? {
            if datasource.name().eq_ignore_ascii_case(name) {
                return Ok(datasource);
            }
        }
        Err(DmError::NotFound(format!(
            "Did not find a data source matching the name {name:?}"
        )))
    }

    /// Fetches a single datasource by UUID, details included.
    pub async fn get_datasource_by_id(&self, id: &str) -> Result<Datasource> {
        let path = format!("{DATASOURCE_PATH}/{id}");
        let mut details = self.fetch_details(&path).await?;
        details.insert("uri".to_string(), Value::from(path));
        let record = serde_json::from_value(Value::Object(details.clone()))
            .map_err(|e| DmError::Parse(format!("Bad datasource record: {e}")))?;
        Ok(Datasource::with_details(record, details, self))
    }

    /// The raw detail record for a datasource.
    pub async fn get_datasource_details(&self, id: &str) -> Result<Map<String, Value>> {
        self.fetch_details(&format!("{DATASOURCE_PATH}/{id}")).await
    }

    pub(crate) async fn datasources_for_company(
        &self,
        company: &Company,
    ) -> Result<Vec<Datasource>> {
        self.get_datasources(None, Some(company)).try_collect().await
    }

    // ------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------

    /// Fetches a datasource's data for one company as a normalized frame.
    ///
    /// The frame has `value`, `start_date`, `end_date`, `time_span` and
    /// `dimensions` columns, sorted by `end_date`; `end_date` is inclusive, one day
    /// before the raw exclusive bound, and `time_span` preserves the raw period
    /// length.
    ///
    /// Date bounds are applied inclusively against `start_date` (lower) and
    /// `end_date` (upper); passing a bound the datasource's metadata does not
    /// declare a date field for fails with [`DmError::UnsupportedOperation`].
    /// Each bound is also echoed into the request filters against the declared
    /// date field, so the server prunes clearly out-of-range periods before
    /// the payload is built.
    pub async fn get_data(
        &self,
        datasource: &Datasource,
        company: &Company,
        aggregation: Option<&Aggregation>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<DataFrame> {
        if let Some(aggregation) = aggregation {
            aggregation.check_against(company)?;
        }

        let mut filters = Filters::new();
        filters.insert("section_pk", Value::from(vec![company.pk()?]))?;

        if let Some(start) = start_date {
            let Some(field) = datasource.upper_date_field().await? else {
                return Err(DmError::UnsupportedOperation(
                    "This data source does not support date queries".to_string(),
                ));
            };
            // Periods ending before the requested start can never survive the
            // inclusive start filter below.
            filters.insert(
                format!("{field}__gte"),
                start.format("%Y-%m-%d").to_string(),
            )?;
        }
        if let Some(end) = end_date {
            let Some(field) = datasource.lower_date_field().await? else {
                return Err(DmError::UnsupportedOperation(
                    "This data source does not support date queries".to_string(),
                ));
            };
            // The server bound is one day past the inclusive end so a period
            // starting exactly on the end date is not pruned prematurely.
            let past_end = end.succ_opt().ok_or_else(|| {
                DmError::InvalidArgument("end_date is out of range".to_string())
            })?;
            filters.insert(
                format!("{field}__lt"),
                past_end.format("%Y-%m-%d").to_string(),
            )?;
        }

        let (schema, frame) = self.get_data_raw(datasource, filters, aggregation).await?;
        let frame = decode::normalize(&schema, frame)?;
        apply_date_bounds(frame, start_date, end_date)
    }

    /// Fetches and decodes a raw data payload without normalizing it.
    ///
    /// Returns the table schema announced by the payload alongside a frame of the
    /// raw columns.
    pub async fn get_data_raw(
        &self,
        datasource: &Datasource,
        filters: Filters,
        aggregation: Option<&Aggregation>,
    ) -> Result<(TableSchema, DataFrame)> {
        let body = json!({
            "timeAggregation": aggregation.map_or(Value::Null, Aggregation::to_time_aggregation),
            "valueAggregation": Value::Null,
            "filters": filters.into_value(),
            "forecast": false,
        });
        let path = format!("/rest/v2/datasource/{}/rawdata", datasource.id());
        tracing::debug!(datasource = datasource.id(), "fetching raw data");
        let bytes = self
            .transport
            .post(&path, &body, &[("Accept", CONTENT_TYPE_AVRO)])
            .await?
            .into_binary()?;
        decode::decode(&bytes)
    }

    // ------------------------------------------------------------------
    // Dimensions
    // ------------------------------------------------------------------

    /// Streams dimension ("split") metadata for a datasource.
    ///
    /// The set's aggregate metadata is available immediately; dimension records
    /// stream page by page as the set is consumed. With
    /// `add_company_info_from_pks`, each record's `section_pk` entry is resolved
    /// to tickers via [`DataMonster::get_company_by_id`], one lookup per distinct
    /// pk across the whole iteration.
    pub async fn get_dimensions_for_datasource(
        &self,
        datasource: &Datasource,
        filters: Option<Filters>,
        add_company_info_from_pks: bool,
    ) -> Result<DimensionSet> {
        let mut params = Vec::new();
        if let Some(filters) = filters {
            if !filters.is_empty() {
                params.push(("filters", filters.to_json()));
            }
        }
        let path = with_query(
            &format!("{DATASOURCE_PATH}/{}/dimensions", datasource.id()),
            &params,
        );
        DimensionSet::fetch(self.clone(), &path, add_company_info_from_pks).await
    }

    // ------------------------------------------------------------------
    // Data groups
    // ------------------------------------------------------------------

    /// Lists data groups, optionally restricted by a name query.
    #[must_use]
    pub fn get_data_groups(&self, query: Option<&str>) -> Listing<DataGroup> {
        let mut params = Vec::new();
        if let Some(query) = query {
            params.push(("q", query.to_string()));
        }
        self.listing(with_query(DATA_GROUP_PATH, &params))
    }

    /// Fetches a single data group by id, details included.
    pub async fn get_data_group_by_id(&self, id: i64) -> Result<DataGroup> {
        let path = format!("{DATA_GROUP_PATH}/{id}");
        let details = self.fetch_details(&path).await?;
        let record = serde_json::from_value(Value::Object(details.clone()))
            .map_err(|e| DmError::Parse(format!("Bad data group record: {e}")))?;
        Ok(DataGroup::with_details(record, details, self))
    }

    pub(crate) async fn refresh_data_group(&self, id: i64, rows: Vec<Value>) -> Result<()> {
        let path = format!("{DATA_GROUP_PATH}/{id}/refresh");
        tracing::debug!(id, rows = rows.len(), "refreshing data group");
        self.transport
            .post(&path, &refresh_body(rows), &[])
            .await?
            .into_json()?;
        Ok(())
    }

    fn listing<T: FromRecord>(&self, path: String) -> Listing<T> {
        Listing {
            records: PagedRecords::new(self.transport.clone(), path),
            dm: self.clone(),
        }
    }
}

/// Domain entities constructible from a listing record.
pub trait FromRecord: Sized {
    /// The wire form of one listing record.
    type Record: DeserializeOwned;

    /// Builds the entity, giving it a facade handle for later lazy fetches.
    fn from_record(record: Self::Record, dm: &DataMonster) -> Self;
}

/// A lazy, single-pass listing of domain entities.
///
/// Wraps a paginated cursor: records stream one page at a time, and dropping the
/// listing early issues no further requests.
pub struct Listing<T: FromRecord> {
    records: PagedRecords<T::Record>,
    dm: DataMonster,
}

impl<T: FromRecord> Listing<T> {
    /// Pulls the next entity. Returns `Ok(None)` once the listing is exhausted.
    pub async fn try_next(&mut self) -> Result<Option<T>> {
        let record = self.records.try_next().await?;
        Ok(record.map(|r| T::from_record(r, &self.dm)))
    }

    /// Drains the listing into a vector.
    pub async fn try_collect(mut self) -> Result<Vec<T>> {
        let mut entities = Vec::new();
        while let Some(entity) = self.try_next().await? {
            entities.push(entity);
        }
        Ok(entities)
    }
}

impl<T: FromRecord> fmt::Debug for Listing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listing").finish_non_exhaustive()
    }
}

/// Appends urlencoded query parameters to a path.
fn with_query(path: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return path.to_string();
    }
    let query: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    format!("{}?{}", path, query.join("&"))
}

/// Filters a normalized frame to `start_date >= start` and `end_date <= end`,
/// both inclusive. Empty frames pass through untouched; they carry no date
/// columns to filter on.
fn apply_date_bounds(
    frame: DataFrame,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<DataFrame> {
    if frame.height() == 0 || (start_date.is_none() && end_date.is_none()) {
        return Ok(frame);
    }
    let mut lazy = frame.lazy();
    if let Some(start) = start_date {
        lazy = lazy.filter(
            col("start_date")
                .cast(DataType::Int32)
                .gt_eq(lit(decode::days_since_epoch(start))),
        );
    }
    if let Some(end) = end_date {
        lazy = lazy.filter(
            col("end_date")
                .cast(DataType::Int32)
                .lt_eq(lit(decode::days_since_epoch(end))),
        );
    }
    lazy.collect().map_err(|e| DmError::Parse(e.to_string()))
}

#[cfg(test)]
impl DataMonster {
    /// A facade whose transport refuses every request; for tests that never
    /// touch the network.
    pub(crate) fn unconnected() -> Self {
        #[derive(Debug)]
        struct Unconnected;

        #[async_trait::async_trait]
        impl Transport for Unconnected {
            async fn get(
                &self,
                _path: &str,
                _headers: &[(&str, &str)],
            ) -> Result<datamonster_client::Payload> {
                Err(DmError::Network("unconnected test transport".to_string()))
            }

            async fn post(
                &self,
                _path: &str,
                _body: &Value,
                _headers: &[(&str, &str)],
            ) -> Result<datamonster_client::Payload> {
                Err(DmError::Network("unconnected test transport".to_string()))
            }
        }

        Self::from_transport(Arc::new(Unconnected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_strings_are_urlencoded() {
        assert_eq!(with_query("/rest/v1/company", &[]), "/rest/v1/company");
        assert_eq!(
            with_query(
                "/rest/v1/company",
                &[("q", "space inc".to_string()), ("datasourceId", "u-1".to_string())]
            ),
            "/rest/v1/company?q=space%20inc&datasourceId=u-1"
        );
    }
}
