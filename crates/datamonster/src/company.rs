//! The company entity.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use datamonster_core::{DmError, Result};

use crate::datamonster::{DataMonster, FromRecord};
use crate::datasource::Datasource;
use crate::detail::DetailCache;

/// The fields a company listing returns.
#[derive(Debug, Clone, Deserialize)]
pub struct CompanyRecord {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) ticker: Option<String>,
    pub(crate) name: String,
    pub(crate) uri: String,
}

/// A company known to the service.
///
/// Listings return only the summary fields; everything else is fetched lazily
/// through [`Company::get_detail`] and the typed accessors built on it. Two
/// companies are equal iff their ids are equal.
#[derive(Clone)]
pub struct Company {
    record: CompanyRecord,
    dm: DataMonster,
    details: DetailCache,
    datasources: Arc<OnceCell<Vec<Datasource>>>,
}

impl FromRecord for Company {
    type Record = CompanyRecord;

    fn from_record(record: CompanyRecord, dm: &DataMonster) -> Self {
        Self {
            record,
            dm: dm.clone(),
            details: DetailCache::new(),
            datasources: Arc::new(OnceCell::new()),
        }
    }
}

impl Company {
    pub(crate) fn with_details(
        record: CompanyRecord,
        details: Map<String, Value>,
        dm: &DataMonster,
    ) -> Self {
        Self {
            record,
            dm: dm.clone(),
            details: DetailCache::preloaded(details),
            datasources: Arc::new(OnceCell::new()),
        }
    }

    /// The company id, as the service renders it.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// The id as an integer primary key, as filter payloads want it.
    pub fn pk(&self) -> Result<i64> {
        self.record
            .id
            .parse()
            .map_err(|_| DmError::Parse(format!("Bad company id: {:?}", self.record.id)))
    }

    /// The exchange ticker, when the company has one.
    #[must_use]
    pub fn ticker(&self) -> Option<&str> {
        self.record.ticker.as_deref()
    }

    /// The company name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// The resource path of this company.
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

    /// Fiscal quarter boundaries, from the detail record.
    pub async fn quarters(&self) -> Result<Vec<String>> {
        let quarters = self.get_detail("quarters").await?;
        serde_json::from_value(quarters)
            .map_err(|e| DmError::Parse(format!("Bad quarters detail: {e}")))
    }

    /// Replaces the cached detail map; later lookups resolve against it.
    pub async fn set_details(&self, details: Map<String, Value>) {
        self.details.replace(details).await;
    }

    /// The datasources covering this company, fetched once and cached.
    pub async fn datasources(&self) -> Result<&[Datasource]> {
        let sources = self
            .datasources
            .get_or_try_init(|| self.dm.datasources_for_company(self))
            .await?;
        Ok(sources)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        id: &str,
        ticker: Option<&str>,
        name: &str,
        uri: &str,
        dm: DataMonster,
    ) -> Self {
        Self {
            record: CompanyRecord {
                id: id.to_string(),
                ticker: ticker.map(str::to_string),
                name: name.to_string(),
                uri: uri.to_string(),
            },
            dm,
            details: DetailCache::new(),
            datasources: Arc::new(OnceCell::new()),
        }
    }
}

impl fmt::Debug for Company {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Company")
            .field("id", &self.record.id)
            .field("ticker", &self.record.ticker)
            .field("name", &self.record.name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Company {
    fn eq(&self, other: &Self) -> bool {
        self.record.id == other.record.id
    }
}

impl Eq for Company {}

impl Hash for Company {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.record.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_and_hash_follow_the_id() {
        use std::collections::HashSet;

        let dm = DataMonster::unconnected();
        let a = Company::for_tests("7", Some("AAPL"), "Apple", "company/7", dm.clone());
        let b = Company::for_tests("7", None, "Apple Inc", "company/7", dm.clone());
        let c = Company::for_tests("8", Some("AAPL"), "Apple", "company/8", dm);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<Company> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn pk_parses_the_id() {
        let dm = DataMonster::unconnected();
        let c = Company::for_tests("42", None, "n", "u", dm.clone());
        assert_eq!(c.pk().unwrap(), 42);

        let c = Company::for_tests("not-a-number", None, "n", "u", dm);
        assert!(matches!(c.pk(), Err(DmError::Parse(_))));
    }
}
