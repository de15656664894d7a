//! Uploaded data group entities and schema validation.
//!
//! A data group is a user-uploaded table with a declared column schema. Before a
//! refresh upload the frame is validated locally against that schema, so a bad
//! upload fails fast with a precise diff instead of a server-side rejection.

use std::fmt;

use chrono::NaiveDate;
use polars::prelude::{AnyValue, DataFrame, DataType};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use datamonster_core::{DmError, Result};

use crate::datamonster::{DataMonster, FromRecord};
use crate::detail::DetailCache;

/// The kind of a data group column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Free-form text.
    String,
    /// Numeric values.
    Number,
    /// ISO dates, `YYYY-MM-DD`.
    Date,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Date => "date",
        })
    }
}

/// One declared column of a data group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DataGroupColumn {
    /// The column name.
    pub name: String,
    /// The column kind.
    #[serde(rename = "type_")]
    pub kind: ColumnKind,
}

impl DataGroupColumn {
    /// Creates a column descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for DataGroupColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

/// Processing state of a data group, folded over its uploaded files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataGroupStatus {
    /// Every file processed cleanly.
    Success,
    /// At least one file is still being processed.
    Processing,
    /// At least one file failed.
    Error,
}

impl DataGroupStatus {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(Self::Success),
            "processing" => Ok(Self::Processing),
            "error" => Ok(Self::Error),
            other => Err(DmError::Parse(format!("Unknown data group status: {other:?}"))),
        }
    }

    /// Folds file statuses: any error wins, then any processing, else success.
    fn fold(statuses: impl IntoIterator<Item = Self>) -> Self {
        let mut folded = Self::Success;
        for status in statuses {
            match status {
                Self::Error => return Self::Error,
                Self::Processing => folded = Self::Processing,
                Self::Success => {}
            }
        }
        folded
    }
}

/// The difference between a frame and a data group's declared schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    /// Declared columns the frame lacks. A column present under the right name but
    /// with the wrong kind appears here too.
    pub missing: Vec<DataGroupColumn>,
    /// Frame columns the schema does not declare, with their observed kinds.
    pub extra: Vec<DataGroupColumn>,
    /// Declared date columns whose string values are not strictly `YYYY-MM-DD`.
    pub bad_dates: Vec<DataGroupColumn>,
}

impl SchemaDiff {
    /// True when the frame matches the schema exactly.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.bad_dates.is_empty()
    }
}

impl fmt::Display for SchemaDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |columns: &[DataGroupColumn]| {
            columns
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "missing: [{}]; extra: [{}]; bad dates: [{}]",
            join(&self.missing),
            join(&self.extra),
            join(&self.bad_dates)
        )
    }
}

/// The fields a data group listing returns.
#[derive(Debug, Clone, Deserialize)]
pub struct DataGroupRecord {
    #[serde(rename = "_id")]
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) columns: Vec<DataGroupColumn>,
}

/// A user-uploaded data group.
#[derive(Clone)]
pub struct DataGroup {
    record: DataGroupRecord,
    dm: DataMonster,
    details: DetailCache,
}

impl FromRecord for DataGroup {
    type Record = DataGroupRecord;

    fn from_record(record: DataGroupRecord, dm: &DataMonster) -> Self {
        Self {
            record,
            dm: dm.clone(),
            details: DetailCache::new(),
        }
    }
}

impl DataGroup {
    pub(crate) fn with_details(
        record: DataGroupRecord,
        details: Map<String, Value>,
        dm: &DataMonster,
    ) -> Self {
        Self {
            record,
            dm: dm.clone(),
            details: DetailCache::preloaded(details),
        }
    }

    /// The data group's integer id.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.record.id
    }

    /// The data group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// The declared column schema.
    #[must_use]
    pub fn columns(&self) -> &[DataGroupColumn] {
        &self.record.columns
    }

    fn uri(&self) -> String {
        format!("/rest/v1/data_group/{}", self.record.id)
    }

    /// Looks up a detail field, fetching the detail record on first access.
    pub async fn get_detail(&self, name: &str) -> Result<Value> {
        self.details
            .field(&self.dm, &self.uri(), name)
            .await?
            .ok_or_else(|| DmError::DetailNotFound(name.to_string()))
    }

    /// The processing status, folded over the group's uploaded files.
    ///
    /// An error in any file reports [`DataGroupStatus::Error`]; otherwise any file
    /// still in flight reports [`DataGroupStatus::Processing`].
    pub async fn status(&self) -> Result<DataGroupStatus> {
        let files = self.details.field(&self.dm, &self.uri(), "dataFiles").await?;
        if let Some(Value::Array(files)) = files {
            let mut statuses = Vec::with_capacity(files.len());
            for file in &files {
                if let Some(Value::String(s)) = file.get("status") {
                    statuses.push(DataGroupStatus::parse(s)?);
                }
            }
            if !statuses.is_empty() {
                return Ok(DataGroupStatus::fold(statuses));
            }
        }
        match self.details.field(&self.dm, &self.uri(), "status").await? {
            Some(Value::String(s)) => DataGroupStatus::parse(&s),
            _ => Err(DmError::DetailNotFound("status".to_string())),
        }
    }

    /// Diffs a frame against the declared schema without touching the network.
    ///
    /// A declared column whose frame counterpart has the wrong kind shows up both
    /// as missing (the declared column) and extra (the observed one). A declared
    /// date column backed by strings is checked value-by-value: any value that is
    /// not strictly `YYYY-MM-DD` puts the column in `bad_dates` instead.
    pub fn validate_schema(&self, frame: &DataFrame) -> Result<SchemaDiff> {
        let mut diff = SchemaDiff::default();

        for expected in &self.record.columns {
            let Ok(column) = frame.column(&expected.name) else {
                diff.missing.push(expected.clone());
                continue;
            };
            let observed = observed_kind(column.dtype());
            match (expected.kind, observed) {
                (ColumnKind::Date, ColumnKind::Date) => {}
                (ColumnKind::Date, ColumnKind::String) => {
                    let strings = column
                        .as_materialized_series()
                        .str()
                        .map_err(|e| DmError::Parse(e.to_string()))?;
                    let all_canonical = strings
                        .into_iter()
                        .flatten()
                        .all(is_canonical_date);
                    if !all_canonical {
                        diff.bad_dates.push(expected.clone());
                    }
                }
                (want, got) if want == got => {}
                (_, got) => {
                    diff.missing.push(expected.clone());
                    diff.extra
                        .push(DataGroupColumn::new(expected.name.clone(), got));
                }
            }
        }

        let declared: Vec<&str> = self
            .record
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        for column in frame.get_columns() {
            if !declared.contains(&column.name().as_str()) {
                diff.extra.push(DataGroupColumn::new(
                    column.name().to_string(),
                    observed_kind(column.dtype()),
                ));
            }
        }

        Ok(diff)
    }

    /// Validates `frame` against the schema and uploads it as the group's new data.
    ///
    /// Fails with [`DmError::InvalidArgument`] carrying the schema diff when the
    /// frame does not match; nothing is sent in that case.
    pub async fn refresh(&self, frame: &DataFrame) -> Result<()> {
        let diff = self.validate_schema(frame)?;
        if !diff.is_empty() {
            return Err(DmError::InvalidArgument(format!(
                "Dataframe does not match the data group schema: {diff}"
            )));
        }
        let rows = frame_to_rows(frame)?;
        self.dm.refresh_data_group(self.record.id, rows).await
    }
}

impl fmt::Debug for DataGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataGroup")
            .field("id", &self.record.id)
            .field("name", &self.record.name)
            .field("columns", &self.record.columns)
            .finish_non_exhaustive()
    }
}

impl PartialEq for DataGroup {
    fn eq(&self, other: &Self) -> bool {
        self.record.id == other.record.id
    }
}

impl Eq for DataGroup {}

/// How a frame dtype reads under the data group column taxonomy. Anything that is
/// neither numeric nor a date is treated as text.
fn observed_kind(dtype: &DataType) -> ColumnKind {
    if matches!(dtype, DataType::Date | DataType::Datetime(_, _)) {
        ColumnKind::Date
    } else if dtype.is_primitive_numeric() {
        ColumnKind::Number
    } else {
        ColumnKind::String
    }
}

/// Strict `YYYY-MM-DD`: must parse, and must round-trip to the same text, so a
/// lenient parse of e.g. `2006-6-06` does not slip through.
fn is_canonical_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string() == s)
        .unwrap_or(false)
}

/// Serializes a frame row-wise for the refresh upload.
fn frame_to_rows(frame: &DataFrame) -> Result<Vec<Value>> {
    let columns = frame.get_columns();
    let mut rows = Vec::with_capacity(frame.height());
    for i in 0..frame.height() {
        let mut row = Map::new();
        for column in columns {
            let value = column
                .get(i)
                .map_err(|e| DmError::Parse(e.to_string()))?;
            row.insert(column.name().to_string(), any_value_to_json(&value));
        }
        rows.push(Value::Object(row));
    }
    Ok(rows)
}

fn any_value_to_json(value: &AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::from(*b),
        AnyValue::String(s) => Value::from(*s),
        AnyValue::StringOwned(s) => Value::from(s.as_str()),
        AnyValue::Int8(v) => Value::from(*v),
        AnyValue::Int16(v) => Value::from(*v),
        AnyValue::Int32(v) => Value::from(*v),
        AnyValue::Int64(v) => Value::from(*v),
        AnyValue::UInt8(v) => Value::from(*v),
        AnyValue::UInt16(v) => Value::from(*v),
        AnyValue::UInt32(v) => Value::from(*v),
        AnyValue::UInt64(v) => Value::from(*v),
        AnyValue::Float32(v) => Value::from(*v),
        AnyValue::Float64(v) => Value::from(*v),
        AnyValue::Date(days) => {
            let date = chrono::DateTime::from_timestamp(i64::from(*days) * 86_400, 0)
                .map(|dt| dt.date_naive().format("%Y-%m-%d").to_string());
            date.map_or(Value::Null, Value::from)
        }
        other => Value::from(other.to_string()),
    }
}

pub(crate) fn refresh_body(rows: Vec<Value>) -> Value {
    json!({ "data": rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::Column;

    fn group() -> DataGroup {
        let record = DataGroupRecord {
            id: 1,
            name: "test group".to_string(),
            columns: vec![
                DataGroupColumn::new("date col", ColumnKind::Date),
                DataGroupColumn::new("number col", ColumnKind::Number),
                DataGroupColumn::new("string col", ColumnKind::String),
            ],
        };
        DataGroup::from_record(record, &DataMonster::unconnected())
    }

    fn str_col(name: &str, values: &[&str]) -> Column {
        Column::new(name.into(), values)
    }

    fn num_col(name: &str, values: &[f64]) -> Column {
        Column::new(name.into(), values)
    }

    #[test]
    fn missing_column_is_missing() {
        let frame = DataFrame::new(vec![
            num_col("number col", &[1.0, 2.0]),
            str_col("string col", &["a", "a"]),
        ])
        .unwrap();

        let diff = group().validate_schema(&frame).unwrap();
        assert!(diff.extra.is_empty());
        assert!(diff.bad_dates.is_empty());
        assert_eq!(diff.missing, vec![DataGroupColumn::new("date col", ColumnKind::Date)]);
    }

    #[test]
    fn bad_dates_are_not_missing_or_extra() {
        let frame = DataFrame::new(vec![
            str_col("date col", &["2006-6-06", "2006-06-06"]),
            str_col("string col", &["a", "b"]),
            num_col("number col", &[1.0, 2.0]),
        ])
        .unwrap();

        let diff = group().validate_schema(&frame).unwrap();
        assert!(diff.missing.is_empty());
        assert!(diff.extra.is_empty());
        assert_eq!(diff.bad_dates, vec![DataGroupColumn::new("date col", ColumnKind::Date)]);
    }

    #[test]
    fn wrong_kind_counts_as_missing_and_extra() {
        let frame = DataFrame::new(vec![
            str_col("date col", &["2006-06-06", "2006-06-07"]),
            str_col("number col", &["1", "2"]),
            str_col("string col", &["a", "b"]),
        ])
        .unwrap();

        let diff = group().validate_schema(&frame).unwrap();
        assert!(diff.bad_dates.is_empty());
        assert_eq!(diff.missing, vec![DataGroupColumn::new("number col", ColumnKind::Number)]);
        assert_eq!(diff.extra, vec![DataGroupColumn::new("number col", ColumnKind::String)]);
    }

    #[test]
    fn undeclared_column_is_extra() {
        let frame = DataFrame::new(vec![
            str_col("date col", &["2006-06-06"]),
            num_col("number col", &[1.0]),
            str_col("string col", &["a"]),
            num_col("surprise", &[9.0]),
        ])
        .unwrap();

        let diff = group().validate_schema(&frame).unwrap();
        assert_eq!(diff.extra, vec![DataGroupColumn::new("surprise", ColumnKind::Number)]);
        assert!(diff.missing.is_empty());
    }

    #[test]
    fn column_display_reads_name_then_kind() {
        let col = DataGroupColumn::new("date col", ColumnKind::Date);
        assert_eq!(col.to_string(), "date col (date)");
    }

    #[test]
    fn status_folding_prefers_error_then_processing() {
        use DataGroupStatus::{Error, Processing, Success};
        assert_eq!(DataGroupStatus::fold([Success, Success]), Success);
        assert_eq!(DataGroupStatus::fold([Success, Processing]), Processing);
        assert_eq!(DataGroupStatus::fold([Processing, Error, Success]), Error);
        assert_eq!(DataGroupStatus::fold([]), Success);
    }

    #[test]
    fn rows_serialize_with_column_names() {
        let frame = DataFrame::new(vec![
            str_col("date col", &["2006-06-06"]),
            num_col("number col", &[1.5]),
        ])
        .unwrap();

        let rows = frame_to_rows(&frame).unwrap();
        assert_eq!(
            rows,
            vec![serde_json::json!({"date col": "2006-06-06", "number col": 1.5})]
        );
    }
}
