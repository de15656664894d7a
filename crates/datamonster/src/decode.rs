//! Binary table payload decoding and normalization.
//!
//! Raw data arrives as an Avro object container whose writer schema carries a
//! `structure` attribute mapping column roles (`lower_date`, `upper_date`,
//! `value`, `split`) to the columns filling them. Decoding materializes the raw
//! columns as a frame; normalization then reshapes it to the canonical
//! `value` / `start_date` / `end_date` / `time_span` / `dimensions` layout.

use std::collections::HashMap;

use apache_avro::Reader;
use apache_avro::schema::{RecordSchema, Schema as AvroSchema};
use apache_avro::types::Value as Avro;
use chrono::{Datelike, NaiveDate};
use polars::prelude::{
    Column, DataFrame, DataType, IntoLazy, NULL, SortMultipleOptions, as_struct, col, lit,
};
use serde_json::Value;

use datamonster_core::{DmError, Result};

/// Days from 1970-01-01 to chrono's day-zero (0001-01-01).
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// The column roles announced by a raw table payload.
///
/// Each role may name several columns; a well-formed single-series payload names
/// exactly one column per required role, which the accessors enforce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    lower_date: Vec<String>,
    upper_date: Vec<String>,
    value: Vec<String>,
    split: Vec<String>,
}

impl TableSchema {
    /// Parses the `structure` schema attribute.
    ///
    /// Fails with [`DmError::UnsupportedRequest`] when the attribute is missing,
    /// empty, or lacks one of the required roles.
    fn from_structure(structure: Option<&Value>) -> Result<Self> {
        let Some(Value::Object(map)) = structure else {
            return Err(DmError::UnsupportedRequest);
        };
        if map.is_empty()
            || !["lower_date", "upper_date", "value"]
                .iter()
                .all(|role| map.contains_key(*role))
        {
            return Err(DmError::UnsupportedRequest);
        }

        let columns = |role: &str| -> Result<Vec<String>> {
            match map.get(role) {
                None => Ok(Vec::new()),
                Some(value) => serde_json::from_value(value.clone())
                    .map_err(|e| DmError::Parse(format!("Bad structure entry for {role}: {e}"))),
            }
        };
        Ok(Self {
            lower_date: columns("lower_date")?,
            upper_date: columns("upper_date")?,
            value: columns("value")?,
            split: columns("split")?,
        })
    }

    /// The single column holding period starts.
    pub fn lower_date(&self) -> Result<&str> {
        required_single("lower_date", &self.lower_date)
    }

    /// The single column holding exclusive period ends.
    pub fn upper_date(&self) -> Result<&str> {
        required_single("upper_date", &self.upper_date)
    }

    /// The single column holding values.
    pub fn value(&self) -> Result<&str> {
        required_single("value", &self.value)
    }

    /// The split (dimension) columns, possibly empty.
    #[must_use]
    pub fn split_columns(&self) -> &[String] {
        &self.split
    }

    fn is_date_column(&self, name: &str) -> bool {
        self.lower_date.iter().any(|c| c == name) || self.upper_date.iter().any(|c| c == name)
    }
}

fn required_single<'a>(role: &str, columns: &'a [String]) -> Result<&'a str> {
    match columns {
        [one] => Ok(one),
        _ => Err(DmError::SchemaMismatch {
            role: role.to_string(),
            columns: columns.to_vec(),
        }),
    }
}

enum ColumnBuilder {
    Float(Vec<Option<f64>>),
    Int(Vec<Option<i64>>),
    Str(Vec<Option<String>>),
    Date(Vec<Option<i32>>),
}

impl ColumnBuilder {
    /// Picks a builder for a field: date-role columns always build dates, the
    /// rest follow the field's Avro type (unions deferring to their first
    /// non-null branch).
    fn for_field(schema: &AvroSchema, is_date: bool) -> Self {
        if is_date {
            return Self::Date(Vec::new());
        }
        match schema {
            AvroSchema::Double | AvroSchema::Float => Self::Float(Vec::new()),
            AvroSchema::Int | AvroSchema::Long => Self::Int(Vec::new()),
            AvroSchema::Date | AvroSchema::TimestampMillis => Self::Date(Vec::new()),
            AvroSchema::Union(union) => {
                let branch = union
                    .variants()
                    .iter()
                    .find(|v| !matches!(v, AvroSchema::Null));
                match branch {
                    Some(branch) => Self::for_field(branch, false),
                    None => Self::Str(Vec::new()),
                }
            }
            _ => Self::Str(Vec::new()),
        }
    }

    fn push(&mut self, value: Avro) -> Result<()> {
        let value = match value {
            Avro::Union(_, inner) => *inner,
            other => other,
        };
        match (self, value) {
            (Self::Float(v), Avro::Null) => v.push(None),
            (Self::Int(v), Avro::Null) => v.push(None),
            (Self::Str(v), Avro::Null) => v.push(None),
            (Self::Date(v), Avro::Null) => v.push(None),
            (Self::Float(v), Avro::Double(x)) => v.push(Some(x)),
            (Self::Float(v), Avro::Float(x)) => v.push(Some(f64::from(x))),
            (Self::Float(v), Avro::Long(x)) => v.push(Some(x as f64)),
            (Self::Float(v), Avro::Int(x)) => v.push(Some(f64::from(x))),
            (Self::Int(v), Avro::Long(x)) => v.push(Some(x)),
            (Self::Int(v), Avro::Int(x)) => v.push(Some(i64::from(x))),
            (Self::Str(v), Avro::String(s)) => v.push(Some(s)),
            (Self::Date(v), Avro::String(s)) => v.push(Some(parse_date(&s)?)),
            (Self::Date(v), Avro::Date(days)) => v.push(Some(days)),
            (Self::Date(v), Avro::TimestampMillis(ms)) => {
                v.push(Some((ms.div_euclid(MILLIS_PER_DAY)) as i32));
            }
            (_, other) => {
                return Err(DmError::Parse(format!(
                    "Unexpected value in table payload: {other:?}"
                )));
            }
        }
        Ok(())
    }

    fn into_column(self, name: &str) -> Result<Column> {
        let column = match self {
            Self::Float(v) => Column::new(name.into(), v),
            Self::Int(v) => Column::new(name.into(), v),
            Self::Str(v) => Column::new(name.into(), v),
            Self::Date(v) => Column::new(name.into(), v)
                .cast(&DataType::Date)
                .map_err(|e| DmError::Parse(e.to_string()))?,
        };
        Ok(column)
    }
}

/// Days since 1970-01-01, the physical representation of a polars `Date`.
pub(crate) fn days_since_epoch(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

/// Dates arrive either as epoch days or as ISO strings, sometimes with a time
/// part appended; only the date part is significant.
fn parse_date(s: &str) -> Result<i32> {
    let date_part = s.get(..10).unwrap_or(s);
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| DmError::Parse(format!("Bad date in table payload: {s:?}")))?;
    Ok(days_since_epoch(date))
}

/// Decodes a binary table payload into its announced schema and raw columns.
///
/// Fails with [`DmError::UnsupportedRequest`] when the payload does not announce
/// the required column roles.
pub fn decode(buf: &[u8]) -> Result<(TableSchema, DataFrame)> {
    let reader = Reader::new(buf).map_err(|e| DmError::Parse(e.to_string()))?;

    let (schema, names, mut builders) = {
        let AvroSchema::Record(RecordSchema {
            fields, attributes, ..
        }) = reader.writer_schema()
        else {
            return Err(DmError::Parse(
                "Table payload schema is not a record".to_string(),
            ));
        };
        let schema = TableSchema::from_structure(attributes.get("structure"))?;
        let names: Vec<String> = fields.iter().map(|f| f.name.clone()).collect();
        let builders: Vec<ColumnBuilder> = fields
            .iter()
            .map(|f| ColumnBuilder::for_field(&f.schema, schema.is_date_column(&f.name)))
            .collect();
        (schema, names, builders)
    };
    let index: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    for record in reader {
        let record = record.map_err(|e| DmError::Parse(e.to_string()))?;
        let Avro::Record(fields) = record else {
            return Err(DmError::Parse(
                "Table payload row is not a record".to_string(),
            ));
        };
        for (name, value) in fields {
            if let Some(&i) = index.get(name.as_str()) {
                builders[i].push(value)?;
            }
        }
    }

    let columns = names
        .iter()
        .zip(builders)
        .map(|(name, builder)| builder.into_column(name))
        .collect::<Result<Vec<Column>>>()?;
    let frame = DataFrame::new(columns).map_err(|e| DmError::Parse(e.to_string()))?;
    Ok((schema, frame))
}

/// Reshapes raw columns into the canonical layout.
///
/// Maps the role columns to `value` / `start_date` / `end_date`, gathers the
/// split columns into a `dimensions` struct column (null when the payload has no
/// splits), derives `time_span` from the raw half-open period, converts
/// `end_date` to its inclusive form, and sorts by `end_date` keeping the
/// incoming order among ties. Empty frames are returned untouched.
pub fn normalize(schema: &TableSchema, frame: DataFrame) -> Result<DataFrame> {
    let lower = schema.lower_date()?;
    let upper = schema.upper_date()?;
    let value = schema.value()?;

    if frame.height() == 0 {
        return Ok(frame);
    }

    let dimensions = if schema.split_columns().is_empty() {
        lit(NULL).alias("dimensions")
    } else {
        as_struct(
            schema
                .split_columns()
                .iter()
                .map(|name| col(name.as_str()))
                .collect(),
        )
        .alias("dimensions")
    };

    // One select over the raw names; the canonical names exist only as output
    // aliases, so the plan never has to resolve a renamed column.
    frame
        .lazy()
        .select([
            col(value).alias("value"),
            col(lower).alias("start_date"),
            (col(upper).cast(DataType::Int32) - lit(1))
                .cast(DataType::Date)
                .alias("end_date"),
            (col(upper) - col(lower)).alias("time_span"),
            dimensions,
        ])
        .sort(
            ["end_date"],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()
        .map_err(|e| DmError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use apache_avro::Writer;
    use apache_avro::types::Record;

    const TABLE_SCHEMA: &str = r#"{
        "type": "record",
        "name": "table",
        "structure": {
            "lower_date": ["period_start"],
            "upper_date": ["period_end"],
            "value": ["value"],
            "split": ["category", "country"]
        },
        "fields": [
            {"name": "period_start", "type": "string"},
            {"name": "period_end", "type": "string"},
            {"name": "value", "type": "double"},
            {"name": "category", "type": "string"},
            {"name": "country", "type": "string"},
            {"name": "section_pk", "type": "long"}
        ]
    }"#;

    fn payload(rows: &[(&str, &str, f64, &str, &str, i64)]) -> Vec<u8> {
        let schema = AvroSchema::parse_str(TABLE_SCHEMA).unwrap();
        let mut writer = Writer::new(&schema, Vec::new());
        for (start, end, value, category, country, pk) in rows {
            let mut record = Record::new(writer.schema()).unwrap();
            record.put("period_start", *start);
            record.put("period_end", *end);
            record.put("value", *value);
            record.put("category", *category);
            record.put("country", *country);
            record.put("section_pk", *pk);
            writer.append(record).unwrap();
        }
        writer.into_inner().unwrap()
    }

    fn days(date: &str) -> i32 {
        parse_date(date).unwrap()
    }

    #[test]
    fn decodes_announced_schema_and_raw_columns() {
        let buf = payload(&[(
            "2019-01-02",
            "2019-01-03",
            38.516_589_606_814_1,
            "Amazon ex. Whole Foods",
            "US",
            707,
        )]);

        let (schema, frame) = decode(&buf).unwrap();
        assert_eq!(schema.lower_date().unwrap(), "period_start");
        assert_eq!(schema.upper_date().unwrap(), "period_end");
        assert_eq!(schema.value().unwrap(), "value");
        assert_eq!(schema.split_columns(), ["category", "country"]);

        assert_eq!(frame.height(), 1);
        assert_eq!(frame.column("period_start").unwrap().dtype(), &DataType::Date);
        let value = frame
            .column("value")
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .get(0)
            .unwrap();
        assert!((value - 38.516_589_606_814_1).abs() < 1e-12);
    }

    #[test]
    fn normalizes_to_canonical_columns() {
        let buf = payload(&[
            ("2019-01-05", "2019-01-06", 2.0, "Whole Foods", "US", 707),
            ("2019-01-02", "2019-01-03", 38.5, "Amazon ex. Whole Foods", "US", 707),
        ]);

        let (schema, frame) = decode(&buf).unwrap();
        let frame = normalize(&schema, frame).unwrap();

        assert_eq!(
            frame.get_column_names_str(),
            ["value", "start_date", "end_date", "time_span", "dimensions"]
        );

        // Sorted by end_date: the later-written earlier period comes first.
        let starts = frame
            .column("start_date")
            .unwrap()
            .cast(&DataType::Int32)
            .unwrap();
        let starts = starts.as_materialized_series().i32().unwrap();
        assert_eq!(starts.get(0).unwrap(), days("2019-01-02"));
        assert_eq!(starts.get(1).unwrap(), days("2019-01-05"));

        // The inclusive end is one day before the raw exclusive bound.
        let ends = frame
            .column("end_date")
            .unwrap()
            .cast(&DataType::Int32)
            .unwrap();
        let ends = ends.as_materialized_series().i32().unwrap();
        assert_eq!(ends.get(0).unwrap(), days("2019-01-02"));

        // But time_span still reflects the raw period length.
        let spans = frame
            .column("time_span")
            .unwrap()
            .cast(&DataType::Int64)
            .unwrap();
        let spans = spans.as_materialized_series().i64().unwrap();
        assert_eq!(spans.get(0).unwrap(), MILLIS_PER_DAY);

        // Split columns are gathered into the dimensions struct, raw ones dropped.
        let dimensions = frame.column("dimensions").unwrap();
        let dimensions = dimensions.as_materialized_series().struct_().unwrap();
        let categories = dimensions.field_by_name("category").unwrap();
        assert_eq!(
            categories.str().unwrap().get(0).unwrap(),
            "Amazon ex. Whole Foods"
        );
        assert!(frame.column("section_pk").is_err());
    }

    #[test]
    fn missing_structure_is_unsupported() {
        let schema_json = r#"{
            "type": "record",
            "name": "table",
            "fields": [{"name": "value", "type": "double"}]
        }"#;
        let schema = AvroSchema::parse_str(schema_json).unwrap();
        let writer = Writer::new(&schema, Vec::new());
        let buf = writer.into_inner().unwrap();

        assert!(matches!(decode(&buf), Err(DmError::UnsupportedRequest)));
    }

    #[test]
    fn multi_column_role_is_a_schema_mismatch() {
        let schema = TableSchema {
            lower_date: vec!["a".to_string(), "b".to_string()],
            upper_date: vec!["end".to_string()],
            value: vec!["value".to_string()],
            split: Vec::new(),
        };
        match schema.lower_date() {
            Err(DmError::SchemaMismatch { role, columns }) => {
                assert_eq!(role, "lower_date");
                assert_eq!(columns, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn empty_payload_normalizes_to_an_empty_frame() {
        let buf = payload(&[]);
        let (schema, frame) = decode(&buf).unwrap();
        let frame = normalize(&schema, frame).unwrap();
        assert_eq!(frame.height(), 0);
    }

    #[test]
    fn dates_tolerate_a_time_suffix() {
        assert_eq!(
            parse_date("2019-01-02").unwrap(),
            parse_date("2019-01-02T00:00:00").unwrap()
        );
        assert!(parse_date("bogus").is_err());
    }

    #[test]
    fn epoch_day_conversion_matches_known_dates() {
        assert_eq!(parse_date("1970-01-01").unwrap(), 0);
        assert_eq!(parse_date("2019-01-02").unwrap(), 17_898);
    }
}
