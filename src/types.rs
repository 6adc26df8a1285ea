//! Core data model types for the loader.
//!
//! Input rows are resolved onto [`CanonicalField`]s, validated into [`Record`]s, grouped into
//! [`Batch`]es and written to the table described by a [`TargetTable`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed internal name for an input attribute, independent of the source header spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CanonicalField {
    MemberId,
    PrescriptionNumber,
    NationalDrugCode,
    ServiceDate,
    ProviderId,
    PharmacyId,
    DrugName,
    DrugStrength,
    Quantity,
    DaysSupply,
    PaidAmount,
    AlertCode,
    AlertDescription,
    Quarter,
    Year,
    BatchTag,
}

impl CanonicalField {
    /// All canonical fields in their positional (header-less) order.
    pub const ALL: [CanonicalField; 16] = [
        Self::MemberId,
        Self::PrescriptionNumber,
        Self::NationalDrugCode,
        Self::ServiceDate,
        Self::ProviderId,
        Self::PharmacyId,
        Self::DrugName,
        Self::DrugStrength,
        Self::Quantity,
        Self::DaysSupply,
        Self::PaidAmount,
        Self::AlertCode,
        Self::AlertDescription,
        Self::Quarter,
        Self::Year,
        Self::BatchTag,
    ];

    /// The canonical (camelCase) name, also used in rejection reasons.
    pub fn name(self) -> &'static str {
        match self {
            Self::MemberId => "memberId",
            Self::PrescriptionNumber => "prescriptionNumber",
            Self::NationalDrugCode => "nationalDrugCode",
            Self::ServiceDate => "serviceDate",
            Self::ProviderId => "providerId",
            Self::PharmacyId => "pharmacyId",
            Self::DrugName => "drugName",
            Self::DrugStrength => "drugStrength",
            Self::Quantity => "quantity",
            Self::DaysSupply => "daysSupply",
            Self::PaidAmount => "paidAmount",
            Self::AlertCode => "alertCode",
            Self::AlertDescription => "alertDescription",
            Self::Quarter => "quarter",
            Self::Year => "year",
            Self::BatchTag => "batchTag",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Calendar quarter of a reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quarter {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl Quarter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Q1 => "Q1",
            Self::Q2 => "Q2",
            Self::Q3 => "Q3",
            Self::Q4 => "Q4",
        }
    }
}

impl FromStr for Quarter {
    type Err = ();

    /// Accepts exactly `Q1`..`Q4` (surrounding whitespace ignored).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Q1" => Ok(Self::Q1),
            "Q2" => Ok(Self::Q2),
            "Q3" => Ok(Self::Q3),
            "Q4" => Ok(Self::Q4),
            _ => Err(()),
        }
    }
}

/// Reporting period of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub quarter: Quarter,
    pub year: i32,
}

/// Lifecycle status of a [`Record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Pending,
    Validated,
    Processed,
    Error,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Validated => "VALIDATED",
            Self::Processed => "PROCESSED",
            Self::Error => "ERROR",
        }
    }
}

/// Identifier shared by all records written in one load run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchTag(String);

impl BatchTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Derive a tag from a run start time, e.g. `LOAD_20240131_235959`.
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        Self(format!("LOAD_{}", ts.format("%Y%m%d_%H%M%S")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated claim alert record.
///
/// Records are transient: they live from validation until their batch has been written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub identifier: Uuid,
    pub member_id: String,
    pub prescription_number: Option<String>,
    pub national_drug_code: Option<String>,
    pub service_date: Option<NaiveDate>,
    pub provider_id: Option<String>,
    pub pharmacy_id: Option<String>,
    pub drug_name: Option<String>,
    pub drug_strength: Option<String>,
    pub quantity: Option<Decimal>,
    pub days_supply: Option<i64>,
    pub paid_amount: Option<Decimal>,
    pub alert_code: Option<String>,
    pub alert_description: Option<String>,
    pub period: Period,
    pub batch_tag: Option<BatchTag>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub status: RecordStatus,
    pub error_message: Option<String>,
    /// Unmapped source columns as a JSON object.
    pub extra_data: Option<serde_json::Value>,
}

impl Record {
    /// A minimal record with only the required fields set; status is `PENDING`.
    pub fn new(member_id: impl Into<String>, period: Period) -> Self {
        Self {
            identifier: Uuid::new_v4(),
            member_id: member_id.into(),
            prescription_number: None,
            national_drug_code: None,
            service_date: None,
            provider_id: None,
            pharmacy_id: None,
            drug_name: None,
            drug_strength: None,
            quantity: None,
            days_supply: None,
            paid_amount: None,
            alert_code: None,
            alert_description: None,
            period,
            batch_tag: None,
            created_at: Utc::now(),
            updated_at: None,
            status: RecordStatus::Pending,
            error_message: None,
            extra_data: None,
        }
    }

    /// Read the value that a [`RecordColumn`] projects out of this record.
    pub fn cell(&self, column: RecordColumn) -> Cell<'_> {
        use CanonicalField as F;

        match column {
            RecordColumn::Identifier => Cell::Uuid(self.identifier),
            RecordColumn::CreatedAt => Cell::Timestamp(Some(self.created_at)),
            RecordColumn::UpdatedAt => Cell::Timestamp(self.updated_at),
            RecordColumn::Status => Cell::Text(Some(self.status.as_str())),
            RecordColumn::ErrorMessage => Cell::Text(self.error_message.as_deref()),
            RecordColumn::ExtraData => Cell::Json(self.extra_data.as_ref()),
            RecordColumn::Field(field) => match field {
                F::MemberId => Cell::Text(Some(self.member_id.as_str())),
                F::PrescriptionNumber => Cell::Text(self.prescription_number.as_deref()),
                F::NationalDrugCode => Cell::Text(self.national_drug_code.as_deref()),
                F::ServiceDate => Cell::Date(self.service_date),
                F::ProviderId => Cell::Text(self.provider_id.as_deref()),
                F::PharmacyId => Cell::Text(self.pharmacy_id.as_deref()),
                F::DrugName => Cell::Text(self.drug_name.as_deref()),
                F::DrugStrength => Cell::Text(self.drug_strength.as_deref()),
                F::Quantity => Cell::Decimal(self.quantity),
                F::DaysSupply => Cell::Integer(self.days_supply),
                F::PaidAmount => Cell::Decimal(self.paid_amount),
                F::AlertCode => Cell::Text(self.alert_code.as_deref()),
                F::AlertDescription => Cell::Text(self.alert_description.as_deref()),
                F::Quarter => Cell::Text(Some(self.period.quarter.as_str())),
                F::Year => Cell::Integer(Some(i64::from(self.period.year))),
                F::BatchTag => Cell::Text(self.batch_tag.as_ref().map(BatchTag::as_str)),
            },
        }
    }
}

/// A borrowed, typed view of one record attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell<'a> {
    Uuid(Uuid),
    Text(Option<&'a str>),
    Integer(Option<i64>),
    Decimal(Option<Decimal>),
    Date(Option<NaiveDate>),
    Timestamp(Option<DateTime<Utc>>),
    Json(Option<&'a serde_json::Value>),
}

/// An ordered, bounded group of records sharing a batch tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Zero-based position of this batch within the run.
    pub index: usize,
    pub tag: BatchTag,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Logical column type in the target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SqlType {
    /// Variable-length text, optionally bounded.
    Text { max_len: Option<u32> },
    /// 64-bit signed integer.
    Integer,
    /// Exact decimal with declared precision and scale.
    Decimal { precision: u8, scale: u8 },
    /// Calendar date.
    Date,
    /// UTC timestamp.
    Timestamp,
}

impl SqlType {
    fn ddl(self) -> String {
        match self {
            Self::Text { max_len: Some(n) } => format!("VARCHAR({n})"),
            Self::Text { max_len: None } => "TEXT".to_string(),
            Self::Integer => "INTEGER".to_string(),
            Self::Decimal { precision, scale } => format!("DECIMAL({precision},{scale})"),
            Self::Date => "DATE".to_string(),
            Self::Timestamp => "TIMESTAMP".to_string(),
        }
    }
}

/// Which attribute of a [`Record`] a target column is populated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecordColumn {
    Identifier,
    Field(CanonicalField),
    CreatedAt,
    UpdatedAt,
    Status,
    ErrorMessage,
    ExtraData,
}

/// A single named, typed column in a [`TargetTable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub source: RecordColumn,
    pub sql_type: SqlType,
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, source: RecordColumn, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            source,
            sql_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Descriptor of the relational table a load writes into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetTable {
    pub name: String,
    /// Version of the column list; bump when columns change.
    pub version: u32,
    pub columns: Vec<ColumnSpec>,
}

impl TargetTable {
    pub fn new(name: impl Into<String>, version: u32, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            version,
            columns,
        }
    }

    /// The default claim-alert table (version 1).
    pub fn claim_alerts() -> Self {
        use CanonicalField as F;
        use RecordColumn as C;

        let text = |n| SqlType::Text { max_len: Some(n) };
        Self::new(
            "rx_claim_alerts",
            1,
            vec![
                ColumnSpec::new("record_id", C::Identifier, text(36)).not_null(),
                ColumnSpec::new("member_id", C::Field(F::MemberId), text(50)).not_null(),
                ColumnSpec::new("prescription_number", C::Field(F::PrescriptionNumber), text(50)),
                ColumnSpec::new("national_drug_code", C::Field(F::NationalDrugCode), text(11)),
                ColumnSpec::new("service_date", C::Field(F::ServiceDate), SqlType::Date),
                ColumnSpec::new("provider_id", C::Field(F::ProviderId), text(50)),
                ColumnSpec::new("pharmacy_id", C::Field(F::PharmacyId), text(50)),
                ColumnSpec::new("drug_name", C::Field(F::DrugName), text(200)),
                ColumnSpec::new("drug_strength", C::Field(F::DrugStrength), text(100)),
                ColumnSpec::new(
                    "quantity",
                    C::Field(F::Quantity),
                    SqlType::Decimal { precision: 12, scale: 3 },
                ),
                ColumnSpec::new("days_supply", C::Field(F::DaysSupply), SqlType::Integer),
                ColumnSpec::new(
                    "paid_amount",
                    C::Field(F::PaidAmount),
                    SqlType::Decimal { precision: 12, scale: 2 },
                ),
                ColumnSpec::new("alert_code", C::Field(F::AlertCode), text(20)),
                ColumnSpec::new("alert_description", C::Field(F::AlertDescription), text(500)),
                ColumnSpec::new("quarter", C::Field(F::Quarter), text(2)).not_null(),
                ColumnSpec::new("year", C::Field(F::Year), SqlType::Integer).not_null(),
                ColumnSpec::new("batch_tag", C::Field(F::BatchTag), text(50)).not_null(),
                ColumnSpec::new("created_at", C::CreatedAt, SqlType::Timestamp).not_null(),
                ColumnSpec::new("updated_at", C::UpdatedAt, SqlType::Timestamp),
                ColumnSpec::new("status", C::Status, text(20)).not_null(),
                ColumnSpec::new("error_message", C::ErrorMessage, SqlType::Text { max_len: None }),
                ColumnSpec::new("extra_data", C::ExtraData, SqlType::Text { max_len: None }),
            ],
        )
    }

    /// Iterate column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Returns the index of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// The column populated from a record's batch tag, used by post-load verification.
    pub fn batch_tag_column(&self) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| c.source == RecordColumn::Field(CanonicalField::BatchTag))
    }

    /// Render a `CREATE TABLE IF NOT EXISTS` statement for this table.
    pub fn create_table_sql(&self) -> String {
        let cols = self
            .columns
            .iter()
            .map(|c| {
                let null = if c.nullable { "" } else { " NOT NULL" };
                format!("    {} {}{}", c.name, c.sql_type.ddl(), null)
            })
            .collect::<Vec<_>>()
            .join(",\n");
        format!("CREATE TABLE IF NOT EXISTS {} (\n{}\n)", self.name, cols)
    }
}
