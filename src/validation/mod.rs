//! Row validation.
//!
//! [`RecordValidator`] turns one row of raw string fields into either a typed [`Record`] or the
//! complete list of reasons it was rejected. Rules are evaluated independently so a row with
//! several problems reports all of them at once. Rejections are values, never errors: the
//! caller records them and moves on to the next row.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::ColumnMapping;
use crate::types::{BatchTag, CanonicalField, Period, Quarter, Record, RecordColumn, RecordStatus, SqlType, TargetTable};

pub const MEMBER_ID_MAX_LEN: usize = 50;
pub const NATIONAL_DRUG_CODE_MAX_LEN: usize = 11;
pub const MIN_YEAR: i32 = 2020;
pub const MAX_YEAR: i32 = 2099;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];

/// Why a row was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// A required field is absent or empty.
    Required { field: CanonicalField },
    /// A value could not be parsed into its type (or domain, for quarters).
    Invalid { field: CanonicalField },
    /// A text value is longer than allowed.
    TooLong { field: CanonicalField, max: usize },
    /// A numeric value is below zero.
    Negative { field: CanonicalField },
    /// A numeric value is outside its allowed range.
    OutOfRange { field: CanonicalField },
    /// A decimal value has more digits than its target column holds.
    ExceedsPrecision { field: CanonicalField, precision: u8, scale: u8 },
    /// The row is too short to reach every mapped column.
    FieldCountMismatch { expected: usize, found: usize },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required { field } => write!(f, "{field} required"),
            Self::Invalid { field } => write!(f, "invalid {field}"),
            Self::TooLong { field, max } => write!(f, "{field} exceeds {max} characters"),
            Self::Negative { field } => write!(f, "{field} must be non-negative"),
            Self::OutOfRange { field } => write!(f, "{field} out of range"),
            Self::ExceedsPrecision { field, precision, scale } => {
                write!(f, "{field} does not fit DECIMAL({precision},{scale})")
            }
            Self::FieldCountMismatch { expected, found } => write!(
                f,
                "field count mismatch: expected at least {expected} fields, found {found}"
            ),
        }
    }
}

/// Outcome of validating one row: exactly one of a record or a non-empty reason list.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Valid(Record),
    Rejected(Vec<RejectReason>),
}

impl RowOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    pub fn reasons(&self) -> &[RejectReason] {
        match self {
            Self::Valid(_) => &[],
            Self::Rejected(reasons) => reasons,
        }
    }
}

/// Validates rows against a resolved [`ColumnMapping`].
#[derive(Debug, Clone)]
pub struct RecordValidator {
    mapping: ColumnMapping,
    check_constraints: bool,
    decimal_columns: Vec<(CanonicalField, u8, u8)>,
}

impl RecordValidator {
    pub fn new(mapping: ColumnMapping) -> Self {
        Self {
            mapping,
            check_constraints: true,
            decimal_columns: Vec::new(),
        }
    }

    /// Reject decimal values that do not fit the precision and scale `table` declares for them.
    /// Like type parsing, this applies even when constraints are disabled.
    pub fn with_target(mut self, table: &TargetTable) -> Self {
        self.decimal_columns = table
            .columns
            .iter()
            .filter_map(|c| match (c.source, c.sql_type) {
                (RecordColumn::Field(field), SqlType::Decimal { precision, scale }) => Some((field, precision, scale)),
                _ => None,
            })
            .collect();
        self
    }

    /// Toggle domain constraints (lengths, ranges, signs). Type parsing always applies.
    pub fn with_constraints(mut self, enabled: bool) -> Self {
        self.check_constraints = enabled;
        self
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    /// Validate one row of raw fields.
    pub fn validate<S: AsRef<str>>(&self, fields: &[S]) -> RowOutcome {
        let needed = self.mapping.min_row_width();
        if fields.len() < needed {
            return RowOutcome::Rejected(vec![RejectReason::FieldCountMismatch {
                expected: needed,
                found: fields.len(),
            }]);
        }

        let mut row = RowReader {
            fields,
            mapping: &self.mapping,
            reasons: Vec::new(),
        };
        use CanonicalField as F;

        let member_id = row.text(F::MemberId);
        match &member_id {
            None => row.reject(RejectReason::Required { field: F::MemberId }),
            Some(id) if self.check_constraints => row.check_len(F::MemberId, id, MEMBER_ID_MAX_LEN),
            Some(_) => {}
        }

        let quarter = match row.raw(F::Quarter).parse::<Quarter>() {
            Ok(q) => Some(q),
            Err(()) => {
                row.reject(RejectReason::Invalid { field: F::Quarter });
                None
            }
        };

        let year = row.parsed::<i32>(F::Year, |s| s.parse().ok());
        match year {
            None if row.text(F::Year).is_none() => row.reject(RejectReason::Required { field: F::Year }),
            Some(y) if self.check_constraints && !(MIN_YEAR..=MAX_YEAR).contains(&y) => {
                row.reject(RejectReason::OutOfRange { field: F::Year })
            }
            _ => {}
        }

        let national_drug_code = row.text(F::NationalDrugCode);
        if let (Some(ndc), true) = (&national_drug_code, self.check_constraints) {
            row.check_len(F::NationalDrugCode, ndc, NATIONAL_DRUG_CODE_MAX_LEN);
        }

        let quantity = row.parsed(F::Quantity, parse_decimal);
        let days_supply = row.parsed::<i64>(F::DaysSupply, |s| s.parse().ok());
        let paid_amount = row.parsed(F::PaidAmount, parse_decimal);
        if self.check_constraints {
            if quantity.is_some_and(|q| q.is_sign_negative() && !q.is_zero()) {
                row.reject(RejectReason::Negative { field: F::Quantity });
            }
            if days_supply.is_some_and(|d| d < 0) {
                row.reject(RejectReason::Negative { field: F::DaysSupply });
            }
            if paid_amount.is_some_and(|p| p.is_sign_negative() && !p.is_zero()) {
                row.reject(RejectReason::Negative { field: F::PaidAmount });
            }
        }

        for (field, value) in [(F::Quantity, quantity), (F::PaidAmount, paid_amount)] {
            let limits = self.decimal_columns.iter().find(|(f, ..)| *f == field);
            if let (Some(value), Some(&(_, precision, scale))) = (value, limits) {
                if !fits_decimal(value, precision, scale) {
                    row.reject(RejectReason::ExceedsPrecision { field, precision, scale });
                }
            }
        }

        let service_date = row.parsed(F::ServiceDate, parse_date);

        let (Some(member_id), Some(quarter), Some(year), true) =
            (member_id, quarter, year, row.reasons.is_empty())
        else {
            return RowOutcome::Rejected(row.reasons);
        };

        RowOutcome::Valid(Record {
            identifier: Uuid::new_v4(),
            member_id,
            prescription_number: row.text(F::PrescriptionNumber),
            national_drug_code,
            service_date,
            provider_id: row.text(F::ProviderId),
            pharmacy_id: row.text(F::PharmacyId),
            drug_name: row.text(F::DrugName),
            drug_strength: row.text(F::DrugStrength),
            quantity,
            days_supply,
            paid_amount,
            alert_code: row.text(F::AlertCode),
            alert_description: row.text(F::AlertDescription),
            period: Period { quarter, year },
            batch_tag: row.text(F::BatchTag).map(BatchTag::new),
            created_at: Utc::now(),
            updated_at: None,
            status: RecordStatus::Validated,
            error_message: None,
            extra_data: self.extra_data(fields),
        })
    }

    /// Unmapped header columns (and trailing columns beyond the header) as a JSON object.
    fn extra_data<S: AsRef<str>>(&self, fields: &[S]) -> Option<serde_json::Value> {
        let mut extra = serde_json::Map::new();
        for (idx, name) in self.mapping.unmapped() {
            if let Some(v) = fields.get(*idx).map(|s| s.as_ref().trim()).filter(|s| !s.is_empty()) {
                extra.insert(name.clone(), serde_json::Value::String(v.to_string()));
            }
        }
        for (idx, value) in fields.iter().enumerate().skip(self.mapping.width()) {
            let v = value.as_ref().trim();
            if !v.is_empty() {
                extra.insert(format!("column_{}", idx + 1), serde_json::Value::String(v.to_string()));
            }
        }
        (!extra.is_empty()).then_some(serde_json::Value::Object(extra))
    }
}

struct RowReader<'a, S> {
    fields: &'a [S],
    mapping: &'a ColumnMapping,
    reasons: Vec<RejectReason>,
}

impl<S: AsRef<str>> RowReader<'_, S> {
    fn raw(&self, field: CanonicalField) -> &str {
        self.mapping
            .index_of(field)
            .and_then(|idx| self.fields.get(idx))
            .map_or("", |s| s.as_ref().trim())
    }

    fn text(&self, field: CanonicalField) -> Option<String> {
        let raw = self.raw(field);
        (!raw.is_empty()).then(|| raw.to_string())
    }

    /// Parse an optional field; a present but unparseable value is recorded as a rejection.
    fn parsed<T>(&mut self, field: CanonicalField, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let raw = self.raw(field);
        if raw.is_empty() {
            return None;
        }
        let parsed = parse(raw);
        if parsed.is_none() {
            self.reject(RejectReason::Invalid { field });
        }
        parsed
    }

    fn check_len(&mut self, field: CanonicalField, value: &str, max: usize) {
        if value.chars().count() > max {
            self.reject(RejectReason::TooLong { field, max });
        }
    }

    fn reject(&mut self, reason: RejectReason) {
        self.reasons.push(reason);
    }
}

/// Parse a plain or currency-formatted decimal: an optional sign and leading `$`, then digits
/// with optional `,` thousands groups, then an optional fraction. `-$1,234.50`, `$-7` and `.5`
/// are accepted; `1,5`, `12,34,5` and `1$` are not.
fn parse_decimal(s: &str) -> Option<Decimal> {
    let (negative, body) = if let Some(rest) = s.strip_prefix("-$").or_else(|| s.strip_prefix("$-")) {
        (true, rest)
    } else if let Some(rest) = s.strip_prefix('-') {
        (true, rest)
    } else {
        (false, s.strip_prefix('$').unwrap_or(s))
    };
    let (int_part, frac_part) = match body.split_once('.') {
        Some((int_part, frac)) => (int_part, Some(frac)),
        None => (body, None),
    };

    let digits = ungroup(int_part)?;
    if let Some(frac) = frac_part {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    } else if digits.is_empty() {
        return None;
    }

    let mut plain = String::with_capacity(body.len() + 2);
    if negative {
        plain.push('-');
    }
    plain.push_str(if digits.is_empty() { "0" } else { &digits });
    if let Some(frac) = frac_part {
        plain.push('.');
        plain.push_str(frac);
    }
    Decimal::from_str(&plain).ok()
}

/// Integer digits with any thousands separators removed. Groups after the first must be exactly
/// three digits and the first one to three.
fn ungroup(int_part: &str) -> Option<String> {
    let all_digits = |g: &str| g.bytes().all(|b| b.is_ascii_digit());
    if !int_part.contains(',') {
        return all_digits(int_part).then(|| int_part.to_string());
    }
    let mut groups = int_part.split(',');
    let first = groups.next()?;
    if !(1..=3).contains(&first.len()) || !all_digits(first) {
        return None;
    }
    let mut digits = first.to_string();
    for group in groups {
        if group.len() != 3 || !all_digits(group) {
            return None;
        }
        digits.push_str(group);
    }
    Some(digits)
}

/// Whether `value` fits a `DECIMAL(precision, scale)` column without rounding.
fn fits_decimal(value: Decimal, precision: u8, scale: u8) -> bool {
    let value = value.normalize();
    if value.scale() > u32::from(scale) {
        return false;
    }
    let int_digits = u32::from(precision.saturating_sub(scale));
    match 10i128
        .checked_pow(int_digits)
        .and_then(|bound| Decimal::try_from_i128_with_scale(bound, 0).ok())
    {
        Some(bound) => value.abs() < bound,
        None => true,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}
