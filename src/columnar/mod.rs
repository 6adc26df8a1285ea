//! Row-major to column-major transposition.
//!
//! A [`Batch`] is a list of records; a bulk statement wants one array per target column, all
//! positionally aligned by row index. [`ColumnBatch::transpose`] produces exactly that, typed per
//! the column's [`SqlType`]. Absent optional values are `None` at their row index, never a
//! sentinel.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::types::{Batch, BatchTag, Cell, Record, SqlType, TargetTable};

/// One target column's values for every row in a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnArray {
    Text(Vec<Option<String>>),
    Integer(Vec<Option<i64>>),
    Decimal(Vec<Option<Decimal>>),
    Date(Vec<Option<NaiveDate>>),
    Timestamp(Vec<Option<DateTime<Utc>>>),
}

impl ColumnArray {
    fn with_capacity(sql_type: SqlType, n: usize) -> Self {
        match sql_type {
            SqlType::Text { .. } => Self::Text(Vec::with_capacity(n)),
            SqlType::Integer => Self::Integer(Vec::with_capacity(n)),
            SqlType::Decimal { .. } => Self::Decimal(Vec::with_capacity(n)),
            SqlType::Date => Self::Date(Vec::with_capacity(n)),
            SqlType::Timestamp => Self::Timestamp(Vec::with_capacity(n)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Text(v) => v.len(),
            Self::Integer(v) => v.len(),
            Self::Decimal(v) => v.len(),
            Self::Date(v) => v.len(),
            Self::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_null(&self, row: usize) -> bool {
        match self {
            Self::Text(v) => v[row].is_none(),
            Self::Integer(v) => v[row].is_none(),
            Self::Decimal(v) => v[row].is_none(),
            Self::Date(v) => v[row].is_none(),
            Self::Timestamp(v) => v[row].is_none(),
        }
    }

    /// The value at `row` rendered as text (`None` for null).
    pub fn text_at(&self, row: usize) -> Option<String> {
        match self {
            Self::Text(v) => v[row].clone(),
            Self::Integer(v) => v[row].map(|x| x.to_string()),
            Self::Decimal(v) => v[row].map(|x| x.to_string()),
            Self::Date(v) => v[row].map(|d| d.format("%Y-%m-%d").to_string()),
            Self::Timestamp(v) => v[row].map(|t| t.to_rfc3339()),
        }
    }

    fn push(&mut self, cell: Cell<'_>) {
        match self {
            Self::Text(v) => v.push(cell_as_text(cell)),
            Self::Integer(v) => v.push(match cell {
                Cell::Integer(x) => x,
                other => cell_as_text(other).and_then(|s| s.parse().ok()),
            }),
            Self::Decimal(v) => v.push(match cell {
                Cell::Decimal(x) => x,
                Cell::Integer(x) => x.map(Decimal::from),
                other => cell_as_text(other).and_then(|s| s.parse().ok()),
            }),
            Self::Date(v) => v.push(match cell {
                Cell::Date(x) => x,
                Cell::Timestamp(x) => x.map(|t| t.date_naive()),
                _ => None,
            }),
            Self::Timestamp(v) => v.push(match cell {
                Cell::Timestamp(x) => x,
                _ => None,
            }),
        }
    }
}

fn cell_as_text(cell: Cell<'_>) -> Option<String> {
    match cell {
        Cell::Uuid(u) => Some(u.hyphenated().to_string()),
        Cell::Text(s) => s.map(str::to_string),
        Cell::Integer(x) => x.map(|x| x.to_string()),
        Cell::Decimal(x) => x.map(|x| x.to_string()),
        Cell::Date(x) => x.map(|d| d.format("%Y-%m-%d").to_string()),
        Cell::Timestamp(x) => x.map(|t| t.to_rfc3339()),
        Cell::Json(x) => x.map(|j| j.to_string()),
    }
}

/// A batch in column-major form, aligned with a [`TargetTable`]'s column list.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBatch {
    pub index: usize,
    pub tag: BatchTag,
    pub row_count: usize,
    pub columns: Vec<ColumnArray>,
}

impl ColumnBatch {
    /// Transpose `batch` into one array per column of `table`.
    pub fn transpose(batch: &Batch, table: &TargetTable) -> Self {
        Self::from_records(batch.index, batch.tag.clone(), &batch.records, table)
    }

    pub fn from_records(index: usize, tag: BatchTag, records: &[Record], table: &TargetTable) -> Self {
        let mut columns: Vec<ColumnArray> = table
            .columns
            .iter()
            .map(|c| ColumnArray::with_capacity(c.sql_type, records.len()))
            .collect();

        for record in records {
            for (array, spec) in columns.iter_mut().zip(&table.columns) {
                array.push(record.cell(spec.source));
            }
        }

        Self {
            index,
            tag,
            row_count: records.len(),
            columns,
        }
    }

    /// Rows `start..end` of every column, as a new batch. Used by stores with statement limits.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| match c {
                ColumnArray::Text(v) => ColumnArray::Text(v[start..end].to_vec()),
                ColumnArray::Integer(v) => ColumnArray::Integer(v[start..end].to_vec()),
                ColumnArray::Decimal(v) => ColumnArray::Decimal(v[start..end].to_vec()),
                ColumnArray::Date(v) => ColumnArray::Date(v[start..end].to_vec()),
                ColumnArray::Timestamp(v) => ColumnArray::Timestamp(v[start..end].to_vec()),
            })
            .collect();
        Self {
            index: self.index,
            tag: self.tag.clone(),
            row_count: end - start,
            columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::types::{CanonicalField, ColumnSpec, Period, Quarter, RecordColumn};

    fn record(member: &str, paid: Option<&str>) -> Record {
        let mut r = Record::new(
            member,
            Period {
                quarter: Quarter::Q3,
                year: 2025,
            },
        );
        r.paid_amount = paid.map(|p| Decimal::from_str(p).unwrap());
        r.batch_tag = Some(BatchTag::new("RUN"));
        r
    }

    #[test]
    fn transposes_rows_into_aligned_columns() {
        let table = TargetTable::new(
            "t",
            1,
            vec![
                ColumnSpec::new("member_id", RecordColumn::Field(CanonicalField::MemberId), SqlType::Text {
                    max_len: None,
                }),
                ColumnSpec::new(
                    "paid_amount",
                    RecordColumn::Field(CanonicalField::PaidAmount),
                    SqlType::Decimal { precision: 12, scale: 2 },
                ),
                ColumnSpec::new("year", RecordColumn::Field(CanonicalField::Year), SqlType::Integer),
            ],
        );
        let batch = Batch {
            index: 4,
            tag: BatchTag::new("RUN"),
            records: vec![record("A", Some("10.50")), record("B", None), record("C", Some("0.10"))],
        };

        let cols = ColumnBatch::transpose(&batch, &table);
        assert_eq!(cols.index, 4);
        assert_eq!(cols.row_count, 3);
        assert_eq!(
            cols.columns[0],
            ColumnArray::Text(vec![Some("A".into()), Some("B".into()), Some("C".into())])
        );
        assert_eq!(
            cols.columns[1],
            ColumnArray::Decimal(vec![
                Some(Decimal::from_str("10.50").unwrap()),
                None,
                Some(Decimal::from_str("0.10").unwrap()),
            ])
        );
        assert!(cols.columns[1].is_null(1));
        assert_eq!(cols.columns[2], ColumnArray::Integer(vec![Some(2025); 3]));
    }

    #[test]
    fn decimal_precision_survives_as_text() {
        let table = TargetTable::claim_alerts();
        let batch = Batch {
            index: 0,
            tag: BatchTag::new("RUN"),
            records: vec![record("A", Some("1234.50"))],
        };
        let cols = ColumnBatch::transpose(&batch, &table);
        let paid = table.index_of("paid_amount").unwrap();
        assert_eq!(cols.columns[paid].text_at(0).as_deref(), Some("1234.50"));
    }

    #[test]
    fn every_claim_alert_column_has_one_value_per_row() {
        let table = TargetTable::claim_alerts();
        let batch = Batch {
            index: 0,
            tag: BatchTag::new("RUN"),
            records: (0..5).map(|i| record(&format!("M{i}"), None)).collect(),
        };
        let cols = ColumnBatch::transpose(&batch, &table);
        assert_eq!(cols.columns.len(), table.columns.len());
        assert!(cols.columns.iter().all(|c| c.len() == 5));

        let id = table.index_of("record_id").unwrap();
        assert_eq!(cols.columns[id].text_at(0).unwrap().len(), 36);
        let status = table.index_of("status").unwrap();
        assert_eq!(cols.columns[status].text_at(0).as_deref(), Some("PENDING"));
        let extra = table.index_of("extra_data").unwrap();
        assert!(cols.columns[extra].is_null(0));
    }

    #[test]
    fn slice_keeps_alignment() {
        let table = TargetTable::claim_alerts();
        let batch = Batch {
            index: 2,
            tag: BatchTag::new("RUN"),
            records: (0..10).map(|i| record(&format!("M{i}"), None)).collect(),
        };
        let cols = ColumnBatch::transpose(&batch, &table);
        let part = cols.slice(3, 7);
        assert_eq!(part.row_count, 4);
        let member = table.index_of("member_id").unwrap();
        assert_eq!(part.columns[member].text_at(0).as_deref(), Some("M3"));
        assert!(part.columns.iter().all(|c| c.len() == 4));
    }
}
