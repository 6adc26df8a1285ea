//! Header resolution.
//!
//! A source header is resolved exactly once per run into a [`ColumnMapping`]: canonical field to
//! input column index. Matching goes through a static [`AliasTable`] (case-insensitive, surrounding
//! whitespace ignored). Fields the header does not mention stay unmapped; whether that matters is
//! decided per row by [`crate::validation::RecordValidator`].

use std::collections::{BTreeMap, HashMap};

use crate::error::{LoadError, LoadResult};
use crate::types::CanonicalField;

/// Accepted header spellings per canonical field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTable {
    entries: BTreeMap<CanonicalField, Vec<String>>,
}

impl AliasTable {
    /// An empty table. Every canonical field still matches its own canonical name.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add an accepted spelling for `field`.
    pub fn with_alias(mut self, field: CanonicalField, alias: impl Into<String>) -> Self {
        self.entries.entry(field).or_default().push(alias.into());
        self
    }

    /// Accepted spellings for `field`, in declaration order.
    pub fn aliases(&self, field: CanonicalField) -> &[String] {
        self.entries.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The alias table used by claim extracts from the supported pharmacy benefit managers.
    pub fn claim_extracts() -> Self {
        use CanonicalField as F;

        let table: &[(CanonicalField, &[&str])] = &[
            (
                F::MemberId,
                &["member_id", "Member ID", "MemberID", "Member_Id", "Member Number", "MBR_ID"],
            ),
            (
                F::PrescriptionNumber,
                &["prescription_number", "Prescription Number", "Rx Number", "RxNumber", "Rx_Nbr", "Rx #"],
            ),
            (
                F::NationalDrugCode,
                &["national_drug_code", "National Drug Code", "NDC", "NDC Code", "NDC_Code", "NDC11"],
            ),
            (
                F::ServiceDate,
                &["service_date", "Service Date", "Date of Service", "DOS", "Fill Date"],
            ),
            (
                F::ProviderId,
                &["provider_id", "Provider ID", "ProviderID", "Prescriber ID", "Prescriber NPI"],
            ),
            (
                F::PharmacyId,
                &["pharmacy_id", "Pharmacy ID", "PharmacyID", "Pharmacy NPI", "NCPDP"],
            ),
            (F::DrugName, &["drug_name", "Drug Name", "Drug", "Product Name"]),
            (F::DrugStrength, &["drug_strength", "Drug Strength", "Strength"]),
            (
                F::Quantity,
                &["Qty", "Quantity Dispensed", "Qty Dispensed", "Metric Quantity"],
            ),
            (F::DaysSupply, &["days_supply", "Days Supply", "Day Supply", "DaysSupply"]),
            (
                F::PaidAmount,
                &["paid_amount", "Paid Amount", "Amount Paid", "Plan Paid", "Paid"],
            ),
            (F::AlertCode, &["alert_code", "Alert Code", "Alert_Cd", "Alert"]),
            (
                F::AlertDescription,
                &["alert_description", "Alert Description", "Alert Desc", "Description"],
            ),
            (F::Quarter, &["Qtr", "Quarter"]),
            (F::Year, &["Yr", "Year"]),
            (F::BatchTag, &["batch_tag", "Batch Tag", "Batch ID", "Batch"]),
        ];

        let entries = table
            .iter()
            .map(|(field, aliases)| (*field, aliases.iter().map(|a| (*a).to_string()).collect()))
            .collect();
        Self { entries }
    }
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::claim_extracts()
    }
}

/// Canonical field positions resolved from one source header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    positions: BTreeMap<CanonicalField, usize>,
    /// Header columns that matched no canonical field (index, original header text).
    unmapped: Vec<(usize, String)>,
    /// Number of columns in the header.
    width: usize,
}

impl ColumnMapping {
    /// Mapping for header-less sources: columns follow [`CanonicalField::ALL`] order.
    pub fn positional() -> Self {
        Self {
            positions: CanonicalField::ALL
                .iter()
                .enumerate()
                .map(|(idx, field)| (*field, idx))
                .collect(),
            unmapped: Vec::new(),
            width: CanonicalField::ALL.len(),
        }
    }

    /// Input column index of `field`, if the header mentions it.
    pub fn index_of(&self, field: CanonicalField) -> Option<usize> {
        self.positions.get(&field).copied()
    }

    pub fn mapped_fields(&self) -> impl Iterator<Item = (CanonicalField, usize)> + '_ {
        self.positions.iter().map(|(f, i)| (*f, *i))
    }

    pub fn mapped_count(&self) -> usize {
        self.positions.len()
    }

    pub fn unmapped(&self) -> &[(usize, String)] {
        &self.unmapped
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// The smallest field count a row needs to reach every mapped column.
    pub fn min_row_width(&self) -> usize {
        self.positions.values().max().map_or(0, |&max| max + 1)
    }
}

/// Resolves header rows against an [`AliasTable`].
///
/// The lookup index is built once at construction and never re-evaluated per row.
#[derive(Debug, Clone)]
pub struct SchemaMapper {
    lookup: HashMap<String, CanonicalField>,
}

impl SchemaMapper {
    pub fn new(aliases: &AliasTable) -> Self {
        let mut lookup = HashMap::new();
        for field in CanonicalField::ALL {
            lookup.entry(normalize(field.name())).or_insert(field);
            for alias in aliases.aliases(field) {
                lookup.entry(normalize(alias)).or_insert(field);
            }
        }
        Self { lookup }
    }

    /// The canonical field a single header spelling resolves to.
    pub fn canonical_for(&self, header: &str) -> Option<CanonicalField> {
        self.lookup.get(&normalize(header)).copied()
    }

    /// Resolve a header row.
    ///
    /// Rules:
    ///
    /// - A header with no columns (or only empty names) is a structural error.
    /// - A header in which no column resolves to a canonical field is a structural error.
    /// - When two columns resolve to the same field, the first wins; later ones are unmapped.
    pub fn resolve<S: AsRef<str>>(&self, headers: &[S]) -> LoadResult<ColumnMapping> {
        if headers.iter().all(|h| clean(h.as_ref()).is_empty()) {
            return Err(LoadError::structural("header row is empty"));
        }

        let mut positions = BTreeMap::new();
        let mut unmapped = Vec::new();
        for (idx, header) in headers.iter().enumerate() {
            let header = header.as_ref();
            match self.canonical_for(header) {
                Some(field) if !positions.contains_key(&field) => {
                    positions.insert(field, idx);
                }
                _ => unmapped.push((idx, clean(header).to_string())),
            }
        }

        if positions.is_empty() {
            return Err(LoadError::structural(format!(
                "no header column matches the target schema. headers={:?}",
                headers.iter().map(|h| h.as_ref()).collect::<Vec<_>>()
            )));
        }

        Ok(ColumnMapping {
            positions,
            unmapped,
            width: headers.len(),
        })
    }
}

impl Default for SchemaMapper {
    fn default() -> Self {
        Self::new(&AliasTable::default())
    }
}

fn clean(s: &str) -> &str {
    s.trim_start_matches('\u{feff}').trim()
}

fn normalize(s: &str) -> String {
    clean(s).to_lowercase()
}
