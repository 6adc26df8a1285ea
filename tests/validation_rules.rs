use claims_loader::schema::SchemaMapper;
use claims_loader::types::{CanonicalField, Quarter};
use claims_loader::validation::{RecordValidator, RejectReason, RowOutcome};

const HEADER: [&str; 7] = ["Member ID", "NDC", "Qty", "Days Supply", "Paid Amount", "Qtr", "Yr"];

fn validator() -> RecordValidator {
    let mapping = SchemaMapper::default().resolve(&HEADER).unwrap();
    RecordValidator::new(mapping)
}

/// A row that passes every rule; tests override one field at a time.
fn valid_row() -> [String; 7] {
    ["M1", "00093505601", "30", "30", "12.50", "Q3", "2024"].map(String::from)
}

fn with(col: usize, value: &str) -> [String; 7] {
    let mut row = valid_row();
    row[col] = value.to_string();
    row
}

fn reasons(row: &[String]) -> Vec<String> {
    validator()
        .validate(row)
        .reasons()
        .iter()
        .map(ToString::to_string)
        .collect()
}

#[test]
fn baseline_row_is_valid() {
    match validator().validate(&valid_row()) {
        RowOutcome::Valid(record) => {
            assert_eq!(record.member_id, "M1");
            assert_eq!(record.period.quarter, Quarter::Q3);
            assert_eq!(record.period.year, 2024);
            assert_eq!(record.days_supply, Some(30));
        }
        RowOutcome::Rejected(r) => panic!("unexpected rejection: {r:?}"),
    }
}

#[test]
fn empty_member_id_is_the_only_reason() {
    for empty in ["", "   "] {
        assert_eq!(reasons(&with(0, empty)), vec!["memberId required"]);
    }
}

#[test]
fn member_id_longer_than_fifty_characters_is_rejected() {
    assert!(validator().validate(&with(0, &"M".repeat(50))).is_valid());
    assert_eq!(
        reasons(&with(0, &"M".repeat(51))),
        vec!["memberId exceeds 50 characters"]
    );
}

#[test]
fn quarter_accepts_exactly_q1_to_q4() {
    for ok in ["Q1", "Q2", "Q3", "Q4"] {
        assert!(validator().validate(&with(5, ok)).is_valid(), "{ok} should be accepted");
    }
    for bad in ["Q5", "QTR1", ""] {
        assert_eq!(reasons(&with(5, bad)), vec!["invalid quarter"], "{bad:?}");
    }
}

#[test]
fn year_boundaries() {
    assert_eq!(reasons(&with(6, "2019")), vec!["year out of range"]);
    assert!(validator().validate(&with(6, "2020")).is_valid());
    assert!(validator().validate(&with(6, "2099")).is_valid());
    assert_eq!(reasons(&with(6, "2100")), vec!["year out of range"]);
    assert_eq!(reasons(&with(6, "twenty")), vec!["invalid year"]);
}

#[test]
fn negative_amounts_are_rejected_and_zero_is_not() {
    assert_eq!(reasons(&with(2, "-1")), vec!["quantity must be non-negative"]);
    assert_eq!(reasons(&with(3, "-30")), vec!["daysSupply must be non-negative"]);
    assert_eq!(reasons(&with(4, "-0.01")), vec!["paidAmount must be non-negative"]);
    assert!(validator().validate(&with(4, "0.00")).is_valid());
}

#[test]
fn national_drug_code_limit() {
    assert_eq!(
        reasons(&with(1, "000935056011")),
        vec!["nationalDrugCode exceeds 11 characters"]
    );
}

#[test]
fn unparsable_numbers_are_rejections_not_panics() {
    assert_eq!(reasons(&with(2, "thirty")), vec!["invalid quantity"]);
    assert_eq!(reasons(&with(3, "30.5")), vec!["invalid daysSupply"]);
}

#[test]
fn every_violation_is_reported_together() {
    let mut row = valid_row();
    row[0] = String::new();
    row[5] = "Q5".into();
    row[6] = "1999".into();
    let outcome = validator().validate(&row);
    assert_eq!(
        outcome.reasons(),
        &[
            RejectReason::Required {
                field: CanonicalField::MemberId
            },
            RejectReason::Invalid {
                field: CanonicalField::Quarter
            },
            RejectReason::OutOfRange {
                field: CanonicalField::Year
            },
        ]
    );
}

#[test]
fn short_row_is_a_field_count_mismatch() {
    let outcome = validator().validate(&["M1", "00093505601", "30"]);
    assert_eq!(outcome.reasons().len(), 1);
    assert!(outcome.reasons()[0].to_string().starts_with("field count mismatch"));
}

#[test]
fn disabling_constraints_keeps_type_checks() {
    let lenient = validator().with_constraints(false);
    assert!(lenient.validate(&with(6, "1999")).is_valid());
    assert!(lenient.validate(&with(2, "-5")).is_valid());
    assert!(!lenient.validate(&with(5, "Q5")).is_valid());
    assert!(!lenient.validate(&with(0, "")).is_valid());
}
