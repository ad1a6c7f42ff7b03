//! End-to-end parser tests over realistic brochure documents.

use product_kb_parser::{parse, spec_fact_text};

const CAMRY_BROCHURE: &str = r#"---
title: Camry 2026 Brochure
product: Camry
make: Toyota
model: Camry
model_year: 2026
locale: en-IN
market: IN
---

# Toyota Camry 2026

The 2026 Camry blends hybrid efficiency with executive comfort. Its
redesigned cabin pairs a panoramic display with ventilated seating.

## Technical Specifications

| Category | Specification | Value | Key Features | Variant Availability |
| --- | --- | --- | --- | --- |
| Engine | Fuel Efficiency | 25.49 km/l | Std | Standard |
| Engine | Displacement | 2487 cc | Hybrid | Standard |
| Comfort | Panoramic Sunroof | Yes | One-touch open | Exclusive to ZX |
| Safety | Airbags | 9 |  | Standard |

## Key Features

- Panoramic sunroof with one-touch open
- 9-speaker JBL audio system

## Unique Selling Points

- Best-in-class fuel efficiency of 25.49 km/l
- Five-star safety rating

## About the brand

Toyota has built hybrids for over two decades. The Camry inherits the
fifth generation hybrid system.
"#;

#[test]
fn five_column_table_emits_row_per_data_row() {
    let parsed = parse(CAMRY_BROCHURE).expect("parse");
    assert_eq!(parsed.spec_values.len(), 4);
    assert_eq!(parsed.row_chunks.len(), 4);
    assert!(parsed.warnings.is_empty());
}

#[test]
fn numeric_unit_split_and_fact_text() {
    let parsed = parse(CAMRY_BROCHURE).expect("parse");
    let fuel = &parsed.spec_values[0];
    assert_eq!(fuel.category, "Engine");
    assert_eq!(fuel.name, "Fuel Efficiency");
    assert_eq!(fuel.value_numeric, Some(25.49));
    assert_eq!(fuel.unit.as_deref(), Some("km/l"));
    assert!(fuel.value_text.is_none());
    assert_eq!(fuel.key_features.as_deref(), Some("Std"));
    assert_eq!(fuel.variant_availability.as_deref(), Some("all variants"));

    let chunk = &parsed.row_chunks[0];
    assert_eq!(
        chunk.text,
        "Engine > Fuel Efficiency: 25.49 km/l; Key features: Std; Availability: all variants"
    );
}

#[test]
fn exclusive_availability_is_normalized() {
    let parsed = parse(CAMRY_BROCHURE).expect("parse");
    let sunroof = &parsed.spec_values[2];
    assert_eq!(sunroof.variant_availability.as_deref(), Some("only ZX"));
    assert!(sunroof.availability_known);
    assert!(parsed.row_chunks[2].text.contains("Availability: only ZX"));
}

#[test]
fn feature_and_usp_sections_are_split_out() {
    let parsed = parse(CAMRY_BROCHURE).expect("parse");
    assert_eq!(parsed.feature_blocks.len(), 2);
    assert!(parsed.feature_blocks[0].body.contains("Panoramic sunroof"));
    assert_eq!(parsed.usps.len(), 2);
    assert!(parsed.usps[0].body.contains("fuel efficiency"));
}

#[test]
fn prose_outside_sections_becomes_paragraph_chunks() {
    let parsed = parse(CAMRY_BROCHURE).expect("parse");
    assert!(!parsed.paragraph_chunks.is_empty());
    let all_text: String = parsed
        .paragraph_chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect();
    assert!(all_text.contains("hybrid"));
    // Feature/USP content must not leak into prose chunks.
    assert!(!all_text.contains("JBL audio"));
}

#[test]
fn front_matter_is_extracted() {
    let parsed = parse(CAMRY_BROCHURE).expect("parse");
    assert_eq!(parsed.meta.product.as_deref(), Some("Camry"));
    assert_eq!(parsed.meta.model_year, Some(2026));
    assert_eq!(parsed.meta.market.as_deref(), Some("IN"));
}

#[test]
fn three_column_table_parses() {
    let md = "\
| Category | Specification | Value |
| --- | --- | --- |
| Engine | Power | 131 kW |
| Engine | Torque | 221 Nm |
";
    let parsed = parse(md).expect("parse");
    assert_eq!(parsed.spec_values.len(), 2);
    assert_eq!(parsed.spec_values[0].value_numeric, Some(131.0));
    assert_eq!(parsed.spec_values[0].unit.as_deref(), Some("kW"));
    assert!(parsed.spec_values[0].key_features.is_none());
    assert!(parsed.spec_values[0].variant_availability.is_none());
}

#[test]
fn four_column_extra_maps_by_shape() {
    let md = "\
| Category | Specification | Value | Extra |
| --- | --- | --- | --- |
| Lighting | Headlamps | LED | Projector units with DRLs |
| Comfort | Ventilated Seats | Yes | Standard |
";
    let parsed = parse(md).expect("parse");
    let lamps = &parsed.spec_values[0];
    assert_eq!(lamps.key_features.as_deref(), Some("Projector units with DRLs"));
    assert!(lamps.variant_availability.is_none());

    let seats = &parsed.spec_values[1];
    assert!(seats.key_features.is_none());
    assert_eq!(seats.variant_availability.as_deref(), Some("all variants"));
}

#[test]
fn two_column_table_is_skipped_with_warning() {
    let md = "\
| Name | Value |
| --- | --- |
| Power | 131 kW |
";
    let parsed = parse(md).expect("parse");
    assert!(parsed.spec_values.is_empty());
    assert_eq!(parsed.warnings.len(), 1);
    assert!(parsed.warnings[0].contains("2 columns"));
}

#[test]
fn wide_table_processes_first_five_columns() {
    let md = "\
| Category | Specification | Value | Key Features | Variant Availability | Notes | More |
| --- | --- | --- | --- | --- | --- | --- |
| Engine | Power | 131 kW | Turbo | Standard | ignore | ignore |
";
    let parsed = parse(md).expect("parse");
    assert_eq!(parsed.spec_values.len(), 1);
    let row = &parsed.spec_values[0];
    assert_eq!(row.key_features.as_deref(), Some("Turbo"));
    assert_eq!(row.variant_availability.as_deref(), Some("all variants"));
    assert!(parsed.warnings.iter().any(|w| w.contains("truncated")));
}

#[test]
fn empty_cells_get_defaults_and_empty_value_skips() {
    let md = "\
| Category | Specification | Value |
| --- | --- | --- |
|  | Power | 131 kW |
| Engine |  | 221 Nm |
| Engine | Torque |  |
";
    let parsed = parse(md).expect("parse");
    assert_eq!(parsed.spec_values.len(), 2);
    assert_eq!(parsed.spec_values[0].category, "Uncategorized");
    assert_eq!(parsed.spec_values[1].name, "General");
    assert_eq!(parsed.warnings.len(), 1);
    assert!(parsed.warnings[0].contains("empty value"));
}

#[test]
fn unknown_availability_symbol_marks_incomplete() {
    let md = "\
| Category | Specification | Value | Key Features | Variant Availability |
| --- | --- | --- | --- | --- |
| Comfort | Heated Seats | Yes |  | ◑ |
";
    let parsed = parse(md).expect("parse");
    let row = &parsed.spec_values[0];
    assert_eq!(row.variant_availability.as_deref(), Some("◑"));
    assert!(!row.availability_known);
    assert!(parsed.row_chunks[0].incomplete);
}

#[test]
fn split_tables_with_matching_headers_merge_rows() {
    let md = "\
| Category | Specification | Value |
| --- | --- | --- |
| Engine | Power | 131 kW |

| Category | Specification | Value |
| --- | --- | --- |
| Engine | Torque | 221 Nm |
";
    let parsed = parse(md).expect("parse");
    assert_eq!(parsed.spec_values.len(), 2);
    assert_eq!(parsed.spec_values[0].row_index, 0);
    assert_eq!(parsed.spec_values[1].row_index, 1);
}

#[test]
fn parse_is_deterministic() {
    let a = parse(CAMRY_BROCHURE).expect("parse");
    let b = parse(CAMRY_BROCHURE).expect("parse");
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn empty_document_is_an_error() {
    assert!(parse("   \n").is_err());
}

#[test]
fn row_chunk_hashes_are_stable_across_formatting() {
    // Hashing normalizes case and spacing, so cosmetic edits dedupe.
    let text_a = spec_fact_text("Engine", "Power", "131", Some("kW"), None, None, None);
    let text_b = "engine > power:  131 KW";
    assert_eq!(
        product_kb_core::content_hash(&text_a),
        product_kb_core::content_hash(text_b)
    );
}
