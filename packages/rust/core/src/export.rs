//! Flatten a form into report rows: (section, field, value, source URL, notes).

use serde::Serialize;
use serde_json::{Map, Value};

use crate::sections::{CodeCheckForm, SectionSlot};

/// Section label of the leading address row.
pub const ADDRESS_ROW_LABEL: &str = "FULL ADDRESS";

const NOT_AVAILABLE: &str = "N/A";

/// One row of an exported report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub section: String,
    pub field: String,
    pub value: String,
    pub source_url: String,
    pub notes: String,
}

/// Flatten every field of every section, in registry order.
///
/// The first row carries the full address: `address` when given, else the
/// researched site address, else `Unknown Address`. Nested sub-documents
/// become `"Parent - Child"` field labels.
pub fn flatten_form(form: &CodeCheckForm, address: Option<&str>) -> Vec<ExportRow> {
    let full_address = address
        .map(str::to_string)
        .or_else(|| form.location_information.site_address.value.clone())
        .unwrap_or_else(|| "Unknown Address".to_string());

    let mut rows = vec![ExportRow {
        section: ADDRESS_ROW_LABEL.to_string(),
        field: full_address,
        value: String::new(),
        source_url: String::new(),
        notes: String::new(),
    }];

    for slot in SectionSlot::ALL {
        let Ok(Value::Object(fields)) = form.section(slot).to_value() else {
            continue;
        };
        flatten_fields(slot.export_label(), None, &fields, &mut rows);
    }
    rows
}

fn flatten_fields(
    section: &str,
    parent: Option<&str>,
    fields: &Map<String, Value>,
    rows: &mut Vec<ExportRow>,
) {
    for (key, value) in fields {
        let label = match parent {
            Some(parent) => format!("{parent} - {}", title_case(key)),
            None => title_case(key),
        };

        match value {
            Value::Object(inner) if is_researched_field(inner) => rows.push(ExportRow {
                section: section.to_string(),
                field: label,
                value: render_value(inner.get("value").unwrap_or(&Value::Null)),
                source_url: text_or_empty(inner.get("source_url")),
                notes: text_or_empty(inner.get("notes")),
            }),
            // Sub-documents flatten exactly one level
            Value::Object(inner) if parent.is_none() => {
                flatten_fields(section, Some(&label), inner, rows);
            }
            other => rows.push(ExportRow {
                section: section.to_string(),
                field: label,
                value: render_value(other),
                source_url: String::new(),
                notes: String::new(),
            }),
        }
    }
}

fn is_researched_field(map: &Map<String, Value>) -> bool {
    map.contains_key("value")
        && map
            .keys()
            .all(|k| matches!(k.as_str(), "value" | "source_url" | "source_quote" | "notes"))
}

/// `Yes`/`No` for booleans, `N/A` for absent, lists comma-separated.
fn render_value(value: &Value) -> String {
    match value {
        Value::Null => NOT_AVAILABLE.to_string(),
        Value::Bool(true) => "Yes".to_string(),
        Value::Bool(false) => "No".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) if items.is_empty() => NOT_AVAILABLE.to_string(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

fn text_or_empty(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}

/// `sf_allowed_front` → `Sf Allowed Front`.
fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Tab-separated rendering with a header line.
pub fn to_tsv(rows: &[ExportRow]) -> String {
    let clean = |s: &str| s.replace(['\t', '\n', '\r'], " ");
    let mut out = String::from("Section\tField\tValue\tSource URL\tNotes\n");
    for row in rows {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\n",
            clean(&row.section),
            clean(&row.field),
            clean(&row.value),
            clean(&row.source_url),
            clean(&row.notes)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::ResearchedField;

    fn row<'a>(rows: &'a [ExportRow], section: &str, field: &str) -> &'a ExportRow {
        rows.iter()
            .find(|r| r.section == section && r.field == field)
            .unwrap_or_else(|| panic!("no row {section} / {field}"))
    }

    #[test]
    fn title_case_labels() {
        assert_eq!(title_case("sf_allowed_front"), "Sf Allowed Front");
        assert_eq!(title_case("zip"), "Zip");
        assert_eq!(
            title_case("documentation_required_for_emc"),
            "Documentation Required For Emc"
        );
    }

    #[test]
    fn leading_address_row() {
        let form = CodeCheckForm::default();
        let rows = flatten_form(&form, Some("123 Main St, Miami, FL"));
        assert_eq!(rows[0].section, "FULL ADDRESS");
        assert_eq!(rows[0].field, "123 Main St, Miami, FL");

        let rows = flatten_form(&form, None);
        assert_eq!(rows[0].field, "Unknown Address");
    }

    #[test]
    fn values_render_for_reports() {
        let mut form = CodeCheckForm::default();
        form.wall_signs.wall_signs_allowed =
            ResearchedField::with_value(true).sourced("http://a.example");
        form.wall_signs.can_project_above_roofline = ResearchedField::with_value(false);
        form.wall_signs.maximum_sf_allowed = ResearchedField::with_value(150.5);
        form.wall_signs.number_of_signs_allowed_per_elevation.side =
            ResearchedField::with_value(2);
        form.permit_requirements.documents_required =
            ResearchedField::with_value(vec!["Site plan".into(), "Elevations".into()]);
        form.awnings.notes_awnings.notes = Some("Only on ground floor".into());

        let rows = flatten_form(&form, None);

        let allowed = row(&rows, "Wall Signs", "Wall Signs Allowed");
        assert_eq!(allowed.value, "Yes");
        assert_eq!(allowed.source_url, "http://a.example");
        assert_eq!(row(&rows, "Wall Signs", "Can Project Above Roofline").value, "No");
        assert_eq!(row(&rows, "Wall Signs", "Maximum Sf Allowed").value, "150.5");
        assert_eq!(row(&rows, "Wall Signs", "Color Restrictions").value, "N/A");
        assert_eq!(
            row(&rows, "Wall Signs", "Number Of Signs Allowed Per Elevation - Side").value,
            "2"
        );
        assert_eq!(
            row(&rows, "Permit Requirements", "Documents Required").value,
            "Site plan, Elevations"
        );
        assert_eq!(
            row(&rows, "Awnings", "Notes Awnings").notes,
            "Only on ground floor"
        );
        assert_eq!(
            row(&rows, "Location Info", "Municipal Contact - Email").value,
            "N/A"
        );
    }

    #[test]
    fn rows_follow_registry_order() {
        let rows = flatten_form(&CodeCheckForm::default(), None);
        let mut sections: Vec<&str> = Vec::new();
        for r in &rows[1..] {
            if sections.last() != Some(&r.section.as_str()) {
                sections.push(&r.section);
            }
        }
        let expected: Vec<_> = SectionSlot::ALL.iter().map(|s| s.export_label()).collect();
        assert_eq!(sections, expected);
    }

    #[test]
    fn tsv_has_header_and_escapes_tabs() {
        let rows = vec![ExportRow {
            section: "Awnings".into(),
            field: "Notes Awnings".into(),
            value: "a\tb".into(),
            source_url: String::new(),
            notes: "line\nbreak".into(),
        }];
        let tsv = to_tsv(&rows);
        let lines: Vec<_> = tsv.lines().collect();
        assert_eq!(lines[0], "Section\tField\tValue\tSource URL\tNotes");
        assert_eq!(lines[1], "Awnings\tNotes Awnings\ta b\t\tline break");
    }
}
