//! CSV report rendering.

use std::collections::BTreeSet;

use super::ReportFormatter;
use crate::factors::{FactorValue, NOT_FOUND};
use crate::task::Item;

const NAME_HEADER_KEY: &str = "product_name";
const EMPTY_VALUE: &str = "Not Found";
const MISSING_NAME: &str = "N/A";

/// Renders one row per item under a `Name` column plus one column per
/// distinct factor, in sorted order.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvFormatter;

impl ReportFormatter for CsvFormatter {
    fn render(&self, items: &[Item], factors: &[String]) -> anyhow::Result<String> {
        let columns: BTreeSet<&str> = factors.iter().map(String::as_str).collect();

        let mut out = String::new();
        let header = std::iter::once(format_header(NAME_HEADER_KEY))
            .chain(columns.iter().map(|f| format_header(f)));
        write_row(&mut out, header);

        for item in items {
            let name = item.name.clone().unwrap_or_else(|| MISSING_NAME.to_string());
            let cells = columns.iter().map(|factor| match item.attribute(factor) {
                Some(attribute) => format_value(&attribute.value),
                None => NOT_FOUND.to_string(),
            });
            write_row(&mut out, std::iter::once(name).chain(cells));
        }

        Ok(out)
    }
}

/// Display header for a factor column.
pub fn format_header(header: &str) -> String {
    if header.eq_ignore_ascii_case(NAME_HEADER_KEY) {
        return "Name".to_string();
    }
    title_case(&header.replace('_', " "))
}

/// Render a value for a single CSV cell.
///
/// Lists of records become one `**tier**: Key: value, ...` line per record;
/// other lists are comma-joined. An empty list renders as `Not Found`.
pub fn format_value(value: &FactorValue) -> String {
    match value {
        FactorValue::List(entries) if entries.is_empty() => EMPTY_VALUE.to_string(),
        FactorValue::List(entries) if entries.iter().all(|e| matches!(e, FactorValue::Map(_))) => {
            let lines: Vec<String> = entries
                .iter()
                .filter_map(|entry| match entry {
                    FactorValue::Map(fields) => format_record(fields),
                    _ => None,
                })
                .collect();
            if lines.is_empty() {
                EMPTY_VALUE.to_string()
            } else {
                lines.join("\n")
            }
        }
        FactorValue::List(entries) => entries
            .iter()
            .map(FactorValue::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn format_record(fields: &std::collections::BTreeMap<String, FactorValue>) -> Option<String> {
    let title = fields
        .get("tier_name")
        .or_else(|| fields.get("name"))
        .filter(|v| is_present(v));

    let details = fields
        .iter()
        .filter(|(key, _)| key.as_str() != "tier_name" && key.as_str() != "name")
        .filter(|(_, v)| is_present(v))
        .map(|(key, v)| format!("{}: {}", format_header(key), v))
        .collect::<Vec<_>>()
        .join(", ");

    match title {
        Some(title) if details.is_empty() => Some(format!("**{}**: No additional details", title)),
        Some(title) => Some(format!("**{}**: {}", title, details)),
        None if details.is_empty() => None,
        None => Some(details),
    }
}

fn is_present(value: &FactorValue) -> bool {
    match value {
        FactorValue::Bool(b) => *b,
        FactorValue::Number(n) => *n != 0.0,
        FactorValue::Text(s) => !s.is_empty(),
        FactorValue::List(l) => !l.is_empty(),
        FactorValue::Map(m) => !m.is_empty(),
    }
}

/// Uppercase the first letter of every alphabetic run, lowercase the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn write_row<I>(out: &mut String, cells: I)
where
    I: IntoIterator<Item = String>,
{
    let row: Vec<String> = cells.into_iter().map(|cell| quote(&cell)).collect();
    out.push_str(&row.join(","));
    out.push_str("\r\n");
}

fn quote(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
