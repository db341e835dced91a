//! Quotation document rendering
//!
//! Rendering is a pure function of a `VALID` item's fields; nothing is
//! written to disk.

use chrono::{DateTime, Utc};

use crate::item::{ExtractedFields, Item};
use crate::Result;

/// A rendered document ready for download
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Renders the quotation document for a classified item
pub trait DocumentRenderer: Send + Sync {
    fn render(
        &self,
        item: &Item,
        fields: &ExtractedFields,
        generated_at: DateTime<Utc>,
    ) -> Result<RenderedDocument>;
}

/// Quotation sheet as CSV
#[derive(Debug, Clone, Default)]
pub struct CsvQuotationRenderer;

const HEADER: [&str; 7] = [
    "No",
    "Brand and model",
    "Description",
    "Quantity",
    "Unit",
    "Unit price",
    "Total Price",
];

impl DocumentRenderer for CsvQuotationRenderer {
    fn render(
        &self,
        item: &Item,
        fields: &ExtractedFields,
        generated_at: DateTime<Utc>,
    ) -> Result<RenderedDocument> {
        let mut out = String::new();

        push_row(&mut out, &["Quotation", &item.raw_content.subject]);
        push_row(&mut out, &["Client", &fields.client_name]);
        push_row(&mut out, &["Email", &fields.email]);
        push_row(&mut out, &["Mobile", &fields.mobile]);
        push_row(&mut out, &["Deadline", fields.deadline.as_deref().unwrap_or("")]);
        out.push_str("\r\n");

        push_row(&mut out, &HEADER);
        for (index, line) in fields.requirements.iter().enumerate() {
            let no = (index + 1).to_string();
            push_row(
                &mut out,
                &[
                    &no,
                    &line.brand_and_model,
                    &line.description,
                    &line.quantity,
                    &line.unit,
                    &line.unit_price,
                    &line.total_price,
                ],
            );
        }
        out.push_str("\r\n");

        let stamp = generated_at.format("%Y-%m-%d %H:%M:%S").to_string();
        push_row(&mut out, &["Generated on", &stamp]);

        Ok(RenderedDocument {
            filename: document_filename(&item.raw_content.subject, generated_at, "csv"),
            content_type: "text/csv; charset=utf-8",
            bytes: out.into_bytes(),
        })
    }
}

fn push_row(out: &mut String, cells: &[&str]) {
    let row = cells.iter().map(|c| escape_cell(c)).collect::<Vec<_>>().join(",");
    out.push_str(&row);
    out.push_str("\r\n");
}

/// RFC 4180 quoting
fn escape_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// `Quotation_<subject>_<YYYYmmdd_HHMMSS>.<ext>`, subject limited to 30 chars
/// and stripped of anything but alphanumerics, space, `-` and `_`.
pub fn document_filename(subject: &str, generated_at: DateTime<Utc>, extension: &str) -> String {
    let subject = if subject.trim().is_empty() { "quotation" } else { subject };
    let clean: String = subject
        .chars()
        .take(30)
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    format!(
        "Quotation_{}_{}.{}",
        clean.trim_end(),
        generated_at.format("%Y%m%d_%H%M%S"),
        extension
    )
}
