//! Item type definitions

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Classification outcome of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    /// Ingested, waiting for the extraction service
    Pending,
    /// A quotation request with its fields extracted
    Valid,
    /// Unrelated to quotation requests
    Irrelevant,
    /// Looks like a request but lacks mandatory fields
    NotValid,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Pending => "PENDING",
            Disposition::Valid => "VALID",
            Disposition::Irrelevant => "IRRELEVANT",
            Disposition::NotValid => "NOT_VALID",
        }
    }

    /// Terminal under normal flow; only a reprocess authorization reopens it
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Disposition::Pending)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disposition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(Disposition::Pending),
            "VALID" => Ok(Disposition::Valid),
            "IRRELEVANT" => Ok(Disposition::Irrelevant),
            "NOT_VALID" | "NOTVALID" | "INVALID" => Ok(Disposition::NotValid),
            other => Err(Error::Other(format!("Unknown disposition: {}", other))),
        }
    }
}

/// Attachment metadata carried alongside a message (content is not stored)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub filename: String,
    pub content_type: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub attachment_id: Option<String>,
}

/// Source message content, passed through to the extraction service as-is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawContent {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

impl RawContent {
    pub fn new(subject: impl Into<String>, sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            sender: sender.into(),
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Flatten into the plain text handed to the extraction service
    pub fn to_text(&self) -> String {
        let mut text = format!("From: {}\nSubject: {}\n\n{}", self.sender, self.subject, self.body);
        if !self.attachments.is_empty() {
            text.push_str("\n\nAttachments:");
            for attachment in &self.attachments {
                text.push_str(&format!("\n- {} ({})", attachment.filename, attachment.content_type));
            }
        }
        text
    }
}

/// One requested product line
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequirementLine {
    #[serde(default)]
    pub brand_and_model: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub unit_price: String,
    #[serde(default)]
    pub total_price: String,
}

/// Structured data extracted from a quotation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    /// Person or company requesting the quotation
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub mobile: String,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub requirements: Vec<RequirementLine>,
}

/// Verdict returned by the extraction service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub disposition: Disposition,
    #[serde(default)]
    pub fields: Option<ExtractedFields>,
}

impl Classification {
    pub fn valid(fields: ExtractedFields) -> Self {
        Self {
            disposition: Disposition::Valid,
            fields: Some(fields),
        }
    }

    pub fn irrelevant() -> Self {
        Self {
            disposition: Disposition::Irrelevant,
            fields: None,
        }
    }

    pub fn not_valid(fields: Option<ExtractedFields>) -> Self {
        Self {
            disposition: Disposition::NotValid,
            fields,
        }
    }
}

/// One ingested message and its classification state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub external_id: String,
    pub received_at: DateTime<Utc>,
    pub raw_content: RawContent,
    pub disposition: Disposition,
    pub extracted_fields: Option<ExtractedFields>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Classification attempts that ended without a verdict
    #[serde(default)]
    pub attempts: u32,
}

impl Item {
    /// Extracted fields, only when the item is `VALID`
    pub fn valid_fields(&self) -> Option<&ExtractedFields> {
        match self.disposition {
            Disposition::Valid => self.extracted_fields.as_ref(),
            _ => None,
        }
    }
}

/// Point-in-time counts per disposition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateCounts {
    pub total: u64,
    pub valid: u64,
    pub irrelevant: u64,
    pub not_valid: u64,
    pub pending: u64,
}

impl AggregateCounts {
    /// `total == valid + irrelevant + not_valid + pending`
    pub fn is_consistent(&self) -> bool {
        self.total == self.valid + self.irrelevant + self.not_valid + self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_round_trip_through_str() {
        for d in [
            Disposition::Pending,
            Disposition::Valid,
            Disposition::Irrelevant,
            Disposition::NotValid,
        ] {
            assert_eq!(d.as_str().parse::<Disposition>().unwrap(), d);
        }
        assert!("SHIPPED".parse::<Disposition>().is_err());
    }

    #[test]
    fn test_disposition_serde_names() {
        let json = serde_json::to_string(&Disposition::NotValid).unwrap();
        assert_eq!(json, "\"NOT_VALID\"");
    }

    #[test]
    fn test_raw_content_to_text() {
        let content = RawContent::new("RFQ", "buyer@example.com", "Need 200 screwdriver sets")
            .with_attachment(AttachmentRef {
                filename: "specs.pdf".into(),
                content_type: "application/pdf".into(),
                ..Default::default()
            });
        let text = content.to_text();
        assert!(text.starts_with("From: buyer@example.com\nSubject: RFQ"));
        assert!(text.contains("Need 200 screwdriver sets"));
        assert!(text.contains("- specs.pdf (application/pdf)"));
    }

    #[test]
    fn test_valid_fields_hidden_unless_valid() {
        let now = Utc::now();
        let mut item = Item {
            external_id: "g-1".into(),
            received_at: now,
            raw_content: RawContent::default(),
            disposition: Disposition::NotValid,
            extracted_fields: Some(ExtractedFields::default()),
            processed_at: Some(now),
            created_at: now,
            updated_at: now,
            attempts: 0,
        };
        assert!(item.valid_fields().is_none());
        item.disposition = Disposition::Valid;
        assert!(item.valid_fields().is_some());
    }
}
