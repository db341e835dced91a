//! LLM-backed extractor

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::item::{Classification, Disposition, ExtractedFields, RawContent, RequirementLine};
use crate::llm::LlmClient;
use crate::{Error, Result};

use super::Extractor;

const SYSTEM_PROMPT: &str = r#"You are an email processor that handles quotation requests for hardware products, tools and industrial equipment.

Classify the email and reply with a single JSON object and nothing else.

IRRELEVANT emails: personal messages, marketing, system or security notifications, social media notifications, order confirmations, shipping updates, support tickets, newsletters, spam, general inquiries without a product request.

VALID emails: a business request for pricing or a quotation that names specific products and carries enough detail (quantities, specifications, requirements) to prepare a quote.

NOT_VALID emails: clearly an attempt to request a quotation, but missing the information needed to prepare one (no identifiable product, no way to reach the requester).

Reply format:
{
  "disposition": "VALID" | "IRRELEVANT" | "NOT_VALID",
  "to": "Name of person or company requesting the quotation, empty string if not found",
  "email": "Email address of the requester, empty string if not found",
  "mobile": "Phone number of the requester, empty string if not found",
  "deadline": "Requested response or delivery deadline, null if not stated",
  "Requirements": [
    {
      "Brand and model": "Brand and model if available, otherwise empty string",
      "Description": "Product description and specifications",
      "Quantity": "Quantity if available, otherwise empty string",
      "Unit": "Unit for quantity (pcs/Kg/Litre/etc) if available, otherwise empty string",
      "Unit price": "Unit price if available, otherwise empty string",
      "Total Price": "Total price if both unit price and quantity are given, otherwise empty string"
    }
  ]
}

For IRRELEVANT replies only "disposition" is required."#;

const LEGACY_IRRELEVANT: &str = "[IRRELEVANT]";

/// Extractor backed by a chat-completion LLM
pub struct LlmExtractor {
    client: LlmClient,
}

impl LlmExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        Ok(Self {
            client: LlmClient::new(config)?,
        })
    }

    pub fn with_client(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn classify(&self, raw: &RawContent) -> Result<Classification> {
        let user = format!("EMAIL CONTENT:\n\"\"\"{}\"\"\"", raw.to_text());
        let reply = self.client.complete(Some(SYSTEM_PROMPT), &user).await?;
        debug!(model = self.client.model(), "Extraction reply received");
        parse_reply(&reply)
    }
}

#[derive(Debug, Deserialize)]
struct WireVerdict {
    #[serde(default)]
    disposition: Option<String>,
    #[serde(default, rename = "to")]
    client_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    mobile: Option<String>,
    #[serde(default)]
    deadline: Option<String>,
    #[serde(default, rename = "Requirements", alias = "requirements")]
    requirements: Vec<WireRequirement>,
}

#[derive(Debug, Deserialize)]
struct WireRequirement {
    #[serde(default, rename = "Brand and model")]
    brand_and_model: Option<String>,
    #[serde(default, rename = "Description")]
    description: Option<String>,
    #[serde(default, rename = "Quantity")]
    quantity: Option<serde_json::Value>,
    #[serde(default, rename = "Unit")]
    unit: Option<String>,
    #[serde(default, rename = "Unit price")]
    unit_price: Option<serde_json::Value>,
    #[serde(default, rename = "Total Price")]
    total_price: Option<serde_json::Value>,
}

/// Models sometimes answer numeric fields with numbers rather than strings
fn scalar_to_string(value: Option<serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

impl From<WireRequirement> for RequirementLine {
    fn from(wire: WireRequirement) -> Self {
        Self {
            brand_and_model: wire.brand_and_model.unwrap_or_default(),
            description: wire.description.unwrap_or_default(),
            quantity: scalar_to_string(wire.quantity),
            unit: wire.unit.unwrap_or_default(),
            unit_price: scalar_to_string(wire.unit_price),
            total_price: scalar_to_string(wire.total_price),
        }
    }
}

/// Strip a surrounding markdown code fence, if any
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse an LLM reply into a classification.
///
/// A reply that cannot be understood is an upstream failure, so the item
/// stays `PENDING` and is retried on a later cycle.
pub(crate) fn parse_reply(reply: &str) -> Result<Classification> {
    let body = strip_code_fence(reply);

    if body == LEGACY_IRRELEVANT {
        return Ok(Classification::irrelevant());
    }

    let verdict: WireVerdict = serde_json::from_str(body).map_err(|e| {
        warn!("Unparseable extraction reply: {}", e);
        Error::UpstreamUnavailable(format!("malformed extraction reply: {}", e))
    })?;

    // A bare field object without a disposition is the older reply shape, which
    // was only ever sent for relevant requests.
    let disposition = match verdict.disposition.as_deref() {
        None => Disposition::Valid,
        Some(value) => value
            .parse::<Disposition>()
            .map_err(|_| Error::UpstreamUnavailable(format!("unknown disposition '{}'", value)))?,
    };

    let fields = ExtractedFields {
        client_name: verdict.client_name.unwrap_or_default(),
        email: verdict.email.unwrap_or_default(),
        mobile: verdict.mobile.unwrap_or_default(),
        deadline: verdict.deadline.filter(|d| !d.trim().is_empty()),
        requirements: verdict.requirements.into_iter().map(Into::into).collect(),
    };

    match disposition {
        Disposition::Valid => Ok(Classification::valid(fields)),
        Disposition::Irrelevant => Ok(Classification::irrelevant()),
        Disposition::NotValid => Ok(Classification::not_valid(Some(fields))),
        Disposition::Pending => Err(Error::UpstreamUnavailable(
            "extraction returned PENDING".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_irrelevant_marker() {
        let c = parse_reply("  [IRRELEVANT]\n").unwrap();
        assert_eq!(c, Classification::irrelevant());
    }

    #[test]
    fn test_valid_reply_with_fence() {
        let reply = r#"```json
{
  "disposition": "VALID",
  "to": "Sanat Engineering Works",
  "email": "sanat@engworks.com",
  "mobile": "+91-9876543210",
  "deadline": "",
  "Requirements": [
    {"Brand and model": "Stanley", "Description": "Precision screwdriver set", "Quantity": 50, "Unit": "pcs", "Unit price": "$25", "Total Price": "$1250"}
  ]
}
```"#;
        let c = parse_reply(reply).unwrap();
        assert_eq!(c.disposition, Disposition::Valid);
        let fields = c.fields.unwrap();
        assert_eq!(fields.client_name, "Sanat Engineering Works");
        assert!(fields.deadline.is_none());
        assert_eq!(fields.requirements.len(), 1);
        assert_eq!(fields.requirements[0].quantity, "50");
        assert_eq!(fields.requirements[0].brand_and_model, "Stanley");
    }

    #[test]
    fn test_reply_without_disposition_is_valid() {
        let c = parse_reply(r#"{"to": "Acme", "Requirements": []}"#).unwrap();
        assert_eq!(c.disposition, Disposition::Valid);
    }

    #[test]
    fn test_not_valid_and_irrelevant_stay_distinct() {
        let c = parse_reply(r#"{"disposition": "NOT_VALID", "to": "Bob"}"#).unwrap();
        assert_eq!(c.disposition, Disposition::NotValid);
        assert_eq!(c.fields.unwrap().client_name, "Bob");

        let c = parse_reply(r#"{"disposition": "IRRELEVANT"}"#).unwrap();
        assert_eq!(c.disposition, Disposition::Irrelevant);
        assert!(c.fields.is_none());
    }

    #[test]
    fn test_malformed_reply_is_upstream_failure() {
        let err = parse_reply("Sure! Here is the JSON you asked for").unwrap_err();
        assert!(err.is_retryable());

        let err = parse_reply(r#"{"disposition": "PENDING"}"#).unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));

        let err = parse_reply(r#"{"disposition": "MAYBE"}"#).unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
    }

    #[test]
    fn test_unreachable_endpoint_is_upstream_failure() {
        let extractor = LlmExtractor::new(&ExtractionConfig {
            base_url: Some("http://127.0.0.1:1".into()),
            api_key: "test".into(),
            timeout_secs: 2,
            ..Default::default()
        })
        .unwrap();

        let raw = RawContent::new("RFQ", "a@b.c", "Need 10 drills");
        let err = tokio_test::block_on(extractor.classify(&raw)).unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
    }
}
