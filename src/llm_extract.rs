// src/llm_extract.rs

use crate::config::{ExtractionBackend, ExtractionSection};
use crate::document::Document;
use crate::ledger::InvoiceData;
use crate::price_book::PriceBook;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, debug, error, info, warn};

/// Instructions sent with every invoice. Describes the target schema, the
/// vendor quirks we know about and the arithmetic each row must satisfy.
const SYSTEM_PROMPT: &str = r#"You read purchase invoices for convenience, grocery and gas station stores
and turn them into structured rows for a purchase-entry table.

Input: one invoice (PDF or image) and, optionally, price book text.

Steps:
1. Find the main line-item table.
2. Read the invoice total ("Invoice Total", "Pay This Amount") from the header or footer.
3. For every row read quantity, product codes, description, pack/size and pricing.

Vendor rule (Frito Lay):
- The "UPC" column holds short digits (e.g. 2686) and the "ITEM" column long digits (e.g. 00025190).
- scan_code = manufacturer code from the section header (e.g. 28400) followed by the UPC value, e.g. "284002686".
- item_code = the ITEM column value, unchanged.

Returns (all vendors):
- Rows under "RETURNS", "CREDITS" or with negative totals get a NEGATIVE qty, so their extended_case_cost is negative.

Discounts:
- Sum multiple discounts on one line into one amount.
- case_discount is a POSITIVE number per case, even when printed as "-5.00".

Totals:
- The sum of extended_case_cost over all rows, returns included, must equal invoice_total.
- Taxes, freight, bottle deposits (CRV), fuel surcharges and pallet fees printed outside the table
  become their own rows: description "Tax"/"Freight"/"CRV", item_code "TAX"/"FEE"/"CRV", qty 1,
  case_cost = the fee amount, department "Fees" or "Tax".

Price book (when given):
- Prefer an exact UPC / item code match, otherwise a close description match.

Rules:
- Use null for any field that is missing or unreadable.
- Dates are YYYY-MM-DD.
- confidence is your certainty for the row, between 0 and 1.

Calculations:
- cost_per_unit_after_discount = (case_cost - case_discount) / units
- extended_case_cost = qty * (case_cost - case_discount)
- extended_unit_retail = qty * units * unit_retail
- calculated_margin_percent = (unit_retail - cost_per_unit_after_discount) / unit_retail * 100

Return ONLY a JSON object of this shape, no markdown fences, no commentary:
{
  "invoice_header": {
    "vendor_name": "string or null",
    "invoice_number": "string or null",
    "invoice_date": "YYYY-MM-DD or null",
    "delivery_date": "YYYY-MM-DD or null",
    "invoice_total": number or null,
    "page_count": integer
  },
  "line_items": [
    {
      "row_index": integer,
      "qty": number or null,
      "item_code": "string or null",
      "scan_code": "string or null",
      "item_description": "string or null",
      "department": "string or null",
      "price_group": "string or null",
      "product_category": "string or null",
      "units": number or null,
      "case_cost": number or null,
      "case_discount": number or null,
      "cost_per_unit_after_discount": number or null,
      "extended_case_cost": number or null,
      "unit_retail": number or null,
      "extended_unit_retail": number or null,
      "size": "string or null",
      "default_margin_percent": number or null,
      "calculated_margin_percent": number or null,
      "confidence": number,
      "notes": "string or null"
    }
  ]
}"#;

const BASE_PROMPT: &str =
    "Please analyze this invoice and extract the data according to the system instructions.";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("API key missing: set the {0} environment variable")]
    MissingApiKey(String),
    #[error("extraction request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("extraction service error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("empty response from extraction service")]
    EmptyResponse,
    #[error("extraction response is not valid JSON: {0}")]
    MalformedJson(String),
    #[error("extraction response has no line_items array")]
    InvalidStructure,
}

/// The external document-extraction service.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        document: &Document,
        price_book: &PriceBook,
    ) -> Result<InvoiceData, ExtractionError>;
}

// ---------------------------------------------------------------------------
// Gemini wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

// ---------------------------------------------------------------------------
// OpenAI-compatible wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Resolved endpoint configuration ready to make API calls.
struct ResolvedEndpoint {
    backend: ExtractionBackend,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f64,
}

fn resolve_endpoint(cfg: &ExtractionSection) -> Result<ResolvedEndpoint, ExtractionError> {
    let api_key = std::env::var(&cfg.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ExtractionError::MissingApiKey(cfg.api_key_env.clone()))?;
    info!(
        backend = ?cfg.backend,
        url = %cfg.base_url,
        model = %cfg.model,
        "Using extraction endpoint"
    );
    Ok(ResolvedEndpoint {
        backend: cfg.backend,
        base_url: cfg.base_url.trim_end_matches('/').to_string(),
        model: cfg.model.clone(),
        api_key,
        temperature: cfg.temperature,
    })
}

/// User-side prompt text, with the price book appended when there is one.
fn build_prompt(price_book: &PriceBook) -> String {
    match price_book {
        PriceBook::None => BASE_PROMPT.to_string(),
        PriceBook::Loaded(text) => format!(
            "{BASE_PROMPT}\n\nHERE IS THE PRICE BOOK DATA (CSV format):\n{text}\n\nUse this to look up item details."
        ),
        PriceBook::Unreadable => format!(
            "{BASE_PROMPT}\n\n(Note: A price book file was provided but could not be read.)"
        ),
    }
}

fn gemini_request(endpoint: &ResolvedEndpoint, document: &Document, prompt: String) -> GenerateRequest {
    GenerateRequest {
        system_instruction: Content {
            role: None,
            parts: vec![Part {
                text: Some(SYSTEM_PROMPT.to_string()),
                inline_data: None,
            }],
        },
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![
                Part {
                    text: Some(prompt),
                    inline_data: None,
                },
                Part {
                    text: None,
                    inline_data: Some(InlineData {
                        mime_type: document.mime_type.clone(),
                        data: BASE64.encode(&document.bytes),
                    }),
                },
            ],
        }],
        generation_config: GenerationConfig {
            response_mime_type: "application/json".to_string(),
            temperature: endpoint.temperature,
        },
    }
}

fn chat_request(endpoint: &ResolvedEndpoint, document: &Document, prompt: String) -> ChatRequest {
    let data_url = format!(
        "data:{};base64,{}",
        document.mime_type,
        BASE64.encode(&document.bytes)
    );
    ChatRequest {
        model: endpoint.model.clone(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: MessageContent::Text(SYSTEM_PROMPT.to_string()),
            },
            ChatMessage {
                role: "user".to_string(),
                content: MessageContent::Parts(vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ]),
            },
        ],
        temperature: endpoint.temperature,
    }
}

/// HTTP client for a multimodal model that reads the invoice directly.
pub struct LlmExtractor {
    client: Client,
    endpoint: ResolvedEndpoint,
}

impl LlmExtractor {
    pub fn new(cfg: &ExtractionSection) -> Result<Self, ExtractionError> {
        let endpoint = resolve_endpoint(cfg)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self { client, endpoint })
    }

    async fn send_gemini(&self, request: &GenerateRequest) -> Result<String, ExtractionError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.endpoint.base_url, self.endpoint.model
        );
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.endpoint.api_key)
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: GenerateResponse = response.json().await?;
        body.candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ExtractionError::EmptyResponse)
    }

    async fn send_chat(&self, request: &ChatRequest) -> Result<String, ExtractionError> {
        let url = format!("{}/chat/completions", self.endpoint.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ExtractionError::EmptyResponse)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ExtractionError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ExtractionError::Api { status, body })
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(
        &self,
        document: &Document,
        price_book: &PriceBook,
    ) -> Result<InvoiceData, ExtractionError> {
        let prompt = build_prompt(price_book);
        let content = match self.endpoint.backend {
            ExtractionBackend::Gemini => {
                let request = gemini_request(&self.endpoint, document, prompt);
                self.send_gemini(&request).await?
            }
            ExtractionBackend::OpenAi => {
                let request = chat_request(&self.endpoint, document, prompt);
                self.send_chat(&request).await?
            }
        };
        parse_invoice_response(&content)
    }
}

/// Turn the model's text answer into [`InvoiceData`].
///
/// Tolerates markdown fences and text around the JSON object, but requires
/// an array-typed `line_items`.
pub fn parse_invoice_response(content: &str) -> Result<InvoiceData, ExtractionError> {
    // Strip markdown fences if the model added them despite instructions
    let json_str = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let json_str = extract_json_object(json_str)?;

    let value: serde_json::Value =
        serde_json::from_str(json_str).map_err(|e| ExtractionError::MalformedJson(e.to_string()))?;
    if !value.get("line_items").is_some_and(serde_json::Value::is_array) {
        return Err(ExtractionError::InvalidStructure);
    }
    serde_json::from_value(value).map_err(|e| ExtractionError::MalformedJson(e.to_string()))
}

/// Extract the outermost JSON object from a string that may contain
/// surrounding text (e.g. reasoning before the answer).
fn extract_json_object(s: &str) -> Result<&str, ExtractionError> {
    if s.is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }
    let start = s
        .find('{')
        .ok_or_else(|| ExtractionError::MalformedJson("no '{' in response".into()))?;
    let end = s
        .rfind('}')
        .ok_or_else(|| ExtractionError::MalformedJson("no '}' in response".into()))?;
    if end <= start {
        return Err(ExtractionError::MalformedJson("unbalanced braces".into()));
    }
    Ok(&s[start..=end])
}

/// Run one extraction for one document and return the normalized result.
///
/// Nothing is returned on failure, so a caller never sees partial data.
pub async fn run_extraction(
    extractor: &dyn Extractor,
    document: &Document,
    price_book: &PriceBook,
) -> Result<InvoiceData, ExtractionError> {
    let span = tracing::info_span!("extract", sha256 = %document.sha256, mime = %document.mime_type);

    async move {
        if *price_book == PriceBook::Unreadable {
            warn!("Price book could not be read, noting it in the prompt");
        } else if let Some(text) = price_book.text() {
            debug!(chars = text.chars().count(), "Including price book in the prompt");
        }

        let mut invoice = extractor
            .extract(document, price_book)
            .await
            .inspect_err(|e| error!(error = %e, "Extraction failed"))?;

        if invoice.invoice_header.page_count == 0 {
            if let Some(pages) = document.page_count {
                invoice.invoice_header.page_count = pages;
            }
        }
        let invoice = invoice.normalized();
        let (filled, total) = invoice.invoice_header.coverage();
        info!(
            filled,
            total,
            invoice_number = ?invoice.invoice_header.invoice_number,
            vendor = ?invoice.invoice_header.vendor_name,
            invoice_total = ?invoice.invoice_header.invoice_total,
            line_items = invoice.line_items.len(),
            "Extraction result"
        );
        Ok(invoice)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const GOOD_BODY: &str = r#"{
        "invoice_header": {"vendor_name": "Frito Lay", "invoice_number": "INV-7", "invoice_total": 180.0, "page_count": 0},
        "line_items": [
            {"row_index": 4, "qty": 10, "item_code": "00025190", "scan_code": "284002686",
             "item_description": "Doritos", "case_cost": 20.0, "case_discount": -2.0,
             "extended_case_cost": 180.0, "confidence": 0.92}
        ]
    }"#;

    fn endpoint(backend: ExtractionBackend) -> ResolvedEndpoint {
        ResolvedEndpoint {
            backend,
            base_url: "http://localhost".into(),
            model: "test-model".into(),
            api_key: "k".into(),
            temperature: 0.1,
        }
    }

    #[test]
    fn test_parse_plain_json() {
        let invoice = parse_invoice_response(GOOD_BODY).unwrap();
        assert_eq!(invoice.invoice_header.vendor_name.as_deref(), Some("Frito Lay"));
        assert_eq!(invoice.line_items.len(), 1);
        assert_eq!(invoice.line_items[0].scan_code.as_deref(), Some("284002686"));
    }

    #[test]
    fn test_parse_accepts_null_and_float_counts() {
        let body = r#"{
            "invoice_header": {"vendor_name": "McLane", "page_count": null},
            "line_items": [{"row_index": 2.0, "item_code": "7", "confidence": null}]
        }"#;
        let invoice = parse_invoice_response(body).unwrap();
        assert_eq!(invoice.invoice_header.page_count, 0);
        assert_eq!(invoice.line_items[0].row_index, 2);
        assert_eq!(invoice.line_items[0].confidence, 0.0);

        let body = r#"{"invoice_header": {"page_count": 1.0}, "line_items": []}"#;
        assert_eq!(parse_invoice_response(body).unwrap().invoice_header.page_count, 1);
    }

    #[test]
    fn test_parse_fenced_json_with_preamble() {
        let fenced = format!("```json\nSure, here it is:\n{GOOD_BODY}\n```");
        assert!(parse_invoice_response(&fenced).is_ok());
    }

    #[test]
    fn test_parse_rejects_missing_line_items() {
        let err = parse_invoice_response(r#"{"invoice_header": {}}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidStructure));
        let err = parse_invoice_response(r#"{"line_items": {"0": {}}}"#).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidStructure));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            parse_invoice_response("I could not read this invoice."),
            Err(ExtractionError::MalformedJson(_))
        ));
        assert!(matches!(
            parse_invoice_response("{ not json }"),
            Err(ExtractionError::MalformedJson(_))
        ));
        assert!(matches!(parse_invoice_response("   "), Err(ExtractionError::EmptyResponse)));
    }

    #[test]
    fn test_prompt_mentions_price_book_state() {
        assert_eq!(build_prompt(&PriceBook::None), BASE_PROMPT);
        let loaded = build_prompt(&PriceBook::Loaded("upc,desc\n1,Chips".into()));
        assert!(loaded.contains("PRICE BOOK DATA"));
        assert!(loaded.contains("1,Chips"));
        let unreadable = build_prompt(&PriceBook::Unreadable);
        assert!(unreadable.contains("could not be read"));
    }

    #[test]
    fn test_gemini_request_shape() {
        let doc = Document::from_bytes(b"img".to_vec(), "image/png");
        let request = gemini_request(&endpoint(ExtractionBackend::Gemini), &doc, "go".into());
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "go");
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/png");
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["data"], "aW1n");
        assert!(json["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn test_chat_request_shape() {
        let doc = Document::from_bytes(b"img".to_vec(), "image/jpeg");
        let request = chat_request(&endpoint(ExtractionBackend::OpenAi), &doc, "go".into());
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"][0]["type"], "text");
        assert_eq!(
            json["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,aW1n"
        );
    }

    #[test]
    fn test_missing_api_key() {
        let cfg = ExtractionSection {
            api_key_env: "INVOICE_LEDGER_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..ExtractionSection::default()
        };
        assert!(matches!(
            LlmExtractor::new(&cfg),
            Err(ExtractionError::MissingApiKey(_))
        ));
    }

    struct StubExtractor {
        body: Result<&'static str, ()>,
        seen_prompt: Mutex<Option<String>>,
    }

    #[async_trait]
    impl Extractor for StubExtractor {
        async fn extract(
            &self,
            _document: &Document,
            price_book: &PriceBook,
        ) -> Result<InvoiceData, ExtractionError> {
            *self.seen_prompt.lock().unwrap() = Some(build_prompt(price_book));
            match self.body {
                Ok(body) => parse_invoice_response(body),
                Err(()) => Err(ExtractionError::EmptyResponse),
            }
        }
    }

    #[tokio::test]
    async fn test_run_extraction_normalizes_and_fills_pages() {
        let stub = StubExtractor { body: Ok(GOOD_BODY), seen_prompt: Mutex::new(None) };
        let mut doc = Document::from_bytes(b"%PDF".to_vec(), "application/pdf");
        doc.page_count = Some(3);

        let invoice = run_extraction(&stub, &doc, &PriceBook::Unreadable).await.unwrap();
        assert_eq!(invoice.invoice_header.page_count, 3);
        assert_eq!(invoice.line_items[0].row_index, 1);
        assert_eq!(invoice.line_items[0].case_discount, Some(2.0));
        let prompt = stub.seen_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("could not be read"));
    }

    #[tokio::test]
    async fn test_run_extraction_propagates_failure() {
        let stub = StubExtractor { body: Err(()), seen_prompt: Mutex::new(None) };
        let doc = Document::from_bytes(b"img".to_vec(), "image/png");
        let result = run_extraction(&stub, &doc, &PriceBook::None).await;
        assert!(matches!(result, Err(ExtractionError::EmptyResponse)));
    }
}
