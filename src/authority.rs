//! Invoice authority client: last-number counter source, note issuance, and
//! the historical record / PDF handoff. The authority itself is an opaque
//! remote service; only its wire contract lives here.

use crate::model::IssuedNote;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Payload submitted for one order's note. Recipient fields arrive already
/// normalized (uppercased text, plain digits) per the authority's contract.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    pub last_note_number: u64,
    pub order_id: String,
    pub customer_ref: String,
    pub device: String,
    pub device_quantity: u32,
    pub harness: Option<String>,
    pub accessories: Option<String>,
    pub recipient: IssueRecipient,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssueRecipient {
    pub name: String,
    pub cpf: String,
    pub cnpj: String,
    pub state_registration: String,
    pub street: String,
    pub number: String,
    pub complement: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub phone: String,
}

/// Declared outcome of an issue call. A transport or HTTP-level failure is a
/// plain error instead.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueOutcome {
    Issued(IssuedNoteData),
    Declined(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuedNoteData {
    pub number: u64,
    pub access_key: String,
    pub protocol: String,
    pub event_id: String,
    pub pdf: String,
    pub recipient_summary: String,
}

/// PDF handoff payload: base64 body plus declared mime type.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PdfDocument {
    pub pdf: String,
    pub mime_type: String,
}

impl PdfDocument {
    pub fn decode(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(self.pdf.as_bytes())
            .context("invalid base64 PDF payload")
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NumberEntry {
    number: u64,
}

#[async_trait]
pub trait InvoiceAuthority: Send + Sync {
    /// Current "last issued number". An empty or unsuccessful history reads
    /// as 0; transport failures propagate.
    async fn last_number(&self) -> Result<u64>;

    async fn issue(&self, request: &IssueRequest) -> Result<IssueOutcome>;

    async fn history(&self) -> Result<Vec<IssuedNote>>;

    async fn fetch_pdf(&self, event_id: &str) -> Result<PdfDocument>;
}

#[derive(Debug, Clone)]
pub struct AuthorityClient {
    http: Client,
    base_url: Url,
}

impl AuthorityClient {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("nf-console/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()
            .expect("reqwest client");
        Self { http, base_url }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .context("invalid invoice authority base URL")
    }
}

#[async_trait]
impl InvoiceAuthority for AuthorityClient {
    async fn last_number(&self) -> Result<u64> {
        let res = self
            .http
            .get(self.endpoint("last-number")?)
            .send()
            .await
            .context("failed to reach invoice authority")?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "invoice authority error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }
        let envelope = res
            .json::<Envelope<Vec<NumberEntry>>>()
            .await
            .context("invalid last-number response JSON")?;
        if !envelope.success {
            return Ok(0);
        }
        Ok(envelope
            .data
            .unwrap_or_default()
            .first()
            .map(|entry| entry.number)
            .unwrap_or(0))
    }

    async fn issue(&self, request: &IssueRequest) -> Result<IssueOutcome> {
        let res = self
            .http
            .post(self.endpoint("issue")?)
            .json(request)
            .send()
            .await
            .context("failed to reach invoice authority")?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "invoice authority error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }
        let envelope = res
            .json::<Envelope<IssuedNoteData>>()
            .await
            .context("invalid issue response JSON")?;
        match (envelope.success, envelope.data) {
            (true, Some(data)) => Ok(IssueOutcome::Issued(data)),
            _ => Ok(IssueOutcome::Declined(
                envelope.message.unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }

    async fn history(&self) -> Result<Vec<IssuedNote>> {
        let res = self
            .http
            .get(self.endpoint("history")?)
            .send()
            .await
            .context("failed to reach invoice authority")?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "invoice authority error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }
        let envelope = res
            .json::<Envelope<Vec<IssuedNote>>>()
            .await
            .context("invalid history response JSON")?;
        if !envelope.success {
            return Err(anyhow!(
                "invoice authority declined history request: {}",
                envelope.message.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
        Ok(envelope.data.unwrap_or_default())
    }

    async fn fetch_pdf(&self, event_id: &str) -> Result<PdfDocument> {
        let res = self
            .http
            .get(self.endpoint(&format!("{event_id}/pdf"))?)
            .send()
            .await
            .context("failed to reach invoice authority")?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "invoice authority error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }
        res.json::<PdfDocument>()
            .await
            .context("invalid pdf response JSON")
    }
}
