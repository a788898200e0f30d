use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A pending business transaction awaiting an invoice. Orders are owned by
/// the external order source; this system only reads and annotates them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub customer_ref: String,
    #[serde(default)]
    pub cpf: Option<String>,
    #[serde(default)]
    pub cnpj: Option<String>,
    #[serde(default)]
    pub postal_code: String,
    #[serde(default)]
    pub display_name: String,
    pub device: String,
    pub device_quantity: u32,
    #[serde(default)]
    pub harness: Option<String>,
    #[serde(default)]
    pub accessories: Option<String>,
    #[serde(default)]
    pub shipping_note: Option<String>,
}

impl Order {
    /// The order's tax id, whichever form is present. A blank field counts
    /// as absent.
    pub fn tax_id(&self) -> Option<&str> {
        self.cpf
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.cnpj.as_deref().filter(|s| !s.trim().is_empty()))
    }
}

/// Legal party kind. Exactly one variant's field set exists, by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Party {
    Individual {
        cpf: String,
    },
    #[serde(rename_all = "camelCase")]
    Organization {
        cnpj: String,
        state_registration: String,
        ie_indicator: String,
    },
}

impl Party {
    pub fn tax_id(&self) -> &str {
        match self {
            Party::Individual { cpf } => cpf,
            Party::Organization { cnpj, .. } => cnpj,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Party::Individual { .. } => "individual",
            Party::Organization { .. } => "organization",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: String,
    pub number: String,
    #[serde(default)]
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

/// A registered invoice recipient. Owned by the remote directory; local
/// copies are read-through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub party: Party,
    pub address: Address,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Client-side payload for creating or replacing a recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecipientDraft {
    pub name: String,
    #[serde(flatten)]
    pub party: Party,
    pub address: Address,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// An order annotated with its reconciliation outcome. Ephemeral: recomputed
/// on every refetch and discarded when the session cache is invalidated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedOrder {
    pub order: Order,
    pub recipient: Option<Recipient>,
    pub has_recipient: bool,
}

/// One per-order outcome within an emission batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EmissionResult {
    Issued {
        order_id: String,
        number: u64,
        access_key: String,
        protocol: String,
        event_id: String,
        pdf_base64: String,
        recipient_name: String,
    },
    Failed {
        order_id: String,
        error: String,
    },
}

impl EmissionResult {
    pub fn order_id(&self) -> &str {
        match self {
            EmissionResult::Issued { order_id, .. } => order_id,
            EmissionResult::Failed { order_id, .. } => order_id,
        }
    }

    pub fn is_issued(&self) -> bool {
        matches!(self, EmissionResult::Issued { .. })
    }
}

/// Outcome of a whole batch. `completed` says the orchestration ran to the
/// end; per-order status lives in each result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub completed: bool,
    pub results: Vec<EmissionResult>,
}

/// A historical issued-note record as returned by the invoice authority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuedNote {
    pub number: u64,
    pub access_key: String,
    pub recipient_name: String,
    pub event_id: String,
    pub issued_at: DateTime<Utc>,
}
