//! Recipient directory client. The directory owns recipient records; this
//! client keeps an in-memory mirror refreshed by successful operations.

use crate::model::{Party, Recipient, RecipientDraft};
use crate::normalize::{digits_only, normalize_digits};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;

static CPF_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{11}$").expect("valid regex"));
static CNPJ_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{14}$").expect("valid regex"));

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("invalid recipient: {0}")]
    Validation(&'static str),
    #[error("directory error {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("failed to reach recipient directory: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Remote directory contract. Mutations return the server's view of the
/// record; non-success HTTP statuses surface as [`DirectoryError::Http`].
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn list(&self) -> Result<Vec<Recipient>, DirectoryError>;

    async fn create(&self, draft: &RecipientDraft) -> Result<Recipient, DirectoryError>;

    async fn update(&self, id: &str, draft: &RecipientDraft)
        -> Result<Recipient, DirectoryError>;

    async fn partial_update(
        &self,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Recipient, DirectoryError>;

    async fn delete(&self, id: &str) -> Result<(), DirectoryError>;
}

pub struct DirectoryClient {
    http: Client,
    base_url: Url,
    mirror: RwLock<Vec<Recipient>>,
}

impl fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl DirectoryClient {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("nf-console/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            mirror: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of the last known server state, refreshed by every
    /// successful list call and mutation.
    pub async fn mirror(&self) -> Vec<Recipient> {
        self.mirror.read().await.clone()
    }

    /// Server-side filtered lookup: by tax id + postal code, or by name.
    pub async fn find(
        &self,
        tax_id: Option<&str>,
        postal_code: Option<&str>,
        name: Option<&str>,
    ) -> Result<Vec<Recipient>, DirectoryError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(tax_id) = tax_id {
            query.push(("cpfCnpj", digits_only(tax_id)));
        }
        if let Some(postal_code) = postal_code {
            query.push(("cep", digits_only(postal_code)));
        }
        if let Some(name) = name {
            query.push(("nome", name.to_string()));
        }
        let res = self
            .http
            .get(self.base_url.clone())
            .query(&query)
            .send()
            .await?;
        let res = into_success(res).await?;
        Ok(res.json::<Vec<Recipient>>().await?)
    }

    fn item_url(&self, id: &str) -> Result<Url, DirectoryError> {
        self.base_url
            .join(id)
            .map_err(|_| DirectoryError::Validation("recipient id is not a valid path segment"))
    }
}

async fn into_success(res: reqwest::Response) -> Result<reqwest::Response, DirectoryError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(DirectoryError::Http { status, body });
    }
    Ok(res)
}

/// Check the required-field set for the draft's declared party type before
/// any HTTP call is made.
pub fn validate_draft(draft: &RecipientDraft) -> Result<(), DirectoryError> {
    if draft.name.trim().is_empty() {
        return Err(DirectoryError::Validation("name must be non-empty"));
    }
    match &draft.party {
        Party::Individual { cpf } => {
            if !CPF_SHAPE.is_match(&digits_only(cpf)) {
                return Err(DirectoryError::Validation("cpf must have 11 digits"));
            }
        }
        Party::Organization {
            cnpj,
            state_registration,
            ie_indicator,
        } => {
            if !CNPJ_SHAPE.is_match(&digits_only(cnpj)) {
                return Err(DirectoryError::Validation("cnpj must have 14 digits"));
            }
            if state_registration.trim().is_empty() {
                return Err(DirectoryError::Validation(
                    "state_registration must be non-empty for organizations",
                ));
            }
            if ie_indicator.trim().is_empty() {
                return Err(DirectoryError::Validation(
                    "ie_indicator must be non-empty for organizations",
                ));
            }
        }
    }
    let address = &draft.address;
    if address.street.trim().is_empty() {
        return Err(DirectoryError::Validation("address.street must be non-empty"));
    }
    if address.number.trim().is_empty() {
        return Err(DirectoryError::Validation("address.number must be non-empty"));
    }
    if address.neighborhood.trim().is_empty() {
        return Err(DirectoryError::Validation(
            "address.neighborhood must be non-empty",
        ));
    }
    if address.city.trim().is_empty() {
        return Err(DirectoryError::Validation("address.city must be non-empty"));
    }
    if address.state.trim().is_empty() {
        return Err(DirectoryError::Validation("address.state must be non-empty"));
    }
    if normalize_digits(&address.postal_code).is_empty() {
        return Err(DirectoryError::Validation(
            "address.postal_code must contain digits",
        ));
    }
    Ok(())
}

#[async_trait]
impl RecipientDirectory for DirectoryClient {
    async fn list(&self) -> Result<Vec<Recipient>, DirectoryError> {
        let res = self.http.get(self.base_url.clone()).send().await?;
        let res = into_success(res).await?;
        let recipients = res.json::<Vec<Recipient>>().await?;
        *self.mirror.write().await = recipients.clone();
        Ok(recipients)
    }

    async fn create(&self, draft: &RecipientDraft) -> Result<Recipient, DirectoryError> {
        validate_draft(draft)?;
        let res = self
            .http
            .post(self.base_url.clone())
            .json(draft)
            .send()
            .await?;
        let res = into_success(res).await?;
        let created = res.json::<Recipient>().await?;
        replace_in(&mut *self.mirror.write().await, &created);
        Ok(created)
    }

    async fn update(
        &self,
        id: &str,
        draft: &RecipientDraft,
    ) -> Result<Recipient, DirectoryError> {
        validate_draft(draft)?;
        let res = self
            .http
            .put(self.item_url(id)?)
            .json(draft)
            .send()
            .await?;
        let res = into_success(res).await?;
        let updated = res.json::<Recipient>().await?;
        replace_in(&mut *self.mirror.write().await, &updated);
        Ok(updated)
    }

    async fn partial_update(
        &self,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Recipient, DirectoryError> {
        let res = self
            .http
            .patch(self.item_url(id)?)
            .json(fields)
            .send()
            .await?;
        let res = into_success(res).await?;
        let updated = res.json::<Recipient>().await?;
        replace_in(&mut *self.mirror.write().await, &updated);
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<(), DirectoryError> {
        let res = self.http.delete(self.item_url(id)?).send().await?;
        into_success(res).await?;
        self.mirror.write().await.retain(|r| r.id != id);
        Ok(())
    }
}

fn replace_in(mirror: &mut Vec<Recipient>, updated: &Recipient) {
    match mirror.iter_mut().find(|r| r.id == updated.id) {
        Some(slot) => *slot = updated.clone(),
        None => mirror.push(updated.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Address;

    fn draft() -> RecipientDraft {
        RecipientDraft {
            name: "Acme Comercio de Pecas Ltda".into(),
            party: Party::Organization {
                cnpj: "12.345.678/0001-00".into(),
                state_registration: "1234567".into(),
                ie_indicator: "1".into(),
            },
            address: Address {
                street: "Rua das Flores".into(),
                number: "100".into(),
                complement: None,
                neighborhood: "Centro".into(),
                city: "São Paulo".into(),
                state: "SP".into(),
                postal_code: "01234-567".into(),
            },
            phone: Some("(11) 99999-0000".into()),
            mobile: None,
            email: None,
        }
    }

    #[test]
    fn valid_draft_passes() {
        validate_draft(&draft()).unwrap();
    }

    #[test]
    fn organization_requires_state_registration_and_indicator() {
        let mut d = draft();
        d.party = Party::Organization {
            cnpj: "12345678000100".into(),
            state_registration: "".into(),
            ie_indicator: "1".into(),
        };
        assert!(matches!(
            validate_draft(&d),
            Err(DirectoryError::Validation(msg)) if msg.contains("state_registration")
        ));

        let mut d = draft();
        d.party = Party::Organization {
            cnpj: "12345678000100".into(),
            state_registration: "1234567".into(),
            ie_indicator: " ".into(),
        };
        assert!(matches!(
            validate_draft(&d),
            Err(DirectoryError::Validation(msg)) if msg.contains("ie_indicator")
        ));
    }

    #[test]
    fn tax_id_shape_is_checked_after_digit_stripping() {
        let mut d = draft();
        d.party = Party::Individual {
            cpf: "123.456.789-00".into(),
        };
        validate_draft(&d).unwrap();

        d.party = Party::Individual {
            cpf: "123.456.789".into(),
        };
        assert!(matches!(
            validate_draft(&d),
            Err(DirectoryError::Validation(msg)) if msg.contains("cpf")
        ));

        d.party = Party::Organization {
            cnpj: "12345678".into(),
            state_registration: "1234567".into(),
            ie_indicator: "1".into(),
        };
        assert!(matches!(
            validate_draft(&d),
            Err(DirectoryError::Validation(msg)) if msg.contains("cnpj")
        ));
    }

    #[test]
    fn replace_in_updates_or_appends() {
        let existing = Recipient {
            id: "r1".into(),
            name: "Old Name".into(),
            party: Party::Individual {
                cpf: "12345678900".into(),
            },
            address: draft().address,
            phone: None,
            mobile: None,
            email: None,
            created_at: None,
        };
        let mut mirror = vec![existing.clone()];

        let mut updated = existing.clone();
        updated.name = "New Name".into();
        replace_in(&mut mirror, &updated);
        assert_eq!(mirror.len(), 1);
        assert_eq!(mirror[0].name, "New Name");

        let mut fresh = existing;
        fresh.id = "r2".into();
        replace_in(&mut mirror, &fresh);
        assert_eq!(mirror.len(), 2);
    }

    #[test]
    fn address_fields_are_required() {
        let mut d = draft();
        d.address.city = "".into();
        assert!(matches!(
            validate_draft(&d),
            Err(DirectoryError::Validation(msg)) if msg.contains("city")
        ));

        let mut d = draft();
        d.address.postal_code = "no digits".into();
        assert!(matches!(
            validate_draft(&d),
            Err(DirectoryError::Validation(msg)) if msg.contains("postal_code")
        ));
    }
}
