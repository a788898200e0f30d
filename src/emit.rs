//! Sequential emission orchestrator. Each issue request carries the number
//! returned by the previous success, so the batch is a fold over the order
//! ids with `(last_number, results)` as the accumulator, never a parallel
//! dispatch.

use crate::authority::{InvoiceAuthority, IssueOutcome, IssueRecipient, IssueRequest};
use crate::model::{AnnotatedOrder, BatchReport, EmissionResult, Order, Recipient};
use crate::normalize::{digits_only, normalize_text};
use crate::session::{EditOverlay, EDIT_DEVICE, EDIT_DEVICE_QUANTITY};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct Emitter {
    authority: Arc<dyn InvoiceAuthority>,
    overlay: EditOverlay,
    // Batches must not interleave: concurrent callers are serialized for the
    // whole batch so the issued-number sequence stays monotonic.
    batch_lock: Mutex<()>,
}

impl Emitter {
    pub fn new(authority: Arc<dyn InvoiceAuthority>, overlay: EditOverlay) -> Self {
        Self {
            authority,
            overlay,
            batch_lock: Mutex::new(()),
        }
    }

    /// Issue notes for the given orders, in the given sequence, one at a
    /// time. Always runs to completion; per-order outcomes live in the
    /// report. Overlay entries for every submitted id are cleared afterwards,
    /// success and failure alike.
    #[instrument(skip_all, fields(orders = order_ids.len()))]
    pub async fn emit_batch(
        &self,
        order_ids: &[String],
        annotated: &[AnnotatedOrder],
    ) -> Result<BatchReport> {
        let _serial = self.batch_lock.lock().await;
        let batch_id = Uuid::new_v4();

        let start = match self.authority.last_number().await {
            Ok(number) => number,
            Err(err) => {
                // Risky default: if the authority does not reject duplicate
                // numbers, starting at 0 can collide with issued notes.
                warn!(error = %err, "failed to fetch last issued number; starting from 0");
                0
            }
        };

        let (_, results) = stream::iter(order_ids)
            .fold(
                (start, Vec::with_capacity(order_ids.len())),
                |(last_number, mut results), order_id| async move {
                    let (next_number, result) =
                        self.emit_one(last_number, order_id, annotated).await;
                    results.push(result);
                    (next_number, results)
                },
            )
            .await;

        // Notes may already be issued at this point; a failed overlay clear
        // must not discard the results.
        if let Err(err) = self.overlay.clear(order_ids).await {
            warn!(error = %err, "failed to clear edit overlay after batch");
        }

        info!(
            %batch_id,
            issued = results.iter().filter(|r| r.is_issued()).count(),
            failed = results.iter().filter(|r| !r.is_issued()).count(),
            "emission batch completed"
        );
        Ok(BatchReport {
            batch_id,
            completed: true,
            results,
        })
    }

    /// One step of the fold: returns the counter to carry forward and the
    /// order's result. The counter advances only on declared success.
    async fn emit_one(
        &self,
        last_number: u64,
        order_id: &str,
        annotated: &[AnnotatedOrder],
    ) -> (u64, EmissionResult) {
        let entry = annotated.iter().find(|a| a.order.id == order_id);
        let (order, recipient) = match entry {
            Some(AnnotatedOrder {
                order,
                recipient: Some(recipient),
                ..
            }) => (order, recipient),
            // Unknown order or unresolved recipient: no external call.
            _ => {
                return (
                    last_number,
                    EmissionResult::Failed {
                        order_id: order_id.to_string(),
                        error: "recipient not registered".to_string(),
                    },
                )
            }
        };

        let edits = match self.overlay.edits_for(order_id).await {
            Ok(edits) => edits,
            Err(err) => {
                warn!(order_id, error = %err, "failed to read edit overlay; using order fields");
                Map::new()
            }
        };
        let request = build_issue_request(last_number, order, recipient, &edits);

        match self.authority.issue(&request).await {
            Ok(IssueOutcome::Issued(data)) => (
                data.number,
                EmissionResult::Issued {
                    order_id: order_id.to_string(),
                    number: data.number,
                    access_key: data.access_key,
                    protocol: data.protocol,
                    event_id: data.event_id,
                    pdf_base64: data.pdf,
                    recipient_name: data.recipient_summary,
                },
            ),
            Ok(IssueOutcome::Declined(message)) => (
                last_number,
                EmissionResult::Failed {
                    order_id: order_id.to_string(),
                    error: message,
                },
            ),
            Err(err) => (
                last_number,
                EmissionResult::Failed {
                    order_id: order_id.to_string(),
                    error: err.to_string(),
                },
            ),
        }
    }
}

/// Build the issue payload for one order: base order fields, overlay
/// overrides winning, and the recipient's fields normalized the way the
/// authority expects them (uppercased text, plain digits with leading zeros
/// kept).
pub fn build_issue_request(
    last_note_number: u64,
    order: &Order,
    recipient: &Recipient,
    edits: &Map<String, Value>,
) -> IssueRequest {
    let device = edits
        .get(EDIT_DEVICE)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| order.device.clone());
    let device_quantity = edits
        .get(EDIT_DEVICE_QUANTITY)
        .and_then(Value::as_u64)
        .map(|q| q as u32)
        .unwrap_or(order.device_quantity);

    let (cpf, cnpj, state_registration) = match &recipient.party {
        crate::model::Party::Individual { cpf } => {
            (digits_only(cpf), String::new(), String::new())
        }
        crate::model::Party::Organization {
            cnpj,
            state_registration,
            ..
        } => (String::new(), digits_only(cnpj), state_registration.clone()),
    };

    let address = &recipient.address;
    let phone = recipient
        .phone
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .or(recipient.mobile.as_deref())
        .map(digits_only)
        .unwrap_or_default();

    IssueRequest {
        last_note_number,
        order_id: order.id.clone(),
        customer_ref: order.customer_ref.clone(),
        device,
        device_quantity,
        harness: order.harness.clone(),
        accessories: order.accessories.clone(),
        recipient: IssueRecipient {
            name: normalize_text(&recipient.name),
            cpf,
            cnpj,
            state_registration,
            street: normalize_text(&address.street),
            number: normalize_text(&address.number),
            complement: address
                .complement
                .as_deref()
                .map(normalize_text)
                .unwrap_or_default(),
            neighborhood: normalize_text(&address.neighborhood),
            city: normalize_text(&address.city),
            state: normalize_text(&address.state),
            postal_code: digits_only(&address.postal_code),
            phone,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, Party};
    use serde_json::json;

    fn sample_order() -> Order {
        Order {
            id: "ord-1".into(),
            customer_ref: "cust-1".into(),
            cpf: Some("123.456.789-00".into()),
            cnpj: None,
            postal_code: "01234-567".into(),
            display_name: "João da Silva".into(),
            device: "Tracker X1".into(),
            device_quantity: 1,
            harness: Some("harness-2m".into()),
            accessories: None,
            shipping_note: None,
        }
    }

    fn sample_recipient() -> Recipient {
        Recipient {
            id: "r1".into(),
            name: "João da Silva".into(),
            party: Party::Individual {
                cpf: "012.345.678-90".into(),
            },
            address: Address {
                street: "Rua das Flôres".into(),
                number: "100-B".into(),
                complement: Some("sala 3".into()),
                neighborhood: "Centro".into(),
                city: "São Paulo".into(),
                state: "sp".into(),
                postal_code: "01234-567".into(),
            },
            phone: None,
            mobile: Some("(11) 99999-0000".into()),
            email: None,
            created_at: None,
        }
    }

    #[test]
    fn request_normalizes_recipient_fields() {
        let request =
            build_issue_request(7, &sample_order(), &sample_recipient(), &Map::new());
        assert_eq!(request.last_note_number, 7);
        assert_eq!(request.recipient.name, "JOAO DA SILVA");
        assert_eq!(request.recipient.street, "RUA DAS FLORES");
        assert_eq!(request.recipient.city, "SAO PAULO");
        assert_eq!(request.recipient.state, "SP");
        // Digits keep their leading zeros on the wire.
        assert_eq!(request.recipient.cpf, "01234567890");
        assert_eq!(request.recipient.postal_code, "01234567");
        assert_eq!(request.recipient.phone, "11999990000");
        assert_eq!(request.recipient.cnpj, "");
    }

    #[test]
    fn overlay_edits_override_order_fields() {
        let mut edits = Map::new();
        edits.insert(EDIT_DEVICE.to_string(), json!("Tracker X2"));
        edits.insert(EDIT_DEVICE_QUANTITY.to_string(), json!(5));
        let request = build_issue_request(0, &sample_order(), &sample_recipient(), &edits);
        assert_eq!(request.device, "Tracker X2");
        assert_eq!(request.device_quantity, 5);

        let untouched =
            build_issue_request(0, &sample_order(), &sample_recipient(), &Map::new());
        assert_eq!(untouched.device, "Tracker X1");
        assert_eq!(untouched.device_quantity, 1);
    }

    #[test]
    fn organization_fills_cnpj_and_state_registration() {
        let mut recipient = sample_recipient();
        recipient.party = Party::Organization {
            cnpj: "12.345.678/0001-00".into(),
            state_registration: "1234567".into(),
            ie_indicator: "1".into(),
        };
        let request = build_issue_request(0, &sample_order(), &recipient, &Map::new());
        assert_eq!(request.recipient.cnpj, "12345678000100");
        assert_eq!(request.recipient.state_registration, "1234567");
        assert_eq!(request.recipient.cpf, "");
    }
}
