//! Order/recipient reconciliation: annotate each fetched order with the
//! directory record it resolves to, by normalized tax id + postal code, with
//! a fuzzy name + postal code fallback.

use crate::directory::{DirectoryError, RecipientDirectory};
use crate::model::{AnnotatedOrder, Order, Recipient};
use crate::normalize::{names_match, normalize_digits};
use futures::future::join_all;
use tokio::sync::OnceCell;
use tracing::warn;

/// Reconcile every order against the directory. Lookups are dispatched
/// concurrently and joined before returning; the recipient list is fetched
/// once and shared. A failed lookup degrades that order to "no recipient"
/// instead of aborting the batch.
pub async fn reconcile_orders<D>(orders: Vec<Order>, directory: &D) -> Vec<AnnotatedOrder>
where
    D: RecipientDirectory + ?Sized,
{
    let recipients: OnceCell<Vec<Recipient>> = OnceCell::new();
    let lookups = orders.into_iter().map(|order| {
        let recipients = &recipients;
        async move {
            let recipient = match resolve_for_order(&order, directory, recipients).await {
                Ok(found) => found,
                Err(err) => {
                    warn!(order_id = %order.id, error = %err, "recipient lookup failed; leaving order unresolved");
                    None
                }
            };
            let has_recipient = recipient.is_some();
            AnnotatedOrder {
                order,
                recipient,
                has_recipient,
            }
        }
    });
    join_all(lookups).await
}

async fn resolve_for_order<D>(
    order: &Order,
    directory: &D,
    recipients: &OnceCell<Vec<Recipient>>,
) -> Result<Option<Recipient>, DirectoryError>
where
    D: RecipientDirectory + ?Sized,
{
    let tax_id = normalize_digits(order.tax_id().unwrap_or(""));
    let postal = normalize_digits(&order.postal_code);
    if tax_id.is_empty() || postal.is_empty() {
        return Ok(None);
    }
    let list = recipients.get_or_try_init(|| directory.list()).await?;
    Ok(resolve_recipient(order, list))
}

/// Resolve one order against an already-fetched recipient list.
///
/// Exact pass first: normalized tax id AND postal code both equal. Then, if
/// the order carries a display name, a fallback pass: postal code equal and
/// name fuzzy-matched. First match in list order wins in both passes.
pub fn resolve_recipient(order: &Order, recipients: &[Recipient]) -> Option<Recipient> {
    let tax_id = normalize_digits(order.tax_id().unwrap_or(""));
    let postal = normalize_digits(&order.postal_code);
    if tax_id.is_empty() || postal.is_empty() {
        return None;
    }

    if let Some(found) = recipients.iter().find(|r| {
        normalize_digits(r.party.tax_id()) == tax_id
            && normalize_digits(&r.address.postal_code) == postal
    }) {
        return Some(found.clone());
    }

    if !order.display_name.trim().is_empty() {
        if let Some(found) = recipients.iter().find(|r| {
            normalize_digits(&r.address.postal_code) == postal
                && names_match(&order.display_name, &r.name)
        }) {
            return Some(found.clone());
        }
    }

    None
}
