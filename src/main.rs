use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nf_console::authority::{AuthorityClient, InvoiceAuthority};
use nf_console::config;
use nf_console::directory::{DirectoryClient, RecipientDirectory};
use nf_console::emit::Emitter;
use nf_console::model::{AnnotatedOrder, Address, EmissionResult, Party, RecipientDraft};
use nf_console::orders::{OrderClient, OrderSource};
use nf_console::reconcile::reconcile_orders;
use nf_console::session::{self, EditOverlay, OrderCache, SessionStore};
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List pending orders with their reconciliation status
    Orders {
        /// Invalidate the session cache and refetch before listing
        #[arg(long)]
        refresh: bool,
    },
    /// Manage registered recipients
    Recipients {
        #[command(subcommand)]
        action: RecipientAction,
    },
    /// Record an unsaved field edit for an order
    Edit {
        order_id: String,
        /// Overlay field name ("device" or "deviceQuantity")
        field: String,
        value: String,
    },
    /// Issue invoices for the given orders, in the given sequence
    Emit { order_ids: Vec<String> },
    /// List previously issued notes
    History,
    /// Download the PDF of an issued note
    Pdf {
        event_id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum RecipientAction {
    List,
    /// Server-side filtered lookup by tax id + postal code, or by name
    Find {
        #[arg(long)]
        tax_id: Option<String>,
        #[arg(long)]
        postal_code: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    Create {
        #[command(flatten)]
        fields: RecipientFields,
    },
    /// Replace a registered recipient's record
    Update {
        id: String,
        #[command(flatten)]
        fields: RecipientFields,
    },
    /// Patch individual fields of a registered recipient
    Patch {
        id: String,
        /// field=value pairs, e.g. phone=11999990000
        #[arg(required = true)]
        fields: Vec<String>,
    },
    Delete {
        id: String,
    },
}

#[derive(Debug, clap::Args)]
struct RecipientFields {
    #[arg(long)]
    name: String,
    #[arg(long, conflicts_with_all = ["cnpj", "state_registration", "ie_indicator"])]
    cpf: Option<String>,
    #[arg(long, requires = "state_registration")]
    cnpj: Option<String>,
    #[arg(long)]
    state_registration: Option<String>,
    #[arg(long)]
    ie_indicator: Option<String>,
    #[arg(long)]
    street: String,
    #[arg(long)]
    number: String,
    #[arg(long)]
    complement: Option<String>,
    #[arg(long)]
    neighborhood: String,
    #[arg(long)]
    city: String,
    #[arg(long)]
    state: String,
    #[arg(long)]
    postal_code: String,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    email: Option<String>,
}

impl RecipientFields {
    fn into_draft(self) -> Result<RecipientDraft> {
        let party = match (self.cpf, self.cnpj) {
            (Some(cpf), None) => Party::Individual { cpf },
            (None, Some(cnpj)) => Party::Organization {
                cnpj,
                state_registration: self.state_registration.unwrap_or_default(),
                ie_indicator: self.ie_indicator.unwrap_or_default(),
            },
            _ => anyhow::bail!("pass exactly one of --cpf or --cnpj"),
        };
        Ok(RecipientDraft {
            name: self.name,
            party,
            address: Address {
                street: self.street,
                number: self.number,
                complement: self.complement,
                neighborhood: self.neighborhood,
                city: self.city,
                state: self.state,
                postal_code: self.postal_code,
            },
            phone: self.phone,
            mobile: None,
            email: self.email,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("SESSION_DB_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/session.db", cfg.app.data_dir));
    let pool = session::init_pool(&database_url).await?;
    let store = SessionStore::new(pool);
    let cache = OrderCache::new(store.clone());
    let overlay = EditOverlay::new(store);

    let timeout = Duration::from_secs(cfg.app.http_timeout_secs);
    let orders_url =
        Url::parse(&cfg.services.orders.base_url).context("invalid orders base URL")?;
    let directory_url =
        Url::parse(&cfg.services.directory.base_url).context("invalid directory base URL")?;
    let authority_url =
        Url::parse(&cfg.services.authority.base_url).context("invalid authority base URL")?;

    let order_source = OrderClient::new(orders_url, timeout);
    let directory = DirectoryClient::new(directory_url, timeout);
    let authority = AuthorityClient::new(authority_url, timeout);

    match args.command {
        Command::Orders { refresh } => {
            let annotated =
                load_annotated(&cache, &order_source, &directory, refresh).await?;
            print_orders(&annotated);
            // Filled by the reconciliation fetch; empty on a cache hit.
            let known = directory.mirror().await;
            if !known.is_empty() {
                info!(recipients = known.len(), "recipient directory snapshot");
            }
        }
        Command::Recipients { action } => match action {
            RecipientAction::List => {
                for recipient in directory.list().await? {
                    println!(
                        "{}  {}  {}  {}",
                        recipient.id,
                        recipient.party.kind_str(),
                        recipient.party.tax_id(),
                        recipient.name
                    );
                }
            }
            RecipientAction::Find {
                tax_id,
                postal_code,
                name,
            } => {
                let found = directory
                    .find(tax_id.as_deref(), postal_code.as_deref(), name.as_deref())
                    .await?;
                for recipient in found {
                    println!(
                        "{}  {}  {}  {}",
                        recipient.id,
                        recipient.party.kind_str(),
                        recipient.party.tax_id(),
                        recipient.name
                    );
                }
            }
            RecipientAction::Create { fields } => {
                let created = directory.create(&fields.into_draft()?).await?;
                println!("created recipient {}", created.id);
            }
            RecipientAction::Update { id, fields } => {
                let updated = directory.update(&id, &fields.into_draft()?).await?;
                println!("updated recipient {}", updated.id);
            }
            RecipientAction::Patch { id, fields } => {
                let mut patch = serde_json::Map::new();
                for pair in fields {
                    let (key, value) = pair
                        .split_once('=')
                        .with_context(|| format!("expected field=value, got {pair:?}"))?;
                    patch.insert(key.to_string(), serde_json::json!(value));
                }
                let updated = directory.partial_update(&id, &patch).await?;
                println!("updated recipient {}", updated.id);
            }
            RecipientAction::Delete { id } => {
                directory.delete(&id).await?;
                println!("deleted recipient {id}");
            }
        },
        Command::Edit {
            order_id,
            field,
            value,
        } => {
            // Quantities are stored as numbers so they override the order's
            // numeric field; everything else is stored verbatim.
            let value = match value.parse::<u64>() {
                Ok(number) => serde_json::json!(number),
                Err(_) => serde_json::json!(value),
            };
            overlay.set_edit(&order_id, &field, value).await?;
            println!("recorded edit for order {order_id}");
        }
        Command::Emit { order_ids } => {
            if order_ids.is_empty() {
                anyhow::bail!("pass at least one order id");
            }
            let annotated =
                load_annotated(&cache, &order_source, &directory, false).await?;
            let emitter = Emitter::new(Arc::new(authority), overlay);
            let report = emitter.emit_batch(&order_ids, &annotated).await?;
            println!("batch {}", report.batch_id);
            for result in &report.results {
                match result {
                    EmissionResult::Issued {
                        order_id,
                        number,
                        access_key,
                        ..
                    } => println!("  {order_id}: issued #{number} key {access_key}"),
                    EmissionResult::Failed { order_id, error } => {
                        println!("  {order_id}: FAILED ({error})")
                    }
                }
            }
            // The reconciliation annotations may be stale after an emission.
            cache.invalidate().await?;
        }
        Command::History => {
            for note in authority.history().await? {
                println!(
                    "#{:06}  {}  {}  {}",
                    note.number,
                    note.issued_at.format("%Y-%m-%d %H:%M"),
                    note.recipient_name,
                    note.access_key
                );
            }
        }
        Command::Pdf { event_id, out } => {
            let document = authority.fetch_pdf(&event_id).await?;
            let bytes = document.decode()?;
            let path = out.unwrap_or_else(|| PathBuf::from(format!("NF-{event_id}.pdf")));
            tokio::fs::write(&path, bytes).await?;
            info!(path = %path.display(), mime = %document.mime_type, "wrote PDF");
            println!("wrote {}", path.display());
        }
    }

    Ok(())
}

/// Serve the annotated list from the session cache when present; otherwise
/// fetch, reconcile, and cache it.
async fn load_annotated(
    cache: &OrderCache,
    source: &dyn OrderSource,
    directory: &dyn RecipientDirectory,
    refresh: bool,
) -> Result<Vec<AnnotatedOrder>> {
    if refresh {
        cache.invalidate().await?;
    }
    if let Some(cached) = cache.load().await? {
        return Ok(cached);
    }
    let orders = source.fetch_orders().await?;
    let annotated = reconcile_orders(orders, directory).await;
    cache.store(&annotated).await?;
    Ok(annotated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn recipient_update_parses_into_a_draft() {
        let args = Args::try_parse_from([
            "nf-console",
            "recipients",
            "update",
            "r1",
            "--name",
            "Acme Comercio",
            "--cnpj",
            "12345678000100",
            "--state-registration",
            "1234567",
            "--ie-indicator",
            "1",
            "--street",
            "Rua A",
            "--number",
            "1",
            "--neighborhood",
            "Centro",
            "--city",
            "Sao Paulo",
            "--state",
            "SP",
            "--postal-code",
            "01234-567",
        ])
        .unwrap();
        match args.command {
            Command::Recipients {
                action: RecipientAction::Update { id, fields },
            } => {
                assert_eq!(id, "r1");
                let draft = fields.into_draft().unwrap();
                assert_eq!(draft.name, "Acme Comercio");
                assert!(matches!(draft.party, Party::Organization { .. }));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn recipient_find_parses_filters() {
        let args = Args::try_parse_from([
            "nf-console",
            "recipients",
            "find",
            "--tax-id",
            "12345678900",
            "--postal-code",
            "01234567",
        ])
        .unwrap();
        match args.command {
            Command::Recipients {
                action:
                    RecipientAction::Find {
                        tax_id,
                        postal_code,
                        name,
                    },
            } => {
                assert_eq!(tax_id.as_deref(), Some("12345678900"));
                assert_eq!(postal_code.as_deref(), Some("01234567"));
                assert!(name.is_none());
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }
}

fn print_orders(annotated: &[AnnotatedOrder]) {
    println!("{} pending order(s)", annotated.len());
    for entry in annotated {
        let marker = if entry.has_recipient { "ok" } else { "--" };
        let recipient = entry
            .recipient
            .as_ref()
            .map(|r| r.name.as_str())
            .unwrap_or("(no recipient)");
        println!(
            "[{marker}] {}  {}x {}  {}",
            entry.order.id, entry.order.device_quantity, entry.order.device, recipient
        );
    }
}
