use nf_console::model::{AnnotatedOrder, Order};
use nf_console::session::{self, EditOverlay, OrderCache, SessionStore, EDIT_DEVICE};
use serde_json::json;

fn annotated(id: &str) -> AnnotatedOrder {
    AnnotatedOrder {
        order: Order {
            id: id.into(),
            customer_ref: format!("cust-{id}"),
            cpf: Some("123.456.789-00".into()),
            cnpj: None,
            postal_code: "01234-567".into(),
            display_name: "João da Silva".into(),
            device: "Tracker X1".into(),
            device_quantity: 2,
            harness: None,
            accessories: Some("antenna".into()),
            shipping_note: None,
        },
        recipient: None,
        has_recipient: false,
    }
}

async fn setup_store() -> SessionStore {
    let pool = session::init_pool("sqlite::memory:").await.unwrap();
    SessionStore::new(pool)
}

#[tokio::test]
async fn order_cache_roundtrip_and_invalidate() {
    let cache = OrderCache::new(setup_store().await);
    assert!(cache.load().await.unwrap().is_none());

    let list = vec![annotated("A"), annotated("B")];
    cache.store(&list).await.unwrap();

    let loaded = cache.load().await.unwrap().unwrap();
    assert_eq!(loaded, list);

    cache.invalidate().await.unwrap();
    assert!(cache.load().await.unwrap().is_none());
}

#[tokio::test]
async fn cache_and_overlay_do_not_interfere() {
    let store = setup_store().await;
    let cache = OrderCache::new(store.clone());
    let overlay = EditOverlay::new(store);

    cache.store(&[annotated("A")]).await.unwrap();
    overlay
        .set_edit("A", EDIT_DEVICE, json!("Tracker X2"))
        .await
        .unwrap();

    // Clearing the overlay leaves the cached list alone, and vice versa.
    overlay.clear(&["A".to_string()]).await.unwrap();
    assert!(cache.load().await.unwrap().is_some());

    overlay
        .set_edit("A", EDIT_DEVICE, json!("Tracker X3"))
        .await
        .unwrap();
    cache.invalidate().await.unwrap();
    let edits = overlay.edits_for("A").await.unwrap();
    assert_eq!(edits.get(EDIT_DEVICE), Some(&json!("Tracker X3")));
}

#[tokio::test]
async fn overlay_persists_across_store_handles() {
    let pool = session::init_pool("sqlite::memory:").await.unwrap();
    let first = EditOverlay::new(SessionStore::new(pool.clone()));
    first
        .set_edit("X", EDIT_DEVICE, json!("Tracker X2"))
        .await
        .unwrap();

    // A second handle over the same pool sees the same session state.
    let second = EditOverlay::new(SessionStore::new(pool));
    let edits = second.edits_for("X").await.unwrap();
    assert_eq!(edits.get(EDIT_DEVICE), Some(&json!("Tracker X2")));
}
