//! Order source client. Orders are read-only from this system's point of
//! view: fetched, annotated in memory, never created or deleted.

use crate::model::Order;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;

#[async_trait]
pub trait OrderSource: Send + Sync {
    async fn fetch_orders(&self) -> Result<Vec<Order>>;
}

#[derive(Debug, Clone)]
pub struct OrderClient {
    http: Client,
    base_url: Url,
}

impl OrderClient {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("nf-console/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()
            .expect("reqwest client");
        Self { http, base_url }
    }
}

#[async_trait]
impl OrderSource for OrderClient {
    async fn fetch_orders(&self) -> Result<Vec<Order>> {
        let res = self
            .http
            .get(self.base_url.clone())
            .send()
            .await
            .context("failed to reach order source")?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "order source error {}: {}",
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }
        res.json::<Vec<Order>>()
            .await
            .context("invalid order source response JSON")
    }
}
