// src/currency/converter.rs

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::time::Duration;
use tracing::{info, warn};

use super::rates::Rates;

/// **汇率转换器**：持有一份不可变汇率表的共享快照，后台任务定期拉取
/// 远端 JSON 并整表原子替换。读方拿到的永远是一致的快照。
pub struct RateConverter {
    client: Client,
    sync_url: String,
    rates: RwLock<Arc<Rates>>,
    last_updated: RwLock<Option<DateTime<Utc>>>,
}

impl RateConverter {
    pub fn new(client: Client, sync_url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            client,
            sync_url: sync_url.into(),
            rates: RwLock::new(Arc::new(Rates::default())),
            last_updated: RwLock::new(None),
        })
    }

    /// 当前快照。克隆 Arc，调用方在整场竞价里使用同一份表。
    pub fn rates(&self) -> Arc<Rates> {
        self.rates.read().unwrap().clone()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.last_updated.read().unwrap()
    }

    /// 用一份远端响应体更新汇率表。解析失败保留旧表。
    pub fn apply_payload(&self, payload: &[u8]) -> Result<(), serde_json::Error> {
        let parsed: Rates = serde_json::from_slice(payload)?;
        *self.rates.write().unwrap() = Arc::new(parsed);
        *self.last_updated.write().unwrap() = Some(Utc::now());
        Ok(())
    }

    /// 拉取一次远端汇率文件并替换快照。
    pub async fn refresh(&self) -> Result<(), String> {
        let response = self
            .client
            .get(&self.sync_url)
            .send()
            .await
            .map_err(|e| format!("currency rates fetch failed: {}", e))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| format!("currency rates body read failed: {}", e))?;
        self.apply_payload(&body)
            .map_err(|e| format!("currency rates parse failed: {}", e))?;
        info!(url = %self.sync_url, "currency rates refreshed");
        Ok(())
    }

    /// 启动定期刷新任务。失败只告警，旧表继续用。
    pub fn spawn_refresh_loop(self: &Arc<Self>, every: Duration) {
        let converter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = converter.refresh().await {
                    warn!("{}", e);
                }
            }
        });
    }
}
