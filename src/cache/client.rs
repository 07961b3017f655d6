// src/cache/client.rs
//
// prebid-cache 的批量写入客户端。一次 POST 提交整批素材，返回和输入
// 等长的 id 序列，空串表示该条写入失败。调用方只拿 id，不关心存储细节。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::warn;

use crate::errors::BidderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    Json,
    Xml,
}

/// 单条待缓存素材
#[derive(Debug, Clone, Serialize)]
pub struct Cacheable {
    #[serde(rename = "type")]
    pub payload_type: PayloadType,
    #[serde(rename = "value")]
    pub data: Value,
    #[serde(rename = "ttlseconds", skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    puts: &'a [Cacheable],
}

#[derive(Deserialize)]
struct PutResponse {
    responses: Vec<PutResponseEntry>,
}

#[derive(Deserialize)]
struct PutResponseEntry {
    #[serde(default)]
    uuid: String,
}

pub struct CacheClient {
    client: reqwest::Client,
    endpoint: String,
}

impl CacheClient {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// 整批提交。整体失败返回错误；逐条失败体现在返回序列里的空串上。
    pub async fn put_json(
        &self,
        deadline: Instant,
        payloads: &[Cacheable],
    ) -> Result<Vec<String>, BidderError> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        let body = PutRequest { puts: payloads };
        let send = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send();
        let response = match tokio::time::timeout_at(deadline, send).await {
            Err(_) => {
                return Err(BidderError::Timeout(
                    "Timed out waiting for prebid cache".to_string(),
                ))
            }
            Ok(Err(e)) => {
                return Err(BidderError::Unknown(format!(
                    "Error sending the request to Prebid Cache: {}",
                    e
                )))
            }
            Ok(Ok(response)) => response,
        };
        let status = response.status().as_u16();
        let bytes = match tokio::time::timeout_at(deadline, response.bytes()).await {
            Err(_) => {
                return Err(BidderError::Timeout(
                    "Timed out reading the prebid cache response".to_string(),
                ))
            }
            Ok(Err(e)) => {
                return Err(BidderError::Unknown(format!(
                    "Error reading Prebid Cache response: {}",
                    e
                )))
            }
            Ok(Ok(bytes)) => bytes,
        };
        if status != 200 {
            return Err(BidderError::BadServerResponse(format!(
                "Prebid Cache call returned {}",
                status
            )));
        }
        Ok(parse_put_response(&bytes, payloads.len()))
    }
}

/// 把缓存服务的响应体解析成 id 序列，长度始终等于提交条数。
fn parse_put_response(body: &[u8], expected: usize) -> Vec<String> {
    let parsed: PutResponse = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("failed to parse prebid cache response: {}", e);
            return vec![String::new(); expected];
        }
    };
    let mut ids: Vec<String> = parsed
        .responses
        .into_iter()
        .map(|entry| entry.uuid)
        .collect();
    if ids.len() != expected {
        warn!(
            got = ids.len(),
            expected, "prebid cache returned an unexpected number of ids"
        );
        ids.resize(expected, String::new());
    }
    ids
}
