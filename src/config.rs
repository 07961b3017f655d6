// src/config.rs

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tokio::time::Duration;

use crate::openrtb::ext::BidType;

/// **全局配置**，从 JSON 文件加载；每个字段都有可用的缺省值。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub gdpr: GdprConfig,
    #[serde(default)]
    pub currency: CurrencyConfig,
    #[serde(default)]
    pub adcert: Option<AdCertConfig>,
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,
    #[serde(default)]
    pub categories: CategoriesConfig,
}

impl Configuration {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("read config {}: {}", path.as_ref().display(), e))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("parse config {}: {}", path.as_ref().display(), e))
    }

    /// 按配置组装外发 HTTP 客户端的连接池。
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .pool_max_idle_per_host(self.http.max_conns_per_host)
            .pool_idle_timeout(Duration::from_secs(self.http.idle_conn_timeout_secs))
            .build()
    }
}

/// prebid-cache 端点与时间预算
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub url: String,
    /// 缓存写入的预期耗时（毫秒），开启缓存时从竞价时间里扣掉
    #[serde(default = "default_expected_time_millis")]
    pub expected_time_millis: u64,
    #[serde(default)]
    pub default_ttls: DefaultTtls,
}

fn default_expected_time_millis() -> u64 {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            expected_time_millis: default_expected_time_millis(),
            default_ttls: DefaultTtls::default(),
        }
    }
}

/// 按媒体类型的缓存 TTL 缺省值（秒），0 表示不带 TTL
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultTtls {
    #[serde(default)]
    pub banner: u64,
    #[serde(default)]
    pub video: u64,
    #[serde(default)]
    pub native: u64,
    #[serde(default)]
    pub audio: u64,
}

impl DefaultTtls {
    pub fn for_type(&self, bid_type: BidType) -> Option<u64> {
        let ttl = match bid_type {
            BidType::Banner => self.banner,
            BidType::Video => self.video,
            BidType::Native => self.native,
            BidType::Audio => self.audio,
        };
        (ttl > 0).then_some(ttl)
    }
}

/// 外发连接池参数
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_max_conns")]
    pub max_conns: usize,
    #[serde(default = "default_max_conns_per_host")]
    pub max_conns_per_host: usize,
    #[serde(default = "default_idle_conn_timeout_secs")]
    pub idle_conn_timeout_secs: u64,
}

fn default_max_conns() -> usize {
    50
}

fn default_max_conns_per_host() -> usize {
    10
}

fn default_idle_conn_timeout_secs() -> u64 {
    60
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_conns: default_max_conns(),
            max_conns_per_host: default_max_conns_per_host(),
            idle_conn_timeout_secs: default_idle_conn_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GdprConfig {
    /// 同意信号不明确时是否照常做用户同步，原样透传给下游策略
    #[serde(default)]
    pub usersync_if_ambiguous: bool,
}

/// 汇率源配置
#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyConfig {
    /// 不配置就不起刷新任务，竞价退化成只认同币种
    #[serde(default)]
    pub sync_url: Option<String>,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

fn default_refresh_interval_secs() -> u64 {
    1800
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            sync_url: None,
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

/// ad-cert 签名配置；配置了就必须能加载密钥，否则启动失败
#[derive(Debug, Clone, Deserialize)]
pub struct AdCertConfig {
    pub pcv: String,
    pub private_key: String,
    pub public_key: String,
}

/// 单个 bidder 的接入配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdapterConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub usersync_url: Option<String>,
    #[serde(default)]
    pub platform_id: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// 类目映射文件目录
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoriesConfig {
    #[serde(default)]
    pub dir: Option<String>,
}
