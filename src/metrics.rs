// src/metrics.rs

use std::time::Duration;

use tracing::debug;

use crate::openrtb::ext::BidType;

/// 指标接口。竞价路径只往这里打事件，落到哪个后端由实现决定。
/// 方法都有空缺省实现，测试里只需覆盖关心的事件。
pub trait Metrics: Send + Sync {
    fn record_adapter_request(&self, _bidder: &str) {}
    fn record_adapter_time(&self, _bidder: &str, _elapsed: Duration) {}
    fn record_adapter_panic(&self, _bidder: &str) {}
    fn record_adapter_error(&self, _bidder: &str, _code: i32) {}
    fn record_adapter_price(&self, _bidder: &str, _cpm: f64) {}
    fn record_adapter_bid_received(&self, _bidder: &str, _bid_type: BidType, _has_adm: bool) {}
}

/// 以结构化日志形式输出的指标实现。
pub struct TracingMetrics;

impl Metrics for TracingMetrics {
    fn record_adapter_request(&self, bidder: &str) {
        debug!(target: "metrics", bidder, event = "adapter_request");
    }

    fn record_adapter_time(&self, bidder: &str, elapsed: Duration) {
        debug!(target: "metrics", bidder, elapsed_ms = elapsed.as_millis() as u64, event = "adapter_time");
    }

    fn record_adapter_panic(&self, bidder: &str) {
        debug!(target: "metrics", bidder, event = "adapter_panic");
    }

    fn record_adapter_error(&self, bidder: &str, code: i32) {
        debug!(target: "metrics", bidder, code, event = "adapter_error");
    }

    fn record_adapter_price(&self, bidder: &str, cpm: f64) {
        debug!(target: "metrics", bidder, cpm, event = "adapter_price");
    }

    fn record_adapter_bid_received(&self, bidder: &str, bid_type: BidType, has_adm: bool) {
        debug!(target: "metrics", bidder, bid_type = bid_type.as_str(), has_adm, event = "adapter_bid_received");
    }
}
