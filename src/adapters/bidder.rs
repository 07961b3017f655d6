// src/adapters/bidder.rs
//
// 需求方接入的最小契约。adapter 只做两件纯转换：把竞价请求翻译成若干
// 外发 HTTP 请求，再把 HTTP 响应解析成带媒体类型的出价。所有 I/O、
// 超时、汇率换算都由 exchange 侧的 runner 负责，adapter 代码不碰网络。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::BidderError;
use crate::openrtb::ext::{BidType, ExtBidPrebidVideo};
use crate::openrtb::request::BidRequest;
use crate::openrtb::response::Bid;

/// bidder 名，同时充当响应 seat 名与 `ext.errors` 的键
pub type BidderName = String;

/// 一次外发 HTTP 请求所需的全部字段
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequestData {
    pub method: String,
    pub uri: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

/// 外发 HTTP 请求拿回的响应
#[derive(Debug, Clone, Default)]
pub struct ResponseData {
    pub status_code: u16,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

/// 带媒体类型标签的出价。`bid.ext` 会成为响应里的 `ext.bidder`，
/// `bid_type` 成为 `ext.prebid.type`；`bid_targets` 由 exchange 在
/// 定向阶段填充，adapter 不需要管。
#[derive(Debug, Clone)]
pub struct TypedBid {
    pub bid: Bid,
    pub bid_type: BidType,
    pub bid_video: Option<ExtBidPrebidVideo>,
    pub bid_targets: HashMap<String, String>,
}

impl TypedBid {
    pub fn new(bid: Bid, bid_type: BidType) -> Self {
        Self {
            bid,
            bid_type,
            bid_video: None,
            bid_targets: HashMap::new(),
        }
    }
}

/// 一次 HTTP 响应解出的出价集合。货币对整批出价生效，未声明按 USD。
#[derive(Debug, Clone)]
pub struct BidderResponse {
    pub currency: String,
    pub bids: Vec<TypedBid>,
}

impl BidderResponse {
    pub fn new() -> Self {
        Self {
            currency: crate::currency::rates::DEFAULT_CURRENCY.to_string(),
            bids: Vec::new(),
        }
    }
}

impl Default for BidderResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// **需求方 adapter 契约**
///
/// 两个方法都是纯函数；返回的错误描述的是"这个 bidder 的出价为什么会
/// 缺斤短两"，比如不支持的媒体类型、响应格式不对。错误最终原样出现在
/// 响应扩展里，写给发布方看。
pub trait Bidder: Send + Sync {
    fn name(&self) -> &str;

    /// 把竞价请求翻译成要发出的 HTTP 请求。允许零个请求，但那种情况
    /// 必须同时给出原因。
    fn make_requests(&self, request: &BidRequest) -> (Vec<RequestData>, Vec<BidderError>);

    /// 把一次 HTTP 响应解析成出价。`None` 表示这次响应没有可用出价。
    fn make_bids(
        &self,
        request: &BidRequest,
        outgoing: &RequestData,
        response: &ResponseData,
    ) -> (Option<BidderResponse>, Vec<BidderError>);
}
