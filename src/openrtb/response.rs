use serde::{Deserialize, Serialize};
use serde_json::Value;

/// OpenRTB `nbr`：请求合法但没有任何 seat 产生出价
pub const NBR_INVALID_REQUEST: i32 = 2;

/// **OpenRTB Bid Response**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BidResponse {
    pub id: String,                    // 等于请求 ID
    pub seatbid: Vec<SeatBid>,         // 每个产生有效出价的 bidder 一个席位
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cur: Option<String>,           // 响应货币
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customdata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbr: Option<i32>,              // 不出价原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,            // 每 bidder 的错误/耗时与 debug 块
}

/// **SeatBid（单个买方席位的出价集合）**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SeatBid {
    pub bid: Vec<Bid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seat: Option<String>,          // 席位名 = bidder 名
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<i32>,            // 0 = 可独立成交
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
}

/// **Bid（单个出价）**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Bid {
    pub id: String,                    // 出价 ID
    pub impid: String,                 // 对应的 Impression ID
    pub price: f64,                    // CPM 出价
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nurl: Option<String>,          // 获胜通知 URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adm: Option<String>,           // 广告素材（HTML / VAST XML / 原生 JSON）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adomain: Option<Vec<String>>,  // 广告主域名
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,           // campaign ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crid: Option<String>,          // 创意 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cat: Option<Vec<String>>,      // IAB 内容分类
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dealid: Option<String>,        // 私有交易 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<u64>,                // 素材宽度（像素）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<u64>,                // 素材高度（像素）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,            // bidder 私有扩展，最终并入 ext.bidder
}
