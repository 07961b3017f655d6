use serde::{Deserialize, Serialize};
use serde_json::Value;

/// **Top-level OpenRTB Bid Request**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BidRequest {
    pub id: String,                 // 请求 ID，每个竞价请求唯一
    pub imp: Vec<Imp>,              // 广告展示请求（Impression）列表
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<Site>,         // 网站信息（如果请求来源是 Web）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<App>,           // 应用信息（如果请求来源是 App）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,     // 设备信息（用户的浏览器、IP、设备 ID）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,         // 用户信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<i32>,          // 是否是测试请求（1 = 测试模式，响应携带 debug 信息）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<i32>,            // 竞价模式（1 = 第一价格拍卖, 2 = 第二价格拍卖）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmax: Option<u64>,          // 竞价超时时间（毫秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wseat: Option<Vec<String>>, // 允许的买方席位列表
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cur: Option<Vec<String>>,   // 允许的货币（ISO-4217，按优先级排序）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bcat: Option<Vec<String>>,  // 屏蔽的广告类别（IAB 分类）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badv: Option<Vec<String>>,  // 屏蔽的广告主域名
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,     // 竞价请求来源信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regs: Option<Regs>,         // 隐私法规信息（如 GDPR、CCPA）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,         // 请求级扩展（定向、缓存、出价调整等指令）
    /// 发布方证书版本，签名后随外发请求一起下发
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcv: Option<String>,
    /// 发布方签名（DER 编码的 ECDSA 签名，base64）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ps: Option<String>,
}

/// **Impression（广告展示请求）**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Imp {
    pub id: String,                  // 展示请求 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<Banner>,      // Banner 广告信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<Video>,        // 视频广告信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Audio>,        // 音频广告信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native: Option<Native>,      // 原生广告信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tagid: Option<String>,       // 该 Impression 在卖方系统中的标识符
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidfloor: Option<f64>,       // 最低竞价
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidfloorcur: Option<String>, // 最低竞价的货币类型（如 USD, EUR）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<i32>,         // 是否要求 HTTPS 素材（1 = 是）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,          // 各 bidder 的参数挂在这里，按 bidder 名分键
}

/// **Banner（横幅广告）**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Banner {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<i32>,              // Banner 宽度（像素）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<i32>,              // Banner 高度（像素）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Vec<Format>>, // 允许的广告格式（多个尺寸）
}

/// **Video（视频广告）**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Video {
    pub mimes: Vec<String>,          // 支持的视频格式（如 video/mp4）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minduration: Option<i32>,    // 最短持续时间（秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxduration: Option<i32>,    // 最长持续时间（秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocols: Option<Vec<i32>>, // 支持的视频协议（如 VAST）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<i32>,              // 视频宽度（像素）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<i32>,              // 视频高度（像素）
}

/// **Audio（音频广告）**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Audio {
    pub mimes: Vec<String>,          // 支持的音频格式（如 audio/mp3）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minduration: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxduration: Option<i32>,
}

/// **Native（原生广告）**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Native {
    pub request: String, // 原生广告请求 JSON
}

/// **Format（Banner 格式）**
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Format {
    pub w: i32, // 宽度（像素）
    pub h: i32, // 高度（像素）
}

/// **网站信息**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Site {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,        // 网站域名，参与 ad-cert 签名
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Publisher>,
}

/// **App 信息**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct App {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,        // 应用包名，参与 ad-cert 签名
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<Publisher>,
}

/// **发布方信息**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Publisher {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// **设备信息**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Device {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ua: Option<String>,   // 用户代理（User-Agent）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,   // 设备 IPv4 地址
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>, // 设备 IPv6 地址
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ifa: Option<String>,  // 广告标识符（IDFA/GAID）
}

/// **用户信息**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyeruid: Option<String>,
}

/// **Source（请求来源）**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fd: Option<i32>,     // 是否来自上游交易方（1 = 是, 0 = 否）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>, // 交易 ID
}

/// **Regs（隐私法规）**
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Regs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coppa: Option<i32>, // COPPA（儿童隐私保护）(1 = 是, 0 = 否)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gdpr: Option<i32>,  // GDPR 适用性（1 = 是, 0 = 否）
}

impl BidRequest {
    /// 请求是否处于测试模式（test = 1 时响应携带 debug 块）
    pub fn is_test(&self) -> bool {
        self.test == Some(1)
    }
}
