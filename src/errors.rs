// src/errors.rs

use thiserror::Error;

/// 竞价链路中按 bidder 收集的错误分类。
///
/// `code()` 是对外稳定的数字标识，出现在响应扩展 `ext.errors` 和指标里，
/// 不随错误文案变化。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BidderError {
    /// 截止时间先于 HTTP 响应到达
    #[error("{0}")]
    Timeout(String),
    /// 请求或 adapter 参数不可用
    #[error("{0}")]
    BadInput(String),
    /// 对端返回了意外的状态码或响应体
    #[error("{0}")]
    BadServerResponse(String),
    /// adapter 既没有产生请求也没有给出原因
    #[error("{0}")]
    FailedToRequestBids(String),
    /// ad-cert 验签未通过
    #[error("failed ECDSA signature validation")]
    InvalidSignature,
    #[error("{0}")]
    Unknown(String),
}

impl BidderError {
    pub fn code(&self) -> i32 {
        match self {
            BidderError::Timeout(_) => 1,
            BidderError::BadInput(_) => 2,
            BidderError::BadServerResponse(_) => 3,
            BidderError::FailedToRequestBids(_) => 4,
            BidderError::InvalidSignature => 5,
            BidderError::Unknown(_) => 999,
        }
    }
}

/// 终止整个竞价的请求级错误（区别于 bidder 级错误，后者只影响单个 seat）。
#[derive(Error, Debug)]
pub enum AuctionError {
    #[error("Error decoding Request.ext : {0}")]
    RequestExt(String),
    #[error("Error in category mapping : {0}")]
    CategoryMapping(String),
}

/// 汇率查询错误。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CurrencyError {
    #[error("currency: {0} is not a recognized ISO-4217 code")]
    UnknownIso(String),
    #[error("Currency conversion rate not found: '{from}' => '{to}'")]
    RateNotFound { from: String, to: String },
    #[error("Constant rates doesn't proceed to any conversions, cannot convert '{from}' => '{to}'")]
    ConstantRates { from: String, to: String },
}

impl From<CurrencyError> for BidderError {
    fn from(err: CurrencyError) -> Self {
        BidderError::Unknown(err.to_string())
    }
}

impl From<AdCertError> for BidderError {
    fn from(err: AdCertError) -> Self {
        match err {
            AdCertError::InvalidSignature => BidderError::InvalidSignature,
            other => BidderError::Unknown(other.to_string()),
        }
    }
}

/// ad-cert 签名相关错误。验签失败与 DER 解码失败是两种不同的结果。
#[derive(Error, Debug)]
pub enum AdCertError {
    #[error("failed ECDSA signature validation")]
    InvalidSignature,
    #[error("malformed DER signature: {0}")]
    Der(String),
    #[error("signing failed: {0}")]
    Sign(String),
    #[error("key material: {0}")]
    Key(String),
}

/// 类目映射错误，单个 bid 被丢弃时返回。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CategoryError {
    #[error("Category mapping data for primary ad server: '{server}', publisher: '{publisher}' not found")]
    MissingMapping { server: String, publisher: String },
    #[error("Unable to find category for: '{iab_category}'")]
    Unmapped { iab_category: String },
}
