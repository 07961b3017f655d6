// src/openrtb/ext.rs
//
// 请求/响应里 `ext` 块的类型化表示：定向、缓存、出价调整等发布方指令，
// 以及响应侧的错误、耗时与 debug 结构。

use std::collections::HashMap;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// **请求级扩展**（`request.ext`）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtRequest {
    #[serde(default)]
    pub prebid: ExtRequestPrebid,
}

/// `request.ext.prebid`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtRequestPrebid {
    #[serde(default)]
    pub aliases: HashMap<String, String>, // 别名 -> 核心 bidder 名
    #[serde(default)]
    pub bidadjustmentfactors: HashMap<String, f64>, // bidder -> 价格调整系数
    #[serde(default)]
    pub cache: Option<ExtRequestPrebidCache>,
    #[serde(default)]
    pub targeting: Option<ExtRequestTargeting>,
}

/// `request.ext.prebid.cache`，`bids` 与 `vastxml` 至少要有一个
#[derive(Debug, Clone)]
pub struct ExtRequestPrebidCache {
    pub bids: Option<ExtRequestPrebidCacheBids>,
    pub vastxml: Option<ExtRequestPrebidCacheVast>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtRequestPrebidCacheBids {}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtRequestPrebidCacheVast {}

impl<'de> Deserialize<'de> for ExtRequestPrebidCache {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            bids: Option<ExtRequestPrebidCacheBids>,
            #[serde(default)]
            vastxml: Option<ExtRequestPrebidCacheVast>,
        }
        let raw = Raw::deserialize(deserializer)?;
        if raw.bids.is_none() && raw.vastxml.is_none() {
            return Err(D::Error::custom(
                r#"request.ext.prebid.cache requires one of the "bids" or "vastxml" properties"#,
            ));
        }
        Ok(ExtRequestPrebidCache {
            bids: raw.bids,
            vastxml: raw.vastxml,
        })
    }
}

/// `request.ext.prebid.targeting`
#[derive(Debug, Clone, Deserialize)]
pub struct ExtRequestTargeting {
    #[serde(default = "PriceGranularity::medium")]
    pub pricegranularity: PriceGranularity,
    #[serde(default = "default_true")]
    pub includewinners: bool,
    #[serde(default = "default_true")]
    pub includebidderkeys: bool,
    #[serde(default)]
    pub includebrandcategory: Option<ExtIncludeBrandCategory>,
    #[serde(default)]
    pub durationrangesec: Vec<i32>, // 视频时长分桶（秒）
}

fn default_true() -> bool {
    true
}

/// 竞争排他（品牌类目去重）配置；存在即开启
#[derive(Debug, Clone, Deserialize)]
pub struct ExtIncludeBrandCategory {
    pub primaryadserver: i32, // 1 = freewheel, 2 = dfp
    #[serde(default)]
    pub publisher: String,
}

/// **价格粒度**：有序、首尾相接的 `{min, max, increment}` 区间加小数精度。
///
/// 反序列化接受两种形式：预设名（`low|med|medium|high|auto|dense`）或
/// 区间对象。区间校验时每段的 `min` 一律被改写为前一段的 `max`（首段为 0），
/// 用户给出的负数或乱序 min 因此被静默钳位，序列保持连续。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceGranularity {
    pub precision: u32,
    pub ranges: Vec<GranularityRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GranularityRange {
    #[serde(default)]
    pub min: f64,
    pub max: f64,
    pub increment: f64,
}

impl PriceGranularity {
    pub fn from_preset(name: &str) -> Option<Self> {
        let (precision, ranges) = match name {
            "low" => (2, vec![(5.0, 0.5)]),
            "med" | "medium" => (2, vec![(20.0, 0.1)]),
            "high" => (2, vec![(20.0, 0.01)]),
            "auto" => (2, vec![(5.0, 0.05), (10.0, 0.1), (20.0, 0.5)]),
            "dense" => (2, vec![(3.0, 0.01), (8.0, 0.05), (20.0, 0.5)]),
            _ => return None,
        };
        let mut min = 0.0;
        let ranges = ranges
            .into_iter()
            .map(|(max, increment)| {
                let r = GranularityRange {
                    min,
                    max,
                    increment,
                };
                min = max;
                r
            })
            .collect();
        Some(PriceGranularity { precision, ranges })
    }

    pub fn medium() -> Self {
        Self::from_preset("medium").unwrap()
    }

    /// CPM 分桶：取第一个 `max >= cpm` 的区间，向下取整到 increment 的整数倍，
    /// 按 precision 格式化。超出所有区间返回空串（对应的定向键不再输出）。
    pub fn price_bucket(&self, cpm: f64) -> String {
        for range in &self.ranges {
            if cpm <= range.max {
                let rounded = (cpm / range.increment).floor() * range.increment;
                return format!("{:.prec$}", rounded, prec = self.precision as usize);
            }
        }
        String::new()
    }
}

impl<'de> Deserialize<'de> for PriceGranularity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Preset(String),
            Custom {
                #[serde(default = "default_precision")]
                precision: i64,
                ranges: Vec<GranularityRange>,
            },
        }
        fn default_precision() -> i64 {
            2
        }

        match Raw::deserialize(deserializer)? {
            Raw::Preset(name) => PriceGranularity::from_preset(&name).ok_or_else(|| {
                D::Error::custom(format!("Invalid price granularity \"{}\"", name))
            }),
            Raw::Custom {
                precision,
                mut ranges,
            } => {
                if !(0..=15).contains(&precision) {
                    return Err(D::Error::custom(
                        "Price granularity error: precision must be within [0, 15]",
                    ));
                }
                if ranges.is_empty() {
                    return Err(D::Error::custom(
                        "Price granularity error: empty granularity definition supplied",
                    ));
                }
                let mut prev_max = 0.0;
                for range in &mut ranges {
                    if range.max <= prev_max {
                        return Err(D::Error::custom(
                            "Price granularity error: range list must be ordered with increasing max",
                        ));
                    }
                    if range.increment <= 0.0 {
                        return Err(D::Error::custom(
                            "Price granularity error: increment must be a nonzero positive number",
                        ));
                    }
                    range.min = prev_max;
                    prev_max = range.max;
                }
                Ok(PriceGranularity {
                    precision: precision as u32,
                    ranges,
                })
            }
        }
    }
}

/// 媒体类型标签，随每个 bid 进入 `ext.prebid.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BidType {
    Banner,
    Video,
    Audio,
    Native,
}

impl BidType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BidType::Banner => "banner",
            BidType::Video => "video",
            BidType::Audio => "audio",
            BidType::Native => "native",
        }
    }
}

/// 视频出价的附加元数据（类目去重用）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtBidPrebidVideo {
    pub duration: i32, // 秒
    #[serde(default)]
    pub primary_category: String,
}

/// `response.seatbid[].bid[].ext`
#[derive(Debug, Clone, Serialize)]
pub struct ExtBid {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bidder: Option<Value>,
    pub prebid: ExtBidPrebid,
}

/// `response.seatbid[].bid[].ext.prebid`
#[derive(Debug, Clone, Serialize)]
pub struct ExtBidPrebid {
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub targeting: HashMap<String, String>,
    #[serde(rename = "type")]
    pub bid_type: BidType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<ExtBidPrebidVideo>,
}

/// `response.seatbid[].ext`
#[derive(Debug, Clone, Serialize)]
pub struct ExtSeatBid {
    pub bidder: Value,
}

/// **响应级扩展**（`response.ext`）
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtBidResponse {
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub errors: HashMap<String, Vec<ExtBidderError>>,
    pub responsetimemillis: HashMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmaxrequest: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<ExtResponseDebug>,
}

/// 单条 bidder 级错误，code 与 `errors::BidderError::code` 一致
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExtBidderError {
    pub code: i32,
    pub message: String,
}

/// test = 1 时的 debug 块
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtResponseDebug {
    pub httpcalls: HashMap<String, Vec<ExtHttpCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolvedrequest: Option<Value>,
}

/// 单次外发 HTTP 调用的调试记录；出错时只保留拿得到的部分
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtHttpCall {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub requestbody: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub responsebody: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse_granularity(json: &str) -> Result<PriceGranularity, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[test]
    fn granularity_presets() {
        let med = PriceGranularity::medium();
        assert_eq!(med.precision, 2);
        assert_eq!(
            med.ranges,
            vec![GranularityRange {
                min: 0.0,
                max: 20.0,
                increment: 0.1
            }]
        );
        assert_eq!(
            PriceGranularity::from_preset("med"),
            PriceGranularity::from_preset("medium")
        );
        let auto = PriceGranularity::from_preset("auto").unwrap();
        assert_eq!(auto.ranges.len(), 3);
        assert_eq!(auto.ranges[1].min, 5.0);
        assert_eq!(auto.ranges[2].min, 10.0);
        assert!(PriceGranularity::from_preset("custom").is_none());
    }

    #[test]
    fn granularity_unmarshal_valid() {
        let cases: Vec<(&str, PriceGranularity)> = vec![
            (
                r#"{"precision": 4, "ranges": [{"min": 0, "max": 5, "increment": 0.1}, {"min": 5, "max":10, "increment":0.5}, {"min":10, "max":20, "increment":1}]}"#,
                PriceGranularity {
                    precision: 4,
                    ranges: vec![
                        GranularityRange { min: 0.0, max: 5.0, increment: 0.1 },
                        GranularityRange { min: 5.0, max: 10.0, increment: 0.5 },
                        GranularityRange { min: 10.0, max: 20.0, increment: 1.0 },
                    ],
                },
            ),
            (
                r#"{"ranges":[{ "max":5, "increment": 0.05}, {"max": 10, "increment": 0.25}, {"max": 20, "increment": 0.5}]}"#,
                PriceGranularity {
                    precision: 2,
                    ranges: vec![
                        GranularityRange { min: 0.0, max: 5.0, increment: 0.05 },
                        GranularityRange { min: 5.0, max: 10.0, increment: 0.25 },
                        GranularityRange { min: 10.0, max: 20.0, increment: 0.5 },
                    ],
                },
            ),
            (r#""medium""#, PriceGranularity::medium()),
            (
                r#"{ "precision": 3, "ranges": [{"max":20, "increment":0.005}]}"#,
                PriceGranularity {
                    precision: 3,
                    ranges: vec![GranularityRange { min: 0.0, max: 20.0, increment: 0.005 }],
                },
            ),
            // min 一律被钳到前一段的 max，负数与乱序照样接受
            (
                r#"{"precision": 2, "ranges": [{"min": 0.5, "max":5, "increment": 0.1}, {"min": 54, "max": 10, "increment": 1}, {"min": -42, "max": 20, "increment": 5}]}"#,
                PriceGranularity {
                    precision: 2,
                    ranges: vec![
                        GranularityRange { min: 0.0, max: 5.0, increment: 0.1 },
                        GranularityRange { min: 5.0, max: 10.0, increment: 1.0 },
                        GranularityRange { min: 10.0, max: 20.0, increment: 5.0 },
                    ],
                },
            ),
        ];
        for (json, expected) in cases {
            let resolved = parse_granularity(json).unwrap_or_else(|e| {
                panic!("failed to unmarshal granularity {}: {}", json, e)
            });
            assert_eq!(resolved, expected, "unmarshal mismatch for {}", json);
        }
    }

    #[test]
    fn granularity_unmarshal_invalid() {
        let cases = vec![
            r#"{}"#,
            r#"[]"#,
            r#"{"precision": -1, "ranges": [{"max":20, "increment":0.5}]}"#,
            r#"{"precision": 16, "ranges": [{"max":20, "increment":0.5}]}"#,
            r#"{"ranges":[{"max":20, "increment": -1}]}"#,
            r#"{"ranges":[{"max":"20", "increment": "0.1"}]}"#,
            r#"{"ranges":[{"max":20, "min":10, "increment": 0.1}, {"max":10, "min":0, "increment":0.05}]}"#,
            r#"{"ranges":[]}"#,
            r#""grandiose""#,
        ];
        for json in cases {
            assert!(
                parse_granularity(json).is_err(),
                "invalid granularity unmarshalled without error: {}",
                json
            );
        }
    }

    #[test]
    fn targeting_defaults() {
        let ext: ExtRequest = serde_json::from_str(
            r#"{"prebid": {"targeting": {}}}"#,
        )
        .unwrap();
        let targeting = ext.prebid.targeting.unwrap();
        assert_eq!(targeting.pricegranularity, PriceGranularity::medium());
        assert!(targeting.includewinners);
        assert!(targeting.includebidderkeys);
        assert!(targeting.includebrandcategory.is_none());
        assert!(targeting.durationrangesec.is_empty());
    }

    #[test]
    fn targeting_absent() {
        let ext: ExtRequest =
            serde_json::from_str(r#"{"prebid": {"non_target": "some junk"}}"#).unwrap();
        assert!(ext.prebid.targeting.is_none());
    }

    #[test]
    fn targeting_preset_string() {
        let ext: ExtRequest = serde_json::from_str(
            r#"{"prebid": {"targeting": {"pricegranularity": "dense"}}}"#,
        )
        .unwrap();
        assert_eq!(
            ext.prebid.targeting.unwrap().pricegranularity,
            PriceGranularity::from_preset("dense").unwrap()
        );
    }

    #[test]
    fn cache_requires_bids_or_vast() {
        assert!(serde_json::from_str::<ExtRequestPrebidCache>(r#"{}"#).is_err());
        assert!(serde_json::from_str::<ExtRequestPrebidCache>(r#"{"bids":null}"#).is_err());
        assert!(serde_json::from_str::<ExtRequestPrebidCache>(r#"{"bids":true}"#).is_err());

        let bids: ExtRequestPrebidCache = serde_json::from_str(r#"{"bids":{}}"#).unwrap();
        assert!(bids.bids.is_some());
        assert!(bids.vastxml.is_none());

        let vast: ExtRequestPrebidCache = serde_json::from_str(r#"{"vastxml":{}}"#).unwrap();
        assert!(vast.bids.is_none());
        assert!(vast.vastxml.is_some());
    }

    #[test]
    fn price_bucket_rounding() {
        let med = PriceGranularity::medium();
        assert_eq!(med.price_bucket(3.87), "3.80");
        assert_eq!(med.price_bucket(21.0), "");

        let low = PriceGranularity::from_preset("low").unwrap();
        assert_eq!(low.price_bucket(1.87), "1.50");

        let auto = PriceGranularity::from_preset("auto").unwrap();
        assert_eq!(auto.price_bucket(12.3), "12.00");

        let coarse = PriceGranularity {
            precision: 0,
            ranges: vec![GranularityRange { min: 0.0, max: 10.0, increment: 2.0 }],
        };
        assert_eq!(coarse.price_bucket(7.9), "6");
    }

    #[test]
    fn price_bucket_boundary_uses_first_matching_range() {
        let pg = PriceGranularity {
            precision: 2,
            ranges: vec![
                GranularityRange { min: 0.0, max: 5.0, increment: 1.0 },
                GranularityRange { min: 5.0, max: 10.0, increment: 5.0 },
            ],
        };
        assert_eq!(pg.price_bucket(5.0), "5.00");
        assert_eq!(pg.price_bucket(6.0), "5.00");
    }

    #[test]
    fn bid_type_wire_format() {
        assert_eq!(serde_json::to_string(&BidType::Video).unwrap(), r#""video""#);
        let t: BidType = serde_json::from_str(r#""native""#).unwrap();
        assert_eq!(t, BidType::Native);
    }

    proptest! {
        // 分桶值永远不会高于原价，且亏损不超过一个 increment
        #[test]
        fn bucket_never_exceeds_price(price in 0.01f64..19.99) {
            let pg = PriceGranularity {
                precision: 2,
                ranges: vec![GranularityRange { min: 0.0, max: 20.0, increment: 0.25 }],
            };
            let bucket = pg.price_bucket(price);
            prop_assert!(!bucket.is_empty());
            let parsed: f64 = bucket.parse().unwrap();
            prop_assert!(parsed <= price + 1e-9);
            prop_assert!(price - parsed < 0.25 + 1e-9);
        }
    }
}
