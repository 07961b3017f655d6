// src/currency/rates.rs

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

use crate::errors::CurrencyError;

/// 缺省货币。bid 未声明货币、请求未限定货币时都按它处理。
pub const DEFAULT_CURRENCY: &str = "USD";

/// 汇率查询接口。竞价过程中只做只读查询，由实现决定数据从哪来。
pub trait Conversions: Send + Sync {
    fn get_rate(&self, from: &str, to: &str) -> Result<f64, CurrencyError>;
}

/// 粗校验 ISO-4217 代码：三个 ASCII 字母，统一成大写。
pub fn parse_iso(code: &str) -> Result<String, CurrencyError> {
    let trimmed = code.trim();
    if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(trimmed.to_ascii_uppercase())
    } else {
        Err(CurrencyError::UnknownIso(code.to_string()))
    }
}

/// **汇率表**。远端汇率文件的形状是
/// `{"dataAsOf":"YYYY-MM-DD","conversions":{from:{to:rate}}}`。
#[derive(Debug, Clone, Default)]
pub struct Rates {
    pub data_as_of: Option<NaiveDate>,
    pub conversions: HashMap<String, HashMap<String, f64>>,
}

impl Rates {
    pub fn new(conversions: HashMap<String, HashMap<String, f64>>) -> Self {
        Self {
            data_as_of: None,
            conversions,
        }
    }
}

impl<'de> Deserialize<'de> for Rates {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default, rename = "dataAsOf")]
            data_as_of: String,
            #[serde(default)]
            conversions: HashMap<String, HashMap<String, f64>>,
        }
        let raw = Raw::deserialize(deserializer)?;
        // 日期是尽力解析：格式不对不影响汇率表本身
        let data_as_of = NaiveDate::parse_from_str(&raw.data_as_of, "%Y-%m-%d").ok();
        Ok(Rates {
            data_as_of,
            conversions: raw.conversions,
        })
    }
}

impl Conversions for Rates {
    fn get_rate(&self, from: &str, to: &str) -> Result<f64, CurrencyError> {
        let from = parse_iso(from)?;
        let to = parse_iso(to)?;
        if from == to {
            return Ok(1.0);
        }
        self.conversions
            .get(&from)
            .and_then(|row| row.get(&to))
            .copied()
            .ok_or(CurrencyError::RateNotFound { from, to })
    }
}

/// 未配置汇率源时的实现：只认同币种，其余一律拒绝换算。
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantRates;

impl Conversions for ConstantRates {
    fn get_rate(&self, from: &str, to: &str) -> Result<f64, CurrencyError> {
        let from = parse_iso(from)?;
        let to = parse_iso(to)?;
        if from == to {
            return Ok(1.0);
        }
        Err(CurrencyError::ConstantRates { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rates() -> Rates {
        serde_json::from_str(
            r#"{
                "dataAsOf": "2018-09-12",
                "conversions": {
                    "USD": {"GBP": 0.77208},
                    "GBP": {"USD": 1.2952}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn unmarshal_rates() {
        let rates = sample_rates();
        assert_eq!(
            rates.data_as_of,
            NaiveDate::from_ymd_opt(2018, 9, 12)
        );
        assert_eq!(rates.conversions["USD"]["GBP"], 0.77208);
        assert_eq!(rates.conversions["GBP"]["USD"], 1.2952);
    }

    #[test]
    fn unmarshal_rates_bad_date_is_not_fatal() {
        let rates: Rates = serde_json::from_str(
            r#"{"dataAsOf": "12-09-2018", "conversions": {"USD": {"GBP": 0.77208}}}"#,
        )
        .unwrap();
        assert!(rates.data_as_of.is_none());
        assert_eq!(rates.conversions["USD"]["GBP"], 0.77208);
    }

    #[test]
    fn get_rate_found() {
        let rates = sample_rates();
        assert_eq!(rates.get_rate("USD", "GBP").unwrap(), 0.77208);
        assert_eq!(rates.get_rate("gbp", "usd").unwrap(), 1.2952);
    }

    #[test]
    fn get_rate_same_currency_is_one() {
        let rates = sample_rates();
        assert_eq!(rates.get_rate("EUR", "EUR").unwrap(), 1.0);
    }

    #[test]
    fn get_rate_not_found() {
        let rates = sample_rates();
        let err = rates.get_rate("JPY", "USD").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Currency conversion rate not found: 'JPY' => 'USD'"
        );
    }

    #[test]
    fn get_rate_rejects_bad_iso() {
        let rates = sample_rates();
        assert!(matches!(
            rates.get_rate("foo_", "USD"),
            Err(CurrencyError::UnknownIso(_))
        ));
        assert!(matches!(
            rates.get_rate("USD", "42"),
            Err(CurrencyError::UnknownIso(_))
        ));
    }

    #[test]
    fn constant_rates_refuse_conversion() {
        let constant = ConstantRates;
        assert_eq!(constant.get_rate("USD", "USD").unwrap(), 1.0);
        let err = constant.get_rate("EUR", "USD").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Constant rates doesn't proceed to any conversions, cannot convert 'EUR' => 'USD'"
        );
    }
}
