// src/categories.rs
//
// IAB 类目到广告服务器类目的翻译。竞争排他开启时，每个视频出价都要
// 先换算成主广告服务器认识的类目，换不出来的出价直接丢弃。

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::errors::CategoryError;

pub trait CategoryFetcher: Send + Sync {
    /// `primary_ad_server` 是 `freewheel` / `dfp`；publisher 可为空，
    /// 为空时用 ad server 级别的缺省映射。
    fn fetch_categories(
        &self,
        primary_ad_server: &str,
        publisher: &str,
        iab_category: &str,
    ) -> Result<String, CategoryError>;
}

/// 从目录加载映射文件的实现。文件名是 `<adserver>.json` 或
/// `<adserver>_<publisher>.json`，内容是 `{"IAB1": "cat1", ...}`。
pub struct FileCategoryFetcher {
    mappings: HashMap<String, HashMap<String, String>>,
}

impl FileCategoryFetcher {
    pub fn load(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut mappings = HashMap::new();
        for entry in fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<HashMap<String, String>>(&content) {
                Ok(map) => {
                    debug!(file = %path.display(), entries = map.len(), "loaded category mapping");
                    mappings.insert(stem.to_string(), map);
                }
                Err(e) => {
                    debug!(file = %path.display(), "skipping unparsable category mapping: {}", e);
                }
            }
        }
        Ok(Self { mappings })
    }

    /// 空实现，未配置映射目录时使用；所有翻译都会失败并丢弃出价。
    pub fn empty() -> Self {
        Self {
            mappings: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn from_map(key: &str, map: HashMap<String, String>) -> Self {
        Self {
            mappings: HashMap::from([(key.to_string(), map)]),
        }
    }
}

impl CategoryFetcher for FileCategoryFetcher {
    fn fetch_categories(
        &self,
        primary_ad_server: &str,
        publisher: &str,
        iab_category: &str,
    ) -> Result<String, CategoryError> {
        let key = if publisher.is_empty() {
            primary_ad_server.to_string()
        } else {
            format!("{}_{}", primary_ad_server, publisher)
        };
        let mapping = self
            .mappings
            .get(&key)
            .or_else(|| self.mappings.get(primary_ad_server))
            .ok_or_else(|| CategoryError::MissingMapping {
                server: primary_ad_server.to_string(),
                publisher: publisher.to_string(),
            })?;
        mapping
            .get(iab_category)
            .cloned()
            .ok_or_else(|| CategoryError::Unmapped {
                iab_category: iab_category.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_with_and_without_publisher() {
        let fetcher = FileCategoryFetcher {
            mappings: HashMap::from([
                (
                    "dfp".to_string(),
                    HashMap::from([("IAB1".to_string(), "vanilla".to_string())]),
                ),
                (
                    "dfp_pub42".to_string(),
                    HashMap::from([("IAB1".to_string(), "custom".to_string())]),
                ),
            ]),
        };
        assert_eq!(fetcher.fetch_categories("dfp", "", "IAB1").unwrap(), "vanilla");
        assert_eq!(
            fetcher.fetch_categories("dfp", "pub42", "IAB1").unwrap(),
            "custom"
        );
        // publisher 专属映射缺失时退回 ad server 级映射
        assert_eq!(
            fetcher.fetch_categories("dfp", "other", "IAB1").unwrap(),
            "vanilla"
        );
    }

    #[test]
    fn fetch_failures() {
        let fetcher = FileCategoryFetcher::empty();
        assert!(matches!(
            fetcher.fetch_categories("dfp", "", "IAB1"),
            Err(CategoryError::MissingMapping { .. })
        ));

        let fetcher = FileCategoryFetcher::from_map(
            "freewheel",
            HashMap::from([("IAB1".to_string(), "news".to_string())]),
        );
        assert!(matches!(
            fetcher.fetch_categories("freewheel", "", "IAB99"),
            Err(CategoryError::Unmapped { .. })
        ));
    }
}
