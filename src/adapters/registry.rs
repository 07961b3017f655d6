// src/adapters/registry.rs

use std::collections::HashMap;
use std::sync::Arc;

use super::bidder::{Bidder, BidderName};

/// **bidder 注册表**：启动时一次性构建，之后只读共享。
/// 没有任何进程级可变状态，快照显式传给 exchange。
pub struct BidderRegistry {
    bidders: HashMap<BidderName, Arc<dyn Bidder>>,
}

impl BidderRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            bidders: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Bidder>> {
        self.bidders.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &BidderName> {
        self.bidders.keys()
    }

    pub fn len(&self) -> usize {
        self.bidders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bidders.is_empty()
    }

    /// 把请求里出现的名字解析成核心 bidder 名：直接注册过的名字原样返回，
    /// 否则查请求里声明的别名表。
    pub fn resolve<'a>(
        &self,
        name: &'a str,
        aliases: &'a HashMap<String, String>,
    ) -> Option<&'a str> {
        if self.bidders.contains_key(name) {
            return Some(name);
        }
        aliases
            .get(name)
            .map(String::as_str)
            .filter(|core| self.bidders.contains_key(*core))
    }
}

pub struct RegistryBuilder {
    bidders: HashMap<BidderName, Arc<dyn Bidder>>,
}

impl RegistryBuilder {
    pub fn register(mut self, bidder: Arc<dyn Bidder>) -> Self {
        self.bidders.insert(bidder.name().to_string(), bidder);
        self
    }

    pub fn build(self) -> Arc<BidderRegistry> {
        Arc::new(BidderRegistry {
            bidders: self.bidders,
        })
    }
}
