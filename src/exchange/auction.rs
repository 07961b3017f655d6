// src/exchange/auction.rs
//
// 两级赢家判定与缓存物化。一次拍卖产出两张表：每个 imp 的总冠军，
// 和每个 (imp, bidder) 的席位内最高价。后续的价格分桶、缓存写入、
// 定向键都围绕这两张表展开。

use std::collections::HashMap;

use tokio::time::Instant;
use tracing::warn;

use crate::adapters::bidder::{BidderName, TypedBid};
use crate::cache::client::{CacheClient, Cacheable, PayloadType};
use crate::config::DefaultTtls;
use crate::errors::BidderError;
use crate::openrtb::ext::{BidType, PriceGranularity};
use crate::openrtb::response::Bid;

use super::bidder::SeatBidResult;

/// 拍卖里一条出价的身份：哪个 imp 上哪个 bidder 的席位内最高价。
/// 两级赢家表只保留每个席位的头名，所以这个键是唯一的。
pub type BidKey = (String, BidderName);

#[derive(Debug, Default)]
pub struct Auction {
    /// imp id -> 全场最高价出价（bidder 名 + 在该席位 bids 里的下标）
    winners_by_imp: HashMap<String, (BidderName, usize)>,
    /// imp id -> bidder -> 该 bidder 在此 imp 上的最高价出价下标
    winners_by_imp_by_bidder: HashMap<String, HashMap<BidderName, usize>>,
    /// 每个席位头名出价的价格分桶串；set_rounded_prices 之后才有内容
    rounded_prices: HashMap<BidKey, String>,
    /// 缓存写入成功后才有内容
    cache_ids: HashMap<BidKey, String>,
    vast_cache_ids: HashMap<BidKey, String>,
}

/// 从全部席位结果构建赢家表。价格严格大于才换人，平局保留在位者；
/// 上游已对 bidder 顺序做过洗牌，平局的归属因此在多次请求间随机。
pub fn new_auction(seat_bids: &HashMap<BidderName, SeatBidResult>, num_imps: usize) -> Auction {
    let mut winners_by_imp: HashMap<String, (BidderName, usize)> =
        HashMap::with_capacity(num_imps);
    let mut winners_by_imp_by_bidder: HashMap<String, HashMap<BidderName, usize>> =
        HashMap::with_capacity(num_imps);

    let price_of = |bidder: &str, index: usize| -> f64 {
        seat_bids
            .get(bidder)
            .and_then(|seat| seat.bids.get(index))
            .map(|typed| typed.bid.price)
            .unwrap_or(0.0)
    };

    for (bidder_name, seat_bid) in seat_bids {
        for (index, typed) in seat_bid.bids.iter().enumerate() {
            let cpm = typed.bid.price;
            let imp_id = typed.bid.impid.clone();

            match winners_by_imp.get(&imp_id) {
                Some((winner_bidder, winner_index))
                    if cpm <= price_of(winner_bidder, *winner_index) => {}
                _ => {
                    winners_by_imp.insert(imp_id.clone(), (bidder_name.clone(), index));
                }
            }

            let per_bidder = winners_by_imp_by_bidder.entry(imp_id).or_default();
            match per_bidder.get(bidder_name) {
                Some(best_index) if cpm <= price_of(bidder_name, *best_index) => {}
                _ => {
                    per_bidder.insert(bidder_name.clone(), index);
                }
            }
        }
    }

    Auction {
        winners_by_imp,
        winners_by_imp_by_bidder,
        ..Default::default()
    }
}

impl Auction {
    pub fn winner(&self, imp_id: &str) -> Option<&(BidderName, usize)> {
        self.winners_by_imp.get(imp_id)
    }

    pub fn winners_by_imp_by_bidder(&self) -> &HashMap<String, HashMap<BidderName, usize>> {
        &self.winners_by_imp_by_bidder
    }

    pub fn rounded_price(&self, key: &BidKey) -> Option<&String> {
        self.rounded_prices.get(key)
    }

    pub fn cache_id(&self, key: &BidKey) -> Option<&String> {
        self.cache_ids.get(key)
    }

    pub fn vast_cache_id(&self, key: &BidKey) -> Option<&String> {
        self.vast_cache_ids.get(key)
    }

    /// 给每个席位头名出价算价格分桶串。
    pub fn set_rounded_prices(
        &mut self,
        seat_bids: &HashMap<BidderName, SeatBidResult>,
        granularity: &PriceGranularity,
    ) {
        let mut rounded = HashMap::with_capacity(self.winners_by_imp_by_bidder.len());
        for (imp_id, top_bids) in &self.winners_by_imp_by_bidder {
            for (bidder_name, index) in top_bids {
                let Some(typed) = seat_bids
                    .get(bidder_name)
                    .and_then(|seat| seat.bids.get(*index))
                else {
                    continue;
                };
                rounded.insert(
                    (imp_id.clone(), bidder_name.clone()),
                    granularity.price_bucket(typed.bid.price),
                );
            }
        }
        self.rounded_prices = rounded;
    }

    /// 把赢家出价写进外部缓存，返回的 id 记回两张映射。
    /// 缓存问题只产生错误不碰拍卖结果，漏掉的 id 后面单纯不出定向键。
    pub async fn do_cache(
        &mut self,
        seat_bids: &HashMap<BidderName, SeatBidResult>,
        cache: &CacheClient,
        deadline: Instant,
        cache_bids: bool,
        cache_vast: bool,
        default_ttls: &DefaultTtls,
    ) -> Vec<BidderError> {
        if !cache_bids && !cache_vast {
            return Vec::new();
        }

        let (to_cache, bid_indices, vast_indices) =
            self.build_cacheables(seat_bids, cache_bids, cache_vast, default_ttls);
        if to_cache.is_empty() {
            return Vec::new();
        }

        match cache.put_json(deadline, &to_cache).await {
            Ok(ids) => {
                self.apply_cache_ids(&ids, bid_indices, vast_indices);
                Vec::new()
            }
            Err(err) => {
                warn!("prebid cache write failed: {}", err);
                vec![err]
            }
        }
    }

    /// 组装待缓存载荷，同时记下每条载荷对应的出价身份。
    fn build_cacheables(
        &self,
        seat_bids: &HashMap<BidderName, SeatBidResult>,
        cache_bids: bool,
        cache_vast: bool,
        default_ttls: &DefaultTtls,
    ) -> (Vec<Cacheable>, Vec<(usize, BidKey)>, Vec<(usize, BidKey)>) {
        let mut to_cache = Vec::new();
        let mut bid_indices = Vec::new();
        let mut vast_indices = Vec::new();

        for (imp_id, top_bids) in &self.winners_by_imp_by_bidder {
            for (bidder_name, index) in top_bids {
                let Some(typed) = seat_bids
                    .get(bidder_name)
                    .and_then(|seat| seat.bids.get(*index))
                else {
                    continue;
                };
                let key = (imp_id.clone(), bidder_name.clone());
                if cache_bids {
                    match serde_json::to_value(&typed.bid) {
                        Ok(data) => {
                            to_cache.push(Cacheable {
                                payload_type: PayloadType::Json,
                                data,
                                ttl_seconds: default_ttls.for_type(typed.bid_type),
                            });
                            bid_indices.push((to_cache.len() - 1, key.clone()));
                        }
                        Err(e) => warn!("failed to marshal bid for caching: {}", e),
                    }
                }
                if cache_vast && typed.bid_type == BidType::Video {
                    to_cache.push(Cacheable {
                        payload_type: PayloadType::Xml,
                        data: serde_json::Value::String(make_vast(&typed.bid)),
                        ttl_seconds: default_ttls.for_type(BidType::Video),
                    });
                    vast_indices.push((to_cache.len() - 1, key));
                }
            }
        }

        (to_cache, bid_indices, vast_indices)
    }

    /// 把返回的 id 序列写回映射，空串表示那条写入失败，跳过。
    fn apply_cache_ids(
        &mut self,
        ids: &[String],
        bid_indices: Vec<(usize, BidKey)>,
        vast_indices: Vec<(usize, BidKey)>,
    ) {
        for (index, key) in bid_indices {
            if let Some(id) = ids.get(index) {
                if !id.is_empty() {
                    self.cache_ids.insert(key, id.clone());
                }
            }
        }
        for (index, key) in vast_indices {
            if let Some(id) = ids.get(index) {
                if !id.is_empty() {
                    self.vast_cache_ids.insert(key, id.clone());
                }
            }
        }
    }
}

/// 视频出价的 VAST 素材：AdM 有内容就原样使用，否则把 NURL 包进
/// 固定的 VAST 3.0 跳转文档。
pub fn make_vast(bid: &Bid) -> String {
    match bid.adm.as_deref() {
        Some(adm) if !adm.is_empty() => adm.to_string(),
        _ => format!(
            "<VAST version=\"3.0\"><Ad><Wrapper>\
             <AdSystem>prebid.org wrapper</AdSystem>\
             <VASTAdTagURI><![CDATA[{}]]></VASTAdTagURI>\
             <Impression></Impression><Creatives></Creatives>\
             </Wrapper></Ad></VAST>",
            bid.nurl.as_deref().unwrap_or_default()
        ),
    }
}
