// src/exchange/targeting.rs
//
// 把拍卖结果物化成发布方页面上用的 key-value 定向串。每个键有两种形态：
// 裸键只给全场冠军（includewinners 开启时），带 bidder 后缀的键给每个
// 席位头名（includebidderkeys 开启时）。整个过程尽力而为，缺缓存 id
// 只是少一个键，不会把出价踢出拍卖。

use std::collections::HashMap;

use crate::adapters::bidder::BidderName;
use crate::openrtb::ext::PriceGranularity;
use crate::openrtb::response::Bid;

use super::auction::Auction;
use super::bidder::SeatBidResult;

pub const HB_PB_KEY: &str = "hb_pb";
pub const HB_BIDDER_KEY: &str = "hb_bidder";
pub const HB_SIZE_KEY: &str = "hb_size";
pub const HB_CACHE_ID_KEY: &str = "hb_cache_id";
pub const HB_VAST_CACHE_KEY: &str = "hb_uuid";
pub const HB_DEAL_KEY: &str = "hb_deal";
pub const HB_ENV_KEY: &str = "hb_env";
pub const HB_CAT_DUR_KEY: &str = "hb_cat_dur";
/// App 请求在 hb_env 键上的取值
pub const HB_ENV_APP: &str = "mobile-app";

/// 带后缀键的总长上限，超出的 bidder 名被截断
const MAX_KEY_LENGTH: usize = 20;

/// 一场拍卖的定向配置，来自请求扩展
#[derive(Debug, Clone)]
pub struct TargetData {
    pub price_granularity: PriceGranularity,
    pub include_winners: bool,
    pub include_bidder_keys: bool,
    pub include_cache_bids: bool,
    pub include_cache_vast: bool,
}

impl TargetData {
    /// 给每个 (imp, bidder) 头名出价写定向键。
    pub fn set_targeting(
        &self,
        auction: &Auction,
        seat_bids: &mut HashMap<BidderName, SeatBidResult>,
        is_app: bool,
        category_mapping: &HashMap<String, String>,
    ) {
        for (imp_id, top_bids) in auction.winners_by_imp_by_bidder() {
            let overall_winner = auction.winner(imp_id);
            for (bidder_name, index) in top_bids {
                let is_overall_winner = overall_winner
                    .map(|(winner_bidder, winner_index)| {
                        winner_bidder == bidder_name && winner_index == index
                    })
                    .unwrap_or(false);
                let key = (imp_id.clone(), bidder_name.clone());

                let Some(seat) = seat_bids.get_mut(bidder_name) else {
                    continue;
                };
                let Some(typed) = seat.bids.get(*index) else {
                    continue;
                };

                let mut targets = HashMap::with_capacity(10);
                if let Some(cpm) = auction.rounded_price(&key) {
                    if !cpm.is_empty() {
                        self.add_keys(&mut targets, HB_PB_KEY, cpm, bidder_name, is_overall_winner);
                    }
                }
                self.add_keys(
                    &mut targets,
                    HB_BIDDER_KEY,
                    bidder_name,
                    bidder_name,
                    is_overall_winner,
                );
                let hb_size = make_hb_size(&typed.bid);
                if !hb_size.is_empty() {
                    self.add_keys(&mut targets, HB_SIZE_KEY, &hb_size, bidder_name, is_overall_winner);
                }
                if let Some(cache_id) = auction.cache_id(&key) {
                    self.add_keys(
                        &mut targets,
                        HB_CACHE_ID_KEY,
                        cache_id,
                        bidder_name,
                        is_overall_winner,
                    );
                }
                if let Some(vast_id) = auction.vast_cache_id(&key) {
                    self.add_keys(
                        &mut targets,
                        HB_VAST_CACHE_KEY,
                        vast_id,
                        bidder_name,
                        is_overall_winner,
                    );
                }
                if let Some(deal) = typed.bid.dealid.as_deref() {
                    if !deal.is_empty() {
                        self.add_keys(&mut targets, HB_DEAL_KEY, deal, bidder_name, is_overall_winner);
                    }
                }
                if is_app {
                    self.add_keys(&mut targets, HB_ENV_KEY, HB_ENV_APP, bidder_name, is_overall_winner);
                }
                if !category_mapping.is_empty() {
                    if let Some(cat_dur) = category_mapping.get(&typed.bid.id) {
                        self.add_keys(
                            &mut targets,
                            HB_CAT_DUR_KEY,
                            cat_dur,
                            bidder_name,
                            is_overall_winner,
                        );
                    }
                }

                seat.bids[*index].bid_targets = targets;
            }
        }
    }

    fn add_keys(
        &self,
        targets: &mut HashMap<String, String>,
        key: &str,
        value: &str,
        bidder_name: &str,
        overall_winner: bool,
    ) {
        if self.include_bidder_keys {
            targets.insert(bidder_key(key, bidder_name), value.to_string());
        }
        if self.include_winners && overall_winner {
            targets.insert(key.to_string(), value.to_string());
        }
    }
}

/// `<key>_<bidder>`，整体截到 20 个字符
fn bidder_key(key: &str, bidder_name: &str) -> String {
    let mut composed = format!("{}_{}", key, bidder_name);
    composed.truncate(MAX_KEY_LENGTH);
    composed
}

/// `<W>x<H>`，宽高都非零才有值
fn make_hb_size(bid: &Bid) -> String {
    match (bid.w, bid.h) {
        (Some(w), Some(h)) if w != 0 && h != 0 => format!("{}x{}", w, h),
        _ => String::new(),
    }
}
