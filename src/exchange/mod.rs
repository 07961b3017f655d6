// src/exchange/mod.rs
//
// 竞价交易所：一次 OpenRTB 请求进来，按 bidder 拆出净化后的请求副本、
// 随机打乱顺序、并发跑完全部 bidder，再依次做类目排他、赢家判定、
// 缓存写入、定向键物化，最后拼装响应。bidder 内部的问题从不外溢，
// 每个 bidder 的任务都包着恐慌屏障，收集端永远能等到恰好 N 份结果。

pub mod auction;
pub mod bidder;
pub mod targeting;
pub mod validation;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::FutureExt;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{error, warn};

use crate::adcert::signer::AdCertSigner;
use crate::adapters::bidder::{Bidder, BidderName};
use crate::adapters::registry::BidderRegistry;
use crate::cache::client::CacheClient;
use crate::categories::CategoryFetcher;
use crate::config::{Configuration, DefaultTtls};
use crate::currency::converter::RateConverter;
use crate::currency::rates::{Conversions, ConstantRates};
use crate::errors::{AuctionError, BidderError};
use crate::metrics::Metrics;
use crate::openrtb::ext::{
    ExtBid, ExtBidPrebid, ExtBidResponse, ExtBidderError, ExtRequest, ExtResponseDebug,
    ExtSeatBid,
};
use crate::openrtb::request::BidRequest;
use crate::openrtb::response::{Bid, BidResponse, SeatBid, NBR_INVALID_REQUEST};

use auction::new_auction;
use bidder::{BidderRunner, SeatBidResult};
use targeting::TargetData;

/// 单个 bidder 的附加追踪信息，进入响应扩展
#[derive(Debug, Default)]
pub struct SeatResponseExtra {
    pub response_time_millis: u64,
    pub errors: Vec<BidderError>,
}

/// 每个 bidder 任务固定发布一份的结果。恐慌屏障兜底时 `adapter_bids`
/// 为空，收集端照样拿到一个值，不会饿死。
struct BidResponseWrapper {
    bidder: BidderName,
    adapter_bids: Option<SeatBidResult>,
    adapter_extra: SeatResponseExtra,
}

impl BidResponseWrapper {
    fn empty(bidder: BidderName) -> Self {
        Self {
            bidder,
            adapter_bids: None,
            adapter_extra: SeatResponseExtra::default(),
        }
    }
}

pub struct Exchange {
    registry: Arc<BidderRegistry>,
    runner: BidderRunner,
    cache: CacheClient,
    /// 开启缓存时从竞价截止时间里扣出来的余量
    cache_time: Duration,
    default_ttls: DefaultTtls,
    metrics: Arc<dyn Metrics>,
    converter: Option<Arc<RateConverter>>,
    categories: Arc<dyn CategoryFetcher>,
    signer: Option<Arc<AdCertSigner>>,
}

impl Exchange {
    pub fn new(
        cfg: &Configuration,
        client: reqwest::Client,
        registry: Arc<BidderRegistry>,
        metrics: Arc<dyn Metrics>,
        converter: Option<Arc<RateConverter>>,
        categories: Arc<dyn CategoryFetcher>,
        signer: Option<Arc<AdCertSigner>>,
    ) -> Self {
        Self {
            registry,
            runner: BidderRunner::new(client.clone()),
            cache: CacheClient::new(client, cfg.cache.url.clone()),
            cache_time: Duration::from_millis(cfg.cache.expected_time_millis),
            default_ttls: cfg.cache.default_ttls.clone(),
            metrics,
            converter,
            categories,
            signer,
        }
    }

    /// 执行一场完整拍卖。bidder 级错误都收进响应扩展；只有请求本身
    /// 不可用（ext 解不开、类目配置不合法）才整体报错。
    pub async fn hold_auction(
        &self,
        bid_request: &BidRequest,
        deadline: Instant,
    ) -> Result<BidResponse, AuctionError> {
        // test 请求先留一份解析后的快照给 debug 块
        let resolved_request = if bid_request.is_test() {
            serde_json::to_value(bid_request).ok()
        } else {
            None
        };

        let request_ext: ExtRequest = match &bid_request.ext {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|e| AuctionError::RequestExt(e.to_string()))?,
            None => ExtRequest::default(),
        };
        let prebid = &request_ext.prebid;
        let should_cache_bids = prebid.cache.as_ref().map_or(false, |c| c.bids.is_some());
        let should_cache_vast = prebid.cache.as_ref().map_or(false, |c| c.vastxml.is_some());
        let targ_data = prebid.targeting.as_ref().map(|t| TargetData {
            price_granularity: t.pricegranularity.clone(),
            include_winners: t.includewinners,
            include_bidder_keys: t.includebidderkeys,
            include_cache_bids: should_cache_bids,
            include_cache_vast: should_cache_vast,
        });

        let clean_requests = clean_openrtb_requests(
            bid_request,
            &self.registry,
            &prebid.aliases,
            self.signer.as_deref(),
        );
        let mut live_adapters: Vec<BidderName> = clean_requests.keys().cloned().collect();
        // 打乱顺序，平局不偏向任何固定位置的 bidder
        live_adapters.shuffle(&mut thread_rng());

        // 要写缓存就得给 prebid-cache 留出时间，竞价截止时间相应提前；
        // 响应拼装仍然用原始截止时间。
        let auction_deadline = if should_cache_bids {
            deadline
                .into_std()
                .checked_sub(self.cache_time)
                .map(Instant::from_std)
                .unwrap_or(deadline)
        } else {
            deadline
        };

        let conversions: Arc<dyn Conversions> = match &self.converter {
            Some(converter) => converter.rates(),
            None => Arc::new(ConstantRates),
        };

        let (mut adapter_bids, adapter_extra) = self
            .get_all_bids(
                auction_deadline,
                clean_requests,
                &prebid.bidadjustmentfactors,
                conversions,
            )
            .await;

        let bid_categories = apply_category_mapping(
            &request_ext,
            &mut adapter_bids,
            self.categories.as_ref(),
            targ_data.as_ref(),
            &mut thread_rng(),
        )
        .map_err(AuctionError::CategoryMapping)?;

        let mut request_errors: Vec<BidderError> = Vec::new();
        if let Some(targ) = &targ_data {
            if !adapter_bids.is_empty() {
                let mut auction = new_auction(&adapter_bids, bid_request.imp.len());
                auction.set_rounded_prices(&adapter_bids, &targ.price_granularity);
                let cache_errs = auction
                    .do_cache(
                        &adapter_bids,
                        &self.cache,
                        deadline,
                        targ.include_cache_bids,
                        targ.include_cache_vast,
                        &self.default_ttls,
                    )
                    .await;
                request_errors.extend(cache_errs);
                targ.set_targeting(
                    &auction,
                    &mut adapter_bids,
                    bid_request.app.is_some(),
                    &bid_categories,
                );
            }
        }

        Ok(self.build_bid_response(
            &live_adapters,
            adapter_bids,
            bid_request,
            resolved_request,
            adapter_extra,
            request_errors,
        ))
    }

    /// 给每个 bidder 开一个任务，收齐恰好 N 份结果再返回。
    async fn get_all_bids(
        &self,
        deadline: Instant,
        clean_requests: HashMap<BidderName, (Arc<dyn Bidder>, BidRequest)>,
        bid_adjustments: &HashMap<String, f64>,
        conversions: Arc<dyn Conversions>,
    ) -> (
        HashMap<BidderName, SeatBidResult>,
        HashMap<BidderName, SeatResponseExtra>,
    ) {
        let count = clean_requests.len();
        let (tx, mut rx) = mpsc::channel::<BidResponseWrapper>(count.max(1));

        for (bidder_name, (bidder_impl, request)) in clean_requests {
            let runner = self.runner.clone();
            let metrics = Arc::clone(&self.metrics);
            let adjustment = bid_adjustments.get(&bidder_name).copied().unwrap_or(1.0);
            let conversions = Arc::clone(&conversions);
            let tx = tx.clone();
            tokio::spawn(async move {
                let name_for_recovery = bidder_name.clone();
                let task_metrics = Arc::clone(&metrics);
                let work = async move {
                    task_metrics.record_adapter_request(&bidder_name);
                    let start = std::time::Instant::now();
                    let (mut seat, mut errs) = runner
                        .request_bid(
                            bidder_impl.as_ref(),
                            &request,
                            deadline,
                            adjustment,
                            conversions.as_ref(),
                        )
                        .await;
                    if let Some(seat_bid) = seat.as_mut() {
                        errs.extend(validation::remove_invalid_bids(&request, seat_bid));
                    }
                    let elapsed = start.elapsed();
                    task_metrics.record_adapter_time(&bidder_name, elapsed);
                    for err in &errs {
                        task_metrics.record_adapter_error(&bidder_name, err.code());
                    }
                    if let Some(seat_bid) = &seat {
                        for typed in &seat_bid.bids {
                            task_metrics
                                .record_adapter_price(&bidder_name, typed.bid.price * 1000.0);
                            task_metrics.record_adapter_bid_received(
                                &bidder_name,
                                typed.bid_type,
                                typed.bid.adm.as_deref().map_or(false, |adm| !adm.is_empty()),
                            );
                        }
                    }
                    BidResponseWrapper {
                        bidder: bidder_name,
                        adapter_bids: seat,
                        adapter_extra: SeatResponseExtra {
                            response_time_millis: elapsed.as_millis() as u64,
                            errors: errs,
                        },
                    }
                };

                // 恐慌屏障：adapter 代码出事就发布一份空结果，
                // 收集端照样收满 N 份
                let wrapper = match std::panic::AssertUnwindSafe(work).catch_unwind().await {
                    Ok(wrapper) => wrapper,
                    Err(payload) => {
                        error!(
                            bidder = %name_for_recovery,
                            "OpenRTB auction recovered panic from bidder: {}",
                            panic_message(payload.as_ref())
                        );
                        metrics.record_adapter_panic(&name_for_recovery);
                        BidResponseWrapper::empty(name_for_recovery)
                    }
                };
                let _ = tx.send(wrapper).await;
            });
        }
        drop(tx);

        let mut adapter_bids = HashMap::with_capacity(count);
        let mut adapter_extra = HashMap::with_capacity(count);
        for _ in 0..count {
            let Some(wrapper) = rx.recv().await else { break };
            if let Some(seat) = wrapper.adapter_bids {
                adapter_bids.insert(wrapper.bidder.clone(), seat);
            }
            adapter_extra.insert(wrapper.bidder, wrapper.adapter_extra);
        }
        (adapter_bids, adapter_extra)
    }

    /// 把全部席位结果拼成 OpenRTB 响应。
    fn build_bid_response(
        &self,
        live_adapters: &[BidderName],
        mut adapter_bids: HashMap<BidderName, SeatBidResult>,
        bid_request: &BidRequest,
        resolved_request: Option<Value>,
        mut adapter_extra: HashMap<BidderName, SeatResponseExtra>,
        request_errors: Vec<BidderError>,
    ) -> BidResponse {
        let response_ext = make_ext_bid_response(
            &adapter_bids,
            &adapter_extra,
            bid_request,
            resolved_request,
            &request_errors,
        );

        let mut seat_bids = Vec::with_capacity(live_adapters.len());
        let mut response_currency = None;
        for adapter in live_adapters {
            let Some(seat) = adapter_bids.remove(adapter) else {
                continue;
            };
            if seat.bids.is_empty() {
                continue;
            }
            if response_currency.is_none() {
                response_currency = Some(seat.currency.clone());
            }
            seat_bids.push(make_seat_bid(seat, adapter, &mut adapter_extra));
        }

        let nbr = if seat_bids.is_empty() {
            Some(NBR_INVALID_REQUEST)
        } else {
            None
        };

        BidResponse {
            id: bid_request.id.clone(),
            seatbid: seat_bids,
            cur: response_currency,
            nbr,
            ext: serde_json::to_value(response_ext).ok(),
            ..Default::default()
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

/// 按 bidder 拆请求副本。imp.ext 里除 `prebid` 以外的键名就是参与的
/// bidder（别名先解析成核心名），副本里每个 imp 的 ext 缩成
/// `{"bidder": <该 bidder 的参数>}`，请求级 ext 不透传。配置了签名器时
/// 每份副本都签一次。
fn clean_openrtb_requests(
    request: &BidRequest,
    registry: &BidderRegistry,
    aliases: &HashMap<String, String>,
    signer: Option<&AdCertSigner>,
) -> HashMap<BidderName, (Arc<dyn Bidder>, BidRequest)> {
    let mut participants: Vec<String> = Vec::new();
    for imp in &request.imp {
        if let Some(Value::Object(ext)) = &imp.ext {
            for name in ext.keys() {
                if name != "prebid" && !participants.contains(name) {
                    participants.push(name.clone());
                }
            }
        }
    }

    let mut cleaned = HashMap::with_capacity(participants.len());
    for name in participants {
        let Some(core) = registry.resolve(&name, aliases) else {
            continue;
        };
        let Some(bidder_impl) = registry.get(core) else {
            continue;
        };

        let mut imps = Vec::new();
        for imp in &request.imp {
            if let Some(Value::Object(ext)) = &imp.ext {
                if let Some(params) = ext.get(&name) {
                    let mut imp_copy = imp.clone();
                    imp_copy.ext = Some(json!({ "bidder": params }));
                    imps.push(imp_copy);
                }
            }
        }
        if imps.is_empty() {
            continue;
        }

        let mut copy = request.clone();
        copy.imp = imps;
        copy.ext = None;
        if let Some(signer) = signer {
            if let Err(e) = signer.sign_request(&mut copy) {
                warn!(bidder = %name, "failed to sign outgoing bid request: {}", e);
            }
        }
        cleaned.insert(name, (Arc::clone(bidder_impl), copy));
    }
    cleaned
}

struct BidDedupe {
    bidder: BidderName,
    bid_index: usize,
    bid_id: String,
}

/// 类目-时长竞争排他。只有请求扩展里带 `includebrandcategory` 才开启。
/// 返回 bid id -> `<价格桶>_<类目>_<时长>s` 的映射；同键冲突抛硬币，
/// 一半概率保留在位者、一半概率换新。所有删除推迟到最后按下标倒序执行，
/// 清空的席位整个移除。
pub fn apply_category_mapping(
    request_ext: &ExtRequest,
    seat_bids: &mut HashMap<BidderName, SeatBidResult>,
    fetcher: &dyn CategoryFetcher,
    targ_data: Option<&TargetData>,
    rng: &mut impl Rng,
) -> Result<HashMap<String, String>, String> {
    let mut categories = HashMap::new();

    let Some(targeting) = &request_ext.prebid.targeting else {
        return Ok(categories);
    };
    let Some(brand_cat) = &targeting.includebrandcategory else {
        return Ok(categories);
    };

    let primary_ad_server = match brand_cat.primaryadserver {
        1 => "freewheel",
        2 => "dfp",
        other => return Err(format!("Primary ad server {} not recognized", other)),
    };
    let publisher = brand_cat.publisher.as_str();

    let mut duration_buckets = targeting.durationrangesec.clone();
    duration_buckets.sort_unstable();

    let mut dedupe: HashMap<String, BidDedupe> = HashMap::new();
    let mut bids_to_remove: HashMap<BidderName, BTreeSet<usize>> = HashMap::new();

    let mut bidder_names: Vec<BidderName> = seat_bids.keys().cloned().collect();
    bidder_names.sort_unstable();

    for bidder_name in &bidder_names {
        let seat = &seat_bids[bidder_name];
        for (bid_index, typed) in seat.bids.iter().enumerate() {
            let (duration, mut category) = match &typed.bid_video {
                Some(video) => (video.duration, video.primary_category.clone()),
                None => (0, String::new()),
            };

            if category.is_empty() {
                // 出价必须带且只带一个 IAB 类目，才能翻译成广告服务器类目
                let iab = typed.bid.cat.as_deref().unwrap_or_default();
                if iab.len() != 1 {
                    bids_to_remove
                        .entry(bidder_name.clone())
                        .or_default()
                        .insert(bid_index);
                    continue;
                }
                match fetcher.fetch_categories(primary_ad_server, publisher, &iab[0]) {
                    Ok(mapped) if !mapped.is_empty() => category = mapped,
                    _ => {
                        bids_to_remove
                            .entry(bidder_name.clone())
                            .or_default()
                            .insert(bid_index);
                        continue;
                    }
                }
            }

            let price_bucket = targ_data
                .map(|t| t.price_granularity.price_bucket(typed.bid.price))
                .unwrap_or_default();

            // 时长向上取整到最小的不小于它的桶；超过最大桶的出价淘汰
            let mut rounded_duration = duration;
            if !duration_buckets.is_empty() {
                if duration > *duration_buckets.last().unwrap_or(&0) {
                    bids_to_remove
                        .entry(bidder_name.clone())
                        .or_default()
                        .insert(bid_index);
                    continue;
                }
                for bucket in &duration_buckets {
                    if duration <= *bucket {
                        rounded_duration = *bucket;
                        break;
                    }
                }
            }

            let category_duration =
                format!("{}_{}_{}s", price_bucket, category, rounded_duration);

            if let Some(incumbent) = dedupe.get(&category_duration) {
                if rng.gen_bool(0.5) {
                    // 在位者出局，新出价顶上
                    bids_to_remove
                        .entry(incumbent.bidder.clone())
                        .or_default()
                        .insert(incumbent.bid_index);
                    categories.remove(&incumbent.bid_id);
                } else {
                    bids_to_remove
                        .entry(bidder_name.clone())
                        .or_default()
                        .insert(bid_index);
                    continue;
                }
            }
            categories.insert(typed.bid.id.clone(), category_duration.clone());
            dedupe.insert(
                category_duration,
                BidDedupe {
                    bidder: bidder_name.clone(),
                    bid_index,
                    bid_id: typed.bid.id.clone(),
                },
            );
        }
    }

    for (bidder_name, indices) in bids_to_remove {
        if let Some(seat) = seat_bids.get_mut(&bidder_name) {
            for index in indices.iter().rev() {
                if *index < seat.bids.len() {
                    seat.bids.remove(*index);
                }
            }
        }
    }
    seat_bids.retain(|_, seat| !seat.bids.is_empty());

    Ok(categories)
}

/// 单个 bidder 的席位条目
fn make_seat_bid(
    seat: SeatBidResult,
    adapter: &BidderName,
    adapter_extra: &mut HashMap<BidderName, SeatResponseExtra>,
) -> SeatBid {
    let mut seat_ext = None;
    if let Some(raw) = seat.ext {
        match serde_json::to_value(ExtSeatBid { bidder: raw }) {
            Ok(value) => seat_ext = Some(value),
            Err(e) => {
                if let Some(extra) = adapter_extra.get_mut(adapter) {
                    extra.errors.push(BidderError::Unknown(format!(
                        "Error writing SeatBid.Ext: {}",
                        e
                    )));
                }
            }
        }
    }

    let mut bids = Vec::with_capacity(seat.bids.len());
    for typed in seat.bids {
        let bid_ext = ExtBid {
            bidder: typed.bid.ext.clone(),
            prebid: ExtBidPrebid {
                targeting: typed.bid_targets,
                bid_type: typed.bid_type,
                video: typed.bid_video,
            },
        };
        match serde_json::to_value(&bid_ext) {
            Ok(ext) => {
                let mut bid: Bid = typed.bid;
                bid.ext = Some(ext);
                bids.push(bid);
            }
            Err(e) => {
                if let Some(extra) = adapter_extra.get_mut(adapter) {
                    extra
                        .errors
                        .push(BidderError::Unknown(format!("Error writing Bid.Ext: {}", e)));
                }
            }
        }
    }

    SeatBid {
        bid: bids,
        seat: Some(adapter.clone()),
        group: Some(0),
        ext: seat_ext,
    }
}

/// 响应级扩展：每 bidder 的错误与耗时、请求超时回显、test 请求的
/// debug 块（解析后的请求 + 每 bidder 的外发调用记录）。
fn make_ext_bid_response(
    adapter_bids: &HashMap<BidderName, SeatBidResult>,
    adapter_extra: &HashMap<BidderName, SeatResponseExtra>,
    bid_request: &BidRequest,
    resolved_request: Option<Value>,
    request_errors: &[BidderError],
) -> ExtBidResponse {
    let mut ext = ExtBidResponse {
        errors: HashMap::with_capacity(adapter_extra.len()),
        responsetimemillis: HashMap::with_capacity(adapter_extra.len()),
        tmaxrequest: bid_request.tmax,
        debug: None,
    };

    if bid_request.is_test() {
        let mut httpcalls = HashMap::with_capacity(adapter_bids.len());
        for (bidder_name, seat) in adapter_bids {
            if !seat.http_calls.is_empty() {
                httpcalls.insert(bidder_name.clone(), seat.http_calls.clone());
            }
        }
        ext.debug = Some(ExtResponseDebug {
            httpcalls,
            resolvedrequest: resolved_request,
        });
    }

    for (bidder_name, extra) in adapter_extra {
        if !extra.errors.is_empty() {
            ext.errors.insert(
                bidder_name.clone(),
                extra
                    .errors
                    .iter()
                    .map(|err| ExtBidderError {
                        code: err.code(),
                        message: err.to_string(),
                    })
                    .collect(),
            );
        }
        ext.responsetimemillis
            .insert(bidder_name.clone(), extra.response_time_millis);
    }

    if !request_errors.is_empty() {
        ext.errors.insert(
            "prebid".to_string(),
            request_errors
                .iter()
                .map(|err| ExtBidderError {
                    code: err.code(),
                    message: err.to_string(),
                })
                .collect(),
        );
    }

    ext
}
