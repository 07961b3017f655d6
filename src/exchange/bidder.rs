// src/exchange/bidder.rs
//
// 单个 bidder 的执行器：调 adapter 生成外发请求，在共享截止时间内
// 并发打出去，逐个响应解码成出价，再做价格调整和汇率归一。
// 这里只处理"一个席位内部"能完成的事，需要看齐全体席位的逻辑在 exchange。

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use crate::adapters::bidder::{Bidder, BidderResponse, RequestData, ResponseData, TypedBid};
use crate::currency::rates::{Conversions, DEFAULT_CURRENCY};
use crate::errors::BidderError;
use crate::openrtb::ext::ExtHttpCall;
use crate::openrtb::request::BidRequest;

/// 一个 bidder 跑完一轮的产出
#[derive(Debug, Default)]
pub struct SeatBidResult {
    pub bids: Vec<TypedBid>,
    /// 出价统一换算到的货币
    pub currency: String,
    /// test = 1 时的外发调用记录
    pub http_calls: Vec<ExtHttpCall>,
    /// 席位级扩展，原样进入 `seatbid.ext.bidder`
    pub ext: Option<Value>,
}

struct HttpCallInfo {
    request: RequestData,
    response: Option<ResponseData>,
    error: Option<BidderError>,
}

#[derive(Clone)]
pub struct BidderRunner {
    client: reqwest::Client,
}

impl BidderRunner {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// 跑一个 adapter。错误描述这个席位"为什么缺了一部分出价"，
    /// 随结果一起返回，绝不让单个 bidder 的问题往外扩散。
    pub async fn request_bid(
        &self,
        bidder: &dyn Bidder,
        request: &BidRequest,
        deadline: Instant,
        bid_adjustment: f64,
        conversions: &dyn Conversions,
    ) -> (Option<SeatBidResult>, Vec<BidderError>) {
        let (req_data, mut errs) = bidder.make_requests(request);

        if req_data.is_empty() {
            // 既没有请求也没有解释，替 adapter 补一个错误
            if errs.is_empty() {
                errs.push(BidderError::FailedToRequestBids(
                    "The adapter failed to generate any bid requests, but also failed to generate an error explaining why"
                        .to_string(),
                ));
            }
            return (None, errs);
        }

        // 只有一个请求就在当前任务里发，多个才开并发
        let count = req_data.len();
        let (tx, mut rx) = mpsc::channel::<HttpCallInfo>(count);
        if count == 1 {
            let data = req_data.into_iter().next().unwrap_or_default();
            let info = do_request(self.client.clone(), data, deadline).await;
            let _ = tx.send(info).await;
        } else {
            for data in req_data {
                let client = self.client.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let info = do_request(client, data, deadline).await;
                    let _ = tx.send(info).await;
                });
            }
        }
        drop(tx);

        let mut seat_bid = SeatBidResult {
            bids: Vec::with_capacity(count),
            currency: DEFAULT_CURRENCY.to_string(),
            http_calls: Vec::with_capacity(if request.is_test() { count } else { 0 }),
            ext: None,
        };

        // 超时发生在中途时，已完成的响应照收不误
        for _ in 0..count {
            let Some(info) = rx.recv().await else { break };
            if request.is_test() {
                seat_bid.http_calls.push(make_debug_ext(&info));
            }
            match (&info.error, &info.response) {
                (None, Some(response)) => {
                    let (maybe_response, more_errs) =
                        bidder.make_bids(request, &info.request, response);
                    errs.extend(more_errs);
                    if let Some(bid_response) = maybe_response {
                        if let Some(err) = convert_bids(
                            &mut seat_bid,
                            bid_response,
                            request,
                            bid_adjustment,
                            conversions,
                        ) {
                            errs.push(err);
                        }
                    }
                }
                _ => {
                    if let Some(err) = info.error {
                        errs.push(err);
                    }
                }
            }
        }

        (Some(seat_bid), errs)
    }
}

/// 把一次响应里的出价并进席位结果：缺省货币补 USD，按请求允许的货币
/// 顺序找第一个有汇率的目标，价格乘上调整系数与汇率。找不到汇率时
/// 这批出价整体放弃，把最后一个换算错误交给调用方。
fn convert_bids(
    seat_bid: &mut SeatBidResult,
    mut bid_response: BidderResponse,
    request: &BidRequest,
    bid_adjustment: f64,
    conversions: &dyn Conversions,
) -> Option<BidderError> {
    if bid_response.currency.is_empty() {
        bid_response.currency = DEFAULT_CURRENCY.to_string();
    }
    let default_allowed = [DEFAULT_CURRENCY.to_string()];
    let allowed: &[String] = match &request.cur {
        Some(cur) if !cur.is_empty() => cur,
        _ => &default_allowed,
    };

    let mut conversion: Option<(f64, &String)> = None;
    let mut last_err = None;
    for target in allowed {
        match conversions.get_rate(&bid_response.currency, target) {
            Ok(rate) => {
                conversion = Some((rate, target));
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }

    match conversion {
        Some((rate, target)) => {
            seat_bid.currency = target.clone();
            for mut typed in bid_response.bids {
                typed.bid.price = typed.bid.price * bid_adjustment * rate;
                seat_bid.bids.push(typed);
            }
            None
        }
        None => last_err.map(BidderError::from),
    }
}

/// 发出一次 HTTP 调用。截止时间同时约束发送与读体；
/// [200, 400) 之外的状态码折算成 BadServerResponse。
async fn do_request(
    client: reqwest::Client,
    data: RequestData,
    deadline: Instant,
) -> HttpCallInfo {
    let method = match data.method.parse::<reqwest::Method>() {
        Ok(method) => method,
        Err(e) => {
            return HttpCallInfo {
                error: Some(BidderError::BadInput(format!(
                    "Invalid HTTP method \"{}\": {}",
                    data.method, e
                ))),
                request: data,
                response: None,
            }
        }
    };

    let mut builder = client.request(method, &data.uri);
    for (key, value) in &data.headers {
        builder = builder.header(key, value);
    }
    builder = builder.body(data.body.clone());

    let response = match timeout_at(deadline, builder.send()).await {
        Err(_) => {
            return HttpCallInfo {
                request: data,
                response: None,
                error: Some(BidderError::Timeout("context deadline exceeded".to_string())),
            }
        }
        Ok(Err(e)) => {
            return HttpCallInfo {
                request: data,
                response: None,
                error: Some(BidderError::Unknown(e.to_string())),
            }
        }
        Ok(Ok(response)) => response,
    };

    let status_code = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                v.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let body = match timeout_at(deadline, response.bytes()).await {
        Err(_) => {
            return HttpCallInfo {
                request: data,
                response: None,
                error: Some(BidderError::Timeout("context deadline exceeded".to_string())),
            }
        }
        Ok(Err(e)) => {
            return HttpCallInfo {
                request: data,
                response: None,
                error: Some(BidderError::Unknown(e.to_string())),
            }
        }
        Ok(Ok(body)) => body.to_vec(),
    };

    let error = if !(200..400).contains(&status_code) {
        Some(BidderError::BadServerResponse(format!(
            "Server responded with failure status: {}. Set request.test = 1 for debugging info.",
            status_code
        )))
    } else {
        None
    };

    HttpCallInfo {
        request: data,
        response: Some(ResponseData {
            status_code,
            body,
            headers,
        }),
        error,
    }
}

/// 调用记录转 debug 结构。出错的调用只保留已知的部分。
fn make_debug_ext(info: &HttpCallInfo) -> ExtHttpCall {
    match (&info.error, &info.response) {
        (None, Some(response)) => ExtHttpCall {
            uri: info.request.uri.clone(),
            requestbody: String::from_utf8_lossy(&info.request.body).into_owned(),
            responsebody: String::from_utf8_lossy(&response.body).into_owned(),
            status: Some(response.status_code),
        },
        _ => ExtHttpCall {
            uri: info.request.uri.clone(),
            requestbody: String::from_utf8_lossy(&info.request.body).into_owned(),
            ..Default::default()
        },
    }
}
