// src/adapters/ortb.rs

use crate::errors::BidderError;
use crate::openrtb::ext::{BidType, ExtBidPrebidVideo};
use crate::openrtb::request::BidRequest;
use crate::openrtb::response::BidResponse;

use super::bidder::{Bidder, BidderResponse, RequestData, ResponseData, TypedBid};

/// **通用 OpenRTB adapter**：把整个请求原样 POST 给对端的竞价端点，
/// 对端按标准 OpenRTB 响应。自建 DSP 和本地 mock 端点都走它接入。
pub struct OrtbBidder {
    name: String,
    endpoint: String,
}

impl OrtbBidder {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }

    /// 按 impid 找到对应 imp，用它声明的媒体描述推断出价类型
    fn media_type(request: &BidRequest, impid: &str) -> Option<BidType> {
        let imp = request.imp.iter().find(|imp| imp.id == impid)?;
        if imp.banner.is_some() {
            Some(BidType::Banner)
        } else if imp.video.is_some() {
            Some(BidType::Video)
        } else if imp.audio.is_some() {
            Some(BidType::Audio)
        } else if imp.native.is_some() {
            Some(BidType::Native)
        } else {
            None
        }
    }
}

impl Bidder for OrtbBidder {
    fn name(&self) -> &str {
        &self.name
    }

    fn make_requests(&self, request: &BidRequest) -> (Vec<RequestData>, Vec<BidderError>) {
        let body = match serde_json::to_vec(request) {
            Ok(body) => body,
            Err(e) => {
                return (
                    Vec::new(),
                    vec![BidderError::BadInput(format!(
                        "Failed to marshal bid request: {}",
                        e
                    ))],
                )
            }
        };
        (
            vec![RequestData {
                method: "POST".to_string(),
                uri: self.endpoint.clone(),
                body,
                headers: vec![
                    ("Content-Type".to_string(), "application/json".to_string()),
                    ("Accept".to_string(), "application/json".to_string()),
                ],
            }],
            Vec::new(),
        )
    }

    fn make_bids(
        &self,
        request: &BidRequest,
        _outgoing: &RequestData,
        response: &ResponseData,
    ) -> (Option<BidderResponse>, Vec<BidderError>) {
        // 204 = 明确不出价
        if response.status_code == 204 || response.body.is_empty() {
            return (None, Vec::new());
        }

        let parsed: BidResponse = match serde_json::from_slice(&response.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                return (
                    None,
                    vec![BidderError::BadServerResponse(format!(
                        "Failed to unmarshal bid response: {}",
                        e
                    ))],
                )
            }
        };

        let mut result = BidderResponse::new();
        if let Some(cur) = parsed.cur {
            result.currency = cur;
        }
        let mut errs = Vec::new();
        for seatbid in parsed.seatbid {
            for bid in seatbid.bid {
                match Self::media_type(request, &bid.impid) {
                    Some(bid_type) => {
                        let mut typed = TypedBid::new(bid, bid_type);
                        if bid_type == BidType::Video {
                            // 时长来自请求里声明的上限，类目留给素材分类
                            let duration = request
                                .imp
                                .iter()
                                .find(|imp| imp.id == typed.bid.impid)
                                .and_then(|imp| imp.video.as_ref())
                                .and_then(|video| video.maxduration)
                                .unwrap_or(0);
                            typed.bid_video = Some(ExtBidPrebidVideo {
                                duration,
                                primary_category: String::new(),
                            });
                        }
                        result.bids.push(typed);
                    }
                    None => errs.push(BidderError::BadServerResponse(format!(
                        "Bid \"{}\" has no matching imp \"{}\" in the request",
                        typed_bid_id(&bid.id),
                        bid.impid
                    ))),
                }
            }
        }
        (Some(result), errs)
    }
}

fn typed_bid_id(id: &str) -> &str {
    if id.is_empty() {
        "<unknown>"
    } else {
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openrtb::request::{Banner, Imp, Video};

    fn request() -> BidRequest {
        BidRequest {
            id: "req-1".to_string(),
            imp: vec![
                Imp {
                    id: "imp-banner".to_string(),
                    banner: Some(Banner {
                        w: Some(300),
                        h: Some(250),
                        format: None,
                    }),
                    ..Default::default()
                },
                Imp {
                    id: "imp-video".to_string(),
                    video: Some(Video {
                        mimes: vec!["video/mp4".to_string()],
                        maxduration: Some(30),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn make_requests_posts_the_whole_request() {
        let bidder = OrtbBidder::new("acme", "http://acme.local/bid");
        let (requests, errs) = bidder.make_requests(&request());
        assert!(errs.is_empty());
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].uri, "http://acme.local/bid");
        let round_trip: BidRequest = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(round_trip.id, "req-1");
    }

    #[test]
    fn make_bids_maps_media_types() {
        let bidder = OrtbBidder::new("acme", "http://acme.local/bid");
        let req = request();
        let (outgoing, _) = bidder.make_requests(&req);
        let body = br#"{
            "id": "req-1",
            "cur": "EUR",
            "seatbid": [{"bid": [
                {"id": "b1", "impid": "imp-banner", "price": 1.5, "crid": "c1"},
                {"id": "b2", "impid": "imp-video", "price": 2.5, "crid": "c2"},
                {"id": "b3", "impid": "imp-missing", "price": 0.5, "crid": "c3"}
            ]}]
        }"#;
        let response = ResponseData {
            status_code: 200,
            body: body.to_vec(),
            headers: Vec::new(),
        };
        let (parsed, errs) = bidder.make_bids(&req, &outgoing[0], &response);
        let parsed = parsed.unwrap();
        assert_eq!(parsed.currency, "EUR");
        assert_eq!(parsed.bids.len(), 2);
        assert_eq!(parsed.bids[0].bid_type, BidType::Banner);
        assert_eq!(parsed.bids[1].bid_type, BidType::Video);
        assert_eq!(parsed.bids[1].bid_video.as_ref().unwrap().duration, 30);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].code(), 3);
    }

    #[test]
    fn make_bids_no_content() {
        let bidder = OrtbBidder::new("acme", "http://acme.local/bid");
        let req = request();
        let (outgoing, _) = bidder.make_requests(&req);
        let response = ResponseData {
            status_code: 204,
            body: Vec::new(),
            headers: Vec::new(),
        };
        let (parsed, errs) = bidder.make_bids(&req, &outgoing[0], &response);
        assert!(parsed.is_none());
        assert!(errs.is_empty());
    }

    #[test]
    fn make_bids_garbage_body() {
        let bidder = OrtbBidder::new("acme", "http://acme.local/bid");
        let req = request();
        let (outgoing, _) = bidder.make_requests(&req);
        let response = ResponseData {
            status_code: 200,
            body: b"<html>not json</html>".to_vec(),
            headers: Vec::new(),
        };
        let (parsed, errs) = bidder.make_bids(&req, &outgoing[0], &response);
        assert!(parsed.is_none());
        assert_eq!(errs.len(), 1);
        assert!(matches!(errs[0], BidderError::BadServerResponse(_)));
    }
}
