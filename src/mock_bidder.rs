use axum::serve;
use axum::{routing::post, Json, Router};
use rand::Rng;
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration};
use tracing::info;

use crate::openrtb::request::BidRequest;
use crate::openrtb::response::{Bid, BidResponse, SeatBid};

/// 模拟需求方竞价响应
/// 根据 impression 类型随机生成出价，adm 按广告类型给出对应格式的素材。
async fn handle_mock_bid(Json(request): Json<BidRequest>) -> Json<BidResponse> {
    info!(
        "Mock bidder received BidRequest: id={}, imp_count={}",
        request.id,
        request.imp.len()
    );

    // 模拟对端处理延迟（20 ~ 80 毫秒）
    let delay_ms = rand::thread_rng().gen_range(20..80);
    sleep(Duration::from_millis(delay_ms)).await;

    let mut bids = Vec::new();

    for imp in &request.imp {
        let bid_id = format!("bid-{}", imp.id);
        // 读取 bidfloor，若为 None 则按 0.5 起价
        let bidfloor = imp.bidfloor.unwrap_or(0.5);
        let multiplier = if imp.banner.is_some() {
            rand::thread_rng().gen_range(1.0..3.0)
        } else if imp.video.is_some() {
            // 视频广告投入较高，multiplier 范围上调
            rand::thread_rng().gen_range(1.5..3.5)
        } else if imp.native.is_some() {
            rand::thread_rng().gen_range(0.8..2.0)
        } else {
            rand::thread_rng().gen_range(1.0..2.0)
        };
        let price = bidfloor * multiplier;

        // 根据 impression 类型决定 adm 的内容
        let (adm, w, h) = if let Some(banner) = &imp.banner {
            (
                Some(format!(
                    "<html><body>Mock Banner Ad<img src=\"http://tracker.local/impression?bid={bid_id}\" style=\"display:none;\" /></body></html>",
                )),
                banner.w.map(|w| w as u64),
                banner.h.map(|h| h as u64),
            )
        } else if imp.video.is_some() {
            // 视频广告返回 VAST XML
            (
                Some(format!(
                    r#"<VAST version="3.0"><Ad id="{bid_id}"><InLine><AdSystem>Mock Bidder</AdSystem><AdTitle>Mock Video Ad</AdTitle><Creatives></Creatives></InLine></Ad></VAST>"#,
                )),
                None,
                None,
            )
        } else if imp.native.is_some() {
            (
                Some(format!(
                    r#"{{"native":{{"assets":[{{"title":{{"text":"Mock Native Ad"}}}}],"impression_tracking":"http://tracker.local/impression?bid={bid_id}"}}}}"#,
                )),
                None,
                None,
            )
        } else {
            (None, None, None)
        };

        bids.push(Bid {
            id: bid_id.clone(),
            impid: imp.id.clone(),
            price,
            adm,
            nurl: Some(format!("http://tracker.local/win?bid={bid_id}")),
            crid: Some(format!("creative-{}", imp.id)),
            cid: Some("campaign-1".to_string()),
            cat: Some(vec!["IAB1".to_string()]),
            w,
            h,
            ..Default::default()
        });
    }

    let seatbid = SeatBid {
        bid: bids,
        seat: Some("mock_seat".to_string()),
        group: Some(0),
        ext: None,
    };

    Json(BidResponse {
        id: request.id.clone(),
        seatbid: vec![seatbid],
        cur: Some("USD".to_string()),
        ..Default::default()
    })
}

/// 启动 Mock bidder 服务
/// 服务监听指定端口（例如 9001），路由为 `/bid`
pub async fn start_mock_bidder_server(port: u16) {
    let app = Router::new().route("/bid", post(handle_mock_bid));

    let addr = format!("0.0.0.0:{}", port);
    info!("Mock bidder running at http://{}", addr);

    let listener = TcpListener::bind(&addr).await.unwrap();
    serve(listener, app).await.unwrap();
}
