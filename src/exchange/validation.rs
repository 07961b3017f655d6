// src/exchange/validation.rs
//
// 出价后置过滤：结构不完整的出价在进入拍卖前剔除并转成错误，
// 让发布方能信任响应里的每一条出价。价格只在 runner 里换算，这里不动。

use crate::currency::rates::{parse_iso, DEFAULT_CURRENCY};
use crate::errors::BidderError;
use crate::openrtb::request::BidRequest;

use super::bidder::SeatBidResult;

/// 过滤一个席位的出价。席位货币不合法时整个席位清空，只报一条错误；
/// 否则逐条校验，每丢一条出价产生一条错误。
pub fn remove_invalid_bids(request: &BidRequest, seat_bid: &mut SeatBidResult) -> Vec<BidderError> {
    if seat_bid.bids.is_empty() {
        return Vec::new();
    }

    if let Err(err) = validate_currency(request.cur.as_deref(), &seat_bid.currency) {
        seat_bid.bids.clear();
        return vec![err];
    }

    let mut errs = Vec::new();
    seat_bid.bids.retain(|typed| match validate_bid(typed) {
        Ok(()) => true,
        Err(err) => {
            errs.push(err);
            false
        }
    });
    errs
}

/// 席位货币必须是合法 ISO 代码，且在请求允许的货币列表里
/// （列表为空时隐含 [USD]）。
fn validate_currency(allowed: Option<&[String]>, bid_currency: &str) -> Result<(), BidderError> {
    let currency = if bid_currency.is_empty() {
        DEFAULT_CURRENCY.to_string()
    } else {
        parse_iso(bid_currency).map_err(|e| BidderError::Unknown(e.to_string()))?
    };

    let default_allowed = [DEFAULT_CURRENCY.to_string()];
    let allowed = match allowed {
        Some(list) if !list.is_empty() => list,
        _ => &default_allowed,
    };
    if allowed
        .iter()
        .any(|candidate| candidate.to_uppercase() == currency)
    {
        Ok(())
    } else {
        Err(BidderError::Unknown(format!(
            "Bid currency is not allowed. Was '{}', wants: ['{}']",
            currency,
            allowed.join("', '")
        )))
    }
}

fn validate_bid(typed: &crate::adapters::bidder::TypedBid) -> Result<(), BidderError> {
    let bid = &typed.bid;
    if bid.id.is_empty() {
        return Err(BidderError::Unknown(
            "Bid missing required field 'id'".to_string(),
        ));
    }
    if bid.impid.is_empty() {
        return Err(BidderError::Unknown(format!(
            "Bid \"{}\" missing required field 'impid'",
            bid.id
        )));
    }
    if bid.price <= 0.0 {
        return Err(BidderError::Unknown(format!(
            "Bid \"{}\" does not contain a positive 'price'",
            bid.id
        )));
    }
    if bid.crid.as_deref().unwrap_or_default().is_empty() {
        return Err(BidderError::Unknown(format!(
            "Bid \"{}\" missing creative ID",
            bid.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::bidder::TypedBid;
    use crate::openrtb::ext::BidType;
    use crate::openrtb::response::Bid;

    fn good_bid(id: &str) -> TypedBid {
        TypedBid::new(
            Bid {
                id: id.to_string(),
                impid: "imp-1".to_string(),
                price: 0.45,
                crid: Some("creative-1".to_string()),
                ..Default::default()
            },
            BidType::Banner,
        )
    }

    fn seat(currency: &str, bids: Vec<TypedBid>) -> SeatBidResult {
        SeatBidResult {
            bids,
            currency: currency.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn keeps_valid_bids() {
        let mut seat_bid = seat("USD", vec![good_bid("one"), good_bid("two")]);
        let errs = remove_invalid_bids(&BidRequest::default(), &mut seat_bid);
        assert!(errs.is_empty());
        assert_eq!(seat_bid.bids.len(), 2);
    }

    #[test]
    fn drops_structurally_broken_bids() {
        let mut no_id = good_bid("x");
        no_id.bid.id = String::new();
        let mut no_imp = good_bid("no-imp");
        no_imp.bid.impid = String::new();
        let mut free = good_bid("free");
        free.bid.price = 0.0;
        let mut no_crid = good_bid("no-crid");
        no_crid.bid.crid = None;

        let mut seat_bid = seat(
            "USD",
            vec![good_bid("ok"), no_id, no_imp, free, no_crid],
        );
        let errs = remove_invalid_bids(&BidRequest::default(), &mut seat_bid);
        assert_eq!(seat_bid.bids.len(), 1);
        assert_eq!(seat_bid.bids[0].bid.id, "ok");
        let messages: Vec<String> = errs.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "Bid missing required field 'id'",
                "Bid \"no-imp\" missing required field 'impid'",
                "Bid \"free\" does not contain a positive 'price'",
                "Bid \"no-crid\" missing creative ID",
            ]
        );
    }

    #[test]
    fn empty_currency_defaults_to_usd() {
        let mut seat_bid = seat("", vec![good_bid("one")]);
        let errs = remove_invalid_bids(&BidRequest::default(), &mut seat_bid);
        assert!(errs.is_empty());
        assert_eq!(seat_bid.bids.len(), 1);
    }

    #[test]
    fn disallowed_currency_empties_the_seat() {
        let request = BidRequest {
            cur: Some(vec!["EUR".to_string()]),
            ..Default::default()
        };
        let mut seat_bid = seat("USD", vec![good_bid("one"), good_bid("two")]);
        let errs = remove_invalid_bids(&request, &mut seat_bid);
        assert!(seat_bid.bids.is_empty());
        assert_eq!(errs.len(), 1);
        assert_eq!(
            errs[0].to_string(),
            "Bid currency is not allowed. Was 'USD', wants: ['EUR']"
        );
    }

    #[test]
    fn unparsable_currency_empties_the_seat() {
        let mut seat_bid = seat("US DOLLARS", vec![good_bid("one")]);
        let errs = remove_invalid_bids(&BidRequest::default(), &mut seat_bid);
        assert!(seat_bid.bids.is_empty());
        assert_eq!(errs.len(), 1);
    }
}
