pub mod bidder;
pub mod ortb;
pub mod registry;
