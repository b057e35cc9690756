//! Miner API clients for external services.
//!
//! This crate provides HTTP clients for:
//! - Price feed: native-asset fiat price, with a constant fallback

mod price_feed;

pub use price_feed::{
    extract_price, PriceFeedClient, DEFAULT_PRICE, DEFAULT_PRICE_FIELD, DEFAULT_PRICE_URL,
};
