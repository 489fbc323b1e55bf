//! # Storage Layout
//!
//! Key construction and typed accessors over the byte store. Every entity
//! family owns a stable 1-byte prefix; composite keys concatenate the
//! prefix with ASCII identifiers, `:` separators and big-endian integers
//! for numeric suffixes. Identifiers must not contain `:`.
//!
//! Blobs are bincode-encoded serde values; the encoding round-trips
//! bit-exactly and is stable across releases for a given chain.

use serde::de::DeserializeOwned;
use serde::Serialize;

use meridian_common::types::*;

use crate::store::Store;

// ═══════════════════════════════════════════════════════════════════════════
// Prefixes
// ═══════════════════════════════════════════════════════════════════════════

pub const MARKET_PREFIX: u8 = 0x01;
pub const ACCOUNT_PREFIX: u8 = 0x02;
pub const POSITION_PREFIX: u8 = 0x03;
pub const PRICE_INFO_PREFIX: u8 = 0x04;
pub const ORACLE_SOURCE_PREFIX: u8 = 0x05;
pub const SOURCE_PRICE_PREFIX: u8 = 0x06;
pub const FUNDING_RATE_PREFIX: u8 = 0x07;
pub const FUNDING_PAYMENT_PREFIX: u8 = 0x08;
pub const NEXT_FUNDING_TIME_PREFIX: u8 = 0x09;
pub const KLINE_PREFIX: u8 = 0x0a;
pub const EMA_PRICE_PREFIX: u8 = 0x0b;
pub const ORACLE_CONFIG_KEY: [u8; 1] = [0x0c];
pub const FUNDING_CONFIG_KEY: [u8; 1] = [0x0d];
pub const INSURANCE_FUND_PREFIX: u8 = 0x0e;
pub const LIQUIDATION_CONFIG_KEY: [u8; 1] = [0x0f];
pub const FUNDING_PAYMENT_SEQ_KEY: [u8; 1] = [0x10];
pub const LIQUIDATION_COOLDOWN_PREFIX: u8 = 0x11;

const SEP: u8 = b':';

// ═══════════════════════════════════════════════════════════════════════════
// Key Builders
// ═══════════════════════════════════════════════════════════════════════════

fn key1(prefix: u8, a: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + a.len());
    key.push(prefix);
    key.extend_from_slice(a.as_bytes());
    key
}

fn key2(prefix: u8, a: &str, b: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + a.len() + b.len());
    key.push(prefix);
    key.extend_from_slice(a.as_bytes());
    key.push(SEP);
    key.extend_from_slice(b.as_bytes());
    key
}

fn ts_bytes(ts: i64) -> [u8; 8] {
    // timestamps are non-negative; big-endian keeps key order = time order
    (ts.max(0) as u64).to_be_bytes()
}

pub fn market_key(market_id: &str) -> Vec<u8> {
    key1(MARKET_PREFIX, market_id)
}

pub fn account_key(trader: &str) -> Vec<u8> {
    key1(ACCOUNT_PREFIX, trader)
}

/// Positions are keyed `market:trader` so the funding walk is one ordered
/// prefix scan per market, trader-lexicographic.
pub fn position_key(market_id: &str, trader: &str) -> Vec<u8> {
    key2(POSITION_PREFIX, market_id, trader)
}

pub fn position_market_prefix(market_id: &str) -> Vec<u8> {
    let mut prefix = key1(POSITION_PREFIX, market_id);
    prefix.push(SEP);
    prefix
}

pub fn price_info_key(market_id: &str) -> Vec<u8> {
    key1(PRICE_INFO_PREFIX, market_id)
}

pub fn oracle_source_key(source_id: &str) -> Vec<u8> {
    key1(ORACLE_SOURCE_PREFIX, source_id)
}

pub fn source_price_key(source_id: &str, market_id: &str) -> Vec<u8> {
    key2(SOURCE_PRICE_PREFIX, source_id, market_id)
}

pub fn funding_rate_key(market_id: &str, timestamp: i64) -> Vec<u8> {
    let mut key = key1(FUNDING_RATE_PREFIX, market_id);
    key.push(SEP);
    key.extend_from_slice(&ts_bytes(timestamp));
    key
}

pub fn funding_rate_prefix(market_id: &str) -> Vec<u8> {
    let mut prefix = key1(FUNDING_RATE_PREFIX, market_id);
    prefix.push(SEP);
    prefix
}

pub fn funding_payment_key(payment_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(FUNDING_PAYMENT_PREFIX);
    key.extend_from_slice(&payment_id.to_be_bytes());
    key
}

pub fn next_funding_time_key(market_id: &str) -> Vec<u8> {
    key1(NEXT_FUNDING_TIME_PREFIX, market_id)
}

pub fn kline_key(market_id: &str, interval: KlineInterval, bucket_start: i64) -> Vec<u8> {
    let mut key = kline_prefix(market_id, interval);
    key.extend_from_slice(&ts_bytes(bucket_start));
    key
}

pub fn kline_prefix(market_id: &str, interval: KlineInterval) -> Vec<u8> {
    let mut prefix = key1(KLINE_PREFIX, market_id);
    prefix.push(SEP);
    prefix.extend_from_slice(&(interval.secs() as u32).to_be_bytes());
    prefix.push(SEP);
    prefix
}

pub fn ema_price_key(market_id: &str) -> Vec<u8> {
    key1(EMA_PRICE_PREFIX, market_id)
}

pub fn insurance_fund_key(fund_id: &str) -> Vec<u8> {
    key1(INSURANCE_FUND_PREFIX, fund_id)
}

pub fn liquidation_cooldown_key(market_id: &str, trader: &str) -> Vec<u8> {
    key2(LIQUIDATION_COOLDOWN_PREFIX, market_id, trader)
}

// ═══════════════════════════════════════════════════════════════════════════
// Serialization
// ═══════════════════════════════════════════════════════════════════════════

fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("entity encodes")
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
    bincode::deserialize(bytes).expect("entity decodes")
}

// ═══════════════════════════════════════════════════════════════════════════
// Markets
// ═══════════════════════════════════════════════════════════════════════════

pub fn get_market<S: Store>(store: &S, market_id: &str) -> Option<Market> {
    store.get(&market_key(market_id)).map(|b| decode(&b))
}

pub fn set_market<S: Store>(store: &mut S, market: &Market) {
    store.set(&market_key(&market.market_id), encode(market));
}

pub fn iter_markets<S: Store>(store: &S) -> Vec<Market> {
    store
        .iter_prefix(&[MARKET_PREFIX])
        .iter()
        .map(|(_, v)| decode(v))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Accounts
// ═══════════════════════════════════════════════════════════════════════════

pub fn get_account<S: Store>(store: &S, trader: &str) -> Option<Account> {
    store.get(&account_key(trader)).map(|b| decode(&b))
}

pub fn set_account<S: Store>(store: &mut S, account: &Account) {
    store.set(&account_key(&account.trader), encode(account));
}

pub fn iter_accounts<S: Store>(store: &S) -> Vec<Account> {
    store
        .iter_prefix(&[ACCOUNT_PREFIX])
        .iter()
        .map(|(_, v)| decode(v))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Positions
// ═══════════════════════════════════════════════════════════════════════════

pub fn get_position<S: Store>(store: &S, market_id: &str, trader: &str) -> Option<Position> {
    store.get(&position_key(market_id, trader)).map(|b| decode(&b))
}

pub fn set_position<S: Store>(store: &mut S, position: &Position) {
    store.set(
        &position_key(&position.market_id, &position.trader),
        encode(position),
    );
}

pub fn delete_position<S: Store>(store: &mut S, market_id: &str, trader: &str) {
    store.delete(&position_key(market_id, trader));
}

/// All positions of one market, trader-lexicographic.
pub fn iter_market_positions<S: Store>(store: &S, market_id: &str) -> Vec<Position> {
    store
        .iter_prefix(&position_market_prefix(market_id))
        .iter()
        .map(|(_, v)| decode(v))
        .collect()
}

/// Every open position, market-then-trader lexicographic.
pub fn iter_all_positions<S: Store>(store: &S) -> Vec<Position> {
    store
        .iter_prefix(&[POSITION_PREFIX])
        .iter()
        .map(|(_, v)| decode(v))
        .collect()
}

pub fn iter_trader_positions<S: Store>(store: &S, trader: &str) -> Vec<Position> {
    iter_all_positions(store)
        .into_iter()
        .filter(|p| p.trader == trader)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// Prices
// ═══════════════════════════════════════════════════════════════════════════

pub fn get_price_info<S: Store>(store: &S, market_id: &str) -> Option<PriceInfo> {
    store.get(&price_info_key(market_id)).map(|b| decode(&b))
}

pub fn set_price_info<S: Store>(store: &mut S, info: &PriceInfo) {
    store.set(&price_info_key(&info.market_id), encode(info));
}

pub fn get_ema_price<S: Store>(store: &S, market_id: &str) -> Option<EmaPrice> {
    store.get(&ema_price_key(market_id)).map(|b| decode(&b))
}

pub fn set_ema_price<S: Store>(store: &mut S, ema: &EmaPrice) {
    store.set(&ema_price_key(&ema.market_id), encode(ema));
}

// ═══════════════════════════════════════════════════════════════════════════
// Oracle
// ═══════════════════════════════════════════════════════════════════════════

pub fn get_oracle_source<S: Store>(store: &S, source_id: &str) -> Option<OracleSource> {
    store.get(&oracle_source_key(source_id)).map(|b| decode(&b))
}

pub fn set_oracle_source<S: Store>(store: &mut S, source: &OracleSource) {
    store.set(&oracle_source_key(&source.source_id), encode(source));
}

/// Sources in source-id lexicographic order.
pub fn iter_oracle_sources<S: Store>(store: &S) -> Vec<OracleSource> {
    store
        .iter_prefix(&[ORACLE_SOURCE_PREFIX])
        .iter()
        .map(|(_, v)| decode(v))
        .collect()
}

pub fn get_source_price<S: Store>(
    store: &S,
    source_id: &str,
    market_id: &str,
) -> Option<OracleSourcePrice> {
    store
        .get(&source_price_key(source_id, market_id))
        .map(|b| decode(&b))
}

pub fn set_source_price<S: Store>(store: &mut S, price: &OracleSourcePrice) {
    store.set(
        &source_price_key(&price.source_id, &price.market_id),
        encode(price),
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Funding
// ═══════════════════════════════════════════════════════════════════════════

pub fn append_funding_rate<S: Store>(store: &mut S, rate: &FundingRate) {
    store.set(
        &funding_rate_key(&rate.market_id, rate.timestamp),
        encode(rate),
    );
}

pub fn latest_funding_rate<S: Store>(store: &S, market_id: &str) -> Option<FundingRate> {
    store
        .iter_prefix(&funding_rate_prefix(market_id))
        .last()
        .map(|(_, v)| decode(v))
}

pub fn iter_funding_rates<S: Store>(
    store: &S,
    market_id: &str,
    from: i64,
    to: i64,
) -> Vec<FundingRate> {
    store
        .iter_prefix(&funding_rate_prefix(market_id))
        .iter()
        .map(|(_, v)| decode::<FundingRate>(v))
        .filter(|r| r.timestamp >= from && r.timestamp <= to)
        .collect()
}

/// Allocate the next monotonically-increasing funding payment id.
pub fn next_funding_payment_id<S: Store>(store: &mut S) -> u64 {
    let next = store
        .get(&FUNDING_PAYMENT_SEQ_KEY)
        .map(|b| decode::<u64>(&b))
        .unwrap_or(0)
        + 1;
    store.set(&FUNDING_PAYMENT_SEQ_KEY, encode(&next));
    next
}

pub fn append_funding_payment<S: Store>(store: &mut S, payment: &FundingPayment) {
    store.set(&funding_payment_key(payment.payment_id), encode(payment));
}

pub fn iter_funding_payments<S: Store>(store: &S) -> Vec<FundingPayment> {
    store
        .iter_prefix(&[FUNDING_PAYMENT_PREFIX])
        .iter()
        .map(|(_, v)| decode(v))
        .collect()
}

pub fn get_next_funding_time<S: Store>(store: &S, market_id: &str) -> Option<i64> {
    store.get(&next_funding_time_key(market_id)).map(|b| decode(&b))
}

pub fn set_next_funding_time<S: Store>(store: &mut S, market_id: &str, time: i64) {
    store.set(&next_funding_time_key(market_id), encode(&time));
}

// ═══════════════════════════════════════════════════════════════════════════
// K-lines
// ═══════════════════════════════════════════════════════════════════════════

pub fn get_kline<S: Store>(
    store: &S,
    market_id: &str,
    interval: KlineInterval,
    bucket_start: i64,
) -> Option<Kline> {
    store
        .get(&kline_key(market_id, interval, bucket_start))
        .map(|b| decode(&b))
}

pub fn set_kline<S: Store>(store: &mut S, kline: &Kline) {
    store.set(
        &kline_key(&kline.market_id, kline.interval, kline.bucket_start),
        encode(kline),
    );
}

/// Candles with `from <= bucket_start < to`, ascending by bucket.
pub fn iter_klines<S: Store>(
    store: &S,
    market_id: &str,
    interval: KlineInterval,
    from: i64,
    to: i64,
) -> Vec<Kline> {
    store
        .iter_prefix(&kline_prefix(market_id, interval))
        .iter()
        .map(|(_, v)| decode::<Kline>(v))
        .filter(|k| k.bucket_start >= from && k.bucket_start < to)
        .collect()
}

pub fn latest_kline<S: Store>(
    store: &S,
    market_id: &str,
    interval: KlineInterval,
) -> Option<Kline> {
    store
        .iter_prefix(&kline_prefix(market_id, interval))
        .last()
        .map(|(_, v)| decode(v))
}

// ═══════════════════════════════════════════════════════════════════════════
// Configuration singletons
// ═══════════════════════════════════════════════════════════════════════════

pub fn get_oracle_config<S: Store>(store: &S) -> OracleConfig {
    store
        .get(&ORACLE_CONFIG_KEY)
        .map(|b| decode(&b))
        .unwrap_or_default()
}

pub fn set_oracle_config<S: Store>(store: &mut S, config: &OracleConfig) {
    store.set(&ORACLE_CONFIG_KEY, encode(config));
}

pub fn get_funding_config<S: Store>(store: &S) -> FundingConfig {
    store
        .get(&FUNDING_CONFIG_KEY)
        .map(|b| decode(&b))
        .unwrap_or_default()
}

pub fn set_funding_config<S: Store>(store: &mut S, config: &FundingConfig) {
    store.set(&FUNDING_CONFIG_KEY, encode(config));
}

pub fn get_liquidation_config<S: Store>(store: &S) -> LiquidationConfig {
    store
        .get(&LIQUIDATION_CONFIG_KEY)
        .map(|b| decode(&b))
        .unwrap_or_default()
}

pub fn set_liquidation_config<S: Store>(store: &mut S, config: &LiquidationConfig) {
    store.set(&LIQUIDATION_CONFIG_KEY, encode(config));
}

// ═══════════════════════════════════════════════════════════════════════════
// Insurance funds / liquidation cooldowns
// ═══════════════════════════════════════════════════════════════════════════

pub fn get_insurance_fund<S: Store>(store: &S, fund_id: &str) -> Option<InsuranceFund> {
    store.get(&insurance_fund_key(fund_id)).map(|b| decode(&b))
}

pub fn set_insurance_fund<S: Store>(store: &mut S, fund: &InsuranceFund) {
    store.set(&insurance_fund_key(&fund.fund_id), encode(fund));
}

pub fn get_liquidation_cooldown<S: Store>(
    store: &S,
    market_id: &str,
    trader: &str,
) -> Option<i64> {
    store
        .get(&liquidation_cooldown_key(market_id, trader))
        .map(|b| decode(&b))
}

pub fn set_liquidation_cooldown<S: Store>(
    store: &mut S,
    market_id: &str,
    trader: &str,
    time: i64,
) {
    store.set(&liquidation_cooldown_key(market_id, trader), encode(&time));
}
