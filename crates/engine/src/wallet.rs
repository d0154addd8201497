//! Per-asset balance ledger and conversion into a single asset.

use crate::book_walker::{walk_book, Denomination};
use crate::error::EngineError;
use crate::plan::MarketDirectory;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spot_arb_core::OrderBook;
use std::collections::{BTreeMap, HashMap};

/// Book snapshot keyed by symbol.
pub type Books = HashMap<String, OrderBook>;

/// Signed balances keyed by asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wallet {
    balances: BTreeMap<String, Decimal>,
}

impl Wallet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_balance(mut self, asset: &str, amount: Decimal) -> Self {
        self.credit(asset, amount);
        self
    }

    pub fn credit(&mut self, asset: &str, amount: Decimal) {
        *self.balances.entry(asset.to_string()).or_default() += amount;
    }

    pub fn debit(&mut self, asset: &str, amount: Decimal) {
        *self.balances.entry(asset.to_string()).or_default() -= amount;
    }

    #[must_use]
    pub fn get(&self, asset: &str) -> Decimal {
        self.balances.get(asset).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.balances.iter().map(|(asset, amount)| (asset.as_str(), *amount))
    }

    /// Sum of all balances. Only meaningful once normalized into one asset.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.balances.values().copied().sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

impl FromIterator<(String, Decimal)> for Wallet {
    fn from_iter<I: IntoIterator<Item = (String, Decimal)>>(iter: I) -> Self {
        let mut wallet = Self::new();
        for (asset, amount) in iter {
            wallet.credit(&asset, amount);
        }
        wallet
    }
}

/// Values `amount` of `asset` in `target` by walking the direct market's book.
///
/// With `asset` as base the bids are walked for the amount. With `asset` as
/// quote the asks are walked with the amount as spend. Negative amounts keep
/// their sign. `asset == target` returns the amount without any lookup.
///
/// # Errors
///
/// - [`EngineError::MissingMarket`] if no market pairs the two assets directly.
/// - [`EngineError::MissingBook`] if the snapshot lacks that market's book.
/// - [`EngineError::InsufficientDepth`] if the book cannot absorb the amount.
pub fn convert(
    asset: &str,
    amount: Decimal,
    target: &str,
    markets: &MarketDirectory,
    books: &Books,
) -> Result<Decimal, EngineError> {
    if asset == target || amount.is_zero() {
        return Ok(amount);
    }

    let market = markets
        .find_direct(asset, target)
        .ok_or_else(|| EngineError::missing_market(asset, target))?;
    let book = books
        .get(&market.symbol)
        .ok_or_else(|| EngineError::MissingBook(market.symbol.clone()))?;

    let magnitude = amount.abs();
    let value = if market.base == asset {
        walk_book(&book.bids, magnitude, Denomination::Base)?.quote_amount
    } else {
        walk_book(&book.asks, magnitude, Denomination::Quote)?.base_amount
    };

    Ok(if amount.is_sign_negative() { -value } else { value })
}

/// Converts every balance of `wallet` into `home`.
///
/// The result keeps one entry per original asset, valued in `home`, so
/// [`Wallet::total`] is the wallet's worth in `home`.
///
/// # Errors
///
/// Propagates the first [`convert`] failure.
pub fn normalize_wallet(
    wallet: &Wallet,
    home: &str,
    markets: &MarketDirectory,
    books: &Books,
) -> Result<Wallet, EngineError> {
    wallet
        .iter()
        .map(|(asset, amount)| {
            convert(asset, amount, home, markets, books).map(|value| (asset.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use spot_arb_core::{Market, PriceLevel};

    fn book(symbol: &str, bid: Decimal, ask: Decimal) -> OrderBook {
        OrderBook::new(
            symbol,
            vec![PriceLevel::new(bid, dec!(1000))],
            vec![PriceLevel::new(ask, dec!(1000))],
        )
    }

    fn setup() -> (MarketDirectory, Books) {
        let markets: MarketDirectory = [
            Market::new("ETH", "USDT", 4),
            Market::new("EUR", "USDT", 2),
        ]
        .into_iter()
        .collect();
        let books = [
            ("ETHUSDT".to_string(), book("ETHUSDT", dec!(199), dec!(200))),
            ("EURUSDT".to_string(), book("EURUSDT", dec!(1.1), dec!(1.2))),
        ]
        .into_iter()
        .collect();
        (markets, books)
    }

    #[test]
    fn test_ledger_credit_debit() {
        let mut wallet = Wallet::new().with_balance("USDT", dec!(200));
        wallet.debit("USDT", dec!(200));
        wallet.credit("ETH", dec!(1));
        assert_eq!(wallet.get("USDT"), Decimal::ZERO);
        assert_eq!(wallet.get("ETH"), dec!(1));
        assert_eq!(wallet.get("BTC"), Decimal::ZERO);
    }

    // ==================== Normalization Tests ====================

    #[test]
    fn test_home_asset_needs_no_market() {
        let wallet = Wallet::new().with_balance("USDT", dec!(198));
        let normalized =
            normalize_wallet(&wallet, "USDT", &MarketDirectory::new(), &Books::new()).unwrap();
        assert_eq!(normalized, wallet);
        assert_eq!(normalized.total(), dec!(198));
    }

    #[test]
    fn test_base_asset_sold_into_bids() {
        let (markets, books) = setup();
        let wallet = Wallet::new()
            .with_balance("USDT", dec!(-200))
            .with_balance("ETH", dec!(1));
        let normalized = normalize_wallet(&wallet, "USDT", &markets, &books).unwrap();
        assert_eq!(normalized.get("ETH"), dec!(199));
        assert_eq!(normalized.total(), dec!(-1));
    }

    #[test]
    fn test_quote_asset_spent_on_asks() {
        let (markets, books) = setup();
        let value = convert("USDT", dec!(400), "ETH", &markets, &books).unwrap();
        assert_eq!(value, dec!(2));
    }

    #[test]
    fn test_negative_balance_keeps_sign() {
        let (markets, books) = setup();
        let value = convert("EUR", dec!(-10), "USDT", &markets, &books).unwrap();
        assert_eq!(value, dec!(-11));
    }

    #[test]
    fn test_zero_balance_skips_lookup() {
        let wallet = Wallet::new().with_balance("XRP", Decimal::ZERO);
        let normalized =
            normalize_wallet(&wallet, "USDT", &MarketDirectory::new(), &Books::new()).unwrap();
        assert_eq!(normalized.total(), Decimal::ZERO);
    }

    #[test]
    fn test_missing_market() {
        let (markets, books) = setup();
        let wallet = Wallet::new().with_balance("XRP", dec!(5));
        assert_eq!(
            normalize_wallet(&wallet, "USDT", &markets, &books),
            Err(EngineError::missing_market("XRP", "USDT"))
        );
    }

    #[test]
    fn test_missing_book() {
        let (markets, _) = setup();
        let err = convert("ETH", dec!(1), "USDT", &markets, &Books::new()).unwrap_err();
        assert_eq!(err, EngineError::MissingBook("ETHUSDT".to_string()));
    }
}
