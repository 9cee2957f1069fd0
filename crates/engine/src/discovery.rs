use rust_decimal::Decimal;
use std::collections::BTreeSet;
use syncbot_core::{BalanceMap, Market};

/// Currencies treated as home quote currencies.
pub const FIAT_CURRENCIES: [&str; 6] = ["USDC", "USDT", "USD", "TWD", "EUR", "GBP"];

fn has_positive_balance(balances: &BalanceMap, currency: &str) -> bool {
    balances
        .get(currency)
        .is_some_and(|b| b.total() > Decimal::ZERO)
}

/// Fiat currencies the account actually holds.
pub fn fiat_assets(balances: &BalanceMap) -> Vec<&'static str> {
    FIAT_CURRENCIES
        .into_iter()
        .filter(|c| has_positive_balance(balances, c))
        .collect()
}

/// Symbols worth syncing: markets quoted in a held fiat currency whose base
/// currency is also held.
///
/// The result is sorted and free of duplicates.
pub fn discover_symbols(balances: &BalanceMap, markets: &[Market]) -> Vec<String> {
    let fiat = fiat_assets(balances);

    let symbols: BTreeSet<&str> = markets
        .iter()
        .filter(|m| fiat.contains(&m.quote_currency.as_str()))
        .filter(|m| has_positive_balance(balances, &m.base_currency))
        .map(|m| m.symbol.as_str())
        .collect();

    symbols.into_iter().map(str::to_string).collect()
}
