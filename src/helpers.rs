use std::str::FromStr;

use alloy_primitives::Address;

use crate::{
    error::Error,
    types::{Token, TokenAmount},
};

/// Splits `(A,B),(C,D)` into `["A,B", "C,D"]`.
pub fn parse_tuple_string(data: String) -> Vec<String> {
    let data = data.trim();
    if data.is_empty() {
        return vec![];
    }

    let str = &data[1..];
    let splited = str.split(",(");
    let mut items: Vec<String> = Vec::new();

    for c in splited {
        if let Some(index) = c.find(')') {
            let tuple_data = &c[0..index];
            items.push(tuple_data.to_owned());
        }
    }

    items
}

/// Splits a tuple body into exactly `N` trimmed fields.
pub fn tuple_fields<const N: usize>(tuple: &str) -> Result<[String; N], Error> {
    let fields: Vec<String> = tuple.split(',').map(|field| field.trim().to_owned()).collect();

    fields.try_into().map_err(|fields: Vec<String>| {
        Error::ConfigurationError(format!(
            "expected {} fields, got {} in ({})",
            N,
            fields.len(),
            tuple
        ))
    })
}

/// `(SYMBOL,0xaddress,decimals),...`
pub fn parse_tokens(data: String) -> Result<Vec<Token>, Error> {
    let mut tokens = vec![];

    for tuple in parse_tuple_string(data) {
        let [symbol, address, decimals] = tuple_fields::<3>(&tuple)?;
        let address = Address::from_str(&address)?;
        tokens.push(Token::new(&symbol, address, decimals.parse()?));
    }

    Ok(tokens)
}

/// `(KEY,0xaddress),...`
pub fn parse_address_pairs(data: String) -> Result<Vec<(String, Address)>, Error> {
    let mut pairs = vec![];

    for tuple in parse_tuple_string(data) {
        let [key, address] = tuple_fields::<2>(&tuple)?;
        pairs.push((key.to_uppercase(), Address::from_str(&address)?));
    }

    Ok(pairs)
}

/// `(KEY,value),...`
pub fn parse_string_pairs(data: String) -> Result<Vec<(String, String)>, Error> {
    let mut pairs = vec![];

    for tuple in parse_tuple_string(data) {
        let [key, value] = tuple_fields::<2>(&tuple)?;
        pairs.push((key.to_uppercase(), value));
    }

    Ok(pairs)
}

/// Exact human amount with trailing zeros removed, e.g. `1.5`.
pub fn format_units(amount: &TokenAmount) -> Result<String, Error> {
    let value = amount.to_decimal()?.normalized();
    Ok(value.to_plain_string())
}

/// Parses a wallet address supplied by a caller. The zero address counts as
/// no wallet.
pub fn parse_user(value: &str) -> Result<Address, Error> {
    let user = Address::from_str(value.trim()).map_err(|e| {
        Error::invalid_input(format!("invalid address {:?}: {}", value, e), "Please provide a valid wallet address.")
    })?;

    if user.is_zero() {
        return Err(Error::WalletNotConnected(String::from("zero address")));
    }

    Ok(user)
}

/// USD figures are rounded only when rendered.
pub fn format_usd(value: f64) -> String {
    format!("${:.2}", value)
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, U256};

    use super::*;

    #[test]
    fn test_parse_tuple_string() {
        let items = parse_tuple_string(String::from("(USDC,0xA0b8,6),(DAI,0x6B17,18)"));
        assert_eq!(items, vec!["USDC,0xA0b8,6", "DAI,0x6B17,18"]);
        assert!(parse_tuple_string(String::new()).is_empty());
    }

    #[test]
    fn test_parse_tokens() {
        let tokens = parse_tokens(String::from(
            "(usdc,0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48,6),(WBTC, 0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599, 8)",
        ))
        .unwrap();

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].symbol, "USDC");
        assert_eq!(tokens[1].address, address!("2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599"));
        assert_eq!(tokens[1].decimals, 8);

        assert!(parse_tokens(String::from("(USDC,0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48)")).is_err());
    }

    #[test]
    fn test_format_units() {
        let amount = TokenAmount::new(U256::from(1_500_000u64), 6);
        assert_eq!(format_units(&amount).unwrap(), "1.5");
        assert_eq!(format_usd(1040.004), "$1040.00");
    }

    #[test]
    fn test_parse_user() {
        assert_eq!(
            parse_user(" 0x00000000000000000000000000000000000000aa ").unwrap(),
            address!("00000000000000000000000000000000000000aa")
        );
        assert!(matches!(parse_user("0x1234"), Err(Error::InvalidInput { .. })));
        assert!(matches!(
            parse_user("0x0000000000000000000000000000000000000000"),
            Err(Error::WalletNotConnected(_))
        ));
    }
}
