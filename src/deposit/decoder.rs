//! Decoding of raw transfer notifications into deposits.
//!
//! Token amounts arrive as integer base units. The decoder scales them by the token's
//! declared decimal count so the ledger only ever sees `Decimal` token amounts.

use crate::chain::RawTransfer;
use crate::deposit::{DepositError, DepositEvent};
use crate::utils::normalize_address;
use rust_decimal::Decimal;

/// Largest scale `rust_decimal` can represent.
pub const MAX_TOKEN_DECIMALS: u32 = 28;

/// Turns raw transfers into [`DepositEvent`]s.
#[derive(Debug, Clone, Copy)]
pub struct EventDecoder {
    decimals: u32,
}

impl EventDecoder {
    /// Create a decoder for a token with `decimals` fractional digits.
    pub fn new(decimals: u32) -> Result<Self, DepositError> {
        if decimals > MAX_TOKEN_DECIMALS {
            return Err(DepositError::ConfigError(format!(
                "Token decimals {} exceed the supported maximum of {}",
                decimals, MAX_TOKEN_DECIMALS
            )));
        }
        Ok(Self { decimals })
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Decode a transfer, failing with `DecodeError` if its amount is not an integer.
    pub fn decode(&self, transfer: &RawTransfer) -> Result<DepositEvent, DepositError> {
        let amount = self.scale(&transfer.raw_amount)?;

        Ok(DepositEvent {
            from_address: normalize_address(&transfer.from),
            amount,
            block_number: transfer.block_number,
            transaction_hash: transfer.transaction_hash.clone(),
            log_index: transfer.log_index,
        })
    }

    /// `raw / 10^decimals`, with trailing zeros removed.
    pub fn scale(&self, raw_amount: &str) -> Result<Decimal, DepositError> {
        let units = parse_raw_amount(raw_amount)?;
        let units = i128::try_from(units).map_err(|_| {
            DepositError::DecodeError(format!("Amount {} is out of range", raw_amount))
        })?;

        Decimal::try_from_i128_with_scale(units, self.decimals)
            .map(|amount| amount.normalize())
            .map_err(|e| {
                DepositError::DecodeError(format!("Amount {} is out of range: {}", raw_amount, e))
            })
    }
}

/// Parse an unsigned integer given as `0x` hex (log data) or as a decimal string.
fn parse_raw_amount(raw_amount: &str) -> Result<u128, DepositError> {
    let raw = raw_amount.trim();
    let invalid = || DepositError::DecodeError(format!("Invalid raw amount: {:?}", raw_amount));

    if let Some(hex_digits) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        if hex_digits.is_empty() || !hex_digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        // uint256 data words are zero-padded to 64 digits
        let significant = hex_digits.trim_start_matches('0');
        if significant.is_empty() {
            return Ok(0);
        }
        if significant.len() > 32 {
            return Err(DepositError::DecodeError(format!(
                "Amount {} is out of range",
                raw_amount
            )));
        }
        return u128::from_str_radix(significant, 16).map_err(|_| invalid());
    }

    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    raw.parse::<u128>().map_err(|_| {
        DepositError::DecodeError(format!("Amount {} is out of range", raw_amount))
    })
}
