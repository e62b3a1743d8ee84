// services/signing.rs
//! Pure helpers for the STK request signing scheme and wire formatting.
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::{AppError, Result};

/// Gateway timestamps are East Africa Time.
const EAT_OFFSET_SECS: i64 = 3 * 3600;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPassword {
    pub password: String,
    pub timestamp: String,
}

/// `base64(short_code + passkey + YYYYMMDDHHmmss)`, timestamp in EAT.
pub fn sign_stk_password(short_code: &str, passkey: &str, now: DateTime<Utc>) -> SignedPassword {
    let local = now.naive_utc() + Duration::seconds(EAT_OFFSET_SECS);
    let timestamp = local.format("%Y%m%d%H%M%S").to_string();
    let password = base64.encode(format!("{}{}{}", short_code, passkey, timestamp));
    SignedPassword { password, timestamp }
}

pub fn basic_auth_header(consumer_key: &str, consumer_secret: &str) -> String {
    format!(
        "Basic {}",
        base64.encode(format!("{}:{}", consumer_key, consumer_secret))
    )
}

/// Normalizes Kenyan MSISDNs to the `2547XXXXXXXX` form the gateway expects.
pub fn normalize_phone_number(phone: &str) -> Result<String> {
    let phone: String = phone
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let phone = phone.strip_prefix('+').unwrap_or(&phone);

    let normalized = if phone.starts_with("254") && phone.len() == 12 {
        phone.to_string()
    } else if phone.starts_with('0') && phone.len() == 10 {
        format!("254{}", &phone[1..])
    } else if (phone.starts_with('7') || phone.starts_with('1')) && phone.len() == 9 {
        format!("254{}", phone)
    } else {
        return Err(AppError::invalid_data(format!(
            "unsupported phone number format: {}",
            phone
        )));
    };

    if !normalized.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::invalid_data("phone number must be numeric"));
    }
    Ok(normalized)
}

/// Whole currency units for the push request; halves round away from zero.
pub fn wire_amount(amount: Decimal) -> Result<u64> {
    if amount <= Decimal::ZERO {
        return Err(AppError::invalid_data("amount must be greater than 0"));
    }
    let units = amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .ok_or_else(|| AppError::invalid_data("amount is out of range"))?;
    if units == 0 {
        return Err(AppError::invalid_data(
            "amount rounds to zero whole units",
        ));
    }
    Ok(units)
}
