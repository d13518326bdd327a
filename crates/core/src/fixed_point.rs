//! Decimal fixed-point values over U256.
//!
//! A [`FixedPoint`] carries its own decimal scale, so `1.0` at 18 decimals is
//! `10^18` and `1.0` at 6 decimals is `10^6`. Multiplication and division keep
//! the left operand's scale and divide by the right operand's scale exactly
//! once. Intermediate products are computed in U512.

use alloy::primitives::{U256, U512};
use std::cmp::Ordering;
use std::fmt;

/// Scale of protocol ratios such as the collateral requirement.
pub const WAD_DECIMALS: u8 = 18;

/// 10^18
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixedPointError {
    #[error("invalid decimal number: {0:?}")]
    InvalidNumber(String),

    #[error("value out of range: {0:?}")]
    Overflow(String),
}

/// 10^exp as U256. Saturates to `U256::MAX` above 10^77.
pub fn pow10(exp: u8) -> U256 {
    U256::from(10u64).saturating_pow(U256::from(exp))
}

fn pow10_wide(exp: u32) -> Option<U512> {
    U512::from(10u64).checked_pow(U512::from(exp))
}

fn widen(value: U256) -> U512 {
    let l = value.as_limbs();
    U512::from_limbs([l[0], l[1], l[2], l[3], 0, 0, 0, 0])
}

fn narrow(value: U512) -> Option<U256> {
    let l = value.as_limbs();
    if l[4..].iter().any(|limb| *limb != 0) {
        return None;
    }
    Some(U256::from_limbs([l[0], l[1], l[2], l[3]]))
}

/// `a * b / denominator` without intermediate overflow. `None` when the
/// denominator is zero or the result does not fit in U256.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Option<U256> {
    if denominator.is_zero() {
        return None;
    }
    narrow(widen(a) * widen(b) / widen(denominator))
}

/// A non-negative decimal number stored as `value / 10^decimals`.
#[derive(Debug, Clone, Copy)]
pub struct FixedPoint {
    value: U256,
    decimals: u8,
}

impl FixedPoint {
    /// Wrap a raw scaled integer.
    pub const fn from_raw(value: U256, decimals: u8) -> Self {
        Self { value, decimals }
    }

    /// Wrap a raw 18-decimal integer.
    pub const fn from_wad(value: U256) -> Self {
        Self::from_raw(value, WAD_DECIMALS)
    }

    /// Whole units, e.g. `from_units(5, 18)` is `5.0`.
    pub fn from_units(units: u64, decimals: u8) -> Self {
        Self::from_raw(U256::from(units).saturating_mul(pow10(decimals)), decimals)
    }

    pub fn zero(decimals: u8) -> Self {
        Self::from_raw(U256::ZERO, decimals)
    }

    pub fn one(decimals: u8) -> Self {
        Self::from_raw(pow10(decimals), decimals)
    }

    /// Parse decimal text such as `"1.05"`, `"0.0312"` or `"1.5e-3"`.
    /// Digits beyond `decimals` are truncated.
    pub fn parse(text: &str, decimals: u8) -> Result<Self, FixedPointError> {
        let invalid = || FixedPointError::InvalidNumber(text.to_string());
        let trimmed = text.trim();
        let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);

        let (mantissa, exponent) = match trimmed.find(['e', 'E']) {
            Some(pos) => {
                let exponent: i32 = trimmed[pos + 1..].parse().map_err(|_| invalid())?;
                (&trimmed[..pos], exponent)
            }
            None => (trimmed, 0),
        };

        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((int_part, frac_part)) => (int_part, frac_part),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let mut digits = format!("{}{}", int_part, frac_part);
        // Exponents near i32::MIN/MAX must not wrap
        let shift = i64::try_from(frac_part.len())
            .ok()
            .and_then(|frac_len| i64::from(exponent).checked_sub(frac_len))
            .and_then(|shift| shift.checked_add(i64::from(decimals)))
            .ok_or_else(|| FixedPointError::Overflow(text.to_string()))?;

        if shift < 0 {
            let drop = usize::try_from(shift.unsigned_abs()).unwrap_or(usize::MAX);
            if drop >= digits.len() {
                return Ok(Self::zero(decimals));
            }
            digits.truncate(digits.len() - drop);
        }

        let digits = digits.trim_start_matches('0');
        let base = if digits.is_empty() {
            U256::ZERO
        } else {
            U256::from_str_radix(digits, 10)
                .map_err(|_| FixedPointError::Overflow(text.to_string()))?
        };

        let value = if shift > 0 {
            let factor = u8::try_from(shift)
                .ok()
                .and_then(|exp| pow10_wide(exp as u32))
                .ok_or_else(|| FixedPointError::Overflow(text.to_string()))?;
            narrow(widen(base) * factor).ok_or_else(|| FixedPointError::Overflow(text.to_string()))?
        } else {
            base
        };

        Ok(Self::from_raw(value, decimals))
    }

    /// Convert a configuration float such as `0.02`. Negative and non-finite
    /// values are rejected.
    pub fn from_f64(value: f64, decimals: u8) -> Result<Self, FixedPointError> {
        if !value.is_finite() || value < 0.0 {
            return Err(FixedPointError::InvalidNumber(value.to_string()));
        }
        Self::parse(&value.to_string(), decimals)
    }

    pub fn raw(&self) -> U256 {
        self.value
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Change scale, truncating when `decimals` is smaller. Saturates on overflow.
    pub fn rescale(&self, decimals: u8) -> Self {
        let value = match decimals.cmp(&self.decimals) {
            Ordering::Equal => self.value,
            Ordering::Greater => self.value.saturating_mul(pow10(decimals - self.decimals)),
            Ordering::Less => self.value / pow10(self.decimals - decimals),
        };
        Self::from_raw(value, decimals)
    }

    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        let other = other.rescale(self.decimals);
        self.value
            .checked_add(other.value)
            .map(|value| Self::from_raw(value, self.decimals))
    }

    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        let other = other.rescale(self.decimals);
        self.value
            .checked_sub(other.value)
            .map(|value| Self::from_raw(value, self.decimals))
    }

    /// Product at `self`'s scale: `self.value * other.value / 10^other.decimals`.
    /// Saturates if the product does not fit.
    pub fn mul(&self, other: &Self) -> Self {
        let value = mul_div(self.value, other.value, pow10(other.decimals)).unwrap_or(U256::MAX);
        Self::from_raw(value, self.decimals)
    }

    /// Quotient at `self`'s scale: `self.value * 10^other.decimals / other.value`.
    /// `None` when dividing by zero or on overflow.
    pub fn div(&self, other: &Self) -> Option<Self> {
        mul_div(self.value, pow10(other.decimals), other.value)
            .map(|value| Self::from_raw(value, self.decimals))
    }

    /// `1 - self`, `None` if `self > 1`.
    pub fn one_minus(&self) -> Option<Self> {
        Self::one(self.decimals).checked_sub(self)
    }

    /// Lossy float conversion for logging.
    pub fn to_f64(&self) -> f64 {
        let value: f64 = self.value.to_string().parse().unwrap_or(f64::MAX);
        value / 10f64.powi(self.decimals as i32)
    }

    /// Both values as U512 integers at the larger of the two scales.
    fn aligned(&self, other: &Self) -> Option<(U512, U512)> {
        let decimals = self.decimals.max(other.decimals);
        let lhs = widen(self.value).checked_mul(pow10_wide((decimals - self.decimals) as u32)?)?;
        let rhs = widen(other.value).checked_mul(pow10_wide((decimals - other.decimals) as u32)?)?;
        Some((lhs, rhs))
    }
}

impl PartialEq for FixedPoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FixedPoint {}

impl PartialOrd for FixedPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FixedPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.aligned(other) {
            Some((lhs, rhs)) => lhs.cmp(&rhs),
            // only when the scale gap overflows U512
            None => self.to_f64().total_cmp(&other.to_f64()),
        }
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.decimals == 0 {
            return write!(f, "{}", self.value);
        }
        let scale = pow10(self.decimals);
        let int_part = self.value / scale;
        let frac_part = self.value % scale;
        if frac_part.is_zero() {
            return write!(f, "{}", int_part);
        }
        let frac = format!("{:0>width$}", frac_part.to_string(), width = self.decimals as usize);
        write!(f, "{}.{}", int_part, frac.trim_end_matches('0'))
    }
}

/// Whether `tokens × price × requirement > collateral`, evaluated exactly.
///
/// All four operands keep their own scales; the comparison multiplies each
/// side by the other side's scale instead of dividing.
pub fn is_under_collateralized(
    tokens: &FixedPoint,
    collateral: &FixedPoint,
    price: &FixedPoint,
    requirement: &FixedPoint,
) -> bool {
    let lhs_scale = tokens.decimals as u32 + price.decimals as u32 + requirement.decimals as u32;

    let lhs = widen(tokens.value)
        .checked_mul(widen(price.value))
        .and_then(|v| v.checked_mul(widen(requirement.value)))
        .and_then(|v| v.checked_mul(pow10_wide(collateral.decimals as u32)?));
    let rhs = pow10_wide(lhs_scale).and_then(|scale| widen(collateral.value).checked_mul(scale));

    match (lhs, rhs) {
        (Some(lhs), Some(rhs)) => lhs > rhs,
        (None, Some(_)) => true,
        _ => false,
    }
}
