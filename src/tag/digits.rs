//! Allocation-free decimal helpers for the numeric tag segment.

/// Decimal digits in `u64::MAX` (`18446744073709551615`).
pub const U64_MAX_DIGITS: usize = 20;

const POWERS_OF_TEN: [u64; 19] = [
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
    100_000_000_000,
    1_000_000_000_000,
    10_000_000_000_000,
    100_000_000_000_000,
    1_000_000_000_000_000,
    10_000_000_000_000_000,
    100_000_000_000_000_000,
    1_000_000_000_000_000_000,
    10_000_000_000_000_000_000,
];

/// Number of decimal digits needed to print `n`. `0` counts as one digit.
#[inline]
pub fn count_digits(n: u64) -> usize {
    let mut digits = 1;
    for &power in POWERS_OF_TEN.iter() {
        if n < power {
            return digits;
        }
        digits += 1;
    }
    digits
}

/// Writes `n` right-aligned into `buf` and returns the written digits.
#[inline]
pub fn write_digits(mut n: u64, buf: &mut [u8; U64_MAX_DIGITS]) -> &[u8] {
    let mut pos = U64_MAX_DIGITS;
    loop {
        pos -= 1;
        buf[pos] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    &buf[pos..]
}

/// Parses `span` as an unsigned decimal and checks it against `number`.
///
/// Any non-digit byte, an empty span, a span longer than a `u64` can hold,
/// or an overflowing value yields `false`.
#[inline]
pub fn matches_u64(span: &[u8], number: u64) -> bool {
    if span.is_empty() || span.len() > U64_MAX_DIGITS {
        return false;
    }

    let mut value: u64 = 0;
    for &byte in span {
        if !byte.is_ascii_digit() {
            return false;
        }
        value = match value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(byte - b'0')))
        {
            Some(v) => v,
            None => return false,
        };
    }

    value == number
}
