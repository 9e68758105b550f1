//! Amounts in words, Indian numbering (crore, lakh, thousand, hundred).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::money::round2;

const ONES: [&str; 20] = [
    "Zero", "One", "Two", "Three", "Four", "Five", "Six", "Seven", "Eight", "Nine", "Ten", "Eleven", "Twelve",
    "Thirteen", "Fourteen", "Fifteen", "Sixteen", "Seventeen", "Eighteen", "Nineteen",
];

const TENS: [&str; 10] = [
    "", "", "Twenty", "Thirty", "Forty", "Fifty", "Sixty", "Seventy", "Eighty", "Ninety",
];

const CRORE: u64 = 10_000_000;
const LAKH: u64 = 100_000;
const THOUSAND: u64 = 1_000;

fn below_hundred(n: u64, out: &mut Vec<String>) {
    if n < 20 {
        out.push(ONES[n as usize].to_string());
    } else {
        out.push(TENS[(n / 10) as usize].to_string());
        if n % 10 != 0 {
            out.push(ONES[(n % 10) as usize].to_string());
        }
    }
}

fn below_thousand(n: u64, out: &mut Vec<String>) {
    if n >= 100 {
        out.push(ONES[(n / 100) as usize].to_string());
        out.push("Hundred".to_string());
    }
    if n % 100 != 0 {
        below_hundred(n % 100, out);
    }
}

/// Words for a whole number, title case. Crores above 99 recurse, so
/// `1,00,00,00,000` reads "One Hundred Crore".
pub fn number_in_words(n: u64) -> String {
    if n == 0 {
        return ONES[0].to_string();
    }
    let mut out = Vec::new();
    push_words(n, &mut out);
    out.join(" ")
}

fn push_words(n: u64, out: &mut Vec<String>) {
    let crore = n / CRORE;
    let rest = n % CRORE;
    if crore > 0 {
        push_words(crore, out);
        out.push("Crore".to_string());
    }
    let lakh = rest / LAKH;
    if lakh > 0 {
        below_hundred(lakh, out);
        out.push("Lakh".to_string());
    }
    let thousand = (rest % LAKH) / THOUSAND;
    if thousand > 0 {
        below_hundred(thousand, out);
        out.push("Thousand".to_string());
    }
    let hundreds = rest % THOUSAND;
    if hundreds > 0 {
        below_thousand(hundreds, out);
    }
}

/// `750.00` -> `Rupees Seven Hundred Fifty Only`;
/// `1234.50` -> `Rupees One Thousand Two Hundred Thirty Four And Fifty Paise Only`.
///
/// The amount is rounded to paise first, the same rounding the printed figure gets.
pub fn amount_in_words(amount: Decimal) -> String {
    let rounded = round2(amount);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "Minus "
    } else {
        ""
    };
    let abs = rounded.abs();
    let rupees = abs.trunc().to_u64().unwrap_or(u64::MAX);
    let paise = ((abs - abs.trunc()) * Decimal::ONE_HUNDRED).to_u64().unwrap_or(0);

    let mut s = format!("{sign}Rupees {}", number_in_words(rupees));
    if paise > 0 {
        s.push_str(" And ");
        s.push_str(&number_in_words(paise));
        s.push_str(" Paise");
    }
    s.push_str(" Only");
    s
}
