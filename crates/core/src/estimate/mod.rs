//! Manifest-to-estimate pipeline: row extraction, matching, pricing under a
//! rate context and aggregation into bulk totals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::alias::AliasIndex;
use crate::domain::bulk_quote::{BulkTotals, DeviceLine};
use crate::domain::grade::Grade;
use crate::domain::price_list::PriceList;
use crate::errors::DomainError;
use crate::matcher::{DeviceMatcher, MatchCandidate};
use crate::pricing::{PricingResolver, RoundingRule};

const HEADER_WORDS: [&str; 3] = ["device", "model", "description"];

/// One pre-split manifest row. Field 0 is the device text, field 1 an
/// optional quantity and field 2 an optional grade.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestRow {
    pub fields: Vec<String>,
}

impl ManifestRow {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { fields: fields.into_iter().map(Into::into).collect() }
    }

    fn field(&self, index: usize) -> &str {
        self.fields.get(index).map(|value| value.trim()).unwrap_or_default()
    }

    fn is_blank(&self) -> bool {
        self.fields.iter().all(|field| field.trim().is_empty())
    }

    fn is_header(&self) -> bool {
        let first = self.field(0).to_ascii_lowercase();
        HEADER_WORDS.iter().any(|word| first == *word || first.starts_with(&format!("{word} ")))
    }
}

/// A manifest row reduced to what the matcher and resolver need.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLine {
    /// 1-based position of the row in the submitted manifest.
    pub line_no: u32,
    pub raw_input: String,
    pub device_text: String,
    pub quantity: u32,
    pub grade: Grade,
}

pub fn parse_manifest(
    rows: &[ManifestRow],
    assumed_grade: Grade,
) -> Result<Vec<ParsedLine>, DomainError> {
    let mut lines = Vec::with_capacity(rows.len());
    let mut seen_content = false;

    for (index, row) in rows.iter().enumerate() {
        let line_no = u32::try_from(index + 1).unwrap_or(u32::MAX);
        if row.is_blank() {
            continue;
        }
        let first_content_row = !seen_content;
        seen_content = true;
        if first_content_row && row.is_header() {
            continue;
        }

        let raw_input = row.field(0).to_string();
        let (device_text, quantity) = match row.field(1) {
            "" => {
                let (device_text, inline_quantity) = split_inline_quantity(&raw_input);
                (device_text, inline_quantity.unwrap_or(1))
            }
            explicit => {
                let quantity = parse_quantity(explicit).ok_or_else(|| {
                    DomainError::validation(
                        format!("row {line_no}"),
                        format!("quantity `{explicit}` is not a positive whole number"),
                    )
                })?;
                (raw_input.split_whitespace().collect::<Vec<_>>().join(" "), quantity)
            }
        };
        if device_text.is_empty() && row.field(1).is_empty() && row.field(2).is_empty() {
            continue;
        }

        let grade = match row.field(2) {
            "" => assumed_grade,
            explicit => explicit.parse::<Grade>().map_err(|_| {
                DomainError::validation(
                    format!("row {line_no}"),
                    format!("unknown grade `{explicit}` (expected A|B|C|D|E)"),
                )
            })?,
        };

        lines.push(ParsedLine { line_no, raw_input, device_text, quantity, grade });
    }

    if lines.is_empty() {
        return Err(DomainError::validation("manifest", "no parsable device rows"));
    }
    Ok(lines)
}

fn parse_quantity(value: &str) -> Option<u32> {
    value.parse::<u32>().ok().filter(|quantity| *quantity > 0)
}

fn is_multiplier(token: &str) -> bool {
    matches!(token, "x" | "×")
}

/// `x2`, `2x`, `×2` or `2×`. Only the lowercase `x` counts, since `X60` or
/// `X3` are model names.
fn glued_quantity(token: &str) -> Option<u32> {
    ['x', '×']
        .into_iter()
        .find_map(|mark| token.strip_prefix(mark).or_else(|| token.strip_suffix(mark)))
        .and_then(parse_quantity)
}

fn has_digit(tokens: &[&str]) -> bool {
    tokens.iter().any(|token| token.chars().any(|ch| ch.is_ascii_digit()))
}

/// Recognises an inline quantity at either end of the device text and
/// returns the text without it. Separated forms (`x 2`, `× 2`, `2 x ...`) are
/// always taken. Glued forms (`x2`, `2x`) are taken only while the remaining
/// text still carries a digit, so `poco x3` stays a model name.
pub fn split_inline_quantity(text: &str) -> (String, Option<u32>) {
    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    let count = tokens.len();

    if count >= 3 && is_multiplier(tokens[count - 2]) {
        if let Some(quantity) = parse_quantity(tokens[count - 1]) {
            tokens.truncate(count - 2);
            return (tokens.join(" "), Some(quantity));
        }
    }
    if count >= 3 && is_multiplier(tokens[1]) {
        if let Some(quantity) = parse_quantity(tokens[0]) {
            tokens.drain(0..2);
            return (tokens.join(" "), Some(quantity));
        }
    }
    if count >= 2 && has_digit(&tokens[..count - 1]) {
        if let Some(quantity) = glued_quantity(tokens[count - 1]) {
            tokens.pop();
            return (tokens.join(" "), Some(quantity));
        }
    }
    if count >= 2 && has_digit(&tokens[1..]) {
        if let Some(quantity) = glued_quantity(tokens[0]) {
            tokens.remove(0);
            return (tokens.join(" "), Some(quantity));
        }
    }

    (tokens.join(" "), None)
}

/// How indicative prices are adjusted for whoever submitted the manifest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RateContext {
    /// Consumer rate, prices as listed.
    #[default]
    Direct,
    /// Mode B partner rate: list price reduced by `percent`.
    PartnerDiscount { percent: Decimal },
}

impl RateContext {
    pub fn apply(&self, price: Decimal, rounding: RoundingRule) -> Decimal {
        match self {
            Self::Direct => price,
            Self::PartnerDiscount { percent } => {
                let factor = (Decimal::ONE_HUNDRED - *percent) / Decimal::ONE_HUNDRED;
                rounding.apply(price * factor).max(Decimal::ZERO)
            }
        }
    }
}

/// Read-only collaborators an estimate is computed against.
pub struct EstimateContext<'a> {
    pub matcher: &'a DeviceMatcher,
    pub candidates: &'a [MatchCandidate],
    pub aliases: &'a AliasIndex,
    pub resolver: &'a PricingResolver,
    pub price_list: &'a PriceList,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimateResult {
    pub lines: Vec<DeviceLine>,
    pub totals: BulkTotals,
    pub currency: String,
}

/// Sets the line's indicative price from its device and assumed grade. A
/// matched device the list cannot price keeps `indicative_price` empty and
/// records the reason in `price_issue`.
pub fn price_line(
    line: &mut DeviceLine,
    resolver: &PricingResolver,
    price_list: &PriceList,
    rate_context: RateContext,
) {
    line.indicative_price = None;
    line.price_issue = None;
    let Some(device_id) = line.device_id else {
        return;
    };
    match resolver.price_for(device_id, line.assumed_grade, price_list) {
        Ok(price) => {
            line.indicative_price =
                Some(rate_context.apply(price, resolver.settings().rounding));
        }
        Err(error) => line.price_issue = Some(error.to_string()),
    }
}

pub fn build_estimate(
    rows: &[ManifestRow],
    assumed_grade: Grade,
    rate_context: RateContext,
    context: &EstimateContext<'_>,
) -> Result<EstimateResult, DomainError> {
    let parsed = parse_manifest(rows, assumed_grade)?;

    let lines: Vec<DeviceLine> = parsed
        .into_iter()
        .map(|line| {
            let outcome =
                context.matcher.match_text(&line.device_text, context.candidates, context.aliases);
            let mut device_line = DeviceLine {
                line_no: line.line_no,
                raw_input: line.raw_input,
                device_id: outcome.device_id,
                confidence: outcome.confidence,
                quantity: line.quantity,
                assumed_grade: line.grade,
                indicative_price: None,
                actual_grade: None,
                actual_price: None,
                price_issue: None,
            };
            price_line(&mut device_line, context.resolver, context.price_list, rate_context);
            device_line
        })
        .collect();

    let totals = BulkTotals::from_lines(&lines);
    Ok(EstimateResult { lines, totals, currency: context.price_list.currency.clone() })
}
