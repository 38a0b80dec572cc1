use serde::{Deserialize, Serialize};

/// One labeled financial fact from a statutory filing. Labels are free-text
/// account names; they are not unique within a filing and not stable across
/// issuers or fiscal years.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub label: String,
    /// Reporting-period amount. `None` when the provider value failed numeric
    /// parsing.
    pub value: Option<f64>,
    /// Fiscal year/quarter tag, e.g. "FY2025".
    pub period: String,
}

impl LineItem {
    pub fn new(label: impl Into<String>, value: Option<f64>, period: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value,
            period: period.into(),
        }
    }
}

// Ordered label synonyms, most specific first. Issuer vocabularies vary; the
// middle entries cover the Samsung-style account names.
pub const NET_INCOME_LABELS: &[&str] = &[
    "지배기업의 소유주에게 귀속되는 당기순이익",
    "지배기업의 소유주에게 귀속되는 당기순이익(손실)",
    "지배기업 소유지분",
    "당기순이익(손실)",
    "당기순이익",
];

pub const EQUITY_LABELS: &[&str] = &[
    "지배기업의 소유주에게 귀속되는 자본",
    "지배기업 소유지분",
    "자본총계",
];

pub const EPS_LABELS: &[&str] = &["기본주당순이익", "기본주당이익"];

// Accounts worth surfacing in the rendered filing text, in statement order.
const KEY_ACCOUNT_LABELS: &[&str] = &[
    "매출액",
    "영업이익(손실)",
    "당기순이익(손실)",
    "지배기업의 소유주에게 귀속되는 당기순이익(손실)",
    "자산총계",
    "부채총계",
    "자본총계",
    "지배기업의 소유주에게 귀속되는 자본",
    "영업활동 현금흐름",
    "투자활동 현금흐름",
    "재무활동 현금흐름",
    "기본주당순이익(손실)",
];

/// Resolve one canonical field from an unordered collection of line items.
///
/// Synonyms are tried in order; a synonym matches the first line item (in
/// input order) whose label contains it as a case-sensitive substring. The
/// first synonym that yields a parsed value wins. `0.0` is the "not found"
/// sentinel; a real zero amount is indistinguishable from absence here,
/// which the valuation calculator treats as a failed precondition either way.
pub fn resolve_line_item(items: &[LineItem], synonyms: &[&str]) -> f64 {
    for synonym in synonyms {
        let hit = items.iter().find(|item| item.label.contains(synonym));
        if let Some(item) = hit {
            if let Some(value) = item.value {
                return value;
            }
        }
    }
    0.0
}

/// Render the key accounts of a filing as plain text, for the report's raw
/// financial-statement blob.
pub fn render_financial_text(ticker: &str, items: &[LineItem]) -> String {
    let mut lines = vec![format!("# {ticker} 재무제표 (DART)"), String::new()];

    for account in KEY_ACCOUNT_LABELS {
        let row = items.iter().find(|item| item.label == *account);
        if let Some(item) = row {
            if let Some(amount) = item.value {
                lines.push(format!("- {account}: {}", fmt_amount(amount)));
            }
        }
    }

    // EPS rows rarely match the exact label above; surface the substring hit.
    let eps_row = items
        .iter()
        .find(|item| item.label.contains("기본주당순이익"));
    if let Some(item) = eps_row {
        if let Some(eps) = item.value {
            lines.push(format!("- 주당순이익(EPS): {}원", fmt_amount(eps)));
        }
    }

    lines.join("\n")
}

fn fmt_amount(v: f64) -> String {
    let n = v as i64;
    let digits = n.abs().to_string();
    let mut out = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i != 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if n < 0 {
        format!("-{out}")
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(label: &str, value: f64) -> LineItem {
        LineItem::new(label, Some(value), "FY2025")
    }

    #[test]
    fn matches_by_substring_not_exact_equality() {
        let items = vec![item("AB Corp", 10.0)];
        assert_eq!(resolve_line_item(&items, &["A", "AB"]), 10.0);
    }

    #[test]
    fn first_synonym_wins_over_later_ones() {
        let items = vec![item("당기순이익", 5.0), item("지배기업 소유지분", 7.0)];
        assert_eq!(resolve_line_item(&items, NET_INCOME_LABELS), 7.0);
    }

    #[test]
    fn first_line_item_in_input_order_wins_per_synonym() {
        let items = vec![item("자본총계", 1.0), item("자본총계(별도)", 2.0)];
        assert_eq!(resolve_line_item(&items, &["자본총계"]), 1.0);
    }

    #[test]
    fn unparsed_value_falls_through_to_next_synonym() {
        let items = vec![
            LineItem::new("기본주당순이익", None, "FY2025"),
            item("기본주당이익", 123.0),
        ];
        assert_eq!(resolve_line_item(&items, EPS_LABELS), 123.0);
    }

    #[test]
    fn no_match_returns_sentinel() {
        let items = vec![item("매출액", 99.0)];
        assert_eq!(resolve_line_item(&items, EPS_LABELS), 0.0);
    }

    #[test]
    fn renders_key_accounts_with_thousands_separators() {
        let items = vec![
            item("매출액", 1_234_567.0),
            item("자본총계", -5_000.0),
            item("기본주당순이익(손실)", 100.0),
        ];
        let text = render_financial_text("005930", &items);
        assert!(text.starts_with("# 005930 재무제표 (DART)"));
        assert!(text.contains("- 매출액: 1,234,567"));
        assert!(text.contains("- 자본총계: -5,000"));
        assert!(text.contains("- 주당순이익(EPS): 100원"));
    }
}
