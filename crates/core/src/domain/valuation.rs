use crate::domain::filing::{self, LineItem};
use crate::domain::report::ValuationMetrics;

/// Derive PER/PBR/ROE/EPS/BPS from one filing's line items and the current
/// market price.
///
/// Returns `None` ("no metrics available") whenever EPS, net income, or
/// equity resolves to zero/absent, never a partial set. The share count is
/// derived as net_income / eps because a direct shares-outstanding line is
/// frequently missing from filings; the derivation is undefined when EPS is
/// exactly zero, which is a reportable condition, not an error.
pub fn calculate(items: &[LineItem], current_price: f64) -> Option<ValuationMetrics> {
    let net_income = filing::resolve_line_item(items, filing::NET_INCOME_LABELS);
    let equity = filing::resolve_line_item(items, filing::EQUITY_LABELS);
    let eps = filing::resolve_line_item(items, filing::EPS_LABELS);

    if eps == 0.0 || net_income == 0.0 || equity == 0.0 {
        return None;
    }

    let shares = net_income / eps;
    let bps = if shares > 0.0 { equity / shares } else { 0.0 };

    Some(ValuationMetrics {
        per: Some(round2(current_price / eps)),
        pbr: if bps > 0.0 {
            Some(round2(current_price / bps))
        } else {
            None
        },
        roe: Some(round2(net_income / equity * 100.0)),
        eps: Some(eps as i64),
        bps: Some(bps as i64),
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(label: &str, value: f64) -> LineItem {
        LineItem::new(label, Some(value), "FY2025")
    }

    fn filing_005930() -> Vec<LineItem> {
        vec![
            item("당기순이익", 1_000.0),
            item("자본총계", 5_000.0),
            item("기본주당순이익", 100.0),
        ]
    }

    #[test]
    fn derives_all_five_metrics() {
        let metrics = calculate(&filing_005930(), 70_000.0).unwrap();
        assert_eq!(metrics.per, Some(700.0));
        assert_eq!(metrics.pbr, Some(140.0));
        assert_eq!(metrics.roe, Some(20.0));
        assert_eq!(metrics.eps, Some(100));
        assert_eq!(metrics.bps, Some(500));
    }

    #[test]
    fn zero_eps_never_yields_a_per() {
        let items = vec![
            item("당기순이익", 1_000.0),
            item("자본총계", 5_000.0),
            item("기본주당순이익", 0.0),
        ];
        assert!(calculate(&items, 70_000.0).is_none());
    }

    #[test]
    fn missing_net_income_fails_the_whole_calculation() {
        let items = vec![item("자본총계", 5_000.0), item("기본주당순이익", 100.0)];
        assert!(calculate(&items, 70_000.0).is_none());
    }

    #[test]
    fn missing_equity_fails_the_whole_calculation() {
        let items = vec![item("당기순이익", 1_000.0), item("기본주당순이익", 100.0)];
        assert!(calculate(&items, 70_000.0).is_none());
    }

    #[test]
    fn negative_net_income_gives_negative_per_without_pbr_loss() {
        // Loss-making issuer: shares derived from a negative pair stays
        // positive, so BPS/PBR remain defined.
        let items = vec![
            item("당기순이익", -1_000.0),
            item("자본총계", 5_000.0),
            item("기본주당순이익", -100.0),
        ];
        let metrics = calculate(&items, 70_000.0).unwrap();
        assert_eq!(metrics.per, Some(-700.0));
        assert_eq!(metrics.pbr, Some(140.0));
        assert_eq!(metrics.roe, Some(-20.0));
        assert_eq!(metrics.bps, Some(500));
    }

    #[test]
    fn metric_ratios_round_to_two_decimals() {
        let items = vec![
            item("당기순이익", 3_000.0),
            item("자본총계", 7_000.0),
            item("기본주당순이익", 3.0),
        ];
        let metrics = calculate(&items, 100.0).unwrap();
        assert_eq!(metrics.per, Some(33.33));
        assert_eq!(metrics.roe, Some(42.86));
    }
}
