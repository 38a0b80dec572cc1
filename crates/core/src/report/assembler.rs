use crate::domain::report::{InternalReport, ReportSections, Snapshot, ValuationMetrics};
use crate::report::fmt::{fmt_pct, fmt_ratio, fmt_won};
use chrono::{DateTime, Utc};

/// Merge a resolved snapshot and metrics set into the canonical internal
/// report, generating the five fixed narrative sections. The caller only
/// invokes this once a complete `Snapshot` exists, so the report is always
/// fully populated. Absent values surface as explicit "N/A" markers inside
/// the narrative, never as empty strings.
pub fn assemble(
    snapshot: Snapshot,
    metrics: ValuationMetrics,
    financial_text: Option<String>,
    generated_at: DateTime<Utc>,
) -> InternalReport {
    let sections = build_sections(&snapshot, &metrics);

    InternalReport {
        ticker: snapshot.ticker.clone(),
        name: snapshot.name.clone(),
        generated_at,
        snapshot,
        metrics,
        sections,
        financial_text,
    }
}

fn build_sections(snapshot: &Snapshot, metrics: &ValuationMetrics) -> ReportSections {
    let summary = format!(
        "{}의 현재 주가는 {}입니다. 최근 1년 수익률은 {} 수준입니다.",
        snapshot.name,
        fmt_won(Some(snapshot.current_price)),
        fmt_pct(snapshot.ret_1y),
    );

    let price_analysis = format!(
        "최근 1개월 수익률은 {}, 3개월 수익률은 {}, 1년 수익률은 {}입니다. \
         52주 고점은 {}, 52주 저점은 {}이며, 현재가는 52주 고점 대비 {} 위치에 있습니다.",
        fmt_pct(snapshot.ret_1m),
        fmt_pct(snapshot.ret_3m),
        fmt_pct(snapshot.ret_1y),
        fmt_won(Some(snapshot.high_52w)),
        fmt_won(Some(snapshot.low_52w)),
        fmt_pct(snapshot.from_high),
    );

    let financial_analysis = "재무제표(매출, 영업이익, 순이익 등)에 대한 상세 분석은 \
                              향후 DART 재무제표 데이터를 연동해 확장할 수 있습니다."
        .to_string();

    let valuation = format!(
        "PER·PBR·ROE와 같은 밸류에이션 지표를 기반으로 현재 주가의 상대적인 수준을 \
         평가할 수 있습니다. 현재 PER은 {}, PBR은 {}, ROE는 {} 입니다.",
        fmt_ratio(metrics.per),
        fmt_ratio(metrics.pbr),
        fmt_ratio(metrics.roe),
    );

    let investment_opinion = "본 리포트는 참고용 정보이며, 개별 투자자의 위험 성향과 투자 기간을 \
                              함께 고려해 최종 판단을 내리는 것이 좋습니다. \
                              구체적인 매수·매도 의견과 목표 주가는 별도로 제시하지 않습니다."
        .to_string();

    ReportSections {
        summary,
        price_analysis,
        financial_analysis,
        valuation,
        investment_opinion,
    }
}
