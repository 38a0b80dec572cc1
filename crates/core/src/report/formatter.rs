//! Projection of the internal report into the Kakao card schema. Pure and
//! deterministic; every field degrades to an explicit marker rather than
//! dropping out of the payload.

use crate::domain::report::InternalReport;
use crate::report::fmt::{fmt_market_cap, fmt_pct, fmt_ratio, fmt_thousands};
use crate::report::kakao::{
    ImageTitle, ItemCard, KakaoResponse, Output, QuickReply, SimpleText, Template,
    RESPONSE_VERSION,
};

// Character budget for the per-card one-line summary.
const ONE_LINE_BUDGET: usize = 80;

/// Instrument produced no report (unknown ticker, no price history, no
/// filing match).
pub fn no_data_response(ticker: &str) -> KakaoResponse {
    let text = format!(
        "앗, 아직 '{ticker}'에 대한 리포트 데이터가 없어요 🥲 다른 종목 리포트를 보시겠어요?"
    );

    KakaoResponse {
        version: RESPONSE_VERSION,
        template: Template {
            outputs: vec![Output::SimpleText(SimpleText { text })],
            quick_replies: vec![
                QuickReply::block("다른 종목 리포트", "S02"),
                QuickReply::block("도움말", "HELP"),
            ],
        },
    }
}

/// An unexpected upstream failure. No internal detail ever reaches the
/// caller through this payload.
pub fn error_response() -> KakaoResponse {
    let text = "지금 리포트를 불러오는 중에 문제가 발생했어요 😢\n\
                잠시 후 다시 시도하시거나, 다른 종목을 조회해볼까요?"
        .to_string();

    KakaoResponse {
        version: RESPONSE_VERSION,
        template: Template {
            outputs: vec![Output::SimpleText(SimpleText { text })],
            quick_replies: vec![
                QuickReply::block("다시 시도", "S02"),
                QuickReply::block("다른 종목 리포트", "S02"),
                QuickReply::block("도움말", "HELP"),
            ],
        },
    }
}

/// Exactly five structured cards built from the report sections and the
/// numeric snapshot/metrics fields.
pub fn success_response(report: &InternalReport) -> KakaoResponse {
    let cards = vec![
        build_summary_card(report),
        build_price_card(report),
        build_financial_card(report),
        build_valuation_card(report),
        build_opinion_card(report),
    ];

    KakaoResponse {
        version: RESPONSE_VERSION,
        template: Template {
            outputs: cards.into_iter().map(Output::ItemCard).collect(),
            quick_replies: common_quick_replies(),
        },
    }
}

fn common_quick_replies() -> Vec<QuickReply> {
    vec![
        QuickReply::block("뉴스/커뮤니티 보기", "S06"),
        QuickReply::block("다른 종목 리포트", "S02"),
        QuickReply::block("관심종목 추가", "S10"),
        QuickReply::block("도움말", "HELP"),
    ]
}

fn build_summary_card(report: &InternalReport) -> ItemCard {
    let snapshot = &report.snapshot;
    let one_line = one_line_summary(&report.sections.summary, ONE_LINE_BUDGET);

    let rank = match snapshot.market_cap_rank {
        Some(rank) => format!("시총 순위: {rank}위"),
        None => "시총 순위: N/A".to_string(),
    };

    ItemCard {
        image_title: ImageTitle {
            title: "투자 요약".to_string(),
            description: "해당 종목에 대한 핵심 요약입니다.".to_string(),
        },
        title: String::new(),
        description: format!("LLM 한 문장 요약: {one_line}"),
        item_list: vec![
            ItemCard::item("요약 1", format!("최근 1년 수익률: {}", fmt_pct(snapshot.ret_1y))),
            ItemCard::item("요약 2", format!("시가총액: {}", fmt_market_cap(snapshot.market_cap))),
            ItemCard::item("요약 3", rank),
            ItemCard::item("요약 4", "상세 내용은 아래 카드에서 확인하세요.".to_string()),
        ],
    }
}

fn build_price_card(report: &InternalReport) -> ItemCard {
    let snapshot = &report.snapshot;
    let one_line = one_line_summary(&report.sections.price_analysis, ONE_LINE_BUDGET);

    ItemCard {
        image_title: ImageTitle {
            title: "주가 동향 분석".to_string(),
            description: "최근 주가 흐름과 기술적 지표를 분석합니다.".to_string(),
        },
        title: String::new(),
        description: format!("LLM 한 문장 요약: {one_line}"),
        item_list: vec![
            ItemCard::item("1개월 수익률", fmt_pct(snapshot.ret_1m)),
            ItemCard::item("3개월 수익률", fmt_pct(snapshot.ret_3m)),
            ItemCard::item("1년 수익률", fmt_pct(snapshot.ret_1y)),
            ItemCard::item("52주 고점 대비", fmt_pct(snapshot.from_high)),
            // Technical indicators are not wired up yet.
            ItemCard::item("RSI", "N/A (N/A)".to_string()),
        ],
    }
}

fn build_financial_card(report: &InternalReport) -> ItemCard {
    let one_line = one_line_summary(&report.sections.financial_analysis, ONE_LINE_BUDGET);

    // Fixed descriptive labels, independent of the filing the pipeline
    // actually loaded; the computed figures live in the valuation card.
    ItemCard {
        image_title: ImageTitle {
            title: "재무제표".to_string(),
            description: "기업 실적 기반 재무 흐름을 요약합니다.".to_string(),
        },
        title: String::new(),
        description: format!("LLM 한 문장 요약: {one_line}"),
        item_list: vec![
            ItemCard::item("매출", "텍스트 요약 기반으로 매출 흐름 설명".to_string()),
            ItemCard::item("영업이익", "텍스트 요약 기반으로 수익성 설명".to_string()),
            ItemCard::item("순이익", "당기순이익 및 추세 요약".to_string()),
            ItemCard::item("현금흐름", "영업/투자/재무 현금흐름 요약".to_string()),
            ItemCard::item("재무 안정성", "부채비율·유동비율 등 안정성 평가".to_string()),
        ],
    }
}

fn build_valuation_card(report: &InternalReport) -> ItemCard {
    let metrics = &report.metrics;
    let one_line = one_line_summary(&report.sections.valuation, ONE_LINE_BUDGET);

    let eps = metrics
        .eps
        .map(fmt_thousands)
        .unwrap_or_else(|| "N/A".to_string());
    let bps = metrics
        .bps
        .map(fmt_thousands)
        .unwrap_or_else(|| "N/A".to_string());

    ItemCard {
        image_title: ImageTitle {
            title: "밸류에이션".to_string(),
            description: "PER·PBR·ROE로 주가 적정성을 판단합니다.".to_string(),
        },
        title: String::new(),
        description: format!("LLM 한 문장 요약: {one_line}"),
        item_list: vec![
            ItemCard::item("PER", format!("{}배", fmt_ratio(metrics.per))),
            ItemCard::item("PBR", format!("{}배", fmt_ratio(metrics.pbr))),
            ItemCard::item("ROE", format!("{}%", fmt_ratio(metrics.roe))),
            ItemCard::item("EPS/BPS", format!("EPS {eps} / BPS {bps}")),
            ItemCard::item("평가 요약", "적정·저평가·고평가 여부는 리포트 본문 참조".to_string()),
        ],
    }
}

fn build_opinion_card(report: &InternalReport) -> ItemCard {
    let opinion_text = &report.sections.investment_opinion;
    let (opinion, target) = extract_opinion_and_target(opinion_text);
    let upside = calc_upside(report.snapshot.current_price, target);

    let one_line = one_line_summary(opinion_text, ONE_LINE_BUDGET);
    let description = if one_line.is_empty() {
        "투자의견 정보가 없습니다.".to_string()
    } else {
        one_line
    };

    ItemCard {
        image_title: ImageTitle {
            title: "투자의견".to_string(),
            description: "최종 투자 결론과 리스크를 제공합니다.".to_string(),
        },
        title: String::new(),
        description: format!("LLM 한 문장 요약: {description}"),
        item_list: vec![
            ItemCard::item("종합 의견", opinion.unwrap_or_else(|| "N/A".to_string())),
            ItemCard::item(
                "목표 주가",
                target
                    .map(|t| format!("{}원", fmt_thousands(t)))
                    .unwrap_or_else(|| "N/A".to_string()),
            ),
            ItemCard::item("Upside", upside),
            ItemCard::item(
                "투자 리스크",
                "리포트 본문에서 제시한 주요 리스크를 참고하세요.".to_string(),
            ),
            ItemCard::item(
                "모니터링 포인트",
                "업황·실적·신사업 진행 상황을 지속적으로 체크하세요.".to_string(),
            ),
        ],
    }
}

/// Truncate a narrative to its first sentence (". ", full-width period, or
/// newline), then to the character budget, appending an ellipsis only when
/// the budget cut anything.
fn one_line_summary(text: &str, max_len: usize) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut line = text;
    for sep in [". ", "。", "\n"] {
        if let Some(idx) = line.find(sep) {
            line = &line[..idx];
            break;
        }
    }

    if line.chars().count() > max_len {
        let truncated: String = line.chars().take(max_len).collect();
        format!("{truncated}...")
    } else {
        line.to_string()
    }
}

/// Best-effort mining of free narrative text.
///
/// The opinion label is the first keyword hit in priority order BUY > HOLD >
/// SELL, in Korean or English; the target price is the first number-like
/// token anywhere in the text. Both are known to misfire: a disclaimer
/// mentioning "매수" reads as BUY, and a date or footnote number can be taken
/// for a price. That imprecision is the accepted contract of this heuristic.
fn extract_opinion_and_target(text: &str) -> (Option<String>, Option<i64>) {
    if text.is_empty() {
        return (None, None);
    }

    let lower = text.to_lowercase();
    let opinion = if text.contains("매수") || lower.contains("buy") {
        Some("매수(BUY)".to_string())
    } else if text.contains("보유") || lower.contains("hold") {
        Some("보유(HOLD)".to_string())
    } else if text.contains("매도") || lower.contains("sell") {
        Some("매도(SELL)".to_string())
    } else {
        None
    };

    (opinion, first_number_token(text))
}

/// First run of digits (commas allowed inside) anywhere in the text.
fn first_number_token(text: &str) -> Option<i64> {
    let mut run = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() || (ch == ',' && !run.is_empty()) {
            run.push(ch);
        } else if !run.is_empty() {
            break;
        }
    }

    let digits: String = run.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok()
}

fn calc_upside(current_price: i64, target: Option<i64>) -> String {
    let Some(target) = target else {
        return "N/A".to_string();
    };
    if current_price <= 0 {
        return "N/A".to_string();
    }

    let diff = (target - current_price) as f64 / current_price as f64 * 100.0;
    format!("{diff:+.1}%")
}
