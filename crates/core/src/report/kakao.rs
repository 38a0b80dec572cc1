//! Kakao skill response schema. The shape of this JSON is a hard contract
//! with the chat channel: every reply must carry `version` and
//! `template.outputs`, and card blocks must use the exact camelCase keys
//! below.

use serde::Serialize;

pub const RESPONSE_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize)]
pub struct KakaoResponse {
    pub version: &'static str,
    pub template: Template,
}

#[derive(Debug, Clone, Serialize)]
pub struct Template {
    pub outputs: Vec<Output>,
    #[serde(rename = "quickReplies")]
    pub quick_replies: Vec<QuickReply>,
}

/// One output block. Externally-tagged serialization produces the wire shape
/// `{"simpleText": {...}}` / `{"itemCard": {...}}`.
#[derive(Debug, Clone, Serialize)]
pub enum Output {
    #[serde(rename = "simpleText")]
    SimpleText(SimpleText),
    #[serde(rename = "itemCard")]
    ItemCard(ItemCard),
}

#[derive(Debug, Clone, Serialize)]
pub struct SimpleText {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemCard {
    #[serde(rename = "imageTitle")]
    pub image_title: ImageTitle,
    pub title: String,
    pub description: String,
    #[serde(rename = "itemList")]
    pub item_list: Vec<ListItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageTitle {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListItem {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuickReply {
    pub label: String,
    pub action: &'static str,
    #[serde(rename = "blockId")]
    pub block_id: String,
}

impl QuickReply {
    pub fn block(label: &str, block_id: &str) -> Self {
        Self {
            label: label.to_string(),
            action: "block",
            block_id: block_id.to_string(),
        }
    }
}

impl ItemCard {
    pub fn item(title: &str, description: String) -> ListItem {
        ListItem {
            title: title.to_string(),
            description,
        }
    }
}

impl KakaoResponse {
    /// Serialize to the wire document. Any serialization failure here is a
    /// defect, but the channel must still receive a schema-valid payload, so
    /// a plain-text apology document is substituted at this boundary.
    pub fn to_safe_json(&self) -> serde_json::Value {
        match serde_json::to_value(self) {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(error = %err, "card response failed to serialize; substituting plain text");
                serde_json::json!({
                    "version": RESPONSE_VERSION,
                    "template": {
                        "outputs": [
                            {"simpleText": {"text": "지금 리포트를 불러오는 중에 문제가 발생했어요 😢\n잠시 후 다시 시도해주세요."}}
                        ]
                    }
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outputs_serialize_externally_tagged() {
        let response = KakaoResponse {
            version: RESPONSE_VERSION,
            template: Template {
                outputs: vec![
                    Output::SimpleText(SimpleText {
                        text: "hello".to_string(),
                    }),
                    Output::ItemCard(ItemCard {
                        image_title: ImageTitle {
                            title: "투자 요약".to_string(),
                            description: "desc".to_string(),
                        },
                        title: String::new(),
                        description: "line".to_string(),
                        item_list: vec![ItemCard::item("PER", "12.5배".to_string())],
                    }),
                ],
                quick_replies: vec![QuickReply::block("도움말", "HELP")],
            },
        };

        let v = response.to_safe_json();
        assert_eq!(
            v,
            json!({
                "version": "2.0",
                "template": {
                    "outputs": [
                        {"simpleText": {"text": "hello"}},
                        {"itemCard": {
                            "imageTitle": {"title": "투자 요약", "description": "desc"},
                            "title": "",
                            "description": "line",
                            "itemList": [{"title": "PER", "description": "12.5배"}]
                        }}
                    ],
                    "quickReplies": [
                        {"label": "도움말", "action": "block", "blockId": "HELP"}
                    ]
                }
            })
        );
    }
}
