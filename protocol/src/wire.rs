//! Line-delimited stdio transport frames.
//!
//! Each request is a single JSON line carrying a tool identifier and a
//! parameter mapping; each response is an ordered list of content items.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// A single tool-call request read from stdin.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ToolCallRequest {
    /// Correlation id echoed back on the response.
    pub id: JsonValue,
    /// Tool identifier, e.g. `"smart_find"`.
    pub tool: String,
    /// Parameter mapping. Tools with all-default parameters may omit it.
    #[serde(default)]
    pub params: JsonValue,
}

/// One element of a response: either text or an image with a MIME type.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded image payload.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }

    pub fn jpeg(data: impl Into<String>) -> Self {
        ContentItem::Image {
            data: data.into(),
            mime_type: "image/jpeg".to_string(),
        }
    }
}

/// A single response line written to stdout.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ToolCallResponse {
    pub id: JsonValue,
    pub content: Vec<ContentItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolCallResponse {
    pub fn ok(id: JsonValue, content: Vec<ContentItem>) -> Self {
        Self {
            id,
            content,
            is_error: None,
        }
    }

    pub fn error(id: JsonValue, message: impl Into<String>) -> Self {
        Self {
            id,
            content: vec![ContentItem::text(message)],
            is_error: Some(true),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn request_params_default_to_null() {
        let req: ToolCallRequest =
            serde_json::from_str(r#"{"id": 1, "tool": "list_windows"}"#).unwrap();
        assert_eq!(req.tool, "list_windows");
        assert_eq!(req.params, JsonValue::Null);
    }

    #[test]
    fn response_serializes_image_mime_type() {
        let resp = ToolCallResponse::ok(json!(7), vec![ContentItem::jpeg("AAAA")]);
        let line = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            line,
            json!({
                "id": 7,
                "content": [{"type": "image", "data": "AAAA", "mimeType": "image/jpeg"}],
            })
        );
    }
}
