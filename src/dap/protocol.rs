use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
pub struct DapMessage {
    pub seq: u64,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(flatten)]
    pub content: DapMessageContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DapMessageContent {
    Request {
        command: String,
        #[serde(default)]
        arguments: Option<Value>,
    },
    Response {
        request_seq: u64,
        success: bool,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    Event {
        event: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
}

impl DapMessageContent {
    pub fn msg_type(&self) -> &'static str {
        match self {
            DapMessageContent::Request { .. } => "request",
            DapMessageContent::Response { .. } => "response",
            DapMessageContent::Event { .. } => "event",
        }
    }
}

/// Frame a message with its `Content-Length` header.
pub fn encode_dap(message: &DapMessage) -> serde_json::Result<Vec<u8>> {
    let json = serde_json::to_vec(message)?;
    let mut out = format!("Content-Length: {}\r\n\r\n", json.len()).into_bytes();
    out.extend_from_slice(&json);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_parse_with_or_without_arguments() {
        let msg: DapMessage =
            serde_json::from_value(json!({"seq": 3, "type": "request", "command": "threads"}))
                .unwrap();
        assert!(matches!(
            msg.content,
            DapMessageContent::Request { ref command, arguments: None } if command == "threads"
        ));
    }

    #[test]
    fn responses_omit_empty_fields() {
        let msg = DapMessage {
            seq: 1,
            msg_type: "response".to_string(),
            content: DapMessageContent::Response {
                request_seq: 7,
                success: true,
                command: "next".to_string(),
                message: None,
                body: None,
            },
        };
        let bytes = encode_dap(&msg).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let (header, body) = text.split_once("\r\n\r\n").unwrap();
        assert_eq!(header, format!("Content-Length: {}", body.len()));
        assert!(!body.contains("body"));
        assert!(!body.contains("message"));
    }
}
