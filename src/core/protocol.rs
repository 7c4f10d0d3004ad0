use serde::{Deserialize, Serialize};

use crate::storage::{FileMetadata, FileSummary};

/// Self-description broadcast over UDP so peers can find each other without
/// a central directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DiscoveryMessage {
    #[serde(rename = "ANNOUNCE")]
    Announce {
        peer_id: String,
        display_name: String,
        tcp_port: u16,
    },
}

/// One inbound TCP request. Each connection carries exactly one request and
/// one response; the `kind` tag selects the handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Request {
    #[serde(rename = "CHAT")]
    Chat {
        from_peer_id: String,
        from_name: String,
        text: String,
    },
    #[serde(rename = "LIST_FILES")]
    ListFiles,
    #[serde(rename = "FILE_INFO")]
    FileInfo { file_id: String },
    #[serde(rename = "PIECE")]
    Piece { file_id: String, piece_index: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListReply {
    pub files: Vec<FileSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfoReply {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PieceReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub piece_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub piece_hash: Option<String>,
    /// Raw piece bytes, base64-encoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PieceReply {
    pub fn success(file_id: String, piece_index: u32, piece_hash: String, data: String) -> Self {
        Self {
            ok: true,
            file_id: Some(file_id),
            piece_index: Some(piece_index),
            piece_hash: Some(piece_hash),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            file_id: None,
            piece_index: None,
            piece_hash: None,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Fallback reply for requests whose `kind` the node does not recognize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub ok: bool,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_kind_tag_round_trips() {
        let request = Request::Piece {
            file_id: "abc123".into(),
            piece_index: 4,
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["kind"], "PIECE");
        assert_eq!(json["piece_index"], 4);

        let back: Request = serde_json::from_value(json).expect("deserialize");
        match back {
            Request::Piece { file_id, piece_index } => {
                assert_eq!(file_id, "abc123");
                assert_eq!(piece_index, 4);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn list_files_serializes_as_bare_kind() {
        let json = serde_json::to_value(Request::ListFiles).expect("serialize");
        assert_eq!(json, serde_json::json!({ "kind": "LIST_FILES" }));
    }

    #[test]
    fn unknown_kind_fails_to_parse() {
        let value = serde_json::json!({ "kind": "TELEPORT", "target": "mars" });
        assert!(serde_json::from_value::<Request>(value).is_err());
    }

    #[test]
    fn piece_reply_failure_omits_data_fields() {
        let reply = PieceReply::failure("file not found");
        let json = serde_json::to_value(&reply).expect("serialize");
        assert_eq!(json["ok"], false);
        assert!(json.get("data").is_none());
        assert!(json.get("piece_hash").is_none());
    }

    #[test]
    fn announce_wire_shape() {
        let message = DiscoveryMessage::Announce {
            peer_id: "a1b2c3".into(),
            display_name: "laptop".into(),
            tcp_port: 6001,
        };
        let json = serde_json::to_value(&message).expect("serialize");
        assert_eq!(json["kind"], "ANNOUNCE");
        assert_eq!(json["display_name"], "laptop");
        assert_eq!(json["tcp_port"], 6001);
    }
}
