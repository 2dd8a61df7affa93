use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum PostType {
    Original,
    Retweet,
    Quote,
    Comment,
}

impl PostType {
    /// Encoding used by the contract's `uint8 postType`.
    pub fn as_u8(self) -> u8 {
        match self {
            PostType::Original => 0,
            PostType::Retweet => 1,
            PostType::Quote => 2,
            PostType::Comment => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PostType::Original),
            1 => Some(PostType::Retweet),
            2 => Some(PostType::Quote),
            3 => Some(PostType::Comment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Post {
    pub id: u64,
    pub author: Address,
    pub content: String,
    pub media_cid: String,
    pub timestamp: DateTime<Utc>,
    pub post_type: PostType,
    pub reference_id: u64, // parent post for retweets, quotes and comments; 0 otherwise
    pub deleted: bool,
}

/// Outcome of a committed bot comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    /// ID of the new comment, read from the `PostCreated` event if present.
    pub committed_id: Option<u64>,
    pub tx_hash: H256,
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSummary {
    pub examined: usize,
    pub responded: usize,
    pub failed: usize,
    pub last_checked_post_id: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>, // "user" or "model"
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerateRequest {
    pub contents: Vec<GeminiContent>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerateResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
}

impl GeminiGenerateResponse {
    /// Concatenated text parts of the first candidate.
    pub fn first_text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}
