use crate::responder::{DirectResponse, MentionResponder};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

/// Envelope shared with the PolyX gateway: `success` plus either `data` or `error`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn respond_ok<T: Serialize>(data: T) -> Response {
    Json(ApiResponse {
        success: true,
        data: Some(data),
        error: None,
    })
    .into_response()
}

fn respond_err(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message.into()),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondToMentionRequest {
    pub post_id: u64,
    pub post_content: String,
    pub post_author: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSubmittedRequest {
    pub post_id: u64,
    pub text: String,
    pub author: String,
    /// Set when the submitted post is a comment on `parent_post_id`.
    #[serde(default)]
    pub parent_post_id: Option<u64>,
}

/// Accepts only `0x`-prefixed 42 character addresses.
fn parse_address(field: &str, value: &str) -> Result<Address, String> {
    if value.len() != 42 || !value.starts_with("0x") {
        return Err(format!("{} must be a 0x-prefixed 42 character address", field));
    }
    value
        .parse::<Address>()
        .map_err(|e| format!("{} is not a valid address: {}", field, e))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn check_mentions(State(responder): State<MentionResponder>) -> Response {
    info!("Manual mention check triggered");
    match responder.poll_once().await {
        Ok(summary) => respond_ok(json!({
            "message": "Mention check triggered",
            "summary": summary,
        })),
        Err(e) => {
            error!("Manual mention check failed: {}", e);
            respond_err(e.to_string())
        }
    }
}

async fn respond_to_mention(
    State(responder): State<MentionResponder>,
    Json(request): Json<RespondToMentionRequest>,
) -> Response {
    if request.post_id == 0 {
        return respond_err("postId must be a positive integer");
    }
    let author = match parse_address("postAuthor", &request.post_author) {
        Ok(author) => author,
        Err(e) => return respond_err(e),
    };

    match responder
        .respond_to_mention(request.post_id, author, &request.post_content)
        .await
    {
        Ok(DirectResponse {
            response,
            receipt: Some(receipt),
        }) => respond_ok(json!({
            "response": response,
            "commentId": receipt.committed_id,
            "txHash": receipt.tx_hash,
        })),
        Ok(DirectResponse {
            response,
            receipt: None,
        }) => respond_ok(json!({
            "response": response,
            "message": "Response generated but not posted (CHATBOT_ADDRESS not configured)",
        })),
        Err(e) => respond_err(e.to_string()),
    }
}

async fn post_submitted(
    State(responder): State<MentionResponder>,
    Json(request): Json<PostSubmittedRequest>,
) -> Response {
    if request.post_id == 0 {
        return respond_err("postId must be a positive integer");
    }
    let author = match parse_address("author", &request.author) {
        Ok(author) => author,
        Err(e) => return respond_err(e),
    };

    // The reply task is detached; its outcome is only visible in the logs.
    let triggered = match request.parent_post_id {
        Some(parent_post_id) => responder
            .on_comment_submitted(request.post_id, parent_post_id, author, &request.text)
            .await
            .is_some(),
        None => responder
            .on_post_submitted(request.post_id, author, &request.text)
            .await
            .is_some(),
    };

    respond_ok(json!({ "postId": request.post_id, "triggered": triggered }))
}

pub fn router(responder: MentionResponder) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chatbot/check-mentions", post(check_mentions))
        .route("/api/chatbot/respond-to-mention", post(respond_to_mention))
        .route("/api/chatbot/post-submitted", post(post_submitted))
        .with_state(responder)
}
