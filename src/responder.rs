use crate::gemini::{GenerationError, ResponseGenerator};
use crate::ledger::{Ledger, LedgerError};
use crate::log_dedup::ErrorLogThrottle;
use crate::mention::{is_mentioned, CHATBOT_HANDLE};
use crate::mention_cache::MentionCache;
use crate::models::{CommitReceipt, PollSummary, PostType};
use crate::prompt::{comment_context, mention_prompt};
use ethers::types::Address;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Posts scanned on the first cycle after startup.
pub const LOOKBACK_POSTS: u64 = 50;

const ERROR_LOG_WINDOW: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum ResponderError {
    #[error("CHATBOT_ADDRESS not configured")]
    NotConfigured,
    #[error("Post does not mention chatbot")]
    NotMentioned,
    #[error("Post {0} already has a response claimed")]
    AlreadyClaimed(u64),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Result of the operator-direct path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectResponse {
    pub response: String,
    /// `None` when no bot identity is configured and nothing was committed.
    pub receipt: Option<CommitReceipt>,
}

enum PostOutcome {
    AlreadyClaimed,
    Skipped,
    Responded,
}

struct Poller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Answers posts that mention the bot, at most once per post.
///
/// Two discovery paths race on the same post IDs: the periodic poller and the
/// inline triggers fired by the write API. Both go through the claim set, so
/// whichever claims a post first owns its reply. A failed attempt releases
/// its claim.
///
/// Construct one per process. Clones share all state.
#[derive(Clone)]
pub struct MentionResponder {
    ledger: Arc<dyn Ledger>,
    generator: Arc<dyn ResponseGenerator>,
    bot_identity: Option<Address>,
    claims: MentionCache,
    last_checked: Arc<Mutex<u64>>,
    poller: Arc<Mutex<Option<Poller>>>,
    error_log: ErrorLogThrottle,
}

impl MentionResponder {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        generator: Arc<dyn ResponseGenerator>,
        bot_identity: Option<Address>,
    ) -> Self {
        Self {
            ledger,
            generator,
            bot_identity,
            claims: MentionCache::new(),
            last_checked: Arc::new(Mutex::new(0)),
            poller: Arc::new(Mutex::new(None)),
            error_log: ErrorLogThrottle::new(ERROR_LOG_WINDOW),
        }
    }

    /// `false` if this call took the claim, `true` if the post was already claimed.
    pub async fn try_claim(&self, post_id: u64) -> bool {
        self.claims.try_claim(post_id).await
    }

    pub async fn release(&self, post_id: u64) {
        self.claims.release(post_id).await;
    }

    #[cfg(test)]
    pub async fn last_checked_post_id(&self) -> u64 {
        *self.last_checked.lock().await
    }

    /// One poll cycle over the posts created since the last cycle.
    ///
    /// The high-water mark lock is held for the whole cycle, so a manual
    /// trigger and the timer never run cycles side by side. If the post count
    /// cannot be read the mark is left untouched and the same range is
    /// retried next time.
    pub async fn poll_once(&self) -> Result<PollSummary, ResponderError> {
        let bot = self.bot_identity.ok_or(ResponderError::NotConfigured)?;

        let mut last_checked = self.last_checked.lock().await;
        let post_count = self.ledger.post_count().await?;

        if *last_checked == 0 {
            let start = post_count.saturating_sub(LOOKBACK_POSTS).max(1);
            *last_checked = start - 1;
            info!(
                "Starting mention monitoring - checking posts {} to {} (last {} posts)",
                start,
                post_count.saturating_sub(1),
                LOOKBACK_POSTS
            );
        }

        let mut summary = PollSummary {
            last_checked_post_id: *last_checked,
            ..PollSummary::default()
        };

        let first = *last_checked + 1;
        if first >= post_count {
            debug!("No new posts since {}", *last_checked);
            return Ok(summary);
        }

        info!("Checking {} new posts for mentions...", post_count - first);

        for post_id in first..post_count {
            match self.check_post(bot, post_id).await {
                Ok(PostOutcome::AlreadyClaimed) => {}
                Ok(PostOutcome::Skipped) => summary.examined += 1,
                Ok(PostOutcome::Responded) => {
                    summary.examined += 1;
                    summary.responded += 1;
                }
                Err(e) => {
                    summary.examined += 1;
                    summary.failed += 1;
                    error!(post_id, error = %e, "Error checking post for mentions");
                }
            }
        }

        // Released IDs below the new mark are not rescanned by later cycles.
        *last_checked = post_count - 1;
        summary.last_checked_post_id = *last_checked;
        Ok(summary)
    }

    async fn check_post(&self, bot: Address, post_id: u64) -> Result<PostOutcome, ResponderError> {
        if self.claims.is_claimed(post_id).await {
            return Ok(PostOutcome::AlreadyClaimed);
        }

        let post = match self.ledger.get_post(post_id).await {
            Ok(post) => post,
            Err(LedgerError::NotFound(_)) => {
                debug!(post_id, "Post not found, skipping");
                return Ok(PostOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        // Comments are answered by the inline path only
        if post.deleted || post.post_type == PostType::Comment {
            return Ok(PostOutcome::Skipped);
        }
        if !is_mentioned(&post.content) {
            return Ok(PostOutcome::Skipped);
        }

        if self.claims.is_claimed(post_id).await {
            info!(post_id, "Skipping post - already claimed while it was being fetched");
            return Ok(PostOutcome::Skipped);
        }
        if self.try_claim(post_id).await {
            return Ok(PostOutcome::Skipped);
        }

        info!(post_id, author = ?post.author, "Found mention in post - responding once");
        let prompt = mention_prompt(post.author, &post.content);
        self.respond_claimed(bot, post_id, post_id, &prompt).await?;
        Ok(PostOutcome::Responded)
    }

    /// Generates and commits a reply for a post whose claim the caller holds.
    /// Any failure releases `claimed_id`; success keeps the claim forever.
    async fn respond_claimed(
        &self,
        bot: Address,
        claimed_id: u64,
        target_post_id: u64,
        prompt: &str,
    ) -> Result<(String, CommitReceipt), ResponderError> {
        let attempt = async {
            let reply = self.generator.generate(prompt).await?;
            let receipt = self
                .ledger
                .submit_comment(bot, target_post_id, &reply)
                .await?;
            Ok::<_, ResponderError>((reply, receipt))
        };

        match attempt.await {
            Ok((reply, receipt)) => {
                info!(
                    post_id = claimed_id,
                    target_post_id,
                    comment_id = ?receipt.committed_id,
                    tx_hash = ?receipt.tx_hash,
                    "Chatbot responded to mention"
                );
                Ok((reply, receipt))
            }
            Err(e) => {
                self.release(claimed_id).await;
                warn!(post_id = claimed_id, error = %e, "Failed to respond to mention, claim released for retry");
                Err(e)
            }
        }
    }

    /// Inline trigger for a freshly written post.
    ///
    /// Claims the post and replies from a detached task; the caller never
    /// waits for, or sees errors from, the reply. The handle is returned for
    /// callers that want to join it and may be dropped.
    pub async fn on_post_submitted(
        &self,
        post_id: u64,
        author: Address,
        text: &str,
    ) -> Option<JoinHandle<()>> {
        if post_id == 0 || !is_mentioned(text) {
            return None;
        }
        if self.try_claim(post_id).await {
            info!(post_id, "Skipping post - already claimed");
            return None;
        }

        info!(post_id, "Post mentions chatbot - responding once");
        let this = self.clone();
        let text = text.to_string();
        Some(tokio::spawn(async move {
            let Some(bot) = this.bot_identity else {
                warn!(post_id, "CHATBOT_ADDRESS not configured, releasing claim");
                this.release(post_id).await;
                return;
            };
            let prompt = mention_prompt(author, &text);
            if let Err(e) = this.respond_claimed(bot, post_id, post_id, &prompt).await {
                error!(post_id, error = %e, "Inline mention response failed");
            }
        }))
    }

    /// Inline trigger for a freshly written comment. The reply is posted on
    /// the parent post, prompted with the parent's content for context.
    pub async fn on_comment_submitted(
        &self,
        comment_id: u64,
        parent_post_id: u64,
        author: Address,
        text: &str,
    ) -> Option<JoinHandle<()>> {
        if comment_id == 0 || !is_mentioned(text) {
            return None;
        }
        if self.try_claim(comment_id).await {
            info!(comment_id, "Skipping comment - already claimed");
            return None;
        }

        info!(comment_id, parent_post_id, "Comment mentions chatbot - responding once");
        let this = self.clone();
        let text = text.to_string();
        Some(tokio::spawn(async move {
            let Some(bot) = this.bot_identity else {
                warn!(comment_id, "CHATBOT_ADDRESS not configured, releasing claim");
                this.release(comment_id).await;
                return;
            };
            let parent = match this.ledger.get_post(parent_post_id).await {
                Ok(parent) => parent,
                Err(e) => {
                    error!(comment_id, parent_post_id, error = %e, "Failed to get original post for context");
                    this.release(comment_id).await;
                    return;
                }
            };
            let context = comment_context(&parent.content, &text);
            let prompt = mention_prompt(author, &context);
            if let Err(e) = this
                .respond_claimed(bot, comment_id, parent_post_id, &prompt)
                .await
            {
                error!(comment_id, error = %e, "Inline comment response failed");
            }
        }))
    }

    /// Operator-invoked reply to a specific post. Errors are returned to the
    /// caller. Without a bot identity the reply is generated but not
    /// committed, and the claim is released.
    pub async fn respond_to_mention(
        &self,
        post_id: u64,
        author: Address,
        content: &str,
    ) -> Result<DirectResponse, ResponderError> {
        if !is_mentioned(content) {
            return Err(ResponderError::NotMentioned);
        }
        if self.try_claim(post_id).await {
            return Err(ResponderError::AlreadyClaimed(post_id));
        }

        let prompt = mention_prompt(author, content);
        match self.bot_identity {
            Some(bot) => {
                let (response, receipt) = self.respond_claimed(bot, post_id, post_id, &prompt).await?;
                Ok(DirectResponse {
                    response,
                    receipt: Some(receipt),
                })
            }
            None => {
                let generated = self.generator.generate(&prompt).await;
                self.release(post_id).await;
                Ok(DirectResponse {
                    response: generated?,
                    receipt: None,
                })
            }
        }
    }

    /// Starts the background poller. A no-op when it is already running or
    /// when no bot identity is configured.
    pub async fn start_polling(&self, interval: Duration) {
        if self.bot_identity.is_none() {
            warn!("CHATBOT_ADDRESS not configured. Mention monitoring disabled.");
            return;
        }

        let mut poller = self.poller.lock().await;
        if poller.is_some() {
            warn!("Mention monitoring is already running");
            return;
        }

        let cancel = CancellationToken::new();
        let this = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { this.run_poll_loop(interval, token).await });
        *poller = Some(Poller { cancel, handle });

        info!(
            "Starting mention monitoring for {} (checking every {:?})",
            CHATBOT_HANDLE, interval
        );
    }

    async fn run_poll_loop(&self, interval: Duration, cancel: CancellationToken) {
        // The first tick fires immediately; a slow cycle delays the next one.
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // After a slow cycle the tick is already due; cancellation wins.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if cancel.is_cancelled() {
                break;
            }

            // Not raced against `cancel`: a started cycle always finishes.
            match self.poll_once().await {
                Ok(summary) => {
                    if summary.responded > 0 || summary.failed > 0 {
                        info!(
                            responded = summary.responded,
                            failed = summary.failed,
                            last_checked = summary.last_checked_post_id,
                            "Mention check finished"
                        );
                    }
                    self.error_log.reset().await;
                }
                Err(e) => {
                    if let Some(suppressed) = self.error_log.admit(&e.to_string()).await {
                        if suppressed > 0 {
                            error!(suppressed, "Error in mention monitoring: {}", e);
                        } else {
                            error!("Error in mention monitoring: {}", e);
                        }
                    }
                }
            }
        }

        info!("Stopped mention monitoring");
    }

    /// Prevents further cycles. A cycle already running is not interrupted;
    /// the returned handle resolves once it has finished.
    pub async fn stop_polling(&self) -> Option<JoinHandle<()>> {
        let poller = self.poller.lock().await.take()?;
        poller.cancel.cancel();
        Some(poller.handle)
    }

    /// Stops polling and waits for the in-flight cycle, if any, to finish.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.stop_polling().await {
            if let Err(e) = handle.await {
                error!("Mention monitor task ended abnormally: {}", e);
            }
        }
    }

    #[cfg(test)]
    pub async fn is_polling(&self) -> bool {
        self.poller.lock().await.is_some()
    }
}
