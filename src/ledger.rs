use crate::config::AppSettings;
use crate::models::{CommitReceipt, Post, PostType};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ethers::abi::{Abi, Token};
use ethers::contract::Contract;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionReceipt, H256, U256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, instrument};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("post {0} not found")]
    NotFound(u64),
    #[error("ledger read failed: {0}")]
    Read(String),
    #[error("comment submission failed: {0}")]
    Write(String),
    #[error("ledger client setup failed: {0}")]
    Setup(String),
}

/// The on-chain store of posts and comments.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// One past the highest assigned post ID.
    async fn post_count(&self) -> Result<u64, LedgerError>;

    async fn get_post(&self, id: u64) -> Result<Post, LedgerError>;

    /// Commits `text` as a Comment authored by `bot` on `target_post_id`.
    async fn submit_comment(
        &self,
        bot: Address,
        target_post_id: u64,
        text: &str,
    ) -> Result<CommitReceipt, LedgerError>;
}

// Only the entries the responder touches.
const POLYX_ABI: &str = r#"[
  {
    "type": "function",
    "name": "nextPostId",
    "stateMutability": "view",
    "inputs": [],
    "outputs": [{ "name": "", "type": "uint256" }]
  },
  {
    "type": "function",
    "name": "getPost",
    "stateMutability": "view",
    "inputs": [{ "name": "postId", "type": "uint256" }],
    "outputs": [{
      "name": "",
      "type": "tuple",
      "components": [
        { "name": "id", "type": "uint256" },
        { "name": "author", "type": "address" },
        { "name": "content", "type": "string" },
        { "name": "mediaCid", "type": "string" },
        { "name": "timestamp", "type": "uint256" },
        { "name": "postType", "type": "uint8" },
        { "name": "referenceId", "type": "uint256" },
        { "name": "likeCount", "type": "uint256" },
        { "name": "retweetCount", "type": "uint256" },
        { "name": "quoteCount", "type": "uint256" },
        { "name": "commentCount", "type": "uint256" },
        { "name": "version", "type": "uint256" },
        { "name": "deleted", "type": "bool" }
      ]
    }]
  },
  {
    "type": "function",
    "name": "createPost",
    "stateMutability": "nonpayable",
    "inputs": [
      { "name": "logicalUser", "type": "address" },
      { "name": "content", "type": "string" },
      { "name": "mediaCid", "type": "string" },
      { "name": "postType", "type": "uint8" },
      { "name": "referenceId", "type": "uint256" }
    ],
    "outputs": [{ "name": "", "type": "uint256" }]
  },
  {
    "type": "event",
    "name": "PostCreated",
    "anonymous": false,
    "inputs": [
      { "name": "id", "type": "uint256", "indexed": true },
      { "name": "author", "type": "address", "indexed": true },
      { "name": "postType", "type": "uint8", "indexed": true },
      { "name": "referenceId", "type": "uint256", "indexed": false },
      { "name": "content", "type": "string", "indexed": false },
      { "name": "mediaCid", "type": "string", "indexed": false },
      { "name": "timestamp", "type": "uint256", "indexed": false }
    ]
  }
]"#;

type SponsorClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// `Ledger` backed by the PolyX contract over JSON-RPC. Transactions are
/// signed by the sponsor wallet; the bot address is passed as the logical
/// author.
pub struct ContractLedger {
    contract: Contract<SponsorClient>,
    post_created_topic: H256,
}

impl std::fmt::Debug for ContractLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractLedger")
            .field("address", &self.contract.address())
            .finish()
    }
}

impl ContractLedger {
    pub fn new(settings: &AppSettings) -> Result<Self, LedgerError> {
        let abi: Abi = serde_json::from_str(POLYX_ABI)
            .map_err(|e| LedgerError::Setup(format!("invalid contract ABI: {}", e)))?;
        let post_created_topic = abi
            .event("PostCreated")
            .map_err(|e| LedgerError::Setup(e.to_string()))?
            .signature();

        let address = settings
            .contract_address
            .parse::<Address>()
            .map_err(|e| LedgerError::Setup(format!("invalid contract address: {}", e)))?;
        let provider = Provider::<Http>::try_from(settings.rpc_url.as_str())
            .map_err(|e| LedgerError::Setup(format!("invalid RPC URL: {}", e)))?;
        let wallet = settings
            .sponsor_private_key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| LedgerError::Setup(format!("invalid sponsor private key: {}", e)))?
            .with_chain_id(settings.chain_id);

        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        Ok(Self {
            contract: Contract::new(address, abi, client),
            post_created_topic,
        })
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    /// ID of the post created by `receipt`, if its `PostCreated` log is present.
    fn created_post_id(&self, receipt: &TransactionReceipt) -> Option<u64> {
        post_id_from_logs(receipt, self.contract.address(), self.post_created_topic)
    }
}

fn post_id_from_logs(receipt: &TransactionReceipt, contract: Address, topic: H256) -> Option<u64> {
    receipt
        .logs
        .iter()
        .filter(|log| log.address == contract)
        .find(|log| log.topics.first() == Some(&topic))
        .and_then(|log| log.topics.get(1))
        .map(|id| U256::from_big_endian(id.as_bytes()).low_u64())
}

/// Maps the `getPost` tuple onto a `Post`.
pub(crate) fn post_from_token(token: Token) -> Result<Post, LedgerError> {
    let fields = match token {
        Token::Tuple(fields) if fields.len() == 13 => fields,
        other => {
            return Err(LedgerError::Read(format!(
                "unexpected getPost return shape: {:?}",
                other
            )))
        }
    };

    let bad = |name: &str| LedgerError::Read(format!("getPost field '{}' has unexpected type", name));
    let mut fields = fields.into_iter();
    let mut next = || fields.next().ok_or_else(|| LedgerError::Read("getPost tuple too short".to_string()));

    let id = next()?.into_uint().ok_or_else(|| bad("id"))?;
    let author = next()?.into_address().ok_or_else(|| bad("author"))?;
    let content = next()?.into_string().ok_or_else(|| bad("content"))?;
    let media_cid = next()?.into_string().ok_or_else(|| bad("mediaCid"))?;
    let timestamp = next()?.into_uint().ok_or_else(|| bad("timestamp"))?;
    let post_type_raw = next()?.into_uint().ok_or_else(|| bad("postType"))?;
    let reference_id = next()?.into_uint().ok_or_else(|| bad("referenceId"))?;
    // likeCount, retweetCount, quoteCount, commentCount, version
    for _ in 0..5 {
        next()?;
    }
    let deleted = next()?.into_bool().ok_or_else(|| bad("deleted"))?;

    let post_type = PostType::from_u8(post_type_raw.low_u64() as u8).ok_or_else(|| {
        LedgerError::Read(format!("unknown post type {}", post_type_raw))
    })?;
    let timestamp = Utc
        .timestamp_opt(timestamp.low_u64() as i64, 0)
        .single()
        .ok_or_else(|| bad("timestamp"))?;

    Ok(Post {
        id: id.low_u64(),
        author,
        content,
        media_cid,
        timestamp,
        post_type,
        reference_id: reference_id.low_u64(),
        deleted,
    })
}

#[async_trait]
impl Ledger for ContractLedger {
    #[instrument(skip(self))]
    async fn post_count(&self) -> Result<u64, LedgerError> {
        let count: U256 = self
            .contract
            .method::<_, U256>("nextPostId", ())
            .map_err(|e| LedgerError::Read(e.to_string()))?
            .call()
            .await
            .map_err(|e| {
                error!("Failed to read nextPostId: {}", e);
                LedgerError::Read(e.to_string())
            })?;
        debug!(post_count = %count, "Read post count");
        Ok(count.low_u64())
    }

    #[instrument(skip(self))]
    async fn get_post(&self, id: u64) -> Result<Post, LedgerError> {
        let raw: Token = self
            .contract
            .method::<_, Token>("getPost", U256::from(id))
            .map_err(|e| LedgerError::Read(e.to_string()))?
            .call()
            .await
            .map_err(|e| {
                if e.is_revert() {
                    LedgerError::NotFound(id)
                } else {
                    LedgerError::Read(e.to_string())
                }
            })?;
        post_from_token(raw)
    }

    #[instrument(skip(self, bot, text), fields(bot = %bot, len = text.len()))]
    async fn submit_comment(
        &self,
        bot: Address,
        target_post_id: u64,
        text: &str,
    ) -> Result<CommitReceipt, LedgerError> {
        let call = self
            .contract
            .method::<_, U256>(
                "createPost",
                (
                    bot,
                    text.to_string(),
                    String::new(),
                    PostType::Comment.as_u8(),
                    U256::from(target_post_id),
                ),
            )
            .map_err(|e| LedgerError::Write(e.to_string()))?;

        let pending = call.send().await.map_err(|e| {
            error!("Failed to send comment transaction on post {}: {}", target_post_id, e);
            LedgerError::Write(e.to_string())
        })?;
        let tx_hash = *pending;
        debug!(tx_hash = ?tx_hash, "Comment transaction sent");

        let receipt = pending
            .await
            .map_err(|e| LedgerError::Write(e.to_string()))?
            .ok_or_else(|| {
                LedgerError::Write(format!("transaction {:?} dropped from mempool", tx_hash))
            })?;

        if receipt.status.map(|s| s.is_zero()).unwrap_or(false) {
            return Err(LedgerError::Write(format!(
                "transaction {:?} reverted",
                receipt.transaction_hash
            )));
        }

        Ok(CommitReceipt {
            committed_id: self.created_post_id(&receipt),
            tx_hash: receipt.transaction_hash,
        })
    }
}

/// Confirms the RPC endpoint answers before the service starts polling.
pub async fn check_rpc(settings: &AppSettings) -> Result<u64, LedgerError> {
    let provider = Provider::<Http>::try_from(settings.rpc_url.as_str())
        .map_err(|e| LedgerError::Setup(format!("invalid RPC URL: {}", e)))?;
    let chain_id = provider
        .get_chainid()
        .await
        .map_err(|e| LedgerError::Read(e.to_string()))?;
    Ok(chain_id.low_u64())
}
