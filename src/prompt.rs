use ethers::types::Address;

pub const MENTION_SYSTEM_PROMPT: &str = "You are PolyXBot, an AI assistant for PolyX, a decentralized social network on Polygon.
You help users with questions about:
- PolyX features and how to use them
- Web3 and blockchain concepts
- Polygon network
- Decentralized social media
- On-chain interactions

Be helpful, friendly, and concise. Keep responses under 280 characters when possible, but you can be longer if needed for clarity.
Always be accurate and if you don't know something, say so.";

/// Prompt for replying to a post (or comment context) that tagged the bot.
pub fn mention_prompt(author: Address, content: &str) -> String {
    format!(
        "{}\n\nA user ({:?}) tagged you in a post. Here's the post content:\n\"{}\"\n\nGenerate a helpful, relevant response. Keep it concise (under 280 characters if possible). Be friendly and helpful.",
        MENTION_SYSTEM_PROMPT, author, content
    )
}

/// Content handed to `mention_prompt` when the mention is a comment.
pub fn comment_context(parent_content: &str, comment: &str) -> String {
    format!(
        "Original post: \"{}\"\n\nComment: \"{}\"",
        parent_content, comment
    )
}
