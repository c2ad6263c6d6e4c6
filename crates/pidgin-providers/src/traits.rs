use pidgin_types::message::Message;
use pidgin_types::stream::{BoxStream, StreamEvent};
use pidgin_types::Result;

/// A provider-agnostic chat completion request: the transformed history an
/// agent sees plus its sampling parameters.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
}

/// Trait every LLM adapter must implement. Mirrors the external provider
/// interface consumed by the provider wrapper: stream chunks, then a final
/// usage tally.
///
/// Implementations are provider-specific adapters that translate between
/// our internal types and a vendor's wire format; real vendor adapters are
/// out of scope here (see crate-level docs) — [`crate::local::LocalProvider`]
/// is the only implementation this crate carries.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a chat completion as a sequence of [`StreamEvent`]s, ending
    /// in exactly one `Done` (success) or `Error`.
    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// A unique identifier for this provider instance (`"anthropic"`,
    /// `"openai"`, `"local"`, …), used to key rate limits and error tags.
    fn provider_id(&self) -> &str;
}
