pub mod mock;
pub mod vertex;

use async_trait::async_trait;

use crate::error::RemoteError;

/// The remote reasoning service. Could be Vertex AI, or a test script.
///
/// `invoke` returns only the final accumulated reply. Streaming, sessions,
/// and in-band error payloads are the implementation's business; an in-band
/// error must come back as `Err`, never as text.
#[async_trait]
pub trait RemoteAgent: Send + Sync {
    async fn invoke(&self, message: &str) -> Result<String, RemoteError>;
}
