use formsync_common::FormId;
use formsync_kernel::IdMapError;
use formsync_sim::SimError;

/// Everything that can go wrong while replicating.
///
/// Handlers log the classified kinds (unknown index, unresolved object,
/// malformed payload, recoverable simulation failure) and keep going.
/// Anything returned from [`crate::ReplicationEngine::handle`] or collected
/// by a pump is unclassified and left to the host.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error(transparent)]
    IdMap(#[from] IdMapError),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error("malformed {context} payload {raw:?}: {source}")]
    MalformedPayload {
        context: &'static str,
        raw: String,
        source: serde_json::Error,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("object {0} did not resolve in time")]
    UnresolvedEntity(FormId),
}

impl ReplicationError {
    pub(crate) fn malformed(context: &'static str, raw: &str, source: serde_json::Error) -> Self {
        Self::MalformedPayload {
            context,
            raw: raw.to_owned(),
            source,
        }
    }
}
