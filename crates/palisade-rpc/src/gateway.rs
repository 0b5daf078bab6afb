use palisade_core::ClientRequest;

/// Hands signed client requests to the replicas.
///
/// Implementations send to every replica; responses come back through the
/// [`crate::ResponseCollector`] registered for the request.
pub trait RequestGateway: Send + Sync {
    fn submit(&self, request: &ClientRequest);
}
