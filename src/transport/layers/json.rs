use std::{future::Future, pin::Pin, sync::Arc};

use tower::{Layer, Service};

use crate::{
    serializer::{EnvelopeSerializer, JsonSerializer},
    transport::RawPayload,
    Dispatch, Envelope,
};

/// Tower `Service` wrapper that serializes envelopes before submission.
///
/// This service converts a `Dispatch<Envelope<M>>` into a
/// `Dispatch<RawPayload>` using an [`EnvelopeSerializer`], preserving the
/// partition key, enqueue time, and item order, before passing it to the
/// inner service. Useful for pipelines where the backend expects raw bytes
/// instead of structured envelopes.
#[derive(Clone)]
pub struct SerializerService<T, SER> {
    inner: T,
    serializer: Arc<SER>,
}

impl<T, SER, M> Service<Dispatch<Envelope<M>>> for SerializerService<T, SER>
where
    M: Send + 'static,
    SER: EnvelopeSerializer<M> + Send + Sync + 'static,
    T: Service<Dispatch<RawPayload>> + Clone + Send + 'static,
    <T as Service<Dispatch<RawPayload>>>::Error: Into<tower::BoxError>,
    T::Future: Send + 'static,
{
    type Response = T::Response;
    type Error = tower::BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Dispatch<Envelope<M>>) -> Self::Future {
        let mut inner = self.inner.clone();
        let serializer = Arc::clone(&self.serializer);

        Box::pin(async move {
            let dispatch = req.map_items(|envelope| serializer.serialize(&envelope))?;
            inner.call(dispatch).await.map_err(Into::into)
        })
    }
}

/// Tower `Layer` that applies a [`SerializerService`] to a service stack.
///
/// Wraps an existing service so that all outgoing envelopes are serialized
/// automatically.
pub struct SerializerLayer<SER> {
    serializer: Arc<SER>,
}

impl<SER> SerializerLayer<SER> {
    /// Create a layer around the given serializer.
    pub fn new(serializer: SER) -> Self {
        Self {
            serializer: Arc::new(serializer),
        }
    }
}

impl<S, SER> Layer<S> for SerializerLayer<SER> {
    type Service = SerializerService<S, SER>;

    fn layer(&self, service: S) -> Self::Service {
        SerializerService {
            inner: service,
            serializer: Arc::clone(&self.serializer),
        }
    }
}

/// Serializer layer specialized to JSON.
pub type JsonLayer = SerializerLayer<JsonSerializer>;

impl Default for JsonLayer {
    fn default() -> Self {
        SerializerLayer::new(JsonSerializer)
    }
}
