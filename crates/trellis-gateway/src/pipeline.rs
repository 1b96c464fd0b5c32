//! Downstream pipeline seam.
//!
//! The mux only decides *which* backend handles a request; processing is the
//! job of an externally-supplied [`Pipeline`]. The registry is read-mostly:
//! the core looks names up, collaborators register.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response};
use parking_lot::RwLock;

/// The request a pipeline receives: head plus fully-buffered body.
pub type PipelineRequest = Request<Full<Bytes>>;
pub type PipelineResponse = Response<Full<Bytes>>;

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn handle(&self, req: PipelineRequest) -> Result<PipelineResponse, anyhow::Error>;
}

/// Optional pre-handler wrapping every matched pipeline; it decides whether
/// and how to invoke `next`.
#[async_trait]
pub trait GlobalFilter: Send + Sync {
    async fn handle(
        &self,
        req: PipelineRequest,
        next: Arc<dyn Pipeline>,
    ) -> Result<PipelineResponse, anyhow::Error>;
}

pub trait PipelineRegistry: Send + Sync {
    fn pipeline(&self, name: &str) -> Option<Arc<dyn Pipeline>>;

    fn global_filter(&self, _name: &str) -> Option<Arc<dyn GlobalFilter>> {
        None
    }
}

/// Straightforward registry for embedding and tests.
#[derive(Default)]
pub struct InMemoryRegistry {
    pipelines: RwLock<HashMap<String, Arc<dyn Pipeline>>>,
    filters: RwLock<HashMap<String, Arc<dyn GlobalFilter>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pipeline(&self, name: impl Into<String>, pipeline: Arc<dyn Pipeline>) {
        self.pipelines.write().insert(name.into(), pipeline);
    }

    pub fn deregister_pipeline(&self, name: &str) {
        self.pipelines.write().remove(name);
    }

    pub fn register_global_filter(&self, name: impl Into<String>, filter: Arc<dyn GlobalFilter>) {
        self.filters.write().insert(name.into(), filter);
    }
}

impl PipelineRegistry for InMemoryRegistry {
    fn pipeline(&self, name: &str) -> Option<Arc<dyn Pipeline>> {
        self.pipelines.read().get(name).cloned()
    }

    fn global_filter(&self, name: &str) -> Option<Arc<dyn GlobalFilter>> {
        self.filters.read().get(name).cloned()
    }
}
