//! Core client and middleware chain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::errors::{ConfigurationError, SDKError};
use crate::provider::ProviderAdapter;
use crate::types::{Request, Response};

pub type CompleteHandler =
    Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Response, SDKError>> + Send + Sync>;

/// Middleware wrapping `complete()` calls. Registration order is outermost first.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle_complete(
        &self,
        request: Request,
        next: CompleteHandler,
    ) -> Result<Response, SDKError>;
}

#[derive(Clone, Default)]
pub struct Client {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    default_provider: Option<String>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Client {
    pub fn register_provider(&mut self, provider: Arc<dyn ProviderAdapter>) {
        let name = provider.name().to_string();
        if self.default_provider.is_none() {
            self.default_provider = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    pub fn default_provider(&self) -> Option<&str> {
        self.default_provider.as_deref()
    }

    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    pub async fn complete(&self, mut request: Request) -> Result<Response, SDKError> {
        let provider_name = self.resolve_provider(&request)?;
        request.provider = Some(provider_name.clone());
        let adapter = self
            .providers
            .get(&provider_name)
            .ok_or_else(|| {
                SDKError::Configuration(ConfigurationError::new(format!(
                    "provider '{provider_name}' not registered"
                )))
            })?
            .clone();

        let base: CompleteHandler = Arc::new(move |req| {
            let adapter = adapter.clone();
            Box::pin(async move { adapter.complete(req).await })
        });

        let handler = self
            .middleware
            .iter()
            .rev()
            .fold(base, |next, middleware| {
                let middleware = middleware.clone();
                Arc::new(move |req| {
                    let middleware = middleware.clone();
                    let next = next.clone();
                    Box::pin(async move { middleware.handle_complete(req, next).await })
                })
            });

        handler(request).await
    }

    fn resolve_provider(&self, request: &Request) -> Result<String, SDKError> {
        if let Some(provider) = &request.provider {
            return Ok(provider.clone());
        }
        if let Some(provider) = &self.default_provider {
            return Ok(provider.clone());
        }
        Err(SDKError::Configuration(ConfigurationError::new(
            "no provider configured",
        )))
    }
}

/// Logs every completion with its latency and token usage.
#[derive(Debug, Default)]
pub struct TracingMiddleware;

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn handle_complete(
        &self,
        request: Request,
        next: CompleteHandler,
    ) -> Result<Response, SDKError> {
        let model = request.model.clone();
        let message_count = request.messages.len();
        let started = Instant::now();
        let result = next(request).await;
        let elapsed_ms = started.elapsed().as_millis();
        match &result {
            Ok(response) => debug!(
                model = %model,
                messages = message_count,
                elapsed_ms,
                finish_reason = %response.finish_reason.reason,
                total_tokens = response.usage.total_tokens,
                "model completion finished"
            ),
            Err(error) => warn!(model = %model, elapsed_ms, error = %error, "model completion failed"),
        }
        result
    }
}
