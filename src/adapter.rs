use std::sync::{Arc, PoisonError, RwLock};

use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use crate::{
    backend::{select_backend, EnhanceBackend, FragmentStream, Transport},
    config::LlmConfig,
    errors::{EnhanceError, EnhanceMode},
};

/// A configuration together with the backend resolved from it.
struct Active {
    config: LlmConfig,
    backend: Option<Arc<dyn EnhanceBackend>>,
}

impl Active {
    fn resolve(config: LlmConfig, transport: &Transport) -> Self {
        let backend = match select_backend(&config, transport) {
            Ok(backend) => Some(backend),
            Err(error) => {
                warn!(error = %error, "configured provider is not supported");
                None
            }
        };
        Self { config, backend }
    }

    fn backend(&self, mode: EnhanceMode) -> Result<Arc<dyn EnhanceBackend>, EnhanceError> {
        match &self.backend {
            Some(backend) => Ok(Arc::clone(backend)),
            None => {
                warn!(provider = %self.config.provider, mode = %mode, "enhance call rejected");
                Err(EnhanceError::UnsupportedProvider {
                    provider: self.config.provider.clone(),
                    mode,
                })
            }
        }
    }
}

/// Entry point for enhancement calls.
///
/// Each call takes one snapshot of the active configuration; calls already in
/// flight keep the backend they started with when [`Enhancer::replace_config`]
/// swaps in a new one.
pub struct Enhancer {
    transport: Transport,
    active: RwLock<Arc<Active>>,
}

impl Enhancer {
    pub fn new(config: LlmConfig, transport: Transport) -> Self {
        let active = Active::resolve(config, &transport);
        Self {
            transport,
            active: RwLock::new(Arc::new(active)),
        }
    }

    pub fn config(&self) -> LlmConfig {
        self.session().config().clone()
    }

    pub fn replace_config(&self, config: LlmConfig) {
        let next = Arc::new(Active::resolve(config, &self.transport));
        info!(provider = %next.config.provider, model = %next.config.model, "llm config replaced");
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Pins the current configuration for a caller that needs to report the
    /// provider and model it actually dispatched to.
    pub fn session(&self) -> Session {
        let active = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Session { active }
    }

    pub async fn enhance(&self, text: &str) -> Result<String, EnhanceError> {
        self.session().enhance(text).await
    }

    /// Pull form of [`Enhancer::enhance_streaming`].
    pub async fn fragments(&self, text: &str) -> Result<FragmentStream, EnhanceError> {
        self.session().fragments(text).await
    }

    pub async fn enhance_streaming<F>(&self, text: &str, on_fragment: F) -> Result<(), EnhanceError>
    where
        F: FnMut(String) + Send,
    {
        self.session().enhance_streaming(text, on_fragment).await
    }
}

/// One configuration snapshot. A later [`Enhancer::replace_config`] does not
/// affect it.
#[derive(Clone)]
pub struct Session {
    active: Arc<Active>,
}

impl Session {
    pub fn config(&self) -> &LlmConfig {
        &self.active.config
    }

    pub async fn enhance(&self, text: &str) -> Result<String, EnhanceError> {
        let backend = self.active.backend(EnhanceMode::OneShot)?;
        let provider = backend.provider();
        debug!(provider = %provider, chars = text.chars().count(), "enhance requested");

        backend.enhance(text).await.map_err(|source| {
            error!(provider = %provider, error = %source, "enhance failed");
            EnhanceError::backend(provider, source)
        })
    }

    pub async fn fragments(&self, text: &str) -> Result<FragmentStream, EnhanceError> {
        let backend = self.active.backend(EnhanceMode::Streaming)?;
        open_stream(&backend, text).await
    }

    pub async fn enhance_streaming<F>(&self, text: &str, mut on_fragment: F) -> Result<(), EnhanceError>
    where
        F: FnMut(String) + Send,
    {
        let backend = self.active.backend(EnhanceMode::Streaming)?;
        let provider = backend.provider();
        let mut fragments = open_stream(&backend, text).await?;

        let mut delivered = 0usize;
        while let Some(next) = fragments.next().await {
            match next {
                Ok(fragment) => {
                    delivered += 1;
                    on_fragment(fragment);
                }
                Err(source) => {
                    error!(provider = %provider, fragments = delivered, error = %source, "stream failed");
                    return Err(EnhanceError::backend(provider, source));
                }
            }
        }

        debug!(provider = %provider, fragments = delivered, "stream completed");
        Ok(())
    }
}

async fn open_stream(
    backend: &Arc<dyn EnhanceBackend>,
    text: &str,
) -> Result<FragmentStream, EnhanceError> {
    let provider = backend.provider();
    debug!(provider = %provider, chars = text.chars().count(), "stream requested");
    backend.stream_enhance(text).await.inspect_err(|failure| {
        error!(provider = %provider, error = %failure, "stream failed before first fragment");
    })
}
