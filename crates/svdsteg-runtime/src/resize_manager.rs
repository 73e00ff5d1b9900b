//! Resize computation manager.

use std::sync::Arc;

use tracing::debug;

use svdsteg_core::{EngineConfig, ImageData};
use svdsteg_engine::{factory, Engine, EngineFactory, ResizeEngine, ResizeRequest, ResizeResponse};

use crate::single_flight::{settle, SingleFlight};
use crate::{Flight, OnUpdate};

/// Scales images on a background worker; a newer call always wins.
pub struct ResizeManager<E: Engine = ResizeEngine> {
    name: &'static str,
    flight: SingleFlight<E>,
    on_update: OnUpdate<ImageData>,
}

impl ResizeManager<ResizeEngine> {
    pub fn new(
        name: &'static str,
        config: &EngineConfig,
        on_update: impl Fn(ImageData) + Send + Sync + 'static,
    ) -> Self {
        let config = config.clone();
        Self::with_factory(
            name,
            factory(move || Ok(ResizeEngine::new(&config))),
            on_update,
        )
    }
}

impl<E> ResizeManager<E>
where
    E: Engine<Request = ResizeRequest, Response = ResizeResponse>,
{
    pub fn with_factory(
        name: &'static str,
        factory: EngineFactory<E>,
        on_update: impl Fn(ImageData) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            flight: SingleFlight::new(name, factory),
            on_update: Arc::new(on_update),
        }
    }

    /// Resize `image` by `scale`; the result goes to `on_update`.
    pub fn compute_resize(&self, image: ImageData, scale: f64) -> Flight {
        debug!(
            "{}: resize {}x{} by {}",
            self.name, image.width, image.height, scale
        );
        let response = self.flight.request(ResizeRequest { image, scale });
        let on_update = self.on_update.clone();
        let name = self.name;
        tokio::spawn(async move {
            let ResizeResponse::Resized { image } = settle(name, response).await?;
            on_update(image);
            Ok(())
        })
    }
}
