//! Steganography computation manager.
//!
//! Encode and decode share one worker, so either call preempts the other.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use svdsteg_core::{Error, ImageData, Result, Rgb, StegMode};
use svdsteg_engine::steg::{DECODED, ENCODED};
use svdsteg_engine::{
    factory, EncodeRequest, Engine, EngineFactory, StegEngine, StegRequest, StegResponse, Tagged,
};

use crate::single_flight::{settle, SingleFlight};
use crate::{Flight, OnUpdate};

const NAME: &str = "Steg manager";

/// Result of an encode or decode. An empty `data` means the engine refused
/// and `error` says why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StegInfo {
    pub mode: StegMode,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub error: Option<String>,
}

impl StegInfo {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The payload as an image, or the engine's message.
    pub fn to_image(&self) -> Result<ImageData> {
        if self.data.is_empty() {
            return Err(Error::Capacity(
                self.error.clone().unwrap_or_else(|| "empty result".into()),
            ));
        }
        ImageData::from_rgba(self.width, self.height, self.data.clone())
    }
}

pub struct StegManager<E: Engine = StegEngine> {
    flight: SingleFlight<E>,
    on_update: OnUpdate<StegInfo>,
}

impl StegManager<StegEngine> {
    pub fn new(on_update: impl Fn(StegInfo) + Send + Sync + 'static) -> Self {
        Self::with_factory(factory(|| Ok(StegEngine::new())), on_update)
    }
}

impl<E> StegManager<E>
where
    E: Engine<Request = StegRequest, Response = StegResponse>,
{
    pub fn with_factory(
        factory: EngineFactory<E>,
        on_update: impl Fn(StegInfo) + Send + Sync + 'static,
    ) -> Self {
        Self {
            flight: SingleFlight::new(NAME, factory),
            on_update: Arc::new(on_update),
        }
    }

    /// Hide a rank-`rank` factor pair in `cover`.
    pub fn compute_encode(
        &self,
        cover: ImageData,
        lhs: Rgb<Vec<u16>>,
        rhs: Rgb<Vec<u16>>,
        rank: u32,
        max_lsb: u32,
    ) -> Flight {
        let (width, height) = (cover.width, cover.height);
        debug!(
            "{}: encode rank {} into {}x{} at {} bits",
            NAME, rank, width, height, max_lsb
        );
        let response = self.flight.request(StegRequest::Encode(EncodeRequest {
            cover,
            lhs,
            rhs,
            rank,
            max_lsb,
        }));
        let on_update = self.on_update.clone();
        tokio::spawn(async move {
            let info = match settle(NAME, response).await? {
                StegResponse::Encoded { data, error } => StegInfo {
                    mode: StegMode::Encode,
                    data,
                    width,
                    height,
                    error,
                },
                other => {
                    return Err(Error::Protocol {
                        expected: ENCODED,
                        got: other.tag(),
                    })
                }
            };
            report(&info);
            on_update(info);
            Ok(())
        })
    }

    /// Recover a hidden image from `combined`.
    pub fn compute_decode(&self, combined: ImageData) -> Flight {
        debug!("{}: decode {}x{}", NAME, combined.width, combined.height);
        let response = self.flight.request(StegRequest::Decode { image: combined });
        let on_update = self.on_update.clone();
        tokio::spawn(async move {
            let info = match settle(NAME, response).await? {
                StegResponse::Decoded {
                    data,
                    width,
                    height,
                    error,
                } => StegInfo {
                    mode: StegMode::Decode,
                    data,
                    width,
                    height,
                    error,
                },
                other => {
                    return Err(Error::Protocol {
                        expected: DECODED,
                        got: other.tag(),
                    })
                }
            };
            report(&info);
            on_update(info);
            Ok(())
        })
    }
}

fn report(info: &StegInfo) {
    match &info.error {
        Some(message) => warn!("{}: {} failed: {}", NAME, info.mode, message),
        None => info!(
            "{}: {} produced {}x{}",
            NAME, info.mode, info.width, info.height
        ),
    }
}
