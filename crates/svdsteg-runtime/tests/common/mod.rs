//! Shared fakes for the runtime integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use svdsteg_core::{Error, ImageData, Result};
use svdsteg_engine::{
    CancelToken, Engine, LowRankApproximation, ResizeRequest, ResizeResponse, StegRequest,
    StegResponse, SvdRequest, SvdResponse,
};

/// Holds engines inside `handle` until opened. Cancelled engines give up.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.changed.notify_all();
    }

    pub fn pass(&self, cancel: &CancelToken) -> Result<()> {
        let mut open = self.open.lock();
        loop {
            if *open {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.changed.wait_for(&mut open, Duration::from_millis(5));
        }
    }
}

/// Echoes the image back once the gate opens.
pub struct GatedResize {
    pub gate: Arc<Gate>,
}

impl Engine for GatedResize {
    type Request = ResizeRequest;
    type Response = ResizeResponse;

    fn handle(&mut self, request: ResizeRequest, cancel: &CancelToken) -> Result<ResizeResponse> {
        self.gate.pass(cancel)?;
        Ok(ResizeResponse::Resized {
            image: request.image,
        })
    }
}

/// Factorizes instantly; reconstructions wait for the gate and carry only
/// their rank.
pub struct GatedSvd {
    pub gate: Arc<Gate>,
    pub factorized: bool,
}

impl GatedSvd {
    pub fn new(gate: Arc<Gate>) -> Self {
        Self {
            gate,
            factorized: false,
        }
    }
}

impl Engine for GatedSvd {
    type Request = SvdRequest;
    type Response = SvdResponse;

    fn handle(&mut self, request: SvdRequest, cancel: &CancelToken) -> Result<SvdResponse> {
        match request {
            SvdRequest::ComputeSvd { rows, cols, .. } => {
                self.factorized = true;
                Ok(SvdResponse::SingularValues {
                    values: vec![1.0; rows.min(cols)],
                })
            }
            SvdRequest::ComputeLowRankApproximation { rank } => {
                if !self.factorized {
                    return Err(Error::Worker("not factorized".into()));
                }
                self.gate.pass(cancel)?;
                Ok(SvdResponse::LowRankApproximation(LowRankApproximation {
                    rank,
                    ..Default::default()
                }))
            }
        }
    }
}

/// Echoes the cover on encode and the image on decode once the gate opens.
pub struct GatedSteg {
    pub gate: Arc<Gate>,
}

impl Engine for GatedSteg {
    type Request = StegRequest;
    type Response = StegResponse;

    fn handle(&mut self, request: StegRequest, cancel: &CancelToken) -> Result<StegResponse> {
        self.gate.pass(cancel)?;
        Ok(match request {
            StegRequest::Encode(encode) => StegResponse::Encoded {
                data: encode.cover.data,
                error: None,
            },
            StegRequest::Decode { image } => StegResponse::Decoded {
                width: image.width,
                height: image.height,
                data: image.data,
                error: None,
            },
        })
    }
}

/// Answers every steg request as if it were an encode.
pub struct CrossedSteg;

impl Engine for CrossedSteg {
    type Request = StegRequest;
    type Response = StegResponse;

    fn handle(&mut self, _request: StegRequest, _cancel: &CancelToken) -> Result<StegResponse> {
        Ok(StegResponse::Encoded {
            data: vec![0; 4],
            error: None,
        })
    }
}

/// Answers every request with singular values.
pub struct ConfusedSvd;

impl Engine for ConfusedSvd {
    type Request = SvdRequest;
    type Response = SvdResponse;

    fn handle(&mut self, _request: SvdRequest, _cancel: &CancelToken) -> Result<SvdResponse> {
        Ok(SvdResponse::SingularValues { values: vec![1.0] })
    }
}

/// Flat image whose width tells test cases apart.
pub fn tagged_image(width: u32) -> ImageData {
    ImageData::blank(width, 2)
}

/// Smooth gradient, distinct per channel.
pub fn gradient(width: u32, height: u32) -> ImageData {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            data.push((x * 255 / width.max(1)) as u8);
            data.push((y * 255 / height.max(1)) as u8);
            data.push(((x + y) * 127 / (width + height).max(1)) as u8);
            data.push(255);
        }
    }
    ImageData { width, height, data }
}

/// Keep polling `condition` until it holds or a second passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
