//! Headless session controller.
//!
//! Owns the parameter store and the four managers. Manager results are folded
//! into the store here and nowhere else; dependent steps only start once the
//! step they depend on has reported `COMPUTED`.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use svdsteg_core::capacity::{MAX_LSB, MAX_SCALE, MIN_LSB, MIN_SCALE};
use svdsteg_core::{
    CapacityParameters, Error, FitAxis, ImageData, ParamUpdate, ParameterState, ParameterStore,
    ResizeStatus, Result, StegMode, SvdStatus, SvdStegConfig,
};

use crate::resize_manager::ResizeManager;
use crate::steg_manager::{StegInfo, StegManager};
use crate::svd_manager::{SvdInfo, SvdManager};
use crate::{wait, Flight};

/// Latest result of each manager.
#[derive(Debug, Default, Clone)]
pub struct Artifacts {
    pub hidden: Option<ImageData>,
    pub cover: Option<ImageData>,
    pub svd: Option<SvdInfo>,
    pub steg: Option<StegInfo>,
}

pub struct Session {
    store: Arc<ParameterStore>,
    artifacts: Arc<RwLock<Artifacts>>,
    hidden_resize: ResizeManager,
    cover_resize: ResizeManager,
    svd: SvdManager,
    steg: StegManager,
}

impl Session {
    pub fn new(config: &SvdStegConfig) -> Self {
        let defaults = &config.defaults;
        let store = Arc::new(ParameterStore::new(ParameterState {
            hidden_scale: defaults.hidden_scale,
            cover_scale: defaults.cover_scale,
            raw_num_svs: defaults.rank as f64,
            num_svs: defaults.rank,
            max_lsb: defaults.max_lsb,
            ..ParameterState::default()
        }));
        let artifacts = Arc::new(RwLock::new(Artifacts::default()));

        let hidden_resize = {
            let (store, artifacts) = (store.clone(), artifacts.clone());
            ResizeManager::new("Hidden resize", &config.engine, move |image| {
                artifacts.write().hidden = Some(image);
                store.apply(ParamUpdate::HiddenResize(ResizeStatus::Computed));
            })
        };
        let cover_resize = {
            let (store, artifacts) = (store.clone(), artifacts.clone());
            ResizeManager::new("Cover resize", &config.engine, move |image| {
                artifacts.write().cover = Some(image);
                store.apply(ParamUpdate::CoverResize(ResizeStatus::Computed));
            })
        };
        let svd = {
            let (store, artifacts) = (store.clone(), artifacts.clone());
            SvdManager::new(move |info| {
                let rank = info.rank;
                artifacts.write().svd = Some(info);
                store.apply(ParamUpdate::Svd(SvdStatus::Computed { rank }));
            })
        };
        let steg = {
            let artifacts = artifacts.clone();
            StegManager::new(move |info| {
                artifacts.write().steg = Some(info);
            })
        };

        Self {
            store,
            artifacts,
            hidden_resize,
            cover_resize,
            svd,
            steg,
        }
    }

    pub fn params(&self) -> &ParameterStore {
        &self.store
    }

    pub fn state(&self) -> ParameterState {
        self.store.state()
    }

    pub fn capacity(&self) -> CapacityParameters {
        self.store.capacity()
    }

    pub fn artifacts(&self) -> Artifacts {
        self.artifacts.read().clone()
    }

    /// Run one "Auto" button.
    pub fn auto_fit(&self, axis: FitAxis) -> CapacityParameters {
        let fitted = self.store.auto_fit(axis);
        info!("Session: auto {} -> {:?}", axis, fitted);
        fitted
    }

    pub fn set_hidden_scale(&self, scale: f64) -> Result<()> {
        let fitted = self.store.capacity().with_hidden_scale(scale);
        fitted.validate()?;
        self.store.apply(ParamUpdate::HiddenScale(fitted.hidden_scale));
        if fitted.rank != self.store.state().num_svs {
            self.store.apply(ParamUpdate::NumSvs(fitted.rank as f64));
        }
        Ok(())
    }

    pub fn set_cover_scale(&self, scale: f64) -> Result<()> {
        if !(MIN_SCALE..=MAX_SCALE).contains(&scale) {
            return Err(Error::InvalidParameter(format!(
                "cover scale {} outside [{}, {}]",
                scale, MIN_SCALE, MAX_SCALE
            )));
        }
        self.store.apply(ParamUpdate::CoverScale(scale));
        Ok(())
    }

    pub fn set_max_lsb(&self, max_lsb: u32) -> Result<()> {
        if !(MIN_LSB..=MAX_LSB).contains(&max_lsb) {
            return Err(Error::InvalidParameter(format!(
                "max_lsb {} outside [{}, {}]",
                max_lsb, MIN_LSB, MAX_LSB
            )));
        }
        self.store.apply(ParamUpdate::MaxLsb(max_lsb));
        Ok(())
    }

    /// Move the rank slider. Reconstruction starts only when the hidden
    /// image is factorized and idle; otherwise the rank is picked up later.
    pub fn set_rank(&self, raw: f64) -> Option<Flight> {
        let state = self.store.apply(ParamUpdate::NumSvs(raw));
        if self.svd.is_factorized() {
            self.store
                .apply(ParamUpdate::Svd(SvdStatus::CurrentlyComputing));
        }
        self.svd.set_rank(state.num_svs.max(1))
    }

    /// Resize both images, factorize the hidden one and hide it in the cover.
    ///
    /// Capacity problems are not errors: they come back as a [`StegInfo`]
    /// with empty data and a message.
    pub async fn encode(&self, cover: ImageData, hidden: ImageData) -> Result<StegInfo> {
        self.store.apply(ParamUpdate::Mode(StegMode::Encode));
        self.store.apply(ParamUpdate::HiddenDimensions {
            width: hidden.width,
            height: hidden.height,
        });
        self.store.apply(ParamUpdate::CoverDimensions {
            width: cover.width,
            height: cover.height,
        });
        self.store
            .apply(ParamUpdate::HiddenResize(ResizeStatus::CurrentlyComputing));
        self.store
            .apply(ParamUpdate::CoverResize(ResizeStatus::CurrentlyComputing));
        self.store
            .apply(ParamUpdate::Svd(SvdStatus::CurrentlyComputing));

        let state = self.store.state();
        let hidden_flight = self.hidden_resize.compute_resize(hidden, state.hidden_scale);
        let cover_flight = self.cover_resize.compute_resize(cover, state.cover_scale);
        wait(hidden_flight).await?;
        wait(cover_flight).await?;

        let state = self.store.state();
        if state.hidden_resize != ResizeStatus::Computed
            || state.cover_resize != ResizeStatus::Computed
        {
            return Err(Error::Worker("resize finished without a result".into()));
        }
        let (hidden, cover) = {
            let artifacts = self.artifacts.read();
            match (&artifacts.hidden, &artifacts.cover) {
                (Some(hidden), Some(cover)) => (hidden.clone(), cover.clone()),
                _ => return Err(Error::Worker("resized images missing".into())),
            }
        };

        let max_rank = hidden.width.min(hidden.height).max(1);
        let rank = state.num_svs.clamp(1, max_rank);
        if rank != state.num_svs {
            debug!("Session: rank {} clamped to {}", state.num_svs, rank);
            self.store.apply(ParamUpdate::NumSvs(rank as f64));
        }
        wait(self.svd.compute_svd(
            hidden.height as usize,
            hidden.width as usize,
            hidden.to_channels()?,
            rank,
        ))
        .await?;

        let svd = match (self.store.state().svd, self.artifacts.read().svd.clone()) {
            (SvdStatus::Computed { .. }, Some(svd)) => svd,
            _ => return Err(Error::Worker("factorization finished without a result".into())),
        };

        let max_lsb = self.store.state().max_lsb;
        wait(self.steg.compute_encode(
            cover,
            svd.lhs(),
            svd.rhs(),
            svd.effective_rank(),
            max_lsb,
        ))
        .await?;
        self.latest_steg()
    }

    /// Recover the hidden image from an encoded one.
    pub async fn decode(&self, image: ImageData) -> Result<StegInfo> {
        self.store.apply(ParamUpdate::Mode(StegMode::Decode));
        wait(self.steg.compute_decode(image)).await?;
        self.latest_steg()
    }

    /// The low-rank reconstruction of the resized hidden image, if any.
    pub fn reconstruction(&self) -> Option<Result<ImageData>> {
        let artifacts = self.artifacts.read();
        let hidden = artifacts.hidden.as_ref()?;
        let svd = artifacts.svd.as_ref()?;
        Some(svd.to_rgba(hidden.height as usize, hidden.width as usize))
    }

    fn latest_steg(&self) -> Result<StegInfo> {
        let info = self
            .artifacts
            .read()
            .steg
            .clone()
            .ok_or_else(|| Error::Worker("steganography finished without a result".into()))?;
        if let Some(message) = &info.error {
            warn!("Session: {}", message);
        }
        Ok(info)
    }
}
