//! Parameter state: the single-writer store every computation reads.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capacity::{CapacityParameters, FitAxis};

/// Which way the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StegMode {
    #[default]
    Encode,
    Decode,
}

impl std::fmt::Display for StegMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode => write!(f, "encode"),
            Self::Decode => write!(f, "decode"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "status")]
pub enum SvdStatus {
    #[default]
    CurrentlyComputing,
    Computed { rank: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResizeStatus {
    #[default]
    CurrentlyComputing,
    Computed,
}

/// Full parameter state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterState {
    pub hidden_width: u32,
    pub hidden_height: u32,
    pub cover_width: u32,
    pub cover_height: u32,
    pub hidden_scale: f64,
    pub cover_scale: f64,
    /// Slider position as dragged; `num_svs` is its ceiling.
    pub raw_num_svs: f64,
    pub num_svs: u32,
    pub max_lsb: u32,
    pub svd: SvdStatus,
    pub hidden_resize: ResizeStatus,
    pub cover_resize: ResizeStatus,
    pub mode: StegMode,
}

impl Default for ParameterState {
    fn default() -> Self {
        Self {
            hidden_width: 0,
            hidden_height: 0,
            cover_width: 0,
            cover_height: 0,
            hidden_scale: 1.0,
            cover_scale: 1.0,
            raw_num_svs: 0.0,
            num_svs: 0,
            max_lsb: 1,
            svd: SvdStatus::CurrentlyComputing,
            hidden_resize: ResizeStatus::CurrentlyComputing,
            cover_resize: ResizeStatus::CurrentlyComputing,
            mode: StegMode::Encode,
        }
    }
}

impl ParameterState {
    pub fn capacity(&self) -> CapacityParameters {
        CapacityParameters {
            hidden_width: self.hidden_width,
            hidden_height: self.hidden_height,
            hidden_scale: self.hidden_scale,
            rank: self.num_svs,
            cover_width: self.cover_width,
            cover_height: self.cover_height,
            cover_scale: self.cover_scale,
            max_lsb: self.max_lsb,
        }
    }
}

/// One change to the parameter state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamUpdate {
    HiddenDimensions { width: u32, height: u32 },
    CoverDimensions { width: u32, height: u32 },
    HiddenScale(f64),
    CoverScale(f64),
    NumSvs(f64),
    MaxLsb(u32),
    Svd(SvdStatus),
    HiddenResize(ResizeStatus),
    CoverResize(ResizeStatus),
    Mode(StegMode),
}

/// Owner of the parameter state. Reads hand out snapshots; all writes go
/// through [`ParameterStore::apply`].
pub struct ParameterStore {
    state: RwLock<ParameterState>,
}

impl ParameterStore {
    pub fn new(initial: ParameterState) -> Self {
        Self {
            state: RwLock::new(initial),
        }
    }

    /// Snapshot of the whole state.
    pub fn state(&self) -> ParameterState {
        self.state.read().clone()
    }

    /// Snapshot of the capacity-relevant fields.
    pub fn capacity(&self) -> CapacityParameters {
        self.state.read().capacity()
    }

    /// Apply an update and return the resulting state.
    pub fn apply(&self, update: ParamUpdate) -> ParameterState {
        let mut state = self.state.write();
        Self::fold(&mut state, update);
        debug!("Parameter update: {:?}", update);
        state.clone()
    }

    fn fold(state: &mut ParameterState, update: ParamUpdate) {
        match update {
            ParamUpdate::HiddenDimensions { width, height } => {
                state.hidden_width = width;
                state.hidden_height = height;
            }
            ParamUpdate::CoverDimensions { width, height } => {
                state.cover_width = width;
                state.cover_height = height;
            }
            ParamUpdate::HiddenScale(scale) => state.hidden_scale = scale,
            ParamUpdate::CoverScale(scale) => state.cover_scale = scale,
            ParamUpdate::NumSvs(raw) => {
                state.raw_num_svs = raw;
                state.num_svs = raw.max(0.0).ceil() as u32;
            }
            ParamUpdate::MaxLsb(max_lsb) => state.max_lsb = max_lsb,
            ParamUpdate::Svd(status) => state.svd = status,
            ParamUpdate::HiddenResize(status) => state.hidden_resize = status,
            ParamUpdate::CoverResize(status) => state.cover_resize = status,
            ParamUpdate::Mode(mode) => state.mode = mode,
        }
    }

    /// Auto-fit one axis from a single snapshot and store the result under
    /// the same write lock.
    pub fn auto_fit(&self, axis: FitAxis) -> CapacityParameters {
        let mut state = self.state.write();
        let fitted = state.capacity().auto_fit(axis);
        let update = match axis {
            FitAxis::HiddenScale => ParamUpdate::HiddenScale(fitted.hidden_scale),
            FitAxis::CoverScale => ParamUpdate::CoverScale(fitted.cover_scale),
            FitAxis::Rank => ParamUpdate::NumSvs(fitted.rank as f64),
            FitAxis::MaxLsb => ParamUpdate::MaxLsb(fitted.max_lsb),
        };
        Self::fold(&mut state, update);
        if axis == FitAxis::HiddenScale && fitted.rank != state.num_svs {
            Self::fold(&mut state, ParamUpdate::NumSvs(fitted.rank as f64));
        }
        debug!("Auto-fit {}: {:?}", axis, update);
        fitted
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new(ParameterState::default())
    }
}
