//! svdsteg core: errors, configuration, pixel buffers, capacity solver,
//! parameter state.

pub mod capacity;
pub mod config;
pub mod error;
pub mod params;
pub mod pixels;
pub mod rgb;

pub use capacity::{CapacityParameters, FitAxis};
pub use config::{EngineConfig, ResizeFilter, SessionDefaults, SvdStegConfig};
pub use error::{Error, Result};
pub use params::{ParamUpdate, ParameterState, ParameterStore, ResizeStatus, StegMode, SvdStatus};
pub use pixels::ImageData;
pub use rgb::Rgb;
