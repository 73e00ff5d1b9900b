//! svdsteg engines: resize, SVD factorization and LSB steganography,
//! each behind a tagged request/response protocol.

pub mod engine;
pub mod lsb;
pub mod resize;
pub mod steg;
pub mod svd;

pub use engine::{factory, CancelToken, Engine, EngineFactory, EngineRequest, Tagged};
pub use resize::{ResizeEngine, ResizeRequest, ResizeResponse};
pub use steg::{EncodeRequest, StegEngine, StegRequest, StegResponse};
pub use svd::{Factorization, LowRankApproximation, SvdEngine, SvdRequest, SvdResponse};
