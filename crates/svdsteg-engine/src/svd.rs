//! SVD engine: exact factorization of one colour channel and low-rank
//! reconstruction against it.
//!
//! The factorization itself comes from nalgebra; the factors are then moved
//! into `ndarray` for slicing during reconstruction. The left factor is kept
//! rounded to integers and the right factor to four decimals, which is
//! exactly the precision the steganography payload can carry.

use nalgebra::DMatrix;
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use svdsteg_core::{Error, Result};

use crate::engine::{CancelToken, Engine, EngineRequest, Tagged};

pub const COMPUTE_SVD: &str = "compute-svd";
pub const COMPUTE_LOW_RANK_APPROXIMATION: &str = "compute-low-rank-approximation";
pub const SINGULAR_VALUES: &str = "SINGULAR-VALUES";
pub const LOW_RANK_APPROXIMATION: &str = "LOW-RANK-APPROXIMATION";

/// Right-factor entries are shipped as `round(v * RHS_SCALE)`.
pub const RHS_SCALE: f64 = 10_000.0;

/// Below this rank a reconstruction is always recomputed from scratch.
const INCREMENTAL_MIN_RANK: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "kebab-case")]
pub enum SvdRequest {
    /// Factorize a column-major `rows × cols` channel.
    ComputeSvd {
        rows: usize,
        cols: usize,
        pixels: Vec<u8>,
    },
    ComputeLowRankApproximation { rank: u32 },
}

/// Rank-K reconstruction of one channel plus its quantized factors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowRankApproximation {
    /// Effective rank after clamping to the factorization size.
    pub rank: u32,
    /// Column-major reconstruction, clamped to bytes.
    pub pixels: Vec<u8>,
    /// `rows × rank` left factor (`U·Σ`), column-major, i16 bit patterns.
    pub lhs: Vec<u16>,
    /// `rank × cols` right factor (`Vᵀ · 10000`), column-major, i16 bit patterns.
    pub rhs: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "SCREAMING-KEBAB-CASE")]
pub enum SvdResponse {
    SingularValues { values: Vec<f32> },
    LowRankApproximation(LowRankApproximation),
}

impl Tagged for SvdRequest {
    fn tag(&self) -> &'static str {
        match self {
            Self::ComputeSvd { .. } => COMPUTE_SVD,
            Self::ComputeLowRankApproximation { .. } => COMPUTE_LOW_RANK_APPROXIMATION,
        }
    }
}

impl EngineRequest for SvdRequest {
    fn expected_response(&self) -> &'static str {
        match self {
            Self::ComputeSvd { .. } => SINGULAR_VALUES,
            Self::ComputeLowRankApproximation { .. } => LOW_RANK_APPROXIMATION,
        }
    }
}

impl Tagged for SvdResponse {
    fn tag(&self) -> &'static str {
        match self {
            Self::SingularValues { .. } => SINGULAR_VALUES,
            Self::LowRankApproximation(_) => LOW_RANK_APPROXIMATION,
        }
    }
}

// ---------------------------------------------------------------
// Factorization
// ---------------------------------------------------------------

/// Quantized factors of one channel and the running reconstruction.
pub struct Factorization {
    rows: usize,
    cols: usize,
    /// `U·Σ`, `rows × k`.
    left: Array2<f64>,
    /// `Vᵀ`, `k × cols`.
    right: Array2<f64>,
    singular_values: Vec<f64>,
    approximation: Array2<f64>,
    current_rank: usize,
}

impl Factorization {
    /// Factorize a column-major `rows × cols` byte matrix.
    pub fn compute(pixels: &[u8], rows: usize, cols: usize, cancel: &CancelToken) -> Result<Self> {
        if rows == 0 || cols == 0 || pixels.len() != rows * cols {
            return Err(Error::InvalidParameter(format!(
                "channel of {} bytes is not a {}x{} matrix",
                pixels.len(),
                rows,
                cols
            )));
        }
        cancel.check()?;
        let a = DMatrix::<f64>::from_iterator(rows, cols, pixels.iter().map(|&p| p as f64));
        let svd = a.try_svd(true, true, f64::EPSILON, 0).ok_or_else(|| {
            Error::Worker(format!("SVD of {}x{} channel did not converge", rows, cols))
        })?;
        cancel.check()?;
        let (u, v_t) = match (svd.u, svd.v_t) {
            (Some(u), Some(v_t)) => (u, v_t),
            _ => return Err(Error::Worker("SVD returned no singular vectors".into())),
        };
        let sigma = svd.singular_values;

        let k = sigma.len();
        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by(|&x, &y| sigma[y].total_cmp(&sigma[x]));
        let left = Array2::from_shape_fn((rows, k), |(i, j)| {
            (u[(i, order[j])] * sigma[order[j]]).round()
        });
        let right = Array2::from_shape_fn((k, cols), |(j, c)| {
            (v_t[(order[j], c)] * RHS_SCALE).round() / RHS_SCALE
        });
        let singular_values: Vec<f64> = order.iter().map(|&j| sigma[j]).collect();
        debug!(
            "Factorized {}x{} channel, largest singular value {:.1}",
            rows,
            cols,
            singular_values.first().copied().unwrap_or_default()
        );

        Ok(Self {
            rows,
            cols,
            left,
            right,
            singular_values,
            approximation: Array2::zeros((rows, cols)),
            current_rank: 0,
        })
    }

    pub fn singular_values(&self) -> &[f64] {
        &self.singular_values
    }

    pub fn max_rank(&self) -> usize {
        self.singular_values.len()
    }

    /// Reconstruct at `requested` (clamped to the factorization size).
    ///
    /// Moving between two large, nearby ranks only adds or subtracts the
    /// difference band instead of multiplying the full factors again.
    pub fn low_rank(&mut self, requested: usize) -> LowRankApproximation {
        let rank = requested.min(self.max_rank());
        let old = self.current_rank;
        if old < INCREMENTAL_MIN_RANK || rank < INCREMENTAL_MIN_RANK || 2 * rank < old {
            self.approximation = self
                .left
                .slice(s![.., ..rank])
                .dot(&self.right.slice(s![..rank, ..]));
        } else {
            let (lo, hi) = (old.min(rank), old.max(rank));
            let delta = self
                .left
                .slice(s![.., lo..hi])
                .dot(&self.right.slice(s![lo..hi, ..]));
            if rank > old {
                self.approximation += &delta;
            } else {
                self.approximation -= &delta;
            }
        }
        self.current_rank = rank;

        LowRankApproximation {
            rank: rank as u32,
            pixels: column_major(self.approximation.view())
                .map(|x| x.round().clamp(0.0, 255.0) as u8)
                .collect(),
            lhs: column_major(self.left.slice(s![.., ..rank]))
                .map(to_i16_bits)
                .collect(),
            rhs: column_major(self.right.slice(s![..rank, ..]))
                .map(|x| to_i16_bits(x * RHS_SCALE))
                .collect(),
        }
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

fn column_major(m: ArrayView2<'_, f64>) -> impl Iterator<Item = f64> + '_ {
    m.reversed_axes().into_iter().copied()
}

/// Wrap to 16 bits the way a typed-array store does.
fn to_i16_bits(x: f64) -> u16 {
    x.round() as i64 as i16 as u16
}

// ---------------------------------------------------------------
// Engine
// ---------------------------------------------------------------

/// Holds at most one factorization; a new `ComputeSvd` replaces it.
#[derive(Default)]
pub struct SvdEngine {
    factorization: Option<Factorization>,
}

impl SvdEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for SvdEngine {
    type Request = SvdRequest;
    type Response = SvdResponse;

    fn handle(&mut self, request: SvdRequest, cancel: &CancelToken) -> Result<SvdResponse> {
        match request {
            SvdRequest::ComputeSvd { rows, cols, pixels } => {
                self.factorization = None;
                let factorization = Factorization::compute(&pixels, rows, cols, cancel)?;
                let values = factorization
                    .singular_values()
                    .iter()
                    .map(|&x| x as f32)
                    .collect();
                info!("SVD engine: factorized {}x{} channel", rows, cols);
                self.factorization = Some(factorization);
                Ok(SvdResponse::SingularValues { values })
            }
            SvdRequest::ComputeLowRankApproximation { rank } => {
                let factorization = self.factorization.as_mut().ok_or_else(|| {
                    Error::Worker(format!("'{}' must come first", COMPUTE_SVD))
                })?;
                cancel.check()?;
                Ok(SvdResponse::LowRankApproximation(
                    factorization.low_rank(rank as usize),
                ))
            }
        }
    }
}
