//! Capacity arithmetic and the auto-fit solver.
//!
//! The hidden payload is the rank-K factor pair of every colour channel,
//! each entry quantized to 16 bits, plus a 6-byte width/height/rank header.
//! The cover carries `max_lsb` bits in each of its R, G, B bytes.
//!
//! Each `auto_*` function fits exactly one axis with the other three held
//! fixed. Rounding direction differs per axis: values that add cost are
//! floored, values that add capacity are ceiled, so the result always lands
//! on a slider position that still satisfies `payload <= capacity`. The
//! solvers then step along their axis until the payload also fits at the
//! rounded pixel sizes the resize engine produces.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const MIN_SCALE: f64 = 0.2;
pub const MAX_SCALE: f64 = 5.0;
pub const MIN_LSB: u32 = 1;
pub const MAX_LSB: u32 = 8;

/// Width, height and rank, 16 bits each.
pub const METADATA_BYTES: u64 = 6;

const CHANNELS: u64 = 3;
const BYTES_PER_ENTRY: u64 = 2;
const FINE_STEP: f64 = 0.05;
const COARSE_STEP: f64 = 0.25;
const GRID_EPSILON: f64 = 1e-9;
/// The rank settles within two refits; this only bounds the loop.
const MAX_REFITS: usize = 8;

/// The axis an auto-fit solves for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitAxis {
    HiddenScale,
    CoverScale,
    Rank,
    MaxLsb,
}

impl FitAxis {
    pub fn all() -> &'static [FitAxis] {
        &[Self::HiddenScale, Self::CoverScale, Self::Rank, Self::MaxLsb]
    }
}

impl std::fmt::Display for FitAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HiddenScale => write!(f, "hidden-scale"),
            Self::CoverScale => write!(f, "cover-scale"),
            Self::Rank => write!(f, "rank"),
            Self::MaxLsb => write!(f, "max-lsb"),
        }
    }
}

impl std::str::FromStr for FitAxis {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hidden-scale" => Ok(Self::HiddenScale),
            "cover-scale" => Ok(Self::CoverScale),
            "rank" | "num-svs" => Ok(Self::Rank),
            "max-lsb" => Ok(Self::MaxLsb),
            other => Err(Error::InvalidParameter(format!("unknown axis '{}'", other))),
        }
    }
}

/// A consistent snapshot of the four tunable parameters and the two
/// source image sizes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityParameters {
    pub hidden_width: u32,
    pub hidden_height: u32,
    pub hidden_scale: f64,
    pub rank: u32,
    pub cover_width: u32,
    pub cover_height: u32,
    pub cover_scale: f64,
    pub max_lsb: u32,
}

impl Default for CapacityParameters {
    fn default() -> Self {
        Self {
            hidden_width: 0,
            hidden_height: 0,
            hidden_scale: 1.0,
            rank: 0,
            cover_width: 0,
            cover_height: 0,
            cover_scale: 1.0,
            max_lsb: 1,
        }
    }
}

fn scaled(dim: u32, scale: f64) -> u64 {
    (dim as f64 * scale).floor().max(0.0) as u64
}

/// Pixel size the resize engine produces for `dim` at `scale`: rounded,
/// and never below one pixel.
pub fn resized_dimension(dim: u32, scale: f64) -> u32 {
    if dim == 0 {
        return 0;
    }
    (dim as f64 * scale).round().clamp(1.0, u32::MAX as f64) as u32
}

fn clamp_scale(scale: f64) -> f64 {
    scale.clamp(MIN_SCALE, MAX_SCALE)
}

fn step_for(scale: f64) -> f64 {
    if scale < 1.0 {
        FINE_STEP
    } else {
        COARSE_STEP
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Largest slider position not above `scale`.
pub fn floor_to_grid(scale: f64) -> f64 {
    let step = step_for(scale);
    round_cents((scale / step + GRID_EPSILON).floor() * step)
}

/// Smallest slider position not below `scale`.
pub fn ceil_to_grid(scale: f64) -> f64 {
    let step = step_for(scale);
    round_cents((scale / step - GRID_EPSILON).ceil() * step)
}

fn next_grid_position(scale: f64) -> f64 {
    round_cents(scale + step_for(scale)).min(MAX_SCALE)
}

fn previous_grid_position(scale: f64) -> f64 {
    round_cents(scale - step_for(scale - FINE_STEP / 2.0)).max(MIN_SCALE)
}

impl CapacityParameters {
    pub fn hidden_loaded(&self) -> bool {
        self.hidden_width > 0 && self.hidden_height > 0
    }

    pub fn metadata_bytes(&self) -> u64 {
        if self.hidden_loaded() {
            METADATA_BYTES
        } else {
            0
        }
    }

    pub fn scaled_hidden_width(&self) -> u64 {
        scaled(self.hidden_width, self.hidden_scale)
    }

    pub fn scaled_hidden_height(&self) -> u64 {
        scaled(self.hidden_height, self.hidden_scale)
    }

    pub fn scaled_cover_width(&self) -> u64 {
        scaled(self.cover_width, self.cover_scale)
    }

    pub fn scaled_cover_height(&self) -> u64 {
        scaled(self.cover_height, self.cover_scale)
    }

    /// `floor((w + h) * s)`: the number of factor rows plus factor columns.
    fn scaled_hidden_extent(&self) -> u64 {
        scaled(self.hidden_width + self.hidden_height, self.hidden_scale)
    }

    /// Highest rank the scaled hidden image supports.
    pub fn max_rank(&self) -> u32 {
        self.scaled_hidden_width()
            .min(self.scaled_hidden_height())
            .min(u32::MAX as u64) as u32
    }

    pub fn cover_capacity_bits(&self) -> u64 {
        self.scaled_cover_width() * self.scaled_cover_height() * CHANNELS * self.max_lsb as u64
    }

    pub fn hidden_payload_bits(&self) -> u64 {
        (self.scaled_hidden_extent() * self.rank as u64 * CHANNELS * BYTES_PER_ENTRY
            + self.metadata_bytes())
            * 8
    }

    pub fn cover_capacity_bytes(&self) -> u64 {
        self.cover_capacity_bits() / 8
    }

    pub fn hidden_payload_bytes(&self) -> u64 {
        self.hidden_payload_bits() / 8
    }

    pub fn fits(&self) -> bool {
        self.hidden_payload_bits() <= self.cover_capacity_bits()
    }

    /// Payload bytes for the image the resize engine will actually hand
    /// the factorization, with the rank clamped the way encode clamps it.
    pub fn resized_payload_bytes(&self) -> u64 {
        if !self.hidden_loaded() {
            return 0;
        }
        let width = resized_dimension(self.hidden_width, self.hidden_scale) as u64;
        let height = resized_dimension(self.hidden_height, self.hidden_scale) as u64;
        let rank = (self.rank as u64).clamp(1, width.min(height));
        (width + height) * rank * CHANNELS * BYTES_PER_ENTRY + METADATA_BYTES
    }

    /// Whole bytes the resized cover can carry.
    pub fn resized_capacity_bytes(&self) -> u64 {
        resized_dimension(self.cover_width, self.cover_scale) as u64
            * resized_dimension(self.cover_height, self.cover_scale) as u64
            * CHANNELS
            * self.max_lsb as u64
            / 8
    }

    /// [`fits`](Self::fits), and also true of the rounded pixel sizes the
    /// encode pipeline works with. The floored formula alone can accept a
    /// payload up to two factor rows larger than the engine will take.
    pub fn fits_resized(&self) -> bool {
        self.fits() && self.resized_payload_bytes() <= self.resized_capacity_bytes()
    }

    /// Apply a hidden scale and pull the rank back inside the new bounds.
    pub fn with_hidden_scale(&self, scale: f64) -> Self {
        let mut next = Self {
            hidden_scale: scale,
            ..*self
        };
        if next.hidden_loaded() {
            next.rank = next.rank.min(next.max_rank().max(1));
        }
        next
    }

    /// Check every axis against its legal range.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SCALE..=MAX_SCALE).contains(&self.hidden_scale) {
            return Err(Error::InvalidParameter(format!(
                "hidden scale {} outside [{}, {}]",
                self.hidden_scale, MIN_SCALE, MAX_SCALE
            )));
        }
        if !(MIN_SCALE..=MAX_SCALE).contains(&self.cover_scale) {
            return Err(Error::InvalidParameter(format!(
                "cover scale {} outside [{}, {}]",
                self.cover_scale, MIN_SCALE, MAX_SCALE
            )));
        }
        if !(MIN_LSB..=MAX_LSB).contains(&self.max_lsb) {
            return Err(Error::InvalidParameter(format!(
                "max LSB {} outside [{}, {}]",
                self.max_lsb, MIN_LSB, MAX_LSB
            )));
        }
        if self.hidden_loaded() && (self.rank < 1 || self.rank > self.max_rank()) {
            return Err(Error::InvalidParameter(format!(
                "rank {} outside [1, {}]",
                self.rank,
                self.max_rank()
            )));
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Auto-fit
    // ---------------------------------------------------------------

    /// Bytes left for factor entries once the header is written.
    fn available_payload_bytes(&self) -> f64 {
        self.cover_capacity_bits() as f64 / 8.0 - self.metadata_bytes() as f64
    }

    /// Hidden scale that makes the payload fit, holding rank, cover scale
    /// and max LSB fixed. Returns the current scale when no cover is loaded.
    pub fn auto_hidden_scale(&self) -> f64 {
        self.fit_hidden_scale().hidden_scale
    }

    /// Solve for the hidden scale until the rank it implies stops moving.
    ///
    /// Rounding the scale down can leave the image narrower than the rank,
    /// which pulls the rank down and frees room for a larger scale. The
    /// smaller rank is kept and solved against again, so fitting the result
    /// a second time returns it unchanged.
    fn fit_hidden_scale(&self) -> Self {
        let mut fitted = *self;
        for _ in 0..MAX_REFITS {
            let next = fitted.with_hidden_scale(fitted.solve_hidden_scale());
            if next == fitted {
                break;
            }
            fitted = next;
        }
        fitted
    }

    /// One pass of the hidden-scale solve at the current rank.
    ///
    /// When the linear solution would shrink the image below the requested
    /// rank, the rank is assumed to shrink with it (`rank = s * min(w, h)`)
    /// and the quadratic is solved instead.
    fn solve_hidden_scale(&self) -> f64 {
        if self.cover_capacity_bits() == 0 {
            return self.hidden_scale;
        }
        let extent = (self.hidden_width + self.hidden_height) as f64;
        let min_dim = self.hidden_width.min(self.hidden_height) as f64;
        let rank = self.rank as f64;
        if extent == 0.0 || min_dim == 0.0 || rank == 0.0 {
            return self.hidden_scale;
        }
        let available = self.available_payload_bytes();
        if available <= 0.0 {
            return MIN_SCALE;
        }

        let per_entry = (CHANNELS * BYTES_PER_ENTRY) as f64;
        let mut required = available / (per_entry * rank * extent);
        if required * min_dim < rank {
            required = (available / (per_entry * min_dim * extent)).sqrt();
            if required * min_dim < 1.0 {
                // The rank cannot drop below one.
                required = available / (per_entry * extent);
            }
        }
        let mut scale = clamp_scale(floor_to_grid(required));
        while scale > MIN_SCALE && !self.with_hidden_scale(scale).fits_resized() {
            scale = previous_grid_position(scale);
        }
        scale
    }

    /// Cover scale that makes the payload fit, holding the hidden side and
    /// max LSB fixed. Returns the current scale when nothing is hidden.
    pub fn auto_cover_scale(&self) -> f64 {
        let payload = self.hidden_payload_bits();
        let area = self.cover_width as f64
            * self.cover_height as f64
            * CHANNELS as f64
            * self.max_lsb as f64;
        if payload == 0 || area == 0.0 {
            return self.cover_scale;
        }

        let fits_at = |cover_scale| {
            Self {
                cover_scale,
                ..*self
            }
            .fits_resized()
        };
        let required = (payload as f64 / area).sqrt();
        let mut scale = clamp_scale(ceil_to_grid(required));
        // Rounding the scaled dimensions can cost a few bits; walk up the
        // grid until the cover holds the payload at its real size.
        while scale < MAX_SCALE && !fits_at(scale) {
            scale = next_grid_position(scale);
        }
        scale
    }

    /// Largest rank that fits, clamped to `[1, max_rank]`.
    pub fn auto_num_svs(&self) -> u32 {
        let extent = self.scaled_hidden_extent();
        if extent == 0 || self.cover_capacity_bits() == 0 {
            return self.rank;
        }
        let per_rank = (extent * CHANNELS * BYTES_PER_ENTRY) as f64;
        let required = (self.available_payload_bytes() / per_rank).floor();
        let upper = self.max_rank().max(1);
        let fits_at = |rank| Self { rank, ..*self }.fits_resized();
        let mut rank = (required.max(0.0) as u64).clamp(1, upper as u64) as u32;
        while rank > 1 && !fits_at(rank) {
            rank -= 1;
        }
        rank
    }

    /// Smallest bit depth that fits, clamped to `[1, 8]`.
    pub fn auto_max_lsb(&self) -> u32 {
        let payload = self.hidden_payload_bits();
        let slots = self.scaled_cover_width() * self.scaled_cover_height() * CHANNELS;
        if payload == 0 || slots == 0 {
            return self.max_lsb;
        }
        let required = (payload as f64 / slots as f64).ceil();
        let fits_at = |max_lsb| Self { max_lsb, ..*self }.fits_resized();
        let mut max_lsb = (required as u64).clamp(MIN_LSB as u64, MAX_LSB as u64) as u32;
        while max_lsb < MAX_LSB && !fits_at(max_lsb) {
            max_lsb += 1;
        }
        max_lsb
    }

    /// Parameters with `axis` replaced by its auto-fitted value.
    pub fn auto_fit(&self, axis: FitAxis) -> Self {
        match axis {
            FitAxis::HiddenScale => self.fit_hidden_scale(),
            FitAxis::CoverScale => Self {
                cover_scale: self.auto_cover_scale(),
                ..*self
            },
            FitAxis::Rank => Self {
                rank: self.auto_num_svs(),
                ..*self
            },
            FitAxis::MaxLsb => Self {
                max_lsb: self.auto_max_lsb(),
                ..*self
            },
        }
    }
}
