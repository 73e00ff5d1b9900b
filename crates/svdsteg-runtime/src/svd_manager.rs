//! SVD computation manager.
//!
//! Owns one SVD worker per colour channel. `compute_svd` factorizes all
//! three in parallel; `set_rank` then asks the same workers for low-rank
//! reconstructions. Rank requests that arrive while a reconstruction is
//! running are coalesced: only the most recent one is materialized next.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use svdsteg_core::{Error, ImageData, Result, Rgb};
use svdsteg_engine::svd::{LOW_RANK_APPROXIMATION, SINGULAR_VALUES};
use svdsteg_engine::{
    factory, Engine, EngineFactory, LowRankApproximation, SvdEngine, SvdRequest, SvdResponse,
    Tagged,
};

use crate::single_flight::{settle, SingleFlight};
use crate::{wait, Flight, OnUpdate};

const NAME: &str = "SVD manager";

/// One materialized reconstruction, handed to `on_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvdInfo {
    /// Rank that was requested for this reconstruction.
    pub rank: u32,
    pub singular_values: Rgb<Vec<f32>>,
    pub low_rank_approximation: Rgb<LowRankApproximation>,
}

impl SvdInfo {
    /// Rank the factors actually carry, after clamping to the image size.
    pub fn effective_rank(&self) -> u32 {
        self.low_rank_approximation.red.rank
    }

    pub fn lhs(&self) -> Rgb<Vec<u16>> {
        self.low_rank_approximation.as_ref().map(|a| a.lhs.clone())
    }

    pub fn rhs(&self) -> Rgb<Vec<u16>> {
        self.low_rank_approximation.as_ref().map(|a| a.rhs.clone())
    }

    /// Merge the three reconstructed channels into a displayable image.
    pub fn to_rgba(&self, rows: usize, cols: usize) -> Result<ImageData> {
        ImageData::from_channels(
            rows,
            cols,
            self.low_rank_approximation
                .as_ref()
                .map(|a| a.pixels.as_slice()),
        )
    }
}

struct ExactResult {
    singular_values: Rgb<Vec<f32>>,
    computed_low_rank: bool,
    busy: bool,
}

#[derive(Default)]
struct SvdState {
    /// Bumped by every `compute_svd`; replies from older epochs are stale.
    epoch: u64,
    requested_rank: u32,
    exact: Option<ExactResult>,
}

struct Shared<E: Engine> {
    channels: Rgb<SingleFlight<E>>,
    state: Mutex<SvdState>,
    on_update: OnUpdate<SvdInfo>,
}

pub struct SvdManager<E: Engine = SvdEngine> {
    shared: Arc<Shared<E>>,
}

impl SvdManager<SvdEngine> {
    pub fn new(on_update: impl Fn(SvdInfo) + Send + Sync + 'static) -> Self {
        Self::with_factory(factory(|| Ok(SvdEngine::new())), on_update)
    }
}

impl<E> SvdManager<E>
where
    E: Engine<Request = SvdRequest, Response = SvdResponse>,
{
    /// Every channel gets its own worker built from `factory`.
    pub fn with_factory(
        factory: EngineFactory<E>,
        on_update: impl Fn(SvdInfo) + Send + Sync + 'static,
    ) -> Self {
        let channels = Rgb::new(
            SingleFlight::new("SVD red", factory.clone()),
            SingleFlight::new("SVD green", factory.clone()),
            SingleFlight::new("SVD blue", factory),
        );
        Self {
            shared: Arc::new(Shared {
                channels,
                state: Mutex::new(SvdState::default()),
                on_update: Arc::new(on_update),
            }),
        }
    }

    /// Factorize a `rows × cols` image given as column-major channels, then
    /// reconstruct it at `initial_rank`.
    ///
    /// Any previous factorization is dropped at once. The returned flight
    /// resolves after the first reconstruction has been reported.
    pub fn compute_svd(
        &self,
        rows: usize,
        cols: usize,
        pixels: Rgb<Vec<u8>>,
        initial_rank: u32,
    ) -> Flight {
        let epoch = {
            let mut state = self.shared.state.lock();
            state.epoch += 1;
            state.exact = None;
            state.epoch
        };
        debug!("{}: factorizing {}x{} (epoch {})", NAME, rows, cols, epoch);
        let responses = self
            .shared
            .channels
            .as_ref()
            .zip_with(pixels, |channel, pixels| {
                channel.request(SvdRequest::ComputeSvd { rows, cols, pixels })
            });

        let shared = self.shared.clone();
        tokio::spawn(async move {
            let values = responses
                .map(|response| settle(NAME, response))
                .try_join()
                .await?
                .map(singular_values)
                .transpose()?;
            {
                let mut state = shared.state.lock();
                if state.epoch != epoch {
                    return Err(Error::Superseded);
                }
                state.exact = Some(ExactResult {
                    singular_values: values,
                    computed_low_rank: false,
                    busy: false,
                });
            }
            info!("{}: factorized {}x{}", NAME, rows, cols);
            match shared.set_rank(initial_rank) {
                Some(flight) => wait(flight).await,
                None => Ok(()),
            }
        })
    }

    /// Ask for a rank-`rank` reconstruction.
    ///
    /// Always records `rank` as the requested rank. Returns `None` when
    /// nothing was started: no factorization yet, or a reconstruction is
    /// already running and will pick up the new rank when it finishes.
    pub fn set_rank(&self, rank: u32) -> Option<Flight> {
        self.shared.set_rank(rank)
    }

    pub fn requested_rank(&self) -> u32 {
        self.shared.state.lock().requested_rank
    }

    pub fn is_factorized(&self) -> bool {
        self.shared.state.lock().exact.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.shared
            .state
            .lock()
            .exact
            .as_ref()
            .is_some_and(|e| e.busy)
    }

    /// Whether any reconstruction of the current factorization has landed.
    pub fn has_low_rank(&self) -> bool {
        self.shared
            .state
            .lock()
            .exact
            .as_ref()
            .is_some_and(|e| e.computed_low_rank)
    }
}

impl<E> Shared<E>
where
    E: Engine<Request = SvdRequest, Response = SvdResponse>,
{
    fn set_rank(self: &Arc<Self>, rank: u32) -> Option<Flight> {
        let (epoch, responses) = {
            let mut state = self.state.lock();
            state.requested_rank = rank;
            let epoch = state.epoch;
            let exact = state.exact.as_mut()?;
            if exact.busy {
                debug!("{}: busy, rank {} deferred", NAME, rank);
                return None;
            }
            exact.busy = true;
            // Low-rank requests queue behind nothing and must stay on the
            // workers that hold the factorization.
            let responses = self
                .channels
                .as_ref()
                .map(|channel| channel.enqueue(SvdRequest::ComputeLowRankApproximation { rank }));
            (epoch, responses)
        };
        debug!("{}: reconstructing at rank {}", NAME, rank);

        let shared = self.clone();
        Some(tokio::spawn(async move {
            let result = match responses.map(|r| settle(NAME, r)).try_join().await {
                Ok(responses) => responses.map(low_rank_approximation).transpose(),
                Err(e) => Err(e),
            };
            let (update, next) = {
                let mut state = shared.state.lock();
                if state.epoch != epoch {
                    return Err(Error::Superseded);
                }
                let next = state.requested_rank;
                let Some(exact) = state.exact.as_mut() else {
                    return Err(Error::Superseded);
                };
                exact.busy = false;
                let approximation = result?;
                exact.computed_low_rank = true;
                let update = SvdInfo {
                    rank,
                    singular_values: exact.singular_values.clone(),
                    low_rank_approximation: approximation,
                };
                (update, next)
            };
            (shared.on_update)(update);

            if next != rank {
                debug!("{}: catching up from rank {} to {}", NAME, rank, next);
                if let Some(flight) = shared.set_rank(next) {
                    return wait(flight).await;
                }
            }
            Ok(())
        }))
    }
}

fn singular_values(response: SvdResponse) -> Result<Vec<f32>> {
    match response {
        SvdResponse::SingularValues { values } => Ok(values),
        other => Err(Error::Protocol {
            expected: SINGULAR_VALUES,
            got: other.tag(),
        }),
    }
}

fn low_rank_approximation(response: SvdResponse) -> Result<LowRankApproximation> {
    match response {
        SvdResponse::LowRankApproximation(approximation) => Ok(approximation),
        other => Err(Error::Protocol {
            expected: LOW_RANK_APPROXIMATION,
            got: other.tag(),
        }),
    }
}
