//! Sniffer state machine
//!
//! ```text
//! Idle -> AwaitingRequest -> AwaitingResponse -> Dispatch -> AwaitingRequest
//!              ^   |                |
//!              +---+ (idle / miss)  +--> AwaitingRequest (no response)
//! ```
//!
//! Each [`ModbusSniffer::step`] performs exactly one transition. A response
//! is only ever paired with the request detected immediately before it.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_IDLE_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT};
use crate::detector::{Detection, DetectorStats, FrameDetector};
use crate::error::Result;
use crate::frame::{Direction, Frame};
use crate::publisher::ObservationSink;
use crate::source::ByteSource;
use crate::splitter::split;

/// Detection timeouts for the two waiting states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnifferTimeouts {
    /// How long to wait for a request before reporting an idle bus
    pub idle_timeout: Duration,
    /// How long to wait for the response after a request
    pub response_timeout: Duration,
}

impl Default for SnifferTimeouts {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnifferState {
    Idle,
    AwaitingRequest,
    AwaitingResponse,
    Dispatch,
}

/// Pairing counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SnifferStats {
    /// Request/response pairs handed to the splitter
    pub pairs: u64,
    /// Observations delivered to the sink
    pub observations: u64,
    /// Pairs the splitter rejected
    pub unmatched_pairs: u64,
    /// Requests with no valid response
    pub lost_responses: u64,
    /// Pairs with a valid but non-register function code
    pub unsupported_pairs: u64,
}

/// Passive Modbus RTU sniffer
pub struct ModbusSniffer<S> {
    detector: FrameDetector<S>,
    sink: Arc<dyn ObservationSink>,
    timeouts: SnifferTimeouts,
    state: SnifferState,
    request: Option<Frame>,
    response: Option<Frame>,
    stats: SnifferStats,
}

impl<S: ByteSource> ModbusSniffer<S> {
    pub fn new(
        detector: FrameDetector<S>,
        sink: Arc<dyn ObservationSink>,
        timeouts: SnifferTimeouts,
    ) -> Self {
        Self {
            detector,
            sink,
            timeouts,
            state: SnifferState::Idle,
            request: None,
            response: None,
            stats: SnifferStats::default(),
        }
    }

    pub fn state(&self) -> SnifferState {
        self.state
    }

    pub fn stats(&self) -> SnifferStats {
        self.stats
    }

    pub fn detector_stats(&self) -> DetectorStats {
        self.detector.stats()
    }

    /// Perform one state transition and return the new state
    ///
    /// Fails only when the byte source fails.
    pub async fn step(&mut self) -> Result<SnifferState> {
        self.state = match self.state {
            SnifferState::Idle => {
                info!(
                    "Sniffing started, inter-byte gap {} us",
                    self.detector.max_inter_byte_gap().as_micros()
                );
                SnifferState::AwaitingRequest
            },
            SnifferState::AwaitingRequest => self.await_request().await?,
            SnifferState::AwaitingResponse => self.await_response().await?,
            SnifferState::Dispatch => {
                self.dispatch();
                SnifferState::AwaitingRequest
            },
        };
        Ok(self.state)
    }

    /// Step until cancelled or the byte source fails
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Sniffer stopped");
                    return Ok(());
                }
                result = self.step() => {
                    result?;
                }
            }
        }
    }

    async fn await_request(&mut self) -> Result<SnifferState> {
        let detection = self
            .detector
            .detect(Direction::Request, self.timeouts.idle_timeout)
            .await?;

        match detection {
            Detection::Frame(frame) => {
                self.request = Some(frame);
                Ok(SnifferState::AwaitingResponse)
            },
            Detection::Idle => {
                debug!("Bus idle");
                Ok(SnifferState::AwaitingRequest)
            },
            miss => {
                debug!("No request: {:?}", miss);
                self.detector.skip_to_silence().await?;
                Ok(SnifferState::AwaitingRequest)
            },
        }
    }

    async fn await_response(&mut self) -> Result<SnifferState> {
        let detection = self
            .detector
            .detect(Direction::Response, self.timeouts.response_timeout)
            .await?;

        match detection {
            Detection::Frame(frame) => {
                self.response = Some(frame);
                Ok(SnifferState::Dispatch)
            },
            other => {
                if let Some(request) = self.request.take() {
                    debug!("No response to {}: {:?}", request, other);
                }
                self.stats.lost_responses += 1;
                if other.is_miss() {
                    self.detector.skip_to_silence().await?;
                }
                Ok(SnifferState::AwaitingRequest)
            },
        }
    }

    fn dispatch(&mut self) {
        let (Some(request), Some(response)) = (self.request.take(), self.response.take()) else {
            warn!("Dispatch without a complete pair");
            return;
        };
        self.stats.pairs += 1;

        if !request.function_code().is_decodable() {
            debug!("Pair not decoded: {}", request.function_code());
            self.stats.unsupported_pairs += 1;
            return;
        }

        match split(Some(&request), Some(&response)) {
            Some(observations) => {
                debug!(
                    "slave={} {}: {} registers",
                    request.address(),
                    request.function_code(),
                    observations.len()
                );
                self.stats.observations += observations.len() as u64;
                for data in observations {
                    self.sink.deliver(request.address(), data);
                }
            },
            None => {
                debug!("Unmatched pair: {} / {}", request, response);
                self.stats.unmatched_pairs += 1;
            },
        }
    }
}
