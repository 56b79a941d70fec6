// src/collector/human.rs
//
// Human-backed collector: comparisons are dispatched to an external labeling
// frontend over a request channel and answered over a response channel.
//
// The wait in label_unlabeled_comparisons is explicit and bounded: it polls
// the response channel with a recv timeout, reports progress when verbose,
// and gives up on an injectable deadline or when the frontend disconnects.
// Comparisons that never receive a response stay Unlabeled forever and are
// simply excluded from training; that is not an error.
//
// No lock shared with reward queries or the gradient step is held here; the
// blocking is confined to the labeling call itself.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::segment::Segment;

use super::{Comparison, ComparisonCollector, ComparisonPool, Label};

/// A comparison shipped to the labeling frontend.
#[derive(Debug, Clone)]
pub struct ComparisonRequest {
    pub comparison_id: u64,
    pub left: Arc<Segment>,
    pub right: Arc<Segment>,
}

/// A judgment coming back from the frontend.
#[derive(Debug, Clone, Copy)]
pub struct ComparisonResponse {
    pub comparison_id: u64,
    pub label: Label,
}

/// The external side of the labeling channel: consume requests, send
/// responses. This is the entire data contract a labeling UI must satisfy.
pub struct LabelingFrontend {
    pub requests: Receiver<ComparisonRequest>,
    pub responses: Sender<ComparisonResponse>,
}

/// Build a connected (collector side, frontend side) channel pair.
pub fn labeling_channel() -> (
    Sender<ComparisonRequest>,
    Receiver<ComparisonResponse>,
    LabelingFrontend,
) {
    let (req_tx, req_rx) = mpsc::channel();
    let (resp_tx, resp_rx) = mpsc::channel();
    (
        req_tx,
        resp_rx,
        LabelingFrontend {
            requests: req_rx,
            responses: resp_tx,
        },
    )
}

pub struct HumanComparisonCollector {
    pool: ComparisonPool,
    request_tx: Sender<ComparisonRequest>,
    response_rx: Receiver<ComparisonResponse>,
    /// Comparison ids dispatched and still awaiting a response.
    pending: HashSet<u64>,
    poll_interval: Duration,
    /// Upper bound on one label_unlabeled_comparisons call; None waits until
    /// goal, exhaustion or disconnect.
    deadline: Option<Duration>,
    frontend_gone: bool,
}

impl HumanComparisonCollector {
    /// Returns the collector and the frontend half of its channel.
    pub fn new(seed: u64) -> (Self, LabelingFrontend) {
        use rand::SeedableRng;
        let (request_tx, response_rx, frontend) = labeling_channel();
        (
            Self {
                pool: ComparisonPool::new(ChaCha8Rng::seed_from_u64(seed)),
                request_tx,
                response_rx,
                pending: HashSet::new(),
                poll_interval: Duration::from_millis(250),
                deadline: None,
                frontend_gone: false,
            },
            frontend,
        )
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Comparisons dispatched and still unanswered.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn dispatch(&mut self, comparison_id: u64) {
        if self.frontend_gone || self.pending.contains(&comparison_id) {
            return;
        }
        let Some(c) = self.pool.comparison(comparison_id) else {
            return;
        };
        if c.label != Label::Unlabeled {
            return;
        }
        let (Some(left), Some(right)) = (self.pool.segment(c.left), self.pool.segment(c.right))
        else {
            return;
        };
        let req = ComparisonRequest {
            comparison_id,
            left,
            right,
        };
        if self.request_tx.send(req).is_ok() {
            self.pending.insert(comparison_id);
        } else {
            self.frontend_gone = true;
            warn!("labeling frontend disconnected; new comparisons will stay unlabeled");
        }
    }

    /// Apply one response. Unknown or already-labeled ids are dropped.
    fn apply_response(&mut self, resp: ComparisonResponse) -> bool {
        self.pending.remove(&resp.comparison_id);
        resp.label != Label::Unlabeled && self.pool.apply_label(resp.comparison_id, resp.label)
    }
}

impl ComparisonCollector for HumanComparisonCollector {
    fn add_segment(&mut self, segment: Segment) -> u64 {
        self.pool.add_segment(segment)
    }

    fn invent_comparison(&mut self) -> Option<u64> {
        let id = self.pool.invent_comparison()?;
        self.dispatch(id);
        Some(id)
    }

    fn label_unlabeled_comparisons(&mut self, goal: usize, verbose: bool) -> usize {
        // Re-dispatch anything invented while the frontend was detached.
        for id in self.pool.unlabeled_ids() {
            self.dispatch(id);
        }

        let started = Instant::now();
        let mut last_report = Instant::now();
        let mut newly = 0;

        loop {
            // Drain whatever has already arrived, stopping at the goal so a
            // chatty frontend cannot push the labeled count past it.
            while self.pool.labeled_count() < goal {
                match self.response_rx.try_recv() {
                    Ok(resp) => {
                        if self.apply_response(resp) {
                            newly += 1;
                        }
                    }
                    Err(_) => break,
                }
            }

            if self.pool.labeled_count() >= goal {
                break;
            }
            if self.pending.is_empty() {
                // Nothing in flight and nothing more can be dispatched.
                break;
            }
            if let Some(deadline) = self.deadline {
                if started.elapsed() >= deadline {
                    info!(
                        pending = self.pending.len(),
                        "labeling deadline reached; leaving remaining comparisons unlabeled"
                    );
                    break;
                }
            }

            if verbose && last_report.elapsed() >= Duration::from_secs(2) {
                info!(
                    labeled = self.pool.labeled_count(),
                    goal,
                    pending = self.pending.len(),
                    "waiting on human labels"
                );
                last_report = Instant::now();
            }

            match self.response_rx.recv_timeout(self.poll_interval) {
                Ok(resp) => {
                    if self.apply_response(resp) {
                        newly += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("labeling frontend hung up mid-wait");
                    self.frontend_gone = true;
                    break;
                }
            }
        }
        newly
    }

    fn clear_old_data(&mut self) {
        self.pool.clear();
        self.pending.clear();
    }

    fn labeled_ratio(&self) -> f64 {
        self.pool.labeled_ratio()
    }

    fn segment(&self, id: u64) -> Option<Arc<Segment>> {
        self.pool.segment(id)
    }

    fn labeled_comparison_ids(&self) -> Vec<u64> {
        self.pool.labeled_ids()
    }

    fn comparison(&self, id: u64) -> Option<Comparison> {
        self.pool.comparison(id)
    }

    fn segment_count(&self) -> usize {
        self.pool.segment_count()
    }

    fn comparison_count(&self) -> usize {
        self.pool.comparison_count()
    }

    fn unlabeled_count(&self) -> usize {
        self.pool.unlabeled_ids().len()
    }

    fn can_label_more(&self) -> bool {
        // A live frontend may still answer; a dead one can only resolve
        // comparisons already in flight (there are none once it hangs up).
        !self.pool.unlabeled_ids().is_empty() && !self.frontend_gone
    }
}
