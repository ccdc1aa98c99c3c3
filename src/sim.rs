//! Simulation doubles for the signaling channel, media adapter, and clock.
//!
//! Single-threaded like the rest of this crate: shared state is `Rc<RefCell<..>>`,
//! never `Arc<Mutex<..>>`. Gated behind the `sim` feature, mirroring the way a real
//! host would wire up its own adapters.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime};

use crate::common::time::Clock;
use crate::common::Result;
use crate::core::media::{CallSnapshot, MediaSessionAdapter};
use crate::core::signaling::{InboundEvent, OutboundEvent, SignalingChannel};
use crate::error::CallFlowError;

#[derive(Default)]
struct SimSignalingInner {
    ready: bool,
    attached: bool,
    force_attach_fail: bool,
    inbound: VecDeque<InboundEvent>,
    outbound: Vec<OutboundEvent>,
}

/// An in-memory [`SignalingChannel`] a test drives directly: push events onto
/// `inbound` with [`SimSignalingChannel::push_inbound`], then inspect
/// [`SimSignalingChannel::outbound`] for what the coordinator emitted.
#[derive(Clone, Default)]
pub struct SimSignalingChannel {
    inner: Rc<RefCell<SimSignalingInner>>,
}

impl SimSignalingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the transport as connected. `attach()` only succeeds once this is true,
    /// simulating a channel that isn't ready yet at `initialize()` time.
    pub fn set_ready(&self, ready: bool) {
        self.inner.borrow_mut().ready = ready;
    }

    /// Makes every subsequent `attach()` call fail, to exercise the retry-exhaustion
    /// path deterministically.
    pub fn force_attach_failure(&self, fail: bool) {
        self.inner.borrow_mut().force_attach_fail = fail;
    }

    pub fn push_inbound(&self, event: InboundEvent) {
        self.inner.borrow_mut().inbound.push_back(event);
    }

    pub fn outbound(&self) -> Vec<OutboundEvent> {
        self.inner.borrow().outbound.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.borrow().attached
    }
}

impl SignalingChannel for SimSignalingChannel {
    fn is_ready(&self) -> bool {
        self.inner.borrow().ready
    }

    fn attach(&mut self) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.force_attach_fail || !inner.ready {
            return false;
        }
        inner.attached = true;
        true
    }

    fn emit(&mut self, event: OutboundEvent) -> Result<()> {
        if !self.inner.borrow().ready {
            return Err(CallFlowError::TransportUnavailable);
        }
        self.inner.borrow_mut().outbound.push(event);
        Ok(())
    }

    fn poll_inbound(&mut self) -> Vec<InboundEvent> {
        self.inner.borrow_mut().inbound.drain(..).collect()
    }
}

#[derive(Default)]
struct SimMediaInner {
    initialized: bool,
    synced: Vec<CallSnapshot>,
    teardown_count: usize,
}

/// An in-memory [`MediaSessionAdapter`] that just records what it was told.
#[derive(Clone, Default)]
pub struct SimMediaSession {
    inner: Rc<RefCell<SimMediaInner>>,
}

impl SimMediaSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn synced_snapshots(&self) -> Vec<CallSnapshot> {
        self.inner.borrow().synced.clone()
    }

    pub fn teardown_count(&self) -> usize {
        self.inner.borrow().teardown_count
    }
}

impl MediaSessionAdapter for SimMediaSession {
    fn initialize(&mut self) -> Result<()> {
        self.inner.borrow_mut().initialized = true;
        Ok(())
    }

    fn sync_state(&mut self, snapshot: CallSnapshot) -> Result<()> {
        self.inner.borrow_mut().synced.push(snapshot);
        Ok(())
    }

    fn teardown(&mut self) {
        self.inner.borrow_mut().teardown_count += 1;
    }
}

/// A manually-advanced [`Clock`] so tests can fire timeouts without sleeping.
#[derive(Clone)]
pub struct ManualClock {
    inner: Rc<RefCell<ManualClockInner>>,
}

struct ManualClockInner {
    monotonic: Instant,
    wall: SystemTime,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ManualClockInner {
                monotonic: Instant::now(),
                wall: SystemTime::now(),
            })),
        }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut inner = self.inner.borrow_mut();
        inner.monotonic += by;
        inner.wall += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.borrow().monotonic
    }

    fn wall_now(&self) -> SystemTime {
        self.inner.borrow().wall
    }
}
