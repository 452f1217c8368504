//! Audio context - graph, clock, master gain and output

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rtrb::{Consumer, RingBuffer};
use tracing::{debug, info, trace};

use crate::config::OutputTarget;
use crate::error::AudioError;
use crate::graph::AudioGraph;
use crate::node::{AudioNode, NodeId, ProcessContext, BLOCK_SIZE};
use crate::nodes::{Gain, GainMessage, GainMonitor, RtrbSink};

#[cfg(feature = "cpal_sink")]
use crate::device::CpalDevice;

/// Blocks the device driver renders ahead of the wall clock
const LOOKAHEAD_BLOCKS: u64 = 4;

/// A handle for sending messages to a node in an [`AudioContext`].
///
/// Handles are returned when you add a node and provide two capabilities:
/// 1. **Connections** - Pass handles to [`AudioContext::connect`] or
///    [`AudioContext::connect_to_master`]
/// 2. **Messages** - Send parameter updates via [`Handle::send`]
///
/// Messages are buffered in a lock-free ring buffer and processed at the start
/// of the next audio block. If the buffer is full, [`Handle::send`] returns
/// `Err(msg)` with the message that couldn't be sent.
pub struct Handle<M: Send + 'static> {
    id: NodeId,
    sender: rtrb::Producer<M>,
}

impl<M: Send + 'static> Handle<M> {
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Send a message to the node.
    ///
    /// Lock-free and safe to call while audio is running.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the message was queued successfully
    /// - `Err(msg)` if the queue is full (message dropped)
    pub fn send(&mut self, msg: M) -> Result<(), M> {
        self.sender.push(msg).map_err(|rtrb::PushError::Full(m)| m)
    }
}

impl<M: Send + 'static> std::fmt::Debug for Handle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").field("id", &self.id).finish()
    }
}

/// Lifecycle of an [`AudioContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ContextState {
    /// Created or paused; the clock does not advance.
    Suspended = 0,
    Running = 1,
    /// Released for good.
    Closed = 2,
}

impl ContextState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ContextState::Running,
            2 => ContextState::Closed,
            _ => ContextState::Suspended,
        }
    }
}

struct Release {
    at_frame: u64,
    nodes: Vec<NodeId>,
}

struct Core {
    graph: AudioGraph,
    releases: Vec<Release>,
}

struct Shared {
    core: Mutex<Core>,
    frames: AtomicU64,
    state: AtomicU8,
    sample_rate: u32,
    channels: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ContextState {
        ContextState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Render one block and retire any releases that came due
    fn step(&self) {
        let mut core = self.lock();
        core.graph.process();
        let now = self.frames.fetch_add(BLOCK_SIZE as u64, Ordering::AcqRel) + BLOCK_SIZE as u64;

        if core.releases.iter().any(|r| r.at_frame <= now) {
            let (due, pending): (Vec<Release>, Vec<Release>) =
                core.releases.drain(..).partition(|r| r.at_frame <= now);
            core.releases = pending;
            for release in due {
                for id in release.nodes {
                    core.graph.remove(id);
                }
            }
            trace!("released nodes at frame {}, {} left in graph", now, core.graph.len());
        }
    }
}

/// An audio graph with a clock, a master gain stage and an output.
///
/// A context starts [`Suspended`](ContextState::Suspended); call
/// [`resume`](Self::resume) to start the clock. Device contexts are driven by
/// a background thread paced to the wall clock. Offline contexts advance only
/// when [`render`](Self::render) is called, which makes them deterministic.
///
/// ```
/// use klangfeld::AudioContext;
/// use klangfeld::nodes::{Gain, GainMessage};
///
/// let mut ctx = AudioContext::offline(8_000, 1).unwrap();
/// let gain = ctx.add(Gain::new(0.5)).unwrap();
/// ctx.connect_to_master(&gain).unwrap();
/// ctx.master().send(GainMessage::SetGain(1.0)).ok();
/// ctx.resume().unwrap();
///
/// let samples = ctx.render(128).unwrap();
/// assert_eq!(samples.len(), 128);
/// assert_eq!(ctx.current_time(), 128.0 / 8_000.0);
/// ```
pub struct AudioContext {
    shared: Arc<Shared>,
    master: Handle<GainMessage>,
    master_monitor: GainMonitor,
    /// Offline only: interleaved output of the master bus
    capture: Option<Consumer<f32>>,
    /// Offline only: rendered samples not yet handed out
    carry: Vec<f32>,
    driver: Option<JoinHandle<()>>,
}

impl AudioContext {
    /// Create a context that renders into memory.
    pub fn offline(sample_rate: u32, channels: usize) -> Result<Self, AudioError> {
        if sample_rate == 0 || channels == 0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "offline context needs a sample rate and channels (got {} Hz, {} ch)",
                sample_rate, channels
            )));
        }

        let size = (BLOCK_SIZE * channels * 4).next_power_of_two();
        let (producer, consumer) = RingBuffer::<f32>::new(size);
        let sink = RtrbSink::new(producer, channels);

        let mut ctx = Self::build(sample_rate, channels, sink)?;
        ctx.capture = Some(consumer);
        debug!("created offline context ({} Hz, {} ch)", sample_rate, channels);
        Ok(ctx)
    }

    /// Create a context on the system's default output device.
    #[cfg(feature = "cpal_sink")]
    pub fn default_output() -> Result<Self, AudioError> {
        let device = CpalDevice::default_output()
            .ok_or_else(|| AudioError::UnsupportedPlatform("no default output device".into()))?;
        Self::with_device(&device)
    }

    /// Create a context on the system's default output device.
    #[cfg(not(feature = "cpal_sink"))]
    pub fn default_output() -> Result<Self, AudioError> {
        Err(AudioError::UnsupportedPlatform(
            "built without the `cpal_sink` feature".into(),
        ))
    }

    /// Create a context on a specific output device.
    #[cfg(feature = "cpal_sink")]
    pub fn with_device(device: &CpalDevice) -> Result<Self, AudioError> {
        let sink = device.create_sink()?;
        let mut ctx = Self::build(device.sample_rate(), device.channels() as usize, sink)?;
        ctx.driver = Some(spawn_driver(ctx.shared.clone())?);
        info!(
            "opened output {} ({} Hz, {} ch)",
            device.name(),
            device.sample_rate(),
            device.channels()
        );
        Ok(ctx)
    }

    /// Create whichever kind of context `target` asks for.
    pub fn for_target(target: OutputTarget) -> Result<Self, AudioError> {
        match target {
            OutputTarget::Device => Self::default_output(),
            OutputTarget::Offline { sample_rate, channels } => Self::offline(sample_rate, channels),
        }
    }

    fn build<S: AudioNode<Message = ()>>(
        sample_rate: u32,
        channels: usize,
        sink: S,
    ) -> Result<Self, AudioError> {
        let mut graph = AudioGraph::new(sample_rate);

        let master_gain = Gain::new(1.0).with_channels(channels);
        let master_monitor = master_gain.monitor();
        let (master_id, master_sender) = graph.add(master_gain);
        let (sink_id, _) = graph.add(sink);
        if !graph.connect(master_id, sink_id) {
            return Err(AudioError::Playback("failed to wire master to output".into()));
        }
        graph.set_terminal(sink_id);

        Ok(Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core { graph, releases: Vec::new() }),
                frames: AtomicU64::new(0),
                state: AtomicU8::new(ContextState::Suspended as u8),
                sample_rate,
                channels,
            }),
            master: Handle { id: master_id, sender: master_sender },
            master_monitor,
            capture: None,
            carry: Vec::new(),
            driver: None,
        })
    }

    fn ensure_open(&self) -> Result<(), AudioError> {
        match self.state() {
            ContextState::Closed => Err(AudioError::ContextClosed),
            _ => Ok(()),
        }
    }

    /// Add a node to the graph, unconnected.
    pub fn add<N: AudioNode>(&self, node: N) -> Result<Handle<N::Message>, AudioError> {
        self.ensure_open()?;
        let (id, sender) = self.shared.lock().graph.add(node);
        Ok(Handle { id, sender })
    }

    /// Connect the output of `from` to the input of `to`.
    pub fn connect<M1, M2>(&self, from: &Handle<M1>, to: &Handle<M2>) -> Result<(), AudioError>
    where
        M1: Send + 'static,
        M2: Send + 'static,
    {
        self.connect_ids(from.id, to.id)
    }

    /// Connect a node to the master gain stage.
    pub fn connect_to_master<M: Send + 'static>(&self, from: &Handle<M>) -> Result<(), AudioError> {
        self.connect_ids(from.id, self.master.id)
    }

    fn connect_ids(&self, from: NodeId, to: NodeId) -> Result<(), AudioError> {
        self.ensure_open()?;
        if self.shared.lock().graph.connect(from, to) {
            Ok(())
        } else {
            Err(AudioError::Playback(format!(
                "cannot connect {:?} to {:?}: node no longer exists",
                from, to
            )))
        }
    }

    /// Drop every connection of a node, keeping it in the graph.
    pub fn disconnect(&self, id: NodeId) {
        self.shared.lock().graph.disconnect_all(id);
    }

    /// Remove a node now. Returns false if it was already gone.
    pub fn remove(&self, id: NodeId) -> bool {
        self.shared.lock().graph.remove(id)
    }

    /// Remove nodes once `secs` of audio have been rendered from now.
    ///
    /// Used to let a scheduled fade play out before its chain is torn down.
    pub fn release_after(&self, nodes: impl IntoIterator<Item = NodeId>, secs: f64) {
        let nodes: Vec<NodeId> = nodes.into_iter().collect();
        if nodes.is_empty() {
            return;
        }
        let ctx = ProcessContext { sample_rate: self.shared.sample_rate, buffer_size: BLOCK_SIZE };
        let at_frame = self.frames() + ctx.frames(secs);
        self.shared.lock().releases.push(Release { at_frame, nodes });
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.shared.lock().graph.contains(id)
    }

    /// Number of nodes in the graph, including master and output.
    pub fn node_count(&self) -> usize {
        self.shared.lock().graph.len()
    }

    #[inline]
    fn frames(&self) -> u64 {
        self.shared.frames.load(Ordering::Acquire)
    }

    /// Seconds of audio rendered since the context was created.
    pub fn current_time(&self) -> f64 {
        self.frames() as f64 / self.shared.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    pub fn state(&self) -> ContextState {
        self.shared.state()
    }

    pub fn is_offline(&self) -> bool {
        self.capture.is_some()
    }

    /// Start (or restart) the clock.
    pub fn resume(&self) -> Result<(), AudioError> {
        self.ensure_open()?;
        if self.shared.state.swap(ContextState::Running as u8, Ordering::AcqRel)
            != ContextState::Running as u8
        {
            debug!("context resumed at {:.3}s", self.current_time());
        }
        if let Some(driver) = &self.driver {
            driver.thread().unpark();
        }
        Ok(())
    }

    /// Pause the clock. Scheduled ramps and starts wait with it.
    pub fn suspend(&self) -> Result<(), AudioError> {
        self.ensure_open()?;
        self.shared
            .state
            .store(ContextState::Suspended as u8, Ordering::Release);
        Ok(())
    }

    /// Release the graph and the output for good.
    ///
    /// Every node is dropped, which stops device output. Closing twice is a no-op.
    pub fn close(&mut self) {
        let previous = self.shared.state.swap(ContextState::Closed as u8, Ordering::AcqRel);
        if previous == ContextState::Closed as u8 {
            return;
        }

        if let Some(driver) = self.driver.take() {
            driver.thread().unpark();
            let _ = driver.join();
        }

        let mut core = self.shared.lock();
        core.graph = AudioGraph::new(self.shared.sample_rate);
        core.releases.clear();
        drop(core);

        self.carry.clear();
        info!("context closed at {:.3}s", self.current_time());
    }

    /// The master gain stage every chain ends in.
    pub fn master(&mut self) -> &mut Handle<GainMessage> {
        &mut self.master
    }

    /// Current automated level of the master stage.
    pub fn master_gain(&self) -> f32 {
        self.master_monitor.get()
    }

    /// Render `frames` frames of interleaved output (offline contexts only).
    ///
    /// The graph runs in whole blocks. Frames left over from the last block
    /// are returned first by the next call, so a graph change made between two
    /// calls is heard at most one block (minus one frame) late.
    ///
    /// A suspended context returns silence and its clock stays put.
    pub fn render(&mut self, frames: usize) -> Result<Vec<f32>, AudioError> {
        self.ensure_open()?;
        let channels = self.shared.channels;
        let wanted = frames * channels;

        if self.capture.is_none() {
            return Err(AudioError::InvalidConfiguration(
                "render is only available on offline contexts".into(),
            ));
        }
        if self.state() == ContextState::Suspended {
            return Ok(vec![0.0; wanted]);
        }

        let block_samples = BLOCK_SIZE * channels;
        let mut out = Vec::with_capacity(wanted);
        let take = self.carry.len().min(wanted);
        out.extend(self.carry.drain(..take));

        while out.len() < wanted {
            self.shared.step();

            let mut block = Vec::with_capacity(block_samples);
            if let Some(capture) = self.capture.as_mut() {
                while block.len() < block_samples {
                    match capture.pop() {
                        Ok(s) => block.push(s),
                        Err(_) => break,
                    }
                }
            }
            // an unconnected output renders nothing; treat it as silence
            block.resize(block_samples, 0.0);

            let take = block.len().min(wanted - out.len());
            out.extend_from_slice(&block[..take]);
            self.carry.extend_from_slice(&block[take..]);
        }

        Ok(out)
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioContext")
            .field("state", &self.state())
            .field("sample_rate", &self.shared.sample_rate)
            .field("channels", &self.shared.channels)
            .field("time", &self.current_time())
            .finish()
    }
}

/// Drive a device context: keep the graph a few blocks ahead of the wall clock
/// while running, idle while suspended, exit once closed.
#[cfg_attr(not(feature = "cpal_sink"), allow(dead_code))]
fn spawn_driver(shared: Arc<Shared>) -> Result<JoinHandle<()>, AudioError> {
    std::thread::Builder::new()
        .name("klangfeld-driver".into())
        .spawn(move || {
            let rate = shared.sample_rate as f64;
            let mut epoch: Option<(Instant, u64)> = None;

            loop {
                match shared.state() {
                    ContextState::Closed => break,
                    ContextState::Suspended => {
                        epoch = None;
                        std::thread::park_timeout(Duration::from_millis(10));
                        continue;
                    }
                    ContextState::Running => {}
                }

                let (start, mut blocks) = *epoch.get_or_insert((Instant::now(), 0));
                // Calculate how many blocks should have been processed by now
                let target = (start.elapsed().as_secs_f64() * rate / BLOCK_SIZE as f64) as u64
                    + LOOKAHEAD_BLOCKS;
                while blocks < target {
                    shared.step();
                    blocks += 1;
                }
                epoch = Some((start, blocks));

                std::thread::sleep(Duration::from_micros(500));
            }
            debug!("driver thread exiting");
        })
        .map_err(|e| AudioError::Playback(format!("failed to spawn driver thread: {}", e)))
}
