//! The duplex audio client: one dedicated OS thread that captures, sends,
//! receives and plays back one block per iteration.
//!
//! Uses std::thread (NOT tokio tasks) so the blocking sound card calls never
//! contend with the async network tasks.
//!
//! Per block:
//! sound card → split L/R → downsample → meters → reverb → fader mix →
//! send │ receive → connected? mono to both channels : silence →
//! upsample → interleave → sound card → jitter statistic.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use super::device::AudioDevice;
use super::level_meter::{LEVEL_FLOOR_DB, LevelMeter};
use super::priority;
use super::resample::{ConverterKind, SampleRateConverter, create_converter};
use super::reverb::Reverb;
use super::sample::{deinterleave, fader_mix, interleave};
use crate::config::{Config, JITTER_AVG_LEN, MAX_FADER, MAX_REVERB, SERVER_PORT, STOP_TIMEOUT};
use crate::net_link::{NetworkChannel, PacketSender};
use crate::protocol::{StatusEvent, StatusSink};
use crate::timing::JitterStat;
use crate::trace::TraceHook;

/// Blocks between two updates of the published jitter figure.
const STATS_INTERVAL: u32 = 50;

/// Lifecycle of the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Running = 1,
    StopRequested = 2,
    Stopped = 3,
}

impl RunState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RunState::Running,
            2 => RunState::StopRequested,
            3 => RunState::Stopped,
            _ => RunState::Idle,
        }
    }
}

/// The one flag shared between the control thread and the audio thread.
#[derive(Debug)]
struct RunFlag(AtomicU8);

impl RunFlag {
    fn new() -> Self {
        Self(AtomicU8::new(RunState::Idle as u8))
    }

    fn get(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: RunState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Running → StopRequested; any other state is left alone.
    fn request_stop(&self) {
        let _ = self.0.compare_exchange(
            RunState::Running as u8,
            RunState::StopRequested as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Mix settings written by the control side and read once per block.
#[derive(Debug)]
pub struct MixControls {
    fader: AtomicU32,
    reverb_level: AtomicU32,
    reverb_on_left: AtomicBool,
}

impl MixControls {
    pub fn new(fader: u32, reverb_level: u32, reverb_on_left: bool) -> Self {
        Self {
            fader: AtomicU32::new(fader.min(MAX_FADER)),
            reverb_level: AtomicU32::new(reverb_level.min(MAX_REVERB)),
            reverb_on_left: AtomicBool::new(reverb_on_left),
        }
    }

    /// Set the fader, clamped to `0..=MAX_FADER`.
    pub fn set_fader(&self, value: u32) {
        self.fader.store(value.min(MAX_FADER), Ordering::Relaxed);
    }

    pub fn fader(&self) -> u32 {
        self.fader.load(Ordering::Relaxed)
    }

    /// Set the reverb level, clamped to `0..=MAX_REVERB`.
    pub fn set_reverb_level(&self, value: u32) {
        self.reverb_level.store(value.min(MAX_REVERB), Ordering::Relaxed);
    }

    pub fn reverb_level(&self) -> u32 {
        self.reverb_level.load(Ordering::Relaxed)
    }

    pub fn set_reverb_on_left(&self, on_left: bool) {
        self.reverb_on_left.store(on_left, Ordering::Relaxed);
    }

    pub fn reverb_on_left(&self) -> bool {
        self.reverb_on_left.load(Ordering::Relaxed)
    }
}

/// Figures published by the audio thread for display.
#[derive(Debug)]
pub struct EngineStats {
    level_left_db: AtomicU64,
    level_right_db: AtomicU64,
    jitter_variance: AtomicU64,
}

impl Default for EngineStats {
    fn default() -> Self {
        Self {
            level_left_db: AtomicU64::new(LEVEL_FLOOR_DB.to_bits()),
            level_right_db: AtomicU64::new(LEVEL_FLOOR_DB.to_bits()),
            jitter_variance: AtomicU64::new(0f64.to_bits()),
        }
    }
}

impl EngineStats {
    pub fn level_left_db(&self) -> f64 {
        f64::from_bits(self.level_left_db.load(Ordering::Relaxed))
    }

    pub fn level_right_db(&self) -> f64 {
        f64::from_bits(self.level_right_db.load(Ordering::Relaxed))
    }

    /// Block timing variance in ms².
    pub fn jitter_variance(&self) -> f64 {
        f64::from_bits(self.jitter_variance.load(Ordering::Relaxed))
    }

    /// Block timing standard deviation in ms.
    pub fn jitter_ms(&self) -> f64 {
        self.jitter_variance().sqrt()
    }

    fn publish_levels(&self, left_db: f64, right_db: f64) {
        self.level_left_db.store(left_db.to_bits(), Ordering::Relaxed);
        self.level_right_db.store(right_db.to_bits(), Ordering::Relaxed);
    }

    fn publish_jitter(&self, variance: f64) {
        self.jitter_variance.store(variance.to_bits(), Ordering::Relaxed);
    }
}

/// Everything the loop talks to but does not own.
#[derive(Clone)]
pub struct LoopPorts {
    pub channel: Arc<dyn NetworkChannel>,
    pub sender: Arc<dyn PacketSender>,
    pub status: Arc<dyn StatusSink>,
    pub controls: Arc<MixControls>,
    pub stats: Arc<EngineStats>,
}

/// One pass of the pipeline per block, owned by the audio thread.
pub struct RealtimeLoop {
    device: Box<dyn AudioDevice>,
    ports: LoopPorts,
    trace: Option<Box<dyn TraceHook>>,

    device_block: usize,
    network_block: usize,

    // interleaved stereo block at device rate
    sound_card: Vec<i16>,
    // per channel at device rate
    card_l: Vec<f64>,
    card_r: Vec<f64>,
    // per channel at network rate
    net_l: Vec<f64>,
    net_r: Vec<f64>,
    // mono network blocks
    network_out: Vec<i16>,
    network_in: Vec<f64>,

    down_l: Box<dyn SampleRateConverter>,
    down_r: Box<dyn SampleRateConverter>,
    up_l: Box<dyn SampleRateConverter>,
    up_r: Box<dyn SampleRateConverter>,

    meter_l: LevelMeter,
    meter_r: LevelMeter,
    reverb: Reverb,
    jitter: JitterStat,
    blocks: u32,
}

impl RealtimeLoop {
    pub fn new(
        config: &Config,
        kind: ConverterKind,
        device: Box<dyn AudioDevice>,
        ports: LoopPorts,
        trace: Option<Box<dyn TraceHook>>,
    ) -> Result<Self> {
        let device_block = config.device_block_size();
        let network_block = config.network_block_size();
        let card_rate = config.device_sample_rate;
        let net_rate = config.network_sample_rate;

        // record: device rate → network rate, playback: the other way round
        let down = || create_converter(kind, card_rate, net_rate, device_block, network_block);
        let up = || create_converter(kind, net_rate, card_rate, network_block, device_block);

        Ok(Self {
            device,
            ports,
            trace,
            device_block,
            network_block,
            sound_card: vec![0; device_block * 2],
            card_l: vec![0.0; device_block],
            card_r: vec![0.0; device_block],
            net_l: vec![0.0; network_block],
            net_r: vec![0.0; network_block],
            network_out: vec![0; network_block],
            network_in: vec![0.0; network_block],
            down_l: down().context("capture left resampler")?,
            down_r: down().context("capture right resampler")?,
            up_l: up().context("playback left resampler")?,
            up_r: up().context("playback right resampler")?,
            meter_l: LevelMeter::new(),
            meter_r: LevelMeter::new(),
            reverb: Reverb::new(net_rate),
            jitter: JitterStat::new(JITTER_AVG_LEN, config.block_duration()),
            blocks: 0,
        })
    }

    /// Bring every stateful stage back to its initial state and take the
    /// current time as the jitter baseline.
    pub fn init(&mut self) {
        self.down_l.reset();
        self.down_r.reset();
        self.up_l.reset();
        self.up_r.reset();
        self.meter_l.reset();
        self.meter_r.reset();
        self.reverb.clear();
        self.sound_card.fill(0);
        self.network_in.fill(0.0);
        self.blocks = 0;
        self.jitter.reset(Instant::now());
    }

    /// Run one full block through the pipeline. Never fails: every I/O
    /// problem is turned into a status event and the block goes on.
    pub fn process_block(&mut self) {
        let status = &self.ports.status;

        // get audio from sound card (blocking function)
        if self.device.read(&mut self.sound_card) {
            status.post(StatusEvent::InputOk);
        } else {
            status.post(StatusEvent::InputFail);
        }

        deinterleave(&self.sound_card, &mut self.card_l, &mut self.card_r);

        // resample each channel separately
        self.down_l.process(&self.card_l, &mut self.net_l);
        self.down_r.process(&self.card_r, &mut self.net_r);

        self.meter_l.update(&self.net_l);
        self.meter_r.update(&self.net_r);

        let controls = &self.ports.controls;
        let reverb_level = controls.reverb_level();
        if reverb_level != 0 {
            let wet = reverb_level as f64 / MAX_REVERB as f64 / 2.0;
            let target = if controls.reverb_on_left() {
                &mut self.net_l
            } else {
                &mut self.net_r
            };
            for sample in target.iter_mut() {
                *sample += wet * self.reverb.process_sample(*sample);
            }
        }

        fader_mix(&self.net_l, &self.net_r, controls.fader(), &mut self.network_out);

        let channel = &self.ports.channel;
        match channel.address() {
            Some(addr) => self.ports.sender.send_packet(
                channel.prep_send_packet(&self.network_out),
                addr,
                channel.timestamp_idx(),
            ),
            None => log::trace!("No server address, block not sent"),
        }

        // receive a new block
        if channel.get_data(&mut self.network_in) {
            status.post(StatusEvent::ReceiveOk);
        } else {
            status.post(StatusEvent::ReceiveFail);
        }

        if let Some(trace) = self.trace.as_mut() {
            trace.on_block(&self.network_out, &self.network_in);
        }

        if channel.is_connected() {
            // mono network signal on both sound card channels
            self.net_l.copy_from_slice(&self.network_in);
            self.net_r.copy_from_slice(&self.network_in);
        } else {
            self.net_l.fill(0.0);
            self.net_r.fill(0.0);
        }

        self.up_l.process(&self.net_l, &mut self.card_l);
        self.up_r.process(&self.net_r, &mut self.card_r);

        interleave(&self.card_l, &self.card_r, &mut self.sound_card);

        if self.device.write(&self.sound_card) {
            status.post(StatusEvent::OutputOk);
        } else {
            status.post(StatusEvent::OutputFail);
        }

        self.jitter.block_finished(Instant::now());
        self.publish_stats();
    }

    fn publish_stats(&mut self) {
        let stats = &self.ports.stats;
        stats.publish_levels(self.meter_l.level_db(), self.meter_r.level_db());

        self.blocks = self.blocks.wrapping_add(1);
        if self.blocks % STATS_INTERVAL == 0 {
            stats.publish_jitter(self.jitter.variance());
        }
    }

    /// Loop-exit housekeeping: meters back to idle and one reset event.
    pub fn finish(&mut self) {
        self.meter_l.reset();
        self.meter_r.reset();
        self.ports
            .stats
            .publish_levels(self.meter_l.level_db(), self.meter_r.level_db());
        self.ports.stats.publish_jitter(self.jitter.variance());
        self.ports.status.post(StatusEvent::ResetAll);
    }

    /// Thread body: elevate priority, initialise, run until a stop is
    /// requested, then hand the device and trace hook back.
    fn run(mut self, run_flag: &RunFlag) -> (Box<dyn AudioDevice>, Option<Box<dyn TraceHook>>) {
        let elevated = priority::request_realtime();
        self.init();

        log::info!(
            "Audio loop started: device block={}, network block={}, jitter window={} blocks, realtime={}",
            self.device_block,
            self.network_block,
            self.jitter.depth(),
            elevated,
        );

        while run_flag.get() == RunState::Running {
            self.process_block();
        }

        self.finish();
        log::info!(
            "Audio loop stopped, block jitter {:.3} ms",
            self.jitter.std_dev_ms()
        );
        (self.device, self.trace)
    }
}

type LoopOutput = (Box<dyn AudioDevice>, Option<Box<dyn TraceHook>>);

/// Owns the audio thread and its start/stop lifecycle.
pub struct DuplexClient {
    config: Config,
    device: Option<Box<dyn AudioDevice>>,
    trace: Option<Box<dyn TraceHook>>,
    ports: LoopPorts,
    run_flag: Arc<RunFlag>,
    handle: Option<JoinHandle<LoopOutput>>,
    done_rx: Option<mpsc::Receiver<()>>,
    stop_timeout: Duration,
}

impl DuplexClient {
    pub fn new(
        config: Config,
        device: Box<dyn AudioDevice>,
        channel: Arc<dyn NetworkChannel>,
        sender: Arc<dyn PacketSender>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let controls = Arc::new(MixControls::new(
            config.fader,
            config.reverb_level,
            config.reverb_on_left,
        ));
        Self {
            config,
            device: Some(device),
            trace: None,
            ports: LoopPorts {
                channel,
                sender,
                status,
                controls,
                stats: Arc::new(EngineStats::default()),
            },
            run_flag: Arc::new(RunFlag::new()),
            handle: None,
            done_rx: None,
            stop_timeout: STOP_TIMEOUT,
        }
    }

    /// Install a per-block trace hook, used from the next `start()` on.
    pub fn set_trace_hook(&mut self, hook: Box<dyn TraceHook>) {
        self.trace = Some(hook);
    }

    pub fn controls(&self) -> Arc<MixControls> {
        self.ports.controls.clone()
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        self.ports.stats.clone()
    }

    pub fn run_state(&self) -> RunState {
        self.run_flag.get()
    }

    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running
    }

    pub fn is_connected(&self) -> bool {
        self.ports.channel.is_connected()
    }

    /// Point the channel at a server given as an IP literal. The port is
    /// fixed. An invalid address leaves the current one in place.
    pub fn set_server_addr(&self, addr: &str) -> Result<()> {
        let ip: IpAddr = addr
            .trim()
            .parse()
            .with_context(|| format!("invalid server address '{}'", addr))?;
        self.ports.channel.set_address(SocketAddr::new(ip, SERVER_PORT));
        log::info!("Server address set to {}", ip);
        Ok(())
    }

    /// Spawn the audio thread. Calling it while running is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            if self.run_flag.get() == RunState::Running {
                return Ok(());
            }
            anyhow::bail!("previous audio thread has not terminated yet");
        }

        let device = self
            .device
            .take()
            .context("audio device was lost by a previous audio thread")?;
        let audio_loop = match RealtimeLoop::new(
            &self.config,
            ConverterKind::preferred(),
            device,
            self.ports.clone(),
            self.trace.take(),
        ) {
            Ok(l) => l,
            Err(e) => {
                // creating the loop consumed the device, nothing to hand back
                return Err(e.context("Failed to initialise audio loop"));
            }
        };

        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let run_flag = self.run_flag.clone();
        run_flag.set(RunState::Running);

        let spawned = thread::Builder::new()
            .name("audio-duplex".into())
            .spawn(move || {
                let out = audio_loop.run(&run_flag);
                run_flag.set(RunState::Stopped);
                let _ = done_tx.send(());
                out
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.done_rx = Some(done_rx);
                Ok(())
            }
            Err(e) => {
                self.run_flag.set(RunState::Stopped);
                Err(anyhow::Error::new(e).context("Failed to spawn audio thread"))
            }
        }
    }

    /// Ask the audio thread to finish its current block and exit, waiting at
    /// most the stop timeout. Returns whether it terminated in time; `true`
    /// right away if nothing is running.
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };
        self.run_flag.request_stop();

        let finished = match self.done_rx.as_ref() {
            Some(rx) => !matches!(
                rx.recv_timeout(self.stop_timeout),
                Err(mpsc::RecvTimeoutError::Timeout)
            ),
            None => true,
        };

        if !finished {
            log::warn!(
                "Audio thread did not stop within {:?}",
                self.stop_timeout
            );
            self.handle = Some(handle);
            return false;
        }

        self.done_rx = None;
        match handle.join() {
            Ok((device, trace)) => {
                self.device = Some(device);
                if self.trace.is_none() {
                    self.trace = trace;
                }
            }
            Err(_) => {
                log::error!("Audio thread panicked, sound card handle lost");
                self.run_flag.set(RunState::Stopped);
            }
        }
        true
    }
}

impl Drop for DuplexClient {
    fn drop(&mut self) {
        if !self.stop() {
            // the thread is stuck in a device call; let it go
            self.handle.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Sound card that captures a constant stereo frame and records playback.
    struct MockDevice {
        frame: (i16, i16),
        // captured ahead of the constant frame, one interleaved block each
        queued: VecDeque<Vec<i16>>,
        read_ok: bool,
        write_ok: bool,
        delay: Duration,
        written: Arc<Mutex<Vec<Vec<i16>>>>,
    }

    impl MockDevice {
        fn new(left: i16, right: i16) -> (Self, Arc<Mutex<Vec<Vec<i16>>>>) {
            let written = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    frame: (left, right),
                    queued: VecDeque::new(),
                    read_ok: true,
                    write_ok: true,
                    delay: Duration::ZERO,
                    written: written.clone(),
                },
                written,
            )
        }
    }

    impl AudioDevice for MockDevice {
        fn read(&mut self, buffer: &mut [i16]) -> bool {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            if let Some(block) = self.queued.pop_front() {
                buffer.copy_from_slice(&block);
                return self.read_ok;
            }
            for frame in buffer.chunks_exact_mut(2) {
                frame[0] = self.frame.0;
                frame[1] = self.frame.1;
            }
            self.read_ok
        }

        fn write(&mut self, buffer: &[i16]) -> bool {
            self.written.lock().unwrap().push(buffer.to_vec());
            self.write_ok
        }
    }

    #[derive(Default)]
    struct MockChannel {
        address: Mutex<Option<SocketAddr>>,
        connected: AtomicBool,
        incoming: Mutex<VecDeque<Vec<f64>>>,
    }

    impl NetworkChannel for MockChannel {
        fn set_address(&self, addr: SocketAddr) {
            *self.address.lock().unwrap() = Some(addr);
        }

        fn address(&self) -> Option<SocketAddr> {
            *self.address.lock().unwrap()
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Relaxed)
        }

        fn timestamp_idx(&self) -> u8 {
            0
        }

        fn prep_send_packet(&self, block: &[i16]) -> Bytes {
            block.iter().flat_map(|s| s.to_le_bytes()).collect::<Vec<u8>>().into()
        }

        fn get_data(&self, out: &mut [f64]) -> bool {
            match self.incoming.lock().unwrap().pop_front() {
                Some(block) => {
                    out.copy_from_slice(&block);
                    true
                }
                None => false,
            }
        }
    }

    #[derive(Default)]
    struct MockSender {
        packets: Mutex<Vec<Vec<i16>>>,
    }

    impl PacketSender for MockSender {
        fn send_packet(&self, packet: Bytes, _addr: SocketAddr, _timestamp_idx: u8) {
            let samples = packet
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect();
            self.packets.lock().unwrap().push(samples);
        }
    }

    #[derive(Default)]
    struct RecordingStatus {
        events: Mutex<Vec<StatusEvent>>,
    }

    impl StatusSink for RecordingStatus {
        fn post(&self, event: StatusEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct Harness {
        channel: Arc<MockChannel>,
        sender: Arc<MockSender>,
        status: Arc<RecordingStatus>,
        ports: LoopPorts,
    }

    fn harness() -> Harness {
        let channel = Arc::new(MockChannel::default());
        channel.set_address("127.0.0.1:22122".parse().unwrap());
        let sender = Arc::new(MockSender::default());
        let status = Arc::new(RecordingStatus::default());
        let ports = LoopPorts {
            channel: channel.clone(),
            sender: sender.clone(),
            status: status.clone(),
            controls: Arc::new(MixControls::new(MAX_FADER / 2, 0, true)),
            stats: Arc::new(EngineStats::default()),
        };
        Harness {
            channel,
            sender,
            status,
            ports,
        }
    }

    fn realtime_loop(config: &Config, device: MockDevice, ports: LoopPorts) -> RealtimeLoop {
        let mut l =
            RealtimeLoop::new(config, ConverterKind::preferred(), Box::new(device), ports, None).unwrap();
        l.init();
        l
    }

    /// Equal rates make the converters exact pass-throughs.
    fn flat_config() -> Config {
        test_config(48000, 48000)
    }

    #[test]
    fn test_fader_extremes_pick_one_capture_channel() {
        let config = flat_config();
        let h = harness();
        let (device, _) = MockDevice::new(1000, -300);
        let mut l = realtime_loop(&config, device, h.ports.clone());

        h.ports.controls.set_fader(0);
        l.process_block();
        h.ports.controls.set_fader(MAX_FADER);
        l.process_block();
        h.ports.controls.set_fader(MAX_FADER / 2);
        l.process_block();

        let packets = h.sender.packets.lock().unwrap();
        assert_eq!(packets.len(), 3);
        assert!(packets[0].iter().all(|&s| s == -300));
        assert!(packets[1].iter().all(|&s| s == 1000));
        assert!(packets[2].iter().all(|&s| s == 700));
        assert_eq!(packets[0].len(), config.network_block_size());
    }

    #[test]
    fn test_reverb_off_leaves_signal_untouched() {
        let config = flat_config();
        let h = harness();
        let (device, _) = MockDevice::new(1234, -4321);
        let mut l = realtime_loop(&config, device, h.ports.clone());

        for _ in 0..20 {
            l.process_block();
        }
        let packets = h.sender.packets.lock().unwrap();
        assert!(packets.iter().flatten().all(|&s| s == 1234 - 4321));
    }

    #[test]
    fn test_reverb_only_touches_selected_channel() {
        let config = flat_config();
        let h = harness();
        let (device, _) = MockDevice::new(1000, 2000);
        let mut l = realtime_loop(&config, device, h.ports.clone());

        // fader fully left: the mix is exactly the left channel
        h.ports.controls.set_fader(MAX_FADER);
        h.ports.controls.set_reverb_level(MAX_REVERB);
        h.ports.controls.set_reverb_on_left(false);
        l.process_block();
        assert!(h.sender.packets.lock().unwrap()[0].iter().all(|&s| s == 1000));

        h.ports.controls.set_reverb_on_left(true);
        l.process_block();
        assert!(h.sender.packets.lock().unwrap()[1].iter().any(|&s| s != 1000));
    }

    #[test]
    fn test_reverb_tail_spans_blocks() {
        let config = flat_config();
        let frames = config.device_block_size();

        let run = |reverb_level: u32| {
            let h = harness();
            let (mut device, _) = MockDevice::new(0, 0);
            let mut impulse = vec![0i16; frames * 2];
            impulse[0] = 10000;
            device.queued.push_back(impulse);
            let mut l = realtime_loop(&config, device, h.ports.clone());

            h.ports.controls.set_fader(MAX_FADER);
            h.ports.controls.set_reverb_level(reverb_level);
            h.ports.controls.set_reverb_on_left(true);
            for _ in 0..30 {
                l.process_block();
            }
            let packets = h.sender.packets.lock().unwrap().clone();
            packets
        };

        // the dry signal is over after the first block
        let dry = run(0);
        assert_eq!(dry[0][0], 10000);
        assert!(dry[1..].iter().flatten().all(|&s| s == 0));

        let wet = run(MAX_REVERB);
        assert!(wet[5..].iter().flatten().any(|&s| s != 0));
        assert!(wet[20..].iter().flatten().any(|&s| s != 0));
    }

    #[test]
    fn test_init_discards_state_of_previous_run() {
        // converters and reverb both carry history at these settings
        let config = test_config(48000, 24000);
        let setup = |h: &Harness| {
            h.ports.controls.set_fader(MAX_FADER);
            h.ports.controls.set_reverb_level(MAX_REVERB);
            h.ports.controls.set_reverb_on_left(true);
        };

        let used = harness();
        setup(&used);
        let (device, _) = MockDevice::new(3000, -1500);
        let mut l = realtime_loop(&config, device, used.ports.clone());
        for _ in 0..8 {
            l.process_block();
        }
        l.init();
        l.process_block();

        let fresh = harness();
        setup(&fresh);
        let (device, _) = MockDevice::new(3000, -1500);
        let mut f = realtime_loop(&config, device, fresh.ports.clone());
        f.process_block();

        let used = used.sender.packets.lock().unwrap();
        let fresh = fresh.sender.packets.lock().unwrap();
        // without the reset the last block before it looks nothing like a first block
        assert_ne!(used[7], fresh[0]);
        assert_eq!(used[8], fresh[0]);
    }

    #[test]
    fn test_disconnected_channel_plays_silence() {
        let config = flat_config();
        let h = harness();
        let (device, written) = MockDevice::new(500, 500);
        let mut l = realtime_loop(&config, device, h.ports.clone());

        h.channel.connected.store(false, Ordering::Relaxed);
        h.channel
            .incoming
            .lock()
            .unwrap()
            .push_back(vec![9999.0; config.network_block_size()]);
        l.process_block();

        let written = written.lock().unwrap();
        assert_eq!(written[0].len(), config.device_block_size() * 2);
        assert!(written[0].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_connected_channel_plays_mono_on_both_sides() {
        let config = flat_config();
        let h = harness();
        let (device, written) = MockDevice::new(0, 0);
        let mut l = realtime_loop(&config, device, h.ports.clone());

        let block: Vec<f64> = (0..config.network_block_size())
            .map(|i| i as f64 * 10.0 - 200.0)
            .collect();
        h.channel.connected.store(true, Ordering::Relaxed);
        h.channel.incoming.lock().unwrap().push_back(block.clone());
        l.process_block();

        let written = written.lock().unwrap();
        for (i, frame) in written[0].chunks_exact(2).enumerate() {
            assert_eq!(frame[0], frame[1]);
            assert_eq!(frame[0] as f64, block[i]);
        }
    }

    #[test]
    fn test_upsampled_channels_stay_identical() {
        let config = test_config(48000, 24000);
        let h = harness();
        let (device, written) = MockDevice::new(0, 0);
        let mut l = realtime_loop(&config, device, h.ports.clone());

        h.channel.connected.store(true, Ordering::Relaxed);
        for n in 0..3 {
            let block = vec![100.0 * (n + 1) as f64; config.network_block_size()];
            h.channel.incoming.lock().unwrap().push_back(block);
            l.process_block();
        }

        let written = written.lock().unwrap();
        assert_eq!(written.len(), 3);
        for block in written.iter() {
            assert_eq!(block.len(), config.device_block_size() * 2);
            assert!(block.chunks_exact(2).all(|f| f[0] == f[1]));
        }
        assert!(written.iter().flatten().any(|&s| s != 0));
    }

    #[test]
    fn test_io_failures_become_status_events() {
        let config = flat_config();
        let h = harness();
        let (mut device, written) = MockDevice::new(1, 1);
        device.read_ok = false;
        device.write_ok = false;
        let mut l = realtime_loop(&config, device, h.ports.clone());

        l.process_block();
        l.process_block();

        // the block still went out and was still played
        assert_eq!(h.sender.packets.lock().unwrap().len(), 2);
        assert_eq!(written.lock().unwrap().len(), 2);

        let events = h.status.events.lock().unwrap();
        assert_eq!(
            &events[..3],
            &[
                StatusEvent::InputFail,
                StatusEvent::ReceiveFail,
                StatusEvent::OutputFail
            ]
        );
    }

    #[test]
    fn test_good_block_reports_ok_events() {
        let config = flat_config();
        let h = harness();
        let (device, _) = MockDevice::new(1, 1);
        let mut l = realtime_loop(&config, device, h.ports.clone());

        h.channel
            .incoming
            .lock()
            .unwrap()
            .push_back(vec![0.0; config.network_block_size()]);
        l.process_block();

        let events = h.status.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                StatusEvent::InputOk,
                StatusEvent::ReceiveOk,
                StatusEvent::OutputOk
            ]
        );
    }

    #[test]
    fn test_no_address_sends_nothing() {
        let config = flat_config();
        let h = harness();
        *h.channel.address.lock().unwrap() = None;
        let (device, written) = MockDevice::new(1, 1);
        let mut l = realtime_loop(&config, device, h.ports.clone());

        l.process_block();
        assert!(h.sender.packets.lock().unwrap().is_empty());
        assert_eq!(written.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_finish_resets_meters_and_posts_reset() {
        let config = flat_config();
        let h = harness();
        let (device, _) = MockDevice::new(16000, 16000);
        let mut l = realtime_loop(&config, device, h.ports.clone());

        l.process_block();
        assert!(h.ports.stats.level_left_db() > LEVEL_FLOOR_DB);

        l.finish();
        assert_eq!(h.ports.stats.level_left_db(), LEVEL_FLOOR_DB);
        assert_eq!(h.ports.stats.level_right_db(), LEVEL_FLOOR_DB);
        assert_eq!(
            h.status.events.lock().unwrap().last(),
            Some(&StatusEvent::ResetAll)
        );
    }

    fn client(device: MockDevice, h: &Harness) -> DuplexClient {
        DuplexClient::new(
            flat_config(),
            Box::new(device),
            h.channel.clone(),
            h.sender.clone(),
            h.status.clone(),
        )
    }

    fn wait_for_blocks(written: &Arc<Mutex<Vec<Vec<i16>>>>, n: usize) {
        for _ in 0..500 {
            if written.lock().unwrap().len() >= n {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("audio loop did not produce {} blocks", n);
    }

    #[test]
    fn test_start_stop_restart() {
        let h = harness();
        let (mut device, written) = MockDevice::new(10, 10);
        device.delay = Duration::from_millis(1);
        let mut client = client(device, &h);

        assert_eq!(client.run_state(), RunState::Idle);
        // stopping an idle client is a successful no-op
        assert!(client.stop());
        assert_eq!(client.run_state(), RunState::Idle);

        client.start().unwrap();
        assert!(client.is_running());
        // second start while running does nothing
        client.start().unwrap();
        wait_for_blocks(&written, 3);

        assert!(client.stop());
        assert_eq!(client.run_state(), RunState::Stopped);
        assert_eq!(
            h.status.events.lock().unwrap().last(),
            Some(&StatusEvent::ResetAll)
        );
        assert!(client.stop());

        // the device came back, so the client can run again
        let before = written.lock().unwrap().len();
        client.start().unwrap();
        wait_for_blocks(&written, before + 3);
        assert!(client.stop());
    }

    #[test]
    fn test_stop_times_out_on_stuck_device() {
        let h = harness();
        let (mut device, written) = MockDevice::new(0, 0);
        device.delay = Duration::from_millis(300);
        let mut client = client(device, &h);
        client.stop_timeout = Duration::from_millis(20);

        client.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!client.stop());
        assert_eq!(client.run_state(), RunState::StopRequested);
        assert!(client.start().is_err());

        // the block in flight is completed before the thread exits
        let patient = Duration::from_secs(5);
        client.stop_timeout = patient;
        assert!(client.stop());
        assert_eq!(client.run_state(), RunState::Stopped);
        assert!(!written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_server_address_validation() {
        let h = harness();
        let (device, _) = MockDevice::new(0, 0);
        let client = client(device, &h);
        let before = h.channel.address();

        assert!(client.set_server_addr("not an address").is_err());
        assert!(client.set_server_addr("300.1.1.1").is_err());
        assert!(client.set_server_addr("").is_err());
        assert_eq!(h.channel.address(), before);

        client.set_server_addr(" 192.168.1.20 ").unwrap();
        assert_eq!(
            h.channel.address(),
            Some(SocketAddr::new("192.168.1.20".parse().unwrap(), SERVER_PORT))
        );

        client.set_server_addr("::1").unwrap();
        assert_eq!(h.channel.address().unwrap().port(), SERVER_PORT);
    }

    #[test]
    fn test_mix_controls_clamp() {
        let controls = MixControls::new(MAX_FADER + 10, MAX_REVERB + 10, false);
        assert_eq!(controls.fader(), MAX_FADER);
        assert_eq!(controls.reverb_level(), MAX_REVERB);
        controls.set_fader(7);
        assert_eq!(controls.fader(), 7);
        assert!(!controls.reverb_on_left());
    }
}
