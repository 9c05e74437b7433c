//! MAC low: one RTS/CTS/DATA/ACK frame exchange per channel access.
//!
//! The access layer (backoff, queues, retries) hands a frame to
//! [`MacLow::start_transmission`] once it owns the medium. MAC low then runs
//! the handshake with real inter-frame spacing, answers RTS and data frames
//! addressed to this station, keeps the NAV, and reports every outcome
//! exactly once: to the station manager (rate/power feedback) and to the
//! [`MacLowListener`]. It never retries on its own.
//!
//! All waiting is done with one-shot [`Timer`]s on the event queue; when one
//! fires the device routes the [`MacEvent`] back to [`MacLow::handle_event`].

use embassy_time::{Duration, Instant};
use log::{debug, trace};
use serde::Deserialize;

use super::device::DeviceEvent;
use super::frame::{Frame, FrameKind, Mac48Address, ack_size, cts_size, rts_size};
use super::mac_parameters::MacParameters;
use super::mode::{WifiMode, WifiPreamble, tx_duration};
use super::phy::WifiPhy;
use super::station_manager::{StationManager, TxVector};
use crate::simulation::scheduler::{EventQueue, Timer};

const PREAMBLE: WifiPreamble = WifiPreamble::Long;

fn zero() -> Duration {
    Duration::from_ticks(0)
}

/// How the originator waits for the ACK of a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// No ACK expected.
    None,
    /// Wait the full ACK timeout.
    #[default]
    Normal,
    /// Wait PIFS; if the medium is busy then, give the ACK until the end of
    /// that activity plus SIFS to show up.
    Fast,
    /// Wait PIFS; a busy medium at that point counts as an ACK.
    SuperFast,
}

/// Parameters of one exchange, fixed when it starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxParams {
    pub must_send_rts: bool,
    pub ack: AckPolicy,
    /// Size of a frame that follows this one in the same exchange.
    pub next_packet_size: Option<u32>,
    /// Explicit duration field, instead of the computed reservation.
    pub duration_id: Option<Duration>,
}

impl TxParams {
    pub fn new(ack: AckPolicy) -> Self {
        Self {
            must_send_rts: false,
            ack,
            next_packet_size: None,
            duration_id: None,
        }
    }

    pub fn with_rts(mut self, must_send_rts: bool) -> Self {
        self.must_send_rts = must_send_rts;
        self
    }

    pub fn with_next_packet(mut self, size: u32) -> Self {
        self.next_packet_size = Some(size);
        self
    }

    pub fn with_duration_id(mut self, duration: Duration) -> Self {
        self.duration_id = Some(duration);
        self
    }

    pub fn must_wait_ack(&self) -> bool {
        self.ack != AckPolicy::None
    }
}

/// Outcomes of an exchange and frames delivered upward.
pub trait MacLowListener {
    fn got_cts(&mut self, snr: f64, mode: WifiMode);
    fn missed_cts(&mut self);
    fn got_ack(&mut self, snr: f64, mode: WifiMode);
    fn missed_ack(&mut self);
    /// SIFS elapsed after this exchange; the next frame of the burst may go.
    fn start_next(&mut self);
    /// A frame without ACK finished transmitting.
    fn end_tx_no_ack(&mut self) {}
    /// The exchange was abandoned because a new one started.
    fn cancel(&mut self);
    /// A data or management frame for this station (or broadcast) was received.
    fn receive(&mut self, frame: Frame, snr: f64, mode: WifiMode);
    /// The NAV was updated from a received frame.
    fn nav_start(&mut self, _duration: Duration) {}
    /// The NAV was reset; `duration` is what is left of it.
    fn nav_reset(&mut self, _duration: Duration) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MacEvent {
    CtsTimeout,
    NormalAckTimeout,
    FastAckTimeout,
    SuperFastAckTimeout,
    FastAckFailedTimeout,
    SendCts { to: Mac48Address, rts_duration: Duration, rts_mode: WifiMode, rts_snr: f64 },
    SendAck { to: Mac48Address, data_duration: Duration, data_mode: WifiMode, data_snr: f64 },
    SendDataAfterCts { cts_duration: Duration },
    WaitSifsAfterEndTx,
    EndTxNoAck,
    /// Undo an RTS-based NAV update if nothing was received since `rts_end`.
    NavResetCtsMissed { rts_end: Instant },
}

/// Everything MAC low works with while handling one call.
pub struct MacContext<'a> {
    pub queue: &'a mut dyn EventQueue<DeviceEvent>,
    pub phy: &'a mut WifiPhy,
    pub manager: &'a mut dyn StationManager,
    pub listener: &'a mut dyn MacLowListener,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Nav {
    start: Instant,
    duration: Duration,
}

impl Nav {
    fn end(&self) -> Instant {
        self.start + self.duration
    }
}

struct CurrentTx {
    frame: Frame,
    params: TxParams,
}

pub struct MacLow {
    address: Mac48Address,
    params: MacParameters,
    current: Option<CurrentTx>,
    /// An exchange is running and its outcome has not been reported yet.
    listening: bool,
    nav: Nav,
    /// NAV before the last RTS-based update, restored if the CTS never shows up.
    nav_before_rts: Option<Nav>,
    /// The last reception could not be decoded.
    last_rx_failed: bool,
    cts_timeout: Timer,
    normal_ack_timeout: Timer,
    fast_ack_timeout: Timer,
    super_fast_ack_timeout: Timer,
    fast_ack_failed_timeout: Timer,
    send_cts: Timer,
    send_ack: Timer,
    send_data: Timer,
    wait_sifs: Timer,
    end_tx_no_ack: Timer,
    nav_reset: Timer,
}

impl MacLow {
    pub fn new(address: Mac48Address, params: MacParameters) -> Self {
        Self {
            address,
            params,
            current: None,
            listening: false,
            nav: Nav {
                start: Instant::from_ticks(0),
                duration: zero(),
            },
            nav_before_rts: None,
            last_rx_failed: false,
            cts_timeout: Timer::new(),
            normal_ack_timeout: Timer::new(),
            fast_ack_timeout: Timer::new(),
            super_fast_ack_timeout: Timer::new(),
            fast_ack_failed_timeout: Timer::new(),
            send_cts: Timer::new(),
            send_ack: Timer::new(),
            send_data: Timer::new(),
            wait_sifs: Timer::new(),
            end_tx_no_ack: Timer::new(),
            nav_reset: Timer::new(),
        }
    }

    pub fn address(&self) -> Mac48Address {
        self.address
    }

    pub fn parameters(&self) -> &MacParameters {
        &self.params
    }

    /// End of the current medium reservation.
    pub fn nav_end(&self) -> Instant {
        self.nav.end()
    }

    pub fn is_nav_zero(&self, now: Instant) -> bool {
        self.nav.end() < now
    }

    /// Whether the last frame received could not be decoded; access then waits EIFS.
    pub fn last_rx_failed(&self) -> bool {
        self.last_rx_failed
    }

    /// Whether an exchange is in progress or a response is about to be sent.
    pub fn is_busy(&self, queue: &dyn EventQueue<DeviceEvent>) -> bool {
        self.listening || self.send_cts.is_running(queue) || self.send_ack.is_running(queue) || self.send_data.is_running(queue)
    }

    /// Start an exchange for `frame`. The caller must own the medium; an
    /// exchange still running is cancelled first.
    pub fn start_transmission(&mut self, ctx: &mut MacContext<'_>, frame: Frame, params: TxParams) {
        self.cancel_all_events(ctx);
        debug!("{} start tx {:?} size={} to={} rts={} ack={:?}", self.address, frame.kind(), frame.size(), frame.receiver(), params.must_send_rts, params.ack);
        self.current = Some(CurrentTx { frame, params });
        self.listening = true;

        if params.must_send_rts {
            self.send_rts_for_packet(ctx);
        } else {
            self.send_data_packet(ctx);
        }
        assert!(ctx.phy.is_tx(ctx.queue.now()), "MAC low did not take the medium");
    }

    /// Total medium time of an exchange for a frame of `size` bytes to `peer`.
    pub fn calculate_transmission_time(&self, manager: &mut dyn StationManager, size: u32, peer: Mac48Address, params: &TxParams) -> Duration {
        let data = manager.data_tx_vector(peer);
        let mut total = zero();
        if params.must_send_rts {
            let rts = manager.rts_tx_vector(peer);
            total = total + tx_duration(rts_size(), rts.mode, PREAMBLE) + self.cts_duration(manager, rts.mode) + self.params.sifs * 2;
        }
        total = total + tx_duration(size, data.mode, PREAMBLE);
        if params.must_wait_ack() {
            total = total + self.params.sifs + self.ack_duration(manager, data.mode);
        }
        if let Some(next) = params.next_packet_size {
            total = total + self.params.sifs + tx_duration(next, data.mode, PREAMBLE);
        }
        total
    }

    pub fn handle_event(&mut self, ctx: &mut MacContext<'_>, event: MacEvent) {
        match event {
            MacEvent::CtsTimeout => self.on_cts_timeout(ctx),
            MacEvent::NormalAckTimeout => self.on_normal_ack_timeout(ctx),
            MacEvent::FastAckTimeout => self.on_fast_ack_timeout(ctx),
            MacEvent::SuperFastAckTimeout => self.on_super_fast_ack_timeout(ctx),
            MacEvent::FastAckFailedTimeout => self.on_fast_ack_failed_timeout(ctx),
            MacEvent::SendCts {
                to,
                rts_duration,
                rts_mode,
                rts_snr,
            } => self.send_cts_after_rts(ctx, to, rts_duration, rts_mode, rts_snr),
            MacEvent::SendAck {
                to,
                data_duration,
                data_mode,
                data_snr,
            } => self.send_ack_after_data(ctx, to, data_duration, data_mode, data_snr),
            MacEvent::SendDataAfterCts { cts_duration } => self.send_data_after_cts(ctx, cts_duration),
            MacEvent::WaitSifsAfterEndTx => ctx.listener.start_next(),
            MacEvent::EndTxNoAck => {
                self.listening = false;
                ctx.listener.end_tx_no_ack();
            }
            MacEvent::NavResetCtsMissed { rts_end } => self.on_nav_reset_cts_missed(ctx, rts_end),
        }
    }

    /// A frame was decoded by the PHY.
    pub fn receive_ok(&mut self, ctx: &mut MacContext<'_>, frame: Frame, snr: f64, mode: WifiMode) {
        let now = ctx.queue.now();
        self.last_rx_failed = false;
        let was_nav_zero = self.is_nav_zero(now);
        self.notify_nav(ctx, &frame, mode);
        let header = frame.header;
        let for_me = header.addr1 == self.address;

        match header.kind {
            FrameKind::Rts => {
                let Some(source) = header.addr2 else {
                    return;
                };
                if for_me && was_nav_zero {
                    debug!("{} rx RTS from {source}, schedule CTS", self.address);
                    ctx.manager.report_rx_ok(now, source, snr, mode);
                    self.send_cts.cancel(ctx.queue);
                    self.send_cts.arm(
                        ctx.queue,
                        self.params.sifs,
                        DeviceEvent::Mac(MacEvent::SendCts {
                            to: source,
                            rts_duration: header.duration,
                            rts_mode: mode,
                            rts_snr: snr,
                        }),
                    );
                } else if for_me {
                    debug!("{} rx RTS from {source}, NAV busy, no CTS", self.address);
                }
            }
            FrameKind::Cts if for_me && self.cts_timeout.is_running(ctx.queue) => {
                let Some(peer) = self.current.as_ref().map(|tx| tx.frame.receiver()) else {
                    return;
                };
                debug!("{} rx CTS from {peer}", self.address);
                ctx.manager.report_rx_ok(now, peer, snr, mode);
                ctx.manager.report_rts_ok(now, peer, snr, mode, frame.snr_tag.unwrap_or(0.0));
                self.cts_timeout.cancel(ctx.queue);
                ctx.listener.got_cts(snr, mode);
                self.send_data.arm(ctx.queue, self.params.sifs, DeviceEvent::Mac(MacEvent::SendDataAfterCts { cts_duration: header.duration }));
            }
            FrameKind::Ack if for_me && self.is_waiting_ack(ctx.queue) => {
                let Some(current) = self.current.as_ref() else {
                    return;
                };
                let peer = current.frame.receiver();
                let has_next = current.params.next_packet_size.is_some();
                debug!("{} rx ACK from {peer}", self.address);
                ctx.manager.report_rx_ok(now, peer, snr, mode);
                ctx.manager.report_data_ok(now, peer, snr, mode, frame.snr_tag.unwrap_or(0.0));
                self.cancel_ack_timers(ctx.queue);
                self.listening = false;
                ctx.listener.got_ack(snr, mode);
                if has_next {
                    self.wait_sifs.arm(ctx.queue, self.params.sifs, DeviceEvent::Mac(MacEvent::WaitSifsAfterEndTx));
                }
            }
            kind if kind.is_control() => {
                trace!("{} drop {kind:?}", self.address);
            }
            kind if for_me => {
                let Some(source) = header.addr2 else {
                    return;
                };
                ctx.manager.report_rx_ok(now, source, snr, mode);
                if kind == FrameKind::QosDataNoAck {
                    debug!("{} rx unicast/noAck from {source}", self.address);
                } else {
                    debug!("{} rx unicast from {source}, schedule ACK", self.address);
                    self.send_ack.cancel(ctx.queue);
                    self.send_ack.arm(
                        ctx.queue,
                        self.params.sifs,
                        DeviceEvent::Mac(MacEvent::SendAck {
                            to: source,
                            data_duration: header.duration,
                            data_mode: mode,
                            data_snr: snr,
                        }),
                    );
                }
                ctx.listener.receive(frame, snr, mode);
            }
            _ if header.addr1.is_group() => {
                trace!("{} rx group frame", self.address);
                ctx.listener.receive(frame, snr, mode);
            }
            _ => {}
        }
    }

    /// A frame could not be decoded.
    pub fn receive_error(&mut self, ctx: &mut MacContext<'_>, frame: &Frame, snr: f64) {
        debug!("{} rx failed ({:?}, snr={snr:.2})", self.address, frame.kind());
        self.last_rx_failed = true;
        if self.fast_ack_timeout.is_running(ctx.queue) && !self.fast_ack_failed_timeout.is_running(ctx.queue) {
            // Something answered but it was not readable: give up after SIFS.
            self.fast_ack_timeout.cancel(ctx.queue);
            self.fast_ack_failed_timeout.arm(ctx.queue, self.params.sifs, DeviceEvent::Mac(MacEvent::FastAckFailedTimeout));
        }
    }

    fn is_waiting_ack(&self, queue: &dyn EventQueue<DeviceEvent>) -> bool {
        let waiting = self.normal_ack_timeout.is_running(queue)
            || self.fast_ack_timeout.is_running(queue)
            || self.super_fast_ack_timeout.is_running(queue)
            || self.fast_ack_failed_timeout.is_running(queue);
        waiting && self.current.as_ref().is_some_and(|tx| tx.params.must_wait_ack())
    }

    fn cancel_ack_timers(&mut self, queue: &mut dyn EventQueue<DeviceEvent>) {
        self.normal_ack_timeout.cancel(queue);
        self.fast_ack_timeout.cancel(queue);
        self.super_fast_ack_timeout.cancel(queue);
        self.fast_ack_failed_timeout.cancel(queue);
    }

    fn cancel_all_events(&mut self, ctx: &mut MacContext<'_>) {
        let queue = &mut *ctx.queue;
        let timers = [
            &mut self.cts_timeout,
            &mut self.normal_ack_timeout,
            &mut self.fast_ack_timeout,
            &mut self.super_fast_ack_timeout,
            &mut self.fast_ack_failed_timeout,
            &mut self.send_cts,
            &mut self.send_ack,
            &mut self.send_data,
            &mut self.wait_sifs,
            &mut self.end_tx_no_ack,
        ];
        let mut one_running = false;
        for timer in timers {
            one_running |= timer.cancel(queue);
        }
        if one_running && self.listening {
            debug!("{} cancel running exchange", self.address);
            ctx.listener.cancel();
        }
        self.listening = false;
    }

    fn notify_nav(&mut self, ctx: &mut MacContext<'_>, frame: &Frame, mode: WifiMode) {
        let now = ctx.queue.now();
        assert!(self.nav.start <= now, "NAV starts in the future");
        if frame.receiver() == self.address {
            return;
        }
        let duration = frame.header.duration;
        ctx.listener.nav_start(duration);
        let previous = self.nav;
        if self.do_nav_start(now, duration) && frame.kind() == FrameKind::Rts {
            // Reset the NAV if no reception starts within 2 SIFS + CTS + 2 slots
            // after this RTS ended.
            let delay = self.cts_duration(ctx.manager, mode) + self.params.sifs * 2 + self.params.slot * 2;
            self.nav_reset.cancel(ctx.queue);
            self.nav_before_rts = Some(previous);
            self.nav_reset.arm(ctx.queue, delay, DeviceEvent::Mac(MacEvent::NavResetCtsMissed { rts_end: now }));
        }
    }

    /// Extend the NAV to `now + duration` unless it already reaches further.
    fn do_nav_start(&mut self, now: Instant, duration: Duration) -> bool {
        if now + duration > self.nav.end() {
            self.nav = Nav { start: now, duration };
            true
        } else {
            false
        }
    }

    fn on_nav_reset_cts_missed(&mut self, ctx: &mut MacContext<'_>, rts_end: Instant) {
        let Some(previous) = self.nav_before_rts.take() else {
            return;
        };
        if ctx.phy.last_rx_start_time() > rts_end {
            return;
        }
        let now = ctx.queue.now();
        debug!("{} no reception after RTS, NAV reset", self.address);
        self.nav = previous;
        ctx.listener.nav_reset(previous.end().saturating_duration_since(now));
    }

    fn cts_duration(&self, manager: &dyn StationManager, rts_mode: WifiMode) -> Duration {
        tx_duration(cts_size(), manager.cts_tx_vector(rts_mode).mode, PREAMBLE)
    }

    fn ack_duration(&self, manager: &dyn StationManager, data_mode: WifiMode) -> Duration {
        tx_duration(ack_size(), manager.ack_tx_vector(data_mode).mode, PREAMBLE)
    }

    fn forward_down(&mut self, ctx: &mut MacContext<'_>, frame: Frame, vector: TxVector) {
        let now = ctx.queue.now();
        debug!(
            "{} send {:?} to={} size={} mode={} duration={}us",
            self.address,
            frame.kind(),
            frame.receiver(),
            frame.size(),
            vector.mode,
            frame.header.duration.as_micros()
        );
        // Our own reservation also keeps us from answering other RTS frames.
        self.do_nav_start(now, frame.header.duration);
        ctx.phy.send(ctx.queue, frame, vector.mode, PREAMBLE, vector.power_level);
    }

    fn send_rts_for_packet(&mut self, ctx: &mut MacContext<'_>) {
        let Some(current) = self.current.as_ref() else {
            return;
        };
        let peer = current.frame.receiver();
        let data_size = current.frame.size();
        let params = current.params;
        let rts_vector = ctx.manager.rts_tx_vector(peer);

        let duration = match params.duration_id {
            Some(duration) => duration,
            None => {
                let data_vector = ctx.manager.data_tx_vector(peer);
                self.params.sifs
                    + self.cts_duration(ctx.manager, rts_vector.mode)
                    + self.params.sifs
                    + tx_duration(data_size, data_vector.mode, PREAMBLE)
                    + self.params.sifs
                    + self.ack_duration(ctx.manager, data_vector.mode)
            }
        };

        let timer_delay = tx_duration(rts_size(), rts_vector.mode, PREAMBLE) + self.params.cts_timeout;
        self.cts_timeout.arm(ctx.queue, timer_delay, DeviceEvent::Mac(MacEvent::CtsTimeout));
        self.forward_down(ctx, Frame::rts(peer, self.address, duration), rts_vector);
    }

    fn start_data_tx_timers(&mut self, ctx: &mut MacContext<'_>, data_vector: TxVector, data_size: u32, params: TxParams) {
        let tx = tx_duration(data_size, data_vector.mode, PREAMBLE);
        let (timer, delay, event) = match params.ack {
            AckPolicy::Normal => (&mut self.normal_ack_timeout, tx + self.params.ack_timeout, MacEvent::NormalAckTimeout),
            AckPolicy::Fast => (&mut self.fast_ack_timeout, tx + self.params.pifs, MacEvent::FastAckTimeout),
            AckPolicy::SuperFast => (&mut self.super_fast_ack_timeout, tx + self.params.pifs, MacEvent::SuperFastAckTimeout),
            AckPolicy::None if params.next_packet_size.is_some() => (&mut self.wait_sifs, tx + self.params.sifs, MacEvent::WaitSifsAfterEndTx),
            AckPolicy::None => (&mut self.end_tx_no_ack, tx, MacEvent::EndTxNoAck),
        };
        timer.arm(ctx.queue, delay, DeviceEvent::Mac(event));
    }

    fn send_data_packet(&mut self, ctx: &mut MacContext<'_>) {
        let Some(current) = self.current.as_ref() else {
            return;
        };
        let peer = current.frame.receiver();
        let params = current.params;
        let mut frame = current.frame.clone();
        let data_vector = ctx.manager.data_tx_vector(peer);
        self.start_data_tx_timers(ctx, data_vector, frame.size(), params);

        let duration = match params.duration_id {
            Some(duration) => duration,
            None => {
                let ack = self.params.sifs + self.ack_duration(ctx.manager, data_vector.mode);
                let mut duration = if params.must_wait_ack() { ack } else { zero() };
                if let Some(next) = params.next_packet_size {
                    duration = duration + self.params.sifs + tx_duration(next, data_vector.mode, PREAMBLE);
                    if params.must_wait_ack() {
                        duration = duration + ack;
                    }
                }
                duration
            }
        };
        frame.header.duration = duration;
        self.forward_down(ctx, frame, data_vector);
    }

    fn send_data_after_cts(&mut self, ctx: &mut MacContext<'_>, cts_duration: Duration) {
        let Some(current) = self.current.as_ref() else {
            return;
        };
        let peer = current.frame.receiver();
        let params = current.params;
        let mut frame = current.frame.clone();
        let data_vector = ctx.manager.data_tx_vector(peer);
        self.start_data_tx_timers(ctx, data_vector, frame.size(), params);

        let ack_reservation = self.params.sifs + self.ack_duration(ctx.manager, data_vector.mode);
        let tx = tx_duration(frame.size(), data_vector.mode, PREAMBLE);
        let remaining = cts_duration.checked_sub(tx + self.params.sifs).unwrap_or(zero());
        frame.header.duration = remaining.max(ack_reservation);
        self.forward_down(ctx, frame, data_vector);
    }

    fn send_cts_after_rts(&mut self, ctx: &mut MacContext<'_>, to: Mac48Address, rts_duration: Duration, rts_mode: WifiMode, rts_snr: f64) {
        let vector = ctx.manager.cts_tx_vector(rts_mode);
        let cts_tx = tx_duration(cts_size(), vector.mode, PREAMBLE);
        let duration = rts_duration.checked_sub(cts_tx + self.params.sifs).unwrap_or(zero());
        self.forward_down(ctx, Frame::cts(to, duration, rts_snr), vector);
    }

    fn send_ack_after_data(&mut self, ctx: &mut MacContext<'_>, to: Mac48Address, data_duration: Duration, data_mode: WifiMode, data_snr: f64) {
        let vector = ctx.manager.ack_tx_vector(data_mode);
        let ack_tx = tx_duration(ack_size(), vector.mode, PREAMBLE);
        let duration = data_duration.checked_sub(ack_tx + self.params.sifs).unwrap_or(zero());
        self.forward_down(ctx, Frame::ack(to, duration, data_snr), vector);
    }

    fn current_peer(&self) -> Option<Mac48Address> {
        self.current.as_ref().map(|tx| tx.frame.receiver())
    }

    fn on_cts_timeout(&mut self, ctx: &mut MacContext<'_>) {
        let Some(peer) = self.current_peer() else {
            return;
        };
        debug!("{} CTS timeout", self.address);
        ctx.manager.report_rts_failed(ctx.queue.now(), peer);
        self.current = None;
        self.listening = false;
        ctx.listener.missed_cts();
    }

    fn on_normal_ack_timeout(&mut self, ctx: &mut MacContext<'_>) {
        let Some(peer) = self.current_peer() else {
            return;
        };
        debug!("{} normal ACK timeout", self.address);
        ctx.manager.report_data_failed(ctx.queue.now(), peer);
        self.listening = false;
        ctx.listener.missed_ack();
    }

    fn on_fast_ack_timeout(&mut self, ctx: &mut MacContext<'_>) {
        let Some(peer) = self.current_peer() else {
            return;
        };
        let now = ctx.queue.now();
        if ctx.phy.is_idle(now) {
            debug!("{} fast ACK missed, medium idle", self.address);
            ctx.manager.report_data_failed(now, peer);
            self.listening = false;
            ctx.listener.missed_ack();
        } else {
            // The medium is busy, probably with the ACK: decide once it is over.
            let delay = ctx.phy.delay_until_idle(now) + self.params.sifs;
            debug!("{} fast ACK timeout with busy medium, waiting {}us", self.address, delay.as_micros());
            self.fast_ack_failed_timeout.arm(ctx.queue, delay, DeviceEvent::Mac(MacEvent::FastAckFailedTimeout));
        }
    }

    fn on_fast_ack_failed_timeout(&mut self, ctx: &mut MacContext<'_>) {
        let Some(peer) = self.current_peer() else {
            return;
        };
        debug!("{} fast ACK busy but missed", self.address);
        ctx.manager.report_data_failed(ctx.queue.now(), peer);
        self.listening = false;
        ctx.listener.missed_ack();
    }

    fn on_super_fast_ack_timeout(&mut self, ctx: &mut MacContext<'_>) {
        let Some(peer) = self.current_peer() else {
            return;
        };
        let now = ctx.queue.now();
        self.listening = false;
        if ctx.phy.is_idle(now) {
            debug!("{} super fast ACK failed", self.address);
            ctx.manager.report_data_failed(now, peer);
            ctx.listener.missed_ack();
        } else {
            // Energy on the medium right after our frame is taken as the ACK.
            debug!("{} super fast ACK ok (medium busy)", self.address);
            let data_mode = ctx.manager.data_tx_vector(peer).mode;
            let ack_mode = ctx.manager.ack_tx_vector(data_mode).mode;
            ctx.manager.report_data_ok(now, peer, 0.0, ack_mode, 0.0);
            ctx.listener.got_ack(0.0, ack_mode);
        }
    }
}
