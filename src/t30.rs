//! The T.30 state machine: session state, phase, timers, retry counters,
//! negotiated parameters, and the handler for every named state in the
//! flow chart.
//!
//! Dispatch is a match on `State` (not nested per-frame-type switches):
//! each per-state handler reads the incoming FCF and only branches on
//! the message types meaningful to that state, so a missing transition
//! shows up as an explicit `unexpected_frame` call rather than falling
//! through a generic default somewhere deep in a nested switch.

use crate::capability::{self, CapabilityKind, Capabilities, Compressions, ModemSupport, Resolutions};
use crate::ecm::{EcmBuffer, FrameSize, PostPageSignal, PpsFrame};
use crate::error::T30Error;
use crate::fallback::{self, ModemKind, FALLBACK_TABLE};
use crate::hdlc::{self, fcf};
use crate::logging::{t30_debug, t30_trace, t30_warn, SessionTag};
use crate::timer::{TimerEvent, Timers};
use crate::traits::{HdlcChannel, ImageCodec, ModemControl, ModemType, PageQuality, PhaseHooks};

/// A call resends its last command up to this many times before giving
/// up, per spec.md §4.5.
pub const MAX_MESSAGE_TRIES: u8 = 3;
/// Consecutive unproductive PPRs before the ECM sender must decide
/// between CTC and EOR, per spec.md §4.4.
pub const MAX_PPR_STRIKES: u8 = 4;

/// Which side of the call this session is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Calling,
    Answering,
}

/// Call phase, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ACed,
    ACng,
    BRx,
    BTx,
    CNonEcmRx,
    CNonEcmTx,
    CEcmRx,
    CEcmTx,
    DRx,
    DTx,
    E,
    CallFinished,
}

/// Session state, per spec.md §3. Every state named there and in
/// SPEC_FULL.md's completeness note appears here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Answering,
    B,
    C,
    D,
    DTcf,
    DPostTcf,
    FTcf,
    FCfr,
    FFtt,
    FDocNonEcm,
    FPostDocNonEcm,
    FDocEcm,
    FPostDocEcm,
    FPostRcpMcf,
    FPostRcpPpr,
    FPostRcpRnr,
    R,
    T,
    I,
    Ii,
    IiQ,
    IiiQMcf,
    IiiQRtp,
    IiiQRtn,
    Iv,
    IvPpsNull,
    IvPpsQ,
    IvPpsRnr,
    IvCtc,
    IvEor,
    IvEorRnr,
    CallFinished,
}

/// `front_end_status` event kinds, per spec.md §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontEndKind {
    SendStepComplete,
    SendComplete,
    ReceiveComplete,
    SignalPresent,
    SignalAbsent,
}

/// Policy for the ECM sender's CTC-vs-EOR decision after
/// `MAX_PPR_STRIKES` unproductive PPRs — left as an explicit knob per
/// the open question in spec.md §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtcPolicy {
    /// Send CTC while the last PPR still cleared some slots; EOR once a
    /// PPR repeats with no progress at all. This is the spec's chosen
    /// default.
    PreferCtcWhileProgressing,
    /// Always send CTC, matching the original engine's unconditional
    /// choice.
    AlwaysCtc,
}

/// Everything a caller sets before a call starts and does not change
/// during it.
#[derive(Debug, Clone)]
pub struct T30Config {
    pub supported_modems: ModemSupport,
    pub supported_resolutions: Resolutions,
    pub supported_compressions: Compressions,
    pub ecm_enabled: bool,
    pub ecm_frame_size: FrameSize,
    pub local_ident: String,
    pub crp_enabled: bool,
    pub ctc_policy: CtcPolicy,

    pub t0_ms: u32,
    pub t1_ms: u32,
    pub t2_ms: u32,
    pub t3_ms: u32,
    pub t4_ms: u32,
    pub t5_ms: u32,
    /// Carried per §6 for completeness; not armed by any handler here
    /// (their T.38 real-time ECM use is out of scope, per SPEC_FULL.md).
    pub t6_ms: u32,
    pub t7_ms: u32,
    pub t8_ms: u32,
    pub final_flush_ms: u32,
}

impl Default for T30Config {
    fn default() -> Self {
        Self {
            supported_modems: ModemSupport::V27TER | ModemSupport::V29 | ModemSupport::V17,
            supported_resolutions: Resolutions::FINE,
            supported_compressions: Compressions::T4_2D,
            ecm_enabled: true,
            ecm_frame_size: FrameSize::Octets256,
            local_ident: String::new(),
            crp_enabled: true,
            ctc_policy: CtcPolicy::PreferCtcWhileProgressing,
            t0_ms: 60_000,
            t1_ms: 35_000,
            t2_ms: 7_000,
            t3_ms: 15_000,
            t4_ms: 3_450,
            t5_ms: 65_000,
            t6_ms: 5_000,
            t7_ms: 6_000,
            t8_ms: 10_000,
            final_flush_ms: 1_000,
        }
    }
}

fn pps_fcf2(signal: PostPageSignal) -> u8 {
    match signal {
        PostPageSignal::Null => 0,
        PostPageSignal::Mps => 1,
        PostPageSignal::Eom => 2,
        PostPageSignal::Eop => 3,
        PostPageSignal::PriMps => 5,
        PostPageSignal::PriEom => 6,
        PostPageSignal::PriEop => 7,
    }
}

fn pps_signal_from_fcf2(code: u8) -> PostPageSignal {
    match code {
        1 => PostPageSignal::Mps,
        2 => PostPageSignal::Eom,
        3 => PostPageSignal::Eop,
        5 => PostPageSignal::PriMps,
        6 => PostPageSignal::PriEom,
        7 => PostPageSignal::PriEop,
        _ => PostPageSignal::Null,
    }
}

fn build_pps_frame(pps: &PpsFrame, dis_received: bool) -> [u8; 7] {
    let hdr = hdlc::header(fcf::PPS, true, dis_received);
    [
        hdr[0],
        hdr[1],
        hdr[2],
        pps_fcf2(pps.signal),
        pps.page,
        pps.block,
        pps.frames_in_burst_minus_one,
    ]
}

fn parse_pps_frame(msg: &[u8]) -> Option<(PostPageSignal, u8, u8, usize)> {
    if msg.len() < 7 {
        return None;
    }
    let count = if msg[6] == 0xFF { 0 } else { msg[6] as usize + 1 };
    Some((pps_signal_from_fcf2(msg[3]), msg[4], msg[5], count))
}

fn build_ppr_frame(bitmap: &[u8; 32], dis_received: bool) -> Vec<u8> {
    let hdr = hdlc::header(fcf::PPR, true, dis_received);
    let mut frame = Vec::with_capacity(35);
    frame.extend_from_slice(&hdr);
    frame.extend_from_slice(bitmap);
    frame
}

fn parse_ppr_bitmap(msg: &[u8]) -> Option<[u8; 32]> {
    if msg.len() < 35 {
        return None;
    }
    let mut bitmap = [0u8; 32];
    bitmap.copy_from_slice(&msg[3..35]);
    Some(bitmap)
}

/// Build a 20-digit identity frame (CSI/CIG/TSI/SUB/SID/PWD/SEP/PSA),
/// per spec.md §6: the identity's characters stored in reverse order,
/// space-padded on the left, in a fixed 20-octet payload.
pub fn encode_20digit(fcf_base: u8, dis_received: bool, ident: &str) -> [u8; 23] {
    let mut frame = [b' '; 23];
    let hdr = hdlc::header(fcf_base, true, dis_received);
    frame[0] = hdr[0];
    frame[1] = hdr[1];
    frame[2] = hdr[2];
    let reversed: Vec<u8> = ident.bytes().rev().take(20).collect();
    let start = 3 + (20 - reversed.len());
    frame[start..start + reversed.len()].copy_from_slice(&reversed);
    frame
}

/// Decode a 20-digit identity frame back to its original string.
pub fn decode_20digit(msg: &[u8]) -> String {
    let end = (3 + 20).min(msg.len());
    if end <= 3 {
        return String::new();
    }
    let s: String = msg[3..end].iter().rev().map(|&b| b as char).collect();
    s.trim().to_string()
}

/// Build a URL-style identity frame (TSA/CSA/IRA/CIA/ISP): header,
/// sequence byte, type byte, length byte, string.
pub fn encode_url_frame(fcf_base: u8, dis_received: bool, seq: u8, kind: u8, s: &str) -> Vec<u8> {
    let hdr = hdlc::header(fcf_base, true, dis_received);
    let mut frame = Vec::with_capacity(6 + s.len());
    frame.extend_from_slice(&hdr);
    frame.push(seq);
    frame.push(kind);
    frame.push(s.len() as u8);
    frame.extend_from_slice(s.as_bytes());
    frame
}

/// Decode a URL-style identity frame's `(seq, kind, string)`.
pub fn decode_url_frame(msg: &[u8]) -> Option<(u8, u8, String)> {
    if msg.len() < 6 {
        return None;
    }
    let len = msg[5] as usize;
    let end = (6 + len).min(msg.len());
    Some((msg[3], msg[4], String::from_utf8_lossy(&msg[6..end]).into_owned()))
}

/// The document a session is sending: local capabilities plus the page
/// geometry the caller wants to offer, used to negotiate resolution and
/// width against the remote's DIS.
#[derive(Debug, Clone, Copy)]
pub struct DocumentProfile {
    pub resolutions: Resolutions,
    pub compressions: Compressions,
    pub width_255mm: bool,
    pub width_303mm: bool,
}

/// A single T.30 call. Generic over the four capability traits so tests
/// can supply zero-cost mocks instead of boxed trait objects.
pub struct T30Session<M, H, I, P>
where
    M: ModemControl,
    H: HdlcChannel,
    I: ImageCodec,
    P: PhaseHooks,
{
    pub config: T30Config,
    modem: M,
    hdlc: H,
    codec: I,
    hooks: P,
    tag: SessionTag,

    role: Role,
    phase: Phase,
    state: State,
    timers: Timers,

    local_caps: Capabilities,
    remote_caps: Capabilities,
    /// Set once this station has received the other's DIS/DTC; applied
    /// as the response bit on every frame this station originates
    /// afterward (§6).
    dis_received_bit: bool,

    fallback_index: usize,
    short_train: bool,

    ecm: EcmBuffer,
    ecm_mode: bool,
    ppr_count: u8,
    ppr_last_missing: usize,
    last_pps_signal: PostPageSignal,
    last_quality: PageQuality,

    receiver_not_ready_count: u32,
    retries: u8,

    current_status: T30Error,
    pending_profile: Option<DocumentProfile>,
    page_number: u8,
    last_command: Vec<u8>,
}

impl<M, H, I, P> T30Session<M, H, I, P>
where
    M: ModemControl,
    H: HdlcChannel,
    I: ImageCodec,
    P: PhaseHooks,
{
    pub fn new(config: T30Config, modem: M, hdlc: H, codec: I, hooks: P) -> Self {
        let frame_size = config.ecm_frame_size;
        Self {
            config,
            modem,
            hdlc,
            codec,
            hooks,
            tag: SessionTag::default(),
            role: Role::Calling,
            phase: Phase::Idle,
            state: State::T,
            timers: Timers::new(),
            local_caps: Capabilities::default(),
            remote_caps: Capabilities::default(),
            dis_received_bit: false,
            fallback_index: 0,
            short_train: false,
            ecm: EcmBuffer::new(frame_size),
            ecm_mode: false,
            ppr_count: 0,
            ppr_last_missing: usize::MAX,
            last_pps_signal: PostPageSignal::Null,
            last_quality: PageQuality::Good,
            receiver_not_ready_count: 0,
            retries: 0,
            current_status: T30Error::Ok,
            pending_profile: None,
            page_number: 0,
            last_command: Vec::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_status(&self) -> T30Error {
        self.current_status
    }

    /// Local capabilities to advertise (DIS if answering, DCS fields if
    /// calling). Call before `restart`.
    pub fn set_local_capabilities(&mut self, caps: Capabilities) {
        self.local_caps = caps;
    }

    pub fn set_document_profile(&mut self, profile: DocumentProfile) {
        self.pending_profile = Some(profile);
    }

    /// Live-updatable even mid-call, per spec.md §5.
    pub fn set_receiver_not_ready_count(&mut self, n: u32) {
        self.receiver_not_ready_count = n;
    }

    // --- lifecycle ---

    /// Begin a call: select phase and state per role, arm T0.
    pub fn restart(&mut self, role: Role) {
        self.role = role;
        self.retries = 0;
        self.page_number = 0;
        self.current_status = T30Error::Ok;
        self.timers.cancel_all();
        self.timers.start_t0(self.config.t0_ms);
        match role {
            Role::Calling => {
                self.set_state(State::T);
                self.modem.set_tx_type(ModemType::Cng, false, false);
                self.modem.set_rx_type(ModemType::V21, false, true);
                self.phase = Phase::ACng;
            }
            Role::Answering => {
                self.modem.set_tx_type(ModemType::Ced, false, false);
                self.modem.set_rx_type(ModemType::V21, false, true);
                self.phase = Phase::ACed;
                self.send_dis();
                self.set_state(State::R);
                self.timers.start_command(self.config.t2_ms);
            }
        }
    }

    fn set_state(&mut self, state: State) {
        t30_debug!(self.tag, "state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Send `frame` and remember it verbatim for `repeat_last_command`.
    fn send_and_store(&mut self, frame: &[u8]) {
        self.hdlc.send_hdlc(frame);
        self.last_command = frame.to_vec();
    }

    fn send_simple(&mut self, fcf_base: u8) {
        let frame = hdlc::simple_frame(fcf_base, self.dis_received_bit);
        t30_trace!(self.tag, "send simple FCF {:#04x}", fcf_base);
        self.send_and_store(&frame);
    }

    /// Re-transmit the last outbound frame byte-for-byte, without
    /// advancing state — the idempotent CRP/retry path (spec.md §8).
    pub fn repeat_last_command(&mut self) {
        if self.last_command.is_empty() {
            return;
        }
        t30_debug!(self.tag, "repeating last command in state {:?}", self.state);
        self.hdlc.send_hdlc(&self.last_command.clone());
    }

    fn send_dis(&mut self) {
        let caps = self.build_local_caps_for(CapabilityKind::Dis);
        let mut frame = capability::build(CapabilityKind::Dis, &caps, self.dis_received_bit);
        let len = capability::prune(&mut frame);
        self.send_and_store(&frame[..len]);
    }

    fn send_dcs(&mut self) {
        let caps = self.build_local_caps_for(CapabilityKind::Dcs);
        let mut frame = capability::build(CapabilityKind::Dcs, &caps, self.dis_received_bit);
        let len = capability::prune(&mut frame);
        self.send_and_store(&frame[..len]);
    }

    fn build_local_caps_for(&self, kind: CapabilityKind) -> Capabilities {
        let mut caps = self.local_caps;
        caps.modems = self.config.supported_modems;
        caps.resolutions = self.config.supported_resolutions;
        caps.compressions = self.config.supported_compressions;
        caps.ecm_capable = self.config.ecm_enabled;
        if kind == CapabilityKind::Dcs {
            // DCS carries only the single selected modem/resolution/
            // compression, not the full supported set.
            if let Some(entry) = FALLBACK_TABLE.get(self.fallback_index) {
                caps.modems = entry.requires;
            }
        }
        caps
    }

    fn selected_modem(&self) -> ModemKind {
        FALLBACK_TABLE[self.fallback_index].modem
    }

    /// `disconnect`: deliver the final status exactly once, clear
    /// timers, and move to the terminal phase/state.
    fn disconnect(&mut self, status: T30Error) {
        if self.state == State::CallFinished {
            return;
        }
        t30_debug!(self.tag, "disconnect: {:?}", status);
        self.current_status = status;
        self.timers.cancel_all();
        self.modem.set_tx_type(ModemType::V21, false, false);
        self.hooks.phase_e(status);
        self.set_state(State::CallFinished);
        self.set_phase(Phase::CallFinished);
    }

    /// `send_dcn`: send DCN, then disconnect — no response is expected.
    fn send_dcn(&mut self, status: T30Error) {
        self.send_simple(fcf::DCN);
        self.disconnect(status);
    }

    fn unexpected_frame(&mut self, is_final: bool) {
        t30_warn!(self.tag, "unexpected frame in state {:?}", self.state);
        if is_final {
            self.send_dcn(T30Error::Unexpected);
        }
    }

    // --- entry points ---

    pub fn hdlc_accept(&mut self, frame: &[u8], ok: bool) {
        if self.state == State::CallFinished {
            return;
        }
        if !ok {
            t30_warn!(self.tag, "bad FCS frame discarded in state {:?}", self.state);
            if self.config.crp_enabled {
                self.send_simple(fcf::CRP);
            }
            return;
        }
        if !hdlc::header_is_valid(frame) {
            t30_warn!(self.tag, "malformed header discarded");
            return;
        }
        self.timers.promote_to_t1(self.config.t1_ms);

        let fcf_val = hdlc::masked_fcf(frame);
        let is_final = hdlc::is_final(frame);

        if fcf_val == fcf::CRP {
            self.repeat_last_command();
            return;
        }
        if fcf_val == fcf::FNV {
            t30_warn!(self.tag, "field-not-valid received");
            return;
        }

        match self.state {
            State::T => self.handle_t(frame, fcf_val, is_final),
            State::R => self.handle_r(frame, fcf_val, is_final),
            State::DPostTcf => self.handle_d_post_tcf(frame, fcf_val, is_final),
            State::FCfr | State::FFtt => self.handle_f_cfr_ftt(frame, fcf_val, is_final),
            State::FPostDocNonEcm => self.handle_f_post_doc_non_ecm(frame, fcf_val, is_final),
            State::IiiQMcf | State::IiiQRtp | State::IiiQRtn => {
                self.handle_iii_q(frame, fcf_val, is_final)
            }
            State::IiQ => self.handle_ii_q(frame, fcf_val, is_final),
            State::FDocEcm => self.handle_f_doc_ecm(frame, fcf_val, is_final),
            State::FPostRcpMcf | State::FPostRcpPpr => {
                self.handle_f_post_rcp(frame, fcf_val, is_final)
            }
            State::FPostRcpRnr => self.handle_f_post_rcp_rnr(frame, fcf_val, is_final),
            State::IvPpsNull | State::IvPpsQ => self.handle_iv_pps(frame, fcf_val, is_final),
            State::IvPpsRnr => self.handle_iv_pps_rnr(frame, fcf_val, is_final),
            State::IvCtc => self.handle_iv_ctc(frame, fcf_val, is_final),
            State::IvEor | State::IvEorRnr => self.handle_iv_eor(frame, fcf_val, is_final),
            _ => self.unexpected_frame(is_final),
        }
    }

    pub fn front_end_status(&mut self, kind: FrontEndKind) {
        match (self.state, kind) {
            (State::I, FrontEndKind::SendComplete) => {
                self.set_state(State::Ii);
            }
            (State::DTcf, FrontEndKind::SendComplete) => {
                self.modem.set_rx_type(ModemType::V21, false, true);
                self.set_phase(Phase::DRx);
                self.set_state(State::DPostTcf);
            }
            (State::Ii, FrontEndKind::SignalAbsent) => {
                let signal = if self.codec.has_more_pages() {
                    PostPageSignal::Mps
                } else {
                    PostPageSignal::Eop
                };
                self.last_pps_signal = signal;
                self.send_simple(self.post_page_fcf(signal));
                self.set_state(State::IiQ);
                self.timers.start_response(self.config.t4_ms);
            }
            (State::FCfr, FrontEndKind::SignalPresent) => {
                self.timers.cancel_cmd_resp();
                self.enter_document_receive();
            }
            (State::FFtt, FrontEndKind::SignalPresent) => {
                self.timers.cancel_cmd_resp();
                self.set_state(State::FTcf);
            }
            (State::FDocNonEcm, FrontEndKind::ReceiveComplete) => {
                self.last_quality = self.codec.end_of_page_stats();
                self.set_state(State::FPostDocNonEcm);
                self.timers.start_command(self.config.t2_ms);
            }
            (State::FPostRcpMcf, FrontEndKind::SignalPresent)
            | (State::FPostRcpPpr, FrontEndKind::SignalPresent) => {
                self.set_state(State::FDocEcm);
            }
            _ => {}
        }
    }

    pub fn non_ecm_put_bit(&mut self, bit: u8) {
        self.codec.put_bit(bit);
    }
    pub fn non_ecm_put_byte(&mut self, byte: u8) {
        self.codec.put_byte(byte);
    }
    pub fn non_ecm_put_chunk(&mut self, data: &[u8]) {
        self.codec.put_chunk(data);
    }
    pub fn non_ecm_get_bit(&mut self) -> Option<u8> {
        self.codec.get_bit()
    }
    pub fn non_ecm_get_byte(&mut self) -> Option<u8> {
        self.codec.get_byte()
    }
    pub fn non_ecm_get_chunk(&mut self, buf: &mut [u8]) -> usize {
        self.codec.get_chunk(buf)
    }

    pub fn timer_update(&mut self, samples: i64) {
        let events = self.timers.tick(samples);
        for ev in events {
            self.handle_timer_event(ev);
        }
    }

    fn handle_timer_event(&mut self, ev: TimerEvent) {
        match ev {
            TimerEvent::T0Expired => self.disconnect(T30Error::T0Expired),
            TimerEvent::T1Expired => self.disconnect(T30Error::T1Expired),
            TimerEvent::T3Expired => self.disconnect(T30Error::T3Expired),
            TimerEvent::T5Expired => self.send_dcn(T30Error::TxT5Exp),
            TimerEvent::T2Expired => self.handle_t2_expired(),
            TimerEvent::T4Expired => self.handle_t4_expired(),
        }
    }

    fn handle_t2_expired(&mut self) {
        let status = match self.state {
            State::FDocEcm | State::FPostRcpMcf | State::FPostRcpPpr => T30Error::T2ExpMpsRx,
            State::FPostDocNonEcm | State::IiiQMcf | State::IiiQRtp | State::IiiQRtn => {
                T30Error::T2ExpRrRx
            }
            State::T | State::R | State::Answering => T30Error::T2ExpFaxRx,
            _ => T30Error::T2ExpRx,
        };
        self.send_dcn(status);
    }

    fn handle_t4_expired(&mut self) {
        self.retries += 1;
        if self.retries < MAX_MESSAGE_TRIES {
            self.repeat_last_command();
            return;
        }
        let status = match self.state {
            State::DTcf | State::DPostTcf | State::FFtt | State::FCfr => T30Error::CannotTrain,
            State::IiQ => T30Error::TxPhdDead,
            State::IiiQMcf | State::IiiQRtp | State::IiiQRtn => T30Error::TxPhbDead,
            State::Iv
            | State::IvPpsNull
            | State::IvPpsQ
            | State::IvPpsRnr
            | State::IvCtc
            | State::IvEor
            | State::IvEorRnr => T30Error::TxT5Exp,
            _ => T30Error::RetryDcn,
        };
        self.send_dcn(status);
    }

    fn post_page_fcf(&self, signal: PostPageSignal) -> u8 {
        match signal {
            PostPageSignal::Null => fcf::PPS,
            PostPageSignal::Mps => fcf::MPS,
            PostPageSignal::Eom => fcf::EOM,
            PostPageSignal::Eop => fcf::EOP,
            PostPageSignal::PriMps => fcf::PRI_MPS,
            PostPageSignal::PriEom => fcf::PRI_EOM,
            PostPageSignal::PriEop => fcf::PRI_EOP,
        }
    }

    // --- phase B: calling side negotiation (state T) ---

    fn handle_t(&mut self, frame: &[u8], fcf_val: u8, is_final: bool) {
        if fcf_val != fcf::DIS && fcf_val != fcf::DTC {
            return self.unexpected_frame(is_final);
        }
        let caps = match capability::parse(frame) {
            Ok(c) => c,
            Err(_) => return,
        };
        self.remote_caps = caps;
        self.dis_received_bit = true;
        self.timers.cancel_command();

        let profile = self.pending_profile.unwrap_or(DocumentProfile {
            resolutions: Resolutions::FINE,
            compressions: Compressions::T4_2D,
            width_255mm: true,
            width_303mm: false,
        });
        if (profile.resolutions & caps.resolutions).is_empty() {
            return self.send_dcn(T30Error::NoResSupport);
        }
        if profile.width_303mm && !caps.width_303mm {
            return self.send_dcn(T30Error::NoSizeSupport);
        }

        let permitted = caps.modems & self.config.supported_modems;
        match fallback::find_fallback_entry(permitted) {
            Some(idx) => self.fallback_index = idx,
            None => return self.send_dcn(T30Error::Incompatible),
        }

        self.ecm_mode = self.config.ecm_enabled && caps.ecm_capable;
        self.hooks.phase_b(T30Error::Ok);
        self.send_dcs();
        self.begin_tcf();
    }

    fn begin_tcf(&mut self) {
        self.set_state(State::DTcf);
        self.set_phase(Phase::CNonEcmTx);
        self.modem
            .set_tx_type(ModemType::Fallback(self.selected_modem()), self.short_train, false);
        self.timers.start_response(self.config.t4_ms);
    }

    // --- phase B: answering side (state R), and renegotiation entered from III_Q_*/F_POST_RCP_* ---

    fn handle_r(&mut self, frame: &[u8], fcf_val: u8, is_final: bool) {
        if fcf_val != fcf::DCS {
            return self.unexpected_frame(is_final);
        }
        self.accept_incoming_dcs(frame);
    }

    fn accept_incoming_dcs(&mut self, frame: &[u8]) {
        let caps = match capability::parse(frame) {
            Ok(c) => c,
            Err(_) => return self.send_dcn(T30Error::RxInvalCmd),
        };
        self.remote_caps = caps;
        self.dis_received_bit = true;
        self.ecm_mode = self.config.ecm_enabled && caps.ecm_capable;
        let idx = FALLBACK_TABLE
            .iter()
            .position(|e| caps.modems.contains(e.requires))
            .unwrap_or(self.fallback_index);
        self.fallback_index = idx;
        self.hooks.phase_b(T30Error::Ok);
        self.timers.cancel_command();
        self.set_state(State::FTcf);
        self.set_phase(Phase::CNonEcmRx);
        self.modem
            .set_rx_type(ModemType::Fallback(self.selected_modem()), self.short_train, false);
        self.timers.start_response(self.config.t4_ms);
    }

    /// Called externally once the caller's TCF block has been scanned:
    /// `zero_run_bits` is the longest run of zero bits observed, which
    /// is compared against one second at the selected rate (testable
    /// property 7).
    pub fn tcf_result(&mut self, zero_run_bits: u32) {
        if self.state != State::FTcf {
            return;
        }
        let threshold = self.selected_modem().bit_rate();
        if zero_run_bits >= threshold {
            self.send_simple(fcf::CFR);
            self.set_state(State::FCfr);
        } else {
            self.send_simple(fcf::FTT);
            self.set_state(State::FFtt);
        }
        self.timers.start_response(self.config.t4_ms);
    }

    fn enter_document_receive(&mut self) {
        self.retries = 0;
        if self.ecm_mode {
            self.set_state(State::FDocEcm);
            self.set_phase(Phase::CEcmRx);
            self.modem
                .set_rx_type(ModemType::Fallback(self.selected_modem()), self.short_train, true);
        } else {
            self.set_state(State::FDocNonEcm);
            self.set_phase(Phase::CNonEcmRx);
            self.modem
                .set_rx_type(ModemType::Fallback(self.selected_modem()), self.short_train, false);
        }
        self.short_train = true;
    }

    // --- calling side: D_POST_TCF (awaiting CFR/FTT) ---

    fn handle_d_post_tcf(&mut self, _frame: &[u8], fcf_val: u8, is_final: bool) {
        match fcf_val {
            fcf::CFR => {
                self.retries = 0;
                self.short_train = true;
                if self.ecm_mode {
                    self.start_ecm_transmit();
                } else {
                    self.set_state(State::I);
                    self.set_phase(Phase::CNonEcmTx);
                    self.modem
                        .set_tx_type(ModemType::Fallback(self.selected_modem()), self.short_train, false);
                }
            }
            fcf::FTT => {
                self.retries += 1;
                let permitted = self.remote_caps.modems & self.config.supported_modems;
                match fallback::step_fallback(self.fallback_index + 1, permitted) {
                    Some(idx) if self.retries < MAX_MESSAGE_TRIES => {
                        self.fallback_index = idx;
                        self.set_state(State::D);
                        self.send_dcs();
                        self.begin_tcf();
                    }
                    _ => self.send_dcn(T30Error::CannotTrain),
                }
            }
            fcf::DCN => self.disconnect(T30Error::DcnWhyRx),
            _ => self.unexpected_frame(is_final),
        }
    }

    // --- calling side, answering's training response (F_CFR/F_FTT retry wait) ---

    fn handle_f_cfr_ftt(&mut self, _frame: &[u8], fcf_val: u8, is_final: bool) {
        // Only reached if the far end sends something unexpected over
        // HDLC while we wait for carrier (the normal path resumes via
        // `front_end_status`).
        if fcf_val == fcf::DCN {
            self.disconnect(T30Error::DcnWhyRx);
        } else {
            self.unexpected_frame(is_final);
        }
    }

    // --- non-ECM send side ---

    fn handle_ii_q(&mut self, _frame: &[u8], fcf_val: u8, is_final: bool) {
        match fcf_val {
            fcf::MCF => {
                self.retries = 0;
                self.timers.cancel_cmd_resp();
                self.hooks.phase_d(T30Error::Ok);
                match self.last_pps_signal {
                    PostPageSignal::Eop | PostPageSignal::PriEop => {
                        self.send_dcn(T30Error::Ok)
                    }
                    PostPageSignal::Mps | PostPageSignal::PriMps => {
                        self.page_number = self.page_number.wrapping_add(1);
                        self.set_state(State::I);
                        self.set_phase(Phase::CNonEcmTx);
                    }
                    PostPageSignal::Eom | PostPageSignal::PriEom => {
                        self.set_state(State::T);
                        self.set_phase(Phase::BTx);
                    }
                    PostPageSignal::Null => {}
                }
            }
            fcf::RTP => {
                self.retries = 0;
                self.hooks.phase_d(T30Error::Ok);
                self.set_state(State::D);
                self.begin_tcf();
            }
            fcf::RTN => {
                self.hooks.phase_d(T30Error::TxBadPg);
                let permitted = self.remote_caps.modems & self.config.supported_modems;
                match fallback::step_fallback(self.fallback_index + 1, permitted) {
                    Some(idx) => {
                        self.fallback_index = idx;
                        self.set_state(State::D);
                        self.send_dcs();
                        self.begin_tcf();
                    }
                    None => self.send_dcn(T30Error::TxBadPg),
                }
            }
            fcf::DCN => self.disconnect(T30Error::TxGotDcn),
            _ => self.unexpected_frame(is_final),
        }
    }

    // --- non-ECM receive side: after ack, waiting for what's next ---

    fn handle_f_post_doc_non_ecm(&mut self, frame: &[u8], fcf_val: u8, is_final: bool) {
        let signal = match fcf_val {
            fcf::MPS => PostPageSignal::Mps,
            fcf::EOM => PostPageSignal::Eom,
            fcf::EOP => PostPageSignal::Eop,
            fcf::PRI_MPS => PostPageSignal::PriMps,
            fcf::PRI_EOM => PostPageSignal::PriEom,
            fcf::PRI_EOP => PostPageSignal::PriEop,
            fcf::DCN => return self.disconnect(T30Error::DcnPhdRx),
            _ => return self.unexpected_frame(is_final),
        };
        let ack_fcf = match self.last_quality {
            PageQuality::Good => fcf::MCF,
            PageQuality::Poor => fcf::RTP,
            PageQuality::Bad => fcf::RTN,
        };
        self.send_simple(ack_fcf);
        self.hooks.phase_d(self.current_status);
        self.last_pps_signal = signal;
        if matches!(signal, PostPageSignal::PriMps | PostPageSignal::PriEom | PostPageSignal::PriEop) {
            self.timers.start_t3(self.config.t3_ms);
        }
        self.set_state(match ack_fcf {
            fcf::MCF => State::IiiQMcf,
            fcf::RTP => State::IiiQRtp,
            _ => State::IiiQRtn,
        });
        self.timers.start_command(self.config.t2_ms);
        let _ = frame;
    }

    fn handle_iii_q(&mut self, frame: &[u8], fcf_val: u8, is_final: bool) {
        match fcf_val {
            fcf::DCN => self.disconnect(T30Error::DcnDataRx),
            fcf::DIS | fcf::DTC | fcf::DCS => self.accept_incoming_dcs(frame),
            _ => self.unexpected_frame(is_final),
        }
    }

    // --- ECM send side ---

    fn start_ecm_transmit(&mut self) {
        self.ppr_count = 0;
        self.ppr_last_missing = usize::MAX;
        self.set_phase(Phase::CEcmTx);
        self.modem
            .set_tx_type(ModemType::Fallback(self.selected_modem()), self.short_train, true);
        self.fill_and_send_ecm_burst();
    }

    fn fill_and_send_ecm_burst(&mut self) {
        let len = self.ecm.frame_size().len();
        self.ecm.fill_for_transmit(|| self.codec.read_frame(len));
        self.send_ecm_burst_frames();
    }

    fn send_ecm_burst_frames(&mut self) {
        let frames: Vec<(u8, Vec<u8>)> = self
            .ecm
            .burst_frames()
            .into_iter()
            .map(|(seq, payload)| (seq, payload.to_vec()))
            .collect();
        for (seq, payload) in &frames {
            let wire = crate::ecm::wire_frame(*seq, payload);
            self.hdlc.send_hdlc(&wire);
        }
        let rcp = hdlc::simple_frame(fcf::RCP, self.dis_received_bit);
        for _ in 0..3 {
            self.hdlc.send_hdlc(&rcp);
        }
        let signal = if self.ecm.page_ended {
            if self.codec.has_more_pages() {
                PostPageSignal::Mps
            } else {
                PostPageSignal::Eop
            }
        } else {
            PostPageSignal::Null
        };
        self.last_pps_signal = signal;
        let pps = self.ecm.build_pps(signal);
        let frame = build_pps_frame(&pps, self.dis_received_bit);
        self.send_and_store(&frame);
        self.set_state(match signal {
            PostPageSignal::Null => State::IvPpsNull,
            _ => State::IvPpsQ,
        });
        self.timers.start_response(self.config.t4_ms);
    }

    fn resend_pending_ecm_frames(&mut self) {
        let frames: Vec<(u8, Vec<u8>)> = self
            .ecm
            .burst_frames()
            .into_iter()
            .map(|(seq, payload)| (seq, payload.to_vec()))
            .collect();
        for (seq, payload) in &frames {
            let wire = crate::ecm::wire_frame(*seq, payload);
            self.hdlc.send_hdlc(&wire);
        }
        let rcp = hdlc::simple_frame(fcf::RCP, self.dis_received_bit);
        for _ in 0..3 {
            self.hdlc.send_hdlc(&rcp);
        }
        let pps = self.ecm.build_pps(self.last_pps_signal);
        let frame = build_pps_frame(&pps, self.dis_received_bit);
        self.send_and_store(&frame);
        self.timers.start_response(self.config.t4_ms);
    }

    fn handle_iv_pps(&mut self, frame: &[u8], fcf_val: u8, is_final: bool) {
        match fcf_val {
            fcf::MCF => self.on_ecm_burst_acked(),
            fcf::PPR => {
                let Some(bitmap) = parse_ppr_bitmap(frame) else {
                    return self.unexpected_frame(is_final);
                };
                self.ppr_count += 1;
                self.ecm.apply_ppr(&bitmap);
                let missing_after = self.ecm.pending_count();
                if self.ppr_count >= MAX_PPR_STRIKES {
                    let progressing = missing_after < self.ppr_last_missing;
                    let send_ctc = match self.config.ctc_policy {
                        CtcPolicy::AlwaysCtc => true,
                        CtcPolicy::PreferCtcWhileProgressing => progressing,
                    };
                    self.ppr_last_missing = missing_after;
                    if send_ctc {
                        self.send_simple(fcf::CTC);
                        self.set_state(State::IvCtc);
                    } else {
                        self.send_simple(fcf::EOR);
                        self.set_state(State::IvEor);
                    }
                    self.timers.start_response(self.config.t4_ms);
                } else {
                    self.ppr_last_missing = missing_after;
                    self.resend_pending_ecm_frames();
                }
            }
            fcf::RNR => {
                self.set_state(State::IvPpsRnr);
                self.timers.start_t5_if_idle(self.config.t5_ms);
            }
            fcf::DCN => self.disconnect(T30Error::TxGotDcn),
            _ => self.unexpected_frame(is_final),
        }
    }

    fn on_ecm_burst_acked(&mut self) {
        self.retries = 0;
        self.ppr_count = 0;
        self.ppr_last_missing = usize::MAX;
        self.timers.cancel_t5();
        if self.last_pps_signal != PostPageSignal::Null {
            self.hooks.phase_d(T30Error::Ok);
        }
        match self.last_pps_signal {
            PostPageSignal::Eop | PostPageSignal::PriEop => self.send_dcn(T30Error::Ok),
            PostPageSignal::Mps | PostPageSignal::PriMps => {
                self.page_number = self.page_number.wrapping_add(1);
                self.ecm.clear_for_next_block();
                self.ecm.page = self.page_number;
                self.fill_and_send_ecm_burst();
            }
            PostPageSignal::Eom | PostPageSignal::PriEom => {
                self.set_state(State::T);
                self.set_phase(Phase::BTx);
            }
            PostPageSignal::Null => {
                self.ecm.clear_for_next_block();
                self.fill_and_send_ecm_burst();
            }
        }
    }

    fn handle_iv_pps_rnr(&mut self, _frame: &[u8], fcf_val: u8, is_final: bool) {
        match fcf_val {
            fcf::RR => {
                self.resend_pending_ecm_frames();
                self.set_state(State::IvPpsQ);
            }
            fcf::RNR => {
                // still not ready; T5 keeps running toward its ceiling.
            }
            fcf::DCN => self.disconnect(T30Error::TxGotDcn),
            _ => self.unexpected_frame(is_final),
        }
    }

    fn handle_iv_ctc(&mut self, _frame: &[u8], fcf_val: u8, is_final: bool) {
        match fcf_val {
            fcf::CTR => {
                let permitted = self.remote_caps.modems & self.config.supported_modems;
                if let Some(idx) = fallback::step_fallback(self.fallback_index + 1, permitted) {
                    self.fallback_index = idx;
                }
                self.ppr_count = 0;
                self.set_state(State::D);
                self.send_dcs();
                self.begin_tcf();
            }
            fcf::DCN => self.disconnect(T30Error::TxGotDcn),
            _ => self.unexpected_frame(is_final),
        }
    }

    fn handle_iv_eor(&mut self, _frame: &[u8], fcf_val: u8, is_final: bool) {
        match fcf_val {
            fcf::MCF | fcf::ERR => self.on_ecm_burst_acked(),
            fcf::RNR => {
                self.set_state(State::IvEorRnr);
                self.timers.start_t5_if_idle(self.config.t5_ms);
            }
            fcf::DCN => self.disconnect(T30Error::TxGotDcn),
            _ => self.unexpected_frame(is_final),
        }
    }

    // --- ECM receive side ---

    fn handle_f_doc_ecm(&mut self, frame: &[u8], fcf_val: u8, is_final: bool) {
        match fcf_val {
            fcf::FCD => {
                if frame.len() > 4 {
                    self.ecm.receive_fcd(frame[3], frame[4..].to_vec());
                }
            }
            fcf::RCP => {}
            fcf::PPS => self.resolve_incoming_pps(frame),
            fcf::CTC => {
                self.send_simple(fcf::CTR);
                self.set_state(State::FTcf);
            }
            fcf::EOR => {
                self.ecm.commit_on_receive(|p| self.codec.write_frame(p));
                self.send_simple(fcf::ERR);
                self.set_state(State::FPostRcpMcf);
            }
            fcf::DCN => self.disconnect(T30Error::DcnFaxRx),
            _ => self.unexpected_frame(is_final),
        }
    }

    fn resolve_incoming_pps(&mut self, frame: &[u8]) {
        let Some((signal, page, block, count)) = parse_pps_frame(frame) else {
            return;
        };
        self.ecm.page = page;
        self.ecm.block = block;
        self.last_pps_signal = signal;

        if self.receiver_not_ready_count > 0 {
            self.receiver_not_ready_count -= 1;
            self.send_simple(fcf::RNR);
            self.set_state(State::FPostRcpRnr);
            self.timers.start_t5_if_idle(self.config.t5_ms);
            return;
        }

        let (bitmap, missing) = self.ecm.missing_bitmap(count);
        if !missing {
            self.ecm.commit_on_receive(|p| self.codec.write_frame(p));
            self.send_simple(fcf::MCF);
            if signal != PostPageSignal::Null {
                self.hooks.phase_d(self.current_status);
            }
            self.timers.cancel_t5();
            self.set_state(State::FPostRcpMcf);
        } else {
            let frame = build_ppr_frame(&bitmap, self.dis_received_bit);
            self.send_and_store(&frame);
            self.set_state(State::FPostRcpPpr);
        }
    }

    /// Only CRP and FNV are accepted here (both already dispatched
    /// before reaching per-state handlers); any other frame is
    /// unexpected, per the open question in spec.md §9.
    fn handle_f_post_rcp(&mut self, _frame: &[u8], _fcf_val: u8, is_final: bool) {
        self.unexpected_frame(is_final);
    }

    fn handle_f_post_rcp_rnr(&mut self, _frame: &[u8], fcf_val: u8, is_final: bool) {
        match fcf_val {
            fcf::RR | fcf::RNR => {}
            _ => self.unexpected_frame(is_final),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ModemSupport;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Recorder {
        sent: Vec<Vec<u8>>,
        tx_types: Vec<ModemType>,
        rx_types: Vec<ModemType>,
    }

    struct MockModem(Rc<RefCell<Recorder>>);
    impl ModemControl for MockModem {
        fn set_rx_type(&mut self, modem: ModemType, _short_train: bool, _use_hdlc: bool) {
            self.0.borrow_mut().rx_types.push(modem);
        }
        fn set_tx_type(&mut self, modem: ModemType, _short_train: bool, _use_hdlc: bool) {
            self.0.borrow_mut().tx_types.push(modem);
        }
    }

    struct MockHdlc(Rc<RefCell<Recorder>>);
    impl HdlcChannel for MockHdlc {
        fn send_hdlc(&mut self, frame: &[u8]) {
            self.0.borrow_mut().sent.push(frame.to_vec());
        }
    }

    #[derive(Default)]
    struct MockCodec {
        frames: Vec<Vec<u8>>,
        written: Vec<Vec<u8>>,
        more_pages: bool,
        quality: Option<PageQuality>,
    }
    impl ImageCodec for MockCodec {
        fn put_bit(&mut self, _bit: u8) {}
        fn put_byte(&mut self, _byte: u8) {}
        fn put_chunk(&mut self, _data: &[u8]) {}
        fn get_bit(&mut self) -> Option<u8> {
            None
        }
        fn get_byte(&mut self) -> Option<u8> {
            None
        }
        fn get_chunk(&mut self, _buf: &mut [u8]) -> usize {
            0
        }
        fn read_frame(&mut self, max_len: usize) -> Option<Vec<u8>> {
            if self.frames.is_empty() {
                None
            } else {
                let mut f = self.frames.remove(0);
                f.resize(max_len, 0);
                Some(f)
            }
        }
        fn write_frame(&mut self, payload: &[u8]) {
            self.written.push(payload.to_vec());
        }
        fn end_of_page_stats(&self) -> PageQuality {
            self.quality.unwrap_or(PageQuality::Good)
        }
        fn has_more_pages(&self) -> bool {
            self.more_pages
        }
    }

    #[derive(Default)]
    struct MockHooks {
        phase_b_calls: Vec<T30Error>,
        phase_d_calls: Vec<T30Error>,
        phase_e_calls: Vec<T30Error>,
    }
    impl PhaseHooks for MockHooks {
        fn phase_b(&mut self, status: T30Error) {
            self.phase_b_calls.push(status);
        }
        fn phase_d(&mut self, status: T30Error) {
            self.phase_d_calls.push(status);
        }
        fn phase_e(&mut self, status: T30Error) {
            self.phase_e_calls.push(status);
        }
    }

    fn make_session() -> (T30Session<MockModem, MockHdlc, MockCodec, MockHooks>, Rc<RefCell<Recorder>>) {
        let rec = Rc::new(RefCell::new(Recorder::default()));
        let sess = T30Session::new(
            T30Config::default(),
            MockModem(rec.clone()),
            MockHdlc(rec.clone()),
            MockCodec::default(),
            MockHooks::default(),
        );
        (sess, rec)
    }

    #[test]
    fn restart_answering_sends_dis_and_enters_r() {
        let (mut sess, rec) = make_session();
        sess.restart(Role::Answering);
        assert_eq!(sess.state(), State::R);
        assert_eq!(rec.borrow().sent.len(), 1);
        assert_eq!(hdlc::masked_fcf(&rec.borrow().sent[0]), fcf::DIS);
    }

    #[test]
    fn calling_side_negotiates_dcs_and_begins_tcf() {
        let (mut sess, rec) = make_session();
        sess.restart(Role::Calling);
        let caps = Capabilities {
            modems: ModemSupport::V29 | ModemSupport::V27TER,
            resolutions: Resolutions::FINE,
            ecm_capable: false,
            ..Default::default()
        };
        let mut dis = capability::build(CapabilityKind::Dis, &caps, false);
        let len = capability::prune(&mut dis);
        sess.hdlc_accept(&dis[..len], true);
        assert_eq!(sess.state(), State::DTcf);
        assert_eq!(hdlc::masked_fcf(&rec.borrow().sent.last().unwrap()), fcf::DCS);
        assert_eq!(sess.hooks.phase_b_calls, vec![T30Error::Ok]);
    }

    #[test]
    fn tcf_send_complete_advances_to_d_post_tcf_and_listens_for_cfr() {
        let (mut sess, _rec) = make_session();
        sess.restart(Role::Calling);
        sess.set_state(State::DTcf);
        sess.front_end_status(FrontEndKind::SendComplete);
        assert_eq!(sess.state(), State::DPostTcf);

        let cfr = hdlc::simple_frame(fcf::CFR, sess.dis_received_bit);
        sess.hdlc_accept(&cfr, true);
        assert_eq!(sess.state(), State::I);
    }

    #[test]
    fn answering_side_fires_phase_b_on_dcs_acceptance() {
        let (mut sess, _rec) = make_session();
        sess.restart(Role::Answering);
        let caps = Capabilities {
            modems: ModemSupport::V29,
            resolutions: Resolutions::FINE,
            ecm_capable: false,
            ..Default::default()
        };
        let mut dcs = capability::build(CapabilityKind::Dcs, &caps, false);
        let len = capability::prune(&mut dcs);
        sess.hdlc_accept(&dcs[..len], true);
        assert_eq!(sess.state(), State::FTcf);
        assert_eq!(sess.hooks.phase_b_calls, vec![T30Error::Ok]);
    }

    #[test]
    fn repeat_last_command_resends_identical_bytes() {
        let (mut sess, rec) = make_session();
        sess.restart(Role::Answering);
        let first = rec.borrow().sent[0].clone();
        sess.repeat_last_command();
        assert_eq!(rec.borrow().sent.last().unwrap(), &first);
        assert_eq!(sess.state(), State::R, "repeat must not advance state");
    }

    #[test]
    fn t4_exhaustion_in_ii_q_yields_phd_dead() {
        let (mut sess, _rec) = make_session();
        sess.restart(Role::Calling);
        sess.set_state(State::IiQ);
        sess.last_command = vec![0xFF, 0x13, fcf::EOP];
        sess.timers.start_response(sess.config.t4_ms);
        for _ in 0..MAX_MESSAGE_TRIES {
            sess.timer_update(crate::timer::ms_to_samples(sess.config.t4_ms));
        }
        assert_eq!(sess.current_status(), T30Error::TxPhdDead);
        assert_eq!(sess.state(), State::CallFinished);
    }

    #[test]
    fn four_consecutive_ppr_with_no_progress_sends_eor() {
        let (mut sess, rec) = make_session();
        sess.restart(Role::Calling);
        sess.ecm_mode = true;
        sess.remote_caps.modems = ModemSupport::V29;
        sess.config.supported_modems = ModemSupport::V29;
        sess.fallback_index = fallback::find_fallback_entry(ModemSupport::V29).unwrap();
        sess.codec.frames.push(vec![1; 256]);
        sess.set_state(State::DPostTcf);
        sess.handle_d_post_tcf(&[], fcf::CFR, true);
        assert!(matches!(sess.state(), State::IvPpsNull | State::IvPpsQ));

        let mut bitmap = [0xFFu8; 32]; // everything still missing: no progress
        for _ in 0..MAX_PPR_STRIKES {
            let frame = build_ppr_frame(&bitmap, false);
            sess.hdlc_accept(&frame, true);
        }
        let last_sent = rec.borrow().sent.last().unwrap().clone();
        assert_eq!(hdlc::masked_fcf(&last_sent), fcf::EOR);
        let _ = &mut bitmap;
    }

    #[test]
    fn fallback_exhaustion_on_repeated_ftt_sends_cannot_train() {
        let (mut sess, rec) = make_session();
        sess.restart(Role::Calling);
        sess.remote_caps.modems = ModemSupport::V27TER;
        sess.config.supported_modems = ModemSupport::V27TER;
        sess.fallback_index = fallback::find_fallback_entry(ModemSupport::V27TER).unwrap();
        sess.set_state(State::DPostTcf);
        for _ in 0..(MAX_MESSAGE_TRIES + 1) {
            sess.handle_d_post_tcf(&[], fcf::FTT, true);
        }
        assert_eq!(sess.current_status(), T30Error::CannotTrain);
        assert_eq!(hdlc::masked_fcf(rec.borrow().sent.last().unwrap()), fcf::DCN);
    }

    #[test]
    fn good_non_ecm_page_triggers_mcf_and_iii_q_mcf() {
        let (mut sess, rec) = make_session();
        sess.restart(Role::Calling);
        sess.set_state(State::FDocNonEcm);
        sess.codec.quality = Some(PageQuality::Good);
        sess.front_end_status(FrontEndKind::ReceiveComplete);
        assert_eq!(sess.state(), State::FPostDocNonEcm);
        sess.hdlc_accept(&hdlc::simple_frame(fcf::EOP, false), true);
        assert_eq!(sess.state(), State::IiiQMcf);
        assert_eq!(hdlc::masked_fcf(rec.borrow().sent.last().unwrap()), fcf::MCF);
        assert_eq!(sess.hooks.phase_d_calls, vec![T30Error::Ok]);
    }

    #[test]
    fn phase_e_is_invoked_exactly_once() {
        let (mut sess, _rec) = make_session();
        sess.restart(Role::Answering);
        sess.disconnect(T30Error::Ok);
        sess.disconnect(T30Error::CallDropped);
        assert_eq!(sess.hooks.phase_e_calls, vec![T30Error::Ok]);
    }
}
