//! End-to-end loopback test: two `T30Session`s, one calling and one
//! answering, wired together by hand-feeding each side's outgoing HDLC
//! frames into the other's `hdlc_accept`. Exercises the literal
//! "minimum call" scenario from spec.md §8 scenario A: DIS -> DCS @
//! 9600 V.29, TCF, CFR, one good-quality page, MCF, EOP, DCN.

use std::cell::RefCell;
use std::rc::Rc;

use t30engine::capability::{Compressions, ModemSupport, Resolutions};
use t30engine::hdlc;
use t30engine::{
    FrontEndKind, HdlcChannel, ImageCodec, ModemControl, ModemType, PageQuality, PhaseHooks,
    Role, State, T30Config, T30Error, T30Session,
};

#[derive(Default)]
struct NullModem;
impl ModemControl for NullModem {
    fn set_rx_type(&mut self, _modem: ModemType, _short_train: bool, _use_hdlc: bool) {}
    fn set_tx_type(&mut self, _modem: ModemType, _short_train: bool, _use_hdlc: bool) {}
}

#[derive(Default, Clone)]
struct Outbox(Rc<RefCell<Vec<Vec<u8>>>>);
impl Outbox {
    fn last(&self) -> Vec<u8> {
        self.0.borrow().last().expect("nothing sent yet").clone()
    }
}
impl HdlcChannel for Outbox {
    fn send_hdlc(&mut self, frame: &[u8]) {
        self.0.borrow_mut().push(frame.to_vec());
    }
}

struct GoodPageCodec {
    more_pages: bool,
}
impl ImageCodec for GoodPageCodec {
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
    fn read_frame(&mut self, _max_len: usize) -> Option<Vec<u8>> {
        None
    }
    fn write_frame(&mut self, _payload: &[u8]) {}
    fn end_of_page_stats(&self) -> PageQuality {
        PageQuality::Good
    }
    fn has_more_pages(&self) -> bool {
        self.more_pages
    }
}

#[derive(Default, Clone)]
struct HookLog {
    phase_b: Rc<RefCell<Vec<T30Error>>>,
    phase_d: Rc<RefCell<Vec<T30Error>>>,
    phase_e: Rc<RefCell<Vec<T30Error>>>,
}
impl PhaseHooks for HookLog {
    fn phase_b(&mut self, status: T30Error) {
        self.phase_b.borrow_mut().push(status);
    }
    fn phase_d(&mut self, status: T30Error) {
        self.phase_d.borrow_mut().push(status);
    }
    fn phase_e(&mut self, status: T30Error) {
        self.phase_e.borrow_mut().push(status);
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn v29_only_config() -> T30Config {
    T30Config {
        supported_modems: ModemSupport::V29,
        supported_resolutions: Resolutions::FINE,
        supported_compressions: Compressions::T4_2D,
        ecm_enabled: false,
        ..T30Config::default()
    }
}

#[test]
fn minimum_non_ecm_call_completes_both_sides() {
    init_logging();

    let answerer_out = Outbox::default();
    let answerer_hooks = HookLog::default();
    let mut answerer = T30Session::new(
        v29_only_config(),
        NullModem,
        answerer_out.clone(),
        GoodPageCodec { more_pages: false },
        answerer_hooks.clone(),
    );

    let caller_out = Outbox::default();
    let caller_hooks = HookLog::default();
    let mut caller = T30Session::new(
        v29_only_config(),
        NullModem,
        caller_out.clone(),
        GoodPageCodec { more_pages: false },
        caller_hooks.clone(),
    );

    // Phase A/B: answerer sends DIS, caller replies DCS at the only
    // mutually supported rate (V.29 9600, per the fallback table with
    // both sides restricted to V.29).
    answerer.restart(Role::Answering);
    assert_eq!(answerer.state(), State::R);
    let dis_frame = answerer_out.last();
    assert_eq!(hdlc::masked_fcf(&dis_frame), hdlc::fcf::DIS);

    caller.restart(Role::Calling);
    caller.hdlc_accept(&dis_frame, true);
    assert_eq!(caller.state(), State::DTcf);
    assert_eq!(caller_hooks.phase_b.borrow().as_slice(), [T30Error::Ok]);
    let dcs_frame = caller_out.last();
    assert_eq!(hdlc::masked_fcf(&dcs_frame), hdlc::fcf::DCS);

    answerer.hdlc_accept(&dcs_frame, true);
    assert_eq!(answerer.state(), State::FTcf);
    assert_eq!(answerer_hooks.phase_b.borrow().as_slice(), [T30Error::Ok]);

    // Caller finishes sending the 1.5s TCF zero run and switches its
    // receiver back to V.21 to listen for CFR/FTT.
    caller.front_end_status(FrontEndKind::SendComplete);
    assert_eq!(caller.state(), State::DPostTcf);

    // TCF: a full 1.5s-at-9600bps zero run trains successfully.
    answerer.tcf_result(9600);
    assert_eq!(answerer.state(), State::FCfr);
    let cfr_frame = answerer_out.last();
    assert_eq!(hdlc::masked_fcf(&cfr_frame), hdlc::fcf::CFR);

    caller.hdlc_accept(&cfr_frame, true);
    assert_eq!(caller.state(), State::I);

    // Phase C: caller sends the page, answerer receives it cleanly.
    caller.front_end_status(FrontEndKind::SendComplete);
    assert_eq!(caller.state(), State::Ii);
    caller.front_end_status(FrontEndKind::SignalAbsent);
    assert_eq!(caller.state(), State::IiQ);
    let eop_frame = caller_out.last();
    assert_eq!(hdlc::masked_fcf(&eop_frame), hdlc::fcf::EOP);

    answerer.front_end_status(FrontEndKind::SignalPresent);
    assert_eq!(answerer.state(), State::FDocNonEcm);
    answerer.front_end_status(FrontEndKind::ReceiveComplete);
    assert_eq!(answerer.state(), State::FPostDocNonEcm);

    // Phase D: answerer acknowledges, caller tears down.
    answerer.hdlc_accept(&eop_frame, true);
    assert_eq!(answerer.state(), State::IiiQMcf);
    assert_eq!(answerer_hooks.phase_d.borrow().as_slice(), [T30Error::Ok]);
    let mcf_frame = answerer_out.last();
    assert_eq!(hdlc::masked_fcf(&mcf_frame), hdlc::fcf::MCF);

    caller.hdlc_accept(&mcf_frame, true);
    assert_eq!(caller.state(), State::CallFinished);
    assert_eq!(caller.current_status(), T30Error::Ok);
    assert_eq!(caller_hooks.phase_e.borrow().as_slice(), [T30Error::Ok]);
    let dcn_frame = caller_out.last();
    assert_eq!(hdlc::masked_fcf(&dcn_frame), hdlc::fcf::DCN);

    // Phase E: the answerer tears down on the inbound DCN too, and the
    // phase-E callback fires exactly once on each side (testable
    // property 6 of spec.md §8).
    answerer.hdlc_accept(&dcn_frame, true);
    assert_eq!(answerer.state(), State::CallFinished);
    assert_eq!(answerer_hooks.phase_e.borrow().len(), 1);
}
