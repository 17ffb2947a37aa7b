//! Capability traits standing in for the external collaborators named in
//! §1: the modem layer, the HDLC transmit path, the page image codec,
//! and the call's phase-transition callbacks. A session is generic over
//! one implementation of each, rather than boxing them as trait objects,
//! so a test can supply zero-cost mocks and the compiler can inline
//! across the boundary — the same preference for concrete, inspectable
//! collaborators the teacher's wrapper types show over type erasure.

use crate::error::T30Error;
use crate::fallback::ModemKind;

/// Which modem mode a phase transition puts the line into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemType {
    /// V.21 300 bps FSK, used for every control-channel phase.
    V21,
    /// 1100 Hz calling tone (phase A, calling side transmit).
    Cng,
    /// 2100 Hz answer tone (phase A, answering side transmit).
    Ced,
    /// An image-channel modem at a specific fallback-table rate.
    Fallback(ModemKind),
}

/// Drives the voiceband modem layer: which modulation to listen with and
/// transmit with, whether a shortened training preamble is permitted,
/// and whether the channel should be framed as HDLC (control) or a raw
/// bit/byte stream (image data).
pub trait ModemControl {
    fn set_rx_type(&mut self, modem: ModemType, short_train: bool, use_hdlc: bool);
    fn set_tx_type(&mut self, modem: ModemType, short_train: bool, use_hdlc: bool);
}

/// The outgoing half of the HDLC control channel. Incoming frames arrive
/// through `T30Session::hdlc_accept`, not through this trait.
pub trait HdlcChannel {
    fn send_hdlc(&mut self, frame: &[u8]);
}

/// Coarse quality classification of a just-received page, driving the
/// non-ECM MCF/RTP/RTN decision in §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageQuality {
    Good,
    Poor,
    Bad,
}

/// The page image codec: a bit/byte/chunk source for transmit, sink for
/// receive, plus the whole-frame read/write pair ECM uses instead of a
/// bit stream, and the two document-handler questions ("how did the
/// last page look", "is there another page").
pub trait ImageCodec {
    /// Non-ECM receive: one decoded bit arriving from the image channel.
    fn put_bit(&mut self, bit: u8);
    /// Non-ECM receive: one decoded byte (used where the codec's own
    /// framing makes bit-at-a-time delivery unnecessary).
    fn put_byte(&mut self, byte: u8);
    /// Non-ECM receive: a chunk of already-assembled bytes.
    fn put_chunk(&mut self, data: &[u8]);

    /// Non-ECM transmit: the next bit to put on the line, or `None` once
    /// the page is exhausted.
    fn get_bit(&mut self) -> Option<u8>;
    /// Non-ECM transmit: the next byte, or `None` at page end.
    fn get_byte(&mut self) -> Option<u8>;
    /// Non-ECM transmit: fill `buf` with up to its length; returns the
    /// number of bytes actually written. A short write (less than
    /// `buf.len()`) signals page end, mirroring the fill-for-transmit
    /// short-read contract in §4.4.
    fn get_chunk(&mut self, buf: &mut [u8]) -> usize;

    /// ECM transmit: the next frame payload of up to `max_len` octets,
    /// or `None` once the page is exhausted. A payload shorter than
    /// `max_len` is the final frame of the page.
    fn read_frame(&mut self, max_len: usize) -> Option<Vec<u8>>;
    /// ECM receive: one reassembled frame payload, delivered in block
    /// order once a block is fully committed.
    fn write_frame(&mut self, payload: &[u8]);

    /// Bad-row/total-row classification of the page just finished
    /// receiving (non-ECM) or committing (ECM).
    fn end_of_page_stats(&self) -> PageQuality;
    /// `true` if the document handler has another page queued after the
    /// one just finished.
    fn has_more_pages(&self) -> bool;
}

/// User-facing phase-transition callbacks. `phase_b`/`phase_d` report a
/// provisional status at a sub-call boundary (capability exchange done,
/// one page done); `phase_e` reports the final call status exactly once,
/// per testable property 6.
pub trait PhaseHooks {
    fn phase_b(&mut self, status: T30Error);
    fn phase_d(&mut self, status: T30Error);
    fn phase_e(&mut self, status: T30Error);
}
