//! ECM (Error Correcting Mode) partial-page buffer.
//!
//! Holds up to 256 fixed-size frames of one block's image data. Slot
//! presence is modelled as `Option<EcmFrame>` rather than the source's
//! sentinel `length == -1`, per the redesign note in spec.md §9 — this
//! also removes the signed/unsigned hazard around the 0xFF
//! frames-in-burst wire encoding.

/// One ECM frame: the FCD opcode and sequence byte are implicit in the
/// slot index; only the image payload is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcmFrame {
    pub payload: Vec<u8>,
}

/// Fixed-size payload per ECM frame, negotiated as 64 or 256 octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    Octets64,
    Octets256,
}

impl FrameSize {
    pub fn len(self) -> usize {
        match self {
            FrameSize::Octets64 => 64,
            FrameSize::Octets256 => 256,
        }
    }
}

/// What a completed burst should request next, carried in the PPS fcf2
/// field: the current page continues (`Null`), or a post-page signal
/// (MPS/EOM/EOP, possibly procedure-interrupt-prefixed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostPageSignal {
    Null,
    Mps,
    Eom,
    Eop,
    PriMps,
    PriEom,
    PriEop,
}

/// Wire-level PPS fields, per spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpsFrame {
    pub signal: PostPageSignal,
    pub page: u8,
    pub block: u8,
    /// Count of frames sent in the burst, already decremented by one for
    /// the wire encoding (0xFF when the burst held zero frames).
    pub frames_in_burst_minus_one: u8,
}

/// The 256-slot partial-page buffer shared by sender and receiver.
#[derive(Debug)]
pub struct EcmBuffer {
    slots: Vec<Option<EcmFrame>>,
    frame_size: FrameSize,
    pub page: u8,
    pub block: u8,
    /// Number of slots actually in use in the current burst (sender) or
    /// expected in the current burst (receiver, set on PPS receipt).
    pub frame_count: usize,
    /// `true` once the codec has signalled page end while filling this
    /// buffer (sender side).
    pub page_ended: bool,
}

impl EcmBuffer {
    pub fn new(frame_size: FrameSize) -> Self {
        Self {
            slots: vec![None; 256],
            frame_size,
            page: 0,
            block: 0,
            frame_count: 0,
            page_ended: false,
        }
    }

    pub fn frame_size(&self) -> FrameSize {
        self.frame_size
    }

    /// Clear every slot (all absent) and advance the block counter. Used
    /// after a commit-on-receive or after a fully-acknowledged send burst.
    pub fn clear_for_next_block(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.block = self.block.wrapping_add(1);
        self.frame_count = 0;
        self.page_ended = false;
    }

    /// Fill-for-transmit: read frames from `source` (a closure returning
    /// `Some(bytes)` per row/chunk, `None` on short read/page end) until
    /// either 256 slots are full or the source signals end of page. The
    /// last frame is zero-padded to the full frame size on short read.
    pub fn fill_for_transmit<F>(&mut self, mut source: F)
    where
        F: FnMut() -> Option<Vec<u8>>,
    {
        let len = self.frame_size.len();
        let mut i = 0;
        while i < 256 {
            match source() {
                Some(mut payload) => {
                    if payload.len() < len {
                        payload.resize(len, 0);
                        self.slots[i] = Some(EcmFrame { payload });
                        self.frame_count = i + 1;
                        self.page_ended = true;
                        return;
                    }
                    payload.truncate(len);
                    self.slots[i] = Some(EcmFrame { payload });
                    i += 1;
                }
                None => {
                    self.frame_count = i;
                    self.page_ended = true;
                    return;
                }
            }
        }
        self.frame_count = 256;
    }

    /// Send-burst: collect `(seq, payload)` pairs, in ascending slot
    /// order, for every occupied slot — the caller is responsible for
    /// wrapping each into an `FF 03 FCD <seq>` frame and appending the
    /// three RCP sentinels before the PPS control frame.
    pub fn burst_frames(&self) -> Vec<(u8, &[u8])> {
        self.slots
            .iter()
            .enumerate()
            .take(self.frame_count)
            .filter_map(|(i, slot)| slot.as_ref().map(|f| (i as u8, f.payload.as_slice())))
            .collect()
    }

    /// Build the PPS frame describing the burst just sent (or about to
    /// be sent), per spec.md §4.4 and §6's wire format.
    pub fn build_pps(&self, signal: PostPageSignal) -> PpsFrame {
        let count = self.burst_frames().len();
        PpsFrame {
            signal,
            page: self.page,
            block: self.block,
            frames_in_burst_minus_one: if count == 0 {
                0xFF
            } else {
                (count - 1) as u8
            },
        }
    }

    /// PPR handling: clear (set absent) every slot whose bit in `bitmap`
    /// is zero; retain every slot whose bit is one. `bitmap` is the
    /// 32-octet bad-frame bitmap (1 = resend).
    pub fn apply_ppr(&mut self, bitmap: &[u8; 32]) {
        for i in 0..self.frame_count {
            let bit_set = bitmap[i / 8] & (1 << (i % 8)) != 0;
            if !bit_set {
                self.slots[i] = None;
            }
        }
    }

    /// Number of slots still occupied (pending retransmission) after a
    /// PPR has been applied.
    pub fn pending_count(&self) -> usize {
        self.slots[..self.frame_count]
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    // --- receive side ---

    /// Store an incoming FCD frame's payload at its sequence-number slot.
    /// Per spec.md's invariant, `seq` must equal the slot index it's
    /// stored at — the caller supplies `seq` as the frame's own payload
    /// byte 0, and this simply indexes by it.
    pub fn receive_fcd(&mut self, seq: u8, payload: Vec<u8>) {
        self.slots[seq as usize] = Some(EcmFrame { payload });
    }

    /// On PPS receipt: build the bad-frame bitmap of slots still absent
    /// up to `frame_count` (exclusive upper bound is the burst size just
    /// announced), and report whether any are missing.
    pub fn missing_bitmap(&self, frame_count: usize) -> ([u8; 32], bool) {
        let mut bitmap = [0u8; 32];
        let mut any_missing = false;
        for i in 0..frame_count {
            if self.slots[i].is_none() {
                bitmap[i / 8] |= 1 << (i % 8);
                any_missing = true;
            }
        }
        (bitmap, any_missing)
    }

    /// Commit-on-receive: feed every occupied slot's payload, in
    /// ascending order, to `sink`, then clear the buffer for the next
    /// block.
    pub fn commit_on_receive<F: FnMut(&[u8])>(&mut self, mut sink: F) {
        for slot in self.slots.iter().flatten() {
            sink(&slot.payload);
        }
        self.clear_for_next_block();
    }
}

/// Per-frame sequence invariant check (testable property 3): a present
/// slot's payload, if it carries the echoed sequence byte as its own
/// first octet (as FCD frames do on the wire), must agree with its slot
/// index. Image-only `EcmFrame`s stored via `receive_fcd`/`fill_for_transmit`
/// do not themselves carry that byte (it lives in the wire envelope
/// built by the caller); this helper is for wire-level round-trip tests.
pub fn wire_frame(seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(0xFF);
    frame.push(0x03);
    frame.push(super::hdlc::fcf::FCD);
    frame.push(seq);
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_for_transmit_pads_short_last_frame() {
        let mut buf = EcmBuffer::new(FrameSize::Octets256);
        let rows = vec![vec![1u8; 256], vec![2u8; 256], vec![3u8; 100]];
        let mut it = rows.into_iter();
        buf.fill_for_transmit(|| it.next());
        assert_eq!(buf.frame_count, 3);
        assert!(buf.page_ended);
        let frames = buf.burst_frames();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].1.len(), 256);
        assert!(frames[2].1[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn ppr_clears_acknowledged_slots_and_keeps_missing() {
        let mut buf = EcmBuffer::new(FrameSize::Octets256);
        let rows: Vec<_> = (0..5).map(|i| vec![i as u8; 10]).collect();
        let mut it = rows.into_iter();
        buf.fill_for_transmit(|| it.next());
        // pretend the source never signals short-read (full 256 burst not
        // reached); force a synthetic 5-frame burst for the test.
        buf.frame_count = 5;
        let mut bitmap = [0u8; 32];
        bitmap[0] = 0b00000100; // slot 2 missing (bit index 2)
        buf.apply_ppr(&bitmap);
        assert_eq!(buf.pending_count(), 1);
        assert!(buf.slots[2].is_some());
        assert!(buf.slots[0].is_none());
        assert!(buf.slots[1].is_none());
    }

    #[test]
    fn missing_bitmap_reports_gaps() {
        let mut buf = EcmBuffer::new(FrameSize::Octets256);
        buf.receive_fcd(0, vec![0; 10]);
        buf.receive_fcd(1, vec![1; 10]);
        // slot 2 never arrives
        let (bitmap, missing) = buf.missing_bitmap(3);
        assert!(missing);
        assert_eq!(bitmap[0] & 0b100, 0b100);
        assert_eq!(bitmap[0] & 0b011, 0);
    }

    #[test]
    fn commit_on_receive_delivers_in_order_and_clears() {
        let mut buf = EcmBuffer::new(FrameSize::Octets256);
        buf.receive_fcd(1, vec![2; 4]);
        buf.receive_fcd(0, vec![1; 4]);
        let mut delivered = Vec::new();
        buf.commit_on_receive(|p| delivered.push(p[0]));
        assert_eq!(delivered, vec![1, 2]);
        assert!(buf.slots.iter().all(|s| s.is_none()));
        assert_eq!(buf.block, 1);
    }

    #[test]
    fn pps_wraps_zero_count_to_0xff() {
        let buf = EcmBuffer::new(FrameSize::Octets256);
        let pps = buf.build_pps(PostPageSignal::Eop);
        assert_eq!(pps.frames_in_burst_minus_one, 0xFF);
    }
}
