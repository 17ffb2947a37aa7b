//! Capability descriptor: DIS/DTC/DCS bit-field frames (T.30 Table 2).
//!
//! A capability frame is a variable-length bit string: an opcode octet
//! followed by up to sixteen data octets, each bit (or small bit-field)
//! meaning one optional feature. Bit numbering is 1-based and spans
//! octets, per T.30 §5.3: bit `N` lives at octet `3 + (N-1)/8`, position
//! `(N-1) % 8`, within a frame whose octet 0 is the HDLC address (0xFF),
//! octet 1 the control byte, and octet 2 the FCF (DIS/DTC/DCS).

use crate::error::{CapabilityError, CapabilityResult};
use crate::fallback::ModemKind;

/// Total octets in a maximally-extended DIS/DTC/DCS frame: 3 header
/// octets plus 16 data octets.
pub const MAX_FRAME_LEN: usize = 19;

/// Function control field values this module builds or parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Dis,
    Dtc,
    Dcs,
}

impl CapabilityKind {
    fn fcf(self) -> u8 {
        match self {
            CapabilityKind::Dis => crate::hdlc::fcf::DIS,
            CapabilityKind::Dtc => crate::hdlc::fcf::DTC,
            CapabilityKind::Dcs => crate::hdlc::fcf::DCS,
        }
    }
}

bitflags::bitflags! {
    /// Modem families a station offers or accepts, bits 11-14 plus the
    /// V.17-implies-others rule from the source (setting V17 forces the
    /// V29/V27ter bits too, since V.17 is only ever combined with them).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModemSupport: u8 {
        const V27TER = 0x01;
        const V29 = 0x02;
        const V17 = 0x04;
    }
}

bitflags::bitflags! {
    /// Compression schemes, bits 16/26/31/36/116.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Compressions: u8 {
        const T4_1D = 0x00; // implicit: absence of T4_2D/T6
        const T4_2D = 0x01;
        const UNCOMPRESSED = 0x02;
        const T6 = 0x04;
        const T43 = 0x08;
        const T45 = 0x10;
    }
}

bitflags::bitflags! {
    /// Resolution support, bits 15/41-43/105-109.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Resolutions: u16 {
        const FINE = 0x0001;
        const SUPERFINE = 0x0002;
        const R300_300 = 0x0004;
        const R400_400 = 0x0008;
        const R600_600 = 0x0010;
        const R1200_1200 = 0x0020;
        const R300_600 = 0x0040;
        const R400_800 = 0x0080;
        const R600_1200 = 0x0100;
    }
}

/// A parsed or to-be-built DIS/DTC/DCS parameter set — the "semantic
/// mapping" of spec.md §4.3, widened per SPEC_FULL.md to carry every
/// field the original encodes even where spec.md's selected-bit list
/// only names the common ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub t37_capable: bool,
    pub t38_capable: bool,
    pub ready_to_poll: bool,
    pub ready_to_receive: bool,
    pub modems: ModemSupport,
    pub resolutions: Resolutions,
    pub compressions: Compressions,
    pub width_255mm: bool,
    pub width_303mm: bool,
    pub length_b4: bool,
    pub length_unlimited: bool,
    pub min_scan_time_code: u8,
    pub ecm_capable: bool,
    /// `true` = 64-octet ECM frames, `false` = 256 (the default the
    /// source always offers, since 64 is never used in the real world).
    pub ecm_frame_size_64: bool,
    pub field_not_valid_supported: bool,
    pub selective_polling: bool,
    pub subaddressing: bool,
}

fn octet_for_bit(n: u32) -> usize {
    3 + ((n - 1) / 8) as usize
}

fn mask_for_bit(n: u32) -> u8 {
    1 << ((n - 1) % 8)
}

fn set_bit(frame: &mut [u8; MAX_FRAME_LEN], n: u32, value: bool) {
    let i = octet_for_bit(n);
    if value {
        frame[i] |= mask_for_bit(n);
    } else {
        frame[i] &= !mask_for_bit(n);
    }
}

fn get_bit(frame: &[u8], n: u32) -> bool {
    let i = octet_for_bit(n);
    i < frame.len() && frame[i] & mask_for_bit(n) != 0
}

/// Set a `width`-bit field starting at bit `n` (least significant bit
/// first), e.g. the 3-bit minimum-scan-time code at bits 21-23.
fn set_bits(frame: &mut [u8; MAX_FRAME_LEN], value: u8, n: u32, width: u32) {
    for k in 0..width {
        set_bit(frame, n + k, value & (1 << k) != 0);
    }
}

fn get_bits(frame: &[u8], n: u32, width: u32) -> u8 {
    let mut v = 0u8;
    for k in 0..width {
        if get_bit(frame, n + k) {
            v |= 1 << k;
        }
    }
    v
}

/// Build a DIS/DTC/DCS frame from a `Capabilities` value. Returns the
/// full 19-octet buffer (unpruned) plus the opcode's response bit,
/// mirroring `build_dis_or_dtc`/`build_dcs`: header `FF 13 <FCF|resp>`
/// followed by sixteen octets carrying the bit fields below.
pub fn build(kind: CapabilityKind, caps: &Capabilities, dis_received_bit: bool) -> [u8; MAX_FRAME_LEN] {
    let mut frame = [0u8; MAX_FRAME_LEN];
    frame[0] = crate::hdlc::ADDRESS;
    frame[1] = crate::hdlc::CONTROL_FINAL;
    frame[2] = kind.fcf() | (dis_received_bit as u8);

    set_bit(&mut frame, 1, caps.t37_capable);
    set_bit(&mut frame, 3, caps.t38_capable);
    set_bit(&mut frame, 9, caps.ready_to_poll);
    set_bit(&mut frame, 10, caps.ready_to_receive);
    set_bit(&mut frame, 12, caps.modems.contains(ModemSupport::V27TER));
    set_bit(&mut frame, 11, caps.modems.contains(ModemSupport::V29));
    if caps.modems.contains(ModemSupport::V17) {
        // V.17 is only ever offered alongside V.29 and V.27ter.
        set_bit(&mut frame, 12, true);
        set_bit(&mut frame, 11, true);
        set_bit(&mut frame, 14, true);
    }
    set_bit(&mut frame, 15, caps.resolutions.contains(Resolutions::FINE));
    set_bit(&mut frame, 16, caps.compressions.contains(Compressions::T4_2D));
    set_bit(&mut frame, 18, caps.width_303mm);
    if !caps.width_303mm {
        set_bit(&mut frame, 17, caps.width_255mm);
    }
    set_bit(&mut frame, 20, caps.length_unlimited);
    if !caps.length_unlimited {
        set_bit(&mut frame, 19, caps.length_b4);
    }
    set_bits(&mut frame, caps.min_scan_time_code & 0x7, 21, 3);
    set_bit(&mut frame, 26, caps.compressions.contains(Compressions::UNCOMPRESSED));
    if caps.ecm_capable {
        set_bit(&mut frame, 27, true);
        set_bit(&mut frame, 28, caps.ecm_frame_size_64);
        set_bit(&mut frame, 31, caps.compressions.contains(Compressions::T6));
        set_bit(&mut frame, 36, caps.compressions.contains(Compressions::T43));
        set_bit(&mut frame, 116, caps.compressions.contains(Compressions::T45));
    }
    set_bit(&mut frame, 33, caps.field_not_valid_supported);
    set_bit(&mut frame, 34, caps.selective_polling);
    set_bit(&mut frame, 35, caps.subaddressing);
    set_bit(&mut frame, 41, caps.resolutions.contains(Resolutions::SUPERFINE));
    set_bit(&mut frame, 42, caps.resolutions.contains(Resolutions::R300_300));
    set_bit(
        &mut frame,
        43,
        caps.resolutions.contains(Resolutions::R400_400),
    );
    set_bit(&mut frame, 45, true); // metric units, always on per the source
    set_bit(
        &mut frame,
        105,
        caps.resolutions.contains(Resolutions::R600_600),
    );
    set_bit(
        &mut frame,
        106,
        caps.resolutions.contains(Resolutions::R1200_1200),
    );
    set_bit(
        &mut frame,
        107,
        caps.resolutions.contains(Resolutions::R300_600),
    );
    set_bit(
        &mut frame,
        108,
        caps.resolutions.contains(Resolutions::R400_800),
    );
    set_bit(
        &mut frame,
        109,
        caps.resolutions.contains(Resolutions::R600_1200),
    );
    frame
}

/// Prune a built frame: scan from octet 18 down to 4, masking off each
/// octet's extension bit, and stop at the last octet with real content.
/// Rewrite extension bits (bit 8, 0x80) on every non-final octet from
/// there down to octet 5; octet 4 (bits 9-16, including bit 16's T.4
/// 2-D coding flag) is never extension-flagged, matching
/// `original_source/t30.c`'s prune loop. Returns the pruned length.
pub fn prune(frame: &mut [u8; MAX_FRAME_LEN]) -> usize {
    let mut i = 18usize;
    while i > 4 {
        frame[i] &= 0x7F;
        if frame[i] != 0 {
            break;
        }
        i -= 1;
    }
    let len = i + 1;
    let mut j = i;
    while j > 5 {
        j -= 1;
        frame[j] |= 0x80;
    }
    len
}

/// Parse a received DIS/DTC/DCS frame (any length ≥ 6) into a
/// `Capabilities` value. The message is treated as zero-padded to
/// `MAX_FRAME_LEN` so every bit position can be read uniformly, per
/// spec.md §4.3's parse contract.
pub fn parse(msg: &[u8]) -> CapabilityResult<Capabilities> {
    if msg.len() < 6 {
        return Err(CapabilityError::TooShort(msg.len()));
    }
    let fcf = crate::hdlc::masked_fcf(msg);
    if fcf != crate::hdlc::fcf::DIS && fcf != crate::hdlc::fcf::DTC && fcf != crate::hdlc::fcf::DCS {
        return Err(CapabilityError::WrongFrameType(msg[2]));
    }

    let mut modems = ModemSupport::empty();
    modems.set(ModemSupport::V27TER, get_bit(msg, 12));
    modems.set(ModemSupport::V29, get_bit(msg, 11));
    modems.set(ModemSupport::V17, get_bit(msg, 14));

    let mut resolutions = Resolutions::empty();
    resolutions.set(Resolutions::FINE, get_bit(msg, 15));
    resolutions.set(Resolutions::SUPERFINE, get_bit(msg, 41));
    resolutions.set(Resolutions::R300_300, get_bit(msg, 42));
    resolutions.set(Resolutions::R400_400, get_bit(msg, 43));
    resolutions.set(Resolutions::R600_600, get_bit(msg, 105));
    resolutions.set(Resolutions::R1200_1200, get_bit(msg, 106));
    resolutions.set(Resolutions::R300_600, get_bit(msg, 107));
    resolutions.set(Resolutions::R400_800, get_bit(msg, 108));
    resolutions.set(Resolutions::R600_1200, get_bit(msg, 109));

    let mut compressions = Compressions::empty();
    compressions.set(Compressions::T4_2D, get_bit(msg, 16));
    compressions.set(Compressions::UNCOMPRESSED, get_bit(msg, 26));
    compressions.set(Compressions::T6, get_bit(msg, 31));
    compressions.set(Compressions::T43, get_bit(msg, 36));
    compressions.set(Compressions::T45, get_bit(msg, 116));

    Ok(Capabilities {
        t37_capable: get_bit(msg, 1),
        t38_capable: get_bit(msg, 3),
        ready_to_poll: get_bit(msg, 9),
        ready_to_receive: get_bit(msg, 10),
        modems,
        resolutions,
        compressions,
        width_255mm: get_bit(msg, 17),
        width_303mm: get_bit(msg, 18),
        length_b4: get_bit(msg, 19),
        length_unlimited: get_bit(msg, 20),
        min_scan_time_code: get_bits(msg, 21, 3),
        ecm_capable: get_bit(msg, 27),
        ecm_frame_size_64: get_bit(msg, 28),
        field_not_valid_supported: get_bit(msg, 33),
        selective_polling: get_bit(msg, 34),
        subaddressing: get_bit(msg, 35),
    })
}

/// Choose the highest (fastest) fallback-table entry whose modem bit is
/// present in both the remote's advertised `modems` and our own
/// `local_modems`, per spec.md §4.5's "highest fallback-table entry
/// whose `which` bit is in DIS and locally supported".
pub fn select_modem(modems: ModemSupport, local_modems: ModemSupport) -> Option<ModemKind> {
    let permitted = modems & local_modems;
    crate::fallback::FALLBACK_TABLE
        .iter()
        .find(|e| permitted.contains(e.requires))
        .map(|e| e.modem)
}

/// Millisecond durations for the 3-bit minimum-scan-time-code field
/// (bits 21-23), indexed by code 0-7, at normal (non-fine) resolution.
/// From `original_source/t30.c`'s scan-time translation table.
pub const MIN_SCAN_TIME_MS: [u32; 8] = [20, 5, 10, 0, 40, 0, 0, 0];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_bit_invariant_after_prune() {
        let caps = Capabilities {
            modems: ModemSupport::V27TER | ModemSupport::V29,
            resolutions: Resolutions::FINE,
            ecm_capable: true,
            ..Default::default()
        };
        let mut frame = build(CapabilityKind::Dis, &caps, false);
        let len = prune(&mut frame);
        for i in 5..len - 1 {
            assert_ne!(frame[i] & 0x80, 0, "octet {i} missing extension bit");
        }
        assert_eq!(frame[len - 1] & 0x80, 0, "final octet must not be extended");
    }

    #[test]
    fn round_trip_preserves_mapped_bits() {
        let caps = Capabilities {
            t38_capable: true,
            modems: ModemSupport::V17 | ModemSupport::V29 | ModemSupport::V27TER,
            resolutions: Resolutions::FINE | Resolutions::R600_600,
            compressions: Compressions::T4_2D | Compressions::T6,
            ecm_capable: true,
            min_scan_time_code: 5,
            ..Default::default()
        };
        let mut frame = build(CapabilityKind::Dis, &caps, false);
        let len = prune(&mut frame);
        let parsed = parse(&frame[..len]).unwrap();
        assert_eq!(parsed.t38_capable, caps.t38_capable);
        assert_eq!(parsed.modems, caps.modems);
        assert_eq!(parsed.resolutions, caps.resolutions);
        assert_eq!(parsed.ecm_capable, caps.ecm_capable);
        assert_eq!(parsed.min_scan_time_code, caps.min_scan_time_code);
    }

    #[test]
    fn parse_rejects_short_frame() {
        let msg = [0xFFu8, 0x13, 0x01, 0x00];
        assert!(matches!(parse(&msg), Err(CapabilityError::TooShort(4))));
    }

    #[test]
    fn select_modem_prefers_fastest_common_rate() {
        let remote = ModemSupport::V17 | ModemSupport::V29 | ModemSupport::V27TER;
        let local = ModemSupport::V29 | ModemSupport::V27TER;
        let chosen = select_modem(remote, local).unwrap();
        assert_eq!(chosen.bit_rate(), 9600);
    }
}
