//! A pure-Rust ITU-T T.30 Group 3 fax session engine.
//!
//! Covers the T.30 protocol state machine (capability negotiation,
//! trainability, page transfer acknowledgement, modem fallback, call
//! teardown), the Error-Correcting-Mode partial-page buffer, and the MF
//! tone detector used as an exemplar DSP receive path. The voiceband
//! modems, HDLC bit-level framing/FCS, the page image codec, and tone
//! generation are external collaborators, modelled here as traits
//! (`traits`) rather than implemented.

pub mod capability;
pub mod ecm;
pub mod error;
pub mod fallback;
pub mod goertzel;
pub mod hdlc;
pub mod logging;
pub mod mf;
pub mod t30;
pub mod timer;
pub mod traits;

pub use error::{CapabilityError, CapabilityResult, T30Error};
pub use t30::{DocumentProfile, FrontEndKind, Phase, Role, State, T30Config, T30Session};
pub use traits::{HdlcChannel, ImageCodec, ModemControl, ModemType, PageQuality, PhaseHooks};
