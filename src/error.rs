//! Error types for the T.30 engine.

/// Final status of a T.30 call, delivered to the phase-E callback exactly
/// once per call. Mirrors the `t30_err_e` taxonomy, but as first-class
/// variants rather than a wrapped numeric code, since there is no FFI
/// boundary whose raw value needs preserving across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum T30Error {
    /// The call completed successfully.
    #[error("OK")]
    Ok,

    // --- setup ---
    #[error("CED tone detected where none was expected")]
    CedTone,
    #[error("T0 timer expired waiting for the far end to answer")]
    T0Expired,
    #[error("T1 timer expired waiting for identification")]
    T1Expired,
    #[error("HDLC carrier lost")]
    HdlcCarrier,

    // --- negotiation ---
    #[error("cannot train modem at any supported rate")]
    CannotTrain,
    #[error("incompatible remote capabilities")]
    Incompatible,
    #[error("remote station cannot receive")]
    RxIncapable,
    #[error("remote station cannot transmit")]
    TxIncapable,
    #[error("no compatible resolution")]
    NoResSupport,
    #[error("no compatible page size")]
    NoSizeSupport,

    // --- transmit ---
    #[error("bad DCS received while transmitting")]
    TxBadDcs,
    #[error("bad page acknowledgement received while transmitting")]
    TxBadPg,
    #[error("ECM page error while transmitting")]
    TxEcmPhd,
    #[error("DCN received while transmitting")]
    TxGotDcn,
    #[error("invalid response received while transmitting")]
    TxInvalRsp,
    #[error("no DIS received")]
    TxNoDis,
    #[error("phase B dead while transmitting")]
    TxPhbDead,
    #[error("phase D dead while transmitting")]
    TxPhdDead,
    #[error("T5 timer expired while transmitting")]
    TxT5Exp,

    // --- receive ---
    #[error("ECM page error while receiving")]
    RxEcmPhd,
    #[error("unexpected DCS received while receiving")]
    RxGotDcs,
    #[error("invalid command received while receiving")]
    RxInvalCmd,
    #[error("no carrier detected while receiving")]
    RxNoCarrier,
    #[error("no end-of-line found while receiving")]
    RxNoEol,
    #[error("no fax signal detected")]
    RxNoFax,
    #[error("T2 expired, DCN received")]
    T2ExpDcnRx,
    #[error("T2 expired in phase D")]
    T2ExpDRx,
    #[error("T2 expired waiting for a fax signal")]
    T2ExpFaxRx,
    #[error("T2 expired waiting for MPS")]
    T2ExpMpsRx,
    #[error("T2 expired waiting for RR")]
    T2ExpRrRx,
    #[error("T2 expired")]
    T2ExpRx,
    #[error("DCN received unexpectedly")]
    DcnWhyRx,
    #[error("DCN received during data transfer")]
    DcnDataRx,
    #[error("DCN received during fax transfer")]
    DcnFaxRx,
    #[error("DCN received during phase D")]
    DcnPhdRx,
    #[error("DCN received awaiting RR/RNR resolution")]
    DcnRrdRx,
    #[error("DCN received, no retrain possible")]
    DcnNoRtnRx,
    #[error("T3 timer expired")]
    T3Expired,

    // --- file / protocol ---
    #[error("file I/O error")]
    FileError,
    #[error("no page available to send")]
    NoPage,
    #[error("bad TIFF page data")]
    BadTiff,
    #[error("bad page content")]
    BadPage,
    #[error("bad TIFF tag")]
    BadTag,
    #[error("bad TIFF header")]
    BadTiffHdr,
    #[error("no data available")]
    NoData,
    #[error("out of memory")]
    NoMem,
    #[error("polling not permitted")]
    NoPoll,
    #[error("retries exhausted, disconnecting")]
    RetryDcn,
    #[error("call dropped prematurely")]
    CallDropped,
    #[error("unexpected frame received")]
    Unexpected,
}

impl T30Error {
    /// `true` for the single successful-completion variant.
    pub fn is_ok(self) -> bool {
        matches!(self, T30Error::Ok)
    }
}

/// Errors from parsing or building a capability descriptor (DIS/DTC/DCS)
/// outside the lifetime of any particular call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum CapabilityError {
    /// The frame is shorter than the minimum six octets T.30 requires.
    #[error("capability frame too short: {0} octets")]
    TooShort(usize),
    /// The frame's opcode octet is not DIS, DTC, or DCS.
    #[error("not a capability frame: FCF {0:#04x}")]
    WrongFrameType(u8),
}

/// Convenience `Result` alias for capability parsing.
pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;
