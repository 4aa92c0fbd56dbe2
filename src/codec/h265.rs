use bytes::Bytes;

/// Access Unit Delimiter for H.265, including its 4-byte start code
pub const AUD: [u8; 7] = [0x00, 0x00, 0x00, 0x01, 0x46, 0x01, 0x50];

/// H.265 NAL unit types (6-bit field in the two-byte NAL header)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NaluType {
    /// Trailing picture slice (TRAIL_N / TRAIL_R)
    Trail,
    /// Broken link access picture (BLA_W_LP .. BLA_N_LP)
    Bla,
    /// Instantaneous decoder refresh picture (IDR_W_RADL / IDR_N_LP)
    Idr,
    /// Clean random access picture
    Cra,
    /// Video parameter set
    Vps,
    /// Sequence parameter set
    Sps,
    /// Picture parameter set
    Pps,
    /// Access unit delimiter
    AccessUnitDelimiter,
    /// SEI message (prefix or suffix)
    Sei,
    /// Any other or unknown type
    Other(u8),
}

impl NaluType {
    /// Classifies a NAL unit from its first header byte
    pub fn from_header(byte: u8) -> Self {
        match (byte >> 1) & 0x3F {
            0 | 1 => NaluType::Trail,
            16..=18 => NaluType::Bla,
            19 | 20 => NaluType::Idr,
            21 => NaluType::Cra,
            32 => NaluType::Vps,
            33 => NaluType::Sps,
            34 => NaluType::Pps,
            35 => NaluType::AccessUnitDelimiter,
            39 | 40 => NaluType::Sei,
            other => NaluType::Other(other),
        }
    }
}

/// Returns the type of the NAL unit at the head of `nalu`
pub fn nalu_type(nalu: &[u8]) -> Option<NaluType> {
    nalu.first().map(|b| NaluType::from_header(*b))
}

/// True when the NAL unit is an intra random access point (IDR, BLA or CRA)
pub fn is_keyframe(nalu: &[u8]) -> bool {
    matches!(
        nalu_type(nalu),
        Some(NaluType::Idr) | Some(NaluType::Bla) | Some(NaluType::Cra)
    )
}

/// True for NAL units that carry codec configuration rather than picture data
pub fn is_parameter_set(nalu: &[u8]) -> bool {
    matches!(
        nalu_type(nalu),
        Some(NaluType::Vps) | Some(NaluType::Sps) | Some(NaluType::Pps)
    )
}

/// Picks VPS, SPS and PPS payloads out of a NAL unit list
pub fn extract_parameter_sets(nalus: &[Bytes]) -> (Option<Bytes>, Option<Bytes>, Option<Bytes>) {
    let mut vps = None;
    let mut sps = None;
    let mut pps = None;
    for nalu in nalus {
        match nalu_type(nalu) {
            Some(NaluType::Vps) if vps.is_none() => vps = Some(nalu.clone()),
            Some(NaluType::Sps) if sps.is_none() => sps = Some(nalu.clone()),
            Some(NaluType::Pps) if pps.is_none() => pps = Some(nalu.clone()),
            _ => {}
        }
    }
    (vps, sps, pps)
}
