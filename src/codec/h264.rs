use bytes::Bytes;

/// Access Unit Delimiter for H.264, including its 4-byte start code.
///
/// Prefixed to every video PES payload so downstream decoders can find
/// access-unit boundaries.
pub const AUD: [u8; 6] = [0x00, 0x00, 0x00, 0x01, 0x09, 0xF0];

/// H.264 NAL unit types
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NaluType {
    /// Coded slice of a non-IDR picture
    NonIdrSlice,
    /// Coded slice of an IDR picture
    IdrSlice,
    /// Supplemental enhancement information
    Sei,
    /// Sequence parameter set
    Sps,
    /// Picture parameter set
    Pps,
    /// Access unit delimiter
    AccessUnitDelimiter,
    /// Filler data
    FillerData,
    /// Any other or unknown type
    Other(u8),
}

impl NaluType {
    /// Classifies a NAL unit from its first payload byte
    pub fn from_header(byte: u8) -> Self {
        match byte & 0x1F {
            1 => NaluType::NonIdrSlice,
            5 => NaluType::IdrSlice,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::AccessUnitDelimiter,
            12 => NaluType::FillerData,
            other => NaluType::Other(other),
        }
    }
}

/// Returns the type of the NAL unit at the head of `nalu`
pub fn nalu_type(nalu: &[u8]) -> Option<NaluType> {
    nalu.first().map(|b| NaluType::from_header(*b))
}

/// True when the NAL unit is an IDR slice
pub fn is_keyframe(nalu: &[u8]) -> bool {
    matches!(nalu_type(nalu), Some(NaluType::IdrSlice))
}

/// True for NAL units that carry codec configuration rather than picture data
pub fn is_parameter_set(nalu: &[u8]) -> bool {
    matches!(nalu_type(nalu), Some(NaluType::Sps) | Some(NaluType::Pps))
}

/// Picks SPS and PPS payloads out of a NAL unit list
pub fn extract_parameter_sets(nalus: &[Bytes]) -> (Option<Bytes>, Option<Bytes>) {
    let mut sps = None;
    let mut pps = None;
    for nalu in nalus {
        match nalu_type(nalu) {
            Some(NaluType::Sps) if sps.is_none() => sps = Some(nalu.clone()),
            Some(NaluType::Pps) if pps.is_none() => pps = Some(nalu.clone()),
            _ => {}
        }
    }
    (sps, pps)
}
