use bytes::Bytes;

/// H.265 NAL unit types (ITU-T H.265 Table 7-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NALUnitType {
    TrailN,
    TrailR,
    TsaN,
    TsaR,
    StsaN,
    StsaR,
    RadlN,
    RadlR,
    RaslN,
    RaslR,
    BlaWLp,
    BlaWRadl,
    BlaNLp,
    IdrWRadl,
    IdrNLp,
    CraNut,
    Vps,
    Sps,
    Pps,
    Aud,
    Eos,
    Eob,
    Fd,
    PrefixSei,
    SuffixSei,
    /// Aggregation packet (RFC 7798)
    Ap,
    /// Fragmentation unit (RFC 7798)
    Fu,
    /// PACI packet (RFC 7798)
    Paci,
    Reserved(u8),
}

impl NALUnitType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => NALUnitType::TrailN,
            1 => NALUnitType::TrailR,
            2 => NALUnitType::TsaN,
            3 => NALUnitType::TsaR,
            4 => NALUnitType::StsaN,
            5 => NALUnitType::StsaR,
            6 => NALUnitType::RadlN,
            7 => NALUnitType::RadlR,
            8 => NALUnitType::RaslN,
            9 => NALUnitType::RaslR,
            16 => NALUnitType::BlaWLp,
            17 => NALUnitType::BlaWRadl,
            18 => NALUnitType::BlaNLp,
            19 => NALUnitType::IdrWRadl,
            20 => NALUnitType::IdrNLp,
            21 => NALUnitType::CraNut,
            32 => NALUnitType::Vps,
            33 => NALUnitType::Sps,
            34 => NALUnitType::Pps,
            35 => NALUnitType::Aud,
            36 => NALUnitType::Eos,
            37 => NALUnitType::Eob,
            38 => NALUnitType::Fd,
            39 => NALUnitType::PrefixSei,
            40 => NALUnitType::SuffixSei,
            48 => NALUnitType::Ap,
            49 => NALUnitType::Fu,
            50 => NALUnitType::Paci,
            other => NALUnitType::Reserved(other),
        }
    }

    /// Reads the type from the first byte of a NAL unit header.
    pub fn from_header(first_byte: u8) -> Self {
        Self::from_u8((first_byte >> 1) & 0x3F)
    }

    pub fn as_u8(self) -> u8 {
        match self {
            NALUnitType::TrailN => 0,
            NALUnitType::TrailR => 1,
            NALUnitType::TsaN => 2,
            NALUnitType::TsaR => 3,
            NALUnitType::StsaN => 4,
            NALUnitType::StsaR => 5,
            NALUnitType::RadlN => 6,
            NALUnitType::RadlR => 7,
            NALUnitType::RaslN => 8,
            NALUnitType::RaslR => 9,
            NALUnitType::BlaWLp => 16,
            NALUnitType::BlaWRadl => 17,
            NALUnitType::BlaNLp => 18,
            NALUnitType::IdrWRadl => 19,
            NALUnitType::IdrNLp => 20,
            NALUnitType::CraNut => 21,
            NALUnitType::Vps => 32,
            NALUnitType::Sps => 33,
            NALUnitType::Pps => 34,
            NALUnitType::Aud => 35,
            NALUnitType::Eos => 36,
            NALUnitType::Eob => 37,
            NALUnitType::Fd => 38,
            NALUnitType::PrefixSei => 39,
            NALUnitType::SuffixSei => 40,
            NALUnitType::Ap => 48,
            NALUnitType::Fu => 49,
            NALUnitType::Paci => 50,
            NALUnitType::Reserved(value) => value,
        }
    }

    /// Video coding layer NAL units carry slice data.
    pub fn is_vcl(self) -> bool {
        self.as_u8() < 32
    }

    pub fn is_idr(self) -> bool {
        matches!(self, NALUnitType::IdrWRadl | NALUnitType::IdrNLp)
    }

    /// Intra random access point: IDR, CRA or BLA.
    pub fn is_irap(self) -> bool {
        (16..=23).contains(&self.as_u8())
    }

    pub fn is_parameter_set(self) -> bool {
        matches!(self, NALUnitType::Vps | NALUnitType::Sps | NALUnitType::Pps)
    }
}

/// First header byte of an access unit delimiter.
pub const AUD_HEADER_BYTE: u8 = 35 << 1;

/// Access unit delimiter inserted in front of every muxed access unit:
/// nuh_layer_id 0, temporal id 1, pic_type 2 (I, P and B slices allowed).
pub const AUD_NALU: [u8; 3] = [AUD_HEADER_BYTE, 0x01, 0x50];

/// A NAL unit borrowed from an access unit.
#[derive(Debug, Clone, PartialEq)]
pub struct NALUnit {
    pub nal_type: NALUnitType,
    pub data: Bytes,
}

impl NALUnit {
    /// Returns `None` for an empty payload.
    pub fn new(data: Bytes) -> Option<Self> {
        let first = *data.first()?;
        Some(NALUnit {
            nal_type: NALUnitType::from_header(first),
            data,
        })
    }
}

/// Fields of a sequence parameter set needed by the bridge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SPSInfo {
    pub sps_id: u32,
    pub vps_id: u8,
    pub max_sub_layers_minus1: u8,
    pub profile_idc: u8,
    pub level_idc: u8,
    pub chroma_format_idc: u32,
    pub pic_width_in_luma_samples: u32,
    pub pic_height_in_luma_samples: u32,
    pub conf_win_left_offset: u32,
    pub conf_win_right_offset: u32,
    pub conf_win_top_offset: u32,
    pub conf_win_bottom_offset: u32,
    pub max_num_reorder_pics: u32,
}

impl SPSInfo {
    /// Display width after applying the conformance window.
    pub fn width(&self) -> u32 {
        let sub_width_c = if matches!(self.chroma_format_idc, 1 | 2) { 2 } else { 1 };
        self.pic_width_in_luma_samples.saturating_sub(
            sub_width_c * (self.conf_win_left_offset + self.conf_win_right_offset),
        )
    }

    /// Display height after applying the conformance window.
    pub fn height(&self) -> u32 {
        let sub_height_c = if self.chroma_format_idc == 1 { 2 } else { 1 };
        self.pic_height_in_luma_samples.saturating_sub(
            sub_height_c * (self.conf_win_top_offset + self.conf_win_bottom_offset),
        )
    }
}
