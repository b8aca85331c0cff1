use crate::error::{BridgeError, Result};

use super::types::{NALUnitType, SPSInfo};
use crate::utils::bits::BitReader;

/// Parser for the H.265 parameter sets the bridge needs to inspect.
///
/// Only the sequence parameter set is decoded: its geometry is logged when a
/// stream starts and its reorder depth primes the decode timestamp estimator.
#[derive(Debug, Default)]
pub struct H265Parser {
    buffer: Vec<u8>,
}

impl H265Parser {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Removes emulation prevention bytes (the 0x03 in 0x000003).
    pub fn remove_emulation_prevention(&mut self, data: &[u8]) -> Vec<u8> {
        self.buffer.clear();
        let mut zeros = 0;

        for &byte in data {
            if zeros >= 2 && byte == 0x03 {
                zeros = 0;
                continue;
            }
            zeros = if byte == 0x00 { zeros + 1 } else { 0 };
            self.buffer.push(byte);
        }

        self.buffer.clone()
    }

    /// Parses a complete SPS NAL unit, including its two byte header.
    pub fn parse_sps(&mut self, nalu: &[u8]) -> Result<SPSInfo> {
        if nalu.len() < 3 {
            return Err(BridgeError::Parser("SPS too short".into()));
        }
        if NALUnitType::from_header(nalu[0]) != NALUnitType::Sps {
            return Err(BridgeError::Parser("not an SPS NAL unit".into()));
        }

        let rbsp = self.remove_emulation_prevention(&nalu[2..]);
        let mut reader = BitReader::new(&rbsp);
        let mut sps = SPSInfo {
            vps_id: reader.read_bits(4)? as u8,
            max_sub_layers_minus1: reader.read_bits(3)? as u8,
            ..Default::default()
        };
        reader.skip_bits(1)?; // sps_temporal_id_nesting_flag

        let (profile_idc, level_idc) =
            parse_profile_tier_level(&mut reader, sps.max_sub_layers_minus1)?;
        sps.profile_idc = profile_idc;
        sps.level_idc = level_idc;

        sps.sps_id = reader.read_golomb()?;
        sps.chroma_format_idc = reader.read_golomb()?;
        if sps.chroma_format_idc == 3 {
            reader.skip_bits(1)?; // separate_colour_plane_flag
        }

        sps.pic_width_in_luma_samples = reader.read_golomb()?;
        sps.pic_height_in_luma_samples = reader.read_golomb()?;

        if reader.read_bit()? {
            sps.conf_win_left_offset = reader.read_golomb()?;
            sps.conf_win_right_offset = reader.read_golomb()?;
            sps.conf_win_top_offset = reader.read_golomb()?;
            sps.conf_win_bottom_offset = reader.read_golomb()?;
        }

        reader.read_golomb()?; // bit_depth_luma_minus8
        reader.read_golomb()?; // bit_depth_chroma_minus8
        reader.read_golomb()?; // log2_max_pic_order_cnt_lsb_minus4

        let ordering_info_present = reader.read_bit()?;
        let first = if ordering_info_present {
            0
        } else {
            sps.max_sub_layers_minus1
        };
        for _ in first..=sps.max_sub_layers_minus1 {
            reader.read_golomb()?; // sps_max_dec_pic_buffering_minus1
            sps.max_num_reorder_pics = reader.read_golomb()?;
            reader.read_golomb()?; // sps_max_latency_increase_plus1
        }

        Ok(sps)
    }
}

/// Reads profile_tier_level(1, max_sub_layers_minus1) and returns
/// (general_profile_idc, general_level_idc).
fn parse_profile_tier_level(reader: &mut BitReader, max_sub_layers_minus1: u8) -> Result<(u8, u8)> {
    reader.skip_bits(3)?; // general_profile_space, general_tier_flag
    let profile_idc = reader.read_bits(5)? as u8;
    reader.skip_bits(32)?; // general_profile_compatibility_flags
    reader.skip_bits(48)?; // source flags, constraint flags, inbld/reserved
    let level_idc = reader.read_bits(8)? as u8;

    let mut sub_layers = Vec::with_capacity(max_sub_layers_minus1 as usize);
    for _ in 0..max_sub_layers_minus1 {
        let profile_present = reader.read_bit()?;
        let level_present = reader.read_bit()?;
        sub_layers.push((profile_present, level_present));
    }
    if max_sub_layers_minus1 > 0 {
        reader.skip_bits(2 * (8 - max_sub_layers_minus1 as u32))?;
    }
    for (profile_present, level_present) in sub_layers {
        if profile_present {
            reader.skip_bits(88)?;
        }
        if level_present {
            reader.skip_bits(8)?;
        }
    }

    Ok((profile_idc, level_idc))
}
