use bytes::Bytes;
use serde::Deserialize;

use super::types::NALUnitType;

/// Which intra pictures count as random access points.
///
/// `Strict` only accepts IDR pictures, which decode without any earlier
/// reference. `Permissive` also accepts CRA and BLA pictures, whose leading
/// pictures may be undecodable when playback starts there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RandomAccessPolicy {
    #[default]
    Strict,
    Permissive,
}

impl RandomAccessPolicy {
    pub fn is_random_access(self, nal_type: NALUnitType) -> bool {
        match self {
            RandomAccessPolicy::Strict => nal_type.is_idr(),
            RandomAccessPolicy::Permissive => nal_type.is_irap(),
        }
    }
}

impl std::str::FromStr for RandomAccessPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(RandomAccessPolicy::Strict),
            "permissive" => Ok(RandomAccessPolicy::Permissive),
            other => Err(format!("unknown random access policy '{}'", other)),
        }
    }
}

/// The most recent VPS, SPS and PPS seen on a stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSetCache {
    pub vps: Option<Bytes>,
    pub sps: Option<Bytes>,
    pub pps: Option<Bytes>,
}

impl ParameterSetCache {
    pub fn new(vps: Option<Bytes>, sps: Option<Bytes>, pps: Option<Bytes>) -> Self {
        Self { vps, sps, pps }
    }

    /// Collects the parameter sets contained in an access unit.
    pub fn from_access_unit(au: &[Bytes]) -> Self {
        let mut cache = Self::default();
        for nalu in au {
            cache.update(nalu);
        }
        cache
    }

    /// Stores `nalu` if it is a parameter set. Returns whether it was one.
    pub fn update(&mut self, nalu: &Bytes) -> bool {
        let Some(&first) = nalu.first() else {
            return false;
        };
        let slot = match NALUnitType::from_header(first) {
            NALUnitType::Vps => &mut self.vps,
            NALUnitType::Sps => &mut self.sps,
            NALUnitType::Pps => &mut self.pps,
            _ => return false,
        };
        if slot.as_ref() != Some(nalu) {
            *slot = Some(nalu.clone());
        }
        true
    }

    pub fn is_complete(&self) -> bool {
        self.vps.is_some() && self.sps.is_some() && self.pps.is_some()
    }

    /// VPS, SPS, PPS in decoding order, skipping missing ones.
    pub fn to_nalus(&self) -> Vec<Bytes> {
        [&self.vps, &self.sps, &self.pps]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }
}

/// Result of classifying one access unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Nothing left after removing parameter sets and delimiters.
    Drop,
    Picture(ClassifiedAccessUnit),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedAccessUnit {
    /// Picture NAL units, without parameter sets and delimiters.
    pub nalus: Vec<Bytes>,
    /// Contains an IDR, CRA or BLA picture.
    pub irap: bool,
    /// Random access point under the active policy.
    pub random_access: bool,
}

/// Splits parameter sets out of an access unit and flags random access.
pub fn classify(
    au: &[Bytes],
    cache: &mut ParameterSetCache,
    policy: RandomAccessPolicy,
) -> Classification {
    let mut nalus = Vec::with_capacity(au.len());
    let mut irap = false;
    let mut random_access = false;

    for nalu in au {
        let Some(&first) = nalu.first() else {
            continue;
        };
        let nal_type = NALUnitType::from_header(first);
        if cache.update(nalu) || nal_type == NALUnitType::Aud {
            continue;
        }
        irap |= nal_type.is_irap();
        random_access |= policy.is_random_access(nal_type);
        nalus.push(nalu.clone());
    }

    if nalus.is_empty() {
        return Classification::Drop;
    }

    Classification::Picture(ClassifiedAccessUnit {
        nalus,
        irap,
        random_access,
    })
}
