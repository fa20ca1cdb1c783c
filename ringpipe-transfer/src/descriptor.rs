//! Memory region descriptors exchanged between peers.
//!
//! A [`Descriptor`] names one registered memory region; a [`DescriptorSet`] is
//! the ordered list a peer publishes so the remote side can address its ring
//! slots. The same shape is used when registering memory with the transfer
//! engine and when naming the source/target regions of a transfer.

use bytes::Bytes;

/// One `(base_address, length, device_id)` memory region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub addr: u64,
    pub len: u64,
    pub device_id: u32,
}

impl Descriptor {
    const BYTES: usize = 20;

    pub fn new(addr: u64, len: u64, device_id: u32) -> Self {
        Self {
            addr,
            len,
            device_id,
        }
    }

    /// Whether `[addr, addr + len)` lies entirely inside this region.
    pub fn contains(&self, addr: u64, len: u64) -> bool {
        addr >= self.addr && addr.saturating_add(len) <= self.addr.saturating_add(self.len)
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.addr.to_le_bytes());
        out.extend_from_slice(&self.len.to_le_bytes());
        out.extend_from_slice(&self.device_id.to_le_bytes());
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::BYTES {
            return None;
        }
        Some(Self {
            addr: u64::from_le_bytes(bytes[..8].try_into().ok()?),
            len: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
            device_id: u32::from_le_bytes(bytes[16..20].try_into().ok()?),
        })
    }
}

/// Ordered, immutable-after-publication sequence of descriptors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorSet(Vec<Descriptor>);

impl DescriptorSet {
    pub fn new(descs: Vec<Descriptor>) -> Self {
        Self(descs)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Descriptor> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Descriptor> {
        self.0.iter()
    }

    /// Serialize for transport: u32 count, then fixed 20-byte entries, all
    /// little-endian.
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(4 + self.0.len() * Descriptor::BYTES);
        out.extend_from_slice(&(self.0.len() as u32).to_le_bytes());
        for desc in &self.0 {
            desc.write_to(&mut out);
        }
        Bytes::from(out)
    }

    /// Decode a serialized set, rejecting truncated or oversized payloads.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        let count = u32::from_le_bytes(bytes[..4].try_into().ok()?) as usize;
        let body = &bytes[4..];
        if body.len() != count * Descriptor::BYTES {
            return None;
        }
        let mut descs = Vec::with_capacity(count);
        for chunk in body.chunks_exact(Descriptor::BYTES) {
            descs.push(Descriptor::from_bytes(chunk)?);
        }
        Some(Self(descs))
    }
}

impl FromIterator<Descriptor> for DescriptorSet {
    fn from_iter<I: IntoIterator<Item = Descriptor>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{Descriptor, DescriptorSet};

    fn sample_set() -> DescriptorSet {
        DescriptorSet::new(vec![
            Descriptor::new(0x1000, 4096, 0),
            Descriptor::new(0x2000, 8192, 1),
            Descriptor::new(0xffff_ffff_0000, 16, 3),
        ])
    }

    #[test]
    fn roundtrip() {
        let set = sample_set();
        let encoded = set.encode();
        let decoded = DescriptorSet::decode(&encoded).expect("decode");
        assert_eq!(decoded, set);
    }

    #[test]
    fn roundtrip_empty() {
        let set = DescriptorSet::default();
        let decoded = DescriptorSet::decode(&set.encode()).expect("decode");
        assert!(decoded.is_empty());
    }

    #[test]
    fn decode_rejects_truncation() {
        let encoded = sample_set().encode();
        assert!(DescriptorSet::decode(&encoded[..encoded.len() - 1]).is_none());
        assert!(DescriptorSet::decode(&[]).is_none());
        assert!(DescriptorSet::decode(&[3, 0]).is_none());
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = sample_set().encode().to_vec();
        bytes.push(0);
        assert!(DescriptorSet::decode(&bytes).is_none());
    }

    #[test]
    fn decode_rejects_count_mismatch() {
        let mut bytes = sample_set().encode().to_vec();
        // Claim one more entry than the body carries.
        bytes[0] = 4;
        assert!(DescriptorSet::decode(&bytes).is_none());
    }

    #[test]
    fn contains_checks_bounds() {
        let desc = Descriptor::new(0x1000, 256, 0);
        assert!(desc.contains(0x1000, 256));
        assert!(desc.contains(0x1080, 8));
        assert!(!desc.contains(0x0fff, 8));
        assert!(!desc.contains(0x1000, 257));
        assert!(!desc.contains(u64::MAX, 1));
    }
}
