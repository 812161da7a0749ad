use crate::{BTRAILER_LEN, BT_HASH_PREFIX_LEN, HASH_LEN};

/// 160-byte block trailer.
///
/// Field offsets are fixed for wire and hash compatibility; all multi-byte
/// integers are little-endian. The 92-byte prefix (`phash` through `mroot`)
/// concatenated with the 32-byte nonce forms the 124-byte SHA-256 input that
/// seeds the solver.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlockTrailer([u8; BTRAILER_LEN]);

impl Default for BlockTrailer {
    fn default() -> Self {
        Self([0u8; BTRAILER_LEN])
    }
}

impl BlockTrailer {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; BTRAILER_LEN] = bytes.try_into().ok()?;
        Some(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; BTRAILER_LEN] {
        &self.0
    }

    /// Trailer prefix covered by the seed hash: `phash` through `mroot`.
    pub fn hash_prefix(&self) -> &[u8; BT_HASH_PREFIX_LEN] {
        self.0[..BT_HASH_PREFIX_LEN]
            .try_into()
            .expect("prefix slice is 92 bytes")
    }

    pub fn phash(&self) -> &[u8; HASH_LEN] {
        self.0[0..32].try_into().expect("phash slice is 32 bytes")
    }

    pub fn set_phash(&mut self, phash: &[u8; HASH_LEN]) {
        self.0[0..32].copy_from_slice(phash);
    }

    pub fn bnum(&self) -> u64 {
        u64::from_le_bytes(self.0[32..40].try_into().expect("bnum slice is 8 bytes"))
    }

    pub fn bnum_bytes(&self) -> &[u8; 8] {
        self.0[32..40].try_into().expect("bnum slice is 8 bytes")
    }

    pub fn set_bnum_bytes(&mut self, bnum: &[u8; 8]) {
        self.0[32..40].copy_from_slice(bnum);
    }

    pub fn tcount(&self) -> u32 {
        u32::from_le_bytes(self.0[48..52].try_into().expect("tcount slice is 4 bytes"))
    }

    pub fn set_tcount(&mut self, tcount: u32) {
        self.0[48..52].copy_from_slice(&tcount.to_le_bytes());
    }

    pub fn time0(&self) -> u32 {
        u32::from_le_bytes(self.0[52..56].try_into().expect("time0 slice is 4 bytes"))
    }

    pub fn set_time0(&mut self, time0: u32) {
        self.0[52..56].copy_from_slice(&time0.to_le_bytes());
    }

    /// Difficulty byte used by the PoW (byte 0 of the difficulty field).
    pub fn difficulty(&self) -> u8 {
        self.0[56]
    }

    pub fn set_difficulty(&mut self, diff: u8) {
        self.0[56] = diff;
        self.0[57..60].fill(0);
    }

    pub fn mroot(&self) -> &[u8; HASH_LEN] {
        self.0[60..92].try_into().expect("mroot slice is 32 bytes")
    }

    pub fn set_mroot(&mut self, mroot: &[u8; HASH_LEN]) {
        self.0[60..92].copy_from_slice(mroot);
    }

    pub fn nonce(&self) -> &[u8; HASH_LEN] {
        self.0[92..124].try_into().expect("nonce slice is 32 bytes")
    }

    pub fn set_nonce(&mut self, nonce: &[u8; HASH_LEN]) {
        self.0[92..124].copy_from_slice(nonce);
    }

    /// Lower half of the nonce, generated host-side before each launch.
    pub fn set_nonce_half(&mut self, half: &[u8; 16]) {
        self.0[92..108].copy_from_slice(half);
    }

    pub fn set_stime(&mut self, stime: u32) {
        self.0[124..128].copy_from_slice(&stime.to_le_bytes());
    }

    pub fn bhash(&self) -> &[u8; HASH_LEN] {
        self.0[128..160].try_into().expect("bhash slice is 32 bytes")
    }

    pub fn set_bhash(&mut self, bhash: &[u8; HASH_LEN]) {
        self.0[128..160].copy_from_slice(bhash);
    }
}

impl std::fmt::Debug for BlockTrailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockTrailer")
            .field("bnum", &self.bnum())
            .field("tcount", &self.tcount())
            .field("time0", &self.time0())
            .field("difficulty", &self.difficulty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_offsets_are_wire_compatible() {
        let mut raw = [0u8; BTRAILER_LEN];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let bt = BlockTrailer::from_bytes(&raw).expect("160 bytes");

        assert_eq!(bt.phash()[0], 0);
        assert_eq!(bt.phash()[31], 31);
        assert_eq!(bt.bnum(), u64::from_le_bytes([32, 33, 34, 35, 36, 37, 38, 39]));
        assert_eq!(bt.tcount(), u32::from_le_bytes([48, 49, 50, 51]));
        assert_eq!(bt.time0(), u32::from_le_bytes([52, 53, 54, 55]));
        assert_eq!(bt.difficulty(), 56);
        assert_eq!(bt.mroot()[0], 60);
        assert_eq!(bt.nonce()[0], 92);
        assert_eq!(bt.bhash()[0], 128);
        assert_eq!(bt.hash_prefix().len(), 92);
        assert_eq!(&bt.hash_prefix()[..], &raw[..92]);
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(BlockTrailer::from_bytes(&[0u8; 159]).is_none());
        assert!(BlockTrailer::from_bytes(&[0u8; 161]).is_none());
    }

    #[test]
    fn setters_round_trip() {
        let mut bt = BlockTrailer::default();
        bt.set_tcount(7);
        bt.set_time0(0x1234_5678);
        bt.set_difficulty(0x1c);
        bt.set_nonce(&[0xAB; 32]);
        assert_eq!(bt.tcount(), 7);
        assert_eq!(bt.time0(), 0x1234_5678);
        assert_eq!(bt.difficulty(), 0x1c);
        assert_eq!(bt.nonce(), &[0xAB; 32]);
    }
}
