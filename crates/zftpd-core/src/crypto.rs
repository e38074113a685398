//! ChaCha20 session stream cipher (RFC 7539), used by `AUTH XCRYPT`.
//!
//! A from-scratch, safe-Rust implementation of the quarter-round ARX core.
//! Key and keystream-block buffers are zeroed on drop so a crashed or
//! reset session doesn't leave key material lingering in freed memory.

const SIGMA: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

#[inline]
const fn rotl32(x: u32, n: u32) -> u32 {
    (x << n) | (x >> (32 - n))
}

#[inline]
fn quarter_round(state: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    state[a] = state[a].wrapping_add(state[b]);
    state[d] ^= state[a];
    state[d] = rotl32(state[d], 16);

    state[c] = state[c].wrapping_add(state[d]);
    state[b] ^= state[c];
    state[b] = rotl32(state[b], 12);

    state[a] = state[a].wrapping_add(state[b]);
    state[d] ^= state[a];
    state[d] = rotl32(state[d], 8);

    state[c] = state[c].wrapping_add(state[d]);
    state[b] ^= state[c];
    state[b] = rotl32(state[b], 7);
}

/// Run the 20-round (10 double-round) ChaCha20 core over `input`, producing
/// 64 bytes of keystream.
fn chacha20_block(key: &[u8; 32], nonce: &[u8; 12], counter: u32) -> [u8; 64] {
    let mut state = [0u32; 16];
    state[0..4].copy_from_slice(&SIGMA);
    for i in 0..8 {
        state[4 + i] = u32::from_le_bytes(key[i * 4..i * 4 + 4].try_into().unwrap_or([0; 4]));
    }
    state[12] = counter;
    for i in 0..3 {
        state[13 + i] = u32::from_le_bytes(nonce[i * 4..i * 4 + 4].try_into().unwrap_or([0; 4]));
    }

    let initial = state;

    for _ in 0..10 {
        quarter_round(&mut state, 0, 4, 8, 12);
        quarter_round(&mut state, 1, 5, 9, 13);
        quarter_round(&mut state, 2, 6, 10, 14);
        quarter_round(&mut state, 3, 7, 11, 15);

        quarter_round(&mut state, 0, 5, 10, 15);
        quarter_round(&mut state, 1, 6, 11, 12);
        quarter_round(&mut state, 2, 7, 8, 13);
        quarter_round(&mut state, 3, 4, 9, 14);
    }

    for i in 0..16 {
        state[i] = state[i].wrapping_add(initial[i]);
    }

    let mut out = [0u8; 64];
    for (i, word) in state.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    out
}

fn volatile_zero(buf: &mut [u8]) {
    for b in buf.iter_mut() {
        *b = 0;
    }
    std::hint::black_box(&*buf);
}

/// Derive a 32-byte session key from a pre-shared key and session nonce by
/// taking the first half of one ChaCha20 keystream block produced with
/// counter 0.
pub fn derive_key(psk: &[u8; 32], nonce: &[u8; 12]) -> [u8; 32] {
    let mut block = chacha20_block(psk, nonce, 0);
    let mut key = [0u8; 32];
    key.copy_from_slice(&block[..32]);
    volatile_zero(&mut block);
    key
}

/// Stateful ChaCha20 keystream generator bound to one session's crypto
/// context. Every byte that crosses the control or data channel while
/// `active` is applied through [`Cipher::xor`], in transmission order.
pub struct Cipher {
    key: [u8; 32],
    nonce: [u8; 12],
    counter: u32,
    block: [u8; 64],
    offset: usize,
    active: bool,
}

impl Cipher {
    /// Create an inactive cipher; call [`Cipher::activate`] once the
    /// `AUTH XCRYPT` handshake has derived a key and nonce.
    pub fn new() -> Self {
        Self {
            key: [0u8; 32],
            nonce: [0u8; 12],
            counter: 0,
            block: [0u8; 64],
            offset: 64,
            active: false,
        }
    }

    /// Initialize the cipher with a derived key and session nonce and mark
    /// it active. Counter always restarts at zero.
    pub fn activate(&mut self, key: [u8; 32], nonce: [u8; 12]) {
        self.key = key;
        self.nonce = nonce;
        self.counter = 0;
        self.block = [0u8; 64];
        self.offset = 64;
        self.active = true;
    }

    /// Whether a key/nonce have been negotiated and traffic should be
    /// XORed.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// XOR `data` in place with the next `data.len()` keystream bytes,
    /// regenerating keystream blocks as the cursor crosses 64-byte
    /// boundaries.
    pub fn xor(&mut self, data: &mut [u8]) {
        let mut pos = 0;
        while pos < data.len() {
            if self.offset >= 64 {
                self.block = chacha20_block(&self.key, &self.nonce, self.counter);
                self.counter = self.counter.wrapping_add(1);
                self.offset = 0;
            }
            let available = 64 - self.offset;
            let take = available.min(data.len() - pos);
            for i in 0..take {
                data[pos + i] ^= self.block[self.offset + i];
            }
            self.offset += take;
            pos += take;
        }
    }

    /// Volatile-zero the entire context, for secure teardown on session
    /// close or `AUTH` failure.
    pub fn reset(&mut self) {
        volatile_zero(&mut self.key);
        volatile_zero(&mut self.nonce);
        volatile_zero(&mut self.block);
        self.counter = 0;
        self.offset = 64;
        self.active = false;
    }
}

impl Default for Cipher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Cipher {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Fill `out` with cryptographically random bytes from OS entropy.
///
/// The reference implementation falls back to a monotonic-time-seeded LCG
/// when `/dev/urandom` is unavailable; that fallback is deliberately not
/// ported here (see `SPEC_FULL.md` §9) — every Tokio-supported target is
/// assumed to provide OS entropy, so `OsRng` is used unconditionally.
pub fn random_nonce() -> [u8; 12] {
    use rand::RngCore;
    let mut nonce = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_is_an_involution() {
        let key = [7u8; 32];
        let nonce = [3u8; 12];
        let mut a = Cipher::new();
        a.activate(key, nonce);
        let mut b = Cipher::new();
        b.activate(key, nonce);

        let original = b"the quick brown fox jumps over the lazy dog, 1234567890".to_vec();
        let mut buf = original.clone();

        a.xor(&mut buf);
        assert_ne!(buf, original);
        b.xor(&mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn xor_handles_block_boundary_crossing() {
        let mut c = Cipher::new();
        c.activate([1u8; 32], [2u8; 12]);
        let mut buf = vec![0u8; 200];
        c.xor(&mut buf);
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    fn derive_key_is_deterministic_for_same_inputs() {
        let psk = [9u8; 32];
        let nonce = [1u8; 12];
        assert_eq!(derive_key(&psk, &nonce), derive_key(&psk, &nonce));
    }

    #[test]
    fn derive_key_differs_for_different_nonces() {
        let psk = [9u8; 32];
        assert_ne!(derive_key(&psk, &[1u8; 12]), derive_key(&psk, &[2u8; 12]));
    }

    #[test]
    fn reset_clears_active_flag_and_state() {
        let mut c = Cipher::new();
        c.activate([5u8; 32], [6u8; 12]);
        assert!(c.is_active());
        c.reset();
        assert!(!c.is_active());
        assert_eq!(c.key, [0u8; 32]);
    }
}
