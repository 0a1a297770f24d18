//! Stateful packet cipher for client/server datagrams.
//!
//! A stream XOR driven by a seed-selected salt table, a session-static
//! 9-byte keystream, and a per-packet 9-byte keystream regenerated from two
//! nonces carried in the packet's footer. Not a secure primitive — this
//! exists purely for wire compatibility with the legacy client/server, and
//! must not be reused outside that context.

use crate::Error;

/// Size of the per-instance scratch buffer the legacy client reuses across
/// calls. Kept here as a documented ceiling; this implementation grows its
/// scratch `Vec` to fit the frame rather than enforcing the ceiling, since a
/// payload that would overflow it is better rejected by the caller with
/// real context than truncated silently.
pub const SCRATCH_SIZE: usize = 65_532;

const CLIENT_NONCE_MASK: u16 = 0x7470;
const SERVER_NONCE_MASK: u16 = 0x6474;
const CLIENT_SEQUENCE_XOR: u8 = 0x23;
const SERVER_SEQUENCE_XOR: u8 = 0x24;

/// Default keystream1, `"UrkcnItnI"` with indices 3 and 7 deliberately
/// corrupted to `0xE5, 0xA3`. This is a wire-compatibility requirement, not
/// a bug to fix — it is only ever produced by [`PacketCipher::with_default_keystream`].
fn default_keystream1() -> [u8; 9] {
    let mut ks = *b"UrkcnItnI";
    ks[3] = 0xE5;
    ks[7] = 0xA3;
    ks
}

/// Selects one of the ten salt-generation formulas. Valid range is 0..=9.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Seed(u8);

impl Seed {
    pub fn new(value: u8) -> Result<Self, Error> {
        if value > 9 {
            return Err(Error::InvalidRange { offset: value as usize, count: 1, len: 10 });
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    fn salt_byte(self, i: i32) -> i32 {
        match self.0 {
            0 => i,
            1 => {
                let sign = if i % 2 != 0 { -1 } else { 1 };
                sign * ((i + 1) / 2) + 128
            }
            2 => 255 - i,
            3 => {
                let sign = if i % 2 != 0 { -1 } else { 1 };
                sign * ((255 - i) / 2) + 128
            }
            4 => (i / 16).pow(2),
            5 => (2 * i).rem_euclid(256),
            6 => 255 - (2 * i).rem_euclid(256),
            7 => {
                if i > 127 {
                    2 * i - 256
                } else {
                    255 - 2 * i
                }
            }
            8 => {
                if i > 127 {
                    511 - 2 * i
                } else {
                    2 * i
                }
            }
            9 => 255 - ((i - 128) / 8).pow(2).rem_euclid(256),
            _ => unreachable!("Seed::new validates 0..=9"),
        }
    }

    /// Build the 256-byte salt table for this seed. The legacy formula
    /// broadcasts the computed byte across all 4 bytes of a word before
    /// storing the low byte back — bitwise-OR-ing a value with shifted
    /// copies of itself cannot change its own low byte, so this is
    /// reproduced literally (for fidelity to the documented formula) even
    /// though it has no effect on the stored result.
    fn salt_table(self) -> [u8; 256] {
        let mut salt = [0u8; 256];
        for i in 0..256i32 {
            let raw = self.salt_byte(i);
            let mut sb = (raw & 0xFF) as u32;
            sb |= (sb << 8) | ((sb | (sb << 8)) << 16);
            salt[i as usize] = (sb & 0xFF) as u8;
        }
        salt
    }
}

/// A per-connection cipher instance. Not `Send`/`Sync` by design: the
/// sequence byte and the tree-like nonce progression both require strictly
/// ordered calls, so a shared instance must be serialized by the caller.
pub struct PacketCipher {
    seed: Seed,
    salt: [u8; 256],
    keystream1: [u8; 9],
    keystream2_table: Vec<u8>,
    rand_state: u32,
    scratch: Vec<u8>,
}

impl PacketCipher {
    /// Construct with an explicit seed and session keystream.
    pub fn new(seed: Seed, keystream1: [u8; 9]) -> Self {
        log::debug!("constructing PacketCipher with seed {}", seed.value());
        Self {
            seed,
            salt: seed.salt_table(),
            keystream1,
            keystream2_table: vec![0u8; 1024],
            rand_state: 1,
            scratch: Vec::with_capacity(256),
        }
    }

    /// Construct using the legacy default keystream1, corrupted bytes and
    /// all.
    pub fn with_default_keystream(seed: Seed) -> Self {
        Self::new(seed, default_keystream1())
    }

    /// Change the seed at runtime; regenerates the salt table.
    pub fn set_seed(&mut self, seed: Seed) {
        log::debug!("reseeding PacketCipher seed {} -> {}", self.seed.value(), seed.value());
        self.seed = seed;
        self.salt = seed.salt_table();
    }

    pub fn seed(&self) -> Seed {
        self.seed
    }

    /// Derive the 1024-byte keystream2 table from a client-supplied ASCII
    /// name via iterated MD5: `t = md5hex(md5hex(name))`, then 31 more
    /// rounds of `t := t || md5hex(t)`, yielding exactly 1024 ASCII bytes.
    pub fn generate_keystream2_table(&mut self, name: &str) {
        log::debug!("regenerating keystream2 table for name of length {}", name.len());
        let first = format!("{:x}", md5::compute(name.as_bytes()));
        let mut t = format!("{:x}", md5::compute(first.as_bytes()));
        for _ in 0..31 {
            let next = format!("{:x}", md5::compute(t.as_bytes()));
            t.push_str(&next);
        }
        debug_assert_eq!(t.len(), 1024);
        self.keystream2_table = t.into_bytes();
    }

    /// Draw the next `(a, b)` nonce pair from the LCG and advance its state.
    fn next_nonce(&mut self) -> (u16, u8) {
        self.rand_state = self.rand_state.wrapping_mul(0x343FD).wrapping_add(0x269EC3);
        let word = (self.rand_state >> 16) & 0x7FFF;
        let a = ((word & 0xFFFF) % 65277 + 256) as u16;
        let b = (((word & 0xFF0000) >> 16) % 155 + 100) as u8;
        (a, b)
    }

    fn keystream2_for(&self, a: u16, b: u8) -> [u8; 9] {
        let mut ks = [0u8; 9];
        for i in 0..9usize {
            let idx = (i * (9 * i + (b as usize) * (b as usize)) + a as usize) % 1024;
            ks[i] = self.keystream2_table[idx];
        }
        ks
    }

    /// Symmetric XOR transform shared by encrypt and decrypt.
    fn transform(&self, buf: &mut [u8], keystream: &[u8; 9], seq: u8) {
        let seq_idx = seq as usize;
        for (i, byte) in buf.iter_mut().enumerate() {
            let mut b = *byte;
            b ^= self.salt[seq_idx];
            b ^= keystream[i % 9];
            let salt_idx = (i / 9) % 256;
            if salt_idx != seq_idx {
                b ^= self.salt[salt_idx];
            }
            *byte = b;
        }
    }

    fn keystream_for_direction(&mut self, use_keystream2: bool, nonce: (u16, u8)) -> [u8; 9] {
        if use_keystream2 {
            self.keystream2_for(nonce.0, nonce.1)
        } else {
            self.keystream1
        }
    }

    /// Encrypt a client→server packet. `data[offset..offset+count)` is the
    /// plaintext packet with the opcode at its first byte; returns the
    /// framed, encrypted bytes.
    pub fn encrypt_client_data(
        &mut self,
        data: &[u8],
        offset: usize,
        count: usize,
        seq: u8,
        use_keystream2: bool,
    ) -> Result<Vec<u8>, Error> {
        check_range(data.len(), offset, count)?;
        let opcode = data[offset];
        let nonce = self.next_nonce();
        let keystream = self.keystream_for_direction(use_keystream2, nonce);

        self.scratch.clear();
        self.scratch.push(opcode);
        self.scratch.push(seq);
        // `count` includes the opcode byte; a zero `count` still reads the
        // opcode from `data[offset]` but contributes no payload bytes.
        let payload_end = (offset + count).max(offset + 1);
        let mut payload = data[offset + 1..payload_end].to_vec();
        self.transform(&mut payload, &keystream, seq);
        self.scratch.extend_from_slice(&payload);
        self.scratch.push(0x00);
        if use_keystream2 {
            self.scratch.push(opcode);
        }

        let digest = md5::compute(&self.scratch);
        self.scratch.push(digest[13]);
        self.scratch.push(digest[3]);
        self.scratch.push(digest[11]);
        self.scratch.push(digest[7]);

        push_nonce_footer(&mut self.scratch, nonce, CLIENT_NONCE_MASK, CLIENT_SEQUENCE_XOR);
        Ok(self.scratch.clone())
    }

    /// Decrypt a client→server frame produced by [`Self::encrypt_client_data`].
    /// MD5 tag mismatch is never checked on decrypt (legacy silent
    /// acceptance) — use [`Self::verify_client_tag`] to check it explicitly.
    pub fn decrypt_client_data(&mut self, frame: &[u8], use_keystream2: bool) -> Result<Vec<u8>, Error> {
        let (nonce, body) = read_nonce_footer(frame, CLIENT_NONCE_MASK, CLIENT_SEQUENCE_XOR)?;
        let tail = if use_keystream2 { 1 } else { 0 };
        let min_len = 2 + 1 + 4 + tail; // opcode+seq+sentinel+tag(+opcode echo)
        if body.len() < min_len {
            return Err(Error::MalformedFrame("client frame too short".into()));
        }
        let opcode = body[0];
        let seq = body[1];
        let payload_end = body.len() - 4 - 1 - tail;
        let mut payload = body[2..payload_end].to_vec();
        let keystream = self.keystream_for_direction(use_keystream2, nonce);
        self.transform(&mut payload, &keystream, seq);

        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(opcode);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Recompute the MD5 tag of a client→server frame and compare it with
    /// the tag embedded in the frame. The legacy client never does this;
    /// it is offered purely as an optional diagnostic.
    pub fn verify_client_tag(&self, frame: &[u8]) -> Result<bool, Error> {
        if frame.len() < 7 {
            return Err(Error::MalformedFrame("frame too short to carry a tag".into()));
        }
        let tag_start = frame.len() - 3 - 4;
        let body = &frame[..tag_start];
        let tag = &frame[tag_start..tag_start + 4];
        let digest = md5::compute(body);
        Ok(tag == [digest[13], digest[3], digest[11], digest[7]])
    }

    /// Encrypt a server→client packet. No hash, no sentinel.
    pub fn encrypt_server_data(
        &mut self,
        data: &[u8],
        offset: usize,
        count: usize,
        seq: u8,
        use_keystream2: bool,
    ) -> Result<Vec<u8>, Error> {
        check_range(data.len(), offset, count)?;
        let opcode = data[offset];
        let nonce = self.next_nonce();
        let keystream = self.keystream_for_direction(use_keystream2, nonce);

        self.scratch.clear();
        self.scratch.push(opcode);
        self.scratch.push(seq);
        let payload_end = (offset + count).max(offset + 1);
        let mut payload = data[offset + 1..payload_end].to_vec();
        self.transform(&mut payload, &keystream, seq);
        self.scratch.extend_from_slice(&payload);

        push_nonce_footer(&mut self.scratch, nonce, SERVER_NONCE_MASK, SERVER_SEQUENCE_XOR);
        Ok(self.scratch.clone())
    }

    /// Decrypt a server→client frame produced by [`Self::encrypt_server_data`].
    pub fn decrypt_server_data(&mut self, frame: &[u8], use_keystream2: bool) -> Result<Vec<u8>, Error> {
        let (nonce, body) = read_nonce_footer(frame, SERVER_NONCE_MASK, SERVER_SEQUENCE_XOR)?;
        if body.len() < 2 {
            return Err(Error::MalformedFrame("server frame too short".into()));
        }
        let opcode = body[0];
        let seq = body[1];
        let mut payload = body[2..].to_vec();
        let keystream = self.keystream_for_direction(use_keystream2, nonce);
        self.transform(&mut payload, &keystream, seq);

        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(opcode);
        out.extend_from_slice(&payload);
        Ok(out)
    }
}

fn check_range(len: usize, offset: usize, count: usize) -> Result<(), Error> {
    // `count == 0` is a valid no-op call (the opcode at `data[offset]` is
    // still read and framed) — only an out-of-bounds offset/count is an error.
    if offset >= len || offset + count > len {
        return Err(Error::InvalidRange { offset, count, len });
    }
    Ok(())
}

fn push_nonce_footer(out: &mut Vec<u8>, nonce: (u16, u8), mask: u16, seq_xor: u8) {
    let (a, b) = nonce;
    let masked = a ^ mask;
    out.push((masked & 0xFF) as u8);
    out.push(b ^ seq_xor);
    out.push(((masked >> 8) & 0xFF) as u8);
}

/// Split `frame` into its recovered `(a, b)` nonce and the bytes preceding
/// the 3-byte footer.
fn read_nonce_footer<'a>(
    frame: &'a [u8],
    mask: u16,
    seq_xor: u8,
) -> Result<((u16, u8), &'a [u8]), Error> {
    if frame.len() < 3 {
        return Err(Error::MalformedFrame("frame too short to carry a nonce footer".into()));
    }
    let split = frame.len() - 3;
    let (body, footer) = frame.split_at(split);
    let low = footer[0] as u16;
    let b = footer[1] ^ seq_xor;
    let high = footer[2] as u16;
    let masked = low | (high << 8);
    let a = masked ^ mask;
    Ok(((a, b), body))
}
