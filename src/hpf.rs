//! HPF adaptive Huffman codec.
//!
//! Bit-exact compress/expand of byte streams using the mutable-tree scheme
//! described for HPF image payloads. Unlike a frequency-counted Huffman
//! tree, this tree carries no frequency counters at all: each decoded or
//! encoded symbol promotes its leaf toward the root by a fixed sequence of
//! sibling swaps, and encoder/decoder stay in lockstep only because they
//! run the identical swaps after the identical symbol.

use crate::tools::bitstream::{LsbBitReader, LsbBitWriter};
use crate::Error;

/// HPF's 4-byte frame header.
pub const HEADER: [u8; 4] = [0x55, 0xAA, 0x02, 0xFF];

/// The terminator is symbol 0x100, one past the 256 byte values.
const TERMINATOR: usize = 0x100;
/// Node index of the root.
const ROOT: usize = 0;
/// Leaves begin at node 256 ("0x100"); the terminator's leaf is node 512.
const LEAF_BASE: usize = 0x100;

/// The mutable Huffman tree: parallel index arrays mutated in place rather
/// than an arena of heap-allocated nodes, so that a batch of HPF assets can
/// be pushed through without per-symbol allocation.
struct AdaptiveTree {
    left: [usize; 256],
    right: [usize; 256],
    parent: [usize; 513],
}

impl AdaptiveTree {
    fn new() -> Self {
        let mut left = [0usize; 256];
        let mut right = [0usize; 256];
        let mut parent = [0usize; 513];
        for i in 0..256 {
            left[i] = 2 * i + 1;
            right[i] = 2 * i + 2;
            parent[2 * i + 1] = i;
            parent[2 * i + 2] = i;
        }
        Self { left, right, parent }
    }

    /// Root-to-leaf path for `leaf`, as a sequence of `false` = left,
    /// `true` = right steps, root-first.
    fn path_to(&self, leaf: usize) -> Vec<bool> {
        let mut steps = Vec::new();
        let mut node = leaf;
        while node != ROOT {
            let p = self.parent[node];
            steps.push(self.right[p] == node);
            node = p;
        }
        steps.reverse();
        steps
    }

    /// Walk from the root following `bit=1 -> right`, `bit=0 -> left` until
    /// a leaf (node > 0xFF) is reached, pulling bits from `bits`.
    fn descend(&self, bits: &mut LsbBitReader) -> Result<usize, Error> {
        let mut node = ROOT;
        loop {
            let bit = bits.next_bit().ok_or_else(|| {
                Error::MalformedFrame("bit stream ended mid-codeword".into())
            })?;
            node = if bit == 1 { self.right[node] } else { self.left[node] };
            if node > 0xFF {
                return Ok(node);
            }
        }
    }

    /// Promote the just-resolved node `v` toward the root, one level per
    /// iteration, until its parent is the root.
    ///
    /// Each step exchanges the *occupants* of two already-populated slots:
    /// `v`'s slot under its parent `p`, and `p`'s sibling slot under the
    /// grandparent `gp`. After the swap `v` hangs directly off `gp` (one
    /// level shallower) and `gp`'s former child hangs off `p` in `v`'s old
    /// slot (one level deeper). Neither slot is ever left empty and neither
    /// swap partner needs children of its own — `v` may be a leaf, `p`'s
    /// sibling may be a leaf or a whole subtree — so no node is ever
    /// orphaned and every node keeps exactly one path back to the root.
    fn update(&mut self, leaf: usize) {
        let mut v = leaf;
        loop {
            let p = self.parent[v];
            if p == ROOT {
                break;
            }
            let gp = self.parent[p];
            let sibling = if self.left[gp] == p { self.right[gp] } else { self.left[gp] };

            if self.left[p] == v {
                self.left[p] = sibling;
            } else {
                self.right[p] = sibling;
            }
            if self.left[gp] == sibling {
                self.left[gp] = v;
            } else {
                self.right[gp] = v;
            }
            self.parent[sibling] = p;
            self.parent[v] = gp;
        }
    }
}

/// Compress `input` into a framed HPF blob. Always succeeds for any input;
/// the output always begins with [`HEADER`].
pub fn compress(input: &[u8]) -> Vec<u8> {
    log::debug!("compressing {} bytes of input", input.len());
    let mut tree = AdaptiveTree::new();
    let mut writer = LsbBitWriter::new();
    for &byte in input {
        encode_symbol(&mut tree, &mut writer, byte as usize);
    }
    encode_symbol(&mut tree, &mut writer, TERMINATOR);
    let mut out = Vec::with_capacity(4 + writer.len() / 8 + 1);
    out.extend_from_slice(&HEADER);
    out.extend_from_slice(&writer.into_bytes());
    out
}

fn encode_symbol(tree: &mut AdaptiveTree, writer: &mut LsbBitWriter, symbol: usize) {
    let leaf = LEAF_BASE + symbol;
    for bit in tree.path_to(leaf) {
        writer.push(bit);
    }
    tree.update(leaf);
}

/// Expand a framed HPF blob back into its original bytes.
pub fn decompress(blob: &[u8]) -> Result<Vec<u8>, Error> {
    if blob.len() < 4 || blob[0..4] != HEADER {
        return Err(Error::MalformedFrame("missing HPF header".into()));
    }
    log::debug!("decompressing HPF blob of {} bytes", blob.len());
    let mut tree = AdaptiveTree::new();
    let mut bits = LsbBitReader::new(&blob[4..]);
    let mut out = Vec::new();
    loop {
        let leaf = tree.descend(&mut bits)?;
        let symbol = leaf - LEAF_BASE;
        tree.update(leaf);
        if symbol == TERMINATOR {
            break;
        }
        out.push(symbol as u8);
    }
    Ok(out)
}
