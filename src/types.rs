//! Shared types.
//!
//! Aliases and small enums used across the crate.

/// Number of SVNs in the Galileo constellation.
pub const NUM_SVNS: usize = 36;

/// Size of an INAV word in bytes.
pub const INAV_WORD_BYTES: usize = 16;
/// INAV word.
///
/// The 128-bit data word carried by the even and odd parts of an INAV page,
/// starting with the 6-bit word type.
pub type InavWord = [u8; INAV_WORD_BYTES];

/// INAV band.
///
/// The band on which an INAV word was received. Some words, such as those
/// containing timing parameters, are only authenticated on E1-B.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum InavBand {
    /// E1-B band.
    E1B,
    /// E5b-I band.
    E5B,
}

/// Size of a DSM block in bytes.
pub const DSM_BLOCK_BYTES: usize = 13;
/// DSM block.
pub type DsmBlock = [u8; DSM_BLOCK_BYTES];

/// Size of a Merkle tree node in bytes.
pub const MERKLE_TREE_NODE_BYTES: usize = 32;
/// Merkle tree node.
pub type MerkleTreeNode = [u8; MERKLE_TREE_NODE_BYTES];

/// Bit slice in MSB-first order.
pub type BitSlice = bitvec::slice::BitSlice<u8, bitvec::order::Msb0>;
/// Owned bit vector in MSB-first order.
pub type BitVec = bitvec::vec::BitVec<u8, bitvec::order::Msb0>;
