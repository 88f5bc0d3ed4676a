//! Merkle tree.
//!
//! This module contains code used to authenticate new public keys broadcast
//! in DSM-PKR messages against the OSNMA Merkle tree.

use crate::bitfields::DsmPkr;
use crate::crypto::hash_sha256;
use crate::error::{Error, Result};
use crate::types::{MerkleTreeNode, MERKLE_TREE_NODE_BYTES};

const MERKLE_TREE_DEPTH: usize = 4;

/// Merkle tree.
///
/// This struct represents the OSNMA Merkle tree by the value of its root.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MerkleTree {
    root: MerkleTreeNode,
}

impl MerkleTree {
    /// Creates a new Merkle tree.
    ///
    /// The value of the root of the Merkle tree is given to the constructor.
    pub fn new(root: MerkleTreeNode) -> MerkleTree {
        MerkleTree { root }
    }

    /// Creates a Merkle tree from the bytes of its root.
    ///
    /// Returns [`Error::InvalidLength`] unless `root` has 32 bytes.
    pub fn from_slice(root: &[u8]) -> Result<MerkleTree> {
        let root: MerkleTreeNode = root.try_into().map_err(|_| {
            log::error!(
                "Merkle tree root must have {MERKLE_TREE_NODE_BYTES} bytes, got {}",
                root.len()
            );
            Error::InvalidLength
        })?;
        Ok(MerkleTree::new(root))
    }

    /// Gives the root of the tree.
    pub fn root(&self) -> &MerkleTreeNode {
        &self.root
    }

    /// Validates a DSM-PKR against this Merkle tree.
    ///
    /// The leaf formed by the new public key type and the new public key is
    /// hashed, and the intermediate tree nodes in the DSM-PKR are used to
    /// climb to the root, taking the message ID as the index of the leaf.
    ///
    /// Returns [`Error::ReservedField`] if the key type is reserved and
    /// [`Error::MerkleTreeMismatch`] if the computed root is wrong.
    pub fn validate_pkr(&self, dsm_pkr: DsmPkr) -> Result<()> {
        let Some(leaf) = dsm_pkr.merkle_tree_leaf() else {
            log::error!("cannot build Merkle tree leaf for {dsm_pkr:?}");
            return Err(Error::ReservedField);
        };
        let mut id = dsm_pkr.message_id();
        let mut node = hash_sha256(leaf);
        for j in 0..MERKLE_TREE_DEPTH {
            let itn = dsm_pkr.intermediate_tree_node(j);
            node = if id & 1 == 0 {
                Self::calc_node(&node, itn)
            } else {
                Self::calc_node(itn, &node)
            };
            id >>= 1;
        }
        if node == self.root {
            log::info!("{dsm_pkr:?} validated against the Merkle tree");
            Ok(())
        } else {
            log::error!("{dsm_pkr:?} does not match the Merkle tree root");
            Err(Error::MerkleTreeMismatch)
        }
    }

    fn calc_node(left: &MerkleTreeNode, right: &MerkleTreeNode) -> MerkleTreeNode {
        let mut buffer = [0; 2 * MERKLE_TREE_NODE_BYTES];
        buffer[..MERKLE_TREE_NODE_BYTES].copy_from_slice(left);
        buffer[MERKLE_TREE_NODE_BYTES..].copy_from_slice(right);
        hash_sha256(&buffer)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use hex_literal::hex;

    // Obtained from OSNMA_MerkleTree_20231213105954_PKID_1.xml
    pub(crate) const ROOT: [u8; 32] =
        hex!("0E63F552C8021709043C239032EFFE941BF22C8389032F5F2701E0FBC80148B8");

    // DSM-PKR broadcast on 2023-12-12 12:00 UTC
    pub(crate) const DSM_PKR_0: [u8; 169] = hex!(
        "
        70 01 63 1b dc ed 79 d4 31 7b c2 87 0e e3 89 5b
        d5 9c f2 b6 ea 51 6f ab bf df 1d 73 96 26 14 6f
        fe 31 6f a9 28 5f 5a 1e 44 04 24 13 bd af 18 aa
        3c f6 84 72 33 97 d7 b8 32 5a ec a1 eb ca 9f 0f
        64 99 05 42 4c be 48 2a 1a 32 b0 10 64 f8 5d 0c
        36 df 03 8e 52 ce 12 8e 7e c5 f3 23 e1 65 b1 82
        a7 15 37 bd b0 10 97 2e b4 a3 b9 0b aa cd 14 94
        1e f4 0d a2 cb 2b 82 d3 78 b3 15 c0 08 de ce fd
        8e 11 03 74 a9 25 cf a0 ff 18 05 e5 c5 a5 8f db
        a3 1b f0 14 5d 5b 5b e2 f0 62 d3 f8 bb 2e e9 8f
        0f 6d b0 e8 23 c5 e7 5e 78"
    );

    // DSM-PKR broadcast on 2023-12-15 00:00 UTC
    const DSM_PKR_1: [u8; 169] = hex!(
        "
        71 e5 53 0a 33 d5 cb 60 c9 50 16 b8 ae c7 45 93
        db cd f2 71 1d 39 9e a2 48 69 17 3c a2 29 37 9a
        15 31 6f a9 28 5f 5a 1e 44 04 24 13 bd af 18 aa
        3c f6 84 72 33 97 d7 b8 32 5a ec a1 eb ca 9f 0f
        64 99 05 42 4c be 48 2a 1a 32 b0 10 64 f8 5d 0c
        36 df 03 8e 52 ce 12 8e 7e c5 f3 23 e1 65 b1 82
        a7 15 37 bd b0 10 97 2e b4 a3 b9 0b aa cd 14 94
        1e f4 0d a2 cb 2b 82 d3 78 b3 15 c0 08 de ce fd
        8e 12 03 35 78 e5 c7 11 a9 c3 bd dd 1c a4 ee 85
        f7 c5 1b 36 78 97 cb 40 b8 85 68 a0 c8 97 da 30
        ef b7 c3 24 e0 22 2c 90 80"
    );

    fn check(dsm_buf: &[u8; 169], corrupt: usize) {
        let mtree = MerkleTree::new(ROOT);
        assert!(mtree.validate_pkr(DsmPkr::new(dsm_buf).unwrap()).is_ok());
        let mut dsm_buf = *dsm_buf;
        dsm_buf[corrupt] ^= 1;
        assert!(matches!(
            mtree.validate_pkr(DsmPkr::new(&dsm_buf).unwrap()),
            Err(Error::MerkleTreeMismatch)
        ));
    }

    #[test]
    fn message_0() {
        check(&DSM_PKR_0, 40);
    }

    #[test]
    fn message_1() {
        check(&DSM_PKR_1, 123);
    }

    #[test]
    fn reserved_key_type() {
        let mut dsm_buf = DSM_PKR_0;
        dsm_buf[129] = 0x21;
        assert!(matches!(
            MerkleTree::new(ROOT).validate_pkr(DsmPkr::new(&dsm_buf).unwrap()),
            Err(Error::ReservedField)
        ));
    }

    #[test]
    fn root_from_slice() {
        assert_eq!(MerkleTree::from_slice(&ROOT).unwrap().root(), &ROOT);
        assert!(matches!(
            MerkleTree::from_slice(&ROOT[..31]),
            Err(Error::InvalidLength)
        ));
    }
}
