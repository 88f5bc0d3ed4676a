//! Synthetic TESLA chains for tests.
//!
//! A [`Fixture`] holds a DSM-KROOT signed with a fixed P-256 key and the
//! keys of the corresponding chain, so that tests can disclose genuine and
//! corrupted keys at will.

use crate::bitfields::{DsmKroot, NmaHeader};
use crate::crypto::{HashFunction, MacFunction};
use crate::keystore::KeyStore;
use crate::navmessage::{DataElement, NavigationDataRecord};
use crate::pubkey::PublicKey;
use crate::tesla::{Chain, Key};
use crate::types::BitVec;
use crate::{Gst, Svn};
use bitvec::prelude::*;
use signature::Signer;

const DEFAULT_ALPHA: u64 = 0x25d3964da3a2;
const KROOT_RANGE: core::ops::Range<usize> = 13..29;
const SIGNATURE_RANGE: core::ops::Range<usize> = 29..93;

pub(crate) fn signing_key() -> p256::ecdsa::SigningKey {
    p256::ecdsa::SigningKey::from_slice(&[0x1f; 32]).unwrap()
}

pub(crate) fn public_key() -> PublicKey {
    PublicKey::P256(p256::PublicKey::from(signing_key().verifying_key()))
}

/// Bits of a data element filled with a repeating byte pattern.
pub(crate) fn pattern_bits(data_element: DataElement, pattern: u8) -> BitVec {
    let bytes = vec![pattern; data_element.bits().div_ceil(8)];
    bytes.view_bits::<Msb0>()[..data_element.bits()].to_bitvec()
}

pub(crate) fn record(
    svn: u8,
    gst: Gst,
    data_element: DataElement,
    pattern: u8,
) -> NavigationDataRecord {
    NavigationDataRecord::new(
        Svn::try_from(svn).unwrap(),
        gst,
        data_element,
        &pattern_bits(data_element, pattern),
    )
    .unwrap()
}

/// Parameters of a test chain.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Params {
    pub alpha: u64,
    pub chain_id: u8,
    pub hash_function: HashFunction,
    pub mac_function: MacFunction,
    /// TOWH_K. The root is 30 seconds before this hour of WN 1176.
    pub towh: u8,
}

impl Default for Params {
    fn default() -> Params {
        Params {
            alpha: DEFAULT_ALPHA,
            chain_id: 1,
            hash_function: HashFunction::Sha256,
            mac_function: MacFunction::HmacSha256,
            towh: 0x21,
        }
    }
}

/// Signs a DSM-KROOT with the test key, filling the signature and padding.
pub(crate) fn sign_dsm_kroot(nma_header: NmaHeader, dsm: &mut [u8]) {
    let message = DsmKroot::new(dsm)
        .unwrap()
        .signed_message(nma_header)
        .unwrap();
    let signature: p256::ecdsa::Signature = signing_key().sign(&message);
    dsm[SIGNATURE_RANGE].copy_from_slice(&signature.to_bytes());
    let padding = DsmKroot::new(dsm)
        .unwrap()
        .expected_padding(nma_header, public_key().ecdsa_function())
        .unwrap();
    dsm[SIGNATURE_RANGE.end..].copy_from_slice(&padding);
}

/// Test chain with 128-bit keys and 40-bit tags.
///
/// By default the chain uses HMAC-SHA-256 and SHA-256, the root is at WN
/// 1176, TOW 118770 and the chain has `n` keys after the root, one per
/// subframe.
pub(crate) struct Fixture {
    pub nma_header: NmaHeader,
    pub dsm_kroot_bytes: Vec<u8>,
    root_gst: Gst,
    mac_function: MacFunction,
    keys: Vec<Vec<u8>>,
}

impl Fixture {
    pub fn new(n: usize) -> Fixture {
        Fixture::with_params(n, Params::default())
    }

    pub fn with_alpha(n: usize, alpha: u64) -> Fixture {
        Fixture::with_params(
            n,
            Params {
                alpha,
                ..Params::default()
            },
        )
    }

    pub fn with_params(n: usize, params: Params) -> Fixture {
        // test status, chain 1, CPKS nominal
        let nma_header = NmaHeader(0x52);
        let hf: u8 = match params.hash_function {
            HashFunction::Sha256 => 0,
            HashFunction::Sha3_256 => 2,
        };
        let mf: u8 = match params.mac_function {
            MacFunction::HmacSha256 => 0,
            MacFunction::CmacAes => 1,
        };
        let mut dsm = vec![0; 104];
        dsm[..7].copy_from_slice(&[
            0x22,
            params.chain_id << 6 | hf << 2 | mf,
            0x49,
            0x21,
            0x04,
            0x98,
            params.towh,
        ]);
        dsm[7..13].copy_from_slice(&params.alpha.to_be_bytes()[2..]);
        let chain = Chain::from_dsm_kroot(nma_header, &DsmKroot::new(&dsm).unwrap()).unwrap();

        let root_gst = Gst::new(1176, u32::from(params.towh) * 3600).add_subframes(-1);
        let tail_gst = root_gst.add_subframes(i32::try_from(n).unwrap());
        let mut key = Key::from_slice(&[0x42; 16], tail_gst, &chain).unwrap();
        let mut keys = vec![key.data().to_vec()];
        for _ in 0..n {
            key = key.one_way_function();
            keys.push(key.data().to_vec());
        }
        keys.reverse();
        assert_eq!(key.gst_subframe(), root_gst);

        dsm[KROOT_RANGE].copy_from_slice(&keys[0]);
        sign_dsm_kroot(nma_header, &mut dsm);

        Fixture {
            nma_header,
            dsm_kroot_bytes: dsm,
            root_gst,
            mac_function: params.mac_function,
            keys,
        }
    }

    pub fn dsm_kroot(&self) -> DsmKroot<'_> {
        DsmKroot::new(&self.dsm_kroot_bytes).unwrap()
    }

    /// Key store with the public key of the fixture and no links.
    pub fn keystore(&self) -> KeyStore {
        KeyStore::from_public_key(public_key(), Some(2))
    }

    pub fn root_gst(&self) -> Gst {
        self.root_gst
    }

    pub fn gst(&self, j: usize) -> Gst {
        self.root_gst().add_subframes(i32::try_from(j).unwrap())
    }

    /// Key disclosed at `gst(j)`. The root key is `key(0)`.
    pub fn key(&self, j: usize) -> &[u8] {
        &self.keys[j]
    }

    pub fn mac_function(&self) -> MacFunction {
        self.mac_function
    }

    /// Tag of `tag_bits` bits computed over `message` with `key(j)`.
    pub fn tag(&self, j: usize, message: &[u8], tag_bits: usize) -> BitVec {
        let mac = self.mac_function.compute(self.key(j), message).unwrap();
        mac.view_bits::<Msb0>()[..tag_bits].to_bitvec()
    }
}
