//! TESLA keys.
//!
//! This module contains the [`Chain`] struct, which holds the parameters of a
//! TESLA chain, and the [`Key`] struct, which represents a key of the chain.
//! Keys carry a validation status as a type parameter. A key becomes
//! [`Validated`] either by checking the ECDSA signature of a DSM-KROOT or by
//! checking it against a validated key of the same chain with the one-way
//! function.

use crate::bitfields::{DsmKroot, NmaHeader, NmaStatus};
use crate::crypto::{HashFunction, MacFunction};
use crate::error::{Error, Result};
use crate::gst::{Gst, Tow};
use crate::pubkey::PublicKey;
use crate::types::BitSlice;
use crate::validation::{NotValidated, Validated};
use bitvec::prelude::*;
use core::fmt;

const MAX_KEY_BYTES: usize = 32;

/// TESLA chain parameters.
///
/// Two roots belong to the same chain only if all the parameters are equal.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Chain {
    status: ChainStatus,
    id: u8,
    public_key_id: u8,
    hash_function: HashFunction,
    mac_function: MacFunction,
    key_size_bytes: usize,
    tag_size_bits: usize,
    maclt: u8,
    alpha: u64,
}

/// Status of a TESLA chain.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ChainStatus {
    /// Test chain.
    Test,
    /// Operational chain.
    Operational,
}

impl ChainStatus {
    /// Returns the NMA status corresponding to the chain status.
    pub fn nma_status(self) -> NmaStatus {
        match self {
            ChainStatus::Test => NmaStatus::Test,
            ChainStatus::Operational => NmaStatus::Operational,
        }
    }
}

impl Chain {
    /// Extracts the chain parameters from a DSM-KROOT.
    ///
    /// The NMA header transmitted with the DSM-KROOT gives the chain status.
    /// The chain ID is the CIDKR field of the DSM-KROOT, which differs from
    /// the CID of the NMA header while the next chain is announced. Returns [`Error::ReservedField`] if the NMA status is
    /// "don't use" or reserved, or if any of the parameters in the DSM-KROOT
    /// has a reserved value.
    pub fn from_dsm_kroot(nma_header: NmaHeader, dsm_kroot: &DsmKroot) -> Result<Chain> {
        let status = match nma_header.nma_status() {
            NmaStatus::Test => ChainStatus::Test,
            NmaStatus::Operational => ChainStatus::Operational,
            status => {
                log::error!("cannot build chain with NMA status {status:?}");
                return Err(Error::ReservedField);
            }
        };
        let reserved = || {
            log::error!("reserved field in {dsm_kroot:?}");
            Error::ReservedField
        };
        let hash_function = dsm_kroot.hash_function().ok_or_else(reserved)?;
        let mac_function = dsm_kroot.mac_function().ok_or_else(reserved)?;
        let key_size_bytes = dsm_kroot.key_size().ok_or_else(reserved)? / 8;
        let tag_size_bits = dsm_kroot.tag_size().ok_or_else(reserved)?;
        Ok(Chain {
            status,
            id: dsm_kroot.kroot_chain_id(),
            public_key_id: dsm_kroot.public_key_id(),
            hash_function,
            mac_function,
            key_size_bytes,
            tag_size_bits,
            maclt: dsm_kroot.mac_lookup_table(),
            alpha: dsm_kroot.alpha(),
        })
    }

    /// Gives the chain status.
    pub fn chain_status(&self) -> ChainStatus {
        self.status
    }

    /// Gives the chain ID.
    pub fn chain_id(&self) -> u8 {
        self.id
    }

    /// Gives the ID of the public key that signs the chain root.
    pub fn public_key_id(&self) -> u8 {
        self.public_key_id
    }

    /// Gives the hash function used by the one-way function.
    pub fn hash_function(&self) -> HashFunction {
        self.hash_function
    }

    /// Gives the MAC function used to compute the tags.
    pub fn mac_function(&self) -> MacFunction {
        self.mac_function
    }

    /// Gives the key size in bytes.
    pub fn key_size_bytes(&self) -> usize {
        self.key_size_bytes
    }

    /// Gives the key size in bits.
    pub fn key_size_bits(&self) -> usize {
        self.key_size_bytes() * 8
    }

    /// Gives the tag size in bits.
    pub fn tag_size_bits(&self) -> usize {
        self.tag_size_bits
    }

    /// Gives the MAC look-up table ID.
    pub fn mac_lookup_table(&self) -> u8 {
        self.maclt
    }

    /// Gives the 48-bit random pattern alpha.
    pub fn alpha(&self) -> u64 {
        self.alpha
    }
}

/// TESLA key.
///
/// A key of a TESLA chain, identified by the GST of the start of the subframe
/// in which it is disclosed. The type parameter `V` is the validation status.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Key<V> {
    data: [u8; MAX_KEY_BYTES],
    chain: Chain,
    gst_subframe: Gst,
    _validated: V,
}

/// Errors produced when validating a key against another key.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ValidationError {
    /// The one-way function does not give the trusted key.
    WrongOneWayFunction,
    /// The keys belong to different chains.
    DifferentChain,
    /// The key to validate is not later than the trusted key.
    DoesNotFollow,
    /// The number of one-way function applications exceeds the limit.
    TooManyDerivations,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::WrongOneWayFunction => "one-way function check failed".fmt(f),
            ValidationError::DifferentChain => "keys belong to different chains".fmt(f),
            ValidationError::DoesNotFollow => "key does not follow the trusted key".fmt(f),
            ValidationError::TooManyDerivations => "too many derivations needed".fmt(f),
        }
    }
}

impl std::error::Error for ValidationError {}

impl<V> Key<V> {
    /// Gives the GST of the subframe in which the key is disclosed.
    pub fn gst_subframe(&self) -> Gst {
        self.gst_subframe
    }

    /// Gives the chain the key belongs to.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Gives the key bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.chain.key_size_bytes]
    }

    fn force_valid(self) -> Key<Validated> {
        Key {
            data: self.data,
            chain: self.chain,
            gst_subframe: self.gst_subframe,
            _validated: Validated {},
        }
    }
}

impl<V> fmt::Debug for Key<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("data", &hex::encode(self.data()))
            .field("gst_subframe", &self.gst_subframe)
            .field("chain_id", &self.chain.id)
            .finish()
    }
}

impl Key<NotValidated> {
    /// Constructs a key from its bytes.
    ///
    /// The GST is rounded down to the start of its subframe. Returns
    /// [`Error::InvalidKeyLength`] if the length of `slice` is not the key
    /// size of the chain.
    pub fn from_slice(slice: &[u8], gst: Gst, chain: &Chain) -> Result<Key<NotValidated>> {
        if slice.len() != chain.key_size_bytes {
            log::error!(
                "key of {} bytes does not match chain key size {}",
                slice.len(),
                chain.key_size_bytes
            );
            return Err(Error::InvalidKeyLength);
        }
        let mut data = [0; MAX_KEY_BYTES];
        data[..slice.len()].copy_from_slice(slice);
        Ok(Key {
            data,
            chain: *chain,
            gst_subframe: gst.gst_subframe(),
            _validated: NotValidated {},
        })
    }
}

impl Key<Validated> {
    /// Extracts and validates the root key of a DSM-KROOT.
    ///
    /// The ECDSA signature over the NMA header and the DSM-KROOT fields is
    /// checked with `pubkey`, as well as the padding of the DSM-KROOT. On
    /// success the root key is returned as a validated key at the GST given
    /// by the WN_K and TOWH_K fields minus 30 seconds, which is the subframe
    /// preceding the first key of the chain.
    ///
    /// Returns [`Error::RootAuthenticationFailed`] if the signature or the
    /// padding are wrong, and [`Error::ReservedField`] if WN_K and TOWH_K do
    /// not give a valid time.
    pub fn from_dsm_kroot(
        nma_header: NmaHeader,
        dsm_kroot: &DsmKroot,
        pubkey: &PublicKey,
    ) -> Result<Key<Validated>> {
        let chain = Chain::from_dsm_kroot(nma_header, dsm_kroot)?;
        let ecdsa = pubkey.ecdsa_function();
        let message = dsm_kroot.signed_message(nma_header)?;
        let signature = dsm_kroot.digital_signature(ecdsa)?;
        if !pubkey.verify(&message, signature)? {
            log::error!("wrong {} signature for {dsm_kroot:?}", pubkey.key_type());
            return Err(Error::RootAuthenticationFailed);
        }
        if !dsm_kroot.check_padding(nma_header, ecdsa)? {
            log::error!("wrong padding for {dsm_kroot:?}");
            return Err(Error::RootAuthenticationFailed);
        }
        let (wn, towh) = (dsm_kroot.kroot_wn(), dsm_kroot.kroot_towh());
        if towh >= 168 || (wn == 0 && towh == 0) {
            log::error!("invalid KROOT time WN {wn} TOWH {towh} in {dsm_kroot:?}");
            return Err(Error::ReservedField);
        }
        let gst = Gst::new(wn, Tow::from(towh) * 3600).add_subframes(-1);
        let key = Key::from_slice(dsm_kroot.kroot()?, gst, &chain)?;
        log::info!("verified KROOT {key:?} with {}", pubkey.key_type());
        Ok(key.force_valid())
    }
}

impl<V: Clone> Key<V> {
    /// Applies the TESLA one-way function.
    ///
    /// Returns the key of the previous subframe, computed as the truncated
    /// hash of this key, the GST of the previous subframe and alpha.
    pub fn one_way_function(&self) -> Key<V> {
        // 10 bytes are needed for GST (32 bits) || alpha (48 bits)
        let mut buffer = [0; MAX_KEY_BYTES + 10];
        let size = self.chain.key_size_bytes;
        buffer[..size].copy_from_slice(&self.data[..size]);
        let previous_subframe = self.gst_subframe.add_subframes(-1);
        let gst_bits = buffer[size..size + 4].view_bits_mut::<Msb0>();
        gst_bits[0..12].store_be(previous_subframe.wn() % 4096);
        gst_bits[12..32].store_be(previous_subframe.tow());
        buffer[size + 4..size + 10].copy_from_slice(&self.chain.alpha.to_be_bytes()[2..]);
        let hash = self.chain.hash_function.digest(&buffer[..size + 10]);
        let mut new_key = [0; MAX_KEY_BYTES];
        new_key[..size].copy_from_slice(&hash[..size]);
        Key {
            data: new_key,
            chain: self.chain,
            gst_subframe: previous_subframe,
            _validated: self._validated.clone(),
        }
    }
}

impl Key<Validated> {
    /// Validates a later key against this key.
    ///
    /// The one-way function is applied to `other` until reaching the subframe
    /// of `self`, and the result is compared with `self`. At most
    /// `max_derivations` applications are attempted.
    pub fn validate_key<V: Clone>(
        &self,
        other: &Key<V>,
        max_derivations: usize,
    ) -> core::result::Result<Key<Validated>, ValidationError> {
        if self.chain != other.chain {
            return Err(ValidationError::DifferentChain);
        }
        if self.gst_subframe >= other.gst_subframe {
            return Err(ValidationError::DoesNotFollow);
        }
        let derivations = other.gst_subframe.subframes_since(self.gst_subframe);
        if usize::try_from(derivations).map_or(true, |d| d > max_derivations) {
            log::warn!(
                "{derivations} derivations needed from {:?} to {:?}",
                self.gst_subframe,
                other.gst_subframe
            );
            return Err(ValidationError::TooManyDerivations);
        }
        let mut derived_key = other.clone();
        for _ in 0..derivations {
            derived_key = derived_key.one_way_function();
        }
        debug_assert_eq!(derived_key.gst_subframe, self.gst_subframe);
        if derived_key.data() == self.data() {
            Ok(other.clone().force_valid())
        } else {
            Err(ValidationError::WrongOneWayFunction)
        }
    }

    /// Computes the full MAC of `message` with this key.
    ///
    /// Returns [`Error::InvalidKeyLength`] if the chain uses CMAC-AES with a
    /// key size other than 128 bits.
    pub fn compute_mac(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.chain.mac_function.compute(self.data(), message)
    }

    /// Checks a tag against the MAC of `message`.
    ///
    /// The tag is compared with the first `tag.len()` bits of the MAC. A tag
    /// longer than the MAC never matches.
    pub fn check_tag(&self, message: &[u8], tag: &BitSlice) -> Result<bool> {
        let mac = self.compute_mac(message)?;
        let computed = BitSlice::from_slice(&mac);
        Ok(tag.len() <= computed.len() && &computed[..tag.len()] == tag)
    }
}
