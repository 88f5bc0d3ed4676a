//! Message bit fields.
//!
//! This module contains structures that give access to the fields of the OSNMA
//! messages: the NMA header, the DSM header, the DSM-KROOT and the DSM-PKR.
//! The structures are views over the bytes of the message, and the fields are
//! decoded when the accessors are called.

use crate::crypto::{hash_sha256, EcdsaFunction, HashFunction, MacFunction};
use crate::error::{Error, Result};
use crate::navmessage::DataElement;
use crate::types::MerkleTreeNode;
use crate::Wn;
use core::fmt;

/// NMA header.
///
/// The NMA header is the first byte of the HKROOT message. It is also the
/// first byte of the message signed in the DSM-KROOT.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct NmaHeader(pub u8);

/// NMA status.
///
/// Value of the NMAS field in the NMA header.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum NmaStatus {
    /// Reserved value (0).
    Reserved,
    /// Test (1).
    Test,
    /// Operational (2).
    Operational,
    /// Don't use (3).
    DontUse,
}

impl NmaStatus {
    /// Returns the 2-bit value of the NMAS field.
    ///
    /// This is the value that enters the MAC input of each tag.
    pub fn value(self) -> u8 {
        match self {
            NmaStatus::Reserved => 0,
            NmaStatus::Test => 1,
            NmaStatus::Operational => 2,
            NmaStatus::DontUse => 3,
        }
    }

    /// Constructs the status from the 2 least significant bits of `value`.
    pub fn from_value(value: u8) -> NmaStatus {
        match value & 0x3 {
            0 => NmaStatus::Reserved,
            1 => NmaStatus::Test,
            2 => NmaStatus::Operational,
            _ => NmaStatus::DontUse,
        }
    }
}

/// Chain and public key status.
///
/// Value of the CPKS field in the NMA header.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ChainAndPubkeyStatus {
    /// Reserved value (0, 6, 7).
    Reserved,
    /// Nominal (1).
    Nominal,
    /// End of chain (EOC) (2).
    EndOfChain,
    /// Chain revoked (CREV) (3).
    ChainRevoked,
    /// New public key (NPK) (4).
    NewPublicKey,
    /// Public key revoked (PKREV) (5).
    PublicKeyRevoked,
}

impl NmaHeader {
    /// Gives the value of the NMAS field.
    pub fn nma_status(&self) -> NmaStatus {
        NmaStatus::from_value(self.0 >> 6)
    }

    /// Gives the value of the CID field (chain ID).
    pub fn chain_id(&self) -> u8 {
        (self.0 >> 4) & 0x3
    }

    /// Gives the value of the CPKS field.
    pub fn chain_and_pubkey_status(&self) -> ChainAndPubkeyStatus {
        match (self.0 >> 1) & 0x7 {
            1 => ChainAndPubkeyStatus::Nominal,
            2 => ChainAndPubkeyStatus::EndOfChain,
            3 => ChainAndPubkeyStatus::ChainRevoked,
            4 => ChainAndPubkeyStatus::NewPublicKey,
            5 => ChainAndPubkeyStatus::PublicKeyRevoked,
            _ => ChainAndPubkeyStatus::Reserved,
        }
    }
}

impl fmt::Debug for NmaHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NmaHeader")
            .field("nma_status", &self.nma_status())
            .field("chain_id", &self.chain_id())
            .field("chain_and_pubkey_status", &self.chain_and_pubkey_status())
            .finish()
    }
}

/// DSM header.
///
/// The DSM header is the second byte of the HKROOT message. It identifies the
/// DSM and the block of the DSM carried in the HKROOT message.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct DsmHeader(pub u8);

/// Type of DSM message.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DsmType {
    /// DSM-KROOT, carrying a TESLA root key (DSM ID 0 to 11).
    Kroot,
    /// DSM-PKR, carrying a new public key (DSM ID 12 to 15).
    Pkr,
}

impl DsmHeader {
    /// Gives the value of the DSM ID field.
    pub fn dsm_id(&self) -> u8 {
        self.0 >> 4
    }

    /// Gives the value of the DSM block ID field.
    pub fn dsm_block_id(&self) -> u8 {
        self.0 & 0xf
    }

    /// Gives the type of DSM, according to the DSM ID.
    pub fn dsm_type(&self) -> DsmType {
        if self.dsm_id() >= 12 {
            DsmType::Pkr
        } else {
            DsmType::Kroot
        }
    }
}

impl fmt::Debug for DsmHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DsmHeader")
            .field("dsm_id", &self.dsm_id())
            .field("dsm_block_id", &self.dsm_block_id())
            .finish()
    }
}

/// Authentication data and key delay (ADKD).
///
/// Identifies the navigation data authenticated by a tag and the delay of the
/// key used to compute the tag.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Adkd {
    /// Galileo I/NAV ephemeris, clock and status (ADKD=0).
    InavCed,
    /// Galileo I/NAV timing parameters (ADKD=4).
    InavTiming,
    /// Slow MAC. Galileo I/NAV ephemeris, clock and status (ADKD=12).
    SlowMac,
}

impl Adkd {
    /// Returns the numeric value of the ADKD.
    pub fn value(self) -> u8 {
        match self {
            Adkd::InavCed => 0,
            Adkd::InavTiming => 4,
            Adkd::SlowMac => 12,
        }
    }

    /// Returns the number of subframes between the tag and its key.
    ///
    /// The key used for a tag transmitted in subframe t is the key disclosed
    /// in subframe t + 1 for ADKD 0 and 4, and in subframe t + 11 for
    /// ADKD 12.
    pub fn key_delay_subframes(self) -> i32 {
        match self {
            Adkd::InavCed | Adkd::InavTiming => 1,
            Adkd::SlowMac => 11,
        }
    }

    /// Returns the navigation data element authenticated by this ADKD.
    pub fn data_element(self) -> DataElement {
        match self {
            Adkd::InavCed | Adkd::SlowMac => DataElement::CedAndStatus,
            Adkd::InavTiming => DataElement::TimingParameters,
        }
    }
}

impl TryFrom<u8> for Adkd {
    type Error = Error;

    fn try_from(value: u8) -> Result<Adkd> {
        match value {
            0 => Ok(Adkd::InavCed),
            4 => Ok(Adkd::InavTiming),
            12 => Ok(Adkd::SlowMac),
            _ => Err(Error::ReservedField),
        }
    }
}

// Fixed part of the DSM-KROOT before the root key: header fields and alpha
const KROOT_FIXED_BYTES: usize = 13;

/// DSM-KROOT message.
///
/// The DSM-KROOT contains the root key of a TESLA chain, together with the
/// chain parameters and the ECDSA signature of the root key.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct DsmKroot<'a>(&'a [u8]);

impl<'a> DsmKroot<'a> {
    /// Constructs a view of a DSM-KROOT message.
    ///
    /// Returns [`Error::InvalidLength`] if `data` is too short to hold the
    /// fixed fields.
    pub fn new(data: &'a [u8]) -> Result<DsmKroot<'a>> {
        if data.len() < KROOT_FIXED_BYTES {
            return Err(Error::InvalidLength);
        }
        Ok(DsmKroot(data))
    }

    /// Gives the data of the message.
    pub fn data(&self) -> &'a [u8] {
        self.0
    }

    /// Gives the number of DSM blocks, according to the NB_DK field.
    ///
    /// Returns `None` if the NB_DK field has a reserved value.
    pub fn number_of_blocks(&self) -> Option<usize> {
        match self.0[0] >> 4 {
            nb @ 1..=8 => Some(usize::from(nb) + 6),
            _ => None,
        }
    }

    /// Gives the value of the PKID field (public key ID).
    pub fn public_key_id(&self) -> u8 {
        self.0[0] & 0xf
    }

    /// Gives the value of the CIDKR field (KROOT chain ID).
    pub fn kroot_chain_id(&self) -> u8 {
        self.0[1] >> 6
    }

    /// Gives the hash function of the chain, according to the HF field.
    ///
    /// Returns `None` if the field has a reserved value.
    pub fn hash_function(&self) -> Option<HashFunction> {
        match (self.0[1] >> 2) & 0x3 {
            0 => Some(HashFunction::Sha256),
            2 => Some(HashFunction::Sha3_256),
            _ => None,
        }
    }

    /// Gives the MAC function of the chain, according to the MF field.
    ///
    /// Returns `None` if the field has a reserved value.
    pub fn mac_function(&self) -> Option<MacFunction> {
        match self.0[1] & 0x3 {
            0 => Some(MacFunction::HmacSha256),
            1 => Some(MacFunction::CmacAes),
            _ => None,
        }
    }

    /// Gives the key size in bits, according to the KS field.
    ///
    /// Returns `None` if the field has a reserved value.
    pub fn key_size(&self) -> Option<usize> {
        match self.0[2] >> 4 {
            0 => Some(96),
            1 => Some(104),
            2 => Some(112),
            3 => Some(120),
            4 => Some(128),
            5 => Some(160),
            6 => Some(192),
            7 => Some(224),
            8 => Some(256),
            _ => None,
        }
    }

    /// Gives the tag size in bits, according to the TS field.
    ///
    /// Returns `None` if the field has a reserved value.
    pub fn tag_size(&self) -> Option<usize> {
        match self.0[2] & 0xf {
            5 => Some(20),
            6 => Some(24),
            7 => Some(28),
            8 => Some(32),
            9 => Some(40),
            _ => None,
        }
    }

    /// Gives the value of the MACLT field (MAC look-up table).
    pub fn mac_lookup_table(&self) -> u8 {
        self.0[3]
    }

    /// Gives the week number of the root key (WN_K field).
    pub fn kroot_wn(&self) -> Wn {
        Wn::from(self.0[4] & 0xf) << 8 | Wn::from(self.0[5])
    }

    /// Gives the time of week of the root key in hours (TOWH_K field).
    pub fn kroot_towh(&self) -> u8 {
        self.0[6]
    }

    /// Gives the 48-bit random pattern alpha.
    pub fn alpha(&self) -> u64 {
        self.0[7..KROOT_FIXED_BYTES]
            .iter()
            .fold(0, |acc, &b| (acc << 8) | u64::from(b))
    }

    fn key_size_bytes(&self) -> Result<usize> {
        self.key_size().map(|s| s / 8).ok_or(Error::ReservedField)
    }

    /// Gives the root key.
    ///
    /// Returns [`Error::ReservedField`] if the key size is reserved and
    /// [`Error::InvalidLength`] if the message is too short.
    pub fn kroot(&self) -> Result<&'a [u8]> {
        let size = self.key_size_bytes()?;
        self.0
            .get(KROOT_FIXED_BYTES..KROOT_FIXED_BYTES + size)
            .ok_or(Error::InvalidLength)
    }

    /// Gives the digital signature of the root key.
    ///
    /// The size of the signature depends on the ECDSA function, which is
    /// determined by the public key used to verify it.
    pub fn digital_signature(&self, ecdsa: EcdsaFunction) -> Result<&'a [u8]> {
        let start = KROOT_FIXED_BYTES + self.key_size_bytes()?;
        self.0
            .get(start..start + ecdsa.signature_bytes())
            .ok_or(Error::InvalidLength)
    }

    /// Gives the padding after the digital signature.
    pub fn padding(&self, ecdsa: EcdsaFunction) -> Result<&'a [u8]> {
        let start = KROOT_FIXED_BYTES + self.key_size_bytes()? + ecdsa.signature_bytes();
        self.0.get(start..).ok_or(Error::InvalidLength)
    }

    /// Builds the message covered by the digital signature.
    ///
    /// This is the NMA header followed by the DSM-KROOT fields from CIDKR up
    /// to and including the root key.
    pub fn signed_message(&self, nma_header: NmaHeader) -> Result<Vec<u8>> {
        let kroot = self.kroot()?;
        let mut message = Vec::with_capacity(KROOT_FIXED_BYTES + kroot.len());
        message.push(nma_header.0);
        message.extend_from_slice(&self.0[1..KROOT_FIXED_BYTES]);
        message.extend_from_slice(kroot);
        Ok(message)
    }

    /// Computes the padding expected for this message.
    ///
    /// The padding is the truncation of the SHA-256 of the signed message
    /// concatenated with the digital signature.
    pub fn expected_padding(&self, nma_header: NmaHeader, ecdsa: EcdsaFunction) -> Result<Vec<u8>> {
        let mut message = self.signed_message(nma_header)?;
        message.extend_from_slice(self.digital_signature(ecdsa)?);
        let hash = hash_sha256(&message);
        let len = self.padding(ecdsa)?.len();
        hash.get(..len).map(<[u8]>::to_vec).ok_or(Error::InvalidLength)
    }

    /// Checks the padding of the message.
    pub fn check_padding(&self, nma_header: NmaHeader, ecdsa: EcdsaFunction) -> Result<bool> {
        Ok(self.padding(ecdsa)? == self.expected_padding(nma_header, ecdsa)?.as_slice())
    }
}

impl fmt::Debug for DsmKroot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DsmKroot")
            .field("number_of_blocks", &self.number_of_blocks())
            .field("public_key_id", &self.public_key_id())
            .field("kroot_chain_id", &self.kroot_chain_id())
            .field("hash_function", &self.hash_function())
            .field("mac_function", &self.mac_function())
            .field("key_size", &self.key_size())
            .field("tag_size", &self.tag_size())
            .field("mac_lookup_table", &self.mac_lookup_table())
            .field("kroot_wn", &self.kroot_wn())
            .field("kroot_towh", &self.kroot_towh())
            .field("alpha", &self.alpha())
            .field("kroot", &self.kroot().ok())
            .finish()
    }
}

/// New public key type in a DSM-PKR.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum NewPublicKeyType {
    /// An ECDSA public key.
    EcdsaKey(EcdsaFunction),
    /// OSNMA alert message (OAM).
    OsnmaAlertMessage,
    /// Reserved value.
    Reserved,
}

const PKR_ITN_START: usize = 1;
const PKR_LEAF_START: usize = PKR_ITN_START + 4 * 32;

/// DSM-PKR message.
///
/// The DSM-PKR carries a new public key together with the intermediate tree
/// nodes needed to authenticate it against the Merkle tree root.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct DsmPkr<'a>(&'a [u8]);

impl<'a> DsmPkr<'a> {
    /// Constructs a view of a DSM-PKR message.
    ///
    /// Returns [`Error::InvalidLength`] if `data` is too short to hold the
    /// intermediate tree nodes and the key type field.
    pub fn new(data: &'a [u8]) -> Result<DsmPkr<'a>> {
        if data.len() <= PKR_LEAF_START {
            return Err(Error::InvalidLength);
        }
        Ok(DsmPkr(data))
    }

    /// Gives the number of DSM blocks, according to the NB_DP field.
    pub fn number_of_blocks(&self) -> Option<usize> {
        match self.0[0] >> 4 {
            nb @ 7..=10 => Some(usize::from(nb) + 6),
            _ => None,
        }
    }

    /// Gives the value of the MID field (message ID).
    pub fn message_id(&self) -> u8 {
        self.0[0] & 0xf
    }

    /// Gives the intermediate tree node `n` (0 to 3).
    ///
    /// # Panics
    ///
    /// Panics if `n` is not between 0 and 3.
    pub fn intermediate_tree_node(&self, n: usize) -> &'a MerkleTreeNode {
        assert!(n < 4);
        let start = PKR_ITN_START + 32 * n;
        self.0[start..start + 32]
            .try_into()
            .expect("slice has the size of a tree node")
    }

    /// Gives the new public key type, according to the NPKT field.
    pub fn new_public_key_type(&self) -> NewPublicKeyType {
        match self.0[PKR_LEAF_START] >> 4 {
            1 => NewPublicKeyType::EcdsaKey(EcdsaFunction::P256Sha256),
            3 => NewPublicKeyType::EcdsaKey(EcdsaFunction::P521Sha512),
            4 => NewPublicKeyType::OsnmaAlertMessage,
            _ => NewPublicKeyType::Reserved,
        }
    }

    /// Gives the ID of the new public key (NPKID field).
    pub fn new_public_key_id(&self) -> u8 {
        self.0[PKR_LEAF_START] & 0xf
    }

    fn key_size_bytes(&self) -> Option<usize> {
        match self.new_public_key_type() {
            NewPublicKeyType::EcdsaKey(EcdsaFunction::P256Sha256) => Some(33),
            NewPublicKeyType::EcdsaKey(EcdsaFunction::P521Sha512) => Some(67),
            // the alert message fills the key field of a 16-block DSM-PKR
            NewPublicKeyType::OsnmaAlertMessage => Some(16 * 13 - PKR_LEAF_START - 1),
            NewPublicKeyType::Reserved => None,
        }
    }

    /// Gives the new public key, as a compressed SEC1 point.
    ///
    /// Returns `None` if the key type is reserved or the message is too
    /// short.
    pub fn new_public_key(&self) -> Option<&'a [u8]> {
        let size = self.key_size_bytes()?;
        self.0.get(PKR_LEAF_START + 1..PKR_LEAF_START + 1 + size)
    }

    /// Gives the leaf of the Merkle tree.
    ///
    /// The leaf is the NPKT and NPKID byte followed by the new public key.
    pub fn merkle_tree_leaf(&self) -> Option<&'a [u8]> {
        let size = self.key_size_bytes()?;
        self.0.get(PKR_LEAF_START..PKR_LEAF_START + 1 + size)
    }
}

impl fmt::Debug for DsmPkr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DsmPkr")
            .field("number_of_blocks", &self.number_of_blocks())
            .field("message_id", &self.message_id())
            .field("new_public_key_type", &self.new_public_key_type())
            .field("new_public_key_id", &self.new_public_key_id())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    // DSM-KROOT broadcast on 2022-03-07 ~9:00 UTC, NMA header 0x52
    const DSM_KROOT: [u8; 104] = hex!(
        "22 50 49 21 04 98 21 25 d3 96 4d a3 a2 84 1e 1d
         e4 d4 58 c0 e9 84 24 76 e0 04 66 6c f3 79 58 de
         28 51 97 a2 63 53 f1 a4 c6 6d 7e 3d 29 18 53 ba
         5a 13 c9 c3 48 4a 26 77 70 11 2a 13 38 3e a5 2d
         3a 01 9d 5b 6e 1d d1 87 b9 45 3c df 06 ca 7f 34
         ea 14 97 52 5a af 18 f1 f9 f1 fc cb 12 29 89 77
         35 c0 21 b0 41 73 93 b5"
    );

    #[test]
    fn nma_header() {
        let header = NmaHeader(0x52);
        assert_eq!(header.nma_status(), NmaStatus::Test);
        assert_eq!(header.chain_id(), 1);
        assert_eq!(
            header.chain_and_pubkey_status(),
            ChainAndPubkeyStatus::Nominal
        );
        let header = NmaHeader(0b1000_1000);
        assert_eq!(header.nma_status(), NmaStatus::Operational);
        assert_eq!(header.chain_id(), 0);
        assert_eq!(
            header.chain_and_pubkey_status(),
            ChainAndPubkeyStatus::NewPublicKey
        );
        assert_eq!(NmaHeader(0xc0).nma_status(), NmaStatus::DontUse);
    }

    #[test]
    fn dsm_header() {
        let header = DsmHeader(0x27);
        assert_eq!(header.dsm_id(), 2);
        assert_eq!(header.dsm_block_id(), 7);
        assert_eq!(header.dsm_type(), DsmType::Kroot);
        assert_eq!(DsmHeader(0xc0).dsm_type(), DsmType::Pkr);
    }

    #[test]
    fn dsm_kroot() {
        let kroot = DsmKroot::new(&DSM_KROOT).unwrap();
        assert_eq!(kroot.number_of_blocks(), Some(8));
        assert_eq!(kroot.public_key_id(), 2);
        assert_eq!(kroot.kroot_chain_id(), 1);
        assert_eq!(kroot.hash_function(), Some(HashFunction::Sha256));
        assert_eq!(kroot.mac_function(), Some(MacFunction::HmacSha256));
        assert_eq!(kroot.key_size(), Some(128));
        assert_eq!(kroot.tag_size(), Some(40));
        assert_eq!(kroot.mac_lookup_table(), 0x21);
        assert_eq!(kroot.kroot_wn(), 1176);
        assert_eq!(kroot.kroot_towh(), 0x21);
        assert_eq!(kroot.alpha(), 0x25d3964da3a2);
        assert_eq!(
            kroot.kroot().unwrap(),
            &hex!("84 1e 1d e4 d4 58 c0 e9 84 24 76 e0 04 66 6c f3")
        );
        let signature = kroot.digital_signature(EcdsaFunction::P256Sha256).unwrap();
        assert_eq!(signature.len(), 64);
        assert_eq!(signature[0], 0x79);
        assert_eq!(kroot.padding(EcdsaFunction::P256Sha256).unwrap().len(), 11);
        let message = kroot.signed_message(NmaHeader(0x52)).unwrap();
        assert_eq!(message.len(), 29);
        assert_eq!(message[0], 0x52);
        assert_eq!(&message[1..], &DSM_KROOT[1..29]);
    }

    #[test]
    fn dsm_kroot_too_short() {
        assert!(matches!(DsmKroot::new(&DSM_KROOT[..12]), Err(Error::InvalidLength)));
        let kroot = DsmKroot::new(&DSM_KROOT[..40]).unwrap();
        assert!(kroot.kroot().is_ok());
        assert!(matches!(
            kroot.digital_signature(EcdsaFunction::P256Sha256),
            Err(Error::InvalidLength)
        ));
    }

    #[test]
    fn adkd() {
        assert_eq!(Adkd::try_from(0).unwrap(), Adkd::InavCed);
        assert_eq!(Adkd::try_from(4).unwrap(), Adkd::InavTiming);
        assert_eq!(Adkd::try_from(12).unwrap(), Adkd::SlowMac);
        assert!(matches!(Adkd::try_from(1), Err(Error::ReservedField)));
        assert_eq!(Adkd::SlowMac.key_delay_subframes(), 11);
        assert_eq!(Adkd::SlowMac.data_element(), DataElement::CedAndStatus);
        assert_eq!(Adkd::InavTiming.data_element(), DataElement::TimingParameters);
    }
}
