//! Key store.
//!
//! The [`KeyStore`] owns the ECDSA public key used to authenticate chain
//! roots and the live [`KeyChain`] of disclosed TESLA keys. It also handles
//! persistence of the public key as a PEM file and rekeying from DSM-PKR
//! messages. No cryptographic verification of chain keys happens here.

use crate::bitfields::{DsmPkr, NewPublicKeyType};
use crate::chain::KeyChain;
use crate::error::{Error, Result};
use crate::merkle_tree::MerkleTree;
use crate::pubkey::{decode_public_key, PublicKey};
use std::path::Path;

/// Public key and key chain storage.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct KeyStore {
    pubkey: Option<PublicKey>,
    pkid: Option<u8>,
    links: KeyChain,
}

impl KeyStore {
    /// Constructs an empty key store, without public key.
    pub fn new() -> KeyStore {
        KeyStore::default()
    }

    /// Constructs a key store holding a public key.
    pub fn from_public_key(pubkey: PublicKey, pkid: Option<u8>) -> KeyStore {
        let mut store = KeyStore::new();
        store.set_public_key_material(pubkey, pkid);
        store
    }

    /// Decodes and stores a public key.
    ///
    /// See [`decode_public_key`] for the accepted formats. The stored key is
    /// only replaced if decoding succeeds. The PKID is cleared.
    pub fn set_public_key(&mut self, bytes: &[u8]) -> Result<()> {
        let pubkey = decode_public_key(bytes)?;
        self.set_public_key_material(pubkey, None);
        Ok(())
    }

    /// Stores a decoded public key, with an optional PKID.
    pub fn set_public_key_material(&mut self, pubkey: PublicKey, pkid: Option<u8>) {
        log::info!("using {} public key with PKID {pkid:?}", pubkey.key_type());
        self.pubkey = Some(pubkey);
        self.pkid = pkid;
    }

    /// Returns `true` if a public key is stored.
    pub fn have_public_key(&self) -> bool {
        self.pubkey.is_some()
    }

    /// Gives the stored public key.
    pub fn public_key(&self) -> Option<&PublicKey> {
        self.pubkey.as_ref()
    }

    /// Gives the PKID of the stored public key, if known.
    pub fn pkid(&self) -> Option<u8> {
        self.pkid
    }

    /// Gives the type of the stored public key.
    ///
    /// This is `"ECDSA P-256"`, `"ECDSA P-521"` or an empty string if there
    /// is no public key.
    pub fn get_public_key_type(&self) -> &str {
        self.pubkey.as_ref().map_or("", PublicKey::key_type)
    }

    /// Writes the public key to a PEM file.
    ///
    /// An existing file is overwritten. Returns [`Error::MissingPublicKey`]
    /// if there is no public key.
    pub fn store_public_key<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let pubkey = self.pubkey.as_ref().ok_or(Error::MissingPublicKey)?;
        let pem = pubkey.encode_pem()?;
        std::fs::write(path.as_ref(), pem)?;
        log::info!("stored public key in {}", path.as_ref().display());
        Ok(())
    }

    /// Reads a public key from a PEM file.
    ///
    /// Public keys are never encrypted, so `password` is not used. The
    /// returned store has no PKID and an empty key chain.
    pub fn load_public_key<P: AsRef<Path>>(path: P, password: Option<&str>) -> Result<KeyStore> {
        if password.is_some() {
            log::warn!("ignoring password for public key file");
        }
        let pem = std::fs::read_to_string(path.as_ref())?;
        let pubkey = PublicKey::decode_pem(&pem)?;
        log::info!(
            "loaded {} public key from {}",
            pubkey.key_type(),
            path.as_ref().display()
        );
        Ok(KeyStore::from_public_key(pubkey, None))
    }

    /// Replaces the public key with the one in a DSM-PKR.
    ///
    /// The DSM-PKR is first authenticated against the Merkle tree. OSNMA
    /// alert messages and reserved key types give [`Error::ReservedField`].
    pub fn update_from_pkr(&mut self, dsm_pkr: DsmPkr, merkle_tree: &MerkleTree) -> Result<()> {
        match dsm_pkr.new_public_key_type() {
            NewPublicKeyType::EcdsaKey(_) => (),
            NewPublicKeyType::OsnmaAlertMessage => {
                log::warn!("received OSNMA alert message in {dsm_pkr:?}");
                return Err(Error::ReservedField);
            }
            NewPublicKeyType::Reserved => {
                log::error!("reserved key type in {dsm_pkr:?}");
                return Err(Error::ReservedField);
            }
        }
        merkle_tree.validate_pkr(dsm_pkr)?;
        let key = dsm_pkr.new_public_key().ok_or(Error::InvalidLength)?;
        let pubkey = decode_public_key(key)?;
        if self.pubkey.as_ref() == Some(&pubkey) {
            log::trace!("public key from {dsm_pkr:?} already in use");
            return Ok(());
        }
        self.set_public_key_material(pubkey, Some(dsm_pkr.new_public_key_id()));
        Ok(())
    }

    /// Gives the key chain.
    pub fn links(&self) -> &KeyChain {
        &self.links
    }

    /// Gives mutable access to the key chain.
    pub fn links_mut(&mut self) -> &mut KeyChain {
        &mut self.links
    }
}
