//! TESLA key chain verification.
//!
//! The [`KeyChain`] is the table of disclosed TESLA keys, indexed by the GST
//! of the subframe in which each key is disclosed. Every slot holds a
//! [`Link`] with an explicit trust state. The [`ChainVerifier`] anchors chain
//! roots after checking their ECDSA signature and promotes disclosed keys to
//! trusted status by hashing them back to an earlier trusted key of the same
//! chain.
//!
//! During a chain renewal the root of the next chain is broadcast while the
//! chain in force is still used, so the table can hold the roots of two
//! chains with different IDs.

use crate::bitfields::{DsmKroot, NmaHeader};
use crate::error::{Error, Result};
use crate::keystore::KeyStore;
use crate::tesla::{Chain, Key, ValidationError};
use crate::validation::Validated;
use crate::Gst;
use std::collections::{BTreeMap, BTreeSet};

const MAX_CHAINS: usize = 2;

/// Trust state of a slot of the key chain.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TrustState {
    /// The key has been received but not traced back to a trusted key.
    Untrusted,
    /// The key hashes back to a trusted key.
    ChainValid,
    /// The key is the chain root, authenticated by its ECDSA signature.
    Anchored,
    /// The key does not hash back to the trusted chain, or conflicting keys
    /// were received for the slot.
    ChainBroken,
}

/// A slot of the key chain.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Link {
    /// Key bytes as received, with the ID of the chain in force when the key
    /// was disclosed, if known.
    Untrusted(Vec<u8>, Option<u8>),
    /// Key validated with the one-way function.
    ChainValid(Key<Validated>),
    /// Chain root key.
    Anchored(Key<Validated>),
    /// Broken slot.
    Broken,
}

impl Link {
    /// Gives the trust state of the link.
    pub fn state(&self) -> TrustState {
        match self {
            Link::Untrusted(..) => TrustState::Untrusted,
            Link::ChainValid(_) => TrustState::ChainValid,
            Link::Anchored(_) => TrustState::Anchored,
            Link::Broken => TrustState::ChainBroken,
        }
    }

    /// Gives the key if the link is trusted.
    pub fn trusted_key(&self) -> Option<&Key<Validated>> {
        match self {
            Link::ChainValid(key) | Link::Anchored(key) => Some(key),
            _ => None,
        }
    }

    fn bytes(&self) -> Option<&[u8]> {
        match self {
            Link::Untrusted(bytes, _) => Some(bytes),
            Link::ChainValid(key) | Link::Anchored(key) => Some(key.data()),
            Link::Broken => None,
        }
    }
}

/// Table of the links of the TESLA chains.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct KeyChain {
    links: BTreeMap<Gst, Link>,
}

impl KeyChain {
    /// Constructs an empty key chain.
    pub fn new() -> KeyChain {
        KeyChain::default()
    }

    /// Gives the parameters of the chain in force, if any.
    ///
    /// This is the chain of the most recent key validated with the one-way
    /// function or, before any key is validated, of the most recent root.
    pub fn chain(&self) -> Option<&Chain> {
        self.links
            .values()
            .rev()
            .find_map(|link| match link {
                Link::ChainValid(key) => Some(key.chain()),
                _ => None,
            })
            .or_else(|| self.anchored_roots().next_back().map(Key::chain))
    }

    /// Iterates over the anchored chain roots in increasing GST order.
    pub fn anchored_roots(&self) -> impl DoubleEndedIterator<Item = &Key<Validated>> {
        self.links.values().filter_map(|link| match link {
            Link::Anchored(key) => Some(key),
            _ => None,
        })
    }

    /// Gives the link at slot `gst`.
    pub fn get(&self, gst: Gst) -> Option<&Link> {
        self.links.get(&gst)
    }

    /// Gives the trust state of slot `gst`.
    pub fn state(&self, gst: Gst) -> Option<TrustState> {
        self.get(gst).map(Link::state)
    }

    /// Gives the key at slot `gst` if it is trusted.
    pub fn trusted_key(&self, gst: Gst) -> Option<&Key<Validated>> {
        self.get(gst).and_then(Link::trusted_key)
    }

    /// Gives the root of the chain in force, if any.
    pub fn anchored_root(&self) -> Option<&Key<Validated>> {
        let chain = self.chain()?;
        self.anchored_roots().find(|root| root.chain() == chain)
    }

    /// Gives the most recent trusted key of the chain in force.
    pub fn latest_trusted(&self) -> Option<&Key<Validated>> {
        let chain = self.chain()?;
        self.latest_trusted_of(chain)
    }

    fn latest_trusted_of(&self, chain: &Chain) -> Option<&Key<Validated>> {
        self.links
            .values()
            .rev()
            .filter_map(Link::trusted_key)
            .find(|key| key.chain() == chain)
    }

    /// Iterates over the slots in increasing GST order.
    pub fn iter(&self) -> impl Iterator<Item = (&Gst, &Link)> {
        self.links.iter()
    }

    /// Gives the number of slots.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Returns `true` if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    fn nearest_trusted_before(&self, gst: Gst, chain: &Chain) -> Option<&Key<Validated>> {
        self.links
            .range(..gst)
            .rev()
            .filter_map(|(_, link)| link.trusted_key())
            .find(|key| key.chain() == chain)
    }

    fn chains(&self) -> Vec<Chain> {
        self.anchored_roots().map(|root| *root.chain()).collect()
    }

    fn remove_chain(&mut self, chain: &Chain) {
        self.links
            .retain(|_, link| link.trusted_key().map_or(true, |key| key.chain() != chain));
    }
}

/// Slots whose trust state changed.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ChainUpdate {
    /// Slots that became trusted.
    pub validated: Vec<Gst>,
    /// Slots that became broken.
    pub broken: Vec<Gst>,
}

impl ChainUpdate {
    /// Returns `true` if no slot changed.
    pub fn is_empty(&self) -> bool {
        self.validated.is_empty() && self.broken.is_empty()
    }
}

/// TESLA chain verifier.
///
/// Operates on the key chain held by a [`KeyStore`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChainVerifier {
    max_derivations: usize,
    retention_subframes: i32,
}

impl ChainVerifier {
    /// Constructs a verifier.
    ///
    /// At most `max_derivations` applications of the one-way function are
    /// performed to validate a key. Links older than `retention_subframes`
    /// subframes can be removed by [`ChainVerifier::expire`].
    pub fn new(max_derivations: usize, retention_subframes: i32) -> ChainVerifier {
        ChainVerifier {
            max_derivations,
            retention_subframes,
        }
    }

    /// Establishes a chain root from a DSM-KROOT.
    ///
    /// The ECDSA signature of the DSM-KROOT is checked with the public key of
    /// `store`. On success the root is anchored. Chains are identified by the
    /// CIDKR field. A root with a new chain ID is kept side by side with the
    /// chain in force, as happens during a chain renewal, and only the oldest
    /// chain is dropped when there would be more than two. A root with the
    /// ID of an anchored chain but different parameters starts a new epoch
    /// for that ID, discarding its trusted links and the broken slots. Links
    /// received before the root are validated against it.
    ///
    /// Returns [`Error::MissingPublicKey`] if the store has no public key and
    /// [`Error::RootAuthenticationFailed`] if the signature is wrong. On
    /// error the key chain is not modified.
    pub fn establish_root(
        &self,
        store: &mut KeyStore,
        nma_header: NmaHeader,
        dsm_kroot: &DsmKroot,
    ) -> Result<ChainUpdate> {
        let pubkey = store.public_key().ok_or_else(|| {
            log::error!("no public key to verify {dsm_kroot:?}");
            Error::MissingPublicKey
        })?;
        if let Some(pkid) = store.pkid() {
            if pkid != dsm_kroot.public_key_id() {
                log::warn!(
                    "DSM-KROOT signed with PKID {} but stored key has PKID {pkid}",
                    dsm_kroot.public_key_id()
                );
            }
        }
        let root = Key::from_dsm_kroot(nma_header, dsm_kroot, pubkey)?;
        let links = store.links_mut();
        if links.anchored_roots().any(|anchored| anchored == &root) {
            log::trace!("KROOT {root:?} already anchored");
            return Ok(ChainUpdate::default());
        }
        let chain = *root.chain();
        let chains = links.chains();
        if let Some(old) = chains.iter().find(|c| c.chain_id() == chain.chain_id()) {
            log::info!("new chain {chain:?} replaces {old:?}");
            links.remove_chain(old);
            links.links.retain(|_, link| !matches!(link, Link::Broken));
        } else if chains.len() >= MAX_CHAINS {
            // roots are in increasing GST order
            let oldest = chains[0];
            log::info!("dropping chain {oldest:?} after announcement of {chain:?}");
            links.remove_chain(&oldest);
        } else if !chains.is_empty() {
            log::info!("next chain {chain:?} announced");
        }
        let gst = root.gst_subframe();
        if let Some(bytes) = links.get(gst).and_then(Link::bytes) {
            if bytes != root.data() {
                log::warn!("key received at root slot {gst:?} conflicts with KROOT. ignoring it");
            }
        }
        links.links.insert(gst, Link::Anchored(root));
        log::info!("anchored root of chain {} at {gst:?}", chain.chain_id());
        let mut update = ChainUpdate {
            validated: vec![gst],
            broken: Vec::new(),
        };
        self.propagate(links, &mut update);
        Ok(update)
    }

    /// Adds a disclosed key to the chain.
    ///
    /// The key is stored as untrusted at slot `gst` (rounded down to its
    /// subframe) and trust is propagated: each untrusted link, in increasing
    /// slot order, is derived down to the nearest earlier trusted link of an
    /// anchored chain. The link becomes trusted if the derived key matches
    /// and broken if it matches no chain. Links that need more derivations
    /// than the limit remain untrusted.
    ///
    /// A corrupted key only breaks its own slot. Later genuine keys are still
    /// validated against the trusted keys before the broken slot, and the
    /// broken slot is never repaired.
    ///
    /// Receiving the same key again has no effect. A different key for an
    /// occupied slot breaks the slot, except for an anchored root slot, in
    /// which case the key is ignored.
    ///
    /// Returns [`Error::InvalidKeyLength`] if the key is empty or its size
    /// does not match any anchored chain.
    pub fn disclose(&self, store: &mut KeyStore, gst: Gst, key: &[u8]) -> Result<ChainUpdate> {
        self.disclose_in_chain(store, gst, None, key)
    }

    /// Adds a disclosed key of a known chain.
    ///
    /// This works as [`ChainVerifier::disclose`], but the key is only
    /// validated against the chain with ID `chain_id` (the CID of the NMA
    /// header transmitted with the key) when it is given. The key stays
    /// untrusted until the root of that chain is anchored.
    pub fn disclose_in_chain(
        &self,
        store: &mut KeyStore,
        gst: Gst,
        chain_id: Option<u8>,
        key: &[u8],
    ) -> Result<ChainUpdate> {
        let gst = gst.gst_subframe();
        let links = store.links_mut();
        let chains = links
            .chains()
            .into_iter()
            .filter(|chain| chain_id.map_or(true, |id| id == chain.chain_id()))
            .collect::<Vec<_>>();
        if key.is_empty()
            || (!chains.is_empty() && chains.iter().all(|c| c.key_size_bytes() != key.len()))
        {
            log::error!("disclosed key at {gst:?} has wrong size {}", key.len());
            return Err(Error::InvalidKeyLength);
        }
        let mut update = ChainUpdate::default();
        match links.links.get(&gst) {
            None => {
                log::trace!("new key at {gst:?}");
                links
                    .links
                    .insert(gst, Link::Untrusted(key.to_vec(), chain_id));
            }
            Some(Link::Broken) => {
                log::trace!("key at {gst:?} received for broken slot");
                return Ok(update);
            }
            Some(link) if link.bytes() == Some(key) => {
                log::trace!("key at {gst:?} already received");
                return Ok(update);
            }
            Some(Link::Anchored(_)) => {
                log::warn!("key at {gst:?} conflicts with a chain root. ignoring it");
                return Ok(update);
            }
            Some(_) => {
                log::error!("conflicting keys received at {gst:?}. marking slot as broken");
                links.links.insert(gst, Link::Broken);
                update.broken.push(gst);
            }
        }
        self.propagate(links, &mut update);
        Ok(update)
    }

    fn propagate(&self, links: &mut KeyChain, update: &mut ChainUpdate) {
        let chains = links.chains();
        if chains.is_empty() {
            return;
        }
        let untrusted = links
            .links
            .iter()
            .filter_map(|(&gst, link)| match link {
                Link::Untrusted(bytes, chain_id) => Some((gst, bytes.clone(), *chain_id)),
                _ => None,
            })
            .collect::<Vec<_>>();
        for (gst, bytes, chain_id) in untrusted {
            let Some(new_link) = self.validate(links, &chains, gst, &bytes, chain_id) else {
                continue;
            };
            match new_link {
                Link::ChainValid(_) => {
                    log::info!("key at {gst:?} validated");
                    update.validated.push(gst);
                }
                _ => update.broken.push(gst),
            }
            links.links.insert(gst, new_link);
        }
    }

    // None if no chain can decide yet
    fn validate(
        &self,
        links: &KeyChain,
        chains: &[Chain],
        gst: Gst,
        bytes: &[u8],
        chain_id: Option<u8>,
    ) -> Option<Link> {
        let mut undecided = false;
        let mut failed = false;
        let candidates = chains.iter().filter(|chain| {
            chain_id.map_or(true, |id| id == chain.chain_id())
                && chain.key_size_bytes() == bytes.len()
        });
        for chain in candidates {
            let Some(trusted) = links.nearest_trusted_before(gst, chain) else {
                continue;
            };
            let Ok(key) = Key::from_slice(bytes, gst, chain) else {
                continue;
            };
            match trusted.validate_key(&key, self.max_derivations) {
                Ok(valid) => return Some(Link::ChainValid(valid)),
                Err(ValidationError::TooManyDerivations) => undecided = true,
                Err(e) => {
                    log::debug!("key at {gst:?} not in chain {}: {e}", chain.chain_id());
                    failed = true;
                }
            }
        }
        if failed && !undecided {
            log::error!("key at {gst:?} does not belong to any anchored chain");
            Some(Link::Broken)
        } else {
            None
        }
    }

    /// Removes old links.
    ///
    /// Links older than the retention window relative to `now` are removed,
    /// except the anchored roots, the most recent trusted link of each chain
    /// and the slots listed in `in_use` (keys awaited by pending tags).
    pub fn expire(&self, store: &mut KeyStore, now: Gst, in_use: &BTreeSet<Gst>) {
        let links = store.links_mut();
        let latest = links
            .chains()
            .iter()
            .filter_map(|chain| links.latest_trusted_of(chain))
            .map(Key::gst_subframe)
            .collect::<BTreeSet<_>>();
        let retention = i64::from(self.retention_subframes);
        let before = links.links.len();
        links.links.retain(|gst, link| {
            now.subframes_since(*gst) <= retention
                || matches!(link, Link::Anchored(_))
                || latest.contains(gst)
                || in_use.contains(gst)
        });
        let removed = before - links.links.len();
        if removed > 0 {
            log::debug!("removed {removed} old links");
        }
    }

    /// Abandons the current epoch.
    ///
    /// Every link except the anchored roots is discarded.
    pub fn abandon(&self, store: &mut KeyStore) {
        log::warn!("abandoning chain epoch");
        store
            .links_mut()
            .links
            .retain(|_, link| matches!(link, Link::Anchored(_)));
    }
}
