use crate::bitfields::{Adkd, DsmHeader, DsmKroot, DsmPkr, DsmType, NmaHeader, NmaStatus};
use crate::chain::{ChainUpdate, ChainVerifier};
use crate::config::Config;
use crate::crypto::MacFunction;
use crate::dsm::CollectDsm;
use crate::error::{Error, Result};
use crate::keystore::KeyStore;
use crate::merkle_tree::MerkleTree;
use crate::navmessage::{
    CollectNavMessage, NavDataStore, NavMessageData, NavigationDataRecord, RecordId,
};
use crate::tags::{Resolution, Tag, TagId, TagState, TagVerifier, UnverifiableReason};
use crate::types::{BitVec, DsmBlock, InavBand, InavWord};
use crate::{Gst, Svn};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// OSNMA black box processing.
///
/// This struct is the main entry point of the crate. It receives navigation
/// data, DSM blocks and authentication frames (disclosed keys and tags), and
/// keeps track of the trust state of the TESLA chain and of the verdicts of
/// the tags. Authenticated navigation data can be requested with
/// [`Osnma::get_ced_and_status`] and [`Osnma::get_timing_parameters`].
///
/// Time is taken from the data: the most recent GST fed to the engine is the
/// current time.
#[derive(Debug, Clone)]
pub struct Osnma {
    config: Config,
    keystore: KeyStore,
    chain: ChainVerifier,
    tags: TagVerifier,
    navdata: NavDataStore,
    collect_nav: CollectNavMessage,
    collect_dsm: CollectDsm,
    merkle_tree: Option<MerkleTree>,
    now: Option<Gst>,
}

/// Authentication frame.
///
/// The contents of the MACK message transmitted by a satellite in one
/// subframe, already demodulated and split into fields.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AuthFrame {
    /// Transmitting satellite (PRNA of all the tags).
    pub svn: Svn,
    /// GST of the subframe.
    pub gst: Gst,
    /// NMA status broadcast in the subframe.
    pub nma_status: NmaStatus,
    /// Chain ID (CID) broadcast in the subframe.
    pub chain_id: u8,
    /// TESLA key disclosed in the subframe.
    pub key: Option<Vec<u8>>,
    /// MAC function the tags were computed with.
    pub mac_function: MacFunction,
    /// Tags of the subframe.
    pub tags: Vec<TagEntry>,
}

/// Tag of an [`AuthFrame`].
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct TagEntry {
    /// Satellite whose data is authenticated.
    pub prnd: Svn,
    /// Authenticated data and key delay.
    pub adkd: Adkd,
    /// Tag counter (1 for tag0).
    pub ctr: u8,
    /// Tag bits.
    pub tag: BitVec,
}

/// Authentication verdict of a navigation data record.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RecordVerdict {
    /// Combined state of the tags covering the record.
    ///
    /// Any failed tag makes the record failed. Otherwise one authenticated
    /// tag is enough. A record with no tags yet is pending.
    pub state: TagState,
    /// Slot of the key of the tag that decides the state.
    pub key_slot: Option<Gst>,
    /// ID of the current chain.
    pub chain_id: Option<u8>,
    /// Authentication bits accumulated by the record.
    pub authbits: u16,
}

impl Osnma {
    /// Constructs an engine without a public key.
    ///
    /// A public key must be provisioned with [`Osnma::keystore_mut`] or
    /// obtained from a DSM-PKR before chain roots can be authenticated.
    pub fn new(config: Config) -> Osnma {
        Osnma::with_keystore(config, KeyStore::new())
    }

    /// Constructs an engine using a key store.
    pub fn with_keystore(config: Config, keystore: KeyStore) -> Osnma {
        log::info!("starting OSNMA engine with {config:?}");
        Osnma {
            config,
            keystore,
            chain: ChainVerifier::new(config.max_derivations, config.retention_subframes),
            tags: TagVerifier::new(
                config.disclosure_deadline_subframes,
                config.retention_subframes,
            ),
            navdata: NavDataStore::new(config.min_authbits, config.retention_subframes),
            collect_nav: CollectNavMessage::new(),
            collect_dsm: CollectDsm::new(),
            merkle_tree: None,
            now: None,
        }
    }

    /// Sets the Merkle tree used to authenticate DSM-PKR messages.
    pub fn set_merkle_tree(&mut self, merkle_tree: MerkleTree) {
        self.merkle_tree = Some(merkle_tree);
    }

    /// Gives the configuration of the engine.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gives the key store.
    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    /// Gives mutable access to the key store.
    pub fn keystore_mut(&mut self) -> &mut KeyStore {
        &mut self.keystore
    }

    /// Gives the current time, which is the latest GST fed to the engine.
    pub fn now(&self) -> Option<Gst> {
        self.now
    }

    fn observe(&mut self, gst: Gst) {
        if self.now.map_or(true, |now| gst > now) {
            self.now = Some(gst);
        }
    }

    /// Feeds an INAV word.
    ///
    /// The word is assembled together with the previous words of the
    /// satellite, and the complete navigation data records are stored.
    pub fn feed_inav(&mut self, word: &InavWord, svn: Svn, gst: Gst, band: InavBand) {
        self.observe(gst);
        for record in self.collect_nav.feed(word, svn, gst, band) {
            self.navdata.insert(record);
        }
    }

    /// Feeds a navigation data record decoded elsewhere.
    pub fn feed_record(&mut self, record: NavigationDataRecord) {
        self.observe(record.gst());
        self.navdata.insert(record);
    }

    /// Feeds a DSM block from the HKROOT message of a subframe.
    ///
    /// When the block completes a DSM-KROOT, the chain root is established.
    /// When it completes a DSM-PKR, the public key is updated. Blocks with
    /// NMA status "don't use" are ignored and reset the authentication bits.
    pub fn feed_dsm_block(
        &mut self,
        nma_header: NmaHeader,
        dsm_header: DsmHeader,
        block: &DsmBlock,
        gst: Gst,
    ) -> Result<Vec<Resolution>> {
        self.observe(gst);
        match nma_header.nma_status() {
            NmaStatus::Test | NmaStatus::Operational => (),
            NmaStatus::DontUse => {
                self.dont_use();
                return Ok(Vec::new());
            }
            NmaStatus::Reserved => {
                log::warn!("ignoring DSM block with reserved {nma_header:?}");
                return Ok(Vec::new());
            }
        }
        let Some(dsm) = self.collect_dsm.feed(dsm_header, block) else {
            return Ok(Vec::new());
        };
        match dsm.dsm_type() {
            DsmType::Kroot => self.process_dsm_kroot(nma_header, dsm.data()),
            DsmType::Pkr => self.process_dsm_pkr(dsm.data()).map(|()| Vec::new()),
        }
    }

    fn dont_use(&mut self) {
        log::warn!("NMA status is don't use. discarding authentication bits");
        self.navdata.reset_authbits();
    }

    /// Processes a complete DSM-KROOT.
    ///
    /// On success the chain root is anchored and pending tags are checked
    /// with the keys that it validates. If the signature is wrong and no
    /// root is anchored yet, the pending tags become unverifiable.
    pub fn process_dsm_kroot(
        &mut self,
        nma_header: NmaHeader,
        dsm_kroot: &[u8],
    ) -> Result<Vec<Resolution>> {
        let dsm_kroot = DsmKroot::new(dsm_kroot)?;
        match self
            .chain
            .establish_root(&mut self.keystore, nma_header, &dsm_kroot)
        {
            Ok(update) => Ok(self.apply_update(update)),
            Err(Error::RootAuthenticationFailed) => {
                if self.keystore.links().anchored_roots().next().is_none() {
                    self.tags
                        .abandon(UnverifiableReason::RootAuthenticationFailed);
                }
                Err(Error::RootAuthenticationFailed)
            }
            Err(e) => Err(e),
        }
    }

    /// Processes a complete DSM-PKR.
    ///
    /// The new public key is authenticated against the Merkle tree and
    /// replaces the current public key. The DSM-PKR is ignored if no Merkle
    /// tree has been set.
    pub fn process_dsm_pkr(&mut self, dsm_pkr: &[u8]) -> Result<()> {
        let dsm_pkr = DsmPkr::new(dsm_pkr)?;
        let Some(merkle_tree) = &self.merkle_tree else {
            log::warn!("no Merkle tree available. ignoring {dsm_pkr:?}");
            return Ok(());
        };
        self.keystore.update_from_pkr(dsm_pkr, merkle_tree)
    }

    /// Feeds an authentication frame.
    ///
    /// Expired pending tags are resolved first. Then the disclosed key is
    /// added to the chain and the tags are submitted. Each tag is checked
    /// against the navigation data of its PRND in the previous subframe,
    /// which must have been fed before. Tags without navigation data are
    /// skipped, as well as Slow MAC tags if Slow MAC is disabled.
    ///
    /// The returned list contains the state of each tag of the frame and the
    /// verdicts of earlier tags resolved by this frame. Returns
    /// [`Error::InvalidKeyLength`] without processing the tags if the key
    /// does not have the size of the chain keys.
    pub fn feed_auth_frame(&mut self, frame: &AuthFrame) -> Result<Vec<Resolution>> {
        match frame.nma_status {
            NmaStatus::Test | NmaStatus::Operational => (),
            NmaStatus::DontUse => {
                self.observe(frame.gst);
                self.dont_use();
                return Ok(Vec::new());
            }
            NmaStatus::Reserved => {
                log::warn!("ignoring {} frame with reserved NMA status", frame.svn);
                return Ok(Vec::new());
            }
        }
        let mut resolutions = self.advance(frame.gst);
        if let Some(key) = &frame.key {
            let update = self.chain.disclose_in_chain(
                &mut self.keystore,
                frame.gst,
                Some(frame.chain_id),
                key,
            )?;
            resolutions.extend(self.apply_update(update));
        }
        for entry in &frame.tags {
            if entry.adkd == Adkd::SlowMac && !self.config.slow_mac {
                log::trace!("Slow MAC disabled. skipping tag {entry:?}");
                continue;
            }
            let tag = Tag {
                prna: frame.svn,
                prnd: entry.prnd,
                gst: frame.gst,
                ctr: entry.ctr,
                adkd: entry.adkd,
                mac_function: frame.mac_function,
                nma_status: frame.nma_status,
                tag: entry.tag.clone(),
            };
            let id = tag.id();
            let record_id = id.record_id();
            let Some(record) = self.navdata.get(&record_id) else {
                log::debug!("no navigation data {record_id:?} for tag {id:?}");
                continue;
            };
            let known = self.tags.lookup(&tag, record.data()).is_some();
            let tag_bits = tag.tag.len();
            let state = self.tags.submit_tag(tag, record, self.keystore.links())?;
            let resolution = Resolution {
                id,
                state,
                tag_bits,
                record: record_id,
            };
            if !known {
                self.credit(core::slice::from_ref(&resolution));
            }
            resolutions.push(resolution);
        }
        Ok(resolutions)
    }

    fn apply_update(&mut self, update: ChainUpdate) -> Vec<Resolution> {
        let mut resolutions = Vec::new();
        for gst in update.validated {
            if let Some(key) = self.keystore.links().trusted_key(gst) {
                resolutions.extend(self.tags.on_key_validated(gst, key));
            }
        }
        for gst in update.broken {
            resolutions.extend(self.tags.on_key_broken(gst));
        }
        self.credit(&resolutions);
        resolutions
    }

    // Only verdicts over the bits currently stored for a record count.
    fn credit(&mut self, resolutions: &[Resolution]) {
        for resolution in resolutions {
            if resolution.state != TagState::Authenticated {
                continue;
            }
            let current = self
                .navdata
                .get(&resolution.record)
                .and_then(|record| self.tags.verdict(&resolution.id, record.data()));
            if current == Some(TagState::Authenticated) {
                self.navdata
                    .add_authbits(&resolution.record, resolution.tag_bits);
            } else {
                log::debug!(
                    "{:?} changed since tag {:?} was checked",
                    resolution.record,
                    resolution.id
                );
            }
        }
    }

    /// Advances the time to `gst`.
    ///
    /// Pending tags past their deadline become unverifiable, and old keys,
    /// navigation data and verdicts are removed. Time never goes back, so a
    /// `gst` older than the current time only triggers the cleanup.
    pub fn advance(&mut self, gst: Gst) -> Vec<Resolution> {
        self.observe(gst);
        let Some(now) = self.now else {
            return Vec::new();
        };
        let resolutions = self.tags.expire(now);
        self.chain
            .expire(&mut self.keystore, now, &self.tags.pending_key_slots());
        self.navdata.expire(now);
        resolutions
    }

    /// Abandons the current chain epoch.
    ///
    /// All the keys except the anchored root are discarded and the pending
    /// tags become unverifiable. This is used for instance when the receiver
    /// loses lock and the key stream cannot be trusted to be continuous.
    pub fn abandon_epoch(&mut self) -> Vec<Resolution> {
        self.chain.abandon(&mut self.keystore);
        self.tags.abandon(UnverifiableReason::EpochAbandoned)
    }

    /// Gives the state of a tag over the navigation data currently stored
    /// for it.
    ///
    /// Returns `None` if the tag or its navigation data are not stored.
    pub fn tag_state(&self, id: &TagId) -> Option<TagState> {
        let record = self.navdata.get(&id.record_id())?;
        self.tags.verdict(id, record.data())
    }

    /// Gives the authentication verdict of a navigation data record.
    ///
    /// Only the tags checked over the bits currently stored for the record
    /// are taken into account. Returns `None` if the record is not stored.
    pub fn record_verdict(&self, id: &RecordId) -> Option<RecordVerdict> {
        let record = self.navdata.get(id)?;
        let authbits = self.navdata.authbits(id)?;
        let verdicts = self.tags.verdicts_for(record).collect::<Vec<_>>();
        let find = |f: fn(&TagState) -> bool| verdicts.iter().find(|(_, state)| f(state));
        let decisive = find(|s| matches!(s, TagState::Failed(_)))
            .or_else(|| find(|s| *s == TagState::Authenticated))
            .or_else(|| find(|s| *s == TagState::Pending))
            .or_else(|| verdicts.first());
        Some(RecordVerdict {
            state: decisive.map_or(TagState::Pending, |(_, state)| *state),
            key_slot: decisive.map(|(id, _)| id.key_gst()),
            chain_id: self.keystore.links().chain().map(|chain| chain.chain_id()),
            authbits,
        })
    }

    /// Try to get authenticated CED and health status data for a satellite.
    ///
    /// Returns the most recent CED and health status data of the satellite
    /// that has accumulated the minimum number of authentication bits.
    pub fn get_ced_and_status(&self, svn: Svn) -> Option<NavMessageData<'_>> {
        self.navdata.get_ced_and_status(svn)
    }

    /// Try to get authenticated timing parameters for a satellite.
    pub fn get_timing_parameters(&self, svn: Svn) -> Option<NavMessageData<'_>> {
        self.navdata.get_timing_parameters(svn)
    }
}

/// Shared OSNMA engine.
///
/// A handle to an [`Osnma`] that can be cloned and sent to the threads that
/// handle each receiver channel. Operations that modify the engine take the
/// write lock, so they are serialized. Queries take the read lock and can
/// run concurrently.
#[derive(Debug, Clone)]
pub struct SharedOsnma(Arc<RwLock<Osnma>>);

impl SharedOsnma {
    /// Wraps an engine.
    pub fn new(osnma: Osnma) -> SharedOsnma {
        SharedOsnma(Arc::new(RwLock::new(osnma)))
    }

    /// Locks the engine for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, Osnma> {
        self.0.read()
    }

    /// Locks the engine for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, Osnma> {
        self.0.write()
    }

    /// See [`Osnma::feed_inav`].
    pub fn feed_inav(&self, word: &InavWord, svn: Svn, gst: Gst, band: InavBand) {
        self.write().feed_inav(word, svn, gst, band)
    }

    /// See [`Osnma::feed_record`].
    pub fn feed_record(&self, record: NavigationDataRecord) {
        self.write().feed_record(record)
    }

    /// See [`Osnma::feed_dsm_block`].
    pub fn feed_dsm_block(
        &self,
        nma_header: NmaHeader,
        dsm_header: DsmHeader,
        block: &DsmBlock,
        gst: Gst,
    ) -> Result<Vec<Resolution>> {
        self.write()
            .feed_dsm_block(nma_header, dsm_header, block, gst)
    }

    /// See [`Osnma::feed_auth_frame`].
    pub fn feed_auth_frame(&self, frame: &AuthFrame) -> Result<Vec<Resolution>> {
        self.write().feed_auth_frame(frame)
    }

    /// See [`Osnma::advance`].
    pub fn advance(&self, gst: Gst) -> Vec<Resolution> {
        self.write().advance(gst)
    }

    /// See [`Osnma::abandon_epoch`].
    pub fn abandon_epoch(&self) -> Vec<Resolution> {
        self.write().abandon_epoch()
    }

    /// See [`Osnma::tag_state`].
    pub fn tag_state(&self, id: &TagId) -> Option<TagState> {
        self.read().tag_state(id)
    }

    /// See [`Osnma::record_verdict`].
    pub fn record_verdict(&self, id: &RecordId) -> Option<RecordVerdict> {
        self.read().record_verdict(id)
    }
}
