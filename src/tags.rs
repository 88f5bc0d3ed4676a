//! Tag verification.
//!
//! A [`Tag`] is a truncated MAC broadcast by a satellite (PRNA) over the
//! navigation data of a satellite (PRND). It can only be checked once the
//! TESLA key of a later subframe has been disclosed and traced back to the
//! chain root. The [`TagVerifier`] checks tags whose key is already trusted
//! and keeps the rest pending until the key arrives, the key turns out to be
//! broken, or the disclosure deadline passes.

use crate::bitfields::{Adkd, NmaStatus};
use crate::chain::{KeyChain, Link};
use crate::crypto::MacFunction;
use crate::error::{Error, Result};
use crate::navmessage::{NavigationDataRecord, RecordId};
use crate::tesla::Key;
use crate::types::{BitSlice, BitVec};
use crate::validation::Validated;
use crate::{Gst, Svn};
use bitvec::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Identifier of a tag.
///
/// The GST is the start of the subframe in which the tag was transmitted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TagId {
    /// Authenticating satellite.
    pub prna: Svn,
    /// Satellite whose data is authenticated.
    pub prnd: Svn,
    /// Subframe of the tag.
    pub gst: Gst,
    /// Tag counter (1 for tag0).
    pub ctr: u8,
    /// Authenticated data and key delay.
    pub adkd: Adkd,
}

impl TagId {
    /// Gives the slot of the key that checks the tag.
    ///
    /// This is the subframe following the tag, or 11 subframes after the tag
    /// for Slow MAC.
    pub fn key_gst(&self) -> Gst {
        self.gst.add_subframes(self.adkd.key_delay_subframes())
    }

    /// Gives the navigation data record authenticated by the tag.
    ///
    /// This is the data of PRND transmitted in the subframe preceding the
    /// tag.
    pub fn record_id(&self) -> RecordId {
        RecordId {
            svn: self.prnd,
            gst: self.gst.add_subframes(-1),
            data_element: self.adkd.data_element(),
        }
    }
}

/// MAC tag.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Tag {
    /// Authenticating satellite.
    pub prna: Svn,
    /// Satellite whose data is authenticated. Equal to `prna` for self
    /// authentication and always for tag0.
    pub prnd: Svn,
    /// GST of the subframe in which the tag was transmitted.
    pub gst: Gst,
    /// Tag counter. Tag0 has CTR 1 and the following tags of the subframe
    /// count up from 2.
    pub ctr: u8,
    /// Authenticated data and key delay.
    pub adkd: Adkd,
    /// MAC function of the chain the tag was computed with.
    pub mac_function: MacFunction,
    /// NMA status in the subframe of the tag.
    pub nma_status: NmaStatus,
    /// Tag bits.
    pub tag: BitVec,
}

impl Tag {
    /// Gives the identifier of the tag.
    pub fn id(&self) -> TagId {
        TagId {
            prna: self.prna,
            prnd: self.prnd,
            gst: self.gst.gst_subframe(),
            ctr: self.ctr,
            adkd: self.adkd,
        }
    }

    /// Returns `true` for tag0.
    pub fn is_tag0(&self) -> bool {
        self.ctr == 1
    }

    /// Gives the slot of the key that checks this tag.
    pub fn key_gst(&self) -> Gst {
        self.id().key_gst()
    }

    /// Gives the subframe of the navigation data authenticated by the tag.
    pub fn navdata_gst(&self) -> Gst {
        self.id().record_id().gst
    }

    /// Builds the MAC input for this tag.
    ///
    /// The message is PRND (omitted for tag0), PRNA, the packed GST of the
    /// tag subframe, CTR, the 2-bit NMA status and the navigation data, with
    /// zero padding up to a byte boundary.
    pub fn mac_message(&self, navdata: &BitSlice) -> Vec<u8> {
        let mut message = BitVec::with_capacity(8 + 8 + 32 + 8 + 2 + navdata.len() + 7);
        if !self.is_tag0() {
            message.extend_from_bitslice(self.prnd.prn().view_bits::<Msb0>());
        }
        message.extend_from_bitslice(self.prna.prn().view_bits::<Msb0>());
        message.extend_from_bitslice(self.gst.gst_subframe().packed().view_bits::<Msb0>());
        message.extend_from_bitslice(self.ctr.view_bits::<Msb0>());
        message.extend_from_bitslice(&self.nma_status.value().view_bits::<Msb0>()[6..]);
        message.extend_from_bitslice(navdata);
        message.resize(message.len().next_multiple_of(8), false);
        message.into_vec()
    }
}

/// Verification state of a tag.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TagState {
    /// The key needed to check the tag has not been trusted yet.
    Pending,
    /// The tag matches the navigation data.
    Authenticated,
    /// The tag does not authenticate the navigation data.
    Failed(FailReason),
    /// The tag cannot be checked.
    Unverifiable(UnverifiableReason),
}

impl TagState {
    /// Returns `true` unless the state is [`TagState::Pending`].
    pub fn is_final(&self) -> bool {
        !matches!(self, TagState::Pending)
    }

    // Combines copies of a tag over the same navigation data. A copy that
    // authenticates the data wins over copies with bit errors.
    fn rank(&self) -> u8 {
        match self {
            TagState::Authenticated => 3,
            TagState::Failed(_) => 2,
            TagState::Pending => 1,
            TagState::Unverifiable(_) => 0,
        }
    }
}

/// Reason for a failed tag.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FailReason {
    /// The recomputed MAC differs from the tag.
    MacMismatch,
    /// The key of the tag does not belong to the trusted chain.
    ChainBroken,
    /// The key cannot be used with the MAC function.
    InvalidKeyLength,
}

impl From<FailReason> for Error {
    fn from(reason: FailReason) -> Error {
        match reason {
            FailReason::MacMismatch => Error::MacMismatch,
            FailReason::ChainBroken => Error::ChainBroken,
            FailReason::InvalidKeyLength => Error::InvalidKeyLength,
        }
    }
}

/// Reason for an unverifiable tag.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum UnverifiableReason {
    /// The key was not trusted before the disclosure deadline.
    DeadlineExpired,
    /// The chain epoch was abandoned.
    EpochAbandoned,
    /// The chain root could not be authenticated.
    RootAuthenticationFailed,
}

/// State of a tag after it is submitted or resolved.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Resolution {
    /// The tag.
    pub id: TagId,
    /// Final state of the tag.
    pub state: TagState,
    /// Number of bits of the tag.
    pub tag_bits: usize,
    /// Navigation data covered by the tag.
    pub record: RecordId,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct PendingTag {
    tag: Tag,
    record: RecordId,
    navdata: BitVec,
    deadline: Gst,
}

// State of one copy of a tag, over the bits it was checked with.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct Verdict {
    tag: BitVec,
    navdata: BitVec,
    state: TagState,
}

impl PendingTag {
    fn resolve(self, state: TagState) -> Resolution {
        Resolution {
            id: self.tag.id(),
            state,
            tag_bits: self.tag.tag.len(),
            record: self.record,
        }
    }
}

/// Tag verifier.
///
/// Holds the tags waiting for their key, indexed by key slot, and the
/// verdicts of the recent tags. A verdict is bound to the exact tag bits and
/// navigation bits that were checked, so copies of a tag with different bits
/// are checked separately.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TagVerifier {
    deadline_subframes: i32,
    retention_subframes: i32,
    pending: BTreeMap<Gst, Vec<PendingTag>>,
    verdicts: BTreeMap<TagId, Vec<Verdict>>,
}

impl TagVerifier {
    /// Constructs a verifier.
    ///
    /// Pending tags become unverifiable if their key is not trusted
    /// `deadline_subframes` subframes after the key slot. Verdicts are kept
    /// for `retention_subframes` subframes.
    pub fn new(deadline_subframes: i32, retention_subframes: i32) -> TagVerifier {
        TagVerifier {
            deadline_subframes,
            retention_subframes,
            pending: BTreeMap::new(),
            verdicts: BTreeMap::new(),
        }
    }

    /// Submits a tag together with the navigation data it covers.
    ///
    /// If the key slot of the tag holds a trusted key, the tag is checked
    /// immediately. If it holds a broken link the tag fails. Otherwise the
    /// tag is kept pending. Submitting again a tag with the same tag bits
    /// over the same navigation bits returns the earlier verdict. A copy
    /// with different tag bits or over different navigation bits is checked
    /// on its own.
    ///
    /// Returns [`Error::RecordMismatch`] if the record is not the data
    /// authenticated by the tag.
    pub fn submit_tag(
        &mut self,
        tag: Tag,
        record: &NavigationDataRecord,
        links: &KeyChain,
    ) -> Result<TagState> {
        if record.id() != tag.id().record_id() {
            log::error!(
                "record {:?} does not correspond to tag {:?}",
                record.id(),
                tag.id()
            );
            return Err(Error::RecordMismatch);
        }
        let id = tag.id();
        if let Some(state) = self.lookup(&tag, record.data()) {
            log::trace!("tag {id:?} already submitted with state {state:?}");
            return Ok(state);
        }
        let key_gst = tag.key_gst();
        let state = match links.get(key_gst) {
            Some(Link::Broken) => TagState::Failed(FailReason::ChainBroken),
            Some(link) => match link.trusted_key() {
                Some(key) => Self::check(&tag, record.data(), key)?,
                None => TagState::Pending,
            },
            None => TagState::Pending,
        };
        self.set_verdict(&tag, record.data(), state);
        if state == TagState::Pending {
            log::trace!("tag {id:?} waits for key at {key_gst:?}");
            self.pending.entry(key_gst).or_default().push(PendingTag {
                tag,
                record: record.id(),
                navdata: record.data().to_bitvec(),
                deadline: key_gst.add_subframes(self.deadline_subframes),
            });
        } else {
            Self::log_verdict(&id, state);
        }
        Ok(state)
    }

    fn set_verdict(&mut self, tag: &Tag, navdata: &BitSlice, state: TagState) {
        let verdicts = self.verdicts.entry(tag.id()).or_default();
        match verdicts
            .iter()
            .position(|v| v.tag == tag.tag && v.navdata.as_bitslice() == navdata)
        {
            Some(j) => verdicts[j].state = state,
            None => verdicts.push(Verdict {
                tag: tag.tag.clone(),
                navdata: navdata.to_bitvec(),
                state,
            }),
        }
    }

    fn check(tag: &Tag, navdata: &BitSlice, key: &Key<Validated>) -> Result<TagState> {
        if key.chain().mac_function() != tag.mac_function {
            log::error!(
                "tag {:?} uses {:?} but the chain uses {:?}",
                tag.id(),
                tag.mac_function,
                key.chain().mac_function()
            );
            return Ok(TagState::Failed(FailReason::MacMismatch));
        }
        let message = tag.mac_message(navdata);
        match key.check_tag(&message, &tag.tag) {
            Ok(true) => Ok(TagState::Authenticated),
            Ok(false) => Ok(TagState::Failed(FailReason::MacMismatch)),
            Err(Error::InvalidKeyLength) => Ok(TagState::Failed(FailReason::InvalidKeyLength)),
            Err(e) => Err(e),
        }
    }

    fn log_verdict(id: &TagId, state: TagState) {
        match state {
            TagState::Authenticated => log::info!(
                "{} {:?} tag {} ADKD {} for {} authenticated",
                id.prna,
                id.gst,
                id.ctr,
                id.adkd.value(),
                id.prnd
            ),
            TagState::Pending => (),
            state => log::warn!(
                "{} {:?} tag {} ADKD {} for {}: {state:?}",
                id.prna,
                id.gst,
                id.ctr,
                id.adkd.value(),
                id.prnd
            ),
        }
    }

    fn resolve_all(
        &mut self,
        pending: Vec<PendingTag>,
        mut f: impl FnMut(&PendingTag) -> TagState,
    ) -> Vec<Resolution> {
        pending
            .into_iter()
            .map(|p| {
                let state = f(&p);
                Self::log_verdict(&p.tag.id(), state);
                self.set_verdict(&p.tag, &p.navdata, state);
                p.resolve(state)
            })
            .collect()
    }

    /// Checks the tags pending for the key at slot `gst`.
    pub fn on_key_validated(&mut self, gst: Gst, key: &Key<Validated>) -> Vec<Resolution> {
        let Some(pending) = self.pending.remove(&gst.gst_subframe()) else {
            return Vec::new();
        };
        log::debug!("checking {} tags with key at {gst:?}", pending.len());
        self.resolve_all(pending, |p| {
            Self::check(&p.tag, &p.navdata, key)
                .unwrap_or(TagState::Failed(FailReason::InvalidKeyLength))
        })
    }

    /// Fails the tags pending for the broken key at slot `gst`.
    pub fn on_key_broken(&mut self, gst: Gst) -> Vec<Resolution> {
        let Some(pending) = self.pending.remove(&gst.gst_subframe()) else {
            return Vec::new();
        };
        self.resolve_all(pending, |_| TagState::Failed(FailReason::ChainBroken))
    }

    /// Advances time to `now`.
    ///
    /// Pending tags whose deadline is before `now` become unverifiable, and
    /// verdicts older than the retention window are forgotten.
    pub fn expire(&mut self, now: Gst) -> Vec<Resolution> {
        let mut expired = Vec::new();
        self.pending.retain(|_, tags| {
            let (late, waiting) = std::mem::take(tags)
                .into_iter()
                .partition::<Vec<_>, _>(|p| p.deadline < now);
            expired.extend(late);
            *tags = waiting;
            !tags.is_empty()
        });
        let resolutions = self.resolve_all(expired, |_| {
            TagState::Unverifiable(UnverifiableReason::DeadlineExpired)
        });
        let retention = i64::from(self.retention_subframes);
        self.verdicts.retain(|id, verdicts| {
            now.subframes_since(id.gst) <= retention
                || verdicts.iter().any(|v| v.state == TagState::Pending)
        });
        resolutions
    }

    /// Marks all pending tags as unverifiable.
    pub fn abandon(&mut self, reason: UnverifiableReason) -> Vec<Resolution> {
        let pending = std::mem::take(&mut self.pending)
            .into_values()
            .flatten()
            .collect::<Vec<_>>();
        if !pending.is_empty() {
            log::warn!("{} pending tags are unverifiable: {reason:?}", pending.len());
        }
        self.resolve_all(pending, |_| TagState::Unverifiable(reason))
    }

    /// Returns `true` if some tag waits for the key at slot `gst`.
    pub fn has_pending_for_key(&self, gst: Gst) -> bool {
        self.pending.contains_key(&gst.gst_subframe())
    }

    /// Gives the key slots awaited by pending tags.
    pub fn pending_key_slots(&self) -> BTreeSet<Gst> {
        self.pending.keys().copied().collect()
    }

    /// Gives the number of pending tags.
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Gives the state of an exact copy of a tag over `navdata`, if it has
    /// been submitted recently.
    pub fn lookup(&self, tag: &Tag, navdata: &BitSlice) -> Option<TagState> {
        self.verdicts
            .get(&tag.id())?
            .iter()
            .find(|v| v.tag == tag.tag && v.navdata.as_bitslice() == navdata)
            .map(|v| v.state)
    }

    /// Gives the state of a tag over the navigation bits `navdata`, if it
    /// has been submitted recently.
    ///
    /// When several copies of the tag were received, a copy that
    /// authenticates the data decides the state. Verdicts computed over
    /// other navigation bits are not taken into account.
    pub fn verdict(&self, id: &TagId, navdata: &BitSlice) -> Option<TagState> {
        self.verdicts
            .get(id)?
            .iter()
            .filter(|v| v.navdata.as_bitslice() == navdata)
            .map(|v| v.state)
            .max_by_key(TagState::rank)
    }

    /// Iterates over the recent tags that cover the current bits of a
    /// navigation data record.
    pub fn verdicts_for<'a>(
        &'a self,
        record: &'a NavigationDataRecord,
    ) -> impl Iterator<Item = (TagId, TagState)> + 'a {
        let record_id = record.id();
        self.verdicts
            .keys()
            .filter(move |id| id.record_id() == record_id)
            .filter_map(move |id| Some((*id, self.verdict(id, record.data())?)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chain::ChainVerifier;
    use crate::crypto::test::{RG_M0, RG_M_ADKD4};
    use crate::crypto::HashFunction;
    use crate::keystore::KeyStore;
    use crate::navmessage::DataElement;
    use crate::testing::{record, Fixture, Params};

    fn svn(n: u8) -> Svn {
        Svn::try_from(n).unwrap()
    }

    #[test]
    fn receiver_guidelines_mac_input() {
        let gst = Gst::new(1248, 345660);
        let rg = BitSlice::from_slice(&RG_M0);
        let tag0 = Tag {
            prna: svn(2),
            prnd: svn(2),
            gst,
            ctr: 1,
            adkd: Adkd::InavCed,
            mac_function: MacFunction::HmacSha256,
            nma_status: NmaStatus::Operational,
            tag: BitVec::new(),
        };
        assert_eq!(tag0.mac_message(&rg[50..599]), RG_M0.to_vec());
        assert_eq!(tag0.key_gst(), Gst::new(1248, 345690));
        assert_eq!(tag0.navdata_gst(), Gst::new(1248, 345630));

        let rg = BitSlice::from_slice(&RG_M_ADKD4);
        let tag = Tag {
            ctr: 3,
            adkd: Adkd::InavTiming,
            ..tag0
        };
        assert_eq!(tag.mac_message(&rg[58..199]), RG_M_ADKD4.to_vec());
        // mid-subframe GST refers to the same tag
        let other = Tag {
            gst: gst.add_seconds(10),
            ..tag.clone()
        };
        assert_eq!(other.id(), tag.id());
    }

    #[test]
    fn fail_reason_as_error() {
        assert!(matches!(
            Error::from(FailReason::MacMismatch),
            Error::MacMismatch
        ));
        assert_eq!(
            Error::from(FailReason::ChainBroken).to_string(),
            "key does not belong to the trusted chain"
        );
    }

    #[test]
    fn slow_mac_key_slot() {
        let tag = Tag {
            prna: svn(2),
            prnd: svn(2),
            gst: Gst::new(1248, 345660),
            ctr: 5,
            adkd: Adkd::SlowMac,
            mac_function: MacFunction::HmacSha256,
            nma_status: NmaStatus::Operational,
            tag: BitVec::new(),
        };
        assert_eq!(tag.key_gst(), Gst::new(1248, 345660 + 11 * 30));
    }

    struct Setup {
        fixture: Fixture,
        store: KeyStore,
        chain: ChainVerifier,
        tags: TagVerifier,
    }

    impl Setup {
        fn new() -> Setup {
            Setup::with_fixture(Fixture::new(20))
        }

        fn with_fixture(fixture: Fixture) -> Setup {
            let mut store = fixture.keystore();
            let chain = ChainVerifier::new(3000, 13);
            chain
                .establish_root(&mut store, fixture.nma_header, &fixture.dsm_kroot())
                .unwrap();
            Setup {
                fixture,
                store,
                chain,
                tags: TagVerifier::new(2, 13),
            }
        }

        // tag over `signed_pattern` navdata, transmitted at slot j
        fn tag(&self, j: usize, prnd: u8, ctr: u8, adkd: Adkd, signed_pattern: u8) -> Tag {
            let mut tag = Tag {
                prna: svn(11),
                prnd: svn(prnd),
                gst: self.fixture.gst(j),
                ctr,
                adkd,
                mac_function: self.fixture.mac_function(),
                nma_status: NmaStatus::Test,
                tag: BitVec::new(),
            };
            let signed = record(prnd, tag.navdata_gst(), adkd.data_element(), signed_pattern);
            let key = usize::try_from(adkd.key_delay_subframes()).unwrap() + j;
            tag.tag = self
                .fixture
                .tag(key, &tag.mac_message(signed.data()), 40);
            tag
        }

        fn disclose(&mut self, j: usize) -> Vec<Resolution> {
            let update = self
                .chain
                .disclose(&mut self.store, self.fixture.gst(j), self.fixture.key(j))
                .unwrap();
            let mut resolutions = Vec::new();
            for gst in update.validated {
                let key = self.store.links().trusted_key(gst).unwrap();
                resolutions.extend(self.tags.on_key_validated(gst, key));
            }
            for gst in update.broken {
                resolutions.extend(self.tags.on_key_broken(gst));
            }
            resolutions
        }
    }

    #[test]
    fn pending_then_authenticated() {
        let mut s = Setup::new();
        let tag = s.tag(2, 11, 1, Adkd::InavCed, 0xa5);
        let rec = record(11, s.fixture.gst(1), DataElement::CedAndStatus, 0xa5);
        let state = s
            .tags
            .submit_tag(tag.clone(), &rec, s.store.links())
            .unwrap();
        assert_eq!(state, TagState::Pending);
        assert!(s.tags.has_pending_for_key(s.fixture.gst(3)));
        assert!(s.disclose(2).is_empty());
        let resolutions = s.disclose(3);
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].id, tag.id());
        assert_eq!(resolutions[0].state, TagState::Authenticated);
        assert_eq!(resolutions[0].tag_bits, 40);
        assert_eq!(resolutions[0].record, rec.id());
        assert_eq!(s.tags.pending_len(), 0);
        // resubmission gives the same verdict
        assert_eq!(
            s.tags.submit_tag(tag.clone(), &rec, s.store.links()).unwrap(),
            TagState::Authenticated
        );
        assert_eq!(s.tags.verdict(&tag.id(), rec.data()), Some(TagState::Authenticated));
        assert_eq!(
            s.tags.verdicts_for(&rec).collect::<Vec<_>>(),
            vec![(tag.id(), TagState::Authenticated)]
        );
    }

    #[test]
    fn immediate_verification() {
        let mut s = Setup::new();
        s.disclose(5);
        let links = s.store.links().clone();
        // cross authentication of E04 timing data by E11
        let tag = s.tag(4, 4, 2, Adkd::InavTiming, 0x3c);
        let rec = record(4, s.fixture.gst(3), DataElement::TimingParameters, 0x3c);
        assert_eq!(
            s.tags.submit_tag(tag, &rec, &links).unwrap(),
            TagState::Authenticated
        );
        // modified navigation data
        let tag = s.tag(4, 4, 3, Adkd::InavCed, 0x3c);
        let rec = record(4, s.fixture.gst(3), DataElement::CedAndStatus, 0x3d);
        assert_eq!(
            s.tags.submit_tag(tag, &rec, &links).unwrap(),
            TagState::Failed(FailReason::MacMismatch)
        );
        // MAC function of another chain
        let mut tag = s.tag(4, 4, 4, Adkd::InavCed, 0x3c);
        tag.mac_function = MacFunction::CmacAes;
        let rec = record(4, s.fixture.gst(3), DataElement::CedAndStatus, 0x3c);
        assert_eq!(
            s.tags.submit_tag(tag, &rec, &links).unwrap(),
            TagState::Failed(FailReason::MacMismatch)
        );
        // NMA status is part of the MAC input
        let mut tag = s.tag(4, 4, 5, Adkd::InavCed, 0x3c);
        tag.nma_status = NmaStatus::Operational;
        assert_eq!(
            s.tags.submit_tag(tag, &rec, &links).unwrap(),
            TagState::Failed(FailReason::MacMismatch)
        );
    }

    fn flip(bits: &mut BitVec, n: usize) {
        let bit = !bits[n];
        bits.set(n, bit);
    }

    #[test]
    fn navigation_data_replaced() {
        let mut s = Setup::new();
        s.disclose(3);
        let links = s.store.links().clone();
        let tag = s.tag(2, 11, 1, Adkd::InavCed, 0x5a);
        let genuine = record(11, s.fixture.gst(1), DataElement::CedAndStatus, 0x5a);
        assert_eq!(
            s.tags.submit_tag(tag.clone(), &genuine, &links).unwrap(),
            TagState::Authenticated
        );
        let mut bits = genuine.data().to_bitvec();
        flip(&mut bits, 80);
        let tampered = NavigationDataRecord::new(
            svn(11),
            s.fixture.gst(1),
            DataElement::CedAndStatus,
            &bits,
        )
        .unwrap();
        // the same tag over the new bits is checked again
        assert_eq!(
            s.tags.submit_tag(tag.clone(), &tampered, &links).unwrap(),
            TagState::Failed(FailReason::MacMismatch)
        );
        assert_eq!(
            s.tags.verdict(&tag.id(), tampered.data()),
            Some(TagState::Failed(FailReason::MacMismatch))
        );
        assert_eq!(
            s.tags.verdicts_for(&tampered).collect::<Vec<_>>(),
            vec![(tag.id(), TagState::Failed(FailReason::MacMismatch))]
        );
        assert_eq!(
            s.tags.verdict(&tag.id(), genuine.data()),
            Some(TagState::Authenticated)
        );
    }

    #[test]
    fn copies_with_bit_errors() {
        let rec_pattern = 0x6b;
        for key_first in [true, false] {
            for corrupted_first in [true, false] {
                let mut s = Setup::new();
                if key_first {
                    s.disclose(3);
                }
                let genuine = s.tag(2, 11, 1, Adkd::InavCed, rec_pattern);
                let mut corrupted = genuine.clone();
                flip(&mut corrupted.tag, 0);
                let rec = record(11, s.fixture.gst(1), DataElement::CedAndStatus, rec_pattern);
                let copies = if corrupted_first {
                    [corrupted.clone(), genuine.clone()]
                } else {
                    [genuine.clone(), corrupted.clone()]
                };
                let links = s.store.links().clone();
                let states = copies
                    .into_iter()
                    .map(|copy| s.tags.submit_tag(copy, &rec, &links).unwrap())
                    .collect::<Vec<_>>();
                if !key_first {
                    assert_eq!(states, vec![TagState::Pending; 2]);
                    assert_eq!(s.disclose(3).len(), 2);
                }
                assert_eq!(
                    s.tags.lookup(&genuine, rec.data()),
                    Some(TagState::Authenticated)
                );
                assert_eq!(
                    s.tags.lookup(&corrupted, rec.data()),
                    Some(TagState::Failed(FailReason::MacMismatch))
                );
                assert_eq!(
                    s.tags.verdict(&genuine.id(), rec.data()),
                    Some(TagState::Authenticated)
                );
            }
        }
    }

    #[test]
    fn cmac_chain_with_sha3() {
        let fixture = Fixture::with_params(
            6,
            Params {
                hash_function: HashFunction::Sha3_256,
                mac_function: MacFunction::CmacAes,
                ..Params::default()
            },
        );
        let mut s = Setup::with_fixture(fixture);
        let chain = *s.store.links().chain().unwrap();
        assert_eq!(chain.hash_function(), HashFunction::Sha3_256);
        assert_eq!(chain.mac_function(), MacFunction::CmacAes);
        let tag = s.tag(2, 11, 1, Adkd::InavCed, 0x5c);
        let rec = record(11, s.fixture.gst(1), DataElement::CedAndStatus, 0x5c);
        assert_eq!(
            s.tags.submit_tag(tag, &rec, s.store.links()).unwrap(),
            TagState::Pending
        );
        // the key is traced back to the root with SHA3-256
        let resolutions = s.disclose(3);
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].state, TagState::Authenticated);
        let mut flipped = s.tag(2, 11, 2, Adkd::InavCed, 0x5c);
        flip(&mut flipped.tag, 7);
        assert_eq!(
            s.tags.submit_tag(flipped, &rec, s.store.links()).unwrap(),
            TagState::Failed(FailReason::MacMismatch)
        );
    }

    #[test]
    fn record_mismatch() {
        let s = Setup::new();
        let mut tags = TagVerifier::new(2, 13);
        let tag = s.tag(4, 4, 2, Adkd::InavCed, 0x3c);
        for rec in [
            record(5, s.fixture.gst(3), DataElement::CedAndStatus, 0x3c),
            record(4, s.fixture.gst(4), DataElement::CedAndStatus, 0x3c),
            record(4, s.fixture.gst(3), DataElement::TimingParameters, 0x3c),
        ] {
            assert!(matches!(
                tags.submit_tag(tag.clone(), &rec, s.store.links()),
                Err(Error::RecordMismatch)
            ));
        }
        assert_eq!(tags.pending_len(), 0);
    }

    #[test]
    fn broken_key() {
        let mut s = Setup::new();
        let tag = s.tag(6, 11, 1, Adkd::InavCed, 0x11);
        let rec = record(11, s.fixture.gst(5), DataElement::CedAndStatus, 0x11);
        s.tags.submit_tag(tag.clone(), &rec, s.store.links()).unwrap();
        let mut corrupted = s.fixture.key(7).to_vec();
        corrupted[3] ^= 1;
        let update = s
            .chain
            .disclose(&mut s.store, s.fixture.gst(7), &corrupted)
            .unwrap();
        assert_eq!(update.broken, vec![s.fixture.gst(7)]);
        let resolutions = s.tags.on_key_broken(s.fixture.gst(7));
        assert_eq!(
            resolutions[0].state,
            TagState::Failed(FailReason::ChainBroken)
        );
        // the genuine key cannot authenticate the tag afterwards
        assert!(s.disclose(7).is_empty());
        assert_eq!(
            s.tags.verdict(&tag.id(), rec.data()),
            Some(TagState::Failed(FailReason::ChainBroken))
        );
        let other = s.tag(6, 11, 2, Adkd::InavCed, 0x11);
        assert_eq!(
            s.tags.submit_tag(other, &rec, s.store.links()).unwrap(),
            TagState::Failed(FailReason::ChainBroken)
        );
    }

    #[test]
    fn deadline() {
        let mut s = Setup::new();
        let tag = s.tag(2, 11, 1, Adkd::InavCed, 0x77);
        let rec = record(11, s.fixture.gst(1), DataElement::CedAndStatus, 0x77);
        s.tags.submit_tag(tag.clone(), &rec, s.store.links()).unwrap();
        // key slot 3, deadline slot 5
        assert!(s.tags.expire(s.fixture.gst(5)).is_empty());
        let resolutions = s.tags.expire(s.fixture.gst(6));
        assert_eq!(resolutions.len(), 1);
        assert_eq!(
            resolutions[0].state,
            TagState::Unverifiable(UnverifiableReason::DeadlineExpired)
        );
        // a late key does not change the verdict
        assert!(s.disclose(3).is_empty());
        assert_eq!(
            s.tags.verdict(&tag.id(), rec.data()),
            Some(TagState::Unverifiable(UnverifiableReason::DeadlineExpired))
        );
        // old verdicts are forgotten
        s.tags.expire(s.fixture.gst(20));
        assert_eq!(s.tags.verdict(&tag.id(), rec.data()), None);
    }

    #[test]
    fn abandon() {
        let mut s = Setup::new();
        for ctr in 2..5 {
            let tag = s.tag(2, 11, ctr, Adkd::InavCed, 0x77);
            let rec = record(11, s.fixture.gst(1), DataElement::CedAndStatus, 0x77);
            s.tags.submit_tag(tag, &rec, s.store.links()).unwrap();
        }
        let tag = s.tag(3, 11, 1, Adkd::SlowMac, 0x77);
        let rec = record(11, s.fixture.gst(2), DataElement::CedAndStatus, 0x77);
        s.tags.submit_tag(tag, &rec, s.store.links()).unwrap();
        assert_eq!(
            s.tags.pending_key_slots().into_iter().collect::<Vec<_>>(),
            vec![s.fixture.gst(3), s.fixture.gst(14)]
        );
        let resolutions = s.tags.abandon(UnverifiableReason::EpochAbandoned);
        assert_eq!(resolutions.len(), 4);
        assert!(resolutions
            .iter()
            .all(|r| r.state == TagState::Unverifiable(UnverifiableReason::EpochAbandoned)));
        assert_eq!(s.tags.pending_len(), 0);
    }
}
