//! Navigation message storage and handling.
//!
//! This module contains the [`NavigationDataRecord`], which holds the exact
//! navigation bits authenticated by a tag, the [`CollectNavMessage`] struct,
//! which assembles records from INAV words, and the [`NavDataStore`], which
//! keeps the records by satellite and subframe together with their
//! authentication bits.

use crate::error::{Error, Result};
use crate::types::{BitSlice, BitVec, InavBand, InavWord};
use crate::{Gst, Svn};
use bitvec::prelude::*;
use std::collections::BTreeMap;

const CED_AND_STATUS_BITS: usize = 549;
const CED_AND_STATUS_WORDS: usize = 5;
const TIMING_PARAMETERS_BITS: usize = 141;
const TIMING_PARAMETERS_WORDS: usize = 2;

/// Navigation data element.
///
/// The sets of navigation data that can be authenticated.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum DataElement {
    /// Ephemeris, clock and health status (INAV words 1 to 5), authenticated
    /// by ADKD 0 and 12.
    CedAndStatus,
    /// GST-UTC and GST-GPS conversion parameters (INAV words 6 and 10),
    /// authenticated by ADKD 4.
    TimingParameters,
}

impl DataElement {
    /// Size of the element in bits.
    pub fn bits(self) -> usize {
        match self {
            DataElement::CedAndStatus => CED_AND_STATUS_BITS,
            DataElement::TimingParameters => TIMING_PARAMETERS_BITS,
        }
    }

    fn words(self) -> usize {
        match self {
            DataElement::CedAndStatus => CED_AND_STATUS_WORDS,
            DataElement::TimingParameters => TIMING_PARAMETERS_WORDS,
        }
    }
}

/// Identifier of a navigation data record.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RecordId {
    /// Satellite that transmitted the data.
    pub svn: Svn,
    /// Start of the subframe in which the data was transmitted.
    pub gst: Gst,
    /// Data element of the record.
    pub data_element: DataElement,
}

/// Navigation data record.
///
/// The navigation bits of one data element, as transmitted by a satellite in
/// a subframe. These are the exact bits that enter the MAC computation.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct NavigationDataRecord {
    svn: Svn,
    gst: Gst,
    data_element: DataElement,
    data: BitVec,
}

impl NavigationDataRecord {
    /// Constructs a record.
    ///
    /// The GST is rounded down to the start of its subframe. Returns
    /// [`Error::InvalidLength`] if `data` does not have the size of the data
    /// element.
    pub fn new(
        svn: Svn,
        gst: Gst,
        data_element: DataElement,
        data: &BitSlice,
    ) -> Result<NavigationDataRecord> {
        if data.len() != data_element.bits() {
            log::error!(
                "{data_element:?} record for {svn} has {} bits, expected {}",
                data.len(),
                data_element.bits()
            );
            return Err(Error::InvalidLength);
        }
        Ok(NavigationDataRecord {
            svn,
            gst: gst.gst_subframe(),
            data_element,
            data: data.to_bitvec(),
        })
    }

    /// Gives the satellite that transmitted the data.
    pub fn svn(&self) -> Svn {
        self.svn
    }

    /// Gives the start of the subframe in which the data was transmitted.
    pub fn gst(&self) -> Gst {
        self.gst
    }

    /// Gives the data element.
    pub fn data_element(&self) -> DataElement {
        self.data_element
    }

    /// Gives the navigation bits.
    pub fn data(&self) -> &BitSlice {
        &self.data
    }

    /// Gives the identifier of the record.
    pub fn id(&self) -> RecordId {
        RecordId {
            svn: self.svn,
            gst: self.gst,
            data_element: self.data_element,
        }
    }
}

/// Assembly of a data element from INAV words.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct WordAssembly {
    data_element: DataElement,
    data: BitVec,
    // subframes since each word was last received
    age: Vec<u8>,
}

impl WordAssembly {
    fn new(data_element: DataElement) -> WordAssembly {
        WordAssembly {
            data_element,
            data: bitvec![u8, Msb0; 0; data_element.bits()],
            age: vec![u8::MAX; data_element.words()],
        }
    }

    fn copy_word(&mut self, dest_range: core::ops::Range<usize>, source: &BitSlice, idx: usize) {
        self.age[idx] = 0;
        self.data[dest_range].copy_from_bitslice(source);
    }

    fn increase_age(&mut self) {
        for age in self.age.iter_mut() {
            *age = age.saturating_add(1);
        }
    }

    fn is_complete(&self) -> bool {
        self.age.iter().all(|&age| age != u8::MAX)
    }

    fn feed_ced(&mut self, word: &BitSlice, word_type: u8) -> bool {
        match word_type {
            1 => self.copy_word(0..120, &word[6..126], 0),
            2 => self.copy_word(120..240, &word[6..126], 1),
            3 => self.copy_word(240..362, &word[6..128], 2),
            4 => self.copy_word(362..482, &word[6..126], 3),
            5 => self.copy_word(482..549, &word[6..73], 4),
            _ => return false,
        }
        true
    }

    fn feed_timing(&mut self, word: &BitSlice, word_type: u8, band: InavBand) -> bool {
        match (word_type, band) {
            (6, InavBand::E1B) => self.copy_word(0..99, &word[6..105], 0),
            (10, InavBand::E1B) => self.copy_word(99..141, &word[86..128], 1),
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct SatelliteWords {
    gst: Gst,
    ced_and_status: WordAssembly,
    timing_parameters: WordAssembly,
}

/// INAV word collector.
///
/// This struct assembles the INAV words of each satellite into
/// [`NavigationDataRecord`]s. Words are kept across subframes, since the
/// navigation message repeats, and a record is produced once all the words of
/// a data element have been received.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct CollectNavMessage {
    satellites: BTreeMap<Svn, SatelliteWords>,
}

impl CollectNavMessage {
    /// Constructs a new, empty collector.
    pub fn new() -> CollectNavMessage {
        CollectNavMessage::default()
    }

    /// Feeds an INAV word into the collector.
    ///
    /// The `svn` parameter corresponds to the SVN of the satellite transmitting
    /// the INAV word. The `gst` parameter gives the GST at the start of the
    /// INAV page transmission. The `band` parameter indicates the band in which
    /// the INAV word was received (timing parameters are only taken from E1-B).
    ///
    /// Returns the records that the word completes or updates, stamped with
    /// the subframe of `gst`.
    pub fn feed(
        &mut self,
        word: &InavWord,
        svn: Svn,
        gst: Gst,
        band: InavBand,
    ) -> Vec<NavigationDataRecord> {
        log::trace!("feeding INAV word = {word:02x?} for {svn} GST {gst:?}");
        let gst = gst.gst_subframe();
        let sat = self.satellites.entry(svn).or_insert_with(|| SatelliteWords {
            gst,
            ced_and_status: WordAssembly::new(DataElement::CedAndStatus),
            timing_parameters: WordAssembly::new(DataElement::TimingParameters),
        });
        if sat.gst != gst {
            let elapsed = gst.subframes_since(sat.gst);
            if elapsed < 0 {
                log::warn!("{svn} INAV word at {gst:?} older than current {:?}", sat.gst);
                return Vec::new();
            }
            for _ in 0..elapsed.min(i64::from(u8::MAX)) {
                sat.ced_and_status.increase_age();
                sat.timing_parameters.increase_age();
            }
            sat.gst = gst;
        }

        let word = word.view_bits::<Msb0>();
        let word_type = word[..6].load_be::<u8>();
        let fed_ced = sat.ced_and_status.feed_ced(word, word_type);
        let fed_timing = sat.timing_parameters.feed_timing(word, word_type, band);
        let mut records = Vec::new();
        for (assembly, fed) in [
            (&sat.ced_and_status, fed_ced),
            (&sat.timing_parameters, fed_timing),
        ] {
            if fed {
                log::trace!(
                    "{svn} stored INAV word type {word_type} in {:?}, age {:?}",
                    assembly.data_element,
                    assembly.age
                );
                if assembly.is_complete() {
                    records.push(NavigationDataRecord {
                        svn,
                        gst,
                        data_element: assembly.data_element,
                        data: assembly.data.clone(),
                    });
                }
            }
        }
        records
    }
}

/// Authenticated navigation message data.
///
/// Gives access to a piece of navigation data that has been successfully
/// authenticated with OSNMA. The data is borrowed from a [`NavDataStore`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct NavMessageData<'a> {
    data: &'a BitSlice,
    authbits: u16,
    gst: Gst,
}

impl<'a> NavMessageData<'a> {
    /// Returns the navigation data as a `BitSlice`.
    pub fn data(&self) -> &'a BitSlice {
        self.data
    }

    /// Returns the number of authentication bits corresponding to this data.
    ///
    /// This is the sum of the lengths in bits of all the tags that have
    /// authenticated this data.
    pub fn authbits(&self) -> u16 {
        self.authbits
    }

    /// Returns the GST of the subframe in which this data was transmitted.
    pub fn gst(&self) -> Gst {
        self.gst
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct StoredRecord {
    record: NavigationDataRecord,
    authbits: u16,
}

/// Navigation data store.
///
/// Keeps the [`NavigationDataRecord`]s of each satellite and subframe within
/// a retention window, together with the number of authentication bits that
/// each record has accumulated.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NavDataStore {
    records: BTreeMap<RecordId, StoredRecord>,
    min_authbits: u16,
    retention_subframes: i32,
}

impl NavDataStore {
    /// Constructs an empty store.
    ///
    /// A record counts as authenticated once it has accumulated at least
    /// `min_authbits` bits. Records older than `retention_subframes`
    /// subframes are removed by [`NavDataStore::expire`].
    pub fn new(min_authbits: u16, retention_subframes: i32) -> NavDataStore {
        NavDataStore {
            records: BTreeMap::new(),
            min_authbits,
            retention_subframes,
        }
    }

    /// Inserts or replaces a record.
    ///
    /// A record with different bits than the stored one for the same
    /// satellite, subframe and data element replaces it and starts with zero
    /// authentication bits. A new record with the same bits as an earlier
    /// record of the satellite inherits its authentication bits.
    ///
    /// Returns `true` if the store changed.
    pub fn insert(&mut self, record: NavigationDataRecord) -> bool {
        let id = record.id();
        if let Some(stored) = self.records.get(&id) {
            if stored.record.data == record.data {
                return false;
            }
            log::info!("{:?} for {} at {:?} changed", id.data_element, id.svn, id.gst);
        }
        let authbits = self
            .same_data(&record)
            .map(|stored| stored.authbits)
            .max()
            .unwrap_or(0);
        log::trace!("storing {id:?} with {authbits} authbits");
        self.records.insert(id, StoredRecord { record, authbits });
        true
    }

    fn same_data<'a>(
        &'a self,
        record: &'a NavigationDataRecord,
    ) -> impl Iterator<Item = &'a StoredRecord> + 'a {
        self.records.values().filter(move |stored| {
            stored.record.svn == record.svn
                && stored.record.data_element == record.data_element
                && stored.record.gst != record.gst
                && stored.record.data == record.data
        })
    }

    /// Gives the record with identifier `id`.
    pub fn get(&self, id: &RecordId) -> Option<&NavigationDataRecord> {
        self.records.get(id).map(|stored| &stored.record)
    }

    /// Gives the authentication bits of the record with identifier `id`.
    pub fn authbits(&self, id: &RecordId) -> Option<u16> {
        self.records.get(id).map(|stored| stored.authbits)
    }

    /// Adds the length of an authenticated tag to a record.
    ///
    /// The bits are added to every stored record of the same satellite and
    /// data element that has the same navigation bits.
    pub fn add_authbits(&mut self, id: &RecordId, tag_bits: usize) {
        let Some(data) = self.records.get(id).map(|stored| stored.record.data.clone()) else {
            log::warn!("cannot add authbits to missing record {id:?}");
            return;
        };
        let tag_bits = u16::try_from(tag_bits).unwrap_or(u16::MAX);
        for (other, stored) in self.records.iter_mut() {
            if other.svn == id.svn
                && other.data_element == id.data_element
                && stored.record.data == data
            {
                stored.authbits = stored.authbits.saturating_add(tag_bits);
            }
        }
        log::debug!(
            "{:?} for {} at {:?} has {} authbits",
            id.data_element,
            id.svn,
            id.gst,
            self.authbits(id).unwrap_or(0)
        );
    }

    /// Resets all the authentication bits to zero.
    ///
    /// This is used when the NMA status is set to "don't use", in order to
    /// discard all the previously accumulated authentication.
    pub fn reset_authbits(&mut self) {
        for stored in self.records.values_mut() {
            stored.authbits = 0;
        }
    }

    /// Removes the records older than the retention window.
    pub fn expire(&mut self, now: Gst) {
        let retention = i64::from(self.retention_subframes);
        self.records
            .retain(|id, _| now.subframes_since(id.gst) <= retention);
    }

    /// Gives the number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the store has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn get_authenticated(&self, svn: Svn, data_element: DataElement) -> Option<NavMessageData<'_>> {
        self.records
            .values()
            .filter(|stored| {
                stored.record.svn == svn
                    && stored.record.data_element == data_element
                    && stored.authbits >= self.min_authbits
            })
            .max_by_key(|stored| stored.record.gst)
            .map(|stored| NavMessageData {
                data: &stored.record.data,
                authbits: stored.authbits,
                gst: stored.record.gst,
            })
    }

    /// Try to get authenticated CED and health status data for a satellite.
    ///
    /// Returns the most recent CED and health status data of the satellite
    /// with SVN `svn` that has at least the minimum number of authentication
    /// bits, or `None` if there is no such data.
    pub fn get_ced_and_status(&self, svn: Svn) -> Option<NavMessageData<'_>> {
        self.get_authenticated(svn, DataElement::CedAndStatus)
    }

    /// Try to get authenticated timing parameters for a satellite.
    ///
    /// Returns the most recent timing parameters of the satellite with SVN
    /// `svn` that have at least the minimum number of authentication bits, or
    /// `None` if there are no such data.
    pub fn get_timing_parameters(&self, svn: Svn) -> Option<NavMessageData<'_>> {
        self.get_authenticated(svn, DataElement::TimingParameters)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn svn(n: u8) -> Svn {
        Svn::try_from(n).unwrap()
    }

    // INAV word of the given type, with the data bits set to a pattern
    fn word(word_type: u8, fill: u8) -> InavWord {
        let mut word = [fill; 16];
        word[0] = (word_type << 2) | (fill & 0x3);
        word
    }

    #[test]
    fn ced_assembly() {
        let mut collect = CollectNavMessage::new();
        let gst = Gst::new(1176, 121050);
        for word_type in 1..=4 {
            let records = collect.feed(&word(word_type, 0xa5), svn(11), gst, InavBand::E1B);
            assert!(records.is_empty());
        }
        // word types not used in CED or timing are ignored
        assert!(collect
            .feed(&word(0, 0xa5), svn(11), gst, InavBand::E1B)
            .is_empty());
        let records = collect.feed(&word(5, 0xa5), svn(11), gst.add_seconds(2), InavBand::E1B);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.svn(), svn(11));
        assert_eq!(record.gst(), gst);
        assert_eq!(record.data_element(), DataElement::CedAndStatus);
        assert_eq!(record.data().len(), 549);
        // word 1 bits follow the 6-bit word type
        let expected = word(1, 0xa5);
        assert_eq!(
            record.data()[..120],
            expected.view_bits::<Msb0>()[6..126]
        );
        // word 5 occupies the last 67 bits
        let expected = word(5, 0xa5);
        assert_eq!(
            record.data()[482..],
            expected.view_bits::<Msb0>()[6..73]
        );
    }

    #[test]
    fn timing_only_e1b() {
        let mut collect = CollectNavMessage::new();
        let gst = Gst::new(1176, 121050);
        assert!(collect
            .feed(&word(6, 0x3c), svn(5), gst, InavBand::E1B)
            .is_empty());
        assert!(collect
            .feed(&word(10, 0x3c), svn(5), gst, InavBand::E5B)
            .is_empty());
        let records = collect.feed(&word(10, 0x3c), svn(5), gst, InavBand::E1B);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data_element(), DataElement::TimingParameters);
        assert_eq!(records[0].data().len(), 141);
        let expected = word(10, 0x3c);
        assert_eq!(
            records[0].data()[99..],
            expected.view_bits::<Msb0>()[86..128]
        );
    }

    #[test]
    fn words_carry_over_subframes() {
        let mut collect = CollectNavMessage::new();
        let gst = Gst::new(1176, 121050);
        for word_type in 1..=5 {
            collect.feed(&word(word_type, 0x0f), svn(3), gst, InavBand::E1B);
        }
        let next = gst.add_subframes(1);
        let records = collect.feed(&word(2, 0x0f), svn(3), next, InavBand::E1B);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].gst(), next);
        // old words are ignored
        assert!(collect
            .feed(&word(2, 0x0f), svn(3), gst, InavBand::E1B)
            .is_empty());
    }

    fn record(n: u8, gst: Gst, fill: bool) -> NavigationDataRecord {
        let data = bitvec![u8, Msb0; u8::from(fill); 549];
        NavigationDataRecord::new(svn(n), gst, DataElement::CedAndStatus, &data).unwrap()
    }

    #[test]
    fn record_length() {
        let data = bitvec![u8, Msb0; 0; 548];
        assert!(matches!(
            NavigationDataRecord::new(
                svn(1),
                Gst::new(1176, 0),
                DataElement::CedAndStatus,
                &data
            ),
            Err(Error::InvalidLength)
        ));
    }

    #[test]
    fn authbits() {
        let mut store = NavDataStore::new(40, 13);
        let gst = Gst::new(1176, 121050);
        let r0 = record(4, gst, true);
        assert!(store.insert(r0.clone()));
        assert!(!store.insert(r0.clone()));
        store.add_authbits(&r0.id(), 20);
        assert!(store.get_ced_and_status(svn(4)).is_none());
        // same data in the next subframe inherits the authbits
        let r1 = record(4, gst.add_subframes(1), true);
        assert!(store.insert(r1.clone()));
        assert_eq!(store.authbits(&r1.id()), Some(20));
        store.add_authbits(&r1.id(), 20);
        assert_eq!(store.authbits(&r0.id()), Some(40));
        let data = store.get_ced_and_status(svn(4)).unwrap();
        assert_eq!(data.authbits(), 40);
        assert_eq!(data.gst(), r1.gst());
        assert!(store.get_timing_parameters(svn(4)).is_none());
        // changed data starts from zero
        let r2 = record(4, gst.add_subframes(1), false);
        assert!(store.insert(r2.clone()));
        assert_eq!(store.authbits(&r2.id()), Some(0));
        assert_eq!(store.get_ced_and_status(svn(4)).unwrap().gst(), gst);
        store.reset_authbits();
        assert!(store.get_ced_and_status(svn(4)).is_none());
    }

    #[test]
    fn expire() {
        let mut store = NavDataStore::new(40, 3);
        let gst = Gst::new(1176, 121050);
        for j in 0..6 {
            store.insert(record(7, gst.add_subframes(j), j % 2 == 0));
        }
        store.expire(gst.add_subframes(5));
        assert_eq!(store.len(), 4);
        assert!(store.get(&record(7, gst, true).id()).is_none());
    }
}
