/// Galileo week number.
pub type Wn = u16;
/// Time of week.
///
/// This represents the time of week in seconds.
pub type Tow = u32;

const SECS_IN_WEEK: Tow = 24 * 3600 * 7;
const SECS_PER_SUBFRAME: Tow = 30;
// Packed GST layout used in OSNMA messages: 12-bit WN followed by 20-bit TOW
const TOW_BITS: u32 = 20;
const TOW_MASK: u32 = (1 << TOW_BITS) - 1;
const WN_ROLLOVER: u32 = 1 << 12;

/// GST (Galileo System Time)
///
/// The Galileo System Time, stored as a week number and a time of week. The
/// week number is not truncated to the 12 bits that are broadcast, so that
/// ordering and arithmetic remain linear across a rollover. GSTs at the start
/// of a 30-second subframe are used as the time-slot identifiers of TESLA keys
/// and MAC tags.
///
/// # Examples
/// ```
/// use osnma_core::Gst;
///
/// let gst = Gst::new(1177, 175767);
/// assert_eq!(gst.wn(), 1177);
/// assert_eq!(gst.tow(), 175767);
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Gst {
    wn: Wn,
    tow: Tow,
}

impl Gst {
    /// Constructs a new GST from a week number and TOW.
    ///
    /// # Panics
    ///
    /// Panics if `tow` is greater or equal to 604800 (the number of
    /// seconds in a week).
    pub fn new(wn: Wn, tow: Tow) -> Self {
        assert!(tow < SECS_IN_WEEK);
        Gst { wn, tow }
    }

    /// Constructs a GST from a number of seconds since the Galileo epoch.
    pub fn from_seconds(seconds: u64) -> Self {
        let secs_in_week = u64::from(SECS_IN_WEEK);
        Gst {
            // wraps after 65536 weeks
            wn: (seconds / secs_in_week) as Wn,
            tow: (seconds % secs_in_week) as Tow,
        }
    }

    /// Constructs a GST from its packed 32-bit representation.
    ///
    /// Only the 12 least significant bits of the week number are present in
    /// the packed form. The full week number is resolved as the one closest
    /// to the week number of `reference`, so that a packed GST broadcast
    /// shortly after a week number rollover is placed after the rollover.
    ///
    /// Returns `None` if the TOW field is not a valid time of week.
    ///
    /// # Examples
    ///
    /// ```
    /// use osnma_core::{compute_gst, Gst};
    ///
    /// let reference = Gst::new(4095, 604000);
    /// let packed = compute_gst(4096, 100);
    /// assert_eq!(Gst::from_packed(packed, reference), Some(Gst::new(4096, 100)));
    /// ```
    pub fn from_packed(packed: u32, reference: Gst) -> Option<Self> {
        let tow = packed & TOW_MASK;
        if tow >= SECS_IN_WEEK {
            return None;
        }
        let period = i64::from(WN_ROLLOVER);
        let reference_wn = i64::from(reference.wn);
        let mut wn = reference_wn - reference_wn.rem_euclid(period) + i64::from(packed >> TOW_BITS);
        if wn - reference_wn > period / 2 {
            wn -= period;
        } else if reference_wn - wn > period / 2 {
            wn += period;
        }
        Wn::try_from(wn).ok().map(|wn| Gst { wn, tow })
    }

    /// Returns the week number of the GST.
    pub fn wn(&self) -> Wn {
        self.wn
    }

    /// Returns the time of week of the GST.
    pub fn tow(&self) -> Tow {
        self.tow
    }

    /// Returns the number of seconds since the Galileo epoch.
    ///
    /// This is a linear time scale, suitable for computing differences
    /// between GSTs in different weeks.
    pub fn seconds(&self) -> u64 {
        u64::from(self.wn) * u64::from(SECS_IN_WEEK) + u64::from(self.tow)
    }

    /// Returns the packed 32-bit representation used in OSNMA messages.
    ///
    /// See [`compute_gst`].
    pub fn packed(&self) -> u32 {
        compute_gst(self.wn, self.tow)
    }

    /// Adds `seconds` seconds to the GST.
    ///
    /// The GST corresponding to the sum is returned.
    ///
    /// # Panics
    ///
    /// Panics if the result would be before the Galileo epoch.
    ///
    /// # Examples
    ///
    /// ```
    /// use osnma_core::Gst;
    ///
    /// let gst = Gst::new(1177, 175767);
    /// let gst_next_page = gst.add_seconds(2);
    /// assert_eq!(gst_next_page.wn(), 1177);
    /// assert_eq!(gst_next_page.tow(), 175769);
    ///
    /// assert_eq!(gst_next_page.add_seconds(-2), gst);
    ///
    /// let end_of_week = Gst::new(1177, 604799);
    /// assert_eq!(end_of_week.add_seconds(1), Gst::new(1178, 0));
    /// ```
    pub fn add_seconds(&self, seconds: i32) -> Self {
        let total = self.seconds() as i64 + i64::from(seconds);
        assert!(total >= 0, "GST before the Galileo epoch");
        Self::from_seconds(total as u64)
    }

    /// Adds `subframes` 30-second subframes to the GST.
    ///
    /// # Examples
    ///
    /// ```
    /// use osnma_core::Gst;
    ///
    /// let gst = Gst::new(1177, 175767);
    /// let gst2 = gst.add_subframes(3);
    /// assert_eq!(gst2.tow(), 175857);
    /// assert_eq!(gst2.add_subframes(-3), gst);
    /// ```
    pub fn add_subframes(&self, subframes: i32) -> Self {
        self.add_seconds(subframes.saturating_mul(SECS_PER_SUBFRAME as i32))
    }

    /// Returns the number of whole subframes elapsed from `earlier` to `self`.
    ///
    /// The result is negative if `earlier` is actually later than `self`.
    pub fn subframes_since(&self, earlier: Gst) -> i64 {
        (self.seconds() as i64 - earlier.seconds() as i64).div_euclid(i64::from(SECS_PER_SUBFRAME))
    }

    /// Returns the GST at the start of the subframe that contains `self`.
    ///
    /// # Examples
    ///
    /// ```
    /// use osnma_core::Gst;
    ///
    /// let gst = Gst::new(1177, 175767);
    /// let subframe = gst.gst_subframe();
    /// assert_eq!(subframe.wn(), 1177);
    /// assert_eq!(subframe.tow(), 175740);
    /// ```
    pub fn gst_subframe(&self) -> Self {
        Gst {
            wn: self.wn,
            tow: self.tow / SECS_PER_SUBFRAME * SECS_PER_SUBFRAME,
        }
    }

    /// Returns `true` if `self` corresponds to the start of a subframe.
    pub fn is_subframe(&self) -> bool {
        self.tow % SECS_PER_SUBFRAME == 0
    }
}

/// Packs a week number and time of week into a 32-bit GST.
///
/// The week number is reduced modulo 4096 and placed in the 12 most
/// significant bits. The time of week occupies the 20 least significant bits.
///
/// # Examples
///
/// ```
/// use osnma_core::compute_gst;
///
/// assert_eq!(compute_gst(1248, 345660), 0x4e05463c);
/// ```
pub fn compute_gst(wn: Wn, tow: Tow) -> u32 {
    (u32::from(wn) % WN_ROLLOVER) << TOW_BITS | (tow & TOW_MASK)
}

/// Returns the big-endian byte representation of a packed GST.
///
/// This is the layout in which the GST enters the MAC and one-way function
/// inputs.
pub fn gst_to_bytes(gst: u32) -> [u8; 4] {
    gst.to_be_bytes()
}

/// Reads a packed GST from its big-endian byte representation.
pub fn bytes_to_gst(bytes: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*bytes)
}
