use crate::error::Error;
use crate::types::NUM_SVNS;
use core::fmt;

/// Galileo SVN.
///
/// Identifies a Galileo satellite by its number, between 1 and 36. The range
/// is checked at construction, so an `Svn` is always valid. Satellites are
/// usually written as Exx, which is what the `Display` implementation does.
///
/// In OSNMA messages the SVN is used as the PRN of the authenticating
/// satellite (PRNA) and of the satellite whose data is authenticated (PRND).
///
/// # Examples
///
/// ```
/// use osnma_core::Svn;
///
/// let svn = Svn::try_from(24u8).unwrap();
/// assert_eq!(svn.to_string(), "E24");
/// assert!(Svn::try_from(37u8).is_err());
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Svn(u8);

impl Svn {
    /// Iterates over E01 to E36 in increasing order.
    pub fn iter() -> impl Iterator<Item = Svn> {
        (1..=NUM_SVNS as u8).map(Svn)
    }

    /// Returns the SVN as a PRN byte, as used in MAC inputs.
    pub fn prn(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Svn {
    type Error = Error;

    fn try_from(value: u8) -> Result<Svn, Error> {
        if (1..=NUM_SVNS as u8).contains(&value) {
            Ok(Svn(value))
        } else {
            Err(Error::InvalidSvn)
        }
    }
}

macro_rules! impl_try_from {
    ($($t:ty),*) => {
        $(
            impl TryFrom<$t> for Svn {
                type Error = Error;

                fn try_from(value: $t) -> Result<Svn, Error> {
                    u8::try_from(value)
                        .map_err(|_| Error::InvalidSvn)
                        .and_then(Svn::try_from)
                }
            }
        )*
    };
}

impl_try_from!(u16, u32, u64, usize, i32);

impl From<Svn> for u8 {
    fn from(svn: Svn) -> u8 {
        svn.0
    }
}

impl From<Svn> for usize {
    fn from(svn: Svn) -> usize {
        usize::from(svn.0)
    }
}

impl fmt::Display for Svn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:02}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn range() {
        for j in 1..=36u32 {
            assert!(Svn::try_from(j).is_ok());
        }
        assert!(Svn::try_from(0u8).is_err());
        assert!(Svn::try_from(37usize).is_err());
        assert!(Svn::try_from(-1i32).is_err());
        assert!(Svn::try_from(257u16).is_err());
    }

    #[test]
    fn format() {
        assert_eq!(Svn::try_from(3u8).unwrap().to_string(), "E03");
        assert_eq!(Svn::try_from(24u8).unwrap().to_string(), "E24");
    }

    #[test]
    fn iterator() {
        let svns = Svn::iter().collect::<Vec<_>>();
        assert_eq!(svns.len(), NUM_SVNS);
        assert_eq!(u8::from(svns[0]), 1);
        assert_eq!(usize::from(svns[35]), 36);
    }
}
