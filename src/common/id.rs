//! Kademlia node Id or a lookup target
use rand::Rng;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::{Error, Result};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
/// The size of node IDs in bits, and the number of buckets in a routing table.
pub const ID_BITS: usize = ID_SIZE * 8;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
/// Kademlia node Id or a lookup target
///
/// The derived ordering is lexicographic over the bytes, which is the same as
/// comparing them as big-endian unsigned integers. That is what allows the
/// result of [Id::xor] to be compared as a distance.
pub struct Id([u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdentifier(format!(
                "expected {} bytes, got {}",
                ID_SIZE,
                bytes.len()
            )));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Id(tmp))
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// XOR distance between this Id and another.
    ///
    /// Symmetric, and the distance to self is all zeros.
    pub fn xor(&self, other: &Id) -> Id {
        let mut result = [0_u8; ID_SIZE];

        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            result[i] = a ^ b;
        }

        Id(result)
    }

    /// Number of leading bits this Id shares with `other`, which is the
    /// number of leading zero bits of their XOR distance.
    ///
    /// Ranges from `0` (the first bit differs) to `ID_BITS - 1` (only the last
    /// bit differs). Returns `None` for identical Ids, for which no bucket applies.
    pub fn shared_prefix_len(&self, other: &Id) -> Option<usize> {
        for i in 0..ID_SIZE {
            let xor = self.0[i] ^ other.0[i];

            if xor != 0 {
                return Some(i * 8 + xor.leading_zeros() as usize);
            }
        }

        None
    }
}

impl FromStr for Id {
    type Err = Error;

    /// Parse a hex encoded Id. Any length other than `2 * ID_SIZE` hex
    /// characters is rejected rather than truncated or padded.
    fn from_str(s: &str) -> Result<Id> {
        let bytes =
            hex::decode(s).map_err(|error| Error::InvalidIdentifier(format!("{s:?}: {error}")))?;

        Id::from_bytes(bytes)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn id(hex: &str) -> Id {
        Id::from_str(hex).unwrap()
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(Id::random(), Id::random());
    }

    #[test]
    fn hex_round_trip() {
        let hex = "c06349c2f47c837f96d782f2753b2266d548bfa3";

        assert_eq!(id(hex).to_string(), hex);
    }

    #[test]
    fn reject_malformed_hex() {
        // Too short.
        assert!(matches!(
            Id::from_str("c06349c2f47c837f96d782f2753b2266d548bf"),
            Err(Error::InvalidIdentifier(_))
        ));
        // Too long.
        assert!(matches!(
            Id::from_str("c06349c2f47c837f96d782f2753b2266d548bfa300"),
            Err(Error::InvalidIdentifier(_))
        ));
        // Not hex at all.
        assert!(matches!(
            Id::from_str("zz6349c2f47c837f96d782f2753b2266d548bfa3"),
            Err(Error::InvalidIdentifier(_))
        ));
        assert!(Id::from_str("").is_err());
    }

    #[test]
    fn reject_wrong_byte_length() {
        assert!(Id::from_bytes([0_u8; 19]).is_err());
        assert!(Id::from_bytes([0_u8; 21]).is_err());
        assert!(Id::from_bytes([0_u8; 20]).is_ok());
    }

    #[test]
    fn xor() {
        let a = id("66472dba5cf4e1cbad155ad05beb14cb19d7c65a");
        let b = id("739e8aef749dff95111f1b8bc2062f53e156d6e7");

        assert_eq!(
            a.xor(&b).to_string(),
            "15d9a75528691e5ebc0a415b99ed3b98f88110bd"
        );
        assert_eq!(a.xor(&b), b.xor(&a));
        assert_eq!(a.xor(&a), Id([0; ID_SIZE]));
    }

    #[test]
    fn shared_prefix_len() {
        let zero = "0000000000000000000000000000000000000000";

        let cases = [
            ("8000000000000000000000000000000000000000", Some(0)),
            ("4000000000000000000000000000000000000000", Some(1)),
            ("0100000000000000000000000000000000000000", Some(7)),
            ("0080000000000000000000000000000000000000", Some(8)),
            ("0000000000000000000000000000000000000001", Some(ID_BITS - 1)),
            (zero, None),
        ];

        for (other, expected) in cases {
            let a = id(other);
            let b = id(zero);

            assert_eq!(a.shared_prefix_len(&b), expected, "{a} vs {b}");
            assert_eq!(a.shared_prefix_len(&b), b.shared_prefix_len(&a));
        }
    }

    #[test]
    fn shared_prefix_len_is_symmetric_for_random_ids() {
        for _ in 0..100 {
            let a = Id::random();
            let b = Id::random();

            assert_eq!(a.shared_prefix_len(&b), b.shared_prefix_len(&a));
            assert_eq!(a.shared_prefix_len(&a), None);
        }
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = id("0000000000000000000000000000000000000000");
        let b = id("0000000000000000000000000000000000000001");
        let c = id("000000000000000000000000000000000fffffff");

        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }
}
