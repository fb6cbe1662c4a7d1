//! Room Identifiers and Links
//!
//! Rooms are named `room-xxxxxxxx` and shared as `syncwatch://room-xxxxxxxx`.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

/// Scheme of shareable room links
pub const LINK_SCHEME: &str = "syncwatch://";

const ID_PREFIX: &str = "room-";

/// Characters used in room ids (lowercase, no 0/o, 1/l/i, 5/s, 2/z)
const ALPHABET: &[u8] = b"346789abcdefghjkmnpqrtuvwxy";

const SUFFIX_LENGTH: usize = 8;

/// Identifier of a room in the signaling store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(String);

impl RoomId {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut id = String::with_capacity(ID_PREFIX.len() + SUFFIX_LENGTH);
        id.push_str(ID_PREFIX);
        for _ in 0..SUFFIX_LENGTH {
            id.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
        }
        RoomId(id)
    }

    /// Parse a bare room id, case-insensitively
    pub fn parse(input: &str) -> Option<Self> {
        let normalized = input.trim().to_ascii_lowercase();
        let suffix = normalized.strip_prefix(ID_PREFIX)?;

        if suffix.len() == SUFFIX_LENGTH && suffix.bytes().all(|b| ALPHABET.contains(&b)) {
            Some(RoomId(normalized))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn link(&self) -> RoomLink {
        RoomLink(self.clone())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shareable form of a room id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomLink(RoomId);

impl RoomLink {
    /// Accepts a full link or a bare room id
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let id = match trimmed.get(..LINK_SCHEME.len()) {
            Some(scheme) if scheme.eq_ignore_ascii_case(LINK_SCHEME) => {
                trimmed[LINK_SCHEME.len()..].trim_end_matches('/')
            }
            _ => trimmed,
        };
        RoomId::parse(id).map(RoomLink)
    }

    pub fn room_id(&self) -> &RoomId {
        &self.0
    }
}

impl fmt::Display for RoomLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", LINK_SCHEME, self.0)
    }
}

impl FromStr for RoomLink {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoomLink::parse(s).ok_or_else(|| format!("not a room link: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_parses() {
        let id = RoomId::generate();
        assert!(id.as_str().starts_with("room-"));
        assert_eq!(id.as_str().len(), 13);
        assert_eq!(RoomId::parse(id.as_str()), Some(id));
    }

    #[test]
    fn test_generated_ids_differ() {
        // Very unlikely to be equal
        assert_ne!(RoomId::generate(), RoomId::generate());
    }

    #[test]
    fn test_room_id_parse() {
        assert_eq!(
            RoomId::parse(" ROOM-ABCD3467 ").unwrap().as_str(),
            "room-abcd3467"
        );
        assert!(RoomId::parse("abcd3467").is_none());
        assert!(RoomId::parse("room-abc").is_none());
        // '0' is not in the alphabet
        assert!(RoomId::parse("room-abcd0467").is_none());
    }

    #[test]
    fn test_link_display() {
        let id = RoomId::parse("room-abcd3467").unwrap();
        assert_eq!(id.link().to_string(), "syncwatch://room-abcd3467");
    }

    #[test]
    fn test_link_parse() {
        let expected = RoomId::parse("room-abcd3467").unwrap();
        for input in [
            "syncwatch://room-abcd3467",
            "SyncWatch://room-abcd3467/",
            "room-abcd3467",
        ] {
            assert_eq!(RoomLink::parse(input).unwrap().room_id(), &expected);
        }
        assert!(RoomLink::parse("http://room-abcd3467").is_none());
        assert!("syncwatch://nope".parse::<RoomLink>().is_err());
    }
}
