use crate::serde::{Deserializable, DeserializeError, Serializable, SerializeError};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::{
    cmp::Reverse,
    io::{Read, Write},
    sync::Arc,
};

/// User defined key
pub type UserKey = Arc<[u8]>;

/// Sequence number, a monotonically increasing counter
///
/// Items written in the same batch share a sequence number.
///
/// An item with a higher sequence number shadows an item with the
/// same key and lower sequence number.
pub type SeqNo = u64;

/// Key as it is stored inside a sorted file: user key plus sequence number
///
/// Two internal keys with the same user key are ordered newest first,
/// so point reads see the freshest version of an item.
#[derive(Clone, Eq, PartialEq)]
pub struct InternalKey {
    /// User-defined key - an arbitrary byte array
    pub user_key: UserKey,

    /// Sequence number
    pub seqno: SeqNo,
}

impl std::fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.user_key, self.seqno)
    }
}

impl InternalKey {
    /// Creates a new [`InternalKey`].
    ///
    /// # Panics
    ///
    /// Panics if the user key is empty or longer than 2^16 bytes
    pub fn new<K: Into<UserKey>>(user_key: K, seqno: SeqNo) -> Self {
        let user_key = user_key.into();

        assert!(!user_key.is_empty());
        assert!(user_key.len() <= u16::MAX.into());

        Self { user_key, seqno }
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Order by user key, THEN by sequence number (descending)
// This mirrors how items are laid out inside sorted files,
// so key range comparisons match on-disk order
impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.user_key, Reverse(self.seqno)).cmp(&(&other.user_key, Reverse(other.seqno)))
    }
}

impl Serializable for InternalKey {
    fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        // NOTE: Truncation is okay and actually needed
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u16::<BigEndian>(self.user_key.len() as u16)?;
        writer.write_all(&self.user_key)?;

        writer.write_u64::<BigEndian>(self.seqno)?;

        Ok(())
    }
}

impl Deserializable for InternalKey {
    fn deserialize<R: Read>(reader: &mut R) -> Result<Self, DeserializeError> {
        let key_len = reader.read_u16::<BigEndian>()?;
        let mut user_key = vec![0; key_len.into()];
        reader.read_exact(&mut user_key)?;

        let seqno = reader.read_u64::<BigEndian>()?;

        Ok(Self {
            user_key: user_key.into(),
            seqno,
        })
    }
}
