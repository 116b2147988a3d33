use core::fmt;

use crate::{Error, Result};

/// A 64-bit identifier carrying its entity type, origin shard and a
/// per-type sequence.
///
/// - 16 bits type (non-zero for user-defined types)
/// - 8 bits shard
/// - 8 bits reserved (free-form tag, never interpreted)
/// - 32 bits sequence
///
/// ```text
///  Bit Index:  63         48 47       40 39          32 31             0
///              +-------------+-----------+--------------+---------------+
///  Field:      |  type (16)  | shard (8) | reserved (8) | sequence (32) |
///              +-------------+-----------+--------------+---------------+
///              |<----- MSB ------------ 64 bits ------------ LSB ------>|
/// ```
///
/// Every 64-bit value is a valid `LongId`: the four fields partition the
/// word exactly, so `from_raw(x).to_raw() == x` for all `x`.
///
/// # Example
///
/// ```
/// use longid::LongId;
///
/// let id = LongId::from_components(0x1FEE, 0xCC, 0xBB, 0x4433_2211);
/// assert_eq!(id.to_raw(), 0x1FEE_CCBB_4433_2211);
/// assert_eq!(id.components(), (0x1FEE, 0xCC, 0xBB, 0x4433_2211));
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LongId {
    id: u64,
}

impl LongId {
    /// Bitmask for extracting the 16-bit type field. Occupies bits 48 through
    /// 63.
    pub const TYPE_MASK: u64 = (1 << 16) - 1;

    /// Bitmask for extracting the 8-bit shard field. Occupies bits 40 through
    /// 47.
    pub const SHARD_MASK: u64 = (1 << 8) - 1;

    /// Bitmask for extracting the 8-bit reserved field. Occupies bits 32
    /// through 39.
    pub const RESERVED_MASK: u64 = (1 << 8) - 1;

    /// Bitmask for extracting the 32-bit sequence field. Occupies bits 0
    /// through 31.
    pub const SEQUENCE_MASK: u64 = (1 << 32) - 1;

    /// Number of bits to shift the type to its correct position (bit 48).
    pub const TYPE_SHIFT: u64 = 48;

    /// Number of bits to shift the shard to its correct position (bit 40).
    pub const SHARD_SHIFT: u64 = 40;

    /// Number of bits to shift the reserved byte to its correct position
    /// (bit 32).
    pub const RESERVED_SHIFT: u64 = 32;

    /// Number of bits to shift the sequence field (bit 0).
    pub const SEQUENCE_SHIFT: u64 = 0;

    /// Packs the four fields into an identifier.
    pub const fn from_components(type_id: u16, shard: u8, reserved: u8, sequence: u32) -> Self {
        let type_id = (type_id as u64 & Self::TYPE_MASK) << Self::TYPE_SHIFT;
        let shard = (shard as u64 & Self::SHARD_MASK) << Self::SHARD_SHIFT;
        let reserved = (reserved as u64 & Self::RESERVED_MASK) << Self::RESERVED_SHIFT;
        let sequence = (sequence as u64 & Self::SEQUENCE_MASK) << Self::SEQUENCE_SHIFT;
        Self {
            id: type_id | shard | reserved | sequence,
        }
    }

    /// Packs loosely typed field values, rejecting any that overflow their
    /// width.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldOverflow`] naming the first offending field.
    pub fn try_from_components(type_id: u64, shard: u64, reserved: u64, sequence: u64) -> Result<Self> {
        let check = |field, value: u64, max: u64| {
            if value > max {
                Err(Error::FieldOverflow { field, value, max })
            } else {
                Ok(())
            }
        };
        check("type", type_id, Self::TYPE_MASK)?;
        check("shard", shard, Self::SHARD_MASK)?;
        check("reserved", reserved, Self::RESERVED_MASK)?;
        check("sequence", sequence, Self::SEQUENCE_MASK)?;
        Ok(Self::from_components(
            type_id as u16,
            shard as u8,
            reserved as u8,
            sequence as u32,
        ))
    }

    /// Wraps a raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self { id: raw }
    }

    /// Returns the raw value.
    pub const fn to_raw(&self) -> u64 {
        self.id
    }

    /// Reinterprets a signed database value bit for bit.
    pub const fn from_i64(raw: i64) -> Self {
        Self { id: raw as u64 }
    }

    /// Returns the value as stored in a signed `BIGINT` column.
    pub const fn to_i64(&self) -> i64 {
        self.id as i64
    }

    /// Extracts the entity type.
    pub const fn type_id(&self) -> u16 {
        ((self.id >> Self::TYPE_SHIFT) & Self::TYPE_MASK) as u16
    }

    /// Extracts the origin shard.
    pub const fn shard(&self) -> u8 {
        ((self.id >> Self::SHARD_SHIFT) & Self::SHARD_MASK) as u8
    }

    /// Extracts the reserved byte.
    pub const fn reserved(&self) -> u8 {
        ((self.id >> Self::RESERVED_SHIFT) & Self::RESERVED_MASK) as u8
    }

    /// Extracts the sequence number.
    pub const fn sequence(&self) -> u32 {
        ((self.id >> Self::SEQUENCE_SHIFT) & Self::SEQUENCE_MASK) as u32
    }

    /// Decodes all four fields as `(type, shard, reserved, sequence)`.
    pub const fn components(&self) -> (u16, u8, u8, u32) {
        (self.type_id(), self.shard(), self.reserved(), self.sequence())
    }

    /// The high 32 bits (type, shard and reserved). Constant over the
    /// lifetime of a counter.
    pub const fn prefix(&self) -> u64 {
        self.id & !Self::SEQUENCE_MASK
    }

    /// Returns true if the sequence can be incremented without carrying into
    /// the reserved byte.
    pub const fn has_sequence_room(&self) -> bool {
        (self.sequence() as u64) < Self::SEQUENCE_MASK
    }

    /// Returns a copy with the sequence replaced.
    pub const fn with_sequence(&self, sequence: u32) -> Self {
        Self {
            id: self.prefix() | sequence as u64,
        }
    }

    /// Returns the ID as a zero-padded 20-digit string.
    pub fn to_padded_string(&self) -> String {
        format!("{:020}", self.id)
    }
}

impl From<u64> for LongId {
    fn from(raw: u64) -> Self {
        Self::from_raw(raw)
    }
}

impl From<LongId> for u64 {
    fn from(id: LongId) -> Self {
        id.to_raw()
    }
}

impl From<i64> for LongId {
    fn from(raw: i64) -> Self {
        Self::from_i64(raw)
    }
}

impl From<LongId> for i64 {
    fn from(id: LongId) -> Self {
        id.to_i64()
    }
}

impl fmt::Display for LongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

const LAYOUT_BORDER: &str = "        +-----------+-----------+--------------+---------------+";

/// Renders the raw value and a table of the four fields in decimal and hex.
impl fmt::Debug for LongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (type_id, shard, reserved, sequence) = self.components();

        writeln!(f, "LongId {{")?;
        writeln!(f, "    raw id     : {:#018x} ({})", self.id, self.id)?;
        writeln!(f, "    padded     : {}", self.to_padded_string())?;
        writeln!(f, "    layout     :")?;
        writeln!(f, "{LAYOUT_BORDER}")?;
        writeln!(
            f,
            "        |{:^11}|{:^11}|{:^14}|{:^15}|",
            "type (16)", "shard (8)", "reserved (8)", "sequence (32)"
        )?;
        writeln!(f, "{LAYOUT_BORDER}")?;
        writeln!(f, "        |{type_id:^11}|{shard:^11}|{reserved:^14}|{sequence:^15}|")?;
        writeln!(
            f,
            "        |{type_id:^#11x}|{shard:^#11x}|{reserved:^#14x}|{sequence:^#15x}|"
        )?;
        writeln!(f, "{LAYOUT_BORDER}")?;
        write!(f, "}}")
    }
}
