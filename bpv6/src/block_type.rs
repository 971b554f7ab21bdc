use super::*;

/// The type code of a bundle block.
///
/// The primary block has no wire type code of its own; code 0 is reserved
/// for it internally, matching the registry slot it occupies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BlockType {
    Primary,
    Payload,
    PreviousHop,
    Age,
    Unrecognised(u8),
}

impl From<u8> for BlockType {
    fn from(value: u8) -> Self {
        match value {
            0 => BlockType::Primary,
            1 => BlockType::Payload,
            5 => BlockType::PreviousHop,
            10 => BlockType::Age,
            value => BlockType::Unrecognised(value),
        }
    }
}

impl From<BlockType> for u8 {
    fn from(value: BlockType) -> Self {
        match value {
            BlockType::Primary => 0,
            BlockType::Payload => 1,
            BlockType::PreviousHop => 5,
            BlockType::Age => 10,
            BlockType::Unrecognised(v) => v,
        }
    }
}
