//! Register window decoding.
//!
//! Decoding is pure: a set of raw register windows goes in, a complete
//! [`Snapshot`] or a [`DecodeError`] comes out. A snapshot is never
//! returned half-built.

use crate::error::DecodeError;
use crate::registers::{
    CodeTable, Encoding, FIELDS, MULTI_BLOCK, QUIRKS, RegisterBlock, SINGLE_BLOCK, Source,
};
use crate::snapshot::{Snapshot, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Interpret a raw register word as a two's-complement signed value.
pub fn decode_signed(raw: u16) -> i64 {
    if raw & 0x8000 != 0 {
        raw as i64 - 0x10000
    } else {
        raw as i64
    }
}

/// Combine two adjacent registers into a u32, low-order word first.
pub fn combine_u32(low: u16, high: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

/// Split a signed power reading into its non-negative `(positive, negative)` parts.
pub fn split_power(power: i64) -> (i64, i64) {
    (power.max(0), (-power).max(0))
}

/// Label for `code`, or `"Unknown (<code>)"` when the table has no entry.
pub fn lookup_label(table: &CodeTable, code: u16) -> String {
    match table.get(code) {
        Some(label) => label.to_string(),
        None => format!("Unknown ({})", code),
    }
}

/// Register layout generation the inverter firmware exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterLayout {
    /// One 81-register read starting at address 0.
    #[default]
    SingleBlock,
    /// Five smaller reads, one per register block.
    MultiBlock,
}

impl RegisterLayout {
    /// Build the decoder matching this layout.
    pub fn decoder(self) -> Box<dyn RegisterDecoder> {
        match self {
            RegisterLayout::SingleBlock => Box::new(SingleBlockDecoder),
            RegisterLayout::MultiBlock => Box::new(MultiBlockDecoder),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterLayout::SingleBlock => "single_block",
            RegisterLayout::MultiBlock => "multi_block",
        }
    }
}

/// Raw words returned by one read, tagged with the address they start at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterWindow {
    pub address: u16,
    pub words: Vec<u16>,
}

impl RegisterWindow {
    pub fn new(address: u16, words: Vec<u16>) -> Self {
        Self { address, words }
    }
}

/// Turns the register windows of one poll into a snapshot.
pub trait RegisterDecoder: Send + Sync {
    fn layout(&self) -> RegisterLayout;

    /// Blocks that must be read, in request order.
    fn blocks(&self) -> &'static [RegisterBlock];

    /// Decode one window per block into a complete snapshot.
    ///
    /// Every block must have a window starting at its address and holding
    /// at least `block.count` words.
    fn decode(&self, windows: &[RegisterWindow]) -> Result<Snapshot, DecodeError> {
        let mut decoded = Decoded::default();

        for block in self.blocks() {
            let window = windows
                .iter()
                .find(|w| w.address == block.address)
                .ok_or(DecodeError::MissingBlock { block: block.name })?;
            decode_block(block, &window.words, &mut decoded)?;
        }

        Ok(decoded.finish())
    }
}

/// Reads the whole map in one request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleBlockDecoder;

impl RegisterDecoder for SingleBlockDecoder {
    fn layout(&self) -> RegisterLayout {
        RegisterLayout::SingleBlock
    }

    fn blocks(&self) -> &'static [RegisterBlock] {
        &SINGLE_BLOCK
    }
}

/// Reads the map as status, battery, PV, inverter and meter blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiBlockDecoder;

impl RegisterDecoder for MultiBlockDecoder {
    fn layout(&self) -> RegisterLayout {
        RegisterLayout::MultiBlock
    }

    fn blocks(&self) -> &'static [RegisterBlock] {
        &MULTI_BLOCK
    }
}

/// Decoding state accumulated across blocks.
#[derive(Default)]
struct Decoded {
    snapshot: Snapshot,
    /// Raw codes behind label fields, for quirk matching.
    codes: HashMap<&'static str, u16>,
}

impl Decoded {
    fn finish(mut self) -> Snapshot {
        for field in FIELDS {
            if let Source::Sum(inputs) = field.source {
                let total: i64 = inputs
                    .iter()
                    .filter_map(|key| self.snapshot.get(key).and_then(Value::as_i64))
                    .sum();
                self.snapshot.insert(field.key, total);
            }
        }

        for quirk in QUIRKS {
            if self.codes.get(quirk.field) == Some(&quirk.code) {
                for key in quirk.zeroed {
                    self.snapshot.zero(key);
                }
            }
        }

        self.snapshot
    }
}

fn decode_block(
    block: &RegisterBlock,
    words: &[u16],
    decoded: &mut Decoded,
) -> Result<(), DecodeError> {
    let short = || DecodeError::ShortWindow {
        block: block.name,
        expected: block.count as usize,
        received: words.len(),
    };

    if words.len() < block.count as usize {
        return Err(short());
    }

    for field in FIELDS.iter().filter(|f| block.covers(f)) {
        let Source::Register { address, encoding } = field.source else {
            continue;
        };
        let word = |offset: u16| -> Result<u16, DecodeError> {
            let index = (address - block.address + offset) as usize;
            words.get(index).copied().ok_or_else(short)
        };

        let value = match encoding {
            Encoding::U16 => Value::Int(word(0)? as i64),
            Encoding::I16 => Value::Int(decode_signed(word(0)?)),
            Encoding::U32WordSwapped => Value::Int(combine_u32(word(0)?, word(1)?) as i64),
            Encoding::Scaled { signed, divisor } => {
                let raw = word(0)?;
                let raw = if signed {
                    decode_signed(raw)
                } else {
                    raw as i64
                };
                Value::Float(raw as f64 / divisor)
            }
            Encoding::Label(table) => {
                let code = word(0)?;
                decoded.codes.insert(field.key, code);
                Value::Text(lookup_label(table, code))
            }
            Encoding::PositivePart => Value::Int(split_power(decode_signed(word(0)?)).0),
            Encoding::NegativePart => Value::Int(split_power(decode_signed(word(0)?)).1),
        };

        decoded.snapshot.insert(field.key, value);
    }

    Ok(())
}
