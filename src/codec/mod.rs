//! IMA ADPCM decoder state machine.
//!
//! One 4-bit code in, one unsigned 16-bit level out. The decoder keeps a
//! running predictor in the unsigned sample range `[0, 65535]` (midpoint
//! biased, so silence sits at 32768) and an adaptive step index into the
//! step-size table. State can be captured and restored, which the playback
//! engine uses to keep the codec continuous across a loop seam.

mod tables;

pub use tables::{INDEX_TABLE, MAX_STEP_INDEX, STEP_TABLE};

/// Midpoint of the unsigned output range; the decoder's resting level.
pub const MIDPOINT: u16 = 32768;

/// Snapshot of decoder state, captured at the loop start point and restored
/// on every subsequent loop wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecState {
    /// Running predictor, always in `[0, 65535]`.
    pub predictor: i32,
    /// Step-size table index, always in `[0, 88]`.
    pub step_index: i32,
}

impl Default for CodecState {
    fn default() -> Self {
        CodecState {
            predictor: MIDPOINT as i32,
            step_index: 0,
        }
    }
}

/// IMA ADPCM decoder.
///
/// # Example
/// ```
/// use ima_stream::codec::{AdpcmDecoder, MIDPOINT};
///
/// let mut decoder = AdpcmDecoder::new();
/// assert_eq!(decoder.level(), MIDPOINT);
/// let level = decoder.decode(0x04);
/// assert!(level > MIDPOINT);
/// ```
#[derive(Debug, Clone)]
pub struct AdpcmDecoder {
    predictor: i32,
    step_index: i32,
}

impl Default for AdpcmDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AdpcmDecoder {
    /// Create a decoder at the resting state (midpoint level, step index 0).
    pub fn new() -> Self {
        AdpcmDecoder {
            predictor: MIDPOINT as i32,
            step_index: 0,
        }
    }

    /// Decode one 4-bit code and return the new output level.
    ///
    /// Bits 0..=2 select a bit-weighted fraction of the current step size
    /// (plus a step/8 baseline), bit 3 is the sign. The predictor is clamped
    /// to `[0, 65535]` and the step index to `[0, 88]` after every code.
    pub fn decode(&mut self, code: u8) -> u16 {
        let code = (code & 0x0F) as usize;
        let step = STEP_TABLE[self.step_index as usize] as i32;

        let mut diff = step >> 3;
        if code & 0b100 != 0 {
            diff += step;
        }
        if code & 0b010 != 0 {
            diff += step >> 1;
        }
        if code & 0b001 != 0 {
            diff += step >> 2;
        }

        if code & 0b1000 != 0 {
            self.predictor = (self.predictor - diff).max(0);
        } else {
            self.predictor = (self.predictor + diff).min(65535);
        }

        self.step_index = (self.step_index + INDEX_TABLE[code] as i32).clamp(0, MAX_STEP_INDEX);

        self.predictor as u16
    }

    /// Current output level without advancing the state.
    ///
    /// Used while playback is stalled waiting for a refill: the engine keeps
    /// emitting the last decoded level on the pacing grid.
    pub fn level(&self) -> u16 {
        self.predictor as u16
    }

    /// Capture the current predictor/step-index pair.
    pub fn state(&self) -> CodecState {
        CodecState {
            predictor: self.predictor,
            step_index: self.step_index,
        }
    }

    /// Restore a previously captured state.
    pub fn restore(&mut self, state: CodecState) {
        self.predictor = state.predictor.clamp(0, 65535);
        self.step_index = state.step_index.clamp(0, MAX_STEP_INDEX);
    }

    /// Reset to the resting state.
    pub fn reset(&mut self) {
        *self = AdpcmDecoder::new();
    }
}
