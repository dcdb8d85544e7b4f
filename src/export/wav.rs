//! WAV file export functionality.
//!
//! Decodes an entire container offline (no pacing, no threads) and writes
//! 16-bit mono PCM at the source's declared rate.

use crate::codec::{AdpcmDecoder, MIDPOINT};
use crate::container::ImaSource;
use crate::Result;
use std::path::Path;

/// Decode `source` from its current read position to the declared sample
/// count and write the result as a WAV file.
///
/// Returns the number of samples written, which can fall short of the
/// declared count when the container's data section is truncated.
///
/// # Examples
///
/// ```no_run
/// use ima_stream::container::ImaSource;
/// use ima_stream::export::export_wav;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut source = ImaSource::open("music.ima")?;
/// let written = export_wav(&mut source, "music.wav")?;
/// println!("{} samples written", written);
/// # Ok(())
/// # }
/// ```
pub fn export_wav<P: AsRef<Path>>(source: &mut ImaSource, output_path: P) -> Result<u32> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: source.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(output_path.as_ref(), spec)
        .map_err(|e| format!("Failed to create WAV file: {e}"))?;

    let mut decoder = AdpcmDecoder::new();
    let total = source.sample_count();
    let mut written: u32 = 0;
    let mut chunk = [0u8; 4096];

    'decode: while written < total {
        let bytes = source.read_into(&mut chunk)?;
        if bytes == 0 {
            break;
        }
        for &byte in &chunk[..bytes] {
            for code in [byte >> 4, byte & 0x0F] {
                if written >= total {
                    break 'decode;
                }
                let level = decoder.decode(code);
                // Re-bias the unsigned level onto the signed PCM axis.
                let sample = (i32::from(level) - i32::from(MIDPOINT)) as i16;
                writer
                    .write_sample(sample)
                    .map_err(|e| format!("Failed to write sample: {e}"))?;
                written += 1;
            }
        }
    }

    writer
        .finalize()
        .map_err(|e| format!("Failed to finalize WAV file: {e}"))?;

    Ok(written)
}
