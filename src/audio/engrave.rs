use std::path::Path;

use crate::error::{Error, Result};
use crate::files;

/// Write mono 32-bit float samples to a WAV file, creating parent directories.
pub fn samples(sample_rate: u32, samples: &[f32], path: &Path) -> Result<()> {
  files::with_dir(path)?;
  let spec = hound::WavSpec {
    channels: 1,
    sample_rate,
    bits_per_sample: 32,
    sample_format: hound::SampleFormat::Float,
  };
  let audio_err = |source: hound::Error| match source {
    hound::Error::IoError(e) => Error::write(path, e),
    source => Error::Audio {
      path: path.to_path_buf(),
      source,
    },
  };

  let mut writer = hound::WavWriter::create(path, spec).map_err(audio_err)?;
  for &sample in samples {
    writer.write_sample(sample).map_err(audio_err)?;
  }
  writer.finalize().map_err(audio_err)
}
