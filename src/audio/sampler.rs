use std::path::Path;

use hound::WavReader;
use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

use crate::error::{Error, Result};

const RESAMPLE_CHUNK: usize = 1024;

/// Reads an audio file and returns per-channel samples normalised to `[-1, 1]` and the
/// sample rate.
///
/// Integer files of any bit depth up to 32 and 32-bit float files are accepted.
pub fn read_audio_file(path: &Path) -> Result<(Vec<Vec<f32>>, u32)> {
  let audio_err = |source: hound::Error| match source {
    hound::Error::IoError(e) => Error::read(path, e),
    source => Error::Audio {
      path: path.to_path_buf(),
      source,
    },
  };

  let mut reader = WavReader::open(path).map_err(audio_err)?;
  let spec = reader.spec();
  let num_channels = spec.channels.max(1) as usize;
  let mut channel_samples: Vec<Vec<f32>> = vec![Vec::new(); num_channels];

  match spec.sample_format {
    hound::SampleFormat::Int => {
      let full_scale = (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
      for (i, sample) in reader.samples::<i32>().enumerate() {
        let sample = sample.map_err(audio_err)? as f32 / full_scale;
        channel_samples[i % num_channels].push(sample);
      }
    }
    hound::SampleFormat::Float => {
      for (i, sample) in reader.samples::<f32>().enumerate() {
        channel_samples[i % num_channels].push(sample.map_err(audio_err)?);
      }
    }
  }
  Ok((channel_samples, spec.sample_rate))
}

/// Average all channels into one.
pub fn downmix(channels: &[Vec<f32>]) -> Vec<f32> {
  match channels {
    [] => Vec::new(),
    [mono] => mono.clone(),
    _ => {
      let len = channels.iter().map(|ch| ch.len()).min().unwrap_or(0);
      let scale = 1.0 / channels.len() as f32;
      (0..len).map(|i| channels.iter().map(|ch| ch[i]).sum::<f32>() * scale).collect()
    }
  }
}

/// Band-limited sinc resampling of a mono signal. The output is delay compensated and
/// holds `round(len * to / from)` samples.
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
  if from == to || samples.is_empty() {
    return Ok(samples.to_vec());
  }
  let ratio = to as f64 / from as f64;
  let sinc_params = SincInterpolationParameters {
    sinc_len: 128,
    f_cutoff: 0.95,
    interpolation: SincInterpolationType::Cubic,
    oversampling_factor: 32,
    window: WindowFunction::BlackmanHarris2,
  };
  let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, sinc_params, RESAMPLE_CHUNK, 1)
    .map_err(|e| Error::Resample(e.to_string()))?;

  let delay = resampler.output_delay();
  let expected = (samples.len() as f64 * ratio).round() as usize;
  let mut resampled: Vec<f32> = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
  let mut offset = 0;

  while resampled.len() < expected + delay {
    let mut chunk = vec![0f32; RESAMPLE_CHUNK];
    if offset < samples.len() {
      let n = (samples.len() - offset).min(RESAMPLE_CHUNK);
      chunk[..n].copy_from_slice(&samples[offset..offset + n]);
    }
    offset += RESAMPLE_CHUNK;

    let processed = resampler
      .process(&[chunk], None)
      .map_err(|e| Error::Resample(e.to_string()))?;
    resampled.extend_from_slice(&processed[0]);
  }

  log::debug!("resampled {} samples from {} Hz to {} Hz", samples.len(), from, to);
  Ok(resampled[delay..delay + expected].to_vec())
}
