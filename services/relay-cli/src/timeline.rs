use anyhow::{Context, Result};
use std::path::Path;
use voice_relay_audio::audio::convert_f32_to_i16;
use voice_relay_audio::{AudioFormat, ScheduledFragment};

/// Lays scheduled fragments onto one continuous track at their scheduled
/// start times. Any gap the scheduler left is rendered as silence.
pub struct Timeline {
    format: AudioFormat,
    origin: Option<f64>,
    samples: Vec<f32>,
}

impl Timeline {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            origin: None,
            samples: Vec::new(),
        }
    }

    pub fn place(&mut self, fragment: &ScheduledFragment) {
        let origin = *self.origin.get_or_insert(fragment.start);
        let frames = ((fragment.start - origin).max(0.0) * self.format.sample_rate as f64).round();
        let offset = frames as usize * self.format.channels as usize;
        let end = offset + fragment.samples.len();

        if self.samples.len() < end {
            self.samples.resize(end, 0.0);
        }
        self.samples[offset..end].copy_from_slice(&fragment.samples);
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Length of the rendered track in seconds.
    pub fn duration(&self) -> f64 {
        self.format.duration_of(self.samples.len())
    }

    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: self.format.channels,
            sample_rate: self.format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for sample in convert_f32_to_i16(&self.samples) {
            writer.write_sample(sample)?;
        }
        writer.finalize().context("Failed to finalize WAV file")?;
        Ok(())
    }
}
