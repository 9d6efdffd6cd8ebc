//! WAV file source.
//!
//! Decodes the whole file on `open`, down-mixes to mono, converts to the
//! requested rate and serves fixed-size blocks. The last partial block is
//! zero-padded. With pacing enabled blocks are released no faster than real
//! time, which makes a file behave like a microphone.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::info;

use super::{
    downmix_into, resample::RateConverter, AudioSource, AudioStream, BlockAssembler, BlockRead,
    StreamSpec,
};
use crate::buffering::block::samples_to_duration;
use crate::error::{Result, VoxError};

/// A WAV file opened as an [`AudioSource`].
#[derive(Debug, Clone)]
pub struct WavSource {
    path: PathBuf,
    paced: bool,
}

impl WavSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            paced: false,
        }
    }

    /// Release blocks at real-time cadence.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioSource for WavSource {
    fn open(&mut self, spec: &StreamSpec) -> Result<Box<dyn AudioStream>> {
        let blocks = decode_blocks(&self.path, spec)?;
        info!(
            path = %self.path.display(),
            blocks = blocks.len(),
            paced = self.paced,
            "wav source opened"
        );
        Ok(Box::new(WavStream {
            blocks,
            block_duration: samples_to_duration(spec.block_size, spec.sample_rate),
            paced: self.paced,
            started: None,
            served: 0,
        }))
    }

    fn describe(&self) -> String {
        format!("wav file {}", self.path.display())
    }
}

fn decode_blocks(path: &Path, spec: &StreamSpec) -> Result<VecDeque<Vec<i16>>> {
    let mut reader = hound::WavReader::open(path)?;
    let wav = reader.spec();
    let channels = usize::from(wav.channels.max(1));
    let mut assembler = BlockAssembler::new(spec.block_size);

    let native = wav.sample_format == hound::SampleFormat::Int && wav.bits_per_sample == 16;
    if native && channels == 1 && wav.sample_rate == spec.sample_rate {
        let samples = reader.samples::<i16>().collect::<std::result::Result<Vec<_>, _>>()?;
        assembler.push_i16(&samples);
    } else {
        let interleaved: Vec<f32> = match wav.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let full_scale = int_full_scale(wav.bits_per_sample)?;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / full_scale))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        let mut mono = Vec::with_capacity(interleaved.len() / channels);
        downmix_into(&interleaved, channels, &mut mono, |s| s);

        let chunk = (wav.sample_rate as usize / 50).max(64);
        let mut converter = RateConverter::new(wav.sample_rate, spec.sample_rate, chunk)
            .map_err(|e| VoxError::AudioStream(format!("wav resample: {e}")))?;
        let mut converted = Vec::with_capacity(mono.len());
        converter.process_into(&mono, &mut converted);
        converter.finish_into(&mut converted);
        assembler.push_f32(&converted);
    }

    let mut blocks = VecDeque::new();
    while let Some(block) = assembler.pop() {
        blocks.push_back(block);
    }
    if let Some(tail) = assembler.flush_padded() {
        blocks.push_back(tail);
    }
    Ok(blocks)
}

/// Largest positive value of a signed integer sample of `bits` width.
fn int_full_scale(bits: u16) -> Result<f32> {
    if !(2..=32).contains(&bits) {
        return Err(VoxError::AudioStream(format!(
            "unsupported wav bit depth {bits}"
        )));
    }
    Ok(((1_i64 << (bits - 1)) - 1) as f32)
}

struct WavStream {
    blocks: VecDeque<Vec<i16>>,
    block_duration: Duration,
    paced: bool,
    started: Option<Instant>,
    served: u32,
}

impl AudioStream for WavStream {
    fn read_block(&mut self, timeout: Duration) -> Result<BlockRead> {
        if self.blocks.is_empty() {
            return Ok(BlockRead::EndOfStream);
        }

        if self.paced {
            let started = *self.started.get_or_insert_with(Instant::now);
            let due = self.block_duration * self.served;
            let elapsed = started.elapsed();
            if due > elapsed {
                let wait = due - elapsed;
                if wait > timeout {
                    std::thread::sleep(timeout);
                    return Ok(BlockRead::Timeout);
                }
                std::thread::sleep(wait);
            }
        }

        match self.blocks.pop_front() {
            Some(block) => {
                self.served = self.served.saturating_add(1);
                Ok(BlockRead::Block(block))
            }
            None => Ok(BlockRead::EndOfStream),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_wav<S>(name: &str, spec: hound::WavSpec, samples: &[S]) -> PathBuf
    where
        S: hound::Sample + Copy,
    {
        let path = std::env::temp_dir().join(format!(
            "voxgate-wav-{}-{}.wav",
            name,
            std::process::id()
        ));
        let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
        for s in samples {
            writer.write_sample(*s).expect("write sample");
        }
        writer.finalize().expect("finalize wav");
        path
    }

    fn stream_spec() -> StreamSpec {
        StreamSpec {
            sample_rate: 16_000,
            channels: 1,
            block_size: 400,
        }
    }

    fn drain(stream: &mut dyn AudioStream) -> Vec<Vec<i16>> {
        let mut out = Vec::new();
        loop {
            match stream.read_block(Duration::from_millis(10)).expect("read") {
                BlockRead::Block(b) => out.push(b),
                BlockRead::Timeout => continue,
                BlockRead::EndOfStream => return out,
            }
        }
    }

    #[test]
    fn mono_16k_file_is_served_bit_exact() {
        let samples: Vec<i16> = (0..1000).map(|i| (i % 200) as i16 - 100).collect();
        let path = temp_wav(
            "exact",
            hound::WavSpec {
                channels: 1,
                sample_rate: 16_000,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
            &samples,
        );

        let mut source = WavSource::new(&path);
        let mut stream = source.open(&stream_spec()).expect("open wav");
        let blocks = drain(stream.as_mut());
        let _ = std::fs::remove_file(&path);

        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.len() == 400));
        assert_eq!(&blocks[0][..], &samples[..400]);
        assert_eq!(&blocks[2][..200], &samples[800..]);
        assert!(blocks[2][200..].iter().all(|s| *s == 0));
    }

    #[test]
    fn stereo_file_is_downmixed() {
        // Left 1000, right -1000 → mono 0.
        let frames: Vec<i16> = (0..800).flat_map(|_| [1000i16, -1000]).collect();
        let path = temp_wav(
            "stereo",
            hound::WavSpec {
                channels: 2,
                sample_rate: 16_000,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
            &frames,
        );

        let mut source = WavSource::new(&path);
        let mut stream = source.open(&stream_spec()).expect("open wav");
        let blocks = drain(stream.as_mut());
        let _ = std::fs::remove_file(&path);

        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().flatten().all(|s| *s == 0));
    }

    #[test]
    fn eight_bit_file_keeps_its_level() {
        let path = temp_wav(
            "pcm8",
            hound::WavSpec {
                channels: 1,
                sample_rate: 16_000,
                bits_per_sample: 8,
                sample_format: hound::SampleFormat::Int,
            },
            &[100i8; 800],
        );

        let mut source = WavSource::new(&path);
        let mut stream = source.open(&stream_spec()).expect("open wav");
        let blocks = drain(stream.as_mut());
        let _ = std::fs::remove_file(&path);

        assert_eq!(blocks.len(), 2);
        // 100 / 127 of full scale.
        assert!(blocks.iter().flatten().all(|s| (*s - 25_800).abs() <= 1));
        let level = crate::vad::amplitude::amplitude(&blocks[0]);
        assert!((level - 787.4).abs() < 0.5, "level {level}");
    }

    #[test]
    fn resampled_file_keeps_its_full_length() {
        let path = temp_wav(
            "8k",
            hound::WavSpec {
                channels: 1,
                sample_rate: 8_000,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
            &[8_000i16; 1_000],
        );

        let mut source = WavSource::new(&path);
        let mut stream = source.open(&stream_spec()).expect("open wav");
        let blocks = drain(stream.as_mut());
        let _ = std::fs::remove_file(&path);

        // 1000 samples at 8 kHz become 2000 at 16 kHz: exactly five blocks.
        assert_eq!(blocks.len(), 5);
        assert!(blocks[4][..300].iter().all(|s| (*s - 8_000).abs() < 20));
    }

    #[test]
    fn missing_file_is_an_error() {
        let mut source = WavSource::new("/definitely/not/here.wav");
        assert!(source.open(&stream_spec()).is_err());
    }
}
