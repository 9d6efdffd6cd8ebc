//! Writes finished utterances to disk as 16-bit mono WAV files and keeps the
//! directory bounded.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, warn};
use voxgate_core::SpeechSegment;

const PREFIX: &str = "utt_";
const EXTENSION: &str = "wav";

pub struct Recorder {
    dir: PathBuf,
    max_recordings: usize,
    seq: u64,
}

impl Recorder {
    pub fn new(dir: impl Into<PathBuf>, max_recordings: usize) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating recordings directory {}", dir.display()))?;
        Ok(Self {
            dir,
            max_recordings: max_recordings.max(1),
            seq: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `segment` as `utt_<UTC timestamp>_<seq>.wav`, then prune.
    pub fn save(&mut self, segment: &SpeechSegment) -> anyhow::Result<PathBuf> {
        let name = format!(
            "{PREFIX}{}_{:04}.{EXTENSION}",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            self.seq
        );
        self.seq += 1;
        let path = self.dir.join(name);

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: segment.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("creating {}", path.display()))?;
        for &sample in &segment.audio {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        debug!(path = %path.display(), samples = segment.audio.len(), "utterance written");

        let removed = self.prune()?;
        if removed > 0 {
            debug!(removed, "pruned old recordings");
        }
        Ok(path)
    }

    /// Delete the oldest recordings beyond `max_recordings`. Returns how many
    /// files were removed.
    pub fn prune(&self) -> anyhow::Result<usize> {
        let mut recordings: Vec<PathBuf> = fs::read_dir(&self.dir)
            .with_context(|| format!("listing {}", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_recording(path))
            .collect();
        if recordings.len() <= self.max_recordings {
            return Ok(0);
        }
        // Names start with a UTC timestamp, so lexical order is age order.
        recordings.sort();
        let excess = recordings.len() - self.max_recordings;
        let mut removed = 0;
        for path in recordings.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), "could not delete old recording: {e}"),
            }
        }
        Ok(removed)
    }
}

fn is_recording(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(PREFIX));
    named && path.extension().is_some_and(|ext| ext == EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;
    use voxgate_core::EndReason;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "voxgate-recorder-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn segment(samples: Vec<i16>) -> SpeechSegment {
        SpeechSegment {
            audio: samples,
            sample_rate: 16_000,
            started_at: Duration::from_secs(1),
            duration: Duration::from_millis(500),
            reason: EndReason::Silence,
        }
    }

    #[test]
    fn writes_readable_mono_wav() {
        let dir = scratch("write");
        let mut recorder = Recorder::new(&dir, 5).unwrap();
        let audio: Vec<i16> = (0..800).map(|i| (i * 7 - 2800) as i16).collect();

        let path = recorder.save(&segment(audio.clone())).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("utt_") && name.ends_with("_0000.wav"), "{name}");

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, audio);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn keeps_only_newest_recordings() {
        let dir = scratch("prune");
        let mut recorder = Recorder::new(&dir, 3).unwrap();
        let mut written = Vec::new();
        for _ in 0..5 {
            written.push(recorder.save(&segment(vec![0; 16])).unwrap());
            std::thread::sleep(Duration::from_millis(2));
        }

        let mut left: Vec<PathBuf> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        left.sort();
        assert_eq!(left, written[2..].to_vec());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn prune_ignores_unrelated_files() {
        let dir = scratch("foreign");
        let recorder = Recorder::new(&dir, 1).unwrap();
        fs::write(dir.join("notes.txt"), "keep").unwrap();
        fs::write(dir.join("utt_a.wav"), "").unwrap();
        fs::write(dir.join("utt_b.wav"), "").unwrap();

        assert_eq!(recorder.prune().unwrap(), 1);
        assert!(dir.join("notes.txt").exists());
        assert!(dir.join("utt_b.wav").exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
