use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use crate::errors::HuddleError;
use crate::events::{TrackKind, TrackSource};
use crate::transport::MediaTrack;

/// Mixes any number of audio sources into a single output track.
///
/// The recorder backend pushes decoded PCM per connected source and pulls
/// the mix. Each input keeps at most `max_samples`; older samples are
/// discarded when a producer runs ahead of the consumer.
pub struct AudioMixer {
    output: MediaTrack,
    inputs: Mutex<HashMap<String, VecDeque<i16>>>,
    max_samples: usize,
}

impl AudioMixer {
    pub fn new() -> Self {
        // 2 seconds of 48kHz mono audio per input
        Self::with_capacity(48_000 * 2)
    }

    pub fn with_capacity(max_samples: usize) -> Self {
        Self {
            output: MediaTrack::new(
                format!("mixed-audio-{}", uuid::Uuid::new_v4()),
                TrackKind::Audio,
                TrackSource::Unknown,
            ),
            inputs: Mutex::new(HashMap::new()),
            max_samples,
        }
    }

    /// The single mixed track handed to the recorder.
    pub fn output_track(&self) -> &MediaTrack {
        &self.output
    }

    /// Route a source into the mix. Only audio tracks can be connected.
    pub fn connect(&self, track: &MediaTrack) -> Result<(), HuddleError> {
        if track.kind != TrackKind::Audio {
            return Err(HuddleError::Recording(format!(
                "track {} is not audio",
                track.id
            )));
        }
        self.lock()
            .entry(track.id.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.max_samples));
        Ok(())
    }

    pub fn input_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn input_count(&self) -> usize {
        self.lock().len()
    }

    /// Push PCM samples for one connected source. Unknown sources are ignored.
    pub fn push_samples(&self, track_id: &str, samples: &[i16]) -> bool {
        let mut inputs = self.lock();
        let Some(buf) = inputs.get_mut(track_id) else {
            return false;
        };
        buf.extend(samples.iter().copied());

        let overflow = buf.len().saturating_sub(self.max_samples);
        if overflow > 0 {
            buf.drain(..overflow);
        }
        true
    }

    /// Pull up to `out.len()` mixed samples.
    ///
    /// Sources are summed with saturation. Returns the number of positions
    /// that received at least one sample; the rest of `out` is silence.
    pub fn pull_mixed(&self, out: &mut [i16]) -> usize {
        out.fill(0);
        let mut produced = 0;
        for buf in self.lock().values_mut() {
            let available = buf.len().min(out.len());
            for (i, sample) in buf.drain(..available).enumerate() {
                out[i] = out[i].saturating_add(sample);
            }
            produced = produced.max(available);
        }
        produced
    }

    /// Disconnect every source.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<i16>>> {
        self.inputs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for AudioMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AudioMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioMixer")
            .field("output", &self.output)
            .field("inputs", &self.input_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(id: &str) -> MediaTrack {
        MediaTrack::new(id, TrackKind::Audio, TrackSource::Microphone)
    }

    #[test]
    fn sums_connected_sources() {
        let mixer = AudioMixer::new();
        mixer.connect(&audio("a")).unwrap();
        mixer.connect(&audio("b")).unwrap();
        mixer.push_samples("a", &[100, 200, 300]);
        mixer.push_samples("b", &[10, 20]);

        let mut out = vec![0i16; 4];
        let n = mixer.pull_mixed(&mut out);
        assert_eq!(n, 3);
        assert_eq!(out, vec![110, 220, 300, 0]);
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let mixer = AudioMixer::new();
        mixer.connect(&audio("a")).unwrap();
        mixer.connect(&audio("b")).unwrap();
        mixer.push_samples("a", &[i16::MAX, i16::MIN]);
        mixer.push_samples("b", &[1000, -1000]);

        let mut out = vec![0i16; 2];
        mixer.pull_mixed(&mut out);
        assert_eq!(out, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn rejects_video_and_ignores_unknown_sources() {
        let mixer = AudioMixer::new();
        let video = MediaTrack::new("v", TrackKind::Video, TrackSource::Camera);
        assert!(mixer.connect(&video).is_err());
        assert!(!mixer.push_samples("nobody", &[1, 2, 3]));
        assert_eq!(mixer.input_count(), 0);
    }

    #[test]
    fn overflow_drops_oldest() {
        let mixer = AudioMixer::with_capacity(4);
        mixer.connect(&audio("a")).unwrap();
        mixer.push_samples("a", &[1, 2, 3, 4]);
        mixer.push_samples("a", &[5, 6]);

        let mut out = vec![0i16; 6];
        let n = mixer.pull_mixed(&mut out);
        assert_eq!(n, 4);
        assert_eq!(out, vec![3, 4, 5, 6, 0, 0]);
    }

    #[test]
    fn connecting_twice_keeps_one_input() {
        let mixer = AudioMixer::new();
        mixer.connect(&audio("a")).unwrap();
        mixer.connect(&audio("a")).unwrap();
        assert_eq!(mixer.input_ids(), vec!["a"]);
        assert_eq!(mixer.output_track().kind, TrackKind::Audio);
    }
}
