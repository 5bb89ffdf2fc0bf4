//! Decodes a file to interleaved stereo float32 PCM at the engine's
//! sample rate: mono sources are up-mixed by duplicating the channel,
//! and a resample-to-engine-rate step runs via `rubato` when the
//! source rate differs.

use std::fs::File;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::buffer::AudioBuffer;
use crate::config::DEFAULT_MONO_SAMPLE_CAPACITY;
use crate::errors::DecodeError;

/// Decodes `path` and returns an [`AudioBuffer`] resampled to
/// `target_sample_rate`, always interleaved stereo regardless of the
/// source channel count.
pub fn load_to_engine_rate(path: &str, target_sample_rate: u32) -> Result<AudioBuffer, DecodeError> {
    let (interleaved_stereo, source_rate) = decode_file_to_stereo_samples(path)?;
    if source_rate == target_sample_rate {
        return Ok(AudioBuffer::new(interleaved_stereo, target_sample_rate));
    }
    let resampled = resample_stereo(&interleaved_stereo, source_rate, target_sample_rate);
    Ok(AudioBuffer::new(resampled, target_sample_rate))
}

fn decode_file_to_stereo_samples(path: &str) -> Result<(Vec<f32>, u32), DecodeError> {
    let file = File::open(path).map_err(|e| DecodeError::FileOpen {
        path: path.to_string(),
        source: e,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let hint = Hint::new();
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Format {
            path: path.to_string(),
            source: e,
        })?;
    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or_else(|| DecodeError::NoSuitableTrack {
            path: path.to_string(),
        })?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.ok_or_else(|| DecodeError::MissingSampleRate {
        path: path.to_string(),
    })?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1)
        .max(1);
    let codec_params = track.codec_params.clone();
    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::DecoderCreation {
            path: path.to_string(),
            source: e,
        })?;

    let mut stereo: Vec<f32> = Vec::with_capacity(DEFAULT_MONO_SAMPLE_CAPACITY * 2);
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    loop {
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(audio_buf) => {
                        if sample_buf.is_none() {
                            sample_buf = Some(SampleBuffer::<f32>::new(
                                audio_buf.capacity() as u64,
                                *audio_buf.spec(),
                            ));
                        }
                        if let Some(buf) = sample_buf.as_mut() {
                            buf.copy_interleaved_ref(audio_buf);
                            push_as_stereo(buf.samples(), channels, &mut stereo);
                        }
                    }
                    Err(SymphoniaError::DecodeError(err_desc)) => {
                        log::warn!("decode: ignoring frame error in '{}': {}", path, err_desc);
                    }
                    Err(e) => {
                        return Err(DecodeError::FatalDecode {
                            path: path.to_string(),
                            source: e,
                        });
                    }
                }
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                log::warn!("decode: decoder reset required unexpectedly for '{}'", path);
                break;
            }
            Err(e) => {
                return Err(DecodeError::FatalDecode {
                    path: path.to_string(),
                    source: e,
                });
            }
        }
    }
    decoder.finalize();
    if stereo.is_empty() {
        return Err(DecodeError::NoSamplesDecoded {
            path: path.to_string(),
        });
    }
    Ok((stereo, sample_rate))
}

/// Mono sources are up-mixed by duplicating the single channel across
/// L/R; anything with more than two channels is downmixed to stereo by
/// averaging the remainder into L/R pairs.
fn push_as_stereo(raw: &[f32], channels: usize, out: &mut Vec<f32>) {
    match channels {
        1 => {
            out.reserve(raw.len() * 2);
            for &s in raw {
                out.push(s);
                out.push(s);
            }
        }
        2 => out.extend_from_slice(raw),
        _ => {
            let frames = raw.len() / channels;
            out.reserve(frames * 2);
            for frame in raw.chunks_exact(channels) {
                out.push(frame[0]);
                out.push(frame[1]);
            }
        }
    }
}

/// One-shot (non-streaming) sample-rate conversion of a full, already
/// decoded stereo buffer. Distinct from `tempo::RubatoTempoFilter`, which
/// streams in real time at a caller-controlled ratio; this runs once at
/// load time at a fixed, known ratio.
fn resample_stereo(interleaved: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let frames = interleaved.len() / 2;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for f in 0..frames {
        left.push(interleaved[f * 2]);
        right.push(interleaved[f * 2 + 1]);
    }

    let chunk_size = 4096;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler =
        match SincFixedIn::<f32>::new(ratio, 2.0_f64.max(ratio * 1.2), params, chunk_size, 2) {
            Ok(r) => r,
            Err(_) => return interleaved.to_vec(),
        };

    let mut out_left = Vec::with_capacity(frames * to_rate as usize / from_rate.max(1) as usize + chunk_size);
    let mut out_right = Vec::with_capacity(out_left.capacity());

    let mut pos = 0;
    while pos < left.len() {
        let end = (pos + chunk_size).min(left.len());
        let mut in_left = left[pos..end].to_vec();
        let mut in_right = right[pos..end].to_vec();
        in_left.resize(chunk_size, 0.0);
        in_right.resize(chunk_size, 0.0);
        if let Ok(output) = resampler.process(&[in_left, in_right], None) {
            out_left.extend_from_slice(&output[0]);
            out_right.extend_from_slice(&output[1]);
        }
        pos = end;
    }

    let mut interleaved_out = Vec::with_capacity(out_left.len() * 2);
    for (l, r) in out_left.into_iter().zip(out_right.into_iter()) {
        interleaved_out.push(l);
        interleaved_out.push(r);
    }
    interleaved_out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_upmix_duplicates_channel() {
        let mut out = Vec::new();
        push_as_stereo(&[0.5, -0.25], 1, &mut out);
        assert_eq!(out, vec![0.5, 0.5, -0.25, -0.25]);
    }

    #[test]
    fn stereo_passthrough_is_unchanged() {
        let mut out = Vec::new();
        push_as_stereo(&[0.1, 0.2, 0.3, 0.4], 2, &mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn identity_resample_keeps_frame_count() {
        let interleaved = vec![0.0_f32; 2 * 8192];
        let out = resample_stereo(&interleaved, 44_100, 44_100);
        assert!(out.len() >= interleaved.len() / 2);
    }
}
