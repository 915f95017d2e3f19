//! Decode in-memory audio files into mono [`AudioBuffer`]s.
//!
//! WAV goes through hound, everything else is tried as MP3 with puremp3.

use std::io::Cursor;

use tracing::debug;

use super::graph::AudioBuffer;
use crate::error::SourceError;

/// Decode `bytes` and resample to `target_rate`
pub fn decode_audio_data(bytes: &[u8], target_rate: f32) -> Result<AudioBuffer, SourceError> {
    let (interleaved, channels, rate) = if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)?
    } else {
        decode_mp3(bytes)?
    };

    let mono = downmix(&interleaved, channels);
    if mono.is_empty() {
        return Err(SourceError::Decode("no audio frames found".into()));
    }

    let samples = resample_linear(&mono, rate as f32, target_rate);
    debug!(
        frames = samples.len(),
        source_rate = rate,
        target_rate,
        channels,
        "decoded audio"
    );
    Ok(AudioBuffer::new(samples, target_rate))
}

fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, usize, u32), SourceError> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| SourceError::Decode(format!("WAV open error: {}", e)))?;

    let spec = reader.spec();
    let wav_err = |e: hound::Error| SourceError::Decode(format!("WAV sample error: {}", e));

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 8) => reader
            .into_samples::<i8>()
            .map(|s| s.map(|s| s as f32 / 128.0).map_err(wav_err))
            .collect::<Result<Vec<f32>, _>>()?,
        (hound::SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32_768.0).map_err(wav_err))
            .collect::<Result<Vec<f32>, _>>()?,
        (hound::SampleFormat::Int, 24) => reader
            .into_samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 8_388_608.0).map_err(wav_err))
            .collect::<Result<Vec<f32>, _>>()?,
        (hound::SampleFormat::Int, 32) => reader
            .into_samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 2_147_483_648.0).map_err(wav_err))
            .collect::<Result<Vec<f32>, _>>()?,
        (hound::SampleFormat::Float, _) => reader
            .into_samples::<f32>()
            .map(|s| s.map_err(wav_err))
            .collect::<Result<Vec<f32>, _>>()?,
        (format, bits) => {
            return Err(SourceError::Decode(format!(
                "unsupported WAV format: {:?} {}bit",
                format, bits
            )))
        }
    };

    Ok((samples, spec.channels.max(1) as usize, spec.sample_rate))
}

fn decode_mp3(bytes: &[u8]) -> Result<(Vec<f32>, usize, u32), SourceError> {
    let (header, frames) = puremp3::read_mp3(skip_id3v2(bytes))
        .map_err(|e| SourceError::Decode(format!("MP3 decode error: {:?}", e)))?;

    let rate = header.sample_rate.hz();
    if header.channels == puremp3::Channels::Mono {
        Ok((frames.map(|(left, _)| left).collect(), 1, rate))
    } else {
        let mut samples = Vec::new();
        for (left, right) in frames {
            samples.push(left);
            samples.push(right);
        }
        Ok((samples, 2, rate))
    }
}

/// puremp3 wants raw MPEG frames; large ID3v2 tags break its frame sync
fn skip_id3v2(data: &[u8]) -> &[u8] {
    if data.len() >= 10 && &data[0..3] == b"ID3" {
        // Syncsafe size, 7 bits per byte
        let size = ((data[6] as usize & 0x7f) << 21)
            | ((data[7] as usize & 0x7f) << 14)
            | ((data[8] as usize & 0x7f) << 7)
            | (data[9] as usize & 0x7f);
        let total = size + 10;
        if total <= data.len() {
            return &data[total..];
        }
    }
    data
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample_linear(samples: &[f32], from: f32, to: f32) -> Vec<f32> {
    if (from - to).abs() < f32::EPSILON || samples.len() < 2 || from <= 0.0 || to <= 0.0 {
        return samples.to_vec();
    }

    let ratio = from as f64 / to as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            samples[idx] + (samples[next] - samples[idx]) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(channels: u16, rate: u32, frames: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in frames {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_decode_stereo_wav_downmixes() {
        // Left at half scale, right silent
        let frames: Vec<i16> = (0..200).flat_map(|_| [16_384i16, 0]).collect();
        let buffer = decode_audio_data(&wav_bytes(2, 8000, &frames), 8000.0).unwrap();

        assert_eq!(buffer.len(), 200);
        assert!(buffer.samples().iter().all(|&s| (s - 0.25).abs() < 1e-3));
    }

    #[test]
    fn test_decode_resamples_to_context_rate() {
        let frames = vec![0i16; 4000];
        let buffer = decode_audio_data(&wav_bytes(1, 8000, &frames), 16000.0).unwrap();

        assert_eq!(buffer.sample_rate(), 16000.0);
        assert!((buffer.duration() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = decode_audio_data(b"definitely not an audio file", 44100.0);
        assert!(matches!(result, Err(SourceError::Decode(_))));

        let result = decode_audio_data(b"RIFF\x00\x00", 44100.0);
        assert!(matches!(result, Err(SourceError::Decode(_))));
    }

    #[test]
    fn test_skip_id3v2() {
        let mut data = b"ID3\x03\x00\x00\x00\x00\x00\x02".to_vec();
        data.extend_from_slice(&[0xAA, 0xBB, 0xFF, 0xFB]);
        assert_eq!(skip_id3v2(&data), &[0xFF, 0xFB]);

        let plain = [0xFF, 0xFB, 0x90];
        assert_eq!(skip_id3v2(&plain), &plain);
    }
}
