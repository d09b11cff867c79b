//! Packing host samples and MIDI bytes into AM824 data blocks, and back.

use crate::host::{PcmSamples, PcmSamplesMut};
use am824_proto::{
    StreamConfig,
    am824::{LABEL_MBLA, LABEL_MIDI_ONE, MIDI_EMPTY, MidiLabel, PCM_SILENCE},
    format::MIDI_PORTS_PER_QUADLET,
};

const QUADLET: usize = size_of::<u32>();

#[inline(always)]
const fn pcm_word_s16(sample: i16) -> u32 {
    ((LABEL_MBLA as u32) << 24) | ((sample as u16 as u32) << 8)
}

#[inline(always)]
const fn pcm_word_s32(sample: i32) -> u32 {
    ((LABEL_MBLA as u32) << 24) | ((sample as u32) >> 8)
}

#[inline(always)]
const fn s16_from_word(word: u32) -> i16 {
    ((word << 8) as i32 >> 16) as i16
}

#[inline(always)]
const fn s32_from_word(word: u32) -> i32 {
    (word << 8) as i32
}

/// The MIDI port carried by MIDI quadlet `quadlet` of data block `counter`.
///
/// Each MIDI quadlet is time-multiplexed between 8 ports, one per data block.
#[inline(always)]
pub const fn multiplexed_port(counter: u8, quadlet: u32) -> u32 {
    quadlet * MIDI_PORTS_PER_QUADLET + counter as u32 % MIDI_PORTS_PER_QUADLET
}

/// Data block layout of one stream: PCM quadlets first, then MIDI quadlets.
#[derive(Debug, Clone, Copy)]
pub struct Am824Codec {
    pcm_channels: usize,
    midi_ports: u32,
    midi_quadlets: u32,
}

impl Am824Codec {
    pub const fn new(config: &StreamConfig) -> Self {
        Self {
            pcm_channels: config.pcm_channels() as usize,
            midi_ports: config.midi_ports(),
            midi_quadlets: config.midi_quadlets(),
        }
    }

    #[inline(always)]
    pub const fn data_block_quadlets(&self) -> usize {
        self.pcm_channels + self.midi_quadlets as usize
    }

    #[inline(always)]
    pub const fn data_block_bytes(&self) -> usize {
        self.data_block_quadlets() * QUADLET
    }

    /// Writes `frames` data blocks at the start of `out`.
    ///
    /// `pcm` holds `frames * pcm_channels` interleaved samples, or `None` for
    /// silence. `midi` is asked for one byte whenever a port's turn comes up in
    /// the multiplex, and receives the port index.
    ///
    /// Panics if `out` is too short.
    pub fn encode(
        &self,
        out: &mut [u8],
        first_counter: u8,
        frames: usize,
        pcm: Option<PcmSamples<'_>>,
        mut midi: impl FnMut(usize) -> Option<u8>,
    ) {
        let block_size = self.data_block_bytes();
        let blocks = out[..frames * block_size].chunks_exact_mut(block_size);

        for (f, block) in blocks.enumerate() {
            let (pcm_bytes, midi_bytes) = block.split_at_mut(self.pcm_channels * QUADLET);
            let words = pcm_bytes.chunks_exact_mut(QUADLET);
            let offset = f * self.pcm_channels;

            match pcm {
                Some(PcmSamples::S16(s)) => {
                    let frame = &s[offset..offset + self.pcm_channels];
                    for (word, &sample) in words.zip(frame) {
                        word.copy_from_slice(&pcm_word_s16(sample).to_be_bytes());
                    }
                }
                Some(PcmSamples::S32(s)) => {
                    let frame = &s[offset..offset + self.pcm_channels];
                    for (word, &sample) in words.zip(frame) {
                        word.copy_from_slice(&pcm_word_s32(sample).to_be_bytes());
                    }
                }
                None => {
                    for word in words {
                        word.copy_from_slice(&PCM_SILENCE.to_be_bytes());
                    }
                }
            }

            let counter = first_counter.wrapping_add(f as u8);

            for (q, word) in (0..).zip(midi_bytes.chunks_exact_mut(QUADLET)) {
                let port = multiplexed_port(counter, q);

                let byte = if port < self.midi_ports {
                    midi(port as usize)
                } else {
                    None
                };

                let value = match byte {
                    Some(b) => u32::from_be_bytes([LABEL_MIDI_ONE, b, 0, 0]),
                    None => MIDI_EMPTY,
                };

                word.copy_from_slice(&value.to_be_bytes());
            }
        }
    }

    /// Reads `frames` data blocks from the start of `payload`.
    ///
    /// PCM samples are written to `pcm` (if any) interleaved, MIDI bytes are
    /// handed to `midi` with their port index. Returns the number of MIDI
    /// quadlets with an invalid label, which are skipped.
    ///
    /// Panics if `payload` is too short.
    pub fn decode(
        &self,
        payload: &[u8],
        first_counter: u8,
        frames: usize,
        mut pcm: Option<PcmSamplesMut<'_>>,
        mut midi: impl FnMut(usize, &[u8]),
    ) -> u32 {
        let block_size = self.data_block_bytes();
        let blocks = payload[..frames * block_size].chunks_exact(block_size);
        let mut framing_errors = 0;

        for (f, block) in blocks.enumerate() {
            let (pcm_bytes, midi_bytes) = block.split_at(self.pcm_channels * QUADLET);
            let words = pcm_bytes
                .chunks_exact(QUADLET)
                .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]));
            let offset = f * self.pcm_channels;

            match &mut pcm {
                Some(PcmSamplesMut::S16(s)) => {
                    let frame = &mut s[offset..offset + self.pcm_channels];
                    for (sample, word) in frame.iter_mut().zip(words) {
                        *sample = s16_from_word(word);
                    }
                }
                Some(PcmSamplesMut::S32(s)) => {
                    let frame = &mut s[offset..offset + self.pcm_channels];
                    for (sample, word) in frame.iter_mut().zip(words) {
                        *sample = s32_from_word(word);
                    }
                }
                None => {}
            }

            let counter = first_counter.wrapping_add(f as u8);

            for (q, word) in (0..).zip(midi_bytes.chunks_exact(QUADLET)) {
                let port = multiplexed_port(counter, q);

                match MidiLabel::parse(word[0]) {
                    MidiLabel::Empty => {}
                    MidiLabel::Bytes(n) if port < self.midi_ports => {
                        midi(port as usize, &word[1..1 + n]);
                    }
                    MidiLabel::Bytes(_) => {}
                    MidiLabel::Invalid(label) => {
                        log::debug!("invalid MIDI label {label:#04x} in data block {counter}");
                        framing_errors += 1;
                    }
                }
            }
        }

        framing_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use am824_proto::{Direction, SampleFrequencyClass, SampleWidth};

    fn codec(pcm: u32, midi: u32) -> Am824Codec {
        let config = StreamConfig::new(
            SampleFrequencyClass::Hz48000,
            pcm,
            midi,
            SampleWidth::S16,
            Direction::Transmit,
        )
        .unwrap();
        Am824Codec::new(&config)
    }

    fn words(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|w| u32::from_be_bytes(w.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn sample_words() {
        assert_eq!(pcm_word_s16(0x1234), 0x4012_3400);
        assert_eq!(pcm_word_s16(-1), 0x40ff_ff00);
        assert_eq!(pcm_word_s32(0x1234_5678), 0x4012_3456);
        assert_eq!(pcm_word_s32(i32::MIN), 0x4080_0000);

        assert_eq!(s16_from_word(0x40ff_ff00), -1);
        assert_eq!(s32_from_word(0x4012_3456), 0x1234_5600);
    }

    #[test]
    fn round_trip_16_bit_is_exact() {
        let codec = codec(2, 0);
        let samples = [0i16, -1, i16::MAX, i16::MIN, 0x1234, -0x1234];
        let mut out = [0; 3 * 2 * 4];

        codec.encode(&mut out, 0, 3, Some(PcmSamples::S16(&samples)), |_| None);
        assert_eq!(words(&out)[..2], [0x4000_0000, 0x40ff_ff00]);

        let mut back = [0i16; 6];
        let errors = codec.decode(&out, 0, 3, Some(PcmSamplesMut::S16(&mut back)), |_, _| {});
        assert_eq!(errors, 0);
        assert_eq!(back, samples);
    }

    #[test]
    fn round_trip_32_bit_drops_low_byte() {
        let codec = codec(1, 0);
        let samples = [0x1234_5678i32, -0x1234_5678, i32::MAX, i32::MIN];
        let mut out = [0; 4 * 4];

        codec.encode(&mut out, 0, 4, Some(PcmSamples::S32(&samples)), |_| None);

        let mut back = [0i32; 4];
        codec.decode(&out, 0, 4, Some(PcmSamplesMut::S32(&mut back)), |_, _| {});

        for (&original, &decoded) in samples.iter().zip(&back) {
            assert_eq!(decoded, original & !0xff);
        }
    }

    #[test]
    fn unbound_pcm_is_label_only_silence() {
        let codec = codec(2, 0);
        let mut out = [0xaa; 2 * 2 * 4];
        codec.encode(&mut out, 0, 2, None, |_| None);
        assert!(words(&out).iter().all(|&w| w == PCM_SILENCE));
    }

    #[test]
    fn midi_multiplexing() {
        // 2 PCM channels, 10 MIDI ports: 2 MIDI quadlets per block
        let codec = codec(2, 10);
        let frames = 16;
        let first_counter = 0xfd;
        let mut out = vec![0; frames * codec.data_block_bytes()];

        let mut pulled = Vec::new();
        codec.encode(&mut out, first_counter, frames, None, |port| {
            pulled.push(port);
            (port == 3 || port == 9).then_some(0x90 + port as u8)
        });

        // every existing port gets asked exactly once per 8 blocks
        assert_eq!(pulled.len(), 2 * (8 + 2));

        let words = words(&out);
        for (f, block) in words.chunks_exact(4).enumerate() {
            let counter = first_counter.wrapping_add(f as u8);
            let slot = u32::from(counter) % 8;

            let expected_first = match slot {
                3 => 0x8193_0000,
                _ => MIDI_EMPTY,
            };
            let expected_second = match slot {
                1 => 0x8199_0000,
                _ => MIDI_EMPTY,
            };

            assert_eq!(block[2], expected_first, "block {f}");
            assert_eq!(block[3], expected_second, "block {f}");
        }

        let mut received = Vec::new();
        let errors = codec.decode(&out, first_counter, frames, None, |port, bytes| {
            received.push((port, bytes.to_vec()));
        });

        assert_eq!(errors, 0);
        assert_eq!(received.len(), 4);
        assert!(received.iter().all(|(port, bytes)| bytes == &[0x90 + *port as u8]));
    }

    #[test]
    fn framing_errors_are_counted() {
        let codec = codec(0, 1);

        let payload: Vec<u8> = [0x8300_0000u32 | 0x00f8_faf9, 0x8000_0000, 0x4000_0000]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();

        let mut received = Vec::new();
        let errors = codec.decode(&payload, 0, 3, None, |port, bytes| {
            received.push((port, bytes.to_vec()));
        });

        assert_eq!(errors, 1);
        assert_eq!(received, [(0, vec![0xf8, 0xfa, 0xf9])]);
    }
}
