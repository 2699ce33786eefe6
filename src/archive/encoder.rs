//! Incremental Ogg/Opus encoder for the archival copy of a session.
//!
//! Frames are folded in as they arrive so finalize only has to flush the
//! tail. Opus accepts a handful of sample rates; when the device rate is not
//! one of them the input is resampled to 48 kHz on the way in.

use crate::pcm;
use ogg::{PacketWriteEndInfo, PacketWriter};
use std::io::Cursor;

/// Constant bitrate for archived speech, in bits per second.
pub(super) const ARCHIVE_BITRATE: i32 = 24_000;

/// Opus frame length. Granule positions always count 48 kHz samples.
const FRAME_MS: u32 = 20;
const GRANULE_PER_FRAME: u64 = 48_000 / 1_000 * FRAME_MS as u64;

/// Encoder lookahead recorded as pre-skip in the stream header.
const PRE_SKIP: u16 = 312;

const SUPPORTED_RATES: [u32; 5] = [8_000, 12_000, 16_000, 24_000, 48_000];

pub(super) struct ArchiveEncoder {
    encoder: opus::Encoder,
    writer: PacketWriter<'static, Vec<u8>>,
    serial: u32,
    source_rate: u32,
    encode_rate: u32,
    frame_samples: usize,
    pending: Vec<f32>,
    granule: u64,
}

impl ArchiveEncoder {
    /// Build an encoder for frames arriving at `source_rate`. Writes the
    /// OpusHead/OpusTags header pages immediately.
    pub(super) fn new(source_rate: u32, serial: u32) -> std::io::Result<Self> {
        let encode_rate = if SUPPORTED_RATES.contains(&source_rate) {
            source_rate
        } else {
            48_000
        };
        let mut encoder =
            opus::Encoder::new(encode_rate, opus::Channels::Mono, opus::Application::Voip)
                .map_err(std::io::Error::other)?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(ARCHIVE_BITRATE))
            .map_err(std::io::Error::other)?;
        encoder.set_vbr(false).map_err(std::io::Error::other)?;

        let mut this = Self {
            encoder,
            writer: PacketWriter::new(Vec::new()),
            serial,
            source_rate,
            encode_rate,
            frame_samples: (encode_rate / 1_000 * FRAME_MS) as usize,
            pending: Vec::new(),
            granule: 0,
        };
        this.write_headers()?;
        Ok(this)
    }

    /// Fold one captured frame into the stream, emitting any full Opus
    /// frames it completes.
    pub(super) fn push(&mut self, frame: &[f32]) -> std::io::Result<()> {
        if self.encode_rate == self.source_rate {
            self.pending.extend_from_slice(frame);
        } else {
            self.pending
                .extend(pcm::resample(frame, self.source_rate, self.encode_rate));
        }
        while self.pending.len() >= self.frame_samples {
            let chunk: Vec<f32> = self.pending.drain(..self.frame_samples).collect();
            self.encode_frame(&chunk, PacketWriteEndInfo::NormalPacket)?;
        }
        Ok(())
    }

    /// Flush the tail and return the finished Ogg stream. The final packet is
    /// zero-padded to a full frame so the end-of-stream flag rides real audio;
    /// an empty session still yields a valid one-frame artifact.
    pub(super) fn finish(mut self) -> std::io::Result<Vec<u8>> {
        let mut tail = std::mem::take(&mut self.pending);
        tail.resize(self.frame_samples, 0.0);
        self.encode_frame(&tail, PacketWriteEndInfo::EndStream)?;
        Ok(self.writer.into_inner())
    }

    fn encode_frame(
        &mut self,
        samples: &[f32],
        end_info: PacketWriteEndInfo,
    ) -> std::io::Result<()> {
        let packet = self
            .encoder
            .encode_vec_float(samples, 4_000)
            .map_err(std::io::Error::other)?;
        self.granule += GRANULE_PER_FRAME;
        self.writer
            .write_packet(packet, self.serial, end_info, self.granule)
    }

    fn write_headers(&mut self) -> std::io::Result<()> {
        // OpusHead, RFC 7845: magic, version, channels, pre-skip, input rate,
        // output gain, mapping family. Mono, family 0.
        let mut head = Vec::with_capacity(19);
        head.extend_from_slice(b"OpusHead");
        head.push(1);
        head.push(1);
        head.extend_from_slice(&PRE_SKIP.to_le_bytes());
        head.extend_from_slice(&self.source_rate.to_le_bytes());
        head.extend_from_slice(&0i16.to_le_bytes());
        head.push(0);
        self.writer
            .write_packet(head, self.serial, PacketWriteEndInfo::EndPage, 0)?;

        let vendor = b"voicepipe";
        let mut tags = Vec::with_capacity(8 + 4 + vendor.len() + 4);
        tags.extend_from_slice(b"OpusTags");
        tags.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        tags.extend_from_slice(vendor);
        tags.extend_from_slice(&0u32.to_le_bytes());
        self.writer
            .write_packet(tags, self.serial, PacketWriteEndInfo::EndPage, 0)
    }
}

/// Decode the finished artifact once to learn its true duration. The encoder
/// pads the tail, so the container is the only honest source.
pub(super) fn measure_duration_secs(blob: &[u8]) -> f64 {
    let mut reader = ogg::PacketReader::new(Cursor::new(blob));
    let decoder = match opus::Decoder::new(48_000, opus::Channels::Mono) {
        Ok(decoder) => decoder,
        Err(_) => return 0.0,
    };
    let mut samples: u64 = 0;
    let mut header_packets = 2u8;
    while let Ok(Some(packet)) = reader.read_packet() {
        if header_packets > 0 {
            header_packets -= 1;
            continue;
        }
        if let Ok(count) = decoder.get_nb_samples(&packet.data) {
            samples += count as u64;
        }
    }
    samples.saturating_sub(u64::from(PRE_SKIP)) as f64 / 48_000.0
}
