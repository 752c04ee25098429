//! RIFF/AVI container writer and reader
//!
//! Writes AVI 1.0 files with a legacy `idx1` index. The header block has a
//! fixed size once the streams are declared, so it is written with zero
//! counts before the first chunk and rewritten in place by
//! [`AviWriter::finish`].

use crate::mux::codec::{AudioStreamFormat, FourCC};
use crate::utils::error::{RecordingError, RecordingResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Seek, SeekFrom, Write};

const AVIF_HASINDEX: u32 = 0x0000_0010;
const AVIF_ISINTERLEAVED: u32 = 0x0000_0100;
const AVIIF_KEYFRAME: u32 = 0x0000_0010;

const MAIN_HEADER_SIZE: u32 = 56;
const STREAM_HEADER_SIZE: u32 = 56;
const BITMAP_INFO_HEADER_SIZE: u32 = 40;
const WAVE_FORMAT_EX_SIZE: u32 = 18;
const INDEX_ENTRY_SIZE: u64 = 16;

/// Video stream declaration
#[derive(Debug, Clone)]
pub struct AviVideoHeader {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub fourcc: FourCC,
    pub bits_per_pixel: u16,
    pub max_frame_size: u32,
    pub name: String,
}

/// Audio stream declaration
#[derive(Debug, Clone)]
pub struct AviAudioHeader {
    pub format: AudioStreamFormat,
    pub name: String,
}

#[derive(Debug, Clone)]
enum StreamSpec {
    Video(AviVideoHeader),
    Audio(AviAudioHeader),
}

#[derive(Debug)]
struct StreamState {
    spec: StreamSpec,
    chunk_id: [u8; 4],
    chunks: u64,
    bytes: u64,
    largest_chunk: u32,
}

impl StreamState {
    /// `dwLength` in the stream's own units
    fn length(&self) -> u32 {
        match &self.spec {
            StreamSpec::Video(_) => clamp_u32(self.chunks),
            StreamSpec::Audio(audio) => {
                clamp_u32(self.bytes / u64::from(audio.format.block_align.max(1)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    chunk_id: [u8; 4],
    flags: u32,
    offset: u32,
    size: u32,
}

/// Streaming AVI writer over any seekable sink
pub struct AviWriter<W: Write + Seek> {
    out: W,
    streams: Vec<StreamState>,
    /// Length of the header block including the `movi` list header
    header_len: Option<u64>,
    position: u64,
    index: Vec<IndexEntry>,
    finished: bool,
}

impl<W: Write + Seek> AviWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            streams: Vec::new(),
            header_len: None,
            position: 0,
            index: Vec::new(),
            finished: false,
        }
    }

    /// Declare the video stream; returns its stream number
    pub fn add_video_stream(&mut self, header: AviVideoHeader) -> RecordingResult<u32> {
        let suffix = if header.fourcc == FourCC::UNCOMPRESSED { *b"db" } else { *b"dc" };
        self.add_stream(StreamSpec::Video(header), suffix)
    }

    /// Declare an audio stream; returns its stream number
    pub fn add_audio_stream(&mut self, header: AviAudioHeader) -> RecordingResult<u32> {
        self.add_stream(StreamSpec::Audio(header), *b"wb")
    }

    fn add_stream(&mut self, spec: StreamSpec, suffix: [u8; 2]) -> RecordingResult<u32> {
        if self.header_len.is_some() || self.finished {
            return Err(RecordingError::Container(
                "streams must be declared before the first chunk is written".to_string(),
            ));
        }
        let number = self.streams.len() as u32;
        if number > 99 {
            return Err(RecordingError::Container("too many streams".to_string()));
        }
        let digits = format!("{:02}", number).into_bytes();
        self.streams.push(StreamState {
            spec,
            chunk_id: [digits[0], digits[1], suffix[0], suffix[1]],
            chunks: 0,
            bytes: 0,
            largest_chunk: 0,
        });
        Ok(number)
    }

    /// Append one data chunk to the `movi` list
    pub fn write_chunk(&mut self, stream: u32, data: &[u8], key_frame: bool) -> RecordingResult<()> {
        if self.finished {
            return Err(RecordingError::WriterClosed);
        }
        if stream as usize >= self.streams.len() {
            return Err(RecordingError::UnknownStream(format!("AVI stream {}", stream)));
        }
        let header_len = self.begin()?;

        let padded = padded_len(data.len() as u64);
        let index_len = (self.index.len() as u64 + 1) * INDEX_ENTRY_SIZE + 8;
        if self.position + 8 + padded + index_len > u64::from(u32::MAX) {
            return Err(RecordingError::Container(
                "AVI file would exceed the 4 GiB RIFF limit".to_string(),
            ));
        }

        let state = &mut self.streams[stream as usize];
        let size = data.len() as u32;
        self.index.push(IndexEntry {
            chunk_id: state.chunk_id,
            flags: if key_frame { AVIIF_KEYFRAME } else { 0 },
            offset: (self.position - (header_len - 4)) as u32,
            size,
        });
        state.chunks += 1;
        state.bytes += u64::from(size);
        state.largest_chunk = state.largest_chunk.max(size);

        self.out.write_all(&state.chunk_id)?;
        self.out.write_u32::<LittleEndian>(size)?;
        self.out.write_all(data)?;
        if data.len() % 2 == 1 {
            self.out.write_u8(0)?;
        }
        self.position += 8 + padded;
        Ok(())
    }

    /// Write the index, rewrite the header with final counts and flush
    pub fn finish(&mut self) -> RecordingResult<()> {
        if self.finished {
            return Err(RecordingError::WriterClosed);
        }
        let header_len = self.begin()?;

        self.out.write_all(b"idx1")?;
        self.out
            .write_u32::<LittleEndian>((self.index.len() as u64 * INDEX_ENTRY_SIZE) as u32)?;
        for entry in &self.index {
            self.out.write_all(&entry.chunk_id)?;
            self.out.write_u32::<LittleEndian>(entry.flags)?;
            self.out.write_u32::<LittleEndian>(entry.offset)?;
            self.out.write_u32::<LittleEndian>(entry.size)?;
        }
        let movi_size = self.position - (header_len - 4);
        self.position += 8 + self.index.len() as u64 * INDEX_ENTRY_SIZE;

        let header = self.build_header(self.position - 8, movi_size)?;
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&header)?;
        self.out.seek(SeekFrom::Start(self.position))?;
        self.out.flush()?;
        self.finished = true;

        tracing::debug!(
            "AVI finalized: {} chunks, {} bytes",
            self.index.len(),
            self.position
        );
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Emit the placeholder header on first use; returns the header length
    fn begin(&mut self) -> RecordingResult<u64> {
        if let Some(len) = self.header_len {
            return Ok(len);
        }
        let header = self.build_header(0, 4)?;
        self.out.write_all(&header)?;
        let len = header.len() as u64;
        self.header_len = Some(len);
        self.position = len;
        Ok(len)
    }

    fn video(&self) -> Option<&AviVideoHeader> {
        self.streams.iter().find_map(|s| match &s.spec {
            StreamSpec::Video(v) => Some(v),
            StreamSpec::Audio(_) => None,
        })
    }

    fn build_header(&self, riff_size: u64, movi_size: u64) -> io::Result<Vec<u8>> {
        let mut strls = Vec::new();
        for stream in &self.streams {
            let mut strl = Vec::new();
            write_stream_list(&mut strl, stream)?;
            strls.push(strl);
        }

        let hdrl_size = 4
            + 8
            + MAIN_HEADER_SIZE
            + strls.iter().map(|s| s.len() as u32).sum::<u32>();

        let mut buf: Vec<u8> = Vec::with_capacity(hdrl_size as usize + 32);
        buf.extend_from_slice(b"RIFF");
        buf.write_u32::<LittleEndian>(clamp_u32(riff_size))?;
        buf.extend_from_slice(b"AVI ");

        buf.extend_from_slice(b"LIST");
        buf.write_u32::<LittleEndian>(hdrl_size)?;
        buf.extend_from_slice(b"hdrl");

        let (fps, width, height) = self
            .video()
            .map(|v| (v.fps.max(1), v.width, v.height))
            .unwrap_or((1, 0, 0));
        let total_frames = self
            .streams
            .iter()
            .find(|s| matches!(s.spec, StreamSpec::Video(_)))
            .map(|s| clamp_u32(s.chunks))
            .unwrap_or(0);
        let max_bytes_per_sec = self
            .streams
            .iter()
            .map(|s| match &s.spec {
                StreamSpec::Video(v) => u64::from(v.max_frame_size) * u64::from(fps),
                StreamSpec::Audio(a) => u64::from(a.format.avg_bytes_per_second),
            })
            .sum::<u64>();
        let suggested_buffer = self
            .streams
            .iter()
            .map(|s| s.largest_chunk)
            .max()
            .unwrap_or(0);

        buf.extend_from_slice(b"avih");
        buf.write_u32::<LittleEndian>(MAIN_HEADER_SIZE)?;
        buf.write_u32::<LittleEndian>(1_000_000 / fps)?;
        buf.write_u32::<LittleEndian>(clamp_u32(max_bytes_per_sec))?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(AVIF_HASINDEX | AVIF_ISINTERLEAVED)?;
        buf.write_u32::<LittleEndian>(total_frames)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.streams.len() as u32)?;
        buf.write_u32::<LittleEndian>(suggested_buffer)?;
        buf.write_u32::<LittleEndian>(width)?;
        buf.write_u32::<LittleEndian>(height)?;
        for _ in 0..4 {
            buf.write_u32::<LittleEndian>(0)?;
        }

        for strl in strls {
            buf.extend_from_slice(&strl);
        }

        buf.extend_from_slice(b"LIST");
        buf.write_u32::<LittleEndian>(clamp_u32(movi_size))?;
        buf.extend_from_slice(b"movi");
        Ok(buf)
    }
}

fn write_stream_list(buf: &mut Vec<u8>, stream: &StreamState) -> io::Result<()> {
    let mut body: Vec<u8> = Vec::new();
    body.extend_from_slice(b"strl");

    body.extend_from_slice(b"strh");
    body.write_u32::<LittleEndian>(STREAM_HEADER_SIZE)?;
    let name = match &stream.spec {
        StreamSpec::Video(video) => {
            body.extend_from_slice(b"vids");
            body.extend_from_slice(&video.fourcc.as_bytes());
            body.write_u32::<LittleEndian>(0)?; // flags
            body.write_u16::<LittleEndian>(0)?; // priority
            body.write_u16::<LittleEndian>(0)?; // language
            body.write_u32::<LittleEndian>(0)?; // initial frames
            body.write_u32::<LittleEndian>(1)?; // scale
            body.write_u32::<LittleEndian>(video.fps.max(1))?; // rate
            body.write_u32::<LittleEndian>(0)?; // start
            body.write_u32::<LittleEndian>(stream.length())?;
            body.write_u32::<LittleEndian>(stream.largest_chunk)?;
            body.write_u32::<LittleEndian>(u32::MAX)?; // quality: driver default
            body.write_u32::<LittleEndian>(0)?; // sample size: variable
            write_rect(&mut body, video.width, video.height)?;

            body.extend_from_slice(b"strf");
            body.write_u32::<LittleEndian>(BITMAP_INFO_HEADER_SIZE)?;
            body.write_u32::<LittleEndian>(BITMAP_INFO_HEADER_SIZE)?;
            body.write_u32::<LittleEndian>(video.width)?;
            body.write_u32::<LittleEndian>(video.height)?;
            body.write_u16::<LittleEndian>(1)?;
            body.write_u16::<LittleEndian>(video.bits_per_pixel)?;
            body.write_u32::<LittleEndian>(video.fourcc.as_u32())?;
            body.write_u32::<LittleEndian>(clamp_u32(
                u64::from(video.width) * u64::from(video.height) * u64::from(video.bits_per_pixel) / 8,
            ))?;
            for _ in 0..4 {
                body.write_u32::<LittleEndian>(0)?;
            }
            &video.name
        }
        StreamSpec::Audio(audio) => {
            let format = &audio.format;
            body.extend_from_slice(b"auds");
            body.write_u32::<LittleEndian>(0)?; // handler
            body.write_u32::<LittleEndian>(0)?; // flags
            body.write_u16::<LittleEndian>(0)?;
            body.write_u16::<LittleEndian>(0)?;
            body.write_u32::<LittleEndian>(0)?;
            body.write_u32::<LittleEndian>(u32::from(format.block_align.max(1)))?;
            body.write_u32::<LittleEndian>(format.avg_bytes_per_second)?;
            body.write_u32::<LittleEndian>(0)?;
            body.write_u32::<LittleEndian>(stream.length())?;
            body.write_u32::<LittleEndian>(stream.largest_chunk)?;
            body.write_u32::<LittleEndian>(u32::MAX)?;
            body.write_u32::<LittleEndian>(u32::from(format.block_align))?;
            write_rect(&mut body, 0, 0)?;

            let strf_size = WAVE_FORMAT_EX_SIZE + format.extra.len() as u32;
            body.extend_from_slice(b"strf");
            body.write_u32::<LittleEndian>(strf_size)?;
            body.write_u16::<LittleEndian>(format.format_tag)?;
            body.write_u16::<LittleEndian>(format.channels)?;
            body.write_u32::<LittleEndian>(format.sample_rate)?;
            body.write_u32::<LittleEndian>(format.avg_bytes_per_second)?;
            body.write_u16::<LittleEndian>(format.block_align)?;
            body.write_u16::<LittleEndian>(format.bits_per_sample)?;
            body.write_u16::<LittleEndian>(format.extra.len() as u16)?;
            body.extend_from_slice(&format.extra);
            if strf_size % 2 == 1 {
                body.push(0);
            }
            &audio.name
        }
    };

    let mut name_bytes = name.as_bytes().to_vec();
    name_bytes.push(0);
    body.extend_from_slice(b"strn");
    body.write_u32::<LittleEndian>(name_bytes.len() as u32)?;
    body.extend_from_slice(&name_bytes);
    if name_bytes.len() % 2 == 1 {
        body.push(0);
    }

    buf.extend_from_slice(b"LIST");
    buf.write_u32::<LittleEndian>(body.len() as u32)?;
    buf.extend_from_slice(&body);
    Ok(())
}

fn write_rect(buf: &mut Vec<u8>, width: u32, height: u32) -> io::Result<()> {
    let clamp = |v: u32| v.min(i16::MAX as u32) as u16;
    buf.write_u16::<LittleEndian>(0)?;
    buf.write_u16::<LittleEndian>(0)?;
    buf.write_u16::<LittleEndian>(clamp(width))?;
    buf.write_u16::<LittleEndian>(clamp(height))
}

fn padded_len(len: u64) -> u64 {
    len + (len & 1)
}

fn clamp_u32(value: u64) -> u32 {
    value.min(u64::from(u32::MAX)) as u32
}

/// Kind of a stream found in an AVI file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AviStreamKind {
    Video,
    Audio,
    Other,
}

/// Per-stream facts read back from a finished file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AviStreamSummary {
    pub kind: AviStreamKind,
    pub handler: String,
    pub name: Option<String>,
    pub scale: u32,
    pub rate: u32,
    pub length: u32,
    /// Chunks listed in `idx1`
    pub indexed_chunks: u64,
    /// Payload bytes listed in `idx1`
    pub indexed_bytes: u64,
}

/// Container facts read back from a finished file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AviSummary {
    pub width: u32,
    pub height: u32,
    pub micro_sec_per_frame: u32,
    pub total_frames: u32,
    pub streams: Vec<AviStreamSummary>,
}

impl AviSummary {
    pub fn video(&self) -> Option<&AviStreamSummary> {
        self.streams.iter().find(|s| s.kind == AviStreamKind::Video)
    }

    pub fn audio(&self) -> Option<&AviStreamSummary> {
        self.streams.iter().find(|s| s.kind == AviStreamKind::Audio)
    }
}

/// Parse the header and index of an AVI file
pub fn read_summary<R: Read + Seek>(input: &mut R) -> RecordingResult<AviSummary> {
    let malformed = |what: &str| RecordingError::Container(format!("malformed AVI: {}", what));

    let mut tag = [0u8; 4];
    input.read_exact(&mut tag)?;
    let riff_size = input.read_u32::<LittleEndian>()?;
    let mut form = [0u8; 4];
    input.read_exact(&mut form)?;
    if &tag != b"RIFF" || &form != b"AVI " {
        return Err(malformed("missing RIFF/AVI signature"));
    }
    let end = 8 + u64::from(riff_size);

    let mut summary = AviSummary {
        width: 0,
        height: 0,
        micro_sec_per_frame: 0,
        total_frames: 0,
        streams: Vec::new(),
    };
    let mut pos = 12u64;
    while pos + 8 <= end {
        input.seek(SeekFrom::Start(pos))?;
        let mut id = [0u8; 4];
        if input.read_exact(&mut id).is_err() {
            break;
        }
        let size = u64::from(input.read_u32::<LittleEndian>()?);
        match &id {
            b"LIST" => {
                let mut list_type = [0u8; 4];
                input.read_exact(&mut list_type)?;
                if &list_type == b"hdrl" {
                    read_hdrl(input, pos + 12, pos + 8 + size, &mut summary)?;
                }
            }
            b"idx1" => {
                for _ in 0..size / INDEX_ENTRY_SIZE {
                    let mut chunk_id = [0u8; 4];
                    input.read_exact(&mut chunk_id)?;
                    let _flags = input.read_u32::<LittleEndian>()?;
                    let _offset = input.read_u32::<LittleEndian>()?;
                    let chunk_size = input.read_u32::<LittleEndian>()?;
                    let number = std::str::from_utf8(&chunk_id[..2])
                        .ok()
                        .and_then(|s| s.parse::<usize>().ok());
                    if let Some(stream) = number.and_then(|n| summary.streams.get_mut(n)) {
                        stream.indexed_chunks += 1;
                        stream.indexed_bytes += u64::from(chunk_size);
                    }
                }
            }
            _ => {}
        }
        pos += 8 + padded_len(size);
    }
    Ok(summary)
}

fn read_hdrl<R: Read + Seek>(
    input: &mut R,
    start: u64,
    end: u64,
    summary: &mut AviSummary,
) -> RecordingResult<()> {
    let mut pos = start;
    while pos + 8 <= end {
        input.seek(SeekFrom::Start(pos))?;
        let mut id = [0u8; 4];
        input.read_exact(&mut id)?;
        let size = u64::from(input.read_u32::<LittleEndian>()?);
        match &id {
            b"avih" => {
                summary.micro_sec_per_frame = input.read_u32::<LittleEndian>()?;
                let _max_bytes = input.read_u32::<LittleEndian>()?;
                let _padding = input.read_u32::<LittleEndian>()?;
                let _flags = input.read_u32::<LittleEndian>()?;
                summary.total_frames = input.read_u32::<LittleEndian>()?;
                let _initial = input.read_u32::<LittleEndian>()?;
                let _streams = input.read_u32::<LittleEndian>()?;
                let _suggested = input.read_u32::<LittleEndian>()?;
                summary.width = input.read_u32::<LittleEndian>()?;
                summary.height = input.read_u32::<LittleEndian>()?;
            }
            b"LIST" => {
                let mut list_type = [0u8; 4];
                input.read_exact(&mut list_type)?;
                if &list_type == b"strl" {
                    let stream = read_strl(input, pos + 12, pos + 8 + size)?;
                    summary.streams.push(stream);
                }
            }
            _ => {}
        }
        pos += 8 + padded_len(size);
    }
    Ok(())
}

fn read_strl<R: Read + Seek>(input: &mut R, start: u64, end: u64) -> RecordingResult<AviStreamSummary> {
    let mut stream = AviStreamSummary {
        kind: AviStreamKind::Other,
        handler: String::new(),
        name: None,
        scale: 0,
        rate: 0,
        length: 0,
        indexed_chunks: 0,
        indexed_bytes: 0,
    };
    let mut pos = start;
    while pos + 8 <= end {
        input.seek(SeekFrom::Start(pos))?;
        let mut id = [0u8; 4];
        input.read_exact(&mut id)?;
        let size = u64::from(input.read_u32::<LittleEndian>()?);
        match &id {
            b"strh" => {
                let mut kind = [0u8; 4];
                input.read_exact(&mut kind)?;
                stream.kind = match &kind {
                    b"vids" => AviStreamKind::Video,
                    b"auds" => AviStreamKind::Audio,
                    _ => AviStreamKind::Other,
                };
                let mut handler = [0u8; 4];
                input.read_exact(&mut handler)?;
                stream.handler = FourCC::new(handler).to_string();
                let _flags = input.read_u32::<LittleEndian>()?;
                let _priority = input.read_u16::<LittleEndian>()?;
                let _language = input.read_u16::<LittleEndian>()?;
                let _initial = input.read_u32::<LittleEndian>()?;
                stream.scale = input.read_u32::<LittleEndian>()?;
                stream.rate = input.read_u32::<LittleEndian>()?;
                let _start = input.read_u32::<LittleEndian>()?;
                stream.length = input.read_u32::<LittleEndian>()?;
            }
            b"strn" => {
                let mut raw = vec![0u8; size as usize];
                input.read_exact(&mut raw)?;
                let name = raw.split(|b| *b == 0).next().unwrap_or_default();
                stream.name = Some(String::from_utf8_lossy(name).into_owned());
            }
            _ => {}
        }
        pos += 8 + padded_len(size);
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::WaveFormat;
    use std::io::Cursor;

    fn video_header(fourcc: FourCC) -> AviVideoHeader {
        AviVideoHeader {
            width: 4,
            height: 2,
            fps: 25,
            fourcc,
            bits_per_pixel: 32,
            max_frame_size: 32,
            name: "Screen".to_string(),
        }
    }

    #[test]
    fn writes_readable_file_with_index() {
        let mut writer = AviWriter::new(Cursor::new(Vec::new()));
        let video = writer.add_video_stream(video_header(FourCC::UNCOMPRESSED)).unwrap();
        let audio = writer
            .add_audio_stream(AviAudioHeader {
                format: AudioStreamFormat::pcm(WaveFormat::pcm16(false)),
                name: "Voice".to_string(),
            })
            .unwrap();

        for _ in 0..3 {
            writer.write_chunk(audio, &[0u8; 10], true).unwrap();
            writer.write_chunk(video, &[1u8; 32], true).unwrap();
        }
        // odd-sized chunk exercises padding
        writer.write_chunk(audio, &[0u8; 3], true).unwrap();
        writer.finish().unwrap();

        let bytes = writer.into_inner().into_inner();
        assert_eq!(bytes.len() % 2, 0);
        let riff_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(riff_size as usize, bytes.len() - 8);

        let summary = read_summary(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(summary.width, 4);
        assert_eq!(summary.height, 2);
        assert_eq!(summary.micro_sec_per_frame, 40_000);
        assert_eq!(summary.total_frames, 3);

        let v = summary.video().unwrap();
        assert_eq!(v.indexed_chunks, 3);
        assert_eq!(v.length, 3);
        assert_eq!(v.rate, 25);
        assert_eq!(v.name.as_deref(), Some("Screen"));

        let a = summary.audio().unwrap();
        assert_eq!(a.indexed_chunks, 4);
        assert_eq!(a.indexed_bytes, 33);
        assert_eq!(a.scale, 2);
        assert_eq!(a.rate, 88_200);
        assert_eq!(a.length, 16);
    }

    #[test]
    fn index_offsets_point_at_chunks() {
        let mut writer = AviWriter::new(Cursor::new(Vec::new()));
        let video = writer.add_video_stream(video_header(FourCC::MOTION_JPEG)).unwrap();
        writer.write_chunk(video, b"abc", true).unwrap();
        writer.write_chunk(video, b"defg", false).unwrap();
        writer.finish().unwrap();
        let bytes = writer.into_inner().into_inner();

        let movi = bytes.windows(4).position(|w| w == b"movi").unwrap();
        let idx1 = bytes.windows(4).rposition(|w| w == b"idx1").unwrap();
        let entries = &bytes[idx1 + 8..];
        for (n, expected) in [(0usize, &b"abc"[..]), (1, &b"defg"[..])] {
            let entry = &entries[n * 16..(n + 1) * 16];
            assert_eq!(&entry[..4], b"00dc");
            let offset = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]) as usize;
            let size = u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]) as usize;
            let chunk = movi + offset;
            assert_eq!(&bytes[chunk..chunk + 4], b"00dc");
            assert_eq!(&bytes[chunk + 8..chunk + 8 + size], expected);
        }
        let flags = u32::from_le_bytes([entries[20], entries[21], entries[22], entries[23]]);
        assert_eq!(flags, 0);
    }

    #[test]
    fn stream_format_fields_are_little_endian() {
        let mut writer = AviWriter::new(Cursor::new(Vec::new()));
        let video = writer.add_video_stream(video_header(FourCC::MOTION_JPEG)).unwrap();
        writer.write_chunk(video, &[0u8; 8], true).unwrap();
        let placeholder_movi = writer.header_len.unwrap();
        writer.finish().unwrap();
        let bytes = writer.into_inner().into_inner();

        // the rewritten header keeps the placeholder's size
        let movi = bytes.windows(4).position(|w| w == b"movi").unwrap();
        assert_eq!(movi as u64 + 4, placeholder_movi);

        let field = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let half = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let strf = bytes.windows(4).position(|w| w == b"strf").unwrap() + 8;
        assert_eq!(field(strf), BITMAP_INFO_HEADER_SIZE);
        assert_eq!(field(strf + 4), 4);
        assert_eq!(field(strf + 8), 2);
        assert_eq!(half(strf + 12), 1);
        assert_eq!(half(strf + 14), 32);
        assert_eq!(field(strf + 16), FourCC::MOTION_JPEG.as_u32());
        assert_eq!(field(strf + 20), 4 * 2 * 4);

        let strh = bytes.windows(4).position(|w| w == b"strh").unwrap() + 8;
        assert_eq!(&bytes[strh..strh + 4], b"vids");
        // frame rectangle right and bottom
        assert_eq!(half(strh + 52), 4);
        assert_eq!(half(strh + 54), 2);
    }

    #[test]
    fn rejects_streams_after_first_chunk() {
        let mut writer = AviWriter::new(Cursor::new(Vec::new()));
        let video = writer.add_video_stream(video_header(FourCC::UNCOMPRESSED)).unwrap();
        writer.write_chunk(video, &[0; 4], true).unwrap();
        let late = writer.add_audio_stream(AviAudioHeader {
            format: AudioStreamFormat::pcm(WaveFormat::pcm16(true)),
            name: "Late".to_string(),
        });
        assert!(matches!(late, Err(RecordingError::Container(_))));
        assert!(matches!(
            writer.write_chunk(7, &[0; 4], true),
            Err(RecordingError::UnknownStream(_))
        ));
    }

    #[test]
    fn finish_is_single_shot() {
        let mut writer = AviWriter::new(Cursor::new(Vec::new()));
        writer.add_video_stream(video_header(FourCC::UNCOMPRESSED)).unwrap();
        writer.finish().unwrap();
        assert!(matches!(writer.finish(), Err(RecordingError::WriterClosed)));
        assert!(matches!(
            writer.write_chunk(0, &[0; 4], true),
            Err(RecordingError::WriterClosed)
        ));

        let summary = read_summary(&mut Cursor::new(writer.into_inner().into_inner())).unwrap();
        assert_eq!(summary.total_frames, 0);
        assert_eq!(summary.video().unwrap().indexed_chunks, 0);
    }
}
