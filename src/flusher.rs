//! Flush boundary of the inverted index.
//!
//! [`Flusher`] is the storage-side collaborator the index hands its contents to. The index calls
//! it tag key by tag key in ascending key order: every `flush_tag_value` of a key first, then one
//! `flush_tag_key_id` closing that key's section.
//!
//! [`SectionFlusher`] is a reference writer producing one checksummed section per tag key:
//!
//! ```text
//! file    := MAGIC (4) | VERSION (u32 LE) | section*
//! section := body_len (u32 LE) | body | footer_len (u32 LE) | footer | crc32 (u32 LE)
//! body    := (tag_value_id (u32 LE) | encoded bitmap)*
//! footer  := bincode(SectionFooter)
//! ```
//!
//! The CRC covers body and footer.

use crate::bitmap::{decode_bitmap, encode_bitmap, SeriesIdBitmap};
use crate::error::IndexError;
use crate::types::{TagKeyId, TagValueId};
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use std::io::Write;

pub const MAGIC: &[u8; 4] = b"TIDX";
pub const FORMAT_VERSION: u32 = 1;

/// Receives the contents of an inverted index during flush.
pub trait Flusher {
    /// Buffers the series of one tag value under the tag key currently being flushed.
    fn flush_tag_value(
        &mut self,
        tag_value_id: TagValueId,
        series_ids: &SeriesIdBitmap,
    ) -> Result<(), IndexError>;

    /// Closes the section of `tag_key_id`, covering every tag value flushed since the last call.
    fn flush_tag_key_id(&mut self, tag_key_id: TagKeyId) -> Result<(), IndexError>;
}

impl<F: Flusher + ?Sized> Flusher for &mut F {
    fn flush_tag_value(
        &mut self,
        tag_value_id: TagValueId,
        series_ids: &SeriesIdBitmap,
    ) -> Result<(), IndexError> {
        (**self).flush_tag_value(tag_value_id, series_ids)
    }

    fn flush_tag_key_id(&mut self, tag_key_id: TagKeyId) -> Result<(), IndexError> {
        (**self).flush_tag_key_id(tag_key_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionFooter {
    pub tag_key_id: TagKeyId,
    pub tag_value_count: u32,
    /// Distinct series across the section's tag values.
    pub series_count: u64,
}

/// One decoded tag key section.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushedSection {
    pub tag_key_id: TagKeyId,
    pub values: Vec<(TagValueId, SeriesIdBitmap)>,
    pub series_count: u64,
}

/// Writes tag key sections to any `Write` sink.
///
/// Rejects a tag key that is not strictly greater than the previously closed one.
#[derive(Debug)]
pub struct SectionFlusher<W: Write> {
    writer: W,
    body: Vec<u8>,
    tag_value_count: u32,
    section_series: SeriesIdBitmap,
    last_tag_key_id: Option<TagKeyId>,
    sections_written: usize,
}

impl<W: Write> SectionFlusher<W> {
    /// Wraps `writer` and writes the file header.
    pub fn new(mut writer: W) -> Result<Self, IndexError> {
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        Ok(Self {
            writer,
            body: Vec::new(),
            tag_value_count: 0,
            section_series: SeriesIdBitmap::new(),
            last_tag_key_id: None,
            sections_written: 0,
        })
    }

    pub fn sections_written(&self) -> usize {
        self.sections_written
    }

    /// Flushes the sink and returns it. Tag values not yet closed by a tag key are an error.
    pub fn finish(mut self) -> Result<W, IndexError> {
        if self.tag_value_count > 0 {
            return Err(IndexError::FlushIo(format!(
                "{} tag values flushed without a closing tag key",
                self.tag_value_count
            )));
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> Flusher for SectionFlusher<W> {
    fn flush_tag_value(
        &mut self,
        tag_value_id: TagValueId,
        series_ids: &SeriesIdBitmap,
    ) -> Result<(), IndexError> {
        self.body.extend_from_slice(&tag_value_id.to_le_bytes());
        self.body.extend_from_slice(&encode_bitmap(series_ids)?);
        self.section_series |= series_ids;
        self.tag_value_count += 1;
        Ok(())
    }

    fn flush_tag_key_id(&mut self, tag_key_id: TagKeyId) -> Result<(), IndexError> {
        if let Some(last) = self.last_tag_key_id {
            if tag_key_id <= last {
                return Err(IndexError::FlushIo(format!(
                    "tag key {} flushed after {}; keys must be strictly ascending",
                    tag_key_id, last
                )));
            }
        }

        let footer = bincode::serialize(&SectionFooter {
            tag_key_id,
            tag_value_count: self.tag_value_count,
            series_count: self.section_series.len(),
        })?;
        let body_len = section_len(self.body.len())?;
        let footer_len = section_len(footer.len())?;

        let mut h = Crc32::new();
        h.update(&self.body);
        h.update(&footer);
        let crc = h.finalize();

        self.writer.write_all(&body_len.to_le_bytes())?;
        self.writer.write_all(&self.body)?;
        self.writer.write_all(&footer_len.to_le_bytes())?;
        self.writer.write_all(&footer)?;
        self.writer.write_all(&crc.to_le_bytes())?;

        self.body.clear();
        self.tag_value_count = 0;
        self.section_series.clear();
        self.last_tag_key_id = Some(tag_key_id);
        self.sections_written += 1;
        Ok(())
    }
}

fn section_len(len: usize) -> Result<u32, IndexError> {
    len.try_into()
        .map_err(|_| IndexError::FlushIo(format!("section too large: {} bytes", len)))
}

/// Reads every section of a file written by [`SectionFlusher`], verifying checksums, footer
/// counts and ascending tag key order.
pub fn read_sections(buf: &[u8]) -> Result<Vec<FlushedSection>, IndexError> {
    let mut cursor = Cursor { buf, pos: 0 };
    if cursor.take(4)? != MAGIC {
        return Err(corruption("bad magic"));
    }
    let version = cursor.u32()?;
    if version != FORMAT_VERSION {
        return Err(corruption(&format!("unsupported format version {}", version)));
    }

    let mut sections = Vec::new();
    let mut last_tag_key_id: Option<TagKeyId> = None;
    while !cursor.is_empty() {
        let body_len = cursor.u32()? as usize;
        let body = cursor.take(body_len)?;
        let footer_len = cursor.u32()? as usize;
        let footer_bytes = cursor.take(footer_len)?;
        let crc = cursor.u32()?;

        let mut h = Crc32::new();
        h.update(body);
        h.update(footer_bytes);
        if h.finalize() != crc {
            return Err(corruption(&format!(
                "section checksum mismatch at offset {}",
                cursor.pos
            )));
        }

        let footer: SectionFooter = bincode::deserialize(footer_bytes)?;
        if let Some(last) = last_tag_key_id {
            if footer.tag_key_id <= last {
                return Err(corruption(&format!(
                    "tag key {} follows {}",
                    footer.tag_key_id, last
                )));
            }
        }
        last_tag_key_id = Some(footer.tag_key_id);

        let values = decode_body(body)?;
        if values.len() != footer.tag_value_count as usize {
            return Err(corruption(&format!(
                "tag key {}: footer declares {} tag values, body holds {}",
                footer.tag_key_id,
                footer.tag_value_count,
                values.len()
            )));
        }
        sections.push(FlushedSection {
            tag_key_id: footer.tag_key_id,
            values,
            series_count: footer.series_count,
        });
    }
    Ok(sections)
}

fn decode_body(body: &[u8]) -> Result<Vec<(TagValueId, SeriesIdBitmap)>, IndexError> {
    let mut cursor = Cursor { buf: body, pos: 0 };
    let mut values = Vec::new();
    while !cursor.is_empty() {
        let tag_value_id = cursor.u32()?;
        let (bitmap, used) = decode_bitmap(cursor.rest())?;
        cursor.pos += used;
        values.push((tag_value_id, bitmap));
    }
    Ok(values)
}

fn corruption(details: &str) -> IndexError {
    IndexError::Corruption {
        details: details.to_string(),
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], IndexError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| corruption(&format!("truncated at offset {}", self.pos)))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, IndexError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
