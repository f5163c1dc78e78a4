use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{DateTime, Datelike, Timelike, Utc};
use flate2::Crc;
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::{self, Write};

const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;

/// 2.0: deflate + data descriptors
const VERSION: u16 = 20;
const METHOD_DEFLATE: u16 = 8;

/// Bit 3: CRC and sizes follow the payload in a data descriptor
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// Bit 11: name is UTF-8
const FLAG_UTF8: u16 = 1 << 11;

struct CentralEntry {
    name: Vec<u8>,
    flags: u16,
    dos_time: u16,
    dos_date: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    offset: u32,
}

/// Counts bytes written through to the inner writer.
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Single-pass ZIP encoder for non-seekable sinks.
///
/// Every entry is written as local header, deflated payload and data
/// descriptor; sizes and checksums are only known after compression, so the
/// local header carries zeros and sets general-purpose bit 3. The central
/// directory is written by [`ZipStreamWriter::finish`].
///
/// ZIP64 is not supported: entries and offsets must fit 32 bits and the
/// archive may hold at most 65535 entries.
pub struct ZipStreamWriter<W: Write> {
    out: CountingWriter<W>,
    entries: Vec<CentralEntry>,
    compression: Compression,
}

impl<W: Write> ZipStreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            out: CountingWriter { inner, written: 0 },
            entries: Vec::new(),
            compression: Compression::best(),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.out.written
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Writes one complete entry: local header, deflated `contents`, data descriptor.
    pub fn write_entry(
        &mut self,
        name: &str,
        contents: &[u8],
        modified: DateTime<Utc>,
    ) -> io::Result<()> {
        if self.entries.len() >= u16::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "too many archive entries (ZIP64 unsupported)",
            ));
        }
        let offset = to_u32(self.out.written, "archive offset")?;
        let uncompressed_size = to_u32(contents.len() as u64, "entry size")?;

        let name_bytes = name.as_bytes().to_vec();
        let name_len = u16::try_from(name_bytes.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "entry name too long")
        })?;
        let mut flags = FLAG_DATA_DESCRIPTOR;
        if !name.is_ascii() {
            flags |= FLAG_UTF8;
        }
        let (dos_time, dos_date) = dos_timestamp(modified);

        // Local file header
        self.out.write_u32::<LittleEndian>(LOCAL_FILE_HEADER_SIGNATURE)?;
        self.out.write_u16::<LittleEndian>(VERSION)?;
        self.out.write_u16::<LittleEndian>(flags)?;
        self.out.write_u16::<LittleEndian>(METHOD_DEFLATE)?;
        self.out.write_u16::<LittleEndian>(dos_time)?;
        self.out.write_u16::<LittleEndian>(dos_date)?;
        self.out.write_u32::<LittleEndian>(0)?; // crc-32, deferred
        self.out.write_u32::<LittleEndian>(0)?; // compressed size, deferred
        self.out.write_u32::<LittleEndian>(0)?; // uncompressed size, deferred
        self.out.write_u16::<LittleEndian>(name_len)?;
        self.out.write_u16::<LittleEndian>(0)?; // extra field length
        self.out.write_all(&name_bytes)?;

        // Payload
        let payload_start = self.out.written;
        let mut crc = Crc::new();
        crc.update(contents);
        let mut encoder = DeflateEncoder::new(&mut self.out, self.compression);
        encoder.write_all(contents)?;
        encoder.finish()?;
        let compressed_size = to_u32(self.out.written - payload_start, "compressed size")?;
        let crc32 = crc.sum();

        // Data descriptor
        self.out.write_u32::<LittleEndian>(DATA_DESCRIPTOR_SIGNATURE)?;
        self.out.write_u32::<LittleEndian>(crc32)?;
        self.out.write_u32::<LittleEndian>(compressed_size)?;
        self.out.write_u32::<LittleEndian>(uncompressed_size)?;

        self.entries.push(CentralEntry {
            name: name_bytes,
            flags,
            dos_time,
            dos_date,
            crc32,
            compressed_size,
            uncompressed_size,
            offset,
        });
        Ok(())
    }

    /// Writes the central directory and end record, flushes, and returns the sink.
    pub fn finish(mut self) -> io::Result<W> {
        let directory_start = to_u32(self.out.written, "central directory offset")?;

        for entry in &self.entries {
            self.out.write_u32::<LittleEndian>(CENTRAL_DIRECTORY_SIGNATURE)?;
            self.out.write_u16::<LittleEndian>(VERSION)?; // made by
            self.out.write_u16::<LittleEndian>(VERSION)?; // needed to extract
            self.out.write_u16::<LittleEndian>(entry.flags)?;
            self.out.write_u16::<LittleEndian>(METHOD_DEFLATE)?;
            self.out.write_u16::<LittleEndian>(entry.dos_time)?;
            self.out.write_u16::<LittleEndian>(entry.dos_date)?;
            self.out.write_u32::<LittleEndian>(entry.crc32)?;
            self.out.write_u32::<LittleEndian>(entry.compressed_size)?;
            self.out.write_u32::<LittleEndian>(entry.uncompressed_size)?;
            self.out.write_u16::<LittleEndian>(entry.name.len() as u16)?;
            self.out.write_u16::<LittleEndian>(0)?; // extra field length
            self.out.write_u16::<LittleEndian>(0)?; // comment length
            self.out.write_u16::<LittleEndian>(0)?; // disk number start
            self.out.write_u16::<LittleEndian>(0)?; // internal attributes
            self.out.write_u32::<LittleEndian>(0)?; // external attributes
            self.out.write_u32::<LittleEndian>(entry.offset)?;
            self.out.write_all(&entry.name)?;
        }

        let directory_size = to_u32(
            self.out.written - u64::from(directory_start),
            "central directory size",
        )?;
        let count = self.entries.len() as u16;

        self.out.write_u32::<LittleEndian>(END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
        self.out.write_u16::<LittleEndian>(0)?; // this disk
        self.out.write_u16::<LittleEndian>(0)?; // disk with central directory
        self.out.write_u16::<LittleEndian>(count)?;
        self.out.write_u16::<LittleEndian>(count)?;
        self.out.write_u32::<LittleEndian>(directory_size)?;
        self.out.write_u32::<LittleEndian>(directory_start)?;
        self.out.write_u16::<LittleEndian>(0)?; // comment length

        self.out.flush()?;
        Ok(self.out.inner)
    }
}

fn to_u32(value: u64, what: &str) -> io::Result<u32> {
    u32::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} exceeds 4 GiB (ZIP64 unsupported)", what),
        )
    })
}

/// MS-DOS time and date. DOS dates start in 1980; earlier times are clamped.
fn dos_timestamp(time: DateTime<Utc>) -> (u16, u16) {
    if time.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let year = (time.year() - 1980).min(127) as u16;
    let date = (year << 9) | ((time.month() as u16) << 5) | time.day() as u16;
    let time = ((time.hour() as u16) << 11)
        | ((time.minute() as u16) << 5)
        | (time.second() as u16 / 2);
    (time, date)
}
