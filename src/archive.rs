//! The `.dat` archive container: an ordered, case-insensitive keyed
//! collection of entries sharing one backing byte source, either an owned
//! buffer or a read-only memory-mapped region.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use memmap2::Mmap;

use crate::Error;

/// Maximum entry name length in the legacy (13-byte) header format.
pub const MAX_NAME_LEN: usize = 13;

/// Which on-disk index layout to read or write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameFormat {
    /// 13-byte ASCII name, NUL-padded.
    Legacy13,
    /// 12-byte ASCII name followed by 20 unused bytes.
    New12Plus20,
}

impl NameFormat {
    fn entry_header_len(self) -> usize {
        match self {
            NameFormat::Legacy13 => 4 + 13,
            NameFormat::New12Plus20 => 4 + 12 + 20,
        }
    }
    fn name_field_len(self) -> usize {
        match self {
            NameFormat::Legacy13 => 13,
            NameFormat::New12Plus20 => 12,
        }
    }
}

/// One named byte range inside an [`Archive`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub offset: u32,
    pub length: u32,
}

enum BackingSource {
    InMemory(Vec<u8>),
    Mmap(Mmap),
}

impl BackingSource {
    fn as_slice(&self) -> &[u8] {
        match self {
            BackingSource::InMemory(v) => v,
            BackingSource::Mmap(m) => m,
        }
    }
    fn len(&self) -> usize {
        self.as_slice().len()
    }
}

/// An indexed `.dat` container. Construction accepts either an owned buffer
/// (mutable, patchable, savable) or a read-only memory-mapped region
/// (lookups only — [`Archive::patch`] and [`Archive::save`] are rejected).
pub struct Archive {
    backing: Option<BackingSource>,
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl Archive {
    /// Parse an in-memory buffer as a `.dat` archive.
    pub fn open_in_memory(buf: Vec<u8>) -> Result<Self, Error> {
        Self::open_in_memory_with_format(buf, NameFormat::Legacy13)
    }

    pub fn open_in_memory_with_format(buf: Vec<u8>, format: NameFormat) -> Result<Self, Error> {
        let entries = parse_index(&buf, format)?;
        let index = build_index(&entries);
        log::debug!("opened in-memory archive with {} entries", entries.len());
        Ok(Self { backing: Some(BackingSource::InMemory(buf)), entries, index })
    }

    /// Memory-map `path` and parse it as a read-only `.dat` archive.
    pub fn open_mmap(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open_mmap_with_format(path, NameFormat::Legacy13)
    }

    pub fn open_mmap_with_format(path: impl AsRef<Path>, format: NameFormat) -> Result<Self, Error> {
        let file = fs::File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let entries = parse_index(&mmap, format)?;
        let index = build_index(&entries);
        log::debug!("mapped read-only archive with {} entries", entries.len());
        Ok(Self { backing: Some(BackingSource::Mmap(mmap)), entries, index })
    }

    /// Build an in-memory archive by concatenating every regular file in
    /// `dir`, in directory-listing order.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir.as_ref())? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        let mut buf = Vec::new();
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            if name.len() > MAX_NAME_LEN {
                return Err(Error::NameTooLong(name));
            }
            let bytes = fs::read(dir.as_ref().join(&name))?;
            entries.push(Entry { name, offset: buf.len() as u32, length: bytes.len() as u32 });
            buf.extend_from_slice(&bytes);
        }
        let index = build_index(&entries);
        log::debug!("built in-memory archive from directory with {} entries", entries.len());
        Ok(Self { backing: Some(BackingSource::InMemory(buf)), entries, index })
    }

    fn backing(&self) -> Result<&BackingSource, Error> {
        self.backing.as_ref().ok_or(Error::Disposed)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }

    fn entry_index(&self, name: &str) -> Option<usize> {
        self.index.get(&name.to_ascii_lowercase()).copied()
    }

    /// A read-only view over `[entry.offset, entry.offset+entry.length)` of
    /// the backing source.
    pub fn get_entry_stream(&self, name: &str) -> Result<&[u8], Error> {
        let idx = self
            .entry_index(name)
            .ok_or_else(|| Error::MalformedFrame(format!("no such entry: {name}")))?;
        let entry = &self.entries[idx];
        let backing = self.backing()?;
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        backing
            .as_slice()
            .get(start..end)
            .ok_or(Error::InvalidRange { offset: start, count: entry.length as usize, len: backing.len() })
    }

    /// Append `payload`'s bytes to the end of the backing buffer. If an
    /// entry named `name` already exists, its record is replaced in place
    /// (preserving iteration order); otherwise a new entry is appended. Old
    /// bytes from a replaced entry are not reclaimed. Only valid on
    /// in-memory archives.
    pub fn patch(&mut self, name: &str, payload: &[u8]) -> Result<(), Error> {
        if name.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong(name.to_string()));
        }
        let buf = match self.backing.as_mut().ok_or(Error::Disposed)? {
            BackingSource::InMemory(v) => v,
            BackingSource::Mmap(_) => return Err(Error::ReadOnlyArchive),
        };
        let offset = buf.len() as u32;
        buf.extend_from_slice(payload);
        let new_entry = Entry { name: name.to_string(), offset, length: payload.len() as u32 };
        let key = name.to_ascii_lowercase();
        if let Some(&idx) = self.index.get(&key) {
            log::debug!("patching existing entry {name} in place");
            self.entries[idx] = new_entry;
        } else {
            log::debug!("patching new entry {name} at end of archive");
            self.index.insert(key, self.entries.len());
            self.entries.push(new_entry);
        }
        Ok(())
    }

    /// Write every entry as `dir/<name>`, verbatim.
    pub fn extract_to(&self, dir: impl AsRef<Path>) -> Result<(), Error> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        for entry in &self.entries {
            let bytes = self.get_entry_stream(&entry.name)?;
            fs::write(dir.join(&entry.name), bytes)?;
        }
        log::debug!("extracted {} entries to {}", self.entries.len(), dir.display());
        Ok(())
    }

    /// Re-pack every entry contiguously and write the canonical
    /// header/index followed by the concatenated payloads. Only valid on
    /// in-memory archives.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let bytes = self.serialize(NameFormat::Legacy13)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    fn serialize(&self, format: NameFormat) -> Result<Vec<u8>, Error> {
        let backing = self.backing()?;
        if matches!(backing, BackingSource::Mmap(_)) {
            return Err(Error::ReadOnlyArchive);
        }
        for entry in &self.entries {
            if entry.name.len() > MAX_NAME_LEN {
                return Err(Error::NameTooLong(entry.name.clone()));
            }
        }
        let header_len = 4 + self.entries.len() * format.entry_header_len() + 4;
        let mut out = Vec::with_capacity(header_len + self.entries.len() * 64);
        out.extend_from_slice(&((self.entries.len() as u32) + 1).to_le_bytes());

        let mut running_offset = header_len as u32;
        let mut payloads = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            out.extend_from_slice(&running_offset.to_le_bytes());
            let bytes = self.get_entry_stream(&entry.name)?;
            let mut name_field = vec![0u8; format.name_field_len()];
            name_field[..entry.name.len()].copy_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&name_field);
            if format == NameFormat::New12Plus20 {
                out.extend_from_slice(&[0u8; 20]);
            }
            payloads.push(bytes);
            running_offset += entry.length;
        }
        out.extend_from_slice(&running_offset.to_le_bytes());
        for bytes in payloads {
            out.extend_from_slice(bytes);
        }
        Ok(out)
    }

    /// Release the backing buffer or mapping. Subsequent calls fail with
    /// [`Error::Disposed`].
    pub fn close(&mut self) {
        self.backing = None;
    }
}

/// Build an in-memory archive from `from_dir`'s files and write it to
/// `to_path` in canonical form, in one step.
pub fn compile(from_dir: impl AsRef<Path>, to_path: impl AsRef<Path>) -> Result<(), Error> {
    let archive = Archive::from_directory(from_dir)?;
    archive.save(to_path)
}

fn build_index(entries: &[Entry]) -> HashMap<String, usize> {
    entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.name.to_ascii_lowercase(), i))
        .collect()
}

fn parse_index(buf: &[u8], format: NameFormat) -> Result<Vec<Entry>, Error> {
    if buf.len() < 4 {
        return Err(Error::MalformedFrame("archive too short for a header".into()));
    }
    let raw_count = read_u32(buf, 0)?;
    if raw_count == 0 {
        return Err(Error::MalformedFrame("archive entry count underflowed".into()));
    }
    let entry_count = (raw_count - 1) as usize;
    let name_len = format.name_field_len();

    let mut cursor = 4usize;
    let mut offsets = Vec::with_capacity(entry_count + 1);
    let mut names = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        let offset = read_u32(buf, cursor)?;
        cursor += 4;
        let raw_name = buf
            .get(cursor..cursor + name_len)
            .ok_or_else(|| Error::MalformedFrame("archive index truncated".into()))?;
        cursor += name_len;
        if format == NameFormat::New12Plus20 {
            cursor += 20;
        }
        let name_end = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
        let name = String::from_utf8_lossy(&raw_name[..name_end]).into_owned();
        offsets.push(offset);
        names.push(name);
    }
    // final sentinel record: an end-of-file offset, no name.
    let final_offset = read_u32(buf, cursor)?;
    offsets.push(final_offset);

    if final_offset as usize != buf.len() {
        return Err(Error::MalformedFrame(format!(
            "final offset {final_offset} does not match archive length {}",
            buf.len()
        )));
    }

    let mut entries = Vec::with_capacity(entry_count);
    let mut seen = HashMap::new();
    for i in 0..entry_count {
        let offset = offsets[i];
        let length = offsets[i + 1].checked_sub(offset).ok_or_else(|| {
            Error::MalformedFrame("entry offsets are not ascending".into())
        })?;
        let key = names[i].to_ascii_lowercase();
        if seen.insert(key, i).is_some() {
            return Err(Error::MalformedFrame(format!("duplicate entry name: {}", names[i])));
        }
        entries.push(Entry { name: names[i].clone(), offset, length });
    }
    Ok(entries)
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32, Error> {
    let bytes = buf
        .get(at..at + 4)
        .ok_or_else(|| Error::MalformedFrame("archive index truncated".into()))?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_legacy_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
        let format = NameFormat::Legacy13;
        let header_len = 4 + files.len() * format.entry_header_len() + 4;
        let mut out = Vec::new();
        out.extend_from_slice(&((files.len() as u32) + 1).to_le_bytes());
        let mut running = header_len as u32;
        for (name, bytes) in files {
            out.extend_from_slice(&running.to_le_bytes());
            let mut name_field = vec![0u8; 13];
            name_field[..name.len()].copy_from_slice(name.as_bytes());
            out.extend_from_slice(&name_field);
            running += bytes.len() as u32;
        }
        out.extend_from_slice(&running.to_le_bytes());
        for (_, bytes) in files {
            out.extend_from_slice(bytes);
        }
        out
    }

    #[test]
    fn zero_entry_archive_round_trips() {
        let buf = build_legacy_archive(&[]);
        // count(1) + final-offset(8) = 8 bytes total
        assert_eq!(buf.len(), 8);
        let archive = Archive::open_in_memory(buf).unwrap();
        assert_eq!(archive.entries().len(), 0);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let buf = build_legacy_archive(&[("a.txt", b"hello")]);
        let archive = Archive::open_in_memory(buf).unwrap();
        assert_eq!(archive.get_entry_stream("a.txt").unwrap(), b"hello");
        assert_eq!(archive.get_entry_stream("A.TXT").unwrap(), b"hello");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.dat");
        archive.save(&path).unwrap();

        let reloaded = Archive::open_in_memory(fs::read(&path).unwrap()).unwrap();
        assert_eq!(reloaded.entries().len(), 1);
        assert_eq!(reloaded.get_entry_stream("a.txt").unwrap(), b"hello");
        assert_eq!(reloaded.entries()[0].length, 5);
    }

    #[test]
    fn patch_new_entry_appends() {
        let buf = build_legacy_archive(&[("a.txt", b"hello")]);
        let mut archive = Archive::open_in_memory(buf).unwrap();
        archive.patch("b.txt", b"world").unwrap();
        assert_eq!(archive.entries().len(), 2);
        assert_eq!(archive.get_entry_stream("b.txt").unwrap(), b"world");
    }

    #[test]
    fn patch_preserves_entry_order() {
        let buf = build_legacy_archive(&[("a.txt", b"1"), ("b.txt", b"2"), ("c.txt", b"3")]);
        let mut archive = Archive::open_in_memory(buf).unwrap();
        archive.patch("b.txt", b"replaced").unwrap();
        let names: Vec<&str> = archive.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(archive.get_entry_stream("b.txt").unwrap(), b"replaced");
    }

    #[test]
    fn mmap_archive_rejects_patch_and_save() {
        let buf = build_legacy_archive(&[("a.txt", b"hello")]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.dat");
        fs::write(&path, &buf).unwrap();

        let mut archive = Archive::open_mmap(&path).unwrap();
        assert_eq!(archive.get_entry_stream("a.txt").unwrap(), b"hello");
        assert!(matches!(archive.patch("z", b"x"), Err(Error::ReadOnlyArchive)));
        assert!(matches!(archive.save(dir.path().join("out.dat")), Err(Error::ReadOnlyArchive)));
    }

    #[test]
    fn closed_archive_is_disposed() {
        let buf = build_legacy_archive(&[("a.txt", b"hello")]);
        let mut archive = Archive::open_in_memory(buf).unwrap();
        archive.close();
        assert!(matches!(archive.get_entry_stream("a.txt"), Err(Error::Disposed)));
    }

    #[test]
    fn name_too_long_on_patch() {
        let buf = build_legacy_archive(&[]);
        let mut archive = Archive::open_in_memory(buf).unwrap();
        let err = archive.patch("this_name_is_way_too_long.txt", b"x").unwrap_err();
        assert!(matches!(err, Error::NameTooLong(_)));
    }

    #[test]
    fn from_directory_matches_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one.txt"), b"one").unwrap();
        fs::write(dir.path().join("two.txt"), b"two").unwrap();
        let archive = Archive::from_directory(dir.path()).unwrap();
        let mut names: Vec<&str> = archive.entries().iter().map(|e| e.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["one.txt", "two.txt"]);
    }

    #[test]
    fn compile_builds_and_saves() {
        let src_dir = tempfile::tempdir().unwrap();
        fs::write(src_dir.path().join("one.txt"), b"one").unwrap();
        let dst = tempfile::tempdir().unwrap().path().join("out.dat");
        compile(src_dir.path(), &dst).unwrap();
        let archive = Archive::open_in_memory(fs::read(&dst).unwrap()).unwrap();
        assert_eq!(archive.get_entry_stream("one.txt").unwrap(), b"one");
    }

    #[test]
    fn truncated_header_is_malformed() {
        let err = Archive::open_in_memory(vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[test]
    fn mismatched_final_offset_is_malformed() {
        let mut buf = build_legacy_archive(&[("a.txt", b"hello")]);
        let last4 = buf.len() - 4;
        buf[last4..].copy_from_slice(&999u32.to_le_bytes());
        let err = Archive::open_in_memory(buf).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    fn build_new_format_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
        let format = NameFormat::New12Plus20;
        let header_len = 4 + files.len() * format.entry_header_len() + 4;
        let mut out = Vec::new();
        out.extend_from_slice(&((files.len() as u32) + 1).to_le_bytes());
        let mut running = header_len as u32;
        for (name, bytes) in files {
            out.extend_from_slice(&running.to_le_bytes());
            let mut name_field = vec![0u8; 12];
            name_field[..name.len()].copy_from_slice(name.as_bytes());
            out.extend_from_slice(&name_field);
            out.extend_from_slice(&[0u8; 20]);
            running += bytes.len() as u32;
        }
        out.extend_from_slice(&running.to_le_bytes());
        for (_, bytes) in files {
            out.extend_from_slice(bytes);
        }
        out
    }

    #[test]
    fn new_format_header_reads_12_byte_names_past_the_20_opaque_bytes() {
        let buf = build_new_format_archive(&[("item.spf", b"payload"), ("other.epf", b"more-bytes")]);
        let archive =
            Archive::open_in_memory_with_format(buf, NameFormat::New12Plus20).unwrap();
        assert_eq!(archive.entries().len(), 2);
        assert_eq!(archive.get_entry_stream("item.spf").unwrap(), b"payload");
        assert_eq!(archive.get_entry_stream("other.epf").unwrap(), b"more-bytes");
    }

    #[test]
    fn new_format_name_longer_than_12_bytes_is_not_confused_with_legacy() {
        // a name that fills all 12 bytes of the new-format field, with no
        // NUL terminator to strip.
        let buf = build_new_format_archive(&[("twelvebytesx", b"x")]);
        let archive =
            Archive::open_in_memory_with_format(buf, NameFormat::New12Plus20).unwrap();
        assert_eq!(archive.entries()[0].name, "twelvebytesx");
        assert_eq!(archive.get_entry_stream("twelvebytesx").unwrap(), b"x");
    }
}
