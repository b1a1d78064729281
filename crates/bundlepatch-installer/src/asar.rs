//! Reader for Electron's asar container.
//!
//! Layout: a 4-byte pickle holding the header size, the header pickle
//! (payload length, JSON length, JSON index padded to 4 bytes), then the file
//! data. File offsets in the index are decimal strings relative to the end of
//! the header. Entries flagged `unpacked` live next to the archive in
//! `<archive>.unpacked/`.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsarEntryKind {
    File {
        offset: u64,
        size: u64,
        unpacked: bool,
        executable: bool,
    },
    Directory,
    Link { target: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsarEntry {
    pub path: PathBuf,
    pub kind: AsarEntryKind,
}

#[derive(Debug)]
pub struct AsarArchive {
    path: PathBuf,
    index: Value,
    data_offset: u64,
    len: u64,
}

impl AsarArchive {
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut prefix = [0_u8; 16];
        file.read_exact(&mut prefix)
            .map_err(|err| invalid(format!("truncated asar header: {err}")))?;

        let size_pickle_len = read_u32(&prefix[0..4]);
        let header_pickle_len = u64::from(read_u32(&prefix[4..8]));
        let json_len = u64::from(read_u32(&prefix[12..16]));
        if size_pickle_len != 4 {
            return Err(invalid(format!(
                "unexpected asar size pickle length {size_pickle_len}"
            )));
        }
        if 16 + json_len > 8 + header_pickle_len {
            return Err(invalid(format!(
                "asar index length {json_len} exceeds header length {header_pickle_len}"
            )));
        }
        if 8 + header_pickle_len > len {
            return Err(invalid(format!(
                "asar header length {header_pickle_len} exceeds file size {len}"
            )));
        }

        let mut json = vec![0_u8; json_len as usize];
        file.read_exact(&mut json)
            .map_err(|err| invalid(format!("truncated asar index: {err}")))?;
        let index: Value = serde_json::from_slice(&json)
            .map_err(|err| invalid(format!("asar index is not valid JSON: {err}")))?;
        if !index.get("files").is_some_and(Value::is_object) {
            return Err(invalid("asar index has no root 'files' table".to_string()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            index,
            data_offset: 8 + header_pickle_len,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn unpacked_root(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".unpacked");
        PathBuf::from(name)
    }

    /// Every entry in the index, parents before children.
    pub fn entries(&self) -> io::Result<Vec<AsarEntry>> {
        let mut entries = Vec::new();
        if let Some(files) = self.index.get("files").and_then(Value::as_object) {
            collect_entries(files, Path::new(""), &mut entries)?;
        }
        Ok(entries)
    }

    pub fn read_file(&self, relative: &str) -> io::Result<Vec<u8>> {
        let mut node = &self.index;
        for part in relative.split('/').filter(|part| !part.is_empty()) {
            node = node
                .get("files")
                .and_then(|files| files.get(part))
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("{relative} is not in {}", self.path.display()),
                    )
                })?;
        }
        match parse_kind(node)? {
            AsarEntryKind::File {
                offset,
                size,
                unpacked,
                ..
            } => {
                if unpacked {
                    return fs::read(self.unpacked_root().join(relative));
                }
                self.read_packed(offset, size)
            }
            _ => Err(invalid(format!("{relative} is not a regular file"))),
        }
    }

    /// Writes the whole tree under `dst`; returns the number of files written.
    pub fn extract_to(&self, dst: &Path) -> io::Result<usize> {
        fs::create_dir_all(dst)?;
        let unpacked_root = self.unpacked_root();
        let mut written = 0;
        for entry in self.entries()? {
            let target = dst.join(&entry.path);
            match entry.kind {
                AsarEntryKind::Directory => fs::create_dir_all(&target)?,
                AsarEntryKind::Link { target: link } => {
                    debug!(path = %entry.path.display(), link = %link, "skipping asar link entry");
                }
                AsarEntryKind::File {
                    offset,
                    size,
                    unpacked,
                    executable,
                } => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    if unpacked {
                        fs::copy(unpacked_root.join(&entry.path), &target)?;
                    } else {
                        let mut out = File::create(&target)?;
                        self.copy_packed(offset, size, &mut out)?;
                        out.flush()?;
                    }
                    if executable {
                        mark_executable(&target)?;
                    }
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    fn read_packed(&self, offset: u64, size: u64) -> io::Result<Vec<u8>> {
        let mut content = Vec::new();
        self.copy_packed(offset, size, &mut content)?;
        Ok(content)
    }

    /// Streams one packed file into `out` after checking its extent against
    /// the archive length, so a forged size never drives an allocation.
    fn copy_packed<W: Write>(&self, offset: u64, size: u64, out: &mut W) -> io::Result<()> {
        let start = self.data_offset.checked_add(offset);
        match start.and_then(|start| start.checked_add(size)) {
            Some(end) if end <= self.len => {}
            _ => {
                return Err(invalid(format!(
                    "asar entry at offset {offset} with size {size} runs past the end of the archive ({} bytes)",
                    self.len
                )))
            }
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.data_offset + offset))?;
        let copied = io::copy(&mut file.take(size), out)?;
        if copied != size {
            return Err(invalid(format!(
                "asar data section truncated: expected {size} bytes, got {copied}"
            )));
        }
        Ok(())
    }
}

fn collect_entries(
    files: &Map<String, Value>,
    parent: &Path,
    entries: &mut Vec<AsarEntry>,
) -> io::Result<()> {
    for (name, node) in files {
        validate_entry_name(name)?;
        let path = parent.join(name);
        let kind = parse_kind(node)?;
        let children = node.get("files").and_then(Value::as_object);
        entries.push(AsarEntry {
            path: path.clone(),
            kind,
        });
        if let Some(children) = children {
            collect_entries(children, &path, entries)?;
        }
    }
    Ok(())
}

fn parse_kind(node: &Value) -> io::Result<AsarEntryKind> {
    if node.get("files").is_some_and(Value::is_object) {
        return Ok(AsarEntryKind::Directory);
    }
    if let Some(target) = node.get("link").and_then(Value::as_str) {
        return Ok(AsarEntryKind::Link {
            target: target.to_string(),
        });
    }

    let size = node
        .get("size")
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid("asar file entry has no size".to_string()))?;
    let unpacked = node.get("unpacked").and_then(Value::as_bool).unwrap_or(false);
    let executable = node
        .get("executable")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let offset = if unpacked {
        0
    } else {
        match node.get("offset") {
            Some(Value::String(raw)) => raw
                .parse::<u64>()
                .map_err(|_| invalid(format!("asar offset is not a number: {raw}")))?,
            Some(Value::Number(number)) => number
                .as_u64()
                .ok_or_else(|| invalid("asar offset is negative".to_string()))?,
            _ => return Err(invalid("asar file entry has no offset".to_string())),
        }
    };

    Ok(AsarEntryKind::File {
        offset,
        size,
        unpacked,
        executable,
    })
}

fn validate_entry_name(name: &str) -> io::Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(invalid(format!("unsafe asar entry name '{name}'")));
    }
    Ok(())
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0_u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
