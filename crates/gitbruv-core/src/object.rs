use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::oid::{Oid, OID_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
            ObjectType::Commit => "commit",
            ObjectType::Tag => "tag",
        }
    }

    /// Type code used in packfile entry headers.
    pub fn pack_code(&self) -> u8 {
        match self {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
        }
    }

    pub fn from_pack_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ObjectType::Commit),
            2 => Some(ObjectType::Tree),
            3 => Some(ObjectType::Blob),
            4 => Some(ObjectType::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(Error::InvalidObjectType(s.to_string())),
        }
    }
}

/// A stored object: kind plus the exact bytes it was hashed from.
///
/// Trees, commits and tags are decoded on demand from `data`; the decoded
/// forms are read-only projections and never re-serialized for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitObject {
    oid: Oid,
    kind: ObjectType,
    data: Bytes,
}

impl GitObject {
    pub fn new(kind: ObjectType, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let oid = Oid::hash_object(kind.as_str(), &data);
        Self { oid, kind, data }
    }

    /// Builds an object whose oid the caller already computed over `data`.
    pub fn with_oid(oid: Oid, kind: ObjectType, data: impl Into<Bytes>) -> Self {
        Self {
            oid,
            kind,
            data: data.into(),
        }
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn kind(&self) -> ObjectType {
        self.kind
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_blob(&self) -> bool {
        self.kind == ObjectType::Blob
    }

    pub fn is_commit(&self) -> bool {
        self.kind == ObjectType::Commit
    }

    fn expect_kind(&self, expected: ObjectType) -> Result<()> {
        if self.kind != expected {
            return Err(Error::UnexpectedKind {
                oid: self.oid.to_hex(),
                expected: expected.as_str(),
                actual: self.kind.as_str(),
            });
        }
        Ok(())
    }

    pub fn to_tree(&self) -> Result<Tree> {
        self.expect_kind(ObjectType::Tree)?;
        Tree::parse(self.oid, &self.data)
    }

    pub fn to_commit(&self) -> Result<Commit> {
        self.expect_kind(ObjectType::Commit)?;
        Commit::parse(self.oid, &self.data)
    }

    pub fn to_tag(&self) -> Result<Tag> {
        self.expect_kind(ObjectType::Tag)?;
        Tag::parse(self.oid, &self.data)
    }

    /// `"<kind> <len>\0<data>"`, the payload of a loose object file.
    pub fn to_loose_format(&self) -> Vec<u8> {
        let header = format!("{} {}\0", self.kind, self.data.len());
        let mut out = Vec::with_capacity(header.len() + self.data.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_loose_format(raw: &[u8]) -> Result<Self> {
        let nul = raw.iter().position(|&b| b == 0).ok_or_else(|| {
            Error::InvalidObjectFormat("missing header terminator".to_string())
        })?;
        let header = std::str::from_utf8(&raw[..nul])
            .map_err(|e| Error::InvalidObjectFormat(e.to_string()))?;
        let (kind, len) = header
            .split_once(' ')
            .ok_or_else(|| Error::InvalidObjectFormat(format!("bad header: {}", header)))?;
        let kind = ObjectType::from_str(kind)?;
        let len: usize = len
            .parse()
            .map_err(|_| Error::InvalidObjectFormat(format!("bad size: {}", len)))?;
        let data = &raw[nul + 1..];
        if data.len() != len {
            return Err(Error::InvalidObjectFormat(format!(
                "size mismatch: header says {}, found {}",
                len,
                data.len()
            )));
        }
        Ok(Self::new(kind, Bytes::copy_from_slice(data)))
    }

    pub fn compress(&self) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&self.to_loose_format())
            .map_err(|e| Error::Compression(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| Error::Compression(e.to_string()))
    }

    pub fn decompress(compressed: &[u8]) -> Result<Self> {
        let mut decoder = ZlibDecoder::new(compressed);
        let mut raw = Vec::new();
        decoder
            .read_to_end(&mut raw)
            .map_err(|e| Error::Decompression(e.to_string()))?;
        Self::from_loose_format(&raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
    /// Submodule gitlink.
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeEntryMode {
    File,
    Executable,
    Symlink,
    Directory,
    Submodule,
}

impl TreeEntryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreeEntryMode::File => "100644",
            TreeEntryMode::Executable => "100755",
            TreeEntryMode::Symlink => "120000",
            TreeEntryMode::Directory => "40000",
            TreeEntryMode::Submodule => "160000",
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, TreeEntryMode::Directory)
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            TreeEntryMode::Directory => EntryKind::Tree,
            TreeEntryMode::Submodule => EntryKind::Commit,
            _ => EntryKind::Blob,
        }
    }
}

impl FromStr for TreeEntryMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "100644" | "100664" | "100640" => Ok(TreeEntryMode::File),
            "100755" => Ok(TreeEntryMode::Executable),
            "120000" => Ok(TreeEntryMode::Symlink),
            "040000" | "40000" => Ok(TreeEntryMode::Directory),
            "160000" => Ok(TreeEntryMode::Submodule),
            _ => Err(Error::InvalidObjectFormat(format!(
                "invalid tree entry mode: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub mode: TreeEntryMode,
    /// Display name; lossy when the stored name is not UTF-8.
    pub name: String,
    /// Name bytes exactly as stored in the tree object.
    pub raw_name: Vec<u8>,
    pub oid: Oid,
}

impl TreeEntry {
    pub fn new(mode: TreeEntryMode, name: impl Into<String>, oid: Oid) -> Self {
        let name = name.into();
        Self {
            mode,
            raw_name: name.as_bytes().to_vec(),
            name,
            oid,
        }
    }

    pub fn from_raw(mode: TreeEntryMode, raw_name: &[u8], oid: Oid) -> Self {
        Self {
            mode,
            name: String::from_utf8_lossy(raw_name).into_owned(),
            raw_name: raw_name.to_vec(),
            oid,
        }
    }

    pub fn file(name: impl Into<String>, oid: Oid) -> Self {
        Self::new(TreeEntryMode::File, name, oid)
    }

    pub fn directory(name: impl Into<String>, oid: Oid) -> Self {
        Self::new(TreeEntryMode::Directory, name, oid)
    }

    pub fn kind(&self) -> EntryKind {
        self.mode.kind()
    }
}

// Git orders tree entries by name, comparing directories as if their name
// ended with '/'.
fn git_tree_order(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    let a_name = a.raw_name.as_slice();
    let b_name = b.raw_name.as_slice();
    let common = a_name.len().min(b_name.len());
    match a_name[..common].cmp(&b_name[..common]) {
        Ordering::Equal => {}
        other => return other,
    }
    let tail = |name: &[u8], entry: &TreeEntry| -> Option<u8> {
        name.get(common)
            .copied()
            .or(if entry.mode.is_tree() { Some(b'/') } else { None })
    };
    tail(a_name, a).cmp(&tail(b_name, b))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub oid: Oid,
    pub entries: Vec<TreeEntry>,
    raw: Bytes,
}

impl Tree {
    /// Builds a tree in canonical git order; the oid covers the encoded form.
    pub fn new(entries: Vec<TreeEntry>) -> Self {
        let mut sorted = entries;
        sorted.sort_by(git_tree_order);
        let raw = Bytes::from(encode_tree_entries(&sorted));
        let oid = Oid::hash_object("tree", &raw);
        Self {
            oid,
            entries: sorted,
            raw,
        }
    }

    pub fn parse(oid: Oid, data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            let space_pos = data[pos..].iter().position(|&b| b == b' ').ok_or_else(|| {
                Error::InvalidObjectFormat("missing space in tree entry".to_string())
            })?;
            let mode_str = std::str::from_utf8(&data[pos..pos + space_pos])
                .map_err(|e| Error::InvalidObjectFormat(e.to_string()))?;
            let mode = TreeEntryMode::from_str(mode_str)?;
            pos += space_pos + 1;

            let null_pos = data[pos..].iter().position(|&b| b == 0).ok_or_else(|| {
                Error::InvalidObjectFormat("missing null in tree entry".to_string())
            })?;
            let name = &data[pos..pos + null_pos];
            pos += null_pos + 1;

            if pos + OID_LEN > data.len() {
                return Err(Error::InvalidObjectFormat(
                    "truncated tree entry oid".to_string(),
                ));
            }
            let entry_oid = Oid::from_slice(&data[pos..pos + OID_LEN])?;
            pos += OID_LEN;

            entries.push(TreeEntry::from_raw(mode, name, entry_oid));
        }

        Ok(Self {
            oid,
            entries,
            raw: Bytes::copy_from_slice(data),
        })
    }

    pub fn encode(&self) -> Bytes {
        self.raw.clone()
    }

    pub fn to_object(&self) -> GitObject {
        GitObject::with_oid(self.oid, ObjectType::Tree, self.encode())
    }

    pub fn find(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn blobs(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.iter().filter(|e| e.kind() == EntryKind::Blob)
    }

    pub fn trees(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.iter().filter(|e| e.mode.is_tree())
    }
}

fn encode_tree_entries(entries: &[TreeEntry]) -> Vec<u8> {
    let estimated_size = entries.iter().map(|e| 7 + e.raw_name.len() + 1 + OID_LEN).sum();
    let mut data = Vec::with_capacity(estimated_size);
    for entry in entries {
        data.extend_from_slice(entry.mode.as_str().as_bytes());
        data.push(b' ');
        data.extend_from_slice(&entry.raw_name);
        data.push(0);
        data.extend_from_slice(entry.oid.as_bytes());
    }
    data
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: i64,
    pub timezone: String,
}

impl Signature {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        timestamp: i64,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            timestamp,
            timezone: timezone.into(),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let email_start = s
            .find('<')
            .ok_or_else(|| Error::InvalidObjectFormat("missing < in signature".to_string()))?;
        let email_end = s
            .rfind('>')
            .filter(|&end| end > email_start)
            .ok_or_else(|| Error::InvalidObjectFormat("missing > in signature".to_string()))?;

        let name = s[..email_start].trim().to_string();
        let email = s[email_start + 1..email_end].to_string();

        let mut parts = s[email_end + 1..].split_whitespace();
        let timestamp: i64 = parts
            .next()
            .ok_or_else(|| Error::InvalidObjectFormat("missing timestamp".to_string()))?
            .parse()
            .map_err(|_| Error::InvalidObjectFormat("invalid timestamp".to_string()))?;
        let timezone = parts.next().unwrap_or("+0000").to_string();

        Ok(Self::new(name, email, timestamp, timezone))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <{}> {} {}",
            self.name, self.email, self.timestamp, self.timezone
        )
    }
}

/// Splits an object body into raw header lines and the message.
///
/// Continuation lines (leading space, e.g. inside `gpgsig`) are dropped.
fn split_headers(data: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let (head, message) = match data.windows(2).position(|w| w == b"\n\n") {
        Some(pos) => (&data[..pos], &data[pos + 2..]),
        None => (data, &data[data.len()..]),
    };
    let headers = head
        .split(|&b| b == b'\n')
        .filter(|line| !line.is_empty() && !line.starts_with(b" "))
        .collect();
    (headers, message)
}

fn find_header<'a>(headers: &[&'a [u8]], key: &[u8]) -> Option<&'a [u8]> {
    headers.iter().find_map(|&line| header_value(line, key))
}

fn header_value<'a>(line: &'a [u8], key: &[u8]) -> Option<&'a [u8]> {
    line.strip_prefix(key)?.strip_prefix(b" ")
}

fn header_oid(value: &[u8]) -> Result<Oid> {
    let hex = std::str::from_utf8(value)
        .map_err(|e| Error::InvalidObjectFormat(e.to_string()))?;
    Oid::from_hex(hex.trim())
}

/// Decodes header or message text, honouring a Latin-1 `encoding` header
/// and falling back to lossy UTF-8.
fn decode_text(raw: &[u8], encoding: Option<&[u8]>) -> String {
    if let Ok(text) = std::str::from_utf8(raw) {
        return text.to_string();
    }
    let latin1 = encoding.is_some_and(|enc| {
        let enc = String::from_utf8_lossy(enc).to_ascii_lowercase();
        matches!(enc.trim(), "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1")
    });
    if latin1 {
        raw.iter().map(|&b| b as char).collect()
    } else {
        String::from_utf8_lossy(raw).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub oid: Oid,
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub author: Signature,
    pub committer: Signature,
    /// Value of the `encoding` header, when present.
    pub encoding: Option<String>,
    pub message: String,
    /// Exact object body, so parsed commits re-encode to the same oid.
    #[serde(skip)]
    raw: Option<Bytes>,
}

impl Commit {
    pub fn new(
        tree: Oid,
        parents: Vec<Oid>,
        author: Signature,
        committer: Signature,
        message: impl Into<String>,
    ) -> Self {
        let mut commit = Self {
            oid: Oid::ZERO,
            tree,
            parents,
            author,
            committer,
            encoding: None,
            message: message.into(),
            raw: None,
        };
        let raw = commit.encode();
        commit.oid = Oid::hash_object("commit", &raw);
        commit.raw = Some(raw);
        commit
    }

    pub fn parse(oid: Oid, data: &[u8]) -> Result<Self> {
        let (headers, message) = split_headers(data);
        let encoding = find_header(&headers, b"encoding");

        let mut tree: Option<Oid> = None;
        let mut parents = Vec::new();
        let mut author: Option<Signature> = None;
        let mut committer: Option<Signature> = None;

        for line in headers {
            if let Some(rest) = header_value(line, b"tree") {
                tree = Some(header_oid(rest)?);
            } else if let Some(rest) = header_value(line, b"parent") {
                parents.push(header_oid(rest)?);
            } else if let Some(rest) = header_value(line, b"author") {
                author = Some(Signature::parse(&decode_text(rest, encoding))?);
            } else if let Some(rest) = header_value(line, b"committer") {
                committer = Some(Signature::parse(&decode_text(rest, encoding))?);
            }
        }

        Ok(Self {
            oid,
            tree: tree.ok_or_else(|| Error::InvalidObjectFormat("missing tree".to_string()))?,
            parents,
            author: author
                .ok_or_else(|| Error::InvalidObjectFormat("missing author".to_string()))?,
            committer: committer
                .ok_or_else(|| Error::InvalidObjectFormat("missing committer".to_string()))?,
            encoding: encoding.map(|enc| String::from_utf8_lossy(enc).into_owned()),
            message: decode_text(message, encoding),
            raw: Some(Bytes::copy_from_slice(data)),
        })
    }

    pub fn encode(&self) -> Bytes {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        let mut data = String::with_capacity(256 + self.message.len());
        data.push_str(&format!("tree {}\n", self.tree));
        for parent in &self.parents {
            data.push_str(&format!("parent {}\n", parent));
        }
        data.push_str(&format!("author {}\n", self.author));
        data.push_str(&format!("committer {}\n", self.committer));
        if let Some(encoding) = &self.encoding {
            data.push_str(&format!("encoding {}\n", encoding));
        }
        data.push('\n');
        data.push_str(&self.message);
        Bytes::from(data)
    }

    pub fn to_object(&self) -> GitObject {
        GitObject::with_oid(self.oid, ObjectType::Commit, self.encode())
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn first_parent(&self) -> Option<&Oid> {
        self.parents.first()
    }

    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub oid: Oid,
    pub object: Oid,
    pub target_type: ObjectType,
    pub name: String,
    pub tagger: Option<Signature>,
    pub message: String,
    #[serde(skip)]
    raw: Option<Bytes>,
}

impl Tag {
    pub fn new(
        object: Oid,
        target_type: ObjectType,
        name: impl Into<String>,
        tagger: Option<Signature>,
        message: impl Into<String>,
    ) -> Self {
        let mut tag = Self {
            oid: Oid::ZERO,
            object,
            target_type,
            name: name.into(),
            tagger,
            message: message.into(),
            raw: None,
        };
        let raw = tag.encode();
        tag.oid = Oid::hash_object("tag", &raw);
        tag.raw = Some(raw);
        tag
    }

    pub fn parse(oid: Oid, data: &[u8]) -> Result<Self> {
        let (headers, message) = split_headers(data);
        let encoding = find_header(&headers, b"encoding");

        let mut object = None;
        let mut target_type = None;
        let mut name = None;
        let mut tagger = None;

        for line in headers {
            if let Some(rest) = header_value(line, b"object") {
                object = Some(header_oid(rest)?);
            } else if let Some(rest) = header_value(line, b"type") {
                target_type = Some(ObjectType::from_str(decode_text(rest, None).trim())?);
            } else if let Some(rest) = header_value(line, b"tag") {
                name = Some(decode_text(rest, encoding));
            } else if let Some(rest) = header_value(line, b"tagger") {
                tagger = Some(Signature::parse(&decode_text(rest, encoding))?);
            }
        }

        Ok(Self {
            oid,
            object: object
                .ok_or_else(|| Error::InvalidObjectFormat("tag missing object".to_string()))?,
            target_type: target_type
                .ok_or_else(|| Error::InvalidObjectFormat("tag missing type".to_string()))?,
            name: name.unwrap_or_default(),
            tagger,
            message: decode_text(message, encoding),
            raw: Some(Bytes::copy_from_slice(data)),
        })
    }

    pub fn encode(&self) -> Bytes {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        let mut data = format!(
            "object {}\ntype {}\ntag {}\n",
            self.object, self.target_type, self.name
        );
        if let Some(tagger) = &self.tagger {
            data.push_str(&format!("tagger {}\n", tagger));
        }
        data.push('\n');
        data.push_str(&self.message);
        Bytes::from(data)
    }

    pub fn to_object(&self) -> GitObject {
        GitObject::with_oid(self.oid, ObjectType::Tag, self.encode())
    }
}
