use std::io::BufRead;

use log::warn;
use regex::bytes::Regex;

use crate::elem::{Blob, Commit, Element, FileChange, PersonIdent, Progress, Reset, Tag};
use crate::elem::{Checkpoint, DumpState};
use crate::error::{FilterError, Result};
use crate::ids::{IdMap, Mark};
use crate::pathutil::dequote_c_style_bytes;
use crate::reader::StreamReader;

/// One recognized unit of the input stream.
pub(crate) enum ParsedItem {
  Elem(Element),
  /// `feature`/`option` lines are forwarded without dispatch.
  Verbatim(Vec<u8>),
}

/// Recursive-descent parser over a cached current line. Every inbound mark
/// has the stream offset applied and is run through the rename map before
/// it is stored on an element.
pub(crate) struct Parser<R> {
  reader: StreamReader<R>,
  // current line, terminator included; empty at EOF
  nextline: Vec<u8>,
  id_offset: Mark,
  stream_number: u32,
  person_re: Regex,
}

impl<R: BufRead> Parser<R> {
  pub(crate) fn new(input: R, id_offset: Mark, stream_number: u32) -> Result<Self> {
    let mut parser = Parser {
      reader: StreamReader::new(input),
      nextline: Vec::new(),
      id_offset,
      stream_number,
      person_re: Regex::new(r"^(?:(.*?) )?<([^<>]*)> (.*)$").expect("static person pattern"),
    };
    parser.advance()?;
    Ok(parser)
  }

  fn advance(&mut self) -> Result<()> {
    self.nextline = self.reader.read_line()?;
    Ok(())
  }

  fn line_trimmed(&self) -> &[u8] {
    match self.nextline.last() {
      Some(b'\n') => &self.nextline[..self.nextline.len() - 1],
      _ => &self.nextline,
    }
  }

  fn starts_with(&self, prefix: &[u8]) -> bool {
    self.nextline.starts_with(prefix)
  }

  /// Next element or verbatim line; `None` once the stream is exhausted
  /// (EOF or a `done` marker, which is consumed but never forwarded).
  pub(crate) fn next_item(&mut self, ids: &mut IdMap) -> Result<Option<ParsedItem>> {
    loop {
      if self.nextline.is_empty() {
        return Ok(None);
      }
      if self.nextline == b"\n" {
        self.advance()?;
        continue;
      }
      if self.line_trimmed() == b"done" {
        self.advance()?;
        return Ok(None);
      }
      if self.line_trimmed() == b"feature done" {
        self.advance()?;
        continue;
      }
      if self.line_trimmed() == b"blob" {
        return Ok(Some(ParsedItem::Elem(self.parse_blob(ids)?)));
      }
      if self.starts_with(b"commit ") {
        return Ok(Some(ParsedItem::Elem(self.parse_commit(ids)?)));
      }
      if self.starts_with(b"tag ") {
        return Ok(Some(ParsedItem::Elem(self.parse_tag(ids)?)));
      }
      if self.starts_with(b"reset ") {
        return Ok(Some(ParsedItem::Elem(self.parse_reset(ids)?)));
      }
      if self.starts_with(b"progress ") {
        return Ok(Some(ParsedItem::Elem(self.parse_progress()?)));
      }
      if self.line_trimmed() == b"checkpoint" {
        self.advance()?;
        self.skip_optional_blank()?;
        return Ok(Some(ParsedItem::Elem(Element::Checkpoint(Checkpoint::new()))));
      }
      if self.starts_with(b"feature ") || self.starts_with(b"option ") {
        let line = self.nextline.clone();
        self.advance()?;
        return Ok(Some(ParsedItem::Verbatim(line)));
      }
      return Err(FilterError::UnknownElement(self.nextline.clone()));
    }
  }

  fn skip_optional_blank(&mut self) -> Result<()> {
    if self.nextline == b"\n" {
      self.advance()?;
    }
    Ok(())
  }

  /// `<refname> <ref>` header line, e.g. `commit refs/heads/main`.
  fn parse_ref_line(&mut self, keyword: &'static str, prefix: &[u8]) -> Result<Vec<u8>> {
    if !self.starts_with(prefix) {
      return Err(FilterError::MalformedStream { kind: keyword, line: self.nextline.clone() });
    }
    let rest = self.line_trimmed()[prefix.len()..].to_vec();
    self.advance()?;
    Ok(rest)
  }

  /// Optional `mark :<N>` line; the stream offset is applied to the value.
  fn parse_optional_mark(&mut self) -> Result<Option<Mark>> {
    if !self.starts_with(b"mark ") {
      return Ok(None);
    }
    let rest = &self.line_trimmed()[b"mark ".len()..];
    let mark = parse_mark_bytes(rest).ok_or_else(|| FilterError::BadMark(self.nextline.clone()))?;
    self.advance()?;
    Ok(Some(mark + self.id_offset))
  }

  fn parse_optional_original_oid(&mut self) -> Result<Option<Vec<u8>>> {
    if !self.starts_with(b"original-oid ") {
      return Ok(None);
    }
    let oid = self.line_trimmed()[b"original-oid ".len()..].to_vec();
    self.advance()?;
    Ok(Some(oid))
  }

  /// `from :<N>` / `merge :<N>`. The caller checks the prefix is present;
  /// the translated result is `None` when the referenced object was
  /// dropped.
  fn parse_baseref(&mut self, prefix: &[u8], ids: &IdMap) -> Result<Option<Mark>> {
    let rest = &self.line_trimmed()[prefix.len()..];
    let mark = parse_mark_bytes(rest).ok_or_else(|| FilterError::BadMark(self.nextline.clone()))?;
    self.advance()?;
    Ok(ids.translate(mark + self.id_offset))
  }

  /// `<keyword> NAME <EMAIL> DATE` identity line.
  fn parse_person(&mut self, keyword: &'static str, prefix: &[u8]) -> Result<PersonIdent> {
    let malformed = || FilterError::MalformedStream { kind: keyword, line: self.nextline.clone() };
    if !self.starts_with(prefix) {
      return Err(malformed());
    }
    let rest = &self.line_trimmed()[prefix.len()..];
    let caps = self.person_re.captures(rest).ok_or_else(malformed)?;
    let name = caps.get(1).map(|m| m.as_bytes().to_vec()).unwrap_or_default();
    let email = caps.get(2).map(|m| m.as_bytes().to_vec()).unwrap_or_default();
    let when = caps.get(3).map(|m| m.as_bytes().to_vec()).unwrap_or_default();
    self.advance()?;
    Ok(PersonIdent { name, email, when })
  }

  /// `data <N>` header plus exactly N payload bytes, then an optional LF.
  fn parse_data(&mut self) -> Result<Vec<u8>> {
    if !self.starts_with(b"data ") {
      return Err(FilterError::MalformedStream { kind: "data", line: self.nextline.clone() });
    }
    let size_bytes = &self.line_trimmed()[b"data ".len()..];
    let size = parse_decimal(size_bytes)
      .ok_or_else(|| FilterError::MalformedStream { kind: "data", line: self.nextline.clone() })?;
    let payload = self.reader.read_exact_len(size)?;
    self.advance()?;
    self.skip_optional_blank()?;
    Ok(payload)
  }

  fn parse_blob(&mut self, ids: &mut IdMap) -> Result<Element> {
    self.advance()?;
    let old_id = self.parse_optional_mark()?;
    let original_oid = self.parse_optional_original_oid()?;
    let data = self.parse_data()?;
    self.skip_optional_blank()?;

    let mut blob = Blob::new(data);
    blob.id = ids.fresh();
    blob.original_oid = original_oid;
    if let Some(old) = old_id {
      blob.old_id = Some(old);
      ids.record_rename(old, Some(blob.id), false);
    }
    Ok(Element::Blob(blob))
  }

  fn parse_commit(&mut self, ids: &mut IdMap) -> Result<Element> {
    let branch = self.parse_ref_line("commit", b"commit ")?;
    let old_id = self.parse_optional_mark()?;
    let original_oid = self.parse_optional_original_oid()?;

    let author = if self.starts_with(b"author ") {
      Some(self.parse_person("author", b"author ")?)
    } else {
      None
    };
    let committer = self.parse_person("committer", b"committer ")?;
    let author = author.unwrap_or_else(|| committer.clone());

    let encoding = if self.starts_with(b"encoding ") {
      let value = self.line_trimmed()[b"encoding ".len()..].to_vec();
      self.advance()?;
      Some(value)
    } else {
      None
    };

    let message = self.parse_data()?;

    let mut parents: Vec<Mark> = Vec::new();
    if self.starts_with(b"from ") {
      match self.parse_baseref(b"from ", ids)? {
        Some(parent) => parents.push(parent),
        None => warn!(
          "commit on {:?}: from-parent was dropped upstream",
          String::from_utf8_lossy(&branch)
        ),
      }
    }
    while self.starts_with(b"merge ") {
      match self.parse_baseref(b"merge ", ids)? {
        Some(parent) => parents.push(parent),
        None => warn!(
          "commit on {:?}: merge-parent was dropped upstream",
          String::from_utf8_lossy(&branch)
        ),
      }
    }

    let mut file_changes: Vec<FileChange> = Vec::new();
    let mut had_file_changes = false;
    loop {
      if self.starts_with(b"M ") {
        had_file_changes = true;
        if let Some(change) = self.parse_modify(ids)? {
          file_changes.push(change);
        }
      } else if self.starts_with(b"D ") {
        had_file_changes = true;
        let path = parse_path_field(&self.line_trimmed()[b"D ".len()..])
          .ok_or_else(|| FilterError::MalformedStream { kind: "filechange", line: self.nextline.clone() })?;
        self.advance()?;
        file_changes.push(FileChange::Delete { path });
      } else if self.line_trimmed() == b"deleteall" {
        had_file_changes = true;
        self.advance()?;
        file_changes.push(FileChange::DeleteAll);
      } else {
        break;
      }
    }
    self.skip_optional_blank()?;

    let mut commit = Commit::new(branch, author, committer, message, file_changes, parents);
    commit.id = ids.fresh();
    commit.original_oid = original_oid;
    commit.encoding = encoding;
    commit.stream_number = self.stream_number;
    commit.had_file_changes = had_file_changes;
    if let Some(old) = old_id {
      commit.old_id = Some(old);
      ids.record_rename(old, Some(commit.id), false);
    }
    Ok(Element::Commit(commit))
  }

  /// `M <mode> :<N> <path>`; yields `None` when the referenced blob was
  /// dropped, in which case the whole change is dropped too.
  fn parse_modify(&mut self, ids: &IdMap) -> Result<Option<FileChange>> {
    let malformed = || FilterError::MalformedStream { kind: "filechange", line: self.nextline.clone() };
    let rest = &self.line_trimmed()[b"M ".len()..];
    let space1 = rest.iter().position(|&b| b == b' ').ok_or_else(malformed)?;
    let mode = rest[..space1].to_vec();
    let rest = &rest[space1 + 1..];
    let space2 = rest.iter().position(|&b| b == b' ').ok_or_else(malformed)?;
    let dataref = &rest[..space2];
    if dataref.first() != Some(&b':') {
      // inline and sha datarefs never appear with a mark-emitting exporter
      return Err(malformed());
    }
    let raw = parse_mark_bytes(dataref).ok_or_else(|| FilterError::BadMark(self.nextline.clone()))?;
    let path = parse_path_field(&rest[space2 + 1..]).ok_or_else(malformed)?;
    let translated = ids.translate(raw + self.id_offset);
    self.advance()?;
    match translated {
      Some(blob) => Ok(Some(FileChange::Modify { mode, blob, path })),
      None => {
        warn!(
          "dropping file change for {:?}: blob :{} was skipped",
          String::from_utf8_lossy(&path),
          raw
        );
        Ok(None)
      }
    }
  }

  fn parse_tag(&mut self, ids: &mut IdMap) -> Result<Element> {
    let name = self.parse_ref_line("tag", b"tag ")?;
    let old_id = self.parse_optional_mark()?;
    if !self.starts_with(b"from ") {
      return Err(FilterError::MalformedStream { kind: "tag", line: self.nextline.clone() });
    }
    let from_ref = self.parse_baseref(b"from ", ids)?;
    let original_oid = self.parse_optional_original_oid()?;
    let tagger = if self.starts_with(b"tagger ") {
      Some(self.parse_person("tagger", b"tagger ")?)
    } else {
      None
    };
    let message = self.parse_data()?;
    self.skip_optional_blank()?;

    let mut tag = Tag::new(name, from_ref.unwrap_or(0), tagger, message);
    tag.original_oid = original_oid;
    if let Some(old) = old_id {
      tag.id = ids.fresh();
      ids.record_rename(old, Some(tag.id), false);
    }
    if from_ref.is_none() {
      // tagged object is gone, nothing valid to emit
      warn!(
        "skipping tag {:?}: tagged object was dropped",
        String::from_utf8_lossy(&tag.name)
      );
      tag.dumped = DumpState::Skipped;
    }
    Ok(Element::Tag(tag))
  }

  fn parse_reset(&mut self, ids: &mut IdMap) -> Result<Element> {
    let ref_name = self.parse_ref_line("reset", b"reset ")?;
    let from_ref = if self.starts_with(b"from ") {
      self.parse_baseref(b"from ", ids)?
    } else {
      None
    };
    self.skip_optional_blank()?;
    Ok(Element::Reset(Reset::new(ref_name, from_ref)))
  }

  fn parse_progress(&mut self) -> Result<Element> {
    let message = self.line_trimmed()[b"progress ".len()..].to_vec();
    self.advance()?;
    self.skip_optional_blank()?;
    Ok(Element::Progress(Progress::new(message)))
  }
}

/// `:<digits>` → mark value. Rejects empty digit runs and trailing junk.
fn parse_mark_bytes(bytes: &[u8]) -> Option<Mark> {
  let digits = bytes.strip_prefix(b":")?;
  parse_decimal(digits).and_then(|n| Mark::try_from(n).ok())
}

fn parse_decimal(digits: &[u8]) -> Option<usize> {
  if digits.is_empty() || !digits.iter().all(|b| b.is_ascii_digit()) {
    return None;
  }
  let mut value: usize = 0;
  for &b in digits {
    value = value.checked_mul(10)?.checked_add((b - b'0') as usize)?;
  }
  Some(value)
}

/// Path field at end of line: C-dequoted when it leads with `"`, raw bytes
/// (spaces included) otherwise.
fn parse_path_field(field: &[u8]) -> Option<Vec<u8>> {
  if field.first() == Some(&b'"') {
    let mut idx = 1usize;
    while idx < field.len() {
      if field[idx] == b'"' {
        let mut backslashes = 0usize;
        let mut j = idx;
        while j > 1 && field[j - 1] == b'\\' {
          backslashes += 1;
          j -= 1;
        }
        if backslashes % 2 == 1 {
          idx += 1;
          continue;
        }
        if idx + 1 != field.len() {
          return None; // junk after the closing quote
        }
        return Some(dequote_c_style_bytes(&field[1..idx]));
      }
      idx += 1;
    }
    None
  } else if field.is_empty() {
    None
  } else {
    Some(field.to_vec())
  }
}
