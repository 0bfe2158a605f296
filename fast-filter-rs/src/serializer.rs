use std::io::{self, Write};

use log::warn;

use crate::elem::{Blob, Checkpoint, Commit, DumpState, FileChange, PersonIdent, Progress, Reset, Tag};
use crate::error::{FilterError, Result};
use crate::ids::IdMap;
use crate::pathutil::encode_path_bytes;

/// Writes elements back out in fast-import grammar. Every outbound mark
/// reference passes through the rename map at emit time; the mark integers
/// printed after `mark :` are the elements' freshly allocated ids.
pub(crate) struct StreamWriter {
  out: Box<dyn Write>,
}

impl StreamWriter {
  pub(crate) fn new(out: Box<dyn Write>) -> Self {
    StreamWriter { out }
  }

  fn put(&mut self, bytes: &[u8]) -> Result<()> {
    self.out.write_all(bytes).map_err(downstream)
  }

  pub(crate) fn flush(&mut self) -> Result<()> {
    self.out.flush().map_err(downstream)
  }

  pub(crate) fn write_verbatim(&mut self, line: &[u8]) -> Result<()> {
    self.put(line)
  }

  pub(crate) fn write_blob(&mut self, blob: &mut Blob) -> Result<()> {
    blob.dumped = DumpState::Emitted;
    self.put(b"blob\n")?;
    self.put(format!("mark :{}\n", blob.id).as_bytes())?;
    self.put(format!("data {}\n", blob.data.len()).as_bytes())?;
    self.put(&blob.data)?;
    self.put(b"\n")
  }

  fn put_person(&mut self, keyword: &[u8], person: &PersonIdent) -> Result<()> {
    self.put(keyword)?;
    self.put(b" ")?;
    if !person.name.is_empty() {
      self.put(&person.name)?;
      self.put(b" ")?;
    }
    self.put(b"<")?;
    self.put(&person.email)?;
    self.put(b"> ")?;
    self.put(&person.when)?;
    self.put(b"\n")
  }

  // message payload plus the separating LF the line grammar needs
  fn put_data(&mut self, payload: &[u8]) -> Result<()> {
    self.put(format!("data {}\n", payload.len()).as_bytes())?;
    self.put(payload)?;
    if payload.last() != Some(&b'\n') {
      self.put(b"\n")?;
    }
    Ok(())
  }

  pub(crate) fn write_commit(&mut self, commit: &mut Commit, ids: &IdMap) -> Result<()> {
    commit.dumped = DumpState::Emitted;
    self.put(b"commit ")?;
    self.put(&commit.branch)?;
    self.put(b"\n")?;
    self.put(format!("mark :{}\n", commit.id).as_bytes())?;
    self.put_person(b"author", &commit.author)?;
    self.put_person(b"committer", &commit.committer)?;
    if let Some(encoding) = &commit.encoding {
      self.put(b"encoding ")?;
      self.put(encoding)?;
      self.put(b"\n")?;
    }
    self.put_data(&commit.message)?;

    let mut parents = Vec::with_capacity(commit.parents.len());
    for &p in &commit.parents {
      match ids.translate(p) {
        Some(t) => parents.push(t),
        None => warn!("commit :{}: parent :{} was dropped, omitting it", commit.id, p),
      }
    }
    for (idx, parent) in parents.iter().enumerate() {
      let keyword: &[u8] = if idx == 0 { b"from :" } else { b"merge :" };
      self.put(keyword)?;
      self.put(format!("{parent}\n").as_bytes())?;
    }

    // deleteall resets the tree, so it must precede every other change
    if commit.file_changes.iter().any(|c| matches!(c, FileChange::DeleteAll)) {
      self.put(b"deleteall\n")?;
    }
    for change in &commit.file_changes {
      match change {
        FileChange::DeleteAll => {}
        FileChange::Modify { mode, blob, path } => {
          let blob = match ids.translate(*blob) {
            Some(b) => b,
            // blob went away after this commit was parsed
            None => continue,
          };
          self.put(b"M ")?;
          self.put(mode)?;
          self.put(format!(" :{blob} ").as_bytes())?;
          self.put(&encode_path_bytes(path))?;
          self.put(b"\n")?;
        }
        FileChange::Delete { path } => {
          self.put(b"D ")?;
          self.put(&encode_path_bytes(path))?;
          self.put(b"\n")?;
        }
      }
    }
    self.put(b"\n")
  }

  pub(crate) fn write_tag(&mut self, tag: &mut Tag, ids: &IdMap) -> Result<()> {
    let target = match ids.translate(tag.from_ref) {
      Some(t) => t,
      None => {
        warn!(
          "skipping tag {:?}: tagged object was dropped",
          String::from_utf8_lossy(&tag.name)
        );
        tag.dumped = DumpState::Skipped;
        return Ok(());
      }
    };
    tag.dumped = DumpState::Emitted;
    self.put(b"tag ")?;
    self.put(&tag.name)?;
    self.put(b"\n")?;
    if tag.id != 0 {
      self.put(format!("mark :{}\n", tag.id).as_bytes())?;
    }
    self.put(format!("from :{target}\n").as_bytes())?;
    if let Some(tagger) = &tag.tagger {
      self.put_person(b"tagger", tagger)?;
    }
    self.put_data(&tag.message)
  }

  pub(crate) fn write_reset(&mut self, reset: &mut Reset, ids: &IdMap) -> Result<()> {
    reset.dumped = DumpState::Emitted;
    self.put(b"reset ")?;
    self.put(&reset.ref_name)?;
    self.put(b"\n")?;
    if let Some(from) = reset.from_ref.and_then(|m| ids.translate(m)) {
      self.put(format!("from :{from}\n").as_bytes())?;
      self.put(b"\n")?;
    }
    Ok(())
  }

  pub(crate) fn write_progress(&mut self, progress: &mut Progress) -> Result<()> {
    progress.dumped = DumpState::Emitted;
    self.put(b"progress ")?;
    self.put(&progress.message)?;
    self.put(b"\n\n")
  }

  pub(crate) fn write_checkpoint(&mut self, checkpoint: &mut Checkpoint) -> Result<()> {
    checkpoint.dumped = DumpState::Emitted;
    self.put(b"checkpoint\n\n")
  }
}

fn downstream(err: io::Error) -> FilterError {
  if err.kind() == io::ErrorKind::BrokenPipe {
    FilterError::DownstreamClosed("pipe closed while writing".to_string())
  } else {
    FilterError::Io(err)
  }
}
