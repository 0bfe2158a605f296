use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::process::Child;

use log::info;

use crate::elem::{Blob, Checkpoint, Commit, DumpState, Element, FileChange, Progress, Reset, Tag};
use crate::error::{FilterError, Result};
use crate::ids::{IdMap, Mark};
use crate::opts::Options;
use crate::parser::{ParsedItem, Parser};
use crate::serializer::StreamWriter;

pub type BlobCallback = Box<dyn FnMut(&mut Blob, &mut FilterContext) -> Result<()>>;
pub type CommitCallback = Box<dyn FnMut(&mut Commit, &mut FilterContext) -> Result<()>>;
pub type TagCallback = Box<dyn FnMut(&mut Tag, &mut FilterContext) -> Result<()>>;
pub type ResetCallback = Box<dyn FnMut(&mut Reset, &mut FilterContext) -> Result<()>>;
pub type ProgressCallback = Box<dyn FnMut(&mut Progress, &mut FilterContext) -> Result<()>>;
pub type CheckpointCallback = Box<dyn FnMut(&mut Checkpoint, &mut FilterContext) -> Result<()>>;
pub type ElementCallback = Box<dyn FnMut(&mut Element, &mut FilterContext) -> Result<()>>;

/// Optional hooks invoked for each parsed element, per-type first, then the
/// catch-all. Any hook may mutate the element, skip it, or insert fresh
/// elements ahead of it through the context.
#[derive(Default)]
pub struct Callbacks {
  pub blob: Option<BlobCallback>,
  pub commit: Option<CommitCallback>,
  pub tag: Option<TagCallback>,
  pub reset: Option<ResetCallback>,
  pub progress: Option<ProgressCallback>,
  pub checkpoint: Option<CheckpointCallback>,
  pub everything: Option<ElementCallback>,
}

/// Handed to callbacks alongside the element: the mark namespace plus the
/// insertion queue. References into it must not outlive the callback.
pub struct FilterContext<'a> {
  ids: &'a mut IdMap,
  inserts: &'a mut Vec<(Element, bool)>,
  stream_number: u32,
}

impl FilterContext<'_> {
  /// Allocate an unused mark.
  pub fn fresh(&mut self) -> Mark {
    self.ids.fresh()
  }

  /// Redirect references from `old` to `new`; with `transitive`, marks
  /// already resolving to `old` follow along.
  pub fn record_rename(&mut self, old: Mark, new: Mark, transitive: bool) {
    self.ids.record_rename(old, Some(new), transitive);
  }

  pub fn translate(&self, mark: Mark) -> Option<Mark> {
    self.ids.translate(mark)
  }

  /// Which `run()` pass is active (1-based; 0 before the first run).
  pub fn stream_number(&self) -> u32 {
    self.stream_number
  }

  /// Queue an element for emission immediately before the element whose
  /// callback is running. Returns its mark (0 for markless kinds).
  pub fn insert(&mut self, elem: impl Into<Element>) -> Mark {
    self.queue(elem.into(), false)
  }

  /// Like [`insert`](Self::insert), but the queued element bypasses the
  /// callback machinery; use this from a callback that would otherwise
  /// recurse into itself.
  pub fn insert_direct(&mut self, elem: impl Into<Element>) -> Mark {
    self.queue(elem.into(), true)
  }

  fn queue(&mut self, mut elem: Element, direct: bool) -> Mark {
    let mark = ensure_element_id(&mut elem, self.ids, self.stream_number);
    self.inserts.push((elem, direct));
    mark
  }
}

fn ensure_element_id(elem: &mut Element, ids: &mut IdMap, stream_number: u32) -> Mark {
  match elem {
    Element::Blob(b) => {
      if b.id == 0 {
        b.id = ids.fresh();
      }
      b.id
    }
    Element::Commit(c) => {
      if c.id == 0 {
        c.id = ids.fresh();
        // fresh host-built commits belong to the pass that inserts them;
        // held clones keep the stream they were parsed from
        if c.stream_number == 0 {
          c.stream_number = stream_number;
        }
      }
      c.id
    }
    // tag marks are optional on the wire and never auto-allocated
    Element::Tag(t) => t.id,
    _ => 0,
  }
}

/// The driver: pulls elements off one or more input streams, dispatches
/// callbacks, and feeds the serializer, keeping mark references coherent
/// across skips, renames, and spliced streams.
pub struct RepoFilter {
  opts: Options,
  callbacks: Callbacks,
  ids: IdMap,
  // per-commit file changes a descendant merge must restate (kept until
  // the driver ends; see the merge workaround in apply_merge_extras)
  extras: HashMap<Mark, Vec<FileChange>>,
  stream_number: u32,
  writer: StreamWriter,
  output_open: bool,
  importer: Option<Child>,
  exporter: Option<Child>,
  input_override: Option<Box<dyn BufRead>>,
  output_override: Option<Box<dyn Write>>,
  marks_floor_applied: bool,
  seen: u64,
  emitted: u64,
  skipped: u64,
}

impl RepoFilter {
  pub fn new(opts: Options, callbacks: Callbacks) -> Self {
    RepoFilter {
      opts,
      callbacks,
      ids: IdMap::new(),
      extras: HashMap::new(),
      stream_number: 0,
      writer: StreamWriter::new(Box::new(io::sink())),
      output_open: false,
      importer: None,
      exporter: None,
      input_override: None,
      output_override: None,
      marks_floor_applied: false,
      seen: 0,
      emitted: 0,
      skipped: 0,
    }
  }

  /// Use a pre-opened byte reader for the next `run()` instead of spawning
  /// an exporter.
  pub fn set_input(&mut self, input: Box<dyn BufRead>) {
    self.input_override = Some(input);
  }

  /// Use a pre-opened byte writer instead of spawning an importer. Must be
  /// called before the output side is first opened.
  pub fn set_output(&mut self, output: Box<dyn Write>) {
    self.output_override = Some(output);
  }

  /// Open only the downstream side, for programmatic stream synthesis via
  /// `insert` without any input pass.
  pub fn importer_only(&mut self) -> Result<()> {
    self.ensure_output()
  }

  /// Drive one pass from the configured source to the configured target.
  /// May be called repeatedly; each pass gets a fresh stream number and its
  /// raw marks are offset past everything already allocated.
  pub fn run(&mut self) -> Result<()> {
    self.ensure_output()?;
    self.apply_marks_floor()?;
    let input = self.open_input()?;
    self.stream_number += 1;
    let offset = self.ids.count();
    let result = self.pump(input, offset);
    match result {
      Ok(()) => {
        self.wait_exporter()?;
        if !self.opts.quiet {
          info!(
            "stream {} done: {} elements in, {} emitted, {} skipped",
            self.stream_number, self.seen, self.emitted, self.skipped
          );
        }
        Ok(())
      }
      Err(err) => {
        self.abort();
        Err(err)
      }
    }
  }

  fn pump(&mut self, input: Box<dyn BufRead>, offset: Mark) -> Result<()> {
    let mut parser = Parser::new(input, offset, self.stream_number)?;
    while let Some(item) = parser.next_item(&mut self.ids)? {
      match item {
        ParsedItem::Verbatim(line) => self.writer.write_verbatim(&line)?,
        ParsedItem::Elem(elem) => self.process(elem, false)?,
      }
    }
    Ok(())
  }

  /// Queue a fresh element for serialization at the next safe boundary and
  /// return its mark. Callbacks run on it as for parsed elements.
  pub fn insert(&mut self, elem: impl Into<Element>) -> Result<Mark> {
    self.insert_impl(elem.into(), false)
  }

  /// Like [`insert`](Self::insert) but bypassing the callback machinery.
  pub fn insert_direct(&mut self, elem: impl Into<Element>) -> Result<Mark> {
    self.insert_impl(elem.into(), true)
  }

  fn insert_impl(&mut self, mut elem: Element, direct: bool) -> Result<Mark> {
    self.ensure_output()?;
    let mark = ensure_element_id(&mut elem, &mut self.ids, self.stream_number);
    self.process(elem, direct)?;
    Ok(mark)
  }

  /// Close the downstream importer and wait for it.
  pub fn finish(&mut self) -> Result<()> {
    self.writer.flush()?;
    // dropping the writer closes the importer's stdin
    self.writer = StreamWriter::new(Box::new(io::sink()));
    if let Some(mut child) = self.importer.take() {
      let status = child.wait()?;
      if !status.success() {
        return Err(FilterError::DownstreamClosed(format!(
          "git fast-import exited with {status}"
        )));
      }
    }
    if !self.opts.quiet {
      info!(
        "finished: {} elements in, {} emitted, {} skipped",
        self.seen, self.emitted, self.skipped
      );
    }
    Ok(())
  }

  fn process(&mut self, mut elem: Element, direct: bool) -> Result<()> {
    self.seen += 1;
    let inserts = if direct { Vec::new() } else { self.run_callbacks(&mut elem)? };
    for (queued, queued_direct) in inserts {
      self.process(queued, queued_direct)?;
    }
    self.finalize(elem)
  }

  fn run_callbacks(&mut self, elem: &mut Element) -> Result<Vec<(Element, bool)>> {
    let mut inserts: Vec<(Element, bool)> = Vec::new();
    let mut ctx = FilterContext {
      ids: &mut self.ids,
      inserts: &mut inserts,
      stream_number: self.stream_number,
    };
    match elem {
      Element::Blob(b) => {
        if let Some(cb) = self.callbacks.blob.as_mut() {
          cb(b, &mut ctx)?;
        }
      }
      Element::Commit(c) => {
        if let Some(cb) = self.callbacks.commit.as_mut() {
          cb(c, &mut ctx)?;
        }
      }
      Element::Tag(t) => {
        if let Some(cb) = self.callbacks.tag.as_mut() {
          cb(t, &mut ctx)?;
        }
      }
      Element::Reset(r) => {
        if let Some(cb) = self.callbacks.reset.as_mut() {
          cb(r, &mut ctx)?;
        }
      }
      Element::Progress(p) => {
        if let Some(cb) = self.callbacks.progress.as_mut() {
          cb(p, &mut ctx)?;
        }
      }
      Element::Checkpoint(c) => {
        if let Some(cb) = self.callbacks.checkpoint.as_mut() {
          cb(c, &mut ctx)?;
        }
      }
    }
    if let Some(cb) = self.callbacks.everything.as_mut() {
      cb(elem, &mut ctx)?;
    }
    Ok(inserts)
  }

  fn finalize(&mut self, elem: Element) -> Result<()> {
    match elem {
      Element::Blob(mut b) => {
        if b.dumped == DumpState::Skipped {
          let key = b.old_id.unwrap_or(b.id);
          if key != 0 {
            self.ids.record_rename(key, None, true);
          }
          if b.old_id.is_some() && b.id != 0 {
            self.ids.record_rename(b.id, None, true);
          }
          self.skipped += 1;
          return Ok(());
        }
        if b.dumped == DumpState::Emitted {
          return Ok(());
        }
        if b.id == 0 {
          b.id = self.ids.fresh();
        }
        self.writer.write_blob(&mut b)?;
        self.emitted += 1;
        Ok(())
      }
      Element::Commit(mut c) => {
        // empty-commit policy: a non-merge commit that had changes on the
        // wire and lost them all is pruned onto its first parent
        if c.dumped == DumpState::Pending
          && !c.is_merge()
          && c.had_file_changes
          && c.file_changes.is_empty()
        {
          c.skip(None);
        }
        if c.dumped == DumpState::Skipped {
          let successor = c
            .skip_to
            .or_else(|| c.first_parent().and_then(|p| self.ids.translate(p)));
          if let Some(old) = c.old_id.filter(|&m| m != 0) {
            self.ids.record_rename(old, successor, true);
          }
          if c.id != 0 {
            self.ids.record_rename(c.id, successor, true);
          }
          self.skipped += 1;
          return Ok(());
        }
        if c.dumped == DumpState::Emitted {
          return Ok(());
        }
        if c.id == 0 {
          c.id = self.ids.fresh();
        }
        self.apply_merge_extras(&mut c);
        self.writer.write_commit(&mut c, &self.ids)?;
        self.emitted += 1;
        Ok(())
      }
      Element::Tag(mut t) => {
        if t.dumped == DumpState::Skipped {
          if t.id != 0 {
            self.ids.record_rename(t.id, None, true);
          }
          self.skipped += 1;
          return Ok(());
        }
        if t.dumped == DumpState::Emitted {
          return Ok(());
        }
        self.writer.write_tag(&mut t, &self.ids)?;
        if t.dumped == DumpState::Emitted {
          self.emitted += 1;
        } else {
          self.skipped += 1;
        }
        Ok(())
      }
      Element::Reset(mut r) => {
        if r.dumped != DumpState::Pending {
          self.skipped += 1;
          return Ok(());
        }
        self.writer.write_reset(&mut r, &self.ids)?;
        self.emitted += 1;
        Ok(())
      }
      Element::Progress(mut p) => {
        if p.dumped != DumpState::Pending {
          self.skipped += 1;
          return Ok(());
        }
        self.writer.write_progress(&mut p)?;
        self.emitted += 1;
        Ok(())
      }
      Element::Checkpoint(mut c) => {
        if c.dumped != DumpState::Pending {
          self.skipped += 1;
          return Ok(());
        }
        self.writer.write_checkpoint(&mut c)?;
        self.emitted += 1;
        Ok(())
      }
    }
  }

  // fast-import describes a merge's tree relative to its first parent
  // only. When streams are spliced, commits carried over from an earlier
  // stream have changes the importer never saw on the merged side, so
  // each emitted commit records the changes a descendant merge would need
  // to restate, and every merge pulls in its merge-parents' records.
  fn apply_merge_extras(&mut self, commit: &mut Commit) {
    if commit.stream_number != self.stream_number {
      self.extras.insert(commit.id, commit.file_changes.clone());
    }
    let mut merge_extras: Vec<FileChange> = Vec::new();
    for &parent in commit.parents.iter().skip(1) {
      if let Some(current) = self.ids.translate(parent) {
        if let Some(changes) = self.extras.get(&current) {
          merge_extras.extend(changes.iter().cloned());
        }
      }
    }
    commit.file_changes.extend(merge_extras.iter().cloned());
    if commit.stream_number == self.stream_number {
      let mut inherited: Vec<FileChange> = Vec::new();
      if let Some(first) = commit.first_parent().and_then(|p| self.ids.translate(p)) {
        if let Some(changes) = self.extras.get(&first) {
          inherited = changes.clone();
        }
      }
      inherited.extend(merge_extras);
      self.extras.insert(commit.id, inherited);
    }
  }

  fn ensure_output(&mut self) -> Result<()> {
    if self.output_open {
      return Ok(());
    }
    self.output_open = true;
    if self.opts.dry_run {
      return Ok(());
    }
    if let Some(out) = self.output_override.take() {
      self.writer = StreamWriter::new(out);
      return Ok(());
    }
    crate::pipes::prepare_target(&self.opts)?;
    let mut child = crate::pipes::build_fast_import_cmd(&self.opts)
      .spawn()
      .map_err(|e| {
        FilterError::DownstreamClosed(format!("failed to spawn git fast-import: {e}"))
      })?;
    let stdin = child
      .stdin
      .take()
      .ok_or_else(|| FilterError::DownstreamClosed("no stdin on git fast-import".into()))?;
    self.importer = Some(child);
    self.writer = StreamWriter::new(Box::new(BufWriter::new(stdin)));
    Ok(())
  }

  fn open_input(&mut self) -> Result<Box<dyn BufRead>> {
    if let Some(input) = self.input_override.take() {
      return Ok(input);
    }
    if let Some(path) = &self.opts.stream_override {
      let file = File::open(path)?;
      return Ok(Box::new(BufReader::new(file)));
    }
    if self.opts.stdin {
      return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let mut child = crate::pipes::build_fast_export_cmd(&self.opts)
      .spawn()
      .map_err(|e| FilterError::UpstreamClosed(format!("failed to spawn git fast-export: {e}")))?;
    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| FilterError::UpstreamClosed("no stdout on git fast-export".into()))?;
    self.exporter = Some(child);
    Ok(Box::new(BufReader::new(stdout)))
  }

  // Reserve the mark range an import-marks file already occupies, so fresh
  // marks never collide with persisted ones.
  fn apply_marks_floor(&mut self) -> Result<()> {
    if self.marks_floor_applied {
      return Ok(());
    }
    self.marks_floor_applied = true;
    let path = match &self.opts.import_marks {
      Some(path) => path.clone(),
      None => return Ok(()),
    };
    let contents = std::fs::read(&path)?;
    let mut floor: Mark = 0;
    for line in contents.split(|&b| b == b'\n') {
      let line = line.strip_suffix(b"\r").unwrap_or(line);
      if line.is_empty() {
        continue;
      }
      let digits: &[u8] = match line.strip_prefix(b":") {
        Some(rest) => rest.split(|&b| b == b' ').next().unwrap_or(rest),
        None => continue,
      };
      if digits.is_empty() || !digits.iter().all(|b| b.is_ascii_digit()) {
        continue;
      }
      let mut value: Mark = 0;
      for &b in digits {
        value = value.saturating_mul(10).saturating_add((b - b'0') as Mark);
      }
      floor = floor.max(value);
    }
    self.ids.raise_floor(floor);
    Ok(())
  }

  fn wait_exporter(&mut self) -> Result<()> {
    if let Some(mut child) = self.exporter.take() {
      let status = child.wait()?;
      if !status.success() {
        return Err(FilterError::UpstreamClosed(format!(
          "git fast-export exited with {status}"
        )));
      }
    }
    Ok(())
  }

  // Terminal failure: close the importer's input, stop both children,
  // reap them, and let the error surface. No rollback is attempted.
  fn abort(&mut self) {
    self.writer = StreamWriter::new(Box::new(io::sink()));
    if let Some(mut child) = self.importer.take() {
      let _ = child.kill();
      let _ = child.wait();
    }
    if let Some(mut child) = self.exporter.take() {
      let _ = child.kill();
      let _ = child.wait();
    }
  }
}
