use crate::ids::Mark;

/// Lifecycle of an element between parse/construction and serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpState {
  Pending,
  Emitted,
  Skipped,
}

/// Author/committer/tagger identity. `when` keeps the raw
/// `"<seconds> <+/-hhmm>"` bytes so round-tripping never normalizes
/// offsets; see [`crate::date`] for parse/format helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonIdent {
  pub name: Vec<u8>,
  pub email: Vec<u8>,
  pub when: Vec<u8>,
}

impl PersonIdent {
  pub fn new(name: impl Into<Vec<u8>>, email: impl Into<Vec<u8>>, when: impl Into<Vec<u8>>) -> Self {
    PersonIdent { name: name.into(), email: email.into(), when: when.into() }
  }
}

/// One per-commit tree operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
  Modify { mode: Vec<u8>, blob: Mark, path: Vec<u8> },
  Delete { path: Vec<u8> },
  DeleteAll,
}

impl FileChange {
  pub fn modify(mode: impl Into<Vec<u8>>, blob: Mark, path: impl Into<Vec<u8>>) -> Self {
    FileChange::Modify { mode: mode.into(), blob, path: path.into() }
  }

  pub fn delete(path: impl Into<Vec<u8>>) -> Self {
    FileChange::Delete { path: path.into() }
  }

  pub fn delete_all() -> Self {
    FileChange::DeleteAll
  }
}

#[derive(Debug, Clone)]
pub struct Blob {
  /// Freshly allocated mark; 0 until the element enters a driver.
  pub id: Mark,
  /// Inbound mark (offset applied) when the blob came off a stream.
  pub old_id: Option<Mark>,
  /// Value of an `original-oid` line, when the exporter provided one.
  pub original_oid: Option<Vec<u8>>,
  pub data: Vec<u8>,
  pub dumped: DumpState,
}

impl Blob {
  pub fn new(data: impl Into<Vec<u8>>) -> Self {
    Blob {
      id: 0,
      old_id: None,
      original_oid: None,
      data: data.into(),
      dumped: DumpState::Pending,
    }
  }

  /// Drop this blob from the output. File-changes referencing it are
  /// dropped from their commits as well.
  pub fn skip(&mut self) {
    self.dumped = DumpState::Skipped;
  }
}

#[derive(Debug, Clone)]
pub struct Commit {
  pub id: Mark,
  pub old_id: Option<Mark>,
  pub original_oid: Option<Vec<u8>>,
  pub branch: Vec<u8>,
  pub author: PersonIdent,
  pub committer: PersonIdent,
  pub encoding: Option<Vec<u8>>,
  pub message: Vec<u8>,
  pub file_changes: Vec<FileChange>,
  /// Ordered parent marks: `parents[0]` emits as `from`, the rest as
  /// `merge` lines.
  pub parents: Vec<Mark>,
  /// Which input stream this commit was parsed from; 0 for host-built
  /// commits until a driver adopts them.
  pub stream_number: u32,
  pub dumped: DumpState,
  pub(crate) had_file_changes: bool,
  pub(crate) skip_to: Option<Mark>,
}

impl Commit {
  pub fn new(
    branch: impl Into<Vec<u8>>,
    author: PersonIdent,
    committer: PersonIdent,
    message: impl Into<Vec<u8>>,
    file_changes: Vec<FileChange>,
    parents: Vec<Mark>,
  ) -> Self {
    let had = !file_changes.is_empty();
    Commit {
      id: 0,
      old_id: None,
      original_oid: None,
      branch: branch.into(),
      author,
      committer,
      encoding: None,
      message: message.into(),
      file_changes,
      parents,
      stream_number: 0,
      dumped: DumpState::Pending,
      had_file_changes: had,
      skip_to: None,
    }
  }

  pub fn first_parent(&self) -> Option<Mark> {
    self.parents.first().copied()
  }

  pub fn is_merge(&self) -> bool {
    self.parents.len() >= 2
  }

  /// Whether the commit carried at least one file-change when it was
  /// parsed, counting changes dropped because their blob was skipped.
  pub fn originally_had_file_changes(&self) -> bool {
    self.had_file_changes
  }

  /// Drop this commit from the output, redirecting references to its mark
  /// to `new_id` (or to its first parent when `new_id` is `None`).
  pub fn skip(&mut self, new_id: Option<Mark>) {
    self.dumped = DumpState::Skipped;
    self.skip_to = new_id;
  }
}

#[derive(Debug, Clone)]
pub struct Tag {
  /// Mark of the tag itself; 0 when the stream carried none.
  pub id: Mark,
  pub name: Vec<u8>,
  pub original_oid: Option<Vec<u8>>,
  /// Mark of the tagged commit.
  pub from_ref: Mark,
  pub tagger: Option<PersonIdent>,
  pub message: Vec<u8>,
  pub dumped: DumpState,
}

impl Tag {
  pub fn new(
    name: impl Into<Vec<u8>>,
    from_ref: Mark,
    tagger: Option<PersonIdent>,
    message: impl Into<Vec<u8>>,
  ) -> Self {
    Tag {
      id: 0,
      name: name.into(),
      original_oid: None,
      from_ref,
      tagger,
      message: message.into(),
      dumped: DumpState::Pending,
    }
  }

  pub fn skip(&mut self) {
    self.dumped = DumpState::Skipped;
  }
}

#[derive(Debug, Clone)]
pub struct Reset {
  pub ref_name: Vec<u8>,
  pub from_ref: Option<Mark>,
  pub dumped: DumpState,
}

impl Reset {
  pub fn new(ref_name: impl Into<Vec<u8>>, from_ref: Option<Mark>) -> Self {
    Reset { ref_name: ref_name.into(), from_ref, dumped: DumpState::Pending }
  }

  pub fn skip(&mut self) {
    self.dumped = DumpState::Skipped;
  }
}

#[derive(Debug, Clone)]
pub struct Progress {
  pub message: Vec<u8>,
  pub dumped: DumpState,
}

impl Progress {
  pub fn new(message: impl Into<Vec<u8>>) -> Self {
    Progress { message: message.into(), dumped: DumpState::Pending }
  }

  pub fn skip(&mut self) {
    self.dumped = DumpState::Skipped;
  }
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
  pub dumped: DumpState,
}

impl Checkpoint {
  pub fn new() -> Self {
    Checkpoint { dumped: DumpState::Pending }
  }

  pub fn skip(&mut self) {
    self.dumped = DumpState::Skipped;
  }
}

impl Default for Checkpoint {
  fn default() -> Self {
    Checkpoint::new()
  }
}

/// The polymorphic stream element. Callbacks receive the concrete variant;
/// the catch-all callback receives this tagged form.
#[derive(Debug, Clone)]
pub enum Element {
  Blob(Blob),
  Commit(Commit),
  Tag(Tag),
  Reset(Reset),
  Progress(Progress),
  Checkpoint(Checkpoint),
}

impl Element {
  pub fn kind(&self) -> &'static str {
    match self {
      Element::Blob(_) => "blob",
      Element::Commit(_) => "commit",
      Element::Tag(_) => "tag",
      Element::Reset(_) => "reset",
      Element::Progress(_) => "progress",
      Element::Checkpoint(_) => "checkpoint",
    }
  }

  pub fn dumped(&self) -> DumpState {
    match self {
      Element::Blob(e) => e.dumped,
      Element::Commit(e) => e.dumped,
      Element::Tag(e) => e.dumped,
      Element::Reset(e) => e.dumped,
      Element::Progress(e) => e.dumped,
      Element::Checkpoint(e) => e.dumped,
    }
  }
}

impl From<Blob> for Element {
  fn from(e: Blob) -> Self {
    Element::Blob(e)
  }
}

impl From<Commit> for Element {
  fn from(e: Commit) -> Self {
    Element::Commit(e)
  }
}

impl From<Tag> for Element {
  fn from(e: Tag) -> Self {
    Element::Tag(e)
  }
}

impl From<Reset> for Element {
  fn from(e: Reset) -> Self {
    Element::Reset(e)
  }
}

impl From<Progress> for Element {
  fn from(e: Progress) -> Self {
    Element::Progress(e)
  }
}

impl From<Checkpoint> for Element {
  fn from(e: Checkpoint) -> Self {
    Element::Checkpoint(e)
  }
}
