pub mod date;
mod elem;
mod error;
mod ids;
pub mod opts;
mod parser;
pub mod pathutil;
mod pipes;
mod reader;
mod serializer;
mod stream;

pub use elem::{
  Blob, Checkpoint, Commit, DumpState, Element, FileChange, PersonIdent, Progress, Reset, Tag,
};
pub use error::{FilterError, Result};
pub use ids::Mark;
pub use opts::Options;
pub use stream::{
  BlobCallback, Callbacks, CheckpointCallback, CommitCallback, ElementCallback, FilterContext,
  ProgressCallback, RepoFilter, ResetCallback, TagCallback,
};

/// Identity pass from the configured source to the configured target: one
/// `run()` and a `finish()`, with no callbacks installed.
pub fn run(opts: &Options) -> Result<()> {
  let mut filter = RepoFilter::new(opts.clone(), Callbacks::default());
  filter.run()?;
  filter.finish()
}
