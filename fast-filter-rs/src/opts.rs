use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

use serde::Deserialize;

/// Host-facing configuration for one driver.
#[derive(Debug, Clone)]
pub struct Options {
    /// Upstream repository the exporter runs in.
    pub source: PathBuf,
    /// Downstream repository the importer writes to.
    pub target: PathBuf,
    /// Refs handed to the exporter; defaults to `--all`.
    pub refs: Vec<String>,
    /// Proceed even if the target already has refs.
    pub force: bool,
    /// Suppress progress reporting and subprocess chatter.
    pub quiet: bool,
    /// Mark table to honor from a previous invocation; reserves its range.
    pub import_marks: Option<PathBuf>,
    /// Mark table the importer writes for the next invocation.
    pub export_marks: Option<PathBuf>,
    /// Read the stream from standard input instead of spawning an exporter.
    pub stdin: bool,
    /// Parse and dispatch but write nothing to the target.
    pub dry_run: bool,
    /// Read a prebuilt fast-export stream from this file.
    pub stream_override: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            target: PathBuf::from("."),
            refs: vec!["--all".to_string()],
            force: false,
            quiet: false,
            import_marks: None,
            export_marks: None,
            stdin: false,
            dry_run: false,
            stream_override: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    stream: Option<StreamConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamConfig {
    quiet: Option<bool>,
    force: Option<bool>,
    refs: Option<Vec<String>>,
}

impl StreamConfig {
    fn apply(&self, opts: &mut Options) {
        if let Some(quiet) = self.quiet {
            opts.quiet = quiet;
        }
        if let Some(force) = self.force {
            opts.force = force;
        }
        if let Some(refs) = &self.refs {
            opts.refs = refs.clone();
        }
    }
}

impl Options {
    /// Layer a TOML config file over the current values.
    pub fn apply_config_file(&mut self, path: &PathBuf) -> io::Result<()> {
        let contents = fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{path:?}: {e}")))?;
        if let Some(stream) = config.stream {
            stream.apply(self);
        }
        Ok(())
    }
}

fn usage() -> ! {
    eprintln!(
        "usage: fast-filter-rs [options]\n\
         \n\
         --source DIR          upstream repository (default .)\n\
         --target DIR          downstream repository (default .)\n\
         --refs REF            export only REF; repeatable (default --all)\n\
         --force               proceed even if the target is non-empty\n\
         --quiet               suppress progress reporting\n\
         --import-marks FILE   reuse a mark table from a previous run\n\
         --export-marks FILE   write the importer's mark table to FILE\n\
         --stdin               read the stream from standard input\n\
         --dry-run             parse and dispatch without writing\n\
         --stream-override F   read a prebuilt fast-export stream from F\n\
         --config FILE         TOML config file (or FAST_FILTER_RS_CONFIG)"
    );
    std::process::exit(2);
}

fn require_value(it: &mut impl Iterator<Item = String>, flag: &str) -> String {
    match it.next() {
        Some(v) => v,
        None => {
            eprintln!("error: {flag} requires a value");
            std::process::exit(2);
        }
    }
}

pub fn parse_args() -> Options {
    let mut opts = Options::default();
    let mut refs: Vec<String> = Vec::new();
    let mut config = env::var("FAST_FILTER_RS_CONFIG").ok().map(PathBuf::from);

    let mut it = env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--source" => opts.source = PathBuf::from(require_value(&mut it, "--source")),
            "--target" => opts.target = PathBuf::from(require_value(&mut it, "--target")),
            "--refs" => refs.push(require_value(&mut it, "--refs")),
            "--force" => opts.force = true,
            "--quiet" => opts.quiet = true,
            "--import-marks" => {
                opts.import_marks = Some(PathBuf::from(require_value(&mut it, "--import-marks")))
            }
            "--export-marks" => {
                opts.export_marks = Some(PathBuf::from(require_value(&mut it, "--export-marks")))
            }
            "--stdin" => opts.stdin = true,
            "--dry-run" => opts.dry_run = true,
            "--stream-override" => {
                opts.stream_override =
                    Some(PathBuf::from(require_value(&mut it, "--stream-override")))
            }
            "--config" => config = Some(PathBuf::from(require_value(&mut it, "--config"))),
            "-h" | "--help" => usage(),
            other => {
                eprintln!("error: unrecognized argument {other:?}");
                usage();
            }
        }
    }

    if let Some(path) = config {
        if let Err(e) = opts.apply_config_file(&path) {
            eprintln!("error: failed to load config: {e}");
            std::process::exit(2);
        }
    }
    if !refs.is_empty() {
        opts.refs = refs;
    }
    opts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_export_everything() {
        let opts = Options::default();
        assert_eq!(opts.refs, vec!["--all".to_string()]);
        assert!(!opts.force);
        assert!(!opts.dry_run);
    }

    #[test]
    fn config_file_layers_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[stream]\nquiet = true\nrefs = [\"refs/heads/main\"]"
        )
        .unwrap();
        let mut opts = Options::default();
        opts.apply_config_file(&file.path().to_path_buf()).unwrap();
        assert!(opts.quiet);
        assert!(!opts.force);
        assert_eq!(opts.refs, vec!["refs/heads/main".to_string()]);
    }

    #[test]
    fn config_file_rejects_bad_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not toml [").unwrap();
        let mut opts = Options::default();
        assert!(opts.apply_config_file(&file.path().to_path_buf()).is_err());
    }
}
