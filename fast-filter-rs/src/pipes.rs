use std::fs;
use std::io;
use std::process::{Command, Stdio};

use crate::opts::Options;

pub fn build_fast_export_cmd(opts: &Options) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(&opts.source);
    cmd.arg("fast-export");
    // marks referenced before use rely on topological emission order
    cmd.arg("--topo-order");
    for r in &opts.refs {
        cmd.arg(r);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(if opts.quiet {
        Stdio::null()
    } else {
        Stdio::inherit()
    });
    cmd
}

pub fn build_fast_import_cmd(opts: &Options) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(&opts.target);
    cmd.arg("fast-import");
    cmd.arg("--quiet");
    if opts.force {
        cmd.arg("--force");
    }
    // offsets this core refuses to normalize must survive the importer too
    cmd.arg("--date-format=raw-permissive");
    if let Some(path) = &opts.import_marks {
        cmd.arg(format!("--import-marks={}", path.to_string_lossy()));
    }
    if let Some(path) = &opts.export_marks {
        cmd.arg(format!("--export-marks={}", path.to_string_lossy()));
    }
    cmd.stdin(Stdio::piped());
    cmd.stderr(if opts.quiet {
        Stdio::null()
    } else {
        Stdio::inherit()
    });
    cmd
}

/// Bootstrap the target repository: create and `git init --bare` it when
/// the path does not exist, and refuse a non-empty target unless `force`.
pub fn prepare_target(opts: &Options) -> io::Result<()> {
    if !opts.target.exists() {
        fs::create_dir_all(&opts.target)?;
        let status = Command::new("git")
            .arg("init")
            .arg("--bare")
            .arg("--quiet")
            .current_dir(&opts.target)
            .status()?;
        if !status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("git init in {:?} failed", opts.target),
            ));
        }
        return Ok(());
    }
    if opts.force {
        return Ok(());
    }
    let output = Command::new("git")
        .arg("-C")
        .arg(&opts.target)
        .arg("for-each-ref")
        .arg("--count=1")
        .output()?;
    if !output.status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("target {:?} is not a git repository", opts.target),
        ));
    }
    if !output.stdout.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!(
                "refusing to write into non-empty target {:?} (use --force)",
                opts.target
            ),
        ));
    }
    Ok(())
}
