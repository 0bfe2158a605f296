#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::rc::Rc;

use fast_filter_rs as ffr;

/// Cloneable in-memory sink so tests can keep a handle on the bytes a
/// filter wrote after the filter consumed the writer.
#[derive(Clone, Default)]
pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run one in-memory pass with the given callbacks and return the output.
pub fn filter_with(input: &[u8], callbacks: ffr::Callbacks) -> ffr::Result<Vec<u8>> {
    let buf = SharedBuf::new();
    let mut opts = ffr::Options::default();
    opts.quiet = true;
    let mut filter = ffr::RepoFilter::new(opts, callbacks);
    filter.set_input(Box::new(Cursor::new(input.to_vec())));
    filter.set_output(Box::new(buf.clone()));
    filter.run()?;
    filter.finish()?;
    Ok(buf.take())
}

/// Identity pass: no callbacks installed.
pub fn filter_identity(input: &[u8]) -> Vec<u8> {
    filter_with(input, ffr::Callbacks::default()).expect("identity pass")
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

fn parse_num(bytes: &[u8]) -> u32 {
    std::str::from_utf8(bytes)
        .expect("ascii digits")
        .trim()
        .parse()
        .expect("numeric mark")
}

/// Every `:N` reference in `output` must name a `mark :N` emitted earlier:
/// no forward references, no orphaned marks. Data payloads are skipped by
/// length so their content can never confuse the scan.
pub fn assert_mark_stability(output: &[u8]) {
    let mut defined: HashSet<u32> = HashSet::new();
    let mut i = 0usize;
    while i < output.len() {
        let end = output[i..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| i + p + 1)
            .unwrap_or(output.len());
        let line = &output[i..end];
        i = end;
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        if let Some(rest) = line.strip_prefix(b"data ") {
            i += parse_num(rest) as usize;
            continue;
        }
        if let Some(rest) = line.strip_prefix(b"mark :") {
            let mark = parse_num(rest);
            assert!(defined.insert(mark), "mark :{mark} defined twice");
        } else if let Some(rest) = line.strip_prefix(b"from :") {
            let mark = parse_num(rest);
            assert!(defined.contains(&mark), "from :{mark} not yet defined");
        } else if let Some(rest) = line.strip_prefix(b"merge :") {
            let mark = parse_num(rest);
            assert!(defined.contains(&mark), "merge :{mark} not yet defined");
        } else if line.starts_with(b"M ") {
            let dataref = line
                .split(|&b| b == b' ')
                .nth(2)
                .expect("M line has a dataref");
            let mark = parse_num(dataref.strip_prefix(b":").expect("mark dataref"));
            assert!(defined.contains(&mark), "M ... :{mark} not yet defined");
        }
    }
}
