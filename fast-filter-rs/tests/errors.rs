use fast_filter_rs as ffr;

mod common;
use common::*;

#[test]
fn unknown_leading_token_is_rejected() {
    match filter_with(b"frobnicate refs/heads/x\n", ffr::Callbacks::default()) {
        Err(ffr::FilterError::UnknownElement(line)) => {
            assert_eq!(line, b"frobnicate refs/heads/x\n".to_vec())
        }
        other => panic!("expected UnknownElement, got {other:?}"),
    }
}

#[test]
fn truncated_data_payload_is_a_size_mismatch() {
    match filter_with(b"blob\nmark :1\ndata 10\nabc", ffr::Callbacks::default()) {
        Err(ffr::FilterError::SizeMismatch { expected: 10, actual: 3 }) => {}
        other => panic!("expected SizeMismatch, got {other:?}"),
    }
}

#[test]
fn unparsable_mark_is_a_bad_mark() {
    match filter_with(b"blob\nmark :x1\ndata 2\nok\n", ffr::Callbacks::default()) {
        Err(ffr::FilterError::BadMark(_)) => {}
        other => panic!("expected BadMark, got {other:?}"),
    }
}

#[test]
fn bad_from_reference_is_a_bad_mark() {
    let input = b"commit refs/heads/main\nmark :1\n\
committer C <c@x> 1 +0000\n\
data 1\nA\n\
from :abc\n";
    match filter_with(input, ffr::Callbacks::default()) {
        Err(ffr::FilterError::BadMark(_)) => {}
        other => panic!("expected BadMark, got {other:?}"),
    }
}

#[test]
fn commit_without_committer_is_malformed() {
    let input = b"commit refs/heads/main\nmark :1\ndata 1\nA\n";
    match filter_with(input, ffr::Callbacks::default()) {
        Err(ffr::FilterError::MalformedStream { kind: "committer", .. }) => {}
        other => panic!("expected MalformedStream, got {other:?}"),
    }
}

#[test]
fn bad_data_header_is_malformed() {
    let input = b"blob\nmark :1\ndata lots\nok\n";
    match filter_with(input, ffr::Callbacks::default()) {
        Err(ffr::FilterError::MalformedStream { kind: "data", .. }) => {}
        other => panic!("expected MalformedStream, got {other:?}"),
    }
}

#[test]
fn non_mark_dataref_is_malformed() {
    let input = b"blob\nmark :1\ndata 2\nok\n\
commit refs/heads/main\nmark :2\n\
committer C <c@x> 1 +0000\n\
data 1\nA\n\
M 100644 inline f\n";
    match filter_with(input, ffr::Callbacks::default()) {
        Err(ffr::FilterError::MalformedStream { kind: "filechange", .. }) => {}
        other => panic!("expected MalformedStream, got {other:?}"),
    }
}

#[test]
fn unsupported_subcommands_are_unknown_elements() {
    for input in [
        b"cat-blob :1\n".as_ref(),
        b"ls :1 path\n",
        b"alias\nmark :2\nto :1\n",
        b"get-mark :1\n",
    ] {
        match filter_with(input, ffr::Callbacks::default()) {
            Err(ffr::FilterError::UnknownElement(_)) => {}
            other => panic!("expected UnknownElement for {input:?}, got {other:?}"),
        }
    }
}

#[test]
fn errors_format_for_humans() {
    let err = ffr::FilterError::SizeMismatch { expected: 9, actual: 3 };
    assert_eq!(
        err.to_string(),
        "data payload truncated: expected 9 bytes, got 3"
    );
    let err = ffr::FilterError::UnknownElement(b"wat\n".to_vec());
    assert!(err.to_string().contains("wat"));
    let err = ffr::FilterError::callback("nope");
    assert_eq!(err.to_string(), "callback error: nope");
}
