#![no_main]

use fraiseql_connect::protocol::decode_message;
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;

#[derive(Debug)]
struct StartupBytes {
    data: Vec<u8>,
    split_points: Vec<u8>,
}

impl<'a> Arbitrary<'a> for StartupBytes {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            data: u.arbitrary()?,
            split_points: u.arbitrary()?,
        })
    }
}

/// Decode everything complete in `buf`, returning how many bytes were consumed
fn drain(buf: &[u8]) -> Option<usize> {
    let mut offset = 0;
    while offset < buf.len() {
        match decode_message(&buf[offset..]) {
            Ok(Some((_, consumed))) => {
                assert!(consumed > 0 && offset + consumed <= buf.len());
                offset += consumed;
            }
            Ok(None) => break,
            Err(_) => return None,
        }
    }
    Some(offset)
}

fuzz_target!(|input: StartupBytes| {
    // Whole buffer at once
    let whole = drain(&input.data);

    // Same bytes arriving in arbitrary chunks must decode identically
    let mut splits: Vec<usize> = input
        .split_points
        .iter()
        .map(|&b| (b as usize) % (input.data.len() + 1))
        .collect();
    splits.push(input.data.len());
    splits.sort_unstable();
    splits.dedup();

    let mut buf = Vec::new();
    let mut consumed_total = 0;
    let mut failed = false;
    let mut start = 0;
    for end in splits {
        buf.extend_from_slice(&input.data[start..end]);
        start = end;
        match drain(&buf) {
            Some(consumed) => {
                buf.drain(..consumed);
                consumed_total += consumed;
            }
            None => {
                failed = true;
                break;
            }
        }
    }

    if let (Some(whole), false) = (whole, failed) {
        assert_eq!(whole, consumed_total);
    }
});
