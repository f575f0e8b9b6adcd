#![no_main]
use libfuzzer_sys::fuzz_target;

use reactor_h1::{RequestParser, ServerOptions};

fn parse(pieces: &[&[u8]]) -> (Vec<String>, Option<String>) {
    let mut parser = RequestParser::new(ServerOptions::default());
    let mut error = None;
    for piece in pieces {
        if let Err(err) = parser.process_fragment(piece) {
            error = Some(err.to_string());
            break;
        }
    }
    let requests = std::iter::from_fn(|| parser.pop_request())
        .map(|req| format!("{} {} {:?} {:?}", req.method(), req.uri(), req.headers(), req.body()))
        .collect();
    (requests, error)
}

fuzz_target!(|input: &[u8]| {
    if input.is_empty() {
        return;
    }
    let split = input[0] as usize % input.len();
    let input = &input[1..];
    let split = split.min(input.len());

    let whole = parse(&[input]);
    let pieces = parse(&[&input[..split], &input[split..]]);
    assert_eq!(whole, pieces);
});
