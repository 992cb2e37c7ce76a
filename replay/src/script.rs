//! Replay script grammar (spec.md §4.3 "Script grammar").
//!
//! Tokens are separated by whitespace; `i=n` records a set/resize at
//! slot `i`, `i` alone records a clear, `s` invokes the stats callback,
//! `e` stops the whole replay immediately. Unknown tokens are ignored.
//!
//! A `k=` token with nothing (or nothing parseable) after the `=` is
//! silently discarded — spec.md §9 flags this ambiguity in the original
//! streaming parser (where it only manifested at a read-buffer
//! boundary) and asks implementers to "reject or document" it. Since
//! this parser works over the whole file rather than 256-byte reads,
//! there is no buffer boundary to reproduce the quirk at; this
//! implementation documents the simpler, uniform rule instead: any
//! `k=` with an unparseable or missing right-hand side is dropped,
//! wherever in the script it occurs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOp {
    /// `i=n` — allocate or reallocate at slot `i` depending on whether
    /// the slot is currently occupied; the driver decides which.
    SetSize { index: usize, size: usize },
    /// `i` — deallocate slot `i` and clear it.
    Clear { index: usize },
    /// `s` — invoke the stats callback.
    Stats,
    /// `e` — stop processing immediately.
    Stop,
}

pub fn parse(source: &str) -> Vec<ScriptOp> {
    let mut ops = Vec::new();
    for raw in source.split_whitespace() {
        match parse_token(raw) {
            Some(op) => {
                let stop = op == ScriptOp::Stop;
                ops.push(op);
                if stop {
                    break;
                }
            }
            None => continue,
        }
    }
    ops
}

fn parse_token(raw: &str) -> Option<ScriptOp> {
    if raw == "s" {
        return Some(ScriptOp::Stats);
    }
    if raw == "e" {
        return Some(ScriptOp::Stop);
    }
    if let Some((left, right)) = raw.split_once('=') {
        let index: usize = left.parse().ok()?;
        let size: usize = right.parse().ok()?;
        return Some(ScriptOp::SetSize { index, size });
    }
    let index: usize = raw.parse().ok()?;
    Some(ScriptOp::Clear { index })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_grammar_example_from_the_spec() {
        let ops = parse("0=123 0 1=31 1 s");
        assert_eq!(
            ops,
            vec![
                ScriptOp::SetSize { index: 0, size: 123 },
                ScriptOp::Clear { index: 0 },
                ScriptOp::SetSize { index: 1, size: 31 },
                ScriptOp::Clear { index: 1 },
                ScriptOp::Stats,
            ]
        );
    }

    #[test]
    fn stop_token_truncates_even_mid_line() {
        let ops = parse("0=1 e 1=2 2=3");
        assert_eq!(ops, vec![ScriptOp::SetSize { index: 0, size: 1 }, ScriptOp::Stop]);
    }

    #[test]
    fn newlines_are_token_separators_too() {
        let ops = parse("0=1\n1=2\n2");
        assert_eq!(
            ops,
            vec![
                ScriptOp::SetSize { index: 0, size: 1 },
                ScriptOp::SetSize { index: 1, size: 2 },
                ScriptOp::Clear { index: 2 },
            ]
        );
    }

    #[test]
    fn unknown_tokens_are_ignored() {
        let ops = parse("0=1 garbage!! 1=2");
        assert_eq!(ops, vec![ScriptOp::SetSize { index: 0, size: 1 }, ScriptOp::SetSize { index: 1, size: 2 }]);
    }

    #[test]
    fn dangling_equals_is_discarded() {
        let ops = parse("0= 1=2");
        assert_eq!(ops, vec![ScriptOp::SetSize { index: 1, size: 2 }]);
    }
}
