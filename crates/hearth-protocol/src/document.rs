//! Syntactic well-formedness scan for query documents.
//!
//! The client does not understand the query language; that is the engine's
//! job and the generated builder's job. What it can check before spending a
//! round trip is structure: delimiters balance, strings terminate, and the
//! document is not blank. `#` starts a line comment.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("document is empty")]
    Empty,
    #[error("unterminated string literal starting at byte {0}")]
    UnterminatedString(usize),
    #[error("unexpected closing `{found}` at byte {at}")]
    UnexpectedClose { found: char, at: usize },
    #[error("mismatched closing `{found}` at byte {at}, expected `{expected}`")]
    MismatchedClose {
        expected: char,
        found: char,
        at: usize,
    },
    #[error("unclosed `{open}` opened at byte {at}")]
    Unclosed { open: char, at: usize },
}

fn closer_for(open: char) -> char {
    match open {
        '{' => '}',
        '[' => ']',
        _ => ')',
    }
}

/// Check that `document` is structurally sound. Returns the first defect
/// found, scanning left to right.
pub fn ensure_well_formed(document: &str) -> Result<(), DocumentError> {
    if document.trim().is_empty() {
        return Err(DocumentError::Empty);
    }

    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut chars = document.char_indices().peekable();

    while let Some((at, c)) = chars.next() {
        match c {
            '#' => {
                while let Some((_, next)) = chars.peek() {
                    if *next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '"' => {
                let mut closed = false;
                while let Some((_, next)) = chars.next() {
                    match next {
                        '\\' => {
                            chars.next();
                        }
                        '"' => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err(DocumentError::UnterminatedString(at));
                }
            }
            '{' | '[' | '(' => stack.push((c, at)),
            '}' | ']' | ')' => match stack.pop() {
                None => return Err(DocumentError::UnexpectedClose { found: c, at }),
                Some((open, _)) if closer_for(open) == c => {}
                Some((open, _)) => {
                    return Err(DocumentError::MismatchedClose {
                        expected: closer_for(open),
                        found: c,
                        at,
                    })
                }
            },
            _ => {}
        }
    }

    match stack.pop() {
        Some((open, at)) => Err(DocumentError::Unclosed { open, at }),
        None => Ok(()),
    }
}
