//! Bencode codec
//!
//! Lexer, parser, and the SHA-1 digest of the raw `info` section. The
//! digest hashes the exact input bytes rather than a re-encoding, so it is
//! insensitive to how any particular encoder would order dictionary keys.

pub mod lexer;
pub mod parser;

pub use parser::{parse_dict, parse_value, Value};

use sha1::{Digest, Sha1};

use crate::error::Error;
use lexer::{Lexer, TokenKind};

/// Compute the SHA-1 of the raw byte substring that is the value of the
/// top-level `info` key.
///
/// The lexer tracks container depth. Once a string token spelling `info`
/// is seen, every following token's raw bytes are fed to the hasher, up to
/// and including the end marker that returns to the depth the key was seen
/// at.
pub fn hash_info(input: &[u8]) -> Result<[u8; 20], Error> {
    let mut lexer = Lexer::new(input);
    let mut hasher = Sha1::new();
    let mut armed: Option<i32> = None;

    loop {
        let token = lexer.next_token()?;
        if token.kind == TokenKind::Eof {
            break;
        }
        match armed {
            Some(depth) => {
                hasher.update(lexer.text(token));
                if token.kind == TokenKind::End && token.depth == depth {
                    armed = None;
                }
            }
            None => {
                if token.kind == TokenKind::Str && lexer.text(token) == b"info" {
                    armed = Some(token.depth);
                }
            }
        }
    }

    Ok(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha1_of(data: &[u8]) -> [u8; 20] {
        Sha1::digest(data).into()
    }

    #[test]
    fn test_hash_info_substring() {
        let digest = hash_info(b"d4:infod3:keyi42eee").unwrap();
        assert_eq!(digest, sha1_of(b"d3:keyi42ee"));
    }

    #[test]
    fn test_hash_info_ignores_sibling_keys() {
        let with_siblings = b"d8:announce3:url4:infod3:keyi42ee7:comment2:hie";
        let digest = hash_info(with_siblings).unwrap();
        assert_eq!(digest, sha1_of(b"d3:keyi42ee"));
    }

    #[test]
    fn test_hash_info_nested_containers() {
        let input = b"d4:infod5:filesld6:lengthi7eee4:name1:xee";
        let digest = hash_info(input).unwrap();
        assert_eq!(digest, sha1_of(b"d5:filesld6:lengthi7eee4:name1:xe"));
    }

    #[test]
    fn test_hash_info_propagates_lex_errors() {
        assert!(hash_info(b"d4:infod3:keyi01eee").is_err());
    }
}
