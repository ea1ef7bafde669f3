//! Bencode parser
//!
//! Recursive descent over the lexer's token stream, producing a [`Value`]
//! tree. Every parse step surfaces a decode error instead of panicking.

use std::collections::BTreeMap;

use crate::bencode::lexer::{Lexer, Token, TokenKind};
use crate::error::Error;

/// A parsed bencoded value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Re-encode the value. Dictionary keys come out in sorted order, which
    /// is the canonical bencode form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(i) => {
                out.extend_from_slice(format!("i{}e", i).as_bytes());
            }
            Value::Bytes(b) => {
                out.extend_from_slice(format!("{}:", b.len()).as_bytes());
                out.extend_from_slice(b);
            }
            Value::List(l) => {
                out.push(b'l');
                for v in l {
                    v.encode_into(out);
                }
                out.push(b'e');
            }
            Value::Dict(d) => {
                out.push(b'd');
                for (k, v) in d {
                    out.extend_from_slice(format!("{}:", k.len()).as_bytes());
                    out.extend_from_slice(k);
                    v.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }
}

/// Parse a document whose top-level value is a dictionary
pub fn parse_dict(input: &[u8]) -> Result<BTreeMap<Vec<u8>, Value>, Error> {
    let mut parser = Parser {
        lexer: Lexer::new(input),
    };
    let token = parser.lexer.next_token()?;
    expect(&token, TokenKind::DictStart)?;
    let dict = parser.parse_dict_body()?;
    let token = parser.lexer.next_token()?;
    expect(&token, TokenKind::Eof)?;
    Ok(dict)
}

/// Parse a document holding a single value of any kind
pub fn parse_value(input: &[u8]) -> Result<Value, Error> {
    let mut parser = Parser {
        lexer: Lexer::new(input),
    };
    let token = parser.lexer.next_token()?;
    let value = parser.parse_next(token)?;
    let token = parser.lexer.next_token()?;
    expect(&token, TokenKind::Eof)?;
    Ok(value)
}

fn expect(token: &Token, kind: TokenKind) -> Result<(), Error> {
    if token.kind != kind {
        return Err(Error::decode(format!(
            "expected {}, got {} at position {}",
            kind, token.kind, token.start
        )));
    }
    Ok(())
}

struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Parser<'a> {
    fn parse_next(&mut self, token: Token) -> Result<Value, Error> {
        match token.kind {
            TokenKind::IntStart => self.parse_int(),
            TokenKind::StrLen => self.parse_string(token).map(Value::Bytes),
            TokenKind::DictStart => self.parse_dict_body().map(Value::Dict),
            TokenKind::ListStart => self.parse_list_body().map(Value::List),
            other => Err(Error::decode(format!(
                "expected a value, got {} at position {}",
                other, token.start
            ))),
        }
    }

    fn parse_int(&mut self) -> Result<Value, Error> {
        let token = self.lexer.next_token()?;
        expect(&token, TokenKind::Int)?;
        let text = String::from_utf8_lossy(self.lexer.text(token)).into_owned();
        let i: i64 = text.parse().map_err(|_| {
            Error::decode(format!(
                "integer {:?} at position {} out of range",
                text, token.start
            ))
        })?;
        let token = self.lexer.next_token()?;
        expect(&token, TokenKind::End)?;
        Ok(Value::Int(i))
    }

    fn parse_string(&mut self, _len: Token) -> Result<Vec<u8>, Error> {
        let token = self.lexer.next_token()?;
        expect(&token, TokenKind::Colon)?;
        let token = self.lexer.next_token()?;
        expect(&token, TokenKind::Str)?;
        Ok(self.lexer.text(token).to_vec())
    }

    fn parse_dict_body(&mut self) -> Result<BTreeMap<Vec<u8>, Value>, Error> {
        let mut dict = BTreeMap::new();
        loop {
            let token = self.lexer.next_token()?;
            if token.kind == TokenKind::End {
                return Ok(dict);
            }
            expect(&token, TokenKind::StrLen)?;
            let key = self.parse_string(token)?;
            let token = self.lexer.next_token()?;
            let value = self.parse_next(token)?;
            dict.insert(key, value);
        }
    }

    fn parse_list_body(&mut self) -> Result<Vec<Value>, Error> {
        let mut list = Vec::new();
        loop {
            let token = self.lexer.next_token()?;
            if token.kind == TokenKind::End {
                return Ok(list);
            }
            list.push(self.parse_next(token)?);
        }
    }
}
