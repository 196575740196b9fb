//! Compact textual encoding of types.
//!
//! Descriptors are what generated code embeds as a runtime type tag, what the
//! configuration file uses to declare input fields, and what the comparator
//! caches in both backends are keyed by. The encoding is prefix-free so a
//! descriptor parses back without delimiters:
//!
//! | Type | Descriptor |
//! |---|---|
//! | boolean, integer, float, string, date, path, json | `b i f s d p j` |
//! | nothing / bad | `!` / `$` |
//! | `[T]`, `T?` | `a` T, `q` T |
//! | `K -> V` | `m` K V |
//! | `{T, U}` | `t2` T U |
//! | `{ a = T }` | `o1a$` T |
//! | `A | B {T}` | `u2A$t0B$t1` T |

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::ty::{Type, VariantShape};

impl Type {
    pub fn descriptor(&self) -> String {
        let mut out = String::new();
        encode(self, &mut out);
        out
    }

    /// Parse a complete descriptor. Trailing input is an error.
    pub fn parse_descriptor(input: &str) -> Result<Type, DescriptorError> {
        let mut parser = Parser { input, pos: 0 };
        let ty = parser.parse()?;
        if parser.pos != input.len() {
            return Err(DescriptorError {
                position: parser.pos,
                message: "trailing characters".to_string(),
            });
        }
        Ok(ty)
    }
}

fn encode(ty: &Type, out: &mut String) {
    match ty {
        Type::Bad => out.push('$'),
        Type::Nothing => out.push('!'),
        Type::Boolean => out.push('b'),
        Type::Integer => out.push('i'),
        Type::Float => out.push('f'),
        Type::String => out.push('s'),
        Type::Date => out.push('d'),
        Type::Path => out.push('p'),
        Type::Json => out.push('j'),
        Type::List(inner) => {
            out.push('a');
            encode(inner, out);
        }
        Type::Optional(inner) => {
            out.push('q');
            encode(inner, out);
        }
        Type::Map(k, v) => {
            out.push('m');
            encode(k, out);
            encode(v, out);
        }
        Type::Tuple(elements) => encode_tuple(elements.iter(), out),
        Type::Object(fields) => encode_object(fields, out),
        Type::Algebraic(variants) => {
            let _ = write!(out, "u{}", variants.len());
            for (name, shape) in variants {
                out.push_str(name);
                out.push('$');
                match shape {
                    VariantShape::Empty => out.push_str("t0"),
                    VariantShape::Tuple(elements) => encode_tuple(elements.iter(), out),
                    VariantShape::Object(fields) => encode_object(fields, out),
                }
            }
        }
    }
}

fn encode_tuple<'a>(elements: impl ExactSizeIterator<Item = &'a Type>, out: &mut String) {
    let _ = write!(out, "t{}", elements.len());
    for e in elements {
        encode(e, out);
    }
}

fn encode_object(fields: &BTreeMap<String, Type>, out: &mut String) {
    let _ = write!(out, "o{}", fields.len());
    for (name, ty) in fields {
        out.push_str(name);
        out.push('$');
        encode(ty, out);
    }
}

/// A descriptor that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorError {
    pub position: usize,
    pub message: String,
}

impl std::fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid type descriptor at {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for DescriptorError {}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> DescriptorError {
        DescriptorError {
            position: self.pos,
            message: message.into(),
        }
    }

    fn next(&mut self) -> Result<char, DescriptorError> {
        let c = self.input[self.pos..]
            .chars()
            .next()
            .ok_or_else(|| self.error("unexpected end of descriptor"))?;
        self.pos += c.len_utf8();
        Ok(c)
    }

    fn count(&mut self) -> Result<usize, DescriptorError> {
        let rest = &self.input[self.pos..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(self.error("expected element count"));
        }
        let n = rest[..digits]
            .parse()
            .map_err(|_| self.error("element count out of range"))?;
        self.pos += digits;
        Ok(n)
    }

    fn name(&mut self) -> Result<String, DescriptorError> {
        let rest = &self.input[self.pos..];
        let end = rest
            .find('$')
            .ok_or_else(|| self.error("expected `$` after field name"))?;
        if end == 0 {
            return Err(self.error("empty field name"));
        }
        let name = rest[..end].to_string();
        self.pos += end + 1;
        Ok(name)
    }

    fn parse(&mut self) -> Result<Type, DescriptorError> {
        Ok(match self.next()? {
            '$' => Type::Bad,
            '!' => Type::Nothing,
            'b' => Type::Boolean,
            'i' => Type::Integer,
            'f' => Type::Float,
            's' => Type::String,
            'd' => Type::Date,
            'p' => Type::Path,
            'j' => Type::Json,
            'a' => Type::list(self.parse()?),
            'q' => Type::optional(self.parse()?),
            'm' => {
                let k = self.parse()?;
                Type::map(k, self.parse()?)
            }
            't' => Type::Tuple(self.tuple_body()?),
            'o' => Type::Object(self.object_body()?),
            'u' => {
                let n = self.count()?;
                let mut variants = BTreeMap::new();
                for _ in 0..n {
                    let name = self.name()?;
                    let shape = match self.next()? {
                        't' => {
                            let elements = self.tuple_body()?;
                            if elements.is_empty() {
                                VariantShape::Empty
                            } else {
                                VariantShape::Tuple(elements)
                            }
                        }
                        'o' => VariantShape::Object(self.object_body()?),
                        other => {
                            return Err(self.error(format!("unknown variant shape `{other}`")))
                        }
                    };
                    if variants.insert(name, shape).is_some() {
                        return Err(self.error("duplicate variant"));
                    }
                }
                Type::Algebraic(variants)
            }
            other => return Err(self.error(format!("unknown type code `{other}`"))),
        })
    }

    fn tuple_body(&mut self) -> Result<Vec<Type>, DescriptorError> {
        let n = self.count()?;
        (0..n).map(|_| self.parse()).collect()
    }

    fn object_body(&mut self) -> Result<BTreeMap<String, Type>, DescriptorError> {
        let n = self.count()?;
        let mut fields = BTreeMap::new();
        for _ in 0..n {
            let name = self.name()?;
            let ty = self.parse()?;
            if fields.insert(name, ty).is_some() {
                return Err(self.error("duplicate field"));
            }
        }
        Ok(fields)
    }
}
