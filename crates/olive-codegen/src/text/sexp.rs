//! S-expressions: the text backend's script syntax.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Sexp {
    Int(i64),
    /// Always finite; other floats are written `(float "NaN")`.
    Float(f64),
    Str(String),
    Symbol(String),
    List(Vec<Sexp>),
}

impl Sexp {
    pub fn symbol(name: &str) -> Sexp {
        Sexp::Symbol(name.to_string())
    }

    pub fn string(text: &str) -> Sexp {
        Sexp::Str(text.to_string())
    }

    /// `(head args...)`
    pub fn form(head: &str, args: impl IntoIterator<Item = Sexp>) -> Sexp {
        let mut items = vec![Sexp::symbol(head)];
        items.extend(args);
        Sexp::List(items)
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Sexp::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Write with nested lists broken over lines once they get long.
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        self.write_pretty(&mut out, 0);
        out
    }

    fn write_pretty(&self, out: &mut String, indent: usize) {
        let flat = self.to_string();
        let Sexp::List(items) = self else {
            out.push_str(&flat);
            return;
        };
        if flat.len() + indent <= 100 || items.len() < 2 {
            out.push_str(&flat);
            return;
        }
        out.push('(');
        out.push_str(&items[0].to_string());
        for item in &items[1..] {
            out.push('\n');
            out.push_str(&" ".repeat(indent + 2));
            item.write_pretty(out, indent + 2);
        }
        out.push(')');
    }
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexp::Int(i) => write!(f, "{i}"),
            Sexp::Float(x) => write!(f, "{x:?}"),
            Sexp::Str(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Sexp::Symbol(s) => write!(f, "{s}"),
            Sexp::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Read every top-level form in `text`. `;` starts a comment.
pub fn read_all(text: &str) -> Result<Vec<Sexp>, String> {
    let mut reader = Reader {
        chars: text.char_indices().peekable(),
        text,
    };
    let mut forms = Vec::new();
    while reader.skip_blank() {
        forms.push(reader.read()?);
    }
    Ok(forms)
}

struct Reader<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    text: &'a str,
}

impl Reader<'_> {
    /// Skip whitespace and comments; false at end of input.
    fn skip_blank(&mut self) -> bool {
        while let Some(&(_, c)) = self.chars.peek() {
            if c == ';' {
                while self.chars.next_if(|&(_, c)| c != '\n').is_some() {}
            } else if c.is_whitespace() {
                self.chars.next();
            } else {
                return true;
            }
        }
        false
    }

    fn read(&mut self) -> Result<Sexp, String> {
        if !self.skip_blank() {
            return Err("unexpected end of script".to_string());
        }
        let Some((start, c)) = self.chars.next() else {
            return Err("unexpected end of script".to_string());
        };
        match c {
            '(' => {
                let mut items = Vec::new();
                loop {
                    if !self.skip_blank() {
                        return Err(format!("list opened at byte {start} is never closed"));
                    }
                    if self.chars.next_if(|&(_, c)| c == ')').is_some() {
                        return Ok(Sexp::List(items));
                    }
                    items.push(self.read()?);
                }
            }
            ')' => Err(format!("unexpected `)` at byte {start}")),
            '"' => self.read_string(start),
            _ => {
                let mut end = start + c.len_utf8();
                while let Some((i, c)) = self
                    .chars
                    .next_if(|&(_, c)| !c.is_whitespace() && !matches!(c, '(' | ')' | '"' | ';'))
                {
                    end = i + c.len_utf8();
                }
                Ok(atom(&self.text[start..end]))
            }
        }
    }

    fn read_string(&mut self, start: usize) -> Result<Sexp, String> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err(format!("string opened at byte {start} is never closed")),
                Some((_, '"')) => return Ok(Sexp::Str(out)),
                Some((i, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, c @ ('"' | '\\'))) => out.push(c),
                    _ => return Err(format!("bad escape at byte {i}")),
                },
                Some((_, c)) => out.push(c),
            }
        }
    }
}

fn atom(text: &str) -> Sexp {
    let numeric = text
        .strip_prefix('-')
        .unwrap_or(text)
        .starts_with(|c: char| c.is_ascii_digit());
    if numeric {
        if let Ok(i) = text.parse::<i64>() {
            return Sexp::Int(i);
        }
        if let Ok(x) = text.parse::<f64>() {
            return Sexp::Float(x);
        }
    }
    Sexp::Symbol(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_what_it_prints() {
        let form = Sexp::form(
            "define",
            [
                Sexp::string("olive:0"),
                Sexp::List(vec![Sexp::symbol("$record")]),
                Sexp::form(
                    "tuple",
                    [
                        Sexp::Int(-3),
                        Sexp::Float(2.5),
                        Sexp::Float(1e100),
                        Sexp::string("a \"quoted\"\n\\ line"),
                        Sexp::symbol("#t"),
                    ],
                ),
            ],
        );
        assert_eq!(read_all(&form.to_string()), Ok(vec![form.clone()]));
        assert_eq!(read_all(&form.pretty()), Ok(vec![form]));
    }

    #[test]
    fn comments_and_symbols() {
        let forms = read_all("; header\n(order <= c) - -x 12x\n").unwrap();
        assert_eq!(
            forms,
            vec![
                Sexp::form("order", [Sexp::symbol("<="), Sexp::symbol("c")]),
                Sexp::symbol("-"),
                Sexp::symbol("-x"),
                Sexp::symbol("12x"),
            ]
        );
        insta::assert_snapshot!(forms[0].to_string(), @"(order <= c)");
    }

    #[test]
    fn unbalanced_input_is_an_error() {
        assert!(read_all("(tuple 1").is_err());
        assert!(read_all(")").is_err());
        assert!(read_all("\"open").is_err());
    }

    #[test]
    fn long_forms_break_over_lines() {
        let items = (0..40).map(Sexp::Int);
        let text = Sexp::form("tuple", items).pretty();
        assert!(text.contains("\n  0"));
        assert!(read_all(&text).is_ok());
    }
}
