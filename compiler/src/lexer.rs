use std::fmt;

use thiserror::Error;


#[derive(Clone, Copy, Hash, Debug, Eq, PartialEq)]
pub enum TokenClass {
    Number,
    String,
    Ident,
    Punct,
    WS,
    EOF,
}

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Copy)]
pub struct Position(pub u64, pub u64);

#[derive(Debug, PartialEq, Clone)]
pub struct Token<'a>(pub TokenClass, pub &'a str, pub Position);

#[derive(Debug, PartialEq, Error)]
#[error("{position}: unexpected {}", describe_char(.found))]
pub struct LexError {
    pub position: Position,
    pub found: Option<char>,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.0, self.1)
    }
}

fn describe_char(c: &Option<char>) -> String {
    match c {
        Some(c) => format!("character {:?}", c),
        None => "end of input".to_string(),
    }
}

const PUNCTUATION: &str = "(){}[];:,.+-*/<>=!&|%";

// 0: start, 2: whitespace, 3: end of input, 4: integer part, 5: decimal
// point, 6: fraction, 7: identifier, 8: string body, 9: string escape,
// 10: closed string, 11: punctuation, 12: slash, 13: line comment
fn transitions(state: u8, chr: Option<char>) -> &'static [u8] {
    match chr {
        None => match state {
            0 => &[3],
            _ => &[],
        }

        Some(c) => match state {
            0 => match c {
                ' ' | '\t' | '\r' | '\n' => &[2],
                '0'..='9' => &[4],
                'a'..='z' | 'A'..='Z' | '_' => &[7],
                '"' => &[8],
                '/' => &[12],
                c if PUNCTUATION.contains(c) => &[11],
                _ => &[],
            },

            2 => match c {
                ' ' | '\t' | '\r' | '\n' => &[2],
                _ => &[],
            }

            4 => match c {
                '0'..='9' => &[4],
                '.' => &[5],
                _ => &[],
            }
            5 => match c { '0'..='9' => &[6], _ => &[], }
            6 => match c { '0'..='9' => &[6], _ => &[], }

            7 => match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => &[7],
                _ => &[],
            }

            8 => match c {
                '"' => &[10],
                '\\' => &[9],
                _ => &[8],
            }
            9 => &[8],

            12 => match c { '/' => &[13], _ => &[], }
            13 => match c {
                '\n' => &[],
                _ => &[13],
            }

            _ => &[]
        }
    }
}

fn accepting(state: u8) -> &'static Option<TokenClass> {
    match state {
        2 => &Some(TokenClass::WS),
        3 => &Some(TokenClass::EOF),
        4 => &Some(TokenClass::Number),
        6 => &Some(TokenClass::Number),
        7 => &Some(TokenClass::Ident),
        10 => &Some(TokenClass::String),
        11 => &Some(TokenClass::Punct),
        12 => &Some(TokenClass::Punct),
        13 => &Some(TokenClass::WS),
        _ => &None,
    }
}

pub fn lex(input: &str) -> Result<Vec<Token>, LexError> {
    let mut tokenized_input = Vec::new();
    let mut ac: Vec<TokenClass> = Vec::new();
    let mut states: Vec<u8> = vec![0];
    let mut chars = input.char_indices();

    let mut current = chars.next();
    let mut pos_start = 0;

    let mut col = 1;
    let mut col_start = 1;
    let mut line = 1;
    let mut line_start = 1;

    loop {
        let chr = current.map(|(_, c)| c);
        states = states.iter()
            .flat_map(|&state| transitions(state, chr).iter())
            .cloned()
            .collect();
        states.sort();
        states.dedup();

        if states.is_empty() {
            let pos = current.map(|(i, _)| i).unwrap_or(input.len());
            if let Some(tc) = ac.iter().cloned().next() {
                if tc == TokenClass::EOF {
                    tokenized_input.push(Token(tc, "", Position(line_start, col_start)));
                    return Ok(tokenized_input)
                }

                tokenized_input.push(Token(tc, &input[pos_start..pos], Position(line_start, col_start)));

                ac.clear();
                states.clear();
                states.push(0);
                pos_start = pos;
                line_start = line;
                col_start = col;
            } else {
                return Err(LexError { position: Position(line, col), found: chr });
            }
        } else {
            ac = states.iter()
                .flat_map(|&state| accepting(state).iter())
                .cloned()
                .collect();
            if chr == Some('\n') {
                col = 1;
                line += 1;
            } else {
                col += 1;
            }
            current = chars.next();
        }
    }
}

pub fn trim_ws(ts: &mut Vec<Token>) {
    ts.retain(|tok| tok.0 != TokenClass::WS);
}


#[cfg(test)]
mod test {
    use super::{Token, TokenClass, Position, LexError, lex, trim_ws};

    #[test]
    fn sequence() {
        assert_eq!(lex("var x: int = 12+3.5;"), Ok(vec![
            Token(TokenClass::Ident,  "var", Position(1, 1)),
            Token(TokenClass::WS,     " ",   Position(1, 4)),
            Token(TokenClass::Ident,  "x",   Position(1, 5)),
            Token(TokenClass::Punct,  ":",   Position(1, 6)),
            Token(TokenClass::WS,     " ",   Position(1, 7)),
            Token(TokenClass::Ident,  "int", Position(1, 8)),
            Token(TokenClass::WS,     " ",   Position(1, 11)),
            Token(TokenClass::Punct,  "=",   Position(1, 12)),
            Token(TokenClass::WS,     " ",   Position(1, 13)),
            Token(TokenClass::Number, "12",  Position(1, 14)),
            Token(TokenClass::Punct,  "+",   Position(1, 16)),
            Token(TokenClass::Number, "3.5", Position(1, 17)),
            Token(TokenClass::Punct,  ";",   Position(1, 20)),
            Token(TokenClass::EOF,    "",    Position(1, 21)),
        ]));
    }

    #[test]
    fn operators_are_single_characters() {
        let mut toks = lex("a>=b&&c").unwrap();
        trim_ws(&mut toks);
        let texts: Vec<&str> = toks.iter().map(|t| t.1).collect();
        assert_eq!(texts, vec!["a", ">", "=", "b", "&", "&", "c", ""]);
    }

    #[test]
    fn duration_is_number_then_ident() {
        assert_eq!(lex("100ms"), Ok(vec![
            Token(TokenClass::Number, "100", Position(1, 1)),
            Token(TokenClass::Ident,  "ms",  Position(1, 4)),
            Token(TokenClass::EOF,    "",    Position(1, 6)),
        ]));
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(lex(r#"print "a \"b\"";"#), Ok(vec![
            Token(TokenClass::Ident,  "print",        Position(1, 1)),
            Token(TokenClass::WS,     " ",            Position(1, 6)),
            Token(TokenClass::String, r#""a \"b\"""#, Position(1, 7)),
            Token(TokenClass::Punct,  ";",            Position(1, 16)),
            Token(TokenClass::EOF,    "",             Position(1, 17)),
        ]));
    }

    #[test]
    fn comments_and_newlines() {
        let mut toks = lex("a = 1; // one\nb = 2 / 3;\n").unwrap();
        trim_ws(&mut toks);
        assert_eq!(toks, vec![
            Token(TokenClass::Ident,  "a", Position(1, 1)),
            Token(TokenClass::Punct,  "=", Position(1, 3)),
            Token(TokenClass::Number, "1", Position(1, 5)),
            Token(TokenClass::Punct,  ";", Position(1, 6)),
            Token(TokenClass::Ident,  "b", Position(2, 1)),
            Token(TokenClass::Punct,  "=", Position(2, 3)),
            Token(TokenClass::Number, "2", Position(2, 5)),
            Token(TokenClass::Punct,  "/", Position(2, 7)),
            Token(TokenClass::Number, "3", Position(2, 9)),
            Token(TokenClass::Punct,  ";", Position(2, 10)),
            Token(TokenClass::EOF,    "",  Position(3, 1)),
        ]);
    }

    #[test]
    fn errors() {
        assert_eq!(
            lex("a = #;"),
            Err(LexError { position: Position(1, 5), found: Some('#') }));
        assert_eq!(
            lex("\"open"),
            Err(LexError { position: Position(1, 6), found: None }));
    }
}
