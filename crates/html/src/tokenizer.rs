//! HTML Tokenizer
//!
//! Converts HTML text into a stream of tokens. Covers the subset of HTML5
//! tokenization that pages and `document.write` payloads need: tags with
//! attributes, text with character references, comments, doctypes, and raw
//! text elements (`script`, `style`, `textarea`, `title`).

use smallvec::SmallVec;

use crate::entities::decode_text;

/// Attribute list of a start tag, in source order
pub type Attributes = SmallVec<[(String, String); 4]>;

/// An HTML token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// DOCTYPE declaration
    Doctype { name: String },
    /// Start tag
    StartTag {
        name: String,
        attributes: Attributes,
        self_closing: bool,
    },
    /// End tag
    EndTag { name: String },
    /// A run of character data
    Text(String),
    /// Comment
    Comment(String),
    /// End of file
    Eof,
}

/// Elements whose content is not parsed as markup
fn is_raw_text_element(name: &str) -> bool {
    matches!(name, "script" | "style" | "textarea" | "title")
}

/// HTML tokenizer
pub struct Tokenizer {
    input: Vec<char>,
    pos: usize,
    /// Set after a raw text start tag until its end tag is reached
    raw_text_tag: Option<String>,
}

impl Tokenizer {
    /// Create a new tokenizer for the given input
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            raw_text_tag: None,
        }
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Token {
        if let Some(tag) = self.raw_text_tag.take() {
            let text = self.consume_raw_text(&tag);
            if !text.is_empty() {
                return Token::Text(text);
            }
        }

        match self.current_char() {
            None => Token::Eof,
            Some('<') => self.tag_open(),
            Some(_) => self.text(),
        }
    }

    /// Peek at the current character without consuming
    fn current_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    /// Check if we're at a specific string (case-insensitive)
    fn at_str_ci(&self, s: &str) -> bool {
        let mut offset = 0;
        for expected in s.chars() {
            match self.peek(offset) {
                Some(c) if c.eq_ignore_ascii_case(&expected) => offset += 1,
                _ => return false,
            }
        }
        true
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.current_char(), Some(c) if c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Consume characters up to (not including) the first occurrence of
    /// `terminator`, then skip the terminator itself
    fn consume_until(&mut self, terminator: &str) -> String {
        let mut out = String::new();
        while self.current_char().is_some() {
            if self.at_str_ci(terminator) {
                self.pos += terminator.chars().count();
                return out;
            }
            if let Some(c) = self.current_char() {
                out.push(c);
            }
            self.pos += 1;
        }
        out
    }

    fn text(&mut self) -> Token {
        let mut raw = String::new();
        while let Some(c) = self.current_char() {
            if c == '<' {
                break;
            }
            raw.push(c);
            self.pos += 1;
        }
        Token::Text(decode_text(&raw))
    }

    fn tag_open(&mut self) -> Token {
        if self.at_str_ci("<!--") {
            self.pos += 4;
            return Token::Comment(self.consume_until("-->"));
        }
        if self.at_str_ci("<!doctype") {
            self.pos += 9;
            let body = self.consume_until(">");
            let name = body.split_whitespace().next().unwrap_or("").to_ascii_lowercase();
            return Token::Doctype { name };
        }
        if self.at_str_ci("<!") || self.at_str_ci("<?") {
            self.pos += 2;
            return Token::Comment(self.consume_until(">"));
        }
        match self.peek(1) {
            Some('/') if matches!(self.peek(2), Some(c) if c.is_ascii_alphabetic()) => {
                self.pos += 2;
                self.end_tag()
            }
            Some(c) if c.is_ascii_alphabetic() => {
                self.pos += 1;
                self.start_tag()
            }
            _ => {
                self.pos += 1;
                Token::Text("<".to_string())
            }
        }
    }

    fn tag_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.current_char() {
            if c.is_ascii_whitespace() || c == '/' || c == '>' {
                break;
            }
            name.push(c.to_ascii_lowercase());
            self.pos += 1;
        }
        name
    }

    fn end_tag(&mut self) -> Token {
        let name = self.tag_name();
        self.consume_until(">");
        Token::EndTag { name }
    }

    fn start_tag(&mut self) -> Token {
        let name = self.tag_name();
        let mut attributes = Attributes::new();
        let mut self_closing = false;

        loop {
            self.skip_whitespace();
            match self.current_char() {
                None => break,
                Some('>') => {
                    self.pos += 1;
                    break;
                }
                Some('/') => {
                    self.pos += 1;
                    if self.current_char() == Some('>') {
                        self.pos += 1;
                        self_closing = true;
                        break;
                    }
                }
                Some(_) => {
                    let (attr_name, value) = self.attribute();
                    if !attr_name.is_empty()
                        && !attributes.iter().any(|(existing, _)| *existing == attr_name)
                    {
                        attributes.push((attr_name, value));
                    }
                }
            }
        }

        if !self_closing && is_raw_text_element(&name) {
            self.raw_text_tag = Some(name.clone());
        }

        Token::StartTag {
            name,
            attributes,
            self_closing,
        }
    }

    fn attribute(&mut self) -> (String, String) {
        let mut name = String::new();
        while let Some(c) = self.current_char() {
            if c.is_ascii_whitespace() || c == '=' || c == '>' || c == '/' {
                break;
            }
            name.push(c.to_ascii_lowercase());
            self.pos += 1;
        }
        // Stray characters such as a lone quote would otherwise stall the loop.
        if name.is_empty() {
            self.pos += 1;
            return (name, String::new());
        }

        self.skip_whitespace();
        if self.current_char() != Some('=') {
            return (name, String::new());
        }
        self.pos += 1;
        self.skip_whitespace();

        let raw = match self.current_char() {
            Some(quote @ ('"' | '\'')) => {
                self.pos += 1;
                let mut value = String::new();
                while let Some(c) = self.current_char() {
                    self.pos += 1;
                    if c == quote {
                        break;
                    }
                    value.push(c);
                }
                value
            }
            _ => {
                let mut value = String::new();
                while let Some(c) = self.current_char() {
                    if c.is_ascii_whitespace() || c == '>' {
                        break;
                    }
                    value.push(c);
                    self.pos += 1;
                }
                value
            }
        };
        (name, decode_text(&raw))
    }

    /// Consume raw text up to the matching end tag, leaving the end tag in
    /// the input
    fn consume_raw_text(&mut self, tag: &str) -> String {
        let closing = format!("</{}", tag);
        let mut out = String::new();
        while let Some(c) = self.current_char() {
            if self.at_str_ci(&closing) {
                let after = self.peek(closing.chars().count());
                if matches!(after, None | Some('>') | Some('/'))
                    || after.map(|c| c.is_ascii_whitespace()).unwrap_or(false)
                {
                    break;
                }
            }
            out.push(c);
            self.pos += 1;
        }
        if tag == "script" || tag == "style" {
            out
        } else {
            decode_text(&out)
        }
    }
}

impl Iterator for Tokenizer {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        match self.next_token() {
            Token::Eof => None,
            token => Some(token),
        }
    }
}
