/// The kinds of spans the manifest lexer distinguishes.
///
/// Manifests are JSON with optional `//` and `/* */` comments. The lexer only
/// needs to know enough about the text to avoid treating `//` inside a string
/// (a URL, say) as a comment.
#[derive(Debug, PartialEq, Clone)]
pub enum TokenType {
    /// Represents the end of the input.
    Eof,
    /// Anything that is not a string or a comment: punctuation, numbers,
    /// keywords and whitespace.
    Text,
    /// A double quoted string literal, quotes and escapes included verbatim.
    String,
    /// A comment starting with `//` and continuing to the end of the line.
    LineComment,
    /// A comment enclosed in `/*` and `*/`. An unterminated block comment
    /// runs to the end of the input.
    BlockComment,
}

/// A token with its type and byte position
#[derive(Debug, Clone)]
pub struct Token {
    pub ttype: TokenType,
    pub pos_start: usize,
    pub pos_end: usize,
}

impl Token {
    pub fn new(ttype: TokenType, pos_start: usize, pos_end: usize) -> Token {
        Token {
            ttype,
            pos_start,
            pos_end,
        }
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.ttype, TokenType::LineComment | TokenType::BlockComment)
    }
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().peekable(),
            position: 0,
        }
    }

    pub fn lex(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            if token.ttype == TokenType::Eof {
                tokens.push(token);
                break;
            }
            tokens.push(token);
        }
        tokens
    }

    pub fn next_token(&mut self) -> Token {
        let start_pos = self.position;

        let ttype = match self.advance() {
            Some('"') => self.read_string(),
            Some('/') if self.peek() == Some(&'/') => self.read_line_comment(),
            Some('/') if self.peek() == Some(&'*') => self.read_block_comment(),
            Some(_) => self.read_text(),
            None => TokenType::Eof,
        };

        Token::new(ttype, start_pos, self.position)
    }

    /// The source slice covered by `token`.
    pub fn slice(&self, token: &Token) -> &'a str {
        &self.input[token.pos_start..token.pos_end]
    }

    fn advance(&mut self) -> Option<char> {
        let char = self.chars.next();
        if let Some(c) = char {
            self.position += c.len_utf8();
        }
        char
    }

    fn peek(&mut self) -> Option<&char> {
        self.chars.peek()
    }

    fn read_text(&mut self) -> TokenType {
        while let Some(&c) = self.peek() {
            if c == '"' || c == '/' {
                break;
            }
            self.advance();
        }
        TokenType::Text
    }

    fn read_string(&mut self) -> TokenType {
        while let Some(c) = self.advance() {
            match c {
                '\\' => {
                    self.advance();
                }
                '"' => break,
                _ => {}
            }
        }
        TokenType::String
    }

    fn read_line_comment(&mut self) -> TokenType {
        while let Some(&c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
        TokenType::LineComment
    }

    fn read_block_comment(&mut self) -> TokenType {
        // consume the opening `*`
        self.advance();
        let mut previous = '\0';
        while let Some(c) = self.advance() {
            if previous == '*' && c == '/' {
                break;
            }
            previous = c;
        }
        TokenType::BlockComment
    }
}

/// Removes `//` and `/* */` comments from a JSON document.
///
/// Comments are replaced by spaces while newlines are kept, so line and column
/// numbers reported by the JSON parser still point into the original text.
pub fn strip_comments(input: &str) -> String {
    let mut lexer = Lexer::new(input);
    let mut output = String::with_capacity(input.len());

    for token in lexer.lex() {
        let text = lexer.slice(&token);
        if token.is_comment() {
            output.extend(text.chars().map(|c| if c == '\n' { '\n' } else { ' ' }));
        } else {
            output.push_str(text);
        }
    }

    output
}
