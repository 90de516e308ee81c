use std::fmt;

use thiserror::Error;

/// One lexical unit of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    /// `|`
    Pipe,
    /// `<`
    RedirectIn,
    /// `>`
    RedirectOut,
    /// `&`
    Background,
}

impl Token {
    pub fn is_word(&self) -> bool {
        matches!(self, Token::Word(_))
    }

    fn is_redirect(&self) -> bool {
        matches!(self, Token::RedirectIn | Token::RedirectOut)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(word) => f.write_str(word),
            Token::Pipe => f.write_str("|"),
            Token::RedirectIn => f.write_str("<"),
            Token::RedirectOut => f.write_str(">"),
            Token::Background => f.write_str("&"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("unmatched quote")]
    UnmatchedQuote,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("missing command name")]
    MissingCommand,
    #[error("multiple redirection of standard out")]
    MultipleRedirectOut,
    #[error("standard output redirection without file name")]
    MissingRedirectOut,
    #[error("multiple redirection of standard input")]
    MultipleRedirectIn,
    #[error("standard input redirection without file name")]
    MissingRedirectIn,
    #[error("invalid use of background")]
    InvalidBackground,
}

/// States for the tokenizer state machine.
enum State {
    /// Between tokens — whitespace is skipped
    Normal,
    /// Building an unquoted word — whitespace and operators end it
    InWord,
    InDoubleQuote,
    InSingleQuote,
}

fn operator(ch: char) -> Option<Token> {
    match ch {
        '|' => Some(Token::Pipe),
        '<' => Some(Token::RedirectIn),
        '>' => Some(Token::RedirectOut),
        '&' => Some(Token::Background),
        _ => None,
    }
}

/// Split a raw input line into tokens.
///
/// Quotes group text literally and are removed; operators are recognized
/// only outside quotes and do not need surrounding whitespace.
pub fn lex(input: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;

    for ch in input.chars() {
        match (&state, ch) {
            (State::Normal, ' ' | '\t' | '\n' | '\r') => {}
            (State::Normal, '"') => state = State::InDoubleQuote,
            (State::Normal, '\'') => state = State::InSingleQuote,
            (State::Normal, c) => match operator(c) {
                Some(op) => tokens.push(op),
                None => {
                    current.push(c);
                    state = State::InWord;
                }
            },

            (State::InWord, ' ' | '\t' | '\n' | '\r') => {
                tokens.push(Token::Word(std::mem::take(&mut current)));
                state = State::Normal;
            }
            (State::InWord, '"') => state = State::InDoubleQuote,
            (State::InWord, '\'') => state = State::InSingleQuote,
            (State::InWord, c) => match operator(c) {
                Some(op) => {
                    tokens.push(Token::Word(std::mem::take(&mut current)));
                    tokens.push(op);
                    state = State::Normal;
                }
                None => current.push(c),
            },

            // A closing quote keeps the word open: `a"b c"d` is one word.
            (State::InDoubleQuote, '"') | (State::InSingleQuote, '\'') => {
                state = State::InWord;
            }
            (State::InDoubleQuote, c) | (State::InSingleQuote, c) => current.push(c),
        }
    }

    match state {
        State::InWord => tokens.push(Token::Word(current)),
        State::InDoubleQuote | State::InSingleQuote => return Err(LexError::UnmatchedQuote),
        State::Normal => {}
    }

    Ok(tokens)
}

/// Validate a token sequence before it reaches the launchers.
pub fn check(tokens: &[Token]) -> Result<(), SyntaxError> {
    if let Some(pos) = tokens.iter().position(|t| *t == Token::Background) {
        if pos + 1 != tokens.len() {
            return Err(SyntaxError::InvalidBackground);
        }
    }

    let body = match tokens.last() {
        Some(Token::Background) => &tokens[..tokens.len() - 1],
        _ => tokens,
    };

    for stage in body.split(|t| *t == Token::Pipe) {
        check_stage(stage)?;
    }
    Ok(())
}

fn check_stage(stage: &[Token]) -> Result<(), SyntaxError> {
    let mut has_command = false;
    let mut seen_in = false;
    let mut seen_out = false;
    let mut iter = stage.iter();

    while let Some(token) = iter.next() {
        match token {
            Token::Word(_) => has_command = true,
            Token::RedirectIn => {
                if seen_in {
                    return Err(SyntaxError::MultipleRedirectIn);
                }
                seen_in = true;
                if !iter.next().is_some_and(Token::is_word) {
                    return Err(SyntaxError::MissingRedirectIn);
                }
            }
            Token::RedirectOut => {
                if seen_out {
                    return Err(SyntaxError::MultipleRedirectOut);
                }
                seen_out = true;
                if !iter.next().is_some_and(Token::is_word) {
                    return Err(SyntaxError::MissingRedirectOut);
                }
            }
            Token::Pipe | Token::Background => return Err(SyntaxError::InvalidBackground),
        }
    }

    if !has_command {
        return Err(SyntaxError::MissingCommand);
    }
    Ok(())
}

/// Number of `|` separators in the sequence.
pub fn count_pipes(tokens: &[Token]) -> usize {
    tokens.iter().filter(|t| **t == Token::Pipe).count()
}

/// Remove a trailing `&`, returning whether one was present.
pub fn strip_background(tokens: &mut Vec<Token>) -> bool {
    if tokens.last() == Some(&Token::Background) {
        tokens.pop();
        true
    } else {
        false
    }
}

/// Human-readable form of a token range, used as a job label.
pub fn render(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Redirection markers consume the following word.
pub(crate) fn is_redirect_target(tokens: &[Token], index: usize) -> bool {
    index > 0 && tokens[index - 1].is_redirect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(s: &str) -> Token {
        Token::Word(s.to_string())
    }

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(lex("echo  hi\tthere").unwrap(), vec![word("echo"), word("hi"), word("there")]);
    }

    #[test]
    fn operators_without_spaces() {
        assert_eq!(
            lex("cat<in.txt|sort>out.txt&").unwrap(),
            vec![
                word("cat"),
                Token::RedirectIn,
                word("in.txt"),
                Token::Pipe,
                word("sort"),
                Token::RedirectOut,
                word("out.txt"),
                Token::Background,
            ]
        );
    }

    #[test]
    fn quotes_protect_operators_and_spaces() {
        assert_eq!(lex("echo 'a | b' \"c > d\"").unwrap(), vec![word("echo"), word("a | b"), word("c > d")]);
    }

    #[test]
    fn adjacent_quotes_join_one_word() {
        assert_eq!(lex("he\"llo\"' world'").unwrap(), vec![word("hello world")]);
    }

    #[test]
    fn empty_quotes_are_an_empty_word() {
        assert_eq!(lex("echo ''").unwrap(), vec![word("echo"), word("")]);
    }

    #[test]
    fn unmatched_quote_is_error() {
        assert_eq!(lex("echo \"oops"), Err(LexError::UnmatchedQuote));
        assert_eq!(lex("echo 'oops"), Err(LexError::UnmatchedQuote));
    }

    #[test]
    fn blank_line_is_empty() {
        assert!(lex("   \n").unwrap().is_empty());
    }

    #[test]
    fn check_accepts_pipeline_with_redirections() {
        let tokens = lex("sort < in.txt | uniq | wc -l > out.txt &").unwrap();
        assert_eq!(check(&tokens), Ok(()));
    }

    #[test]
    fn check_rejects_missing_command() {
        assert_eq!(check(&lex("| wc").unwrap()), Err(SyntaxError::MissingCommand));
        assert_eq!(check(&lex("ls |").unwrap()), Err(SyntaxError::MissingCommand));
        assert_eq!(check(&lex("> out.txt").unwrap()), Err(SyntaxError::MissingCommand));
    }

    #[test]
    fn check_rejects_double_redirection() {
        assert_eq!(check(&lex("ls > a > b").unwrap()), Err(SyntaxError::MultipleRedirectOut));
        assert_eq!(check(&lex("cat < a < b").unwrap()), Err(SyntaxError::MultipleRedirectIn));
    }

    #[test]
    fn check_rejects_redirection_without_file() {
        assert_eq!(check(&lex("ls >").unwrap()), Err(SyntaxError::MissingRedirectOut));
        assert_eq!(check(&lex("cat < | wc").unwrap()), Err(SyntaxError::MissingRedirectIn));
    }

    #[test]
    fn check_rejects_misplaced_background() {
        assert_eq!(check(&lex("sleep 1 & ls").unwrap()), Err(SyntaxError::InvalidBackground));
        assert_eq!(check(&lex("a & | b").unwrap()), Err(SyntaxError::InvalidBackground));
    }

    #[test]
    fn strip_background_flag() {
        let mut tokens = lex("sleep 5 &").unwrap();
        assert!(strip_background(&mut tokens));
        assert_eq!(tokens, vec![word("sleep"), word("5")]);
        assert!(!strip_background(&mut tokens));
    }

    #[test]
    fn render_and_count() {
        let tokens = lex("a|b | c>f").unwrap();
        assert_eq!(count_pipes(&tokens), 2);
        assert_eq!(render(&tokens), "a | b | c > f");
    }
}
