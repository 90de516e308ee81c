use std::ffi::{CString, c_char};
use std::ops::Range;

use crate::error::LaunchError;
use crate::token::{self, Token};

/// argv plus the optional redirection targets of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub input: Option<String>,
    pub output: Option<String>,
}

impl CommandSpec {
    /// Build the command for `tokens[range]`.
    ///
    /// The range must already have passed the syntax check: every
    /// redirection marker is followed by a word and at least one word is
    /// left for argv.
    pub fn build(tokens: &[Token], range: Range<usize>) -> Result<Self, LaunchError> {
        let stage = &tokens[range];

        let count = stage
            .iter()
            .enumerate()
            .filter(|(i, t)| t.is_word() && !token::is_redirect_target(stage, *i))
            .count();

        let mut argv = Vec::new();
        argv.try_reserve_exact(count)
            .map_err(|_| LaunchError::out_of_memory())?;

        let mut input = None;
        let mut output = None;
        let mut iter = stage.iter();
        while let Some(tok) = iter.next() {
            match tok {
                Token::Word(word) => argv.push(word.clone()),
                Token::RedirectIn => input = next_word(&mut iter),
                Token::RedirectOut => output = next_word(&mut iter),
                Token::Pipe | Token::Background => {}
            }
        }

        Ok(CommandSpec { argv, input, output })
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// Convert to the C representation handed to `execvp` in the child.
    ///
    /// All allocation happens here, in the parent, before `fork`.
    pub fn prepare(&self) -> Result<ExecImage, LaunchError> {
        let nul_error = |what: &str| LaunchError::ExecFailed {
            program: self.program().to_string(),
            reason: format!("{what} contains a NUL byte"),
        };

        let mut argv = Vec::new();
        argv.try_reserve_exact(self.argv.len())
            .map_err(|_| LaunchError::out_of_memory())?;
        for arg in &self.argv {
            argv.push(CString::new(arg.as_bytes()).map_err(|_| nul_error("argument"))?);
        }
        if argv.is_empty() {
            return Err(LaunchError::ExecFailed {
                program: String::new(),
                reason: "empty command".to_string(),
            });
        }

        let mut argv_ptrs = Vec::new();
        argv_ptrs
            .try_reserve_exact(argv.len() + 1)
            .map_err(|_| LaunchError::out_of_memory())?;
        argv_ptrs.extend(argv.iter().map(|a| a.as_ptr()));
        argv_ptrs.push(std::ptr::null());

        let path = |p: &Option<String>| -> Result<Option<CString>, LaunchError> {
            p.as_deref()
                .map(|p| CString::new(p).map_err(|_| nul_error("redirection target")))
                .transpose()
        };

        Ok(ExecImage {
            input: path(&self.input)?,
            output: path(&self.output)?,
            argv,
            argv_ptrs,
        })
    }
}

fn next_word<'a>(iter: &mut impl Iterator<Item = &'a Token>) -> Option<String> {
    match iter.next() {
        Some(Token::Word(word)) => Some(word.clone()),
        _ => None,
    }
}

/// A CommandSpec in exec-ready form: NUL-terminated strings and a
/// null-terminated pointer array that borrows from them.
pub struct ExecImage {
    argv: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    pub(crate) input: Option<CString>,
    pub(crate) output: Option<CString>,
}

impl ExecImage {
    pub(crate) fn program(&self) -> &CString {
        &self.argv[0]
    }

    pub(crate) fn argv_ptr(&self) -> *const *const c_char {
        self.argv_ptrs.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::lex;

    fn spec(line: &str) -> CommandSpec {
        let tokens = lex(line).unwrap();
        CommandSpec::build(&tokens, 0..tokens.len()).unwrap()
    }

    #[test]
    fn plain_words_become_argv() {
        let spec = spec("ls -l /tmp");
        assert_eq!(spec.argv, vec!["ls", "-l", "/tmp"]);
        assert_eq!(spec.input, None);
        assert_eq!(spec.output, None);
    }

    #[test]
    fn redirection_targets_are_removed_from_argv() {
        let spec = spec("sort -r < in.txt > out.txt");
        assert_eq!(spec.argv, vec!["sort", "-r"]);
        assert_eq!(spec.input.as_deref(), Some("in.txt"));
        assert_eq!(spec.output.as_deref(), Some("out.txt"));
    }

    #[test]
    fn redirection_may_precede_arguments() {
        let spec = spec("> out.txt echo hi");
        assert_eq!(spec.argv, vec!["echo", "hi"]);
        assert_eq!(spec.output.as_deref(), Some("out.txt"));
    }

    #[test]
    fn builds_a_sub_range() {
        let tokens = lex("cat f | grep x > hits | wc").unwrap();
        let spec = CommandSpec::build(&tokens, 3..7).unwrap();
        assert_eq!(spec.argv, vec!["grep", "x"]);
        assert_eq!(spec.output.as_deref(), Some("hits"));
        assert_eq!(spec.program(), "grep");
    }

    #[test]
    fn argv_is_sized_exactly() {
        let spec = spec("echo a b > f");
        assert_eq!(spec.argv.capacity(), 3);
    }

    #[test]
    fn prepared_argv_is_null_terminated() {
        let image = spec("echo hi").prepare().unwrap();
        assert_eq!(image.program().to_str().unwrap(), "echo");
        let ptrs = image.argv_ptrs.as_slice();
        assert_eq!(ptrs.len(), 3);
        assert!(ptrs[2].is_null());
    }

    #[test]
    fn interior_nul_is_rejected_before_fork() {
        let spec = CommandSpec {
            argv: vec!["echo".into(), "a\0b".into()],
            input: None,
            output: None,
        };
        assert!(matches!(spec.prepare(), Err(LaunchError::ExecFailed { .. })));
    }
}
