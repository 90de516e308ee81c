use std::io::Write;

use crate::session::Session;

/// The list of all builtin command names.
const BUILTINS: &[&str] = &["cd", "exit", "jobs"];

#[derive(Debug, PartialEq, Eq)]
pub enum BuiltinAction {
    Continue(i32),
    Exit(i32),
}

/// Returns true if the command name is a shell builtin.
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Execute a builtin command in the shell process, writing output to the
/// provided streams.
pub fn execute(
    program: &str,
    args: &[String],
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
    session: &Session,
) -> BuiltinAction {
    match program {
        "cd" => BuiltinAction::Continue(builtin_cd(args, stderr)),
        "exit" => builtin_exit(args, stderr),
        "jobs" => BuiltinAction::Continue(builtin_jobs(session, stdout)),
        _ => {
            // Only names from BUILTINS reach this point.
            let _ = writeln!(stderr, "jsh: bug: unknown builtin: {program}");
            std::process::exit(1);
        }
    }
}

fn builtin_cd(args: &[String], stderr: &mut dyn Write) -> i32 {
    let target = match args {
        [] => match std::env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                let _ = writeln!(stderr, "cd: HOME variable not set");
                return 1;
            }
        },
        [dir] => dir.clone(),
        _ => {
            let _ = writeln!(stderr, "cd: takes one parameter");
            return 1;
        }
    };

    if let Err(e) = std::env::set_current_dir(&target) {
        let _ = writeln!(stderr, "cd: {target}: {e}");
        return 1;
    }

    0
}

fn builtin_exit(args: &[String], stderr: &mut dyn Write) -> BuiltinAction {
    if args.is_empty() {
        BuiltinAction::Exit(0)
    } else {
        let _ = writeln!(stderr, "exit: does not take any parameters");
        BuiltinAction::Continue(1)
    }
}

/// List background jobs that are still alive.
fn builtin_jobs(session: &Session, stdout: &mut dyn Write) -> i32 {
    for (pgid, label) in session.list_running_jobs() {
        let _ = writeln!(stdout, "[{pgid}]  Running  {label}");
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_builtins() {
        assert!(is_builtin("cd"));
        assert!(is_builtin("exit"));
        assert!(is_builtin("jobs"));
        assert!(!is_builtin("ls"));
    }

    #[test]
    fn exit_rejects_arguments() {
        let mut err = Vec::new();
        assert_eq!(builtin_exit(&[], &mut err), BuiltinAction::Exit(0));
        assert_eq!(builtin_exit(&["3".to_string()], &mut err), BuiltinAction::Continue(1));
        assert!(String::from_utf8_lossy(&err).contains("does not take any parameters"));
    }

    #[test]
    fn cd_rejects_extra_arguments() {
        let mut err = Vec::new();
        assert_eq!(builtin_cd(&["a".into(), "b".into()], &mut err), 1);
        assert!(String::from_utf8_lossy(&err).contains("one parameter"));
    }

    #[test]
    fn cd_reports_missing_directory() {
        let mut err = Vec::new();
        assert_eq!(builtin_cd(&["/definitely/not/here".into()], &mut err), 1);
        assert!(String::from_utf8_lossy(&err).starts_with("cd: /definitely/not/here"));
    }
}
