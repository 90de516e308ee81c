#[cfg(not(unix))]
compile_error!("jsh drives Unix process groups and terminals and only builds on Unix");

mod builtins;
mod command;
mod config;
mod error;
mod jobs;
mod launch;
mod process;
mod reaper;
mod session;
mod status;
mod terminal;
mod token;

use std::io::{self, BufRead, Write};

use tracing_subscriber::EnvFilter;

use builtins::BuiltinAction;
use config::Config;
use session::Session;
use token::Token;

fn init_logging() {
    let filter = EnvFilter::try_from_env("JSH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Signal dispositions of the shell process itself.
fn install_signal_handlers() -> io::Result<()> {
    process::ignore_job_control_signals()?;

    // The ctrlc thread inherits this mask, so SIGCHLD is only ever
    // delivered to the main thread, where launches can block it.
    {
        let _block = process::SignalBlock::new(&[libc::SIGCHLD])?;
        ctrlc::set_handler(|| {
            println!();
            let _ = io::stdout().flush();
        })
        .map_err(io::Error::other)?;
    }

    reaper::install()
}

fn main() {
    init_logging();

    let (config, errors) = Config::from_env();
    for err in errors {
        eprintln!("jsh: {err}");
    }

    if let Err(err) = install_signal_handlers() {
        eprintln!("jsh: failed to set up signal handling: {err}");
        std::process::exit(1);
    }

    let mut session = Session::new(config, reaper::state());
    let code = run(&mut session);

    tracing::debug!(outstanding = session.outstanding_jobs(), "shell exiting");
    drop(session);
    std::process::exit(code);
}

fn run(session: &mut Session) -> i32 {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();

    loop {
        for done in session.drain_completions() {
            println!("[{}]  Done  {}", done.pgid, done.label);
        }

        print!("{}", session.config().prompt);
        if stdout.flush().is_err() {
            return 0;
        }

        let mut input = String::new();
        let read = stdin.lock().read_line(&mut input);
        match read {
            Ok(0) => {
                println!();
                return 0;
            }
            Ok(_) => {
                if let Some(code) = handle_line(session, &input, &mut stdout, &mut stderr) {
                    return code;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                eprintln!("jsh: error reading input: {err}");
                return 1;
            }
        }
    }
}

/// Lex, check and dispatch one line. Returns an exit code when the shell
/// should stop.
fn handle_line(
    session: &mut Session,
    line: &str,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Option<i32> {
    let mut tokens = match token::lex(line) {
        Ok(tokens) if tokens.is_empty() => return None,
        Ok(tokens) => tokens,
        Err(err) => {
            eprintln!("jsh: {err}");
            return None;
        }
    };

    if let Err(err) = token::check(&tokens) {
        eprintln!("jsh: {err}");
        return None;
    }

    if let Some(Token::Word(program)) = tokens.first() {
        if builtins::is_builtin(program) {
            let args: Vec<String> = tokens[1..]
                .iter()
                .filter_map(|t| match t {
                    Token::Word(w) => Some(w.clone()),
                    _ => None,
                })
                .collect();
            return match builtins::execute(program, &args, stdout, stderr, session) {
                BuiltinAction::Continue(_) => None,
                BuiltinAction::Exit(code) => Some(code),
            };
        }
    }

    let background = token::strip_background(&mut tokens);
    match session.launch(&tokens, background) {
        Ok(pgid) if background => {
            println!("[{pgid}]  Running  {}", token::render(&tokens));
        }
        Ok(_) => {}
        Err(err) => {
            if err.is_out_of_memory() {
                tracing::error!("allocation failed while building the command line");
            }
            eprintln!("jsh: {err}");
        }
    }
    None
}
