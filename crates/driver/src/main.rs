use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};

use lex::{Lexer, ScanFlags, Token, TokenKind};
use pp::{EvalValue, Preprocessor, PpFlags};

#[derive(Parser, Debug)]
#[command(
    name = "prescan",
    about = "Scanner and preprocessor for C-like source",
    long_about = "Scanner and preprocessor for C-like scripts, configuration files and source code",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Preprocess a source file and print the flattened output
    Preprocess(PreprocessArgs),
    /// Scan a source file and print one token per line
    Tokens(TokensArgs),
    /// Evaluate a constant expression and print the result
    Eval {
        /// Expression, e.g. '2 * cos(PI)'
        expression: String,
    },
}

#[derive(Args, Debug)]
struct PreprocessArgs {
    /// Input source file
    input: PathBuf,
    /// Defines in the form NAME or NAME=VALUE
    #[arg(short = 'D', value_name = "NAME[=VALUE]")]
    define: Vec<String>,
    /// Undefine macro NAME
    #[arg(short = 'U', value_name = "NAME")]
    undef: Vec<String>,
    /// Add a search directory for #include <...> (repeatable)
    #[arg(short = 'I', value_name = "DIR")]
    include: Vec<PathBuf>,
    /// Line length hint for the minified output
    #[arg(long = "max-line-len", value_name = "N")]
    max_line_len: Option<usize>,
    /// Don't accept '$' as a directive introducer
    #[arg(long = "no-dollar")]
    no_dollar: bool,
    /// Report errors but keep going
    #[arg(long = "keep-going")]
    keep_going: bool,
}

#[derive(Args, Debug)]
struct TokensArgs {
    /// Input source file
    input: PathBuf,
    /// Allow path separators in names
    #[arg(long = "path-names")]
    path_names: bool,
    /// Allow names starting with a number
    #[arg(long = "number-names")]
    number_names: bool,
    /// Allow IPv4 addresses as numbers
    #[arg(long = "ip-addresses")]
    ip_addresses: bool,
    /// Allow 1.#INF style float exceptions
    #[arg(long = "float-exceptions")]
    float_exceptions: bool,
    /// Allow multi-character literals
    #[arg(long = "multi-char-literals")]
    multi_char_literals: bool,
    /// Scan whitespace-delimited strings only
    #[arg(long = "only-strings")]
    only_strings: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Preprocess(args) => cmd_preprocess(&args),
        Commands::Tokens(args) => cmd_tokens(&args),
        Commands::Eval { expression } => cmd_eval(&expression),
    }
}

fn cmd_preprocess(args: &PreprocessArgs) -> Result<()> {
    let mut pp = Preprocessor::new();

    for def in &args.define {
        let define_line = match def.split_once('=') {
            Some((name, value)) => format!("#define {name} {value}"),
            None => format!("#define {def} 1"),
        };
        if !pp.define(&define_line, true) {
            return Err(anyhow!("bad define: {def}"));
        }
    }
    for name in &args.undef {
        pp.undef(name);
    }
    for dir in &args.include {
        pp.add_default_search_path(dir.to_string_lossy());
    }
    if let Some(max) = args.max_line_len {
        pp.set_max_output_line_length(max);
    }

    let mut flags = PpFlags::empty();
    if args.no_dollar {
        flags |= PpFlags::NO_DOLLAR_PREPROC;
    }
    if args.keep_going {
        flags |= PpFlags::NO_FATAL_ERRORS;
    }

    pp.init_from_file(&args.input, flags)?;
    let out = pp.preprocess()?;
    println!("{out}");
    Ok(())
}

fn cmd_tokens(args: &TokensArgs) -> Result<()> {
    let mut flags = ScanFlags::empty();
    if args.path_names {
        flags |= ScanFlags::ALLOW_PATH_NAMES;
    }
    if args.number_names {
        flags |= ScanFlags::ALLOW_NUMBER_NAMES;
    }
    if args.ip_addresses {
        flags |= ScanFlags::ALLOW_IP_ADDRESSES;
    }
    if args.float_exceptions {
        flags |= ScanFlags::ALLOW_FLOAT_EXCEPTIONS;
    }
    if args.multi_char_literals {
        flags |= ScanFlags::ALLOW_MULTI_CHAR_LITERALS;
    }
    if args.only_strings {
        flags |= ScanFlags::ONLY_STRINGS;
    }

    let mut lexer = Lexer::from_file(&args.input, flags)?;
    while let Some(tok) = lexer.next_token()? {
        print_token(&tok);
    }
    Ok(())
}

fn print_token(tok: &Token) {
    let detail = match tok.kind() {
        TokenKind::Number => Token::flags_string(tok.flags()),
        TokenKind::Punctuation => format!("{:?}", tok.punct()),
        _ => String::new(),
    };
    if detail.is_empty() {
        println!("{:>5}  {:<12} {}", tok.line_number(), tok.kind().name(), tok);
    } else {
        println!(
            "{:>5}  {:<12} {}  [{}]",
            tok.line_number(),
            tok.kind().name(),
            tok,
            detail
        );
    }
}

fn cmd_eval(expression: &str) -> Result<()> {
    let mut pp = Preprocessor::new();
    match pp.eval(expression, true, true, false)? {
        EvalValue::Int(v) => println!("{v}"),
        EvalValue::Double(v) => println!("{v}"),
    }
    Ok(())
}
