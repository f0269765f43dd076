pub mod error;
mod lexer;
pub mod punct;
pub mod token;

pub use error::{ErrorSink, ScanError, ScanResult, StderrSink};
pub use lexer::{Lexer, ScanFlags, ScanNumber};
pub use punct::{PunctDef, PunctId, PunctTable, DEFAULT_PUNCTUATIONS};
pub use token::{NumberFlags, Token, TokenKind};
