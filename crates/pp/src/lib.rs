mod eval;
mod macros;
mod preprocessor;

pub use eval::{value_to_token, EvalError, EvalFlags, EvalValue, ExprEvaluator};
pub use macros::{hash_name, MacroDef, MacroTable};
pub use preprocessor::{Preprocessor, PpFlags};
