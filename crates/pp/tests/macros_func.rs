use pp::{Preprocessor, PpFlags};

fn preprocess(src: &str) -> String {
    let mut pp = Preprocessor::new();
    pp.init_from_str(src, "(test)", PpFlags::empty()).unwrap();
    pp.preprocess().unwrap()
}

fn preprocess_err(src: &str) -> anyhow::Error {
    let mut pp = Preprocessor::new();
    pp.init_from_str(src, "(test)", PpFlags::NO_ERRORS).unwrap();
    pp.preprocess().unwrap_err()
}

fn squash(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

#[test]
fn textual_substitution_is_not_pre_evaluated() {
    let out = preprocess("#define SQUARE(x) ((x) * (x))\nSQUARE(3+1)\n");
    assert!(
        squash(&out).contains("((3+1)*(3+1))"),
        "output was:\n{out}"
    );
}

#[test]
fn two_parameters() {
    let out = preprocess("#define ADD(a, b) (a + b)\nint r = ADD(2, 40);\n");
    assert!(squash(&out).contains("intr=(2+40);"), "output was:\n{out}");
}

#[test]
fn arguments_with_nested_parentheses_and_commas() {
    let out = preprocess("#define FIRST(a, b) a\nFIRST(f(1, 2), 3)\n");
    assert!(squash(&out).contains("f(1,2)"), "output was:\n{out}");
    assert!(!squash(&out).contains('3'), "output was:\n{out}");
}

#[test]
fn arguments_are_expanded_before_substitution() {
    let out = preprocess("#define N 5\n#define WRAP(x) [x]\nWRAP(N)\n");
    assert!(squash(&out).contains("[5]"), "output was:\n{out}");
}

#[test]
fn nested_function_like_calls_in_a_body() {
    let src = "#define X 3\n#define TWICE(a) ADD(a, a)\n#define ADD(x,y) (x + y)\nint r = TWICE(X);\n";
    let out = preprocess(src);
    assert!(squash(&out).contains("intr=(3+3);"), "output was:\n{out}");
}

#[test]
fn wrong_argument_count_is_an_error() {
    let err = preprocess_err("#define PAIR(a, b) a b\nPAIR(1)\n");
    assert!(
        err.to_string().contains("expected 2 parameters"),
        "error was: {err}"
    );
}

#[test]
fn missing_call_parenthesis_is_an_error() {
    let err = preprocess_err("#define F(x) x\nF 1\n");
    assert!(
        err.to_string().contains("missing opening parenthesis"),
        "error was: {err}"
    );
}

#[test]
fn unbalanced_call_is_an_error() {
    let err = preprocess_err("#define F(x) x\nF(1\n");
    assert!(
        err.to_string().contains("missing closing parenthesis"),
        "error was: {err}"
    );
}

#[test]
fn empty_function_like_macro_requires_the_pair() {
    let out = preprocess("#define NOTHING() done\nNOTHING()\n");
    assert!(out.contains("done"), "output was:\n{out}");

    let err = preprocess_err("#define NOTHING() done\nNOTHING 1\n");
    assert!(
        err.to_string().contains("missing opening parenthesis"),
        "error was: {err}"
    );
}

#[test]
fn parameter_list_needs_to_touch_the_name() {
    // With whitespace before '(' the parentheses belong to the body.
    let out = preprocess("#define PAIR (a, b)\nPAIR\n");
    assert!(squash(&out).contains("(a,b)"), "output was:\n{out}");
}

#[test]
fn trailing_comma_in_parameter_list_is_an_error() {
    let err = preprocess_err("#define F(a,) a\nF(1)\n");
    assert!(
        err.to_string().contains("macro parameter list"),
        "error was: {err}"
    );
}
