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
fn varargs_forward_with_commas() {
    let out = preprocess("#define V(x, ...) f(x, __VA_ARGS__)\nV(1, 2, 3)\n");
    assert!(squash(&out).contains("f(1,2,3)"), "output was:\n{out}");
}

#[test]
fn varargs_can_be_a_single_extra_argument() {
    let out = preprocess("#define V(x, ...) g(x, __VA_ARGS__)\nV(a, b)\n");
    assert!(squash(&out).contains("g(a,b)"), "output was:\n{out}");
}

#[test]
fn varargs_only_macro() {
    let out = preprocess("#define ALL(...) [__VA_ARGS__]\nALL(1, 2)\n");
    assert!(squash(&out).contains("[1,2]"), "output was:\n{out}");
}

#[test]
fn more_arguments_than_parameters_is_allowed_for_varargs() {
    let out = preprocess("#define V(x, ...) x\nV(1, 2, 3, 4, 5)\n");
    assert!(squash(&out).contains('1'), "output was:\n{out}");
}

#[test]
fn too_many_arguments_without_varargs_is_an_error() {
    let err = preprocess_err("#define ONE(x) x\nONE(1, 2)\n");
    assert!(
        err.to_string().contains("expected 1 parameters"),
        "error was: {err}"
    );
}

#[test]
fn ellipsis_must_be_last() {
    let err = preprocess_err("#define BAD(..., x) x\nBAD(1, 2)\n");
    assert!(err.to_string().contains("..."), "error was: {err}");
}

#[test]
fn va_args_outside_a_variadic_expansion_is_an_error() {
    let err = preprocess_err("__VA_ARGS__\n");
    assert!(
        err.to_string().contains("__VA_ARGS__"),
        "error was: {err}"
    );
}

#[test]
fn varargs_pass_through_a_nested_call() {
    let src = "#define INNER(a, b) (a | b)\n\
               #define OUTER(...) INNER(__VA_ARGS__)\n\
               OUTER(x, y)\n";
    let out = preprocess(src);
    assert!(squash(&out).contains("(x|y)"), "output was:\n{out}");
}
