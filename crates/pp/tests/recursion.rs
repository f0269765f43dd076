use pp::{Preprocessor, PpFlags};

fn preprocess_err(src: &str) -> anyhow::Error {
    let mut pp = Preprocessor::new();
    pp.init_from_str(src, "(test)", PpFlags::NO_ERRORS).unwrap();
    pp.preprocess().unwrap_err()
}

#[test]
fn self_referential_macro_is_an_error() {
    let err = preprocess_err("#define X X\nX\n");
    assert!(
        err.to_string().contains("references itself"),
        "error was: {err}"
    );
}

#[test]
fn self_referential_function_like_macro_is_an_error() {
    let err = preprocess_err("#define F(x) F(x)\nF(1)\n");
    assert!(
        err.to_string().contains("references itself"),
        "error was: {err}"
    );
}

#[test]
fn self_reference_in_an_argument_is_an_error() {
    let err = preprocess_err("#define G(x) x\nG(G(1))\n");
    assert!(
        err.to_string().contains("references itself"),
        "error was: {err}"
    );
}

#[test]
fn mutual_recursion_is_cut_off() {
    let err = preprocess_err("#define A B\n#define B A\nA\n");
    assert!(
        err.to_string().contains("nested too deeply"),
        "error was: {err}"
    );
}

#[test]
fn deep_but_finite_nesting_is_fine() {
    let mut src = String::new();
    for i in 0..20 {
        src.push_str(&format!("#define L{} L{}\n", i, i + 1));
    }
    src.push_str("#define L20 bottom\nL0\n");

    let mut pp = Preprocessor::new();
    pp.init_from_str(&src, "(test)", PpFlags::empty()).unwrap();
    let out = pp.preprocess().unwrap();
    assert!(out.contains("bottom"), "output was:\n{out}");
}
