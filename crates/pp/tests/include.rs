use std::fs;

use pp::{Preprocessor, PpFlags};
use tempfile::TempDir;

fn squash(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn preprocess_file(path: &std::path::Path, flags: PpFlags) -> anyhow::Result<String> {
    let mut pp = Preprocessor::new();
    pp.init_from_file(path, flags)?;
    pp.preprocess()
}

#[test]
fn quoted_include_pulls_the_file_in() {
    let dir = TempDir::new().unwrap();
    let inc = dir.path().join("defs.h");
    fs::write(&inc, "#define WIDTH 640\n").unwrap();
    let main = dir.path().join("main.c");
    fs::write(
        &main,
        format!("#include \"{}\"\nint w = WIDTH;\n", inc.display()),
    )
    .unwrap();

    let out = preprocess_file(&main, PpFlags::empty()).unwrap();
    assert!(squash(&out).contains("intw=640;"), "output was:\n{out}");
}

#[test]
fn angle_include_uses_search_paths() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("lib.h"), "from_search_path\n").unwrap();
    let main = dir.path().join("main.c");
    fs::write(&main, "#include <lib.h>\nrest\n").unwrap();

    let mut pp = Preprocessor::new();
    pp.add_default_search_path(dir.path().to_string_lossy());
    pp.init_from_file(&main, PpFlags::empty()).unwrap();
    let out = pp.preprocess().unwrap();
    assert!(out.contains("from_search_path"), "output was:\n{out}");
    assert!(out.contains("rest"));
}

#[test]
fn include_resumes_the_parent_afterwards() {
    let dir = TempDir::new().unwrap();
    let inc = dir.path().join("middle.h");
    fs::write(&inc, "middle\n").unwrap();
    let main = dir.path().join("main.c");
    fs::write(
        &main,
        format!("before\n#include \"{}\"\nafter\n", inc.display()),
    )
    .unwrap();

    let out = preprocess_file(&main, PpFlags::empty()).unwrap();
    let squashed = squash(&out);
    assert!(squashed.contains("before"));
    assert!(squashed.contains("middle"));
    assert!(squashed.contains("after"));
    let b = squashed.find("before").unwrap();
    let m = squashed.find("middle").unwrap();
    let a = squashed.find("after").unwrap();
    assert!(b < m && m < a, "bad ordering:\n{out}");
}

#[test]
fn pragma_once_skips_the_second_inclusion() {
    let dir = TempDir::new().unwrap();
    let inc = dir.path().join("once.h");
    fs::write(&inc, "#pragma once\npayload\n").unwrap();
    let main = dir.path().join("main.c");
    let inc_line = format!("#include \"{}\"\n", inc.display());
    fs::write(&main, format!("{inc_line}{inc_line}done\n")).unwrap();

    let mut pp = Preprocessor::new();
    pp.init_from_file(&main, PpFlags::empty()).unwrap();
    let out = pp.preprocess().unwrap();
    assert_eq!(out.matches("payload").count(), 1, "output was:\n{out}");
    assert!(out.contains("done"));
    assert_eq!(pp.error_count(), 0);
}

#[test]
fn missing_include_is_an_error() {
    let dir = TempDir::new().unwrap();
    let main = dir.path().join("main.c");
    fs::write(&main, "#include \"no_such_file.h\"\n").unwrap();

    let err = preprocess_file(&main, PpFlags::NO_ERRORS).unwrap_err();
    assert!(
        err.to_string().contains("no_such_file.h"),
        "error was: {err}"
    );
}

#[test]
fn includes_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    let inc = dir.path().join("inc.h");
    fs::write(&inc, "payload\n").unwrap();
    let main = dir.path().join("main.c");
    fs::write(&main, format!("#include \"{}\"\n", inc.display())).unwrap();

    let err = preprocess_file(&main, PpFlags::NO_ERRORS | PpFlags::NO_INCLUDES).unwrap_err();
    assert!(err.to_string().contains("disabled"), "error was: {err}");
}

#[test]
fn nested_includes() {
    let dir = TempDir::new().unwrap();
    let deepest = dir.path().join("deepest.h");
    fs::write(&deepest, "#define DEEP 3\n").unwrap();
    let middle = dir.path().join("middle.h");
    fs::write(
        &middle,
        format!("#include \"{}\"\n#define MID DEEP\n", deepest.display()),
    )
    .unwrap();
    let main = dir.path().join("main.c");
    fs::write(
        &main,
        format!("#include \"{}\"\nint d = MID;\n", middle.display()),
    )
    .unwrap();

    let out = preprocess_file(&main, PpFlags::empty()).unwrap();
    assert!(squash(&out).contains("intd=3;"), "output was:\n{out}");
}

#[test]
fn pragma_warning_toggles_suppression() {
    let dir = TempDir::new().unwrap();
    let main = dir.path().join("main.c");
    // The nested block comment warns only while warnings are enabled.
    fs::write(
        &main,
        "#pragma warning:disable\n/* /* */\n#pragma warning:enable\n/* /* */\nx\n",
    )
    .unwrap();

    let mut pp = Preprocessor::new();
    pp.init_from_file(&main, PpFlags::empty()).unwrap();
    let out = pp.preprocess().unwrap();
    assert!(out.contains('x'));
    // Both comments bump the counter; only the second is reported.
    assert_eq!(pp.warning_count(), 2);
}

#[test]
fn unknown_pragma_warns_and_continues() {
    let mut pp = Preprocessor::new();
    pp.init_from_str(
        "#pragma mystery setting\nstill here\n",
        "(test)",
        PpFlags::NO_WARNINGS,
    )
    .unwrap();
    let out = pp.preprocess().unwrap();
    assert!(out.contains("still here"));
    assert_eq!(pp.warning_count(), 1);
}
