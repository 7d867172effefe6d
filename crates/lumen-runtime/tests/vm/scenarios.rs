//! End-to-end scenarios: whole programs with pinned stdout.

use super::*;
use pretty_assertions::assert_eq;
use rstest::rstest;

#[rstest]
#[case::arithmetic("dump 1 + 2 * 3;", "7\n")]
#[case::for_loop(
    "let a = 0; for (let i = 1; i <= 3; i += 1) { a = a + i; } dump a;",
    "6\n"
)]
#[case::closure(
    "fun mk() { let x = 10; fun inner() { return x; } return inner; } dump mk()();",
    "10\n"
)]
#[case::inheritance(
    "class A { f() { return 1; } } class B < A { f() { return super.f() + 1; } } dump B().f();",
    "2\n"
)]
#[case::table(
    "let t = { \"a\": 1 }; t[\"b\"] = 2; dump t[\"a\"] + t[\"b\"];",
    "3\n"
)]
#[case::while_break(
    "let i = 0; while (true) { if (i == 3) break; i = i + 1; } dump i;",
    "3\n"
)]
fn test_core_scenarios(#[case] source: &str, #[case] expected: &str) {
    assert_eq!(run_ok(source), expected);
}

#[test]
fn test_fibonacci() {
    let source = "
        fun fib(n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }
        dump fib(10);
    ";
    assert_eq!(run_ok(source), "55\n");
}

#[test]
fn test_dump_value_formats() {
    assert_eq!(run_ok("dump nil;"), "nil\n");
    assert_eq!(run_ok("dump true;"), "true\n");
    assert_eq!(run_ok("dump 2.5;"), "2.5\n");
    assert_eq!(run_ok("dump \"plain\";"), "plain\n");
    assert_eq!(run_ok("dump [1, \"a\", nil];"), "[1, \"a\", nil]\n");
    assert_eq!(run_ok("dump { \"k\": [true] };"), "{\"k\": [true]}\n");
    assert_eq!(run_ok("fun f() {} dump f;"), "<fn f>\n");
    assert_eq!(run_ok("class A {} dump A;"), "<class A>\n");
    assert_eq!(run_ok("class A {} dump A();"), "<instance of A>\n");
    assert_eq!(run_ok("class A { m() {} } dump A().m;"), "<bound method>\n");
    assert_eq!(run_ok("dump clock;"), "<native fn>\n");
}

#[test]
fn test_string_escapes() {
    assert_eq!(run_ok(r#"dump "a\tb";"#), "a\tb\n");
    assert_eq!(run_ok(r#"dump "line\nbreak";"#), "line\nbreak\n");
    assert_eq!(run_ok(r#"dump "say \"hi\"";"#), "say \"hi\"\n");
}

#[test]
fn test_number_literal_prefixes() {
    assert_eq!(run_ok("dump 0x1F;"), "31\n");
    assert_eq!(run_ok("dump 0b101;"), "5\n");
    assert_eq!(run_ok("dump 0o17;"), "15\n");
}

#[test]
fn test_globals_and_shadowing() {
    let source = "
        let x = \"global\";
        {
            let x = \"local\";
            dump x;
        }
        dump x;
    ";
    assert_eq!(run_ok(source), "local\nglobal\n");
}

#[test]
fn test_natives() {
    assert_eq!(run_ok("dump typeof(clock());"), "number\n");
    assert_eq!(run_ok("dump len(\"hello\");"), "5\n");
    assert_eq!(run_ok("dump len([1, 2, 3]);"), "3\n");
    assert_eq!(run_ok("dump typeof([]);"), "array\n");
    assert_eq!(run_ok("dump typeof({});"), "table\n");
    assert_eq!(run_ok("dump typeof(nil);"), "nil\n");
    assert_eq!(run_ok("dump str(42) + \"!\";"), "42!\n");
}

#[test]
fn test_module_registry() {
    assert_eq!(run_ok("let m = module(\"math\"); dump m.sqrt(16);"), "4\n");
    assert_eq!(run_ok("let m = module(\"math\"); dump m.pow(2, 10);"), "1024\n");
    assert_eq!(
        run_ok("let m = module(\"math\"); dump m.floor(2.9) + m.ceil(0.1);"),
        "3\n"
    );
    assert_eq!(
        run_ok("dump module(\"math\").pi;"),
        format!("{}\n", std::f64::consts::PI)
    );
    assert_eq!(run_ok("dump typeof(module(\"time\").now());"), "number\n");
    let report = run_runtime_error("module(\"nope\");");
    assert_eq!(report.message, "Unknown module 'nope'.");
}

#[test]
fn test_gc_survives_allocation_churn() {
    // Enough garbage to force several collections mid-run; correctness of
    // the survivors is the assertion.
    let source = "
        let a = [];
        for (let i = 0; i < 300; i += 1) {
            a = a + [i];
        }
        dump a[0] + a[299];
        let s = \"\";
        for (let i = 0; i < 64; i += 1) {
            s = s + \"x\";
        }
        dump len(s);
    ";
    assert_eq!(run_ok(source), "299\n64\n");
}
