//! if/else, loops, break/continue, and switch lowering.

use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_if_else_branches() {
    assert_eq!(run_ok("if (1 < 2) dump \"then\"; else dump \"else\";"), "then\n");
    assert_eq!(run_ok("if (1 > 2) dump \"then\"; else dump \"else\";"), "else\n");
    assert_eq!(run_ok("if (false) dump \"skipped\";"), "");
}

#[test]
fn test_falsiness_in_conditions() {
    // Only nil and false are falsy.
    assert_eq!(run_ok("if (0) dump \"zero is truthy\";"), "zero is truthy\n");
    assert_eq!(run_ok("if (\"\") dump \"empty is truthy\";"), "empty is truthy\n");
    assert_eq!(run_ok("if (nil) dump \"no\"; else dump \"nil is falsy\";"), "nil is falsy\n");
}

#[test]
fn test_while_loop() {
    assert_eq!(
        run_ok("let n = 0; while (n < 4) { n += 1; } dump n;"),
        "4\n"
    );
}

#[test]
fn test_for_without_clauses() {
    let source = "
        let n = 0;
        for (;;) {
            n += 1;
            if (n == 5) break;
        }
        dump n;
    ";
    assert_eq!(run_ok(source), "5\n");
}

#[test]
fn test_continue_runs_for_increment() {
    // Skipping even numbers must still step the loop variable.
    let source = "
        let sum = 0;
        for (let i = 0; i < 5; i += 1) {
            if (i % 2 == 0) continue;
            sum += i;
        }
        dump sum;
    ";
    assert_eq!(run_ok(source), "4\n");
}

#[test]
fn test_continue_in_while() {
    let source = "
        let i = 0;
        let hits = 0;
        while (i < 6) {
            i += 1;
            if (i % 2 == 0) continue;
            hits += 1;
        }
        dump hits;
    ";
    assert_eq!(run_ok(source), "3\n");
}

#[test]
fn test_break_leaves_inner_loop_only() {
    let source = "
        let log = \"\";
        for (let i = 0; i < 3; i += 1) {
            for (let j = 0; j < 3; j += 1) {
                if (j == 1) break;
                log = log + str(i);
            }
        }
        dump log;
    ";
    assert_eq!(run_ok(source), "012\n");
}

#[test]
fn test_break_discards_block_locals() {
    let source = "
        let rounds = 0;
        while (true) {
            let local = \"scoped\";
            rounds += 1;
            if (rounds == 2) break;
        }
        dump rounds;
    ";
    assert_eq!(run_ok(source), "2\n");
}

#[test]
fn test_switch_selects_matching_case() {
    let source = "
        switch (2) {
            case 1: dump \"one\";
            case 2: dump \"two\";
            case 3: dump \"three\";
        }
        dump \"after\";
    ";
    assert_eq!(run_ok(source), "two\nafter\n");
}

#[test]
fn test_switch_runs_default_when_nothing_matches() {
    let source = "
        switch (9) {
            case 1: dump \"one\";
            default: dump \"other\";
        }
    ";
    assert_eq!(run_ok(source), "other\n");
}

#[test]
fn test_switch_without_match_or_default_falls_through() {
    let source = "
        switch (9) {
            case 1: dump \"one\";
        }
        dump \"done\";
    ";
    assert_eq!(run_ok(source), "done\n");
}

#[test]
fn test_switch_case_does_not_fall_through() {
    let source = "
        switch (1) {
            case 1: dump \"one\";
            case 2: dump \"two\";
            default: dump \"other\";
        }
    ";
    assert_eq!(run_ok(source), "one\n");
}

#[test]
fn test_switch_on_strings() {
    let source = "
        let cmd = \"stop\";
        switch (cmd) {
            case \"go\": dump 1;
            case \"stop\": dump 0;
        }
    ";
    assert_eq!(run_ok(source), "0\n");
}

#[test]
fn test_switch_case_with_multiple_statements() {
    let source = "
        switch (1) {
            case 1:
                let a = 10;
                dump a + 1;
            default: dump \"other\";
        }
    ";
    assert_eq!(run_ok(source), "11\n");
}

#[test]
fn test_break_from_switch_default_inside_loop() {
    // The subject is still on the stack in a default body; breaking out of
    // the enclosing loop must not strand it.
    let source = "
        let n = 0;
        while (n < 9) {
            n += 1;
            switch (n) {
                case 99: dump \"unreached\";
                default:
                    if (n == 2) break;
            }
        }
        let after = n + 1;
        dump after;
    ";
    assert_eq!(run_ok(source), "3\n");
}

#[test]
fn test_continue_from_switch_default_inside_loop() {
    let source = "
        let hits = 0;
        for (let i = 0; i < 4; i += 1) {
            switch (i) {
                case 0: hits += 10;
                default:
                    continue;
            }
            hits += 1;
        }
        dump hits;
    ";
    // i == 0 matches the case (+10, then +1 after the switch); other
    // iterations continue from the default.
    assert_eq!(run_ok(source), "11\n");
}

#[test]
fn test_logical_operators_short_circuit() {
    assert_eq!(run_ok("dump nil or \"fallback\";"), "fallback\n");
    assert_eq!(run_ok("dump 0 or \"unused\";"), "0\n");
    assert_eq!(run_ok("dump false and missing_global;"), "false\n");
    assert_eq!(run_ok("dump true and \"second\";"), "second\n");
}

#[test]
fn test_nested_if_in_loops() {
    let source = "
        let out = \"\";
        for (let i = 1; i <= 4; i += 1) {
            if (i % 2 == 0) {
                out = out + \"e\";
            } else {
                out = out + \"o\";
            }
        }
        dump out;
    ";
    assert_eq!(run_ok(source), "oeoe\n");
}
