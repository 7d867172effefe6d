//! Operators: arithmetic, bitwise, comparison, compound assignment, and
//! dunder dispatch on instances.

use super::*;
use pretty_assertions::assert_eq;
use rstest::rstest;

#[rstest]
#[case("dump 10 - 4;", "6\n")]
#[case("dump 3 * 4;", "12\n")]
#[case("dump 9 / 2;", "4.5\n")]
#[case("dump 7 % 3;", "1\n")]
#[case("dump -(2 + 3);", "-5\n")]
#[case("dump 2 + 3 * 4 - 1;", "13\n")]
#[case("dump (2 + 3) * 4;", "20\n")]
fn test_arithmetic(#[case] source: &str, #[case] expected: &str) {
    assert_eq!(run_ok(source), expected);
}

#[rstest]
#[case("dump 6 & 3;", "2\n")]
#[case("dump 6 | 3;", "7\n")]
#[case("dump 6 ^ 3;", "5\n")]
#[case("dump 1 << 4;", "16\n")]
#[case("dump 16 >> 2;", "4\n")]
#[case("dump 6.9 & 3.2;", "2\n")]
fn test_bitwise_truncates_doubles(#[case] source: &str, #[case] expected: &str) {
    assert_eq!(run_ok(source), expected);
}

#[rstest]
#[case("dump 1 < 2;", "true\n")]
#[case("dump 2 <= 2;", "true\n")]
#[case("dump 3 > 4;", "false\n")]
#[case("dump 4 >= 5;", "false\n")]
#[case("dump 1 == 1;", "true\n")]
#[case("dump 1 != 1;", "false\n")]
#[case("dump \"a\" == \"a\";", "true\n")]
#[case("dump \"a\" == \"b\";", "false\n")]
#[case("dump nil == nil;", "true\n")]
#[case("dump nil == false;", "false\n")]
#[case("dump !nil;", "true\n")]
#[case("dump !0;", "false\n")]
fn test_comparison_and_equality(#[case] source: &str, #[case] expected: &str) {
    assert_eq!(run_ok(source), expected);
}

#[test]
fn test_string_concatenation() {
    assert_eq!(run_ok("dump \"foo\" + \"bar\";"), "foobar\n");
    assert_eq!(run_ok("dump \"\" + \"x\" + \"\";"), "x\n");
}

#[test]
fn test_compound_assignment_on_variables() {
    let source = "
        let a = 10;
        a += 5;
        dump a;
        a -= 3;
        dump a;
        a *= 2;
        dump a;
        a /= 4;
        dump a;
    ";
    assert_eq!(run_ok(source), "15\n12\n24\n6\n");
}

#[test]
fn test_compound_assignment_evaluates_rhs_second() {
    // `a -= b` must read `a`, then evaluate `b`: the side effect in the
    // right operand sees the original left value already loaded.
    let source = "
        let a = 10;
        fun bump() {
            a = 100;
            return 1;
        }
        a -= bump();
        dump a;
    ";
    assert_eq!(run_ok(source), "9\n");
}

#[test]
fn test_compound_assignment_on_properties() {
    let source = "
        class Box { init() { this.n = 10; } }
        let b = Box();
        b.n += 4;
        dump b.n;
        b.n /= 2;
        dump b.n;
    ";
    assert_eq!(run_ok(source), "14\n7\n");
}

#[test]
fn test_compound_assignment_on_upvalues() {
    let source = "
        fun make() {
            let total = 0;
            fun add(n) { total += n; return total; }
            return add;
        }
        let add = make();
        add(2);
        dump add(3);
    ";
    assert_eq!(run_ok(source), "5\n");
}

#[test]
fn test_dunder_add() {
    let source = "
        class Vec {
            init(x, y) { this.x = x; this.y = y; }
            __add(o) { return Vec(this.x + o.x, this.y + o.y); }
        }
        let v = Vec(1, 2) + Vec(3, 4);
        dump v.x;
        dump v.y;
    ";
    assert_eq!(run_ok(source), "4\n6\n");
}

#[test]
fn test_dunder_arithmetic_family() {
    let source = "
        class N {
            init(v) { this.v = v; }
            __sub(o) { return N(this.v - o.v); }
            __mul(o) { return N(this.v * o.v); }
            __div(o) { return N(this.v / o.v); }
            __mod(o) { return N(this.v % o.v); }
        }
        dump (N(10) - N(4)).v;
        dump (N(3) * N(5)).v;
        dump (N(9) / N(2)).v;
        dump (N(9) % N(4)).v;
    ";
    assert_eq!(run_ok(source), "6\n15\n4.5\n1\n");
}

#[test]
fn test_dunder_bitwise_family() {
    let source = "
        class Bits {
            init(v) { this.v = v; }
            __and(o) { return Bits(this.v & o.v); }
            __or(o) { return Bits(this.v | o.v); }
            __xor(o) { return Bits(this.v ^ o.v); }
        }
        dump (Bits(6) & Bits(3)).v;
        dump (Bits(6) | Bits(3)).v;
        dump (Bits(6) ^ Bits(3)).v;
    ";
    assert_eq!(run_ok(source), "2\n7\n5\n");
}

#[test]
fn test_dunder_comparisons() {
    let source = "
        class N {
            init(v) { this.v = v; }
            __eq(o) { return this.v == o.v; }
            __gt(o) { return this.v > o.v; }
            __lt(o) { return this.v < o.v; }
        }
        dump N(1) == N(1);
        dump N(1) == N(2);
        dump N(3) > N(2);
        dump N(1) < N(2);
    ";
    assert_eq!(run_ok(source), "true\nfalse\ntrue\ntrue\n");
}

#[test]
fn test_dunder_not() {
    let source = "
        class Flag {
            init(on) { this.on = on; }
            __not() { return !this.on; }
        }
        dump !Flag(true);
        dump !Flag(false);
    ";
    assert_eq!(run_ok(source), "false\ntrue\n");
}

#[test]
fn test_instance_equality_defaults_to_identity() {
    let source = "
        class Plain {}
        let a = Plain();
        let b = Plain();
        dump a == a;
        dump a == b;
    ";
    assert_eq!(run_ok(source), "true\nfalse\n");
}

#[test]
fn test_cross_class_operator_is_an_error() {
    let source = "
        class A { __add(o) { return 1; } }
        class B { __add(o) { return 2; } }
        A() + B();
    ";
    let report = run_runtime_error(source);
    assert_eq!(report.message, "Operands are instances of different classes.");
}

#[test]
fn test_chained_dunder_calls() {
    let source = "
        class Acc {
            init(v) { this.v = v; }
            __add(o) { return Acc(this.v + o.v); }
        }
        dump (Acc(1) + Acc(2) + Acc(3)).v;
    ";
    assert_eq!(run_ok(source), "6\n");
}
