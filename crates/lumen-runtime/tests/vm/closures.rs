//! Closures and upvalues: capture, sharing, closing at scope exit.

use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_counter_keeps_state_after_frame_returns() {
    let source = "
        fun counter() {
            let n = 0;
            fun inc() {
                n += 1;
                return n;
            }
            return inc;
        }
        let c = counter();
        c();
        c();
        dump c();
    ";
    assert_eq!(run_ok(source), "3\n");
}

#[test]
fn test_sibling_closures_share_one_upvalue() {
    let source = "
        fun make() {
            let x = 1;
            fun set(v) { x = v; }
            fun get() { return x; }
            return [set, get];
        }
        let fns = make();
        fns[0](42);
        dump fns[1]();
    ";
    assert_eq!(run_ok(source), "42\n");
}

#[test]
fn test_two_closure_instances_have_separate_upvalues() {
    let source = "
        fun counter() {
            let n = 0;
            fun inc() {
                n += 1;
                return n;
            }
            return inc;
        }
        let a = counter();
        let b = counter();
        a();
        a();
        dump b();
    ";
    assert_eq!(run_ok(source), "1\n");
}

#[test]
fn test_loop_variable_is_shared_by_body_closures() {
    // One `let i` for the whole loop: every closure captures the same
    // variable, closed once at loop exit with its final value.
    let source = "
        let fs = [];
        for (let i = 0; i < 3; i += 1) {
            fun f() { return i; }
            fs = fs + [f];
        }
        dump fs[0]() + fs[1]() + fs[2]();
    ";
    assert_eq!(run_ok(source), "9\n");
}

#[test]
fn test_block_scope_closes_upvalue() {
    let source = "
        let f = nil;
        {
            let hidden = \"kept\";
            fun reveal() { return hidden; }
            f = reveal;
        }
        dump f();
    ";
    assert_eq!(run_ok(source), "kept\n");
}

#[test]
fn test_capture_through_two_levels() {
    let source = "
        fun outer() {
            let x = \"deep\";
            fun middle() {
                fun inner() {
                    return x;
                }
                return inner;
            }
            return middle();
        }
        dump outer()();
    ";
    assert_eq!(run_ok(source), "deep\n");
}

#[test]
fn test_assignment_through_upvalue_before_close() {
    let source = "
        fun main() {
            let v = 1;
            fun bump() { v = v + 10; }
            bump();
            bump();
            return v;
        }
        dump main();
    ";
    assert_eq!(run_ok(source), "21\n");
}

#[test]
fn test_recursive_local_function() {
    let source = "
        fun wrap() {
            fun down(n) {
                if (n == 0) return \"done\";
                return down(n - 1);
            }
            return down(5);
        }
        dump wrap();
    ";
    assert_eq!(run_ok(source), "done\n");
}
