//! Classes: construction, methods, fields, defaults, inheritance, super.

use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_init_binds_fields() {
    let source = "
        class Point {
            init(x, y) {
                this.x = x;
                this.y = y;
            }
        }
        let p = Point(3, 4);
        dump p.x + p.y;
    ";
    assert_eq!(run_ok(source), "7\n");
}

#[test]
fn test_construction_without_init_takes_no_arguments() {
    assert_eq!(run_ok("class Bag {} dump Bag();"), "<instance of Bag>\n");
    let report = run_runtime_error("class Bag {} Bag(1);");
    assert_eq!(report.message, "Expected 0 arguments but got 1.");
}

#[test]
fn test_methods_see_this() {
    let source = "
        class Greeter {
            init(name) { this.name = name; }
            greet() { return \"hi \" + this.name; }
        }
        dump Greeter(\"lu\").greet();
    ";
    assert_eq!(run_ok(source), "hi lu\n");
}

#[test]
fn test_bound_method_keeps_receiver() {
    let source = "
        class Cell {
            init() { this.v = 7; }
            get() { return this.v; }
        }
        let m = Cell().get;
        dump m();
    ";
    assert_eq!(run_ok(source), "7\n");
}

#[test]
fn test_field_shadows_method_on_invoke() {
    let source = "
        class Host {
            f() { return \"method\"; }
        }
        fun replacement() { return \"field\"; }
        let h = Host();
        dump h.f();
        h.f = replacement;
        dump h.f();
    ";
    assert_eq!(run_ok(source), "method\nfield\n");
}

#[test]
fn test_default_properties() {
    let source = "
        class Counter {
            count = 3;
            total() { return this.count; }
        }
        dump Counter().count;
        dump Counter().total();
    ";
    assert_eq!(run_ok(source), "3\n3\n");
}

#[test]
fn test_defaults_are_per_instance() {
    let source = "
        class Counter { count = 3; }
        let a = Counter();
        a.count = 99;
        dump Counter().count;
        dump a.count;
    ";
    assert_eq!(run_ok(source), "3\n99\n");
}

#[test]
fn test_inherit_copies_methods_and_defaults() {
    let source = "
        class Base {
            tag = \"base\";
            describe() { return this.tag; }
        }
        class Derived < Base {}
        dump Derived().describe();
    ";
    assert_eq!(run_ok(source), "base\n");
}

#[test]
fn test_subclass_overrides_method() {
    let source = "
        class A { who() { return \"A\"; } }
        class B < A { who() { return \"B\"; } }
        dump B().who();
        dump A().who();
    ";
    assert_eq!(run_ok(source), "B\nA\n");
}

#[test]
fn test_super_call() {
    let source = "
        class A {
            m() { return \"A\"; }
        }
        class B < A {
            m() { return super.m() + \"B\"; }
        }
        class C < B {
            m() { return super.m() + \"C\"; }
        }
        dump C().m();
    ";
    assert_eq!(run_ok(source), "ABC\n");
}

#[test]
fn test_super_bound_without_call() {
    let source = "
        class A { m() { return \"from A\"; } }
        class B < A {
            m() {
                let f = super.m;
                return f();
            }
        }
        dump B().m();
    ";
    assert_eq!(run_ok(source), "from A\n");
}

#[test]
fn test_super_passes_through_inherited_init() {
    let source = "
        class Shape {
            init(name) { this.name = name; }
            label() { return this.name; }
        }
        class Circle < Shape {
            init() { super.init(\"circle\"); }
        }
        dump Circle().label();
    ";
    assert_eq!(run_ok(source), "circle\n");
}

#[test]
fn test_initializer_returns_instance() {
    let source = "
        class C {
            init() { this.x = 1; }
        }
        let c = C();
        dump c.x;
        dump c.init().x;
    ";
    assert_eq!(run_ok(source), "1\n1\n");
}

#[test]
fn test_early_return_in_initializer() {
    let source = "
        class C {
            init(flag) {
                this.v = \"set\";
                if (flag) return;
                this.v = \"fallthrough\";
            }
        }
        dump C(true).v;
        dump C(false).v;
    ";
    assert_eq!(run_ok(source), "set\nfallthrough\n");
}

#[test]
fn test_methods_can_recurse_through_this() {
    let source = "
        class Math {
            fact(n) {
                if (n < 2) return 1;
                return n * this.fact(n - 1);
            }
        }
        dump Math().fact(5);
    ";
    assert_eq!(run_ok(source), "120\n");
}
