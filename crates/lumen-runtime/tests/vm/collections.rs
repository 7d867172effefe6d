//! Tables, arrays, and string indexing.

use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_array_literal_and_index() {
    assert_eq!(run_ok("let a = [10, 20, 30]; dump a[1];"), "20\n");
    assert_eq!(run_ok("dump [[1], [2]][1][0];"), "2\n");
    assert_eq!(run_ok("dump len([]);"), "0\n");
}

#[test]
fn test_array_index_assignment() {
    assert_eq!(run_ok("let a = [1, 2]; a[0] = 9; dump a[0] + a[1];"), "11\n");
    // Assignment is an expression yielding the stored value.
    assert_eq!(run_ok("let a = [0]; dump a[0] = 5;"), "5\n");
}

#[test]
fn test_array_concatenation_orders_left_then_right() {
    assert_eq!(run_ok("dump [1, 2] + [3];"), "[1, 2, 3]\n");
    assert_eq!(run_ok("dump len([1] + [2, 3]);"), "3\n");
}

#[test]
fn test_table_literal_keys() {
    let source = "
        let t = { \"s\": 1, 2: \"two\", true: \"yes\", nil: \"none\" };
        dump t[\"s\"];
        dump t[2];
        dump t[true];
        dump t[nil];
    ";
    assert_eq!(run_ok(source), "1\ntwo\nyes\nnone\n");
}

#[test]
fn test_table_property_access() {
    let source = "
        let t = { \"name\": \"lumen\" };
        dump t.name;
        t.version = 3;
        dump t.version;
    ";
    assert_eq!(run_ok(source), "lumen\n3\n");
}

#[test]
fn test_table_add_is_right_biased() {
    let source = "
        let merged = { \"a\": 1, \"b\": 1 } + { \"b\": 2, \"c\": 3 };
        dump merged[\"a\"];
        dump merged[\"b\"];
        dump merged[\"c\"];
    ";
    assert_eq!(run_ok(source), "1\n2\n3\n");
}

#[test]
fn test_table_merge_leaves_operands_unchanged() {
    let source = "
        let left = { \"k\": 1 };
        let right = { \"k\": 2 };
        let merged = left + right;
        dump left[\"k\"];
        dump right[\"k\"];
        dump merged[\"k\"];
    ";
    assert_eq!(run_ok(source), "1\n2\n2\n");
}

#[test]
fn test_number_keys_compare_by_value_bits() {
    assert_eq!(run_ok("let t = { 1: \"one\" }; dump t[1.0];"), "one\n");
}

#[test]
fn test_string_keys_are_interned() {
    // Two separately built strings with equal content hit the same entry.
    assert_eq!(
        run_ok("let t = { \"ab\": 7 }; dump t[\"a\" + \"b\"];"),
        "7\n"
    );
}

#[test]
fn test_string_index_returns_one_character_string() {
    assert_eq!(run_ok("dump \"hello\"[1];"), "e\n");
    assert_eq!(run_ok("dump len(\"hello\"[0]);"), "1\n");
}

#[test]
fn test_functions_stored_in_tables_invoke() {
    let source = "
        fun double(n) { return n * 2; }
        let t = { \"double\": double };
        dump t.double(21);
        dump t[\"double\"](10);
    ";
    assert_eq!(run_ok(source), "42\n20\n");
}

#[test]
fn test_nested_container_mutation() {
    let source = "
        let t = { \"xs\": [1, 2, 3] };
        t[\"xs\"][2] = 30;
        dump t.xs[2];
    ";
    assert_eq!(run_ok(source), "30\n");
}
