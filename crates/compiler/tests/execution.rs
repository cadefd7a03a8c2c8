//! End-to-end tests: compile source text and run it on a fresh runtime.

use merle_compiler::compile_source;
use merle_core::value::Value;
use merle_core::ErrorKind;
use merle_runtime::Runtime;

fn run(source: &str) -> Runtime {
    let routine = compile_source(source).expect("compilation failed");
    let mut rt = Runtime::new();
    rt.capture_output();
    rt.run_routine(routine).expect("execution failed");
    rt
}

fn output_of(source: &str) -> String {
    let mut rt = run(source);
    rt.take_output()
}

fn error_of(source: &str) -> merle_core::RuntimeError {
    let routine = match compile_source(source) {
        Ok(routine) => routine,
        Err(e) => return e,
    };
    let mut rt = Runtime::new();
    rt.capture_output();
    rt.run_routine(routine).expect_err("execution succeeded")
}

#[test]
fn test_arithmetic_into_global() {
    let rt = run("var x = 2 + 3 * 4");
    match rt.get_global("x") {
        Some(Value::Integer(14)) => {}
        other => panic!("expected x = 14, got {:?}", other),
    }
}

#[test]
fn test_recursive_factorial() {
    let out = output_of(
        "function fact(n as Integer)\n\
         \tif n < 2 then return 1 end\n\
         \treturn n * fact(n - 1)\n\
         end\n\
         print fact(6)\n",
    );
    assert_eq!(out, "720\n");
}

#[test]
fn test_foreach_by_ref_mutates_list() {
    let out = output_of(
        "var a = [10, 20, 30]\n\
         foreach i, ref v in a do v = v + 1 end\n\
         print a\n",
    );
    assert_eq!(out, "[11, 21, 31]\n");
}

#[test]
fn test_multiple_dispatch_on_argument_type() {
    let out = output_of(
        "function pick(x as Integer) return \"int\" end\n\
         function pick(x as String) return \"str\" end\n\
         print pick(1), pick(\"hi\")\n",
    );
    assert_eq!(out, "intstr\n");
}

#[test]
fn test_dispatch_prefers_matching_arity() {
    let out = output_of(
        "function pick(x as Integer) return \"int\" end\n\
         function pick(x as String) return \"str\" end\n\
         function pick(x as Integer, y as Integer) return \"two\" end\n\
         print pick(1)\n",
    );
    assert_eq!(out, "int\n");
}

#[test]
fn test_dispatch_ambiguity_is_an_error() {
    let e = error_of(
        "function f(x as Object, y as Integer) return 1 end\n\
         function f(x as Integer, y as Object) return 2 end\n\
         f(1, 2)\n",
    );
    assert_eq!(e.kind, ErrorKind::Type);
    assert!(e.message.contains("Ambiguous"), "{}", e.message);
}

#[test]
fn test_dispatch_no_match_lists_candidates() {
    let e = error_of(
        "function f(x as Integer) return 1 end\n\
         f(\"nope\")\n",
    );
    assert_eq!(e.kind, ErrorKind::Type);
    assert!(e.message.contains("Candidates"), "{}", e.message);
}

#[test]
fn test_null_matches_any_parameter() {
    let out = output_of(
        "function f(x as String) return \"s\" end\n\
         print f(null)\n",
    );
    assert_eq!(out, "s\n");
}

#[test]
fn test_table_index_and_fields() {
    let out = output_of(
        "var t = {\"a\": 1, \"b\": 2}\n\
         t[\"a\"] = t[\"a\"] + 10\n\
         print t.keys.sort, t[\"a\"]\n",
    );
    assert_eq!(out, "[\"a\", \"b\"]11\n");
}

#[test]
fn test_cycle_reclaimed_by_collector() {
    let mut rt = run(
        "var a = []\n\
         var b = []\n\
         a.append(b)\n\
         b.append(a)\n\
         a = null\n\
         b = null\n",
    );
    let freed = rt.collect();
    assert!(freed >= 2, "freed only {} objects", freed);
    assert_eq!(rt.gc_candidate_count(), 0);
    // Idempotence: a second cycle has nothing left to collect.
    assert_eq!(rt.collect(), 0);
    let _ = rt.take_output();
}

#[test]
fn test_ref_parameter_writes_through() {
    let out = output_of(
        "function bump(ref x)\n\
         \tx = x + 1\n\
         end\n\
         var n = 1\n\
         bump(n)\n\
         print n\n",
    );
    assert_eq!(out, "2\n");
}

#[test]
fn test_closure_captures_upvalue_cell() {
    let out = output_of(
        "function make_counter()\n\
         \tlocal n = 0\n\
         \tfunction inc()\n\
         \t\tn = n + 1\n\
         \t\treturn n\n\
         \tend\n\
         \treturn inc\n\
         end\n\
         var c = make_counter()\n\
         print c(), c(), c()\n",
    );
    assert_eq!(out, "123\n");
}

#[test]
fn test_counters_are_independent() {
    let out = output_of(
        "function make_counter()\n\
         \tlocal n = 0\n\
         \tfunction inc()\n\
         \t\tn = n + 1\n\
         \t\treturn n\n\
         \tend\n\
         \treturn inc\n\
         end\n\
         var c1 = make_counter()\n\
         var c2 = make_counter()\n\
         c1()\n\
         c1()\n\
         print c1(), c2()\n",
    );
    assert_eq!(out, "31\n");
}

#[test]
fn test_while_loop_with_break_and_continue() {
    let out = output_of(
        "var s = 0\n\
         var i = 0\n\
         while true do\n\
         \ti = i + 1\n\
         \tif i > 10 then break end\n\
         \tif i % 2 == 0 then continue end\n\
         \ts = s + i\n\
         end\n\
         print s\n",
    );
    assert_eq!(out, "25\n");
}

#[test]
fn test_for_loop_variants() {
    assert_eq!(
        output_of("var s = 0\nfor i = 1 to 10 do s = s + i end\nprint s\n"),
        "55\n"
    );
    assert_eq!(
        output_of("var s = 0\nfor i = 10 downto 1 do s = s + i end\nprint s\n"),
        "55\n"
    );
    assert_eq!(
        output_of("var s = 0\nfor i = 1 to 10 step 3 do s = s + i end\nprint s\n"),
        "22\n"
    );
}

#[test]
fn test_repeat_until() {
    let out = output_of(
        "var n = 0\n\
         repeat\n\
         \tn = n + 1\n\
         until n >= 3\n\
         print n\n",
    );
    assert_eq!(out, "3\n");
    // The body always runs at least once.
    let out = output_of(
        "var n = 0\n\
         repeat\n\
         \tn = n + 1\n\
         until true\n\
         print n\n",
    );
    assert_eq!(out, "1\n");
}

#[test]
fn test_foreach_over_table() {
    let out = output_of(
        "var t = {\"a\": 1, \"b\": 2, \"c\": 3}\n\
         var total = 0\n\
         foreach v in t do total = total + v end\n\
         print total\n",
    );
    assert_eq!(out, "6\n");
}

#[test]
fn test_foreach_over_string() {
    let out = output_of("foreach c in \"héllo\" do\nprint c,\nend\n");
    assert_eq!(out, "héllo");
}

#[test]
fn test_string_iteration_by_ref_is_an_error() {
    let e = error_of("foreach i, ref c in \"ab\" do pass end\n");
    assert_eq!(e.kind, ErrorKind::Reference);
}

#[test]
fn test_short_circuit_evaluation() {
    let out = output_of(
        "function boom()\n\
         \tthrow \"must not run\"\n\
         end\n\
         print false and boom()\n\
         print true or boom()\n",
    );
    assert_eq!(out, "false\ntrue\n");
}

#[test]
fn test_conditional_expression() {
    assert_eq!(output_of("print 1 if true else 2\n"), "1\n");
    assert_eq!(output_of("print 1 if false else 2\n"), "2\n");
}

#[test]
fn test_division_is_float_and_power() {
    assert_eq!(output_of("print 7 / 2\n"), "3.5\n");
    assert_eq!(output_of("print 2 ^ 3\n"), "8\n");
}

#[test]
fn test_spaceship_operator() {
    assert_eq!(output_of("print 1 <=> 2, 2 <=> 2, 3 <=> 2\n"), "-101\n");
}

#[test]
fn test_null_equality_rules() {
    assert_eq!(output_of("print null == null, null == 1, null != 1\n"), "truefalsetrue\n");
    let e = error_of("var x = null < 1\n");
    assert_eq!(e.kind, ErrorKind::Type);
}

#[test]
fn test_integer_overflow_raises_math_error() {
    let e = error_of("var x = 9223372036854775807 + 1\n");
    assert_eq!(e.kind, ErrorKind::Math);
}

#[test]
fn test_negating_smallest_integer_raises_math_error() {
    let e = error_of("var a = -9223372036854775807 - 1\nvar b = -a\n");
    assert_eq!(e.kind, ErrorKind::Math);
}

#[test]
fn test_float_overflow_raises_math_error() {
    let e = error_of("var x = 1.5e308 + 1.5e308\n");
    assert_eq!(e.kind, ErrorKind::Math);
    assert!(e.message.contains("overflow"), "{}", e.message);
}

#[test]
fn test_division_by_zero() {
    assert_eq!(error_of("var x = 1 % 0\n").kind, ErrorKind::Math);
    assert_eq!(error_of("var x = 1.0 / 0.0\n").kind, ErrorKind::Math);
}

#[test]
fn test_nan_is_falsy() {
    assert_eq!(output_of("print \"yes\" if nan else \"no\"\n"), "no\n");
}

#[test]
fn test_empty_list_first_last() {
    assert_eq!(error_of("first([])\n").kind, ErrorKind::Index);
    assert_eq!(error_of("last([])\n").kind, ErrorKind::Index);
    assert_eq!(error_of("pop([])\n").kind, ErrorKind::Index);
    assert_eq!(error_of("shift([])\n").kind, ErrorKind::Index);
}

#[test]
fn test_index_assignment_unshares() {
    let out = output_of(
        "var a = [1]\n\
         var b = a\n\
         b[1] = 9\n\
         print a, b\n",
    );
    assert_eq!(out, "[1][9]\n");
}

#[test]
fn test_method_mutation_is_shared() {
    let out = output_of(
        "var a = [1]\n\
         var b = a\n\
         b.append(2)\n\
         print a\n",
    );
    assert_eq!(out, "[1, 2]\n");
}

#[test]
fn test_list_operations() {
    assert_eq!(
        output_of("var a = [3, 1, 2]\na.sort()\nprint a, a.first, a.last\n"),
        "[1, 2, 3]13\n"
    );
    assert_eq!(
        output_of("print [1, 2, 3].contains(2), find([1, 2, 3], 3)\n"),
        "true3\n"
    );
    assert_eq!(
        output_of("print intersect([1, 2, 3], [2, 3, 4]), unite([1], [2])\n"),
        "[2, 3][1, 2]\n"
    );
    assert_eq!(output_of("print [1, 2].join(\"-\")\n"), "1-2\n");
}

#[test]
fn test_string_operations() {
    assert_eq!(output_of("print mid(\"hello\", 2, 3)\n"), "ell\n");
    assert_eq!(output_of("print \"hello\".left(2), \"hello\".right(2)\n"), "helo\n");
    assert_eq!(output_of("print \"héllo\"[2]\n"), "é\n");
    assert_eq!(output_of("print len(\"héllo\"), \"a,b\".split(\",\")\n"), "5[\"a\", \"b\"]\n");
    assert_eq!(output_of("print \"aXbXc\".find(\"X\"), \"aXbXc\".rfind(\"X\")\n"), "24\n");
    assert_eq!(output_of("print to_upper(\"ab\") & to_lower(\"CD\")\n"), "ABcd\n");
}

#[test]
fn test_concat_stringifies() {
    assert_eq!(output_of("print \"a\" & 1 & true & null\n"), "a1truenull\n");
}

#[test]
fn test_set_literal_and_algebra() {
    assert_eq!(output_of("print {3, 1, 2}\n"), "{1, 2, 3}\n");
    assert_eq!(
        output_of("print intersect({1, 2, 3}, {2, 3, 4})\n"),
        "{2, 3}\n"
    );
    assert_eq!(output_of("var s = {1}\ninsert(s, 2)\nprint len(s)\n"), "2\n");
}

#[test]
fn test_table_get_with_default() {
    assert_eq!(output_of("var t = {\"a\": 1}\nprint t.get(\"z\", 9)\n"), "9\n");
    assert_eq!(error_of("var t = {}\nvar x = t[\"missing\"]\n").kind, ErrorKind::Index);
}

#[test]
fn test_array_literal_and_indexing() {
    assert_eq!(
        output_of("var a = @[1, 2; 3, 4]\nprint a[2, 1], a.nrow, a.ncol\n"),
        "322\n"
    );
    assert_eq!(
        output_of("var a = @[1, 2; 3, 4]\na[1, 2] = 9.5\nprint a[1, 2]\n"),
        "9.5\n"
    );
    assert_eq!(
        error_of("var a = @[1, 2; 3, 4]\nvar x = a[5, 1]\n").kind,
        ErrorKind::Index
    );
}

#[test]
fn test_constructors() {
    assert_eq!(output_of("var l = List()\nl.append(1)\nprint l\n"), "[1]\n");
    assert_eq!(output_of("var t = Table()\nt[\"k\"] = 1\nprint t\n"), "{\"k\": 1}\n");
    assert_eq!(output_of("var s = Set()\ninsert(s, 1)\nprint s\n"), "{1}\n");
}

#[test]
fn test_regex() {
    let out = output_of(
        "var r = Regex(\"(a+)(b)\")\n\
         print r.match(\"xxaab\"), r.group(1), r.group(2)\n",
    );
    assert_eq!(out, "trueaab\n");
    assert_eq!(
        output_of("var r = Regex(\"z\")\nprint r.match(\"abc\")\n"),
        "false\n"
    );
    assert_eq!(error_of("var r = Regex(\"(\")\n").kind, ErrorKind::Syntax);
}

#[test]
fn test_type_of() {
    assert_eq!(
        output_of("print type(1), type(1.0), type(\"s\"), type([])\n"),
        "<class Integer><class Float><class String><class List>\n"
    );
}

#[test]
fn test_assert_statement() {
    assert_eq!(output_of("assert 1 < 2\nprint \"ok\"\n"), "ok\n");
    let e = error_of("assert 1 > 2, \"one is not bigger\"\n");
    assert_eq!(e.kind, ErrorKind::Runtime);
    assert!(e.message.contains("one is not bigger"), "{}", e.message);
}

#[test]
fn test_throw_carries_line() {
    let e = error_of("var x = 1\nthrow \"boom\"\n");
    assert_eq!(e.kind, ErrorKind::Runtime);
    assert_eq!(e.line, Some(2));
    assert!(e.message.contains("boom"));
}

#[test]
fn test_undefined_variable() {
    let e = error_of("print missing\n");
    assert_eq!(e.kind, ErrorKind::Name);
}

#[test]
fn test_duplicate_local_is_a_name_error() {
    let e = error_of("do\n\tlocal x = 1\n\tlocal x = 2\nend\n");
    assert_eq!(e.kind, ErrorKind::Name);
}

#[test]
fn test_shadowing_across_scopes() {
    let out = output_of(
        "var x = 1\n\
         do\n\
         \tlocal x = 2\n\
         \tprint x\n\
         end\n\
         print x\n",
    );
    assert_eq!(out, "2\n1\n");
}

#[test]
fn test_reference_consistency_check() {
    let e = error_of(
        "function g(ref x) return 1 end\n\
         function g(x, y) return 2 end\n",
    );
    assert_eq!(e.kind, ErrorKind::Reference);
}

#[test]
fn test_duplicate_signature_is_rejected() {
    let e = error_of(
        "function h(x as Integer) return 1 end\n\
         function h(x as Integer) return 2 end\n",
    );
    assert_eq!(e.kind, ErrorKind::Name);
}

#[test]
fn test_integer_float_promotion() {
    assert_eq!(output_of("print 2 == 2.0, 1 < 1.5\n"), "truetrue\n");
    let e = error_of("var big = 9007199254740993\nvar x = big == 2.0\n");
    assert_eq!(e.kind, ErrorKind::Cast);
}

#[test]
fn test_runtime_survives_an_error() {
    let routine = compile_source("throw \"first\"\n").unwrap();
    let mut rt = Runtime::new();
    rt.capture_output();
    assert!(rt.run_routine(routine).is_err());
    let routine = compile_source("print 1 + 1\n").unwrap();
    rt.run_routine(routine).unwrap();
    assert_eq!(rt.take_output(), "2\n");
}

#[test]
fn test_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.txt");
    let path_str = path.to_str().unwrap();

    let source = format!(
        "var f = open(\"{p}\", \"w\")\n\
         f.write_line(\"alpha\")\n\
         f.write_line(\"beta\")\n\
         f.close()\n\
         var g = open(\"{p}\")\n\
         foreach n, line in g do\n\
         print n, \":\", line, \" \",\n\
         end\n",
        p = path_str
    );
    assert_eq!(output_of(&source), "1:alpha 2:beta ");
}

#[test]
fn test_to_string_round_trips_integers() {
    let rt = run("var s = str(-123456)\nvar n = 0\n");
    match rt.get_global("s") {
        Some(Value::String(s)) => assert_eq!(s.as_str().parse::<i64>().unwrap(), -123456),
        other => panic!("expected a string, got {:?}", other),
    }
}
