use kscope::{ErrorKind, Interpreter, Outcome, Session, SessionConfig};

fn session(src: &str) -> Session<Interpreter> {
    Session::new(src, Interpreter::new(), SessionConfig::default())
}

/// Every statement's result, as `Ok(value)` for evaluations and `Err(kind)`
/// for failures. Definitions and declarations are dropped.
fn results(s: &mut Session<Interpreter>) -> Vec<Result<f64, ErrorKind>> {
    let mut all = Vec::new();
    while let Some(outcome) = s.handle_next().unwrap() {
        match outcome {
            Outcome::Evaluated(_, v) => all.push(Ok(v)),
            Outcome::Failed(e) => all.push(Err(e.kind().clone())),
            _ => {}
        }
    }
    all
}

fn eval(src: &str) -> Vec<Result<f64, ErrorKind>> {
    results(&mut session(src))
}

fn is_codegen(r: &Result<f64, ErrorKind>) -> bool {
    match r {
        Err(ErrorKind::Codegen(_)) => true,
        _ => false,
    }
}

#[test]
fn precedence() {
    assert_eq!(eval("1+2*3;"), vec![Ok(7.0)]);
    assert_eq!(eval("(1+2)*3;"), vec![Ok(9.0)]);
    assert_eq!(eval("10-4-3;"), vec![Ok(3.0)]);
}

#[test]
fn user_binary_operator() {
    let src = "
        def binary@> 10 (LHS RHS) RHS < LHS;
        5 > 3;
        3 > 5;
        1 + 1 > 1;
    ";
    assert_eq!(eval(src), vec![Ok(1.0), Ok(0.0), Ok(1.0)]);
}

#[test]
fn user_unary_operator() {
    let src = "
        def unary@!(v) if v then 0 else 1;
        !0;
        !5;
    ";
    assert_eq!(eval(src), vec![Ok(1.0), Ok(0.0)]);
}

#[test]
fn multi_character_user_operator() {
    let src = "
        def binary@== 9 (a b) if a < b then 0 else if b < a then 0 else 1;
        1 == 1;
        1 == 2;
        1 + 1 == 2;
        1 = = 1;
    ";
    let all = eval(src);
    assert_eq!(all[..3], [Ok(1.0), Ok(0.0), Ok(1.0)]);
    assert!(all[3].is_err());
}

#[test]
fn redefinition_is_rejected() {
    let src = "
        def foo(x) x+1;
        def foo(x) x+2;
        foo(1);
    ";
    let all = eval(src);
    assert_eq!(all.len(), 2);
    assert!(is_codegen(&all[0]));
    assert_eq!(all[1], Ok(2.0));
}

#[test]
fn failed_definition_can_be_retried() {
    let src = "
        def bar(x) y;
        def bar(x) x*3;
        bar(2);
    ";
    let all = eval(src);
    assert!(is_codegen(&all[0]));
    assert_eq!(all[1], Ok(6.0));
}

#[test]
fn block_restores_shadowed_var() {
    let src = "
        def f() { var x = 1; { var x = 2; x; }; x; };
        f();
    ";
    assert_eq!(eval(src), vec![Ok(1.0)]);
}

#[test]
fn for_loop_mutation() {
    let src = "
        def sum(n) { var acc = 0; for i = 0; i < n; i + 1 { acc = acc + i; }; acc; };
        sum(5);
    ";
    assert_eq!(eval(src), vec![Ok(10.0)]);
}

#[test]
fn recursion() {
    let src = "
        def fib(x) if x < 3 then 1 else fib(x-1) + fib(x-2);
        fib(10);
    ";
    assert_eq!(eval(src), vec![Ok(55.0)]);
}

#[test]
fn deep_recursion() {
    let src = "
        def down(n) if n < 1 then 0 else down(n-1);
        down(5000);
        def count(n) if n < 1 then 0 else 1 + count(n-1);
        count(20000);
    ";
    assert_eq!(eval(src), vec![Ok(0.0), Ok(20000.0)]);
}

#[test]
fn runaway_recursion_ends_the_session() {
    let mut s = session("def spin(n) spin(n+1); spin(0); 1;");
    let err = loop {
        match s.handle_next() {
            Ok(Some(_)) => {}
            Ok(None) => panic!("session finished"),
            Err(e) => break e,
        }
    };
    assert!(err.is_fatal());
}

#[test]
fn unknown_names() {
    let all = eval("nope; nope(1);");
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(is_codegen));
}

#[test]
fn wrong_call_arity() {
    let all = eval("def two(a b) a+b; two(1);");
    assert!(is_codegen(&all[0]));
}

#[test]
fn anonymous_wrappers_do_not_accumulate() {
    let mut s = session("def id(x) x; id(1); id(2); 3; 4;");
    assert_eq!(
        results(&mut s),
        vec![Ok(1.0), Ok(2.0), Ok(3.0), Ok(4.0)]
    );
    assert_eq!(s.engine().symbol_count(), 1);
    assert!(s.engine().is_defined("id"));
    assert!(s.prototypes().get("id").is_some());
    assert_eq!(s.prototypes().len(), 1);
}

#[test]
fn extern_builtin() {
    let all = eval("extern putchard(c); putchard(65);");
    assert_eq!(all, vec![Ok(0.0)]);
}

#[test]
fn extern_then_define() {
    let src = "
        extern twice(v);
        def twice(x) x*2;
        twice(4);
    ";
    assert_eq!(eval(src), vec![Ok(8.0)]);
}

#[test]
fn session_survives_lex_and_parse_errors() {
    let all = eval("1.2.3; def (x) 1; 2+2;");
    assert!(match all.first() {
        Some(Err(ErrorKind::Lex(_))) => true,
        _ => false,
    });
    assert_eq!(all.last(), Some(&Ok(4.0)));
}
