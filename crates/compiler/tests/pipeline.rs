//! End-to-end pipeline scenarios: sema -> optimizer -> codegen over
//! modules built the way the front end would hand them over.

use pycc::ast::*;
use pycc::opt::{LoopUnroll, Pass, SimplifyScopes};
use pycc::ssa::SsaBuilder;
use pycc::{compile_module_to_ir, CompilerConfig};

fn sp(line: u32) -> Span {
    Span::new("main.py", line, 1)
}

fn name(id: &str) -> Expr {
    Expr::new(
        ExprNode::Name {
            id: id.to_string(),
            ctx: ExprCtx::Load,
        },
        sp(1),
    )
}

fn name_store(id: &str, line: u32) -> Expr {
    Expr::new(
        ExprNode::Name {
            id: id.to_string(),
            ctx: ExprCtx::Store,
        },
        sp(line),
    )
}

fn int(v: i64, line: u32) -> Expr {
    Expr::new(ExprNode::Int(v), sp(line))
}

fn assign(target: &str, value: Expr, line: u32) -> Stmt {
    Stmt::new(
        StmtNode::Assign {
            targets: vec![name_store(target, line)],
            value,
        },
        sp(line),
    )
}

fn def_fn(fname: &str, params: Vec<ParamDecl>, returns: Option<Expr>, body: Vec<Stmt>) -> Stmt {
    Stmt::new(
        StmtNode::FunctionDef(FunctionDef {
            name: fname.to_string(),
            params,
            body,
            returns,
            decorators: vec![],
            is_async: false,
            span: sp(1),
        }),
        sp(1),
    )
}

/// Scenario 1: refinement then/else split over `int|None`.
#[test]
fn test_refinement_split_compiles_to_two_int_returns() {
    let ann = Expr::new(
        ExprNode::Binary {
            op: BinaryOp::BitOr,
            lhs: Box::new(name("int")),
            rhs: Box::new(Expr::new(ExprNode::NoneLit, sp(1))),
        },
        sp(1),
    );
    let is_none = Expr::new(
        ExprNode::Compare {
            left: Box::new(name("x")),
            ops: vec![CmpOp::Is],
            comparators: vec![Expr::new(ExprNode::NoneLit, sp(2))],
        },
        sp(2),
    );
    let mut m = Module::new("main", "main.py");
    m.body.push(def_fn(
        "f",
        vec![ParamDecl::simple("x", Some(ann))],
        Some(name("int")),
        vec![
            Stmt::new(
                StmtNode::If {
                    cond: is_none,
                    body: vec![Stmt::new(StmtNode::Return(Some(int(0, 2))), sp(2))],
                    orelse: vec![],
                },
                sp(2),
            ),
            Stmt::new(
                StmtNode::Return(Some(Expr::new(
                    ExprNode::Binary {
                        op: BinaryOp::Add,
                        lhs: Box::new(name("x")),
                        rhs: Box::new(int(1, 3)),
                    },
                    sp(3),
                ))),
                sp(3),
            ),
        ],
    ));
    let ir = compile_module_to_ir(&mut m, &CompilerConfig::default()).expect("accepted");
    // Two distinct int returns survive; SimplifyScopes must not merge them.
    assert!(ir.contains("ret i32 0"));
    assert!(ir.matches("ret i32").count() >= 3); // 2 in f + module_init
}

/// Scenario 2: tuple-returning function lowers to a struct return.
#[test]
fn test_tuple_return_struct() {
    let tuple = Expr::new(
        ExprNode::Tuple(vec![
            int(1, 2),
            Expr::new(ExprNode::Bool(true), sp(2)),
            Expr::new(ExprNode::Float(3.0), sp(2)),
        ]),
        sp(2),
    );
    let mut m = Module::new("main", "main.py");
    m.body.push(def_fn(
        "f",
        vec![],
        Some(name("tuple")),
        vec![Stmt::new(StmtNode::Return(Some(tuple)), sp(2))],
    ));
    let ir = compile_module_to_ir(&mut m, &CompilerConfig::default()).expect("accepted");
    assert!(ir.contains("{ i32, i1, double }"));
    assert_eq!(ir.matches("insertvalue").count(), 3);
}

/// Scenario 3: constant-range loop unrolling.
#[test]
fn test_loop_unroll_constant_range() {
    let body_stmt = assign(
        "acc",
        Expr::new(
            ExprNode::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(name("acc")),
                rhs: Box::new(name("i")),
            },
            sp(3),
        ),
        3,
    );
    let mut m = Module::new("main", "main.py");
    m.body.push(assign("acc", int(0, 1), 1));
    m.body.push(Stmt::new(
        StmtNode::For {
            target: name_store("i", 2),
            iter: Expr::new(
                ExprNode::Call {
                    func: Box::new(name("range")),
                    args: vec![int(0, 2), int(3, 2), int(1, 2)],
                    keywords: vec![],
                },
                sp(2),
            ),
            body: vec![body_stmt],
            orelse: vec![],
        },
        sp(2),
    ));

    let changes = LoopUnroll.run(&mut m);
    assert_eq!(changes, 1);
    // acc = 0, then (i = k; acc = acc + i) x 3.
    assert_eq!(m.body.len(), 7);
    let mut expected_i = 0;
    for pair in m.body[1..].chunks(2) {
        let StmtNode::Assign { targets, value } = &pair[0].node else {
            panic!("expected target assignment");
        };
        assert_eq!(targets[0].as_name(), Some("i"));
        assert_eq!(value.as_const_int(), Some(expected_i));
        expected_i += 1;
    }
}

/// Scenario 4: try/except with a typed handler.
#[test]
fn test_try_except_invoke_and_dispatch() {
    let mut m = Module::new("main", "main.py");
    m.body.push(def_fn(
        "f",
        vec![],
        None,
        vec![Stmt::new(StmtNode::Pass, sp(1))],
    ));
    m.body.push(def_fn(
        "g",
        vec![ParamDecl::simple("e", None)],
        None,
        vec![Stmt::new(StmtNode::Pass, sp(1))],
    ));
    let try_stmt = Stmt::new(
        StmtNode::Try {
            body: vec![Stmt::new(
                StmtNode::Expr(Expr::new(
                    ExprNode::Call {
                        func: Box::new(name("f")),
                        args: vec![],
                        keywords: vec![],
                    },
                    sp(3),
                )),
                sp(3),
            )],
            handlers: vec![ExceptHandler {
                type_name: Some("ValueError".to_string()),
                bind: Some("e".to_string()),
                body: vec![Stmt::new(
                    StmtNode::Expr(Expr::new(
                        ExprNode::Call {
                            func: Box::new(name("g")),
                            args: vec![name("e")],
                            keywords: vec![],
                        },
                        sp(5),
                    )),
                    sp(5),
                )],
                span: sp(4),
            }],
            orelse: vec![],
            finalbody: vec![],
        },
        sp(2),
    );
    m.body.push(def_fn("h", vec![], None, vec![try_stmt]));
    let ir = compile_module_to_ir(&mut m, &CompilerConfig::default()).expect("accepted");
    assert!(ir.contains("invoke void @pycc_fn_f()"));
    assert!(ir.contains("unwind label %lpad"));
    assert!(ir.contains("landingpad { ptr, i32 } cleanup"));
    assert!(ir.contains("\"ValueError\\00\""));
    assert!(ir.contains("@pycc_rt_clear_exception"));
    // The handler binds e and calls g with it.
    assert!(ir.contains("@pycc_fn_g"));
}

/// Scenario 6: dominators on a double diamond.
#[test]
fn test_double_diamond_dominators() {
    let diamond = |line: u32| {
        Stmt::new(
            StmtNode::If {
                cond: name("c"),
                body: vec![assign("x", int(1, line), line)],
                orelse: vec![assign("x", int(2, line), line)],
            },
            sp(line),
        )
    };
    let body = vec![diamond(1), diamond(5)];
    let f = SsaBuilder::build(&body);
    let joins: Vec<usize> = f
        .blocks
        .iter()
        .filter(|b| b.pred.len() >= 2)
        .map(|b| b.id)
        .collect();
    assert_eq!(joins.len(), 2);
    assert!(f.blocks[joins[1]].phis.iter().any(|p| p.var == "x"));

    let dt = SsaBuilder::compute_dominators(&f);
    // Both merges are dominated by the entry.
    for &j in &joins {
        let mut cur = j as isize;
        while cur != f.entry as isize {
            cur = dt.idom[cur as usize];
            assert!(cur >= 0, "join must reach entry through idoms");
        }
    }
    // The second merge does not dominate the first.
    let mut cur = dt.idom[joins[0]];
    while cur >= 0 {
        assert_ne!(cur as usize, joins[1]);
        cur = dt.idom[cur as usize];
    }
}

/// SimplifyScopes keeps refinement branches with distinct returns intact.
#[test]
fn test_distinct_returns_not_merged() {
    let mut m = Module::new("main", "main.py");
    m.body.push(Stmt::new(
        StmtNode::If {
            cond: name("c"),
            body: vec![Stmt::new(StmtNode::Return(Some(int(0, 2))), sp(2))],
            orelse: vec![Stmt::new(StmtNode::Return(Some(int(1, 3))), sp(3))],
        },
        sp(1),
    ));
    assert_eq!(SimplifyScopes.run(&mut m), 0);
    assert!(matches!(m.body[0].node, StmtNode::If { .. }));
}
