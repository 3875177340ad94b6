//! End-to-end emission tests: build stages through the DSL surface,
//! schedule them, and compare the generated C against fixtures
//! (whitespace-normalised).

use cinn::prelude::*;

fn norm(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn f32_tensor(name: &str, dims: &[i32]) -> Expr {
    Expr::tensor(
        name,
        PrimitiveType::Float32,
        dims.iter().map(|&d| Constant::from(d)).collect(),
    )
}

#[test]
fn matmul_20x30_30x40() {
    cinn::context::reset();
    let x = f32_tensor("x", &[20, 30]);
    let w = f32_tensor("w", &[30, 40]);
    let out = f32_tensor("out", &[20, 40]);
    let i = Var::named("i");
    let j = Var::named("j");
    let k = Var::named("k");

    let s0 = Stage::new(
        out.clone()
            .index(i.clone())
            .index(j.clone())
            .assign(Expr::from(0.0f32)),
    );
    let s1 = Stage::new(
        out.clone().index(i.clone()).index(j.clone()).sum_assign(
            x.clone().index(i.clone()).index(k.clone())
                * w.clone().index(k.clone()).index(j.clone()),
        ),
    );

    let func = Function::make("complex", vec![x, w], vec![out], vec![s0, s1]).unwrap();
    let mut gen = CCodeGen::source();
    gen.print(&func.ir_function());

    let target = r#"void complex (cinn_float32_t* x, cinn_float32_t* w, cinn_float32_t* out) {
  for (int c0 = 0; (c0 <= 19); c0 += 1) {
    for (int c1 = 0; (c1 <= 39); c1 += 1) {
      out[c0, c1] = 0;
    }
  }
  for (int c0 = 0; (c0 <= 19); c0 += 1) {
    for (int c1 = 0; (c1 <= 39); c1 += 1) {
      for (int c2 = 0; (c2 <= 29); c2 += 1) {
        out[c0, c1] += (x[c0, c2] * w[c2, c1]);
      }
    }
  }
}"#;
    assert_eq!(norm(&gen.compiled_code()), norm(target));
}

#[test]
fn matmul_transposed() {
    cinn::context::reset();
    let x = f32_tensor("x", &[20, 30]);
    let w = f32_tensor("w", &[40, 30]);
    let out = f32_tensor("out", &[20, 40]);
    let i = Var::named("i");
    let j = Var::named("j");
    let k = Var::named("k");

    let s0 = Stage::new(
        out.clone()
            .index(i.clone())
            .index(j.clone())
            .assign(Expr::from(0.0f32)),
    );
    let s1 = Stage::new(
        out.clone().index(i.clone()).index(j.clone()).sum_assign(
            x.clone().index(i.clone()).index(k.clone())
                * w.clone().index(j.clone()).index(k.clone()),
        ),
    );

    let func = Function::make("complex", vec![x, w], vec![out], vec![s0, s1]).unwrap();
    let mut gen = CCodeGen::source();
    gen.print(&func.ir_function());

    let target = r#"void complex (cinn_float32_t* x, cinn_float32_t* w, cinn_float32_t* out) {
  for (int c0 = 0; (c0 <= 19); c0 += 1) {
    for (int c1 = 0; (c1 <= 39); c1 += 1) {
      out[c0, c1] = 0;
    }
  }
  for (int c0 = 0; (c0 <= 19); c0 += 1) {
    for (int c1 = 0; (c1 <= 39); c1 += 1) {
      for (int c2 = 0; (c2 <= 29); c2 += 1) {
        out[c0, c1] += (x[c0, c2] * w[c1, c2]);
      }
    }
  }
}"#;
    assert_eq!(norm(&gen.compiled_code()), norm(target));
}

#[test]
fn three_stage_pipeline_with_module() {
    cinn::context::reset();
    let x0 = f32_tensor("x0", &[3, 4]);
    let w0 = f32_tensor("w0", &[4, 2]);
    let b = f32_tensor("b", &[2]);
    let tmp0 = f32_tensor("tmp0", &[3, 2]);
    let tmp1 = f32_tensor("tmp1", &[3, 2]);
    let tmp2 = f32_tensor("tmp2", &[3, 2]);
    let i = Var::named("i");
    let j = Var::named("j");
    let k = Var::named("k");

    // matmul accumulation
    let s0 = Stage::new(
        tmp0.clone().index(i.clone()).index(j.clone()).sum_assign(
            x0.clone().index(i.clone()).index(k.clone())
                * w0.clone().index(k.clone()).index(j.clone()),
        ),
    );
    // bias add
    let s1 = Stage::new(
        tmp1.clone().index(i.clone()).index(j.clone()).assign(
            tmp0.clone().index(i.clone()).index(j.clone()) + b.clone().index(j.clone()),
        ),
    );
    // relu
    let s2 = Stage::new(tmp2.clone().index(i.clone()).index(j.clone()).assign(Expr::max(
        tmp1.clone().index(i.clone()).index(j.clone()),
        Expr::from(0.0f32),
    )));

    let func = Function::make(
        "network",
        vec![b.clone(), w0.clone(), x0.clone()],
        vec![tmp2.clone()],
        vec![s0, s1, s2],
    )
    .unwrap();

    let data_section = Expr::block(vec![
        Expr::mark("create weight buffers"),
        Expr::buffer_opr(
            BufferKind::CreateAssign,
            "b",
            Expr::from(2i32),
            PrimitiveType::Float32,
            vec![Constant::from(0.1f32), Constant::from(0.2f32)],
        ),
        Expr::buffer_opr(
            BufferKind::CreateAssign,
            "w0",
            Expr::from(8i32),
            PrimitiveType::Float32,
            (0..8).map(|v| Constant::from(v as f32 * 0.5f32)).collect(),
        ),
        Expr::mark("create input buffers"),
        Expr::buffer_opr(
            BufferKind::Create,
            "x0",
            Expr::from(48i32),
            PrimitiveType::Float32,
            vec![],
        ),
        Expr::mark("create temporary variable buffers"),
        Expr::buffer_opr(
            BufferKind::Create,
            "tmp1",
            Expr::from(24i32),
            PrimitiveType::Float32,
            vec![],
        ),
        Expr::buffer_opr(
            BufferKind::Create,
            "tmp0",
            Expr::from(24i32),
            PrimitiveType::Float32,
            vec![],
        ),
        Expr::mark("create output buffers"),
        Expr::buffer_opr(
            BufferKind::Create,
            "tmp2",
            Expr::from(24i32),
            PrimitiveType::Float32,
            vec![],
        ),
    ]);
    let module = Expr::module(data_section, Expr::block(vec![func.ir_function()]));

    let mut gen = CCodeGen::source();
    gen.compile(&module).unwrap();
    let code = gen.compiled_code();

    // data section: literal arrays first, then mallocs in order
    let pos = |needle: &str| {
        code.find(needle)
            .unwrap_or_else(|| panic!("`{}` missing in:\n{}", needle, code))
    };
    assert!(code.contains("// create weight buffers"));
    let p_b = pos("cinn_float32_t b[] = { 0.1, 0.2 };");
    let p_w0 = pos("cinn_float32_t w0[] =");
    let p_x0 = pos("cinn_float32_t* x0 = (cinn_float32_t*) malloc(48);");
    let p_tmp1 = pos("cinn_float32_t* tmp1 = (cinn_float32_t*) malloc(24);");
    let p_tmp0 = pos("cinn_float32_t* tmp0 = (cinn_float32_t*) malloc(24);");
    let p_tmp2 = pos("cinn_float32_t* tmp2 = (cinn_float32_t*) malloc(24);");
    assert!(p_b < p_w0 && p_w0 < p_x0 && p_x0 < p_tmp1 && p_tmp1 < p_tmp0 && p_tmp0 < p_tmp2);

    // single function taking (b, w0, x0, tmp2)
    let p_fn = pos(
        "void network (cinn_float32_t* b, cinn_float32_t* w0, cinn_float32_t* x0, cinn_float32_t* tmp2) {",
    );
    assert!(p_tmp2 < p_fn);

    // bodies in stage order
    let p_s0 = pos("tmp0[c0, c1] += (x0[c0, c2] * w0[c2, c1]);");
    let p_s1 = pos("tmp1[c0, c1] = (tmp0[c0, c1] + b[c1]);");
    let p_s2 = pos("tmp2[c0, c1] = cinn_max(tmp1[c0, c1], 0);");
    assert!(p_fn < p_s0 && p_s0 < p_s1 && p_s1 < p_s2);
}

#[test]
fn split_produces_tile_and_remainder_loops() {
    cinn::context::reset();
    let a = f32_tensor("a", &[100]);
    let i = Var::named("i");

    let s0 = Stage::new(
        a.clone()
            .index(i.clone())
            .assign(a.clone().index(i.clone()) + Expr::from(1.0f32)),
    );
    s0.split(&i, 8).unwrap();

    // schedule output space has the two split dimensions
    let schedule = s0.schedule().unwrap();
    assert_eq!(
        schedule.out_dim_names(),
        &["i_".to_string(), "i__".to_string()]
    );
    let back = schedule.in_dim_exprs().unwrap();
    assert_eq!(back[0].coeffs, vec![8, 1], "i must equal 8*i_ + i__");

    let func = Function::make("split_fn", vec![], vec![a], vec![s0]).unwrap();
    let mut gen = CCodeGen::source();
    gen.print(&func.ir_function());

    let target = r#"void split_fn (cinn_float32_t* a) {
  for (int c0 = 0; (c0 <= 12); c0 += 1) {
    for (int c1 = 0; (c1 <= cinn_min(7, (99 - (8 * c0)))); c1 += 1) {
      a[((8 * c0) + c1)] = (a[((8 * c0) + c1)] + 1);
    }
  }
}"#;
    assert_eq!(norm(&gen.compiled_code()), norm(target));
}

#[test]
fn fusion_interleaves_bodies_in_one_nest() {
    cinn::context::reset();
    let a = f32_tensor("a", &[10, 10]);
    let b = f32_tensor("b", &[10, 10]);
    let c = f32_tensor("c", &[10, 10]);
    let d = f32_tensor("d", &[10, 10]);
    let i = Var::named("i");
    let j = Var::named("j");

    let s0 = Stage::new(
        c.clone()
            .index(i.clone())
            .index(j.clone())
            .assign(a.clone().index(i.clone()).index(j.clone()) + Expr::from(1.0f32)),
    );
    let s1 = Stage::new(
        d.clone()
            .index(i.clone())
            .index(j.clone())
            .assign(b.clone().index(i.clone()).index(j.clone()) * Expr::from(2.0f32)),
    );
    s0.fuse_with(&s1.name());
    s1.fuse_with(&s0.name());

    let func = Function::make("fuse_fn", vec![a, b], vec![c, d], vec![s0, s1]).unwrap();
    let mut gen = CCodeGen::source();
    gen.print(&func.ir_function());

    let target = r#"void fuse_fn (cinn_float32_t* a, cinn_float32_t* b, cinn_float32_t* c, cinn_float32_t* d) {
  for (int c0 = 0; (c0 <= 9); c0 += 1) {
    for (int c1 = 0; (c1 <= 9); c1 += 1) {
      c[c0, c1] = (a[c0, c1] + 1);
      d[c0, c1] = (b[c0, c1] * 2);
    }
  }
}"#;
    assert_eq!(norm(&gen.compiled_code()), norm(target));
}

#[test]
fn header_mode_emits_guard_and_decls() {
    cinn::context::reset();
    let x = f32_tensor("x", &[4, 4]);
    let out = f32_tensor("out", &[4, 4]);
    let i = Var::named("i");
    let j = Var::named("j");
    let s0 = Stage::new(
        out.clone()
            .index(i.clone())
            .index(j.clone())
            .assign(x.clone().index(i.clone()).index(j.clone()) * Expr::from(2.0f32)),
    );
    let func = Function::make("scale", vec![x], vec![out], vec![s0]).unwrap();
    let module = Expr::module(Expr::block(vec![]), Expr::block(vec![func.ir_function()]));

    let mut gen = CCodeGen::header();
    gen.compile(&module).unwrap();
    let code = gen.compiled_code();

    assert!(code.starts_with("#ifndef CINN_FILE_\n#define CINN_FILE_\n"));
    assert!(code.contains("#include <stdlib.h>"));
    assert!(code.contains("#include <stdio.h>"));
    assert!(code.contains("#include <math.h>"));
    assert!(code.contains("void scale (cinn_float32_t* x, cinn_float32_t* out);"));
    assert!(code.trim_end().ends_with("#endif  // CINN_FILE_"));
    // header carries no function bodies
    assert!(!code.contains("for (int c0"));
}

#[test]
fn interchange_swaps_loop_order() {
    cinn::context::reset();
    let x = f32_tensor("x", &[20, 40]);
    let out = f32_tensor("out", &[20, 40]);
    let i = Var::named("i");
    let j = Var::named("j");

    let s0 = Stage::new(
        out.clone()
            .index(i.clone())
            .index(j.clone())
            .assign(x.clone().index(i.clone()).index(j.clone()) * Expr::from(2.0f32)),
    );
    s0.interchange(&i, &j);

    let func = Function::make("swapped", vec![x], vec![out], vec![s0]).unwrap();
    let mut gen = CCodeGen::source();
    gen.print(&func.ir_function());

    let target = r#"void swapped (cinn_float32_t* x, cinn_float32_t* out) {
  for (int c0 = 0; (c0 <= 39); c0 += 1) {
    for (int c1 = 0; (c1 <= 19); c1 += 1) {
      out[c1, c0] = (x[c1, c0] * 2);
    }
  }
}"#;
    assert_eq!(norm(&gen.compiled_code()), norm(target));
}

#[test]
fn schedule_places_writers_before_readers() {
    cinn::context::reset();
    let a = f32_tensor("a", &[8]);
    let t = f32_tensor("t", &[8]);
    let o = f32_tensor("o", &[8]);
    let i = Var::named("i");

    // S0 writes t, S1 reads t
    let s0 = Stage::new(
        t.clone()
            .index(i.clone())
            .assign(a.clone().index(i.clone()) + Expr::from(1.0f32)),
    );
    let s1 = Stage::new(
        o.clone()
            .index(i.clone())
            .assign(t.clone().index(i.clone()) * Expr::from(3.0f32)),
    );

    let func = Function::make("chain", vec![a], vec![o], vec![s0, s1]).unwrap();
    let mut gen = CCodeGen::source();
    gen.print(&func.ir_function());
    let code = gen.compiled_code();
    let p_writer = code.find("t[c0] = (a[c0] + 1);").expect("writer body");
    let p_reader = code.find("o[c0] = (t[c0] * 3);").expect("reader body");
    assert!(p_writer < p_reader, "writer must be scheduled first:\n{}", code);
}

#[test]
fn set_roundtrip_and_name_reset() {
    cinn::context::reset();
    // round-trip: parse, print, reparse, compare semantically
    let s = Set::parse("[N] -> { S0[i, j] : 0 <= i < N and 0 <= j < 16 }").unwrap();
    let reparsed = Set::parse(&s.to_string()).unwrap();
    assert!(s.is_equal(&reparsed));

    // generated stage names restart after a context reset
    let a = f32_tensor("a", &[4]);
    let i = Var::named("i");
    let s0 = Stage::new(a.clone().index(i.clone()).assign(Expr::from(0.0f32)));
    assert_eq!(s0.name(), "S0");
    cinn::context::reset();
    let a2 = f32_tensor("a", &[4]);
    let i2 = Var::named("i");
    let s0_again = Stage::new(a2.clone().index(i2.clone()).assign(Expr::from(0.0f32)));
    assert_eq!(s0_again.name(), "S0");
}
