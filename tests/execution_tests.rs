mod common;

use std::sync::{Arc, Mutex};
use std::thread;

use common::{init_tracing, instance, module, ADD_ONE_HEX};
use pretty_assertions::assert_eq;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rstest::rstest;
use wasmcore::parser::types::{FunctionType, ValueType};
use wasmcore::{
    decode, instantiate, instantiate_with_config, invoke, Callee, Config, ConfigError, Imports, LinkError, Trap,
    Value,
};

mod scenarios {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_one_by_index() {
        init_tracing();
        let bytes = hex::decode(ADD_ONE_HEX).unwrap();
        let module = decode(&bytes).unwrap();
        let mut instance = instantiate(module, &Imports::new()).unwrap();
        assert_eq!(invoke(&mut instance, 0, &[Value::I32(41)]), Ok(vec![Value::I32(42)]));
        assert_eq!(invoke(&mut instance, 0, &[Value::I32(i32::MAX)]), Ok(vec![Value::I32(i32::MIN)]));
    }

    #[test]
    fn refused_grow_leaves_memory_unchanged() {
        let mut instance = instance(
            r#"(module (memory (export "mem") 1)
                (data (i32.const 0) "\2a")
                (func (export "grow") (param i32) (result i32) (memory.grow (local.get 0))))"#,
        );
        assert_eq!(instance.invoke("grow", &[Value::I32(0x10000)]), Ok(vec![Value::I32(-1)]));
        let memory = instance.memory("mem").unwrap();
        assert_eq!(memory.size(), 1);
        assert_eq!(memory.read_u8(0), Ok(0x2a));
    }

    #[test]
    fn indirect_call_signature_mismatch() {
        let mut instance = instance(
            r#"(module
                (type $v_i (func (result i32)))
                (type $i_i (func (param i32) (result i32)))
                (table 1 funcref)
                (elem (i32.const 0) $f)
                (func $f (type $v_i) (i32.const 7))
                (func (export "call") (result i32)
                    (call_indirect (type $i_i) (i32.const 1) (i32.const 0))))"#,
        );
        assert_eq!(instance.invoke("call", &[]), Err(Trap::IndirectCallTypeMismatch));
    }

    #[test]
    fn structurally_equal_types_are_compatible() {
        let mut instance = instance(
            r#"(module
                (type $a (func (result i32)))
                (type $b (func (result i32)))
                (table 1 funcref)
                (elem (i32.const 0) $f)
                (func $f (type $a) (i32.const 7))
                (func (export "call") (result i32) (call_indirect (type $b) (i32.const 0))))"#,
        );
        assert_eq!(instance.invoke("call", &[]), Ok(vec![Value::I32(7)]));
    }
}

mod invocation {
    use super::*;
    use pretty_assertions::assert_eq;

    const WAT: &str = r#"(module
        (memory (export "mem") 1)
        (func (export "add") (param i32 i64) (result i64)
            (i64.add (i64.extend_i32_s (local.get 0)) (local.get 1))))"#;

    #[test]
    fn unknown_export() {
        let mut instance = instance(WAT);
        assert_eq!(instance.invoke("sub", &[]), Err(Trap::UnknownExport("sub".into())));
    }

    #[test]
    fn export_is_not_a_function() {
        let mut instance = instance(WAT);
        assert_eq!(instance.invoke("mem", &[]), Err(Trap::NotAFunction("mem".into())));
    }

    #[test]
    fn unknown_function_index() {
        let mut instance = instance(WAT);
        assert_eq!(instance.invoke(Callee::Index(1), &[]), Err(Trap::UnknownFunction(1)));
    }

    #[rstest]
    #[case::too_few(&[Value::I32(1)])]
    #[case::too_many(&[Value::I32(1), Value::I64(2), Value::I32(3)])]
    #[case::wrong_type(&[Value::I64(1), Value::I64(2)])]
    fn argument_mismatch(#[case] args: &[Value]) {
        let mut instance = instance(WAT);
        let err = instance.invoke("add", args).unwrap_err();
        assert!(matches!(err, Trap::ArgumentMismatch { ref expected, .. } if expected == "[i32 i64]"), "{err}");
    }

    #[test]
    fn by_name_and_by_index_agree() {
        let mut instance = instance(WAT);
        let args = [Value::I32(-3), Value::I64(10)];
        assert_eq!(instance.invoke("add", &args), Ok(vec![Value::I64(7)]));
        assert_eq!(instance.invoke(0, &args), Ok(vec![Value::I64(7)]));
        assert_eq!(invoke(&mut instance, String::from("add"), &args), Ok(vec![Value::I64(7)]));
    }

    #[test]
    fn references_cross_the_boundary() {
        let mut instance = instance(
            r#"(module
                (func $f)
                (elem declare func $f)
                (func (export "id") (param externref) (result externref) (local.get 0))
                (func (export "null") (param funcref) (result i32) (ref.is_null (local.get 0)))
                (func (export "get_f") (result funcref) (ref.func $f)))"#,
        );
        assert_eq!(instance.invoke("id", &[Value::ExternRef(Some(7))]), Ok(vec![Value::ExternRef(Some(7))]));
        assert_eq!(instance.invoke("id", &[Value::ExternRef(None)]), Ok(vec![Value::ExternRef(None)]));
        assert_eq!(instance.invoke("null", &[Value::FuncRef(None)]), Ok(vec![Value::I32(1)]));
        assert_eq!(instance.invoke("null", &[Value::FuncRef(Some(0))]), Ok(vec![Value::I32(0)]));
        assert!(matches!(
            instance.invoke("null", &[Value::FuncRef(Some(99))]),
            Err(Trap::ArgumentMismatch { .. })
        ));
        assert_eq!(instance.invoke("get_f", &[]), Ok(vec![Value::FuncRef(Some(0))]));
    }

    #[test]
    fn trap_keeps_earlier_writes_and_instance_stays_usable() {
        let mut instance = instance(
            r#"(module (memory (export "mem") 1)
                (global $g (export "g") (mut i32) (i32.const 0))
                (func (export "poke") (param i32)
                    (i32.store8 (i32.const 0) (local.get 0))
                    (global.set $g (local.get 0))
                    (if (i32.eqz (local.get 0)) (then (unreachable)))))"#,
        );
        assert_eq!(instance.invoke("poke", &[Value::I32(0)]), Err(Trap::Unreachable));
        assert_eq!(instance.invoke("poke", &[Value::I32(5)]), Ok(vec![]));
        assert_eq!(instance.memory("mem").unwrap().read_u8(0), Ok(5));
        assert_eq!(instance.global("g"), Some(Value::I32(5)));
    }
}

mod host {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn host_functions_receive_arguments_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut imports = Imports::new();
        imports.func("env", "log", FunctionType::new(&[ValueType::I32, ValueType::F64], &[]), move |_, args| {
            sink.lock().unwrap().extend_from_slice(args);
            Ok(vec![])
        });

        let wasm = module(
            r#"(module (import "env" "log" (func $log (param i32 f64)))
                (func (export "run")
                    (call $log (i32.const 1) (f64.const 2.5))
                    (call $log (i32.const 3) (f64.const 4))))"#,
        );
        let mut instance = instantiate(wasm, &imports).unwrap();
        instance.invoke("run", &[]).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Value::I32(1), Value::F64(2.5), Value::I32(3), Value::F64(4.0)]
        );
    }

    #[test]
    fn caller_reaches_memory_and_globals() {
        let mut imports = Imports::new();
        imports.func("env", "fill", FunctionType::new(&[ValueType::I32], &[ValueType::I32]), |caller, args| {
            let ptr = args[0].as_i32().unwrap_or(0) as u64;
            let memory = caller.memory_mut().ok_or_else(|| Trap::Host("no memory".into()))?;
            memory.write_bytes(ptr, b"hi!")?;
            let calls = caller.global("calls").and_then(|v| v.as_i32()).unwrap_or(0);
            caller.set_global("calls", Value::I32(calls + 1))?;
            Ok(vec![Value::I32(3)])
        });

        let wasm = module(
            r#"(module (import "env" "fill" (func $fill (param i32) (result i32)))
                (memory (export "mem") 1)
                (global (export "calls") (mut i32) (i32.const 0))
                (func (export "run") (param i32) (result i32)
                    (i32.add (call $fill (local.get 0)) (i32.load8_u (local.get 0)))))"#,
        );
        let mut instance = instantiate(wasm, &imports).unwrap();
        assert_eq!(instance.invoke("run", &[Value::I32(100)]), Ok(vec![Value::I32(3 + b'h' as i32)]));
        assert_eq!(instance.invoke("run", &[Value::I32(65534)]), Err(Trap::MemoryOutOfBounds));
        assert_eq!(instance.memory("mem").unwrap().read_bytes(100, 3).unwrap(), b"hi!");
        assert_eq!(instance.global("calls"), Some(Value::I32(1)));
    }

    #[test]
    fn host_errors_propagate() {
        let mut imports = Imports::new();
        imports
            .func("env", "deny", FunctionType::default(), |_, _| Err(Trap::Host("denied".into())))
            .func("env", "liar", FunctionType::new(&[], &[ValueType::I32]), |_, _| Ok(vec![]));

        let wasm = module(
            r#"(module
                (import "env" "deny" (func $deny))
                (import "env" "liar" (func $liar (result i32)))
                (func (export "deny") (call $deny))
                (func (export "liar") (result i32) (call $liar)))"#,
        );
        let mut instance = instantiate(wasm, &imports).unwrap();
        assert_eq!(instance.invoke("deny", &[]), Err(Trap::Host("denied".into())));
        assert!(matches!(instance.invoke("liar", &[]), Err(Trap::Host(_))));
        // imported functions are invocable directly by index
        assert_eq!(instance.invoke(0, &[]), Err(Trap::Host("denied".into())));
    }

    #[test]
    fn host_references_must_name_instance_functions() {
        let mut imports = Imports::new();
        imports
            .func("env", "dangling", FunctionType::new(&[], &[ValueType::FuncRef]), |_, _| {
                Ok(vec![Value::FuncRef(Some(999))])
            })
            .func("env", "own", FunctionType::new(&[], &[ValueType::FuncRef]), |_, _| {
                Ok(vec![Value::FuncRef(Some(2))])
            });

        let wasm = module(
            r#"(module
                (import "env" "dangling" (func $dangling (result funcref)))
                (import "env" "own" (func $own (result funcref)))
                (table $t 1 funcref)
                (func (export "store_dangling") (table.set $t (i32.const 0) (call $dangling)))
                (func (export "store_own") (result funcref)
                    (table.set $t (i32.const 0) (call $own))
                    (table.get $t (i32.const 0))))"#,
        );
        let mut instance = instantiate(wasm, &imports).unwrap();
        assert!(matches!(instance.invoke("store_dangling", &[]), Err(Trap::Host(_))));
        assert_eq!(instance.invoke("store_own", &[]), Ok(vec![Value::FuncRef(Some(2))]));
    }

    #[test]
    fn start_function_runs_during_instantiation() {
        let mut imports = Imports::new();
        imports.global("env", "seed", Value::I32(20), false);
        let wasm = module(
            r#"(module (import "env" "seed" (global $seed i32))
                (global $g (export "g") (mut i32) (i32.const 0))
                (func $init (global.set $g (i32.add (global.get $seed) (i32.const 1))))
                (start $init))"#,
        );
        let instance = instantiate(wasm, &imports).unwrap();
        assert_eq!(instance.global("g"), Some(Value::I32(21)));

        let err = instantiate(module("(module (func $s (unreachable)) (start $s))"), &Imports::new()).unwrap_err();
        assert_eq!(err, LinkError::Trap(Trap::Unreachable));
    }
}

mod limits {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn value_stack_limit() {
        let wasm = module(
            r#"(module (func (export "deep") (result i32)
                (i32.const 1) (i32.const 1) (i32.const 1) (i32.const 1) (i32.const 1)
                (i32.const 1) (i32.const 1) (i32.const 1) (i32.const 1) (i32.const 1)
                (i32.add) (i32.add) (i32.add) (i32.add) (i32.add)
                (i32.add) (i32.add) (i32.add) (i32.add)))"#,
        );
        let config = Config { max_value_stack: 8, ..Config::default() };
        let mut instance = instantiate_with_config(wasm, &Imports::new(), config).unwrap();
        assert_eq!(instance.invoke("deep", &[]), Err(Trap::CallStackExhausted));
    }

    #[test]
    fn deep_recursion_does_not_overflow_the_host_stack() {
        let wasm = module(
            r#"(module (func $down (export "down") (param i32) (result i32)
                (if (result i32) (i32.eqz (local.get 0))
                    (then (i32.const 0))
                    (else (i32.add (i32.const 1) (call $down (i32.sub (local.get 0) (i32.const 1))))))))"#,
        );
        let config = Config { max_call_depth: 100_000, ..Config::default() };
        let mut instance = instantiate_with_config(wasm, &Imports::new(), config).unwrap();
        assert_eq!(instance.invoke("down", &[Value::I32(50_000)]), Ok(vec![Value::I32(50_000)]));
        assert_eq!(instance.invoke("down", &[Value::I32(200_000)]), Err(Trap::CallStackExhausted));
    }

    #[test]
    fn config_from_json() {
        let config = Config::from_json(r#"{"max_call_depth": 16, "fuel": 500}"#).unwrap();
        assert_eq!(config, Config { max_call_depth: 16, fuel: Some(500), ..Config::default() });

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(Config::from_json(&json).unwrap(), config);

        assert!(matches!(Config::from_json(r#"{"max_stack": 1}"#), Err(ConfigError::Decode(_))));
        assert!(matches!(Config::from_json(r#"{"max_call_depth": 0}"#), Err(ConfigError::Invalid(_))));

        let wasm = module(r#"(module (func (export "spin") (loop (br 0))))"#);
        let mut instance = instantiate_with_config(wasm, &Imports::new(), config).unwrap();
        assert_eq!(instance.invoke("spin", &[]), Err(Trap::ResourceExhausted));
        assert_eq!(instance.fuel(), Some(0));
    }
}

mod properties {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone)]
    enum Expr {
        Const(i32),
        Param,
        Bin(&'static str, Box<Expr>, Box<Expr>),
    }

    const OPS: [&str; 8] = ["add", "sub", "mul", "and", "or", "xor", "shl", "rotl"];

    fn random_expr(rng: &mut StdRng, depth: u32) -> Expr {
        if depth == 0 || rng.gen_range(0..4) == 0 {
            return if rng.gen() { Expr::Const(rng.gen()) } else { Expr::Param };
        }
        let op = OPS[rng.gen_range(0..OPS.len())];
        Expr::Bin(op, Box::new(random_expr(rng, depth - 1)), Box::new(random_expr(rng, depth - 1)))
    }

    fn to_wat(expr: &Expr) -> String {
        match expr {
            Expr::Const(v) => format!("(i32.const {v})"),
            Expr::Param => "(local.get 0)".to_string(),
            Expr::Bin(op, a, b) => format!("(i32.{op} {} {})", to_wat(a), to_wat(b)),
        }
    }

    fn eval(expr: &Expr, param: i32) -> i32 {
        match expr {
            Expr::Const(v) => *v,
            Expr::Param => param,
            Expr::Bin(op, a, b) => {
                let (a, b) = (eval(a, param), eval(b, param));
                match *op {
                    "add" => a.wrapping_add(b),
                    "sub" => a.wrapping_sub(b),
                    "mul" => a.wrapping_mul(b),
                    "and" => a & b,
                    "or" => a | b,
                    "xor" => a ^ b,
                    "shl" => a.wrapping_shl(b as u32),
                    _ => a.rotate_left(b as u32 % 32),
                }
            }
        }
    }

    #[test]
    fn random_expressions_leave_exactly_their_result() {
        let mut rng = StdRng::seed_from_u64(0x57ac);
        for _ in 0..200 {
            let expr = random_expr(&mut rng, 5);
            let wat = format!(
                r#"(module (func (export "f") (param i32) (result i32)
                    (block (result i32) {})))"#,
                to_wat(&expr)
            );
            let mut instance = instance(&wat);
            let param: i32 = rng.gen();
            assert_eq!(instance.invoke("f", &[Value::I32(param)]), Ok(vec![Value::I32(eval(&expr, param))]), "{wat}");
        }
    }

    #[test]
    fn every_access_is_checked() {
        let mut instance = instance(
            r#"(module (memory 1)
                (func (export "load8") (param i32) (result i32) (i32.load8_u offset=3 (local.get 0)))
                (func (export "load64") (param i32) (result i64) (i64.load offset=3 (local.get 0)))
                (func (export "store32") (param i32) (i32.store offset=3 (local.get 0) (i32.const -1))))"#,
        );
        let mut rng = StdRng::seed_from_u64(0xb0b);
        for _ in 0..5_000 {
            let base: u32 = if rng.gen() { rng.gen_range(65_500..65_536) } else { rng.gen() };
            let (name, width) = match rng.gen_range(0..3) {
                0 => ("load8", 1u64),
                1 => ("load64", 8),
                _ => ("store32", 4),
            };
            let in_bounds = base as u64 + 3 + width <= 65_536;
            let result = instance.invoke(name, &[Value::I32(base as i32)]);
            assert_eq!(result.is_ok(), in_bounds, "{name} at {base}");
            if !in_bounds {
                assert_eq!(result, Err(Trap::MemoryOutOfBounds));
            }
        }
    }
}

#[test]
fn instances_of_a_shared_module_run_on_separate_threads() {
    let wasm = Arc::new(module(
        r#"(module (memory 1)
            (global $calls (export "calls") (mut i32) (i32.const 0))
            (func $fib (export "fib") (param i32) (result i32)
                (global.set $calls (i32.add (global.get $calls) (i32.const 1)))
                (if (result i32) (i32.lt_u (local.get 0) (i32.const 2))
                    (then (local.get 0))
                    (else (i32.add (call $fib (i32.sub (local.get 0) (i32.const 1)))
                                   (call $fib (i32.sub (local.get 0) (i32.const 2))))))))"#,
    ));

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let wasm = Arc::clone(&wasm);
            thread::spawn(move || {
                let mut instance = instantiate(wasm, &Imports::new()).unwrap();
                let result = instance.invoke("fib", &[Value::I32(10 + n)]).unwrap();
                (result, instance.global("calls"))
            })
        })
        .collect();

    let expected = [(55, 177), (89, 287), (144, 465), (233, 753)];
    for (handle, (fib, calls)) in handles.into_iter().zip(expected) {
        assert_eq!(handle.join().unwrap(), (vec![Value::I32(fib)], Some(Value::I32(calls))));
    }
}
