use criterion::{black_box, criterion_group, criterion_main, Criterion};

use polis_sys::{compiler, marshal, Interpreter};

const SUM_LOOP: &str = "\
total = 0
for i in range(1000):
    total = total + i
end
return total
";

const CALL_HEAVY: &str = "\
def add(x, y)
    return x + y
end
total = 0
for i in range(200):
    total = add(total, i)
end
return total
";

fn bench_vm(c: &mut Criterion) {
    let sum_loop = compiler::compile(SUM_LOOP).unwrap();
    c.bench_function("vm_sum_loop", |b| {
        b.iter(|| {
            let mut vm = Interpreter::new(Vec::new());
            black_box(vm.exec(&sum_loop.code).unwrap())
        })
    });

    let call_heavy = compiler::compile(CALL_HEAVY).unwrap();
    c.bench_function("vm_call_heavy", |b| {
        b.iter(|| {
            let mut vm = Interpreter::new(Vec::new());
            black_box(vm.exec(&call_heavy.code).unwrap())
        })
    });

    c.bench_function("marshal_roundtrip", |b| {
        b.iter(|| {
            let blob = marshal::serialize(&call_heavy.code).unwrap();
            black_box(marshal::deserialize(&blob).unwrap())
        })
    });
}

criterion_group!(benches, bench_vm);
criterion_main!(benches);
