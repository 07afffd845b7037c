use criterion::{criterion_group, criterion_main, Criterion};
use rand::Rng;
use std::path::Path;
use wisp_kv::{
  db::Engine,
  option::Options,
  util::rand_kv::{get_test_key, get_test_value},
};

fn bench_options(dir: &str) -> Options {
  let path = Path::new("/tmp/wisp-kv-bench").join(dir);
  if !path.is_dir() {
    std::fs::create_dir_all(&path).unwrap();
  }
  Options::in_dir(path)
}

fn bench_put(c: &mut Criterion) {
  let engine = Engine::open(bench_options("put-bench")).unwrap();

  let mut rnd = rand::rng();

  c.bench_function("wisp-kv-put-bench", |b| {
    b.iter(|| {
      let i = rnd.random_range(0..u32::MAX) as usize;
      let res = engine.put(get_test_key(i), get_test_value(i));
      assert!(res.is_ok());
    })
  });

  drop(engine);
  std::fs::remove_dir_all("/tmp/wisp-kv-bench/put-bench").unwrap();
}

fn bench_get(c: &mut Criterion) {
  let engine = Engine::open(bench_options("get-bench")).unwrap();

  for i in 0..100000 {
    let res = engine.put(get_test_key(i), get_test_value(i));
    assert!(res.is_ok());
  }
  engine.flush().unwrap();

  let mut rnd = rand::rng();

  c.bench_function("wisp-kv-get-bench", |b| {
    b.iter(|| {
      let i = rnd.random_range(0..u32::MAX) as usize;
      let res = engine.get(get_test_key(i));
      assert!(res.is_ok());
    })
  });

  drop(engine);
  std::fs::remove_dir_all("/tmp/wisp-kv-bench/get-bench").unwrap();
}

fn bench_delete(c: &mut Criterion) {
  let engine = Engine::open(bench_options("delete-bench")).unwrap();

  for i in 0..100000 {
    let res = engine.put(get_test_key(i), get_test_value(i));
    assert!(res.is_ok());
  }

  let mut rnd = rand::rng();

  c.bench_function("wisp-kv-delete-bench", |b| {
    b.iter(|| {
      let i = rnd.random_range(0..100000) as usize;
      engine.delete(get_test_key(i)).unwrap();
    })
  });

  drop(engine);
  std::fs::remove_dir_all("/tmp/wisp-kv-bench/delete-bench").unwrap();
}

criterion_group!(benches, bench_get, bench_put, bench_delete);
criterion_main!(benches);
