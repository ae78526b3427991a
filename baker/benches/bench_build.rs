use baker::{build, BuildSettings};
use common::MeshVert;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::{vec3, Vec3};

fn wave_grid(n: u32) -> (Vec<MeshVert>, Vec<u32>, Vec<u32>) {
    let verts = (0..=n)
        .flat_map(|y| {
            (0..=n).map(move |x| {
                let (fx, fy) = (x as f32, y as f32);
                MeshVert::new(vec3(fx, fy, (fx * 0.25).sin() + (fy * 0.4).cos()), Vec3::Z)
            })
        })
        .collect();
    let mut indexes = Vec::new();
    for y in 0..n {
        for x in 0..n {
            let i = y * (n + 1) + x;
            indexes.extend([i, i + 1, i + n + 2, i, i + n + 2, i + n + 1]);
        }
    }
    let materials = vec![0; indexes.len() / 3];
    (verts, indexes, materials)
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let settings = BuildSettings::default();
    let mut group = c.benchmark_group("build");
    group.sample_size(10);

    for n in [32, 96] {
        let (verts, indexes, materials) = wave_grid(n);
        group.bench_function(format!("grid {n}"), |b| {
            b.iter(|| build(black_box(&verts), &indexes, &materials, &settings).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
