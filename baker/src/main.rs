use std::path::PathBuf;

use anyhow::Context;
use baker::{build_with_format, mesh_io, BuildSettings};
use clap::Parser;
use common::{asset::Asset, MAX_CLUSTER_TRIANGLES};
use indicatif::{ProgressBar, ProgressStyle};
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Bake triangle meshes into streamable cluster hierarchies.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Glob patterns matching .glb, .gltf or .obj files
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Directory the baked resources are written to
    #[arg(short, long, default_value = "baked")]
    output: PathBuf,

    /// Fraction of triangles kept in the fallback mesh
    #[arg(long, default_value_t = 1.0)]
    percent: f32,

    #[arg(long, default_value_t = 22)]
    precision_bits: u32,

    #[arg(long, default_value_t = MAX_CLUSTER_TRIANGLES)]
    cluster_size: usize,

    /// Keep the outer border of open meshes fixed
    #[arg(long)]
    lock_borders: bool,

    /// Also write the fallback mesh as an .obj
    #[arg(long)]
    fallback_obj: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let settings = BuildSettings {
        target_triangle_percent: cli.percent,
        position_precision_bits: cli.precision_bits,
        cluster_size: cli.cluster_size,
        lock_mesh_borders: cli.lock_borders,
        ..Default::default()
    };

    let mut paths = Vec::new();
    for pattern in &cli.inputs {
        for entry in glob::glob(pattern).with_context(|| format!("bad pattern {pattern}"))? {
            paths.push(entry?);
        }
    }
    if paths.is_empty() {
        anyhow::bail!("no input files matched");
    }

    std::fs::create_dir_all(&cli.output)
        .with_context(|| format!("creating {}", cli.output.display()))?;

    let bar = ProgressBar::new(paths.len() as u64);
    bar.set_style(ProgressStyle::with_template(
        "{bar:40} {pos}/{len} {wide_msg}",
    )?);

    for path in paths {
        bar.set_message(path.display().to_string());

        let mesh = mesh_io::load_mesh(&path)?;
        let baked = build_with_format(
            &mesh.verts,
            &mesh.indices,
            &mesh.material_indices,
            mesh.format,
            &settings,
        )
        .with_context(|| format!("baking {}", path.display()))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mesh".to_owned());

        baked.resource.save(cli.output.join(format!("{stem}.bin")))?;

        if cli.fallback_obj {
            let out = cli.output.join(format!("{stem}_fallback.obj"));
            mesh_io::fallback_to_obj(&baked.fallback)
                .save(&out)
                .with_context(|| format!("writing {}", out.display()))?;
        }

        log::info!(
            "{}: {} pages, {} clusters, {} bytes",
            path.display(),
            baked.resource.num_pages(),
            baked.dag.clusters.len(),
            baked.resource.root_data.len() + baked.resource.streamable_pages.len()
        );
        bar.inc(1);
    }

    bar.finish_with_message("done");
    Ok(())
}
