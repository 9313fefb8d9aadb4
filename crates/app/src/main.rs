//! Entry point for modelkit.
//! Loads one model, uploads it and prints what ended up on the GPU.

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use clap::Parser;

use asset::ObjImporter;
use renderer::texture::backend::ClassicBinding;
use renderer::{GraphicsDevice, HeadlessDevice, ModelLoader, TextureSubsystem, WgpuDevice};

/// GPU API wgpu should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliGpuBackend {
    #[default]
    Auto,
    #[value(alias = "vk")]
    Vulkan,
    #[value(alias = "d3d12")]
    Dx12,
    #[value(alias = "mtl")]
    Metal,
    #[value(alias = "opengl", alias = "gles")]
    Gl,
}

impl From<CliGpuBackend> for wgpu::Backends {
    fn from(cli: CliGpuBackend) -> Self {
        match cli {
            CliGpuBackend::Auto => wgpu::Backends::all(),
            CliGpuBackend::Vulkan => wgpu::Backends::VULKAN,
            CliGpuBackend::Dx12 => wgpu::Backends::DX12,
            CliGpuBackend::Metal => wgpu::Backends::METAL,
            CliGpuBackend::Gl => wgpu::Backends::GL,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "modelkit", about = "Load a model file and report its GPU layout", version)]
struct Args {
    /// Wavefront OBJ file to load.
    model: PathBuf,

    /// Record GPU calls in memory instead of opening a device.
    #[arg(long)]
    headless: bool,

    /// GPU API for the wgpu device.
    #[arg(long, default_value = "auto", value_enum)]
    gpu_backend: CliGpuBackend,

    /// Upload textures with bind-to-edit calls even if direct access is available.
    #[arg(long)]
    classic_binding: bool,
}

fn open_device(args: &Args) -> Result<Rc<dyn GraphicsDevice>> {
    if args.headless {
        return Ok(Rc::new(HeadlessDevice::new()));
    }
    let device = pollster::block_on(WgpuDevice::request(args.gpu_backend.into()))
        .context("failed to open a GPU device (try --headless)")?;
    Ok(Rc::new(device))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    log::info!(
        "Starting modelkit. Model: {}, headless={}, backend: {:?}",
        args.model.display(),
        args.headless,
        args.gpu_backend
    );

    let device = open_device(&args)?;
    let textures = if args.classic_binding {
        TextureSubsystem::with_backend(device.clone(), &ClassicBinding)
    } else {
        TextureSubsystem::new(device.clone())
    };
    log::info!("Texture path: {}", textures.backend_name());

    let mut loader = ModelLoader::new(textures, ObjImporter);
    let loaded = loader.load_mesh(&args.model);

    for (i, range) in loader.meshes().iter().enumerate() {
        println!(
            "mesh {i}: {} indices from {}, base vertex {}, material {:?}",
            range.index_count, range.base_index, range.base_vertex, range.material
        );
    }
    for (i, slot) in loader.materials().iter().enumerate() {
        match slot.diffuse() {
            Some(texture) => {
                let (w, h) = texture.image_size();
                println!(
                    "material {i}: {} ({w}x{h}, {} bpp)",
                    texture.path().map(|p| p.display().to_string()).unwrap_or_default(),
                    texture.bits_per_pixel()
                );
            }
            None => println!("material {i}: no diffuse texture"),
        }
    }
    println!(
        "{} vertices, {} indices",
        loader.streams().len(),
        loader.indices().len()
    );

    if !loaded {
        bail!("failed to load {}", args.model.display());
    }

    loader.render();
    if let Some(err) = device.take_error() {
        bail!("render failed: {err}");
    }

    log::info!("Graceful shutdown. Bye!");
    Ok(())
}
