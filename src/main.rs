use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use refract::app::{self, AppConfig, Demo, Renderer};
use refract::demo;
use refract::dof::{DepthOfField, DofConfig, DownsampleMode};
use refract::error::{RenderError, RenderResult};
use refract::gpu::GpuContext;
use refract::instancing::TraceParams;
use refract::orbit_camera::{OrbitCamera, OrbitMode};
use refract::procedural::{StreamlineConfig, VectorFieldConfig};
use refract::scene::{Scene, SceneNode};
use refract::scene_pass::Projection;

#[derive(Parser, Debug)]
#[command(name = "refract", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,

    /// Window width in pixels.
    #[arg(long, default_value_t = 640, global = true)]
    width: u32,

    /// Window height in pixels.
    #[arg(long, default_value_t = 480, global = true)]
    height: u32,

    /// Orbit speed in radians per second; 0 holds the camera still.
    #[arg(long, default_value_t = 0.15, global = true)]
    spin: f32,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Depth of field over a field of spheres and boxes.
    Dof(DofArgs),
    /// An m x n arrow field drawn with one instanced call.
    VectorField(FieldArgs),
    /// Three animated streamlines of blended point sprites.
    Streamlines(StreamlineArgs),
    /// The arrow field again, one scene node and one draw per arrow.
    NonInstanced(FieldArgs),
}

#[derive(Parser, Debug)]
struct DofArgs {
    /// Eye-space z of the focal plane. Defaults to the scene center.
    #[arg(long, allow_negative_numbers = true)]
    focal_dist: Option<f32>,

    /// Distance from the focal plane at which blur saturates. Defaults to
    /// the scene radius.
    #[arg(long)]
    focal_range: Option<f32>,

    /// How the half-resolution image is made.
    #[arg(long, value_enum, default_value_t = Downsample::Rerender)]
    downsample: Downsample,

    /// Scale on the blur tap spacing.
    #[arg(long, default_value_t = 1.0)]
    blur_spread: f32,
}

#[derive(Parser, Debug)]
struct FieldArgs {
    #[arg(long, default_value_t = 128)]
    m: u32,

    #[arg(long, default_value_t = 128)]
    n: u32,

    /// Grid spacing on both axes.
    #[arg(long, default_value_t = 1.5)]
    spacing: f32,

    /// Render through the depth-of-field pipeline.
    #[arg(long)]
    blur: bool,
}

#[derive(Parser, Debug)]
struct StreamlineArgs {
    /// Samples per streamline.
    #[arg(long, default_value_t = 256)]
    samples: u32,

    #[arg(long, default_value_t = 5)]
    traces: u32,

    /// Seconds for a trace head to reach the next one.
    #[arg(long, default_value_t = 1.0)]
    interval: f32,

    /// Trace tail length in samples.
    #[arg(long, default_value_t = 14.0)]
    length: f32,

    /// Sprite image; a generated splotch is used if it cannot be loaded.
    #[arg(long)]
    sprite: Option<PathBuf>,

    /// Render through the depth-of-field pipeline.
    #[arg(long)]
    blur: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Downsample {
    Rerender,
    Texture,
}

impl From<Downsample> for DownsampleMode {
    fn from(value: Downsample) -> Self {
        match value {
            Downsample::Rerender => DownsampleMode::Rerender,
            Downsample::Texture => DownsampleMode::FocusedTexture,
        }
    }
}

fn main() -> RenderResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::new()
        .title(format!("refract: {}", title(&cli.cmd)))
        .size(cli.width, cli.height);
    let dof = DofConfig::default().with_size(cli.width, cli.height);
    let spin = cli.spin;

    app::run_with_config(config, move |gpu| match cli.cmd {
        Command::Dof(args) => {
            let dof = dof.with_downsample(args.downsample.into());
            let content = demo::dof_showcase(gpu);
            let mut demo = present(gpu, vec![content], Some(dof), spin)?;
            if let Renderer::DepthOfField(dof) = &mut demo.renderer {
                if let Some(dist) = args.focal_dist {
                    dof.set_focal_dist(dist);
                }
                if let Some(range) = args.focal_range {
                    dof.set_focal_range(range);
                }
                dof.set_blur_spread(args.blur_spread)?;
            }
            Ok(demo)
        }
        Command::VectorField(args) => {
            let field = field_config(&args);
            let content = demo::vector_field(gpu, &field)?;
            present(gpu, vec![content], args.blur.then_some(dof), spin)
        }
        Command::NonInstanced(args) => {
            let field = field_config(&args);
            let content = demo::vector_field_nodes(gpu, &field)?;
            present(gpu, vec![content], args.blur.then_some(dof), spin)
        }
        Command::Streamlines(args) => {
            let lines = StreamlineConfig::default().with_samples(args.samples, 1);
            let trace = TraceParams::default()
                .with_traces(args.traces)
                .with_interval(args.interval)
                .with_length(args.length);
            let sprite = demo::sprite(gpu, args.sprite.as_deref())?;
            let content = demo::streamlines(gpu, &lines, trace, &sprite)?;
            let span = lines.spacing * lines.count()? as f32;
            let center = refract::procedural::STREAMLINES[0].0 + glam::Vec3::X * span * 0.5;
            let ground = demo::ground(gpu, center, span);
            present(gpu, vec![ground, content], args.blur.then_some(dof), spin)
        }
    })
}

fn title(cmd: &Command) -> &'static str {
    match cmd {
        Command::Dof(_) => "depth of field",
        Command::VectorField(_) => "vector field",
        Command::Streamlines(_) => "streamlines",
        Command::NonInstanced(_) => "vector field (per-node)",
    }
}

fn field_config(args: &FieldArgs) -> VectorFieldConfig {
    VectorFieldConfig::default()
        .with_grid(args.m, args.n)
        .with_spacing(args.spacing, args.spacing)
}

/// Puts `content` in a scene and picks the renderer: the depth-of-field
/// pipeline when `dof` is set, a single forward pass otherwise.
fn present(
    gpu: &GpuContext,
    content: Vec<SceneNode>,
    dof: Option<DofConfig>,
    spin: f32,
) -> RenderResult<Demo> {
    let mut scene = Scene::new();
    scene.extend(content);
    let bounds = scene
        .bounds()
        .ok_or_else(|| RenderError::configuration("scene has nothing to frame"))?;

    let mode = if spin == 0.0 {
        OrbitMode::Fixed
    } else {
        OrbitMode::AutoRotate { speed: spin }
    };
    let orbit = OrbitCamera::new().mode(mode).home(&bounds);
    // Keep the whole scene inside the far plane from anywhere on the orbit.
    let far = (orbit.distance + bounds.radius() * 2.0).max(100.0);

    let renderer = match dof {
        Some(config) => {
            let config = config
                .with_clip(config.near, far)
                .with_focal_point(-orbit.distance, bounds.radius());
            let mut dof = DepthOfField::new(config);
            *dof.scene_parent().borrow_mut() = scene;
            dof.init(gpu)?;
            Renderer::DepthOfField(dof)
        }
        None => {
            let projection = Projection {
                far,
                ..Projection::default()
            };
            let scene = Rc::new(RefCell::new(scene));
            let graph =
                demo::forward_graph(gpu, scene, projection, DofConfig::default().clear_color)?;
            Renderer::Graph(graph)
        }
    };
    Ok(Demo::new(renderer, orbit))
}
