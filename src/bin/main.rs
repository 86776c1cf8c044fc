//! Landscape Data CLI
//!
//! Import a raw height field and optional layer masks, then inspect or export it.

use clap::{Args, Parser, Subcommand, ValueEnum};
use landscape_data::export::read_r16;
use landscape_data::{
    export_glb, export_obj, AlphamapType, HeightmapCodec, ImportRequest, IntRect, LandscapeConfig,
    LayerInfo, Png16Codec, Proxy, RawCodec,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "landscape-data")]
#[command(author, version, about = "Build and export terrain data from raw height fields", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import and print a grid, texture and allocation summary
    Info {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Export the landscape as a mesh
    Mesh {
        #[command(flatten)]
        input: InputArgs,

        /// Output file path (extension added when missing)
        #[arg(short, long)]
        output: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "glb")]
        format: MeshFormat,

        /// LOD to triangulate (clamped to the coarsest level)
        #[arg(long, default_value = "0")]
        lod: i32,
    },

    /// Re-export the imported height field
    Heightmap {
        #[command(flatten)]
        input: InputArgs,

        /// Output file path (extension added when missing)
        #[arg(short, long)]
        output: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "png")]
        format: HeightmapFormat,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Raw little-endian 16-bit height file
    #[arg(long)]
    heights: PathBuf,

    /// Vertices per row; a square field is assumed when omitted
    #[arg(long)]
    width: Option<u32>,

    /// Layer masks as name=path pairs of raw 8-bit files, bottom layer first
    #[arg(short, long, value_parser = parse_layer)]
    layer: Vec<(String, PathBuf)>,

    /// Apply layer knockout instead of plain normalization
    #[arg(long)]
    layered: bool,

    /// JSON landscape configuration
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum MeshFormat {
    /// Binary glTF format
    Glb,
    /// Wavefront OBJ format
    Obj,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum HeightmapFormat {
    /// 16-bit grayscale PNG
    Png,
    /// Raw little-endian 16-bit samples
    R16,
}

fn parse_layer(s: &str) -> Result<(String, PathBuf), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 || parts[0].is_empty() {
        return Err(format!("Invalid layer format: '{}'. Use name=path", s));
    }
    Ok((parts[0].to_string(), PathBuf::from(parts[1])))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { input } => {
            let proxy = load_landscape(&input)?;
            show_info(&proxy);
        }
        Commands::Mesh {
            input,
            output,
            format,
            lod,
        } => {
            let proxy = load_landscape(&input)?;
            export_mesh(&proxy, &output, format, lod)?;
        }
        Commands::Heightmap {
            input,
            output,
            format,
        } => {
            let proxy = load_landscape(&input)?;
            let codec: &dyn HeightmapCodec = match format {
                HeightmapFormat::Png => &Png16Codec,
                HeightmapFormat::R16 => &RawCodec,
            };
            let path = with_default_extension(&output, codec.extension());
            let dims = proxy.export_heightmap(&path, codec)?;
            println!("Exported {}x{} heightmap to {:?}", dims.width, dims.height, path);
        }
    }

    Ok(())
}

fn load_landscape(input: &InputArgs) -> Result<Proxy, Box<dyn std::error::Error>> {
    let config: LandscapeConfig = match &input.config {
        Some(path) => {
            println!("Loading config from {:?}...", path);
            LandscapeConfig::from_json(&fs::read_to_string(path)?)?
        }
        None => LandscapeConfig::default(),
    };

    println!("Loading heights from {:?}...", input.heights);
    let heights = read_r16(&input.heights)?;
    let width = match input.width {
        Some(w) => w as usize,
        None => (heights.len() as f64).sqrt() as usize,
    };
    if width == 0 || heights.len() % width != 0 {
        return Err(format!("{} heights do not form rows of {}", heights.len(), width).into());
    }
    let height = heights.len() / width;
    println!("  {}x{} vertices", width, height);

    let mut proxy = Proxy::new(config.clone())?;
    let extent = IntRect::new(0, 0, width as i32 - 1, height as i32 - 1);
    let mut request = ImportRequest::new(extent, config.num_subsections, config.subsection_size_quads, heights);
    if input.layered {
        request = request.with_alphamap_type(AlphamapType::Layered);
    }
    for (name, path) in &input.layer {
        let data = fs::read(path)?;
        let id = proxy.layers.register(LayerInfo::new(name.clone()));
        println!("  Layer {} from {:?} ({} samples)", name, path, data.len());
        request = request.with_layer(id, data);
    }

    proxy.import(&request)?;
    Ok(proxy)
}

fn show_info(proxy: &Proxy) {
    println!("\nLandscape Info:");
    if let Some(extent) = proxy.get_landscape_extent() {
        println!(
            "  Extent: ({}, {}) - ({}, {})",
            extent.x1, extent.y1, extent.x2, extent.y2
        );
    }
    let config = &proxy.config;
    println!(
        "  Components: {} ({} quads, {}x{} subsections)",
        proxy.components.len(),
        config.component_size_quads,
        config.num_subsections,
        config.subsection_size_quads
    );
    println!("  Textures: {}", proxy.textures.len());
    println!("  Weightmaps: {}", proxy.weightmap_usage.len());
    for (texture, usage) in proxy.weightmap_usage.iter() {
        println!(
            "    #{}: {} free channels",
            texture.0,
            usage.free_channel_count()
        );
    }
    println!("  Layers:");
    for (id, info) in proxy.layers.iter() {
        let painted = proxy
            .components
            .values()
            .filter(|c| c.allocation_index(id).is_some())
            .count();
        println!("    {} ({} components)", info.name, painted);
    }
    println!("  Collision components: {}", proxy.collisions.len());
    println!("  Material instances: {}", proxy.materials.instance_count());
}

fn export_mesh(
    proxy: &Proxy,
    path: &Path,
    format: MeshFormat,
    lod: i32,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(mesh) = proxy.export_to_raw_mesh(lod, None)? else {
        return Err("Landscape has no visible triangles".into());
    };
    println!(
        "  Generated {} vertices, {} triangles",
        mesh.positions.len(),
        mesh.triangle_count()
    );

    match format {
        MeshFormat::Glb => {
            let glb_path = with_default_extension(path, "glb");
            let glb_data = export_glb(&mesh)?;
            fs::write(&glb_path, &glb_data)?;
            println!("Exported GLB ({} bytes) to {:?}", glb_data.len(), glb_path);
        }
        MeshFormat::Obj => {
            let obj_path = with_default_extension(path, "obj");
            let name = obj_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("landscape")
                .to_string();
            let obj_export = export_obj(&mesh, &name)?;
            let mtl_path = obj_path.with_extension("mtl");
            fs::write(&obj_path, &obj_export.obj)?;
            fs::write(&mtl_path, &obj_export.mtl)?;
            println!("Exported OBJ to {:?}", obj_path);
            println!("  Material: {:?}", mtl_path);
        }
    }
    Ok(())
}

fn with_default_extension(path: &Path, extension: &str) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(extension)
    }
}
