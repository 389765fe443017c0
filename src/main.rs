use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use memmap2::Mmap;
use std::{
    ops::Range,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::fs::File;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use railread::{
    analysis::{AnalysisKey, AnalysisRequest, AnalysisWorker},
    config::ViewerConfig,
    draw,
    layout::model::{OrtConfig, OrtExecutionProvider, OrtLayoutDetector},
    raster::{PageRasterizer, PdfiumRasterizer},
};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "railread - high-magnification PDF reading assist",
    long_about = "railread is a PDF reader for low-vision users: above a zoom threshold the \
viewport locks onto detected text regions and advances line by line. This binary runs the \
layout analysis pipeline over a document and prints the navigable structure it found."
)]
struct Args {
    /// Path to the PDF document to open
    file_path: Option<PathBuf>,

    #[arg(
        long,
        short('r'),
        help = "Specify pages to analyze (e.g., '1-5' or '1' for single page)"
    )]
    page_range: Option<String>,

    /// Path to the layout model. Without one the reader degrades to a
    /// single whole-page region per page.
    #[arg(
        long,
        env = "RAILREAD_LAYOUT_MODEL",
        help = "Specify the path to the layout detection model"
    )]
    model_path: Option<PathBuf>,

    #[arg(
        long,
        env = "RAILREAD_CONFIG",
        help = "Specify the path to the settings document"
    )]
    config: Option<PathBuf>,

    /// Enable debug mode to save per-page overlay images
    #[arg(
        long,
        default_value_t = false,
        env = "RAILREAD_DEBUG",
        help = "Save per-page overlay images showing blocks and lines"
    )]
    debug: bool,

    #[arg(
        long,
        env = "RAILREAD_OUTPUT_DIR",
        help = "Specify the directory to store overlay output"
    )]
    output_dir: Option<PathBuf>,

    /// Use CoreML for layout inference (default: true on macOS)
    #[arg(
        long,
        default_value_t = cfg!(target_os = "macos"),
        help = "Enable or disable the use of CoreML for layout inference"
    )]
    coreml: bool,

    #[arg(
        long,
        default_value_t = true,
        help = "Enable or disable Apple Neural Engine acceleration (only applies when CoreML is enabled)"
    )]
    use_ane: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Enable or disable the use of TensorRT for layout inference"
    )]
    trt: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Enable or disable the use of CUDA for layout inference"
    )]
    cuda: bool,

    /// CUDA device ID to use for GPU acceleration (e.g. 0 for first GPU)
    #[arg(
        long,
        help = "CUDA device ID to use (0 for first GPU)",
        default_value_t = 0
    )]
    device_id: i32,

    #[arg(
        long,
        help = "Number of threads to use for parallel processing within operations",
        default_value = "4"
    )]
    intra_threads: usize,

    #[arg(
        long,
        help = "Number of threads to use for executing operations in parallel",
        default_value = "2"
    )]
    inter_threads: usize,
}

fn parse_page_range(range_str: &str) -> anyhow::Result<Range<usize>> {
    if let Some((start, end)) = range_str.split_once('-') {
        let start: usize = start.trim().parse()?;
        let end: usize = end.trim().parse()?;
        if start > 0 && end >= start {
            Ok(Range {
                start: start - 1,
                end,
            })
        } else {
            anyhow::bail!("Invalid page range: start must be > 0 and end must be >= start")
        }
    } else {
        // Single page
        let page: usize = range_str.trim().parse()?;
        if page > 0 {
            Ok(Range {
                start: page - 1,
                end: page,
            })
        } else {
            anyhow::bail!("Page number must be greater than 0")
        }
    }
}

fn parse_ep_args(args: &Args) -> Vec<OrtExecutionProvider> {
    let mut providers = Vec::new();
    if args.trt {
        providers.push(OrtExecutionProvider::Trt(args.device_id));
    }
    if args.cuda {
        providers.push(OrtExecutionProvider::CUDA(args.device_id));
    }
    if args.coreml {
        providers.push(OrtExecutionProvider::CoreML {
            ane_only: args.use_ane,
        });
    }
    providers.push(OrtExecutionProvider::CPU);
    providers
}

fn setup_progress_bar(length_pages: usize) -> ProgressBar {
    let pb = ProgressBar::new(length_pages as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    pb
}

fn spawn_worker(args: &Args) -> AnalysisWorker {
    match &args.model_path {
        Some(model_path) => {
            let mut ort_config = OrtConfig::new(model_path);
            ort_config.execution_providers = parse_ep_args(args);
            ort_config.intra_threads = args.intra_threads;
            ort_config.inter_threads = args.inter_threads;
            AnalysisWorker::spawn(ort_config)
        }
        None => AnalysisWorker::spawn_with(|| {
            anyhow::Result::<OrtLayoutDetector>::Err(anyhow::anyhow!(
                "no layout model configured"
            ))
        }),
    }
}

async fn analyze_document(args: Args, config: ViewerConfig, file_path: PathBuf) -> anyhow::Result<()> {
    let doc_name = file_path
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.split('.').next().map(|s| s.to_owned()))
        .unwrap_or(Uuid::new_v4().to_string());

    let file = File::open(&file_path).await?;
    let mmap = unsafe { Mmap::map(&file)? };
    let data: Arc<[u8]> = Arc::from(&mmap[..]);

    let rasterizer = {
        let data = data.clone();
        tokio::task::spawn_blocking(move || PdfiumRasterizer::new(data, None)).await??
    };
    let rasterizer: Arc<dyn PageRasterizer> = Arc::new(rasterizer);
    let page_count = rasterizer.page_count() as usize;

    let range = match &args.page_range {
        Some(range_str) => {
            let range = parse_page_range(range_str)?;
            anyhow::ensure!(
                range.end <= page_count,
                "Page range end ({}) exceeds document length ({})",
                range.end,
                page_count
            );
            range
        }
        None => 0..page_count,
    };

    let output_dir = if args.debug {
        let dir = args
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("./{doc_name}-overlays")));
        std::fs::create_dir_all(&dir)?;
        Some(dir)
    } else {
        None
    };

    let mut worker = spawn_worker(&args);
    let navigable = config.navigable_class_ids();

    let pb = setup_progress_bar(range.len());
    for page in range {
        let raster = rasterizer.clone();
        let pixmap = tokio::task::spawn_blocking(move || {
            raster.render_pixmap(page, OrtLayoutDetector::INPUT_SIZE)
        })
        .await??;
        let (page_w, page_h) = rasterizer.page_size(page)?;

        worker.submit(AnalysisRequest {
            key: AnalysisKey {
                file_path: file_path.clone(),
                page,
            },
            pixmap,
            page_w,
            page_h,
        });
        let result = loop {
            match worker.poll() {
                Some(result) => break result,
                None => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };

        pb.suspend(|| print_page_summary(page, &result, &navigable));
        pb.set_message(format!("Page #{}", page + 1));
        pb.inc(1u64);

        if let Some(dir) = &output_dir {
            let raster = rasterizer.clone();
            let page_img =
                tokio::task::spawn_blocking(move || raster.render_page(page, 150.0)).await??;
            let mut overlay =
                draw::draw_analysis(result.analysis.as_ref(), &page_img, 150.0 / 72.0);
            draw::apply_colour_effect(
                &mut overlay,
                config.colour_effect,
                config.colour_effect_intensity,
            );
            overlay.save(dir.join(format!("page_{page}.png")))?;
        }
    }
    pb.finish_with_message("done");

    if let Some(dir) = output_dir {
        println!(
            "{} Overlays saved in: {}",
            "✓".green().bold(),
            dir.display().to_string().cyan().underline()
        );
    }
    worker.shutdown();
    Ok(())
}

fn print_page_summary(
    page: usize,
    result: &railread::analysis::AnalysisResult,
    navigable: &std::collections::HashSet<usize>,
) {
    let analysis = &result.analysis;
    let navigable_count = analysis
        .blocks
        .iter()
        .filter(|b| navigable.contains(&b.class_id))
        .count();
    let header = format!(
        "Page {} - {} blocks, {} navigable",
        page + 1,
        analysis.blocks.len(),
        navigable_count
    );
    if result.fallback {
        println!("{} {}", header.bold(), "(fallback: no detector)".yellow());
    } else {
        println!("{}", header.bold());
    }
    for block in &analysis.blocks {
        let name = if navigable.contains(&block.class_id) {
            block.class_name().green()
        } else {
            block.class_name().dimmed()
        };
        println!(
            "  #{:<3} {:<18} conf {:.2}  {} lines",
            block.order,
            name,
            block.confidence,
            block.lines.len()
        );
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ViewerConfig::load(path).unwrap_or_else(|e| {
            eprintln!("{} {e:?}", "config error:".red().bold());
            ViewerConfig::default()
        }),
        None => ViewerConfig::load_default(),
    };

    let Some(file_path) = args.file_path.clone() else {
        println!(
            "{} no document given; pass a PDF path to analyze it",
            "ℹ".yellow().bold()
        );
        return;
    };

    if let Err(e) = analyze_document(args, config, file_path).await {
        eprintln!("{} {e:?}", "error:".red().bold());
        std::process::exit(1);
    }
}
