use burn::backend::{Autodiff, NdArray};
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::Distribution;
use burn::tensor::backend::AutodiffBackend;
use clap::Parser;
use sodkit::loss::segmentation::one_hot_labels;
use sodkit::summary::scalar_value;
use sodkit::{
    ConvolutionConfig, DeconvolutionConfig, InceptionConfig, NormMode, Padding, ResidualConfig,
    SegmentationLossConfig, SodMatrix,
};
use std::fs::File;
use std::io::BufWriter;
use tracing_subscriber::EnvFilter;

// $ RUST_LOG=sodkit=debug cargo run -p unet_demo -- --features=2 --summary-path=/tmp/unet.jsonl
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Random seed for reproducibility.
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Batch size.
    #[arg(short, long, default_value_t = 2)]
    batch_size: usize,

    /// Square image size; must be even.
    #[arg(long, default_value_t = 16)]
    image_size: usize,

    /// Inception feature maps per branch.
    #[arg(long, default_value_t = 2)]
    features: usize,

    /// Nodule class factor for the segmentation loss.
    #[arg(long, default_value_t = 2.0)]
    class_factor: f64,

    /// L2 weight penalty scale.
    #[arg(long, default_value_t = 1e-4)]
    weight_decay: f64,

    /// Padding mode for the encoder convolutions: SAME or VALID.
    #[arg(long, default_value = "SAME")]
    padding: String,

    /// Write summaries as JSON lines to this path.
    #[arg(long)]
    summary_path: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    type B = Autodiff<NdArray<f32>>;

    let device = Default::default();
    backend_main::<B>(&args, &device)
}

/// Forward a tiny encoder/decoder through every builder.
fn forward<B: Backend>(
    matrix: &mut SodMatrix<B>,
    args: &Args,
    images: Tensor<B, 4>,
    phase: NormMode,
) -> anyhow::Result<Tensor<B, 4>> {
    let padding: Padding = args.padding.parse()?;
    let k = args.features;
    let width = 4 * k;
    let phase = Some(phase);

    let enc1 = matrix.convolution(
        "enc1",
        images,
        &ConvolutionConfig::new(3, width)
            .with_stride(1)
            .with_padding(padding),
        phase,
    )?;

    let down = matrix.convolution(
        "down1",
        enc1.clone(),
        &ConvolutionConfig::new(3, width).with_padding(padding),
        phase,
    )?;

    let res = matrix.residual_layer("res1", down, &ResidualConfig::new(3, k), phase)?;

    let inc = matrix.inception_layer("inc1", res, &InceptionConfig::new(k), phase)?;

    let [batch, height, width_px, _] = enc1.dims();
    let up = matrix.deconvolution(
        "up1",
        inc,
        Some(enc1),
        &DeconvolutionConfig::new(3, width)
            .with_padding(padding)
            .with_out_shape(Some([batch, height, width_px, width])),
        phase,
    )?;

    let logits = matrix.convolution(
        "logits",
        up,
        &ConvolutionConfig::new(1, 2)
            .with_stride(1)
            .with_batch_norm(false),
        None,
    )?;

    Ok(logits)
}

/// Build the network, compute the losses, and run a backward pass.
pub fn backend_main<B: AutodiffBackend>(
    args: &Args,
    device: &B::Device,
) -> anyhow::Result<()> {
    anyhow::ensure!(
        args.image_size % 2 == 0,
        "image size must be even: {}",
        args.image_size
    );
    B::seed(args.seed);

    let shape = [args.batch_size, args.image_size, args.image_size, 1];
    let images: Tensor<B, 4> = Tensor::random(shape, Distribution::Default, device);
    let labels: Tensor<B, 4, Int> =
        Tensor::random(shape, Distribution::Uniform(0.0, 3.0), device);

    let mut matrix: SodMatrix<B> = SodMatrix::new(device);

    let logits = forward(&mut matrix, args, images.clone(), NormMode::Training)?;
    tracing::info!(dims = ?logits.dims(), "forward");

    let seg_loss = matrix.segmentation_sce_loss(
        logits.clone(),
        labels.clone(),
        &SegmentationLossConfig::new().with_class_factor(args.class_factor),
    )?;
    let mse_loss = matrix.mse_loss(logits, one_hot_labels(labels, 2), true)?;

    let collections = matrix.collections();
    let data_loss = collections
        .total_loss()
        .ok_or_else(|| anyhow::anyhow!("no losses registered"))?;
    let l2 = collections
        .weight_l2_loss(matrix.store())
        .ok_or_else(|| anyhow::anyhow!("no weights registered"))?;
    let total = data_loss + l2.mul_scalar(args.weight_decay);

    println!("parameters:   {}", matrix.store().num_params());
    println!("kernels:      {}", matrix.collections().weights().len());
    println!("seg loss:     {:.6}", scalar_value(seg_loss));
    println!("mse loss:     {:.6}", scalar_value(mse_loss));
    println!("total loss:   {:.6}", scalar_value(total.clone()));

    let grads = total.backward();
    let with_grads = matrix
        .collections()
        .weights()
        .iter()
        .filter_map(|name| matrix.store().kernel(name))
        .filter(|kernel| kernel.grad(&grads).is_some())
        .count();
    println!("kernel grads: {with_grads}");

    // Evaluation pass: reuses every parameter and the running statistics.
    matrix.collections_mut().clear_losses();
    matrix.set_reuse(sodkit::ReuseMode::Reuse);
    let eval = forward(&mut matrix, args, images, NormMode::Inference)?;
    tracing::info!(dims = ?eval.dims(), "inference");

    if let Some(path) = &args.summary_path {
        let file = BufWriter::new(File::create(path)?);
        matrix.collections().write_summaries_jsonl(file)?;
        println!(
            "summaries:    {} -> {path}",
            matrix.collections().summaries().len()
        );
    }

    Ok(())
}
